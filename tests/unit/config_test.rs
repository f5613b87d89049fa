//! Tests for configuration validation

use std::collections::HashMap;

use prometheus_planboard::config::{
    ConductorConfig, DependencyCheck, StorageBackendConfig, TemplateSchedulerConfig,
};

#[test]
fn test_default_config_is_valid() {
    let cfg = ConductorConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.commands.max_attempts, 3);
    assert_eq!(cfg.templates.max_admissions_per_tick, 3);
    assert_eq!(cfg.templates.default_cooldown_secs, 3600);
    assert_eq!(cfg.board.dependency_check, DependencyCheck::Direct);
}

#[test]
fn test_zero_tick_interval_rejected() {
    let cfg = ConductorConfig {
        tick_interval_secs: 0,
        ..ConductorConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_admissions_rejected() {
    let cfg = ConductorConfig {
        templates: TemplateSchedulerConfig {
            max_admissions_per_tick: 0,
            ..TemplateSchedulerConfig::default()
        },
        ..ConductorConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("max_admissions_per_tick"));
}

#[test]
fn test_empty_sqlite_path_rejected() {
    let cfg = ConductorConfig {
        storage: StorageBackendConfig::Sqlite { path: "".into() },
        ..ConductorConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = ConductorConfig::from_json_str(
        r#"{
            "tick_interval_secs": 10,
            "storage": {"kind": "sqlite", "path": "/tmp/board.db"},
            "board": {"dependency_check": "transitive"},
            "commands": {"max_attempts": 5}
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.tick_interval_secs, 10);
    assert_eq!(
        cfg.storage,
        StorageBackendConfig::Sqlite {
            path: "/tmp/board.db".into()
        }
    );
    assert_eq!(cfg.board.dependency_check, DependencyCheck::Transitive);
    assert_eq!(cfg.board.default_board_name, "Main Board");
    assert_eq!(cfg.commands.max_attempts, 5);
    assert_eq!(cfg.commands.lease_secs, 900);
}

#[test]
fn test_from_json_str_validates() {
    let err = ConductorConfig::from_json_str(r#"{"commands": {"max_attempts": 0}}"#).unwrap_err();
    assert!(err.contains("max_attempts"));
    assert!(ConductorConfig::from_json_str("{").unwrap_err().starts_with("parse error"));
}

#[test]
fn test_overrides_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("TICK_INTERVAL_SECS", "5"),
        ("SQLITE_PATH", "data/board.db"),
        ("DEPENDENCY_CHECK", "Transitive"),
        ("MAX_ATTEMPTS", "4"),
        ("EXECUTION_RULES", "Ask before deleting anything."),
    ]
    .into_iter()
    .collect();
    let mut cfg = ConductorConfig::default();
    cfg.apply_overrides(|key| vars.get(key).map(ToString::to_string))
        .unwrap();
    assert_eq!(cfg.tick_interval_secs, 5);
    assert_eq!(
        cfg.storage,
        StorageBackendConfig::Sqlite {
            path: "data/board.db".into()
        }
    );
    assert_eq!(cfg.board.dependency_check, DependencyCheck::Transitive);
    assert_eq!(cfg.commands.max_attempts, 4);
    assert_eq!(cfg.execution_rules, "Ask before deleting anything.");
}

#[test]
fn test_bad_override_names_the_variable() {
    let mut cfg = ConductorConfig::default();
    let err = cfg
        .apply_overrides(|key| (key == "LEASE_SECS").then(|| "soon".to_string()))
        .unwrap_err();
    assert!(err.contains("PLANBOARD_LEASE_SECS"));

    let err = cfg
        .apply_overrides(|key| (key == "DEPENDENCY_CHECK").then(|| "deep".to_string()))
        .unwrap_err();
    assert!(err.contains("deep"));
}
