//! Conductor configuration structures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable prefix read by [`ConductorConfig::from_env`].
pub const ENV_PREFIX: &str = "PLANBOARD_";

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StorageBackendConfig {
    /// In-memory store for development/testing.
    InMemory,
    /// SQLite database file.
    Sqlite {
        /// Database path; created if missing.
        path: PathBuf,
    },
}

/// How far the Done-move dependency check reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCheck {
    /// Only direct prerequisites gate completion.
    #[default]
    Direct,
    /// Every card reachable through dependency edges gates completion.
    Transitive,
}

/// Board settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Name of the board auto-provisioned for plans, commands and instances.
    pub default_board_name: String,
    /// Dependency check depth.
    pub dependency_check: DependencyCheck,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            default_board_name: "Main Board".into(),
            dependency_check: DependencyCheck::Direct,
        }
    }
}

/// Command queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandQueueConfig {
    /// Attempt budget for new entries.
    pub max_attempts: u32,
    /// Lease length in seconds; a running entry is reclaimed after this.
    pub lease_secs: u64,
    /// Owner token prefix; a random suffix is added per process.
    pub worker_name: String,
}

impl Default for CommandQueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::core::model::DEFAULT_MAX_ATTEMPTS,
            lease_secs: 15 * 60,
            worker_name: "planboard".into(),
        }
    }
}

/// Template scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSchedulerConfig {
    /// Templates admitted per tick at most.
    pub max_admissions_per_tick: usize,
    /// Recent instances considered for the success rate.
    pub history_window: usize,
    /// Cooldown applied when the decision does not name one, in seconds.
    pub default_cooldown_secs: u64,
    /// Corrective re-asks after an invalid decision before defaulting.
    pub decision_retries: u32,
}

impl Default for TemplateSchedulerConfig {
    fn default() -> Self {
        Self {
            max_admissions_per_tick: 3,
            history_window: 5,
            default_cooldown_secs: 60 * 60,
            decision_retries: 1,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Execution rules injected into command and decision prompts.
    pub execution_rules: String,
    /// Capacity of the in-process broadcast channels.
    pub bus_capacity: usize,
    /// Storage backend.
    pub storage: StorageBackendConfig,
    /// Board settings.
    pub board: BoardConfig,
    /// Command queue settings.
    pub commands: CommandQueueConfig,
    /// Template scheduler settings.
    pub templates: TemplateSchedulerConfig,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            execution_rules: String::new(),
            bus_capacity: 1024,
            storage: StorageBackendConfig::InMemory,
            board: BoardConfig::default(),
            commands: CommandQueueConfig::default(),
            templates: TemplateSchedulerConfig::default(),
        }
    }
}

impl ConductorConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_secs == 0 {
            return Err("tick_interval_secs must be greater than 0".into());
        }
        if self.bus_capacity == 0 {
            return Err("bus_capacity must be greater than 0".into());
        }
        if self.board.default_board_name.trim().is_empty() {
            return Err("board.default_board_name must not be empty".into());
        }
        if self.commands.max_attempts == 0 {
            return Err("commands.max_attempts must be greater than 0".into());
        }
        if self.commands.lease_secs == 0 {
            return Err("commands.lease_secs must be greater than 0".into());
        }
        if self.templates.max_admissions_per_tick == 0 {
            return Err("templates.max_admissions_per_tick must be greater than 0".into());
        }
        if self.templates.history_window == 0 {
            return Err("templates.history_window must be greater than 0".into());
        }
        if let StorageBackendConfig::Sqlite { path } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err("storage.path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `PLANBOARD_*` variables, after loading `.env` if present.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (keys without the prefix).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
            raw.trim()
                .parse()
                .map_err(|_| format!("{ENV_PREFIX}{key}: cannot parse `{raw}`"))
        }

        if let Some(raw) = lookup("TICK_INTERVAL_SECS") {
            self.tick_interval_secs = parse("TICK_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("EXECUTION_RULES") {
            self.execution_rules = raw;
        }
        if let Some(raw) = lookup("BUS_CAPACITY") {
            self.bus_capacity = parse("BUS_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("SQLITE_PATH") {
            self.storage = StorageBackendConfig::Sqlite { path: raw.into() };
        }
        if let Some(raw) = lookup("DEFAULT_BOARD") {
            self.board.default_board_name = raw;
        }
        if let Some(raw) = lookup("DEPENDENCY_CHECK") {
            self.board.dependency_check = match raw.trim().to_ascii_lowercase().as_str() {
                "direct" => DependencyCheck::Direct,
                "transitive" => DependencyCheck::Transitive,
                other => {
                    return Err(format!(
                        "{ENV_PREFIX}DEPENDENCY_CHECK: unknown value `{other}`"
                    ));
                }
            };
        }
        if let Some(raw) = lookup("MAX_ATTEMPTS") {
            self.commands.max_attempts = parse("MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("LEASE_SECS") {
            self.commands.lease_secs = parse("LEASE_SECS", &raw)?;
        }
        if let Some(raw) = lookup("MAX_ADMISSIONS") {
            self.templates.max_admissions_per_tick = parse("MAX_ADMISSIONS", &raw)?;
        }
        if let Some(raw) = lookup("DEFAULT_COOLDOWN_SECS") {
            self.templates.default_cooldown_secs = parse("DEFAULT_COOLDOWN_SECS", &raw)?;
        }
        Ok(())
    }
}
