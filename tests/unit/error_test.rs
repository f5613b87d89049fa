//! Tests for error types

use prometheus_planboard::core::BoardError;
use uuid::Uuid;

#[test]
fn test_not_found_error() {
    let err = BoardError::not_found("card", "abc");
    assert_eq!(format!("{err}"), "card not found: abc");
    assert!(err.is_not_found());
}

#[test]
fn test_incomplete_dependencies_error() {
    let err = BoardError::IncompleteDependencies {
        card_id: Uuid::nil(),
        pending: vec![Uuid::new_v4(), Uuid::new_v4()],
    };
    assert_eq!(
        format!("{err}"),
        format!("incomplete dependencies: card {} waits on 2 unfinished card(s)", Uuid::nil())
    );
    assert!(!err.is_not_found());
}

#[test]
fn test_upstream_error() {
    let err = BoardError::Upstream("timeout".to_string());
    assert_eq!(format!("{err}"), "upstream error: timeout");
}

#[test]
fn test_backend_error() {
    let err = BoardError::Backend("connection failed".to_string());
    assert_eq!(format!("{err}"), "backend error: connection failed");
}

#[test]
fn test_json_error_becomes_backend() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: BoardError = json_err.into();
    assert!(matches!(err, BoardError::Backend(ref m) if m.starts_with("json: ")));
}

#[test]
fn test_board_error_into_anyhow() {
    let err: anyhow::Error = BoardError::InvalidInput("empty title".into()).into();
    assert_eq!(err.to_string(), "invalid input: empty title");
}
