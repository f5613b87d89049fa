//! Conductor wiring: events in, board events out, loops on a real runtime.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedCompletion, StaticTools};
use prometheus_planboard::builders::{build_conductor, build_store};
use prometheus_planboard::config::{ConductorConfig, StorageBackendConfig};
use prometheus_planboard::core::{BoardEvent, Correlation, TickOutcome};
use prometheus_planboard::runtime::{submit_event, Conductor, TokioSpawner};
use tokio::sync::broadcast;

fn conductor(completion: Arc<ScriptedCompletion>) -> Conductor {
    let cfg = ConductorConfig {
        tick_interval_secs: 1,
        ..ConductorConfig::default()
    };
    let store = build_store(&StorageBackendConfig::InMemory).unwrap();
    build_conductor(&cfg, store, completion, StaticTools::new()).unwrap()
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<BoardEvent>, mut wanted: F) -> BoardEvent
where
    F: FnMut(&BoardEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed in time")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submitted_command_runs_through_tick_loop() {
    let completion = ScriptedCompletion::new();
    completion.push_tool_response("Disk usage is 41%.", &["shell.run"]);
    let conductor = conductor(completion);
    let mut events = conductor.subscribe();
    conductor.start(&TokioSpawner::current().unwrap());

    let topic = submit_event(
        &conductor,
        r#"{"topic":"CommandReceived","payload":{"instruction":"check disk usage"}}"#,
    )
    .unwrap();
    assert_eq!(topic, "CommandReceived");

    let event = wait_for(&mut events, |e| matches!(e, BoardEvent::CommandCompleted { .. })).await;
    let BoardEvent::CommandCompleted { result, tools_used, .. } = event else {
        unreachable!();
    };
    assert_eq!(result, "Disk usage is 41%.");
    assert_eq!(tools_used, vec!["shell.run"]);
    conductor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plan_events_are_applied_in_order() {
    let conductor = conductor(ScriptedCompletion::new());
    let mut events = conductor.subscribe();
    conductor.start(&TokioSpawner::current().unwrap());

    submit_event(
        &conductor,
        r#"{"topic":"PlanProposed","payload":{"id":"p-42","title":"Renew certificates"}}"#,
    )
    .unwrap();
    submit_event(&conductor, r#"{"topic":"PlanApproved","payload":{"id":"p-42"}}"#).unwrap();

    let moved = wait_for(&mut events, |e| matches!(e, BoardEvent::TaskMoved { .. })).await;
    let BoardEvent::TaskMoved { to_column, .. } = moved else {
        unreachable!();
    };
    assert_eq!(to_column, "Doing");

    let card = conductor
        .board()
        .find_by_correlation(&Correlation::plan("p-42"))
        .await
        .unwrap()
        .expect("plan card");
    assert_eq!(card.title, "Renew certificates");
    conductor.shutdown();
}

#[tokio::test]
async fn test_manual_tick_on_empty_board() {
    let conductor = conductor(ScriptedCompletion::new());
    let summary = conductor.tick().await;
    assert_eq!(summary.commands, Some(TickOutcome::Idle));
    let templates = summary.templates.expect("scheduler ran");
    assert!(templates.evaluated.is_empty());
}

#[tokio::test]
async fn test_malformed_event_is_rejected_before_the_bus() {
    let conductor = conductor(ScriptedCompletion::new());
    let err = submit_event(&conductor, r#"{"topic":"PlanExploded","payload":{}}"#).unwrap_err();
    assert!(err.starts_with("invalid event"));
    assert!(submit_event(&conductor, "not json").is_err());
}

#[tokio::test]
async fn test_event_without_running_loop_is_reported() {
    let conductor = conductor(ScriptedCompletion::new());
    let err = submit_event(
        &conductor,
        r#"{"topic":"PlanProposed","payload":{"id":"p-7","title":"Lost plan"}}"#,
    )
    .unwrap_err();
    assert!(err.contains("not delivered"), "{err}");

    conductor.start(&TokioSpawner::current().unwrap());
    assert_eq!(
        submit_event(&conductor, r#"{"topic":"PlanApproved","payload":{"id":"p-7"}}"#).unwrap(),
        "PlanApproved"
    );
    conductor.shutdown();
}

#[test]
fn test_invalid_config_is_refused() {
    let cfg = ConductorConfig {
        bus_capacity: 0,
        ..ConductorConfig::default()
    };
    let store = build_store(&StorageBackendConfig::InMemory).unwrap();
    let err = build_conductor(&cfg, store, ScriptedCompletion::new(), StaticTools::new())
        .err()
        .expect("invalid config");
    assert!(err.to_string().contains("bus_capacity"));
}
