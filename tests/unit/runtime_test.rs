//! Tests for the tokio spawner and API helpers

use std::sync::Arc;

use prometheus_planboard::config::{BoardConfig, DependencyCheck};
use prometheus_planboard::core::model::{DONE_COLUMN, TODO_COLUMN};
use prometheus_planboard::core::{BoardManager, NewCard};
use prometheus_planboard::infra::InMemoryStore;
use prometheus_planboard::runtime::{
    board_snapshot, health, move_card, MoveCardRequest, Spawn, TokioSpawner,
};

fn board() -> BoardManager {
    BoardManager::new(
        Arc::new(InMemoryStore::new()),
        BoardConfig {
            dependency_check: DependencyCheck::Direct,
            ..BoardConfig::default()
        },
        3,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::current().expect("inside a runtime");

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_tokio_spawner_outside_runtime() {
    assert!(TokioSpawner::current().is_err());
}

#[tokio::test]
async fn test_move_card_refusal_names_the_rule_and_prerequisites() {
    let board = board();
    let b = board.default_board().await.unwrap();
    let (prereq, _) = board
        .create_card(
            b.id,
            TODO_COLUMN,
            NewCard {
                title: "Write tests".into(),
                ..NewCard::default()
            },
        )
        .await
        .unwrap();
    let (card, _) = board
        .create_card(
            b.id,
            TODO_COLUMN,
            NewCard {
                title: "Release".into(),
                ..NewCard::default()
            },
        )
        .await
        .unwrap();
    board.add_dependency(card.id, prereq.id).await.unwrap();

    let resp = move_card(
        &board,
        MoveCardRequest {
            card_id: card.id,
            column: DONE_COLUMN.into(),
        },
    )
    .await;
    assert!(!resp.ok);
    assert_eq!(resp.pending_dependencies, vec![prereq.id]);
    let message = resp.error.expect("message");
    assert!(message.contains("only be Done once every card it depends on is Done"));
    assert!(message.contains("\"Write tests\""));

    let resp = move_card(
        &board,
        MoveCardRequest {
            card_id: prereq.id,
            column: DONE_COLUMN.into(),
        },
    )
    .await;
    assert!(resp.ok);
    assert_eq!(resp.from_column.as_deref(), Some(TODO_COLUMN));
    assert_eq!(resp.to_column.as_deref(), Some(DONE_COLUMN));
}

#[tokio::test]
async fn test_move_unknown_card_reports_error() {
    let resp = move_card(
        &board(),
        MoveCardRequest {
            card_id: uuid::Uuid::new_v4(),
            column: DONE_COLUMN.into(),
        },
    )
    .await;
    assert!(!resp.ok);
    assert!(resp.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_snapshot_defaults_to_main_board_and_health() {
    let board = board();
    let snapshot = board_snapshot(&board, None).await.unwrap();
    assert_eq!(snapshot.board.name, "Main Board");
    assert_eq!(snapshot.columns.len(), 4);

    let status = health(&board).await;
    assert!(status.ok);
    assert!(status.running_command.is_none());
}
