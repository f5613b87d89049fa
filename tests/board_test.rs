//! Board store behaviour: provisioning, dependency gating, labels, cascades.

mod common;

use std::sync::Arc;

use common::Harness;
use prometheus_planboard::config::{BoardConfig, CommandQueueConfig, DependencyCheck};
use prometheus_planboard::core::model::{
    DIRECT_COMMAND_LABEL, DOING_COLUMN, DONE_COLUMN, STANDARD_COLUMNS, TODO_COLUMN,
};
use prometheus_planboard::core::{BoardError, CommandStatus, NewCard};
use prometheus_planboard::infra::InMemoryStore;

fn new_card(title: &str) -> NewCard {
    NewCard {
        title: title.into(),
        ..NewCard::default()
    }
}

#[tokio::test]
async fn test_default_board_is_provisioned_once_with_standard_columns() {
    let h = Harness::new();
    let first = h.board.default_board().await.unwrap();
    let second = h.board.default_board().await.unwrap();
    assert_eq!(first.id, second.id);

    let names: Vec<String> = h
        .board
        .columns(first.id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, STANDARD_COLUMNS);
}

#[tokio::test]
async fn test_done_move_waits_for_dependency() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (prereq, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("prereq")).await.unwrap();
    let (dependent, _) = h
        .board
        .create_card(board.id, TODO_COLUMN, new_card("dependent"))
        .await
        .unwrap();
    h.board.add_dependency(dependent.id, prereq.id).await.unwrap();

    let err = h.board.move_card_to(dependent.id, DONE_COLUMN).await.unwrap_err();
    match err {
        BoardError::IncompleteDependencies { card_id, pending } => {
            assert_eq!(card_id, dependent.id);
            assert_eq!(pending, vec![prereq.id]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.column_name(dependent.id).await, TODO_COLUMN);

    h.board.move_card_to(prereq.id, DONE_COLUMN).await.unwrap();
    let outcome = h.board.move_card_to(dependent.id, DONE_COLUMN).await.unwrap();
    assert!(outcome.changed());
    assert_eq!(outcome.to.name, DONE_COLUMN);
}

#[tokio::test]
async fn test_done_check_is_case_insensitive_and_ignores_other_moves() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (prereq, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("a")).await.unwrap();
    let (dependent, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("b")).await.unwrap();
    h.board.add_dependency(dependent.id, prereq.id).await.unwrap();

    // Moves that do not enter Done are never gated.
    h.board.move_card_to(dependent.id, DOING_COLUMN).await.unwrap();
    assert!(h.board.move_card_to(dependent.id, " done ").await.is_err());
}

#[tokio::test]
async fn test_transitive_check_follows_chain() {
    let store = Arc::new(InMemoryStore::new());
    let h = Harness::with_parts(
        store,
        BoardConfig {
            dependency_check: DependencyCheck::Transitive,
            ..BoardConfig::default()
        },
        CommandQueueConfig::default(),
    );
    let board = h.board.default_board().await.unwrap();
    let (a, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("a")).await.unwrap();
    let (b, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("b")).await.unwrap();
    let (c, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("c")).await.unwrap();
    h.board.add_dependency(c.id, b.id).await.unwrap();
    h.board.add_dependency(b.id, a.id).await.unwrap();
    // A cycle back to c must not loop forever.
    h.board.add_dependency(a.id, c.id).await.unwrap();

    // b is unfinished and so is a, reachable through b.
    let err = h.board.move_card_to(c.id, DONE_COLUMN).await.unwrap_err();
    let BoardError::IncompleteDependencies { pending, .. } = err else {
        panic!("expected dependency refusal");
    };
    assert_eq!(pending.len(), 2);
    assert!(pending.contains(&a.id) && pending.contains(&b.id));
}

#[tokio::test]
async fn test_direct_check_ignores_second_hop() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (a, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("a")).await.unwrap();
    let (b, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("b")).await.unwrap();
    let (c, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("c")).await.unwrap();
    h.board.add_dependency(c.id, b.id).await.unwrap();
    h.board.add_dependency(b.id, a.id).await.unwrap();

    // Force b into Done by dropping its own edge first, then restoring it.
    assert!(h.board.remove_dependency(b.id, a.id).await.unwrap());
    h.board.move_card_to(b.id, DONE_COLUMN).await.unwrap();
    h.board.add_dependency(b.id, a.id).await.unwrap();

    h.board.move_card_to(c.id, DONE_COLUMN).await.unwrap();
}

#[tokio::test]
async fn test_self_dependency_rejected() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (card, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("x")).await.unwrap();
    assert!(matches!(
        h.board.add_dependency(card.id, card.id).await,
        Err(BoardError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_labels_round_trip_in_order() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (card, _) = h
        .board
        .create_card(
            board.id,
            TODO_COLUMN,
            NewCard {
                title: "labelled".into(),
                labels: vec!["x".into(), "y".into()],
                ..NewCard::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(h.board.card(card.id).await.unwrap().labels, vec!["x", "y"]);

    let updated = h.board.add_labels(card.id, ["y", "z"]).await.unwrap();
    assert_eq!(updated.labels, vec!["x", "y", "z"]);
}

#[tokio::test]
async fn test_direct_command_label_enqueues_once() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (card, _) = h
        .board
        .create_card(
            board.id,
            TODO_COLUMN,
            NewCard {
                title: "restart".into(),
                description: "restart the build agent".into(),
                ..NewCard::default()
            },
        )
        .await
        .unwrap();
    assert!(h.commands.entries_for_card(card.id).await.unwrap().is_empty());

    h.board.add_labels(card.id, [DIRECT_COMMAND_LABEL]).await.unwrap();
    h.board.add_labels(card.id, [DIRECT_COMMAND_LABEL, "ops"]).await.unwrap();
    let entries = h.commands.entries_for_card(card.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, CommandStatus::Pending);
    assert_eq!(entries[0].instruction, "restart the build agent");
}

#[tokio::test]
async fn test_delete_card_cascades_edges_and_entries() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (prereq, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("prereq")).await.unwrap();
    let (dependent, _) = h
        .board
        .create_card(
            board.id,
            TODO_COLUMN,
            NewCard {
                title: "cmd".into(),
                labels: vec![DIRECT_COMMAND_LABEL.into()],
                ..NewCard::default()
            },
        )
        .await
        .unwrap();
    h.board.add_dependency(dependent.id, prereq.id).await.unwrap();
    assert_eq!(h.commands.entries_for_card(dependent.id).await.unwrap().len(), 1);

    h.board.delete_card(dependent.id).await.unwrap();
    assert!(h.commands.entries_for_card(dependent.id).await.unwrap().is_empty());
    assert!(h.board.dependencies(dependent.id).await.unwrap().is_empty());
    assert!(h.board.card(dependent.id).await.unwrap_err().is_not_found());

    assert_eq!(h.board.card(prereq.id).await.unwrap().title, "prereq");
}

#[tokio::test]
async fn test_positions_append_and_snapshot_orders_columns() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (first, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("1")).await.unwrap();
    let (second, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("2")).await.unwrap();
    assert!(second.position > first.position);

    let moved = h.board.move_card_to(first.id, DOING_COLUMN).await.unwrap();
    assert_eq!(moved.card.position, 0);

    let snapshot = h.board.snapshot(board.id).await.unwrap();
    assert_eq!(snapshot.columns.len(), 4);
    assert_eq!(snapshot.columns[0].cards.len(), 1);
    assert_eq!(snapshot.columns[1].cards[0].id, first.id);
}

#[tokio::test]
async fn test_move_to_unknown_column_creates_it() {
    let h = Harness::new();
    let board = h.board.default_board().await.unwrap();
    let (card, _) = h.board.create_card(board.id, TODO_COLUMN, new_card("x")).await.unwrap();
    let outcome = h.board.move_card_to(card.id, "Review").await.unwrap();
    assert_eq!(outcome.to.name, "Review");
    assert_eq!(outcome.to.position, 4);
    assert_eq!(h.board.columns(board.id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_delete_board_removes_columns_and_cards() {
    let h = Harness::new();
    let keep = h.board.default_board().await.unwrap();
    let scratch = h.board.create_board("Scratch", None).await.unwrap();
    let (card, _) = h.board.create_card(scratch.id, TODO_COLUMN, new_card("temp")).await.unwrap();

    let names: Vec<String> = h.board.boards().await.unwrap().into_iter().map(|b| b.name).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Scratch".to_string()));

    h.board.delete_board(scratch.id).await.unwrap();
    assert!(h.board.card(card.id).await.unwrap_err().is_not_found());
    assert!(h.board.columns(scratch.id).await.unwrap().is_empty());
    let remaining: Vec<_> = h.board.boards().await.unwrap().into_iter().map(|b| b.id).collect();
    assert_eq!(remaining, vec![keep.id]);

    assert!(h.board.delete_board(scratch.id).await.unwrap_err().is_not_found());
}
