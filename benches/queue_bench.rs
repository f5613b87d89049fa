//! Benchmarks for the planboard hot paths.
//!
//! Benchmarks cover:
//! - Command claim/settle cycles on the in-memory store
//! - Dependency-gated Done moves
//! - Admission decision parsing

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use chrono::{Duration, Utc};
use prometheus_planboard::config::{BoardConfig, DependencyCheck};
use prometheus_planboard::core::model::{DONE_COLUMN, TODO_COLUMN};
use prometheus_planboard::core::{
    parse_decision, BoardManager, CommandQueueEntry, CommandStatus, CommandStore, NewCard,
    Priority, Store,
};
use prometheus_planboard::infra::InMemoryStore;
use tokio::runtime::Runtime;
use uuid::Uuid;

// ============================================================================
// Helper Functions
// ============================================================================

fn board(check: DependencyCheck) -> BoardManager {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    BoardManager::new(
        store,
        BoardConfig {
            dependency_check: check,
            ..BoardConfig::default()
        },
        3,
    )
}

async fn seed_commands(board: &BoardManager, count: u64) {
    let b = board.default_board().await.unwrap();
    for i in 0..count {
        let priority = match i % 3 {
            0 => Priority::High,
            1 => Priority::Medium,
            _ => Priority::Low,
        };
        let (card, _) = board
            .create_card(
                b.id,
                TODO_COLUMN,
                NewCard {
                    title: format!("command {i}"),
                    priority,
                    ..NewCard::default()
                },
            )
            .await
            .unwrap();
        board
            .store()
            .insert_command(CommandQueueEntry::pending(card.id, format!("run {i}"), 3))
            .await
            .unwrap();
    }
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_claim_settle_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("claim_settle_cycle");

    for size in [10u64, 100, 500] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let board = board(DependencyCheck::Direct);
                seed_commands(&board, size).await;
                let store = board.store();
                let lease = Utc::now() + Duration::minutes(5);
                while let Some(mut entry) =
                    store.claim_next_command("bench", lease).await.unwrap()
                {
                    entry.status = CommandStatus::Completed;
                    entry.lease = None;
                    black_box(store.settle_command(&entry, "bench").await.unwrap());
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Board Benchmarks
// ============================================================================

fn bench_dependency_gated_move(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dependency_gated_move");

    for (name, check) in [
        ("direct", DependencyCheck::Direct),
        ("transitive", DependencyCheck::Transitive),
    ] {
        group.bench_function(BenchmarkId::new(name, 50), |b| {
            b.to_async(&rt).iter(|| async move {
                let board = board(check);
                let bd = board.default_board().await.unwrap();
                let mut previous: Option<Uuid> = None;
                let mut last = Uuid::nil();
                for i in 0..50 {
                    let (card, _) = board
                        .create_card(
                            bd.id,
                            TODO_COLUMN,
                            NewCard {
                                title: format!("step {i}"),
                                ..NewCard::default()
                            },
                        )
                        .await
                        .unwrap();
                    if let Some(prev) = previous {
                        board.add_dependency(card.id, prev).await.unwrap();
                    }
                    previous = Some(card.id);
                    last = card.id;
                }
                // Refused: the chain behind the last card is unfinished.
                black_box(board.move_card_to(last, DONE_COLUMN).await.is_err());
            });
        });
    }
    group.finish();
}

// ============================================================================
// Decision Benchmarks
// ============================================================================

fn bench_parse_decision(c: &mut Criterion) {
    let plain = r#"{"should_create_instance": true, "priority_score": 72, "cooldown_minutes": 45, "reasoning": "due"}"#;
    let wrapped = format!("Sure! Here is my answer:\n```json\n{plain}\n```\nLet me know.");

    c.bench_function("parse_decision_plain", |b| {
        b.iter(|| black_box(parse_decision(black_box(plain)).unwrap()));
    });
    c.bench_function("parse_decision_wrapped", |b| {
        b.iter(|| black_box(parse_decision(black_box(&wrapped)).unwrap()));
    });
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(queue_benches, bench_claim_settle_cycle);

criterion_group!(board_benches, bench_dependency_gated_move);

criterion_group!(decision_benches, bench_parse_decision);

criterion_main!(queue_benches, board_benches, decision_benches);
