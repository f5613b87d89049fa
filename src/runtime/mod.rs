//! Runtime adapters and API surface.

use std::future::Future;

pub mod api;
pub mod conductor;
pub mod tokio_spawner;

pub use api::{
    board_snapshot, health, move_card, submit_event, Health, MoveCardRequest, MoveCardResponse,
};
pub use conductor::{Conductor, ConductorTick};
pub use tokio_spawner::TokioSpawner;

/// Executor abstraction for the conductor's background loops.
pub trait Spawn {
    /// Spawn a detached task.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
