//! Conductor: wires the controller, queue and scheduler to the buses and
//! drives them from a periodic tick.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use crate::core::{
    BoardEvent, BoardManager, CommandQueue, PlanEvent, PlanLifecycleController, SchedulerTick,
    TemplateScheduler, TickOutcome,
};
use crate::infra::BroadcastEventBus;
use crate::runtime::Spawn;

/// Result of one conductor tick; a component that errored reports `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorTick {
    /// Command queue outcome.
    pub commands: Option<TickOutcome>,
    /// Template scheduler summary.
    pub templates: Option<SchedulerTick>,
}

/// Owns the components and their buses.
#[derive(Clone)]
pub struct Conductor {
    board: BoardManager,
    lifecycle: PlanLifecycleController,
    commands: CommandQueue,
    templates: TemplateScheduler,
    plan_events: Arc<BroadcastEventBus<PlanEvent>>,
    board_events: Arc<BroadcastEventBus<BoardEvent>>,
    tick_interval: Duration,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Conductor {
    /// Assemble a conductor from built components.
    pub fn new(
        board: BoardManager,
        lifecycle: PlanLifecycleController,
        commands: CommandQueue,
        templates: TemplateScheduler,
        plan_events: Arc<BroadcastEventBus<PlanEvent>>,
        board_events: Arc<BroadcastEventBus<BoardEvent>>,
        tick_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            board,
            lifecycle,
            commands,
            templates,
            plan_events,
            board_events,
            tick_interval,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Board operations.
    #[must_use]
    pub const fn board(&self) -> &BoardManager {
        &self.board
    }

    /// Plan lifecycle controller.
    #[must_use]
    pub const fn lifecycle(&self) -> &PlanLifecycleController {
        &self.lifecycle
    }

    /// Command queue.
    #[must_use]
    pub const fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Template scheduler.
    #[must_use]
    pub const fn templates(&self) -> &TemplateScheduler {
        &self.templates
    }

    /// Publish an inbound plan event; returns the number of consumers reached.
    pub fn submit(&self, event: PlanEvent) -> usize {
        self.plan_events.send(event)
    }

    /// Subscribe to outbound board events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.board_events.subscribe()
    }

    /// Run the command queue, then the template scheduler, once.
    pub async fn tick(&self) -> ConductorTick {
        let commands = match self.commands.tick().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!("command queue tick failed: {e}");
                None
            }
        };
        let templates = match self.templates.tick().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!("template scheduler tick failed: {e}");
                None
            }
        };
        ConductorTick {
            commands,
            templates,
        }
    }

    /// Spawn the plan event loop and the tick loop.
    ///
    /// The event subscription is taken before this returns, so events
    /// submitted afterwards are not missed. Both loops stop on
    /// [`Conductor::shutdown`].
    pub fn start<S: Spawn>(&self, spawner: &S) {
        let events = self.plan_events.subscribe();
        let lifecycle = self.lifecycle.clone();
        let mut stop = self.shutdown.subscribe();
        spawner.spawn(async move {
            tokio::select! {
                () = lifecycle.run(events) => {}
                _ = stop.changed() => tracing::info!("plan event loop stopped"),
            }
        });

        let conductor = self.clone();
        let mut stop = self.shutdown.subscribe();
        spawner.spawn(async move {
            let mut interval = tokio::time::interval(conductor.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let summary = conductor.tick().await;
                        tracing::debug!(commands = ?summary.commands, "conductor tick");
                    }
                    _ = stop.changed() => {
                        tracing::info!("tick loop stopped");
                        break;
                    }
                }
            }
        });
        tracing::info!(interval_secs = self.tick_interval.as_secs(), "conductor started");
    }

    /// Stop the loops spawned by [`Conductor::start`].
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
