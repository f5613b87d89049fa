//! Build the store and conductor from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use crate::config::{ConductorConfig, StorageBackendConfig};
use crate::core::{
    AppResult, BoardEvent, BoardManager, CommandQueue, CompletionClient, EventPublisher,
    PlanEvent, PlanLifecycleController, Store, TemplateScheduler, ToolRouter,
};
use crate::infra::{BroadcastEventBus, InMemoryStore};
use crate::runtime::Conductor;

/// Open the configured store backend.
pub fn build_store(cfg: &StorageBackendConfig) -> AppResult<Arc<dyn Store>> {
    match cfg {
        StorageBackendConfig::InMemory => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StorageBackendConfig::Sqlite { path } => {
            use anyhow::Context as _;
            let store = crate::infra::SqliteStore::open(path)
                .with_context(|| format!("opening sqlite store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackendConfig::Sqlite { .. } => Err(anyhow!(
            "sqlite storage requested but the `sqlite` feature is disabled"
        )),
    }
}

/// Wire the components over a store and collaborators.
///
/// Creates the inbound plan bus and the outbound board bus with the
/// configured capacity.
pub fn build_conductor(
    cfg: &ConductorConfig,
    store: Arc<dyn Store>,
    completion: Arc<dyn CompletionClient>,
    tools: Arc<dyn ToolRouter>,
) -> AppResult<Conductor> {
    cfg.validate()
        .map_err(|e| anyhow!("config invalid: {e}"))?;

    let plan_events = Arc::new(BroadcastEventBus::<PlanEvent>::new(cfg.bus_capacity));
    let board_events = Arc::new(BroadcastEventBus::<BoardEvent>::new(cfg.bus_capacity));
    let publisher: Arc<dyn EventPublisher> = board_events.clone();

    let board = BoardManager::new(store, cfg.board.clone(), cfg.commands.max_attempts);
    let lifecycle = PlanLifecycleController::new(board.clone(), publisher.clone());
    let commands = CommandQueue::new(
        board.clone(),
        completion.clone(),
        tools,
        publisher.clone(),
        cfg.commands.clone(),
        cfg.execution_rules.clone(),
    );
    let templates = TemplateScheduler::new(
        board.clone(),
        completion,
        publisher,
        cfg.templates.clone(),
        cfg.execution_rules.clone(),
    );

    tracing::info!(
        tick_interval_secs = cfg.tick_interval_secs,
        default_board = %cfg.board.default_board_name,
        "conductor built"
    );
    Ok(Conductor::new(
        board,
        lifecycle,
        commands,
        templates,
        plan_events,
        board_events,
        Duration::from_secs(cfg.tick_interval_secs),
    ))
}
