//! Configuration models for the board, queue, scheduler and storage backend.

pub mod conductor;

pub use conductor::{
    BoardConfig, CommandQueueConfig, ConductorConfig, DependencyCheck, StorageBackendConfig,
    TemplateSchedulerConfig, ENV_PREFIX,
};
