//! Infrastructure adapters: store backends and the in-process event bus.

pub mod bus;
pub mod store;

pub use bus::BroadcastEventBus;
pub use store::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
