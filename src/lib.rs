//! # Prometheus Planboard
//!
//! A plan lifecycle board for autonomous agents: plans, direct commands and
//! recurring work are tracked as cards on a Kanban board and executed under
//! a few hard rules.
//!
//! ## Components
//!
//! - **Board**: boards, columns and cards with dependency edges. A card can
//!   only enter a Done column once every card it depends on is Done.
//! - **Plan lifecycle controller**: consumes `PlanProposed`, `PlanApproved`,
//!   `PlanCompleted`, `PlanFailed` and related events and moves the plan's card
//!   accordingly. A failing handler is logged and never stops the stream.
//! - **Command queue**: runs direct commands one at a time through a
//!   tool-calling completion service, retrying up to a fixed attempt budget.
//!   The single running slot is a lease held in the store.
//! - **Template scheduler**: asks the completion service to score each
//!   recurring template and admits at most three instances per tick.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_planboard::builders::{build_conductor, build_store};
//! use prometheus_planboard::config::ConductorConfig;
//! use prometheus_planboard::runtime::TokioSpawner;
//!
//! prometheus_planboard::util::init_tracing();
//! let cfg = ConductorConfig::from_env()?;
//! let store = build_store(&cfg.storage)?;
//! let conductor = build_conductor(&cfg, store, Arc::new(my_llm), Arc::new(my_tools))?;
//! conductor.start(&TokioSpawner::current()?);
//! ```
//!
//! Store backends: [`infra::InMemoryStore`] and, with the `sqlite` feature,
//! [`infra::SqliteStore`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Board model, storage traits and the lifecycle, queue and scheduler components.
pub mod core;
/// Configuration models for storage, board, queue and scheduler.
pub mod config;
/// Builders to construct the store and conductor from configuration.
pub mod builders;
/// Infrastructure adapters for storage backends and event buses.
pub mod infra;
/// Conductor loops, spawner and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
