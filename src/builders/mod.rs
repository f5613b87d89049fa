//! Builders to construct a conductor from configuration.

pub mod conductor_builder;

pub use conductor_builder::{build_conductor, build_store};
