//! Error types for board, queue and scheduler operations.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by board components and their collaborators.
#[derive(Debug, Error)]
pub enum BoardError {
    /// A board, column, card, entry, template or instance is absent.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (`card`, `column`, ...).
        kind: &'static str,
        /// Identifier or name that was looked up.
        id: String,
    },
    /// A move into a Done column was refused because prerequisites are unfinished.
    #[error("incomplete dependencies: card {card_id} waits on {} unfinished card(s)", pending.len())]
    IncompleteDependencies {
        /// Card that was being moved.
        card_id: Uuid,
        /// Prerequisite cards not yet in a Done column.
        pending: Vec<Uuid>,
    },
    /// Caller supplied an argument that cannot be applied.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Completion or tool-calling collaborator failed.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// Collaborator output did not match the expected structure.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Storage backend failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl BoardError {
    /// Shorthand for [`BoardError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether this error reports a missing entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("json: {err}"))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
