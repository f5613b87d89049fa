//! API-facing request/response models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{BoardError, BoardManager, BoardSnapshot, Card, PlanEvent};
use crate::runtime::Conductor;

/// Request to move a card into a named column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveCardRequest {
    /// Card to move.
    pub card_id: Uuid,
    /// Target column name; created if missing.
    pub column: String,
}

/// Move result; a refused move carries a readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveCardResponse {
    /// Whether the card is now in the target column.
    pub ok: bool,
    /// Card after the move.
    pub card: Option<Card>,
    /// Column the card left.
    pub from_column: Option<String>,
    /// Column the card is in.
    pub to_column: Option<String>,
    /// Why the move was refused.
    pub error: Option<String>,
    /// Prerequisites that blocked a move into Done.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_dependencies: Vec<Uuid>,
}

impl MoveCardResponse {
    fn refused(error: String, pending_dependencies: Vec<Uuid>) -> Self {
        Self {
            ok: false,
            card: None,
            from_column: None,
            to_column: None,
            error: Some(error),
            pending_dependencies,
        }
    }
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Store reachable.
    pub ok: bool,
    /// Entry holding the single running slot.
    pub running_command: Option<Uuid>,
    /// Store error, if the health check failed.
    pub error: Option<String>,
}

/// Move a card, turning a dependency refusal into a message naming the rule.
pub async fn move_card(board: &BoardManager, req: MoveCardRequest) -> MoveCardResponse {
    match board.move_card_to(req.card_id, &req.column).await {
        Ok(outcome) => MoveCardResponse {
            ok: true,
            from_column: Some(outcome.from.name),
            to_column: Some(outcome.to.name),
            card: Some(outcome.card),
            error: None,
            pending_dependencies: Vec::new(),
        },
        Err(BoardError::IncompleteDependencies { pending, .. }) => {
            let mut titles = Vec::with_capacity(pending.len());
            for id in &pending {
                match board.card(*id).await {
                    Ok(card) => titles.push(format!("\"{}\"", card.title)),
                    Err(_) => titles.push(id.to_string()),
                }
            }
            let message = format!(
                "Cannot move to {}: a card can only be Done once every card it depends on is Done. \
                 Still open: {}",
                req.column.trim(),
                titles.join(", ")
            );
            MoveCardResponse::refused(message, pending)
        }
        Err(e) => MoveCardResponse::refused(e.to_string(), Vec::new()),
    }
}

/// Snapshot of a board, or the default board when `board_id` is `None`.
pub async fn board_snapshot(
    board: &BoardManager,
    board_id: Option<Uuid>,
) -> Result<BoardSnapshot, String> {
    let board_id = match board_id {
        Some(id) => id,
        None => board.default_board().await.map_err(|e| e.to_string())?.id,
    };
    board.snapshot(board_id).await.map_err(|e| e.to_string())
}

/// Parse a JSON plan event (`{"topic": ..., "payload": ...}`) and submit it.
///
/// Returns the event's topic, or an error when no plan event loop is running
/// to receive it.
pub fn submit_event(conductor: &Conductor, raw: &str) -> Result<&'static str, String> {
    let event: PlanEvent = serde_json::from_str(raw).map_err(|e| format!("invalid event: {e}"))?;
    let topic = event.topic();
    if conductor.submit(event) == 0 {
        tracing::warn!(topic, "plan event dropped, no consumer subscribed");
        return Err(format!("{topic} not delivered: no plan event consumer is running"));
    }
    Ok(topic)
}

/// Check the store and report the running command.
pub async fn health(board: &BoardManager) -> Health {
    match board.store().running_command().await {
        Ok(running) => Health {
            ok: true,
            running_command: running.map(|e| e.id),
            error: None,
        },
        Err(e) => Health {
            ok: false,
            running_command: None,
            error: Some(e.to_string()),
        },
    }
}
