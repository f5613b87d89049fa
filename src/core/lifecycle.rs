//! Plan lifecycle controller: maps inbound plan events onto board moves,
//! labels and description notes, and publishes observation events.
//!
//! Each handler stands alone. [`PlanLifecycleController::handle`] logs a
//! failed handler and returns, so one bad event never stops the stream.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::core::board::{BoardManager, MoveOutcome};
use crate::core::events::{
    AgentTaskFailed, BoardEvent, CommandReceived, EventPublisher, PendingResponse, PlanApproved,
    PlanBlocked, PlanCompleted, PlanEvent, PlanFailed, PlanProposed, PlanRejected,
    TaskAppendDescription, UserResponse,
};
use crate::core::model::{
    Card, CardOrigin, Correlation, NewCard, Priority, BLOCKED_LABEL, DIRECT_COMMAND_LABEL,
    DOING_COLUMN, DONE_COLUMN, FAILED_COLUMN, FAILED_LABEL, REJECTED_LABEL, TODO_COLUMN,
};
use crate::core::BoardError;
use crate::util::clock::now;
use crate::util::text::truncate_chars;

/// Longest reason carried in a `rejected: ...` or `blocked: ...` label.
pub const REASON_LABEL_MAX_CHARS: usize = 40;
/// Longest card title derived from a command instruction.
pub const COMMAND_TITLE_MAX_CHARS: usize = 80;

const AGENT_NAME: &str = "plan-lifecycle";

/// Consumes plan events and keeps the board in step with them.
#[derive(Clone)]
pub struct PlanLifecycleController {
    board: BoardManager,
    publisher: Arc<dyn EventPublisher>,
}

impl PlanLifecycleController {
    /// Create a controller.
    pub fn new(board: BoardManager, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { board, publisher }
    }

    /// Board operations used by the controller.
    #[must_use]
    pub const fn board(&self) -> &BoardManager {
        &self.board
    }

    /// Dispatch one event. Errors are logged, never returned.
    pub async fn handle(&self, event: PlanEvent) {
        let topic = event.topic();
        tracing::debug!(topic, "plan event received");
        let outcome = match event {
            PlanEvent::PlanProposed(ev) => self.on_plan_proposed(ev).await.map(drop),
            PlanEvent::PlanApproved(ev) => self.on_plan_approved(ev).await.map(drop),
            PlanEvent::PlanCompleted(ev) => self.on_plan_completed(ev).await.map(drop),
            PlanEvent::PlanRejected(ev) => self.on_plan_rejected(ev).await.map(drop),
            PlanEvent::PlanBlocked(ev) => self.on_plan_blocked(ev).await.map(drop),
            PlanEvent::PlanFailed(ev) => self.on_plan_failed(ev).await.map(drop),
            PlanEvent::TaskAppendDescription(ev) => self.on_append_description(ev).await.map(drop),
            PlanEvent::CommandReceived(ev) => self.on_command_received(ev).await.map(drop),
            PlanEvent::PendingResponse(ev) => self.on_pending_response(ev).await.map(drop),
            PlanEvent::UserResponse(ev) => self.on_user_response(ev).await.map(drop),
        };
        match outcome {
            Ok(()) => {}
            Err(e @ BoardError::NotFound { .. }) => {
                tracing::error!(topic, "no card for event: {e}");
            }
            Err(e) => tracing::error!(topic, "plan event handler failed: {e}"),
        }
    }

    /// Consume events until the channel closes.
    pub async fn run(&self, mut events: broadcast::Receiver<PlanEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "plan event receiver lagged; events dropped");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("plan event channel closed; controller stopping");
                    break;
                }
            }
        }
    }

    /// Create the plan's card in To Do, or update it in place if the plan already has one.
    pub async fn on_plan_proposed(&self, ev: PlanProposed) -> Result<Card, BoardError> {
        let correlation = Correlation::plan(&ev.id);
        if let Some(mut existing) = self.board.find_by_correlation(&correlation).await? {
            tracing::info!(
                plan_id = %ev.id,
                card_id = %existing.id,
                "duplicate proposal; updating card"
            );
            existing.title = ev.title;
            existing.description = ev.description;
            for tag in ev.tags {
                if !existing.has_label(&tag) {
                    existing.labels.push(tag);
                }
            }
            return self.board.save_card(existing).await;
        }

        let board = self.board.default_board().await?;
        let new = NewCard {
            title: ev.title,
            description: ev.description,
            priority: Priority::Medium,
            labels: ev.tags,
            due_date: None,
            correlation: Some(correlation),
            origin: Some(CardOrigin {
                source: ev.source,
                channel: ev.source_channel,
                user: ev.source_user,
            }),
        };
        let (card, column) = self.board.create_card(board.id, TODO_COLUMN, new).await?;
        tracing::info!(plan_id = %ev.id, card_id = %card.id, "plan proposed");
        self.publish(BoardEvent::TaskCreated {
            card_id: card.id,
            board_id: card.board_id,
            column: column.name,
            title: card.title.clone(),
            correlation_id: Some(ev.id),
        })
        .await;
        Ok(card)
    }

    /// Move the plan's card to Doing.
    pub async fn on_plan_approved(&self, ev: PlanApproved) -> Result<MoveOutcome, BoardError> {
        let card = self.plan_card(&ev.id).await?;
        let outcome = self.board.move_card_to(card.id, DOING_COLUMN).await?;
        tracing::info!(plan_id = %ev.id, card_id = %card.id, "plan approved");
        self.publish_move(&outcome, None).await;
        Ok(outcome)
    }

    /// Note the result on the plan's card and move it to Done.
    ///
    /// The note is written before the move, so a move refused for unfinished
    /// dependencies still leaves the result on the card.
    pub async fn on_plan_completed(&self, ev: PlanCompleted) -> Result<MoveOutcome, BoardError> {
        let card = self.plan_card(&ev.id).await?;
        let at = ev.completed_at.unwrap_or_else(now);
        let note = match ev.result.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(result) => format!("Completed at {}.\nResult: {result}", at.to_rfc3339()),
            None => format!("Completed at {}.", at.to_rfc3339()),
        };
        self.board.append_description(card.id, &note).await?;
        let outcome = self.board.move_card_to(card.id, DONE_COLUMN).await?;
        tracing::info!(plan_id = %ev.id, card_id = %card.id, "plan completed");
        self.publish_move(&outcome, ev.result).await;
        Ok(outcome)
    }

    /// Label the plan's card as rejected without moving it.
    pub async fn on_plan_rejected(&self, ev: PlanRejected) -> Result<Card, BoardError> {
        let card = self.plan_card(&ev.id).await?;
        let labels = soft_state_labels(REJECTED_LABEL, ev.reason.as_deref());
        let card = self.board.add_labels(card.id, labels).await?;
        tracing::info!(plan_id = %ev.id, card_id = %card.id, "plan rejected");
        self.publish(BoardEvent::TaskRejected {
            card_id: card.id,
            plan_id: ev.id,
            reason: ev.reason,
        })
        .await;
        Ok(card)
    }

    /// Label the plan's card as blocked without moving it.
    pub async fn on_plan_blocked(&self, ev: PlanBlocked) -> Result<Card, BoardError> {
        let card = self.plan_card(&ev.id).await?;
        let labels = soft_state_labels(BLOCKED_LABEL, ev.reason.as_deref());
        let card = self.board.add_labels(card.id, labels).await?;
        tracing::info!(plan_id = %ev.id, card_id = %card.id, "plan blocked");
        self.publish(BoardEvent::TaskBlocked {
            card_id: card.id,
            plan_id: ev.id,
            reason: ev.reason,
        })
        .await;
        Ok(card)
    }

    /// Move the plan's card to Failed, note the error and notify remediation consumers.
    pub async fn on_plan_failed(&self, ev: PlanFailed) -> Result<Card, BoardError> {
        let card = self.plan_card(&ev.id).await?;
        let error = ev
            .error
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "unspecified error".into());
        let at = ev.failed_at.unwrap_or_else(now);

        self.board.move_card_to(card.id, FAILED_COLUMN).await?;
        self.board
            .append_description(card.id, &format!("Failed at {}.\nError: {error}", at.to_rfc3339()))
            .await?;
        let card = self.board.add_labels(card.id, [FAILED_LABEL]).await?;
        tracing::warn!(plan_id = %ev.id, card_id = %card.id, "plan failed: {error}");

        self.publish(BoardEvent::TaskFailed {
            card_id: card.id,
            plan_id: ev.id.clone(),
            error: error.clone(),
        })
        .await;
        let agent = card
            .origin
            .as_ref()
            .and_then(|o| o.source.clone())
            .unwrap_or_else(|| AGENT_NAME.into());
        self.publish(BoardEvent::AgentTaskFailed(AgentTaskFailed {
            agent,
            task_id: ev.id,
            error,
            timestamp: at,
            failure_notes: "plan reported failure".into(),
            request: card.title.clone(),
            description: card.description.clone(),
        }))
        .await;
        Ok(card)
    }

    /// Append timestamped progress narration to the plan's card.
    pub async fn on_append_description(
        &self,
        ev: TaskAppendDescription,
    ) -> Result<Card, BoardError> {
        let card = self.plan_card(&ev.plan_id).await?;
        let at = ev.timestamp.unwrap_or_else(now);
        self.board
            .append_description(card.id, &format!("[{}] {}", at.to_rfc3339(), ev.content.trim()))
            .await
    }

    /// Create a direct-command card in Doing; it is enqueued for execution.
    pub async fn on_command_received(&self, ev: CommandReceived) -> Result<Card, BoardError> {
        let instruction = ev.instruction.trim();
        if instruction.is_empty() {
            return Err(BoardError::InvalidInput("command instruction is empty".into()));
        }
        let board = self.board.default_board().await?;
        let new = NewCard {
            title: truncate_chars(instruction, COMMAND_TITLE_MAX_CHARS),
            description: instruction.to_string(),
            priority: ev.priority.unwrap_or(Priority::High),
            labels: vec![DIRECT_COMMAND_LABEL.to_string()],
            due_date: None,
            correlation: None,
            origin: Some(CardOrigin {
                source: ev.source,
                channel: ev.source_channel,
                user: ev.source_user,
            }),
        };
        let (card, column) = self.board.create_card(board.id, DOING_COLUMN, new).await?;
        tracing::info!(card_id = %card.id, priority = card.priority.as_str(), "command received");
        self.publish(BoardEvent::TaskCreated {
            card_id: card.id,
            board_id: card.board_id,
            column: column.name,
            title: card.title.clone(),
            correlation_id: None,
        })
        .await;
        Ok(card)
    }

    /// Park a question as a To Do card until the user answers it.
    pub async fn on_pending_response(&self, ev: PendingResponse) -> Result<Card, BoardError> {
        let correlation = Correlation::response(&ev.task_id);
        if let Some(existing) = self.board.find_by_correlation(&correlation).await? {
            tracing::debug!(task_id = %ev.task_id, "pending response already parked");
            return Ok(existing);
        }
        let mut description = ev.message.trim().to_string();
        if !ev.buttons.is_empty() {
            description.push_str("\n\nOptions: ");
            description.push_str(&ev.buttons.join(" | "));
        }
        let board = self.board.default_board().await?;
        let new = NewCard {
            title: ev.title,
            description,
            priority: Priority::Medium,
            labels: Vec::new(),
            due_date: None,
            correlation: Some(correlation),
            origin: Some(CardOrigin {
                source: ev.source,
                channel: None,
                user: None,
            }),
        };
        let (card, column) = self.board.create_card(board.id, TODO_COLUMN, new).await?;
        tracing::info!(task_id = %ev.task_id, card_id = %card.id, "awaiting user response");
        self.publish(BoardEvent::TaskCreated {
            card_id: card.id,
            board_id: card.board_id,
            column: column.name,
            title: card.title.clone(),
            correlation_id: Some(ev.task_id),
        })
        .await;
        Ok(card)
    }

    /// Record the user's answer and move the question card to Done.
    pub async fn on_user_response(&self, ev: UserResponse) -> Result<MoveOutcome, BoardError> {
        let card = self
            .board
            .find_by_correlation(&Correlation::response(&ev.task_id))
            .await?
            .ok_or_else(|| BoardError::not_found("pending response", &ev.task_id))?;
        self.board
            .append_description(card.id, &format!("User response: {}", ev.answer.trim()))
            .await?;
        let outcome = self.board.move_card_to(card.id, DONE_COLUMN).await?;
        tracing::info!(task_id = %ev.task_id, card_id = %card.id, "user response recorded");
        self.publish_move(&outcome, Some(ev.answer)).await;
        Ok(outcome)
    }

    async fn plan_card(&self, plan_id: &str) -> Result<Card, BoardError> {
        self.board
            .find_by_correlation(&Correlation::plan(plan_id))
            .await?
            .ok_or_else(|| BoardError::not_found("plan", plan_id))
    }

    async fn publish_move(&self, outcome: &MoveOutcome, result: Option<String>) {
        if !outcome.changed() {
            return;
        }
        self.publish(BoardEvent::TaskMoved {
            card_id: outcome.card.id,
            from_column: outcome.from.name.clone(),
            to_column: outcome.to.name.clone(),
            result,
        })
        .await;
    }

    async fn publish(&self, event: BoardEvent) {
        let topic = event.topic();
        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!(topic, "failed to publish event: {e}");
        }
    }
}

fn soft_state_labels(label: &str, reason: Option<&str>) -> Vec<String> {
    let mut labels = vec![label.to_string()];
    if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
        labels.push(format!(
            "{label}: {}",
            truncate_chars(reason, REASON_LABEL_MAX_CHARS)
        ));
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_state_labels_truncate_reason() {
        let labels = soft_state_labels(REJECTED_LABEL, Some(&"x".repeat(100)));
        assert_eq!(labels[0], "rejected");
        assert!(labels[1].starts_with("rejected: "));
        assert_eq!(labels[1].chars().count(), "rejected: ".len() + REASON_LABEL_MAX_CHARS);
    }

    #[test]
    fn test_soft_state_labels_without_reason() {
        assert_eq!(soft_state_labels(BLOCKED_LABEL, Some("  ")), vec!["blocked"]);
        assert_eq!(soft_state_labels(BLOCKED_LABEL, None), vec!["blocked"]);
    }
}
