//! Inbound lifecycle events and outbound observation events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::model::Priority;
use crate::core::BoardError;

/// A plan was proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProposed {
    /// Plan correlation id.
    pub id: String,
    /// Card title.
    pub title: String,
    /// Card description.
    #[serde(default)]
    pub description: String,
    /// Labels for the card.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Proposing agent.
    #[serde(default)]
    pub source: Option<String>,
    /// Channel the plan arrived on.
    #[serde(default)]
    pub source_channel: Option<String>,
    /// User the plan was proposed for.
    #[serde(default)]
    pub source_user: Option<String>,
    /// Proposal time.
    #[serde(default)]
    pub proposed_at: Option<DateTime<Utc>>,
}

/// A plan was approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanApproved {
    /// Plan correlation id.
    pub id: String,
    /// Approval time.
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

/// A plan finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCompleted {
    /// Plan correlation id.
    pub id: String,
    /// Result text.
    #[serde(default)]
    pub result: Option<String>,
    /// Completion time.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A plan was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRejected {
    /// Plan correlation id.
    pub id: String,
    /// Reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Rejection time.
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
}

/// A plan is waiting on something outside the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBlocked {
    /// Plan correlation id.
    pub id: String,
    /// Reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Block time.
    #[serde(default)]
    pub blocked_at: Option<DateTime<Utc>>,
}

/// A plan failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFailed {
    /// Plan correlation id.
    pub id: String,
    /// Error text.
    #[serde(default)]
    pub error: Option<String>,
    /// Failure time.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

/// Progress narration for a plan's card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAppendDescription {
    /// Plan correlation id.
    pub plan_id: String,
    /// Text to append.
    pub content: String,
    /// Narration time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A user issued a direct command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReceived {
    /// Instruction to execute.
    pub instruction: String,
    /// Priority; high when absent.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Issuing subsystem.
    #[serde(default)]
    pub source: Option<String>,
    /// Channel.
    #[serde(default)]
    pub source_channel: Option<String>,
    /// User.
    #[serde(default)]
    pub source_user: Option<String>,
}

/// An upstream wait timed out and the question must be answered later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    /// Response correlation id.
    pub task_id: String,
    /// Card title.
    pub title: String,
    /// Question text.
    pub message: String,
    /// Offered answers.
    #[serde(default)]
    pub buttons: Vec<String>,
    /// Asking subsystem.
    #[serde(default)]
    pub source: Option<String>,
}

/// A user answered a pending question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    /// Response correlation id.
    pub task_id: String,
    /// Answer text.
    pub answer: String,
}

/// Events consumed by the plan lifecycle controller, tagged by topic name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum PlanEvent {
    /// `PlanProposed`.
    PlanProposed(PlanProposed),
    /// `PlanApproved`.
    PlanApproved(PlanApproved),
    /// `PlanCompleted`.
    PlanCompleted(PlanCompleted),
    /// `PlanRejected`.
    PlanRejected(PlanRejected),
    /// `PlanBlocked`.
    PlanBlocked(PlanBlocked),
    /// `PlanFailed`.
    PlanFailed(PlanFailed),
    /// `TaskAppendDescription`.
    TaskAppendDescription(TaskAppendDescription),
    /// `CommandReceived`.
    CommandReceived(CommandReceived),
    /// `PendingResponse`.
    PendingResponse(PendingResponse),
    /// `UserResponse`.
    UserResponse(UserResponse),
}

impl PlanEvent {
    /// Topic name the event arrives on.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::PlanProposed(_) => "PlanProposed",
            Self::PlanApproved(_) => "PlanApproved",
            Self::PlanCompleted(_) => "PlanCompleted",
            Self::PlanRejected(_) => "PlanRejected",
            Self::PlanBlocked(_) => "PlanBlocked",
            Self::PlanFailed(_) => "PlanFailed",
            Self::TaskAppendDescription(_) => "TaskAppendDescription",
            Self::CommandReceived(_) => "CommandReceived",
            Self::PendingResponse(_) => "PendingResponse",
            Self::UserResponse(_) => "UserResponse",
        }
    }
}

/// Context handed to downstream remediation consumers when work fails terminally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskFailed {
    /// Subsystem that gave up.
    pub agent: String,
    /// Plan id, or the card id for direct commands.
    pub task_id: String,
    /// Last error.
    pub error: String,
    /// Failure time.
    pub timestamp: DateTime<Utc>,
    /// Notes such as the attempt count.
    pub failure_notes: String,
    /// Original instruction or title.
    pub request: String,
    /// Card description at failure time.
    pub description: String,
}

/// Observation events published by the board, queue and scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all_fields = "camelCase")]
pub enum BoardEvent {
    /// A card was created.
    TaskCreated {
        /// Card id.
        card_id: Uuid,
        /// Board id.
        board_id: Uuid,
        /// Column name the card was created in.
        column: String,
        /// Card title.
        title: String,
        /// Correlation id, if any.
        correlation_id: Option<String>,
    },
    /// A card changed column.
    TaskMoved {
        /// Card id.
        card_id: Uuid,
        /// Previous column name.
        from_column: String,
        /// New column name.
        to_column: String,
        /// Result text for completions.
        result: Option<String>,
    },
    /// A plan was rejected.
    TaskRejected {
        /// Card id.
        card_id: Uuid,
        /// Plan id.
        plan_id: String,
        /// Reason.
        reason: Option<String>,
    },
    /// A plan was blocked.
    TaskBlocked {
        /// Card id.
        card_id: Uuid,
        /// Plan id.
        plan_id: String,
        /// Reason.
        reason: Option<String>,
    },
    /// A plan failed.
    TaskFailed {
        /// Card id.
        card_id: Uuid,
        /// Plan id.
        plan_id: String,
        /// Error text.
        error: String,
    },
    /// A direct command completed.
    CommandCompleted {
        /// Queue entry id.
        entry_id: Uuid,
        /// Card id.
        card_id: Uuid,
        /// Final message.
        result: String,
        /// Tools invoked.
        tools_used: Vec<String>,
    },
    /// A direct command failed terminally.
    CommandFailed {
        /// Queue entry id.
        entry_id: Uuid,
        /// Card id.
        card_id: Uuid,
        /// Last error.
        error: String,
        /// Attempts made.
        attempts: u32,
    },
    /// The template scheduler created an instance.
    TaskInstanceCreated {
        /// Instance id.
        instance_id: Uuid,
        /// Template id.
        template_id: Uuid,
        /// Backing card id.
        card_id: Uuid,
    },
    /// Generic failure for remediation consumers (`agent.task.failed`).
    #[serde(rename = "agent.task.failed")]
    AgentTaskFailed(AgentTaskFailed),
}

impl BoardEvent {
    /// Topic name the event is published on.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "TaskCreated",
            Self::TaskMoved { .. } => "TaskMoved",
            Self::TaskRejected { .. } => "TaskRejected",
            Self::TaskBlocked { .. } => "TaskBlocked",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::CommandCompleted { .. } => "CommandCompleted",
            Self::CommandFailed { .. } => "CommandFailed",
            Self::TaskInstanceCreated { .. } => "TaskInstanceCreated",
            Self::AgentTaskFailed(_) => "agent.task.failed",
        }
    }
}

/// Outbound side of the event bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an observation event.
    async fn publish(&self, event: BoardEvent) -> Result<(), BoardError>;
}
