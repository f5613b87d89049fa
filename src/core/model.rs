//! Board, queue and template records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the column new plans land in.
pub const TODO_COLUMN: &str = "To Do";
/// Name of the column for work in progress.
pub const DOING_COLUMN: &str = "Doing";
/// Name of the column for finished work.
pub const DONE_COLUMN: &str = "Done";
/// Name of the column for terminally failed work.
pub const FAILED_COLUMN: &str = "Failed";
/// Standard columns every board is created with, in position order.
pub const STANDARD_COLUMNS: [&str; 4] = [TODO_COLUMN, DOING_COLUMN, DONE_COLUMN, FAILED_COLUMN];

/// Label marking a card for execution by the command queue.
pub const DIRECT_COMMAND_LABEL: &str = "direct-command";
/// Label marking a card created by the template scheduler.
pub const AI_MANAGED_LABEL: &str = "ai-managed";
/// Label added when a plan or command fails.
pub const FAILED_LABEL: &str = "failed";
/// Label added when a plan is rejected.
pub const REJECTED_LABEL: &str = "rejected";
/// Label added when a plan is blocked.
pub const BLOCKED_LABEL: &str = "blocked";

/// Whether a column name denotes completion. Matching ignores case and
/// surrounding whitespace.
#[must_use]
pub fn is_done_column(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(DONE_COLUMN)
}

/// Card priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Preempts other work.
    High,
}

impl Priority {
    /// Queue rank: lower ranks are served first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    /// Stable lowercase name used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse a stored or user-supplied priority, falling back to medium.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" | "urgent" | "critical" => Self::High,
            _ => Self::Medium,
        }
    }
}

/// A Kanban board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    /// Board identifier.
    pub id: Uuid,
    /// Display name, unique in practice.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A column within a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column identifier.
    pub id: Uuid,
    /// Owning board.
    pub board_id: Uuid,
    /// Display name.
    pub name: String,
    /// Ordering within the board.
    pub position: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// What a card's correlation id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    /// Plan lifecycle events (`PlanProposed`, `PlanApproved`, ...).
    Plan,
    /// Deferred user response (`PendingResponse`, `UserResponse`).
    Response,
}

impl CorrelationKind {
    /// Stable lowercase name used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Response => "response",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "plan" => Some(Self::Plan),
            "response" => Some(Self::Response),
            _ => None,
        }
    }
}

/// External identity a card is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    /// Kind of correlation.
    pub kind: CorrelationKind,
    /// External identifier.
    pub id: String,
}

impl Correlation {
    /// Correlation with a plan id.
    pub fn plan(id: impl Into<String>) -> Self {
        Self {
            kind: CorrelationKind::Plan,
            id: id.into(),
        }
    }

    /// Correlation with a pending-response task id.
    pub fn response(id: impl Into<String>) -> Self {
        Self {
            kind: CorrelationKind::Response,
            id: id.into(),
        }
    }
}

/// Where a card's work came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardOrigin {
    /// Producing subsystem or agent.
    pub source: Option<String>,
    /// Channel the request arrived on.
    pub channel: Option<String>,
    /// Requesting user.
    pub user: Option<String>,
}

impl CardOrigin {
    /// True when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.source.is_none() && self.channel.is_none() && self.user.is_none()
    }
}

/// A unit of work on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Card identifier.
    pub id: Uuid,
    /// Column the card currently occupies.
    pub column_id: Uuid,
    /// Owning board.
    pub board_id: Uuid,
    /// Title.
    pub title: String,
    /// Free-text description, appended to over the card's life.
    pub description: String,
    /// Ordering within the column.
    pub position: i32,
    /// Priority.
    pub priority: Priority,
    /// Ordered labels.
    pub labels: Vec<String>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// External correlation, if any.
    pub correlation: Option<Correlation>,
    /// Origin metadata, if any.
    pub origin: Option<CardOrigin>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Whether the card carries `label`.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Fields for a new card; placement is resolved by the board layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCard {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Priority.
    pub priority: Priority,
    /// Ordered labels.
    pub labels: Vec<String>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// External correlation.
    pub correlation: Option<Correlation>,
    /// Origin metadata.
    pub origin: Option<CardOrigin>,
}

/// Directed edge: `card_id` depends on `depends_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependent card.
    pub card_id: Uuid,
    /// Prerequisite card.
    pub depends_on: Uuid,
}

/// Status of a command queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Attempts exhausted.
    Failed,
}

impl CommandStatus {
    /// Stable lowercase name used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Ownership of a running entry; expires so a crashed worker's claim can be reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Token identifying the claiming worker.
    pub owner: String,
    /// Instant after which the claim may be reclaimed.
    pub expires_at: DateTime<Utc>,
}

/// Default attempt budget for a command.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Error recorded when the last attempt's lease runs out.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired before the command finished";

/// A direct command waiting for, undergoing or finished with execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandQueueEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Card executed by this entry.
    pub card_id: Uuid,
    /// Raw instruction text.
    pub instruction: String,
    /// Current status.
    pub status: CommandStatus,
    /// Final message from the tool-calling collaborator.
    pub result: Option<String>,
    /// Names of tools invoked on the successful attempt.
    pub tools_used: Vec<String>,
    /// Last error.
    pub error: Option<String>,
    /// Attempts started so far.
    pub attempts: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Present while running.
    pub lease: Option<Lease>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Time the entry reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl CommandQueueEntry {
    /// Fresh pending entry.
    pub fn pending(card_id: Uuid, instruction: impl Into<String>, max_attempts: u32) -> Self {
        let now = crate::util::clock::now();
        Self {
            id: Uuid::new_v4(),
            card_id,
            instruction: instruction.into(),
            status: CommandStatus::Pending,
            result: None,
            tools_used: Vec::new(),
            error: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            lease: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Drop an expired lease. The entry goes back to pending while attempts
    /// remain and fails terminally once the budget is spent.
    pub fn release_expired_lease(&mut self, now: DateTime<Utc>) {
        self.lease = None;
        self.updated_at = now;
        if self.exhausted() {
            self.status = CommandStatus::Failed;
            self.error.get_or_insert_with(|| LEASE_EXPIRED_ERROR.to_string());
            self.finished_at = Some(now);
        } else {
            self.status = CommandStatus::Pending;
        }
    }
}

/// Template status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    /// Evaluated every tick.
    #[default]
    Active,
    /// Temporarily excluded.
    Paused,
    /// Retired.
    Archived,
}

impl TemplateStatus {
    /// Stable lowercase name used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A recurring-work definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Template identifier.
    pub id: Uuid,
    /// Title used for instance cards.
    pub title: String,
    /// Human instructions.
    pub instructions: String,
    /// AI-refined plan, absent until refined.
    pub ai_plan: Option<String>,
    /// Tool names instances may use.
    pub allowed_tools: Vec<String>,
    /// Event names instances may emit.
    pub allowed_events: Vec<String>,
    /// Free-form priority hint passed to the decision prompt.
    pub priority_hint: Priority,
    /// Time the last instance was created.
    pub last_instance_at: Option<DateTime<Utc>>,
    /// Cooldown: the template is not evaluated before this time.
    pub next_suggested_at: Option<DateTime<Utc>>,
    /// Instances created so far.
    pub instance_count: u32,
    /// Status.
    pub status: TemplateStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTemplate {
    /// Title.
    pub title: String,
    /// Instructions.
    pub instructions: String,
    /// Allowed tool names.
    pub allowed_tools: Vec<String>,
    /// Allowed event names.
    pub allowed_events: Vec<String>,
    /// Priority hint.
    pub priority_hint: Priority,
}

impl TaskTemplate {
    /// Build an active template from its definition.
    #[must_use]
    pub fn from_new(new: NewTemplate) -> Self {
        let now = crate::util::clock::now();
        Self {
            id: Uuid::new_v4(),
            title: new.title,
            instructions: new.instructions,
            ai_plan: None,
            allowed_tools: new.allowed_tools,
            allowed_events: new.allowed_events,
            priority_hint: new.priority_hint,
            last_instance_at: None,
            next_suggested_at: None,
            instance_count: 0,
            status: TemplateStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a template instance, derived from its card's column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Card is in To Do.
    Pending,
    /// Card is in Doing.
    Active,
    /// Card is in Done.
    Completed,
    /// Card is in Failed.
    Failed,
}

impl InstanceStatus {
    /// Status implied by a column name; `None` for custom columns.
    #[must_use]
    pub fn from_column_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case(TODO_COLUMN) {
            Some(Self::Pending)
        } else if name.eq_ignore_ascii_case(DOING_COLUMN) {
            Some(Self::Active)
        } else if is_done_column(name) {
            Some(Self::Completed)
        } else if name.eq_ignore_ascii_case(FAILED_COLUMN) {
            Some(Self::Failed)
        } else {
            None
        }
    }

    /// Stable lowercase name used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One occurrence of a template, backed by a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Instance identifier.
    pub id: Uuid,
    /// Source template.
    pub template_id: Uuid,
    /// Backing card.
    pub card_id: Uuid,
    /// Status mirrored from the card's column.
    pub status: InstanceStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only interaction log entry for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Instance the interaction belongs to.
    pub instance_id: Uuid,
    /// What was attempted.
    pub interaction: String,
    /// Outcome text.
    pub result: Option<String>,
    /// Tools used.
    pub tools_used: Vec<String>,
    /// Events emitted.
    pub events_emitted: Vec<String>,
    /// Whether the interaction succeeded.
    pub success: bool,
    /// Time of the interaction.
    pub created_at: DateTime<Utc>,
}
