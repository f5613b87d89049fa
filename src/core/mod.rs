//! Board model, storage seams and the three cooperating components.

pub mod board;
pub mod command_queue;
pub mod decision;
pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod model;
pub mod store;
pub mod template_scheduler;

pub use board::{BoardManager, BoardSnapshot, ColumnSnapshot, MoveOutcome};
pub use command_queue::{CommandQueue, TickOutcome};
pub use decision::{parse_decision, AdmissionDecision, FALLBACK_PRIORITY_SCORE};
pub use error::{AppResult, BoardError};
pub use events::{
    AgentTaskFailed, BoardEvent, CommandReceived, EventPublisher, PendingResponse, PlanApproved,
    PlanBlocked, PlanCompleted, PlanEvent, PlanFailed, PlanProposed, PlanRejected,
    TaskAppendDescription, UserResponse,
};
pub use executor::{
    CompletionClient, CompletionOptions, ToolCall, ToolCallResponse, ToolRouter, ToolSchema,
};
pub use lifecycle::PlanLifecycleController;
pub use model::{
    Board, Card, CardOrigin, Column, CommandQueueEntry, CommandStatus, Correlation,
    CorrelationKind, Dependency, InstanceStatus, InteractionRecord, Lease, NewCard, NewTemplate,
    Priority, TaskInstance, TaskTemplate, TemplateStatus,
};
pub use store::{BoardStore, CommandStore, Store, TemplateStore};
pub use template_scheduler::{
    InteractionDraft, SchedulerTick, TemplateEvaluation, TemplateScheduler,
};
