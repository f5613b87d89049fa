//! Storage abstractions consumed by the board, queue and scheduler.
//!
//! Every method is a single-row or single-query operation. Multi-step
//! sequences (claim, execute, settle) are composed by the callers, which must
//! tolerate a later step failing after an earlier one succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::model::{
    Board, Card, Column, CommandQueueEntry, Correlation, Dependency, InteractionRecord,
    TaskInstance, TaskTemplate, TemplateStatus,
};
use crate::core::BoardError;

/// Persistence for boards, columns, cards and dependency edges.
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Insert a board.
    async fn insert_board(&self, board: Board) -> Result<(), BoardError>;
    /// Fetch a board by id.
    async fn get_board(&self, id: Uuid) -> Result<Option<Board>, BoardError>;
    /// Fetch the first board with exactly this name.
    async fn find_board_by_name(&self, name: &str) -> Result<Option<Board>, BoardError>;
    /// All boards, oldest first.
    async fn list_boards(&self) -> Result<Vec<Board>, BoardError>;
    /// Delete a board with its columns, cards, edges and queue entries.
    async fn delete_board(&self, id: Uuid) -> Result<(), BoardError>;

    /// Insert a column.
    async fn insert_column(&self, column: Column) -> Result<(), BoardError>;
    /// Fetch a column by id.
    async fn get_column(&self, id: Uuid) -> Result<Option<Column>, BoardError>;
    /// Columns of a board ordered by position.
    async fn list_columns(&self, board_id: Uuid) -> Result<Vec<Column>, BoardError>;

    /// Insert a card.
    async fn insert_card(&self, card: Card) -> Result<(), BoardError>;
    /// Fetch a card by id.
    async fn get_card(&self, id: Uuid) -> Result<Option<Card>, BoardError>;
    /// Overwrite the mutable fields of an existing card.
    async fn update_card(&self, card: &Card) -> Result<(), BoardError>;
    /// Delete a card with its dependency edges and queue entries.
    async fn delete_card(&self, id: Uuid) -> Result<(), BoardError>;
    /// Cards in a column ordered by position.
    async fn list_cards_in_column(&self, column_id: Uuid) -> Result<Vec<Card>, BoardError>;
    /// Cards on a board ordered by column then position.
    async fn list_cards(&self, board_id: Uuid) -> Result<Vec<Card>, BoardError>;
    /// Indexed lookup by correlation.
    async fn find_card_by_correlation(
        &self,
        correlation: &Correlation,
    ) -> Result<Option<Card>, BoardError>;
    /// Position a card appended to the column would take.
    async fn next_card_position(&self, column_id: Uuid) -> Result<i32, BoardError>;

    /// Add an edge; adding an existing edge is a no-op.
    async fn add_dependency(&self, dependency: Dependency) -> Result<(), BoardError>;
    /// Remove an edge, returning whether it existed.
    async fn remove_dependency(&self, dependency: Dependency) -> Result<bool, BoardError>;
    /// Direct prerequisites of a card.
    async fn dependencies_of(&self, card_id: Uuid) -> Result<Vec<Uuid>, BoardError>;
}

/// Persistence for command queue entries.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Insert an entry.
    async fn insert_command(&self, entry: CommandQueueEntry) -> Result<(), BoardError>;
    /// Fetch an entry by id.
    async fn get_command(&self, id: Uuid) -> Result<Option<CommandQueueEntry>, BoardError>;
    /// Entries for a card, oldest first.
    async fn commands_for_card(
        &self,
        card_id: Uuid,
    ) -> Result<Vec<CommandQueueEntry>, BoardError>;
    /// The entry currently running, if any.
    async fn running_command(&self) -> Result<Option<CommandQueueEntry>, BoardError>;
    /// Atomically claim the next pending entry.
    ///
    /// Returns `None` when another entry is running or nothing is pending.
    /// The claimed entry is returned already marked running, with its attempt
    /// counter incremented and a lease held by `owner` until `lease_until`.
    /// Pending entries are ordered by card priority (high first) and then by
    /// creation time.
    async fn claim_next_command(
        &self,
        owner: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<CommandQueueEntry>, BoardError>;
    /// Write an entry's outcome if `owner` still holds its lease.
    ///
    /// Returns `false` when the lease was lost (reclaimed or re-claimed).
    async fn settle_command(
        &self,
        entry: &CommandQueueEntry,
        owner: &str,
    ) -> Result<bool, BoardError>;
    /// Overwrite an entry unconditionally.
    async fn update_command(&self, entry: &CommandQueueEntry) -> Result<(), BoardError>;
    /// Release every running entry whose lease expired before `now` and
    /// return them as updated.
    ///
    /// Entries with attempts left become pending; exhausted ones are failed
    /// in the same step so no claim can run them again.
    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CommandQueueEntry>, BoardError>;
}

/// Persistence for templates, instances and interaction history.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Insert a template.
    async fn insert_template(&self, template: TaskTemplate) -> Result<(), BoardError>;
    /// Fetch a template by id.
    async fn get_template(&self, id: Uuid) -> Result<Option<TaskTemplate>, BoardError>;
    /// Templates, optionally filtered by status, oldest first.
    async fn list_templates(
        &self,
        status: Option<TemplateStatus>,
    ) -> Result<Vec<TaskTemplate>, BoardError>;
    /// Overwrite an existing template.
    async fn update_template(&self, template: &TaskTemplate) -> Result<(), BoardError>;

    /// Insert an instance.
    async fn insert_instance(&self, instance: TaskInstance) -> Result<(), BoardError>;
    /// Fetch an instance by id.
    async fn get_instance(&self, id: Uuid) -> Result<Option<TaskInstance>, BoardError>;
    /// Most recent instances of a template, newest first.
    async fn recent_instances(
        &self,
        template_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TaskInstance>, BoardError>;
    /// Instances backed by a card.
    async fn instances_for_card(&self, card_id: Uuid) -> Result<Vec<TaskInstance>, BoardError>;
    /// Overwrite an existing instance.
    async fn update_instance(&self, instance: &TaskInstance) -> Result<(), BoardError>;

    /// Append an interaction record.
    async fn insert_interaction(&self, record: InteractionRecord) -> Result<(), BoardError>;
    /// Interaction history of an instance, oldest first.
    async fn interactions_for_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<InteractionRecord>, BoardError>;
}

/// A backend providing every table.
pub trait Store: BoardStore + CommandStore + TemplateStore {}

impl<T> Store for T where T: BoardStore + CommandStore + TemplateStore {}
