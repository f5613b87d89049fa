//! Board operations layered over a [`Store`]: default provisioning,
//! dependency-gated moves and instance status synchronisation.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{BoardConfig, DependencyCheck};
use crate::core::model::{
    is_done_column, Board, Card, Column, CommandQueueEntry, Correlation, Dependency,
    InstanceStatus, NewCard, DIRECT_COMMAND_LABEL, STANDARD_COLUMNS,
};
use crate::core::{BoardError, Store};
use crate::util::clock::now;

/// Result of a successful move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    /// Card after the move.
    pub card: Card,
    /// Column the card left.
    pub from: Column,
    /// Column the card entered.
    pub to: Column,
}

impl MoveOutcome {
    /// Whether the card actually changed column.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from.id != self.to.id
    }
}

/// A column with its cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    /// Column.
    pub column: Column,
    /// Cards ordered by position.
    pub cards: Vec<Card>,
}

/// A board with every column and card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Board.
    pub board: Board,
    /// Columns ordered by position.
    pub columns: Vec<ColumnSnapshot>,
}

/// Board operations shared by the controller, queue and scheduler.
#[derive(Clone)]
pub struct BoardManager {
    store: Arc<dyn Store>,
    config: BoardConfig,
    max_attempts: u32,
}

impl BoardManager {
    /// Create a manager over a store.
    pub fn new(store: Arc<dyn Store>, config: BoardConfig, max_attempts: u32) -> Self {
        Self {
            store,
            config,
            max_attempts,
        }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create a board with the four standard columns.
    pub async fn create_board(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<Board, BoardError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BoardError::InvalidInput("board name must not be empty".into()));
        }
        let stamp = now();
        let board = Board {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description,
            created_at: stamp,
            updated_at: stamp,
        };
        self.store.insert_board(board.clone()).await?;
        for (position, column_name) in (0_i32..).zip(STANDARD_COLUMNS) {
            self.store
                .insert_column(Column {
                    id: Uuid::new_v4(),
                    board_id: board.id,
                    name: column_name.to_string(),
                    position,
                    created_at: stamp,
                })
                .await?;
        }
        tracing::info!(board_id = %board.id, name = %board.name, "board created");
        Ok(board)
    }

    /// The configured default board, created on first use.
    pub async fn default_board(&self) -> Result<Board, BoardError> {
        let name = &self.config.default_board_name;
        if let Some(board) = self.store.find_board_by_name(name).await? {
            return Ok(board);
        }
        self.create_board(name, Some("Plans, commands and scheduled work".into()))
            .await
    }

    /// Fetch a board or fail with `NotFound`.
    pub async fn board(&self, board_id: Uuid) -> Result<Board, BoardError> {
        self.store
            .get_board(board_id)
            .await?
            .ok_or_else(|| BoardError::not_found("board", board_id))
    }

    /// All boards, oldest first.
    pub async fn boards(&self) -> Result<Vec<Board>, BoardError> {
        self.store.list_boards().await
    }

    /// Delete a board with its columns, cards and their queue entries.
    pub async fn delete_board(&self, board_id: Uuid) -> Result<(), BoardError> {
        self.board(board_id).await?;
        self.store.delete_board(board_id).await?;
        tracing::info!(%board_id, "board deleted");
        Ok(())
    }

    /// Columns of a board ordered by position.
    pub async fn columns(&self, board_id: Uuid) -> Result<Vec<Column>, BoardError> {
        self.store.list_columns(board_id).await
    }

    /// Column of a board by case-insensitive name.
    pub async fn column_by_name(
        &self,
        board_id: Uuid,
        name: &str,
    ) -> Result<Option<Column>, BoardError> {
        let wanted = name.trim();
        Ok(self
            .store
            .list_columns(board_id)
            .await?
            .into_iter()
            .find(|c| c.name.trim().eq_ignore_ascii_case(wanted)))
    }

    /// Column by name, appended after the last column if missing.
    pub async fn get_or_create_column(
        &self,
        board_id: Uuid,
        name: &str,
    ) -> Result<Column, BoardError> {
        let columns = self.store.list_columns(board_id).await?;
        let wanted = name.trim();
        if let Some(existing) = columns
            .iter()
            .find(|c| c.name.trim().eq_ignore_ascii_case(wanted))
        {
            return Ok(existing.clone());
        }
        if wanted.is_empty() {
            return Err(BoardError::InvalidInput("column name must not be empty".into()));
        }
        self.board(board_id).await?;
        let position = columns.iter().map(|c| c.position).max().map_or(0, |p| p + 1);
        let column = Column {
            id: Uuid::new_v4(),
            board_id,
            name: wanted.to_string(),
            position,
            created_at: now(),
        };
        self.store.insert_column(column.clone()).await?;
        tracing::info!(%board_id, column = %column.name, position, "column created");
        Ok(column)
    }

    /// Create a card at the end of the named column.
    ///
    /// A card created with the direct-command label is enqueued for the
    /// command queue with its description (or title) as the instruction.
    pub async fn create_card(
        &self,
        board_id: Uuid,
        column_name: &str,
        new: NewCard,
    ) -> Result<(Card, Column), BoardError> {
        let column = self
            .column_by_name(board_id, column_name)
            .await?
            .ok_or_else(|| BoardError::not_found("column", column_name))?;
        let card = self.create_card_in_column(&column, new).await?;
        Ok((card, column))
    }

    /// Create a card at the end of a column.
    pub async fn create_card_in_column(
        &self,
        column: &Column,
        new: NewCard,
    ) -> Result<Card, BoardError> {
        if new.title.trim().is_empty() {
            return Err(BoardError::InvalidInput("card title must not be empty".into()));
        }
        let stamp = now();
        let position = self.store.next_card_position(column.id).await?;
        let card = Card {
            id: Uuid::new_v4(),
            column_id: column.id,
            board_id: column.board_id,
            title: new.title,
            description: new.description,
            position,
            priority: new.priority,
            labels: dedup_labels(new.labels),
            due_date: new.due_date,
            correlation: new.correlation,
            origin: new.origin.filter(|o| !o.is_empty()),
            created_at: stamp,
            updated_at: stamp,
        };
        self.store.insert_card(card.clone()).await?;
        tracing::debug!(card_id = %card.id, column = %column.name, "card created");
        if card.has_label(DIRECT_COMMAND_LABEL) {
            self.ensure_command_entry(&card).await?;
        }
        Ok(card)
    }

    /// Fetch a card or fail with `NotFound`.
    pub async fn card(&self, card_id: Uuid) -> Result<Card, BoardError> {
        self.store
            .get_card(card_id)
            .await?
            .ok_or_else(|| BoardError::not_found("card", card_id))
    }

    /// Card bound to a correlation id.
    pub async fn find_by_correlation(
        &self,
        correlation: &Correlation,
    ) -> Result<Option<Card>, BoardError> {
        self.store.find_card_by_correlation(correlation).await
    }

    /// Persist edited card fields, stamping `updated_at`.
    pub async fn save_card(&self, mut card: Card) -> Result<Card, BoardError> {
        card.updated_at = now();
        card.labels = dedup_labels(card.labels);
        self.store.update_card(&card).await?;
        Ok(card)
    }

    /// Column a card currently occupies.
    pub async fn column_of(&self, card: &Card) -> Result<Column, BoardError> {
        self.store
            .get_column(card.column_id)
            .await?
            .ok_or_else(|| BoardError::not_found("column", card.column_id))
    }

    /// Move a card into a column of the same board.
    ///
    /// Moving into a Done-named column fails with
    /// [`BoardError::IncompleteDependencies`] while any prerequisite is not in
    /// a Done-named column of the same board. Moving into the card's current
    /// column is a no-op.
    pub async fn move_card(
        &self,
        card_id: Uuid,
        column_id: Uuid,
    ) -> Result<MoveOutcome, BoardError> {
        let mut card = self.card(card_id).await?;
        let from = self.column_of(&card).await?;
        let to = self
            .store
            .get_column(column_id)
            .await?
            .ok_or_else(|| BoardError::not_found("column", column_id))?;
        if to.board_id != card.board_id {
            return Err(BoardError::InvalidInput(format!(
                "column {} belongs to another board",
                to.id
            )));
        }
        if from.id == to.id {
            return Ok(MoveOutcome { card, from, to });
        }
        if is_done_column(&to.name) {
            let pending = self.incomplete_dependencies(&card).await?;
            if !pending.is_empty() {
                tracing::warn!(%card_id, pending = pending.len(), "done move refused");
                return Err(BoardError::IncompleteDependencies { card_id, pending });
            }
        }

        card.position = self.store.next_card_position(to.id).await?;
        card.column_id = to.id;
        card.updated_at = now();
        self.store.update_card(&card).await?;
        tracing::info!(%card_id, from = %from.name, to = %to.name, "card moved");

        self.sync_instances(card.id, &to.name).await;
        Ok(MoveOutcome { card, from, to })
    }

    /// Move a card into the named column of its board, creating the column if missing.
    pub async fn move_card_to(
        &self,
        card_id: Uuid,
        column_name: &str,
    ) -> Result<MoveOutcome, BoardError> {
        let card = self.card(card_id).await?;
        let column = self.get_or_create_column(card.board_id, column_name).await?;
        self.move_card(card_id, column.id).await
    }

    /// Prerequisites of `card` that are not finished, per the configured depth.
    pub async fn incomplete_dependencies(&self, card: &Card) -> Result<Vec<Uuid>, BoardError> {
        let mut pending = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::from([card.id]);
        let mut frontier: VecDeque<Uuid> = self.store.dependencies_of(card.id).await?.into();

        while let Some(dep_id) = frontier.pop_front() {
            if !seen.insert(dep_id) {
                continue;
            }
            let Some(dep) = self.store.get_card(dep_id).await? else {
                continue;
            };
            if !self.is_done_on_board(&dep, card.board_id).await? {
                pending.push(dep_id);
            }
            if self.config.dependency_check == DependencyCheck::Transitive {
                frontier.extend(self.store.dependencies_of(dep_id).await?);
            }
        }
        Ok(pending)
    }

    async fn is_done_on_board(&self, card: &Card, board_id: Uuid) -> Result<bool, BoardError> {
        if card.board_id != board_id {
            return Ok(false);
        }
        Ok(self
            .store
            .get_column(card.column_id)
            .await?
            .is_some_and(|c| is_done_column(&c.name)))
    }

    /// Record that `card_id` depends on `depends_on`.
    pub async fn add_dependency(&self, card_id: Uuid, depends_on: Uuid) -> Result<(), BoardError> {
        if card_id == depends_on {
            return Err(BoardError::InvalidInput("a card cannot depend on itself".into()));
        }
        self.card(card_id).await?;
        self.card(depends_on).await?;
        self.store
            .add_dependency(Dependency {
                card_id,
                depends_on,
            })
            .await?;
        tracing::debug!(%card_id, %depends_on, "dependency added");
        Ok(())
    }

    /// Drop a dependency edge, returning whether it existed.
    pub async fn remove_dependency(
        &self,
        card_id: Uuid,
        depends_on: Uuid,
    ) -> Result<bool, BoardError> {
        self.store
            .remove_dependency(Dependency {
                card_id,
                depends_on,
            })
            .await
    }

    /// Direct prerequisites of a card.
    pub async fn dependencies(&self, card_id: Uuid) -> Result<Vec<Uuid>, BoardError> {
        self.store.dependencies_of(card_id).await
    }

    /// Append a paragraph to a card's description.
    pub async fn append_description(&self, card_id: Uuid, text: &str) -> Result<Card, BoardError> {
        let mut card = self.card(card_id).await?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(card);
        }
        if card.description.trim().is_empty() {
            card.description = text.to_string();
        } else {
            card.description = format!("{}\n\n{text}", card.description.trim_end());
        }
        self.save_card(card).await
    }

    /// Append labels the card does not carry yet, preserving order.
    ///
    /// Acquiring the direct-command label enqueues the card.
    pub async fn add_labels<I, S>(&self, card_id: Uuid, labels: I) -> Result<Card, BoardError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let mut card = self.card(card_id).await?;
        let had_command = card.has_label(DIRECT_COMMAND_LABEL);
        for label in labels {
            let label: String = label.into();
            let label = label.trim();
            if !label.is_empty() && !card.has_label(label) {
                card.labels.push(label.to_string());
            }
        }
        let card = self.save_card(card).await?;
        if !had_command && card.has_label(DIRECT_COMMAND_LABEL) {
            self.ensure_command_entry(&card).await?;
        }
        Ok(card)
    }

    /// Delete a card with its edges and queue entries.
    pub async fn delete_card(&self, card_id: Uuid) -> Result<(), BoardError> {
        self.card(card_id).await?;
        self.store.delete_card(card_id).await?;
        tracing::info!(%card_id, "card deleted");
        Ok(())
    }

    /// Number of cards on a board sitting in any of the named columns.
    pub async fn count_cards_in(
        &self,
        board_id: Uuid,
        names: &[&str],
    ) -> Result<usize, BoardError> {
        let mut total = 0;
        for column in self.store.list_columns(board_id).await? {
            if names
                .iter()
                .any(|n| column.name.trim().eq_ignore_ascii_case(n))
            {
                total += self.store.list_cards_in_column(column.id).await?.len();
            }
        }
        Ok(total)
    }

    /// Every column of a board with its cards.
    pub async fn snapshot(&self, board_id: Uuid) -> Result<BoardSnapshot, BoardError> {
        let board = self.board(board_id).await?;
        let mut columns = Vec::new();
        for column in self.store.list_columns(board_id).await? {
            let cards = self.store.list_cards_in_column(column.id).await?;
            columns.push(ColumnSnapshot { column, cards });
        }
        Ok(BoardSnapshot { board, columns })
    }

    /// Queue entry for a command card, created if the card has none.
    pub async fn ensure_command_entry(&self, card: &Card) -> Result<CommandQueueEntry, BoardError> {
        if let Some(existing) = self.store.commands_for_card(card.id).await?.into_iter().next() {
            return Ok(existing);
        }
        let instruction = if card.description.trim().is_empty() {
            card.title.clone()
        } else {
            card.description.clone()
        };
        let entry = CommandQueueEntry::pending(card.id, instruction, self.max_attempts);
        self.store.insert_command(entry.clone()).await?;
        tracing::info!(
            card_id = %card.id,
            entry_id = %entry.id,
            priority = card.priority.as_str(),
            "command enqueued"
        );
        Ok(entry)
    }

    /// Mirror a card's column into its template instances. Failures are logged.
    async fn sync_instances(&self, card_id: Uuid, column_name: &str) {
        let Some(status) = InstanceStatus::from_column_name(column_name) else {
            return;
        };
        let instances = match self.store.instances_for_card(card_id).await {
            Ok(instances) => instances,
            Err(e) => {
                tracing::warn!(%card_id, "instance lookup failed: {e}");
                return;
            }
        };
        for mut instance in instances {
            if instance.status == status {
                continue;
            }
            let stamp = now();
            instance.status = status;
            instance.updated_at = stamp;
            instance.completed_at = (status == InstanceStatus::Completed).then_some(stamp);
            if let Err(e) = self.store.update_instance(&instance).await {
                tracing::warn!(instance_id = %instance.id, "instance sync failed: {e}");
            } else {
                tracing::debug!(
                    instance_id = %instance.id,
                    status = status.as_str(),
                    "instance synced"
                );
            }
        }
    }
}

fn dedup_labels(labels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if !label.is_empty() && !out.iter().any(|l| l == label) {
            out.push(label.to_string());
        }
    }
    out
}
