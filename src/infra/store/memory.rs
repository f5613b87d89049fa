//! In-memory store for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::model::{
    Board, Card, Column, CommandQueueEntry, CommandStatus, Correlation, Dependency,
    InteractionRecord, Lease, TaskInstance, TaskTemplate, TemplateStatus,
};
use crate::core::{BoardError, BoardStore, CommandStore, TemplateStore};

#[derive(Default)]
struct State {
    boards: Vec<Board>,
    columns: Vec<Column>,
    cards: Vec<Card>,
    by_correlation: HashMap<Correlation, Uuid>,
    dependencies: Vec<Dependency>,
    commands: Vec<CommandQueueEntry>,
    templates: Vec<TaskTemplate>,
    instances: Vec<TaskInstance>,
    interactions: Vec<InteractionRecord>,
}

impl State {
    fn card_mut(&mut self, id: Uuid) -> Result<&mut Card, BoardError> {
        self.cards
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| BoardError::not_found("card", id))
    }

    fn remove_card(&mut self, id: Uuid) {
        if let Some(index) = self.cards.iter().position(|c| c.id == id) {
            let card = self.cards.remove(index);
            if let Some(correlation) = card.correlation {
                self.by_correlation.remove(&correlation);
            }
        }
        self.dependencies
            .retain(|d| d.card_id != id && d.depends_on != id);
        self.commands.retain(|e| e.card_id != id);
    }

    fn card_rank(&self, card_id: Uuid) -> u8 {
        self.cards
            .iter()
            .find(|c| c.id == card_id)
            .map_or(u8::MAX, |c| c.priority.rank())
    }
}

/// Store keeping every table in process memory behind one lock.
///
/// Each trait call takes the lock once, so the command claim is atomic
/// across tasks sharing the store.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BoardStore for InMemoryStore {
    async fn insert_board(&self, board: Board) -> Result<(), BoardError> {
        self.state.lock().boards.push(board);
        Ok(())
    }

    async fn get_board(&self, id: Uuid) -> Result<Option<Board>, BoardError> {
        Ok(self.state.lock().boards.iter().find(|b| b.id == id).cloned())
    }

    async fn find_board_by_name(&self, name: &str) -> Result<Option<Board>, BoardError> {
        Ok(self
            .state
            .lock()
            .boards
            .iter()
            .find(|b| b.name == name)
            .cloned())
    }

    async fn list_boards(&self) -> Result<Vec<Board>, BoardError> {
        Ok(self.state.lock().boards.clone())
    }

    async fn delete_board(&self, id: Uuid) -> Result<(), BoardError> {
        let mut state = self.state.lock();
        let card_ids: Vec<Uuid> = state
            .cards
            .iter()
            .filter(|c| c.board_id == id)
            .map(|c| c.id)
            .collect();
        for card_id in card_ids {
            state.remove_card(card_id);
        }
        state.columns.retain(|c| c.board_id != id);
        state.boards.retain(|b| b.id != id);
        Ok(())
    }

    async fn insert_column(&self, column: Column) -> Result<(), BoardError> {
        self.state.lock().columns.push(column);
        Ok(())
    }

    async fn get_column(&self, id: Uuid) -> Result<Option<Column>, BoardError> {
        Ok(self.state.lock().columns.iter().find(|c| c.id == id).cloned())
    }

    async fn list_columns(&self, board_id: Uuid) -> Result<Vec<Column>, BoardError> {
        let mut columns: Vec<Column> = self
            .state
            .lock()
            .columns
            .iter()
            .filter(|c| c.board_id == board_id)
            .cloned()
            .collect();
        columns.sort_by_key(|c| c.position);
        Ok(columns)
    }

    async fn insert_card(&self, card: Card) -> Result<(), BoardError> {
        let mut state = self.state.lock();
        if let Some(correlation) = &card.correlation {
            if state.by_correlation.contains_key(correlation) {
                return Err(BoardError::InvalidInput(format!(
                    "correlation {}:{} already bound to a card",
                    correlation.kind.as_str(),
                    correlation.id
                )));
            }
            state.by_correlation.insert(correlation.clone(), card.id);
        }
        state.cards.push(card);
        Ok(())
    }

    async fn get_card(&self, id: Uuid) -> Result<Option<Card>, BoardError> {
        Ok(self.state.lock().cards.iter().find(|c| c.id == id).cloned())
    }

    async fn update_card(&self, card: &Card) -> Result<(), BoardError> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(state.card_mut(card.id)?, card.clone());
        if previous.correlation != card.correlation {
            if let Some(old) = previous.correlation {
                state.by_correlation.remove(&old);
            }
            if let Some(new) = &card.correlation {
                state.by_correlation.insert(new.clone(), card.id);
            }
        }
        Ok(())
    }

    async fn delete_card(&self, id: Uuid) -> Result<(), BoardError> {
        self.state.lock().remove_card(id);
        Ok(())
    }

    async fn list_cards_in_column(&self, column_id: Uuid) -> Result<Vec<Card>, BoardError> {
        let mut cards: Vec<Card> = self
            .state
            .lock()
            .cards
            .iter()
            .filter(|c| c.column_id == column_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.position);
        Ok(cards)
    }

    async fn list_cards(&self, board_id: Uuid) -> Result<Vec<Card>, BoardError> {
        let state = self.state.lock();
        let column_position = |column_id: Uuid| {
            state
                .columns
                .iter()
                .find(|c| c.id == column_id)
                .map_or(i32::MAX, |c| c.position)
        };
        let mut cards: Vec<Card> = state
            .cards
            .iter()
            .filter(|c| c.board_id == board_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| (column_position(c.column_id), c.position));
        Ok(cards)
    }

    async fn find_card_by_correlation(
        &self,
        correlation: &Correlation,
    ) -> Result<Option<Card>, BoardError> {
        let state = self.state.lock();
        Ok(state
            .by_correlation
            .get(correlation)
            .and_then(|id| state.cards.iter().find(|c| c.id == *id))
            .cloned())
    }

    async fn next_card_position(&self, column_id: Uuid) -> Result<i32, BoardError> {
        Ok(self
            .state
            .lock()
            .cards
            .iter()
            .filter(|c| c.column_id == column_id)
            .map(|c| c.position)
            .max()
            .map_or(0, |p| p + 1))
    }

    async fn add_dependency(&self, dependency: Dependency) -> Result<(), BoardError> {
        let mut state = self.state.lock();
        if !state.dependencies.contains(&dependency) {
            state.dependencies.push(dependency);
        }
        Ok(())
    }

    async fn remove_dependency(&self, dependency: Dependency) -> Result<bool, BoardError> {
        let mut state = self.state.lock();
        let before = state.dependencies.len();
        state.dependencies.retain(|d| *d != dependency);
        Ok(state.dependencies.len() != before)
    }

    async fn dependencies_of(&self, card_id: Uuid) -> Result<Vec<Uuid>, BoardError> {
        Ok(self
            .state
            .lock()
            .dependencies
            .iter()
            .filter(|d| d.card_id == card_id)
            .map(|d| d.depends_on)
            .collect())
    }
}

#[async_trait]
impl CommandStore for InMemoryStore {
    async fn insert_command(&self, entry: CommandQueueEntry) -> Result<(), BoardError> {
        self.state.lock().commands.push(entry);
        Ok(())
    }

    async fn get_command(&self, id: Uuid) -> Result<Option<CommandQueueEntry>, BoardError> {
        Ok(self.state.lock().commands.iter().find(|e| e.id == id).cloned())
    }

    async fn commands_for_card(
        &self,
        card_id: Uuid,
    ) -> Result<Vec<CommandQueueEntry>, BoardError> {
        Ok(self
            .state
            .lock()
            .commands
            .iter()
            .filter(|e| e.card_id == card_id)
            .cloned()
            .collect())
    }

    async fn running_command(&self) -> Result<Option<CommandQueueEntry>, BoardError> {
        Ok(self
            .state
            .lock()
            .commands
            .iter()
            .find(|e| e.status == CommandStatus::Running)
            .cloned())
    }

    async fn claim_next_command(
        &self,
        owner: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<CommandQueueEntry>, BoardError> {
        let mut state = self.state.lock();
        if state
            .commands
            .iter()
            .any(|e| e.status == CommandStatus::Running)
        {
            return Ok(None);
        }
        // min_by_key keeps the first of equal keys, so insertion order breaks ties.
        let next = state
            .commands
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == CommandStatus::Pending && !e.exhausted())
            .min_by_key(|(_, e)| (state.card_rank(e.card_id), e.created_at))
            .map(|(index, _)| index);
        let Some(index) = next else {
            return Ok(None);
        };
        let entry = &mut state.commands[index];
        entry.status = CommandStatus::Running;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.lease = Some(Lease {
            owner: owner.to_string(),
            expires_at: lease_until,
        });
        entry.updated_at = crate::util::clock::now();
        Ok(Some(entry.clone()))
    }

    async fn settle_command(
        &self,
        entry: &CommandQueueEntry,
        owner: &str,
    ) -> Result<bool, BoardError> {
        let mut state = self.state.lock();
        let Some(current) = state.commands.iter_mut().find(|e| e.id == entry.id) else {
            return Err(BoardError::not_found("command", entry.id));
        };
        let held = current.status == CommandStatus::Running
            && current.lease.as_ref().is_some_and(|l| l.owner == owner);
        if held {
            *current = entry.clone();
        }
        Ok(held)
    }

    async fn update_command(&self, entry: &CommandQueueEntry) -> Result<(), BoardError> {
        let mut state = self.state.lock();
        let current = state
            .commands
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| BoardError::not_found("command", entry.id))?;
        *current = entry.clone();
        Ok(())
    }

    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CommandQueueEntry>, BoardError> {
        let mut state = self.state.lock();
        let mut reclaimed = Vec::new();
        for entry in &mut state.commands {
            let expired = entry.status == CommandStatus::Running
                && entry.lease.as_ref().is_none_or(|l| l.expires_at <= now);
            if expired {
                entry.release_expired_lease(now);
                reclaimed.push(entry.clone());
            }
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl TemplateStore for InMemoryStore {
    async fn insert_template(&self, template: TaskTemplate) -> Result<(), BoardError> {
        self.state.lock().templates.push(template);
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<TaskTemplate>, BoardError> {
        Ok(self.state.lock().templates.iter().find(|t| t.id == id).cloned())
    }

    async fn list_templates(
        &self,
        status: Option<TemplateStatus>,
    ) -> Result<Vec<TaskTemplate>, BoardError> {
        Ok(self
            .state
            .lock()
            .templates
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }

    async fn update_template(&self, template: &TaskTemplate) -> Result<(), BoardError> {
        let mut state = self.state.lock();
        let current = state
            .templates
            .iter_mut()
            .find(|t| t.id == template.id)
            .ok_or_else(|| BoardError::not_found("template", template.id))?;
        *current = template.clone();
        Ok(())
    }

    async fn insert_instance(&self, instance: TaskInstance) -> Result<(), BoardError> {
        self.state.lock().instances.push(instance);
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<TaskInstance>, BoardError> {
        Ok(self.state.lock().instances.iter().find(|i| i.id == id).cloned())
    }

    async fn recent_instances(
        &self,
        template_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TaskInstance>, BoardError> {
        Ok(self
            .state
            .lock()
            .instances
            .iter()
            .rev()
            .filter(|i| i.template_id == template_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn instances_for_card(&self, card_id: Uuid) -> Result<Vec<TaskInstance>, BoardError> {
        Ok(self
            .state
            .lock()
            .instances
            .iter()
            .filter(|i| i.card_id == card_id)
            .cloned()
            .collect())
    }

    async fn update_instance(&self, instance: &TaskInstance) -> Result<(), BoardError> {
        let mut state = self.state.lock();
        let current = state
            .instances
            .iter_mut()
            .find(|i| i.id == instance.id)
            .ok_or_else(|| BoardError::not_found("instance", instance.id))?;
        *current = instance.clone();
        Ok(())
    }

    async fn insert_interaction(&self, record: InteractionRecord) -> Result<(), BoardError> {
        self.state.lock().interactions.push(record);
        Ok(())
    }

    async fn interactions_for_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<InteractionRecord>, BoardError> {
        Ok(self
            .state
            .lock()
            .interactions
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Priority, DEFAULT_MAX_ATTEMPTS};
    use crate::util::clock::{after_secs, now};

    fn card(priority: Priority) -> Card {
        let stamp = now();
        Card {
            id: Uuid::new_v4(),
            column_id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
            title: "c".into(),
            description: String::new(),
            position: 0,
            priority,
            labels: Vec::new(),
            due_date: None,
            correlation: None,
            origin: None,
            created_at: stamp,
            updated_at: stamp,
        }
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_age() {
        let store = InMemoryStore::new();
        let low = card(Priority::Low);
        let high = card(Priority::High);
        store.insert_card(low.clone()).await.unwrap();
        store.insert_card(high.clone()).await.unwrap();
        store
            .insert_command(CommandQueueEntry::pending(low.id, "low", DEFAULT_MAX_ATTEMPTS))
            .await
            .unwrap();
        store
            .insert_command(CommandQueueEntry::pending(high.id, "high", DEFAULT_MAX_ATTEMPTS))
            .await
            .unwrap();

        let claimed = store
            .claim_next_command("w", after_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.card_id, high.id);
        assert_eq!(claimed.attempts, 1);
        assert!(store
            .claim_next_command("w", after_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_settle_requires_lease_owner() {
        let store = InMemoryStore::new();
        let c = card(Priority::Medium);
        store.insert_card(c.clone()).await.unwrap();
        store
            .insert_command(CommandQueueEntry::pending(c.id, "x", 3))
            .await
            .unwrap();
        let mut claimed = store
            .claim_next_command("owner-a", after_secs(60))
            .await
            .unwrap()
            .unwrap();
        claimed.status = CommandStatus::Completed;
        assert!(!store.settle_command(&claimed, "owner-b").await.unwrap());
        assert!(store.settle_command(&claimed, "owner-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_correlation_index_rejects_duplicates() {
        let store = InMemoryStore::new();
        let mut first = card(Priority::Medium);
        first.correlation = Some(Correlation::plan("p-1"));
        let mut second = card(Priority::Medium);
        second.correlation = Some(Correlation::plan("p-1"));
        store.insert_card(first.clone()).await.unwrap();
        assert!(store.insert_card(second).await.is_err());
        let found = store
            .find_card_by_correlation(&Correlation::plan("p-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
    }
}
