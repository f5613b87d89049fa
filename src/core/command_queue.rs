//! Single-flight command queue.
//!
//! Each [`CommandQueue::tick`] runs at most one direct command. The
//! single-flight rule lives in the store's atomic claim, so concurrent ticks
//! from several tasks (or processes sharing a database) never run two
//! entries at once. A claim is a lease: if the worker dies, the entry returns
//! to `pending` once the lease expires.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CommandQueueConfig;
use crate::core::board::BoardManager;
use crate::core::events::{AgentTaskFailed, BoardEvent, EventPublisher};
use crate::core::executor::{CompletionClient, CompletionOptions, ToolRouter};
use crate::core::model::{
    CommandQueueEntry, CommandStatus, DIRECT_COMMAND_LABEL, DOING_COLUMN, DONE_COLUMN,
    FAILED_COLUMN, FAILED_LABEL, LEASE_EXPIRED_ERROR,
};
use crate::core::BoardError;
use crate::util::clock::{after_secs, now};

const AGENT_NAME: &str = "command-queue";

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TickOutcome {
    /// Nothing pending.
    Idle,
    /// Another entry holds the running slot.
    Busy {
        /// Running entry.
        entry_id: Uuid,
    },
    /// The claimed entry completed.
    Completed {
        /// Entry id.
        entry_id: Uuid,
        /// Card id.
        card_id: Uuid,
    },
    /// The attempt failed and the entry went back to pending.
    Retrying {
        /// Entry id.
        entry_id: Uuid,
        /// Attempts made so far.
        attempts: u32,
    },
    /// The attempt failed and the budget is spent.
    Failed {
        /// Entry id.
        entry_id: Uuid,
        /// Attempts made.
        attempts: u32,
    },
    /// The lease expired while executing; the outcome was discarded.
    LeaseLost {
        /// Entry id.
        entry_id: Uuid,
    },
}

/// Executes direct-command cards one at a time.
#[derive(Clone)]
pub struct CommandQueue {
    board: BoardManager,
    completion: Arc<dyn CompletionClient>,
    tools: Arc<dyn ToolRouter>,
    publisher: Arc<dyn EventPublisher>,
    config: CommandQueueConfig,
    execution_rules: String,
    owner: String,
}

impl CommandQueue {
    /// Create a queue; the lease owner token is unique per instance.
    pub fn new(
        board: BoardManager,
        completion: Arc<dyn CompletionClient>,
        tools: Arc<dyn ToolRouter>,
        publisher: Arc<dyn EventPublisher>,
        config: CommandQueueConfig,
        execution_rules: impl Into<String>,
    ) -> Self {
        let owner = format!("{}-{}", config.worker_name, Uuid::new_v4().simple());
        Self {
            board,
            completion,
            tools,
            publisher,
            config,
            execution_rules: execution_rules.into(),
            owner,
        }
    }

    /// Lease owner token of this queue.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Reclaim expired leases, then claim and run the next pending entry.
    pub async fn tick(&self) -> Result<TickOutcome, BoardError> {
        self.reclaim_expired().await?;

        let store = self.board.store();
        if let Some(running) = store.running_command().await? {
            tracing::debug!(entry_id = %running.id, "command queue busy");
            return Ok(TickOutcome::Busy {
                entry_id: running.id,
            });
        }
        let lease_until = after_secs(self.config.lease_secs);
        let Some(entry) = store.claim_next_command(&self.owner, lease_until).await? else {
            return Ok(match store.running_command().await? {
                Some(running) => TickOutcome::Busy {
                    entry_id: running.id,
                },
                None => TickOutcome::Idle,
            });
        };
        tracing::info!(
            entry_id = %entry.id,
            card_id = %entry.card_id,
            attempt = entry.attempts,
            max_attempts = entry.max_attempts,
            "command claimed"
        );

        match self.execute(&entry).await {
            Ok((result, tools_used)) => self.settle_success(entry, result, tools_used).await,
            Err(e) => self.settle_failure(entry, e.to_string()).await,
        }
    }

    /// Queue a card for execution with an explicit instruction.
    ///
    /// A card that already has a pending or running entry keeps it.
    pub async fn enqueue(
        &self,
        card_id: Uuid,
        instruction: &str,
    ) -> Result<CommandQueueEntry, BoardError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(BoardError::InvalidInput("command instruction is empty".into()));
        }
        let card = self.board.card(card_id).await?;
        let store = self.board.store();
        if let Some(active) = store
            .commands_for_card(card.id)
            .await?
            .into_iter()
            .find(|e| matches!(e.status, CommandStatus::Pending | CommandStatus::Running))
        {
            return Ok(active);
        }
        let entry = CommandQueueEntry::pending(card.id, instruction, self.config.max_attempts);
        store.insert_command(entry.clone()).await?;
        self.board.add_labels(card.id, [DIRECT_COMMAND_LABEL]).await?;
        tracing::info!(%card_id, entry_id = %entry.id, "command enqueued");
        Ok(entry)
    }

    /// Entries for a card, oldest first.
    pub async fn entries_for_card(
        &self,
        card_id: Uuid,
    ) -> Result<Vec<CommandQueueEntry>, BoardError> {
        self.board.store().commands_for_card(card_id).await
    }

    /// The running entry, if any.
    pub async fn running_entry(&self) -> Result<Option<CommandQueueEntry>, BoardError> {
        self.board.store().running_command().await
    }

    /// Reset a failed entry to pending with a fresh attempt budget.
    ///
    /// The card goes back to Doing.
    pub async fn retry(&self, entry_id: Uuid) -> Result<CommandQueueEntry, BoardError> {
        let store = self.board.store();
        let mut entry = store
            .get_command(entry_id)
            .await?
            .ok_or_else(|| BoardError::not_found("command", entry_id))?;
        if entry.status != CommandStatus::Failed {
            return Err(BoardError::InvalidInput(format!(
                "command {entry_id} is {}, only failed commands can be retried",
                entry.status.as_str()
            )));
        }
        entry.status = CommandStatus::Pending;
        entry.attempts = 0;
        entry.error = None;
        entry.lease = None;
        entry.finished_at = None;
        entry.updated_at = now();
        store.update_command(&entry).await?;
        if let Err(e) = self.board.move_card_to(entry.card_id, DOING_COLUMN).await {
            tracing::warn!(card_id = %entry.card_id, "retried command card not moved: {e}");
        }
        tracing::info!(%entry_id, "command reset for retry");
        Ok(entry)
    }

    async fn reclaim_expired(&self) -> Result<(), BoardError> {
        let reclaimed = self.board.store().reclaim_expired_leases(now()).await?;
        for entry in reclaimed {
            if entry.status != CommandStatus::Failed {
                tracing::warn!(
                    entry_id = %entry.id,
                    attempts = entry.attempts,
                    "expired lease reclaimed"
                );
                continue;
            }
            tracing::warn!(
                entry_id = %entry.id,
                attempts = entry.attempts,
                "expired lease exhausted the attempt budget"
            );
            let error = entry
                .error
                .clone()
                .unwrap_or_else(|| LEASE_EXPIRED_ERROR.to_string());
            self.fail_card(&entry, &error).await;
        }
        Ok(())
    }

    async fn execute(
        &self,
        entry: &CommandQueueEntry,
    ) -> Result<(String, Vec<String>), BoardError> {
        let options = CompletionOptions {
            system: Some(system_instruction(&self.execution_rules)),
            ..CompletionOptions::default()
        };
        let prompt = format!("Command:\n{}", entry.instruction.trim());
        let schemas = self.tools.schemas();
        let response = self
            .completion
            .call_tools(&prompt, &schemas, &options)
            .await?;

        let mut tools_used: Vec<String> = Vec::new();
        for call in response.tool_calls {
            tracing::debug!(entry_id = %entry.id, tool = %call.name, "executing tool call");
            self.tools
                .execute(&call.name, call.arguments)
                .await
                .map_err(|e| BoardError::Upstream(format!("tool `{}` failed: {e}", call.name)))?;
            if !tools_used.contains(&call.name) {
                tools_used.push(call.name);
            }
        }

        let message = response.message.trim();
        let result = if message.is_empty() {
            format!("Executed {} tool(s).", tools_used.len())
        } else {
            message.to_string()
        };
        Ok((result, tools_used))
    }

    async fn settle_success(
        &self,
        mut entry: CommandQueueEntry,
        result: String,
        tools_used: Vec<String>,
    ) -> Result<TickOutcome, BoardError> {
        let stamp = now();
        entry.status = CommandStatus::Completed;
        entry.result = Some(result.clone());
        entry.tools_used = tools_used.clone();
        entry.error = None;
        entry.lease = None;
        entry.finished_at = Some(stamp);
        entry.updated_at = stamp;
        if !self.board.store().settle_command(&entry, &self.owner).await? {
            tracing::warn!(entry_id = %entry.id, "lease lost before completion was recorded");
            return Ok(TickOutcome::LeaseLost { entry_id: entry.id });
        }
        tracing::info!(
            entry_id = %entry.id,
            card_id = %entry.card_id,
            attempts = entry.attempts,
            "command completed"
        );

        if let Err(e) = self.board.move_card_to(entry.card_id, DONE_COLUMN).await {
            tracing::warn!(card_id = %entry.card_id, "completed command card not moved: {e}");
        }
        let mut note = format!("Command completed at {}.\nResult: {result}", stamp.to_rfc3339());
        if !tools_used.is_empty() {
            note.push_str("\nTools used: ");
            note.push_str(&tools_used.join(", "));
        }
        if let Err(e) = self.board.append_description(entry.card_id, &note).await {
            tracing::warn!(card_id = %entry.card_id, "completion note not written: {e}");
        }
        self.publish(BoardEvent::CommandCompleted {
            entry_id: entry.id,
            card_id: entry.card_id,
            result,
            tools_used,
        })
        .await;
        Ok(TickOutcome::Completed {
            entry_id: entry.id,
            card_id: entry.card_id,
        })
    }

    async fn settle_failure(
        &self,
        mut entry: CommandQueueEntry,
        error: String,
    ) -> Result<TickOutcome, BoardError> {
        let stamp = now();
        let terminal = entry.exhausted();
        entry.status = if terminal {
            CommandStatus::Failed
        } else {
            CommandStatus::Pending
        };
        entry.error = Some(error.clone());
        entry.lease = None;
        entry.finished_at = terminal.then_some(stamp);
        entry.updated_at = stamp;
        if !self.board.store().settle_command(&entry, &self.owner).await? {
            tracing::warn!(entry_id = %entry.id, "lease lost before failure was recorded");
            return Ok(TickOutcome::LeaseLost { entry_id: entry.id });
        }

        if !terminal {
            tracing::warn!(
                entry_id = %entry.id,
                attempts = entry.attempts,
                max_attempts = entry.max_attempts,
                "command attempt failed; will retry: {error}"
            );
            return Ok(TickOutcome::Retrying {
                entry_id: entry.id,
                attempts: entry.attempts,
            });
        }
        tracing::error!(entry_id = %entry.id, attempts = entry.attempts, "command failed: {error}");
        self.fail_card(&entry, &error).await;
        Ok(TickOutcome::Failed {
            entry_id: entry.id,
            attempts: entry.attempts,
        })
    }

    async fn fail_card(&self, entry: &CommandQueueEntry, error: &str) {
        let card_id = entry.card_id;
        if let Err(e) = self.board.move_card_to(card_id, FAILED_COLUMN).await {
            tracing::warn!(%card_id, "failed command card not moved: {e}");
        }
        let note = format!(
            "Command failed after {} attempt(s) at {}.\nError: {error}",
            entry.attempts,
            now().to_rfc3339()
        );
        if let Err(e) = self.board.append_description(card_id, &note).await {
            tracing::warn!(%card_id, "failure note not written: {e}");
        }
        let description = match self.board.add_labels(card_id, [FAILED_LABEL]).await {
            Ok(card) => card.description,
            Err(e) => {
                tracing::warn!(%card_id, "failed label not added: {e}");
                String::new()
            }
        };

        self.publish(BoardEvent::CommandFailed {
            entry_id: entry.id,
            card_id,
            error: error.to_string(),
            attempts: entry.attempts,
        })
        .await;
        self.publish(BoardEvent::AgentTaskFailed(AgentTaskFailed {
            agent: AGENT_NAME.into(),
            task_id: card_id.to_string(),
            error: error.to_string(),
            timestamp: now(),
            failure_notes: format!(
                "failed after {} of {} attempts",
                entry.attempts, entry.max_attempts
            ),
            request: entry.instruction.clone(),
            description,
        }))
        .await;
    }

    async fn publish(&self, event: BoardEvent) {
        let topic = event.topic();
        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!(topic, "failed to publish event: {e}");
        }
    }
}

fn system_instruction(rules: &str) -> String {
    let mut instruction = String::from(
        "You execute direct commands taken from the task board. Use the available tools to \
         carry out the command, then reply with a short summary of what was done.",
    );
    let rules = rules.trim();
    if !rules.is_empty() {
        instruction.push_str("\n\nExecution rules:\n");
        instruction.push_str(rules);
    }
    instruction
}
