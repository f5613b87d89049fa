//! Template scheduler: asks the completion service whether each recurring
//! template should run now, then admits the best-scored few as board cards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TemplateSchedulerConfig;
use crate::core::board::BoardManager;
use crate::core::decision::{parse_decision, AdmissionDecision};
use crate::core::events::{BoardEvent, EventPublisher};
use crate::core::executor::{CompletionClient, CompletionOptions};
use crate::core::model::{
    InstanceStatus, InteractionRecord, NewCard, NewTemplate, TaskInstance, TaskTemplate,
    TemplateStatus, AI_MANAGED_LABEL, DOING_COLUMN, TODO_COLUMN,
};
use crate::core::BoardError;
use crate::util::clock::{after_secs, now};

const DECISION_SYSTEM: &str = "You schedule recurring work for an autonomous assistant. \
Weigh each template's purpose, recent success and how busy the board is, and answer with a \
single JSON object.";

const REFINE_SYSTEM: &str = "You turn task instructions into a short, numbered execution plan. \
Reply with the plan only.";

/// Decision reached for one template during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEvaluation {
    /// Template id.
    pub template_id: Uuid,
    /// Decision used for ranking.
    pub decision: AdmissionDecision,
    /// Whether the conservative default replaced the model's answer.
    pub defaulted: bool,
    /// Next time the template is eligible.
    pub next_suggested_at: DateTime<Utc>,
}

/// Summary of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerTick {
    /// Templates evaluated, ordered by score descending.
    pub evaluated: Vec<TemplateEvaluation>,
    /// Active templates skipped because they are cooling down.
    pub cooling_down: usize,
    /// Instances created this tick.
    pub admitted: Vec<TaskInstance>,
}

/// Outcome to append to an instance's interaction history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionDraft {
    /// What was attempted.
    pub interaction: String,
    /// Result text.
    pub result: Option<String>,
    /// Tools invoked.
    pub tools_used: Vec<String>,
    /// Events emitted.
    pub events_emitted: Vec<String>,
    /// Whether it succeeded.
    pub success: bool,
}

/// Admits template instances onto the board.
#[derive(Clone)]
pub struct TemplateScheduler {
    board: BoardManager,
    completion: Arc<dyn CompletionClient>,
    publisher: Arc<dyn EventPublisher>,
    config: TemplateSchedulerConfig,
    execution_rules: String,
}

impl TemplateScheduler {
    /// Create a scheduler.
    pub fn new(
        board: BoardManager,
        completion: Arc<dyn CompletionClient>,
        publisher: Arc<dyn EventPublisher>,
        config: TemplateSchedulerConfig,
        execution_rules: impl Into<String>,
    ) -> Self {
        Self {
            board,
            completion,
            publisher,
            config,
            execution_rules: execution_rules.into(),
        }
    }

    /// Evaluate every eligible active template and admit the top scorers.
    ///
    /// A template that cannot be evaluated gets the default decision and
    /// cooldown; only failing to list templates or measure the board aborts
    /// the tick.
    pub async fn tick(&self) -> Result<SchedulerTick, BoardError> {
        let store = self.board.store();
        let started = now();
        let (eligible, cooling): (Vec<TaskTemplate>, Vec<TaskTemplate>) = store
            .list_templates(Some(TemplateStatus::Active))
            .await?
            .into_iter()
            .partition(|t| t.next_suggested_at.is_none_or(|at| at <= started));
        let mut tick = SchedulerTick {
            cooling_down: cooling.len(),
            ..SchedulerTick::default()
        };
        if eligible.is_empty() {
            tracing::debug!(cooling_down = tick.cooling_down, "no template eligible");
            return Ok(tick);
        }

        let board = self.board.default_board().await?;
        let congestion = self
            .board
            .count_cards_in(board.id, &[TODO_COLUMN, DOING_COLUMN])
            .await?;

        for mut template in eligible {
            let (decision, defaulted) = match self.decide(&template, congestion).await {
                Ok(decided) => decided,
                Err(e) => {
                    tracing::error!(
                        template_id = %template.id,
                        "template evaluation failed, applying the default cooldown: {e}"
                    );
                    (
                        AdmissionDecision::fallback(self.config.default_cooldown_secs),
                        true,
                    )
                }
            };
            let next = after_secs(decision.cooldown_secs(self.config.default_cooldown_secs));
            template.next_suggested_at = Some(next);
            template.updated_at = now();
            if let Err(e) = store.update_template(&template).await {
                tracing::error!(template_id = %template.id, "cooldown not persisted: {e}");
            }
            tracing::debug!(
                template_id = %template.id,
                admit = decision.should_create_instance,
                score = decision.priority_score,
                defaulted,
                "template evaluated"
            );
            tick.evaluated.push(TemplateEvaluation {
                template_id: template.id,
                decision,
                defaulted,
                next_suggested_at: next,
            });
        }

        tick.evaluated
            .sort_by(|a, b| b.decision.priority_score.cmp(&a.decision.priority_score));
        let chosen: Vec<Uuid> = tick
            .evaluated
            .iter()
            .filter(|e| e.decision.should_create_instance)
            .take(self.config.max_admissions_per_tick)
            .map(|e| e.template_id)
            .collect();
        for template_id in chosen {
            match self.create_instance(template_id, None).await {
                Ok(instance) => tick.admitted.push(instance),
                Err(e) => tracing::error!(%template_id, "instance creation failed: {e}"),
            }
        }
        tracing::info!(
            evaluated = tick.evaluated.len(),
            admitted = tick.admitted.len(),
            cooling_down = tick.cooling_down,
            "template tick finished"
        );
        Ok(tick)
    }

    /// Ask for a decision, re-asking after an unusable answer, then default.
    ///
    /// Errors only when the template's history cannot be read.
    async fn decide(
        &self,
        template: &TaskTemplate,
        congestion: usize,
    ) -> Result<(AdmissionDecision, bool), BoardError> {
        let recent = self
            .board
            .store()
            .recent_instances(template.id, self.config.history_window)
            .await?;
        let prompt = decision_prompt(
            template,
            success_rate(&recent),
            recent.len(),
            congestion,
            &self.execution_rules,
        );
        let options = CompletionOptions {
            system: Some(DECISION_SYSTEM.into()),
            json_response: true,
            ..CompletionOptions::default()
        };

        let mut current = prompt.clone();
        for attempt in 0..=self.config.decision_retries {
            let text = match self.completion.complete(&current, &options).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(template_id = %template.id, "decision request failed: {e}");
                    break;
                }
            };
            match parse_decision(&text) {
                Ok(decision) => return Ok((decision, false)),
                Err(e) => {
                    tracing::warn!(template_id = %template.id, attempt, "unusable decision: {e}");
                    current = corrective_prompt(&prompt, &e.to_string());
                }
            }
        }
        Ok((
            AdmissionDecision::fallback(self.config.default_cooldown_secs),
            true,
        ))
    }

    /// Create an instance of a template.
    ///
    /// Without `card_id` a new To Do card is created on the default board;
    /// with it, the existing card is linked and tagged.
    pub async fn create_instance(
        &self,
        template_id: Uuid,
        card_id: Option<Uuid>,
    ) -> Result<TaskInstance, BoardError> {
        let store = self.board.store();
        let mut template = self.template(template_id).await?;

        let card = match card_id {
            Some(id) => self.board.add_labels(id, [AI_MANAGED_LABEL]).await?,
            None => {
                let board = self.board.default_board().await?;
                let new = NewCard {
                    title: template.title.clone(),
                    description: instance_description(&template),
                    priority: template.priority_hint,
                    labels: vec![AI_MANAGED_LABEL.to_string()],
                    ..NewCard::default()
                };
                self.board.create_card(board.id, TODO_COLUMN, new).await?.0
            }
        };
        let column = self.board.column_of(&card).await?;
        let status =
            InstanceStatus::from_column_name(&column.name).unwrap_or(InstanceStatus::Pending);

        let stamp = now();
        let instance = TaskInstance {
            id: Uuid::new_v4(),
            template_id,
            card_id: card.id,
            status,
            created_at: stamp,
            updated_at: stamp,
            completed_at: (status == InstanceStatus::Completed).then_some(stamp),
        };
        store.insert_instance(instance.clone()).await?;

        template.instance_count = template.instance_count.saturating_add(1);
        template.last_instance_at = Some(stamp);
        template.updated_at = stamp;
        store.update_template(&template).await?;

        tracing::info!(
            %template_id,
            instance_id = %instance.id,
            card_id = %card.id,
            "template instance created"
        );
        let event = BoardEvent::TaskInstanceCreated {
            instance_id: instance.id,
            template_id,
            card_id: card.id,
        };
        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!("failed to publish TaskInstanceCreated: {e}");
        }
        Ok(instance)
    }

    /// Register a new active template.
    pub async fn create_template(&self, new: NewTemplate) -> Result<TaskTemplate, BoardError> {
        if new.title.trim().is_empty() {
            return Err(BoardError::InvalidInput("template title must not be empty".into()));
        }
        if new.instructions.trim().is_empty() {
            return Err(BoardError::InvalidInput(
                "template instructions must not be empty".into(),
            ));
        }
        let template = TaskTemplate::from_new(new);
        self.board.store().insert_template(template.clone()).await?;
        tracing::info!(template_id = %template.id, title = %template.title, "template created");
        Ok(template)
    }

    /// Fetch a template or fail with `NotFound`.
    pub async fn template(&self, template_id: Uuid) -> Result<TaskTemplate, BoardError> {
        self.board
            .store()
            .get_template(template_id)
            .await?
            .ok_or_else(|| BoardError::not_found("template", template_id))
    }

    /// Templates, optionally filtered by status.
    pub async fn templates(
        &self,
        status: Option<TemplateStatus>,
    ) -> Result<Vec<TaskTemplate>, BoardError> {
        self.board.store().list_templates(status).await
    }

    /// Change a template's status.
    pub async fn set_status(
        &self,
        template_id: Uuid,
        status: TemplateStatus,
    ) -> Result<TaskTemplate, BoardError> {
        let mut template = self.template(template_id).await?;
        template.status = status;
        template.updated_at = now();
        self.board.store().update_template(&template).await?;
        tracing::info!(%template_id, status = status.as_str(), "template status changed");
        Ok(template)
    }

    /// Ask for a step plan for the template and store it as its refined plan.
    pub async fn refine_template(&self, template_id: Uuid) -> Result<TaskTemplate, BoardError> {
        let mut template = self.template(template_id).await?;
        let prompt = refine_prompt(&template, &self.execution_rules);
        let options = CompletionOptions {
            system: Some(REFINE_SYSTEM.into()),
            ..CompletionOptions::default()
        };
        let plan = self.completion.complete(&prompt, &options).await?;
        let plan = plan.trim();
        if plan.is_empty() {
            return Err(BoardError::MalformedResponse("empty refined plan".into()));
        }
        template.ai_plan = Some(plan.to_string());
        template.updated_at = now();
        self.board.store().update_template(&template).await?;
        tracing::info!(%template_id, "template refined");
        Ok(template)
    }

    /// Append to an instance's interaction history.
    pub async fn record_interaction(
        &self,
        instance_id: Uuid,
        draft: InteractionDraft,
    ) -> Result<InteractionRecord, BoardError> {
        let store = self.board.store();
        store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| BoardError::not_found("instance", instance_id))?;
        let record = InteractionRecord {
            id: Uuid::new_v4(),
            instance_id,
            interaction: draft.interaction,
            result: draft.result,
            tools_used: draft.tools_used,
            events_emitted: draft.events_emitted,
            success: draft.success,
            created_at: now(),
        };
        store.insert_interaction(record.clone()).await?;
        Ok(record)
    }

    /// Interaction history of an instance, oldest first.
    pub async fn interactions_for_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<InteractionRecord>, BoardError> {
        self.board.store().interactions_for_instance(instance_id).await
    }
}

/// Completed share of recent instances; 1.0 with no history.
#[allow(clippy::cast_precision_loss)]
fn success_rate(recent: &[TaskInstance]) -> f64 {
    if recent.is_empty() {
        return 1.0;
    }
    let completed = recent
        .iter()
        .filter(|i| i.status == InstanceStatus::Completed)
        .count();
    completed as f64 / recent.len() as f64
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".into()
    } else {
        items.join(", ")
    }
}

fn decision_prompt(
    template: &TaskTemplate,
    success_rate: f64,
    history: usize,
    congestion: usize,
    rules: &str,
) -> String {
    let last = template
        .last_instance_at
        .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
    let mut prompt = format!(
        "Template: {title}\n\
         Instructions:\n{instructions}\n\n\
         Refined plan:\n{plan}\n\n\
         Priority hint: {hint}\n\
         Instances so far: {count} (last: {last})\n\
         Recent success rate: {rate:.0}% over {history} instance(s)\n\
         Board congestion: {congestion} card(s) in To Do or Doing\n\
         Allowed tools: {tools}\n\
         Allowed events: {events}\n",
        title = template.title,
        instructions = template.instructions.trim(),
        plan = template.ai_plan.as_deref().unwrap_or("(none)"),
        hint = template.priority_hint.as_str(),
        count = template.instance_count,
        rate = success_rate * 100.0,
        tools = list_or_none(&template.allowed_tools),
        events = list_or_none(&template.allowed_events),
    );
    let rules = rules.trim();
    if !rules.is_empty() {
        prompt.push_str("Execution rules:\n");
        prompt.push_str(rules);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nShould a new instance of this template be created now? Reply with only a JSON object:\n\
         {\"should_create_instance\": true|false, \"priority_score\": 0-100, \
         \"cooldown_minutes\": minutes until the next evaluation, \"reasoning\": \"one sentence\"}",
    );
    prompt
}

fn corrective_prompt(original: &str, error: &str) -> String {
    format!(
        "{original}\n\nYour previous reply could not be used ({error}). \
         Reply again with only the JSON object described above."
    )
}

fn refine_prompt(template: &TaskTemplate, rules: &str) -> String {
    let mut prompt = format!(
        "Task: {}\nInstructions:\n{}\nAllowed tools: {}\n",
        template.title,
        template.instructions.trim(),
        list_or_none(&template.allowed_tools)
    );
    let rules = rules.trim();
    if !rules.is_empty() {
        prompt.push_str("Execution rules:\n");
        prompt.push_str(rules);
        prompt.push('\n');
    }
    prompt.push_str("\nWrite the numbered steps to carry out this task.");
    prompt
}

fn instance_description(template: &TaskTemplate) -> String {
    match template.ai_plan.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(plan) => format!("{}\n\nPlan:\n{plan}", template.instructions.trim()),
        None => template.instructions.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Priority;

    fn template() -> TaskTemplate {
        TaskTemplate::from_new(NewTemplate {
            title: "Inbox sweep".into(),
            instructions: "Archive newsletters".into(),
            allowed_tools: vec!["mail.archive".into()],
            allowed_events: Vec::new(),
            priority_hint: Priority::Low,
        })
    }

    fn instance(status: InstanceStatus) -> TaskInstance {
        let stamp = now();
        TaskInstance {
            id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            card_id: Uuid::new_v4(),
            status,
            created_at: stamp,
            updated_at: stamp,
            completed_at: None,
        }
    }

    #[test]
    fn test_success_rate_defaults_to_one() {
        assert!((success_rate(&[]) - 1.0).abs() < f64::EPSILON);
        let recent = vec![
            instance(InstanceStatus::Completed),
            instance(InstanceStatus::Failed),
            instance(InstanceStatus::Completed),
            instance(InstanceStatus::Active),
        ];
        assert!((success_rate(&recent) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decision_prompt_mentions_context() {
        let prompt = decision_prompt(&template(), 0.5, 4, 7, "be quiet at night");
        assert!(prompt.contains("Inbox sweep"));
        assert!(prompt.contains("50% over 4 instance(s)"));
        assert!(prompt.contains("7 card(s) in To Do or Doing"));
        assert!(prompt.contains("mail.archive"));
        assert!(prompt.contains("be quiet at night"));
        assert!(prompt.contains("priority_score"));
    }

    #[test]
    fn test_instance_description_includes_plan() {
        let mut t = template();
        assert_eq!(instance_description(&t), "Archive newsletters");
        t.ai_plan = Some("1. open inbox\n2. archive".into());
        assert_eq!(
            instance_description(&t),
            "Archive newsletters\n\nPlan:\n1. open inbox\n2. archive"
        );
    }
}
