//! Shared fixtures: scripted collaborators and a wired harness.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_planboard::config::{BoardConfig, CommandQueueConfig, TemplateSchedulerConfig};
use prometheus_planboard::core::{
    BoardError, BoardEvent, BoardManager, CommandQueue, CompletionClient, CompletionOptions,
    EventPublisher, PlanLifecycleController, Store, TemplateScheduler, ToolCall, ToolCallResponse,
    ToolRouter, ToolSchema,
};
use prometheus_planboard::infra::{BroadcastEventBus, InMemoryStore};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Completion client replaying queued answers.
///
/// `complete` pops from the text script and fails once it is empty;
/// `call_tools` pops from the tool script and answers "done" once it is empty.
#[derive(Default)]
pub struct ScriptedCompletion {
    texts: Mutex<VecDeque<Result<String, BoardError>>>,
    tool_rounds: Mutex<VecDeque<Result<ToolCallResponse, BoardError>>>,
    prompts: Mutex<Vec<String>>,
    tool_delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.texts.lock().push_back(Ok(text.into()));
    }

    pub fn push_text_error(&self, message: &str) {
        self.texts
            .lock()
            .push_back(Err(BoardError::Upstream(message.into())));
    }

    pub fn push_tool_response(&self, message: &str, calls: &[&str]) {
        self.tool_rounds.lock().push_back(Ok(ToolCallResponse {
            message: message.into(),
            tool_calls: calls
                .iter()
                .map(|name| ToolCall {
                    name: (*name).into(),
                    arguments: json!({}),
                })
                .collect(),
        }));
    }

    pub fn push_tool_error(&self, message: &str) {
        self.tool_rounds
            .lock()
            .push_back(Err(BoardError::Upstream(message.into())));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Make every tool round take at least `delay`.
    pub fn set_tool_delay(&self, delay: Duration) {
        *self.tool_delay.lock() = Some(delay);
    }

    /// Most tool rounds ever in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, BoardError> {
        self.prompts.lock().push(prompt.to_string());
        self.texts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(BoardError::Upstream("no scripted text".into())))
    }

    async fn call_tools(
        &self,
        prompt: &str,
        _tools: &[ToolSchema],
        _options: &CompletionOptions,
    ) -> Result<ToolCallResponse, BoardError> {
        self.prompts.lock().push(prompt.to_string());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let delay = *self.tool_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.tool_rounds.lock().pop_front().unwrap_or_else(|| {
            Ok(ToolCallResponse {
                message: "done".into(),
                tool_calls: Vec::new(),
            })
        })
    }
}

/// Tool router with fixed tools; a tool named `explode` always fails.
#[derive(Default)]
pub struct StaticTools {
    executed: Mutex<Vec<String>>,
}

impl StaticTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ToolRouter for StaticTools {
    fn list(&self) -> Vec<String> {
        vec!["shell.run".into(), "notes.write".into(), "explode".into()]
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        self.list()
            .into_iter()
            .map(|name| ToolSchema {
                description: format!("{name} tool"),
                name,
                parameters: json!({"type": "object"}),
            })
            .collect()
    }

    async fn execute(&self, name: &str, _args: Value) -> Result<Value, BoardError> {
        self.executed.lock().push(name.to_string());
        if name == "explode" {
            return Err(BoardError::Upstream("tool exploded".into()));
        }
        Ok(json!({"ok": true}))
    }
}

/// Every component over one in-memory store.
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub board: BoardManager,
    pub bus: Arc<BroadcastEventBus<BoardEvent>>,
    pub lifecycle: PlanLifecycleController,
    pub commands: CommandQueue,
    pub templates: TemplateScheduler,
    pub completion: Arc<ScriptedCompletion>,
    pub tools: Arc<StaticTools>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(InMemoryStore::new()),
            BoardConfig::default(),
            CommandQueueConfig::default(),
        )
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self::with_parts(store, BoardConfig::default(), CommandQueueConfig::default())
    }

    pub fn with_parts(
        store: Arc<dyn Store>,
        board_cfg: BoardConfig,
        queue_cfg: CommandQueueConfig,
    ) -> Self {
        let bus = Arc::new(BroadcastEventBus::<BoardEvent>::new(256));
        let publisher: Arc<dyn EventPublisher> = bus.clone();
        let completion = ScriptedCompletion::new();
        let tools = StaticTools::new();
        let board = BoardManager::new(store.clone(), board_cfg, queue_cfg.max_attempts);
        let lifecycle = PlanLifecycleController::new(board.clone(), publisher.clone());
        let commands = CommandQueue::new(
            board.clone(),
            completion.clone(),
            tools.clone(),
            publisher.clone(),
            queue_cfg,
            "Never touch production.",
        );
        let templates = TemplateScheduler::new(
            board.clone(),
            completion.clone(),
            publisher,
            TemplateSchedulerConfig::default(),
            "Never touch production.",
        );
        Self {
            store,
            board,
            bus,
            lifecycle,
            commands,
            templates,
            completion,
            tools,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<BoardEvent> {
        self.bus.subscribe()
    }

    /// Name of the column a card currently sits in.
    pub async fn column_name(&self, card_id: uuid::Uuid) -> String {
        let card = self.board.card(card_id).await.unwrap();
        self.board.column_of(&card).await.unwrap().name
    }
}

/// Drain every event currently buffered on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<BoardEvent>) -> Vec<BoardEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
