//! SQLite store backed by `rusqlite`.
//!
//! One connection behind a `parking_lot::Mutex`. Every trait call runs its
//! statements on tokio's blocking pool while holding the lock. Timestamps
//! are stored as fixed-width RFC 3339 text so they sort lexically;
//! list-valued fields are JSON text.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::core::model::{
    Board, Card, CardOrigin, Column, CommandQueueEntry, CommandStatus, Correlation,
    CorrelationKind, Dependency, InstanceStatus, InteractionRecord, Lease, Priority,
    TaskInstance, TaskTemplate, TemplateStatus,
};
use crate::core::{BoardError, BoardStore, CommandStore, TemplateStore};

const BOARD_COLUMNS: &str = "id, name, description, created_at, updated_at";
const COLUMN_COLUMNS: &str = "id, board_id, name, position, created_at";
const CARD_COLUMNS: &str = "id, column_id, board_id, title, description, position, priority, \
     labels, due_date, correlation_kind, correlation_id, origin_source, origin_channel, \
     origin_user, created_at, updated_at";
const COMMAND_COLUMNS: &str = "id, card_id, instruction, status, result, tools_used, error, \
     attempts, max_attempts, lease_owner, lease_expires_at, created_at, updated_at, finished_at";
const TEMPLATE_COLUMNS: &str = "id, title, instructions, ai_plan, allowed_tools, allowed_events, \
     priority_hint, last_instance_at, next_suggested_at, instance_count, status, created_at, \
     updated_at";
const INSTANCE_COLUMNS: &str =
    "id, template_id, card_id, status, created_at, updated_at, completed_at";
const INTERACTION_COLUMNS: &str =
    "id, instance_id, interaction, result, tools_used, events_emitted, success, created_at";

impl From<rusqlite::Error> for BoardError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(format!("sqlite: {err}"))
    }
}

/// Store persisting every table in one SQLite database.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BoardError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BoardError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, BoardError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, BoardError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for migration in Self::migrations() {
            conn.execute_batch(migration)?;
        }
        tracing::debug!("sqlite store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on tokio's blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, BoardError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, BoardError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            op(&mut conn)
        })
        .await
        .map_err(|e| BoardError::Backend(format!("sqlite task failed: {e}")))?
    }

    /// Schema statements, applied in order on open.
    #[must_use]
    pub fn migrations() -> &'static [&'static str] {
        &[
            r"
CREATE TABLE IF NOT EXISTS boards (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_boards_name ON boards (name);

CREATE TABLE IF NOT EXISTS board_columns (
    id TEXT PRIMARY KEY,
    board_id TEXT NOT NULL REFERENCES boards (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    position INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_board_columns_board ON board_columns (board_id, position);

CREATE TABLE IF NOT EXISTS cards (
    id TEXT PRIMARY KEY,
    column_id TEXT NOT NULL REFERENCES board_columns (id) ON DELETE CASCADE,
    board_id TEXT NOT NULL REFERENCES boards (id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    position INTEGER NOT NULL,
    priority TEXT NOT NULL,
    labels TEXT NOT NULL,
    due_date TEXT,
    correlation_kind TEXT,
    correlation_id TEXT,
    origin_source TEXT,
    origin_channel TEXT,
    origin_user TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cards_column ON cards (column_id, position);
CREATE UNIQUE INDEX IF NOT EXISTS idx_cards_correlation
    ON cards (correlation_kind, correlation_id) WHERE correlation_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS card_dependencies (
    card_id TEXT NOT NULL REFERENCES cards (id) ON DELETE CASCADE,
    depends_on TEXT NOT NULL REFERENCES cards (id) ON DELETE CASCADE,
    PRIMARY KEY (card_id, depends_on)
);
",
            r"
CREATE TABLE IF NOT EXISTS command_queue (
    id TEXT PRIMARY KEY,
    card_id TEXT NOT NULL REFERENCES cards (id) ON DELETE CASCADE,
    instruction TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT,
    tools_used TEXT NOT NULL,
    error TEXT,
    attempts INTEGER NOT NULL,
    max_attempts INTEGER NOT NULL,
    lease_owner TEXT,
    lease_expires_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_command_queue_status ON command_queue (status, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_command_queue_single_running
    ON command_queue (status) WHERE status = 'running';
",
            r"
CREATE TABLE IF NOT EXISTS task_templates (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    instructions TEXT NOT NULL,
    ai_plan TEXT,
    allowed_tools TEXT NOT NULL,
    allowed_events TEXT NOT NULL,
    priority_hint TEXT NOT NULL,
    last_instance_at TEXT,
    next_suggested_at TEXT,
    instance_count INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_instances (
    id TEXT PRIMARY KEY,
    template_id TEXT NOT NULL REFERENCES task_templates (id) ON DELETE CASCADE,
    card_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_task_instances_template ON task_instances (template_id);
CREATE INDEX IF NOT EXISTS idx_task_instances_card ON task_instances (card_id);

CREATE TABLE IF NOT EXISTS instance_interactions (
    id TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL REFERENCES task_instances (id) ON DELETE CASCADE,
    interaction TEXT NOT NULL,
    result TEXT,
    tools_used TEXT NOT NULL,
    events_emitted TEXT NOT NULL,
    success INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
",
        ]
    }
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(at: Option<&DateTime<Utc>>) -> Option<String> {
    at.map(ts)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, BoardError> {
    Ok(serde_json::to_string(value)?)
}

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn uuid_at(row: &Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(index)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(index, e))
}

fn time_at(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn opt_time_at(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(index, e))
    })
    .transpose()
}

fn json_at<T: DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(index, e))
}

fn enum_at<T>(row: &Row<'_>, index: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    parse(&raw).ok_or_else(|| {
        conversion_error(index, BoardError::Backend(format!("unknown stored value `{raw}`")))
    })
}

fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: time_at(row, 3)?,
        updated_at: time_at(row, 4)?,
    })
}

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: uuid_at(row, 0)?,
        board_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        created_at: time_at(row, 4)?,
    })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    let priority: String = row.get(6)?;
    let correlation_kind: Option<String> = row.get(9)?;
    let correlation_id: Option<String> = row.get(10)?;
    let correlation = match (correlation_kind, correlation_id) {
        (Some(kind), Some(id)) => {
            CorrelationKind::parse(&kind).map(|kind| Correlation { kind, id })
        }
        _ => None,
    };
    let origin = CardOrigin {
        source: row.get(11)?,
        channel: row.get(12)?,
        user: row.get(13)?,
    };
    Ok(Card {
        id: uuid_at(row, 0)?,
        column_id: uuid_at(row, 1)?,
        board_id: uuid_at(row, 2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        position: row.get(5)?,
        priority: Priority::parse_lenient(&priority),
        labels: json_at(row, 7)?,
        due_date: opt_time_at(row, 8)?,
        correlation,
        origin: (!origin.is_empty()).then_some(origin),
        created_at: time_at(row, 14)?,
        updated_at: time_at(row, 15)?,
    })
}

fn command_from_row(row: &Row<'_>) -> rusqlite::Result<CommandQueueEntry> {
    let lease_owner: Option<String> = row.get(9)?;
    let lease_expires_at = opt_time_at(row, 10)?;
    let lease = match (lease_owner, lease_expires_at) {
        (Some(owner), Some(expires_at)) => Some(Lease { owner, expires_at }),
        _ => None,
    };
    Ok(CommandQueueEntry {
        id: uuid_at(row, 0)?,
        card_id: uuid_at(row, 1)?,
        instruction: row.get(2)?,
        status: enum_at(row, 3, CommandStatus::parse)?,
        result: row.get(4)?,
        tools_used: json_at(row, 5)?,
        error: row.get(6)?,
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        lease,
        created_at: time_at(row, 11)?,
        updated_at: time_at(row, 12)?,
        finished_at: opt_time_at(row, 13)?,
    })
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<TaskTemplate> {
    let priority_hint: String = row.get(6)?;
    Ok(TaskTemplate {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        instructions: row.get(2)?,
        ai_plan: row.get(3)?,
        allowed_tools: json_at(row, 4)?,
        allowed_events: json_at(row, 5)?,
        priority_hint: Priority::parse_lenient(&priority_hint),
        last_instance_at: opt_time_at(row, 7)?,
        next_suggested_at: opt_time_at(row, 8)?,
        instance_count: row.get(9)?,
        status: enum_at(row, 10, TemplateStatus::parse)?,
        created_at: time_at(row, 11)?,
        updated_at: time_at(row, 12)?,
    })
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<TaskInstance> {
    Ok(TaskInstance {
        id: uuid_at(row, 0)?,
        template_id: uuid_at(row, 1)?,
        card_id: uuid_at(row, 2)?,
        status: enum_at(row, 3, InstanceStatus::parse)?,
        created_at: time_at(row, 4)?,
        updated_at: time_at(row, 5)?,
        completed_at: opt_time_at(row, 6)?,
    })
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<InteractionRecord> {
    Ok(InteractionRecord {
        id: uuid_at(row, 0)?,
        instance_id: uuid_at(row, 1)?,
        interaction: row.get(2)?,
        result: row.get(3)?,
        tools_used: json_at(row, 4)?,
        events_emitted: json_at(row, 5)?,
        success: row.get(6)?,
        created_at: time_at(row, 7)?,
    })
}

fn get_command_with(conn: &Connection, id: &str) -> Result<Option<CommandQueueEntry>, BoardError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COMMAND_COLUMNS} FROM command_queue WHERE id = ?1"),
            params![id],
            command_from_row,
        )
        .optional()?)
}

fn write_command(conn: &Connection, entry: &CommandQueueEntry) -> Result<usize, BoardError> {
    let tools_used = to_json(&entry.tools_used)?;
    Ok(conn.execute(
        "UPDATE command_queue SET instruction = ?2, status = ?3, result = ?4, tools_used = ?5, \
         error = ?6, attempts = ?7, max_attempts = ?8, lease_owner = ?9, \
         lease_expires_at = ?10, updated_at = ?11, finished_at = ?12 WHERE id = ?1",
        params![
            entry.id.to_string(),
            entry.instruction,
            entry.status.as_str(),
            entry.result,
            tools_used,
            entry.error,
            entry.attempts,
            entry.max_attempts,
            entry.lease.as_ref().map(|l| l.owner.as_str()),
            opt_ts(entry.lease.as_ref().map(|l| &l.expires_at)),
            ts(&entry.updated_at),
            opt_ts(entry.finished_at.as_ref()),
        ],
    )?)
}

#[async_trait]
impl BoardStore for SqliteStore {
    async fn insert_board(&self, board: Board) -> Result<(), BoardError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO boards (id, name, description, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    board.id.to_string(),
                    board.name,
                    board.description,
                    ts(&board.created_at),
                    ts(&board.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_board(&self, id: Uuid) -> Result<Option<Board>, BoardError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
                    params![id.to_string()],
                    board_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn find_board_by_name(&self, name: &str) -> Result<Option<Board>, BoardError> {
        let name = name.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {BOARD_COLUMNS} FROM boards WHERE name = ?1 ORDER BY rowid LIMIT 1"
                    ),
                    params![name],
                    board_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_boards(&self) -> Result<Vec<Board>, BoardError> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {BOARD_COLUMNS} FROM boards ORDER BY rowid"))?;
            let boards = stmt
                .query_map([], board_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(boards)
        })
        .await
    }

    async fn delete_board(&self, id: Uuid) -> Result<(), BoardError> {
        self.run(move |conn| {
            conn.execute("DELETE FROM boards WHERE id = ?1", params![id.to_string()])?;
            Ok(())
        })
        .await
    }

    async fn insert_column(&self, column: Column) -> Result<(), BoardError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO board_columns (id, board_id, name, position, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    column.id.to_string(),
                    column.board_id.to_string(),
                    column.name,
                    column.position,
                    ts(&column.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_column(&self, id: Uuid) -> Result<Option<Column>, BoardError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMN_COLUMNS} FROM board_columns WHERE id = ?1"),
                    params![id.to_string()],
                    column_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_columns(&self, board_id: Uuid) -> Result<Vec<Column>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMN_COLUMNS} FROM board_columns WHERE board_id = ?1 ORDER BY position"
            ))?;
            let columns = stmt
                .query_map(params![board_id.to_string()], column_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(columns)
        })
        .await
    }

    async fn insert_card(&self, card: Card) -> Result<(), BoardError> {
        let labels = to_json(&card.labels)?;
        self.run(move |conn| {
            let origin = card.origin.clone().unwrap_or_default();
            conn.execute(
                &format!(
                    "INSERT INTO cards ({CARD_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    card.id.to_string(),
                    card.column_id.to_string(),
                    card.board_id.to_string(),
                    card.title,
                    card.description,
                    card.position,
                    card.priority.as_str(),
                    labels,
                    opt_ts(card.due_date.as_ref()),
                    card.correlation.as_ref().map(|c| c.kind.as_str()),
                    card.correlation.as_ref().map(|c| c.id.as_str()),
                    origin.source,
                    origin.channel,
                    origin.user,
                    ts(&card.created_at),
                    ts(&card.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_card(&self, id: Uuid) -> Result<Option<Card>, BoardError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"),
                    params![id.to_string()],
                    card_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn update_card(&self, card: &Card) -> Result<(), BoardError> {
        let labels = to_json(&card.labels)?;
        let card = card.clone();
        self.run(move |conn| {
            let origin = card.origin.clone().unwrap_or_default();
            let changed = conn.execute(
                "UPDATE cards SET column_id = ?2, board_id = ?3, title = ?4, description = ?5, \
                 position = ?6, priority = ?7, labels = ?8, due_date = ?9, correlation_kind = ?10, \
                 correlation_id = ?11, origin_source = ?12, origin_channel = ?13, \
                 origin_user = ?14, updated_at = ?15 WHERE id = ?1",
                params![
                    card.id.to_string(),
                    card.column_id.to_string(),
                    card.board_id.to_string(),
                    card.title,
                    card.description,
                    card.position,
                    card.priority.as_str(),
                    labels,
                    opt_ts(card.due_date.as_ref()),
                    card.correlation.as_ref().map(|c| c.kind.as_str()),
                    card.correlation.as_ref().map(|c| c.id.as_str()),
                    origin.source,
                    origin.channel,
                    origin.user,
                    ts(&card.updated_at),
                ],
            )?;
            if changed == 0 {
                return Err(BoardError::not_found("card", card.id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_card(&self, id: Uuid) -> Result<(), BoardError> {
        self.run(move |conn| {
            conn.execute("DELETE FROM cards WHERE id = ?1", params![id.to_string()])?;
            Ok(())
        })
        .await
    }

    async fn list_cards_in_column(&self, column_id: Uuid) -> Result<Vec<Card>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLUMNS} FROM cards WHERE column_id = ?1 ORDER BY position, rowid"
            ))?;
            let cards = stmt
                .query_map(params![column_id.to_string()], card_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(cards)
        })
        .await
    }

    async fn list_cards(&self, board_id: Uuid) -> Result<Vec<Card>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.column_id, c.board_id, c.title, c.description, c.position, \
                 c.priority, c.labels, c.due_date, c.correlation_kind, c.correlation_id, \
                 c.origin_source, c.origin_channel, c.origin_user, c.created_at, c.updated_at \
                 FROM cards c JOIN board_columns col ON col.id = c.column_id \
                 WHERE c.board_id = ?1 ORDER BY col.position, c.position, c.rowid",
            )?;
            let cards = stmt
                .query_map(params![board_id.to_string()], card_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(cards)
        })
        .await
    }

    async fn find_card_by_correlation(
        &self,
        correlation: &Correlation,
    ) -> Result<Option<Card>, BoardError> {
        let correlation = correlation.clone();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {CARD_COLUMNS} FROM cards \
                         WHERE correlation_kind = ?1 AND correlation_id = ?2"
                    ),
                    params![correlation.kind.as_str(), correlation.id],
                    card_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn next_card_position(&self, column_id: Uuid) -> Result<i32, BoardError> {
        self.run(move |conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM cards WHERE column_id = ?1",
                params![column_id.to_string()],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn add_dependency(&self, dependency: Dependency) -> Result<(), BoardError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO card_dependencies (card_id, depends_on) VALUES (?1, ?2)",
                params![
                    dependency.card_id.to_string(),
                    dependency.depends_on.to_string()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_dependency(&self, dependency: Dependency) -> Result<bool, BoardError> {
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM card_dependencies WHERE card_id = ?1 AND depends_on = ?2",
                params![
                    dependency.card_id.to_string(),
                    dependency.depends_on.to_string()
                ],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn dependencies_of(&self, card_id: Uuid) -> Result<Vec<Uuid>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT depends_on FROM card_dependencies WHERE card_id = ?1 ORDER BY rowid",
            )?;
            let ids = stmt
                .query_map(params![card_id.to_string()], |row| uuid_at(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl CommandStore for SqliteStore {
    async fn insert_command(&self, entry: CommandQueueEntry) -> Result<(), BoardError> {
        let tools_used = to_json(&entry.tools_used)?;
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO command_queue ({COMMAND_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    entry.id.to_string(),
                    entry.card_id.to_string(),
                    entry.instruction,
                    entry.status.as_str(),
                    entry.result,
                    tools_used,
                    entry.error,
                    entry.attempts,
                    entry.max_attempts,
                    entry.lease.as_ref().map(|l| l.owner.as_str()),
                    opt_ts(entry.lease.as_ref().map(|l| &l.expires_at)),
                    ts(&entry.created_at),
                    ts(&entry.updated_at),
                    opt_ts(entry.finished_at.as_ref()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_command(&self, id: Uuid) -> Result<Option<CommandQueueEntry>, BoardError> {
        self.run(move |conn| get_command_with(conn, &id.to_string()))
            .await
    }

    async fn commands_for_card(
        &self,
        card_id: Uuid,
    ) -> Result<Vec<CommandQueueEntry>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMAND_COLUMNS} FROM command_queue WHERE card_id = ?1 \
                 ORDER BY created_at, rowid"
            ))?;
            let entries = stmt
                .query_map(params![card_id.to_string()], command_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn running_command(&self) -> Result<Option<CommandQueueEntry>, BoardError> {
        self.run(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {COMMAND_COLUMNS} FROM command_queue \
                         WHERE status = 'running' LIMIT 1"
                    ),
                    [],
                    command_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn claim_next_command(
        &self,
        owner: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<CommandQueueEntry>, BoardError> {
        let owner = owner.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let running: i64 = tx.query_row(
                "SELECT COUNT(*) FROM command_queue WHERE status = 'running'",
                [],
                |row| row.get(0),
            )?;
            if running > 0 {
                return Ok(None);
            }
            let next: Option<String> = tx
                .query_row(
                    "SELECT q.id FROM command_queue q LEFT JOIN cards c ON c.id = q.card_id \
                     WHERE q.status = 'pending' AND q.attempts < q.max_attempts \
                     ORDER BY CASE c.priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 \
                     WHEN 'low' THEN 2 ELSE 3 END, q.created_at, q.rowid LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = next else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE command_queue SET status = 'running', attempts = attempts + 1, \
                 lease_owner = ?2, lease_expires_at = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, owner, ts(&lease_until), ts(&crate::util::clock::now())],
            )?;
            let claimed = get_command_with(&tx, &id)?;
            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    async fn settle_command(
        &self,
        entry: &CommandQueueEntry,
        owner: &str,
    ) -> Result<bool, BoardError> {
        let tools_used = to_json(&entry.tools_used)?;
        let entry = entry.clone();
        let owner = owner.to_string();
        self.run(move |conn| {
            let id = entry.id.to_string();
            let changed = conn.execute(
                "UPDATE command_queue SET status = ?3, result = ?4, tools_used = ?5, error = ?6, \
                 attempts = ?7, max_attempts = ?8, lease_owner = ?9, lease_expires_at = ?10, \
                 updated_at = ?11, finished_at = ?12 \
                 WHERE id = ?1 AND status = 'running' AND lease_owner = ?2",
                params![
                    id,
                    owner,
                    entry.status.as_str(),
                    entry.result,
                    tools_used,
                    entry.error,
                    entry.attempts,
                    entry.max_attempts,
                    entry.lease.as_ref().map(|l| l.owner.as_str()),
                    opt_ts(entry.lease.as_ref().map(|l| &l.expires_at)),
                    ts(&entry.updated_at),
                    opt_ts(entry.finished_at.as_ref()),
                ],
            )?;
            if changed == 0 && get_command_with(conn, &id)?.is_none() {
                return Err(BoardError::not_found("command", entry.id));
            }
            Ok(changed > 0)
        })
        .await
    }

    async fn update_command(&self, entry: &CommandQueueEntry) -> Result<(), BoardError> {
        let entry = entry.clone();
        self.run(move |conn| {
            if write_command(conn, &entry)? == 0 {
                return Err(BoardError::not_found("command", entry.id));
            }
            Ok(())
        })
        .await
    }

    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CommandQueueEntry>, BoardError> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut expired = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {COMMAND_COLUMNS} FROM command_queue WHERE status = 'running' \
                     AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)"
                ))?;
                let entries = stmt
                    .query_map(params![ts(&now)], command_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                entries
            };
            for entry in &mut expired {
                entry.release_expired_lease(now);
                write_command(&tx, entry)?;
            }
            tx.commit()?;
            Ok(expired)
        })
        .await
    }
}

#[async_trait]
impl TemplateStore for SqliteStore {
    async fn insert_template(&self, template: TaskTemplate) -> Result<(), BoardError> {
        let allowed_tools = to_json(&template.allowed_tools)?;
        let allowed_events = to_json(&template.allowed_events)?;
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO task_templates ({TEMPLATE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    template.id.to_string(),
                    template.title,
                    template.instructions,
                    template.ai_plan,
                    allowed_tools,
                    allowed_events,
                    template.priority_hint.as_str(),
                    opt_ts(template.last_instance_at.as_ref()),
                    opt_ts(template.next_suggested_at.as_ref()),
                    template.instance_count,
                    template.status.as_str(),
                    ts(&template.created_at),
                    ts(&template.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<TaskTemplate>, BoardError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {TEMPLATE_COLUMNS} FROM task_templates WHERE id = ?1"),
                    params![id.to_string()],
                    template_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_templates(
        &self,
        status: Option<TemplateStatus>,
    ) -> Result<Vec<TaskTemplate>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM task_templates \
                 WHERE ?1 IS NULL OR status = ?1 ORDER BY rowid"
            ))?;
            let templates = stmt
                .query_map(params![status.map(TemplateStatus::as_str)], template_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(templates)
        })
        .await
    }

    async fn update_template(&self, template: &TaskTemplate) -> Result<(), BoardError> {
        let allowed_tools = to_json(&template.allowed_tools)?;
        let allowed_events = to_json(&template.allowed_events)?;
        let template = template.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE task_templates SET title = ?2, instructions = ?3, ai_plan = ?4, \
                 allowed_tools = ?5, allowed_events = ?6, priority_hint = ?7, \
                 last_instance_at = ?8, next_suggested_at = ?9, instance_count = ?10, \
                 status = ?11, updated_at = ?12 WHERE id = ?1",
                params![
                    template.id.to_string(),
                    template.title,
                    template.instructions,
                    template.ai_plan,
                    allowed_tools,
                    allowed_events,
                    template.priority_hint.as_str(),
                    opt_ts(template.last_instance_at.as_ref()),
                    opt_ts(template.next_suggested_at.as_ref()),
                    template.instance_count,
                    template.status.as_str(),
                    ts(&template.updated_at),
                ],
            )?;
            if changed == 0 {
                return Err(BoardError::not_found("template", template.id));
            }
            Ok(())
        })
        .await
    }

    async fn insert_instance(&self, instance: TaskInstance) -> Result<(), BoardError> {
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO task_instances ({INSTANCE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    instance.id.to_string(),
                    instance.template_id.to_string(),
                    instance.card_id.to_string(),
                    instance.status.as_str(),
                    ts(&instance.created_at),
                    ts(&instance.updated_at),
                    opt_ts(instance.completed_at.as_ref()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<TaskInstance>, BoardError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {INSTANCE_COLUMNS} FROM task_instances WHERE id = ?1"),
                    params![id.to_string()],
                    instance_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn recent_instances(
        &self,
        template_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TaskInstance>, BoardError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSTANCE_COLUMNS} FROM task_instances WHERE template_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ))?;
            let instances = stmt
                .query_map(params![template_id.to_string(), limit], instance_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(instances)
        })
        .await
    }

    async fn instances_for_card(&self, card_id: Uuid) -> Result<Vec<TaskInstance>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSTANCE_COLUMNS} FROM task_instances WHERE card_id = ?1 ORDER BY rowid"
            ))?;
            let instances = stmt
                .query_map(params![card_id.to_string()], instance_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(instances)
        })
        .await
    }

    async fn update_instance(&self, instance: &TaskInstance) -> Result<(), BoardError> {
        let instance = instance.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE task_instances SET card_id = ?2, status = ?3, updated_at = ?4, \
                 completed_at = ?5 WHERE id = ?1",
                params![
                    instance.id.to_string(),
                    instance.card_id.to_string(),
                    instance.status.as_str(),
                    ts(&instance.updated_at),
                    opt_ts(instance.completed_at.as_ref()),
                ],
            )?;
            if changed == 0 {
                return Err(BoardError::not_found("instance", instance.id));
            }
            Ok(())
        })
        .await
    }

    async fn insert_interaction(&self, record: InteractionRecord) -> Result<(), BoardError> {
        let tools_used = to_json(&record.tools_used)?;
        let events_emitted = to_json(&record.events_emitted)?;
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO instance_interactions ({INTERACTION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    record.id.to_string(),
                    record.instance_id.to_string(),
                    record.interaction,
                    record.result,
                    tools_used,
                    events_emitted,
                    record.success,
                    ts(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn interactions_for_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<InteractionRecord>, BoardError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERACTION_COLUMNS} FROM instance_interactions WHERE instance_id = ?1 \
                 ORDER BY created_at, rowid"
            ))?;
            let records = stmt
                .query_map(params![instance_id.to_string()], interaction_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }
}
