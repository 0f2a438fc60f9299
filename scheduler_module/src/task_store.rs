//! Task repository: CRUD on task definitions, run-now requests, and the
//! status writes reserved for the scheduler core.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::tenant_store::{
    bool_to_int, format_datetime, parse_datetime, parse_optional_datetime, StoreError, TenantStore,
};

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task not found: {0}")]
    NotFound(Uuid),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("uuid parse error: {0}")]
    UuidParse(#[from] uuid::Error),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for TaskStoreError {
    fn from(err: rusqlite::Error) -> Self {
        TaskStoreError::Store(StoreError::from(err))
    }
}

/// Outcome of the most recent run of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    None,
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::None => "none",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(RunStatus::None),
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// A tenant-scoped scheduled-task definition.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDefinition {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    pub cron_expression: String,
    pub is_active: bool,
    /// Opaque to everything but the executor that understands this kind.
    pub config: serde_json::Value,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: RunStatus,
    /// Informational only; the scheduler derives real fires from the cron expression.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a task; everything else takes its default.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: String,
    pub name: String,
    pub cron_expression: String,
    pub config: Option<serde_json::Value>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Partial update over the owner-mutable columns; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub cron_expression: Option<String>,
    pub is_active: Option<bool>,
    pub config: Option<serde_json::Value>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// The slice of a task the reconciliation cycle schedules from.
#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    pub cron_expression: String,
}

/// A pending run-now request joined to its task.
#[derive(Debug, Clone)]
pub struct PendingRunRequest {
    pub task_id: Uuid,
    pub kind: String,
    pub name: String,
    pub requested_at: DateTime<Utc>,
}

pub struct TaskStore<'a> {
    store: &'a TenantStore,
}

const TASK_COLUMNS: &str = "id, kind, name, cron_expression, is_active, config, provider, model, \
     last_run_at, last_status, next_run_at, created_at, updated_at";

impl<'a> TaskStore<'a> {
    pub(crate) fn new(store: &'a TenantStore) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<TaskDefinition>, TaskStoreError> {
        let conn = self.store.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], task_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(decode_task(row?)?);
        }
        Ok(tasks)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<TaskDefinition>, TaskStoreError> {
        let conn = self.store.open()?;
        let row = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
                task_row,
            )
            .optional()?;
        row.map(decode_task).transpose()
    }

    pub fn create(&self, new: NewTask) -> Result<TaskDefinition, TaskStoreError> {
        let conn = self.store.open()?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let config = new.config.unwrap_or_else(|| serde_json::json!({}));
        conn.execute(
            "INSERT INTO tasks (id, kind, name, cron_expression, is_active, config, provider, model, last_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, 'none', ?8, ?9)",
            params![
                id.to_string(),
                new.kind.as_str(),
                new.name.as_str(),
                new.cron_expression.as_str(),
                serde_json::to_string(&config)?,
                new.provider.as_deref(),
                new.model.as_deref(),
                format_datetime(now),
                format_datetime(now),
            ],
        )?;
        Ok(TaskDefinition {
            id,
            kind: new.kind,
            name: new.name,
            cron_expression: new.cron_expression,
            is_active: true,
            config,
            provider: new.provider,
            model: new.model,
            last_run_at: None,
            last_status: RunStatus::None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a partial update to the owner-mutable columns. Status and run
    /// timestamps are never written here, so this can never clobber a
    /// concurrent scheduler status write.
    pub fn update(&self, id: Uuid, patch: TaskPatch) -> Result<TaskDefinition, TaskStoreError> {
        let mut task = self.get(id)?.ok_or(TaskStoreError::NotFound(id))?;
        if let Some(kind) = patch.kind {
            task.kind = kind;
        }
        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(cron_expression) = patch.cron_expression {
            task.cron_expression = cron_expression;
        }
        if let Some(is_active) = patch.is_active {
            task.is_active = is_active;
        }
        if let Some(config) = patch.config {
            task.config = config;
        }
        if let Some(provider) = patch.provider {
            task.provider = Some(provider);
        }
        if let Some(model) = patch.model {
            task.model = Some(model);
        }
        task.updated_at = Utc::now();

        let conn = self.store.open()?;
        conn.execute(
            "UPDATE tasks
             SET kind = ?1,
                 name = ?2,
                 cron_expression = ?3,
                 is_active = ?4,
                 config = ?5,
                 provider = ?6,
                 model = ?7,
                 updated_at = ?8
             WHERE id = ?9",
            params![
                task.kind.as_str(),
                task.name.as_str(),
                task.cron_expression.as_str(),
                bool_to_int(task.is_active),
                serde_json::to_string(&task.config)?,
                task.provider.as_deref(),
                task.model.as_deref(),
                format_datetime(task.updated_at),
                id.to_string(),
            ],
        )?;
        Ok(task)
    }

    /// Delete a task; results and any pending run-request cascade with it.
    pub fn delete(&self, id: Uuid) -> Result<bool, TaskStoreError> {
        let conn = self.store.open()?;
        let rows_affected =
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
        Ok(rows_affected > 0)
    }

    /// Upsert a run-now request; a second request before the first drains
    /// just refreshes the timestamp.
    pub fn request_run_now(&self, id: Uuid) -> Result<(), TaskStoreError> {
        let conn = self.store.open()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(TaskStoreError::NotFound(id));
        }
        conn.execute(
            "INSERT INTO run_requests (task_id, requested_at)
             VALUES (?1, ?2)
             ON CONFLICT(task_id) DO UPDATE SET requested_at = excluded.requested_at",
            params![id.to_string(), format_datetime(Utc::now())],
        )?;
        Ok(())
    }

    // --- Scheduler-only operations below. Single-writer discipline: the
    // scheduler core is the only caller of the status and timestamp writes.

    pub fn active_tasks(&self) -> Result<Vec<ActiveTask>, TaskStoreError> {
        let conn = self.store.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, cron_expression
             FROM tasks
             WHERE is_active = 1
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            let (id_raw, kind, name, cron_expression) = row?;
            tasks.push(ActiveTask {
                id: Uuid::parse_str(&id_raw)?,
                kind,
                name,
                cron_expression,
            });
        }
        Ok(tasks)
    }

    pub fn pending_run_requests(&self) -> Result<Vec<PendingRunRequest>, TaskStoreError> {
        let conn = self.store.open()?;
        let mut stmt = conn.prepare(
            "SELECT r.task_id, t.kind, t.name, r.requested_at
             FROM run_requests r
             JOIN tasks t ON t.id = r.task_id
             ORDER BY r.requested_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut requests = Vec::new();
        for row in rows {
            let (task_id_raw, kind, name, requested_at_raw) = row?;
            requests.push(PendingRunRequest {
                task_id: Uuid::parse_str(&task_id_raw)?,
                kind,
                name,
                requested_at: parse_datetime(&requested_at_raw)?,
            });
        }
        Ok(requests)
    }

    pub fn delete_run_request(&self, task_id: Uuid) -> Result<(), TaskStoreError> {
        let conn = self.store.open()?;
        conn.execute(
            "DELETE FROM run_requests WHERE task_id = ?1",
            params![task_id.to_string()],
        )?;
        Ok(())
    }

    /// Mark a run as started; visible before the executor does any work.
    pub fn record_run_started(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), TaskStoreError> {
        let conn = self.store.open()?;
        let rows_affected = conn.execute(
            "UPDATE tasks
             SET last_status = 'running',
                 last_run_at = ?1,
                 updated_at = ?2
             WHERE id = ?3",
            params![
                format_datetime(now),
                format_datetime(now),
                id.to_string()
            ],
        )?;
        if rows_affected == 0 {
            return Err(TaskStoreError::NotFound(id));
        }
        Ok(())
    }

    /// Record the run outcome; `status` must be `Success` or `Error`.
    pub fn record_run_finished(
        &self,
        id: Uuid,
        status: RunStatus,
    ) -> Result<(), TaskStoreError> {
        debug_assert!(matches!(status, RunStatus::Success | RunStatus::Error));
        let conn = self.store.open()?;
        conn.execute(
            "UPDATE tasks SET last_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                status.as_str(),
                format_datetime(Utc::now()),
                id.to_string()
            ],
        )?;
        Ok(())
    }

    /// An unknown kind is a configuration defect: the run never happens, so
    /// `last_run_at` stays untouched.
    pub fn record_unknown_kind(&self, id: Uuid) -> Result<(), TaskStoreError> {
        let conn = self.store.open()?;
        conn.execute(
            "UPDATE tasks SET last_status = 'error', updated_at = ?1 WHERE id = ?2",
            params![format_datetime(Utc::now()), id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_next_run_at(
        &self,
        id: Uuid,
        when: Option<DateTime<Utc>>,
    ) -> Result<(), TaskStoreError> {
        let conn = self.store.open()?;
        conn.execute(
            "UPDATE tasks SET next_run_at = ?1 WHERE id = ?2",
            params![when.map(format_datetime), id.to_string()],
        )?;
        Ok(())
    }

    /// Startup recovery: flip rows stuck at `running` whose run started
    /// before `cutoff` (or never recorded a start) to `error`.
    pub fn reset_stale_running(&self, cutoff: DateTime<Utc>) -> Result<usize, TaskStoreError> {
        let conn = self.store.open()?;
        let rows_affected = conn.execute(
            "UPDATE tasks
             SET last_status = 'error',
                 updated_at = ?1
             WHERE last_status = 'running'
               AND (last_run_at IS NULL OR last_run_at < ?2)",
            params![format_datetime(Utc::now()), format_datetime(cutoff)],
        )?;
        Ok(rows_affected)
    }
}

type TaskRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
);

fn task_row(row: &rusqlite::Row<'_>) -> Result<TaskRow, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn decode_task(row: TaskRow) -> Result<TaskDefinition, TaskStoreError> {
    let (
        id_raw,
        kind,
        name,
        cron_expression,
        is_active_raw,
        config_raw,
        provider,
        model,
        last_run_at_raw,
        last_status_raw,
        next_run_at_raw,
        created_at_raw,
        updated_at_raw,
    ) = row;
    let last_status = RunStatus::parse(&last_status_raw).ok_or_else(|| {
        TaskStoreError::Storage(format!("unknown last_status '{}' for task {}", last_status_raw, id_raw))
    })?;
    Ok(TaskDefinition {
        id: Uuid::parse_str(&id_raw)?,
        kind,
        name,
        cron_expression,
        is_active: is_active_raw != 0,
        config: serde_json::from_str(&config_raw)?,
        provider,
        model,
        last_run_at: parse_optional_datetime(last_run_at_raw.as_deref())?,
        last_status,
        next_run_at: parse_optional_datetime(next_run_at_raw.as_deref())?,
        created_at: parse_datetime(&created_at_raw)?,
        updated_at: parse_datetime(&updated_at_raw)?,
    })
}
