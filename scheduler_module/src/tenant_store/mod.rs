//! Per-tenant SQLite stores and their lifecycle.
//!
//! Each tenant gets one isolated database file under the tenants root; the
//! manager caches one handle per tenant for the life of the process.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::result_store::ResultStore;
use crate::task_store::TaskStore;

/// File name of the per-tenant database under the tenant's directory.
pub const TENANT_DB_FILE: &str = "tasks.db";

const TENANT_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    config TEXT NOT NULL DEFAULT '{}',
    provider TEXT,
    model TEXT,
    last_run_at TEXT,
    last_status TEXT NOT NULL DEFAULT 'none',
    next_run_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_requests (
    task_id TEXT PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
    requested_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_results (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    result_type TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    data TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_results_task ON task_results(task_id, created_at);
CREATE INDEX IF NOT EXISTS idx_task_results_unread ON task_results(is_read, expires_at);
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("tenant store busy (lock wait exceeded)")]
    Busy,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => StoreError::Busy,
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Handle to one tenant's database. Opens a fresh connection per operation;
/// the schema batch is idempotent so every connection sees foreign keys on.
#[derive(Debug)]
pub struct TenantStore {
    tenant_id: String,
    path: PathBuf,
}

impl TenantStore {
    fn new(tenant_id: String, path: PathBuf) -> Result<Self, StoreError> {
        let store = Self { tenant_id, path };
        let _ = store.open()?;
        Ok(store)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tasks(&self) -> TaskStore<'_> {
        TaskStore::new(self)
    }

    pub fn results(&self) -> ResultStore<'_> {
        ResultStore::new(self)
    }

    pub(crate) fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(TENANT_SCHEMA)?;
        ensure_tasks_columns(&conn)?;
        ensure_task_results_columns(&conn)?;
        Ok(conn)
    }
}

/// Owns every open tenant store for the process.
///
/// `get_store` holds the handle map lock across get-or-create, so a first
/// open of an unseen tenant is single-flighted: concurrent callers converge
/// on one `Arc<TenantStore>` and never race on schema creation.
#[derive(Debug)]
pub struct TenantStoreManager {
    tenants_root: PathBuf,
    handles: Mutex<HashMap<String, Arc<TenantStore>>>,
}

impl TenantStoreManager {
    pub fn new(tenants_root: impl Into<PathBuf>) -> Self {
        Self {
            tenants_root: tenants_root.into(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn tenants_root(&self) -> &Path {
        &self.tenants_root
    }

    pub fn get_store(&self, tenant_id: &str) -> Result<Arc<TenantStore>, StoreError> {
        let normalized = normalize_tenant_id(tenant_id)
            .ok_or_else(|| StoreError::InvalidTenantId(tenant_id.to_string()))?;
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(store) = handles.get(&normalized) {
            return Ok(store.clone());
        }
        let path = self.tenants_root.join(&normalized).join(TENANT_DB_FILE);
        let store = Arc::new(TenantStore::new(normalized.clone(), path)?);
        handles.insert(normalized, store.clone());
        Ok(store)
    }

    /// Drop the cached handle for one tenant. Returns whether one was open.
    pub fn close(&self, tenant_id: &str) -> bool {
        let Some(normalized) = normalize_tenant_id(tenant_id) else {
            return false;
        };
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        handles.remove(&normalized).is_some()
    }

    /// Drop every cached handle (shutdown).
    pub fn close_all(&self) {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        handles.clear();
    }

    /// Union of currently open tenants and on-disk tenant directories that
    /// already contain a store file, so tenants survive a restart.
    pub fn known_tenants(&self) -> Vec<String> {
        let mut tenants: BTreeSet<String> = {
            let handles = self
                .handles
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            handles.keys().cloned().collect()
        };
        if let Ok(entries) = fs::read_dir(&self.tenants_root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && path.join(TENANT_DB_FILE).exists() {
                    if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                        tenants.insert(name.to_string());
                    }
                }
            }
        }
        tenants.into_iter().collect()
    }
}

/// Normalize a tenant identity into its on-disk directory name: trim,
/// lower-case, escape every byte outside `[a-z0-9._-]` as `%xx`.
pub fn normalize_tenant_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    let mut normalized = String::with_capacity(lowered.len());
    for byte in lowered.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => normalized.push(byte as char),
            other => {
                normalized.push('%');
                normalized.push_str(&format!("{:02x}", other));
            }
        }
    }
    if normalized.is_empty() || normalized == "." || normalized == ".." {
        None
    } else {
        Some(normalized)
    }
}

fn ensure_tasks_columns(conn: &Connection) -> Result<(), rusqlite::Error> {
    let columns = table_columns(conn, "tasks")?;
    if !columns.contains("provider") {
        conn.execute("ALTER TABLE tasks ADD COLUMN provider TEXT", [])?;
    }
    if !columns.contains("model") {
        conn.execute("ALTER TABLE tasks ADD COLUMN model TEXT", [])?;
    }
    if !columns.contains("next_run_at") {
        conn.execute("ALTER TABLE tasks ADD COLUMN next_run_at TEXT", [])?;
    }
    Ok(())
}

fn ensure_task_results_columns(conn: &Connection) -> Result<(), rusqlite::Error> {
    let columns = table_columns(conn, "task_results")?;
    if !columns.contains("data") {
        conn.execute("ALTER TABLE task_results ADD COLUMN data TEXT", [])?;
    }
    Ok(())
}

fn table_columns(
    conn: &Connection,
    table: &str,
) -> Result<std::collections::HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = std::collections::HashSet::new();
    for row in rows {
        columns.insert(row?);
    }
    Ok(columns)
}

pub(crate) fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(crate) fn parse_optional_datetime(
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    value.map(parse_datetime).transpose()
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
