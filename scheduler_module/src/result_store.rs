//! Result repository: append-only, expiring log of task outputs.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use crate::tenant_store::{
    format_datetime, parse_datetime, StoreError, TenantStore,
};

/// Default number of days a result stays readable before expiry.
pub const DEFAULT_RESULT_TTL_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum ResultStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("uuid parse error: {0}")]
    UuidParse(#[from] uuid::Error),
    #[error("invalid ttl_days {0} (must be >= 1)")]
    InvalidTtl(i64),
}

impl From<rusqlite::Error> for ResultStoreError {
    fn from(err: rusqlite::Error) -> Self {
        ResultStoreError::Store(StoreError::from(err))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub result_type: String,
    pub title: String,
    pub content: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewResult {
    pub task_id: Uuid,
    pub result_type: String,
    pub title: String,
    pub content: String,
    pub data: Option<serde_json::Value>,
}

pub struct ResultStore<'a> {
    store: &'a TenantStore,
}

const RESULT_COLUMNS: &str =
    "id, task_id, result_type, title, content, data, is_read, created_at, expires_at";

impl<'a> ResultStore<'a> {
    pub(crate) fn new(store: &'a TenantStore) -> Self {
        Self { store }
    }

    /// Insert a result expiring `ttl_days` days after the creation instant.
    pub fn create(&self, new: NewResult, ttl_days: i64) -> Result<TaskResult, ResultStoreError> {
        if ttl_days < 1 {
            return Err(ResultStoreError::InvalidTtl(ttl_days));
        }
        let conn = self.store.open()?;
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let expires_at = created_at + chrono::Duration::days(ttl_days);
        conn.execute(
            "INSERT INTO task_results (id, task_id, result_type, title, content, data, is_read, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
            params![
                id.to_string(),
                new.task_id.to_string(),
                new.result_type.as_str(),
                new.title.as_str(),
                new.content.as_str(),
                new.data
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                format_datetime(created_at),
                format_datetime(expires_at),
            ],
        )?;
        Ok(TaskResult {
            id,
            task_id: new.task_id,
            result_type: new.result_type,
            title: new.title,
            content: new.content,
            data: new.data,
            is_read: false,
            created_at,
            expires_at,
        })
    }

    /// Unread, non-expired results, oldest first.
    pub fn get_unread(&self) -> Result<Vec<TaskResult>, ResultStoreError> {
        let conn = self.store.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS}
             FROM task_results
             WHERE is_read = 0 AND expires_at > ?1
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![format_datetime(Utc::now())], result_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(decode_result(row?)?);
        }
        Ok(results)
    }

    /// Flip every currently-unread row; returns the count affected.
    /// Idempotent: a second call returns 0.
    pub fn mark_all_read(&self) -> Result<usize, ResultStoreError> {
        let conn = self.store.open()?;
        let rows_affected =
            conn.execute("UPDATE task_results SET is_read = 1 WHERE is_read = 0", [])?;
        Ok(rows_affected)
    }

    /// Results for one task, newest first.
    pub fn get_by_task(
        &self,
        task_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TaskResult>, ResultStoreError> {
        let conn = self.store.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS}
             FROM task_results
             WHERE task_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![task_id.to_string(), limit as i64], result_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(decode_result(row?)?);
        }
        Ok(results)
    }

    /// Delete rows past expiry; invoked cooperatively by the reconciliation
    /// cycle, not self-timed. Returns the count removed.
    pub fn cleanup_expired(&self) -> Result<usize, ResultStoreError> {
        let conn = self.store.open()?;
        let rows_affected = conn.execute(
            "DELETE FROM task_results WHERE expires_at <= ?1",
            params![format_datetime(Utc::now())],
        )?;
        Ok(rows_affected)
    }
}

type ResultRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    String,
    String,
);

fn result_row(row: &rusqlite::Row<'_>) -> Result<ResultRow, rusqlite::Error> {
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
    ))
}

fn decode_result(row: ResultRow) -> Result<TaskResult, ResultStoreError> {
    let (
        id_raw,
        task_id_raw,
        result_type,
        title,
        content,
        data_raw,
        is_read_raw,
        created_at_raw,
        expires_at_raw,
    ) = row;
    Ok(TaskResult {
        id: Uuid::parse_str(&id_raw)?,
        task_id: Uuid::parse_str(&task_id_raw)?,
        result_type,
        title,
        content,
        data: data_raw
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        is_read: is_read_raw != 0,
        created_at: parse_datetime(&created_at_raw)?,
        expires_at: parse_datetime(&expires_at_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_store::NewTask;
    use crate::tenant_store::{TenantStore, TenantStoreManager};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Arc<TenantStore>) {
        let temp = TempDir::new().expect("tempdir");
        let manager = TenantStoreManager::new(temp.path().join("tenants"));
        let store = manager.get_store("tenant").expect("store");
        (temp, store)
    }

    fn task_id(store: &TenantStore) -> Uuid {
        store
            .tasks()
            .create(NewTask {
                kind: "mail_digest".to_string(),
                name: "digest".to_string(),
                cron_expression: "0 7 * * *".to_string(),
                config: None,
                provider: None,
                model: None,
            })
            .expect("create task")
            .id
    }

    fn new_result(task_id: Uuid, content: &str) -> NewResult {
        NewResult {
            task_id,
            result_type: "mail_digest".to_string(),
            title: "digest".to_string(),
            content: content.to_string(),
            data: None,
        }
    }

    fn force_expiry(store: &TenantStore, result_id: Uuid, expires_at: DateTime<Utc>) {
        let conn = store.open().expect("conn");
        conn.execute(
            "UPDATE task_results SET expires_at = ?1 WHERE id = ?2",
            params![format_datetime(expires_at), result_id.to_string()],
        )
        .expect("force expiry");
    }

    #[test]
    fn create_computes_expiry_from_creation_instant() {
        let (_temp, store) = test_store();
        let task = task_id(&store);
        let result = store
            .results()
            .create(new_result(task, "content"), 7)
            .expect("create");
        assert_eq!(result.expires_at, result.created_at + chrono::Duration::days(7));
        assert!(!result.is_read);
    }

    #[test]
    fn create_rejects_non_positive_ttl() {
        let (_temp, store) = test_store();
        let task = task_id(&store);
        let result = store.results().create(new_result(task, "content"), 0);
        assert!(matches!(result, Err(ResultStoreError::InvalidTtl(0))));
    }

    #[test]
    fn get_unread_filters_and_orders_oldest_first() {
        let (_temp, store) = test_store();
        let task = task_id(&store);
        let results = store.results();

        let oldest = results.create(new_result(task, "oldest"), 7).expect("create");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newest = results.create(new_result(task, "newest"), 7).expect("create");
        let expired = results.create(new_result(task, "expired"), 7).expect("create");
        force_expiry(&store, expired.id, Utc::now() - chrono::Duration::hours(1));

        let unread = results.get_unread().expect("unread");
        assert_eq!(unread.len(), 2);
        assert_eq!(unread[0].id, oldest.id);
        assert_eq!(unread[1].id, newest.id);
    }

    #[test]
    fn mark_all_read_is_idempotent() {
        let (_temp, store) = test_store();
        let task = task_id(&store);
        let results = store.results();
        results.create(new_result(task, "a"), 7).expect("create");
        results.create(new_result(task, "b"), 7).expect("create");

        assert_eq!(results.mark_all_read().expect("first"), 2);
        assert_eq!(results.mark_all_read().expect("second"), 0);
        assert!(results.get_unread().expect("unread").is_empty());
    }

    #[test]
    fn get_by_task_returns_newest_first_with_limit() {
        let (_temp, store) = test_store();
        let task = task_id(&store);
        let other = task_id(&store);
        let results = store.results();
        for index in 0..3 {
            results
                .create(new_result(task, &format!("r{}", index)), 7)
                .expect("create");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        results.create(new_result(other, "other"), 7).expect("create");

        let listed = results.get_by_task(task, 2).expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].content, "r2");
        assert_eq!(listed[1].content, "r1");
    }

    #[test]
    fn cleanup_expired_removes_only_past_rows() {
        let (_temp, store) = test_store();
        let task = task_id(&store);
        let results = store.results();
        let keep = results.create(new_result(task, "keep"), 7).expect("create");
        let gone = results.create(new_result(task, "gone"), 7).expect("create");
        force_expiry(&store, gone.id, Utc::now() - chrono::Duration::minutes(1));

        assert_eq!(results.cleanup_expired().expect("cleanup"), 1);
        let remaining = results.get_by_task(task, 10).expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep.id);
        assert_eq!(results.cleanup_expired().expect("recleanup"), 0);
    }

    #[test]
    fn data_round_trips_as_json() {
        let (_temp, store) = test_store();
        let task = task_id(&store);
        let mut result = new_result(task, "content");
        result.data = Some(serde_json::json!({"items": 3}));
        store.results().create(result, 7).expect("create");

        let listed = store.results().get_by_task(task, 1).expect("list");
        assert_eq!(listed[0].data, Some(serde_json::json!({"items": 3})));
    }
}
