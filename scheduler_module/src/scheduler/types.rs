use std::sync::Arc;

use uuid::Uuid;

use crate::data_proxy::DataProxyError;
use crate::result_store::ResultStoreError;
use crate::task_store::TaskStoreError;
use crate::tenant_store::{StoreError, TenantStore};
use summarize_module::SummarizeError;

/// The closed set of task kinds this scheduler can execute. New kinds are
/// added by extending the enum, not by a runtime string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    MailDigest,
    CalendarBriefing,
}

impl TaskKind {
    /// Parse the open-ended stored tag; `None` is a configuration defect.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mail_digest" => Some(TaskKind::MailDigest),
            "calendar_briefing" => Some(TaskKind::CalendarBriefing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MailDigest => "mail_digest",
            TaskKind::CalendarBriefing => "calendar_briefing",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    TaskStore(#[from] TaskStoreError),
    #[error(transparent)]
    ResultStore(#[from] ResultStoreError),
    #[error("cron parse error: {0}")]
    Cron(#[from] cron::error::Error),
    #[error("invalid cron expression (expected 5 fields, got {0})")]
    InvalidCron(usize),
    #[error(transparent)]
    DataProxy(#[from] DataProxyError),
    #[error(transparent)]
    Summarize(#[from] SummarizeError),
    #[error("task execution failed: {0}")]
    TaskFailed(String),
}

/// Everything an executor is handed for one run.
pub struct ExecutionContext {
    pub store: Arc<TenantStore>,
    pub task_id: Uuid,
    pub tenant_id: String,
    pub task_name: String,
}
