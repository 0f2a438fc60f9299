use std::sync::Arc;

use async_trait::async_trait;

use super::executors::{CalendarBriefingExecutor, MailDigestExecutor};
use super::types::{ExecutionContext, SchedulerError, TaskKind};
use crate::data_proxy::DataProxyClient;
use summarize_module::SummarizeClient;

/// One scheduled-task behavior. Implementations fetch whatever source data
/// they need, produce output, and persist it through the context's store.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), SchedulerError>;
}

/// Maps each task kind to its executor. Built once at startup and shared.
pub struct ExecutorRegistry {
    mail_digest: Arc<dyn TaskExecutor>,
    calendar_briefing: Arc<dyn TaskExecutor>,
}

impl ExecutorRegistry {
    pub fn new(
        mail_digest: Arc<dyn TaskExecutor>,
        calendar_briefing: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            mail_digest,
            calendar_briefing,
        }
    }

    /// The registry used by the service binary: both kinds wired to the
    /// data proxy and summarization client.
    pub fn production(
        data_proxy: Arc<DataProxyClient>,
        summarizer: Arc<SummarizeClient>,
        result_ttl_days: i64,
    ) -> Self {
        Self::new(
            Arc::new(MailDigestExecutor::new(
                Arc::clone(&data_proxy),
                Arc::clone(&summarizer),
                result_ttl_days,
            )),
            Arc::new(CalendarBriefingExecutor::new(
                data_proxy,
                summarizer,
                result_ttl_days,
            )),
        )
    }

    pub fn executor_for(&self, kind: TaskKind) -> Arc<dyn TaskExecutor> {
        match kind {
            TaskKind::MailDigest => Arc::clone(&self.mail_digest),
            TaskKind::CalendarBriefing => Arc::clone(&self.calendar_briefing),
        }
    }
}
