//! Built-in executors: the mail digest and calendar briefing tasks, plus
//! the helpers they share.

mod calendar_briefing;
mod mail_digest;

pub use calendar_briefing::CalendarBriefingExecutor;
pub use mail_digest::MailDigestExecutor;

use tracing::warn;

use super::types::{ExecutionContext, SchedulerError};
use crate::result_store::NewResult;
use crate::task_store::TaskDefinition;

pub(super) const NOTHING_TO_REPORT: &str = "Nothing to report.";

/// Fetch the executing task's own row; its config and model hints drive the
/// run. A vanished row means the task was deleted mid-flight.
pub(super) fn load_own_task(ctx: &ExecutionContext) -> Result<TaskDefinition, SchedulerError> {
    ctx.store
        .tasks()
        .get(ctx.task_id)?
        .ok_or_else(|| SchedulerError::TaskFailed(format!("task {} no longer exists", ctx.task_id)))
}

/// A positive integer hour count from the task config, or the default.
pub(super) fn config_hours(config: &serde_json::Value, key: &str, default: i64) -> i64 {
    config
        .get(key)
        .and_then(serde_json::Value::as_i64)
        .filter(|hours| *hours > 0)
        .unwrap_or(default)
}

/// Render fetched items as a numbered JSON listing for the prompt.
pub(super) fn render_items(items: &[serde_json::Value]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| format!("{}. {}", index + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write the run's output. A failed write is logged, not escalated: the
/// work itself succeeded and the run status should say so.
pub(super) fn persist_result(ctx: &ExecutionContext, result: NewResult, ttl_days: i64) {
    if let Err(err) = ctx.store.results().create(result, ttl_days) {
        warn!(
            "failed to persist result for task {} (tenant {}): {}",
            ctx.task_id, ctx.tenant_id, err
        );
    }
}
