use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{config_hours, load_own_task, persist_result, render_items, NOTHING_TO_REPORT};
use crate::data_proxy::DataProxyClient;
use crate::result_store::NewResult;
use crate::scheduler::executor::TaskExecutor;
use crate::scheduler::types::{ExecutionContext, SchedulerError, TaskKind};
use summarize_module::{SummarizeClient, SummarizeParams};

const SYSTEM_PROMPT: &str = "You are a scheduling assistant. Turn the calendar \
events below into a short briefing for the day ahead: call out the first event, \
any back-to-back blocks or conflicts, and gaps usable for focused work.";

const DEFAULT_HORIZON_HOURS: i64 = 24;

/// Summarizes upcoming calendar events into a day briefing result.
pub struct CalendarBriefingExecutor {
    data_proxy: Arc<DataProxyClient>,
    summarizer: Arc<SummarizeClient>,
    result_ttl_days: i64,
}

impl CalendarBriefingExecutor {
    pub fn new(
        data_proxy: Arc<DataProxyClient>,
        summarizer: Arc<SummarizeClient>,
        result_ttl_days: i64,
    ) -> Self {
        Self {
            data_proxy,
            summarizer,
            result_ttl_days,
        }
    }
}

#[async_trait]
impl TaskExecutor for CalendarBriefingExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), SchedulerError> {
        let task = load_own_task(ctx)?;
        let horizon_hours = config_hours(&task.config, "horizon_hours", DEFAULT_HORIZON_HOURS);

        let events = self
            .data_proxy
            .fetch_items(
                &ctx.tenant_id,
                "calendar/events",
                &[("horizon_hours", horizon_hours.to_string())],
            )
            .await?;

        let content = if events.is_empty() {
            NOTHING_TO_REPORT.to_string()
        } else {
            self.summarizer
                .summarize(&SummarizeParams {
                    system_prompt: SYSTEM_PROMPT.to_string(),
                    user_prompt: render_items(&events),
                    model: task.model.clone(),
                    provider: task.provider.clone(),
                })
                .await?
        };

        info!(
            "calendar briefing for tenant {} covered {} events",
            ctx.tenant_id,
            events.len()
        );
        persist_result(
            ctx,
            NewResult {
                task_id: ctx.task_id,
                result_type: TaskKind::CalendarBriefing.as_str().to_string(),
                title: ctx.task_name.clone(),
                content,
                data: Some(serde_json::json!({ "item_count": events.len() })),
            },
            self.result_ttl_days,
        );
        Ok(())
    }
}
