use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{config_hours, load_own_task, persist_result, render_items, NOTHING_TO_REPORT};
use crate::data_proxy::DataProxyClient;
use crate::result_store::NewResult;
use crate::scheduler::executor::TaskExecutor;
use crate::scheduler::types::{ExecutionContext, SchedulerError, TaskKind};
use summarize_module::{SummarizeClient, SummarizeParams};

const SYSTEM_PROMPT: &str = "You are an executive email assistant. Summarize the \
messages below into a short, prioritized digest. Lead with anything urgent or \
requiring a reply, then group the rest by topic. Be concise.";

const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Summarizes recent mail into a prioritized digest result.
pub struct MailDigestExecutor {
    data_proxy: Arc<DataProxyClient>,
    summarizer: Arc<SummarizeClient>,
    result_ttl_days: i64,
}

impl MailDigestExecutor {
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
impl TaskExecutor for MailDigestExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), SchedulerError> {
        let task = load_own_task(ctx)?;
        let lookback_hours = config_hours(&task.config, "lookback_hours", DEFAULT_LOOKBACK_HOURS);

        let messages = self
            .data_proxy
            .fetch_items(
                &ctx.tenant_id,
                "mail/messages",
                &[("lookback_hours", lookback_hours.to_string())],
            )
            .await?;

        let content = if messages.is_empty() {
            NOTHING_TO_REPORT.to_string()
        } else {
            self.summarizer
                .summarize(&SummarizeParams {
                    system_prompt: SYSTEM_PROMPT.to_string(),
                    user_prompt: render_items(&messages),
                    model: task.model.clone(),
                    provider: task.provider.clone(),
                })
                .await?
        };

        info!(
            "mail digest for tenant {} covered {} messages",
            ctx.tenant_id,
            messages.len()
        );
        persist_result(
            ctx,
            NewResult {
                task_id: ctx.task_id,
                result_type: TaskKind::MailDigest.as_str().to_string(),
                title: ctx.task_name.clone(),
                content,
                data: Some(serde_json::json!({ "item_count": messages.len() })),
            },
            self.result_ttl_days,
        );
        Ok(())
    }
}
