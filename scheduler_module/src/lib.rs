pub mod data_proxy;
pub mod result_store;
pub mod service;
pub mod task_store;
pub mod tenant_store;

mod scheduler;

pub use scheduler::{
    compile_cron_expression, next_run_after, CalendarBriefingExecutor, ExecutionContext,
    ExecutorRegistry, MailDigestExecutor, SchedulerEngine, SchedulerError, TaskExecutor, TaskKind,
};
