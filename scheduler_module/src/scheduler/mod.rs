mod core;
mod executor;
mod executors;
mod runner;
mod schedule;
mod types;

pub use self::core::SchedulerEngine;
pub use executor::{ExecutorRegistry, TaskExecutor};
pub use executors::{CalendarBriefingExecutor, MailDigestExecutor};
pub use schedule::{compile_cron_expression, next_run_after};
pub use types::{ExecutionContext, SchedulerError, TaskKind};
