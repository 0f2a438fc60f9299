use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::result_store::DEFAULT_RESULT_TTL_DAYS;
use crate::data_proxy::DEFAULT_DATA_PROXY_TIMEOUT;

use super::BoxError;

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STALE_RUNNING_MINUTES: u64 = 30;
pub const DEFAULT_DATA_PROXY_URL: &str = "http://localhost:8700";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding one subdirectory (and `tasks.db`) per tenant.
    pub tenants_root: PathBuf,
    /// How often the job registry is reconciled against the stores.
    pub reconcile_interval: Duration,
    /// How often due jobs are checked for firing.
    pub poll_interval: Duration,
    /// Age after which a `running` row is presumed dead at startup.
    pub stale_running_after: Duration,
    pub result_ttl_days: i64,
    pub data_proxy_url: String,
    pub data_proxy_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let tenants_root = match env::var("TENANTS_ROOT") {
            Ok(raw) => resolve_path(raw)?,
            Err(_) => default_tenants_root()?,
        };

        let reconcile_interval = env_secs(
            "SCHEDULER_RECONCILE_INTERVAL_SECS",
            DEFAULT_RECONCILE_INTERVAL,
        );
        let poll_interval = env_secs("SCHEDULER_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL);
        let stale_running_after = env::var("SCHEDULER_STALE_RUNNING_MINUTES")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes * 60))
            .unwrap_or(Duration::from_secs(DEFAULT_STALE_RUNNING_MINUTES * 60));

        let result_ttl_days = env::var("RESULT_TTL_DAYS")
            .ok()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|days| *days >= 1)
            .unwrap_or(DEFAULT_RESULT_TTL_DAYS);

        let data_proxy_url =
            env::var("DATA_PROXY_URL").unwrap_or_else(|_| DEFAULT_DATA_PROXY_URL.to_string());
        let data_proxy_timeout = env_secs("DATA_PROXY_TIMEOUT_SECS", DEFAULT_DATA_PROXY_TIMEOUT);

        Ok(Self {
            tenants_root,
            reconcile_interval,
            poll_interval,
            stale_running_after,
            result_ttl_days,
            data_proxy_url,
            data_proxy_timeout,
        })
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn default_tenants_root() -> Result<PathBuf, io::Error> {
    let home =
        env::var("HOME").map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".daybrief").join("tenants"))
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
