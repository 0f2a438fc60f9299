use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::{BoxError, ServiceConfig};
use crate::data_proxy::DataProxyClient;
use crate::scheduler::{ExecutorRegistry, SchedulerEngine};
use crate::tenant_store::TenantStoreManager;
use summarize_module::SummarizeClient;

/// Run the scheduler service until `shutdown` resolves.
///
/// Two timers drive the engine: a reconcile tick converging the job
/// registry on the stores, and a faster poll tick firing due jobs. On
/// shutdown, in-flight runs are awaited before the stores are closed.
pub async fn run_service(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let stores = Arc::new(TenantStoreManager::new(&config.tenants_root));
    let data_proxy = Arc::new(DataProxyClient::new(
        &config.data_proxy_url,
        config.data_proxy_timeout,
    )?);
    let summarizer = Arc::new(SummarizeClient::from_env()?);
    let registry = Arc::new(ExecutorRegistry::production(
        data_proxy,
        summarizer,
        config.result_ttl_days,
    ));
    let engine = Arc::new(SchedulerEngine::new(Arc::clone(&stores), registry));

    info!(
        "scheduler service starting, tenants root {}",
        config.tenants_root.display()
    );

    let cutoff = Utc::now()
        - chrono::Duration::from_std(config.stale_running_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
    let repaired = engine.sweep_stale_running(cutoff);
    if repaired > 0 {
        info!("startup sweep repaired {} stale running task(s)", repaired);
    }

    engine.reconcile(Utc::now()).await;

    let mut reconcile_tick = tokio::time::interval(config.reconcile_interval);
    reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    reconcile_tick.reset();
    let mut poll_tick = tokio::time::interval(config.poll_interval);
    poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = reconcile_tick.tick() => {
                engine.reconcile(Utc::now()).await;
            }
            _ = poll_tick.tick() => {
                engine.poll_due(Utc::now()).await;
            }
        }
    }

    engine.join_in_flight().await;
    stores.close_all();
    info!("scheduler service stopped");
    Ok(())
}
