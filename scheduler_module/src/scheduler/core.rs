use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::ExecutorRegistry;
use super::runner::JobRunner;
use super::schedule::compile_cron_expression;
use super::types::{ExecutionContext, TaskKind};
use crate::task_store::RunStatus;
use crate::tenant_store::TenantStoreManager;

/// The scheduling engine: owns the in-memory job registry, reconciles it
/// against the per-tenant stores, and supervises task runs.
///
/// The stores are the source of truth; everything here is rebuilt from them
/// by `reconcile`, so a restart loses nothing but timing.
pub struct SchedulerEngine {
    stores: Arc<TenantStoreManager>,
    registry: Arc<ExecutorRegistry>,
    runner: JobRunner,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerEngine {
    pub fn new(stores: Arc<TenantStoreManager>, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            stores,
            registry,
            runner: JobRunner::new(),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Task ids currently registered for cron firing.
    pub fn active_job_ids(&self) -> HashSet<Uuid> {
        self.runner.job_ids()
    }

    /// One reconciliation cycle: drain run-now requests, then converge the
    /// job registry on the stored active sets, then expire old results.
    ///
    /// A tenant whose store fails this cycle is skipped in isolation: its
    /// registered jobs stay as they are and every other tenant proceeds.
    pub async fn reconcile(&self, now: DateTime<Utc>) {
        self.drain_run_requests().await;

        let mut failed_tenants: HashSet<String> = HashSet::new();
        let mut tenant_tasks = Vec::new();
        let mut open_stores = Vec::new();
        for tenant_id in self.stores.known_tenants() {
            let store = match self.stores.get_store(&tenant_id) {
                Ok(store) => store,
                Err(err) => {
                    warn!("skipping tenant {}: store open failed: {}", tenant_id, err);
                    failed_tenants.insert(tenant_id);
                    continue;
                }
            };
            match store.tasks().active_tasks() {
                Ok(tasks) => {
                    tenant_tasks.push((tenant_id, tasks));
                    open_stores.push(store);
                }
                Err(err) => {
                    warn!(
                        "skipping tenant {}: active task fetch failed: {}",
                        tenant_id, err
                    );
                    failed_tenants.insert(tenant_id);
                }
            }
        }

        let active_ids: HashSet<Uuid> = tenant_tasks
            .iter()
            .flat_map(|(_, tasks)| tasks.iter().map(|task| task.id))
            .collect();
        for task_id in self.runner.stale_job_ids(&active_ids, &failed_tenants) {
            if self.runner.deregister(task_id) {
                info!("deregistered job {}", task_id);
            }
        }

        for (tenant_id, tasks) in &tenant_tasks {
            for task in tasks {
                let schedule = match compile_cron_expression(&task.cron_expression) {
                    Ok(schedule) => schedule,
                    Err(err) => {
                        // Left as-is until the expression is corrected: an
                        // existing registration keeps its old trigger.
                        warn!(
                            "skipping task {} ({}) for tenant {}: {}",
                            task.id, task.name, tenant_id, err
                        );
                        continue;
                    }
                };
                match self.runner.expression_of(task.id) {
                    None => {
                        let next = self.runner.register(
                            task.id,
                            tenant_id,
                            &task.kind,
                            &task.name,
                            &task.cron_expression,
                            schedule,
                            now,
                        );
                        info!("registered job {} ({}), next fire {:?}", task.id, task.name, next);
                        self.write_next_run_at(tenant_id, task.id, next);
                    }
                    Some(current) if current != task.cron_expression => {
                        let next = self.runner.replace_trigger(
                            task.id,
                            &task.cron_expression,
                            schedule,
                            now,
                        );
                        info!("retriggered job {} ({}), next fire {:?}", task.id, task.name, next);
                        self.write_next_run_at(tenant_id, task.id, next);
                    }
                    Some(_) => {}
                }
            }
        }

        for store in &open_stores {
            match store.results().cleanup_expired() {
                Ok(0) => {}
                Ok(removed) => debug!(
                    "removed {} expired results for tenant {}",
                    removed,
                    store.tenant_id()
                ),
                Err(err) => warn!(
                    "result cleanup failed for tenant {}: {}",
                    store.tenant_id(),
                    err
                ),
            }
        }
    }

    /// Execute pending run-now requests, oldest first across all tenants.
    ///
    /// A request for a task already mid-run stays pending for a later
    /// cycle; every attempted request is deleted whatever its outcome.
    /// Inactive tasks run too: run-now is an explicit ask.
    async fn drain_run_requests(&self) {
        let mut pending = Vec::new();
        for tenant_id in self.stores.known_tenants() {
            let store = match self.stores.get_store(&tenant_id) {
                Ok(store) => store,
                Err(err) => {
                    warn!(
                        "skipping run requests for tenant {}: store open failed: {}",
                        tenant_id, err
                    );
                    continue;
                }
            };
            match store.tasks().pending_run_requests() {
                Ok(requests) => {
                    pending.extend(requests.into_iter().map(|request| (tenant_id.clone(), request)));
                }
                Err(err) => warn!(
                    "skipping run requests for tenant {}: fetch failed: {}",
                    tenant_id, err
                ),
            }
        }
        pending.sort_by_key(|(_, request)| request.requested_at);

        for (tenant_id, request) in pending {
            if !self.runner.try_claim(request.task_id) {
                debug!(
                    "task {} is mid-run, leaving run request pending",
                    request.task_id
                );
                continue;
            }
            info!(
                "running task {} ({}) for tenant {} on request",
                request.task_id, request.name, tenant_id
            );
            self.run_task(&tenant_id, request.task_id, &request.kind, &request.name)
                .await;
            self.runner.release(request.task_id);
            if let Ok(store) = self.stores.get_store(&tenant_id) {
                if let Err(err) = store.tasks().delete_run_request(request.task_id) {
                    warn!(
                        "failed to delete run request for task {}: {}",
                        request.task_id, err
                    );
                }
            }
        }
    }

    /// Fire every due job. Runs execute on spawned tasks so a slow tenant
    /// never stalls the tick; each spawn is supervised so a panic becomes
    /// an `error` status instead of a wedged claim.
    pub async fn poll_due(self: &Arc<Self>, now: DateTime<Utc>) {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            in_flight.retain(|handle| !handle.is_finished());
        }

        for fire in self.runner.claim_due(now) {
            self.write_next_run_at(&fire.tenant_id, fire.task_id, fire.next_fire);
            let engine = Arc::clone(self);
            let handle = tokio::spawn(async move {
                engine
                    .run_task(&fire.tenant_id, fire.task_id, &fire.kind, &fire.name)
                    .await;
                engine.runner.release(fire.task_id);
            });
            self.in_flight
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .push(handle);
        }
    }

    /// One supervised run. The caller holds the claim for `task_id`; this
    /// never returns before the terminal status is written.
    async fn run_task(&self, tenant_id: &str, task_id: Uuid, kind_tag: &str, task_name: &str) {
        let store = match self.stores.get_store(tenant_id) {
            Ok(store) => store,
            Err(err) => {
                warn!(
                    "cannot run task {}: store open failed for tenant {}: {}",
                    task_id, tenant_id, err
                );
                return;
            }
        };
        let kind = match TaskKind::parse(kind_tag) {
            Some(kind) => kind,
            None => {
                warn!("task {} has unknown kind {:?}", task_id, kind_tag);
                if let Err(err) = store.tasks().record_unknown_kind(task_id) {
                    warn!("failed to record unknown kind for task {}: {}", task_id, err);
                }
                return;
            }
        };
        if let Err(err) = store.tasks().record_run_started(task_id, Utc::now()) {
            warn!("cannot start task {}: {}", task_id, err);
            return;
        }

        let ctx = ExecutionContext {
            store: Arc::clone(&store),
            task_id,
            tenant_id: tenant_id.to_string(),
            task_name: task_name.to_string(),
        };
        let executor = self.registry.executor_for(kind);
        let outcome = AssertUnwindSafe(executor.execute(&ctx)).catch_unwind().await;
        let status = match outcome {
            Ok(Ok(())) => RunStatus::Success,
            Ok(Err(err)) => {
                error!(
                    "task {} ({}) failed for tenant {}: {}",
                    task_id, task_name, tenant_id, err
                );
                RunStatus::Error
            }
            Err(_) => {
                error!(
                    "task {} ({}) panicked for tenant {}",
                    task_id, task_name, tenant_id
                );
                RunStatus::Error
            }
        };
        if let Err(err) = store.tasks().record_run_finished(task_id, status) {
            warn!("failed to record outcome for task {}: {}", task_id, err);
        }
    }

    /// Startup recovery: flip `running` rows older than `cutoff` to `error`
    /// across every known tenant. Returns the number of rows repaired.
    pub fn sweep_stale_running(&self, cutoff: DateTime<Utc>) -> usize {
        let mut repaired = 0;
        for tenant_id in self.stores.known_tenants() {
            let store = match self.stores.get_store(&tenant_id) {
                Ok(store) => store,
                Err(err) => {
                    warn!("stale sweep skipped tenant {}: {}", tenant_id, err);
                    continue;
                }
            };
            match store.tasks().reset_stale_running(cutoff) {
                Ok(0) => {}
                Ok(count) => {
                    info!("reset {} stale running task(s) for tenant {}", count, tenant_id);
                    repaired += count;
                }
                Err(err) => warn!("stale sweep failed for tenant {}: {}", tenant_id, err),
            }
        }
        repaired
    }

    /// Wait for every spawned run to finish. Used on shutdown and by tests.
    pub async fn join_in_flight(&self) {
        let handles = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            std::mem::take(&mut *in_flight)
        };
        for handle in handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!("task run join failed: {}", err);
                }
            }
        }
    }

    /// `next_run_at` is informational; failures to write it never affect
    /// scheduling.
    fn write_next_run_at(&self, tenant_id: &str, task_id: Uuid, when: Option<DateTime<Utc>>) {
        let Ok(store) = self.stores.get_store(tenant_id) else {
            return;
        };
        if let Err(err) = store.tasks().set_next_run_at(task_id, when) {
            debug!("failed to write next_run_at for task {}: {}", task_id, err);
        }
    }
}
