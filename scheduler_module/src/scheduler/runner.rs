use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use uuid::Uuid;

use super::schedule::next_run_after;

/// In-memory registry of the jobs the reconciliation cycle currently wants
/// scheduled, with a per-task claim set keeping concurrency at one.
///
/// This holds no durable state: the per-tenant stores are the source of
/// truth and a restart rebuilds the registry from them.
pub(super) struct JobRunner {
    state: Mutex<RunnerState>,
}

#[derive(Default)]
struct RunnerState {
    jobs: HashMap<Uuid, RegisteredJob>,
    claims: HashSet<Uuid>,
}

struct RegisteredJob {
    tenant_id: String,
    kind: String,
    name: String,
    expression: String,
    schedule: CronSchedule,
    next_fire: Option<DateTime<Utc>>,
}

/// One job claimed for execution by `claim_due`.
pub(super) struct DueFire {
    pub task_id: Uuid,
    pub tenant_id: String,
    pub kind: String,
    pub name: String,
    pub next_fire: Option<DateTime<Utc>>,
}

impl JobRunner {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(RunnerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Register or fully replace a job. Returns the first fire after `now`,
    /// `None` when the schedule never fires again.
    pub(super) fn register(
        &self,
        task_id: Uuid,
        tenant_id: &str,
        kind: &str,
        name: &str,
        expression: &str,
        schedule: CronSchedule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let next_fire = next_run_after(&schedule, now);
        self.lock().jobs.insert(
            task_id,
            RegisteredJob {
                tenant_id: tenant_id.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                expression: expression.to_string(),
                schedule,
                next_fire,
            },
        );
        next_fire
    }

    /// Swap the trigger of an already-registered job, leaving any in-flight
    /// claim untouched. Returns the recomputed next fire.
    pub(super) fn replace_trigger(
        &self,
        task_id: Uuid,
        expression: &str,
        schedule: CronSchedule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&task_id)?;
        job.expression = expression.to_string();
        job.next_fire = next_run_after(&schedule, now);
        job.schedule = schedule;
        job.next_fire
    }

    pub(super) fn deregister(&self, task_id: Uuid) -> bool {
        self.lock().jobs.remove(&task_id).is_some()
    }

    pub(super) fn expression_of(&self, task_id: Uuid) -> Option<String> {
        self.lock()
            .jobs
            .get(&task_id)
            .map(|job| job.expression.clone())
    }

    pub(super) fn job_ids(&self) -> HashSet<Uuid> {
        self.lock().jobs.keys().copied().collect()
    }

    /// Registered jobs no longer in the active set, excluding jobs owned by
    /// tenants whose fetch failed this cycle.
    pub(super) fn stale_job_ids(
        &self,
        active: &HashSet<Uuid>,
        failed_tenants: &HashSet<String>,
    ) -> Vec<Uuid> {
        self.lock()
            .jobs
            .iter()
            .filter(|(id, job)| {
                !active.contains(id) && !failed_tenants.contains(&job.tenant_id)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Claim a task for a run; `false` means a run is already in flight.
    pub(super) fn try_claim(&self, task_id: Uuid) -> bool {
        self.lock().claims.insert(task_id)
    }

    pub(super) fn is_claimed(&self, task_id: Uuid) -> bool {
        self.lock().claims.contains(&task_id)
    }

    pub(super) fn release(&self, task_id: Uuid) {
        self.lock().claims.remove(&task_id);
    }

    /// Claim every unclaimed job whose fire time has arrived and advance its
    /// trigger. Fires missed while a claim was held coalesce into one: the
    /// next fire is computed from `now`, not from the missed instant.
    pub(super) fn claim_due(&self, now: DateTime<Utc>) -> Vec<DueFire> {
        let mut state = self.lock();
        let mut due = Vec::new();
        let claimed: Vec<Uuid> = state
            .jobs
            .iter()
            .filter(|(id, job)| {
                matches!(job.next_fire, Some(at) if at <= now) && !state.claims.contains(id)
            })
            .map(|(id, _)| *id)
            .collect();
        for task_id in claimed {
            state.claims.insert(task_id);
            if let Some(job) = state.jobs.get_mut(&task_id) {
                job.next_fire = next_run_after(&job.schedule, now);
                due.push(DueFire {
                    task_id,
                    tenant_id: job.tenant_id.clone(),
                    kind: job.kind.clone(),
                    name: job.name.clone(),
                    next_fire: job.next_fire,
                });
            }
        }
        due
    }
}
