#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scheduler_module::result_store::NewResult;
use scheduler_module::task_store::{NewTask, TaskDefinition};
use scheduler_module::tenant_store::TenantStoreManager;
use scheduler_module::{
    ExecutionContext, ExecutorRegistry, SchedulerEngine, SchedulerError, TaskExecutor,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// What the stub does after recording its invocation.
pub enum StubBehavior {
    /// Write a result and succeed.
    Succeed,
    /// Return an execution error.
    Fail,
    /// Panic, exercising run supervision.
    Panic,
}

/// Executor test double: records every invocation and optionally blocks on
/// a semaphore so a test can hold a run in flight.
pub struct StubExecutor {
    behavior: StubBehavior,
    pub invocations: Mutex<Vec<(String, Uuid)>>,
    pub gate: Option<Arc<Semaphore>>,
}

impl StubExecutor {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            invocations: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated(behavior: StubBehavior, gate: Arc<Semaphore>) -> Self {
        Self {
            behavior,
            invocations: Mutex::new(Vec::new()),
            gate: Some(gate),
        }
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), SchedulerError> {
        self.invocations
            .lock()
            .unwrap()
            .push((ctx.tenant_id.clone(), ctx.task_id));
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        match self.behavior {
            StubBehavior::Succeed => {
                ctx.store
                    .results()
                    .create(
                        NewResult {
                            task_id: ctx.task_id,
                            result_type: "stub".to_string(),
                            title: ctx.task_name.clone(),
                            content: "stub output".to_string(),
                            data: None,
                        },
                        7,
                    )
                    .expect("persist stub result");
                Ok(())
            }
            StubBehavior::Fail => Err(SchedulerError::TaskFailed("stub failure".to_string())),
            StubBehavior::Panic => panic!("stub panic"),
        }
    }
}

pub struct EngineFixture {
    pub temp: TempDir,
    pub stores: Arc<TenantStoreManager>,
    pub engine: Arc<SchedulerEngine>,
    pub executor: Arc<StubExecutor>,
}

/// Engine wired with one stub executor serving both task kinds.
pub fn engine_with_stub(executor: StubExecutor) -> EngineFixture {
    let temp = TempDir::new().expect("tempdir");
    let stores = Arc::new(TenantStoreManager::new(temp.path().join("tenants")));
    let executor = Arc::new(executor);
    let registry = Arc::new(ExecutorRegistry::new(
        Arc::clone(&executor) as Arc<dyn TaskExecutor>,
        Arc::clone(&executor) as Arc<dyn TaskExecutor>,
    ));
    let engine = Arc::new(SchedulerEngine::new(Arc::clone(&stores), registry));
    EngineFixture {
        temp,
        stores,
        engine,
        executor,
    }
}

/// Engine wired with a real executor registry against mock collaborators.
pub fn engine_with_registry(registry: ExecutorRegistry) -> (TempDir, Arc<TenantStoreManager>, Arc<SchedulerEngine>) {
    let temp = TempDir::new().expect("tempdir");
    let stores = Arc::new(TenantStoreManager::new(temp.path().join("tenants")));
    let engine = Arc::new(SchedulerEngine::new(
        Arc::clone(&stores),
        Arc::new(registry),
    ));
    (temp, stores, engine)
}

pub fn create_task(
    stores: &TenantStoreManager,
    tenant_id: &str,
    kind: &str,
    name: &str,
    cron_expression: &str,
) -> TaskDefinition {
    let store = stores.get_store(tenant_id).expect("store");
    store
        .tasks()
        .create(NewTask {
            kind: kind.to_string(),
            name: name.to_string(),
            cron_expression: cron_expression.to_string(),
            config: None,
            provider: None,
            model: None,
        })
        .expect("create task")
}
