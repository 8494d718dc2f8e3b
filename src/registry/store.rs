use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{Result, ScriptError};
use crate::executor::ScriptExecutor;
use crate::registry::run::{Run, RunStatus};

/// Concurrent owner of every run on this node.
///
/// Insertion happens at submission, eviction only through
/// [`sweep_expired`](RunRegistry::sweep_expired), which is triggered after
/// each submission rather than on a timer: a finished run stays queryable
/// for at least the grace window and is evicted eventually, not at a fixed
/// instant.
pub struct RunRegistry {
    node: String,
    grace_window: chrono::Duration,
    executor: Arc<dyn ScriptExecutor>,
    runs: RwLock<HashMap<Uuid, Arc<Run>>>,
    /// Bounds how many asynchronous submissions execute at once.
    pool: Arc<Semaphore>,
}

impl RunRegistry {
    pub fn new(config: &ServiceConfig, executor: Arc<dyn ScriptExecutor>) -> Self {
        let grace_window = chrono::Duration::from_std(config.grace_window)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        Self {
            node: config.node_addr.clone(),
            grace_window,
            executor,
            runs: RwLock::new(HashMap::new()),
            pool: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
        }
    }

    /// The address embedded in the status records this registry produces.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Resolve the script, create the run, and track it. Unknown
    /// identifiers fail here, before any run is inserted.
    async fn new_run(&self, name: &str, variables: HashMap<String, Value>) -> Result<Arc<Run>> {
        self.executor.resolve(name).await?;
        let run = Arc::new(Run::new(
            self.node.clone(),
            name.to_string(),
            variables,
            self.grace_window,
        ));
        self.runs.write().await.insert(run.id(), run.clone());
        Ok(run)
    }

    /// Execute the script on the caller's task, blocking until it reaches
    /// a terminal state.
    pub async fn submit_sync(
        &self,
        name: &str,
        variables: HashMap<String, Value>,
    ) -> Result<RunStatus> {
        tracing::info!(script = name, "Run sync");
        let run = self.new_run(name, variables).await?;
        run.execute(self.executor.clone()).await;
        self.sweep_expired().await;
        Ok(run.status().await)
    }

    /// Queue the script on the worker pool and return immediately with
    /// the run's current (ready or running) status. Callers poll for
    /// completion.
    pub async fn submit_async(
        &self,
        name: &str,
        variables: HashMap<String, Value>,
    ) -> Result<RunStatus> {
        tracing::info!(script = name, "Run async");
        let run = self.new_run(name, variables).await?;

        let task_run = run.clone();
        let executor = self.executor.clone();
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };
            task_run.execute(executor).await;
        });

        self.sweep_expired().await;
        Ok(run.status().await)
    }

    pub async fn lookup(&self, id: &Uuid) -> Result<Arc<Run>> {
        self.runs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ScriptError::RunNotFound(id.to_string()))
    }

    /// Snapshot of every tracked run's status.
    pub async fn list_statuses(&self) -> HashMap<Uuid, RunStatus> {
        let runs = self.runs.read().await;
        let mut statuses = HashMap::with_capacity(runs.len());
        for (id, run) in runs.iter() {
            statuses.insert(*id, run.status().await);
        }
        statuses
    }

    /// Evict every run whose grace window has elapsed. Returns the number
    /// of evicted runs.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut runs = self.runs.write().await;
        let mut expired = Vec::new();
        for (id, run) in runs.iter() {
            if run.has_expired(now).await {
                expired.push(*id);
            }
        }
        for id in &expired {
            runs.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(evicted = expired.len(), "Swept expired runs");
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}
