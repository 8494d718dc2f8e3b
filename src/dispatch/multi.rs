use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::Value;
use uuid::Uuid;

use crate::config::DEFAULT_FANOUT_TIMEOUT;
use crate::dispatch::outcome::{reduce_all, reduce_point, Outcome};
use crate::dispatch::{ScriptNode, TargetRule};
use crate::error::{Result, ScriptError};
use crate::registry::RunStatus;

/// Fans requests out across a candidate set of nodes and aggregates the
/// per-candidate outcomes.
///
/// Holds no mutable state: the candidate set is fixed for the lifetime of
/// one client, which is built per request from the membership source.
pub struct ScriptMultiClient<C> {
    clients: Vec<Arc<C>>,
    fanout_timeout: Duration,
}

impl<C: ScriptNode> ScriptMultiClient<C> {
    pub fn new(clients: Vec<C>) -> Self {
        Self {
            clients: clients.into_iter().map(Arc::new).collect(),
            fanout_timeout: DEFAULT_FANOUT_TIMEOUT,
        }
    }

    pub fn with_fanout_timeout(mut self, timeout: Duration) -> Self {
        self.fanout_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Submit under the given distribution rule. An empty candidate set
    /// yields an empty status list, not an error.
    pub async fn submit(
        &self,
        name: &str,
        variables: HashMap<String, Value>,
        rule: TargetRule,
    ) -> Result<Vec<RunStatus>> {
        let variables = Arc::new(variables);
        match rule {
            TargetRule::One => self.submit_one(name, variables).await,
            TargetRule::All => self.submit_all(name, variables).await,
        }
    }

    /// Try candidates in list order until one accepts the submission.
    /// Each candidate gets at most the fan-out timeout before the loop
    /// moves on.
    async fn submit_one(
        &self,
        name: &str,
        variables: Arc<HashMap<String, Value>>,
    ) -> Result<Vec<RunStatus>> {
        let mut outcomes = Vec::new();
        for client in &self.clients {
            match self
                .bounded(client.submit(name.to_string(), variables.clone(), TargetRule::One))
                .await
            {
                Outcome::Success(statuses) => return Ok(statuses),
                Outcome::Failed(e) => {
                    tracing::warn!(candidate = client.address(), error = %e, "Candidate submission failed");
                    outcomes.push(Outcome::Failed(e));
                }
                Outcome::NotFound => outcomes.push(Outcome::NotFound),
            }
        }
        reduce_all(outcomes, || ScriptError::ScriptNotFound(name.to_string()))
    }

    /// Invoke every candidate in parallel; one slow or broken candidate
    /// never discards the others' results.
    async fn submit_all(
        &self,
        name: &str,
        variables: Arc<HashMap<String, Value>>,
    ) -> Result<Vec<RunStatus>> {
        let outcomes = self
            .fan_out(|client| {
                let name = name.to_string();
                let variables = variables.clone();
                async move { client.submit(name, variables, TargetRule::All).await }
            })
            .await;
        reduce_all(outcomes, || ScriptError::ScriptNotFound(name.to_string()))
    }

    pub async fn run_status(&self, run_id: Uuid) -> Result<RunStatus> {
        self.first_success(run_id, |client, id| async move { client.status(id).await })
            .await
    }

    pub async fn run_out(&self, run_id: Uuid) -> Result<String> {
        self.first_success(run_id, |client, id| async move { client.out(id).await })
            .await
    }

    pub async fn run_err(&self, run_id: Uuid) -> Result<String> {
        self.first_success(run_id, |client, id| async move { client.err(id).await })
            .await
    }

    /// Merge every reachable candidate's status map. Partial
    /// unavailability is tolerated as long as at least one candidate
    /// responded or every failure was a plain NotFound.
    pub async fn list_statuses(&self) -> Result<HashMap<Uuid, RunStatus>> {
        let outcomes = self.fan_out(|client| async move { client.list().await }).await;

        let mut merged = HashMap::new();
        let mut succeeded = false;
        let mut causes = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Success(statuses) => {
                    succeeded = true;
                    // Ids are globally unique; a collision would be a bug
                    // upstream and resolves last-write-wins here.
                    merged.extend(statuses);
                }
                Outcome::NotFound => {}
                Outcome::Failed(e) => causes.push(e.to_string()),
            }
        }
        if !succeeded && !causes.is_empty() {
            return Err(ScriptError::aggregate(causes));
        }
        if !causes.is_empty() {
            tracing::warn!(failed = causes.len(), "Partial cluster status listing");
        }
        Ok(merged)
    }

    /// Point lookups use first-success semantics whatever the submission
    /// rule was: a run id is owned by exactly one node, so candidates are
    /// tried in random order until one claims it.
    async fn first_success<T, F, Fut>(&self, run_id: Uuid, call: F) -> Result<T>
    where
        F: Fn(Arc<C>, Uuid) -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let mut order: Vec<usize> = (0..self.clients.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        let mut outcomes = Vec::new();
        for index in order {
            match self.bounded(call(self.clients[index].clone(), run_id)).await {
                Outcome::Success(value) => return Ok(value),
                Outcome::Failed(e) => {
                    tracing::warn!(candidate = self.clients[index].address(), error = %e, "Candidate lookup failed");
                    outcomes.push(Outcome::Failed(e));
                }
                Outcome::NotFound => outcomes.push(Outcome::NotFound),
            }
        }
        reduce_point(outcomes, || ScriptError::RunNotFound(run_id.to_string()))
    }

    /// Bound one candidate call by the fan-out timeout. A hung candidate
    /// counts as a failure so sequential loops keep moving; its remote
    /// work is abandoned, not cancelled.
    async fn bounded<T>(&self, fut: impl Future<Output = Outcome<T>>) -> Outcome<T> {
        match tokio::time::timeout(self.fanout_timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed(ScriptError::Timeout(self.fanout_timeout)),
        }
    }

    /// One task per candidate, joined under the fan-out timeout. A timed
    /// out candidate is abandoned, not cancelled remotely.
    async fn fan_out<T, F, Fut>(&self, call: F) -> Vec<Outcome<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            let deadline = self.fanout_timeout;
            let fut = call(client.clone());
            handles.push(tokio::spawn(async move {
                match tokio::time::timeout(deadline, fut).await {
                    Ok(outcome) => outcome,
                    Err(_) => Outcome::Failed(ScriptError::Timeout(deadline)),
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::Failed(ScriptError::Internal(e.to_string())),
            });
        }
        outcomes
    }
}
