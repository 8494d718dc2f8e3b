use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::executor::{RunContext, ScriptExecutor};
use crate::registry::console::{RunConsole, RunScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Ready,
    Running,
    Terminated,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Terminated | RunState::Error)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Ready => write!(f, "ready"),
            RunState::Running => write!(f, "running"),
            RunState::Terminated => write!(f, "terminated"),
            RunState::Error => write!(f, "error"),
        }
    }
}

/// Immutable snapshot of a run, safe to hand to any poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub node: String,
    pub uuid: Uuid,
    pub name: String,
    pub state: RunState,
    #[serde(rename = "start", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "end", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub bindings: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(rename = "_status")]
    pub status_path: String,
    #[serde(rename = "_std_out")]
    pub std_out_path: String,
    #[serde(rename = "_std_err")]
    pub std_err_path: String,
}

impl RunStatus {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: &str,
        uuid: Uuid,
        name: &str,
        state: RunState,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        bindings: HashMap<String, Value>,
        error: Option<String>,
        result: Option<Value>,
    ) -> Self {
        Self {
            node: node.to_string(),
            uuid,
            name: name.to_string(),
            state,
            start_time,
            end_time,
            bindings,
            error,
            result,
            status_path: format!("{}/scripts/status/{}", node, uuid),
            std_out_path: format!("{}/scripts/status/{}/out", node, uuid),
            std_err_path: format!("{}/scripts/status/{}/err", node, uuid),
        }
    }
}

/// Binding snapshot kept on the run for status reporting. String, number
/// and boolean values are retained; anything non-primitive is replaced by
/// an empty marker so the snapshot never leaks structured objects.
pub fn sanitize_bindings(variables: &HashMap<String, Value>) -> HashMap<String, Value> {
    variables
        .iter()
        .map(|(key, value)| {
            let kept = match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => value.clone(),
                _ => Value::String(String::new()),
            };
            (key.clone(), kept)
        })
        .collect()
}

#[derive(Debug, Default)]
struct RunInner {
    state: RunState,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    expiration_time: Option<DateTime<Utc>>,
    error: Option<String>,
    result: Option<Value>,
}

/// One execution attempt of a script.
///
/// Owned by the registry for its lifetime. The executing task is the only
/// writer; every other access goes through immutable snapshots.
#[derive(Debug)]
pub struct Run {
    id: Uuid,
    name: String,
    node: String,
    grace_window: chrono::Duration,
    variables: Arc<HashMap<String, Value>>,
    bindings: HashMap<String, Value>,
    inner: RwLock<RunInner>,
    console: RunConsole,
    scope: RunScope,
}

impl Run {
    pub fn new(
        node: String,
        name: String,
        variables: HashMap<String, Value>,
        grace_window: chrono::Duration,
    ) -> Self {
        let bindings = sanitize_bindings(&variables);
        Self {
            // v7 ids are time-ordered, so listings sort naturally.
            id: Uuid::now_v7(),
            name,
            node,
            grace_window,
            variables: Arc::new(variables),
            bindings,
            inner: RwLock::new(RunInner::default()),
            console: RunConsole::default(),
            scope: RunScope::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the run to completion. Transitions Ready -> Running, invokes
    /// the executor adapter, and always lands in a terminal state with
    /// endTime and expirationTime set and scoped resources closed, even
    /// when the adapter fails or panics.
    pub async fn execute(&self, executor: Arc<dyn ScriptExecutor>) {
        tracing::info!(run_id = %self.id, script = %self.name, "Executing script");
        {
            let mut inner = self.inner.write().await;
            inner.state = RunState::Running;
            inner.start_time = Some(Utc::now());
        }

        let name = self.name.clone();
        let variables = self.variables.clone();
        let ctx = RunContext::new(self.console.clone(), self.scope.clone());
        // The adapter runs on its own task so a panicking script surfaces
        // as a JoinError instead of unwinding through the submitter.
        let outcome =
            tokio::spawn(async move { executor.execute(name, variables, ctx).await }).await;

        let mut inner = self.inner.write().await;
        match outcome {
            Ok(Ok(result)) => {
                inner.state = RunState::Terminated;
                inner.result = result;
            }
            Ok(Err(e)) => {
                tracing::error!(run_id = %self.id, script = %self.name, error = %e, "Script failed");
                inner.state = RunState::Error;
                inner.error = Some(e.to_string());
            }
            Err(e) => {
                tracing::error!(run_id = %self.id, script = %self.name, error = %e, "Script task aborted");
                inner.state = RunState::Error;
                inner.error = Some(e.to_string());
            }
        }
        let end = Utc::now();
        inner.end_time = Some(end);
        inner.expiration_time = Some(
            end.checked_add_signed(self.grace_window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        drop(inner);

        self.scope.close_all().await;
    }

    pub async fn status(&self) -> RunStatus {
        let inner = self.inner.read().await;
        RunStatus::new(
            &self.node,
            self.id,
            &self.name,
            inner.state,
            inner.start_time,
            inner.end_time,
            self.bindings.clone(),
            inner.error.clone(),
            inner.result.clone(),
        )
    }

    /// Captured stdout so far. Non-empty output is visible while the run
    /// is still in flight.
    pub async fn out(&self) -> String {
        self.console.out().await
    }

    /// Captured stderr so far.
    pub async fn err(&self) -> String {
        self.console.err().await
    }

    pub async fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.expiration_time
    }

    /// False until the run reaches a terminal state, then true from the
    /// expiration instant onward.
    pub async fn has_expired(&self, now: DateTime<Utc>) -> bool {
        match self.inner.read().await.expiration_time {
            None => false,
            Some(expiration) => expiration <= now,
        }
    }
}
