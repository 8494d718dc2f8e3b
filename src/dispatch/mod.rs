//! Multi-node dispatch and result aggregation.
//!
//! The dispatcher presents the same submission/lookup contract as the
//! local registry, but over a candidate set of remote endpoints. Each
//! candidate call is classified into an [`Outcome`]; pure reducers in
//! [`outcome`] turn a list of outcomes into the aggregate result, so the
//! ONE/ALL policies are testable without any network.

mod multi;
pub mod outcome;

pub use multi::ScriptMultiClient;
pub use outcome::Outcome;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::registry::RunStatus;

/// Distribution policy: run on exactly one reachable candidate, or on
/// every reachable candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetRule {
    #[default]
    One,
    All,
}

impl std::fmt::Display for TargetRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetRule::One => write!(f, "one"),
            TargetRule::All => write!(f, "all"),
        }
    }
}

/// One remote endpoint offering the script service.
///
/// Implementations translate their transport's failures into the
/// [`Outcome`] taxonomy so aggregation never inspects transport detail.
#[tonic::async_trait]
pub trait ScriptNode: Send + Sync + 'static {
    fn address(&self) -> &str;

    async fn submit(
        &self,
        name: String,
        variables: Arc<HashMap<String, Value>>,
        rule: TargetRule,
    ) -> Outcome<Vec<RunStatus>>;

    async fn status(&self, run_id: Uuid) -> Outcome<RunStatus>;

    async fn out(&self, run_id: Uuid) -> Outcome<String>;

    async fn err(&self, run_id: Uuid) -> Outcome<String>;

    async fn list(&self) -> Outcome<HashMap<Uuid, RunStatus>>;
}
