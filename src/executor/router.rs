use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, ScriptError};
use crate::executor::{RunContext, ScriptExecutor};

/// Routes script identifiers to interpreters by suffix.
///
/// Routing is plain configuration: the first matching suffix wins, an
/// optional fallback catches everything else, and a miss is a NotFound at
/// submission time.
#[derive(Default)]
pub struct SuffixRouter {
    routes: Vec<(String, Arc<dyn ScriptExecutor>)>,
    fallback: Option<Arc<dyn ScriptExecutor>>,
}

impl SuffixRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, suffix: impl Into<String>, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.routes.push((suffix.into(), executor));
        self
    }

    pub fn fallback(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    fn executor_for(&self, name: &str) -> Result<&Arc<dyn ScriptExecutor>> {
        self.routes
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix.as_str()))
            .map(|(_, executor)| executor)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ScriptError::ScriptNotFound(name.to_string()))
    }
}

#[tonic::async_trait]
impl ScriptExecutor for SuffixRouter {
    async fn resolve(&self, name: &str) -> Result<()> {
        self.executor_for(name)?.resolve(name).await
    }

    async fn execute(
        &self,
        name: String,
        variables: Arc<HashMap<String, Value>>,
        ctx: RunContext,
    ) -> Result<Option<Value>> {
        let executor = self.executor_for(&name)?.clone();
        executor.execute(name, variables, ctx).await
    }
}
