//! Pluggable script interpreters.
//!
//! The registry is agnostic to how scripts actually run; it only needs the
//! [`ScriptExecutor`] contract. [`ShellExecutor`] runs files from a
//! scripts directory through `sh`; [`SuffixRouter`] picks an executor by
//! identifier suffix, making interpreter routing explicit configuration.

mod router;
mod shell;

pub use router::SuffixRouter;
pub use shell::ShellExecutor;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::registry::{RunConsole, RunScope};

/// Everything a script may touch while it runs: the run's output capture
/// and its scoped-resource registry.
#[derive(Clone)]
pub struct RunContext {
    pub console: RunConsole,
    pub scope: RunScope,
}

impl RunContext {
    pub fn new(console: RunConsole, scope: RunScope) -> Self {
        Self { console, scope }
    }
}

/// Contract every script interpreter satisfies.
#[tonic::async_trait]
pub trait ScriptExecutor: Send + Sync + 'static {
    /// Check that `name` resolves to a runnable script. Called at
    /// submission time so an unknown identifier fails before a run exists.
    async fn resolve(&self, name: &str) -> Result<()>;

    /// Run the script. Output is captured through `ctx.console` as it is
    /// produced; the returned value lands on the run's terminal status.
    async fn execute(
        &self,
        name: String,
        variables: Arc<HashMap<String, Value>>,
        ctx: RunContext,
    ) -> Result<Option<Value>>;
}
