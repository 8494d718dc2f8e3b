//! Run lifecycle registry.
//!
//! A [`Run`] is one execution attempt of a script: a small state machine
//! (ready, running, terminated, error) with progressive stdout/stderr
//! capture. The [`RunRegistry`] owns every run by id, executes them
//! through the configured [`ScriptExecutor`](crate::executor::ScriptExecutor),
//! and opportunistically evicts runs whose grace window has elapsed.
//!
//! External callers only ever hold a run id or an immutable [`RunStatus`]
//! snapshot, never a mutable reference into the registry.

mod console;
mod run;
mod store;

pub use console::{RunConsole, RunScope, ScopedResource};
pub use run::{sanitize_bindings, Run, RunState, RunStatus};
pub use store::RunRegistry;
