use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::{Result, ScriptError};
use crate::executor::{RunContext, ScriptExecutor};
use crate::registry::RunConsole;

/// Runs scripts from a directory through `sh`.
///
/// The script identifier is a path relative to the root; bindings are
/// exported as environment variables. Stdout and stderr are streamed into
/// the run console line by line while the process runs.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    root: PathBuf,
}

impl ShellExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn script_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains("..") || Path::new(name).is_absolute() {
            return Err(ScriptError::ScriptNotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

fn env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capture_lines<R>(pipe: Option<R>, console: RunConsole, stderr: bool) -> Option<tokio::task::JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|pipe| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr {
                    console.eprintln(&line).await;
                } else {
                    console.println(&line).await;
                }
            }
        })
    })
}

#[tonic::async_trait]
impl ScriptExecutor for ShellExecutor {
    async fn resolve(&self, name: &str) -> Result<()> {
        let path = self.script_path(name)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ScriptError::ScriptNotFound(name.to_string()))?;
        if !meta.is_file() {
            return Err(ScriptError::ScriptNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn execute(
        &self,
        name: String,
        variables: Arc<HashMap<String, Value>>,
        ctx: RunContext,
    ) -> Result<Option<Value>> {
        let path = self.script_path(&name)?;
        tracing::debug!(script = %name, path = %path.display(), "Spawning shell script");

        let mut command = Command::new("sh");
        command
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in variables.iter() {
            command.env(key, env_value(value));
        }

        let mut child = command
            .spawn()
            .map_err(|e| ScriptError::Execution(format!("Failed to start {}: {}", name, e)))?;

        let out_task = capture_lines(child.stdout.take(), ctx.console.clone(), false);
        let err_task = capture_lines(child.stderr.take(), ctx.console.clone(), true);

        let status = child
            .wait()
            .await
            .map_err(|e| ScriptError::Execution(e.to_string()))?;

        if let Some(task) = out_task {
            let _ = task.await;
        }
        if let Some(task) = err_task {
            let _ = task.await;
        }

        if status.success() {
            Ok(None)
        } else {
            Err(ScriptError::Execution(match status.code() {
                Some(code) => format!("Exit code: {}", code),
                None => "Terminated by signal".to_string(),
            }))
        }
    }
}
