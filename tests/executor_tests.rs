//! Integration tests for the shell executor against real scripts on disk.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use scriptd::error::ScriptError;
use scriptd::executor::{RunContext, ScriptExecutor, ShellExecutor};
use scriptd::registry::{RunConsole, RunScope};

struct Fixture {
    _dir: TempDir,
    executor: ShellExecutor,
    console: RunConsole,
}

impl Fixture {
    fn new(scripts: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("create scripts dir");
        for (name, body) in scripts {
            std::fs::write(dir.path().join(name), body).expect("write script");
        }
        let executor = ShellExecutor::new(dir.path());
        Self {
            _dir: dir,
            executor,
            console: RunConsole::default(),
        }
    }

    fn ctx(&self) -> RunContext {
        RunContext::new(self.console.clone(), RunScope::default())
    }

    async fn run(&self, name: &str, variables: HashMap<String, Value>) -> Result<Option<Value>, ScriptError> {
        self.executor
            .execute(name.to_string(), Arc::new(variables), self.ctx())
            .await
    }
}

#[tokio::test]
async fn test_stdout_is_captured_line_by_line() {
    let fixture = Fixture::new(&[("hello.sh", "echo one\necho two\n")]);

    fixture.run("hello.sh", HashMap::new()).await.unwrap();

    assert_eq!(fixture.console.out().await, "one\ntwo\n");
    assert_eq!(fixture.console.err().await, "");
}

#[tokio::test]
async fn test_stderr_is_captured_separately() {
    let fixture = Fixture::new(&[("warn.sh", "echo visible\necho oops >&2\n")]);

    fixture.run("warn.sh", HashMap::new()).await.unwrap();

    assert_eq!(fixture.console.out().await, "visible\n");
    assert_eq!(fixture.console.err().await, "oops\n");
}

#[tokio::test]
async fn test_bindings_are_exported_as_environment() {
    let fixture = Fixture::new(&[("env.sh", "echo \"$GREETING $COUNT\"\n")]);

    let mut variables = HashMap::new();
    variables.insert("GREETING".to_string(), json!("hi"));
    variables.insert("COUNT".to_string(), json!(3));

    fixture.run("env.sh", variables).await.unwrap();

    assert_eq!(fixture.console.out().await, "hi 3\n");
}

#[tokio::test]
async fn test_nonzero_exit_is_an_execution_error() {
    let fixture = Fixture::new(&[("bad.sh", "echo before the end\nexit 3\n")]);

    let err = fixture.run("bad.sh", HashMap::new()).await.unwrap_err();

    match err {
        ScriptError::Execution(msg) => assert!(msg.contains("Exit code: 3"), "got {msg}"),
        other => panic!("unexpected error: {other}"),
    }
    // Output produced before the failure is still captured.
    assert_eq!(fixture.console.out().await, "before the end\n");
}

#[tokio::test]
async fn test_resolve_accepts_existing_and_rejects_missing() {
    let fixture = Fixture::new(&[("real.sh", "true\n")]);

    assert!(fixture.executor.resolve("real.sh").await.is_ok());

    let err = fixture.executor.resolve("ghost.sh").await.unwrap_err();
    assert!(matches!(err, ScriptError::ScriptNotFound(_)));

    let err = fixture.executor.resolve("../real.sh").await.unwrap_err();
    assert!(matches!(err, ScriptError::ScriptNotFound(_)));
}
