use std::sync::Arc;

use tokio::sync::Mutex;

/// Captured stdout/stderr of one run.
///
/// Written by the executing task while the script runs, readable at any
/// time by pollers, so output is visible while the run is still in flight.
#[derive(Debug, Clone, Default)]
pub struct RunConsole {
    out: Arc<Mutex<String>>,
    err: Arc<Mutex<String>>,
}

impl RunConsole {
    pub async fn print(&self, text: &str) {
        self.out.lock().await.push_str(text);
    }

    pub async fn println(&self, text: &str) {
        let mut out = self.out.lock().await;
        out.push_str(text);
        out.push('\n');
    }

    pub async fn eprint(&self, text: &str) {
        self.err.lock().await.push_str(text);
    }

    pub async fn eprintln(&self, text: &str) {
        let mut err = self.err.lock().await;
        err.push_str(text);
        err.push('\n');
    }

    /// Captured stdout so far.
    pub async fn out(&self) -> String {
        self.out.lock().await.clone()
    }

    /// Captured stderr so far.
    pub async fn err(&self) -> String {
        self.err.lock().await.clone()
    }
}

/// A resource a script hands over for closing when its run finishes,
/// whatever the outcome.
pub trait ScopedResource: Send {
    fn close(&mut self) -> std::io::Result<()>;
}

/// Resources registered by a script for scoped cleanup. Drained on the
/// run's terminal transition.
#[derive(Clone, Default)]
pub struct RunScope {
    resources: Arc<Mutex<Vec<Box<dyn ScopedResource>>>>,
}

impl std::fmt::Debug for RunScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunScope").finish_non_exhaustive()
    }
}

impl RunScope {
    pub async fn register(&self, resource: Box<dyn ScopedResource>) {
        self.resources.lock().await.push(resource);
    }

    /// Close every registered resource. A failing close is logged and does
    /// not prevent the remaining resources from being closed.
    pub(crate) async fn close_all(&self) {
        let mut resources = self.resources.lock().await;
        for mut resource in resources.drain(..) {
            if let Err(e) = resource.close() {
                tracing::warn!(error = %e, "Failed to close run resource");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResource {
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ScopedResource for CountingResource {
        fn close(&mut self) -> std::io::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(std::io::Error::other("close failed"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn console_accumulates_progressively() {
        let console = RunConsole::default();
        console.print("a").await;
        console.println("b").await;
        console.eprintln("oops").await;
        assert_eq!(console.out().await, "ab\n");
        assert_eq!(console.err().await, "oops\n");
    }

    #[tokio::test]
    async fn close_all_survives_failing_close() {
        let closed = Arc::new(AtomicUsize::new(0));
        let scope = RunScope::default();
        scope
            .register(Box::new(CountingResource {
                closed: closed.clone(),
                fail: true,
            }))
            .await;
        scope
            .register(Box::new(CountingResource {
                closed: closed.clone(),
                fail: false,
            }))
            .await;

        scope.close_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);

        // Drained: closing again is a no-op.
        scope.close_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }
}
