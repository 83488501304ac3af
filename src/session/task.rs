//! Stoppable background loops

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A spawned loop with its stop signal
#[derive(Debug)]
pub struct LoopHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawn `run` with a fresh stop signal; errors it returns are logged
    pub fn spawn<F, Fut, E>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let fut = run(shutdown_rx);
        let task = tokio::spawn(async move {
            if let Err(e) = fut.await {
                tracing::error!("{} loop error: {}", name, e);
            }
        });
        Self {
            name,
            shutdown,
            task,
        }
    }

    /// Loop name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop already exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop and wait up to `timeout` for it; aborts on expiry
    pub async fn stop(mut self, timeout: Duration) {
        // The loop may already be gone; a closed channel is fine
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => tracing::debug!("{} loop stopped", self.name),
            Ok(Err(e)) => tracing::warn!("{} loop ended abnormally: {}", self.name, e),
            Err(_) => {
                tracing::warn!("{} loop did not stop within {:?}, aborting", self.name, timeout);
                self.task.abort();
            }
        }
    }
}
