// src/timer.rs - Fixed-rate timers with cancel-and-wait shutdown
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A periodic task owned by a tree node
///
/// Cancellation is only observed between fires, so `stop` returns after any
/// in-flight fire has completed.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Fire `tick` every `period`, the first time after `initial_delay`.
    pub fn spawn<F, Fut>(name: impl Into<String>, initial_delay: Duration, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }
            debug!("Timer {} stopped", task_name);
        });
        Self { name, cancel, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel and wait for the task to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("Timer {} panicked: {}", self.name, e);
            }
        }
    }
}
