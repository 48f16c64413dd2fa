//! Timed execution of a single operation.

use std::{any::Any, fmt::Display, future::Future, panic::AssertUnwindSafe, time::Duration};

use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::debug;

use crate::outcome::{OperationOutput, Outcome};

/// Runs operations once each and turns whatever happens into an [`Outcome`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TimedExecutor {
    timeout: Option<Duration>,
}

impl TimedExecutor {
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Fails operations that have not completed within `timeout`.
    pub const fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Invokes `op` exactly once and measures it.
    ///
    /// Errors, panics and timeouts become failed outcomes; this never returns
    /// early and never panics on behalf of the operation.
    pub async fn run<F, Fut, T, E>(&self, test_name: &str, category: &str, op: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: OperationOutput,
        E: Display,
    {
        let start = Instant::now();
        let guarded = AssertUnwindSafe(async move { op().await }).catch_unwind();

        let completed = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, guarded).await.ok(),
            None => Some(guarded.await),
        };
        let elapsed = start.elapsed();

        let outcome = match completed {
            Some(Ok(Ok(output))) => {
                let cost = output.resource_cost();
                Outcome::success(test_name, category, elapsed, cost, output.into_payload())
            }
            Some(Ok(Err(e))) => Outcome::failure(test_name, category, elapsed, format!("{e:#}")),
            Some(Err(panic)) => Outcome::failure(
                test_name,
                category,
                elapsed,
                format!("operation panicked: {}", panic_message(panic.as_ref())),
            ),
            None => Outcome::failure(
                test_name,
                category,
                elapsed,
                format!(
                    "operation timed out after {}",
                    humantime::format_duration(self.timeout.unwrap_or_default())
                ),
            ),
        };

        debug!(
            test = test_name,
            category,
            success = outcome.is_success(),
            duration_ms = outcome.duration_ms(),
            "Operation finished"
        );
        outcome
    }
}

/// Measures `op` with no timeout.
pub async fn measure<F, Fut, T, E>(test_name: &str, category: &str, op: F) -> Outcome
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: OperationOutput,
    E: Display,
{
    TimedExecutor::new().run(test_name, category, op).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
