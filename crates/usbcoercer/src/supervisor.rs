use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use uc_dhcp::DhcpError;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Service priority, decides restart behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePriority {
    /// DHCP: fast retries, never gives up
    Critical,
    /// PAC HTTP server: backoff, at most 10 retries
    Important,
}

impl ServicePriority {
    fn max_retries(self) -> u32 {
        match self {
            Self::Critical => u32::MAX,
            Self::Important => 10,
        }
    }

    fn backoff(self, retry: u32) -> Duration {
        let delay = match self {
            Self::Critical => Duration::from_millis(100 * retry as u64),
            Self::Important => Duration::from_secs(retry as u64),
        };
        delay.min(MAX_BACKOFF)
    }
}

/// Errors that can tell a transient failure from a permanent one.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DhcpError {
    fn is_retryable(&self) -> bool {
        DhcpError::is_retryable(self)
    }
}

/// Run `init` until it succeeds, sleeping between attempts according to
/// `priority`. Non-retryable errors are returned at once.
pub async fn retry_init<T, E, F, Fut>(
    name: &'static str,
    priority: ServicePriority,
    mut init: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_retries = priority.max_retries();
    let mut retries: u32 = 0;

    loop {
        let err = match init().await {
            Ok(value) => {
                if retries > 0 {
                    info!("[supervisor] {name} initialised after {retries} retries");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            error!("[supervisor] {name} init failed: {err}");
            return Err(err);
        }

        retries = retries.saturating_add(1);
        if retries > max_retries {
            error!(
                "[supervisor] {name} init exceeded max retries ({max_retries}), giving up: {err}"
            );
            return Err(err);
        }

        let backoff = priority.backoff(retries);
        warn!("[supervisor] {name} init failed ({err}), retrying in {backoff:?}");
        tokio::time::sleep(backoff).await;
    }
}

/// Spawn a supervised service task.
///
/// The service is restarted on failure or panic according to its priority.
pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    priority: ServicePriority,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let factory = Arc::new(factory);
    tokio::spawn(async move {
        let max_retries = priority.max_retries();
        let mut retries: u32 = 0;
        let mut last_restart = Instant::now();

        loop {
            info!("[supervisor] Starting service: {name}");

            let f = Arc::clone(&factory);
            let result = tokio::spawn(async move {
                let fut = f();
                fut.await
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    info!("[supervisor] {name} exited cleanly");
                    break;
                }
                Ok(Err(e)) => {
                    error!("[supervisor] {name} failed: {e:#}");
                }
                Err(join_error) => {
                    error!("[supervisor] {name} task panicked: {join_error}");
                }
            }

            // A service that ran for a minute starts over with a clean count.
            if last_restart.elapsed() > Duration::from_secs(60) {
                retries = 0;
            }

            retries = retries.saturating_add(1);

            if retries > max_retries {
                error!("[supervisor] {name} exceeded max retries ({max_retries}), giving up");
                break;
            }

            let backoff = priority.backoff(retries);
            warn!(
                "[supervisor] {name} restarting in {backoff:?} (attempt {retries}/{max_retries})"
            );
            tokio::time::sleep(backoff).await;
            last_restart = Instant::now();
        }
    })
}
