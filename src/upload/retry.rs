use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Bounded retry with a linear backoff between attempts.
///
/// Both retryable phases of an upload share this one policy type: ticket
/// issuance and the block+commit unit. The delay only blocks the upload
/// path; callers on other tasks are unaffected.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Ticket issuance is idempotent and side-effect-free on the remote, so
    /// it gets a slightly larger budget.
    pub fn ticket() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }

    /// The whole block+commit sequence is retried as a unit.
    pub fn upload() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(1),
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted; the
    /// last error is returned as-is.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, self.max_attempts, e, self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; giving up",
                        what, attempt, self.max_attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }
}
