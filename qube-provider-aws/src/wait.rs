//! Polling until an asynchronously created resource is usable

use std::future::Future;
use std::time::Duration;

use log::debug;
use qube_core::config::WaitConfig;
use qube_core::provider::{ProviderError, ProviderResult};

/// How long to poll before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&WaitConfig> for WaitPolicy {
    fn from(config: &WaitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

/// Observed state of a resource being waited on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Ready,
    /// Not there yet; carries the reported state for logging
    Pending(String),
    /// Reached a state it will never leave
    Failed(String),
}

/// Call `check` until it reports `Ready`, sleeping between attempts
pub async fn poll_until<F, Fut>(policy: WaitPolicy, what: &str, mut check: F) -> ProviderResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Poll>>,
{
    for attempt in 1..=policy.max_attempts {
        match check().await? {
            Poll::Ready => return Ok(()),
            Poll::Failed(state) => {
                return Err(ProviderError::create(format!(
                    "{} ended up in state {}",
                    what, state
                )));
            }
            Poll::Pending(state) => {
                debug!(
                    "{} is {} (attempt {}/{})",
                    what, state, attempt, policy.max_attempts
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(ProviderError::wait_timeout(format!(
        "Timed out waiting for {} after {} attempts",
        what, policy.max_attempts
    )))
}
