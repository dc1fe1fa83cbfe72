use std::time::{Duration, Instant};

use log::info;

use crate::{
    error::Error,
    types::{Server, Session},
};

/// Source of time for [`wait_for_approval`].
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// The real clock. Sleeping blocks the whole process.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    /// `None` waits until the operator interrupts the process.
    pub max_wait: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_wait: None,
        }
    }
}

/// Blocks until the server no longer has a certificate request pending.
///
/// `refresh_status` is called once per round and must fetch the full server
/// state; the last state seen is returned.
pub fn wait_for_approval<C, F>(
    session: &Session,
    policy: &WaitPolicy,
    clock: &C,
    mut refresh_status: F,
) -> Result<Server, Error>
where
    C: Clock + ?Sized,
    F: FnMut(&Session) -> Result<Server, Error>,
{
    let started = clock.now();

    loop {
        let server = refresh_status(session)?;
        if !server.csr_pending {
            return Ok(server);
        }

        if let Some(max_wait) = policy.max_wait {
            let waited = clock.now().duration_since(started);
            if waited + policy.poll_interval > max_wait {
                return Err(Error::PollTimeout(waited));
            }
        }

        info!(
            "Certificate request still pending, checking again in {}s",
            policy.poll_interval.as_secs()
        );
        clock.sleep(policy.poll_interval);
    }
}
