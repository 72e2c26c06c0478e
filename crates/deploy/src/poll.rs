//! Poll-until-ready loop.
//!
//! Blocking: each lifecycle phase runs to completion before the
//! next begins, so a probe simply sleeps between attempts.

use std::time::Duration;

use tracing::info;

use crate::error::{DeployError, Result};

/// Delay and try budget for a readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patience {
    /// Pause between unsuccessful probes.
    pub delay: Duration,
    /// Maximum number of probe invocations.
    pub tries: u32,
}

impl Default for Patience {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            tries: 10,
        }
    }
}

impl Patience {
    /// Budget with the default 10 second delay and `tries` attempts.
    #[must_use]
    pub fn tries(tries: u32) -> Self {
        Self {
            tries,
            ..Self::default()
        }
    }

    /// Budget for external load-balancer address assignment.
    #[must_use]
    pub fn load_balancer() -> Self {
        Self::tries(30)
    }

    /// Budget for pods to exit after their owner is deleted.
    #[must_use]
    pub fn pod_exit() -> Self {
        Self::tries(60)
    }

    /// Replace the delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Call `probe` until it yields a value or the budget runs out.
///
/// The first `Some` is returned immediately, without a trailing sleep. A
/// probe error aborts the loop and propagates unchanged. After
/// `patience.tries` empty results the loop fails with
/// [`DeployError::Timeout`] carrying the try count and delay.
///
/// # Errors
///
/// Returns the probe's own error, or `Timeout` once the budget is spent.
pub fn wait_for<T, F>(what: &str, patience: Patience, mut probe: F) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let tries = patience.tries.max(1);
    for attempt in 1..=tries {
        if let Some(value) = probe()? {
            return Ok(value);
        }
        if attempt < tries {
            info!(
                what,
                attempt,
                tries,
                delay_secs = patience.delay.as_secs(),
                "Waiting"
            );
            std::thread::sleep(patience.delay);
        }
    }
    Err(DeployError::Timeout {
        what: what.to_string(),
        tries,
        delay_secs: patience.delay.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(tries: u32) -> Patience {
        Patience::tries(tries).with_delay(Duration::ZERO)
    }

    #[test]
    fn test_returns_first_value() {
        let mut calls = 0;
        let value = wait_for("probe", quick(5), || {
            calls += 1;
            Ok(if calls == 2 { Some("ready") } else { None })
        })
        .unwrap();
        assert_eq!(value, "ready");
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_timeout_after_exact_tries() {
        let mut calls = 0;
        let err = wait_for::<(), _>("probe", quick(3), || {
            calls += 1;
            Ok(None)
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        match err {
            DeployError::Timeout {
                tries, delay_secs, ..
            } => {
                assert_eq!(tries, 3);
                assert_eq!(delay_secs, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_probe_error_propagates() {
        let mut calls = 0;
        let err = wait_for::<(), _>("probe", quick(5), || {
            calls += 1;
            Err(DeployError::Other("boom".into()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_budgets() {
        assert_eq!(Patience::default().tries, 10);
        assert_eq!(Patience::default().delay, Duration::from_secs(10));
        assert_eq!(Patience::load_balancer().tries, 30);
        assert_eq!(Patience::pod_exit().tries, 60);
    }
}
