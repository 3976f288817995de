use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Protects the server from connection storms when it is refusing or
/// failing connections.
///
/// Closed (normal) counts consecutive failures; reaching the limit opens
/// the circuit, which fails creation attempts immediately. After
/// `reset_timeout` a single trial connection is allowed through
/// (half-open); success closes the circuit, failure re-opens it with the
/// timeout multiplied by `backoff_factor`, up to `max_reset_timeout`.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    state: Mutex<State>,
    max_failures: u32,
    reset_timeout: Duration,
    backoff_factor: f64,
    max_reset_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed {
        failures: u32,
    },

    Open {
        until: Instant,
        timeout: Duration,
    },

    // one trial is in flight; everyone else still fails fast
    HalfOpen {
        timeout: Duration,
    },
}

impl CircuitBreaker {
    pub(crate) fn new(
        max_failures: u32,
        reset_timeout: Duration,
        backoff_factor: f64,
        max_reset_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(State::Closed { failures: 0 }),
            max_failures,
            reset_timeout,
            backoff_factor,
            max_reset_timeout,
        }
    }

    /// Ask permission to attempt a connection. `Err(CircuitOpen)` means
    /// fail fast without touching the network.
    pub(crate) fn check(&self) -> Result<()> {
        let mut state = self.state.lock().expect("breaker poisoned");

        match *state {
            State::Closed { .. } => Ok(()),

            State::Open { until, timeout } => {
                let now = Instant::now();

                if now < until {
                    return Err(Error::CircuitOpen {
                        retry_after: until - now,
                    });
                }

                // this caller becomes the half-open trial
                *state = State::HalfOpen { timeout };
                Ok(())
            }

            State::HalfOpen { timeout } => Err(Error::CircuitOpen {
                retry_after: timeout,
            }),
        }
    }

    pub(crate) fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker poisoned");
        *state = State::Closed { failures: 0 };
    }

    pub(crate) fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker poisoned");

        *state = match *state {
            State::Closed { failures } => {
                let failures = failures + 1;

                if failures >= self.max_failures {
                    log::warn!(
                        "opening connection circuit breaker after {} consecutive failures",
                        failures
                    );

                    State::Open {
                        until: Instant::now() + self.reset_timeout,
                        timeout: self.reset_timeout,
                    }
                } else {
                    State::Closed { failures }
                }
            }

            // the half-open trial failed; back off harder
            State::HalfOpen { timeout } | State::Open { timeout, .. } => {
                let timeout = Duration::from_secs_f64(
                    (timeout.as_secs_f64() * self.backoff_factor)
                        .min(self.max_reset_timeout.as_secs_f64()),
                );

                State::Open {
                    until: Instant::now() + timeout,
                    timeout,
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use matches::assert_matches;

    use super::CircuitBreaker;
    use crate::error::Error;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            3,
            Duration::from_millis(50),
            2.0,
            Duration::from_millis(400),
        )
    }

    #[test]
    fn it_opens_after_consecutive_failures() {
        let breaker = breaker();

        for _ in 0..3 {
            assert!(breaker.check().is_ok());
            breaker.record_failure();
        }

        assert_matches!(breaker.check(), Err(Error::CircuitOpen { .. }));
    }

    #[test]
    fn a_success_resets_the_failure_count() {
        let breaker = breaker();

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        // still closed: never hit 3 consecutive
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn it_allows_one_trial_after_the_reset_timeout() {
        let breaker = breaker();

        for _ in 0..3 {
            breaker.record_failure();
        }

        std::thread::sleep(Duration::from_millis(60));

        // first caller becomes the trial; the second still fails fast
        assert!(breaker.check().is_ok());
        assert_matches!(breaker.check(), Err(Error::CircuitOpen { .. }));

        // trial failure doubles the timeout
        breaker.record_failure();
        assert_matches!(
            breaker.check(),
            Err(Error::CircuitOpen { retry_after }) if retry_after > Duration::from_millis(50)
        );
    }

    #[test]
    fn a_successful_trial_closes_the_circuit() {
        let breaker = breaker();

        for _ in 0..3 {
            breaker.record_failure();
        }

        std::thread::sleep(Duration::from_millis(60));

        assert!(breaker.check().is_ok());
        breaker.record_success();

        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }
}
