//! Adaptive sizing: grow ahead of demand, shrink when the pool sits idle.
//!
//! Works from a sliding window of recent observations rather than a single
//! reading, and holds a cooldown between resizes so the pool does not
//! oscillate. Acquisition is always bounded by `max_connections`; the sizer
//! only changes how many spare connections are kept warm.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pool::connection::SlotState;
use crate::pool::inner::PoolInner;

const WINDOW: usize = 10;
const COOLDOWN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
struct Observation {
    utilization: f64,
    wait_queue: usize,
    total: u32,
    idle: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Grow(u32),
    Shrink(u32),
    Hold,
}

#[derive(Debug, Default)]
struct Sizer {
    window: VecDeque<Observation>,
    consecutive_high: u32,
    consecutive_low: u32,
    last_resize: Option<Instant>,
}

impl Sizer {
    fn observe(&mut self, observation: Observation, min: u32) -> Decision {
        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(observation);

        let total = observation.total;
        let avg_utilization =
            self.window.iter().map(|o| o.utilization).sum::<f64>() / self.window.len() as f64;
        let avg_wait_queue =
            self.window.iter().map(|o| o.wait_queue).sum::<usize>() as f64 / self.window.len() as f64;

        // saturation: act on the instantaneous reading alone
        if observation.utilization > 0.95
            || observation.wait_queue as f64 > 0.25 * f64::from(total)
        {
            self.consecutive_high = 0;
            self.consecutive_low = 0;
            return self.gated(Decision::Grow((5).max(total / 2)));
        }

        if avg_utilization > 0.8 || avg_wait_queue > 0.1 * f64::from(total) {
            self.consecutive_high += 1;
            self.consecutive_low = 0;

            if self.consecutive_high >= 2 {
                return self.gated(Decision::Grow((2).max(total / 5)));
            }

            return Decision::Hold;
        }

        self.consecutive_high = 0;

        let idle = observation.idle as u32;

        if avg_utilization < 0.2 && total > min {
            self.consecutive_low += 1;

            if self.consecutive_low >= 3 {
                let amount = if avg_utilization < 0.1 {
                    (2).max(idle / 2)
                } else {
                    (1).max(idle / 5)
                };

                return self.gated(Decision::Shrink(amount));
            }

            return Decision::Hold;
        }

        self.consecutive_low = 0;

        Decision::Hold
    }

    // resizes are rate limited; a gated decision resets nothing so the
    // pressure is still visible on the next pass
    fn gated(&mut self, decision: Decision) -> Decision {
        if let Some(last) = self.last_resize {
            if last.elapsed() < COOLDOWN {
                return Decision::Hold;
            }
        }

        self.last_resize = Some(Instant::now());

        match decision {
            Decision::Grow(_) | Decision::Shrink(_) => {
                self.consecutive_high = 0;
                self.consecutive_low = 0;
            }
            Decision::Hold => {}
        }

        decision
    }
}

pub(crate) fn spawn_sizer(pool: Arc<PoolInner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sizer = Sizer::default();
        let mut interval = tokio::time::interval(pool.options.adaptive_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        interval.tick().await;

        while !pool.is_closed() {
            interval.tick().await;

            if pool.is_closed() {
                break;
            }

            let status = pool.status();
            let total = status.size;
            let idle = status.idle;
            let in_use = (total as usize).saturating_sub(idle);

            let observation = Observation {
                utilization: if total == 0 {
                    0.0
                } else {
                    in_use as f64 / f64::from(total)
                },
                wait_queue: status.waiters,
                total,
                idle,
            };

            match sizer.observe(observation, pool.options.min_connections) {
                Decision::Grow(amount) => {
                    let amount =
                        amount.min(pool.options.max_connections.saturating_sub(total));

                    if amount > 0 {
                        log::info!(
                            "adaptive sizing: growing pool by {} (utilization {:.2}, waiters {})",
                            amount,
                            observation.utilization,
                            observation.wait_queue,
                        );

                        pool.target_size.store(total + amount, Ordering::Relaxed);

                        for _ in 0..amount {
                            if pool.create_idle_connection().await.is_err() {
                                break;
                            }
                        }
                    }
                }

                Decision::Shrink(amount) => {
                    let floor = pool.options.min_connections;
                    let amount = amount.min(total.saturating_sub(floor));

                    if amount > 0 {
                        log::info!(
                            "adaptive sizing: shrinking pool by {} (utilization {:.2})",
                            amount,
                            observation.utilization,
                        );

                        pool.target_size
                            .store(total.saturating_sub(amount), Ordering::Relaxed);

                        let mut closed = 0;

                        for slot in pool.slots() {
                            if closed >= amount || pool.size() <= floor {
                                break;
                            }

                            if slot.state() != SlotState::Idle {
                                continue;
                            }

                            if let Some(conn) = pool.try_reserve(&slot) {
                                pool.close_and_forget(slot, conn).await;
                                closed += 1;
                            }
                        }
                    }
                }

                Decision::Hold => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Decision, Observation, Sizer};

    fn observation(utilization: f64, wait_queue: usize, total: u32, idle: usize) -> Observation {
        Observation {
            utilization,
            wait_queue,
            total,
            idle,
        }
    }

    #[test]
    fn saturation_grows_immediately() {
        let mut sizer = Sizer::default();

        assert_eq!(
            sizer.observe(observation(0.98, 0, 10, 0), 0),
            Decision::Grow(5)
        );
    }

    #[test]
    fn a_deep_wait_queue_grows_immediately() {
        let mut sizer = Sizer::default();

        assert_eq!(
            sizer.observe(observation(0.5, 6, 20, 0), 0),
            Decision::Grow(10)
        );
    }

    #[test]
    fn sustained_high_utilization_needs_two_observations() {
        let mut sizer = Sizer::default();

        assert_eq!(sizer.observe(observation(0.85, 0, 20, 3), 0), Decision::Hold);
        assert_eq!(
            sizer.observe(observation(0.85, 0, 20, 3), 0),
            Decision::Grow(4)
        );
    }

    #[test]
    fn sustained_idleness_needs_three_observations() {
        let mut sizer = Sizer::default();

        for _ in 0..2 {
            assert_eq!(
                sizer.observe(observation(0.05, 0, 10, 8), 2),
                Decision::Hold
            );
        }

        assert_eq!(
            sizer.observe(observation(0.05, 0, 10, 8), 2),
            Decision::Shrink(4)
        );
    }

    #[test]
    fn mild_idleness_shrinks_gently() {
        let mut sizer = Sizer::default();

        for _ in 0..2 {
            assert_eq!(
                sizer.observe(observation(0.15, 0, 10, 8), 2),
                Decision::Hold
            );
        }

        assert_eq!(
            sizer.observe(observation(0.15, 0, 10, 8), 2),
            Decision::Shrink(1)
        );
    }

    #[test]
    fn the_cooldown_holds_back_to_back_resizes() {
        let mut sizer = Sizer::default();

        assert_eq!(
            sizer.observe(observation(0.98, 0, 10, 0), 0),
            Decision::Grow(5)
        );

        // immediately saturated again, but within the cooldown
        assert_eq!(sizer.observe(observation(0.98, 0, 15, 0), 0), Decision::Hold);
    }

    #[test]
    fn recovery_resets_the_low_streak() {
        let mut sizer = Sizer::default();

        sizer.observe(observation(0.05, 0, 10, 8), 2);
        sizer.observe(observation(0.05, 0, 10, 8), 2);

        // a burst of traffic arrives
        assert_eq!(sizer.observe(observation(0.5, 0, 10, 4), 2), Decision::Hold);

        // idleness must re-accumulate from scratch
        assert_eq!(sizer.observe(observation(0.05, 0, 10, 8), 2), Decision::Hold);
    }
}
