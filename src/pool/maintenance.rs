//! Background upkeep: the housekeeper (expiry, idle-trim, bounded
//! validation, minimum replenishment) and the keep-alive validator.
//!
//! Both tasks are spawned when the pool is built, woken on their own
//! intervals, and exit as soon as the pool closes. Failures are logged and
//! never escalate.

use std::sync::Arc;

use rand::Rng;

use crate::pool::connection::SlotState;
use crate::pool::inner::PoolInner;

// cap on validations per housekeeper pass so a large idle pool is not
// pinged all at once
const VALIDATIONS_PER_CYCLE: usize = 5;

pub(crate) fn spawn_housekeeper(pool: Arc<PoolInner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(pool.options.maintenance_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // the first tick fires immediately; skip it so a freshly built pool
        // is not maintained before it is used
        interval.tick().await;

        while !pool.is_closed() {
            interval.tick().await;

            if pool.is_closed() {
                break;
            }

            run_cycle(&pool).await;
        }
    })
}

async fn run_cycle(pool: &Arc<PoolInner>) {
    expire_by_lifetime(pool).await;
    trim_idle(pool).await;
    validate_stale(pool).await;
    replenish_minimum(pool).await;
}

async fn expire_by_lifetime(pool: &Arc<PoolInner>) {
    let max_lifetime = match pool.options.max_lifetime {
        Some(max_lifetime) => max_lifetime,
        None => return,
    };

    for slot in pool.slots() {
        if slot.age() <= max_lifetime {
            continue;
        }

        if let Some(conn) = pool.try_reserve(&slot) {
            log::debug!(
                "closing connection {}: exceeded max lifetime (age {:?})",
                slot.id,
                slot.age()
            );

            pool.close_and_forget(slot, conn).await;
        } else if slot.state() == SlotState::InUse {
            // condemned; the release path will close it
            slot.force_state(SlotState::Removed);
        }
    }
}

async fn trim_idle(pool: &Arc<PoolInner>) {
    let idle_timeout = match pool.options.idle_timeout {
        Some(idle_timeout) => idle_timeout,
        None => return,
    };

    for slot in pool.slots() {
        if pool.size() <= pool.options.min_connections {
            break;
        }

        if slot.state() != SlotState::Idle || slot.idle_for() <= idle_timeout {
            continue;
        }

        if let Some(conn) = pool.try_reserve(&slot) {
            log::debug!(
                "closing connection {}: idle for {:?}",
                slot.id,
                slot.idle_for()
            );

            pool.close_and_forget(slot, conn).await;
        }
    }
}

async fn validate_stale(pool: &Arc<PoolInner>) {
    let mut validated = 0;

    for slot in pool.slots() {
        if validated >= VALIDATIONS_PER_CYCLE {
            break;
        }

        if slot.state() != SlotState::Idle
            || slot.since_validated() <= pool.options.keepalive_time
        {
            continue;
        }

        if let Some(conn) = pool.try_reserve(&slot) {
            validated += 1;

            match pool.validate(conn).await {
                Some(conn) => {
                    slot.touch_validated();
                    pool.hand_back(slot, conn);
                }

                None => {
                    log::info!("closing connection {}: failed keep-alive validation", slot.id);
                    slot.force_state(SlotState::Removed);
                    pool.forget_slot(&slot);
                }
            }
        }
    }
}

async fn replenish_minimum(pool: &Arc<PoolInner>) {
    while !pool.is_closed() && pool.size() < pool.options.min_connections {
        if let Err(err) = pool.create_idle_connection().await {
            // transient failures are retried on the next cycle
            log::warn!("failed to replenish pool to its minimum size: {}", err);
            break;
        }
    }
}

/// Keep-alive: periodically validate every stale idle connection, on an
/// interval jittered by up to ±20% so that multiple pools do not ping in
/// lockstep.
pub(crate) fn spawn_keepalive(pool: Arc<PoolInner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let jitter = rand::thread_rng().gen_range(0.8..=1.2);

            // floor the interval so a zero keep-alive setting (validate on
            // every acquire) does not turn this loop into a busy spin
            let sleep = pool
                .options
                .keepalive_time
                .mul_f64(jitter)
                .max(std::time::Duration::from_millis(10));

            tokio::time::sleep(sleep).await;

            if pool.is_closed() {
                break;
            }

            for slot in pool.slots() {
                if pool.is_closed() {
                    break;
                }

                if slot.state() != SlotState::Idle
                    || slot.since_validated() <= pool.options.keepalive_time
                {
                    continue;
                }

                if let Some(conn) = pool.try_reserve(&slot) {
                    match pool.validate(conn).await {
                        Some(conn) => {
                            slot.touch_validated();
                            pool.hand_back(slot, conn);
                        }

                        None => {
                            log::info!(
                                "closing connection {}: failed keep-alive validation",
                                slot.id
                            );
                            slot.force_state(SlotState::Removed);
                            pool.forget_slot(&slot);
                        }
                    }
                }
            }
        }
    })
}
