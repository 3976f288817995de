use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_channel::oneshot;

use crate::connection::MySqlConnection;
use crate::error::{Error, PoolStatus, Result};
use crate::options::MySqlConnectOptions;
use crate::pool::breaker::CircuitBreaker;
use crate::pool::connection::{PoolConnection, PoolSlot, SlotState};
use crate::pool::metrics::PoolMetrics;
use crate::pool::options::PoolOptions;

// how long `close` waits for in-use connections to come home before
// abandoning them to their holders
const CLOSE_GRACE: Duration = Duration::from_secs(10);

/// A connection released while a waiter was queued is handed to the waiter
/// directly, never parked idle in between.
struct Handoff {
    slot: Arc<PoolSlot>,
    conn: MySqlConnection,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Handoff>,
}

/// The single compound state of the pool. The idle queue, the slot list,
/// and the wait queue always change together, under one lock, to preserve
/// the membership invariants between them.
struct PoolState {
    slots: Vec<Arc<PoolSlot>>,

    // ids of slots in the `Idle` state; most recently used at the back
    idle: VecDeque<u32>,

    // strictly first-in-first-out
    waiters: VecDeque<Waiter>,

    // connections being opened right now; counted against max
    pending_creates: u32,

    next_slot_id: u32,
}

pub(crate) struct PoolInner {
    pub(crate) options: PoolOptions,
    pub(crate) connect_options: MySqlConnectOptions,

    state: Mutex<PoolState>,
    closed: AtomicBool,
    next_waiter_id: AtomicU64,

    pub(crate) metrics: PoolMetrics,
    pub(crate) breaker: CircuitBreaker,

    // the sizer's current growth target; acquisition itself is bounded by
    // `options.max_connections`
    pub(crate) target_size: AtomicU32,
}

enum Plan {
    Reuse(Arc<PoolSlot>, MySqlConnection),
    Create,
    Wait(oneshot::Receiver<Handoff>, u64),
}

impl PoolInner {
    pub(crate) fn new(options: PoolOptions, connect_options: MySqlConnectOptions) -> Arc<Self> {
        let breaker = CircuitBreaker::new(
            options.breaker_max_failures,
            options.breaker_reset_timeout,
            options.breaker_backoff_factor,
            options.breaker_max_reset_timeout,
        );

        let min = options.min_connections;

        Arc::new(Self {
            options,
            connect_options,
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                pending_creates: 0,
                next_slot_id: 1,
            }),
            closed: AtomicBool::new(false),
            next_waiter_id: AtomicU64::new(1),
            metrics: PoolMetrics::default(),
            breaker,
            target_size: AtomicU32::new(min),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool state poisoned")
    }

    pub(crate) fn size(&self) -> u32 {
        let state = self.lock();
        state.slots.len() as u32 + state.pending_creates
    }

    pub(crate) fn num_idle(&self) -> usize {
        self.lock().idle.len()
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let state = self.lock();

        PoolStatus {
            size: state.slots.len() as u32 + state.pending_creates,
            idle: state.idle.len(),
            waiters: state.waiters.len(),
        }
    }

    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<PoolConnection> {
        let started = Instant::now();
        let deadline = started + self.options.acquire_timeout;

        loop {
            if self.is_closed() {
                return Err(Error::PoolClosed);
            }

            let plan = {
                let mut state = self.lock();

                if let Some((slot, conn)) = Self::pop_idle(&mut state) {
                    Plan::Reuse(slot, conn)
                } else if state.slots.len() as u32 + state.pending_creates
                    < self.options.max_connections
                {
                    state.pending_creates += 1;
                    Plan::Create
                } else {
                    let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(Waiter { id, tx });
                    Plan::Wait(rx, id)
                }
            };

            match plan {
                Plan::Reuse(slot, conn) => {
                    if let Some(conn) = self.validate_for_checkout(&slot, conn).await {
                        return Ok(self.checkout(slot, conn, started));
                    }

                    // validation failed; the slot is gone, try again
                }

                Plan::Create => {
                    match self.create_connection(deadline).await {
                        Ok(conn) => {
                            let (slot, conn) = self.register_slot(conn);
                            return Ok(self.checkout(slot, conn, started));
                        }

                        Err(err) => {
                            self.lock().pending_creates -= 1;

                            // ran out the clock opening the connection
                            if matches!(err, Error::Timeout("connect")) {
                                self.metrics.acquire_timeouts.fetch_add(1, Ordering::Relaxed);

                                return Err(Error::PoolTimedOut {
                                    after: self.options.acquire_timeout,
                                    status: self.status(),
                                });
                            }

                            return Err(err);
                        }
                    }
                }

                Plan::Wait(mut rx, waiter_id) => {
                    match tokio::time::timeout_at(deadline.into(), &mut rx).await {
                        Ok(Ok(handoff)) => {
                            // released connections are reset before handoff
                            return Ok(self.checkout(handoff.slot, handoff.conn, started));
                        }

                        // all senders are dropped when the pool closes
                        Ok(Err(_canceled)) => {
                            return Err(Error::PoolClosed);
                        }

                        Err(_elapsed) => {
                            let removed = {
                                let mut state = self.lock();
                                let before = state.waiters.len();
                                state.waiters.retain(|waiter| waiter.id != waiter_id);
                                state.waiters.len() != before
                            };

                            if !removed {
                                // the signal raced our timeout; if the
                                // connection actually arrived, put it back
                                if let Ok(Some(handoff)) = rx.try_recv() {
                                    self.hand_back(handoff.slot, handoff.conn);
                                }
                            }

                            self.metrics.acquire_timeouts.fetch_add(1, Ordering::Relaxed);

                            return Err(Error::PoolTimedOut {
                                after: self.options.acquire_timeout,
                                status: self.status(),
                            });
                        }
                    }
                }
            }
        }
    }

    // pop the most recently used idle connection; skips ids whose
    // reservation is lost to a concurrent keep-alive
    fn pop_idle(state: &mut PoolState) -> Option<(Arc<PoolSlot>, MySqlConnection)> {
        while let Some(id) = state.idle.pop_back() {
            let slot = match state.slots.iter().find(|slot| slot.id == id) {
                Some(slot) => Arc::clone(slot),
                None => continue,
            };

            if !slot.transition(SlotState::Idle, SlotState::Reserved) {
                continue;
            }

            match slot.take_conn() {
                Some(conn) => return Some((slot, conn)),

                None => {
                    // should not happen; drop the inconsistent slot
                    slot.force_state(SlotState::Removed);
                    continue;
                }
            }
        }

        None
    }

    /// Validate a connection on the way out if it has not been validated
    /// within the keepalive window. Returns `None` (and removes the slot)
    /// when the connection proves dead.
    async fn validate_for_checkout(
        self: &Arc<Self>,
        slot: &Arc<PoolSlot>,
        conn: MySqlConnection,
    ) -> Option<MySqlConnection> {
        if slot.since_validated() <= self.options.keepalive_time {
            return Some(conn);
        }

        match self.validate(conn).await {
            Some(conn) => {
                slot.touch_validated();
                Some(conn)
            }

            None => {
                log::info!(
                    "pooled connection {} failed validation on acquire; replacing",
                    slot.id
                );

                slot.force_state(SlotState::Removed);
                self.forget_slot(slot);
                None
            }
        }
    }

    /// Ping bounded by the validation timeout. Consumes the connection on
    /// failure.
    pub(crate) async fn validate(&self, mut conn: MySqlConnection) -> Option<MySqlConnection> {
        self.metrics.validations.fetch_add(1, Ordering::Relaxed);

        let ping = conn.ping();

        let alive = match tokio::time::timeout(self.options.validation_timeout, ping).await {
            Ok(Ok(alive)) => alive,
            Ok(Err(_)) | Err(_) => false,
        };

        if alive {
            Some(conn)
        } else {
            self.metrics
                .validation_failures
                .fetch_add(1, Ordering::Relaxed);
            self.metrics.connections_closed.fetch_add(1, Ordering::Relaxed);

            // the socket closes on drop; a Quit exchange on a dead
            // connection would only block
            drop(conn);

            None
        }
    }

    fn checkout(
        self: &Arc<Self>,
        slot: Arc<PoolSlot>,
        conn: MySqlConnection,
        started: Instant,
    ) -> PoolConnection {
        slot.transition(SlotState::Reserved, SlotState::InUse);
        slot.touch_used();

        self.metrics.record_acquire(started.elapsed());

        let leak_guard = self.options.leak_detection_threshold.map(|threshold| {
            let pool = Arc::clone(self);
            let slot = Arc::clone(&slot);

            tokio::spawn(async move {
                tokio::time::sleep(threshold).await;

                // diagnostic only; the caller may still return it
                pool.metrics.leaks_detected.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "connection {} has been checked out for more than {:?}; \
                     possible connection leak (use_count: {})",
                    slot.id,
                    threshold,
                    slot.use_count.load(Ordering::Relaxed),
                );
            })
        });

        PoolConnection {
            conn: Some(conn),
            slot,
            pool: Arc::clone(self),
            leak_guard,
        }
    }

    async fn create_connection(&self, deadline: Instant) -> Result<MySqlConnection> {
        self.breaker.check()?;

        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(Error::Timeout("connect"))?;

        let connect = MySqlConnection::connect_with(&self.connect_options);

        let result = match tokio::time::timeout(remaining, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("connect")),
        };

        match result {
            Ok(conn) => {
                self.breaker.record_success();
                self.metrics
                    .connections_created
                    .fetch_add(1, Ordering::Relaxed);
                Ok(conn)
            }

            Err(err) => {
                self.breaker.record_failure();
                self.metrics.create_failures.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    // take the new connection through a freshly registered slot; counted
    // under `pending_creates` until the slot is visible
    fn register_slot(&self, conn: MySqlConnection) -> (Arc<PoolSlot>, MySqlConnection) {
        let slot = {
            let mut state = self.lock();
            state.pending_creates -= 1;

            let id = state.next_slot_id;
            state.next_slot_id = state.next_slot_id.wrapping_add(1);

            let slot = Arc::new(PoolSlot::new(id, conn, SlotState::InUse));
            state.slots.push(Arc::clone(&slot));
            slot
        };

        let conn = slot.take_conn().expect("fresh slot without connection");
        slot.touch_validated();

        (slot, conn)
    }

    /// Open a connection for the pool itself (minimum top-up, adaptive
    /// growth) and park it idle, or hand it straight to a waiter.
    pub(crate) async fn create_idle_connection(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.lock();

            if state.slots.len() as u32 + state.pending_creates >= self.options.max_connections {
                return Ok(());
            }

            state.pending_creates += 1;
        }

        match self
            .create_connection(Instant::now() + self.options.acquire_timeout)
            .await
        {
            Ok(conn) => {
                let (slot, conn) = self.register_slot(conn);
                self.hand_back(slot, conn);
                Ok(())
            }

            Err(err) => {
                self.lock().pending_creates -= 1;
                Err(err)
            }
        }
    }

    /// Return a connection to the pool: wake the oldest waiter if one is
    /// queued, otherwise park the connection idle.
    pub(crate) fn hand_back(self: &Arc<Self>, slot: Arc<PoolSlot>, mut conn: MySqlConnection) {
        if self.is_closed() || slot.state() == SlotState::Removed {
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.close_and_forget(slot, conn).await;
            });
            return;
        }

        let mut state = self.lock();

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(Handoff {
                slot: Arc::clone(&slot),
                conn,
            }) {
                // stays in use; ownership moved to the waiter
                Ok(()) => return,

                // that waiter gave up; try the next one
                Err(handoff) => conn = handoff.conn,
            }
        }

        slot.put_conn(conn);
        slot.force_state(SlotState::Idle);
        state.idle.push_back(slot.id);
    }

    /// Drop-path release: reset session state, then hand back (or close if
    /// the pool shut down or the connection was condemned).
    pub(crate) async fn release(self: &Arc<Self>, slot: Arc<PoolSlot>, mut conn: MySqlConnection) {
        if self.is_closed() || slot.state() == SlotState::Removed {
            self.close_and_forget(slot, conn).await;
            return;
        }

        if let Err(err) = conn.reset_session().await {
            log::info!(
                "connection {} failed session reset on release: {}; replacing",
                slot.id,
                err
            );

            slot.force_state(SlotState::Removed);
            self.close_and_forget(slot, conn).await;
            return;
        }

        self.hand_back(slot, conn);
    }

    /// Remove the slot from the pool's records (idle set and slot list, in
    /// the same critical section).
    pub(crate) fn forget_slot(&self, slot: &Arc<PoolSlot>) {
        let mut state = self.lock();
        state.idle.retain(|&id| id != slot.id);
        state.slots.retain(|s| s.id != slot.id);
    }

    pub(crate) async fn close_and_forget(&self, slot: Arc<PoolSlot>, conn: MySqlConnection) {
        slot.force_state(SlotState::Removed);
        self.forget_slot(&slot);

        self.metrics.connections_closed.fetch_add(1, Ordering::Relaxed);

        // best effort; the server learns either way
        let _ = conn.close().await;
    }

    /// Claim a specific idle slot (`Idle -> Reserved`), removing it from
    /// the idle queue. Used by the background tasks.
    pub(crate) fn try_reserve(&self, slot: &Arc<PoolSlot>) -> Option<MySqlConnection> {
        if !slot.transition(SlotState::Idle, SlotState::Reserved) {
            return None;
        }

        let mut state = self.lock();
        state.idle.retain(|&id| id != slot.id);

        match slot.take_conn() {
            Some(conn) => Some(conn),
            None => {
                slot.force_state(SlotState::Removed);
                None
            }
        }
    }

    pub(crate) fn slots(&self) -> Vec<Arc<PoolSlot>> {
        self.lock().slots.clone()
    }

    pub(crate) fn waiters_len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub(crate) async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // fail every queued waiter; dropping the senders wakes them with
        // `PoolClosed`
        let waiters = {
            let mut state = self.lock();
            std::mem::take(&mut state.waiters)
        };
        drop(waiters);

        // close idle connections, most recently used first
        loop {
            let claimed = Self::pop_idle(&mut self.lock());

            match claimed {
                Some((slot, conn)) => {
                    self.close_and_forget(slot, conn).await;
                }
                None => break,
            }
        }

        // wait for checked-out connections to come home; `release` sees the
        // closed flag and closes them
        let deadline = Instant::now() + CLOSE_GRACE;

        while Instant::now() < deadline {
            if self.lock().slots.is_empty() {
                return;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // grace expired: condemn the stragglers so they close on release,
        // and stop tracking them
        let mut state = self.lock();
        for slot in &state.slots {
            slot.force_state(SlotState::Removed);
        }
        state.slots.clear();
        state.idle.clear();
    }
}
