use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::connection::MySqlConnection;
use crate::pool::inner::PoolInner;

/// Lifecycle of a pooled connection.
///
/// Transitions are `Idle -> Reserved -> InUse -> Idle` in normal operation
/// (`Reserved` is the transient claim taken during acquisition or
/// validation), and any state may move to `Removed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SlotState {
    Idle = 0,
    Reserved = 1,
    InUse = 2,
    Removed = 3,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::Idle,
            1 => SlotState::Reserved,
            2 => SlotState::InUse,
            _ => SlotState::Removed,
        }
    }
}

/// The pool's bookkeeping record for one physical connection.
///
/// The state field is the synchronization point: whichever task wins the
/// `Idle -> Reserved` compare-and-swap owns the connection until it puts it
/// back (or removes it).
pub(crate) struct PoolSlot {
    pub(crate) id: u32,

    state: AtomicU8,

    // `None` while the connection is out with a caller or a validator
    conn: Mutex<Option<MySqlConnection>>,

    pub(crate) created_at: Instant,

    // instants as offsets from `created_at`, so they can be atomics
    last_used_micros: AtomicU64,
    last_validated_micros: AtomicU64,

    pub(crate) use_count: AtomicU64,
}

impl PoolSlot {
    pub(crate) fn new(id: u32, conn: MySqlConnection, state: SlotState) -> Self {
        Self {
            id,
            state: AtomicU8::new(state as u8),
            conn: Mutex::new(Some(conn)),
            created_at: Instant::now(),
            last_used_micros: AtomicU64::new(0),
            last_validated_micros: AtomicU64::new(0),
            use_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempt the `from -> to` transition; `false` if another task got
    /// there first.
    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn force_state(&self, to: SlotState) {
        self.state.store(to as u8, Ordering::Release);
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn take_conn(&self) -> Option<MySqlConnection> {
        self.conn.lock().expect("slot poisoned").take()
    }

    pub(crate) fn put_conn(&self, conn: MySqlConnection) {
        *self.conn.lock().expect("slot poisoned") = Some(conn);
    }

    pub(crate) fn touch_used(&self) {
        self.use_count.fetch_add(1, Ordering::Relaxed);
        self.last_used_micros
            .store(self.created_at.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn touch_validated(&self) {
        self.last_validated_micros
            .store(self.created_at.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.age()
            .saturating_sub(Duration::from_micros(self.last_used_micros.load(Ordering::Relaxed)))
    }

    pub(crate) fn since_validated(&self) -> Duration {
        self.age().saturating_sub(Duration::from_micros(
            self.last_validated_micros.load(Ordering::Relaxed),
        ))
    }
}

/// A connection checked out from a [`Pool`][crate::pool::Pool].
///
/// Dereferences to [`MySqlConnection`]. Returned to the pool when dropped;
/// use [`detach`][Self::detach] to keep it past the pool's lifetime.
pub struct PoolConnection {
    pub(crate) conn: Option<MySqlConnection>,
    pub(crate) slot: Arc<PoolSlot>,
    pub(crate) pool: Arc<PoolInner>,

    // present when leak detection is armed for this checkout
    pub(crate) leak_guard: Option<tokio::task::JoinHandle<()>>,
}

impl PoolConnection {
    /// Detach the connection from the pool; the pool forgets it and will
    /// open a replacement as needed.
    pub fn detach(mut self) -> MySqlConnection {
        let conn = self.conn.take().expect("connection already released");

        self.slot.force_state(SlotState::Removed);
        self.pool.forget_slot(&self.slot);

        conn
    }
}

impl std::fmt::Debug for PoolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConnection").finish()
    }
}

impl Deref for PoolConnection {
    type Target = MySqlConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already released")
    }
}

impl DerefMut for PoolConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already released")
    }
}

/// Returns the connection to the pool it was checked out from.
impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(guard) = self.leak_guard.take() {
            guard.abort();
        }

        if let Some(conn) = self.conn.take() {
            let slot = Arc::clone(&self.slot);
            let pool = Arc::clone(&self.pool);

            // the release involves protocol work (session reset); it cannot
            // run inside `drop`
            tokio::spawn(async move {
                pool.release(slot, conn).await;
            });
        }
    }
}
