//! Bounded connection pool
//!
//! Idle connections are reused LIFO; saturated checkouts queue FIFO and are
//! served by direct hand-off from [`ConnectionPool::checkin`]. Every state
//! change happens under one `parking_lot` mutex, and the lock is never held
//! across an `.await`: connections are opened outside it against a slot
//! reserved in `opening`.

use crate::config::PoolConfig;
use crate::engine::Database;
use crate::error::{DbError, DbResult};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Derefs to the engine connection. Hand it back with
/// [`ConnectionPool::checkin`]; dropping it instead leaks its slot until the
/// pool is drained.
#[derive(Debug)]
pub struct PooledConnection<C> {
    id: ConnectionId,
    inner: C,
}

impl<C> PooledConnection<C> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub available: usize,
    pub active: usize,
    /// Slots reserved by connections still being opened
    pub opening: usize,
    pub waiting: usize,
    pub max: usize,
}

/// What a queued checkout receives.
enum Grant<C> {
    Connection(PooledConnection<C>),
    /// A freed slot, already counted in `opening`; the waiter opens its own
    /// connection.
    Permit,
}

type GrantSender<C> = oneshot::Sender<DbResult<Grant<C>>>;
type GrantReceiver<C> = oneshot::Receiver<DbResult<Grant<C>>>;

struct Waiter<C> {
    id: u64,
    sender: GrantSender<C>,
}

struct PoolState<C> {
    /// Idle connections; the most recently returned is on top
    available: Vec<PooledConnection<C>>,
    active: HashSet<ConnectionId>,
    opening: usize,
    waiters: VecDeque<Waiter<C>>,
    next_waiter_id: u64,
    drained: bool,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            available: Vec::new(),
            active: HashSet::new(),
            opening: 0,
            waiters: VecDeque::new(),
            next_waiter_id: 0,
            drained: false,
        }
    }

    fn total(&self) -> usize {
        self.available.len() + self.active.len() + self.opening
    }

    fn enqueue(&mut self) -> (u64, GrantReceiver<C>) {
        let (sender, receiver) = oneshot::channel();
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter { id, sender });
        (id, receiver)
    }

    fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Hand an untracked connection to the oldest live waiter, or shelve it.
    fn shelve(&mut self, mut conn: PooledConnection<C>) {
        while let Some(waiter) = self.waiters.pop_front() {
            let id = conn.id;
            self.active.insert(id);
            match waiter.sender.send(Ok(Grant::Connection(conn))) {
                Ok(()) => {
                    debug!(connection = %id, waiter = waiter.id, "handed connection to waiter");
                    return;
                }
                Err(Ok(Grant::Connection(returned))) => {
                    self.active.remove(&id);
                    conn = returned;
                }
                Err(_) => {
                    self.active.remove(&id);
                    return;
                }
            }
        }
        self.available.push(conn);
    }

    /// A slot was freed without a connection to hand over: let the oldest
    /// waiter open one.
    fn release_slot(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            self.opening += 1;
            let id = waiter.id;
            if waiter.sender.send(Ok(Grant::Permit)).is_ok() {
                debug!(waiter = id, "granted connection permit to waiter");
                return;
            }
            self.opening -= 1;
        }
    }
}

struct Shared<D: Database> {
    database: D,
    config: PoolConfig,
    state: Mutex<PoolState<D::Connection>>,
}

/// Concurrency-safe bounded pool of engine connections.
///
/// Cheap to clone; clones share the same pool.
pub struct ConnectionPool<D: Database> {
    shared: Arc<Shared<D>>,
}

impl<D: Database> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: Database> fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<D: Database> ConnectionPool<D> {
    /// Validate `config`, pre-warm `min_connections` and load configured
    /// extensions.
    pub async fn new(database: D, config: PoolConfig) -> DbResult<Self> {
        config.validate()?;

        let pool = Self {
            shared: Arc::new(Shared {
                database,
                config,
                state: Mutex::new(PoolState::new()),
            }),
        };

        pool.prewarm().await?;
        for name in &pool.shared.config.extensions {
            pool.load_extension(name).await?;
        }

        info!(
            max_connections = pool.shared.config.max_connections,
            idle = pool.status().available,
            extensions = pool.shared.config.extensions.len(),
            "connection pool ready"
        );
        Ok(pool)
    }

    async fn prewarm(&self) -> DbResult<()> {
        let target = self.shared.config.min_connections;
        for _ in 0..target {
            self.shared.state.lock().opening += 1;
            let conn = self.open_reserved().await?;
            self.checkin(conn);
        }
        if target > 0 {
            info!(connections = target, "pre-warmed connection pool");
        }
        Ok(())
    }

    /// Take a connection: idle first, then a new one while under capacity,
    /// otherwise wait in line until a check-in or the checkout timeout.
    pub async fn checkout(&self) -> DbResult<PooledConnection<D::Connection>> {
        let queued = {
            let mut state = self.shared.state.lock();
            if state.drained {
                return Err(DbError::ConnectionPoolExhausted);
            }

            if let Some(conn) = state.available.pop() {
                state.active.insert(conn.id);
                debug!(connection = %conn.id, "checked out idle connection");
                return Ok(conn);
            }

            if state.total() < self.shared.config.max_connections {
                state.opening += 1;
                None
            } else {
                let (id, receiver) = state.enqueue();
                debug!(
                    waiter = id,
                    waiting = state.waiters.len(),
                    "pool saturated, queued checkout"
                );
                Some((id, receiver))
            }
        };

        match queued {
            None => self.open_reserved().await,
            Some((id, receiver)) => self.wait_for_grant(id, receiver).await,
        }
    }

    async fn wait_for_grant(
        &self,
        waiter_id: u64,
        receiver: GrantReceiver<D::Connection>,
    ) -> DbResult<PooledConnection<D::Connection>> {
        let timeout = self.shared.config.checkout_timeout();
        let mut pending = PendingCheckout {
            shared: &self.shared,
            waiter_id,
            receiver,
            settled: false,
        };

        let grant = match tokio::time::timeout(timeout, &mut pending.receiver).await {
            Ok(Ok(grant)) => grant,
            Ok(Err(_)) => Err(DbError::ConnectionPoolExhausted),
            Err(_) => {
                let still_queued = self.shared.state.lock().remove_waiter(waiter_id);
                if still_queued {
                    pending.settled = true;
                    warn!(
                        waiter = waiter_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "timed out waiting for a connection"
                    );
                    return Err(DbError::ConnectionTimeout(timeout));
                }
                // Granted before the timer's cleanup took the lock
                match pending.receiver.try_recv() {
                    Ok(grant) => grant,
                    Err(_) => Err(DbError::ConnectionPoolExhausted),
                }
            }
        };
        pending.settled = true;

        match grant? {
            Grant::Connection(conn) => {
                debug!(connection = %conn.id, waiter = waiter_id, "received handed-off connection");
                Ok(conn)
            }
            Grant::Permit => self.open_reserved().await,
        }
    }

    /// Open a connection for a slot already counted in `opening`; on success
    /// it is tracked as active.
    async fn open_reserved(&self) -> DbResult<PooledConnection<D::Connection>> {
        let mut reservation = SlotReservation {
            shared: &self.shared,
            armed: true,
        };
        let result = self.shared.database.open_connection().await;
        reservation.armed = false;

        let mut state = self.shared.state.lock();
        state.opening -= 1;
        let inner = match result {
            Ok(inner) => inner,
            Err(err) => {
                warn!(error = %err, "failed to open connection");
                state.release_slot();
                return Err(err);
            }
        };
        if state.drained {
            return Err(DbError::ConnectionPoolExhausted);
        }

        let conn = PooledConnection {
            id: ConnectionId::next(),
            inner,
        };
        state.active.insert(conn.id);
        debug!(connection = %conn.id, active = state.active.len(), "opened connection");
        Ok(conn)
    }

    /// Return a connection. The oldest waiter receives it directly; with no
    /// waiters it goes back on the idle stack. Connections the pool is not
    /// tracking (already returned, or checked out before a drain) are
    /// ignored.
    pub fn checkin(&self, conn: PooledConnection<D::Connection>) {
        let mut state = self.shared.state.lock();
        if !state.active.remove(&conn.id) {
            warn!(connection = %conn.id, "ignoring check-in of untracked connection");
            return;
        }
        debug!(
            connection = %conn.id,
            waiting = state.waiters.len(),
            "checked in connection"
        );
        state.shelve(conn);
    }

    /// Close a checked-out connection instead of returning it, freeing its
    /// slot for the next waiter.
    pub fn discard(&self, conn: PooledConnection<D::Connection>) {
        let mut state = self.shared.state.lock();
        if state.active.remove(&conn.id) {
            debug!(connection = %conn.id, "discarded connection");
            state.release_slot();
        }
    }

    /// Reject every waiter with [`DbError::ConnectionPoolExhausted`] and
    /// forget all connections. Later checkouts fail immediately.
    pub fn drain(&self) {
        let (idle, active, rejected) = {
            let mut state = self.shared.state.lock();
            state.drained = true;

            let waiters = std::mem::take(&mut state.waiters);
            let rejected = waiters.len();
            for waiter in waiters {
                let _ = waiter.sender.send(Err(DbError::ConnectionPoolExhausted));
            }

            let active = state.active.len();
            state.active.clear();
            (std::mem::take(&mut state.available), active, rejected)
        };

        info!(
            rejected,
            closed = idle.len() + active,
            "connection pool drained"
        );
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            available: state.available.len(),
            active: state.active.len(),
            opening: state.opening,
            waiting: state.waiters.len(),
            max: self.shared.config.max_connections,
        }
    }

    pub fn is_drained(&self) -> bool {
        self.shared.state.lock().drained
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn database(&self) -> &D {
        &self.shared.database
    }
}

/// Releases a reserved slot if connection opening is cancelled.
struct SlotReservation<'a, D: Database> {
    shared: &'a Shared<D>,
    armed: bool,
}

impl<D: Database> Drop for SlotReservation<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.state.lock();
            state.opening -= 1;
            state.release_slot();
        }
    }
}

/// A queued checkout. If the caller stops waiting before it settles, the
/// waiter leaves the queue and anything already granted goes back.
struct PendingCheckout<'a, D: Database> {
    shared: &'a Shared<D>,
    waiter_id: u64,
    receiver: GrantReceiver<D::Connection>,
    settled: bool,
}

impl<D: Database> Drop for PendingCheckout<'_, D> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.shared.state.lock();
        if state.remove_waiter(self.waiter_id) {
            debug!(waiter = self.waiter_id, "cancelled checkout left the queue");
            return;
        }

        self.receiver.close();
        match self.receiver.try_recv() {
            Ok(Ok(Grant::Connection(conn))) => {
                debug!(connection = %conn.id, "reclaimed connection from cancelled checkout");
                state.active.remove(&conn.id);
                state.shelve(conn);
            }
            Ok(Ok(Grant::Permit)) => {
                state.opening -= 1;
                state.release_slot();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryDatabase;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn conn(n: u64) -> PooledConnection<u64> {
        PooledConnection {
            id: ConnectionId::next(),
            inner: n,
        }
    }

    #[test]
    fn test_shelve_prefers_oldest_waiter() {
        let mut state = PoolState::new();
        let (_, mut first) = state.enqueue();
        let (_, mut second) = state.enqueue();

        let c = conn(7);
        let id = c.id;
        state.shelve(c);

        match first.try_recv() {
            Ok(Ok(Grant::Connection(got))) => assert_eq!(got.id, id),
            _ => panic!("oldest waiter should receive the connection"),
        }
        assert!(second.try_recv().is_err());
        assert!(state.active.contains(&id));
        assert!(state.available.is_empty());
    }

    #[test]
    fn test_shelve_skips_abandoned_waiters() {
        let mut state = PoolState::new();
        let (_, abandoned) = state.enqueue();
        drop(abandoned);

        let c = conn(1);
        let id = c.id;
        state.shelve(c);

        assert!(state.waiters.is_empty());
        assert!(!state.active.contains(&id));
        assert_eq!(state.available.len(), 1);
    }

    #[test]
    fn test_release_slot_grants_permit() {
        let mut state: PoolState<u64> = PoolState::new();
        let (_, abandoned) = state.enqueue();
        let (_, mut live) = state.enqueue();
        drop(abandoned);

        state.release_slot();

        assert!(matches!(live.try_recv(), Ok(Ok(Grant::Permit))));
        assert_eq!(state.opening, 1);
        assert!(state.waiters.is_empty());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn test_checkin_wakes_pending_checkout() {
        let pool = ConnectionPool::new(MemoryDatabase::new(), PoolConfig::new(1))
            .await
            .unwrap();
        let held = pool.checkout().await.unwrap();
        let id = held.id();

        let mut waiting = tokio_test::task::spawn(pool.checkout());
        tokio_test::assert_pending!(waiting.poll());
        assert_eq!(pool.status().waiting, 1);

        pool.checkin(held);
        assert!(waiting.is_woken());
        let conn = tokio_test::assert_ready_ok!(waiting.poll());
        assert_eq!(conn.id(), id);
        assert_eq!(pool.status().waiting, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_untracked_checkin_is_ignored() {
        let pool = ConnectionPool::new(MemoryDatabase::new(), PoolConfig::new(2))
            .await
            .unwrap();
        let conn = pool.checkout().await.unwrap();
        pool.drain();

        pool.checkin(conn);

        assert_eq!(pool.status().available, 0);
        assert!(logs_contain("ignoring check-in of untracked connection"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_timeout_is_logged() {
        let config = PoolConfig::new(1).with_checkout_timeout(Duration::from_millis(50));
        let pool = ConnectionPool::new(MemoryDatabase::new(), config)
            .await
            .unwrap();
        let _held = pool.checkout().await.unwrap();

        let err = pool.checkout().await.unwrap_err();

        assert_eq!(err, DbError::ConnectionTimeout(Duration::from_millis(50)));
        assert!(logs_contain("timed out waiting for a connection"));
    }
}
