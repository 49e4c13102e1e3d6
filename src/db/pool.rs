//! Replica-aware database connection pool.
//!
//! The pool owns two disjoint FIFO collections of idle connections, one for
//! the primary (read-write) and one for replicas (read-only), discovered by
//! probing each configured target at startup. Callers request a connection
//! with a read-only intent flag; reads prefer replicas and degrade to the
//! primary, writes only ever get the primary. When nothing eligible is idle,
//! acquisition blocks on a notifier with a bounded timeout. A periodic health
//! check revalidates idle connections and re-establishes lost ones.
//!
//! # Concurrency
//!
//! All pool state lives under a single `std::sync::Mutex` that is never held
//! across an await point. Probes and reconnects run outside the lock; their
//! results are applied to the idle collections atomically afterward, so a
//! connection released by an in-flight handle while a check is running is
//! never lost. Waiting acquirers never spin: they park on a `Notify` that
//! release wakes one of and the health check wakes all of.
//!
//! Leased connections are invisible to the health check until they are
//! released; a connection that dies mid-lease is discovered by the caller's
//! query failing, not preemptively.

use crate::db::connector::{Connector, Role};
use crate::error::{DbError, DbResult};
use std::collections::VecDeque;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Attempts per connection slot during pool construction.
const CONNECT_ATTEMPTS: u32 = 3;
/// Delay between construction connect attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Failed reconnect attempts tolerated per collection per health check cycle.
const RECONNECT_ATTEMPTS: u32 = 2;
/// Delay between health check reconnect attempts.
const RECONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Ordered connection targets. Role is not known in advance; each target
    /// is probed when connections to it are opened.
    pub targets: Vec<String>,
    /// Desired number of connections per target.
    pub pool_size: usize,
    /// Bound on how long an acquire may wait for an idle connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            pool_size: 4,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Idle-connection counts per role, as exposed by [`ConnectionPool::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub primary_idle: usize,
    pub replica_idle: usize,
}

/// A configured target together with its last probed role. Targets that have
/// never been successfully probed stay unclassified and are eligible when
/// refilling either collection.
#[derive(Debug, Clone)]
struct TargetEntry {
    target: String,
    role: Option<Role>,
}

/// State guarded by the pool mutex.
struct PoolState<T> {
    primary_idle: VecDeque<T>,
    replica_idle: VecDeque<T>,
    targets: Vec<TargetEntry>,
}

impl<T> PoolState<T> {
    fn new(targets: &[String]) -> Self {
        Self {
            primary_idle: VecDeque::new(),
            replica_idle: VecDeque::new(),
            targets: targets
                .iter()
                .map(|t| TargetEntry {
                    target: t.clone(),
                    role: None,
                })
                .collect(),
        }
    }

    /// Selection policy: reads take the replica head when one is idle, then
    /// fall back to the primary head; writes only ever take the primary head.
    fn take(&mut self, read_only: bool) -> Option<(T, Role)> {
        if read_only {
            if let Some(conn) = self.replica_idle.pop_front() {
                return Some((conn, Role::Replica));
            }
        }
        if let Some(conn) = self.primary_idle.pop_front() {
            if read_only {
                debug!("no replica available, using primary for read operation");
            }
            return Some((conn, Role::Primary));
        }
        None
    }

    /// Return a connection to the tail of its origin collection.
    fn put(&mut self, conn: T, role: Role) {
        match role {
            Role::Primary => self.primary_idle.push_back(conn),
            Role::Replica => self.replica_idle.push_back(conn),
        }
    }

    fn counts(&self) -> PoolStatus {
        PoolStatus {
            primary_idle: self.primary_idle.len(),
            replica_idle: self.replica_idle.len(),
        }
    }

    /// Record the role a target was observed to have. Last observation wins,
    /// so a failed-over target migrates between refill candidate sets.
    fn record_role(&mut self, target: &str, role: Role) {
        for entry in &mut self.targets {
            if entry.target == target {
                entry.role = Some(role);
            }
        }
    }

    /// Targets eligible for refilling the given collection: those last seen
    /// in that role, plus any never successfully probed.
    fn candidates(&self, want: Role) -> Vec<String> {
        self.targets
            .iter()
            .filter(|e| e.role == Some(want) || e.role.is_none())
            .map(|e| e.target.clone())
            .collect()
    }
}

struct PoolShared<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<PoolState<C::Conn>>,
    /// Parked acquirers. Release notifies one; the health check notifies all.
    available: Notify,
    /// Serializes health check cycles: probes run outside the state lock, so
    /// overlapping cycles would each see a drained pool and refill it twice.
    health_gate: tokio::sync::Mutex<()>,
}

/// Replica-aware connection pool.
///
/// Cheap to clone; all clones share the same state. Inject one instance into
/// every consumer at construction time and drop it on server shutdown.
pub struct ConnectionPool<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("ConnectionPool")
            .field("targets", &self.shared.config.targets.len())
            .field("pool_size", &self.shared.config.pool_size)
            .field("primary_idle", &status.primary_idle)
            .field("replica_idle", &status.replica_idle)
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Build the pool by opening `pool_size` connections to every target.
    ///
    /// Each connection attempt is retried a bounded number of times with a
    /// short backoff; a target that yields nothing is logged and skipped.
    /// Fails only if no target yielded any connection at all.
    pub async fn connect(connector: C, config: PoolConfig) -> DbResult<Self> {
        let mut state = PoolState::new(&config.targets);

        for target in &config.targets {
            for _ in 0..config.pool_size {
                match open_and_classify(&connector, target, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY)
                    .await
                {
                    Some((conn, role, probed)) => {
                        info!(role = %role, "added {} connection", role);
                        if probed {
                            state.record_role(target, role);
                        }
                        state.put(conn, role);
                    }
                    None => {
                        warn!(target = %crate::config::redact_target(target), "giving up on connection");
                    }
                }
            }
        }

        let status = state.counts();
        if status.primary_idle == 0 && status.replica_idle == 0 {
            return Err(DbError::NoConnections);
        }

        info!(
            primary = status.primary_idle,
            replica = status.replica_idle,
            "connection pool initialized"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                connector,
                config,
                state: Mutex::new(state),
                available: Notify::new(),
                health_gate: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Acquire a connection for the given intent.
    ///
    /// Blocks while nothing eligible is idle, up to the configured acquire
    /// timeout; on timeout returns [`DbError::PoolExhausted`] carrying the
    /// idle counts observed at that moment.
    pub async fn acquire(&self, read_only: bool) -> DbResult<PooledConn<C>> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.acquire_timeout;

        loop {
            let notified = shared.available.notified();
            tokio::pin!(notified);
            // Register interest before re-checking so a release that lands
            // between the check and the await is not missed.
            notified.as_mut().enable();

            if let Some((conn, role)) = shared.state.lock().unwrap().take(read_only) {
                return Ok(PooledConn {
                    conn: Some(conn),
                    role,
                    shared: Arc::clone(shared),
                });
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            if tokio::time::timeout(remaining, notified).await.is_err() {
                break;
            }
            // Woken: loop re-runs the same selection. Another acquirer may
            // have taken the connection first, in which case we park again.
        }

        let status = self.status();
        warn!(
            read_only,
            primary_idle = status.primary_idle,
            replica_idle = status.replica_idle,
            "pool exhausted"
        );
        Err(DbError::PoolExhausted {
            read_only,
            primary_idle: status.primary_idle,
            replica_idle: status.replica_idle,
        })
    }

    /// Current idle counts per role.
    pub fn status(&self) -> PoolStatus {
        self.shared.state.lock().unwrap().counts()
    }

    /// Revalidate all idle connections and replace the ones that died.
    ///
    /// Safe to call concurrently with in-flight acquires and releases, and
    /// with itself. Only idle connections are inspected; leased ones are
    /// checked lazily by their holders.
    pub async fn health_check(&self) {
        self.shared.health_check().await;
    }

    /// Spawn the periodic health check task.
    ///
    /// The task holds only a weak reference to the pool and exits on its own
    /// once the last pool handle is dropped.
    pub fn spawn_health_task(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; construction just probed
            // every connection, so skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    debug!("connection pool dropped, health task exiting");
                    return;
                };
                shared.health_check().await;
                drop(shared);
            }
        })
    }

    /// Close every idle connection and empty the pool.
    ///
    /// Connections currently leased are closed when their handles drop the
    /// last pool reference.
    pub async fn close(&self) {
        let (primary, replica) = {
            let mut state = self.shared.state.lock().unwrap();
            (
                mem::take(&mut state.primary_idle),
                mem::take(&mut state.replica_idle),
            )
        };
        for conn in primary.into_iter().chain(replica) {
            self.shared.connector.close(conn).await;
        }
        info!("connection pool closed");
    }
}

impl<C: Connector> PoolShared<C> {
    /// Synchronous return path used by handle drop: push the connection back
    /// onto the tail of its origin collection and wake one waiter.
    fn release(&self, conn: C::Conn, role: Role) {
        {
            let mut state = self.state.lock().unwrap();
            state.put(conn, role);
        }
        self.available.notify_one();
    }

    async fn health_check(&self) {
        let _gate = self.health_gate.lock().await;
        debug!("starting health check");

        // Drain the idle collections under the lock; probe outside it.
        // Acquirers arriving mid-check see empty collections and wait.
        let (drained_primary, drained_replica, primary_candidates, replica_candidates) = {
            let mut state = self.state.lock().unwrap();
            (
                mem::take(&mut state.primary_idle),
                mem::take(&mut state.replica_idle),
                state.candidates(Role::Primary),
                state.candidates(Role::Replica),
            )
        };

        let mut kept_primary = VecDeque::new();
        for mut conn in drained_primary {
            if self.connector.ping(&mut conn).await {
                kept_primary.push_back(conn);
            } else {
                warn!("primary connection failed health check");
                self.connector.close(conn).await;
            }
        }

        let mut kept_replica = VecDeque::new();
        for mut conn in drained_replica {
            if self.connector.ping(&mut conn).await {
                kept_replica.push_back(conn);
            } else {
                warn!("replica connection failed health check");
                self.connector.close(conn).await;
            }
        }

        // Reconnect collections that fell below the per-target size. A fresh
        // connection is admitted under its probed role, wherever that is.
        let mut learned: Vec<(String, Role)> = Vec::new();
        self.refill(
            Role::Primary,
            &mut kept_primary,
            &mut kept_replica,
            &primary_candidates,
            &mut learned,
        )
        .await;
        self.refill(
            Role::Replica,
            &mut kept_primary,
            &mut kept_replica,
            &replica_candidates,
            &mut learned,
        )
        .await;

        // Apply atomically. Extend rather than replace: connections released
        // while the check ran are already queued and must survive.
        let status = {
            let mut state = self.state.lock().unwrap();
            state.primary_idle.append(&mut kept_primary);
            state.replica_idle.append(&mut kept_replica);
            for (target, role) in learned {
                state.record_role(&target, role);
            }
            state.counts()
        };

        info!(
            primary = status.primary_idle,
            replica = status.replica_idle,
            "health check completed"
        );

        // Idle counts changed; pending acquires may be satisfiable now.
        self.available.notify_waiters();
    }

    /// Top up one collection toward the configured per-target size.
    ///
    /// Successful right-role connects are free; connect failures and
    /// wrong-role surprises both count against the per-cycle retry bound, so
    /// a persistently misbehaving target cannot stall the check.
    async fn refill(
        &self,
        want: Role,
        kept_primary: &mut VecDeque<C::Conn>,
        kept_replica: &mut VecDeque<C::Conn>,
        candidates: &[String],
        learned: &mut Vec<(String, Role)>,
    ) {
        let target_size = self.config.pool_size;
        let have = match want {
            Role::Primary => kept_primary.len(),
            Role::Replica => kept_replica.len(),
        };
        if have >= target_size || candidates.is_empty() {
            return;
        }

        info!(role = %want, have, "{} pool is low, attempting to reconnect", want);

        let mut failures = 0u32;
        let mut next = 0usize;
        loop {
            let have = match want {
                Role::Primary => kept_primary.len(),
                Role::Replica => kept_replica.len(),
            };
            if have >= target_size || failures >= RECONNECT_ATTEMPTS {
                break;
            }

            let target = &candidates[next % candidates.len()];
            next += 1;

            match self.connector.connect(target).await {
                Ok(mut conn) => {
                    let role = match self.connector.role(&mut conn).await {
                        Ok(role) => {
                            learned.push((target.clone(), role));
                            role
                        }
                        Err(e) => {
                            warn!(error = %e, "error checking role of reconnected node");
                            Role::Replica
                        }
                    };
                    if role == want {
                        info!(role = %role, "successfully reconnected to {}", role);
                    } else {
                        warn!(
                            wanted = %want,
                            probed = %role,
                            "reconnected node has a different role, admitting it as {}",
                            role
                        );
                        failures += 1;
                    }
                    match role {
                        Role::Primary => kept_primary.push_back(conn),
                        Role::Replica => kept_replica.push_back(conn),
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        error = %e,
                        attempt = failures,
                        "failed to reconnect to {}",
                        want
                    );
                    if failures < RECONNECT_ATTEMPTS {
                        tokio::time::sleep(RECONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }
    }
}

/// Open one connection with bounded retries and classify it by probing.
///
/// Returns the connection, its role, and whether the role probe actually
/// succeeded (a probe failure classifies the connection as a replica, since
/// reading from a misidentified node risks staleness while writing to one is
/// unsafe, but tells us nothing about the target).
async fn open_and_classify<C: Connector>(
    connector: &C,
    target: &str,
    attempts: u32,
    retry_delay: Duration,
) -> Option<(C::Conn, Role, bool)> {
    for attempt in 1..=attempts {
        match connector.connect(target).await {
            Ok(mut conn) => {
                return match connector.role(&mut conn).await {
                    Ok(role) => Some((conn, role, true)),
                    Err(e) => {
                        warn!(error = %e, "error checking database role");
                        Some((conn, Role::Replica, false))
                    }
                };
            }
            Err(e) => {
                warn!(
                    error = %e,
                    attempt,
                    max_attempts = attempts,
                    "failed to create connection"
                );
                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
    None
}

/// A leased connection.
///
/// Holds exclusive ownership of the underlying connection for the duration of
/// the lease, tagged with the role it was drawn under. Dropping the handle
/// returns the connection to its origin collection - exactly once, on every
/// exit path, with no runtime involvement.
pub struct PooledConn<C: Connector> {
    conn: Option<C::Conn>,
    role: Role,
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> PooledConn<C> {
    /// Role of the node this connection is attached to.
    pub fn role(&self) -> Role {
        self.role
    }

    /// True if this connection came from the replica collection.
    pub fn is_replica(&self) -> bool {
        self.role.is_replica()
    }
}

impl<C: Connector> Deref for PooledConn<C> {
    type Target = C::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("BUG: PooledConn used after return to pool")
    }
}

impl<C: Connector> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("BUG: PooledConn used after return to pool")
    }
}

impl<C: Connector> std::fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("role", &self.role)
            .field("leased", &self.conn.is_some())
            .finish()
    }
}

impl<C: Connector> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.role);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct FakeConn(u32);

    #[test]
    fn test_take_prefers_replica_for_reads() {
        let mut state = PoolState::new(&[]);
        state.put(FakeConn(1), Role::Primary);
        state.put(FakeConn(2), Role::Replica);

        let (conn, role) = state.take(true).unwrap();
        assert_eq!(role, Role::Replica);
        assert_eq!(conn, FakeConn(2));
    }

    #[test]
    fn test_take_read_falls_back_to_primary() {
        let mut state = PoolState::new(&[]);
        state.put(FakeConn(1), Role::Primary);

        let (conn, role) = state.take(true).unwrap();
        assert_eq!(role, Role::Primary);
        assert_eq!(conn, FakeConn(1));
    }

    #[test]
    fn test_take_write_never_uses_replica() {
        let mut state = PoolState::new(&[]);
        state.put(FakeConn(1), Role::Replica);

        assert!(state.take(false).is_none());
        // The replica is still there for readers.
        assert_eq!(state.counts().replica_idle, 1);
    }

    #[test]
    fn test_take_is_fifo_within_a_collection() {
        let mut state = PoolState::new(&[]);
        state.put(FakeConn(1), Role::Primary);
        state.put(FakeConn(2), Role::Primary);
        state.put(FakeConn(3), Role::Primary);

        assert_eq!(state.take(false).unwrap().0, FakeConn(1));
        assert_eq!(state.take(false).unwrap().0, FakeConn(2));
        // Returned connections go to the tail.
        state.put(FakeConn(1), Role::Primary);
        assert_eq!(state.take(false).unwrap().0, FakeConn(3));
        assert_eq!(state.take(false).unwrap().0, FakeConn(1));
    }

    #[test]
    fn test_candidates_include_unclassified_targets() {
        let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut state: PoolState<FakeConn> = PoolState::new(&targets);
        state.record_role("a", Role::Primary);
        state.record_role("b", Role::Replica);

        assert_eq!(state.candidates(Role::Primary), vec!["a", "c"]);
        assert_eq!(state.candidates(Role::Replica), vec!["b", "c"]);
    }

    #[test]
    fn test_record_role_last_observation_wins() {
        let targets = vec!["a".to_string()];
        let mut state: PoolState<FakeConn> = PoolState::new(&targets);
        state.record_role("a", Role::Primary);
        state.record_role("a", Role::Replica);

        assert!(state.candidates(Role::Primary).is_empty());
        assert_eq!(state.candidates(Role::Replica), vec!["a"]);
    }

    #[test]
    fn test_counts() {
        let mut state = PoolState::new(&[]);
        state.put(FakeConn(1), Role::Primary);
        state.put(FakeConn(2), Role::Replica);
        state.put(FakeConn(3), Role::Replica);

        assert_eq!(
            state.counts(),
            PoolStatus {
                primary_idle: 1,
                replica_idle: 2
            }
        );
    }
}
