//! Per-host connection pool
//!
//! The pool bounds concurrent exchanges per host and tracks which
//! connections are leased or idle. Sockets themselves belong to the
//! transport; a [`PooledConnection`] is the accounting handle the pipeline
//! holds for the duration of one attempt.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use netweave_common::resilience::{SharedClock, SystemClock};
use netweave_domain::{ConnectionPoolConfig, NetworkError, NetworkResult};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct IdleConnection {
    id: u64,
    idle_since: Instant,
}

#[derive(Debug)]
struct HostState {
    max_connections: usize,
    /// Permits to retire as leases come back after the bound shrank
    owed: usize,
    leased: HashSet<u64>,
    idle: Vec<IdleConnection>,
    created: u64,
    reused: u64,
    closed: u64,
}

struct HostPool {
    host: String,
    semaphore: Arc<Semaphore>,
    state: Mutex<HostState>,
}

impl HostPool {
    fn new(host: &str, max_connections: usize) -> Self {
        Self {
            host: host.to_string(),
            semaphore: Arc::new(Semaphore::new(max_connections)),
            state: Mutex::new(HostState {
                max_connections,
                owed: 0,
                leased: HashSet::new(),
                idle: Vec::new(),
                created: 0,
                reused: 0,
                closed: 0,
            }),
        }
    }

    fn close_stale(state: &mut HostState, now: Instant, keep_alive: Duration) -> usize {
        let before = state.idle.len();
        state.idle.retain(|idle| now.saturating_duration_since(idle.idle_since) < keep_alive);
        let closed = before - state.idle.len();
        state.closed += closed as u64;
        closed
    }

    /// Move the bound to `max` in place. Free permits are retired at once;
    /// the rest are retired as outstanding leases return.
    fn resize(&self, max: usize) {
        let mut state = self.state.lock();
        let current = state.max_connections;
        if max > current {
            let grow = max - current;
            let repaid = grow.min(state.owed);
            state.owed -= repaid;
            self.semaphore.add_permits(grow - repaid);
        } else {
            let mut shrink = current - max;
            while shrink > 0 {
                match self.semaphore.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        shrink -= 1;
                    }
                    Err(_) => break,
                }
            }
            state.owed += shrink;
        }
        state.max_connections = max;
        debug!(host = %self.host, from = current, to = max, owed = state.owed, "per-host bound changed");
    }

    fn return_permit(state: &mut HostState, permit: OwnedSemaphorePermit) {
        if state.owed > 0 {
            state.owed -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}

/// Lease on one connection to a host.
///
/// Hand it back with [`ConnectionPool::release`] to keep the connection for
/// reuse. Dropping it instead closes the connection and frees the slot.
pub struct PooledConnection {
    id: u64,
    reused: bool,
    host: Arc<HostPool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host.host
    }

    /// Whether this lease picked up an idle connection
    pub fn is_reused(&self) -> bool {
        self.reused
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Still holding the permit means release() never ran
        if let Some(permit) = self.permit.take() {
            let mut state = self.host.state.lock();
            if state.leased.remove(&self.id) {
                state.closed += 1;
            }
            HostPool::return_permit(&mut state, permit);
            trace!(host = %self.host.host, connection = self.id, "connection dropped without release");
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("host", &self.host.host)
            .field("reused", &self.reused)
            .finish()
    }
}

/// Snapshot of one host's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPoolStats {
    pub leased: usize,
    pub idle: usize,
    /// Leases that could start right now
    pub available: usize,
    /// Current per-host bound
    pub max_connections: usize,
    pub created: u64,
    pub reused: u64,
    pub closed: u64,
}

/// Connection accounting for every host
pub struct ConnectionPool {
    hosts: DashMap<String, Arc<HostPool>>,
    config: RwLock<ConnectionPoolConfig>,
    clock: SharedClock,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: ConnectionPoolConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ConnectionPoolConfig, clock: SharedClock) -> Self {
        Self { hosts: DashMap::new(), config: RwLock::new(config), clock, next_id: AtomicU64::new(1) }
    }

    pub fn config(&self) -> ConnectionPoolConfig {
        self.config.read().clone()
    }

    fn host_pool(&self, host: &str) -> Arc<HostPool> {
        if let Some(pool) = self.hosts.get(host) {
            return Arc::clone(pool.value());
        }
        // Held until the insert so a concurrent reconfigure sees the new host
        let config = self.config.read();
        let max_connections = config.max_connections_per_host.max(1);
        let entry = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostPool::new(host, max_connections)));
        Arc::clone(entry.value())
    }

    /// Lease a connection to `host`, waiting up to `wait` for a free slot
    pub async fn acquire(&self, host: &str, wait: Duration) -> NetworkResult<PooledConnection> {
        let pool = self.host_pool(host);
        let permit = match tokio::time::timeout(wait, Arc::clone(&pool.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(NetworkError::NetworkUnavailable(format!("connection pool for {host} closed")))
            }
            Err(_) => {
                debug!(host, ?wait, "timed out waiting for a pooled connection");
                return Err(NetworkError::Timeout(wait));
            }
        };

        let keep_alive = self.config.read().keep_alive_timeout;
        let now = self.clock.now();
        let mut state = pool.state.lock();
        HostPool::close_stale(&mut state, now, keep_alive);

        let (id, reused) = match state.idle.pop() {
            Some(idle) => {
                state.reused += 1;
                (idle.id, true)
            }
            None => {
                state.created += 1;
                (self.next_id.fetch_add(1, Ordering::Relaxed), false)
            }
        };
        state.leased.insert(id);
        drop(state);

        trace!(host, connection = id, reused, "connection leased");
        Ok(PooledConnection { id, reused, host: pool, permit: Some(permit) })
    }

    /// Return a connection for reuse
    pub fn release(&self, mut connection: PooledConnection) -> NetworkResult<()> {
        let current = self.hosts.get(connection.host()).map(|p| Arc::clone(p.value()));
        let known = current.is_some_and(|pool| Arc::ptr_eq(&pool, &connection.host));

        let mut state = connection.host.state.lock();
        if !known || !state.leased.remove(&connection.id) {
            return Err(NetworkError::ConnectionNotFound(format!(
                "{}#{}",
                connection.host.host, connection.id
            )));
        }
        state.idle.push(IdleConnection { id: connection.id, idle_since: self.clock.now() });
        if let Some(permit) = connection.permit.take() {
            HostPool::return_permit(&mut state, permit);
        }
        drop(state);

        trace!(host = connection.host(), connection = connection.id, "connection released");
        Ok(())
    }

    /// Close idle connections past the keep-alive timeout
    pub fn evict_idle(&self) -> usize {
        let keep_alive = self.config.read().keep_alive_timeout;
        let now = self.clock.now();
        let closed: usize = self
            .hosts
            .iter()
            .map(|entry| HostPool::close_stale(&mut entry.value().state.lock(), now, keep_alive))
            .sum();
        if closed > 0 {
            debug!(closed, "closed idle connections");
        }
        closed
    }

    pub fn stats(&self, host: &str) -> Option<HostPoolStats> {
        let pool = self.hosts.get(host).map(|p| Arc::clone(p.value()))?;
        let state = pool.state.lock();
        Some(HostPoolStats {
            leased: state.leased.len(),
            idle: state.idle.len(),
            available: pool.semaphore.available_permits(),
            max_connections: state.max_connections,
            created: state.created,
            reused: state.reused,
            closed: state.closed,
        })
    }

    /// Hosts with pool state
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Apply new limits. Existing host pools keep their connections and
    /// move to the new per-host bound in place; leases taken before the
    /// change count against it until they come back.
    pub fn reconfigure(&self, config: ConnectionPoolConfig) {
        let mut current = self.config.write();
        if current.max_connections_per_host != config.max_connections_per_host {
            let max = config.max_connections_per_host.max(1);
            for pool in self.hosts.iter() {
                pool.value().resize(max);
            }
        }
        *current = config;
    }

    /// Forget every host
    pub fn clear(&self) {
        self.hosts.clear();
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until `shutdown`
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        pool.evict_idle();
                    }
                }
            }
        })
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &*self.config.read())
            .field("hosts", &self.hosts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use netweave_common::resilience::MockClock;

    use super::*;

    fn pool(clock: &MockClock, max: usize) -> ConnectionPool {
        let config = ConnectionPoolConfig {
            max_connections_per_host: max,
            keep_alive_timeout: Duration::from_secs(30),
        };
        ConnectionPool::with_clock(config, Arc::new(clock.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_per_host() {
        let clock = MockClock::new();
        let pool = pool(&clock, 2);
        let _a = pool.acquire("api.test:443", Duration::from_secs(1)).await.unwrap();
        let _b = pool.acquire("api.test:443", Duration::from_secs(1)).await.unwrap();

        let third = pool.acquire("api.test:443", Duration::from_millis(100)).await;
        assert_eq!(third.unwrap_err(), NetworkError::Timeout(Duration::from_millis(100)));

        // other hosts are unaffected
        assert!(pool.acquire("other.test:443", Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_enables_reuse() {
        let clock = MockClock::new();
        let pool = pool(&clock, 1);
        let first = pool.acquire("h", Duration::from_secs(1)).await.unwrap();
        let id = first.id();
        pool.release(first).unwrap();

        let second = pool.acquire("h", Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.id(), id);
        assert!(second.is_reused());

        let stats = pool.stats("h").unwrap();
        assert_eq!((stats.leased, stats.idle, stats.available), (1, 0, 0));
        assert_eq!((stats.created, stats.reused), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_released_slot() {
        let clock = MockClock::new();
        let pool = Arc::new(pool(&clock, 1));
        let held = pool.acquire("h", Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire("h", Duration::from_secs(5)).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = held.id();
        pool.release(held).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_closes_stale_idle() {
        let clock = MockClock::new();
        let pool = pool(&clock, 2);
        let conn = pool.acquire("h", Duration::from_secs(1)).await.unwrap();
        let id = conn.id();
        pool.release(conn).unwrap();

        clock.advance(Duration::from_secs(31));
        let fresh = pool.acquire("h", Duration::from_secs(1)).await.unwrap();
        assert_ne!(fresh.id(), id);
        assert!(!fresh.is_reused());
        pool.release(fresh).unwrap();

        clock.advance(Duration::from_secs(31));
        assert_eq!(pool.evict_idle(), 1);
        assert_eq!(pool.stats("h").unwrap().closed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_frees_slot_without_reuse() {
        let clock = MockClock::new();
        let pool = pool(&clock, 1);
        let conn = pool.acquire("h", Duration::from_secs(1)).await.unwrap();
        drop(conn);

        let stats = pool.stats("h").unwrap();
        assert_eq!((stats.leased, stats.idle, stats.available, stats.closed), (0, 0, 1, 1));
        assert!(!pool.acquire("h", Duration::from_secs(1)).await.unwrap().is_reused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grow_bound_with_leases_held() {
        let clock = MockClock::new();
        let pool = pool(&clock, 2);
        let a = pool.acquire("h", Duration::from_secs(1)).await.unwrap();
        let b = pool.acquire("h", Duration::from_secs(1)).await.unwrap();

        pool.reconfigure(ConnectionPoolConfig { max_connections_per_host: 3, ..pool.config() });
        let c = pool.acquire("h", Duration::from_millis(100)).await.unwrap();
        let fourth = pool.acquire("h", Duration::from_millis(100)).await;
        assert_eq!(fourth.unwrap_err(), NetworkError::Timeout(Duration::from_millis(100)));

        // leases from before the change still go back for reuse
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        drop(c);
        let stats = pool.stats("h").unwrap();
        assert_eq!((stats.leased, stats.idle, stats.available, stats.max_connections), (0, 2, 3, 3));
    }

    /// Shrinking below the leased count retires slots as leases return.
    ///
    /// # Test Steps
    /// 1. Bound 3, three leases held
    /// 2. Shrink to 1: no new lease starts
    /// 3. Return two leases: still no room, since the third counts
    /// 4. Return the third: exactly one lease fits
    #[tokio::test(start_paused = true)]
    async fn test_shrink_bound_with_leases_held() {
        let clock = MockClock::new();
        let pool = pool(&clock, 3);
        let wait = Duration::from_millis(100);
        let a = pool.acquire("h", wait).await.unwrap();
        let b = pool.acquire("h", wait).await.unwrap();
        let c = pool.acquire("h", wait).await.unwrap();

        pool.reconfigure(ConnectionPoolConfig { max_connections_per_host: 1, ..pool.config() });
        pool.release(a).unwrap();
        drop(b);
        assert!(pool.acquire("h", wait).await.is_err());

        pool.release(c).unwrap();
        let only = pool.acquire("h", wait).await.unwrap();
        assert!(only.is_reused());
        assert!(pool.acquire("h", wait).await.is_err());

        drop(only);
        let stats = pool.stats("h").unwrap();
        assert_eq!((stats.available, stats.max_connections), (1, 1));

        // growing again repays nothing owed and adds the difference
        pool.reconfigure(ConnectionPoolConfig { max_connections_per_host: 2, ..pool.config() });
        assert_eq!(pool.stats("h").unwrap().available, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_unknown_connection() {
        let clock = MockClock::new();
        let pool = pool(&clock, 1);
        let conn = pool.acquire("h", Duration::from_secs(1)).await.unwrap();
        pool.clear();

        assert!(matches!(pool.release(conn), Err(NetworkError::ConnectionNotFound(_))));
    }
}
