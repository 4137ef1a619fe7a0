//! The pool itself: one FIFO-fair, health-checked cache of
//! associations to a single (host, port, AE pair), processed as a
//! serialized unit the way every other subsystem in this workspace is
//! — acquire, release, and maintenance never run concurrently with
//! each other, only the waiting and the I/O they each do in turn.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::{PoolConfig, PoolKey};
use crate::connection::PooledConnection;
use crate::error::{ConnectSnafu, PoolExhaustedSnafu, PoolShutdownSnafu, Result};
use snafu::ResultExt;

struct PoolState {
    available: VecDeque<PooledConnection>,
    in_use_count: usize,
    next_ticket: u64,
    waiting_tickets: VecDeque<u64>,
}

struct Inner {
    key: PoolKey,
    config: PoolConfig,
    state: Mutex<PoolState>,
    condvar: Condvar,
    stopped: AtomicBool,
    next_id: AtomicU64,
    created: AtomicU64,
    closed: AtomicU64,
    health_checked: AtomicU64,
}

/// A connection pool for one peer/AE-title pair.
///
/// Dropping the pool does not close its connections; call [`shutdown`]
/// explicitly for the graceful-drain behavior described in the module
/// docs.
///
/// [`shutdown`]: ConnectionPool::shutdown
pub struct ConnectionPool {
    inner: Arc<Inner>,
    health_check_thread: Option<JoinHandle<()>>,
    idle_sweep_thread: Option<JoinHandle<()>>,
}

/// A leased connection. Returns to the pool (to the oldest waiter, or
/// to `available`) on drop.
pub struct Lease {
    inner: Arc<Inner>,
    connection: Option<PooledConnection>,
}

impl std::ops::Deref for Lease {
    type Target = PooledConnection;
    fn deref(&self) -> &PooledConnection {
        self.connection.as_ref().expect("connection taken only on drop")
    }
}

impl std::ops::DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut PooledConnection {
        self.connection.as_mut().expect("connection taken only on drop")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.inner.release(conn);
        }
    }
}

impl ConnectionPool {
    pub fn new(key: PoolKey, config: PoolConfig) -> Self {
        let inner = Arc::new(Inner {
            key,
            config,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                in_use_count: 0,
                next_ticket: 0,
                waiting_tickets: VecDeque::new(),
            }),
            condvar: Condvar::new(),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            health_checked: AtomicU64::new(0),
        });

        let health_check_thread = {
            let inner = Arc::clone(&inner);
            let interval = inner.config.health_check_interval;
            Some(std::thread::spawn(move || run_health_check_loop(inner, interval)))
        };
        let idle_sweep_thread = {
            let inner = Arc::clone(&inner);
            let interval = inner.config.idle_sweep_interval();
            Some(std::thread::spawn(move || run_idle_sweep_loop(inner, interval)))
        };

        ConnectionPool {
            inner,
            health_check_thread,
            idle_sweep_thread,
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.inner.key
    }

    /// Total connections opened over the pool's lifetime.
    pub fn created_count(&self) -> u64 {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Total connections closed (health-check failure, idle sweep, or
    /// shutdown) over the pool's lifetime.
    pub fn closed_count(&self) -> u64 {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn health_checked_count(&self) -> u64 {
        self.inner.health_checked.load(Ordering::SeqCst)
    }

    /// Acquire a connection, waiting in strict FIFO order behind any
    /// other waiter already queued, up to `acquire_timeout`.
    pub fn acquire(&self) -> Result<Lease> {
        let connection = self.inner.acquire()?;
        Ok(Lease {
            inner: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Fail every waiter, then release and close every connection,
    /// available or in use. Maintenance threads observe the shutdown
    /// flag and exit on their next tick.
    pub fn shutdown(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        {
            let mut state = self.inner.state.lock();
            state.waiting_tickets.clear();
            self.inner.condvar.notify_all();
            let drained: Vec<_> = state.available.drain(..).collect();
            drop(state);
            for conn in drained {
                conn.close();
                self.inner.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
        if let Some(handle) = self.health_check_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.idle_sweep_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.condvar.notify_all();
    }
}

impl Inner {
    fn acquire(&self) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return PoolShutdownSnafu.fail();
            }

            // Only take the fast path when nobody is already parked in the
            // ticket queue; otherwise a fresh caller could steal a released
            // connection ahead of a waiter that has been queued longer.
            while state.waiting_tickets.is_empty() {
                let Some(mut conn) = state.available.pop_front() else {
                    break;
                };
                if conn.is_established() {
                    conn.touch();
                    state.in_use_count += 1;
                    return Ok(conn);
                }
                self.closed.fetch_add(1, Ordering::SeqCst);
                conn.close();
            }

            if state.available.len() + state.in_use_count < self.config.max_connections {
                state.in_use_count += 1;
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                match PooledConnection::open(id, &self.key, &self.config) {
                    Ok(conn) => {
                        self.created.fetch_add(1, Ordering::SeqCst);
                        return Ok(conn);
                    }
                    Err(source) => {
                        state.in_use_count -= 1;
                        self.condvar.notify_all();
                        return Err(source).context(ConnectSnafu {
                            host: self.key.host.clone(),
                            port: self.key.port,
                        });
                    }
                }
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.waiting_tickets.push_back(ticket);

            loop {
                let now = Instant::now();
                if now >= deadline {
                    state.waiting_tickets.retain(|&t| t != ticket);
                    return PoolExhaustedSnafu.fail();
                }
                let timed_out = self
                    .condvar
                    .wait_for(&mut state, deadline - now)
                    .timed_out();

                if self.stopped.load(Ordering::SeqCst) {
                    state.waiting_tickets.retain(|&t| t != ticket);
                    return PoolShutdownSnafu.fail();
                }
                if state.waiting_tickets.front() == Some(&ticket)
                    && (!state.available.is_empty()
                        || state.available.len() + state.in_use_count < self.config.max_connections)
                {
                    state.waiting_tickets.pop_front();
                    break;
                }
                if timed_out {
                    state.waiting_tickets.retain(|&t| t != ticket);
                    return PoolExhaustedSnafu.fail();
                }
            }
            // this waiter's turn; loop back to the top to actually take
            // the slot it was woken for.
        }
    }

    fn release(&self, mut conn: PooledConnection) {
        let mut state = self.state.lock();
        state.in_use_count -= 1;
        if conn.is_established() {
            conn.touch();
            state.available.push_back(conn);
        } else {
            self.closed.fetch_add(1, Ordering::SeqCst);
            conn.close();
        }
        self.condvar.notify_all();
    }
}

fn run_health_check_loop(inner: Arc<Inner>, interval: Duration) {
    while !inner.stopped.load(Ordering::SeqCst) {
        std::thread::sleep(interval);
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        let mut state = inner.state.lock();
        let mut survivors = VecDeque::with_capacity(state.available.len());
        while let Some(mut conn) = state.available.pop_front() {
            inner.health_checked.fetch_add(1, Ordering::SeqCst);
            if conn.health_check() {
                survivors.push_back(conn);
            } else {
                inner.closed.fetch_add(1, Ordering::SeqCst);
                conn.close();
            }
        }
        state.available = survivors;
    }
}

fn run_idle_sweep_loop(inner: Arc<Inner>, interval: Duration) {
    while !inner.stopped.load(Ordering::SeqCst) {
        std::thread::sleep(interval);
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        let mut state = inner.state.lock();
        let min_connections = inner.config.min_connections;
        let idle_timeout = inner.config.idle_timeout;
        let now = Instant::now();
        let mut kept = VecDeque::with_capacity(state.available.len());
        while let Some(conn) = state.available.pop_front() {
            let total_remaining = kept.len() + state.available.len() + 1;
            if total_remaining > min_connections && now.duration_since(conn.last_used_at) > idle_timeout {
                inner.closed.fetch_add(1, Ordering::SeqCst);
                conn.close();
            } else {
                kept.push_back(conn);
            }
        }
        state.available = kept;
    }
}
