use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::server::Server;

/// `HealthChecker` lifecycle state (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum CheckerState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

/// Probes every replica of one service at a fixed interval and keeps their
/// `alive` flag in sync with reachability. Shares the exact same `Arc<Server>`
/// sequence as the balancer it is paired with (spec.md §3).
pub struct HealthChecker {
    servers: Vec<Arc<Server>>,
    interval: Duration,
    state: AtomicU8,
    /// Signaled by `shut_down` to interrupt a `run` loop currently waiting
    /// on the interval timer, so stopping doesn't block for up to a whole
    /// probe interval (spec.md §4.3 — "returns after the last in-flight
    /// probe completes", not after the next tick).
    stopping_notify: Notify,
    /// Signaled by `run` once it has actually exited, so `shut_down` knows
    /// when to return.
    stop_notify: Notify,
}

impl HealthChecker {
    pub fn new(servers: Vec<Arc<Server>>, interval: Duration) -> Self {
        Self {
            servers,
            interval,
            state: AtomicU8::new(CheckerState::Stopped as u8),
            stopping_notify: Notify::new(),
            stop_notify: Notify::new(),
        }
    }

    fn state(&self) -> CheckerState {
        match self.state.load(Ordering::SeqCst) {
            1 => CheckerState::Running,
            2 => CheckerState::Stopping,
            _ => CheckerState::Stopped,
        }
    }

    /// Starts the probing loop as a background task. A stopped checker must
    /// not be restarted (spec.md §4.3); the lifecycle controller constructs
    /// a fresh one instead.
    pub fn start(self: Arc<Self>) {
        if self.state() != CheckerState::Stopped {
            return;
        }
        self.state.store(CheckerState::Running as u8, Ordering::SeqCst);
        tokio::spawn(async move {
            self.run().await;
        });
    }

    /// Signals the loop to stop and waits for the in-flight probe round to
    /// finish.
    pub async fn shut_down(&self) {
        if self.state() != CheckerState::Running {
            return;
        }
        self.state.store(CheckerState::Stopping as u8, Ordering::SeqCst);
        self.stopping_notify.notify_one();
        self.stop_notify.notified().await;
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = self.stopping_notify.notified() => break,
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
            }
        }
        self.state.store(CheckerState::Stopped as u8, Ordering::SeqCst);
        // `notify_one` (rather than `notify_waiters`) stores a permit if
        // `shut_down` hasn't registered its waiter yet, so the stop signal
        // can't be missed by a race between this store and that call.
        self.stop_notify.notify_one();
    }

    /// Probes every replica in parallel. Probe duration is capped at
    /// `interval / 2` (spec.md §4.3).
    async fn probe_all(&self) {
        let timeout = self.interval / 2;
        let mut join_set = JoinSet::new();
        for server in self.servers.iter().cloned() {
            join_set.spawn(async move {
                probe_one(server, timeout).await;
            });
        }
        while join_set.join_next().await.is_some() {}
    }
}

async fn probe_one(server: Arc<Server>, timeout: Duration) {
    let host_port = match server.url.authority() {
        Some(authority) => authority.as_str().to_owned(),
        None => return,
    };
    let prev_alive = server.is_alive();
    let success = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&host_port))
        .await
        .map(|res| res.is_ok())
        .unwrap_or(false);
    server.set_alive(success);
    if prev_alive != success {
        if success {
            log::info!("backend server {} is now alive", host_port);
        } else {
            log::warn!("backend server {} seems unreachable", host_port);
        }
    }
}
