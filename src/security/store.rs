//! Rate-limit window storage.
//!
//! # Responsibilities
//! - Hold one fixed-window record per route class × client key
//! - Roll windows over lazily when they are touched after expiry
//! - Evict expired windows periodically (`spawn_sweeper`)
//!
//! # Design Decisions
//! - The store is an explicit object created at startup and shared by `Arc`;
//!   no counters live in statics
//! - Time comes from an injected `Clock`
//! - `RateLimitStore` is async so an external store can back it without
//!   blocking a worker thread
//! - Increments happen under the map shard lock

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::security::clock::Clock;
use crate::security::rate_limit::{ClientKey, RouteClass};

/// Window length and admission count for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub window: Duration,
    pub max_requests: u32,
}

/// Snapshot of a window after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Requests counted in the current window, including this one.
    pub count: u32,
    /// Maximum admitted per window.
    pub limit: u32,
    /// Time until the window resets.
    pub reset_in: Duration,
    /// Start of the window this request was counted in.
    pub window_start: Instant,
}

impl WindowState {
    pub fn is_exceeded(&self) -> bool {
        self.count > self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    /// Seconds until reset, rounded up.
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_in.as_secs();
        if self.reset_in.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Counter storage shared by all route limiters.
#[async_trait]
pub trait RateLimitStore: Send + Sync + Debug {
    /// Count one request and return the resulting window.
    async fn increment(&self, class: RouteClass, key: &ClientKey, policy: &RatePolicy)
        -> WindowState;

    /// Give back one request counted in the window starting at
    /// `window_start` (successful logins). No-op once that window is gone.
    async fn decrement(&self, class: RouteClass, key: &ClientKey, window_start: Instant);

    /// Drop expired windows. Returns how many were evicted.
    async fn sweep(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    window_start: Instant,
    window: Duration,
    count: u32,
}

impl WindowRecord {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            window_start: now,
            window,
            count: 0,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.window_start + self.window
    }

    fn reset_in(&self, now: Instant) -> Duration {
        (self.window_start + self.window).saturating_duration_since(now)
    }
}

/// In-process store. Counters reset on restart.
#[derive(Debug)]
pub struct MemoryStore {
    windows: DashMap<(RouteClass, ClientKey), WindowRecord>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Number of tracked windows (live or not yet swept).
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(
        &self,
        class: RouteClass,
        key: &ClientKey,
        policy: &RatePolicy,
    ) -> WindowState {
        let now = self.clock.now();
        let mut record = self
            .windows
            .entry((class, key.clone()))
            .or_insert_with(|| WindowRecord::new(now, policy.window));

        if record.is_expired(now) {
            *record = WindowRecord::new(now, policy.window);
        }
        record.count = record.count.saturating_add(1);

        WindowState {
            count: record.count,
            limit: policy.max_requests,
            reset_in: record.reset_in(now),
            window_start: record.window_start,
        }
    }

    async fn decrement(&self, class: RouteClass, key: &ClientKey, window_start: Instant) {
        let now = self.clock.now();
        if let Some(mut record) = self.windows.get_mut(&(class, key.clone())) {
            if record.window_start == window_start && !record.is_expired(now) {
                record.count = record.count.saturating_sub(1);
            }
        }
    }

    async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.windows.len())
    }
}

/// Periodically evict expired windows until shutdown.
pub fn spawn_sweeper(
    store: Arc<dyn RateLimitStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = store.sweep().await;
                    if evicted > 0 {
                        tracing::debug!(evicted, "Swept expired rate-limit windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate-limit sweeper stopping");
                    break;
                }
            }
        }
    })
}
