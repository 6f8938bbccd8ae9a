use dashmap::DashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::config::{LimitsConfig, RateClassConfig};

/// Outcome of a rate-limit check, carrying everything the HTTP layer needs
/// to emit `X-RateLimit-Limit` / `X-RateLimit-Remaining` / `X-RateLimit-Reset`
/// headers on both the accept and the reject path.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in_seconds: u64,
}

#[derive(Debug)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window rate limiter for one named request class.
///
/// Each class (registration, session submission, public reads) owns its own
/// limiter with an independent window length and maximum count. The first
/// request for a key opens a window (`count = 1`); later requests increment
/// the counter until the window expires, at which point the entry is
/// replaced rather than incremented. Requests over the limit are rejected
/// but still recorded, so abusive retries keep the rejection visible
/// instead of quietly resetting it.
///
/// Counters live in a process-local `DashMap`; a multi-instance deployment
/// needs a shared counter store behind the same [`check_and_increment`]
/// seam. Rejection is a normal decision, never an error.
///
/// [`check_and_increment`]: RateLimiter::check_and_increment
pub struct RateLimiter {
    name: &'static str,
    max_requests: u32,
    window: Duration,
    entries: Arc<DashMap<String, WindowEntry>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(name: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            name,
            max_requests,
            window,
            entries: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn from_class(name: &'static str, class: &RateClassConfig) -> Self {
        Self::new(name, class.max_requests, Duration::from_secs(class.window_seconds))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Records one request for `key` and decides whether it is allowed.
    ///
    /// The entry is mutated under its map shard lock, so concurrent calls
    /// for the same key never lose an increment.
    pub fn check_and_increment(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| WindowEntry {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        entry.count += 1;

        let allowed = entry.count <= self.max_requests;
        let remaining = self.max_requests.saturating_sub(entry.count);
        let reset_in_seconds = entry.reset_at.saturating_duration_since(now).as_secs();

        RateLimitDecision {
            allowed,
            limit: self.max_requests,
            remaining,
            reset_in_seconds,
        }
    }

    /// Spawns the background sweep that drops expired windows to bound
    /// memory. Sweeping is decoupled from request handling; an expired
    /// entry that has not been swept yet is replaced on its next request.
    pub fn start_sweep_task(&self, interval: Duration) {
        let entries = self.entries.clone();
        let name = self.name;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                let now = Instant::now();
                let before = entries.len();
                entries.retain(|_, entry| now < entry.reset_at);
                let removed = before - entries.len();

                if removed > 0 {
                    tracing::debug!(limiter = name, removed, "swept expired rate-limit windows");
                }
            }
        });
    }

    /// Removes expired windows immediately, returning how many were dropped.
    pub fn sweep_now(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.reset_at);
        before - self.entries.len()
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

/// The three request classes the gate distinguishes, each with its own
/// window. Constructed once at startup from [`LimitsConfig`].
pub struct RateLimiters {
    pub agent_register: Arc<RateLimiter>,
    pub session_submit: Arc<RateLimiter>,
    pub public_read: Arc<RateLimiter>,
    sweep_interval: Duration,
}

impl RateLimiters {
    #[must_use]
    pub fn from_config(config: &LimitsConfig) -> Self {
        Self {
            agent_register: Arc::new(RateLimiter::from_class("agent-register", &config.agent_register)),
            session_submit: Arc::new(RateLimiter::from_class("session-submit", &config.session_submit)),
            public_read: Arc::new(RateLimiter::from_class("public-read", &config.public_read)),
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds),
        }
    }

    pub fn start_sweep_tasks(&self) {
        self.agent_register.start_sweep_task(self.sweep_interval);
        self.session_submit.start_sweep_task(self.sweep_interval);
        self.public_read.start_sweep_task(self.sweep_interval);
    }
}
