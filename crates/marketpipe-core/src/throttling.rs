//! Inbound per-caller rate limiting and the optional outbound upstream quota.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

/// Fixed-window limits shared by every caller key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    window_start: Instant,
    count: u32,
}

/// Point-in-time view of one caller's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u32,
    pub remaining: u32,
    /// Time left until the window resets.
    pub resets_in: Duration,
}

/// Fixed-window counter keyed by caller.
///
/// The check and the increment happen under one lock, so concurrent callers
/// sharing a key never get more than `capacity` admissions per window.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl FixedWindowRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: RateLimitConfig {
                window: config.window,
                capacity: config.capacity.max(1),
            },
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admit one request for `caller_key`, consuming budget when admitted.
    pub fn allow(&self, caller_key: &str) -> bool {
        self.allow_at(caller_key, Instant::now())
    }

    fn allow_at(&self, caller_key: &str, now: Instant) -> bool {
        let mut windows = self
            .windows
            .lock()
            .expect("rate limiter lock is not poisoned");

        let window = windows
            .entry(caller_key.to_owned())
            .or_insert(RateLimitWindow {
                window_start: now,
                count: 0,
            });

        if now.saturating_duration_since(window.window_start) >= self.config.window {
            window.window_start = now;
            window.count = 0;
        }

        if window.count >= self.config.capacity {
            return false;
        }

        window.count += 1;
        true
    }

    /// Current window state for `caller_key`, without consuming budget.
    pub fn window_state(&self, caller_key: &str) -> WindowSnapshot {
        self.window_state_at(caller_key, Instant::now())
    }

    fn window_state_at(&self, caller_key: &str, now: Instant) -> WindowSnapshot {
        let windows = self
            .windows
            .lock()
            .expect("rate limiter lock is not poisoned");

        let active = windows.get(caller_key).filter(|window| {
            now.saturating_duration_since(window.window_start) < self.config.window
        });

        match active {
            Some(window) => WindowSnapshot {
                count: window.count,
                remaining: self.config.capacity.saturating_sub(window.count),
                resets_in: self
                    .config
                    .window
                    .saturating_sub(now.saturating_duration_since(window.window_start)),
            },
            None => WindowSnapshot {
                count: 0,
                remaining: self.config.capacity,
                resets_in: self.config.window,
            },
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .expect("rate limiter lock is not poisoned")
            .len()
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Process-wide budget for calls to the upstream provider.
pub struct UpstreamQuota {
    limiter: DirectRateLimiter,
    limit: u32,
    window: Duration,
}

impl std::fmt::Debug for UpstreamQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamQuota")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl UpstreamQuota {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limiter: RateLimiter::direct(quota_from_window(window, limit)),
            limit: limit.max(1),
            window,
        }
    }

    /// Take one cell of budget; `false` when the quota is exhausted.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    pub const fn window(&self) -> Duration {
        self.window
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
