//! Per-key fixed-window rate limiting with a block cool-down.
//!
//! Counts attempts per key inside a fixed window. Once a key exhausts its
//! window quota it enters a blocked state and every attempt is rejected until
//! the cool-down elapses, regardless of window counts. Entries are created
//! lazily and evicted once their block window has expired.
//!
//! This is an in-process, best-effort control for abuse/retry-storm damping.
//! It is not shared across replicas.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How often (in number of `check` calls) expired entries are swept.
const EVICTION_INTERVAL: u64 = 1024;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Attempts allowed per key within one window.
    pub max_attempts: u32,
    /// Width of the counting window.
    pub window: Duration,
    /// Cool-down applied once the quota is exceeded.
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
        }
    }
}

/// Outcome of a single check-and-increment.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Attempts left in the current window (0 when rejected).
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
    /// Set when the key is in the blocked state.
    pub blocked_for: Option<Duration>,
}

impl RateLimitDecision {
    /// Seconds the caller should wait before retrying, for the Retry-After header.
    pub fn retry_after_secs(&self) -> u64 {
        let wait = self.blocked_for.unwrap_or(self.reset_after);
        wait.as_secs().max(1)
    }
}

#[derive(Debug)]
struct KeyState {
    window_started: Instant,
    count: u32,
    blocked_until: Option<Instant>,
}

impl KeyState {
    fn new(now: Instant) -> Self {
        Self {
            window_started: now,
            count: 0,
            blocked_until: None,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        match self.blocked_until {
            Some(until) => now >= until,
            None => now.duration_since(self.window_started) >= window,
        }
    }
}

/// Arena of per-key window counters behind a sharded-lock map.
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    entries: DashMap<String, KeyState>,
    checks: AtomicU64,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Atomically check and count one attempt for `key`.
    ///
    /// The per-key entry is held under its shard lock for the whole
    /// check-and-increment, so two concurrent callers cannot both observe
    /// "under quota" at the boundary.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();

        if self.checks.fetch_add(1, Ordering::Relaxed) % EVICTION_INTERVAL == 0 {
            self.evict_expired(now);
        }

        let mut state = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(now));

        if let Some(until) = state.blocked_until {
            if now < until {
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_after: until - now,
                    blocked_for: Some(until - now),
                };
            }
            // Cool-down elapsed: the key starts over with a fresh window.
            *state = KeyState::new(now);
        }

        if now.duration_since(state.window_started) >= self.config.window {
            *state = KeyState::new(now);
        }

        let window_left =
            self.config.window - now.duration_since(state.window_started);

        if state.count >= self.config.max_attempts {
            let until = now + self.config.block_duration;
            state.blocked_until = Some(until);
            tracing::warn!(key = %key, "Rate limit quota exceeded, blocking key");
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_after: self.config.block_duration,
                blocked_for: Some(self.config.block_duration),
            };
        }

        state.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: self.config.max_attempts - state.count,
            reset_after: window_left,
            blocked_for: None,
        }
    }

    /// Drop entries whose window or block has expired.
    pub fn evict_expired(&self, now: Instant) {
        let window = self.config.window;
        self.entries.retain(|_, state| !state.is_expired(now, window));
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
