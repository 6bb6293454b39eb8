//! Sliding-window request limits shared by the bot (per user and global) and the bridge
//! (per API key).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug, Default)]
struct WindowEntry {
    requests: Vec<Instant>,
}

impl WindowEntry {
    fn prune(&mut self, now: Instant, window: Duration) {
        self.requests.retain(|&t| now.saturating_duration_since(t) < window);
    }

    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.requests
            .first()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(window)
    }
}

type Entries = HashMap<String, WindowEntry>;

/// Counts requests per key inside a trailing window. Keys with no live requests are forgotten.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
    entries: Mutex<Entries>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, entries: Mutex::new(HashMap::new()) }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Records a request for `key` unless it would exceed the limit.
    pub fn check(&self, key: &str) -> ThrottleDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> ThrottleDecision {
        let mut entries = self.lock();
        let decision = self.peek(&mut entries, key, now);
        if decision.is_allowed() {
            Self::charge(&mut entries, key, now);
        }
        decision
    }

    /// Requests currently counted against `key`.
    pub fn count(&self, key: &str) -> usize {
        let now = Instant::now();
        self.lock()
            .get(key)
            .map(|entry| {
                entry.requests.iter().filter(|&&t| now.saturating_duration_since(t) < self.window).count()
            })
            .unwrap_or(0)
    }

    /// Keys still holding at least one request inside the window as of the last check.
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Decision for one more request from `key`; nothing is recorded.
    fn peek(&self, entries: &mut Entries, key: &str, now: Instant) -> ThrottleDecision {
        entries.retain(|_, entry| {
            entry.prune(now, self.window);
            !entry.requests.is_empty()
        });

        let entry = entries.get(key);
        let used = entry.map_or(0, |entry| entry.requests.len());
        if used >= self.limit as usize {
            let retry_after = entry.map_or(self.window, |entry| entry.retry_after(now, self.window));
            return ThrottleDecision::Limited { retry_after };
        }
        ThrottleDecision::Allowed { remaining: self.limit - used as u32 - 1 }
    }

    fn charge(entries: &mut Entries, key: &str, now: Instant) {
        entries.entry(key.to_string()).or_default().requests.push(now);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleScope {
    User,
    Global,
}

/// Per-user and global limits for incoming questions.
#[derive(Debug)]
pub struct QueryThrottle {
    per_user: SlidingWindow,
    global: SlidingWindow,
}

const GLOBAL_KEY: &str = "__global__";

impl QueryThrottle {
    pub fn new(per_user_per_minute: u32, global_per_minute: u32) -> Self {
        Self {
            per_user: SlidingWindow::per_minute(per_user_per_minute),
            global: SlidingWindow::per_minute(global_per_minute),
        }
    }

    /// Neither window is charged unless both admit the request.
    pub fn check(&self, user_id: &str) -> Result<(), (ThrottleScope, Duration)> {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&self, user_id: &str, now: Instant) -> Result<(), (ThrottleScope, Duration)> {
        let mut users = self.per_user.lock();
        let mut global = self.global.lock();

        if let ThrottleDecision::Limited { retry_after } =
            self.per_user.peek(&mut users, user_id, now)
        {
            return Err((ThrottleScope::User, retry_after));
        }
        if let ThrottleDecision::Limited { retry_after } =
            self.global.peek(&mut global, GLOBAL_KEY, now)
        {
            return Err((ThrottleScope::Global, retry_after));
        }

        SlidingWindow::charge(&mut users, user_id, now);
        SlidingWindow::charge(&mut global, GLOBAL_KEY, now);
        Ok(())
    }
}
