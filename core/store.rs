//! Sliding-window performance stores.
//!
//! Two logical stores, both trimmed lazily to a 60s window on every append
//! or read that names a key: the *response log*, keyed by
//! `(identifier, fn_name)` where identifier is a node-id or a zone name, and
//! the *total-time log*, keyed by `"<fn_name>_<arch>"`. Each is a
//! `VecDeque<(Instant, Duration)>` behind one lock, so append and trim are
//! O(1) amortized.

use crate::TIME_WINDOW_SECS;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

fn window() -> Duration {
    Duration::from_secs(TIME_WINDOW_SECS)
}

fn trim(deque: &mut VecDeque<(Instant, Duration)>, now: Instant) {
    while let Some((ts, _)) = deque.front() {
        if now.duration_since(*ts) > window() {
            deque.pop_front();
        } else {
            break;
        }
    }
}

/// Response-time samples keyed by `(identifier, fn_name)`.
#[derive(Default)]
pub struct ResponseLog {
    inner: Mutex<HashMap<(String, String), VecDeque<(Instant, Duration)>>>,
}

impl ResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, identifier: &str, fn_name: &str, duration: Duration) {
        let now = Instant::now();
        let key = (identifier.to_string(), fn_name.to_string());
        let mut guard = self.inner.lock();
        let deque = guard.entry(key).or_default();
        deque.push_back((now, duration));
        trim(deque, now);
    }

    /// Arithmetic mean of in-window durations, in seconds. Zero samples
    /// yields 0.0 — "no signal" to the target selector.
    pub fn average(&self, identifier: &str, fn_name: &str) -> f64 {
        let now = Instant::now();
        let key = (identifier.to_string(), fn_name.to_string());
        let mut guard = self.inner.lock();
        let Some(deque) = guard.get_mut(&key) else {
            return 0.0;
        };
        trim(deque, now);
        if deque.is_empty() {
            return 0.0;
        }
        let total: f64 = deque.iter().map(|(_, d)| d.as_secs_f64()).sum();
        total / deque.len() as f64
    }
}

/// Total end-to-end durations keyed by `"<fn_name>_<arch>"`.
#[derive(Default)]
pub struct TotalTimeLog {
    inner: Mutex<HashMap<String, VecDeque<(Instant, Duration)>>>,
}

impl TotalTimeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, key: &str, duration: Duration) {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let deque = guard.entry(key.to_string()).or_default();
        deque.push_back((now, duration));
        trim(deque, now);
    }

    /// Durations still inside the window, in seconds, oldest first.
    pub fn recent(&self, key: &str) -> Vec<f64> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let Some(deque) = guard.get_mut(key) else {
            return Vec::new();
        };
        trim(deque, now);
        deque.iter().map(|(_, d)| d.as_secs_f64()).collect()
    }
}
