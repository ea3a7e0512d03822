// src/connection/idle.rs

//! Read/write/all idle detection for a single connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Idle thresholds. `None` disables a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdleSettings {
    /// No frame received for this long closes the connection.
    pub read: Option<Duration>,
    /// Nothing written for this long only logs a warning.
    pub write: Option<Duration>,
    /// Neither read nor write for this long closes the connection.
    pub all: Option<Duration>,
}

impl IdleSettings {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// How often the connection should evaluate its idle state.
    pub fn check_period(&self) -> Duration {
        [self.read, self.write, self.all]
            .into_iter()
            .flatten()
            .min()
            .map(|shortest| (shortest / 4).clamp(Duration::from_millis(5), Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(3600))
    }
}

/// Result of an idle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    ReadIdle,
    /// Reported once per idle period, until the next write.
    WriteIdle,
    AllIdle,
}

impl IdleState {
    pub fn closes_connection(self) -> bool {
        matches!(self, IdleState::ReadIdle | IdleState::AllIdle)
    }
}

/// Activity timestamps shared by a connection's reader and writer tasks.
#[derive(Debug)]
pub struct IdleTracker {
    settings: IdleSettings,
    origin: Instant,
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
    write_warned: AtomicBool,
}

impl IdleTracker {
    pub fn new(settings: IdleSettings) -> Self {
        Self {
            settings,
            origin: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
            write_warned: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &IdleSettings {
        &self.settings
    }

    pub fn record_read(&self) {
        self.last_read_ms.store(self.elapsed_ms(Instant::now()), Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.last_write_ms.store(self.elapsed_ms(Instant::now()), Ordering::Relaxed);
        self.write_warned.store(false, Ordering::Relaxed);
    }

    /// Evaluates the thresholds at `now`. Closing states take priority over the write
    /// warning.
    pub fn check(&self, now: Instant) -> IdleState {
        let now_ms = self.elapsed_ms(now);
        let last_read = self.last_read_ms.load(Ordering::Relaxed);
        let last_write = self.last_write_ms.load(Ordering::Relaxed);
        let exceeded =
            |since: u64, limit: Option<Duration>| limit.is_some_and(|l| now_ms.saturating_sub(since) >= l.as_millis() as u64);

        if exceeded(last_read.max(last_write), self.settings.all) {
            return IdleState::AllIdle;
        }
        if exceeded(last_read, self.settings.read) {
            return IdleState::ReadIdle;
        }
        if exceeded(last_write, self.settings.write) && !self.write_warned.swap(true, Ordering::Relaxed) {
            return IdleState::WriteIdle;
        }
        IdleState::Active
    }

    fn elapsed_ms(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_millis() as u64
    }
}
