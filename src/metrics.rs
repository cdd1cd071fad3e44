// Operation metrics module
//
// Lightweight counters for what the tool did during a run

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Run-wide operation counters
///
/// Uses atomics so the command runner and the services can share one
/// instance behind an `Arc` without locking.
#[derive(Debug)]
pub struct Metrics {
    /// Privileged commands that exited successfully
    pub commands_succeeded: AtomicUsize,

    /// Privileged commands that failed to start or exited non-zero
    pub commands_failed: AtomicUsize,

    /// Time spent waiting on privileged commands, in milliseconds
    pub command_time_ms: AtomicU64,

    /// Tunables written to the kernel
    pub tweaks_applied: AtomicUsize,

    /// Completed swap resizes
    pub swap_resizes: AtomicUsize,

    /// Games whose data was relocated
    pub games_moved: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            commands_succeeded: AtomicUsize::new(0),
            commands_failed: AtomicUsize::new(0),
            command_time_ms: AtomicU64::new(0),
            tweaks_applied: AtomicUsize::new(0),
            swap_resizes: AtomicUsize::new(0),
            games_moved: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a finished command and how long it ran
    pub fn record_command(&self, succeeded: bool, duration: Duration) {
        if succeeded {
            self.commands_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.command_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_tweak_applied(&self) {
        self.tweaks_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swap_resize(&self) {
        self.swap_resizes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_game_moved(&self) {
        self.games_moved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Total commands run, successful or not
    pub fn commands_total(&self) -> usize {
        self.commands_succeeded.load(Ordering::Relaxed) + self.commands_failed.load(Ordering::Relaxed)
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Run Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Commands: {} succeeded, {} failed, {:.2}s total",
            self.commands_succeeded.load(Ordering::Relaxed),
            self.commands_failed.load(Ordering::Relaxed),
            self.command_time_ms.load(Ordering::Relaxed) as f64 / 1000.0
        );
        tracing::info!(
            "Tweaks applied: {}, swap resizes: {}, games moved: {}",
            self.tweaks_applied.load(Ordering::Relaxed),
            self.swap_resizes.load(Ordering::Relaxed),
            self.games_moved.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
