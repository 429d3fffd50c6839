use std::time::{Duration, Instant};

const UNITS: [(u64, &str, &str); 5] = [
    (7 * 24 * 3600, "w", "w"),
    (24 * 3600, "day", "days"),
    (3600, "h", "h"),
    (60, "m", "m"),
    (1, "s", "s"),
];
const UNIT_SEPARATOR: &str = ":";

/// Stopwatch for the currently selected task.
///
/// Pausing freezes the elapsed value and resuming continues from it. The
/// refresh mark remembers the last elapsed value a periodic side effect ran
/// for, so the same window is never processed twice.
#[derive(Debug, Clone)]
pub struct Timer {
    started_at: Instant,
    accumulated: Duration,
    active: bool,
    prev_refresh: Option<u64>,
}

impl Timer {
    pub fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            accumulated: Duration::ZERO,
            active: true,
            prev_refresh: None,
        }
    }

    /// Reinitializes in place: zero elapsed, running, no refresh mark.
    pub fn reset(&mut self, now: Instant) {
        self.started_at = now;
        self.accumulated = Duration::ZERO;
        self.active = true;
        self.prev_refresh = None;
    }

    pub fn restart(&mut self, now: Instant) {
        self.reset(now);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn elapsed(&self, now: Instant) -> u64 {
        self.elapsed_duration(now).as_secs()
    }

    fn elapsed_duration(&self, now: Instant) -> Duration {
        if self.active {
            self.accumulated + now.saturating_duration_since(self.started_at)
        } else {
            self.accumulated
        }
    }

    /// Flips between running and paused, returning the new running state.
    pub fn toggle(&mut self, now: Instant) -> bool {
        if self.active {
            self.accumulated = self.elapsed_duration(now);
            self.active = false;
        } else {
            self.started_at = now;
            self.active = true;
        }
        self.active
    }

    pub fn refresh(&mut self, mark: u64) {
        self.prev_refresh = Some(mark);
    }

    pub fn prev_refresh(&self) -> Option<u64> {
        self.prev_refresh
    }
}

/// Renders the `granularity` largest non-zero units of `seconds`, e.g.
/// `3661` with granularity 2 becomes `1h:1m`.
pub fn display_time(seconds: u64, granularity: usize) -> String {
    let mut remaining = seconds;
    let mut parts = Vec::new();

    for (unit_seconds, singular, plural) in UNITS {
        let value = remaining / unit_seconds;
        if value == 0 {
            continue;
        }
        remaining -= value * unit_seconds;
        let name = if value == 1 { singular } else { plural };
        parts.push(format!("{value}{name}"));
    }

    if parts.is_empty() {
        return "0s".to_string();
    }

    parts.truncate(granularity.max(1));
    parts.join(UNIT_SEPARATOR)
}
