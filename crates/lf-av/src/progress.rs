//! Progress extraction from ffmpeg diagnostic output.
//!
//! Understands both the machine-readable `-progress` key/value stream
//! (`out_time_us=`, `out_time_ms=`, `out_time=`, `progress=end`) and the
//! human stats line (`... time=00:01:02.50 bitrate=...`).

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

static STATS_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("invalid time regex")
});

/// Parse `HH:MM:SS(.frac)` into seconds.
pub fn parse_timestamp(ts: &str) -> Option<f64> {
    let mut parts = ts.trim().split(':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Turns ffmpeg stderr lines into a completion percentage.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: f64,
    last_pct: f64,
}

impl ProgressParser {
    /// `duration_secs` is the source duration; progress stays at 0 when it is
    /// unknown, until the stream reports `progress=end`.
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            last_pct: 0.0,
        }
    }

    /// Feed one line. Returns the updated percentage (0..=100) when the line
    /// carried a time marker.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();

        if let Some(val) = line.strip_prefix("progress=") {
            if val == "end" {
                self.last_pct = 100.0;
                return Some(self.last_pct);
            }
            return None;
        }

        // ffmpeg reports out_time_ms in microseconds as well.
        let elapsed = if let Some(val) = line
            .strip_prefix("out_time_us=")
            .or_else(|| line.strip_prefix("out_time_ms="))
        {
            val.parse::<i64>().ok().map(|us| us as f64 / 1_000_000.0)
        } else if let Some(val) = line.strip_prefix("out_time=") {
            parse_timestamp(val)
        } else {
            STATS_TIME_RE.captures(line).and_then(|caps| {
                let h: f64 = caps[1].parse().ok()?;
                let m: f64 = caps[2].parse().ok()?;
                let s: f64 = caps[3].parse().ok()?;
                Some(h * 3600.0 + m * 60.0 + s)
            })
        }?;

        if self.duration_secs <= 0.0 || elapsed < 0.0 {
            return None;
        }
        self.last_pct = (elapsed / self.duration_secs * 100.0).clamp(0.0, 100.0);
        Some(self.last_pct)
    }

    /// The most recent percentage seen.
    pub fn percent(&self) -> f64 {
        self.last_pct
    }
}

/// Rate limiter for progress callbacks.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether an update may be emitted at `now`. The first call always
    /// passes; `force` bypasses the interval (used for completion).
    pub fn ready(&mut self, now: Instant, force: bool) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => force || now.duration_since(last) >= self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }
}
