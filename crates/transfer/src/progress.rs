use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Sliding-window transfer rate.
///
/// Fed with byte counts as parts and files complete; reports the average
/// rate over the last `window`.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total: u64,
}

impl ThroughputMeter {
    /// Creates a meter averaging over `window` (default 5 s).
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: VecDeque::new(),
                window: window.unwrap_or(Duration::from_secs(5)),
                total: 0,
            }),
        }
    }

    /// Records `bytes` transferred now.
    pub fn record(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&self, now: Instant, bytes: u64) {
        let mut m = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        m.total += bytes;
        m.samples.push_back((now, bytes));
        let window = m.window;
        while let Some(&(t, _)) = m.samples.front() {
            if now.duration_since(t) > window {
                m.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average bytes per second within the window; 0.0 with fewer than
    /// two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let m = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (m.samples.front(), m.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.0.duration_since(first.0);
        if m.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        // The first sample marks the window start; its bytes predate it.
        let bytes: u64 = m.samples.iter().skip(1).map(|(_, b)| b).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Bytes recorded since creation.
    pub fn total(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).total
    }
}
