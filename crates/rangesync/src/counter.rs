use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::time::Instant;

/// After the inactive window has been running for this long, it becomes the
/// active one and the other is restarted.
pub const WINDOW_SWITCH: Duration = Duration::from_millis(10_000);

/// Rates below this are treated as a stalled transfer.
const NEGLIGIBLE_RATE: f64 = 0.001;

/// Bytes received since `start`.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    bytes: u64,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self { start: now, bytes: 0 }
    }

    fn rate(&self, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.start).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.bytes as f64 / elapsed
    }
}

/// Two staggered windows, both count every byte but only the older one is
/// read. When the younger one is old enough they swap and the other starts
/// over, so the reading covers roughly the last 10 to 20 seconds.
#[derive(Debug, Clone, Copy)]
struct Windows {
    first: Window,
    second: Window,
    first_active: bool,
}

impl Windows {
    fn new(now: Instant) -> Self {
        Self {
            first: Window::new(now),
            second: Window::new(now),
            first_active: true,
        }
    }

    fn add(&mut self, bytes: u64) {
        self.first.bytes += bytes;
        self.second.bytes += bytes;
    }

    fn current_rate(&mut self, now: Instant) -> f64 {
        let inactive =
            if self.first_active { self.second } else { self.first };

        if now.duration_since(inactive.start) > WINDOW_SWITCH {
            self.first_active = !self.first_active;
            if self.first_active {
                self.second = Window::new(now);
            } else {
                self.first = Window::new(now);
            }
        }

        if self.first_active {
            self.first.rate(now)
        } else {
            self.second.rate(now)
        }
    }
}

#[derive(Debug, Default)]
struct State {
    /// When the first byte arrived.
    since_start: Option<Instant>,
    windows: Option<Windows>,
}

/// Throughput and ETA of a single file transfer.
///
/// Every method takes `&self`, so the session can update it while a UI
/// polls the readings from another task.
#[derive(Debug)]
pub struct TransferCounter {
    /// Bytes transferred through this counter.
    pub total_bytes: AtomicU64,
    /// Bytes the file already had before the transfer started, e.g. the
    /// parts reused by delta-sync.
    pub baseline_bytes: AtomicU64,
    /// Size of the whole file.
    pub expected_bytes: AtomicU64,
    state: Mutex<State>,
}

impl Default for TransferCounter {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl TransferCounter {
    pub fn new(baseline_bytes: u64, expected_bytes: u64) -> Self {
        Self {
            total_bytes: AtomicU64::new(0),
            baseline_bytes: AtomicU64::new(baseline_bytes),
            expected_bytes: AtomicU64::new(expected_bytes),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // the state is always left consistent, a panic elsewhere while
        // holding the lock doesn't invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The connection backing this transfer opened.
    pub fn started_transfer(&self) {
        self.state().windows = Some(Windows::new(Instant::now()));
    }

    /// The connection backing this transfer closed.
    pub fn stopped_transfer(&self) {
        self.state().windows = None;
    }

    /// Record `count` bytes transferred.
    pub fn bytes_transferred(&self, count: u64) {
        let now = Instant::now();
        let mut state = self.state();

        state.since_start.get_or_insert(now);
        // some callers report bytes before `started_transfer`.
        state.windows.get_or_insert_with(|| Windows::new(now)).add(count);

        self.total_bytes.fetch_add(count, Ordering::Relaxed);
    }

    /// Average bytes per second since the first byte.
    pub fn calculate_average_cps(&self) -> f64 {
        let Some(since) = self.state().since_start else { return 0.0 };

        let elapsed = Instant::now().duration_since(since).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }

        self.total_bytes.load(Ordering::Relaxed) as f64 / elapsed
    }

    /// Bytes per second over the last 10 seconds or so.
    pub fn calculate_current_cps(&self) -> f64 {
        let now = Instant::now();
        match self.state().windows.as_mut() {
            Some(windows) => windows.current_rate(now),
            None => 0.0,
        }
    }

    pub fn calculate_completion_percentage(&self) -> f64 {
        let expected = self.expected_bytes.load(Ordering::Relaxed);
        if expected == 0 {
            return 100.0;
        }

        let done = self.baseline_bytes.load(Ordering::Relaxed)
            + self.total_bytes.load(Ordering::Relaxed);

        (done as f64 / expected as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Linear projection of the time left, using the average rate.
    pub fn calculate_estimated_millis_to_completion(&self) -> u64 {
        let expected = self.expected_bytes.load(Ordering::Relaxed);
        let done = self.baseline_bytes.load(Ordering::Relaxed)
            + self.total_bytes.load(Ordering::Relaxed);

        let Some(remaining) = expected.checked_sub(done).filter(|r| *r > 0)
        else {
            return 0;
        };

        let cps = self.calculate_average_cps();
        if cps < NEGLIGIBLE_RATE {
            return 0;
        }

        (remaining as f64 / cps * 1000.0) as u64
    }
}

impl fmt::Display for TransferCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% at {}/s",
            self.calculate_completion_percentage(),
            crate::utils::format_bytes(self.calculate_current_cps() as u64)
        )
    }
}
