//! Sliding-window rate counter.
//!
//! Counts events in the current interval while exposing the total of the
//! last completed one. Increments and reads are plain atomics; the only
//! synchronized event is the periodic rotation, which runs on a single
//! background task.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

pub type RateResult<T> = Result<T, RateError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("no tokio runtime available to schedule rotation of `{0}`")]
    NoRuntime(String),

    #[error("rotation interval for `{0}` must be greater than zero")]
    ZeroInterval(String),
}

/// The two buckets plus a count of closed intervals.
#[derive(Debug, Default)]
struct Buckets {
    /// Events in the interval being accumulated. Never read by callers.
    current: AtomicU64,
    /// Total of the last completed interval.
    last: AtomicU64,
    /// Number of rotations performed so far.
    rotations: AtomicU64,
}

impl Buckets {
    fn rotate(&self) {
        let closed = self.current.swap(0, Ordering::AcqRel);
        self.last.store(closed, Ordering::Release);
        self.rotations.fetch_add(1, Ordering::AcqRel);
    }
}

/// Handle to the running rotation task.
struct Ticker {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Counts events over the last completed fixed-length interval.
pub struct MeasuredRate {
    name: String,
    buckets: Arc<Buckets>,
    /// Present while started. Guards `start`/`stop` only.
    ticker: Mutex<Option<Ticker>>,
}

impl MeasuredRate {
    /// Create a stopped counter. The name only appears in logs.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            buckets: Arc::new(Buckets::default()),
            ticker: Mutex::new(None),
        }
    }

    /// Start rotating every `interval`, first after one full interval.
    ///
    /// Calling this while already running is a no-op. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, interval: Duration) -> RateResult<()> {
        if interval.is_zero() {
            return Err(RateError::ZeroInterval(self.name.clone()));
        }

        let mut ticker = self.lock_ticker();
        if ticker.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| RateError::NoRuntime(self.name.clone()))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = self.name.clone();
        let buckets = self.buckets.clone();

        let handle = runtime.spawn(async move {
            run_rotation_loop(&name, || buckets.rotate(), interval, shutdown_rx).await;
        });

        *ticker = Some(Ticker {
            handle,
            shutdown_tx,
        });
        debug!(rate = %self.name, interval_ms = interval.as_millis() as u64, "measured rate started");
        Ok(())
    }

    /// Cancel the rotation task. Safe to call when not started.
    pub fn stop(&self) {
        let mut ticker = self.lock_ticker();
        if let Some(t) = ticker.take() {
            let _ = t.shutdown_tx.send(true);
            t.handle.abort();
            debug!(rate = %self.name, "measured rate stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock_ticker().is_some()
    }

    /// Record one event in the current interval.
    pub fn increment(&self) {
        self.buckets.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of events in the last completed interval.
    pub fn count(&self) -> u64 {
        self.buckets.last.load(Ordering::Acquire)
    }

    /// Whether at least one interval has closed since creation.
    ///
    /// Before that, `count()` is zero because there is no data yet, not
    /// because no events happened.
    pub fn has_completed_interval(&self) -> bool {
        self.buckets.rotations.load(Ordering::Acquire) > 0
    }

    /// Close the current interval now.
    pub fn rotate(&self) {
        self.buckets.rotate();
    }

    fn lock_ticker(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for MeasuredRate {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MeasuredRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasuredRate")
            .field("name", &self.name)
            .field("count", &self.count())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Call `rotate` every `interval`, first after one full interval, until
/// shutdown. A panicking rotation is logged and the schedule continues.
async fn run_rotation_loop(
    name: &str,
    rotate: impl Fn(),
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                guarded_rotation(name, &rotate);
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
}

/// Run one rotation, logging instead of propagating a panic so the
/// schedule survives.
fn guarded_rotation(name: &str, rotate: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(rotate)) {
        Ok(()) => true,
        Err(payload) => {
            error!(rate = %name, reason = %panic_message(payload.as_ref()), "cannot reset the measured rate");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
