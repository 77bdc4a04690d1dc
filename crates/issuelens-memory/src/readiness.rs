//! Polling an index until it finishes provisioning.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::vector_store::BoxFuture;

/// Source of elapsed time and sleeping, swappable in tests.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

/// [`Clock`] backed by the tokio timer.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// [`Clock`] whose sleeps return immediately after advancing the time.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
    /// Multiplier applied to the interval after every unsuccessful probe. `1.0` polls at a
    /// fixed rate.
    pub backoff_factor: f64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(280),
            backoff_factor: 1.0,
        }
    }
}

impl ReadinessPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .unwrap_or(self.max_wait)
            .min(self.max_wait)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { waited: Duration },
    /// The probe never succeeded within `max_wait`.
    NotReady { waited: Duration },
    Cancelled,
}

/// Probe until it reports ready, the policy's ceiling elapses, or `cancel` fires.
///
/// The probe runs once immediately and once more after every sleep, so a ceiling that is a
/// multiple of the interval gets a final probe exactly at the ceiling.
///
/// # Errors
///
/// Returns the probe's error as soon as one probe fails.
pub async fn wait_until_ready<F, Fut, E>(
    policy: &ReadinessPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<Readiness, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = clock.now();
    let mut interval = policy.interval;
    loop {
        if cancel.is_cancelled() {
            return Ok(Readiness::Cancelled);
        }
        if probe().await? {
            return Ok(Readiness::Ready {
                waited: clock.now().saturating_sub(start),
            });
        }
        let waited = clock.now().saturating_sub(start);
        if waited >= policy.max_wait {
            return Ok(Readiness::NotReady { waited });
        }
        let nap = interval.min(policy.max_wait - waited);
        tracing::debug!(
            waited_secs = waited.as_secs(),
            next_probe_secs = nap.as_secs_f64(),
            "index not ready yet"
        );
        tokio::select! {
            () = cancel.cancelled() => return Ok(Readiness::Cancelled),
            () = clock.sleep(nap) => {}
        }
        interval = policy.next_interval(interval);
    }
}
