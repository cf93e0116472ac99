//! Request gate enforcing per-worker pacing and a shared cooldown
//!
//! Every request passes through [`RateGate::send`]:
//! - a worker waits until its own minimum interval since its previous request
//!   start has elapsed
//! - every worker waits until the shared cooldown deadline has passed
//! - a rate-limited reply pushes the shared deadline forward and the same
//!   request is retried, so callers only ever see the final reply

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Longest server-requested cooldown honoured; longer ones use the fallback
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

/// Backoff request carried by a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The reply is not a rate-limit signal
    None,

    /// Rate limited with a usable retry delay
    After(Duration),

    /// Rate limited without a usable retry delay
    Unspecified,
}

/// A reply that may ask the client to back off
pub trait RateLimited {
    fn backoff(&self) -> Backoff;
}

/// Shared instant before which no request may start
///
/// The deadline only ever moves forward: concurrent rate-limit signals keep
/// the latest of all requested deadlines.
#[derive(Debug, Default)]
pub struct CooldownDeadline {
    until: Mutex<Option<Instant>>,
}

impl CooldownDeadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the deadline to `until` unless it is already later
    ///
    /// Returns the effective deadline.
    pub fn extend_to(&self, until: Instant) -> Instant {
        let mut guard = self.until.lock().unwrap_or_else(|e| e.into_inner());
        let effective = match *guard {
            Some(current) if current >= until => current,
            _ => until,
        };
        *guard = Some(effective);
        effective
    }

    /// Returns the current deadline, if any was ever set
    pub fn current(&self) -> Option<Instant> {
        *self.until.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-worker pacing state
#[derive(Debug, Default)]
pub struct WorkerPacer {
    last_start: Option<Instant>,
}

impl WorkerPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start time of this worker's most recent request
    pub fn last_start(&self) -> Option<Instant> {
        self.last_start
    }
}

/// Gate shared by all workers of one invocation
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    fallback_cooldown: Duration,
    deadline: CooldownDeadline,
    rate_limit_hits: AtomicU32,
}

impl RateGate {
    /// Creates a gate
    ///
    /// # Arguments
    ///
    /// * `min_interval` - Minimum spacing between request starts of one worker
    /// * `fallback_cooldown` - Cooldown used when a rate-limit reply has no usable delay
    pub fn new(min_interval: Duration, fallback_cooldown: Duration) -> Self {
        Self {
            min_interval,
            fallback_cooldown,
            deadline: CooldownDeadline::new(),
            rate_limit_hits: AtomicU32::new(0),
        }
    }

    /// Waits until this worker may start a request, then records the start
    ///
    /// Both conditions are re-checked after every wake-up because another
    /// worker may have extended the cooldown in the meantime.
    pub async fn wait_turn(&self, pacer: &mut WorkerPacer) {
        loop {
            let paced = pacer.last_start.map(|last| last + self.min_interval);
            let target = match (paced, self.deadline.current()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };

            match target {
                Some(target) if target > Instant::now() => sleep_until(target).await,
                _ => break,
            }
        }

        pacer.last_start = Some(Instant::now());
    }

    /// Issues a request through the gate
    ///
    /// Rate-limited replies extend the shared cooldown and the request is
    /// issued again; any other reply, or a transport error, is returned to the
    /// caller.
    pub async fn send<T, E, F, Fut>(&self, pacer: &mut WorkerPacer, mut request: F) -> Result<T, E>
    where
        T: RateLimited,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            self.wait_turn(pacer).await;
            let reply = request().await?;

            let delay = match reply.backoff() {
                Backoff::None => return Ok(reply),
                Backoff::After(delay) if delay <= MAX_RETRY_AFTER => delay,
                Backoff::After(_) | Backoff::Unspecified => self.fallback_cooldown,
            };

            self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            let now = Instant::now();
            let target = now
                .checked_add(delay)
                .or_else(|| now.checked_add(self.fallback_cooldown))
                .unwrap_or(now);
            let until = self.deadline.extend_to(target);
            tracing::warn!(
                "Rate limited, cooling down all workers for {:?}",
                until.saturating_duration_since(Instant::now())
            );
        }
    }

    /// Current shared cooldown deadline
    pub fn cooldown_deadline(&self) -> Option<Instant> {
        self.deadline.current()
    }

    /// Number of rate-limit replies absorbed so far
    pub fn rate_limit_hits(&self) -> u32 {
        self.rate_limit_hits.load(Ordering::Relaxed)
    }
}

/// Parses a `Retry-After` header value
///
/// Accepts delay seconds (integer or fractional) and HTTP dates. Returns
/// `None` for missing, negative, non-finite or unparseable values, and for
/// delays longer than [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let value = value?.trim();

    let delay = match value.parse::<f64>() {
        Ok(seconds) => Duration::try_from_secs_f64(seconds).ok()?,
        Err(_) => {
            let date = DateTime::parse_from_rfc2822(value).ok()?;
            let wait = date.with_timezone(&Utc) - Utc::now();
            wait.to_std().unwrap_or(Duration::ZERO)
        }
    };

    (delay <= MAX_RETRY_AFTER).then_some(delay)
}
