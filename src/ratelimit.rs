//! Per-endpoint-class request pacing and retry backoff.
//!
//! Two separate mechanisms: [`RateLimiter`] spaces request *starts* per
//! endpoint class, [`ApiBackoff`] grows the sleep between *retries* of a
//! failing endpoint and resets on the first success.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fraction of the interval used to randomize each wait.
const DEFAULT_JITTER: f64 = 0.1;

struct ClassState {
    min_interval: Duration,
    last_issued_at: Option<Instant>,
}

/// Paces callers so that successive issues on one endpoint class are at
/// least `min_interval` apart (modulo jitter). Classes are independent;
/// concurrent callers on the same class serialize on its mutex.
pub struct RateLimiter {
    default_interval: Duration,
    jitter: f64,
    classes: Mutex<HashMap<String, Arc<Mutex<ClassState>>>>,
}

impl RateLimiter {
    pub fn new(default_interval_secs: f64) -> Self {
        Self {
            default_interval: Duration::from_secs_f64(default_interval_secs.max(0.0)),
            jitter: DEFAULT_JITTER,
            classes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Override the interval for one endpoint class.
    pub fn set_interval(&self, class: &str, interval_secs: f64) {
        let state = self.class_state(class);
        state.lock().min_interval = Duration::from_secs_f64(interval_secs.max(0.0));
    }

    fn class_state(&self, class: &str) -> Arc<Mutex<ClassState>> {
        let mut classes = self.classes.lock();
        classes
            .entry(class.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ClassState {
                    min_interval: self.default_interval,
                    last_issued_at: None,
                }))
            })
            .clone()
    }

    /// Compute the wait (without sleeping) and stamp the issue time.
    fn reserve(&self, class: &str) -> Duration {
        let state = self.class_state(class);
        let mut state = state.lock();
        let now = Instant::now();
        let interval = state.min_interval;

        let base_wait = match state.last_issued_at {
            Some(last) => (last + interval).saturating_duration_since(now),
            None => Duration::ZERO,
        };

        let jitter_width = interval.as_secs_f64() * self.jitter;
        let jitter = if jitter_width > 0.0 {
            rand::thread_rng().gen_range(-jitter_width..=jitter_width)
        } else {
            0.0
        };
        let wait = (base_wait.as_secs_f64() + jitter).max(0.0);
        let wait = Duration::from_secs_f64(wait);

        // The stamp is the projected issue time, so the next caller paces
        // off the end of this wait rather than its beginning.
        state.last_issued_at = Some(now + wait);
        wait
    }

    /// Block until the class permits the next request start.
    pub async fn wait(&self, class: &str) {
        let wait = self.reserve(class);
        if !wait.is_zero() {
            debug!(class, wait_ms = wait.as_millis() as u64, "Rate limit wait");
            tokio::time::sleep(wait).await;
        }
    }
}

struct BackoffState {
    retry_count: u32,
}

/// Per-endpoint exponential retry delay, reset on first success.
pub struct ApiBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    factor: f64,
    endpoints: Mutex<HashMap<String, BackoffState>>,
}

impl ApiBackoff {
    pub fn new(initial_delay_secs: f64, max_delay_secs: f64, max_retries: u32) -> Self {
        Self {
            initial_delay: Duration::from_secs_f64(initial_delay_secs.max(0.0)),
            max_delay: Duration::from_secs_f64(max_delay_secs.max(0.0)),
            max_retries,
            factor: 2.0,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    pub fn reset(&self, endpoint: &str) {
        self.endpoints.lock().remove(endpoint);
    }

    pub fn should_retry(&self, endpoint: &str) -> bool {
        let endpoints = self.endpoints.lock();
        endpoints
            .get(endpoint)
            .map(|s| s.retry_count < self.max_retries)
            .unwrap_or(true)
    }

    /// Delay to sleep before the next retry of `endpoint`, incrementing the
    /// retry counter. Exponential in the number of prior retries, ±10%
    /// jitter, clamped to the configured maximum.
    pub fn next_delay(&self, endpoint: &str) -> Duration {
        let mut endpoints = self.endpoints.lock();
        let state = endpoints
            .entry(endpoint.to_string())
            .or_insert(BackoffState { retry_count: 0 });

        let exp = self.initial_delay.as_secs_f64() * self.factor.powi(state.retry_count as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.1..=0.1) * capped;
        state.retry_count += 1;
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}
