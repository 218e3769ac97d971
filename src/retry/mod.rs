//! Retry eligibility and backoff.
//!
//! [`RetryOptions`] is what a caller supplies; [`RetryPolicy::compose`] fills
//! in defaults from [`RetrySettings`]. After every attempt the policy runs the
//! baseline check (no error, `200 OK`) and then each caller check in order,
//! stopping at the first one that flags the attempt.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::AttemptError;
use crate::http::Response;

/// A caller condition on an otherwise successful response.
///
/// `Err(reason)` means "retry this attempt".
pub type RetryCheck = Arc<dyn Fn(&Response) -> Result<(), String> + Send + Sync>;

/// Delay between attempts, before jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    Fixed(Duration),
    /// `base * factor^(n-1)` after the n-th failed attempt, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay after the `attempt`-th failure (1-based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential { base, factor, max } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let scaled = base.as_secs_f64() * factor.powi(exponent);
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(scaled.max(0.0))
                }
            }
        }
    }
}

/// Caller-supplied retry settings for one call.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use outpost::retry::{Backoff, RetryOptions};
///
/// let options = RetryOptions::new()
///     .attempts(5)
///     .backoff(Backoff::Fixed(Duration::from_millis(50)))
///     .check(|response| {
///         if response.body().contains("\"Code\":0") {
///             Ok(())
///         } else {
///             Err("business error code".into())
///         }
///     });
/// ```
#[derive(Clone, Default)]
pub struct RetryOptions {
    attempts: u32,
    checks: Vec<RetryCheck>,
    backoff: Option<Backoff>,
    max_jitter: Option<Duration>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts including the first. `0` means "use the default".
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Response) -> Result<(), String> + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = Some(jitter);
        self
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("attempts", &self.attempts)
            .field("checks", &self.checks.len())
            .field("backoff", &self.backoff)
            .field("max_jitter", &self.max_jitter)
            .finish()
    }
}

/// The effective retry policy of one call.
#[derive(Clone)]
pub struct RetryPolicy {
    attempts: u32,
    checks: Vec<RetryCheck>,
    backoff: Backoff,
    max_jitter: Duration,
}

impl RetryPolicy {
    /// One attempt, no caller checks. Used when a call asks for no retry.
    pub fn single() -> Self {
        Self {
            attempts: 1,
            checks: Vec::new(),
            backoff: Backoff::None,
            max_jitter: Duration::ZERO,
        }
    }

    /// Applies defaults: attempts from settings when `0`, exponential backoff
    /// from settings when none is given.
    pub fn compose(options: RetryOptions, settings: &RetrySettings) -> Self {
        let attempts = if options.attempts == 0 {
            settings.attempts.max(1)
        } else {
            options.attempts
        };
        let backoff = options.backoff.unwrap_or(Backoff::Exponential {
            base: settings.base_delay(),
            factor: settings.backoff_factor,
            max: settings.max_delay(),
        });
        Self {
            attempts,
            checks: options.checks,
            backoff,
            max_jitter: options.max_jitter.unwrap_or_else(|| settings.max_jitter()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `Ok(())` stops the loop; `Err` flags the attempt for another try and
    /// becomes the attempt's recorded error.
    pub fn evaluate(&self, response: &Response) -> Result<(), AttemptError> {
        if let Some(err) = response.error() {
            return Err(err.clone());
        }
        if !response.status().is_ok() {
            return Err(AttemptError::Status(response.status()));
        }
        for check in &self.checks {
            check(response).map_err(AttemptError::Rejected)?;
        }
        Ok(())
    }

    /// Delay to sleep after the `attempt`-th failure, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay(attempt);
        if delay.is_zero() || self.max_jitter.is_zero() {
            return delay;
        }
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        delay.saturating_add(Duration::from_millis(fastrand::u64(0..=jitter_ms)))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("checks", &self.checks.len())
            .field("backoff", &self.backoff)
            .field("max_jitter", &self.max_jitter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::http::{RequestSpec, StatusCode};

    fn request() -> RequestSpec {
        RequestSpec::builder().address("http://a/b").build().unwrap()
    }

    #[test]
    fn zero_attempts_take_the_default() {
        let policy = RetryPolicy::compose(RetryOptions::new().attempts(0), &RetrySettings::default());
        assert_eq!(policy.attempts(), 3);

        let policy = RetryPolicy::compose(RetryOptions::new().attempts(7), &RetrySettings::default());
        assert_eq!(policy.attempts(), 7);
    }

    #[test]
    fn baseline_flags_errors_and_bad_statuses() {
        let policy = RetryPolicy::compose(RetryOptions::new(), &RetrySettings::default());

        let failed = Response::failed(request(), TransportError::InvalidRequest("x".into()));
        assert!(matches!(policy.evaluate(&failed), Err(AttemptError::Transport(_))));

        let busy = Response::new(request(), StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(
            policy.evaluate(&busy),
            Err(AttemptError::Status(StatusCode::SERVICE_UNAVAILABLE))
        );

        let created = Response::new(request(), StatusCode::CREATED, "{}");
        assert_eq!(
            policy.evaluate(&created),
            Err(AttemptError::Status(StatusCode::CREATED))
        );
    }

    #[test]
    fn caller_checks_run_only_after_baseline_passes() {
        let policy = RetryPolicy::compose(
            RetryOptions::new().check(|r| {
                if r.body().is_empty() {
                    Err("empty body".into())
                } else {
                    Ok(())
                }
            }),
            &RetrySettings::default(),
        );

        let empty_ok = Response::new(request(), StatusCode::OK, "");
        assert_eq!(
            policy.evaluate(&empty_ok),
            Err(AttemptError::Rejected("empty body".into()))
        );

        let bad_gateway = Response::new(request(), StatusCode::BAD_GATEWAY, "");
        assert_eq!(
            policy.evaluate(&bad_gateway),
            Err(AttemptError::Status(StatusCode::BAD_GATEWAY))
        );

        assert!(policy.evaluate(&Response::new(request(), StatusCode::OK, "{}")).is_ok());
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_millis(500),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(500));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy::compose(
            RetryOptions::new()
                .backoff(Backoff::Fixed(Duration::from_millis(10)))
                .max_jitter(Duration::from_millis(5)),
            &RetrySettings::default(),
        );
        for attempt in 1..50 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
        assert_eq!(RetryPolicy::single().delay_for(1), Duration::ZERO);
    }
}
