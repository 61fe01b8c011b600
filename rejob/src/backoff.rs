//! Backoff strategies for computing retry delays.
//!
//! A strategy maps the zero based number of the attempt that just failed to the delay before the
//! next attempt. Three curves are provided:
//!
//! 1. Constant: `base`
//! 2. Linear: `base * (attempt + 1)`, the default used by [`crate::job::Job::retry_policy`]
//! 3. Exponential: `base * 2^attempt`
//!
//! each of which can be clamped to a maximum, and optionally modified by applying jitter. No
//! strategy ever returns more than [`MAX_DELAY`].
//!
//! All of the constructors and configuration functions are `const`.
//!
//! # Example
//!
//! ```
//! # use rejob::prelude::*;
//! # use chrono::TimeDelta;
//! let strategy = BackoffStrategy::linear(TimeDelta::seconds(20))
//!     .with_max(TimeDelta::seconds(60))
//!     .with_jitter(Jitter::Absolute(TimeDelta::seconds(10)));
//!
//! assert!(strategy.backoff(0) >= TimeDelta::seconds(10));
//! assert!(strategy.backoff(0) <= TimeDelta::seconds(30));
//! assert!(strategy.backoff(1) >= TimeDelta::seconds(30));
//! assert!(strategy.backoff(1) <= TimeDelta::seconds(50));
//! // Note the max here is the max plus max jitter
//! assert!(strategy.backoff(9) >= TimeDelta::seconds(50));
//! assert!(strategy.backoff(9) <= TimeDelta::seconds(70));
//! ```
use chrono::TimeDelta;
use rand::Rng;

/// The upper bound of every computed backoff.
pub const MAX_DELAY: TimeDelta = TimeDelta::days(365);

/// Type that can be used to implement a backoff strategy.
pub trait Strategy {
    /// Given the zero based number of the attempt that failed returns the [`TimeDelta`] to wait
    /// before the job should be retried.
    fn backoff(&self, attempt: u16) -> TimeDelta;
}

/// The shape of the delay growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    Constant(TimeDelta),
    Linear(TimeDelta),
    Exponential(TimeDelta),
}

impl Strategy for Curve {
    fn backoff(&self, attempt: u16) -> TimeDelta {
        let (base, factor) = match *self {
            Self::Constant(base) => (base, 1),
            Self::Linear(base) => (base, i64::from(attempt) + 1),
            Self::Exponential(base) => (
                base,
                2i64.checked_pow(attempt.into()).unwrap_or(i64::MAX),
            ),
        };
        TimeDelta::milliseconds(base.num_milliseconds().saturating_mul(factor))
    }
}

/// A random jitter to be applied to a given backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// A random jitter to be added to the backoff in the range `-delta =< jitter =< delta`.
    Absolute(TimeDelta),
    /// A random jitter to be added as a proportion of the current backoff.
    Relative(f64),
}

impl Jitter {
    fn apply_jitter(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round() as i64,
        }
        .saturating_abs();
        let jitter = rand::thread_rng().gen_range(-milliseconds..=milliseconds);
        value
            .checked_add(&TimeDelta::milliseconds(jitter))
            .unwrap_or(value)
    }
}

/// A backoff [`Curve`] with an optional maximum, minimum, and [`Jitter`].
///
/// # Example
///
/// ```
/// # use rejob::prelude::*;
/// # use chrono::TimeDelta;
/// let strategy = BackoffStrategy::linear(TimeDelta::seconds(10));
///
/// assert_eq!(strategy.backoff(0), TimeDelta::seconds(10));
/// assert_eq!(strategy.backoff(1), TimeDelta::seconds(20));
/// assert_eq!(strategy.backoff(4), TimeDelta::seconds(50));
///
/// let strategy =
///     BackoffStrategy::exponential(TimeDelta::seconds(2)).with_max(TimeDelta::seconds(30));
///
/// assert_eq!(strategy.backoff(0), TimeDelta::seconds(2));
/// assert_eq!(strategy.backoff(1), TimeDelta::seconds(4));
/// assert_eq!(strategy.backoff(3), TimeDelta::seconds(16));
/// assert_eq!(strategy.backoff(4), TimeDelta::seconds(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffStrategy {
    curve: Curve,
    max: Option<TimeDelta>,
    jitter: Option<Jitter>,
    min: TimeDelta,
}

impl BackoffStrategy {
    pub const fn new(curve: Curve) -> Self {
        Self {
            curve,
            max: None,
            jitter: None,
            min: TimeDelta::zero(),
        }
    }

    /// Always waits `delay`, no matter the attempt.
    pub const fn constant(delay: TimeDelta) -> Self {
        Self::new(Curve::Constant(delay))
    }

    /// Waits `base * (attempt + 1)`.
    pub const fn linear(base: TimeDelta) -> Self {
        Self::new(Curve::Linear(base))
    }

    /// Waits `base * 2^attempt`. It is advisable to set a maximum via
    /// [`BackoffStrategy::with_max`].
    pub const fn exponential(base: TimeDelta) -> Self {
        Self::new(Curve::Exponential(base))
    }

    /// Clamps the delay before jitter is applied.
    pub const fn with_max(mut self, max_delay: TimeDelta) -> Self {
        self.max = Some(max_delay);
        self
    }

    /// Add a jitter to the backoff strategy see [`Jitter`] for more information about how this
    /// affects the strategy.
    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Add a minimum value. This can be useful when you have a particularly large jitter and would
    /// like to avoid a delay of less than a given amount.
    pub const fn with_min(mut self, min: TimeDelta) -> Self {
        self.min = min;
        self
    }

    pub const fn curve(&self) -> Curve {
        self.curve
    }
}

impl Strategy for BackoffStrategy {
    fn backoff(&self, attempt: u16) -> TimeDelta {
        let mut backoff = self.curve.backoff(attempt).min(MAX_DELAY);

        if let Some(max) = self.max {
            backoff = backoff.min(max);
        }

        if let Some(jitter) = self.jitter {
            backoff = jitter.apply_jitter(backoff);
        }

        backoff.max(self.min).min(MAX_DELAY)
    }
}
