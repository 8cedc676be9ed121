//! Retry policy and the layer that re-runs the whole chain under it.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use tower::{Layer, Service, ServiceExt};
use tracing::warn;

use super::{ChainFuture, ChainService};
use crate::dispatch::context::{ExecutedContext, HandlerContext};
use crate::dispatch::error::DispatchError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Which failures a policy retries. Cancellation is never retried.
#[derive(Clone)]
pub enum RetryOn {
    /// Handler failures, handler panics, and filter failures.
    AnyFailure,
    /// Failures whose cause chain contains a
    /// [`TransientError`](crate::dispatch::error::TransientError).
    Transient,
    Custom(Arc<dyn Fn(&DispatchError) -> bool + Send + Sync>),
}

impl RetryOn {
    fn matches(&self, error: &DispatchError) -> bool {
        match self {
            Self::AnyFailure => matches!(
                error,
                DispatchError::Handler { .. } | DispatchError::HandlerPanicked { .. } | DispatchError::Filter { .. }
            ),
            Self::Transient => error.is_transient(),
            Self::Custom(predicate) => predicate(error),
        }
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyFailure => f.write_str("AnyFailure"),
            Self::Transient => f.write_str("Transient"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Delay between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`. With `jitter`, the delay is
    /// drawn uniformly from its upper half.
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

/// Declared retry behavior of a handler.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    retry_on: RetryOn,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt; the retry layer is not installed.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            retry_on: RetryOn::AnyFailure,
            backoff: Backoff::None,
        }
    }

    /// Retries handler, panic, and filter failures up to `max_attempts`
    /// attempts in total.
    #[must_use]
    pub fn on_any_failure(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_on: RetryOn::AnyFailure,
            backoff: Backoff::None,
        }
    }

    /// Retries only failures marked with `TransientError`.
    #[must_use]
    pub fn transient(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_on: RetryOn::Transient,
            backoff: Backoff::None,
        }
    }

    /// Retries failures accepted by `predicate`.
    #[must_use]
    pub fn when(max_attempts: u32, predicate: impl Fn(&DispatchError) -> bool + Send + Sync + 'static) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_on: RetryOn::Custom(Arc::new(predicate)),
            backoff: Backoff::None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Whether the policy allows more than one attempt.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.max_attempts > 1
    }

    /// Whether a failure on `attempt` (1-based) should be followed by another.
    #[must_use]
    pub fn should_retry(&self, error: &DispatchError, attempt: u32) -> bool {
        attempt < self.max_attempts
            && !matches!(error, DispatchError::Cancelled)
            && !error.is_resolution()
            && self.retry_on.matches(error)
    }

    /// Delay before the attempt following `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max, jitter } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = base.saturating_mul(1 << exponent).min(*max);
                if *jitter && !delay.is_zero() {
                    let half = delay / 2;
                    half + rand::rng().random_range(Duration::ZERO..=half)
                } else {
                    delay
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RetryLayer
// ---------------------------------------------------------------------------

/// Tower layer that re-runs the handler chain under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Layer<ChainService> for RetryLayer {
    type Service = RetryService;

    fn layer(&self, inner: ChainService) -> Self::Service {
        RetryService {
            policy: self.policy.clone(),
            inner,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryService
// ---------------------------------------------------------------------------

/// Re-runs the whole inner chain while the policy accepts the failure. Every
/// attempt runs every filter phase again; the item bag carries over.
#[derive(Clone)]
pub struct RetryService {
    policy: RetryPolicy,
    inner: ChainService,
}

impl Service<HandlerContext> for RetryService {
    type Response = ExecutedContext;
    type Error = Infallible;
    type Future = ChainFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, context: HandlerContext) -> Self::Future {
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut context = context;
            loop {
                let attempt = context.attempt();
                let executed = inner.clone().oneshot(context).await?;

                let retry = executed
                    .error()
                    .is_some_and(|error| policy.should_retry(error, attempt));
                if !retry {
                    return Ok(executed);
                }
                if let Some(error) = executed.error() {
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts(),
                        %error,
                        "dispatch attempt failed, retrying"
                    );
                }
                metrics::counter!("conduit_retry_attempts_total").increment(1);

                context = executed.into_retry();
                let delay = policy.delay_after(attempt);
                if !delay.is_zero() {
                    let cancellation = context.cancellation().clone();
                    tokio::select! {
                        () = cancellation.cancelled() => {
                            return Ok(ExecutedContext::failed(context, DispatchError::Cancelled));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
