//! Timeout middleware for dispatches.
//!
//! Fails dispatches that outlive their request's deadline with
//! `DispatchError::Timeout` and cancels the handler run so that its
//! sub-dispatches and retry backoffs stop as well.

use std::task::{Context, Poll};

use conduit_core::Response;
use tower::{Layer, Service};
use tracing::warn;

use super::DispatchFuture;
use crate::dispatch::context::HandlerContext;
use crate::dispatch::error::DispatchError;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// The deadline is read from each request, so root dispatches can carry
/// different timeouts and sub-dispatches carry none.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces the per-request deadline on one handler run.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<HandlerContext> for TimeoutService<S>
where
    S: Service<HandlerContext, Response = Response, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, context: HandlerContext) -> Self::Future {
        let timeout = context.request().timeout();
        let cancellation = context.cancellation().clone();
        let fut = self.inner.call(context);
        Box::pin(async move {
            let Some(duration) = timeout else {
                return fut.await;
            };
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    cancellation.cancel();
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = duration.as_millis() as u64;
                    warn!(timeout_ms, "dispatch timed out");
                    Err(DispatchError::Timeout { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use conduit_core::{Event, Message};
    use tokio_util::sync::CancellationToken;

    use crate::dispatch::configuration::HandlerConfiguration;
    use crate::dispatch::context::HandlerContext;
    use crate::dispatch::error::DispatchError;
    use crate::dispatch::mediator::{DispatchOptions, Mediator};
    use crate::dispatch::registry::{EventHandler, HandlerRegistration, HandlerRegistry};
    use crate::dispatch::testing::{echo, mediator_with, parking, Echo, Park};

    #[tokio::test(start_paused = true)]
    async fn dispatch_past_deadline_times_out_without_cancelling_the_caller() {
        let (registration, _entered, _gate) = parking();
        let mediator = mediator_with(registration, |b| b);
        let token = CancellationToken::new();

        let err = mediator
            .send_with(
                Park,
                DispatchOptions::new()
                    .timeout(Duration::from_millis(50))
                    .cancellation(token.clone()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 50 }));
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_caller_token_survives_a_timed_out_dispatch() {
        let (parked, _entered, _gate) = parking();
        let (echoing, calls) = echo();
        let mut registry = HandlerRegistry::new();
        registry.register(parked).unwrap();
        registry.register(echoing).unwrap();
        let mediator = Mediator::new(HandlerConfiguration::builder(registry).build().unwrap());
        let app_token = CancellationToken::new();

        let first = mediator
            .send_with(
                Park,
                DispatchOptions::new()
                    .timeout(Duration::from_millis(50))
                    .cancellation(app_token.clone()),
            )
            .await;
        assert!(matches!(first, Err(DispatchError::Timeout { timeout_ms: 50 })));

        let second = mediator
            .send_with(Echo("fast"), DispatchOptions::new().cancellation(app_token.clone()))
            .await
            .unwrap();
        assert_eq!(second, "fast");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct Tick;
    impl Message for Tick {}
    impl Event for Tick {}

    struct Stalled;

    #[async_trait]
    impl EventHandler<Tick> for Stalled {
        async fn handle(&self, _event: &Tick, _context: &mut HandlerContext) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct Prompt(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler<Tick> for Prompt {
        async fn handle(&self, _event: &Tick, _context: &mut HandlerContext) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_event_handler_leaves_the_next_one_running() {
        let ran = Arc::new(AtomicUsize::new(0));
        let shared = Arc::clone(&ran);
        let mut registry = HandlerRegistry::new();
        registry
            .register(HandlerRegistration::new(|| Stalled).handles_event::<Tick>())
            .unwrap();
        registry
            .register(HandlerRegistration::new(move || Prompt(Arc::clone(&shared))).handles_event::<Tick>())
            .unwrap();
        let mediator = Mediator::new(HandlerConfiguration::builder(registry).build().unwrap());

        let result = mediator
            .publish_with(Tick, DispatchOptions::new().timeout(Duration::from_millis(50)))
            .await;

        assert!(matches!(result, Err(DispatchError::Timeout { timeout_ms: 50 })));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_deadline_applies_by_default() {
        let (registration, _entered, _gate) = parking();
        let mediator = mediator_with(registration, |b| b);

        let err = mediator.send(Park).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 30_000 }));
    }

    #[tokio::test]
    async fn dispatch_within_deadline_passes_through() {
        let (registration, _) = echo();
        let mediator = mediator_with(registration, |b| b);

        let response = mediator
            .send_with(Echo("fast"), DispatchOptions::new().timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(response, "fast");
    }
}
