//! Metrics middleware for dispatches.
//!
//! Wraps each dispatch in a `tracing` span and records `metrics` counters
//! and a duration histogram labelled by message type and outcome.

use std::task::{Context, Poll};
use std::time::Instant;

use conduit_core::Response;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::DispatchFuture;
use crate::dispatch::context::HandlerContext;
use crate::dispatch::error::DispatchError;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments dispatches with a `tracing` span, a counter,
/// and a duration histogram.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records dispatch duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<HandlerContext> for MetricsService<S>
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
        let message_type = context.request().message_type().name();
        let handler = context.descriptor().handler_type().name();
        let request_id = context.request().id();

        let span = info_span!(
            "dispatch",
            %request_id,
            message_type,
            handler,
            depth = context.request().depth(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(context);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(error) => error.kind(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!("conduit_dispatch_total", "message_type" => message_type, "outcome" => outcome)
                    .increment(1);
                metrics::histogram!("conduit_dispatch_duration_seconds", "message_type" => message_type)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::debug!(duration_ms, "dispatch complete"),
                    Err(error) => tracing::info!(duration_ms, %error, outcome, "dispatch failed"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conduit_core::Response;
    use tower::{service_fn, Layer, ServiceExt};

    use super::MetricsLayer;
    use crate::dispatch::context::HandlerContext;
    use crate::dispatch::error::DispatchError;
    use crate::dispatch::testing::{context_for, echo, mediator_with, Echo};

    fn context() -> HandlerContext {
        let (registration, _) = echo();
        let mediator = mediator_with(registration, |b| b);
        context_for(mediator.configuration(), Echo("metrics"))
    }

    #[tokio::test]
    async fn passes_responses_through() {
        let service = MetricsLayer.layer(service_fn(|_context: HandlerContext| async {
            Ok::<_, DispatchError>(Response::new("done".to_string()))
        }));

        let response = service.oneshot(context()).await.unwrap();
        assert_eq!(response.downcast_ref::<String>().unwrap(), "done");
    }

    #[tokio::test]
    async fn passes_failures_through() {
        let service = MetricsLayer.layer(service_fn(|_context: HandlerContext| async {
            Err::<Response, _>(DispatchError::Overloaded)
        }));

        let err = service.oneshot(context()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded));
    }
}
