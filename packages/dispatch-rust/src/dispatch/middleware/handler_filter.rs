//! One handler filter wrapped around the rest of the chain.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use super::{ChainFuture, ChainService};
use crate::dispatch::context::{ExecutedContext, HandlerContext};
use crate::dispatch::error::DispatchError;
use crate::dispatch::filter::Filter;

// ---------------------------------------------------------------------------
// HandlerFilterLayer
// ---------------------------------------------------------------------------

/// Wraps the inner chain with one filter's pre- and post-phase.
#[derive(Clone)]
pub struct HandlerFilterLayer {
    filter: Arc<dyn Filter>,
}

impl HandlerFilterLayer {
    #[must_use]
    pub fn new(filter: Arc<dyn Filter>) -> Self {
        Self { filter }
    }
}

impl Layer<ChainService> for HandlerFilterLayer {
    type Service = HandlerFilterService;

    fn layer(&self, inner: ChainService) -> Self::Service {
        HandlerFilterService {
            filter: Arc::clone(&self.filter),
            inner,
        }
    }
}

// ---------------------------------------------------------------------------
// HandlerFilterService
// ---------------------------------------------------------------------------

/// Service wrapper that runs one filter's pre-phase, the inner chain unless
/// the pre-phase set a response, and the post-phase.
#[derive(Clone)]
pub struct HandlerFilterService {
    filter: Arc<dyn Filter>,
    inner: ChainService,
}

impl Service<HandlerContext> for HandlerFilterService {
    type Response = ExecutedContext;
    type Error = Infallible;
    type Future = ChainFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut context: HandlerContext) -> Self::Future {
        let filter = Arc::clone(&self.filter);
        let inner = self.inner.clone();
        Box::pin(async move {
            if context.is_cancelled() {
                return Ok(ExecutedContext::failed(context, DispatchError::Cancelled));
            }
            let Some(stage) = filter.as_handler_filter() else {
                return inner.oneshot(context).await;
            };

            if let Err(error) = stage.on_executing(&mut context).await {
                debug!(%error, "filter pre-phase failed");
                return Ok(ExecutedContext::failed(context, error));
            }

            let mut executed = if context.response().is_some() {
                debug!("filter short-circuited the handler");
                ExecutedContext::short_circuit(context)
            } else {
                inner.oneshot(context).await?
            };

            if let Err(error) = stage.on_executed(&mut executed).await {
                executed.fail(error);
            }
            Ok(executed)
        })
    }
}
