//! Boundary between the inner chain and the caller: turns the final
//! `ExecutedContext` into exactly one response or one failure.

use std::sync::Arc;
use std::task::{Context, Poll};

use conduit_core::Response;
use tower::{Layer, Service, ServiceExt};
use tracing::info;

use super::{settled, ChainService, DispatchFuture};
use crate::dispatch::context::HandlerContext;
use crate::dispatch::error::DispatchError;
use crate::traits::LastChanceHandler;

/// Tower layer that settles a chain outcome into a response or a failure.
#[derive(Clone)]
pub struct LastChanceLayer {
    handler: Arc<dyn LastChanceHandler>,
}

impl LastChanceLayer {
    #[must_use]
    pub fn new(handler: Arc<dyn LastChanceHandler>) -> Self {
        Self { handler }
    }
}

impl Layer<ChainService> for LastChanceLayer {
    type Service = LastChanceService;

    fn layer(&self, inner: ChainService) -> Self::Service {
        LastChanceService {
            handler: Arc::clone(&self.handler),
            inner,
        }
    }
}

/// Consults the [`LastChanceHandler`] when a failure survived every
/// exception filter. The handler instance of a transient dispatch is
/// released when this stage returns.
#[derive(Clone)]
pub struct LastChanceService {
    handler: Arc<dyn LastChanceHandler>,
    inner: ChainService,
}

impl Service<HandlerContext> for LastChanceService {
    type Response = Response;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, context: HandlerContext) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        let inner = self.inner.clone();
        Box::pin(async move {
            let executed = settled(inner.oneshot(context).await);
            let (context, outcome) = executed.into_outcome();
            match outcome {
                Ok(response) => Ok(response),
                Err(DispatchError::Cancelled) => Err(DispatchError::Cancelled),
                Err(error) => match handler.handle(context.request(), context.descriptor(), &error) {
                    Some(response) => {
                        info!(%error, "failure recovered by last-chance handler");
                        Ok(response)
                    }
                    None => Err(error),
                },
            }
        })
    }
}
