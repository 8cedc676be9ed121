//! Load-shedding middleware for dispatches.
//!
//! Rejects root dispatches with `DispatchError::Overloaded` once
//! `max_concurrent_dispatches` are in flight. Sub-dispatches run under their
//! root's permit and are never shed.

use std::sync::Arc;
use std::task::{Context, Poll};

use conduit_core::Response;
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use super::DispatchFuture;
use crate::dispatch::context::HandlerContext;
use crate::dispatch::error::DispatchError;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Permits are shared with the configuration, so every pipeline built from
/// it draws from the same pool.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(semaphore: Arc<Semaphore>) -> Self {
        Self { semaphore }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

/// Service wrapper that rejects root dispatches when no permit is free.
#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<HandlerContext> for LoadShedService<S>
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
        if !context.request().is_root() {
            return Box::pin(self.inner.call(context));
        }
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            metrics::counter!("conduit_dispatch_shed_total").increment(1);
            return Box::pin(async { Err(DispatchError::Overloaded) });
        };

        let fut = self.inner.call(context);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
