//! Exception filters wrapped around the whole handler-filter chain.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use super::{ChainFuture, ChainService};
use crate::dispatch::context::{ExecutedContext, HandlerContext};
use crate::dispatch::error::DispatchError;
use crate::dispatch::filter::Filter;

/// Tower layer that offers unrecovered failures to the exception filters.
#[derive(Clone)]
pub struct ExceptionFilterLayer {
    filters: Arc<[Arc<dyn Filter>]>,
}

impl ExceptionFilterLayer {
    /// `filters` outermost first, as in the pipeline.
    #[must_use]
    pub fn new(filters: &[Arc<dyn Filter>]) -> Self {
        Self {
            filters: filters.iter().cloned().collect(),
        }
    }
}

impl Layer<ChainService> for ExceptionFilterLayer {
    type Service = ExceptionFilterService;

    fn layer(&self, inner: ChainService) -> Self::Service {
        ExceptionFilterService {
            filters: Arc::clone(&self.filters),
            inner,
        }
    }
}

/// On failure, offers the outcome to each exception filter, last registered
/// first, until one sets a response. A filter that fails supersedes the
/// pending failure and traversal continues with the new one. Cancellation
/// is never offered to exception filters.
#[derive(Clone)]
pub struct ExceptionFilterService {
    filters: Arc<[Arc<dyn Filter>]>,
    inner: ChainService,
}

impl Service<HandlerContext> for ExceptionFilterService {
    type Response = ExecutedContext;
    type Error = Infallible;
    type Future = ChainFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, context: HandlerContext) -> Self::Future {
        let filters = Arc::clone(&self.filters);
        let inner = self.inner.clone();
        Box::pin(async move {
            if context.is_cancelled() {
                return Ok(ExecutedContext::failed(context, DispatchError::Cancelled));
            }
            let mut executed = inner.oneshot(context).await?;

            for filter in filters.iter().rev() {
                if matches!(executed.error(), None | Some(DispatchError::Cancelled)) {
                    break;
                }
                let Some(stage) = filter.as_exception_filter() else {
                    continue;
                };
                if let Err(error) = stage.on_exception(&mut executed).await {
                    executed.fail(error);
                }
            }
            if executed.exception_handled() {
                debug!("failure recovered by exception filter");
            }
            Ok(executed)
        })
    }
}
