//! Tower layers making up a dispatch.
//!
//! Inner chain (`HandlerContext -> ExecutedContext`, never fails): handler
//! invocation, handler filters, exception filters, retry. Boundary
//! (`HandlerContext -> Response`, fails with `DispatchError`): last-chance
//! conversion, metrics, timeout, load shedding.

pub mod exception;
pub mod handler_filter;
pub mod invoke;
pub mod last_chance;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod timeout;

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use conduit_core::Response;
use tower::util::BoxCloneService;

use super::context::{ExecutedContext, HandlerContext};
use super::error::DispatchError;

pub use exception::{ExceptionFilterLayer, ExceptionFilterService};
pub use handler_filter::{HandlerFilterLayer, HandlerFilterService};
pub use invoke::HandlerInvokerService;
pub use last_chance::{LastChanceLayer, LastChanceService};
pub use load_shed::{LoadShedLayer, LoadShedService};
pub use metrics::{MetricsLayer, MetricsService};
pub use pipeline::{build_dispatch_pipeline, build_handler_chain};
pub use retry::{Backoff, RetryLayer, RetryOn, RetryPolicy, RetryService};
pub use timeout::{TimeoutLayer, TimeoutService};

/// The inner chain. Failures travel on the `ExecutedContext`.
pub type ChainService = BoxCloneService<HandlerContext, ExecutedContext, Infallible>;

pub type ChainFuture = Pin<Box<dyn Future<Output = Result<ExecutedContext, Infallible>> + Send>>;

/// A complete dispatch pipeline for one descriptor.
pub type DispatchService = BoxCloneService<HandlerContext, Response, DispatchError>;

pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<Response, DispatchError>> + Send>>;

/// Unwraps the result of a chain that cannot fail.
pub(crate) fn settled(result: Result<ExecutedContext, Infallible>) -> ExecutedContext {
    match result {
        Ok(executed) => executed,
        Err(never) => match never {},
    }
}
