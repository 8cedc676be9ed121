//! Pipeline composition: folds the filter chain and wraps it with the
//! boundary layers.

use std::sync::Arc;

use tower::{Layer, ServiceBuilder};

use super::exception::ExceptionFilterLayer;
use super::handler_filter::HandlerFilterLayer;
use super::invoke::HandlerInvokerService;
use super::last_chance::LastChanceLayer;
use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::retry::{RetryLayer, RetryPolicy};
use super::timeout::TimeoutLayer;
use super::{ChainService, DispatchService};
use crate::dispatch::configuration::HandlerConfiguration;
use crate::dispatch::descriptor::HandlerDescriptor;
use crate::dispatch::pipeline::FilterGrouping;

/// Build the inner chain for one grouping.
///
/// Layer order (outermost to innermost):
/// 1. `RetryLayer` -- only when the policy allows more than one attempt
/// 2. `ExceptionFilterLayer` -- only when the grouping has exception filters
/// 3. one `HandlerFilterLayer` per handler filter, in pipeline order
/// 4. `HandlerInvokerService`
#[must_use]
pub fn build_handler_chain(grouping: &FilterGrouping, retry: &RetryPolicy) -> ChainService {
    let mut chain = grouping
        .handler_filters()
        .iter()
        .rev()
        .fold(ChainService::new(HandlerInvokerService), |inner, filter| {
            ChainService::new(HandlerFilterLayer::new(Arc::clone(filter)).layer(inner))
        });

    if !grouping.exception_filters().is_empty() {
        chain = ChainService::new(ExceptionFilterLayer::new(grouping.exception_filters()).layer(chain));
    }
    if retry.is_active() {
        chain = ChainService::new(RetryLayer::new(retry.clone()).layer(chain));
    }
    chain
}

/// Build the full dispatch pipeline for a descriptor.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject root dispatches when overloaded
/// 2. `TimeoutLayer` -- enforce the request deadline
/// 3. `MetricsLayer` -- span, counters, and duration
/// 4. `LastChanceLayer` -- settle the outcome into a response or a failure
/// 5. the inner chain from [`build_handler_chain`]
#[must_use]
pub fn build_dispatch_pipeline(configuration: &HandlerConfiguration, descriptor: &HandlerDescriptor) -> DispatchService {
    let grouping = descriptor.filter_grouping(configuration);
    let chain = build_handler_chain(&grouping, descriptor.retry_policy());
    DispatchService::new(
        ServiceBuilder::new()
            .layer(LoadShedLayer::new(Arc::clone(configuration.dispatch_permits())))
            .layer(TimeoutLayer)
            .layer(MetricsLayer)
            .layer(LastChanceLayer::new(Arc::clone(configuration.last_chance_handler())))
            .service(chain),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
