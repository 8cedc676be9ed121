//! Dispatch pipeline: handler selection, filter pipelines, the execution
//! chain, and the typed mediator on top.

pub mod config;
pub mod configuration;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod mediator;
pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod selector;
pub mod services;
pub mod type_cache;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DispatchConfig, LogConfig, LogFormat};
pub use configuration::{
    AnonymousPrincipal, FactoryActivator, HandlerConfiguration, HandlerConfigurationBuilder, PropagateFailure,
};
pub use context::{Disposables, ExecutedContext, HandlerContext, HandlerRequest};
pub use descriptor::{HandlerDescriptor, HandlerType};
pub use error::{DispatchError, TransientError};
pub use filter::{DeclaredFilterProvider, ExceptionFilter, Filter, FilterInfo, GlobalFilterProvider, HandlerFilter};
pub use mediator::{DispatchOptions, Mediator};
pub use middleware::{Backoff, RetryOn, RetryPolicy};
pub use pipeline::{build_filter_pipeline, order_filters, FilterGrouping};
pub use registry::{CommandHandler, EventHandler, HandlerRegistration, HandlerRegistry, HandlerTypeInfo};
pub use selector::HandlerSelector;
pub use services::{ServiceCollection, ServiceScope, ServiceScopeProvider};
pub use type_cache::HandlerTypeCache;
pub use worker::Worker;
