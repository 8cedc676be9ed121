//! Conduit dispatcher: in-process command and event dispatch through
//! handler-specific filter pipelines.
//!
//! A [`Mediator`] selects the handler for a message, wraps it in the filters
//! contributed by the configuration and the handler's registration, and runs
//! the resulting tower stack with retries, exception filters, and a
//! last-chance handler behind it.

pub mod dispatch;
pub mod filters;
pub mod lifecycle;
pub mod telemetry;
pub mod traits;

pub use dispatch::{
    CommandHandler, DispatchConfig, DispatchError, DispatchOptions, EventHandler, ExceptionFilter,
    ExecutedContext, Filter, HandlerConfiguration, HandlerContext, HandlerFilter, HandlerRegistration,
    HandlerRegistry, Mediator, RetryPolicy,
};
pub use lifecycle::DispatcherState;
pub use traits::{
    DependencyScope, DependencyScopeProvider, FilterProvider, HandlerActivator, HandlerTypeResolver,
    LastChanceHandler, PrincipalProvider,
};
