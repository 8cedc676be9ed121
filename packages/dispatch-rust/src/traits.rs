use std::any::{Any, TypeId};
use std::sync::Arc;

use conduit_core::{Principal, Response};

use crate::dispatch::configuration::HandlerConfiguration;
use crate::dispatch::context::HandlerRequest;
use crate::dispatch::descriptor::HandlerDescriptor;
use crate::dispatch::error::DispatchError;
use crate::dispatch::filter::FilterInfo;
use crate::dispatch::registry::HandlerTypeInfo;

/// A type-erased handler instance produced by a [`HandlerActivator`].
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

/// Source of the handler types known to a configuration.
/// Consulted exactly once, when the handler type cache is first built.
pub trait HandlerTypeResolver: Send + Sync {
    fn handler_types(&self) -> Vec<Arc<HandlerTypeInfo>>;
}

/// Creates handler instances for a dispatch.
///
/// Returning `None` is reported to the caller as `HandlerNotFound`.
/// Lifetime handling (caching singletons, disposing per-request instances)
/// happens in the worker, not here.
pub trait HandlerActivator: Send + Sync {
    fn create(&self, request: &HandlerRequest, descriptor: &HandlerDescriptor) -> Option<HandlerInstance>;
}

/// Contributes filters to a handler's pipeline.
pub trait FilterProvider: Send + Sync {
    fn filters(&self, configuration: &HandlerConfiguration, descriptor: &HandlerDescriptor) -> Vec<FilterInfo>;
}

/// Opens a dependency scope for each handler run.
pub trait DependencyScopeProvider: Send + Sync {
    fn begin_scope(&self, request: &Arc<HandlerRequest>) -> Arc<dyn DependencyScope>;
}

/// Service location for handlers and filters.
/// See [`HandlerContext::resolve`](crate::dispatch::context::HandlerContext::resolve)
/// for the typed accessor.
pub trait DependencyScope: Send + Sync {
    fn resolve(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Supplies the principal a dispatch runs on behalf of.
pub trait PrincipalProvider: Send + Sync {
    fn current_principal(&self, request: &HandlerRequest) -> Option<Principal>;
}

/// Terminal recovery step, consulted when a failure survives every exception
/// filter. Returning `None` propagates the failure to the caller.
pub trait LastChanceHandler: Send + Sync {
    fn handle(
        &self,
        request: &HandlerRequest,
        descriptor: &HandlerDescriptor,
        error: &DispatchError,
    ) -> Option<Response>;
}
