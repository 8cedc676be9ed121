//! Filter capabilities and the `(instance, scope)` records pipelines are
//! built from.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::FilterScope;

use super::configuration::HandlerConfiguration;
use super::context::{ExecutedContext, HandlerContext};
use super::descriptor::HandlerDescriptor;
use super::error::DispatchError;
use crate::traits::FilterProvider;

/// Runs around the handler.
///
/// A pre-phase error skips this filter's post-phase; filters outside it still
/// see the failure in theirs. A pre-phase that sets the response skips the
/// handler and every filter inside this one, and this filter's post-phase
/// still runs. A post-phase error supersedes the pending outcome.
#[async_trait]
pub trait HandlerFilter: Send + Sync {
    async fn on_executing(&self, _context: &mut HandlerContext) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn on_executed(&self, _executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Runs only when the chain produced a failure. Setting a response through
/// [`ExecutedContext::set_response`] recovers and stops traversal.
#[async_trait]
pub trait ExceptionFilter: Send + Sync {
    async fn on_exception(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError>;
}

/// A unit of cross-cutting behavior.
///
/// Every filter exposes at least one capability; a filter may expose both,
/// in which case it takes part in both chains.
pub trait Filter: Send + Sync + 'static {
    /// Whether several instances of this filter type may share one pipeline.
    /// When `false`, only the instance nearest the handler is kept.
    fn allow_multiple(&self) -> bool {
        true
    }

    fn as_handler_filter(&self) -> Option<&dyn HandlerFilter> {
        None
    }

    fn as_exception_filter(&self) -> Option<&dyn ExceptionFilter> {
        None
    }
}

// ---------------------------------------------------------------------------
// FilterInfo
// ---------------------------------------------------------------------------

/// A filter instance with its ordering scope and type identity.
#[derive(Clone)]
pub struct FilterInfo {
    instance: Arc<dyn Filter>,
    scope: FilterScope,
    filter_type: TypeId,
    type_name: &'static str,
}

impl FilterInfo {
    /// # Errors
    ///
    /// Returns `Configuration` if the filter exposes neither capability.
    pub fn new<F: Filter>(filter: F, scope: FilterScope) -> Result<Self, DispatchError> {
        Self::from_arc(Arc::new(filter), scope)
    }

    /// Same as [`new`](Self::new) for an instance shared elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the filter exposes neither capability.
    pub fn from_arc<F: Filter>(filter: Arc<F>, scope: FilterScope) -> Result<Self, DispatchError> {
        let type_name = std::any::type_name::<F>();
        if filter.as_handler_filter().is_none() && filter.as_exception_filter().is_none() {
            return Err(DispatchError::Configuration(format!(
                "{type_name} implements neither HandlerFilter nor ExceptionFilter"
            )));
        }
        Ok(Self {
            instance: filter,
            scope,
            filter_type: TypeId::of::<F>(),
            type_name,
        })
    }

    #[must_use]
    pub fn instance(&self) -> &Arc<dyn Filter> {
        &self.instance
    }

    #[must_use]
    pub fn scope(&self) -> FilterScope {
        self.scope
    }

    #[must_use]
    pub fn filter_type(&self) -> TypeId {
        self.filter_type
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn allow_multiple(&self) -> bool {
        self.instance.allow_multiple()
    }

    /// True when both records point at the same filter instance.
    #[must_use]
    pub fn same_instance(&self, other: &FilterInfo) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.instance).cast::<()>(),
            Arc::as_ptr(&other.instance).cast::<()>(),
        )
    }
}

impl fmt::Debug for FilterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterInfo")
            .field("type_name", &self.type_name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Contributes the configuration's global filter list.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalFilterProvider;

impl FilterProvider for GlobalFilterProvider {
    fn filters(&self, configuration: &HandlerConfiguration, _descriptor: &HandlerDescriptor) -> Vec<FilterInfo> {
        configuration.global_filters().to_vec()
    }
}

/// Contributes the filters declared on the handler's registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredFilterProvider;

impl FilterProvider for DeclaredFilterProvider {
    fn filters(&self, _configuration: &HandlerConfiguration, descriptor: &HandlerDescriptor) -> Vec<FilterInfo> {
        descriptor.declared_filters().to_vec()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
