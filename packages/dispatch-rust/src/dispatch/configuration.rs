//! The runtime composition root: settings, global filters, collaborators,
//! and the caches that live as long as the configuration.

use std::fmt;
use std::sync::Arc;

use conduit_core::{FilterScope, Principal, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;

use super::config::DispatchConfig;
use super::context::{Disposables, HandlerRequest};
use super::descriptor::{HandlerDescriptor, HandlerType};
use super::error::DispatchError;
use super::filter::{DeclaredFilterProvider, Filter, FilterInfo, GlobalFilterProvider};
use super::selector::HandlerSelector;
use super::services::{ServiceCollection, ServiceScopeProvider};
use super::type_cache::HandlerTypeCache;
use crate::traits::{
    DependencyScopeProvider, FilterProvider, HandlerActivator, HandlerInstance, HandlerTypeResolver,
    LastChanceHandler, PrincipalProvider,
};

// ---------------------------------------------------------------------------
// Default collaborators
// ---------------------------------------------------------------------------

/// Creates instances through the factory given at registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactoryActivator;

impl HandlerActivator for FactoryActivator {
    fn create(&self, _request: &HandlerRequest, descriptor: &HandlerDescriptor) -> Option<HandlerInstance> {
        Some(descriptor.new_instance())
    }
}

/// Every dispatch runs without a principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousPrincipal;

impl PrincipalProvider for AnonymousPrincipal {
    fn current_principal(&self, _request: &HandlerRequest) -> Option<Principal> {
        None
    }
}

/// Never recovers; failures reach the caller unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagateFailure;

impl LastChanceHandler for PropagateFailure {
    fn handle(&self, _request: &HandlerRequest, _descriptor: &HandlerDescriptor, _error: &DispatchError) -> Option<Response> {
        None
    }
}

// ---------------------------------------------------------------------------
// SingletonCache
// ---------------------------------------------------------------------------

/// Singleton handler instances, created on first use and released when the
/// configuration shuts down.
#[derive(Default)]
pub(crate) struct SingletonCache {
    instances: DashMap<HandlerType, HandlerInstance>,
    disposables: Disposables,
}

impl SingletonCache {
    pub(crate) fn get_or_create(
        &self,
        handler_type: HandlerType,
        create: impl FnOnce() -> Option<HandlerInstance>,
    ) -> Option<HandlerInstance> {
        if let Some(existing) = self.instances.get(&handler_type) {
            return Some(Arc::clone(existing.value()));
        }
        match self.instances.entry(handler_type) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let instance = create()?;
                self.disposables.register(Arc::clone(&instance));
                entry.insert(Arc::clone(&instance));
                Some(instance)
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }

    fn release_all(&self) -> usize {
        self.instances.clear();
        self.disposables.dispose_all()
    }
}

// ---------------------------------------------------------------------------
// HandlerConfiguration
// ---------------------------------------------------------------------------

/// Everything a dispatch needs besides the message. Shared behind an `Arc`
/// by the mediator and every request it creates.
pub struct HandlerConfiguration {
    settings: DispatchConfig,
    global_filters: Vec<FilterInfo>,
    filter_providers: Vec<Arc<dyn FilterProvider>>,
    activator: Arc<dyn HandlerActivator>,
    scope_provider: Arc<dyn DependencyScopeProvider>,
    principal_provider: Arc<dyn PrincipalProvider>,
    last_chance: Arc<dyn LastChanceHandler>,
    selector: HandlerSelector,
    singletons: SingletonCache,
    dispatch_permits: Arc<Semaphore>,
}

impl HandlerConfiguration {
    pub fn builder(resolver: impl HandlerTypeResolver + 'static) -> HandlerConfigurationBuilder {
        HandlerConfigurationBuilder::new(Arc::new(resolver))
    }

    #[must_use]
    pub fn settings(&self) -> &DispatchConfig {
        &self.settings
    }

    /// Global filters in registration order, outermost first.
    #[must_use]
    pub fn global_filters(&self) -> &[FilterInfo] {
        &self.global_filters
    }

    #[must_use]
    pub fn filter_providers(&self) -> &[Arc<dyn FilterProvider>] {
        &self.filter_providers
    }

    #[must_use]
    pub fn activator(&self) -> &Arc<dyn HandlerActivator> {
        &self.activator
    }

    #[must_use]
    pub fn scope_provider(&self) -> &Arc<dyn DependencyScopeProvider> {
        &self.scope_provider
    }

    #[must_use]
    pub fn principal_provider(&self) -> &Arc<dyn PrincipalProvider> {
        &self.principal_provider
    }

    #[must_use]
    pub fn last_chance_handler(&self) -> &Arc<dyn LastChanceHandler> {
        &self.last_chance
    }

    #[must_use]
    pub fn selector(&self) -> &HandlerSelector {
        &self.selector
    }

    /// Permits bounding concurrent root dispatches.
    #[must_use]
    pub fn dispatch_permits(&self) -> &Arc<Semaphore> {
        &self.dispatch_permits
    }

    pub(crate) fn singletons(&self) -> &SingletonCache {
        &self.singletons
    }

    /// Releases every singleton handler instance; the next dispatch creates
    /// fresh ones. Returns how many were released.
    pub fn release_singletons(&self) -> usize {
        self.singletons.release_all()
    }
}

impl fmt::Debug for HandlerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerConfiguration")
            .field("settings", &self.settings)
            .field("global_filters", &self.global_filters)
            .field("filter_providers", &self.filter_providers.len())
            .field("singletons", &self.singletons.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// HandlerConfigurationBuilder
// ---------------------------------------------------------------------------

/// Builder for [`HandlerConfiguration`]. Filter registrations are validated
/// at the call that adds them.
pub struct HandlerConfigurationBuilder {
    resolver: Arc<dyn HandlerTypeResolver>,
    settings: DispatchConfig,
    global_filters: Vec<FilterInfo>,
    extra_providers: Vec<Arc<dyn FilterProvider>>,
    activator: Arc<dyn HandlerActivator>,
    scope_provider: Arc<dyn DependencyScopeProvider>,
    principal_provider: Arc<dyn PrincipalProvider>,
    last_chance: Arc<dyn LastChanceHandler>,
}

impl HandlerConfigurationBuilder {
    fn new(resolver: Arc<dyn HandlerTypeResolver>) -> Self {
        Self {
            resolver,
            settings: DispatchConfig::default(),
            global_filters: Vec::new(),
            extra_providers: Vec::new(),
            activator: Arc::new(FactoryActivator),
            scope_provider: Arc::new(ServiceScopeProvider::default()),
            principal_provider: Arc::new(AnonymousPrincipal),
            last_chance: Arc::new(PropagateFailure),
        }
    }

    #[must_use]
    pub fn settings(mut self, settings: DispatchConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Appends a global filter. Earlier registrations run further out.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the filter exposes neither capability.
    pub fn global_filter<F: Filter>(mut self, filter: F) -> Result<Self, DispatchError> {
        self.global_filters.push(FilterInfo::new(filter, FilterScope::Global)?);
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns `Configuration` if the filter exposes neither capability.
    pub fn global_filter_arc<F: Filter>(mut self, filter: Arc<F>) -> Result<Self, DispatchError> {
        self.global_filters.push(FilterInfo::from_arc(filter, FilterScope::Global)?);
        Ok(self)
    }

    /// Adds a provider consulted after the global and declared-filter
    /// providers.
    #[must_use]
    pub fn filter_provider(mut self, provider: impl FilterProvider + 'static) -> Self {
        self.extra_providers.push(Arc::new(provider));
        self
    }

    #[must_use]
    pub fn activator(mut self, activator: impl HandlerActivator + 'static) -> Self {
        self.activator = Arc::new(activator);
        self
    }

    /// Resolves dependencies from `services` through a [`ServiceScopeProvider`].
    #[must_use]
    pub fn services(mut self, services: Arc<ServiceCollection>) -> Self {
        self.scope_provider = Arc::new(ServiceScopeProvider::new(services));
        self
    }

    #[must_use]
    pub fn scope_provider(mut self, provider: impl DependencyScopeProvider + 'static) -> Self {
        self.scope_provider = Arc::new(provider);
        self
    }

    #[must_use]
    pub fn principal_provider(mut self, provider: impl PrincipalProvider + 'static) -> Self {
        self.principal_provider = Arc::new(provider);
        self
    }

    #[must_use]
    pub fn last_chance_handler(mut self, handler: impl LastChanceHandler + 'static) -> Self {
        self.last_chance = Arc::new(handler);
        self
    }

    /// # Errors
    ///
    /// Returns `Configuration` if the settings are invalid.
    pub fn build(self) -> Result<HandlerConfiguration, DispatchError> {
        self.settings.validate()?;
        let mut filter_providers: Vec<Arc<dyn FilterProvider>> =
            vec![Arc::new(GlobalFilterProvider), Arc::new(DeclaredFilterProvider)];
        filter_providers.extend(self.extra_providers);
        let permits = self.settings.max_concurrent_dispatches as usize;

        Ok(HandlerConfiguration {
            settings: self.settings,
            global_filters: self.global_filters,
            filter_providers,
            activator: self.activator,
            scope_provider: self.scope_provider,
            principal_provider: self.principal_provider,
            last_chance: self.last_chance,
            selector: HandlerSelector::new(HandlerTypeCache::new(self.resolver)),
            singletons: SingletonCache::default(),
            dispatch_permits: Arc::new(Semaphore::new(permits)),
        })
    }
}
