//! Default dependency scope: a type-keyed service collection with singleton
//! values and scoped factories.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use super::context::HandlerRequest;
use crate::traits::{DependencyScope, DependencyScopeProvider};

type ServiceValue = Arc<dyn Any + Send + Sync>;
type ScopedFactory = Arc<dyn Fn(&HandlerRequest) -> ServiceValue + Send + Sync>;

/// Services handlers and filters resolve through
/// [`HandlerContext::resolve`](super::context::HandlerContext::resolve).
///
/// Singletons are shared by every dispatch. Scoped services are created at
/// most once per scope and released with the root request. Every handler run
/// opens its own scope: each handler of a publish and each sub-dispatch gets
/// a fresh instance.
#[derive(Default)]
pub struct ServiceCollection {
    singletons: DashMap<TypeId, ServiceValue>,
    scoped: DashMap<TypeId, ScopedFactory>,
}

impl ServiceCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a shared service.
    pub fn add_singleton<T: Any + Send + Sync>(&self, service: T) -> &Self {
        self.add_singleton_arc(Arc::new(service))
    }

    pub fn add_singleton_arc<T: Any + Send + Sync>(&self, service: Arc<T>) -> &Self {
        self.scoped.remove(&TypeId::of::<T>());
        self.singletons.insert(TypeId::of::<T>(), service);
        self
    }

    /// Registers (or replaces) a service created once per scope.
    pub fn add_scoped<T, F>(&self, factory: F) -> &Self
    where
        T: Any + Send + Sync,
        F: Fn(&HandlerRequest) -> T + Send + Sync + 'static,
    {
        self.singletons.remove(&TypeId::of::<T>());
        self.scoped.insert(
            TypeId::of::<T>(),
            Arc::new(move |request: &HandlerRequest| -> ServiceValue { Arc::new(factory(request)) }),
        );
        self
    }

    /// Retrieve a singleton by its concrete type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.singletons
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        let id = TypeId::of::<T>();
        self.singletons.contains_key(&id) || self.scoped.contains_key(&id)
    }
}

/// Opens a [`ServiceScope`] over a shared collection for each dispatch.
#[derive(Clone, Default)]
pub struct ServiceScopeProvider {
    services: Arc<ServiceCollection>,
}

impl ServiceScopeProvider {
    #[must_use]
    pub fn new(services: Arc<ServiceCollection>) -> Self {
        Self { services }
    }
}

impl DependencyScopeProvider for ServiceScopeProvider {
    fn begin_scope(&self, request: &Arc<HandlerRequest>) -> Arc<dyn DependencyScope> {
        Arc::new(ServiceScope {
            services: Arc::clone(&self.services),
            request: Arc::clone(request),
            resolved: DashMap::new(),
        })
    }
}

/// View of a [`ServiceCollection`] for one handler run.
pub struct ServiceScope {
    services: Arc<ServiceCollection>,
    request: Arc<HandlerRequest>,
    resolved: DashMap<TypeId, ServiceValue>,
}

impl DependencyScope for ServiceScope {
    fn resolve(&self, type_id: TypeId) -> Option<ServiceValue> {
        if let Some(singleton) = self.services.singletons.get(&type_id) {
            return Some(Arc::clone(singleton.value()));
        }
        let factory = Arc::clone(self.services.scoped.get(&type_id)?.value());
        let value = self.resolved.entry(type_id).or_insert_with(|| {
            let value = factory(&self.request);
            self.request.root().disposables().register(Arc::clone(&value));
            value
        });
        Some(Arc::clone(value.value()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
