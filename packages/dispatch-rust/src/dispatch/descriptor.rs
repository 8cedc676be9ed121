//! Immutable metadata for one (message type, handler type) pairing.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use conduit_core::{short_type_name, Lifetime, MessageKind, MessageType};
use parking_lot::Mutex;

use super::configuration::HandlerConfiguration;
use super::filter::FilterInfo;
use super::middleware::{build_dispatch_pipeline, DispatchService, RetryPolicy};
use super::pipeline::{build_filter_pipeline, FilterGrouping, GroupingCache};
use super::registry::{HandlerFactory, HandlerTypeInfo, Invoker, MessageBinding};
use crate::traits::HandlerInstance;

/// Runtime identity of a handler type. Compared by `TypeId` only.
#[derive(Clone, Copy)]
pub struct HandlerType {
    id: TypeId,
    name: &'static str,
}

impl HandlerType {
    #[must_use]
    pub fn of<H: 'static>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: std::any::type_name::<H>(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for HandlerType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HandlerType {}

impl Hash for HandlerType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerType").field(&self.name).finish()
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// HandlerDescriptor
// ---------------------------------------------------------------------------

/// Created once per (message type, handler type) pair and cached for the
/// lifetime of the configuration. The filter pipeline and the service stack
/// built from it are computed on first use and never change afterwards.
pub struct HandlerDescriptor {
    message_type: MessageType,
    kind: MessageKind,
    handler_type: HandlerType,
    name: String,
    description: Option<String>,
    lifetime: Lifetime,
    retry_policy: RetryPolicy,
    declared_filters: Vec<FilterInfo>,
    factory: HandlerFactory,
    invoker: Arc<dyn Invoker>,
    filter_pipeline: OnceLock<Arc<[FilterInfo]>>,
    grouping: GroupingCache,
    dispatch_service: OnceLock<Mutex<DispatchService>>,
}

impl HandlerDescriptor {
    pub(crate) fn new(info: &HandlerTypeInfo, binding: &MessageBinding) -> Self {
        Self {
            message_type: binding.message_type(),
            kind: binding.kind(),
            handler_type: info.handler_type(),
            name: info.name().to_string(),
            description: info.description().map(str::to_string),
            lifetime: info.lifetime(),
            retry_policy: info.retry_policy().clone(),
            declared_filters: info.filters().to_vec(),
            factory: Arc::clone(info.factory()),
            invoker: Arc::clone(binding.invoker()),
            filter_pipeline: OnceLock::new(),
            grouping: GroupingCache::default(),
            dispatch_service: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn handler_type(&self) -> HandlerType {
        self.handler_type
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Filters declared on the handler's registration, in declaration order.
    #[must_use]
    pub fn declared_filters(&self) -> &[FilterInfo] {
        &self.declared_filters
    }

    /// The ordered, deduplicated pipeline, built from `configuration`'s
    /// providers on first call.
    #[must_use]
    pub fn filter_pipeline(&self, configuration: &HandlerConfiguration) -> Arc<[FilterInfo]> {
        let pipeline = self.filter_pipeline.get_or_init(|| {
            let pipeline = build_filter_pipeline(configuration, self);
            tracing::debug!(
                message_type = self.message_type.name(),
                handler = self.handler_type.name(),
                filters = pipeline.len(),
                "filter pipeline built"
            );
            pipeline.into()
        });
        Arc::clone(pipeline)
    }

    #[must_use]
    pub fn filter_grouping(&self, configuration: &HandlerConfiguration) -> Arc<FilterGrouping> {
        self.grouping.get(&self.filter_pipeline(configuration))
    }

    /// A clone of the service stack for this pairing, built on first call.
    #[must_use]
    pub fn dispatch_service(&self, configuration: &HandlerConfiguration) -> DispatchService {
        self.dispatch_service
            .get_or_init(|| Mutex::new(build_dispatch_pipeline(configuration, self)))
            .lock()
            .clone()
    }

    /// A fresh instance from the registration's factory.
    #[must_use]
    pub fn new_instance(&self) -> HandlerInstance {
        (self.factory)()
    }

    pub(crate) fn invoker(&self) -> &Arc<dyn Invoker> {
        &self.invoker
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("message_type", &self.message_type)
            .field("handler_type", &self.handler_type)
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
