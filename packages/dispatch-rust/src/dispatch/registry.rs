//! Handler traits and the explicit registry that maps handler types to the
//! messages they handle.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use conduit_core::{Command, Event, FilterScope, Lifetime, MessageKind, MessageType, Response};

use super::context::HandlerContext;
use super::descriptor::HandlerType;
use super::error::DispatchError;
use super::filter::{Filter, FilterInfo};
use super::middleware::RetryPolicy;
use crate::traits::{HandlerInstance, HandlerTypeResolver};

/// Handles exactly one command type. A handler type may implement this for
/// several commands and register each with
/// [`HandlerRegistration::handles_command`].
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    async fn handle(&self, command: &C, context: &mut HandlerContext) -> anyhow::Result<C::Response>;
}

/// Handles one event type alongside any other handlers registered for it.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(&self, event: &E, context: &mut HandlerContext) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Type-erased invocation
// ---------------------------------------------------------------------------

/// Calls the handler held by a context with the context's message.
#[async_trait]
pub(crate) trait Invoker: Send + Sync {
    async fn invoke(&self, context: &mut HandlerContext) -> anyhow::Result<Response>;
}

struct CommandInvoker<C, H>(PhantomData<fn() -> (C, H)>);

#[async_trait]
impl<C, H> Invoker for CommandInvoker<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    async fn invoke(&self, context: &mut HandlerContext) -> anyhow::Result<Response> {
        let instance = Arc::clone(context.handler_instance());
        let request = Arc::clone(context.request());
        let handler = instance
            .downcast_ref::<H>()
            .ok_or_else(|| anyhow!("activated instance is not a {}", type_name::<H>()))?;
        let command = request
            .message()
            .downcast_ref::<C>()
            .ok_or_else(|| anyhow!("request message is not a {}", type_name::<C>()))?;
        let response = <H as CommandHandler<C>>::handle(handler, command, context).await?;
        Ok(Response::new(response))
    }
}

struct EventInvoker<E, H>(PhantomData<fn() -> (E, H)>);

#[async_trait]
impl<E, H> Invoker for EventInvoker<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    async fn invoke(&self, context: &mut HandlerContext) -> anyhow::Result<Response> {
        let instance = Arc::clone(context.handler_instance());
        let request = Arc::clone(context.request());
        let handler = instance
            .downcast_ref::<H>()
            .ok_or_else(|| anyhow!("activated instance is not a {}", type_name::<H>()))?;
        let event = request
            .message()
            .downcast_ref::<E>()
            .ok_or_else(|| anyhow!("request message is not a {}", type_name::<E>()))?;
        <H as EventHandler<E>>::handle(handler, event, context).await?;
        Ok(Response::unit())
    }
}

/// One message type a handler type declares, with the invoker bound to it.
#[derive(Clone)]
pub struct MessageBinding {
    message_type: MessageType,
    kind: MessageKind,
    invoker: Arc<dyn Invoker>,
}

impl MessageBinding {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub(crate) fn invoker(&self) -> &Arc<dyn Invoker> {
        &self.invoker
    }
}

impl fmt::Debug for MessageBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBinding")
            .field("message_type", &self.message_type)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub(crate) type HandlerFactory = Arc<dyn Fn() -> HandlerInstance + Send + Sync>;

// ---------------------------------------------------------------------------
// HandlerTypeInfo
// ---------------------------------------------------------------------------

/// Everything known about one registered handler type, with the concrete
/// type erased.
pub struct HandlerTypeInfo {
    handler_type: HandlerType,
    name: String,
    description: Option<String>,
    lifetime: Lifetime,
    retry_policy: RetryPolicy,
    filters: Vec<FilterInfo>,
    factory: HandlerFactory,
    bindings: Vec<MessageBinding>,
}

impl HandlerTypeInfo {
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

    #[must_use]
    pub fn filters(&self) -> &[FilterInfo] {
        &self.filters
    }

    #[must_use]
    pub fn bindings(&self) -> &[MessageBinding] {
        &self.bindings
    }

    pub(crate) fn factory(&self) -> &HandlerFactory {
        &self.factory
    }
}

impl fmt::Debug for HandlerTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTypeInfo")
            .field("handler_type", &self.handler_type)
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .field("filters", &self.filters)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistration
// ---------------------------------------------------------------------------

/// Builder describing one handler type.
///
/// ```ignore
/// let registration = HandlerRegistration::new(|| CreateOrderHandler::default())
///     .lifetime(Lifetime::PerRequest)
///     .filter(AuditFilter)?
///     .handles_command::<CreateOrder>();
/// registry.register(registration)?;
/// ```
pub struct HandlerRegistration<H> {
    name: Option<String>,
    description: Option<String>,
    lifetime: Lifetime,
    retry_policy: RetryPolicy,
    filters: Vec<FilterInfo>,
    factory: HandlerFactory,
    bindings: Vec<MessageBinding>,
    _handler: PhantomData<fn() -> H>,
}

impl<H: Send + Sync + 'static> HandlerRegistration<H> {
    /// `factory` is called by the default activator whenever an instance is
    /// needed; how often depends on the [`Lifetime`].
    pub fn new(factory: impl Fn() -> H + Send + Sync + 'static) -> Self {
        Self {
            name: None,
            description: None,
            lifetime: Lifetime::default(),
            retry_policy: RetryPolicy::none(),
            filters: Vec::new(),
            factory: Arc::new(move || -> HandlerInstance { Arc::new(factory()) }),
            bindings: Vec::new(),
            _handler: PhantomData,
        }
    }

    /// Display name; defaults to the handler type's short name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Declares a handler-scope filter. Declaration order is preserved.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the filter exposes neither capability.
    pub fn filter<F: Filter>(mut self, filter: F) -> Result<Self, DispatchError> {
        self.filters.push(FilterInfo::new(filter, FilterScope::Handler)?);
        Ok(self)
    }

    /// Declares a handler-scope filter shared with other registrations.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the filter exposes neither capability.
    pub fn filter_arc<F: Filter>(mut self, filter: Arc<F>) -> Result<Self, DispatchError> {
        self.filters.push(FilterInfo::from_arc(filter, FilterScope::Handler)?);
        Ok(self)
    }

    #[must_use]
    pub fn handles_command<C: Command>(mut self) -> Self
    where
        H: CommandHandler<C>,
    {
        self.bindings.push(MessageBinding {
            message_type: MessageType::of::<C>(),
            kind: MessageKind::Command,
            invoker: Arc::new(CommandInvoker::<C, H>(PhantomData)),
        });
        self
    }

    #[must_use]
    pub fn handles_event<E: Event>(mut self) -> Self
    where
        H: EventHandler<E>,
    {
        self.bindings.push(MessageBinding {
            message_type: MessageType::of::<E>(),
            kind: MessageKind::Event,
            invoker: Arc::new(EventInvoker::<E, H>(PhantomData)),
        });
        self
    }

    fn into_info(self) -> Result<HandlerTypeInfo, DispatchError> {
        let handler_type = HandlerType::of::<H>();
        if self.bindings.is_empty() {
            return Err(DispatchError::Configuration(format!(
                "{} is registered without any handled message type",
                handler_type.name()
            )));
        }
        Ok(HandlerTypeInfo {
            handler_type,
            name: self
                .name
                .unwrap_or_else(|| handler_type.short_name().to_string()),
            description: self.description,
            lifetime: self.lifetime,
            retry_policy: self.retry_policy,
            filters: self.filters,
            factory: self.factory,
            bindings: self.bindings,
        })
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Explicit handler registry built at startup; the default
/// [`HandlerTypeResolver`].
#[derive(Default)]
pub struct HandlerRegistry {
    handler_types: Vec<Arc<HandlerTypeInfo>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns `Configuration` if the registration declares no message type.
    pub fn register<H: Send + Sync + 'static>(
        &mut self,
        registration: HandlerRegistration<H>,
    ) -> Result<&mut Self, DispatchError> {
        let info = registration.into_info()?;
        tracing::debug!(
            handler = info.handler_type.name(),
            messages = info.bindings.len(),
            "handler registered"
        );
        self.handler_types.push(Arc::new(info));
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handler_types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handler_types.is_empty()
    }
}

impl HandlerTypeResolver for HandlerRegistry {
    fn handler_types(&self) -> Vec<Arc<HandlerTypeInfo>> {
        self.handler_types.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
