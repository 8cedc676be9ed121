//! Per-dispatch state: the request, the mutable handler context threaded
//! through the chain, and the outcome each chain stage hands back.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::{
    Command, DynMessage, Event, Items, Message, MessageKind, MessageType, Principal, Response,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use super::configuration::HandlerConfiguration;
use super::descriptor::HandlerDescriptor;
use super::error::DispatchError;
use super::mediator::downcast_response;
use super::worker::Worker;
use crate::traits::{DependencyScope, HandlerInstance};

// ---------------------------------------------------------------------------
// Disposables
// ---------------------------------------------------------------------------

enum Disposable {
    Value(Arc<dyn Any + Send + Sync>),
    Callback(Box<dyn FnOnce() + Send>),
}

/// Values and callbacks released together, last registered first.
///
/// Dropping a registered value releases this registry's reference; the
/// value's own `Drop` runs once no other reference remains.
#[derive(Default)]
pub struct Disposables {
    entries: Mutex<Vec<Disposable>>,
}

impl Disposables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `value` alive until [`dispose_all`](Self::dispose_all).
    pub fn register(&self, value: Arc<dyn Any + Send + Sync>) {
        self.entries.lock().push(Disposable::Value(value));
    }

    /// Runs `callback` on [`dispose_all`](Self::dispose_all).
    pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) {
        self.entries.lock().push(Disposable::Callback(Box::new(callback)));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases everything registered so far and returns how many entries
    /// were released. Entries registered afterwards are kept for the next call.
    pub fn dispose_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.entries.lock());
        let count = drained.len();
        for entry in drained.into_iter().rev() {
            match entry {
                Disposable::Value(value) => drop(value),
                Disposable::Callback(callback) => callback(),
            }
        }
        count
    }
}

impl Drop for Disposables {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

impl fmt::Debug for Disposables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposables").field("len", &self.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// HandlerRequest
// ---------------------------------------------------------------------------

/// One dispatch call: the message plus everything that lives exactly as long
/// as the call.
pub struct HandlerRequest {
    id: Uuid,
    message: Arc<dyn DynMessage>,
    message_type: MessageType,
    kind: MessageKind,
    configuration: Arc<HandlerConfiguration>,
    parent: Option<Arc<HandlerRequest>>,
    cancellation: CancellationToken,
    timeout: Option<Duration>,
    disposables: Disposables,
    started_at: Instant,
}

impl HandlerRequest {
    /// A root request. The dispatch timeout defaults to the configuration's.
    #[must_use]
    pub fn new(
        message: Arc<dyn DynMessage>,
        kind: MessageKind,
        configuration: Arc<HandlerConfiguration>,
    ) -> Self {
        let timeout = configuration.settings().dispatch_timeout();
        Self {
            id: Uuid::new_v4(),
            message_type: message.message_type(),
            message,
            kind,
            configuration,
            parent: None,
            cancellation: CancellationToken::new(),
            timeout,
            disposables: Disposables::new(),
            started_at: Instant::now(),
        }
    }

    /// A sub-dispatch of `parent`. Shares the parent's configuration, and its
    /// cancellation token is a child of the parent's. Sub-dispatches run
    /// inside the parent's deadline and carry none of their own.
    #[must_use]
    pub fn child(parent: &Arc<HandlerRequest>, message: Arc<dyn DynMessage>, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message.message_type(),
            message,
            kind,
            configuration: Arc::clone(&parent.configuration),
            parent: Some(Arc::clone(parent)),
            cancellation: parent.cancellation.child_token(),
            timeout: None,
            disposables: Disposables::new(),
            started_at: Instant::now(),
        }
    }

    /// Cancels this request when `cancellation` is cancelled. The request
    /// holds a child of `cancellation`, so cancelling the request never
    /// cancels the caller's token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: &CancellationToken) -> Self {
        self.cancellation = cancellation.child_token();
        self
    }

    /// Overrides the dispatch deadline; `None` disables it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn message(&self) -> &(dyn DynMessage + 'static) {
        &*self.message
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
    pub fn configuration(&self) -> &Arc<HandlerConfiguration> {
        &self.configuration
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<HandlerRequest>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The outermost request of this dispatch tree.
    #[must_use]
    pub fn root(&self) -> &HandlerRequest {
        let mut current = self;
        while let Some(parent) = &current.parent {
            current = parent;
        }
        current
    }

    /// Number of ancestors; zero for a root request.
    #[must_use]
    pub fn depth(&self) -> usize {
        std::iter::successors(self.parent.as_deref(), |r| r.parent.as_deref()).count()
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Values released when this request completes.
    #[must_use]
    pub fn disposables(&self) -> &Disposables {
        &self.disposables
    }

    pub(crate) fn complete(&self) -> usize {
        self.disposables.dispose_all()
    }
}

impl fmt::Debug for HandlerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRequest")
            .field("id", &self.id)
            .field("message_type", &self.message_type)
            .field("kind", &self.kind)
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Mutable state of one dispatch, threaded through every filter to the
/// handler and back.
pub struct HandlerContext {
    request: Arc<HandlerRequest>,
    descriptor: Arc<HandlerDescriptor>,
    handler: HandlerInstance,
    principal: Option<Principal>,
    scope: Arc<dyn DependencyScope>,
    cancellation: CancellationToken,
    response: Option<Response>,
    items: Items,
    attempt: u32,
}

impl HandlerContext {
    pub(crate) fn new(
        request: Arc<HandlerRequest>,
        descriptor: Arc<HandlerDescriptor>,
        handler: HandlerInstance,
        principal: Option<Principal>,
        scope: Arc<dyn DependencyScope>,
    ) -> Self {
        let cancellation = request.cancellation().child_token();
        Self {
            request,
            descriptor,
            handler,
            principal,
            scope,
            cancellation,
            response: None,
            items: Items::new(),
            attempt: 1,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Arc<HandlerRequest> {
        &self.request
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<HandlerDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn message(&self) -> &(dyn DynMessage + 'static) {
        self.request.message()
    }

    /// The message as its concrete type.
    #[must_use]
    pub fn message_as<M: Message>(&self) -> Option<&M> {
        self.request.message().downcast_ref::<M>()
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Sets the response. Called from a filter's pre-phase, this
    /// short-circuits the handler and every filter inside this one.
    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Free-form bag shared by filters; persists across retry attempts.
    #[must_use]
    pub fn items(&self) -> &Items {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Items {
        &mut self.items
    }

    /// 1-based attempt number; greater than one only under a retry policy.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Token for this handler run. A child of the request's token, so
    /// cancelling one handler of a publish leaves the others running.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves a dependency from the dispatch's scope.
    #[must_use]
    pub fn resolve<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.scope
            .resolve(TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Dispatches `command` as a child of the current request.
    ///
    /// # Errors
    ///
    /// Same as [`Mediator::send`](super::mediator::Mediator::send), except
    /// that load shedding and the dispatch timeout apply to the root only.
    pub async fn send<C: Command>(&self, command: C) -> Result<C::Response, DispatchError> {
        let request = Arc::new(
            HandlerRequest::child(&self.request, Arc::new(command), MessageKind::Command)
                .with_cancellation(&self.cancellation),
        );
        let worker = Worker::new(Arc::clone(self.request.configuration()));
        let response = worker.execute(request).await?;
        downcast_response::<C>(response)
    }

    /// Publishes `event` as a child of the current request.
    ///
    /// # Errors
    ///
    /// Same as [`Mediator::publish`](super::mediator::Mediator::publish).
    pub async fn publish<E: Event>(&self, event: E) -> Result<(), DispatchError> {
        let request = Arc::new(
            HandlerRequest::child(&self.request, Arc::new(event), MessageKind::Event)
                .with_cancellation(&self.cancellation),
        );
        Worker::new(Arc::clone(self.request.configuration()))
            .publish(request)
            .await
    }

    pub(crate) fn handler_instance(&self) -> &HandlerInstance {
        &self.handler
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("request", &self.request.id())
            .field("message_type", &self.request.message_type())
            .field("handler", &self.descriptor.handler_type())
            .field("attempt", &self.attempt)
            .field("response", &self.response)
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ExecutedContext
// ---------------------------------------------------------------------------

/// Outcome of a chain stage: the context handed back plus the failure, if any.
#[derive(Debug)]
pub struct ExecutedContext {
    context: HandlerContext,
    error: Option<DispatchError>,
    handled_error: Option<DispatchError>,
    short_circuited: bool,
}

impl ExecutedContext {
    pub(crate) fn completed(context: HandlerContext) -> Self {
        Self {
            context,
            error: None,
            handled_error: None,
            short_circuited: false,
        }
    }

    pub(crate) fn failed(mut context: HandlerContext, error: DispatchError) -> Self {
        context.response = None;
        Self {
            context,
            error: Some(error),
            handled_error: None,
            short_circuited: false,
        }
    }

    pub(crate) fn short_circuit(context: HandlerContext) -> Self {
        Self {
            context,
            error: None,
            handled_error: None,
            short_circuited: true,
        }
    }

    #[must_use]
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut HandlerContext {
        &mut self.context
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.context.response()
    }

    /// The failure still pending, if any.
    #[must_use]
    pub fn error(&self) -> Option<&DispatchError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// True once a response replaced a failure.
    #[must_use]
    pub fn exception_handled(&self) -> bool {
        self.handled_error.is_some()
    }

    /// The failure a recovery response replaced.
    #[must_use]
    pub fn handled_error(&self) -> Option<&DispatchError> {
        self.handled_error.as_ref()
    }

    /// True when a filter's pre-phase set the response and the handler never ran.
    #[must_use]
    pub fn is_short_circuited(&self) -> bool {
        self.short_circuited
    }

    /// Replaces the outcome with `response`, suppressing any pending failure.
    pub fn set_response(&mut self, response: Response) {
        self.context.set_response(response);
        if let Some(error) = self.error.take() {
            self.handled_error = Some(error);
        }
    }

    /// Records `error` as the outcome. A pending failure is superseded.
    pub fn fail(&mut self, error: DispatchError) {
        self.context.response = None;
        if let Some(previous) = self.error.replace(error) {
            warn!(
                request_id = %self.context.request.id(),
                superseded = %previous,
                "dispatch failure superseded"
            );
        }
    }

    pub(crate) fn into_outcome(self) -> (HandlerContext, Result<Response, DispatchError>) {
        let mut context = self.context;
        let outcome = match self.error {
            Some(error) => Err(error),
            None => Ok(context.response.take().unwrap_or_else(Response::unit)),
        };
        (context, outcome)
    }

    /// Hands the context back for another attempt: the response slot is
    /// cleared, the item bag is kept.
    pub(crate) fn into_retry(self) -> HandlerContext {
        let mut context = self.context;
        context.response = None;
        context.attempt += 1;
        context
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
