//! Fixtures shared by the dispatch tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use conduit_core::{Command, Message, MessageKind, MessageType, Response};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::configuration::{HandlerConfiguration, HandlerConfigurationBuilder};
use super::context::{ExecutedContext, HandlerContext, HandlerRequest};
use super::error::DispatchError;
use super::filter::{ExceptionFilter, Filter, HandlerFilter};
use super::mediator::Mediator;
use super::registry::{CommandHandler, HandlerRegistration, HandlerRegistry};

#[derive(Debug, Clone)]
pub(crate) struct Echo(pub &'static str);
impl Message for Echo {}
impl Command for Echo {
    type Response = String;
}

type Script = dyn Fn(&Echo, usize) -> anyhow::Result<String> + Send + Sync;

/// Handles `Echo` by running a script with the 1-based call number.
pub(crate) struct Scripted {
    calls: Arc<AtomicUsize>,
    script: Arc<Script>,
}

#[async_trait]
impl CommandHandler<Echo> for Scripted {
    async fn handle(&self, command: &Echo, _context: &mut HandlerContext) -> anyhow::Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.script)(command, call)
    }
}

/// A registration for `Echo` and the counter of handler calls it shares
/// with every instance it creates.
pub(crate) fn scripted(
    script: impl Fn(&Echo, usize) -> anyhow::Result<String> + Send + Sync + 'static,
) -> (HandlerRegistration<Scripted>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let script: Arc<Script> = Arc::new(script);
    let shared = Arc::clone(&calls);
    let registration = HandlerRegistration::new(move || Scripted {
        calls: Arc::clone(&shared),
        script: Arc::clone(&script),
    })
    .handles_command::<Echo>();
    (registration, calls)
}

pub(crate) fn echo() -> (HandlerRegistration<Scripted>, Arc<AtomicUsize>) {
    scripted(|command, _| Ok(command.0.to_string()))
}

pub(crate) fn failing(message: &'static str) -> (HandlerRegistration<Scripted>, Arc<AtomicUsize>) {
    scripted(move |_, _| Err(anyhow!(message)))
}

pub(crate) fn registry_of<H: Send + Sync + 'static>(registration: HandlerRegistration<H>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(registration).unwrap();
    registry
}

pub(crate) fn mediator_with<H: Send + Sync + 'static>(
    registration: HandlerRegistration<H>,
    configure: impl FnOnce(HandlerConfigurationBuilder) -> HandlerConfigurationBuilder,
) -> Mediator {
    let builder = HandlerConfiguration::builder(registry_of(registration));
    Mediator::new(configure(builder).build().unwrap())
}

#[derive(Debug)]
pub(crate) struct Park;
impl Message for Park {}
impl Command for Park {
    type Response = ();
}

/// Handles `Park` by signalling `entered` and then waiting on `gate`.
pub(crate) struct Parked {
    entered: Arc<Notify>,
    gate: Arc<Notify>,
}

#[async_trait]
impl CommandHandler<Park> for Parked {
    async fn handle(&self, _command: &Park, _context: &mut HandlerContext) -> anyhow::Result<()> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(())
    }
}

/// Returns the registration plus its `entered` and `gate` signals.
pub(crate) fn parking() -> (HandlerRegistration<Parked>, Arc<Notify>, Arc<Notify>) {
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let (e, g) = (Arc::clone(&entered), Arc::clone(&gate));
    let registration = HandlerRegistration::new(move || Parked {
        entered: Arc::clone(&e),
        gate: Arc::clone(&g),
    })
    .handles_command::<Park>();
    (registration, entered, gate)
}

/// A context for `command` as the worker would build it, minus activation
/// through the configured activator.
pub(crate) fn context_for<C: Command>(configuration: &Arc<HandlerConfiguration>, command: C) -> HandlerContext {
    let request = Arc::new(HandlerRequest::new(
        Arc::new(command),
        MessageKind::Command,
        Arc::clone(configuration),
    ));
    let descriptor = configuration.selector().select(MessageType::of::<C>()).unwrap();
    let scope = configuration.scope_provider().begin_scope(&request);
    let handler = descriptor.new_instance();
    HandlerContext::new(request, descriptor, handler, None, scope)
}

// ---------------------------------------------------------------------------
// Spy filters
// ---------------------------------------------------------------------------

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

pub(crate) fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Records `name:pre` and `name:post:ok|err`, and can short-circuit or fail
/// either phase.
#[derive(Clone)]
pub(crate) struct Spy {
    name: &'static str,
    log: Log,
    respond: Option<&'static str>,
    fail_pre: bool,
    fail_post: bool,
}

impl Spy {
    pub(crate) fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            respond: None,
            fail_pre: false,
            fail_post: false,
        }
    }

    pub(crate) fn responding(mut self, response: &'static str) -> Self {
        self.respond = Some(response);
        self
    }

    pub(crate) fn failing_pre(mut self) -> Self {
        self.fail_pre = true;
        self
    }

    pub(crate) fn failing_post(mut self) -> Self {
        self.fail_post = true;
        self
    }
}

#[async_trait]
impl HandlerFilter for Spy {
    async fn on_executing(&self, context: &mut HandlerContext) -> Result<(), DispatchError> {
        self.log.lock().push(format!("{}:pre", self.name));
        if self.fail_pre {
            return Err(DispatchError::filter(self.name, anyhow!("{} rejected", self.name)));
        }
        if let Some(response) = self.respond {
            context.set_response(Response::new(response.to_string()));
        }
        Ok(())
    }

    async fn on_executed(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        let outcome = if executed.error().is_some() { "err" } else { "ok" };
        self.log.lock().push(format!("{}:post:{outcome}", self.name));
        if self.fail_post {
            return Err(DispatchError::filter(self.name, anyhow!("{} post failed", self.name)));
        }
        Ok(())
    }
}

impl Filter for Spy {
    fn as_handler_filter(&self) -> Option<&dyn HandlerFilter> {
        Some(self)
    }
}

/// Appends a suffix to a `String` response in the post-phase.
pub(crate) struct Append(pub &'static str);

#[async_trait]
impl HandlerFilter for Append {
    async fn on_executed(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        if let Some(current) = executed.response().and_then(|r| r.downcast_ref::<String>()) {
            let appended = format!("{current}{}", self.0);
            executed.set_response(Response::new(appended));
        }
        Ok(())
    }
}

impl Filter for Append {
    fn as_handler_filter(&self) -> Option<&dyn HandlerFilter> {
        Some(self)
    }
}

/// Records `name:exception`; optionally recovers or fails.
pub(crate) struct Recover {
    name: &'static str,
    log: Log,
    respond: Option<&'static str>,
    fail: bool,
}

impl Recover {
    pub(crate) fn observing(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            respond: None,
            fail: false,
        }
    }

    pub(crate) fn with(name: &'static str, log: &Log, response: &'static str) -> Self {
        Self {
            respond: Some(response),
            ..Self::observing(name, log)
        }
    }

    pub(crate) fn failing(name: &'static str, log: &Log) -> Self {
        Self {
            fail: true,
            ..Self::observing(name, log)
        }
    }
}

#[async_trait]
impl ExceptionFilter for Recover {
    async fn on_exception(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        self.log.lock().push(format!("{}:exception", self.name));
        if self.fail {
            return Err(DispatchError::filter(self.name, anyhow!("{} broke", self.name)));
        }
        if let Some(response) = self.respond {
            executed.set_response(Response::new(response.to_string()));
        }
        Ok(())
    }
}

impl Filter for Recover {
    fn as_exception_filter(&self) -> Option<&dyn ExceptionFilter> {
        Some(self)
    }
}
