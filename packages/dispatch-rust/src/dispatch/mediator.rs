//! Typed entry points: `send` for commands, `publish` for events.

use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use conduit_core::{Command, DynMessage, Event, MessageKind, Response};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::configuration::HandlerConfiguration;
use super::context::HandlerRequest;
use super::error::DispatchError;
use super::worker::Worker;
use crate::lifecycle::{DispatcherState, Lifecycle};

/// Per-call overrides for a root dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    cancellation: Option<CancellationToken>,
    timeout: Option<Option<Duration>>,
}

impl DispatchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the dispatch, its retries, and its sub-dispatches when
    /// `token` is cancelled.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Replaces the configured dispatch timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    #[must_use]
    pub fn without_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }
}

/// Dispatches commands and events through a shared configuration.
/// Cheap to clone; clones share the lifecycle.
#[derive(Debug, Clone)]
pub struct Mediator {
    configuration: Arc<HandlerConfiguration>,
    worker: Worker,
    lifecycle: Arc<Lifecycle>,
}

impl Mediator {
    #[must_use]
    pub fn new(configuration: HandlerConfiguration) -> Self {
        Self::from_shared(Arc::new(configuration))
    }

    #[must_use]
    pub fn from_shared(configuration: Arc<HandlerConfiguration>) -> Self {
        Self {
            worker: Worker::new(Arc::clone(&configuration)),
            configuration,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    #[must_use]
    pub fn configuration(&self) -> &Arc<HandlerConfiguration> {
        &self.configuration
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.lifecycle.in_flight()
    }

    /// Sends `command` to its single handler.
    ///
    /// # Errors
    ///
    /// - `HandlerNotFound` / `AmbiguousHandler` before anything runs
    /// - the failure that survived exception filters and the last-chance handler
    /// - `Timeout`, `Overloaded`, `ShuttingDown` from the boundary
    /// - `ResponseType` if a filter replaced the response with another type
    pub async fn send<C: Command>(&self, command: C) -> Result<C::Response, DispatchError> {
        self.send_with(command, DispatchOptions::default()).await
    }

    /// [`send`](Self::send) with per-call options.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_with<C: Command>(
        &self,
        command: C,
        options: DispatchOptions,
    ) -> Result<C::Response, DispatchError> {
        let _guard = self.lifecycle.try_enter()?;
        let request = self.root_request(Arc::new(command), MessageKind::Command, options);
        let response = self.worker.execute(request).await?;
        downcast_response::<C>(response)
    }

    /// Runs every handler registered for `event`, sequentially and
    /// independently. An event with no handlers succeeds.
    ///
    /// # Errors
    ///
    /// The single failure if one handler failed, `Aggregate` if several did,
    /// or `ShuttingDown`.
    pub async fn publish<E: Event>(&self, event: E) -> Result<(), DispatchError> {
        self.publish_with(event, DispatchOptions::default()).await
    }

    /// [`publish`](Self::publish) with per-call options. The timeout applies
    /// to each handler's pipeline separately.
    ///
    /// # Errors
    ///
    /// See [`publish`](Self::publish).
    pub async fn publish_with<E: Event>(&self, event: E, options: DispatchOptions) -> Result<(), DispatchError> {
        let _guard = self.lifecycle.try_enter()?;
        let request = self.root_request(Arc::new(event), MessageKind::Event, options);
        self.worker.publish(request).await
    }

    /// [`shutdown`](Self::shutdown) with the configured `drain_timeout_ms`.
    pub async fn shutdown_gracefully(&self) -> bool {
        self.shutdown(self.configuration.settings().drain_timeout()).await
    }

    /// Stops admitting dispatches, waits up to `drain_timeout` for in-flight
    /// ones, then releases singleton handlers.
    ///
    /// Returns `true` if every in-flight dispatch finished in time.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        if self.lifecycle.begin_drain() {
            info!(in_flight = self.lifecycle.in_flight(), "dispatcher draining");
        }
        let drained = self.lifecycle.wait_for_drain(drain_timeout).await;
        if !drained {
            warn!(
                in_flight = self.lifecycle.in_flight(),
                "drain timed out; releasing singletons with dispatches in flight"
            );
        }
        let released = self.configuration.release_singletons();
        self.lifecycle.mark_stopped();
        info!(released, drained, "dispatcher stopped");
        drained
    }

    fn root_request(
        &self,
        message: Arc<dyn DynMessage>,
        kind: MessageKind,
        options: DispatchOptions,
    ) -> Arc<HandlerRequest> {
        let mut request = HandlerRequest::new(message, kind, Arc::clone(&self.configuration));
        if let Some(token) = options.cancellation {
            request = request.with_cancellation(&token);
        }
        if let Some(timeout) = options.timeout {
            request = request.with_timeout(timeout);
        }
        Arc::new(request)
    }
}

/// Recovers the typed response of a command.
pub(crate) fn downcast_response<C: Command>(response: Response) -> Result<C::Response, DispatchError> {
    response
        .into_value::<C::Response>()
        .map_err(|response| DispatchError::ResponseType {
            expected: type_name::<C::Response>(),
            actual: response.type_name(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
