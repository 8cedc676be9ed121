//! Execution engine: selects, activates, and runs the pipeline for a request.

use std::sync::Arc;

use conduit_core::{Lifetime, Response};
use tower::ServiceExt;
use tracing::{debug, warn};

use super::configuration::HandlerConfiguration;
use super::context::{HandlerContext, HandlerRequest};
use super::descriptor::HandlerDescriptor;
use super::error::DispatchError;
use crate::traits::HandlerInstance;

/// Drives requests through their pipelines. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Worker {
    configuration: Arc<HandlerConfiguration>,
}

impl Worker {
    #[must_use]
    pub fn new(configuration: Arc<HandlerConfiguration>) -> Self {
        Self { configuration }
    }

    /// Runs a command request to exactly one response or one failure.
    ///
    /// # Errors
    ///
    /// Resolution errors before anything runs, otherwise whatever failure
    /// survived the recovery chain, or a boundary error.
    pub async fn execute(&self, request: Arc<HandlerRequest>) -> Result<Response, DispatchError> {
        let result = match self.configuration.selector().select(request.message_type()) {
            Ok(descriptor) => self.run(&request, &descriptor).await,
            Err(error) => Err(error),
        };
        request.complete();
        result
    }

    /// Runs every handler for an event request, one after another, each
    /// through its own pipeline. A failing handler does not stop the rest.
    ///
    /// # Errors
    ///
    /// The failure of the only failing handler, or `Aggregate` when several
    /// failed.
    pub async fn publish(&self, request: Arc<HandlerRequest>) -> Result<(), DispatchError> {
        let descriptors = self.configuration.selector().select_all(request.message_type());
        if descriptors.is_empty() {
            debug!(message_type = request.message_type().name(), "event has no handlers");
        }

        let mut failures = Vec::new();
        for descriptor in &descriptors {
            if let Err(error) = self.run(&request, descriptor).await {
                warn!(
                    message_type = request.message_type().name(),
                    handler = descriptor.handler_type().name(),
                    %error,
                    "event handler failed"
                );
                failures.push(error);
            }
        }
        request.complete();

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(DispatchError::Aggregate(failures)),
        }
    }

    async fn run(
        &self,
        request: &Arc<HandlerRequest>,
        descriptor: &Arc<HandlerDescriptor>,
    ) -> Result<Response, DispatchError> {
        if request.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let handler = self.activate(request, descriptor)?;
        let principal = self.configuration.principal_provider().current_principal(request);
        let scope = self.configuration.scope_provider().begin_scope(request);
        let context = HandlerContext::new(
            Arc::clone(request),
            Arc::clone(descriptor),
            handler,
            principal,
            scope,
        );

        descriptor
            .dispatch_service(&self.configuration)
            .oneshot(context)
            .await
    }

    fn activate(
        &self,
        request: &HandlerRequest,
        descriptor: &HandlerDescriptor,
    ) -> Result<HandlerInstance, DispatchError> {
        let activator = self.configuration.activator();
        let instance = match descriptor.lifetime() {
            Lifetime::Transient => activator.create(request, descriptor),
            Lifetime::PerRequest => {
                let instance = activator.create(request, descriptor);
                if let Some(instance) = &instance {
                    request.root().disposables().register(Arc::clone(instance));
                }
                instance
            }
            Lifetime::Singleton => self
                .configuration
                .singletons()
                .get_or_create(descriptor.handler_type(), || activator.create(request, descriptor)),
        };

        instance.ok_or_else(|| {
            warn!(
                handler = descriptor.handler_type().name(),
                "activator produced no handler instance"
            );
            DispatchError::HandlerNotFound {
                message_type: descriptor.message_type().name(),
            }
        })
    }
}
