use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::Response;
use tracing::error;

use crate::dispatch::context::ExecutedContext;
use crate::dispatch::error::DispatchError;
use crate::dispatch::filter::{ExceptionFilter, Filter};

/// Logs every failure that reaches the exception chain. Never recovers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExceptionFilter;

#[async_trait]
impl ExceptionFilter for LoggingExceptionFilter {
    async fn on_exception(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        if let Some(failure) = executed.error() {
            let context = executed.context();
            error!(
                request_id = %context.request().id(),
                message_type = context.request().message_type().name(),
                handler = context.descriptor().handler_type().name(),
                attempt = context.attempt(),
                kind = failure.kind(),
                error = %failure,
                "dispatch failed"
            );
        }
        Ok(())
    }
}

impl Filter for LoggingExceptionFilter {
    fn allow_multiple(&self) -> bool {
        false
    }

    fn as_exception_filter(&self) -> Option<&dyn ExceptionFilter> {
        Some(self)
    }
}

type Translation = dyn Fn(&DispatchError) -> Option<Response> + Send + Sync;

/// Replaces failures with a response when the translation yields one.
#[derive(Clone)]
pub struct ExceptionTranslationFilter {
    translate: Arc<Translation>,
}

impl ExceptionTranslationFilter {
    pub fn new(translate: impl Fn(&DispatchError) -> Option<Response> + Send + Sync + 'static) -> Self {
        Self {
            translate: Arc::new(translate),
        }
    }
}

#[async_trait]
impl ExceptionFilter for ExceptionTranslationFilter {
    async fn on_exception(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        if let Some(response) = executed.error().and_then(|failure| (self.translate)(failure)) {
            executed.set_response(response);
        }
        Ok(())
    }
}

impl Filter for ExceptionTranslationFilter {
    fn as_exception_filter(&self) -> Option<&dyn ExceptionFilter> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{failing, mediator_with, Echo};

    #[tokio::test]
    async fn translation_recovers_matching_failures() {
        let (registration, _) = failing("boom");
        let mediator = mediator_with(registration, |b| {
            b.global_filter(ExceptionTranslationFilter::new(|error| {
                matches!(error, DispatchError::Handler { .. }).then(|| Response::new("translated".to_string()))
            }))
            .unwrap()
        });

        assert_eq!(mediator.send(Echo("a")).await.unwrap(), "translated");
    }

    #[tokio::test]
    async fn translation_passes_other_failures_on() {
        let (registration, _) = failing("boom");
        let mediator = mediator_with(registration, |b| {
            b.global_filter(ExceptionTranslationFilter::new(|_| None))
                .unwrap()
                .global_filter(LoggingExceptionFilter)
                .unwrap()
        });

        let err = mediator.send(Echo("a")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));
    }

    #[test]
    fn only_one_logging_filter_per_pipeline() {
        assert!(!LoggingExceptionFilter.allow_multiple());
        assert!(LoggingExceptionFilter.as_handler_filter().is_none());
    }
}
