//! Failure classification for every stage of a dispatch.

use std::sync::Arc;

use conduit_core::FieldError;

/// Errors surfaced by the dispatcher.
///
/// Execution failures (`Handler`, `HandlerPanicked`, `Filter`, `Validation`,
/// `Cancelled`) travel on the `ExecutedContext` until the recovery chain has
/// run. Resolution and boundary errors are returned directly.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("no handler registered for {message_type}")]
    HandlerNotFound { message_type: &'static str },

    #[error("ambiguous handlers for {message_type}: {}", .handler_types.join(", "))]
    AmbiguousHandler {
        message_type: &'static str,
        handler_types: Vec<&'static str>,
    },

    #[error("handler {handler} failed: {error:#}")]
    Handler {
        handler: &'static str,
        error: Arc<anyhow::Error>,
    },

    #[error("handler {handler} panicked: {message}")]
    HandlerPanicked {
        handler: &'static str,
        message: String,
    },

    #[error("filter {filter} failed: {error:#}")]
    Filter {
        filter: &'static str,
        error: Arc<anyhow::Error>,
    },

    #[error("validation failed for {message_type}: {}", format_field_errors(.errors))]
    Validation {
        message_type: &'static str,
        errors: Vec<FieldError>,
    },

    #[error("dispatch cancelled")]
    Cancelled,

    #[error("dispatch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("dispatcher overloaded, try again later")]
    Overloaded,

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("handler returned {actual}, caller expected {expected}")]
    ResponseType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{} event handlers failed: {}", .0.len(), format_aggregate(.0))]
    Aggregate(Vec<DispatchError>),
}

impl DispatchError {
    /// Wraps a handler failure.
    #[must_use]
    pub fn handler(handler: &'static str, error: anyhow::Error) -> Self {
        Self::Handler {
            handler,
            error: Arc::new(error),
        }
    }

    /// Wraps a filter failure. `filter` is usually `std::any::type_name::<F>()`.
    #[must_use]
    pub fn filter(filter: &'static str, error: anyhow::Error) -> Self {
        Self::Filter {
            filter,
            error: Arc::new(error),
        }
    }

    /// The underlying `anyhow` error of a handler or filter failure.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Handler { error, .. } | Self::Filter { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }

    /// True for `HandlerNotFound` and `AmbiguousHandler`.
    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::HandlerNotFound { .. } | Self::AmbiguousHandler { .. })
    }

    /// Failures raised while the handler or a filter ran, as opposed to
    /// configuration, resolution, and boundary errors.
    #[must_use]
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Self::Handler { .. }
                | Self::HandlerPanicked { .. }
                | Self::Filter { .. }
                | Self::Validation { .. }
                | Self::Cancelled
        )
    }

    /// True when the cause chain of a handler or filter failure contains a
    /// [`TransientError`].
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.cause()
            .is_some_and(|error| error.chain().any(|cause| cause.is::<TransientError>()))
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::HandlerNotFound { .. } => "handler_not_found",
            Self::AmbiguousHandler { .. } => "ambiguous_handler",
            Self::Handler { .. } => "handler",
            Self::HandlerPanicked { .. } => "handler_panicked",
            Self::Filter { .. } => "filter",
            Self::Validation { .. } => "validation",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::Overloaded => "overloaded",
            Self::ShuttingDown => "shutting_down",
            Self::ResponseType { .. } => "response_type",
            Self::Aggregate(_) => "aggregate",
        }
    }
}

/// Marker error for failures worth retrying under [`RetryOn::Transient`].
///
/// Return it (or wrap it with `anyhow::Context`) from a handler:
/// `Err(TransientError::new("database busy").into())`.
///
/// [`RetryOn::Transient`]: crate::dispatch::middleware::RetryOn::Transient
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransientError {
    message: String,
}

impl TransientError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| {
            if e.field.is_empty() {
                e.message.clone()
            } else {
                format!("{}: {}", e.field, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_aggregate(errors: &[DispatchError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
