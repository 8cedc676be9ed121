use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{DynMessage, Message, ValidationResult};
use tracing::debug;

use crate::dispatch::context::HandlerContext;
use crate::dispatch::error::DispatchError;
use crate::dispatch::filter::{Filter, HandlerFilter};

/// Checks a message before its handler runs.
pub trait Validator: Send + Sync {
    fn validate(&self, message: &dyn DynMessage) -> ValidationResult;
}

struct TypedRule<M, F> {
    rule: F,
    _message: PhantomData<fn(&M)>,
}

impl<M, F> Validator for TypedRule<M, F>
where
    M: Message,
    F: Fn(&M) -> ValidationResult + Send + Sync,
{
    fn validate(&self, message: &dyn DynMessage) -> ValidationResult {
        message
            .downcast_ref::<M>()
            .map_or(ValidationResult::Valid, |m| (self.rule)(m))
    }
}

/// Fails the dispatch with `DispatchError::Validation` before the handler
/// runs when any validator rejects the message. At most one per pipeline.
#[derive(Default, Clone)]
pub struct ValidationFilter {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidationFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Adds a rule applied only to messages of type `M`.
    #[must_use]
    pub fn rule<M: Message>(self, rule: impl Fn(&M) -> ValidationResult + Send + Sync + 'static) -> Self {
        self.validator(TypedRule {
            rule,
            _message: PhantomData,
        })
    }

    /// Runs every validator and merges their results.
    #[must_use]
    pub fn validate(&self, message: &dyn DynMessage) -> ValidationResult {
        self.validators
            .iter()
            .fold(ValidationResult::Valid, |acc, v| acc.merge(v.validate(message)))
    }
}

#[async_trait]
impl HandlerFilter for ValidationFilter {
    async fn on_executing(&self, context: &mut HandlerContext) -> Result<(), DispatchError> {
        match self.validate(context.message()) {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { errors } => {
                let message_type = context.request().message_type().name();
                debug!(message_type, violations = errors.len(), "message rejected by validation");
                Err(DispatchError::Validation { message_type, errors })
            }
        }
    }
}

impl Filter for ValidationFilter {
    fn allow_multiple(&self) -> bool {
        false
    }

    fn as_handler_filter(&self) -> Option<&dyn HandlerFilter> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conduit_core::FieldError;

    use super::*;

    #[derive(Debug)]
    struct CreateOrder {
        sku: String,
        qty: i32,
    }
    impl Message for CreateOrder {}

    #[derive(Debug)]
    struct Unrelated;
    impl Message for Unrelated {}

    fn filter() -> ValidationFilter {
        ValidationFilter::new()
            .rule(|m: &CreateOrder| {
                if m.sku.is_empty() {
                    vec![FieldError::new("sku", "required")].into()
                } else {
                    ValidationResult::Valid
                }
            })
            .rule(|m: &CreateOrder| {
                if m.qty <= 0 {
                    vec![FieldError::new("qty", "must be positive")].into()
                } else {
                    ValidationResult::Valid
                }
            })
    }

    #[test]
    fn merges_errors_from_every_rule() {
        let result = filter().validate(&CreateOrder {
            sku: String::new(),
            qty: 0,
        });
        let fields: Vec<_> = result.errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["sku", "qty"]);
    }

    #[test]
    fn rules_ignore_other_message_types() {
        assert!(filter().validate(&Unrelated).is_valid());
        assert!(filter()
            .validate(&CreateOrder {
                sku: "A-1".into(),
                qty: 2
            })
            .is_valid());
    }

    #[test]
    fn only_one_validation_filter_per_pipeline() {
        assert!(!ValidationFilter::new().allow_multiple());
    }

    #[tokio::test]
    async fn invalid_message_never_reaches_handler() {
        use std::sync::atomic::Ordering;

        use crate::dispatch::testing::{echo, mediator_with, Echo};

        let (registration, calls) = echo();
        let registration = registration
            .filter(ValidationFilter::new().rule(|m: &Echo| {
                if m.0.is_empty() {
                    vec![FieldError::new("0", "must not be empty")].into()
                } else {
                    ValidationResult::Valid
                }
            }))
            .unwrap();
        let mediator = mediator_with(registration, |b| b);

        match mediator.send(Echo("")).await.unwrap_err() {
            DispatchError::Validation { errors, .. } => assert_eq!(errors[0].field, "0"),
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(mediator.send(Echo("ok")).await.unwrap(), "ok");
    }
}
