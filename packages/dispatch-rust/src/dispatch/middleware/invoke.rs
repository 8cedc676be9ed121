//! Innermost chain stage: calls the handler.

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tower::Service;
use tracing::{debug, error};

use super::ChainFuture;
use crate::dispatch::context::{ExecutedContext, HandlerContext};
use crate::dispatch::error::DispatchError;

/// Calls the context's handler with the context's message. Handler errors
/// and panics become failed outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerInvokerService;

impl Service<HandlerContext> for HandlerInvokerService {
    type Response = ExecutedContext;
    type Error = Infallible;
    type Future = ChainFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut context: HandlerContext) -> Self::Future {
        Box::pin(async move {
            if context.is_cancelled() {
                return Ok(ExecutedContext::failed(context, DispatchError::Cancelled));
            }
            let invoker = Arc::clone(context.descriptor().invoker());
            let handler = context.descriptor().handler_type().name();
            debug!(handler, attempt = context.attempt(), "invoking handler");

            let outcome = AssertUnwindSafe(invoker.invoke(&mut context))
                .catch_unwind()
                .await;
            Ok(match outcome {
                Ok(Ok(response)) => {
                    context.set_response(response);
                    ExecutedContext::completed(context)
                }
                Ok(Err(err)) => ExecutedContext::failed(context, DispatchError::handler(handler, err)),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(handler, %message, "handler panicked");
                    ExecutedContext::failed(context, DispatchError::HandlerPanicked { handler, message })
                }
            })
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
