use std::sync::Arc;

use conduit_core::{MessageKind, MessageType};
use dashmap::DashMap;
use tracing::warn;

use super::descriptor::{HandlerDescriptor, HandlerType};
use super::error::DispatchError;
use super::type_cache::{HandlerBinding, HandlerTypeCache};

#[derive(Clone)]
enum Selection {
    Single(Arc<HandlerDescriptor>),
    NotFound,
    Ambiguous(Vec<&'static str>),
}

/// Resolves descriptors for incoming requests.
///
/// Descriptors are created once per (message type, handler type) pair.
/// Command selections, including failures, are memoized per message type.
pub struct HandlerSelector {
    type_cache: HandlerTypeCache,
    descriptors: DashMap<(MessageType, HandlerType), Arc<HandlerDescriptor>>,
    selections: DashMap<MessageType, Selection>,
}

impl HandlerSelector {
    #[must_use]
    pub fn new(type_cache: HandlerTypeCache) -> Self {
        Self {
            type_cache,
            descriptors: DashMap::new(),
            selections: DashMap::new(),
        }
    }

    /// The single handler for a command type.
    ///
    /// # Errors
    ///
    /// `HandlerNotFound` when no handler type handles `message_type`,
    /// `AmbiguousHandler` when more than one does. Both are repeatable.
    pub fn select(&self, message_type: MessageType) -> Result<Arc<HandlerDescriptor>, DispatchError> {
        let cached = self.selections.get(&message_type).map(|s| s.value().clone());
        let selection = match cached {
            Some(selection) => selection,
            None => self
                .selections
                .entry(message_type)
                .or_insert_with(|| self.compute(message_type))
                .value()
                .clone(),
        };

        match selection {
            Selection::Single(descriptor) => Ok(descriptor),
            Selection::NotFound => Err(DispatchError::HandlerNotFound {
                message_type: message_type.name(),
            }),
            Selection::Ambiguous(handler_types) => Err(DispatchError::AmbiguousHandler {
                message_type: message_type.name(),
                handler_types,
            }),
        }
    }

    /// Every handler for an event type, in registration order. Never fails;
    /// an event nobody handles yields an empty list.
    #[must_use]
    pub fn select_all(&self, message_type: MessageType) -> Vec<Arc<HandlerDescriptor>> {
        self.type_cache
            .handlers_for(message_type, MessageKind::Event)
            .map(|binding| self.descriptor_for(binding))
            .collect()
    }

    fn compute(&self, message_type: MessageType) -> Selection {
        let candidates: Vec<&HandlerBinding> = self
            .type_cache
            .handlers_for(message_type, MessageKind::Command)
            .collect();
        match candidates.as_slice() {
            [] => Selection::NotFound,
            [only] => Selection::Single(self.descriptor_for(only)),
            many => {
                let handler_types: Vec<&'static str> =
                    many.iter().map(|b| b.handler.handler_type().name()).collect();
                warn!(
                    message_type = message_type.name(),
                    handlers = ?handler_types,
                    "ambiguous command handlers; dispatches of this type will fail"
                );
                Selection::Ambiguous(handler_types)
            }
        }
    }

    fn descriptor_for(&self, binding: &HandlerBinding) -> Arc<HandlerDescriptor> {
        let key = (binding.binding.message_type(), binding.handler.handler_type());
        if let Some(existing) = self.descriptors.get(&key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.descriptors
                .entry(key)
                .or_insert_with(|| Arc::new(HandlerDescriptor::new(&binding.handler, &binding.binding)))
                .value(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use conduit_core::{Command, Event, Message};

    use super::*;
    use crate::dispatch::context::HandlerContext;
    use crate::dispatch::registry::{CommandHandler, EventHandler, HandlerRegistration, HandlerRegistry};

    #[derive(Debug)]
    struct Ping;
    impl Message for Ping {}
    impl Command for Ping {
        type Response = ();
    }

    #[derive(Debug)]
    struct Contested;
    impl Message for Contested {}
    impl Command for Contested {
        type Response = ();
    }

    #[derive(Debug)]
    struct Orphan;
    impl Message for Orphan {}
    impl Command for Orphan {
        type Response = ();
    }

    #[derive(Debug)]
    struct Announced;
    impl Message for Announced {}
    impl Event for Announced {}

    macro_rules! handler {
        ($name:ident: $($cmd:ty),* ; $($evt:ty),*) => {
            struct $name;
            $(
                #[async_trait]
                impl CommandHandler<$cmd> for $name {
                    async fn handle(&self, _c: &$cmd, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
                        Ok(())
                    }
                }
            )*
            $(
                #[async_trait]
                impl EventHandler<$evt> for $name {
                    async fn handle(&self, _e: &$evt, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
                        Ok(())
                    }
                }
            )*
        };
    }

    handler!(PingHandler: Ping ; Announced);
    handler!(FirstClaimant: Contested ; Announced);
    handler!(SecondClaimant: Contested ; );

    fn selector() -> HandlerSelector {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                HandlerRegistration::new(|| PingHandler)
                    .handles_command::<Ping>()
                    .handles_event::<Announced>(),
            )
            .unwrap();
        // Same handler type again: collapsed, not ambiguous.
        registry
            .register(HandlerRegistration::new(|| PingHandler).handles_command::<Ping>())
            .unwrap();
        registry
            .register(
                HandlerRegistration::new(|| FirstClaimant)
                    .handles_command::<Contested>()
                    .handles_event::<Announced>(),
            )
            .unwrap();
        registry
            .register(HandlerRegistration::new(|| SecondClaimant).handles_command::<Contested>())
            .unwrap();
        HandlerSelector::new(HandlerTypeCache::new(Arc::new(registry)))
    }

    #[test]
    fn selection_is_stable() {
        let selector = selector();
        let first = selector.select(MessageType::of::<Ping>()).unwrap();
        let second = selector.select(MessageType::of::<Ping>()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.handler_type(), HandlerType::of::<PingHandler>());
        assert_eq!(first.message_type(), MessageType::of::<Ping>());
    }

    #[test]
    fn missing_handler_fails_repeatably() {
        let selector = selector();
        for _ in 0..2 {
            let err = selector.select(MessageType::of::<Orphan>()).unwrap_err();
            assert!(matches!(err, DispatchError::HandlerNotFound { message_type } if message_type.ends_with("Orphan")));
        }
    }

    #[test]
    fn ambiguous_handlers_fail_repeatably() {
        let selector = selector();
        for _ in 0..2 {
            match selector.select(MessageType::of::<Contested>()).unwrap_err() {
                DispatchError::AmbiguousHandler { handler_types, .. } => {
                    assert_eq!(handler_types.len(), 2);
                    assert!(handler_types[0].ends_with("FirstClaimant"));
                    assert!(handler_types[1].ends_with("SecondClaimant"));
                }
                other => panic!("expected ambiguity, got {other}"),
            }
        }
    }

    #[test]
    fn select_all_returns_every_event_handler() {
        let selector = selector();
        let handlers = selector.select_all(MessageType::of::<Announced>());
        let types: Vec<_> = handlers.iter().map(|d| d.handler_type()).collect();
        assert_eq!(
            types,
            vec![HandlerType::of::<PingHandler>(), HandlerType::of::<FirstClaimant>()]
        );

        let again = selector.select_all(MessageType::of::<Announced>());
        assert!(Arc::ptr_eq(&handlers[0], &again[0]));
        assert!(selector.select_all(MessageType::of::<Orphan>()).is_empty());
    }

    #[test]
    fn event_handlers_are_not_selected_as_commands() {
        let selector = selector();
        assert!(matches!(
            selector.select(MessageType::of::<Announced>()),
            Err(DispatchError::HandlerNotFound { .. })
        ));
    }
}
