use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use conduit_core::{MessageKind, MessageType};

use super::registry::{HandlerTypeInfo, MessageBinding};
use crate::traits::HandlerTypeResolver;

/// A handler type paired with one message type it handles.
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    pub handler: Arc<HandlerTypeInfo>,
    pub binding: MessageBinding,
}

/// Handler types indexed by the message types they handle.
///
/// The resolver is consulted once, on first lookup. Registering the same
/// handler type twice for the same message collapses to the first
/// registration.
pub struct HandlerTypeCache {
    resolver: Arc<dyn HandlerTypeResolver>,
    index: OnceLock<HashMap<MessageType, Vec<HandlerBinding>>>,
}

impl HandlerTypeCache {
    #[must_use]
    pub fn new(resolver: Arc<dyn HandlerTypeResolver>) -> Self {
        Self {
            resolver,
            index: OnceLock::new(),
        }
    }

    /// Every distinct handler type bound to `message_type` as `kind`, in
    /// registration order.
    pub fn handlers_for(&self, message_type: MessageType, kind: MessageKind) -> impl Iterator<Item = &HandlerBinding> {
        self.index()
            .get(&message_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(move |b| b.binding.kind() == kind)
    }

    /// Number of message types with at least one handler.
    #[must_use]
    pub fn message_type_count(&self) -> usize {
        self.index().len()
    }

    fn index(&self) -> &HashMap<MessageType, Vec<HandlerBinding>> {
        self.index.get_or_init(|| {
            let index = build_index(self.resolver.handler_types());
            tracing::debug!(message_types = index.len(), "handler type cache built");
            index
        })
    }
}

fn build_index(handler_types: Vec<Arc<HandlerTypeInfo>>) -> HashMap<MessageType, Vec<HandlerBinding>> {
    let mut index: HashMap<MessageType, Vec<HandlerBinding>> = HashMap::new();
    for handler in handler_types {
        for binding in handler.bindings() {
            let entries = index.entry(binding.message_type()).or_default();
            let duplicate = entries.iter().any(|existing| {
                existing.handler.handler_type() == handler.handler_type()
                    && existing.binding.kind() == binding.kind()
            });
            if duplicate {
                tracing::debug!(
                    message_type = binding.message_type().name(),
                    handler = handler.handler_type().name(),
                    "duplicate handler registration collapsed"
                );
                continue;
            }
            entries.push(HandlerBinding {
                handler: Arc::clone(&handler),
                binding: binding.clone(),
            });
        }
    }
    index
}
