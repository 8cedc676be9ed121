use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A plain data object routed through the dispatcher.
///
/// Messages carry data only. Their identity for routing purposes is their
/// runtime type, captured by [`MessageType`].
pub trait Message: Any + Send + Sync + fmt::Debug {}

/// A message with exactly one handler that produces a typed response.
///
/// Commands that produce nothing use `()` as their response.
pub trait Command: Message {
    /// Value returned to the caller of `send`.
    type Response: Any + Send + Sync + Clone;
}

/// A message fanned out to every handler registered for its type.
pub trait Event: Message {}

/// Whether a message is a command (single handler) or an event (fan-out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Event,
}

/// Runtime identity of a message type.
///
/// Equality and hashing use the `TypeId` only; the name is kept for
/// diagnostics and error messages.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// Identity of the concrete message type `M`.
    #[must_use]
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, e.g. `app::orders::CreateOrder`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, e.g. `CreateOrder`.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name).finish()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Object-safe view of a [`Message`], used once the concrete type has been
/// erased at the dispatch boundary.
pub trait DynMessage: fmt::Debug + Send + Sync {
    /// Borrow the message as `Any` for downcasting back to its concrete type.
    fn as_any(&self) -> &dyn Any;

    fn message_type(&self) -> MessageType;
}

impl<M: Message> DynMessage for M {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn message_type(&self) -> MessageType {
        MessageType::of::<M>()
    }
}

impl<'a> dyn DynMessage + 'a {
    /// Downcast to the concrete message type.
    #[must_use]
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

/// Strips module paths from a type name, keeping generic arguments intact.
///
/// `a::b::Foo` becomes `Foo`; `a::Wrapper<b::Foo>` becomes `Wrapper<b::Foo>`.
#[must_use]
pub fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug)]
    struct Ping;
    impl Message for Ping {}

    #[derive(Debug)]
    struct Pong(#[allow(dead_code)] u32);
    impl Message for Pong {}

    #[test]
    fn message_type_identity_is_type_id() {
        assert_eq!(MessageType::of::<Ping>(), MessageType::of::<Ping>());
        assert_ne!(MessageType::of::<Ping>(), MessageType::of::<Pong>());

        let set: HashSet<_> = [MessageType::of::<Ping>(), MessageType::of::<Ping>()]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn short_name_strips_module_path() {
        assert_eq!(MessageType::of::<Ping>().short_name(), "Ping");
        assert_eq!(short_type_name("a::b::Wrapper<c::Inner>"), "Wrapper<c::Inner>");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn dyn_message_downcasts_to_concrete_type() {
        let msg: Box<dyn DynMessage> = Box::new(Pong(7));
        assert_eq!(msg.message_type(), MessageType::of::<Pong>());
        assert!(msg.downcast_ref::<Pong>().is_some());
        assert!(msg.downcast_ref::<Ping>().is_none());
    }
}
