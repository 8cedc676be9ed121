//! Conduit core: message identity, type-erased responses, the per-request item
//! bag, principals, and the small enums shared by the dispatcher.

pub mod items;
pub mod message;
pub mod response;
pub mod types;
pub mod validation;

pub use items::Items;
pub use message::{short_type_name, Command, DynMessage, Event, Message, MessageKind, MessageType};
pub use response::Response;
pub use types::{FilterScope, Lifetime, Principal};
pub use validation::{FieldError, ValidationResult};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
