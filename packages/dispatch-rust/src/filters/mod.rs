//! Built-in filters.

pub mod cache;
pub mod exception;
pub mod transaction;
pub mod validation;

pub use cache::{CacheFilter, CacheKeyStrategy, DebugHashKey};
pub use exception::{ExceptionTranslationFilter, LoggingExceptionFilter};
pub use transaction::{Transaction, TransactionFilter, TransactionManager};
pub use validation::{ValidationFilter, Validator};
