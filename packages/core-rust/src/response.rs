use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::message::short_type_name;

/// Type-erased handler response.
///
/// Filters are shared across message types, so responses travel through
/// the pipeline erased and are downcast again at the typed entry point.
/// Cloning is cheap: the value is reference counted, which lets caching
/// filters hand the same response to many callers.
#[derive(Clone)]
pub struct Response {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Response {
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The unit response used by commands that return nothing.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Name of the concrete type held by this response.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Extract the concrete value, cloning it when the response is shared.
    ///
    /// # Errors
    ///
    /// Returns the response unchanged if it does not hold a `T`.
    pub fn into_value<T: Any + Send + Sync + Clone>(self) -> Result<T, Self> {
        let type_name = self.type_name;
        match Arc::downcast::<T>(self.value) {
            Ok(arc) => Ok(Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone())),
            Err(value) => Err(Self { value, type_name }),
        }
    }

    /// Returns `true` if both responses point at the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Response")
            .field(&short_type_name(self.type_name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_matches_stored_type() {
        let resp = Response::new("OK".to_string());
        assert!(resp.is::<String>());
        assert_eq!(resp.downcast_ref::<String>().map(String::as_str), Some("OK"));
        assert!(resp.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn into_value_clones_when_shared() {
        let resp = Response::new(vec![1, 2, 3]);
        let shared = resp.clone();
        let value: Vec<i32> = resp.into_value().unwrap();
        assert_eq!(value, vec![1, 2, 3]);
        assert_eq!(shared.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn into_value_wrong_type_returns_response() {
        let resp = Response::new(42_u64);
        let back = resp.into_value::<String>().unwrap_err();
        assert!(back.is::<u64>());
        assert_eq!(back.type_name(), "u64");
    }

    #[test]
    fn unit_response_holds_unit() {
        assert!(Response::unit().is::<()>());
    }
}
