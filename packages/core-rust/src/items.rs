use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Free-form, per-request bag for filters to pass data to each other.
///
/// A filter may compute something in its pre-phase (a cache key, an open
/// transaction) and pick it up again in its post-phase. The bag is owned by
/// one dispatch and survives retries of that dispatch.
#[derive(Default)]
pub struct Items {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Items {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, returning `true` if an entry was replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.entries.insert(key.into(), Box::new(value)).is_some()
    }

    /// Borrows the entry under `key` if it exists and holds a `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    #[must_use]
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes and returns the entry under `key`.
    ///
    /// An entry of a different type is left in place and `None` is returned.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.entries.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.entries
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Items {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Items").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_typed() {
        let mut items = Items::new();
        assert!(!items.insert("cache.key", "abc".to_string()));
        assert_eq!(items.get::<String>("cache.key").map(String::as_str), Some("abc"));
        assert!(items.get::<u32>("cache.key").is_none());
        assert!(items.insert("cache.key", "def".to_string()));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut items = Items::new();
        items.insert("attempts", 1_u32);
        *items.get_mut::<u32>("attempts").unwrap() += 1;
        assert_eq!(items.get::<u32>("attempts"), Some(&2));
    }

    #[test]
    fn remove_wrong_type_keeps_entry() {
        let mut items = Items::new();
        items.insert("n", 5_i64);
        assert_eq!(items.remove::<String>("n"), None);
        assert!(items.contains_key("n"));
        assert_eq!(items.remove::<i64>("n"), Some(5));
        assert!(items.is_empty());
    }
}
