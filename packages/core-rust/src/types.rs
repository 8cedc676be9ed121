use serde::{Deserialize, Serialize};

/// Authenticated principal on whose behalf a dispatch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    pub roles: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// When a handler instance is released.
///
/// Lifetime governs disposal timing only; every lifetime is created through
/// the same activator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Released as soon as the dispatch's execution chain completes.
    #[default]
    Transient,
    /// Released when the outermost request of the dispatch tree completes.
    PerRequest,
    /// Created once and released when the configuration shuts down.
    Singleton,
}

/// Ordering tier of a filter.
///
/// Variants are declared outermost first so that sorting by scope places
/// global filters ahead of handler filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterScope {
    /// Registered on the configuration; wraps every handler.
    Global,
    /// Declared on a handler registration; runs closest to the handler.
    Handler,
}
