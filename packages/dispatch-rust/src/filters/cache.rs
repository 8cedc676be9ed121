use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::Response;
use quick_cache::sync::Cache;
use tracing::trace;

use crate::dispatch::config::DispatchConfig;
use crate::dispatch::context::{ExecutedContext, HandlerContext};
use crate::dispatch::error::DispatchError;
use crate::dispatch::filter::{Filter, HandlerFilter};

/// Item-bag key under which the pre-phase leaves the key of a cache miss.
const PENDING_KEY: &str = "conduit.cache.pending_key";

/// Derives the cache key of a dispatch. `None` bypasses the cache.
pub trait CacheKeyStrategy: Send + Sync {
    fn cache_key(&self, context: &HandlerContext) -> Option<String>;
}

/// BLAKE3 over the message type name and the message's `Debug` form.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugHashKey;

impl CacheKeyStrategy for DebugHashKey {
    fn cache_key(&self, context: &HandlerContext) -> Option<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(context.request().message_type().name().as_bytes());
        hasher.update(&[0]);
        hasher.update(format!("{:?}", context.message()).as_bytes());
        Some(hasher.finalize().to_hex().to_string())
    }
}

/// Serves repeated messages from memory.
///
/// A hit short-circuits the handler. A miss remembers its key in the item
/// bag and the post-phase stores the response if the dispatch succeeded.
pub struct CacheFilter {
    cache: Cache<String, Response>,
    key_strategy: Arc<dyn CacheKeyStrategy>,
}

impl CacheFilter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Cache::new(capacity),
            key_strategy: Arc::new(DebugHashKey),
        }
    }

    #[must_use]
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.cache_capacity)
    }

    #[must_use]
    pub fn with_key_strategy(mut self, strategy: impl CacheKeyStrategy + 'static) -> Self {
        self.key_strategy = Arc::new(strategy);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl HandlerFilter for CacheFilter {
    async fn on_executing(&self, context: &mut HandlerContext) -> Result<(), DispatchError> {
        let Some(key) = self.key_strategy.cache_key(context) else {
            return Ok(());
        };
        if let Some(hit) = self.cache.get(&key) {
            trace!(%key, "cache hit");
            context.set_response(hit);
        } else {
            trace!(%key, "cache miss");
            context.items_mut().insert(PENDING_KEY, key);
        }
        Ok(())
    }

    async fn on_executed(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        let Some(key) = executed.context_mut().items_mut().remove::<String>(PENDING_KEY) else {
            return Ok(());
        };
        if executed.is_success() {
            if let Some(response) = executed.response() {
                self.cache.insert(key, response.clone());
            }
        }
        Ok(())
    }
}

impl Filter for CacheFilter {
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
