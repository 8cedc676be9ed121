//! Filter pipeline construction: collect from providers, order by scope,
//! drop duplicates, and split by capability.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::configuration::HandlerConfiguration;
use super::descriptor::HandlerDescriptor;
use super::filter::{Filter, FilterInfo};

/// Collects filters from every provider and orders them outermost first.
#[must_use]
pub fn build_filter_pipeline(configuration: &HandlerConfiguration, descriptor: &HandlerDescriptor) -> Vec<FilterInfo> {
    let collected = configuration
        .filter_providers()
        .iter()
        .flat_map(|provider| provider.filters(configuration, descriptor))
        .collect();
    order_filters(collected)
}

/// Stable-sorts by scope (global outermost) and removes duplicates of
/// filter types that disallow multiples, keeping the instance nearest the
/// handler.
#[must_use]
pub fn order_filters(mut filters: Vec<FilterInfo>) -> Vec<FilterInfo> {
    filters.sort_by_key(FilterInfo::scope);

    let mut seen = HashSet::new();
    let mut kept: Vec<FilterInfo> = filters
        .into_iter()
        .rev()
        .filter(|info| info.allow_multiple() || seen.insert(info.filter_type()))
        .collect();
    kept.reverse();
    kept
}

// ---------------------------------------------------------------------------
// FilterGrouping
// ---------------------------------------------------------------------------

/// A pipeline split by capability, each list outermost first. A filter with
/// both capabilities appears in both lists.
#[derive(Default)]
pub struct FilterGrouping {
    handler_filters: Vec<Arc<dyn Filter>>,
    exception_filters: Vec<Arc<dyn Filter>>,
}

impl FilterGrouping {
    #[must_use]
    pub fn new(pipeline: &[FilterInfo]) -> Self {
        let mut grouping = Self::default();
        for info in pipeline {
            let filter = info.instance();
            if filter.as_handler_filter().is_some() {
                grouping.handler_filters.push(Arc::clone(filter));
            }
            if filter.as_exception_filter().is_some() {
                grouping.exception_filters.push(Arc::clone(filter));
            }
        }
        grouping
    }

    #[must_use]
    pub fn handler_filters(&self) -> &[Arc<dyn Filter>] {
        &self.handler_filters
    }

    #[must_use]
    pub fn exception_filters(&self) -> &[Arc<dyn Filter>] {
        &self.exception_filters
    }
}

struct CachedGrouping {
    pipeline: Arc<[FilterInfo]>,
    grouping: Arc<FilterGrouping>,
}

/// Last computed grouping, reused while the pipeline it was derived from is
/// the same allocation.
#[derive(Default)]
pub(crate) struct GroupingCache {
    last: ArcSwapOption<CachedGrouping>,
}

impl GroupingCache {
    pub(crate) fn get(&self, pipeline: &Arc<[FilterInfo]>) -> Arc<FilterGrouping> {
        if let Some(cached) = &*self.last.load() {
            if Arc::ptr_eq(&cached.pipeline, pipeline) {
                return Arc::clone(&cached.grouping);
            }
        }
        let grouping = Arc::new(FilterGrouping::new(pipeline));
        self.last.store(Some(Arc::new(CachedGrouping {
            pipeline: Arc::clone(pipeline),
            grouping: Arc::clone(&grouping),
        })));
        grouping
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
