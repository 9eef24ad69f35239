//! Cacheability metadata.
//!
//! Resolvers never own a cache. They describe what a response depends on
//! (tags for invalidation, contexts for variation, a max-age) and the host
//! turns the merged result into cache headers or storage entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// How long a response may be cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxAge {
    /// Until invalidated by a tag.
    #[default]
    Permanent,
    /// At most this many seconds; zero means uncacheable.
    Seconds(u32),
}

impl MaxAge {
    /// Returns the shorter of two ages.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        match (self, other) {
            (Self::Permanent, other) | (other, Self::Permanent) => other,
            (Self::Seconds(a), Self::Seconds(b)) => Self::Seconds(a.min(b)),
        }
    }
}

/// Tags, contexts and max-age of a piece of resolved data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Invalidation tags, e.g. `node:1` or `node_list`.
    pub tags: BTreeSet<String>,
    /// Request dimensions the data varies on, e.g. `user.permissions`.
    pub contexts: BTreeSet<String>,
    /// Maximum age.
    #[serde(default)]
    pub max_age: MaxAge,
}

impl CacheMetadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Adds contexts.
    #[must_use]
    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts.extend(contexts.into_iter().map(Into::into));
        self
    }

    /// Sets the max-age.
    #[must_use]
    pub fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.max_age = max_age;
        self
    }

    /// Merges another set of metadata into this one.
    pub fn merge(&mut self, other: &CacheMetadata) {
        self.tags.extend(other.tags.iter().cloned());
        self.contexts.extend(other.contexts.iter().cloned());
        self.max_age = self.max_age.min(other.max_age);
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.contexts.is_empty() && self.max_age == MaxAge::Permanent
    }
}

/// Something whose cacheability a response inherits when it is used.
pub trait CacheableDependency {
    /// The metadata of this dependency.
    fn cache_metadata(&self) -> CacheMetadata;
}

impl CacheableDependency for CacheMetadata {
    fn cache_metadata(&self) -> CacheMetadata {
        self.clone()
    }
}

/// Write-only sink for cache metadata collected while resolving a request.
///
/// Clones write to the same collection, so a handle can move into deferred
/// computations that finish after the resolver returned.
#[derive(Debug, Clone, Default)]
pub struct FieldContext {
    collected: Arc<Mutex<CacheMetadata>>,
}

impl FieldContext {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut CacheMetadata)) -> &Self {
        f(&mut self
            .collected
            .lock()
            .unwrap_or_else(PoisonError::into_inner));
        self
    }

    /// Records invalidation tags.
    pub fn add_cache_tags<I, S>(&self, tags: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update(|meta| meta.tags.extend(tags.into_iter().map(Into::into)))
    }

    /// Records cache contexts.
    pub fn add_cache_contexts<I, S>(&self, contexts: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update(|meta| meta.contexts.extend(contexts.into_iter().map(Into::into)))
    }

    /// Records everything a dependency carries.
    pub fn add_cacheable_dependency(&self, dependency: &dyn CacheableDependency) -> &Self {
        let metadata = dependency.cache_metadata();
        self.update(|meta| meta.merge(&metadata))
    }

    /// Returns a copy of what has been collected so far.
    pub fn snapshot(&self) -> CacheMetadata {
        self.collected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
