//! Lists the paths of published content of one type, per translation.

use crate::buffers::ContentBuffers;
use crate::config::ContentConfig;
use crate::entity::ContentPathEntry;
use crate::storage::{ContentQuery, EntityStorage, SortDirection, UrlGenerator};
use contentql_runtime::{Deferred, FieldContext, ResolverError};
use std::sync::Arc;
use tracing::debug;

/// Removes the deployment base path from a generated path, keeping the
/// leading slash. `base_path` must end with a slash.
pub fn strip_base_path(path: &str, base_path: &str) -> String {
    match path.strip_prefix(base_path) {
        Some(rest) if base_path != "/" => format!("/{rest}"),
        _ => path.to_string(),
    }
}

/// Resolves `contentPaths(type)`.
pub struct ContentPathsResolver {
    storage: Arc<dyn EntityStorage>,
    urls: Arc<dyn UrlGenerator>,
    entity_type: String,
    base_path: String,
    list_cache_tags: Vec<String>,
    list_cache_contexts: Vec<String>,
}

impl ContentPathsResolver {
    pub fn new(
        config: &ContentConfig,
        storage: Arc<dyn EntityStorage>,
        urls: Arc<dyn UrlGenerator>,
    ) -> Self {
        Self {
            storage,
            urls,
            entity_type: config.entity_type.clone(),
            base_path: config.normalized_base_path(),
            list_cache_tags: config.list_cache_tags(),
            list_cache_contexts: config.list_cache_contexts.clone(),
        }
    }

    /// The query listing published content of a type, oldest first.
    pub fn query(&self, content_type: &str) -> ContentQuery {
        ContentQuery::new(&self.entity_type)
            .current_revision()
            .access_check(true)
            .condition("status", true)
            .sort("created", SortDirection::Asc)
            .condition_in("type", [content_type])
    }

    /// Returns one entry per (entity, translation). Every translation of an
    /// entity shares the path of its default language.
    ///
    /// List cacheability is recorded right away; the query runs when the
    /// handle is resolved and its entities are loaded in one batch.
    pub fn resolve(
        &self,
        buffers: &ContentBuffers,
        content_type: &str,
        cache: &FieldContext,
    ) -> Deferred<Vec<ContentPathEntry>> {
        let query = self.query(content_type);

        cache
            .add_cache_tags(self.list_cache_tags.iter().cloned())
            .add_cache_contexts(self.list_cache_contexts.iter().cloned());

        let storage = Arc::clone(&self.storage);
        let urls = Arc::clone(&self.urls);
        let base_path = self.base_path.clone();
        let buffers = buffers.clone();
        let cache = cache.clone();

        Deferred::new(move || async move {
            let ids = storage
                .query(&query)
                .await
                .map_err(|error| ResolverError::Load(error.to_string()))?;
            debug!(entity_type = %query.entity_type, matches = ids.len(), "content query executed");

            let handles = buffers.load_entities(&query.entity_type, ids);
            let mut entries = Vec::new();
            for handle in handles {
                let Some(entity) = handle.resolve().await? else {
                    continue;
                };
                cache.add_cacheable_dependency(&entity);
                let path = strip_base_path(&urls.entity_url(&entity), &base_path);
                for langcode in entity.translation_languages() {
                    entries.push(ContentPathEntry {
                        path: path.clone(),
                        langcode: langcode.to_string(),
                        entity: entity.entity_ref(),
                    });
                }
            }
            Ok(entries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ContentEntity, TranslationData};
    use crate::memory::{InMemoryContentStore, StorageCall};

    #[test]
    fn test_strip_base_path() {
        assert_eq!(strip_base_path("/site/about", "/site/"), "/about");
        assert_eq!(strip_base_path("/about", "/"), "/about");
        assert_eq!(strip_base_path("/other/about", "/site/"), "/other/about");
    }

    #[test]
    fn test_query_shape() {
        let store = Arc::new(InMemoryContentStore::new());
        let resolver = ContentPathsResolver::new(&ContentConfig::new(), store.clone(), store);
        let query = resolver.query("page");

        assert_eq!(query.entity_type, "node");
        assert!(query.current_revision);
        assert!(query.access_check);
        assert_eq!(query.conditions.len(), 2);
        assert_eq!(query.sorts[0].field, "created");
    }

    #[tokio::test]
    async fn test_entries_per_translation_in_creation_order() {
        let store = Arc::new(InMemoryContentStore::new().with_base_path("/site/"));
        store.save(
            ContentEntity::new("node", 1, "page", "en", TranslationData::new("Late").at(300, 300))
                .with_translation("fr", TranslationData::new("Tard").at(300, 300)),
        );
        store.save(ContentEntity::new("node", 2, "page", "en", TranslationData::new("Early").at(100, 100)));
        store.save(ContentEntity::new("node", 3, "article", "en", TranslationData::new("News").at(50, 50)));
        store.save(
            ContentEntity::new("node", 4, "page", "en", TranslationData::new("Draft").at(10, 10).unpublished()),
        );
        store.set_alias("node", 2, "en", "/early");
        store.set_alias("node", 1, "fr", "/tard");

        let config = ContentConfig::new().base_path("/site");
        let resolver = ContentPathsResolver::new(&config, store.clone(), store.clone());
        let buffers = ContentBuffers::new(store.clone(), 100);
        let cache = FieldContext::new();

        let handle = resolver.resolve(&buffers, "page", &cache);
        assert!(store.calls().is_empty());
        assert!(cache.snapshot().tags.contains("node_list"));

        let entries = handle.resolve().await.unwrap();
        let flat: Vec<(&str, &str)> = entries
            .iter()
            .map(|entry| (entry.path.as_str(), entry.langcode.as_str()))
            .collect();
        assert_eq!(
            flat,
            vec![("/early", "en"), ("/node/1", "en"), ("/node/1", "fr")]
        );
        assert_eq!(entries[1].entity.id, 1);

        let loads: Vec<_> = store
            .calls()
            .into_iter()
            .filter(|call| matches!(call, StorageCall::LoadMany { .. }))
            .collect();
        assert_eq!(loads.len(), 1);
        assert!(cache.snapshot().tags.contains("node:2"));
    }
}
