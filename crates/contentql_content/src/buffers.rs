//! Request-scoped entity and revision buffers.

use crate::entity::{ContentEntity, EntityId, EntityRef, ResolutionKey};
use crate::storage::{ContentQuery, EntityStorage, StorageError};
use async_trait::async_trait;
use contentql_runtime::{BatchLoad, Deferred, KeyBuffer, ResolverError};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

fn load_error(error: StorageError) -> ResolverError {
    ResolverError::Load(error.to_string())
}

/// Groups the keys' ids by entity type, keeping first-seen order.
fn group_by_type<F>(keys: &[ResolutionKey], id_of: F) -> IndexMap<&str, Vec<u64>>
where
    F: Fn(&ResolutionKey) -> Option<u64>,
{
    let mut groups: IndexMap<&str, Vec<u64>> = IndexMap::new();
    for key in keys {
        if let Some(id) = id_of(key) {
            groups.entry(key.entity_type.as_str()).or_default().push(id);
        }
    }
    groups
}

/// Loads current revisions, one storage call per entity type.
pub struct EntityLoader {
    storage: Arc<dyn EntityStorage>,
}

impl EntityLoader {
    pub fn new(storage: Arc<dyn EntityStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl BatchLoad<ResolutionKey, ContentEntity> for EntityLoader {
    async fn load(
        &self,
        keys: &[ResolutionKey],
    ) -> Result<HashMap<ResolutionKey, ContentEntity>, ResolverError> {
        let mut found = HashMap::with_capacity(keys.len());
        for (entity_type, ids) in group_by_type(keys, |key| Some(key.id)) {
            debug!(entity_type, ids = ids.len(), "loading entities");
            let entities = self
                .storage
                .load_many(entity_type, &ids)
                .await
                .map_err(load_error)?;
            for key in keys.iter().filter(|key| key.entity_type == entity_type) {
                if let Some(entity) = entities.get(&key.id) {
                    found.insert(key.clone(), entity.clone());
                }
            }
        }
        Ok(found)
    }
}

/// Loads specific revisions, one storage call per entity type.
///
/// A revision that belongs to another entity than the key names is not found.
pub struct RevisionLoader {
    storage: Arc<dyn EntityStorage>,
}

impl RevisionLoader {
    pub fn new(storage: Arc<dyn EntityStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl BatchLoad<ResolutionKey, ContentEntity> for RevisionLoader {
    async fn load(
        &self,
        keys: &[ResolutionKey],
    ) -> Result<HashMap<ResolutionKey, ContentEntity>, ResolverError> {
        let mut found = HashMap::with_capacity(keys.len());
        for (entity_type, revision_ids) in group_by_type(keys, |key| key.revision) {
            debug!(entity_type, revisions = revision_ids.len(), "loading revisions");
            let revisions = self
                .storage
                .load_many_revisions(entity_type, &revision_ids)
                .await
                .map_err(load_error)?;
            for key in keys.iter().filter(|key| key.entity_type == entity_type) {
                let entity = key
                    .revision
                    .and_then(|revision| revisions.get(&revision))
                    .filter(|entity| entity.id() == key.id);
                if let Some(entity) = entity {
                    found.insert(key.clone(), entity.clone());
                }
            }
        }
        Ok(found)
    }
}

/// Key of a reverse reference lookup: the `entity_type` entities whose
/// `field` references `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReverseKey {
    pub entity_type: String,
    pub field: String,
    /// Allowed bundles; empty allows all.
    pub bundles: Vec<String>,
    pub target: EntityRef,
}

/// Finds referencing entities with one query per field and target type.
///
/// Matches are loaded through the entity buffer, so every query of a flush
/// shares one entity load.
pub struct ReverseLoader {
    storage: Arc<dyn EntityStorage>,
    entities: KeyBuffer<ResolutionKey, ContentEntity>,
}

impl ReverseLoader {
    pub fn new(
        storage: Arc<dyn EntityStorage>,
        entities: KeyBuffer<ResolutionKey, ContentEntity>,
    ) -> Self {
        Self { storage, entities }
    }
}

#[async_trait]
impl BatchLoad<ReverseKey, Vec<ContentEntity>> for ReverseLoader {
    async fn load(
        &self,
        keys: &[ReverseKey],
    ) -> Result<HashMap<ReverseKey, Vec<ContentEntity>>, ResolverError> {
        let mut groups: IndexMap<(&str, &str, &[String], &str), Vec<EntityId>> = IndexMap::new();
        for key in keys {
            groups
                .entry((
                    key.entity_type.as_str(),
                    key.field.as_str(),
                    key.bundles.as_slice(),
                    key.target.entity_type.as_str(),
                ))
                .or_default()
                .push(key.target.id);
        }

        let mut handles = Vec::new();
        for ((entity_type, field, bundles, target_type), target_ids) in groups {
            let mut query = ContentQuery::new(entity_type)
                .current_revision()
                .access_check(true)
                .condition_references(field, target_type, target_ids);
            if !bundles.is_empty() {
                query = query.condition_in("type", bundles.iter().cloned());
            }
            let ids = self.storage.query(&query).await.map_err(load_error)?;
            debug!(entity_type, field, matches = ids.len(), "reverse references");
            handles.extend(
                self.entities
                    .add_many(ids.into_iter().map(|id| ResolutionKey::entity(entity_type, id))),
            );
        }

        let mut referencing = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(entity) = handle.resolve().await? {
                referencing.push(entity);
            }
        }

        Ok(keys
            .iter()
            .map(|key| {
                let matches = referencing
                    .iter()
                    .filter(|entity| {
                        entity.entity_type() == key.entity_type
                            && (key.bundles.is_empty()
                                || key.bundles.iter().any(|bundle| bundle == entity.bundle()))
                            && entity.references_entity(&key.field, &key.target)
                    })
                    .cloned()
                    .collect();
                (key.clone(), matches)
            })
            .collect())
    }
}

/// The key buffers of one request.
///
/// Stored in the request [`Context`](contentql_runtime::Context); clones share
/// pending batches and cached results.
#[derive(Clone)]
pub struct ContentBuffers {
    entities: KeyBuffer<ResolutionKey, ContentEntity>,
    revisions: KeyBuffer<ResolutionKey, ContentEntity>,
    reverse: KeyBuffer<ReverseKey, Vec<ContentEntity>>,
}

impl ContentBuffers {
    /// Creates fresh buffers over a storage.
    pub fn new(storage: Arc<dyn EntityStorage>, max_batch_size: usize) -> Self {
        let entities = KeyBuffer::new(Arc::new(EntityLoader::new(Arc::clone(&storage))))
            .max_batch_size(max_batch_size);
        let reverse = KeyBuffer::new(Arc::new(ReverseLoader::new(
            Arc::clone(&storage),
            entities.clone(),
        )))
        .max_batch_size(max_batch_size);
        Self {
            entities,
            revisions: KeyBuffer::new(Arc::new(RevisionLoader::new(storage)))
                .max_batch_size(max_batch_size),
            reverse,
        }
    }

    /// Buffer of current revisions.
    pub fn entities(&self) -> &KeyBuffer<ResolutionKey, ContentEntity> {
        &self.entities
    }

    /// Buffer of specific revisions.
    pub fn revisions(&self) -> &KeyBuffer<ResolutionKey, ContentEntity> {
        &self.revisions
    }

    /// Buffer of reverse reference lookups.
    pub fn reverse(&self) -> &KeyBuffer<ReverseKey, Vec<ContentEntity>> {
        &self.reverse
    }

    /// Queues a lookup of the entities referencing a target.
    pub fn load_reverse(&self, key: ReverseKey) -> Deferred<Vec<ContentEntity>> {
        self.reverse.add(key).map(Option::unwrap_or_default)
    }

    /// Queues a key on the buffer matching it.
    pub fn load(&self, key: ResolutionKey) -> Deferred<Option<ContentEntity>> {
        if key.revision.is_some() {
            self.revisions.add(key)
        } else {
            self.entities.add(key)
        }
    }

    /// Queues current revisions of several entities.
    pub fn load_entities(
        &self,
        entity_type: &str,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Vec<Deferred<Option<ContentEntity>>> {
        self.entities.add_many(
            ids.into_iter()
                .map(|id| ResolutionKey::entity(entity_type, id)),
        )
    }
}

impl std::fmt::Debug for ContentBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentBuffers")
            .field("pending_entities", &self.entities.pending_len())
            .field("pending_revisions", &self.revisions.pending_len())
            .field("pending_reverse", &self.reverse.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ReferenceItem, TranslationData};
    use crate::memory::{InMemoryContentStore, StorageCall};

    fn store() -> Arc<InMemoryContentStore> {
        let store = InMemoryContentStore::new();
        store.save(ContentEntity::new("node", 1, "page", "en", TranslationData::new("One")));
        store.save(ContentEntity::new("node", 2, "page", "en", TranslationData::new("Two")));
        store.save(ContentEntity::new("node", 1, "page", "en", TranslationData::new("One v2")));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_entities_load_in_one_call() {
        let store = store();
        let buffers = ContentBuffers::new(store.clone(), 100);

        let handles = buffers.load_entities("node", [2, 1, 2, 9]);
        let labels: Vec<Option<String>> = {
            let mut labels = Vec::new();
            for handle in handles {
                labels.push(handle.resolve().await.unwrap().map(|e| e.label().to_string()));
            }
            labels
        };

        assert_eq!(
            labels,
            vec![
                Some("Two".to_string()),
                Some("One v2".to_string()),
                Some("Two".to_string()),
                None
            ]
        );
        assert_eq!(
            store.calls(),
            vec![StorageCall::LoadMany {
                entity_type: "node".to_string(),
                ids: vec![2, 1, 9],
            }]
        );
    }

    #[tokio::test]
    async fn test_revision_of_other_entity_is_absent() {
        let store = store();
        let buffers = ContentBuffers::new(store.clone(), 100);

        let own = buffers.load(ResolutionKey::revision("node", 1, 1));
        let foreign = buffers.load(ResolutionKey::revision("node", 1, 2));

        assert_eq!(own.resolve().await.unwrap().unwrap().label(), "One");
        assert!(foreign.resolve().await.unwrap().is_none());
        assert_eq!(buffers.revisions().flush_count(), 1);
    }

    #[tokio::test]
    async fn test_reverse_lookups_share_one_query() {
        let store = store();
        store.save(
            ContentEntity::new("node", 3, "article", "en", TranslationData::new("Three"))
                .with_reference("field_related", ReferenceItem::new("node", 1))
                .with_reference("field_related", ReferenceItem::new("node", 2)),
        );
        store.save(
            ContentEntity::new("node", 4, "page", "en", TranslationData::new("Four"))
                .with_reference("field_related", ReferenceItem::new("node", 2)),
        );
        store.clear_calls();
        let buffers = ContentBuffers::new(store.clone(), 100);
        let key = |id| ReverseKey {
            entity_type: "node".to_string(),
            field: "field_related".to_string(),
            bundles: Vec::new(),
            target: EntityRef {
                entity_type: "node".to_string(),
                id,
            },
        };

        let first = buffers.load_reverse(key(1));
        let second = buffers.load_reverse(key(2));
        let labels = |entities: Vec<ContentEntity>| {
            entities
                .iter()
                .map(|entity| entity.label().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(labels(first.resolve().await.unwrap()), vec!["Three"]);
        assert_eq!(labels(second.resolve().await.unwrap()), vec!["Three", "Four"]);
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], StorageCall::Query(query) if query.access_check));
        assert_eq!(
            calls[1],
            StorageCall::LoadMany {
                entity_type: "node".to_string(),
                ids: vec![3, 4],
            }
        );

        let filtered = buffers.load_reverse(ReverseKey {
            bundles: vec!["page".to_string()],
            ..key(2)
        });
        assert_eq!(labels(filtered.resolve().await.unwrap()), vec!["Four"]);
    }

    #[tokio::test]
    async fn test_storage_failure_fails_every_handle() {
        let store = store();
        store.fail_loads("connection reset");
        let buffers = ContentBuffers::new(store.clone(), 100);

        let first = buffers.load(ResolutionKey::entity("node", 1));
        let second = buffers.load(ResolutionKey::entity("node", 2));

        let error = first.resolve().await.unwrap_err();
        assert!(matches!(error, ResolverError::Load(ref message) if message.contains("connection reset")));
        assert_eq!(second.resolve().await.unwrap_err(), error);
        assert_eq!(store.calls().len(), 1);
    }
}
