//! In-memory collaborators.
//!
//! [`InMemoryContentStore`] keeps every revision of every entity and
//! implements storage, routing, access and URL generation on top of them.
//! It records storage calls so batching can be observed.

use crate::content_paths::strip_base_path;
use crate::entity::{ContentEntity, EntityId, ReferenceItem, RevisionId, TranslationData};
use crate::storage::{
    AccessChecker, AccessResult, ContentQuery, EntityStorage, RouteMatch, RouteResolver,
    SortDirection, StorageError, UrlGenerator,
};
use async_trait::async_trait;
use contentql_runtime::CacheMetadata;
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// A storage call, as recorded by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageCall {
    LoadMany {
        entity_type: String,
        ids: Vec<EntityId>,
    },
    LoadRevisions {
        entity_type: String,
        revision_ids: Vec<RevisionId>,
    },
    Query(ContentQuery),
}

struct Stored {
    current: ContentEntity,
    aliases: IndexMap<String, String>,
    denied: bool,
}

#[derive(Default)]
struct StoreState {
    entities: IndexMap<(String, EntityId), Stored>,
    revisions: HashMap<(String, RevisionId), ContentEntity>,
    last_revision: RevisionId,
}

#[derive(Default)]
struct CallLog {
    calls: Vec<StorageCall>,
    load_failure: Option<String>,
}

/// Content held in memory.
pub struct InMemoryContentStore {
    state: RwLock<StoreState>,
    log: Mutex<CallLog>,
    base_path: String,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContentStore {
    /// Creates an empty store served from `/`.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            log: Mutex::new(CallLog::default()),
            base_path: "/".to_string(),
        }
    }

    /// Sets the base path prepended to generated URLs.
    #[must_use]
    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = format!("{}/", base_path.trim_end_matches('/'));
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, CallLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saves a new revision of an entity and makes it current.
    pub fn save(&self, entity: ContentEntity) -> RevisionId {
        let mut state = self.write();
        state.last_revision += 1;
        let revision_id = state.last_revision;
        let entity = entity.with_revision_id(revision_id);
        let key = (entity.entity_type().to_string(), entity.id());

        state
            .revisions
            .insert((key.0.clone(), revision_id), entity.clone());
        match state.entities.entry(key) {
            Entry::Occupied(mut stored) => stored.get_mut().current = entity,
            Entry::Vacant(slot) => {
                slot.insert(Stored {
                    current: entity,
                    aliases: IndexMap::new(),
                    denied: false,
                });
            }
        }
        revision_id
    }

    /// Sets the alias of an entity in a language.
    pub fn set_alias(&self, entity_type: &str, id: EntityId, langcode: &str, alias: &str) {
        if let Some(stored) = self.write().entities.get_mut(&(entity_type.to_string(), id)) {
            stored.aliases.insert(langcode.to_string(), alias.to_string());
        }
    }

    /// Denies view access to an entity.
    pub fn deny_view(&self, entity_type: &str, id: EntityId) {
        if let Some(stored) = self.write().entities.get_mut(&(entity_type.to_string(), id)) {
            stored.denied = true;
        }
    }

    /// Makes every following entity or revision load fail.
    pub fn fail_loads(&self, message: &str) {
        self.log().load_failure = Some(message.to_string());
    }

    /// Storage calls made so far.
    pub fn calls(&self) -> Vec<StorageCall> {
        self.log().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.log().calls.clear();
    }

    fn record(&self, call: StorageCall) -> Result<(), StorageError> {
        let mut log = self.log();
        let is_load = !matches!(call, StorageCall::Query(_));
        log.calls.push(call);
        match &log.load_failure {
            Some(message) if is_load => Err(StorageError::Backend(message.clone())),
            _ => Ok(()),
        }
    }

    /// Builds a store from a JSON fixture.
    pub fn from_json(source: &str) -> Result<Self, StorageError> {
        let fixture: Fixture =
            serde_json::from_str(source).map_err(|e| StorageError::Fixture(e.to_string()))?;
        fixture.into_store()
    }

    /// Reads a JSON fixture file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Fixture(format!("{}: {e}", path.display())))?;
        Self::from_json(&source)
    }

    fn normalize(&self, path: &str) -> String {
        let path = path.trim();
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let path = strip_base_path(&path, &self.base_path);
        match path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl EntityStorage for InMemoryContentStore {
    async fn load_many(
        &self,
        entity_type: &str,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, ContentEntity>, StorageError> {
        self.record(StorageCall::LoadMany {
            entity_type: entity_type.to_string(),
            ids: ids.to_vec(),
        })?;
        let state = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .entities
                    .get(&(entity_type.to_string(), *id))
                    .map(|stored| (*id, stored.current.clone()))
            })
            .collect())
    }

    async fn load_many_revisions(
        &self,
        entity_type: &str,
        revision_ids: &[RevisionId],
    ) -> Result<HashMap<RevisionId, ContentEntity>, StorageError> {
        self.record(StorageCall::LoadRevisions {
            entity_type: entity_type.to_string(),
            revision_ids: revision_ids.to_vec(),
        })?;
        let state = self.read();
        Ok(revision_ids
            .iter()
            .filter_map(|revision| {
                state
                    .revisions
                    .get(&(entity_type.to_string(), *revision))
                    .map(|entity| (*revision, entity.clone()))
            })
            .collect())
    }

    async fn query(&self, query: &ContentQuery) -> Result<Vec<EntityId>, StorageError> {
        self.record(StorageCall::Query(query.clone()))?;
        let state = self.read();

        let mut candidates: Vec<&ContentEntity> = if query.current_revision {
            state.entities.values().map(|stored| &stored.current).collect()
        } else {
            let mut revisions: Vec<&ContentEntity> = state.revisions.values().collect();
            revisions.sort_by_key(|entity| entity.revision_id());
            revisions
        };
        candidates.retain(|entity| query.matches(entity));
        if query.access_check {
            candidates.retain(|entity| view_access(&state, entity).is_allowed());
        }

        for sort in &query.sorts {
            if candidates
                .first()
                .is_some_and(|entity| entity.field(&sort.field).is_none())
            {
                return Err(StorageError::InvalidQuery(format!(
                    "cannot sort on '{}'",
                    sort.field
                )));
            }
        }
        // Stable, so ties keep insertion order.
        candidates.sort_by(|a, b| {
            query
                .sorts
                .iter()
                .map(|sort| {
                    let ordering =
                        compare_values(a.field(&sort.field).as_ref(), b.field(&sort.field).as_ref());
                    match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let mut ids: Vec<EntityId> = Vec::with_capacity(candidates.len());
        for entity in candidates {
            if !ids.contains(&entity.id()) {
                ids.push(entity.id());
            }
        }
        debug!(entity_type = %query.entity_type, matches = ids.len(), "in-memory query");
        Ok(ids)
    }
}

impl RouteResolver for InMemoryContentStore {
    fn resolve_path(&self, path: &str) -> Option<RouteMatch> {
        let path = self.normalize(path);
        let state = self.read();

        if let Some(((entity_type, id), _)) = state
            .entities
            .iter()
            .find(|(_, stored)| stored.aliases.values().any(|alias| *alias == path))
        {
            return Some(RouteMatch {
                entity_type: entity_type.clone(),
                id: *id,
            });
        }

        let (entity_type, id) = path.strip_prefix('/')?.split_once('/')?;
        let id = id.parse().ok()?;
        state
            .entities
            .keys()
            .any(|(known, _)| known == entity_type)
            .then(|| RouteMatch {
                entity_type: entity_type.to_string(),
                id,
            })
    }
}

impl AccessChecker for InMemoryContentStore {
    fn can_view(&self, entity: &ContentEntity) -> AccessResult {
        view_access(&self.read(), entity)
    }
}

fn view_access(state: &StoreState, entity: &ContentEntity) -> AccessResult {
    let denied = state
        .entities
        .get(&(entity.entity_type().to_string(), entity.id()))
        .is_some_and(|stored| stored.denied);
    AccessResult::allowed_if(entity.is_published() && !denied).with_cache(
        CacheMetadata::new()
            .with_tags(entity.cache_tags())
            .with_contexts(["user.permissions"]),
    )
}

impl UrlGenerator for InMemoryContentStore {
    fn entity_url(&self, entity: &ContentEntity) -> String {
        let path = self.alias_by_path(&entity.system_path(), entity.langcode());
        format!("{}{path}", self.base_path.trim_end_matches('/'))
    }

    fn alias_by_path(&self, system_path: &str, langcode: &str) -> String {
        let state = self.read();
        state
            .entities
            .values()
            .find(|stored| stored.current.system_path() == system_path)
            .and_then(|stored| stored.aliases.get(langcode))
            .cloned()
            .unwrap_or_else(|| system_path.to_string())
    }
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_entity_type() -> String {
    "node".to_string()
}

fn default_langcode() -> String {
    "en".to_string()
}

/// A JSON content fixture.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fixture {
    #[serde(default = "default_base_path")]
    base_path: String,
    entities: Vec<FixtureEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureEntity {
    #[serde(rename = "type", default = "default_entity_type")]
    entity_type: String,
    id: EntityId,
    bundle: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default = "default_langcode")]
    langcode: String,
    /// Oldest first; each maps languages to their values.
    revisions: Vec<IndexMap<String, TranslationData>>,
    /// Reference field targets, stored on every revision.
    #[serde(default)]
    references: IndexMap<String, Vec<ReferenceItem>>,
    #[serde(default)]
    aliases: IndexMap<String, String>,
    #[serde(default)]
    deny_view: bool,
}

impl Fixture {
    fn into_store(self) -> Result<InMemoryContentStore, StorageError> {
        let store = InMemoryContentStore::new().with_base_path(&self.base_path);
        for item in self.entities {
            if item.revisions.is_empty() {
                return Err(StorageError::Fixture(format!(
                    "{} {} has no revisions",
                    item.entity_type, item.id
                )));
            }
            for mut values in item.revisions {
                let base = values.shift_remove(&item.langcode).ok_or_else(|| {
                    StorageError::Fixture(format!(
                        "{} {} has a revision without its '{}' values",
                        item.entity_type, item.id, item.langcode
                    ))
                })?;
                let mut entity = ContentEntity::new(
                    item.entity_type.as_str(),
                    item.id,
                    item.bundle.as_str(),
                    item.langcode.as_str(),
                    base,
                );
                if let Some(uuid) = &item.uuid {
                    entity = entity.with_uuid(uuid.as_str());
                }
                for (langcode, data) in values {
                    entity = entity.with_translation(langcode, data);
                }
                for (field, items) in &item.references {
                    for reference in items {
                        entity = entity.with_reference(field.as_str(), reference.clone());
                    }
                }
                store.save(entity);
            }
            for (langcode, alias) in &item.aliases {
                store.set_alias(&item.entity_type, item.id, langcode, alias);
            }
            if item.deny_view {
                store.deny_view(&item.entity_type, item.id);
            }
        }
        Ok(store)
    }
}
