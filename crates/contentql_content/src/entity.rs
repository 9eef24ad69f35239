//! Content entities and the values handed between resolvers.

use crate::storage::AccessResult;
use contentql_runtime::{CacheMetadata, CacheableDependency};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Entity id.
pub type EntityId = u64;

/// Revision id.
pub type RevisionId = u64;

/// Per-language values of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationData {
    /// The label (title).
    pub label: String,
    /// Creation timestamp.
    #[serde(default)]
    pub created: i64,
    /// Last change timestamp.
    #[serde(default)]
    pub changed: i64,
    /// Publish status.
    #[serde(default = "published")]
    pub published: bool,
}

fn published() -> bool {
    true
}

impl TranslationData {
    /// Creates published values with zero timestamps.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            created: 0,
            changed: 0,
            published: true,
        }
    }

    /// Sets both timestamps.
    #[must_use]
    pub fn at(mut self, created: i64, changed: i64) -> Self {
        self.created = created;
        self.changed = changed;
        self
    }

    /// Marks the values unpublished.
    #[must_use]
    pub fn unpublished(mut self) -> Self {
        self.published = false;
        self
    }
}

/// A content item as one revision, viewed in one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntity {
    entity_type: String,
    id: EntityId,
    uuid: String,
    bundle: String,
    revision_id: RevisionId,
    default_langcode: String,
    base: TranslationData,
    translations: IndexMap<String, TranslationData>,
    active: Option<String>,
    references: IndexMap<String, Vec<ReferenceItem>>,
    cache_contexts: BTreeSet<String>,
}

impl ContentEntity {
    /// Creates an entity in its default language.
    pub fn new(
        entity_type: impl Into<String>,
        id: EntityId,
        bundle: impl Into<String>,
        default_langcode: impl Into<String>,
        base: TranslationData,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            uuid: format!("00000000-0000-4000-8000-{id:012x}"),
            bundle: bundle.into(),
            revision_id: 0,
            default_langcode: default_langcode.into(),
            base,
            translations: IndexMap::new(),
            active: None,
            references: IndexMap::new(),
            cache_contexts: BTreeSet::new(),
        }
    }

    /// Sets the uuid.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Sets the revision id.
    #[must_use]
    pub fn with_revision_id(mut self, revision_id: RevisionId) -> Self {
        self.revision_id = revision_id;
        self
    }

    /// Adds or replaces a translation. The default language replaces the base values.
    #[must_use]
    pub fn with_translation(mut self, langcode: impl Into<String>, data: TranslationData) -> Self {
        let langcode = langcode.into();
        if langcode == self.default_langcode {
            self.base = data;
        } else {
            self.translations.insert(langcode, data);
        }
        self
    }

    /// Appends a target to a reference field.
    #[must_use]
    pub fn with_reference(mut self, field: impl Into<String>, item: ReferenceItem) -> Self {
        self.references.entry(field.into()).or_default().push(item);
        self
    }

    /// Targets of a reference field, in delta order.
    pub fn references(&self, field: &str) -> &[ReferenceItem] {
        self.references.get(field).map_or(&[], Vec::as_slice)
    }

    /// Returns true if a reference field points at the entity.
    pub fn references_entity(&self, field: &str, target: &EntityRef) -> bool {
        self.references(field)
            .iter()
            .any(|item| item.entity_type == target.entity_type && item.id == target.id)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn revision_id(&self) -> RevisionId {
        self.revision_id
    }

    pub fn default_langcode(&self) -> &str {
        &self.default_langcode
    }

    /// Language this entity is viewed in.
    pub fn langcode(&self) -> &str {
        self.active.as_deref().unwrap_or(&self.default_langcode)
    }

    /// Values of the active language.
    pub fn values(&self) -> &TranslationData {
        self.active
            .as_ref()
            .and_then(|langcode| self.translations.get(langcode))
            .unwrap_or(&self.base)
    }

    pub fn label(&self) -> &str {
        &self.values().label
    }

    pub fn created(&self) -> i64 {
        self.values().created
    }

    pub fn changed(&self) -> i64 {
        self.values().changed
    }

    pub fn is_published(&self) -> bool {
        self.values().published
    }

    /// Every language this entity exists in, default first.
    pub fn translation_languages(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.default_langcode.as_str())
            .chain(self.translations.keys().map(String::as_str))
    }

    /// Returns true if the entity exists in a language.
    pub fn has_translation(&self, langcode: &str) -> bool {
        langcode == self.default_langcode || self.translations.contains_key(langcode)
    }

    /// The entity viewed in another language, if it has that translation.
    pub fn translation(&self, langcode: &str) -> Option<Self> {
        if !self.has_translation(langcode) {
            return None;
        }
        let mut translated = self.clone();
        translated.active = (langcode != self.default_langcode).then(|| langcode.to_string());
        Some(translated)
    }

    /// Lookup reference to this entity.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type.clone(),
            id: self.id,
        }
    }

    /// Internal path, e.g. `/node/1`.
    pub fn system_path(&self) -> String {
        format!("/{}/{}", self.entity_type, self.id)
    }

    /// Invalidation tags, e.g. `node:1`.
    pub fn cache_tags(&self) -> Vec<String> {
        vec![format!("{}:{}", self.entity_type, self.id)]
    }

    /// Records contexts the entity's rendering varies on.
    pub fn add_cache_contexts<I, S>(&mut self, contexts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_contexts
            .extend(contexts.into_iter().map(Into::into));
    }

    /// A base field by machine name.
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" | "nid" => json!(self.id),
            "uuid" => json!(self.uuid),
            "type" | "bundle" => json!(self.bundle),
            "vid" | "revision_id" => json!(self.revision_id),
            "langcode" => json!(self.langcode()),
            "default_langcode" => json!(self.default_langcode),
            "title" | "label" => json!(self.label()),
            "created" => json!(self.created()),
            "changed" => json!(self.changed()),
            "status" => json!(self.is_published()),
            _ => {
                let items = self.references.get(name)?;
                json!(items.iter().map(|item| item.id).collect::<Vec<_>>())
            }
        };
        Some(value)
    }
}

impl CacheableDependency for ContentEntity {
    fn cache_metadata(&self) -> CacheMetadata {
        CacheMetadata::new()
            .with_tags(self.cache_tags())
            .with_contexts(self.cache_contexts.iter().cloned())
    }
}

/// Lookup-only reference to an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_type: String,
    pub id: EntityId,
}

fn default_target_type() -> String {
    "node".to_string()
}

/// One target of a reference field.
///
/// The revision is only used by revision references, which pin the target
/// revision the referencing revision was saved with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceItem {
    #[serde(rename = "type", default = "default_target_type")]
    pub entity_type: String,
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionId>,
}

impl ReferenceItem {
    /// A reference to an entity's current revision.
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            revision: None,
        }
    }

    /// Pins a target revision.
    #[must_use]
    pub fn at_revision(mut self, revision: RevisionId) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Key loading the target; `pinned` uses the stored revision when there is one.
    pub fn key(&self, pinned: bool) -> ResolutionKey {
        match self.revision.filter(|_| pinned) {
            Some(revision) => ResolutionKey::revision(&self.entity_type, self.id, revision),
            None => ResolutionKey::entity(&self.entity_type, self.id),
        }
    }
}

/// Key of one entity fetch.
///
/// Without a revision the current revision is loaded. The language is not
/// part of the key: a translation is picked after the fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub entity_type: String,
    pub id: EntityId,
    pub revision: Option<RevisionId>,
}

impl ResolutionKey {
    /// Key of an entity's current revision.
    pub fn entity(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            revision: None,
        }
    }

    /// Key of a specific revision of an entity.
    pub fn revision(entity_type: impl Into<String>, id: EntityId, revision: RevisionId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            revision: Some(revision),
        }
    }
}

/// A path an entity is reachable at, in one of its languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPathEntry {
    pub path: String,
    pub langcode: String,
    #[serde(skip)]
    pub entity: EntityRef,
}

/// An entity selected by path, revision and language, which the viewer may see.
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    pub entity: ContentEntity,
    pub access: AccessResult,
}

impl ResolvedEntity {
    /// The selected revision.
    pub fn revision_id(&self) -> RevisionId {
        self.entity.revision_id()
    }

    /// The selected language.
    pub fn langcode(&self) -> &str {
        self.entity.langcode()
    }

    /// The entity's identity.
    pub fn identity(&self) -> EntityRef {
        self.entity.entity_ref()
    }
}
