//! Collaborators the content resolvers depend on.
//!
//! Persistence, routing, access control and URL generation belong to the
//! host. The resolvers only see these traits.

use crate::entity::{ContentEntity, EntityId, EntityRef, RevisionId};
use async_trait::async_trait;
use contentql_runtime::{CacheMetadata, CacheableDependency};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The query cannot be executed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A content fixture is malformed.
    #[error("invalid fixture: {0}")]
    Fixture(String),

    /// The backend failed.
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Bulk entity storage.
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Loads current revisions by id. Missing ids are left out.
    async fn load_many(
        &self,
        entity_type: &str,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, ContentEntity>, StorageError>;

    /// Loads revisions by revision id. Missing revisions are left out.
    async fn load_many_revisions(
        &self,
        entity_type: &str,
        revision_ids: &[RevisionId],
    ) -> Result<HashMap<RevisionId, ContentEntity>, StorageError>;

    /// Runs a query and returns matching ids in order.
    async fn query(&self, query: &ContentQuery) -> Result<Vec<EntityId>, StorageError>;
}

/// The entity a path routes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    pub entity_type: String,
    pub id: EntityId,
}

/// Translates paths to entities.
pub trait RouteResolver: Send + Sync {
    /// Returns the entity a path points at, or `None` when nothing routes there.
    fn resolve_path(&self, path: &str) -> Option<RouteMatch>;
}

/// An access decision together with what it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessResult {
    allowed: bool,
    cache: CacheMetadata,
}

impl AccessResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            cache: CacheMetadata::new(),
        }
    }

    pub fn denied() -> Self {
        Self {
            allowed: false,
            cache: CacheMetadata::new(),
        }
    }

    /// Allowed when `condition` holds.
    pub fn allowed_if(condition: bool) -> Self {
        if condition {
            Self::allowed()
        } else {
            Self::denied()
        }
    }

    /// Adds cacheability of the decision.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheMetadata) -> Self {
        self.cache.merge(&cache);
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

impl CacheableDependency for AccessResult {
    fn cache_metadata(&self) -> CacheMetadata {
        self.cache.clone()
    }
}

/// View access control.
pub trait AccessChecker: Send + Sync {
    /// Decides whether the current viewer may see an entity.
    fn can_view(&self, entity: &ContentEntity) -> AccessResult;
}

/// URL generation.
pub trait UrlGenerator: Send + Sync {
    /// Public URL of an entity in its active language, including the base path.
    fn entity_url(&self, entity: &ContentEntity) -> String;

    /// Alias of a system path in a language, or the system path itself.
    fn alias_by_path(&self, system_path: &str, langcode: &str) -> String;
}

/// A filter on a base field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Condition {
    /// `field = value`
    Eq { field: String, value: Value },
    /// `field IN (values)`
    In { field: String, values: Vec<Value> },
    /// The reference field points at any of the targets.
    References {
        field: String,
        target_type: String,
        ids: Vec<EntityId>,
    },
}

impl Condition {
    /// Evaluates the condition on an entity's base fields.
    pub fn matches(&self, entity: &ContentEntity) -> bool {
        match self {
            Self::Eq { field, value } => entity.field(field).as_ref() == Some(value),
            Self::In { field, values } => entity
                .field(field)
                .is_some_and(|actual| values.contains(&actual)),
            Self::References {
                field,
                target_type,
                ids,
            } => ids.iter().any(|id| {
                entity.references_entity(
                    field,
                    &EntityRef {
                        entity_type: target_type.clone(),
                        id: *id,
                    },
                )
            }),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A sort on a base field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// An entity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    pub entity_type: String,
    pub conditions: Vec<Condition>,
    pub sorts: Vec<Sort>,
    /// Only match current revisions.
    pub current_revision: bool,
    /// Leave out entities the viewer may not see.
    pub access_check: bool,
}

impl ContentQuery {
    /// Creates a query over an entity type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            conditions: Vec::new(),
            sorts: Vec::new(),
            current_revision: false,
            access_check: false,
        }
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn condition(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a membership condition.
    #[must_use]
    pub fn condition_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Matches entities whose reference field points at any of the targets.
    #[must_use]
    pub fn condition_references(
        mut self,
        field: impl Into<String>,
        target_type: impl Into<String>,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Self {
        self.conditions.push(Condition::References {
            field: field.into(),
            target_type: target_type.into(),
            ids: ids.into_iter().collect(),
        });
        self
    }

    /// Adds a sort.
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Restricts the query to current revisions.
    #[must_use]
    pub fn current_revision(mut self) -> Self {
        self.current_revision = true;
        self
    }

    /// Sets whether the query checks view access itself.
    #[must_use]
    pub fn access_check(mut self, enabled: bool) -> Self {
        self.access_check = enabled;
        self
    }

    /// Returns true if every condition holds for the entity.
    pub fn matches(&self, entity: &ContentEntity) -> bool {
        entity.entity_type() == self.entity_type
            && self.conditions.iter().all(|condition| condition.matches(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ReferenceItem, TranslationData};
    use serde_json::json;

    fn entity(bundle: &str, published: bool) -> ContentEntity {
        let values = TranslationData::new("Item");
        let values = if published { values } else { values.unpublished() };
        ContentEntity::new("node", 7, bundle, "en", values)
    }

    #[test]
    fn test_query_matches() {
        let query = ContentQuery::new("node")
            .condition("status", true)
            .condition_in("type", ["page"]);

        assert!(query.matches(&entity("page", true)));
        assert!(!query.matches(&entity("page", false)));
        assert!(!query.matches(&entity("article", true)));
        assert!(!ContentQuery::new("user").matches(&entity("page", true)));
    }

    #[test]
    fn test_unknown_field_never_matches() {
        let condition = Condition::Eq {
            field: "body".to_string(),
            value: json!("x"),
        };
        assert!(!condition.matches(&entity("page", true)));
    }

    #[test]
    fn test_references_condition() {
        let referencing = entity("page", true)
            .with_reference("field_related", ReferenceItem::new("node", 3));
        let query = ContentQuery::new("node");

        assert!(query
            .clone()
            .condition_references("field_related", "node", [2, 3])
            .matches(&referencing));
        assert!(!query
            .clone()
            .condition_references("field_related", "user", [3])
            .matches(&referencing));
        assert!(!query
            .condition_references("field_related", "node", [3])
            .matches(&entity("page", true)));
    }

    #[test]
    fn test_access_result() {
        let result = AccessResult::allowed_if(false)
            .with_cache(CacheMetadata::new().with_contexts(["user.permissions"]));
        assert!(!result.is_allowed());
        assert!(result.cache_metadata().contexts.contains("user.permissions"));
    }

    #[test]
    fn test_query_serializes() {
        let query = ContentQuery::new("node")
            .condition_in("type", ["page"])
            .sort("created", SortDirection::Asc)
            .current_revision()
            .access_check(true);
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["conditions"][0]["operator"], json!("in"));
        assert_eq!(value["sorts"][0]["direction"], json!("asc"));
        assert_eq!(value["accessCheck"], json!(true));
    }
}
