//! Content configuration.

use contentql_runtime::RegistryError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The bundle-to-type table is empty.
    #[error("no content types are configured")]
    NoContentTypes,

    /// A bundle or type name is blank.
    #[error("content type mapping '{bundle}' -> '{type_name}' has an empty name")]
    EmptyTypeName {
        /// The bundle.
        bundle: String,
        /// The GraphQL type.
        type_name: String,
    },

    /// The base path does not start with a slash.
    #[error("base path '{0}' must start with '/'")]
    InvalidBasePath(String),

    /// No language argument names are configured.
    #[error("at least one language argument name is required")]
    NoLanguageArguments,

    /// A required field is blank.
    #[error("'{0}' must not be empty")]
    Empty(&'static str),

    /// A collaborator was not supplied to the builder.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The resolver registry is inconsistent.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The configuration is not valid JSON.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
}

fn multiple_by_default() -> bool {
    true
}

/// How a reference field finds its targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    /// Current revisions of the referenced entities.
    #[default]
    Entity,
    /// The revisions the parent revision pinned.
    Revision,
    /// Entities of a type whose `source` field references the parent.
    #[serde(rename_all = "camelCase")]
    Reverse {
        entity_type: String,
        #[serde(default)]
        bundles: Vec<String>,
    },
}

/// A GraphQL field resolved by following entity references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceField {
    /// Type the field is registered on.
    pub type_name: String,
    /// GraphQL field name.
    pub field: String,
    /// Reference field on the entity that stores the targets.
    pub source: String,
    #[serde(default)]
    pub kind: ReferenceKind,
    /// Resolves to a list, or to the first target when false.
    #[serde(default = "multiple_by_default")]
    pub multiple: bool,
}

impl ReferenceField {
    fn with_kind(
        type_name: impl Into<String>,
        field: impl Into<String>,
        source: impl Into<String>,
        kind: ReferenceKind,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            field: field.into(),
            source: source.into(),
            kind,
            multiple: true,
        }
    }

    /// Follows `source` to the current revisions it references.
    pub fn entity(
        type_name: impl Into<String>,
        field: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::with_kind(type_name, field, source, ReferenceKind::Entity)
    }

    /// Follows `source` to the revisions it pins.
    pub fn revision(
        type_name: impl Into<String>,
        field: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::with_kind(type_name, field, source, ReferenceKind::Revision)
    }

    /// Finds `entity_type` entities whose `source` field references the parent.
    pub fn reverse(
        type_name: impl Into<String>,
        field: impl Into<String>,
        entity_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            type_name,
            field,
            source,
            ReferenceKind::Reverse {
                entity_type: entity_type.into(),
                bundles: Vec::new(),
            },
        )
    }

    /// Resolves to the first target only.
    #[must_use]
    pub fn single(mut self) -> Self {
        self.multiple = false;
        self
    }

    /// Restricts reverse references to bundles.
    #[must_use]
    pub fn bundles<I, B>(mut self, bundles: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<String>,
    {
        if let ReferenceKind::Reverse { bundles: current, .. } = &mut self.kind {
            *current = bundles.into_iter().map(Into::into).collect();
        }
        self
    }
}

/// How content entities are exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentConfig {
    /// Entity type queried for content lists.
    pub entity_type: String,
    /// Deployment base path, stripped from generated paths.
    pub base_path: String,
    /// Interface implemented by every content type.
    pub interface: String,
    /// Bundle to concrete GraphQL type.
    pub types: IndexMap<String, String>,
    /// Argument names accepted for the requested language, first wins.
    pub language_arguments: Vec<String>,
    /// Cache contexts every content list varies on.
    pub list_cache_contexts: Vec<String>,
    /// Maximum number of keys per storage call.
    pub max_batch_size: usize,
    /// Fields that follow entity references.
    pub references: Vec<ReferenceField>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            entity_type: "node".to_string(),
            base_path: "/".to_string(),
            interface: "Content".to_string(),
            types: IndexMap::from([("page".to_string(), "Page".to_string())]),
            language_arguments: vec!["lang".to_string(), "langcode".to_string()],
            list_cache_contexts: vec!["user.node_grants:view".to_string()],
            max_batch_size: 100,
            references: Vec::new(),
        }
    }
}

impl ContentConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON config.
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Sets the entity type.
    #[must_use]
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = entity_type.into();
        self
    }

    /// Sets the base path.
    #[must_use]
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Sets the interface name.
    #[must_use]
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Maps a bundle to a concrete type.
    #[must_use]
    pub fn map_type(mut self, bundle: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.types.insert(bundle.into(), type_name.into());
        self
    }

    /// Replaces the bundle-to-type table.
    #[must_use]
    pub fn types<I, B, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = (B, T)>,
        B: Into<String>,
        T: Into<String>,
    {
        self.types = types
            .into_iter()
            .map(|(bundle, type_name)| (bundle.into(), type_name.into()))
            .collect();
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Adds a reference field.
    #[must_use]
    pub fn reference(mut self, reference: ReferenceField) -> Self {
        self.references.push(reference);
        self
    }

    /// Invalidation tags of the entity type's lists.
    pub fn list_cache_tags(&self) -> Vec<String> {
        vec![format!("{}_list", self.entity_type)]
    }

    /// Base path with exactly one trailing slash.
    pub fn normalized_base_path(&self) -> String {
        format!("{}/", self.base_path.trim_end_matches('/'))
    }

    /// Checks the config for values that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entity_type.is_empty() {
            return Err(ConfigError::Empty("entityType"));
        }
        if self.interface.is_empty() {
            return Err(ConfigError::Empty("interface"));
        }
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::InvalidBasePath(self.base_path.clone()));
        }
        if self.types.is_empty() {
            return Err(ConfigError::NoContentTypes);
        }
        if let Some((bundle, type_name)) = self
            .types
            .iter()
            .find(|(bundle, type_name)| bundle.is_empty() || type_name.is_empty())
        {
            return Err(ConfigError::EmptyTypeName {
                bundle: bundle.clone(),
                type_name: type_name.clone(),
            });
        }
        if self.language_arguments.is_empty() {
            return Err(ConfigError::NoLanguageArguments);
        }
        for reference in &self.references {
            if reference.type_name.is_empty() {
                return Err(ConfigError::Empty("references.typeName"));
            }
            if reference.field.is_empty() {
                return Err(ConfigError::Empty("references.field"));
            }
            if reference.source.is_empty() {
                return Err(ConfigError::Empty("references.source"));
            }
            if matches!(&reference.kind, ReferenceKind::Reverse { entity_type, .. } if entity_type.is_empty())
            {
                return Err(ConfigError::Empty("references.kind.reverse.entityType"));
            }
        }
        Ok(())
    }
}
