//! Resolver system for contentql.
//!
//! This module provides the resolver trait and the registry mapping
//! (type, field) pairs to resolvers, plus type resolvers for interfaces.

use crate::executor::{Context, PathSegment};
use crate::value::{FieldValue, ObjectValue, Resolved};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: HashMap<String, Value>,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from a list of (name, value) pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Gets an argument by name. Explicit nulls read as absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets an optional argument, failing only when present but malformed.
    pub fn optional<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, ResolverError> {
        self.get(name)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
            })
            .transpose()
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.optional(name)?
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
    }

    /// Returns all arguments.
    pub fn all(&self) -> &HashMap<String, Value> {
        &self.args
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The concrete parent type name.
    pub parent_type: String,

    /// Path to this field.
    pub path: Vec<PathSegment>,
}

impl ResolverInfo {
    /// Creates new resolver info.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            parent_type: parent_type.into(),
            path: Vec::new(),
        }
    }

    /// Sets the path.
    #[must_use]
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<FieldValue, ResolverError>;

/// Error from a resolver.
///
/// Errors are `Clone` because one failed batch fetch is reported by every
/// field that waited on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolverError {
    /// No resolver for the field.
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    /// Missing required argument.
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    /// Argument parse error.
    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    /// An interface value whose kind has no concrete type.
    #[error("Cannot resolve concrete type of '{interface}' for kind '{kind}'")]
    DiscriminatorUnmapped {
        /// The abstract type.
        interface: String,
        /// The kind found on the value.
        kind: String,
    },

    /// The shared bulk fetch failed.
    #[error("Bulk load failed: {0}")]
    Load(String),

    /// Custom error.
    #[error("{0}")]
    Custom(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    /// Machine-readable code for the `extensions.code` of a field error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FieldNotFound(_) => "FIELD_NOT_FOUND",
            Self::MissingArgument(_) | Self::ArgumentParseError(..) => "BAD_USER_INPUT",
            Self::DiscriminatorUnmapped { .. } => "TYPE_RESOLUTION_FAILED",
            Self::Load(_) => "BULK_LOAD_FAILED",
            Self::Custom(_) => "RESOLVER_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Trait for field resolvers.
///
/// Resolution is synchronous: a resolver returns a value or queues work on a
/// key buffer and returns a pending handle.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve(
        &self,
        parent: &ObjectValue,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> ResolverResult;
}

/// A shared resolver.
pub type SharedResolver = Arc<dyn Resolver>;

/// A resolver function.
pub type ResolverFn =
    Arc<dyn Fn(&ObjectValue, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync>;

/// A wrapper for resolver functions.
pub struct FnResolver {
    func: ResolverFn,
}

impl FnResolver {
    /// Creates a new function resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ObjectValue, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        Self { func: Arc::new(f) }
    }

    /// Creates a resolver reading from the parent payload only.
    pub fn from_parent<T, F>(f: F) -> Self
    where
        T: 'static,
        F: Fn(&T) -> Resolved + Send + Sync + 'static,
    {
        Self::new(move |parent, _args, _ctx, info| {
            parent
                .downcast_ref::<T>()
                .map(|value| FieldValue::Ready(f(value)))
                .ok_or_else(|| {
                    ResolverError::Internal(format!(
                        "unexpected parent payload for {}.{}",
                        info.parent_type, info.field_name
                    ))
                })
        })
    }
}

impl Resolver for FnResolver {
    fn resolve(
        &self,
        parent: &ObjectValue,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> ResolverResult {
        (self.func)(parent, args, ctx, info)
    }
}

/// Picks the concrete type of an interface value.
///
/// The mapping is an explicit kind-to-type table; `kind_of` extracts the kind
/// from a value. Values without a kind, or with an unlisted kind, fail.
#[derive(Clone)]
pub struct TypeMapping {
    kind_of: Arc<dyn Fn(&ObjectValue) -> Option<String> + Send + Sync>,
    table: IndexMap<String, String>,
}

impl TypeMapping {
    /// Creates an empty mapping.
    pub fn new<F>(kind_of: F) -> Self
    where
        F: Fn(&ObjectValue) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            kind_of: Arc::new(kind_of),
            table: IndexMap::new(),
        }
    }

    /// Maps a kind to a concrete type.
    #[must_use]
    pub fn map(mut self, kind: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.table.insert(kind.into(), type_name.into());
        self
    }

    /// The concrete types this mapping can produce.
    pub fn concrete_types(&self) -> impl Iterator<Item = &str> {
        self.table.values().map(String::as_str)
    }

    fn resolve(&self, interface: &str, value: &ObjectValue) -> Result<String, ResolverError> {
        let kind = (self.kind_of)(value);
        kind.as_ref()
            .and_then(|kind| self.table.get(kind))
            .cloned()
            .ok_or_else(|| ResolverError::DiscriminatorUnmapped {
                interface: interface.to_string(),
                kind: kind.unwrap_or_else(|| "<unknown>".to_string()),
            })
    }
}

impl Debug for TypeMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeMapping")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// Problems found when validating a registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A type mapping without entries.
    #[error("Type resolver for '{0}' maps no kinds")]
    EmptyTypeMapping(String),

    /// A mapping targeting a type that has no field resolvers.
    #[error("Type resolver for '{interface}' targets '{concrete}', which has no field resolvers")]
    UnknownConcreteType {
        /// The abstract type.
        interface: String,
        /// The missing concrete type.
        concrete: String,
    },
}

/// Storage for resolvers organized by type and field.
#[derive(Default)]
pub struct ResolverMap {
    /// Resolvers indexed by "TypeName.fieldName".
    resolvers: HashMap<String, SharedResolver>,

    /// Type resolvers indexed by abstract type name.
    type_resolvers: HashMap<String, TypeMapping>,
}

fn key(type_name: &str, field_name: &str) -> String {
    format!("{type_name}.{field_name}")
}

impl ResolverMap {
    /// Creates a new resolver map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver, replacing any previous one.
    ///
    /// Meant for root-level declarations that intend replacement.
    pub fn add<R: Resolver + 'static>(&mut self, type_name: &str, field_name: &str, resolver: R) {
        self.resolvers
            .insert(key(type_name, field_name), Arc::new(resolver));
    }

    /// Registers a resolver unless one already exists.
    ///
    /// Returns false when an earlier registration was kept.
    pub fn add_if_absent<R: Resolver + 'static>(
        &mut self,
        type_name: &str,
        field_name: &str,
        resolver: R,
    ) -> bool {
        match self.resolvers.entry(key(type_name, field_name)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(resolver));
                true
            }
        }
    }

    /// Registers a function, replacing any previous resolver.
    pub fn add_fn<F>(&mut self, type_name: &str, field_name: &str, f: F)
    where
        F: Fn(&ObjectValue, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.add(type_name, field_name, FnResolver::new(f));
    }

    /// Registers a function unless a resolver already exists.
    pub fn add_fn_if_absent<F>(&mut self, type_name: &str, field_name: &str, f: F) -> bool
    where
        F: Fn(&ObjectValue, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.add_if_absent(type_name, field_name, FnResolver::new(f))
    }

    /// Registers how an interface picks its concrete type.
    pub fn add_type_resolver(&mut self, interface: &str, mapping: TypeMapping) {
        self.type_resolvers.insert(interface.to_string(), mapping);
    }

    /// Gets the resolver registered for a type and field.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        self.resolvers
            .get(&key(type_name, field_name))
            .map(|resolver| &**resolver)
    }

    /// Returns true if a resolver is registered for this pair.
    pub fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.resolvers.contains_key(&key(type_name, field_name))
    }

    /// Returns true if the type is resolved through a type mapping.
    pub fn is_abstract(&self, type_name: &str) -> bool {
        self.type_resolvers.contains_key(type_name)
    }

    /// Returns the concrete type name of an object.
    pub fn resolve_type(&self, value: &ObjectValue) -> Result<String, ResolverError> {
        match self.type_resolvers.get(value.type_name()) {
            Some(mapping) => mapping.resolve(value.type_name(), value),
            None => Ok(value.type_name().to_string()),
        }
    }

    /// Checks that every type mapping targets a type with field resolvers.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (interface, mapping) in &self.type_resolvers {
            if mapping.table.is_empty() {
                return Err(RegistryError::EmptyTypeMapping(interface.clone()));
            }
            for concrete in mapping.concrete_types() {
                let prefix = format!("{concrete}.");
                if !self.resolvers.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(RegistryError::UnknownConcreteType {
                        interface: interface.clone(),
                        concrete: concrete.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .field("type_resolver_count", &self.type_resolvers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf_of(result: ResolverResult) -> Value {
        match result.unwrap() {
            FieldValue::Ready(Resolved::Leaf(value)) => value,
            FieldValue::Ready(Resolved::Null) => Value::Null,
            other => panic!("expected a ready leaf, got {other:?}"),
        }
    }

    #[test]
    fn test_resolver_args() {
        let mut args = ResolverArgs::new();
        args.set("id", json!(123));
        args.set("name", json!("test"));
        args.set("lang", Value::Null);

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert_eq!(args.optional::<String>("lang").unwrap(), None);
        assert!(args.optional::<i64>("name").is_err());
        assert_eq!(
            args.require::<String>("lang").unwrap_err(),
            ResolverError::MissingArgument("lang".to_string())
        );
    }

    #[test]
    fn test_add_if_absent_keeps_first() {
        let mut map = ResolverMap::new();
        assert!(map.add_fn_if_absent("Page", "label", |_, _, _, _| Ok(FieldValue::leaf("first"))));
        assert!(!map.add_fn_if_absent("Page", "label", |_, _, _, _| Ok(FieldValue::leaf("second"))));

        let resolver = map.get("Page", "label").unwrap();
        let result = resolver.resolve(
            &ObjectValue::root("Page"),
            &ResolverArgs::new(),
            &Context::new(),
            &ResolverInfo::new("label", "Page"),
        );
        assert_eq!(leaf_of(result), json!("first"));
    }

    #[test]
    fn test_add_overwrites() {
        let mut map = ResolverMap::new();
        map.add_fn("Query", "content", |_, _, _, _| Ok(FieldValue::leaf("old")));
        map.add_fn("Query", "content", |_, _, _, _| Ok(FieldValue::leaf("new")));

        let result = map.get("Query", "content").unwrap().resolve(
            &ObjectValue::root("Query"),
            &ResolverArgs::new(),
            &Context::new(),
            &ResolverInfo::new("content", "Query"),
        );
        assert_eq!(leaf_of(result), json!("new"));
    }

    #[test]
    fn test_unregistered_field_has_no_resolver() {
        let mut map = ResolverMap::new();
        assert!(map.get("Page", "label").is_none());
        assert!(!map.contains("Page", "label"));

        map.add_fn("Page", "label", |_, _, _, _| Ok(FieldValue::null()));
        assert!(map.get("Page", "label").is_some());
        assert!(map.get("Page", "uuid").is_none());
    }

    #[test]
    fn test_type_mapping() {
        let mut map = ResolverMap::new();
        map.add_type_resolver(
            "Content",
            TypeMapping::new(|value| value.downcast_ref::<String>().cloned()).map("page", "Page"),
        );

        let page = ObjectValue::new("Content", "page".to_string());
        assert_eq!(map.resolve_type(&page).unwrap(), "Page");

        let event = ObjectValue::new("Content", "event".to_string());
        assert_eq!(
            map.resolve_type(&event).unwrap_err(),
            ResolverError::DiscriminatorUnmapped {
                interface: "Content".to_string(),
                kind: "event".to_string(),
            }
        );

        let concrete = ObjectValue::new("ContentPath", 1_u8);
        assert_eq!(map.resolve_type(&concrete).unwrap(), "ContentPath");
        assert!(map.is_abstract("Content"));
    }

    #[test]
    fn test_validate() {
        let mut map = ResolverMap::new();
        map.add_type_resolver("Content", TypeMapping::new(|_| None));
        assert_eq!(
            map.validate(),
            Err(RegistryError::EmptyTypeMapping("Content".to_string()))
        );

        map.add_type_resolver("Content", TypeMapping::new(|_| None).map("page", "Page"));
        assert!(matches!(
            map.validate(),
            Err(RegistryError::UnknownConcreteType { .. })
        ));

        map.add_fn("Page", "label", |_, _, _, _| Ok(FieldValue::null()));
        assert_eq!(map.validate(), Ok(()));
    }
}
