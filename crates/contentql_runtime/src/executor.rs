//! Query execution for contentql.
//!
//! Execution is breadth first. Every resolver of a level is invoked before
//! any pending handle of that level is resolved, so all keys queued on a key
//! buffer by one level are fetched by a single flush. Nothing is spawned:
//! pending handles are awaited one after another on the calling task.

use crate::cache::{CacheMetadata, FieldContext};
use crate::query::{Field, Request};
use crate::resolver::{ResolverArgs, ResolverError, ResolverInfo, ResolverMap};
use crate::value::{FieldValue, ObjectValue, Resolved};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name of the root type.
    pub query_type: String,
    /// Maximum selection depth.
    pub max_depth: usize,
    /// Copy collected cache metadata into `extensions.cache`.
    pub expose_cache_metadata: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            query_type: "Query".to_string(),
            max_depth: 10,
            expose_cache_metadata: false,
        }
    }
}

/// The query executor.
pub struct Executor {
    config: ExecutorConfig,
    resolvers: Arc<ResolverMap>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

impl Executor {
    /// Creates an executor with resolvers.
    pub fn with_resolvers(resolvers: ResolverMap) -> Self {
        Self::new_with(ExecutorConfig::default(), resolvers)
    }

    /// Creates an executor with config and resolvers.
    pub fn new_with(config: ExecutorConfig, resolvers: ResolverMap) -> Self {
        Self {
            config,
            resolvers: Arc::new(resolvers),
        }
    }

    /// Gets a reference to the resolvers.
    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes a request.
    pub async fn execute(&self, request: &Request, ctx: &Context) -> Response {
        let depth = request.depth();
        if depth > self.config.max_depth {
            return Response::error(
                FieldError::new(format!(
                    "Query depth {depth} exceeds the maximum of {}",
                    self.config.max_depth
                ))
                .with_code("QUERY_TOO_DEEP"),
            );
        }

        debug!(
            operation = request.operation_name.as_deref().unwrap_or("<anonymous>"),
            root_fields = request.query.len(),
            "executing request"
        );

        let mut execution = Execution {
            resolvers: &self.resolvers,
            ctx,
            variables: &request.variables,
            slots: Vec::new(),
            errors: Vec::new(),
        };
        let data = execution.run(&request.query, &self.config.query_type).await;

        let cache = ctx.cache_context().snapshot();
        let mut response = Response {
            data: Some(data),
            errors: (!execution.errors.is_empty()).then_some(execution.errors),
            extensions: None,
            cache,
        };
        if self.config.expose_cache_metadata {
            let mut extensions = Map::new();
            extensions.insert(
                "cache".to_string(),
                serde_json::to_value(&response.cache).unwrap_or(Value::Null),
            );
            response.extensions = Some(extensions);
        }
        response
    }
}

/// A node of the response under construction.
enum Slot {
    Null,
    Leaf(Value),
    Object(Vec<(String, usize)>),
    List(Vec<usize>),
}

/// An object whose selection runs at the next level.
struct ObjectTask<'q> {
    parent: ObjectValue,
    selection: &'q [Field],
    slot: usize,
    path: Vec<PathSegment>,
}

/// A field waiting for the level's buffers to flush.
struct PendingField<'q> {
    field: &'q Field,
    value: crate::deferred::Deferred<Resolved>,
    slot: usize,
    path: Vec<PathSegment>,
}

struct Execution<'a> {
    resolvers: &'a ResolverMap,
    ctx: &'a Context,
    variables: &'a Map<String, Value>,
    slots: Vec<Slot>,
    errors: Vec<FieldError>,
}

impl<'a> Execution<'a> {
    async fn run(&mut self, query: &[Field], query_type: &str) -> Value {
        let root = self.alloc();
        let mut level = vec![ObjectTask {
            parent: ObjectValue::root(query_type),
            selection: query,
            slot: root,
            path: Vec::new(),
        }];
        let mut depth = 0;

        while !level.is_empty() {
            depth += 1;
            let mut pending = Vec::new();
            let mut next = Vec::new();
            for task in level {
                self.invoke(task, &mut pending, &mut next);
            }

            debug!(depth, pending = pending.len(), "resolving level");
            for field in pending {
                match field.value.resolve().await {
                    Ok(resolved) => {
                        self.complete(field.slot, field.field, resolved, field.path, &mut next);
                    }
                    Err(error) => self.fail(field.slot, &error, field.path),
                }
            }
            level = next;
        }

        self.materialize(root)
    }

    fn alloc(&mut self) -> usize {
        self.slots.push(Slot::Null);
        self.slots.len() - 1
    }

    fn fail(&mut self, slot: usize, error: &ResolverError, path: Vec<PathSegment>) {
        debug!(%error, "field failed");
        self.slots[slot] = Slot::Null;
        self.errors.push(FieldError::from_resolver(error, path));
    }

    /// Runs the resolvers of one object's selection.
    fn invoke<'q>(
        &mut self,
        task: ObjectTask<'q>,
        pending: &mut Vec<PendingField<'q>>,
        next: &mut Vec<ObjectTask<'q>>,
    ) {
        let resolvers = self.resolvers;
        let type_name = task.parent.type_name().to_string();
        let mut entries = Vec::with_capacity(task.selection.len());

        for field in task.selection {
            let slot = self.alloc();
            entries.push((field.response_key().to_string(), slot));
            let mut path = task.path.clone();
            path.push(PathSegment::Field(field.response_key().to_string()));

            if field.name == "__typename" {
                self.slots[slot] = Slot::Leaf(Value::String(type_name.clone()));
                continue;
            }

            let Some(resolver) = resolvers.get(&type_name, &field.name) else {
                let error = ResolverError::FieldNotFound(format!("{type_name}.{}", field.name));
                self.fail(slot, &error, path);
                continue;
            };

            let args = ResolverArgs::from_pairs(
                field
                    .arguments
                    .iter()
                    .map(|(name, value)| (name.clone(), value.evaluate(self.variables))),
            );
            let info = ResolverInfo::new(&field.name, &type_name).with_path(path.clone());

            trace!(parent = %type_name, field = %field.name, "resolving field");
            match resolver.resolve(&task.parent, &args, self.ctx, &info) {
                Ok(FieldValue::Ready(resolved)) => self.complete(slot, field, resolved, path, next),
                Ok(FieldValue::Pending(value)) => pending.push(PendingField {
                    field,
                    value,
                    slot,
                    path,
                }),
                Err(error) => self.fail(slot, &error, path),
            }
        }

        self.slots[task.slot] = Slot::Object(entries);
    }

    /// Writes a resolved value, queueing objects for the next level.
    fn complete<'q>(
        &mut self,
        slot: usize,
        field: &'q Field,
        resolved: Resolved,
        path: Vec<PathSegment>,
        next: &mut Vec<ObjectTask<'q>>,
    ) {
        match resolved {
            Resolved::Null => self.slots[slot] = Slot::Null,
            Resolved::Leaf(value) => {
                if field.selection.is_empty() {
                    self.slots[slot] = Slot::Leaf(value);
                } else {
                    let error = ResolverError::Custom(format!(
                        "Field '{}' returned a scalar but has a selection set",
                        field.name
                    ));
                    self.fail(slot, &error, path);
                }
            }
            Resolved::Object(object) => {
                if field.selection.is_empty() {
                    let error = ResolverError::Custom(format!(
                        "Field '{}' of type '{}' must have a selection set",
                        field.name,
                        object.type_name()
                    ));
                    self.fail(slot, &error, path);
                    return;
                }
                match self.resolvers.resolve_type(&object) {
                    Ok(concrete) => next.push(ObjectTask {
                        parent: object.with_type_name(concrete),
                        selection: &field.selection,
                        slot,
                        path,
                    }),
                    Err(error) => self.fail(slot, &error, path),
                }
            }
            Resolved::List(items) => {
                let mut children = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let child = self.alloc();
                    children.push(child);
                    let mut item_path = path.clone();
                    item_path.push(PathSegment::Index(index));
                    self.complete(child, field, item, item_path, next);
                }
                self.slots[slot] = Slot::List(children);
            }
        }
    }

    fn materialize(&mut self, slot: usize) -> Value {
        match std::mem::replace(&mut self.slots[slot], Slot::Null) {
            Slot::Null => Value::Null,
            Slot::Leaf(value) => value,
            Slot::Object(entries) => {
                let mut object = Map::with_capacity(entries.len());
                for (key, child) in entries {
                    let value = self.materialize(child);
                    object.insert(key, value);
                }
                Value::Object(object)
            }
            Slot::List(children) => {
                Value::Array(children.into_iter().map(|c| self.materialize(c)).collect())
            }
        }
    }
}

/// Request-scoped state handed to every resolver.
///
/// Holds the key buffers and other per-request services by type, and the
/// cache metadata sink.
#[derive(Default)]
pub struct Context {
    data: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
    cache: FieldContext,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("data_count", &self.data.len())
            .field("cache", &self.cache)
            .finish()
    }
}

impl Context {
    /// Creates a new context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing one of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.data.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Gets a value by type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Gets a value by type, failing with an internal error when missing.
    pub fn require<T: 'static>(&self) -> Result<&T, ResolverError> {
        self.get::<T>().ok_or_else(|| {
            ResolverError::Internal(format!(
                "request context is missing {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// The cache metadata sink of this request.
    pub fn cache_context(&self) -> &FieldContext {
        &self.cache
    }
}

/// A response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// The errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    /// Response extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
    /// Cache metadata collected while resolving.
    #[serde(skip)]
    pub cache: CacheMetadata,
}

impl Response {
    /// Creates a successful response with data.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
            extensions: None,
            cache: CacheMetadata::default(),
        }
    }

    /// Creates an error response.
    pub fn error(error: FieldError) -> Self {
        Self {
            data: None,
            errors: Some(vec![error]),
            extensions: None,
            cache: CacheMetadata::default(),
        }
    }

    /// Returns true if the response has errors.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Returns true if the response has data.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Serializes the response to a JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A field error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// The path to the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    /// Error extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Creates a field error from a resolver error.
    pub fn from_resolver(error: &ResolverError, path: Vec<PathSegment>) -> Self {
        Self::new(error.to_string())
            .with_path(path)
            .with_code(error.code())
    }

    /// Adds a path to the error.
    #[must_use]
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    #[must_use]
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", Value::String(code.into()))
    }
}
