//! Values produced by field resolvers.

use crate::deferred::Deferred;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An object handed to the resolvers of its fields.
///
/// The payload is any Rust value; the type name selects which resolvers run.
/// Objects returned for an interface carry the interface name until the
/// executor swaps in the concrete type.
#[derive(Clone)]
pub struct ObjectValue {
    type_name: String,
    value: Arc<dyn Any + Send + Sync>,
}

/// Payload of the root object.
#[derive(Debug, Clone, Copy, Default)]
pub struct Root;

impl ObjectValue {
    /// Wraps a value as an object of the given type.
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            value: Arc::new(value),
        }
    }

    /// The root object of an operation.
    pub fn root(type_name: impl Into<String>) -> Self {
        Self::new(type_name, Root)
    }

    /// The (possibly abstract) type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the same payload under another type name.
    #[must_use]
    pub fn with_type_name(&self, type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: Arc::clone(&self.value),
        }
    }

    /// Borrows the payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A completed resolver result.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Null.
    Null,
    /// A scalar or raw JSON value written to the response as is.
    Leaf(Value),
    /// An object whose fields are resolved at the next level.
    Object(ObjectValue),
    /// A list of results.
    List(Vec<Resolved>),
}

impl Resolved {
    /// Wraps a value as an object, or null when absent.
    pub fn object<T: Any + Send + Sync>(type_name: &str, value: Option<T>) -> Self {
        value.map_or(Self::Null, |value| Self::Object(ObjectValue::new(type_name, value)))
    }

    /// Returns true for null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            other => Self::Leaf(other),
        }
    }
}

/// What a resolver returns: a value now, or one pending a batch flush.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Already known.
    Ready(Resolved),
    /// Known once the current level's buffers are flushed.
    Pending(Deferred<Resolved>),
}

impl FieldValue {
    /// A leaf value.
    pub fn leaf(value: impl Into<Value>) -> Self {
        Self::Ready(Resolved::from(value.into()))
    }

    /// Null.
    pub fn null() -> Self {
        Self::Ready(Resolved::Null)
    }
}

impl From<Resolved> for FieldValue {
    fn from(resolved: Resolved) -> Self {
        Self::Ready(resolved)
    }
}

impl From<Deferred<Resolved>> for FieldValue {
    fn from(deferred: Deferred<Resolved>) -> Self {
        Self::Pending(deferred)
    }
}
