//! Request documents for contentql.
//!
//! Query text is parsed by the host; the runtime receives the operation as a
//! tree of field selections inside the usual request envelope.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An argument value, either literal or taken from the request variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    /// `{"$var": "name"}`
    Variable {
        #[serde(rename = "$var")]
        name: String,
    },
    /// Any other JSON value.
    Literal(Value),
}

impl InputValue {
    /// Substitutes variables. Missing variables become null.
    pub fn evaluate(&self, variables: &Map<String, Value>) -> Value {
        match self {
            Self::Variable { name } => variables.get(name).cloned().unwrap_or(Value::Null),
            Self::Literal(value) => value.clone(),
        }
    }
}

/// A field selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// The field name.
    pub name: String,
    /// The response alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// The arguments, in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: IndexMap<String, InputValue>,
    /// Sub-selections, empty for leaves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selection: Vec<Field>,
}

impl Field {
    /// Creates a leaf selection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: IndexMap::new(),
            selection: Vec::new(),
        }
    }

    /// Sets the response alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds a literal argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments
            .insert(name.into(), InputValue::Literal(value.into()));
        self
    }

    /// Adds an argument bound to a request variable.
    #[must_use]
    pub fn var(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.arguments.insert(
            name.into(),
            InputValue::Variable {
                name: variable.into(),
            },
        );
        self
    }

    /// Adds a nested selection.
    #[must_use]
    pub fn select(mut self, field: Field) -> Self {
        self.selection.push(field);
        self
    }

    /// Adds leaf selections by name.
    #[must_use]
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.extend(names.into_iter().map(Field::new));
        self
    }

    /// The key this field is written under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Depth of this selection; a leaf is 1.
    pub fn depth(&self) -> usize {
        1 + self.selection.iter().map(Field::depth).max().unwrap_or(0)
    }
}

/// The request envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Root selections of the operation.
    pub query: Vec<Field>,
    /// Request variables.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Operation name, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl Request {
    /// Creates a request from root selections.
    pub fn new(query: Vec<Field>) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    /// Sets a variable.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Depth of the deepest root selection.
    pub fn depth(&self) -> usize {
        self.query.iter().map(Field::depth).max().unwrap_or(0)
    }
}
