//! Format-independent tree for declarative workflow definitions.
//!
//! Workflow services hand back definitions as JSON (sometimes as a JSON document
//! embedded in a string field). The engine only needs to walk scalars, sequences and
//! mappings, so definitions are normalized into [`DefinitionNode`] at the edge.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node of a workflow definition tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum DefinitionNode {
    /// Any leaf value rendered as text (numbers, booleans and null included).
    Scalar(String),
    /// An ordered list of nodes.
    Sequence(Vec<DefinitionNode>),
    /// Key/value pairs. Keys built from `serde_json::Value` arrive sorted; walkers
    /// must not depend on their order.
    Mapping(IndexMap<String, DefinitionNode>),
}

impl DefinitionNode {
    pub fn scalar(value: impl Into<String>) -> Self {
        DefinitionNode::Scalar(value.into())
    }

    /// Normalize a service payload into a tree.
    ///
    /// A top-level string that itself holds a JSON object or array is parsed, matching
    /// services that return the definition document as a string.
    pub fn from_document(value: Value) -> Self {
        if let Value::String(text) = &value {
            let trimmed = text.trim_start();
            if (trimmed.starts_with('{') || trimmed.starts_with('['))
                && let Ok(parsed) = serde_json::from_str::<Value>(text)
            {
                return DefinitionNode::from(parsed);
            }
        }
        DefinitionNode::from(value)
    }
}

impl From<Value> for DefinitionNode {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => DefinitionNode::Scalar(text),
            Value::Array(items) => DefinitionNode::Sequence(items.into_iter().map(DefinitionNode::from).collect()),
            Value::Object(map) => DefinitionNode::Mapping(
                map.into_iter()
                    .map(|(key, value)| (key, DefinitionNode::from(value)))
                    .collect(),
            ),
            other => DefinitionNode::Scalar(other.to_string()),
        }
    }
}

impl From<DefinitionNode> for Value {
    fn from(node: DefinitionNode) -> Self {
        match node {
            DefinitionNode::Scalar(text) => Value::String(text),
            DefinitionNode::Sequence(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            DefinitionNode::Mapping(map) => Value::Object(map.into_iter().map(|(key, node)| (key, Value::from(node))).collect()),
        }
    }
}
