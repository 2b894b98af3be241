//! Dependency discovery over workflow definitions.
//!
//! A definition is walked depth-first: scalars that satisfy the predicate are
//! collected, sequences recurse into their elements and mappings recurse into their
//! values. Keys are never inspected. Definitions are finite trees, so no cycle guard
//! is needed.

use std::collections::BTreeSet;

use pipewatch_types::{DefinitionNode, is_function_identifier};

/// Resource identifiers referenced by a workflow.
pub type DependencySet = BTreeSet<String>;

/// Collect every scalar in `definition` accepted by `predicate`.
pub fn extract<P>(definition: &DefinitionNode, predicate: P) -> DependencySet
where
    P: Fn(&str) -> bool,
{
    let mut found = DependencySet::new();
    walk(definition, &predicate, &mut found);
    found
}

fn walk<P>(node: &DefinitionNode, predicate: &P, found: &mut DependencySet)
where
    P: Fn(&str) -> bool,
{
    match node {
        DefinitionNode::Scalar(value) => {
            if predicate(value) {
                found.insert(value.clone());
            }
        }
        DefinitionNode::Sequence(items) => {
            for item in items {
                walk(item, predicate, found);
            }
        }
        DefinitionNode::Mapping(entries) => {
            for value in entries.values() {
                walk(value, predicate, found);
            }
        }
    }
}

/// Serverless function identifiers referenced anywhere in the definition.
pub fn function_identifiers(definition: &DefinitionNode) -> DependencySet {
    extract(definition, is_function_identifier)
}

/// Predicate matching scalars that start with `prefix`.
pub fn with_prefix(prefix: &str) -> impl Fn(&str) -> bool + '_ {
    move |value| value.starts_with(prefix)
}
