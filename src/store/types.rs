//! Core store types shared by the graph and time-series interfaces

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store-assigned node identity
pub type NodeId = u64;

/// Opaque change-log position
pub type ChangeCursor = u64;

/// Subscription handle returned by the time-series store
pub type SubscriptionId = u64;

// Well-known attribute names. These are part of the template contract with
// the external store, not free-form configuration.
pub const LEAF_VALUE: &str = "Value";
pub const LEAF_MODE: &str = "Mode";
pub const ROLLUP_SUM: &str = "Rollup_Sum";
pub const THRESHOLD: &str = "Threshold";

/// Container root naming: one `<Template>Elements` root per level, except the
/// top level which uses a well-known entry point name.
pub const CONTAINER_SUFFIX: &str = "Elements";
pub const HIERARCHY_ROOT: &str = "HierarchyRoot";

pub fn container_root_name(template: &str) -> String {
    format!("{}{}", template, CONTAINER_SUFFIX)
}

/// Time-series binding carried by an attribute
///
/// A binding created from a template default is unresolved until the
/// synchronizer resolves its underlying point against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBinding {
    pub config: String,
    pub resolved: bool,
}

impl SeriesBinding {
    pub fn template_default(config: &str) -> Self {
        Self {
            config: config.to_string(),
            resolved: false,
        }
    }
}

/// Attribute value: a static scalar, a static text value, or a handle to a
/// named time-series point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Scalar(f64),
    Text(String),
    Series(SeriesBinding),
}

/// A node in the asset graph
///
/// Identity is the name, unique within the template. `base_template` is the
/// root of the template derivation chain (e.g. `Leaf_Sin` -> `Leaf`).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub template: String,
    pub base_template: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Node {
    pub fn scalar(&self, attribute: &str) -> Option<f64> {
        match self.attributes.get(attribute) {
            Some(AttributeValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    /// Attribute value rendered as a grouping key. Blank keys are dropped by
    /// the caller, so absent attributes come back as None.
    pub fn key_for(&self, attribute: &str) -> Option<String> {
        match self.attributes.get(attribute) {
            Some(AttributeValue::Text(s)) => Some(s.clone()),
            Some(AttributeValue::Scalar(v)) => Some(v.to_string()),
            _ => None,
        }
    }

    /// Reference to one of this node's series attributes, if bound
    pub fn series_ref(&self, attribute: &str) -> Option<AttrRef> {
        match self.attributes.get(attribute) {
            Some(AttributeValue::Series(_)) => Some(AttrRef {
                node: self.id,
                node_name: self.name.clone(),
                attribute: attribute.to_string(),
            }),
            _ => None,
        }
    }

    /// True when any series attribute still carries its template default
    /// (unresolved point binding)
    pub fn has_unresolved_binding(&self) -> bool {
        self.attributes.values().any(|v| {
            matches!(v, AttributeValue::Series(binding) if !binding.resolved)
        })
    }
}

/// Reference to a single node attribute, used for bulk time-series operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrRef {
    pub node: NodeId,
    pub node_name: String,
    pub attribute: String,
}

/// Payload of a live value-change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventValue {
    Number(f64),
    Status(String),
}

/// Live value-change event delivered through a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChangeEvent {
    pub node: NodeId,
    pub node_name: String,
    pub attribute: String,
    pub timestamp: i64,
    pub value: EventValue,
}

/// Entry in the graph store's change log
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedItem {
    pub node: NodeId,
    pub base_template: String,
}

/// Interval record created on a leaf mode transition, persisted immediately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub name: String,
    pub node: NodeId,
    pub node_name: String,
    pub mode: String,
    pub start: i64,
    pub end: i64,
}

/// Errors surfaced by the external stores
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    NotFound(String),
    InvalidOperation(String),
    Query(String),
    Write(String),
    Cancelled,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "not found: {}", what),
            StoreError::InvalidOperation(what) => write!(f, "invalid operation: {}", what),
            StoreError::Query(what) => write!(f, "query failed: {}", what),
            StoreError::Write(what) => write!(f, "write failed: {}", what),
            StoreError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(attrs: Vec<(&str, AttributeValue)>) -> Node {
        Node {
            id: 1,
            name: "Leaf00000001".to_string(),
            template: "Leaf_Sin".to_string(),
            base_template: "Leaf".to_string(),
            attributes: attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    #[test]
    fn test_key_for_reads_text_and_scalar() {
        let node = node_with(vec![
            ("Branch", AttributeValue::Text("17".to_string())),
            ("SubTree", AttributeValue::Scalar(3.0)),
        ]);
        assert_eq!(node.key_for("Branch").as_deref(), Some("17"));
        assert_eq!(node.key_for("SubTree").as_deref(), Some("3"));
        assert_eq!(node.key_for("Missing"), None);
    }

    #[test]
    fn test_series_ref_requires_binding() {
        let node = node_with(vec![(
            LEAF_VALUE,
            AttributeValue::Series(SeriesBinding {
                config: "pt".to_string(),
                resolved: true,
            }),
        )]);
        let attr = node.series_ref(LEAF_VALUE).unwrap();
        assert_eq!(attr.node, 1);
        assert_eq!(attr.attribute, LEAF_VALUE);
        assert!(node.series_ref(LEAF_MODE).is_none());
    }

    #[test]
    fn test_unresolved_binding_detection() {
        let mut node = node_with(vec![(
            ROLLUP_SUM,
            AttributeValue::Series(SeriesBinding::template_default("%Node%.%Attribute%")),
        )]);
        assert!(node.has_unresolved_binding());

        node.attributes.insert(
            ROLLUP_SUM.to_string(),
            AttributeValue::Series(SeriesBinding {
                config: "resolved".to_string(),
                resolved: true,
            }),
        );
        assert!(!node.has_unresolved_binding());
    }
}
