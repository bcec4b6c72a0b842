//! Node types for the knowledge graph.
//!
//! A [`Node`] is one document-backed entity (a vulnerability write-up, a
//! contract template, a protocol deep-dive, ...). Its [`NodeType`] comes from
//! a closed set; anything outside it is rejected at the boundary with
//! [`GraphError::InvalidType`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::GraphError;
use crate::payload::Payload;

/// Classification of a node. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    Vulnerability,
    Template,
    DeepDive,
    Integration,
    VulnerableContract,
    ProtocolVersion,
    SourceRepository,
    Pattern,
}

impl NodeType {
    /// Every variant, in declaration order.
    pub const ALL: [NodeType; 8] = [
        NodeType::Vulnerability,
        NodeType::Template,
        NodeType::DeepDive,
        NodeType::Integration,
        NodeType::VulnerableContract,
        NodeType::ProtocolVersion,
        NodeType::SourceRepository,
        NodeType::Pattern,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Vulnerability => "Vulnerability",
            NodeType::Template => "Template",
            NodeType::DeepDive => "DeepDive",
            NodeType::Integration => "Integration",
            NodeType::VulnerableContract => "VulnerableContract",
            NodeType::ProtocolVersion => "ProtocolVersion",
            NodeType::SourceRepository => "SourceRepository",
            NodeType::Pattern => "Pattern",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = GraphError;

    /// Parses the canonical name. Matching ignores case so that CLI input
    /// like `deepdive` resolves, but unknown names are always rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| GraphError::InvalidType {
                kind: "node type",
                value: s.to_string(),
            })
    }
}

/// Which corpus a node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCollection {
    /// Production patterns: templates, attack-prevention write-ups.
    Action,
    /// Deep analysis: protocol deep-dives, integrations, vulnerable examples.
    Research,
}

impl SourceCollection {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceCollection::Action => "action",
            SourceCollection::Research => "research",
        }
    }
}

impl std::fmt::Display for SourceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SourceCollection {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "action" => Ok(SourceCollection::Action),
            "research" => Ok(SourceCollection::Research),
            _ => Err(GraphError::InvalidType {
                kind: "source collection",
                value: s.to_string(),
            }),
        }
    }
}

/// A document-backed entity in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable, globally unique identifier (e.g. `vuln_reentrancy`).
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Human-readable label.
    pub name: String,
    pub source_collection: SourceCollection,
    /// Path-like reference to the backing document, if any.
    pub location: Option<String>,
    /// Open, type-specific attributes.
    #[serde(default)]
    pub payload: Payload,
}

impl Node {
    /// Create a node with an empty payload and no location.
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        name: impl Into<String>,
        source_collection: SourceCollection,
    ) -> Self {
        Self {
            id: id.into(),
            node_type,
            name: name.into(),
            source_collection,
            location: None,
            payload: Payload::default(),
        }
    }

    /// Set the backing document location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// The name in normalized form, see [`normalize_name`].
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Normalize a label for substring comparison.
///
/// NFKC-folds, lowercases, trims, and maps spaces and hyphens to underscores,
/// so "Integer Overflow" and "integer-overflow" both become `integer_overflow`.
pub fn normalize_name(name: &str) -> String {
    name.nfkc()
        .collect::<String>()
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect()
}

/// Derive a stable node id from a prefix and a source name.
///
/// `slug_id("vuln", "Integer-Overflow.md")` is `vuln_integer_overflow_md`.
pub fn slug_id(prefix: &str, name: &str) -> String {
    let slug = name
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if prefix.is_empty() {
        slug
    } else {
        format!("{prefix}_{slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips_through_str() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
        assert_eq!("deepdive".parse::<NodeType>().unwrap(), NodeType::DeepDive);
    }

    #[test]
    fn bogus_node_type_is_rejected() {
        let err = "Bogus".parse::<NodeType>().unwrap_err();
        assert!(matches!(err, GraphError::InvalidType { kind: "node type", .. }));
    }

    #[test]
    fn source_collection_parse() {
        assert_eq!("Action".parse::<SourceCollection>().unwrap(), SourceCollection::Action);
        assert_eq!(" research ".parse::<SourceCollection>().unwrap(), SourceCollection::Research);
        assert!("archive".parse::<SourceCollection>().is_err());
    }

    #[test]
    fn normalize_name_folds_separators() {
        assert_eq!(normalize_name("Integer Overflow"), "integer_overflow");
        assert_eq!(normalize_name("  Access-Control "), "access_control");
        assert_eq!(normalize_name("Reentrancy.sol"), "reentrancy.sol");
    }

    #[test]
    fn slug_id_is_stable() {
        assert_eq!(slug_id("vuln", "Integer-Overflow.md"), "vuln_integer_overflow_md");
        assert_eq!(slug_id("", "  Hello   World "), "hello_world");
        assert_eq!(slug_id("vuln", "Integer-Overflow.md"), slug_id("vuln", "Integer-Overflow.md"));
    }

    #[test]
    fn node_serializes_type_field() {
        let node = Node::new("vuln_reentrancy", NodeType::Vulnerability, "Reentrancy", SourceCollection::Action);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "Vulnerability");
        assert_eq!(json["source_collection"], "action");
    }
}
