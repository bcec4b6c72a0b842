//! Edges and the graph query façade.
//!
//! Nodes live in [`crate::node`]. This module defines the directed, typed
//! [`Edge`] that connects them, the outcome of an idempotent insert
//! ([`EdgeInsertion`]), and re-exports the [`KnowledgeGraph`] façade that
//! composes the store, search index and ledger into the read/write API.

pub mod export;
mod query;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::node::Node;
use crate::payload::Payload;

pub use query::{GraphRead, GraphStatistics, KnowledgeGraph};

/// Relationship kind carried by an edge. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Demonstrates,
    PairsWith,
    Prevents,
    Explains,
    Uses,
    RelatesTo,
    Supersedes,
    ProvidesPerspective,
    References,
}

impl RelationshipType {
    /// Every variant, in declaration order.
    pub const ALL: [RelationshipType; 9] = [
        RelationshipType::Demonstrates,
        RelationshipType::PairsWith,
        RelationshipType::Prevents,
        RelationshipType::Explains,
        RelationshipType::Uses,
        RelationshipType::RelatesTo,
        RelationshipType::Supersedes,
        RelationshipType::ProvidesPerspective,
        RelationshipType::References,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipType::Demonstrates => "DEMONSTRATES",
            RelationshipType::PairsWith => "PAIRS_WITH",
            RelationshipType::Prevents => "PREVENTS",
            RelationshipType::Explains => "EXPLAINS",
            RelationshipType::Uses => "USES",
            RelationshipType::RelatesTo => "RELATES_TO",
            RelationshipType::Supersedes => "SUPERSEDES",
            RelationshipType::ProvidesPerspective => "PROVIDES_PERSPECTIVE",
            RelationshipType::References => "REFERENCES",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = GraphError;

    /// Accepts `PAIRS_WITH`, `pairs_with` and `pairs-with`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        RelationshipType::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| GraphError::InvalidType {
                kind: "relationship type",
                value: s.to_string(),
            })
    }
}

/// A directed, typed relationship between two nodes.
///
/// `(source_id, target_id, relationship_type)` is unique within a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub properties: Payload,
}

impl Edge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship_type,
            properties: Payload::default(),
        }
    }

    pub fn with_properties(mut self, properties: Payload) -> Self {
        self.properties = properties;
        self
    }
}

/// Outcome of [`KnowledgeGraph::add_edge_if_absent`].
///
/// Duplicates and dangling endpoints are ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeInsertion {
    Inserted,
    /// An edge with the same identity triple already exists.
    Duplicate,
    /// One or both endpoints do not exist; nothing was written.
    Dangling { missing: Vec<String> },
}

impl EdgeInsertion {
    pub fn is_inserted(&self) -> bool {
        matches!(self, EdgeInsertion::Inserted)
    }
}

/// Which way an edge points relative to the queried node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The queried node is the source.
    Outgoing,
    /// The queried node is the target.
    Incoming,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Outgoing => f.pad("outgoing"),
            Direction::Incoming => f.pad("incoming"),
        }
    }
}

/// A node adjacent to a queried node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub node: Node,
    pub relationship_type: RelationshipType,
    pub direction: Direction,
    pub properties: Payload,
}
