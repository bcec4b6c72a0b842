//! Relationship inference: heuristic passes that densify the edge set.
//!
//! Each pass reads an immutable [`Snapshot`] of the graph and returns
//! [`Proposal`]s. The [`InferenceEngine`] applies all proposals in one write
//! batch through the idempotent edge insert, so passes never depend on each
//! other's order and re-running the engine adds nothing new.

pub mod engine;
pub mod passes;
pub mod snapshot;
pub mod tables;

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InferError;
use crate::graph::{Edge, RelationshipType};
use crate::node::NodeType;
use crate::store::ledger::GraphVersion;

pub use engine::InferenceEngine;
pub use passes::jaccard_similarity;
pub use snapshot::{SkippedDocument, Snapshot};

/// Result type for inference operations.
pub type InferResult<T> = std::result::Result<T, InferError>;

/// Payload key written by the domain tagging pass.
pub const INFERRED_DOMAIN_KEY: &str = "inferred_domain";

/// The closed set of inference passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Demonstrates,
    PairsWith,
    Prevents,
    Explains,
    Uses,
    RelatesTo,
    DomainTagging,
}

impl PassKind {
    /// Every pass, in default run order.
    pub const ALL: [PassKind; 7] = [
        PassKind::Demonstrates,
        PassKind::PairsWith,
        PassKind::Prevents,
        PassKind::Explains,
        PassKind::Uses,
        PassKind::RelatesTo,
        PassKind::DomainTagging,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PassKind::Demonstrates => "demonstrates",
            PassKind::PairsWith => "pairs_with",
            PassKind::Prevents => "prevents",
            PassKind::Explains => "explains",
            PassKind::Uses => "uses",
            PassKind::RelatesTo => "relates_to",
            PassKind::DomainTagging => "domain_tagging",
        }
    }

    /// Edge type the pass creates. Domain tagging annotates nodes instead.
    pub fn produces(self) -> Option<RelationshipType> {
        match self {
            PassKind::Demonstrates => Some(RelationshipType::Demonstrates),
            PassKind::PairsWith => Some(RelationshipType::PairsWith),
            PassKind::Prevents => Some(RelationshipType::Prevents),
            PassKind::Explains => Some(RelationshipType::Explains),
            PassKind::Uses => Some(RelationshipType::Uses),
            PassKind::RelatesTo => Some(RelationshipType::RelatesTo),
            PassKind::DomainTagging => None,
        }
    }
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PassKind {
    type Err = InferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        PassKind::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| InferError::UnknownPass {
                name: s.to_string(),
            })
    }
}

/// A change a pass wants applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Add this edge unless it already exists.
    Edge(Edge),
    /// Set `key` in a node's payload to `value`.
    Annotate {
        node_id: String,
        key: String,
        value: Value,
    },
}

/// One heuristic pass.
///
/// Implementations must be pure functions of the snapshot: same snapshot,
/// same proposals.
pub trait InferencePass {
    fn kind(&self) -> PassKind;

    /// Node types whose backing documents this pass reads.
    fn documents(&self) -> &'static [NodeType] {
        &[]
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal>;
}

/// Outcome of one pass within a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub proposed: usize,
    pub added: usize,
    pub duplicates: usize,
    pub annotated: usize,
}

/// Summary of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnhanceReport {
    pub edges_before: u64,
    pub edges_after: u64,
    /// Edges added per relationship type. Every type an enabled pass can
    /// produce is present, zero included.
    pub added_by_type: BTreeMap<RelationshipType, u64>,
    pub passes: BTreeMap<PassKind, PassReport>,
    /// Nodes whose inferred domain changed.
    pub nodes_tagged: usize,
    pub skipped: Vec<SkippedDocument>,
    /// New version when the run changed the graph.
    pub version: Option<GraphVersion>,
}

impl EnhanceReport {
    pub fn edges_added(&self) -> u64 {
        self.added_by_type.values().sum()
    }

    /// Whether the run wrote anything.
    pub fn changed(&self) -> bool {
        self.edges_added() > 0 || self.nodes_tagged > 0
    }
}
