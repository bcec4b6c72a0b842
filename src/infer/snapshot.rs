//! Immutable view of the graph that passes read from.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;

use crate::error::InferError;
use crate::graph::KnowledgeGraph;
use crate::node::{Node, NodeType};
use crate::store::StoreResult;

/// A node whose backing document could not be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub node_id: String,
    pub path: String,
    pub reason: String,
}

impl From<SkippedDocument> for InferError {
    fn from(s: SkippedDocument) -> Self {
        InferError::UnreadableDocument {
            node_id: s.node_id,
            path: s.path,
            message: s.reason,
        }
    }
}

/// Nodes plus the lowercased text of the documents passes need.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    nodes: Vec<Node>,
    documents: BTreeMap<String, String>,
    skipped: Vec<SkippedDocument>,
}

impl Snapshot {
    /// Read every node and the documents of nodes whose type is in
    /// `document_types`, resolving locations against `corpus_root`.
    ///
    /// Unreadable documents are logged and recorded, never fatal.
    pub fn capture(
        graph: &KnowledgeGraph,
        corpus_root: &Path,
        document_types: &BTreeSet<NodeType>,
    ) -> StoreResult<Self> {
        let nodes = graph.store().nodes()?;
        let mut documents = BTreeMap::new();
        let mut skipped = Vec::new();

        for node in nodes.iter().filter(|n| document_types.contains(&n.node_type)) {
            let Some(location) = node.location.as_deref() else {
                skipped.push(SkippedDocument {
                    node_id: node.id.clone(),
                    path: String::new(),
                    reason: "node has no location".into(),
                });
                continue;
            };
            let path = corpus_root.join(location);
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    documents.insert(node.id.clone(), text.to_lowercase());
                }
                Err(e) => {
                    let skip = SkippedDocument {
                        node_id: node.id.clone(),
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    };
                    let err = InferError::from(skip.clone());
                    tracing::warn!(error = %err, "skipping unreadable document");
                    skipped.push(skip);
                }
            }
        }

        tracing::debug!(
            nodes = nodes.len(),
            documents = documents.len(),
            skipped = skipped.len(),
            "captured snapshot"
        );
        Ok(Self {
            nodes,
            documents,
            skipped,
        })
    }

    /// Build a snapshot directly. `documents` maps node id to raw text.
    pub fn from_parts(nodes: Vec<Node>, documents: BTreeMap<String, String>) -> Self {
        let documents = documents
            .into_iter()
            .map(|(id, text)| (id, text.to_lowercase()))
            .collect();
        Self {
            nodes,
            documents,
            skipped: Vec::new(),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// Lowercased document text for a node, if it was read.
    pub fn document(&self, node_id: &str) -> Option<&str> {
        self.documents.get(node_id).map(String::as_str)
    }

    pub fn skipped(&self) -> &[SkippedDocument] {
        &self.skipped
    }
}
