//! Whole-graph export as JSON or Graphviz DOT.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use super::{Edge, KnowledgeGraph, RelationshipType};
use crate::node::Node;
use crate::store::StoreResult;
use crate::store::ledger::GraphVersion;

/// Serializable dump of every node and edge.
#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub version: GraphVersion,
    pub exported_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

pub fn export_json(graph: &KnowledgeGraph) -> StoreResult<GraphExport> {
    Ok(GraphExport {
        version: graph.version()?,
        exported_at: Utc::now(),
        nodes: graph.store().nodes()?,
        edges: graph.edges()?,
    })
}

/// Load the graph into a petgraph `DiGraph`.
///
/// Node weights are `"id\nType"` labels, edge weights the relationship.
/// Node indices follow id order, so output is stable for a fixed graph.
pub fn to_digraph(graph: &KnowledgeGraph) -> StoreResult<DiGraph<String, RelationshipType>> {
    let mut out = DiGraph::new();
    let mut index: BTreeMap<String, NodeIndex> = BTreeMap::new();
    for node in graph.store().nodes()? {
        let idx = out.add_node(format!("{}\n{}", node.id, node.node_type));
        index.insert(node.id, idx);
    }
    for edge in graph.edges()? {
        if let (Some(&s), Some(&t)) = (index.get(&edge.source_id), index.get(&edge.target_id)) {
            out.add_edge(s, t, edge.relationship_type);
        }
    }
    Ok(out)
}

/// Render the graph in Graphviz DOT syntax.
pub fn export_dot(graph: &KnowledgeGraph) -> StoreResult<String> {
    let digraph = to_digraph(graph)?;
    Ok(format!("{}", Dot::with_config(&digraph, &[] as &[Config])))
}
