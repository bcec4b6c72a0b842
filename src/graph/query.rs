//! The graph query façade.
//!
//! [`KnowledgeGraph`] composes the entity store, relationship store, search
//! index and ledger behind one handle. Downstream consumers that must not
//! write get the [`GraphRead`] trait instead.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Direction, Edge, EdgeInsertion, Neighbor, RelationshipType};
use crate::node::{Node, NodeType, SourceCollection};
use crate::payload::{NodeView, PayloadFilter};
use crate::store::ledger::{Bump, GraphVersion, Ledger};
use crate::store::search::SearchHit;
use crate::store::{GraphStore, StoreResult, WriteBatch};

/// Aggregate counts over the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub nodes_by_type: BTreeMap<NodeType, u64>,
    pub edges_by_type: BTreeMap<RelationshipType, u64>,
    pub nodes_by_source: BTreeMap<SourceCollection, u64>,
    pub total_nodes: u64,
    pub total_edges: u64,
    pub version: GraphVersion,
    pub last_rebuild: Option<DateTime<Utc>>,
    pub last_enhance: Option<DateTime<Utc>>,
    pub kb_files_count: Option<u64>,
}

/// Read-only view of the graph handed to consumers that must never write.
pub trait GraphRead {
    fn get_node(&self, id: &str) -> StoreResult<Option<Node>>;
    fn find_by_type(&self, node_type: NodeType) -> StoreResult<Vec<Node>>;
    fn find_by_predicate(
        &self,
        node_type: NodeType,
        filters: &[PayloadFilter],
    ) -> StoreResult<Vec<Node>>;
    fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>>;
    fn neighbors(
        &self,
        id: &str,
        relationship: Option<RelationshipType>,
    ) -> StoreResult<Vec<Neighbor>>;
    fn statistics(&self) -> StoreResult<GraphStatistics>;
}

/// Handle to a knowledge graph. Passed explicitly to every component that
/// reads or writes it.
#[derive(Debug)]
pub struct KnowledgeGraph {
    store: GraphStore,
}

impl KnowledgeGraph {
    /// Open or create the graph stored at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        GraphStore::open(path).map(Self::from_store)
    }

    /// A graph that is discarded when dropped.
    pub fn in_memory() -> StoreResult<Self> {
        GraphStore::in_memory().map(Self::from_store)
    }

    pub fn from_store(store: GraphStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Apply several mutations in one transaction.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&mut WriteBatch<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.store.write(f)
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub fn upsert_node(&self, node: &Node) -> StoreResult<()> {
        self.store.upsert_node(node)
    }

    pub fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        self.store.get_node(id)
    }

    pub fn find_by_type(&self, node_type: NodeType) -> StoreResult<Vec<Node>> {
        self.store.nodes_of_type(node_type)
    }

    /// Nodes of `node_type` whose payload satisfies every filter.
    ///
    /// A node lacking a filtered field is simply excluded.
    pub fn find_by_predicate(
        &self,
        node_type: NodeType,
        filters: &[PayloadFilter],
    ) -> StoreResult<Vec<Node>> {
        let mut nodes = self.store.nodes_of_type(node_type)?;
        nodes.retain(|n| filters.iter().all(|f| f.matches(&n.payload)));
        Ok(nodes)
    }

    /// Vulnerabilities by severity and minimum historical loss, largest
    /// loss first.
    pub fn find_vulnerabilities(
        &self,
        severity: Option<&str>,
        min_loss: Option<f64>,
    ) -> StoreResult<Vec<Node>> {
        let filters: Vec<PayloadFilter> = severity
            .map(|s| PayloadFilter::eq("severity", s))
            .into_iter()
            .collect();
        let loss = |n: &Node| match NodeView::of(n) {
            NodeView::Vulnerability { loss_usd, .. } => loss_usd,
            _ => None,
        };

        let mut found = self.find_by_predicate(NodeType::Vulnerability, &filters)?;
        if let Some(min) = min_loss {
            found.retain(|n| loss(n).is_some_and(|l| l >= min));
        }
        found.sort_by(|a, b| {
            let (la, lb) = (loss(a).unwrap_or(0.0), loss(b).unwrap_or(0.0));
            lb.total_cmp(&la).then_with(|| a.id.cmp(&b.id))
        });
        Ok(found)
    }

    pub fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        self.store.search(query, limit)
    }

    // -----------------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------------

    /// Insert an edge unless it exists or an endpoint is missing.
    pub fn add_edge_if_absent(&self, edge: &Edge) -> StoreResult<EdgeInsertion> {
        let outcome = self.store.add_edge_if_absent(edge)?;
        if let EdgeInsertion::Dangling { missing } = &outcome {
            tracing::debug!(
                source = %edge.source_id,
                target = %edge.target_id,
                rel = %edge.relationship_type,
                ?missing,
                "dangling edge rejected"
            );
        }
        Ok(outcome)
    }

    pub fn edges(&self) -> StoreResult<Vec<Edge>> {
        self.store.edges()
    }

    /// Nodes connected to `id` in either direction, optionally restricted
    /// to one relationship type. Self-loops are excluded.
    pub fn neighbors(
        &self,
        id: &str,
        relationship: Option<RelationshipType>,
    ) -> StoreResult<Vec<Neighbor>> {
        let mut out = Vec::new();
        for (edge, direction) in self.store.edges_of(id)? {
            if relationship.is_some_and(|r| r != edge.relationship_type) {
                continue;
            }
            let other = match direction {
                Direction::Outgoing => &edge.target_id,
                Direction::Incoming => &edge.source_id,
            };
            if other == id {
                continue;
            }
            match self.store.get_node(other)? {
                Some(node) => out.push(Neighbor {
                    node,
                    relationship_type: edge.relationship_type,
                    direction,
                    properties: edge.properties,
                }),
                None => tracing::warn!(id = %other, "edge endpoint missing from node table"),
            }
        }
        Ok(out)
    }

    /// Whether any edge points from `source` to `target`.
    pub fn has_direct_edge(&self, source: &str, target: &str) -> StoreResult<bool> {
        Ok(!self.store.edges_between(source, target)?.is_empty())
    }

    /// The single-hop "path" from `source` to `target`, if one exists.
    ///
    /// Only direct edges are considered. When several relationship types
    /// connect the pair, the first in relationship-name order is returned.
    pub fn shortest_direct_path(&self, source: &str, target: &str) -> StoreResult<Option<Edge>> {
        Ok(self.store.edges_between(source, target)?.into_iter().next())
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn statistics(&self) -> StoreResult<GraphStatistics> {
        let mut nodes_by_type = BTreeMap::new();
        let mut nodes_by_source = BTreeMap::new();
        let nodes = self.store.nodes()?;
        for node in &nodes {
            *nodes_by_type.entry(node.node_type).or_insert(0) += 1;
            *nodes_by_source.entry(node.source_collection).or_insert(0) += 1;
        }

        let mut edges_by_type = BTreeMap::new();
        let edges = self.store.edges()?;
        for edge in &edges {
            *edges_by_type.entry(edge.relationship_type).or_insert(0) += 1;
        }

        let ledger = self.store.ledger()?;
        Ok(GraphStatistics {
            nodes_by_type,
            edges_by_type,
            nodes_by_source,
            total_nodes: nodes.len() as u64,
            total_edges: edges.len() as u64,
            version: ledger.version,
            last_rebuild: ledger.last_rebuild,
            last_enhance: ledger.last_enhance,
            kb_files_count: ledger.kb_files_count,
        })
    }

    pub fn ledger(&self) -> StoreResult<Ledger> {
        self.store.ledger()
    }

    pub fn version(&self) -> StoreResult<GraphVersion> {
        self.store.version()
    }

    pub fn bump_version(&self, bump: Bump) -> StoreResult<GraphVersion> {
        self.store.bump_version(bump)
    }
}

impl GraphRead for KnowledgeGraph {
    fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        KnowledgeGraph::get_node(self, id)
    }

    fn find_by_type(&self, node_type: NodeType) -> StoreResult<Vec<Node>> {
        KnowledgeGraph::find_by_type(self, node_type)
    }

    fn find_by_predicate(
        &self,
        node_type: NodeType,
        filters: &[PayloadFilter],
    ) -> StoreResult<Vec<Node>> {
        KnowledgeGraph::find_by_predicate(self, node_type, filters)
    }

    fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        KnowledgeGraph::search(self, query, limit)
    }

    fn neighbors(
        &self,
        id: &str,
        relationship: Option<RelationshipType>,
    ) -> StoreResult<Vec<Neighbor>> {
        KnowledgeGraph::neighbors(self, id, relationship)
    }

    fn statistics(&self) -> StoreResult<GraphStatistics> {
        KnowledgeGraph::statistics(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::payload::Payload;

    fn graph() -> KnowledgeGraph {
        KnowledgeGraph::in_memory().unwrap()
    }

    fn vuln(id: &str, name: &str, severity: &str, loss: f64) -> Node {
        Node::new(id, NodeType::Vulnerability, name, SourceCollection::Action).with_payload(
            Payload::new()
                .with("severity", severity)
                .with("historical_losses_usd", json!(loss)),
        )
    }

    #[test]
    fn statistics_counts_by_type() {
        let g = graph();
        g.upsert_node(&vuln("v1", "Reentrancy", "HIGH", 1.0)).unwrap();
        g.upsert_node(&vuln("v2", "Overflow", "MEDIUM", 1.0)).unwrap();
        g.upsert_node(&Node::new("t1", NodeType::Template, "ERC20", SourceCollection::Action))
            .unwrap();
        g.add_edge_if_absent(&Edge::new("t1", "v1", RelationshipType::Prevents))
            .unwrap();

        let stats = g.statistics().unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_edges, 1);
        assert_eq!(
            stats.nodes_by_type,
            BTreeMap::from([(NodeType::Vulnerability, 2), (NodeType::Template, 1)])
        );
        assert_eq!(stats.nodes_by_source, BTreeMap::from([(SourceCollection::Action, 3)]));
        assert_eq!(stats.edges_by_type, BTreeMap::from([(RelationshipType::Prevents, 1)]));
    }

    #[test]
    fn neighbors_filter_and_exclude_self() {
        let g = graph();
        for id in ["a", "b", "c"] {
            g.upsert_node(&vuln(id, id, "LOW", 0.0)).unwrap();
        }
        g.add_edge_if_absent(&Edge::new("a", "b", RelationshipType::Uses)).unwrap();
        g.add_edge_if_absent(&Edge::new("c", "a", RelationshipType::Explains)).unwrap();
        g.add_edge_if_absent(&Edge::new("a", "a", RelationshipType::References)).unwrap();

        let all = g.neighbors("a", None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|n| n.node.id != "a"));

        let explains = g.neighbors("a", Some(RelationshipType::Explains)).unwrap();
        assert_eq!(explains.len(), 1);
        assert_eq!(explains[0].node.id, "c");
        assert_eq!(explains[0].direction, Direction::Incoming);

        assert!(g.neighbors("missing", None).unwrap().is_empty());
    }

    #[test]
    fn direct_path_is_single_hop() {
        let g = graph();
        for id in ["a", "b", "c"] {
            g.upsert_node(&vuln(id, id, "LOW", 0.0)).unwrap();
        }
        g.add_edge_if_absent(&Edge::new("a", "b", RelationshipType::Uses)).unwrap();
        g.add_edge_if_absent(&Edge::new("b", "c", RelationshipType::Uses)).unwrap();

        assert!(g.has_direct_edge("a", "b").unwrap());
        assert!(!g.has_direct_edge("b", "a").unwrap());
        assert_eq!(
            g.shortest_direct_path("a", "b").unwrap().map(|e| e.relationship_type),
            Some(RelationshipType::Uses)
        );
        assert!(g.shortest_direct_path("a", "c").unwrap().is_none());
    }

    #[test]
    fn vulnerabilities_by_severity_and_loss() {
        let g = graph();
        g.upsert_node(&vuln("v1", "Reentrancy", "HIGH", 60_000_000.0)).unwrap();
        g.upsert_node(&vuln("v2", "Oracle", "HIGH", 500_000.0)).unwrap();
        g.upsert_node(&vuln("v3", "DoS", "LOW", 9_000_000.0)).unwrap();

        let high: Vec<String> = g
            .find_vulnerabilities(Some("high"), None)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(high, vec!["v1", "v2"]);

        let costly = g.find_vulnerabilities(None, Some(1_000_000.0)).unwrap();
        assert_eq!(costly.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["v1", "v3"]);
    }

    #[test]
    fn predicate_on_missing_field_is_empty() {
        let g = graph();
        g.upsert_node(&vuln("v1", "Reentrancy", "HIGH", 1.0)).unwrap();
        let found = g
            .find_by_predicate(NodeType::Vulnerability, &[PayloadFilter::eq("protocol", "Aave")])
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn read_trait_delegates() {
        let g = graph();
        g.upsert_node(&vuln("v1", "Reentrancy", "HIGH", 1.0)).unwrap();
        let reader: &dyn GraphRead = &g;
        assert_eq!(reader.find_by_type(NodeType::Vulnerability).unwrap().len(), 1);
        assert_eq!(reader.search("reentrancy", 5).unwrap()[0].node.id, "v1");
    }
}
