//! Durable graph storage backed by redb.
//!
//! One redb database holds every table the graph needs:
//!
//! - `nodes`: node id → JSON-encoded [`Node`]
//! - `edges`: (source, target, relationship) → JSON-encoded edge properties
//! - `edges_incoming`: (target, source, relationship) → () reverse index
//! - the search postings ([`search`]) and the metadata ledger ([`ledger`])
//!
//! Every mutation goes through [`GraphStore::write`], which runs a closure
//! against a [`WriteBatch`] inside a single redb write transaction. A crash
//! mid-batch leaves the previous committed state intact.

pub mod ledger;
pub mod search;

use std::path::Path;

use redb::backends::InMemoryBackend;
use redb::{
    Database, DatabaseError, ReadTransaction, ReadableTable, ReadableTableMetadata, StorageError,
    TableDefinition, TableError, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::graph::{Direction, Edge, EdgeInsertion, RelationshipType};
use crate::node::{Node, NodeType};
use crate::payload::Payload;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
const EDGES: TableDefinition<(&str, &str, &str), &[u8]> = TableDefinition::new("edges");
const EDGES_IN: TableDefinition<(&str, &str, &str), ()> = TableDefinition::new("edges_incoming");

/// Handle to the persisted graph.
///
/// Owns the redb database exclusively. Readers use MVCC snapshots; writes
/// are serialized by redb's single-writer transactions.
pub struct GraphStore {
    db: Database,
    location: String,
}

impl GraphStore {
    /// Open or create the store file at `path`.
    ///
    /// Fails with [`StoreError::Corrupt`] if an existing file is not a
    /// readable kbgraph database, and with [`StoreError::Locked`] if another
    /// handle holds it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io { source })?;
        }
        let existed = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let location = path.display().to_string();
        let db = Database::create(path).map_err(|e| open_error(e, &location, existed))?;
        let store = Self { db, location };
        store.initialize()?;
        tracing::debug!(path = %store.location, existed, "opened graph store");
        Ok(store)
    }

    /// A store that lives only in memory. Used by tests and dry runs.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(|e| StoreError::Redb {
                message: format!("failed to create in-memory store: {e}"),
            })?;
        let store = Self {
            db,
            location: ":memory:".to_string(),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Path of the backing file, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Create missing tables and verify the schema version.
    fn initialize(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        {
            let corrupt = |e: TableError| StoreError::Corrupt {
                path: self.location.clone(),
                message: e.to_string(),
            };
            txn.open_table(NODES).map_err(corrupt)?;
            txn.open_table(EDGES).map_err(corrupt)?;
            txn.open_table(EDGES_IN).map_err(corrupt)?;
            txn.open_table(search::POSTINGS).map_err(corrupt)?;
            txn.open_table(search::DOC_TERMS).map_err(corrupt)?;
            txn.open_table(ledger::META).map_err(corrupt)?;
        }
        ledger::ensure_schema(&txn)?;
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    /// Run `f` inside one write transaction and commit it.
    ///
    /// If `f` returns an error the transaction is dropped and nothing from
    /// the batch is persisted.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&mut WriteBatch<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let out = {
            let mut batch = WriteBatch { txn: &txn };
            f(&mut batch)?
        };
        txn.commit().map_err(redb_err("commit"))?;
        Ok(out)
    }

    fn read(&self) -> StoreResult<ReadTransaction> {
        self.db.begin_read().map_err(redb_err("begin_read"))
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Insert or replace a node and re-index it. Commits immediately.
    pub fn upsert_node(&self, node: &Node) -> StoreResult<()> {
        self.write(|batch| batch.upsert_node(node))
    }

    /// Look up a node. `Ok(None)` when the id is unknown.
    pub fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let txn = self.read()?;
        let table = txn.open_table(NODES).map_err(redb_err("open_table"))?;
        load_node(&table, id)
    }

    pub fn contains_node(&self, id: &str) -> StoreResult<bool> {
        let txn = self.read()?;
        let table = txn.open_table(NODES).map_err(redb_err("open_table"))?;
        let found = table.get(id).map_err(redb_err("get"))?.is_some();
        Ok(found)
    }

    /// Every node, ordered by id.
    pub fn nodes(&self) -> StoreResult<Vec<Node>> {
        self.scan_nodes(|_| true)
    }

    /// Every node of one type, ordered by id.
    pub fn nodes_of_type(&self, node_type: NodeType) -> StoreResult<Vec<Node>> {
        self.scan_nodes(|n| n.node_type == node_type)
    }

    fn scan_nodes(&self, keep: impl Fn(&Node) -> bool) -> StoreResult<Vec<Node>> {
        let txn = self.read()?;
        let table = txn.open_table(NODES).map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            let node: Node = decode(value.value(), || format!("nodes/{}", key.value()))?;
            if keep(&node) {
                out.push(node);
            }
        }
        Ok(out)
    }

    pub fn node_count(&self) -> StoreResult<u64> {
        let txn = self.read()?;
        let table = txn.open_table(NODES).map_err(redb_err("open_table"))?;
        table.len().map_err(redb_err("len"))
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Insert an edge unless it already exists or an endpoint is missing.
    /// Commits immediately.
    pub fn add_edge_if_absent(&self, edge: &Edge) -> StoreResult<EdgeInsertion> {
        self.write(|batch| batch.add_edge_if_absent(edge))
    }

    /// Every edge, ordered by (source, target, relationship).
    pub fn edges(&self) -> StoreResult<Vec<Edge>> {
        let txn = self.read()?;
        let table = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            let (source, target, rel) = key.value();
            out.push(decode_edge(source, target, rel, value.value())?);
        }
        Ok(out)
    }

    pub fn edge_count(&self) -> StoreResult<u64> {
        let txn = self.read()?;
        let table = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        table.len().map_err(redb_err("len"))
    }

    /// One edge by its identity triple.
    pub fn get_edge(
        &self,
        source: &str,
        target: &str,
        relationship: RelationshipType,
    ) -> StoreResult<Option<Edge>> {
        let txn = self.read()?;
        let table = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        let rel = relationship.as_str();
        match table.get((source, target, rel)).map_err(redb_err("get"))? {
            Some(value) => decode_edge(source, target, rel, value.value()).map(Some),
            None => Ok(None),
        }
    }

    /// All edges from `source` to `target`, any relationship type.
    pub fn edges_between(&self, source: &str, target: &str) -> StoreResult<Vec<Edge>> {
        let txn = self.read()?;
        let table = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in table.range((source, target, "")..).map_err(redb_err("range"))? {
            let (key, value) = entry.map_err(redb_err("range"))?;
            let (s, t, rel) = key.value();
            if s != source || t != target {
                break;
            }
            out.push(decode_edge(s, t, rel, value.value())?);
        }
        Ok(out)
    }

    /// Every edge touching `id`, with its direction relative to `id`.
    ///
    /// Outgoing edges come from a range scan over `edges`, incoming ones
    /// from the reverse index.
    pub fn edges_of(&self, id: &str) -> StoreResult<Vec<(Edge, Direction)>> {
        let txn = self.read()?;
        let edges = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        let incoming = txn.open_table(EDGES_IN).map_err(redb_err("open_table"))?;
        let mut out = Vec::new();

        for entry in edges.range((id, "", "")..).map_err(redb_err("range"))? {
            let (key, value) = entry.map_err(redb_err("range"))?;
            let (source, target, rel) = key.value();
            if source != id {
                break;
            }
            out.push((decode_edge(source, target, rel, value.value())?, Direction::Outgoing));
        }

        for entry in incoming.range((id, "", "")..).map_err(redb_err("range"))? {
            let (key, _) = entry.map_err(redb_err("range"))?;
            let (target, source, rel) = key.value();
            if target != id {
                break;
            }
            match edges.get((source, target, rel)).map_err(redb_err("get"))? {
                Some(value) => out.push((
                    decode_edge(source, target, rel, value.value())?,
                    Direction::Incoming,
                )),
                None => {
                    return Err(StoreError::Corrupt {
                        path: format!("edges_incoming/{target}<-{source}"),
                        message: format!("reverse index entry for {rel} has no forward edge"),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Remove every node, edge and index entry. The ledger is kept.
    pub fn clear(&self) -> StoreResult<()> {
        self.write(|batch| batch.clear())
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("location", &self.location)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// Mutations applied inside one open write transaction.
///
/// Obtained through [`GraphStore::write`]. Each method opens the tables it
/// needs and releases them before returning, so methods can be freely
/// interleaved.
pub struct WriteBatch<'a> {
    txn: &'a WriteTransaction,
}

impl WriteBatch<'_> {
    /// Insert or replace a node by id and re-index its text.
    pub fn upsert_node(&mut self, node: &Node) -> StoreResult<()> {
        let bytes = encode(node)?;
        {
            let mut nodes = self.txn.open_table(NODES).map_err(redb_err("open_table"))?;
            nodes
                .insert(node.id.as_str(), bytes.as_slice())
                .map_err(redb_err("insert"))?;
        }
        search::index_node(self.txn, node)
    }

    /// Read a node as seen by this batch, including uncommitted writes.
    pub fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let nodes = self.txn.open_table(NODES).map_err(redb_err("open_table"))?;
        load_node(&nodes, id)
    }

    /// The idempotent edge insert.
    ///
    /// Storage is untouched unless the result is [`EdgeInsertion::Inserted`].
    pub fn add_edge_if_absent(&mut self, edge: &Edge) -> StoreResult<EdgeInsertion> {
        let mut missing: Vec<String> = Vec::new();
        {
            let nodes = self.txn.open_table(NODES).map_err(redb_err("open_table"))?;
            for id in [&edge.source_id, &edge.target_id] {
                let found = nodes.get(id.as_str()).map_err(redb_err("get"))?.is_some();
                if !found && !missing.contains(id) {
                    missing.push(id.clone());
                }
            }
        }
        if !missing.is_empty() {
            return Ok(EdgeInsertion::Dangling { missing });
        }

        let rel = edge.relationship_type.as_str();
        let key = (edge.source_id.as_str(), edge.target_id.as_str(), rel);
        let mut edges = self.txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        let exists = edges.get(key).map_err(redb_err("get"))?.is_some();
        if exists {
            return Ok(EdgeInsertion::Duplicate);
        }
        let bytes = encode(&edge.properties)?;
        edges.insert(key, bytes.as_slice()).map_err(redb_err("insert"))?;

        let mut incoming = self.txn.open_table(EDGES_IN).map_err(redb_err("open_table"))?;
        incoming
            .insert((edge.target_id.as_str(), edge.source_id.as_str(), rel), ())
            .map_err(redb_err("insert"))?;
        Ok(EdgeInsertion::Inserted)
    }

    pub fn node_count(&self) -> StoreResult<u64> {
        let nodes = self.txn.open_table(NODES).map_err(redb_err("open_table"))?;
        nodes.len().map_err(redb_err("len"))
    }

    pub fn edge_count(&self) -> StoreResult<u64> {
        let edges = self.txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        edges.len().map_err(redb_err("len"))
    }

    /// Drop all nodes, edges and search postings. The ledger is kept.
    pub fn clear(&mut self) -> StoreResult<()> {
        reset_table(self.txn, NODES)?;
        reset_table(self.txn, EDGES)?;
        reset_table(self.txn, EDGES_IN)?;
        reset_table(self.txn, search::POSTINGS)?;
        reset_table(self.txn, search::DOC_TERMS)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a redb error into [`StoreError::Redb`] with the failing operation.
fn redb_err<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

fn open_error(err: DatabaseError, location: &str, existed: bool) -> StoreError {
    match err {
        DatabaseError::DatabaseAlreadyOpen => StoreError::Locked {
            path: location.to_string(),
        },
        DatabaseError::Storage(StorageError::Io(source)) if !existed => StoreError::Io { source },
        other if existed => StoreError::Corrupt {
            path: location.to_string(),
            message: other.to_string(),
        },
        other => StoreError::Redb {
            message: format!("failed to open {location}: {other}"),
        },
    }
}

fn reset_table<K: redb::Key + 'static, V: redb::Value + 'static>(
    txn: &WriteTransaction,
    table: TableDefinition<K, V>,
) -> StoreResult<()> {
    txn.delete_table(table).map_err(redb_err("delete_table"))?;
    txn.open_table(table).map_err(redb_err("open_table"))?;
    Ok(())
}

fn load_node(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &str,
) -> StoreResult<Option<Node>> {
    match table.get(id).map_err(redb_err("get"))? {
        Some(value) => decode(value.value(), || format!("nodes/{id}")).map(Some),
        None => Ok(None),
    }
}

fn decode_edge(source: &str, target: &str, rel: &str, value: &[u8]) -> StoreResult<Edge> {
    let record = || format!("edges/{source}->{target}");
    let relationship_type = rel
        .parse::<RelationshipType>()
        .map_err(|e| StoreError::Corrupt {
            path: record(),
            message: e.to_string(),
        })?;
    let properties: Payload = decode(value, record)?;
    Ok(Edge {
        source_id: source.to_string(),
        target_id: target.to_string(),
        relationship_type,
        properties,
    })
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

/// Decode a stored record. A record that does not parse means the file was
/// damaged or written by something else.
fn decode<T: DeserializeOwned>(bytes: &[u8], record: impl FnOnce() -> String) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        path: record(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SourceCollection;

    fn vuln(id: &str, name: &str) -> Node {
        Node::new(id, NodeType::Vulnerability, name, SourceCollection::Action)
    }

    #[test]
    fn upsert_replaces_by_id() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&vuln("v1", "Reentrancy")).unwrap();
        store.upsert_node(&vuln("v1", "Reentrancy Attack")).unwrap();
        assert_eq!(store.node_count().unwrap(), 1);
        assert_eq!(store.get_node("v1").unwrap().unwrap().name, "Reentrancy Attack");
        assert!(store.get_node("nope").unwrap().is_none());
    }

    #[test]
    fn edge_insert_is_idempotent() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&vuln("a", "A")).unwrap();
        store.upsert_node(&vuln("b", "B")).unwrap();
        let edge = Edge::new("a", "b", RelationshipType::References);

        assert_eq!(store.add_edge_if_absent(&edge).unwrap(), EdgeInsertion::Inserted);
        assert_eq!(store.add_edge_if_absent(&edge).unwrap(), EdgeInsertion::Duplicate);
        assert_eq!(store.edge_count().unwrap(), 1);

        let other = Edge::new("a", "b", RelationshipType::Explains);
        assert!(store.add_edge_if_absent(&other).unwrap().is_inserted());
        assert_eq!(store.edges_between("a", "b").unwrap().len(), 2);
    }

    #[test]
    fn dangling_edge_is_not_stored() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&vuln("a", "A")).unwrap();
        let outcome = store
            .add_edge_if_absent(&Edge::new("a", "ghost", RelationshipType::Uses))
            .unwrap();
        assert_eq!(
            outcome,
            EdgeInsertion::Dangling {
                missing: vec!["ghost".into()]
            }
        );
        assert_eq!(store.edge_count().unwrap(), 0);
    }

    #[test]
    fn edges_of_reports_both_directions() {
        let store = GraphStore::in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.upsert_node(&vuln(id, id)).unwrap();
        }
        store.add_edge_if_absent(&Edge::new("a", "b", RelationshipType::Uses)).unwrap();
        store.add_edge_if_absent(&Edge::new("c", "a", RelationshipType::Explains)).unwrap();

        let edges = store.edges_of("a").unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().any(|(e, d)| e.target_id == "b" && *d == Direction::Outgoing));
        assert!(edges.iter().any(|(e, d)| e.source_id == "c" && *d == Direction::Incoming));
        assert!(store.edges_of("b").unwrap().iter().all(|(_, d)| *d == Direction::Incoming));
    }

    #[test]
    fn failed_batch_is_rolled_back() {
        let store = GraphStore::in_memory().unwrap();
        let result: StoreResult<()> = store.write(|batch| {
            batch.upsert_node(&vuln("a", "A"))?;
            Err(StoreError::Serialization {
                message: "boom".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(store.node_count().unwrap(), 0);
    }

    #[test]
    fn clear_drops_graph_but_keeps_ledger() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&vuln("a", "A")).unwrap();
        store.clear().unwrap();
        assert_eq!(store.node_count().unwrap(), 0);
        assert!(store.search("a", 10).unwrap().is_empty());
        assert_eq!(store.ledger().unwrap().schema_version.as_deref(), Some(ledger::SCHEMA_VERSION));
    }
}
