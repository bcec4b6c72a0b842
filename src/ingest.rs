//! Loader for the ingest JSON document.
//!
//! The document groups entity records by category and lists relationships:
//!
//! ```json
//! {
//!   "entities": {
//!     "vulnerabilities": { "vuln_reentrancy": { "name": "Reentrancy", "severity": "CRITICAL" } },
//!     "vulnerable_contracts": [ { "id": "vulnerable_reentrancy", "name": "Reentrancy.sol" } ]
//!   },
//!   "relationships": [
//!     { "source": "vulnerable_reentrancy", "target": "vuln_reentrancy", "type": "DEMONSTRATES" }
//!   ]
//! }
//! ```
//!
//! A missing or malformed document is fatal. Problems with single records
//! (unknown category, missing name, bad relationship type, dangling
//! endpoint) skip that record and land in the [`IngestReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphError, IngestError, KbResult};
use crate::graph::{Edge, EdgeInsertion, KnowledgeGraph, RelationshipType};
use crate::node::{Node, NodeType, SourceCollection, slug_id};
use crate::payload::Payload;
use crate::store::ledger::{Bump, GraphVersion};
use crate::store::{StoreResult, WriteBatch};

/// Result type for ingest parsing.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// An entity category of the ingest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub key: &'static str,
    pub node_type: NodeType,
    pub collection: SourceCollection,
    /// Prefix for ids derived from a record's name.
    pub id_prefix: &'static str,
}

/// Every recognized category.
pub const CATEGORIES: [Category; 8] = [
    Category {
        key: "vulnerabilities",
        node_type: NodeType::Vulnerability,
        collection: SourceCollection::Action,
        id_prefix: "vuln",
    },
    Category {
        key: "templates",
        node_type: NodeType::Template,
        collection: SourceCollection::Action,
        id_prefix: "template",
    },
    Category {
        key: "patterns",
        node_type: NodeType::Pattern,
        collection: SourceCollection::Action,
        id_prefix: "pattern",
    },
    Category {
        key: "deepdives",
        node_type: NodeType::DeepDive,
        collection: SourceCollection::Research,
        id_prefix: "deepdive",
    },
    Category {
        key: "integrations",
        node_type: NodeType::Integration,
        collection: SourceCollection::Research,
        id_prefix: "integration",
    },
    Category {
        key: "vulnerable_contracts",
        node_type: NodeType::VulnerableContract,
        collection: SourceCollection::Research,
        id_prefix: "vulnerable",
    },
    Category {
        key: "protocol_versions",
        node_type: NodeType::ProtocolVersion,
        collection: SourceCollection::Research,
        id_prefix: "protocol",
    },
    Category {
        key: "source_repositories",
        node_type: NodeType::SourceRepository,
        collection: SourceCollection::Research,
        id_prefix: "source",
    },
];

impl Category {
    pub fn lookup(key: &str) -> Result<Category, GraphError> {
        CATEGORIES
            .into_iter()
            .find(|c| c.key == key)
            .ok_or_else(|| GraphError::InvalidType {
                kind: "entity category",
                value: key.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Records of one category: keyed by id, or a plain list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CategoryRecords {
    Keyed(Map<String, Value>),
    Listed(Vec<Value>),
}

#[derive(Debug, Clone, Deserialize)]
struct RawRelationship {
    source: String,
    target: String,
    #[serde(rename = "type")]
    relationship_type: String,
    #[serde(default)]
    properties: Map<String, Value>,
}

/// A parsed ingest document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestDocument {
    #[serde(default)]
    entities: BTreeMap<String, CategoryRecords>,
    #[serde(default)]
    relationships: Vec<Value>,
    #[serde(default)]
    statistics: Map<String, Value>,
}

/// A record that was skipped, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    /// `category/id` for entities, `source -TYPE-> target` for relationships.
    pub record: String,
    pub reason: String,
}

/// Outcome of loading a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub nodes_loaded: u64,
    pub edges_loaded: u64,
    pub duplicate_edges: u64,
    pub rejected: Vec<RejectedRecord>,
    /// Documents in the corpus: `statistics.total_files` when the document
    /// declares it, else the number of distinct node locations.
    pub kb_files: u64,
    /// Version after the rebuild.
    pub version: Option<GraphVersion>,
}

impl IngestReport {
    fn reject(&mut self, record: String, reason: impl std::fmt::Display) {
        let reason = reason.to_string();
        tracing::warn!(%record, %reason, "skipping ingest record");
        self.rejected.push(RejectedRecord { record, reason });
    }
}

impl IngestDocument {
    /// Read and parse the document at `path`.
    pub fn from_file(path: &Path) -> IngestResult<Self> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IngestError::NotFound {
                path: display.clone(),
            },
            _ => IngestError::Parse {
                path: display.clone(),
                message: e.to_string(),
            },
        })?;
        Self::from_json(&content, &display)
    }

    /// Parse document text. `origin` names the source in error messages.
    pub fn from_json(content: &str, origin: &str) -> IngestResult<Self> {
        serde_json::from_str(content).map_err(|e| IngestError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Entity record count across all categories.
    pub fn entity_count(&self) -> usize {
        self.entities
            .values()
            .map(|records| match records {
                CategoryRecords::Keyed(map) => map.len(),
                CategoryRecords::Listed(list) => list.len(),
            })
            .sum()
    }

    /// Turn entity records into nodes, collecting rejections.
    pub fn nodes(&self, report: &mut IngestReport) -> Vec<Node> {
        let mut nodes = Vec::new();
        for (key, records) in &self.entities {
            let category = match Category::lookup(key) {
                Ok(c) => c,
                Err(e) => {
                    report.reject(key.clone(), e);
                    continue;
                }
            };
            let entries: Vec<(Option<&str>, &Value)> = match records {
                CategoryRecords::Keyed(map) => {
                    map.iter().map(|(id, attrs)| (Some(id.as_str()), attrs)).collect()
                }
                CategoryRecords::Listed(list) => list.iter().map(|attrs| (None, attrs)).collect(),
            };
            for (position, (id, attrs)) in entries.into_iter().enumerate() {
                match node_from_record(category, id, attrs) {
                    Ok(node) => nodes.push(node),
                    Err(reason) => {
                        let label = id
                            .map(str::to_string)
                            .or_else(|| attrs.get("id").and_then(Value::as_str).map(str::to_string))
                            .unwrap_or_else(|| format!("#{position}"));
                        report.reject(format!("{key}/{label}"), reason);
                    }
                }
            }
        }
        nodes
    }

    /// Turn relationship records into edges, collecting rejections.
    pub fn edges(&self, report: &mut IngestReport) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (position, value) in self.relationships.iter().enumerate() {
            let raw: RawRelationship = match serde_json::from_value(value.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    report.reject(format!("relationships/#{position}"), e);
                    continue;
                }
            };
            let label = format!("{} -{}-> {}", raw.source, raw.relationship_type, raw.target);
            match raw.relationship_type.parse::<RelationshipType>() {
                Ok(rel) => edges.push(
                    Edge::new(raw.source, raw.target, rel)
                        .with_properties(Payload::from(raw.properties)),
                ),
                Err(e) => report.reject(label, e),
            }
        }
        edges
    }

    fn declared_files(&self) -> Option<u64> {
        self.statistics.get("total_files").and_then(Value::as_u64)
    }

    /// Write every valid record into `batch`. Nodes go in first so that
    /// relationships between records of the same document resolve.
    pub fn load(&self, batch: &mut WriteBatch<'_>) -> StoreResult<IngestReport> {
        let mut report = IngestReport::default();
        let nodes = self.nodes(&mut report);
        let edges = self.edges(&mut report);

        let mut locations = BTreeSet::new();
        for node in &nodes {
            batch.upsert_node(node)?;
            if let Some(location) = &node.location {
                locations.insert(location.as_str());
            }
            report.nodes_loaded += 1;
        }

        for edge in &edges {
            match batch.add_edge_if_absent(edge)? {
                EdgeInsertion::Inserted => report.edges_loaded += 1,
                EdgeInsertion::Duplicate => report.duplicate_edges += 1,
                EdgeInsertion::Dangling { missing } => report.reject(
                    format!(
                        "{} -{}-> {}",
                        edge.source_id, edge.relationship_type, edge.target_id
                    ),
                    format!("dangling reference to missing node(s): {}", missing.join(", ")),
                ),
            }
        }

        report.kb_files = self
            .declared_files()
            .unwrap_or(locations.len() as u64);
        Ok(report)
    }
}

/// Build a node from one entity record.
///
/// `kb_source` or `kb_type`, when they name a collection, override the
/// category's collection. `file_path` or `location` becomes the location.
fn node_from_record(category: Category, key: Option<&str>, attrs: &Value) -> KbResult<Node> {
    let Some(object) = attrs.as_object() else {
        return Err(IngestError::Parse {
            path: category.key.to_string(),
            message: "entity record is not a JSON object".into(),
        }
        .into());
    };
    let text = |field: &str| {
        object
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let fallback_id = key
        .map(str::to_string)
        .or_else(|| text("id").map(str::to_string))
        .unwrap_or_else(|| "?".to_string());
    let Some(name) = text("name") else {
        return Err(IngestError::MissingField {
            category: category.key.to_string(),
            id: fallback_id,
            field: "name",
        }
        .into());
    };
    let id = match key.or_else(|| text("id")) {
        Some(id) => id.to_string(),
        None => slug_id(category.id_prefix, name),
    };

    let collection = match text("kb_source").or_else(|| text("kb_type")) {
        Some(declared) => declared.parse::<SourceCollection>()?,
        None => category.collection,
    };

    let mut node = Node::new(id, category.node_type, name, collection)
        .with_payload(Payload::from(object.clone()));
    if let Some(location) = text("file_path").or_else(|| text("location")) {
        node = node.with_location(location);
    }
    Ok(node)
}

/// Reload the graph from the ingest document at `path`.
///
/// Clears nodes, edges and the search index first unless `keep_existing`.
/// The whole load is one write batch: a fatal store error leaves the
/// previous graph untouched. Bumps the minor version.
pub fn rebuild(graph: &KnowledgeGraph, path: &Path, keep_existing: bool) -> KbResult<IngestReport> {
    let document = IngestDocument::from_file(path)?;
    tracing::info!(
        path = %path.display(),
        entities = document.entity_count(),
        relationships = document.relationships.len(),
        keep_existing,
        "rebuilding graph"
    );

    let source = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let report = graph.write(|batch| {
        if !keep_existing {
            batch.clear()?;
        }
        let mut report = document.load(batch)?;
        batch.record_rebuild(&source, report.kb_files)?;
        report.version = Some(batch.bump_version(Bump::Minor)?);
        Ok(report)
    })?;

    tracing::info!(
        nodes = report.nodes_loaded,
        edges = report.edges_loaded,
        duplicates = report.duplicate_edges,
        rejected = report.rejected.len(),
        "rebuild finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "entities": {
            "vulnerabilities": {
                "vuln_reentrancy": {
                    "name": "Reentrancy",
                    "severity": "CRITICAL",
                    "file_path": "action/reentrancy.md",
                    "kb_type": "action"
                },
                "vuln_nameless": { "severity": "LOW" }
            },
            "vulnerable_contracts": [
                { "id": "vulnerable_reentrancy", "name": "Reentrancy.sol" },
                { "name": "Unprotected Function.sol", "location": "research/unprotected.sol" }
            ],
            "spaceships": { "x": { "name": "X" } }
        },
        "relationships": [
            { "source": "vulnerable_reentrancy", "target": "vuln_reentrancy", "type": "DEMONSTRATES",
              "properties": { "exploit_name": "The DAO" } },
            { "source": "vulnerable_reentrancy", "target": "vuln_reentrancy", "type": "DEMONSTRATES" },
            { "source": "vuln_reentrancy", "target": "topic_reentrancy", "type": "REFERENCES" },
            { "source": "vuln_reentrancy", "target": "vulnerable_reentrancy", "type": "TELEPORTS" },
            { "source": "vuln_reentrancy" }
        ]
    }"#;

    fn load(doc: &str) -> (KnowledgeGraph, IngestReport) {
        let g = KnowledgeGraph::in_memory().unwrap();
        let document = IngestDocument::from_json(doc, "test").unwrap();
        let report = g.write(|batch| document.load(batch)).unwrap();
        (g, report)
    }

    #[test]
    fn valid_records_load_and_bad_ones_are_reported() {
        let (g, report) = load(DOC);
        assert_eq!(report.nodes_loaded, 3);
        assert_eq!(report.edges_loaded, 1);
        assert_eq!(report.duplicate_edges, 1);

        let rejected: Vec<&str> = report.rejected.iter().map(|r| r.record.as_str()).collect();
        assert!(rejected.contains(&"spaceships"));
        assert!(rejected.contains(&"vulnerabilities/vuln_nameless"));
        assert!(rejected.contains(&"vuln_reentrancy -REFERENCES-> topic_reentrancy"));
        assert!(rejected.contains(&"vuln_reentrancy -TELEPORTS-> vulnerable_reentrancy"));
        assert!(rejected.contains(&"relationships/#4"));
        assert_eq!(report.rejected.len(), 5);

        assert_eq!(g.store().edge_count().unwrap(), 1);
        assert_eq!(report.kb_files, 2);
    }

    #[test]
    fn record_fields_map_onto_node() {
        let (g, _) = load(DOC);
        let vuln = g.get_node("vuln_reentrancy").unwrap().unwrap();
        assert_eq!(vuln.node_type, NodeType::Vulnerability);
        assert_eq!(vuln.source_collection, SourceCollection::Action);
        assert_eq!(vuln.location.as_deref(), Some("action/reentrancy.md"));
        assert_eq!(vuln.payload.str_field("severity"), Some("CRITICAL"));

        let derived = g
            .get_node("vulnerable_unprotected_function_sol")
            .unwrap()
            .unwrap();
        assert_eq!(derived.source_collection, SourceCollection::Research);
        assert_eq!(derived.location.as_deref(), Some("research/unprotected.sol"));
    }

    #[test]
    fn unknown_collection_override_is_rejected() {
        let (g, report) = load(
            r#"{ "entities": { "templates": { "t": { "name": "Vault.sol", "kb_source": "attic" } } } }"#,
        );
        assert_eq!(report.nodes_loaded, 0);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].reason.contains("attic"));
        assert!(g.get_node("t").unwrap().is_none());
    }

    #[test]
    fn declared_file_count_wins() {
        let (_, report) = load(r#"{ "entities": {}, "statistics": { "total_files": 284 } }"#);
        assert_eq!(report.kb_files, 284);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            IngestDocument::from_json("{ not json", "bad.json"),
            Err(IngestError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = IngestDocument::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, IngestError::NotFound { .. }));
    }
}
