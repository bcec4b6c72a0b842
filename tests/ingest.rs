//! Rebuild from an ingest document on disk.

use std::path::Path;

use kbgraph::error::{IngestError, KbError};
use kbgraph::graph::{KnowledgeGraph, RelationshipType};
use kbgraph::ingest::rebuild;
use kbgraph::node::NodeType;

const METADATA: &str = r#"{
    "version": "2.0.0",
    "entities": {
        "vulnerabilities": {
            "vuln_reentrancy": {
                "id": "vuln_reentrancy",
                "name": "Reentrancy",
                "severity": "CRITICAL",
                "historical_losses_usd": 60000000,
                "file_path": "knowledge-base-action/03-attack-prevention/reentrancy.md",
                "kb_type": "action"
            },
            "vuln_oracle": {
                "id": "vuln_oracle",
                "name": "Oracle Manipulation",
                "severity": "HIGH",
                "real_exploits": [ { "name": "bZx", "loss_usd": 8000000 } ]
            }
        },
        "vulnerable_contracts": {
            "vulnerable_reentrancy": {
                "name": "Reentrancy.sol",
                "file_path": "knowledge-base-research/repos/not-so-smart/reentrancy/Reentrancy.sol"
            }
        },
        "protocol_versions": {
            "protocol_uniswap_v2": { "name": "Uniswap V2", "version": "2", "type": "PROTOCOL_VERSION" },
            "protocol_uniswap_v3": { "name": "Uniswap V3", "version": "3", "type": "PROTOCOL_VERSION" }
        },
        "bogus": { "x": { "name": "Bogus" } }
    },
    "relationships": [
        { "source": "protocol_uniswap_v3", "target": "protocol_uniswap_v2", "type": "SUPERSEDES",
          "properties": { "date": "2021-05-05" } },
        { "source": "vulnerable_reentrancy", "target": "vuln_reentrancy", "type": "DEMONSTRATES",
          "properties": { "exploit_name": "The DAO", "loss_usd": 60000000 } },
        { "source": "source_consensys", "target": "topic_reentrancy", "type": "PROVIDES_PERSPECTIVE" }
    ]
}"#;

fn write_metadata(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("complete-metadata.json");
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn rebuild_loads_and_reports() {
    let dir = tempfile::TempDir::new().unwrap();
    let ingest = write_metadata(dir.path(), METADATA);
    let graph = KnowledgeGraph::open(&dir.path().join("graph.redb")).unwrap();

    let report = rebuild(&graph, &ingest, false).unwrap();
    assert_eq!(report.nodes_loaded, 5);
    assert_eq!(report.edges_loaded, 2);
    assert_eq!(report.rejected.len(), 2);
    assert_eq!(report.version.unwrap().to_string(), "1.1.0");

    let stats = graph.statistics().unwrap();
    assert_eq!(stats.total_nodes, 5);
    assert_eq!(stats.nodes_by_type[&NodeType::ProtocolVersion], 2);
    assert_eq!(stats.edges_by_type[&RelationshipType::Supersedes], 1);
    assert!(stats.last_rebuild.is_some());
    assert_eq!(stats.kb_files_count, Some(2));

    // type closure: the unknown category produced nothing
    for t in NodeType::ALL {
        assert!(graph.find_by_type(t).unwrap().iter().all(|n| n.name != "Bogus"));
    }
}

#[test]
fn vulnerability_finder_uses_loss_views() {
    let dir = tempfile::TempDir::new().unwrap();
    let ingest = write_metadata(dir.path(), METADATA);
    let graph = KnowledgeGraph::open(&dir.path().join("graph.redb")).unwrap();
    rebuild(&graph, &ingest, false).unwrap();

    let all: Vec<String> = graph
        .find_vulnerabilities(None, None)
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(all, vec!["vuln_reentrancy", "vuln_oracle"]);

    let big = graph.find_vulnerabilities(None, Some(10_000_000.0)).unwrap();
    assert_eq!(big.len(), 1);
    assert_eq!(big[0].id, "vuln_reentrancy");

    let high = graph.find_vulnerabilities(Some("high"), None).unwrap();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].id, "vuln_oracle");
}

#[test]
fn rebuild_replaces_unless_kept() {
    let dir = tempfile::TempDir::new().unwrap();
    let graph = KnowledgeGraph::open(&dir.path().join("graph.redb")).unwrap();

    let first = write_metadata(dir.path(), METADATA);
    rebuild(&graph, &first, false).unwrap();

    let small = dir.path().join("small.json");
    std::fs::write(
        &small,
        r#"{ "entities": { "templates": { "template_vault": { "name": "Vault.sol" } } } }"#,
    )
    .unwrap();

    rebuild(&graph, &small, true).unwrap();
    assert_eq!(graph.statistics().unwrap().total_nodes, 6);

    let report = rebuild(&graph, &small, false).unwrap();
    assert_eq!(report.version.unwrap().to_string(), "1.3.0");
    let stats = graph.statistics().unwrap();
    assert_eq!(stats.total_nodes, 1);
    assert_eq!(stats.total_edges, 0);
    assert!(graph.search("reentrancy", 10).unwrap().is_empty());
}

#[test]
fn missing_ingest_file_is_fatal_and_leaves_graph_alone() {
    let dir = tempfile::TempDir::new().unwrap();
    let ingest = write_metadata(dir.path(), METADATA);
    let graph = KnowledgeGraph::open(&dir.path().join("graph.redb")).unwrap();
    rebuild(&graph, &ingest, false).unwrap();

    let err = rebuild(&graph, &dir.path().join("nope.json"), false).unwrap_err();
    assert!(matches!(err, KbError::Ingest(IngestError::NotFound { .. })));
    assert_eq!(graph.statistics().unwrap().total_nodes, 5);
    assert_eq!(graph.version().unwrap().to_string(), "1.1.0");
}

#[test]
fn malformed_ingest_file_is_fatal() {
    let dir = tempfile::TempDir::new().unwrap();
    let ingest = write_metadata(dir.path(), "{ \"entities\": [");
    let graph = KnowledgeGraph::open(&dir.path().join("graph.redb")).unwrap();

    let err = rebuild(&graph, &ingest, false).unwrap_err();
    assert!(matches!(err, KbError::Ingest(IngestError::Parse { .. })));
}

fn touch_future(path: &Path) {
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(3600);
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(later)
        .unwrap();
}

#[test]
fn staleness_tracks_the_file_last_rebuilt_from() {
    let dir = tempfile::TempDir::new().unwrap();
    let graph = KnowledgeGraph::open(&dir.path().join("graph.redb")).unwrap();

    let other = dir.path().join("other.json");
    std::fs::write(&other, METADATA).unwrap();
    rebuild(&graph, &other, false).unwrap();

    // the configured default exists and is newer, but was not the source
    let configured = write_metadata(dir.path(), METADATA);
    touch_future(&configured);

    let ledger = graph.ledger().unwrap();
    assert_eq!(
        ledger.ingest_path.as_deref().map(Path::new),
        Some(std::fs::canonicalize(&other).unwrap().as_path())
    );
    assert!(!ledger.is_stale_on_disk(&configured));

    touch_future(&other);
    assert!(graph.ledger().unwrap().is_stale_on_disk(&configured));
}
