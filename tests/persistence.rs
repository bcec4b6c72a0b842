//! Persistence and recovery tests for the on-disk graph store.
//!
//! These tests verify that nodes, edges, the search index and the ledger
//! survive a reopen, and that damaged or busy store files fail cleanly.

use kbgraph::error::StoreError;
use kbgraph::graph::{Direction, Edge, EdgeInsertion, KnowledgeGraph, RelationshipType};
use kbgraph::node::{Node, NodeType, SourceCollection};
use kbgraph::payload::Payload;
use kbgraph::store::ledger::Bump;

fn vuln(id: &str, name: &str) -> Node {
    Node::new(id, NodeType::Vulnerability, name, SourceCollection::Action)
}

#[test]
fn graph_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("graph.redb");

    // First session: write nodes, an edge, bump the version.
    {
        let graph = KnowledgeGraph::open(&path).unwrap();
        graph
            .upsert_node(
                &vuln("vuln_reentrancy", "Reentrancy")
                    .with_payload(Payload::new().with("severity", "CRITICAL")),
            )
            .unwrap();
        graph
            .upsert_node(&Node::new(
                "vulnerable_reentrancy",
                NodeType::VulnerableContract,
                "Reentrancy.sol",
                SourceCollection::Research,
            ))
            .unwrap();
        let inserted = graph
            .add_edge_if_absent(
                &Edge::new(
                    "vulnerable_reentrancy",
                    "vuln_reentrancy",
                    RelationshipType::Demonstrates,
                )
                .with_properties(Payload::new().with("exploit_name", "The DAO")),
            )
            .unwrap();
        assert!(inserted.is_inserted());
        graph.bump_version(Bump::Minor).unwrap();
    }

    // Second session: reopen and verify.
    {
        let graph = KnowledgeGraph::open(&path).unwrap();
        let stats = graph.statistics().unwrap();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_edges, 1);
        assert_eq!(stats.version.to_string(), "1.1.0");

        let node = graph.get_node("vuln_reentrancy").unwrap().unwrap();
        assert_eq!(node.payload.str_field("severity"), Some("CRITICAL"));

        let edge = graph
            .store()
            .get_edge("vulnerable_reentrancy", "vuln_reentrancy", RelationshipType::Demonstrates)
            .unwrap()
            .unwrap();
        assert_eq!(edge.properties.str_field("exploit_name"), Some("The DAO"));
        assert!(graph.store().contains_node("vulnerable_reentrancy").unwrap());
        assert!(!graph.store().contains_node("vuln_missing").unwrap());

        let neighbors = graph.neighbors("vuln_reentrancy", None).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].direction, Direction::Incoming);

        let hits = graph.search("reentrancy", 10).unwrap();
        assert_eq!(hits[0].node.id, "vuln_reentrancy");

        // Idempotence holds across sessions too.
        let again = graph
            .add_edge_if_absent(&Edge::new(
                "vulnerable_reentrancy",
                "vuln_reentrancy",
                RelationshipType::Demonstrates,
            ))
            .unwrap();
        assert_eq!(again, EdgeInsertion::Duplicate);
    }
}

#[test]
fn garbage_file_is_reported_corrupt() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("graph.redb");
    std::fs::write(&path, vec![0xAB_u8; 8192]).unwrap();

    let err = KnowledgeGraph::open(&path).unwrap_err();
    assert!(
        matches!(err, StoreError::Corrupt { .. }),
        "expected Corrupt, got {err:?}"
    );
}

#[test]
fn second_handle_is_locked() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("graph.redb");

    let _first = KnowledgeGraph::open(&path).unwrap();
    let err = KnowledgeGraph::open(&path).unwrap_err();
    assert!(
        matches!(err, StoreError::Locked { .. }),
        "expected Locked, got {err:?}"
    );
}

#[test]
fn missing_data_dir_is_created() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested/data/graph.redb");

    let graph = KnowledgeGraph::open(&path).unwrap();
    assert_eq!(graph.statistics().unwrap().total_nodes, 0);
    assert!(path.exists());
}
