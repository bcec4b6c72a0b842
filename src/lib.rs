// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kbgraph
//!
//! A queryable knowledge graph over a security documentation corpus, with a
//! heuristic engine that infers relationships between documents.
//!
//! ## Architecture
//!
//! - **Nodes and payloads** (`node`, `payload`): typed, document-backed entities
//!   with an open attribute map and typed per-type views
//! - **Store** (`store`): redb tables for nodes, edges (with a reverse index),
//!   a persistent inverted search index, and a metadata ledger
//! - **Graph** (`graph`): the query façade, read-only `GraphRead` trait, export
//! - **Ingest** (`ingest`): loads the metadata JSON with skip-and-report semantics
//! - **Inference** (`infer`): idempotent passes that propose edges from keyword
//!   and name overlap, driven by data tables
//!
//! ## Library usage
//!
//! ```no_run
//! use kbgraph::graph::KnowledgeGraph;
//! use kbgraph::node::{Node, NodeType, SourceCollection};
//!
//! let graph = KnowledgeGraph::in_memory().unwrap();
//! graph
//!     .upsert_node(&Node::new(
//!         "vuln_reentrancy",
//!         NodeType::Vulnerability,
//!         "Reentrancy",
//!         SourceCollection::Action,
//!     ))
//!     .unwrap();
//! let hits = graph.search("reentrancy", 10).unwrap();
//! assert_eq!(hits[0].node.id, "vuln_reentrancy");
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod infer;
pub mod ingest;
pub mod node;
pub mod payload;
pub mod store;
