//! Rich diagnostic error types for kbgraph.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Per-record problems during bulk ingest
//! or inference are recovered locally and reported; only store-level failures
//! (corruption, schema mismatch, lock contention) are fatal.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for kbgraph.
#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience result alias for top-level operations.
pub type KbResult<T> = std::result::Result<T, KbError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(kbgraph::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb error: {message}")]
    #[diagnostic(
        code(kbgraph::store::redb),
        help("The embedded database reported an error while running a transaction.")
    )]
    Redb { message: String },

    #[error("graph store is corrupt at {path}: {message}")]
    #[diagnostic(
        code(kbgraph::store::corrupt),
        help(
            "The store file could not be read as a kbgraph database. \
             Move it aside and run `kbgraph rebuild` to recreate it from the ingest JSON."
        )
    )]
    Corrupt { path: String, message: String },

    #[error("graph store at {path} is already open in another process")]
    #[diagnostic(
        code(kbgraph::store::locked),
        help("Only one process may write to the store at a time. Wait for the other run to finish.")
    )]
    Locked { path: String },

    #[error("store schema version {found} does not match expected {expected}")]
    #[diagnostic(
        code(kbgraph::store::schema_mismatch),
        help("The store was written by an incompatible kbgraph build. Run `kbgraph rebuild`.")
    )]
    SchemaMismatch { found: String, expected: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(kbgraph::store::serialization),
        help("A stored record could not be encoded or decoded as JSON.")
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Graph model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("invalid {kind}: \"{value}\"")]
    #[diagnostic(
        code(kbgraph::graph::invalid_type),
        help(
            "Node types are Vulnerability, Template, DeepDive, Integration, VulnerableContract, \
             ProtocolVersion, SourceRepository, Pattern. Relationship types are DEMONSTRATES, \
             PAIRS_WITH, PREVENTS, EXPLAINS, USES, RELATES_TO, SUPERSEDES, \
             PROVIDES_PERSPECTIVE, REFERENCES. Source collections are action and research."
        )
    )]
    InvalidType { kind: &'static str, value: String },

    #[error("invalid graph version: \"{value}\"")]
    #[diagnostic(
        code(kbgraph::graph::invalid_version),
        help("Versions use major.minor.patch numbering, e.g. 1.4.2.")
    )]
    InvalidVersion { value: String },

    #[error("invalid payload filter: {message}")]
    #[diagnostic(
        code(kbgraph::graph::invalid_filter),
        help("Filters look like `field=value`, `field>=number` or `field<=number`.")
    )]
    InvalidFilter { message: String },
}

// ---------------------------------------------------------------------------
// Ingest errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("ingest file not found: {path}")]
    #[diagnostic(
        code(kbgraph::ingest::not_found),
        help("Pass the metadata JSON with --ingest, or set `ingest_path` in kbgraph.toml.")
    )]
    NotFound { path: String },

    #[error("failed to parse ingest file {path}: {message}")]
    #[diagnostic(
        code(kbgraph::ingest::parse),
        help(
            "The ingest document must be a JSON object with an `entities` map \
             (category -> id -> attributes) and a `relationships` list."
        )
    )]
    Parse { path: String, message: String },

    #[error("record \"{id}\" in category {category} is missing required field `{field}`")]
    #[diagnostic(
        code(kbgraph::ingest::missing_field),
        help("The record was skipped. Every entity needs at least a `name`.")
    )]
    MissingField {
        category: String,
        id: String,
        field: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Inference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InferError {
    #[error("cannot read backing document for \"{node_id}\" at {path}: {message}")]
    #[diagnostic(
        code(kbgraph::infer::unreadable_document),
        help(
            "The node was skipped by passes that scan document text. Check `corpus_root` \
             and the node's location."
        )
    )]
    UnreadableDocument {
        node_id: String,
        path: String,
        message: String,
    },

    #[error("unknown inference pass: \"{name}\"")]
    #[diagnostic(
        code(kbgraph::infer::unknown_pass),
        help(
            "Known passes: demonstrates, pairs_with, prevents, explains, uses, \
             relates_to, domain_tagging."
        )
    )]
    UnknownPass { name: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    #[diagnostic(
        code(kbgraph::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(kbgraph::config::parse),
        help("kbgraph.toml must be valid TOML, and [tables] entries must not be empty. See DESIGN.md for the recognized keys.")
    )]
    Parse { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_wraps_transparently() {
        let err: KbError = StoreError::Locked {
            path: "/tmp/graph.redb".into(),
        }
        .into();
        assert!(err.to_string().contains("already open"));
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("kbgraph::store::locked"));
    }

    #[test]
    fn invalid_type_message_names_value() {
        let err = GraphError::InvalidType {
            kind: "node type",
            value: "Bogus".into(),
        };
        assert_eq!(err.to_string(), "invalid node type: \"Bogus\"");
    }
}
