//! Versioning and metadata ledger.
//!
//! A small key/value table inside the graph store that records the graph's
//! semantic version, the on-disk schema version, rebuild and enhance
//! timestamps, and the counts captured at those points. Every entry carries
//! the time it was last written.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::{GraphStore, StoreResult, WriteBatch, decode, encode, redb_err};
use crate::error::{GraphError, StoreError};

pub(super) const META: TableDefinition<&str, &[u8]> = TableDefinition::new("graph_metadata");

/// Layout version of the tables in this module's parent. Bumped when the
/// on-disk encoding changes incompatibly.
pub const SCHEMA_VERSION: &str = "1";

/// Well-known ledger keys.
pub mod keys {
    pub const VERSION: &str = "version";
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const LAST_REBUILD: &str = "last_rebuild";
    pub const LAST_ENHANCE: &str = "last_enhance";
    pub const NODE_COUNT: &str = "node_count";
    pub const EDGE_COUNT: &str = "edge_count";
    pub const KB_FILES_COUNT: &str = "kb_files_count";
    pub const INGEST_PATH: &str = "ingest_path";
}

/// One stored ledger value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// `major.minor.patch` version of the graph contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Default for GraphVersion {
    fn default() -> Self {
        Self {
            major: 1,
            minor: 0,
            patch: 0,
        }
    }
}

impl GraphVersion {
    /// The next version. Lower components reset to zero.
    pub fn bump(self, bump: Bump) -> Self {
        match bump {
            Bump::Major => Self {
                major: self.major + 1,
                minor: 0,
                patch: 0,
            },
            Bump::Minor => Self {
                minor: self.minor + 1,
                patch: 0,
                ..self
            },
            Bump::Patch => Self {
                patch: self.patch + 1,
                ..self
            },
        }
    }
}

impl std::fmt::Display for GraphVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for GraphVersion {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GraphError::InvalidVersion {
            value: s.to_string(),
        };
        let parts: Vec<u32> = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<_, _>>()?;
        match parts.as_slice() {
            [major, minor, patch] => Ok(Self {
                major: *major,
                minor: *minor,
                patch: *patch,
            }),
            _ => Err(invalid()),
        }
    }
}

/// Which version component to increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bump {
    Major,
    Minor,
    Patch,
}

impl FromStr for Bump {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Ok(Bump::Major),
            "minor" => Ok(Bump::Minor),
            "patch" => Ok(Bump::Patch),
            _ => Err(GraphError::InvalidType {
                kind: "version bump",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Bump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bump::Major => f.write_str("major"),
            Bump::Minor => f.write_str("minor"),
            Bump::Patch => f.write_str("patch"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger snapshot
// ---------------------------------------------------------------------------

/// Everything the ledger knows, read in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ledger {
    pub version: GraphVersion,
    pub schema_version: Option<String>,
    pub last_rebuild: Option<DateTime<Utc>>,
    pub last_enhance: Option<DateTime<Utc>>,
    pub node_count: Option<u64>,
    pub edge_count: Option<u64>,
    pub kb_files_count: Option<u64>,
    /// Ingest file the last rebuild read.
    pub ingest_path: Option<String>,
}

impl Ledger {
    /// Whether the graph needs a rebuild from an ingest file last modified
    /// at `ingest_modified`.
    ///
    /// A graph that was never rebuilt is always stale.
    pub fn is_stale(&self, ingest_modified: Option<DateTime<Utc>>) -> bool {
        match self.last_rebuild {
            None => true,
            Some(built) => ingest_modified.is_some_and(|modified| modified > built),
        }
    }

    /// [`Ledger::is_stale`] against the modification time of the ingest
    /// file the last rebuild read, or of `fallback` if none was recorded.
    /// A file that cannot be inspected counts as unmodified.
    pub fn is_stale_on_disk(&self, fallback: &Path) -> bool {
        let path = self.ingest_path.as_deref().map(Path::new).unwrap_or(fallback);
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        self.is_stale(modified)
    }
}

fn parse_entry<T: FromStr>(key: &str, entry: Option<&MetaEntry>) -> StoreResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    entry
        .map(|e| {
            e.value.parse::<T>().map_err(|err| StoreError::Corrupt {
                path: format!("graph_metadata/{key}"),
                message: err.to_string(),
            })
        })
        .transpose()
}

fn parse_time(key: &str, entry: Option<&MetaEntry>) -> StoreResult<Option<DateTime<Utc>>> {
    entry
        .map(|e| {
            DateTime::parse_from_rfc3339(&e.value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|err| StoreError::Corrupt {
                    path: format!("graph_metadata/{key}"),
                    message: err.to_string(),
                })
        })
        .transpose()
}

fn read_entry(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StoreResult<Option<MetaEntry>> {
    match table.get(key).map_err(redb_err("get"))? {
        Some(value) => decode(value.value(), || format!("graph_metadata/{key}")).map(Some),
        None => Ok(None),
    }
}

fn write_entry(txn: &WriteTransaction, key: &str, value: &str) -> StoreResult<()> {
    let entry = MetaEntry {
        value: value.to_string(),
        updated_at: Utc::now(),
    };
    let bytes = encode(&entry)?;
    let mut table = txn.open_table(META).map_err(redb_err("open_table"))?;
    table.insert(key, bytes.as_slice()).map_err(redb_err("insert"))?;
    Ok(())
}

/// Stamp a fresh store with the schema version, or reject a store written
/// with a different one.
pub(super) fn ensure_schema(txn: &WriteTransaction) -> StoreResult<()> {
    let found = {
        let table = txn.open_table(META).map_err(redb_err("open_table"))?;
        read_entry(&table, keys::SCHEMA_VERSION)?
    };
    match found {
        None => write_entry(txn, keys::SCHEMA_VERSION, SCHEMA_VERSION),
        Some(entry) if entry.value == SCHEMA_VERSION => Ok(()),
        Some(entry) => Err(StoreError::SchemaMismatch {
            found: entry.value,
            expected: SCHEMA_VERSION.to_string(),
        }),
    }
}

impl GraphStore {
    /// Raw ledger entry.
    pub fn meta(&self, key: &str) -> StoreResult<Option<MetaEntry>> {
        let txn = self.read()?;
        let table = txn.open_table(META).map_err(redb_err("open_table"))?;
        read_entry(&table, key)
    }

    /// Current graph version, `1.0.0` if none was recorded.
    pub fn version(&self) -> StoreResult<GraphVersion> {
        let entry = self.meta(keys::VERSION)?;
        Ok(parse_entry(keys::VERSION, entry.as_ref())?.unwrap_or_default())
    }

    /// Increment the version and return the new one.
    pub fn bump_version(&self, bump: Bump) -> StoreResult<GraphVersion> {
        self.write(|batch| batch.bump_version(bump))
    }

    /// Read every well-known ledger key.
    pub fn ledger(&self) -> StoreResult<Ledger> {
        let txn = self.read()?;
        let table = txn.open_table(META).map_err(redb_err("open_table"))?;
        let get = |key: &str| read_entry(&table, key);
        Ok(Ledger {
            version: parse_entry(keys::VERSION, get(keys::VERSION)?.as_ref())?.unwrap_or_default(),
            schema_version: get(keys::SCHEMA_VERSION)?.map(|e| e.value),
            last_rebuild: parse_time(keys::LAST_REBUILD, get(keys::LAST_REBUILD)?.as_ref())?,
            last_enhance: parse_time(keys::LAST_ENHANCE, get(keys::LAST_ENHANCE)?.as_ref())?,
            node_count: parse_entry(keys::NODE_COUNT, get(keys::NODE_COUNT)?.as_ref())?,
            edge_count: parse_entry(keys::EDGE_COUNT, get(keys::EDGE_COUNT)?.as_ref())?,
            kb_files_count: parse_entry(keys::KB_FILES_COUNT, get(keys::KB_FILES_COUNT)?.as_ref())?,
            ingest_path: get(keys::INGEST_PATH)?.map(|e| e.value),
        })
    }
}

impl WriteBatch<'_> {
    pub fn set_meta(&mut self, key: &str, value: &str) -> StoreResult<()> {
        write_entry(self.txn, key, value)
    }

    pub fn meta(&self, key: &str) -> StoreResult<Option<MetaEntry>> {
        let table = self.txn.open_table(META).map_err(redb_err("open_table"))?;
        read_entry(&table, key)
    }

    pub fn bump_version(&mut self, bump: Bump) -> StoreResult<GraphVersion> {
        let entry = self.meta(keys::VERSION)?;
        let current: GraphVersion = parse_entry(keys::VERSION, entry.as_ref())?.unwrap_or_default();
        let next = current.bump(bump);
        self.set_meta(keys::VERSION, &next.to_string())?;
        tracing::info!(from = %current, to = %next, %bump, "graph version bumped");
        Ok(next)
    }

    /// Snapshot node and edge counts into the ledger.
    pub fn record_counts(&mut self) -> StoreResult<()> {
        let nodes = self.node_count()?;
        let edges = self.edge_count()?;
        self.set_meta(keys::NODE_COUNT, &nodes.to_string())?;
        self.set_meta(keys::EDGE_COUNT, &edges.to_string())
    }

    /// Mark a completed rebuild from `kb_files` ingest records.
    pub fn record_rebuild(&mut self, ingest_path: &Path, kb_files: u64) -> StoreResult<()> {
        self.set_meta(keys::LAST_REBUILD, &Utc::now().to_rfc3339())?;
        self.set_meta(keys::INGEST_PATH, &ingest_path.display().to_string())?;
        self.set_meta(keys::KB_FILES_COUNT, &kb_files.to_string())?;
        self.record_counts()
    }

    /// Mark a completed inference run.
    pub fn record_enhance(&mut self) -> StoreResult<()> {
        self.set_meta(keys::LAST_ENHANCE, &Utc::now().to_rfc3339())?;
        self.record_counts()
    }
}
