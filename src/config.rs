//! Configuration loaded from `kbgraph.toml`.
//!
//! Every key is optional. A missing file means defaults; a file that exists
//! but cannot be read or parsed is an error.
//!
//! ```toml
//! data_dir = ".kbgraph"
//! corpus_root = "docs"
//!
//! [inference]
//! similarity_threshold = 0.5
//! min_keyword_mentions = 2
//! enabled_passes = ["demonstrates", "explains"]
//!
//! [search]
//! default_limit = 10
//!
//! [[tables.prevention_markers]]
//! marker = "ReentrancyGuard"
//! category = "reentrancy"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::infer::PassKind;
use crate::infer::tables::InferenceTables;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "kbgraph.toml";

/// Name of the store file inside `data_dir`.
pub const STORE_FILE: &str = "graph.redb";

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Directory holding the store file.
    pub data_dir: PathBuf,
    /// Ingest JSON. Defaults to `<data_dir>/complete-metadata.json`.
    pub ingest_path: Option<PathBuf>,
    /// Base that relative node locations are resolved against.
    pub corpus_root: PathBuf,
    pub inference: InferenceConfig,
    pub search: SearchConfig,
    /// Keyword and marker tables for the inference passes.
    pub tables: InferenceTables,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".kbgraph"),
            ingest_path: None,
            corpus_root: PathBuf::from("."),
            inference: InferenceConfig::default(),
            search: SearchConfig::default(),
            tables: InferenceTables::default(),
        }
    }
}

/// Tunables for the inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// PairsWith fires when name similarity is strictly above this.
    pub similarity_threshold: f64,
    /// Explains fires when at least this many distinct keywords appear.
    pub min_keyword_mentions: usize,
    /// Passes to run, in order.
    pub enabled_passes: Vec<PassKind>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            min_keyword_mentions: 2,
            enabled_passes: PassKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_limit: 10 }
    }
}

impl GraphConfig {
    /// Load from `explicit`, or from `kbgraph.toml` in the working directory
    /// if it exists, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content, &path.display().to_string())?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse TOML text. `origin` names the source in error messages.
    pub fn from_toml(content: &str, origin: &str) -> ConfigResult<Self> {
        let parse_error = |message: String| ConfigError::Parse {
            path: origin.to_string(),
            message,
        };
        let config: Self = toml::from_str(content).map_err(|e| parse_error(e.to_string()))?;
        config.tables.validate().map_err(parse_error)?;
        Ok(config)
    }

    /// `<data_dir>/graph.redb`.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    pub fn ingest_path(&self) -> PathBuf {
        self.ingest_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("complete-metadata.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GraphConfig::default();
        assert_eq!(config.store_path(), PathBuf::from(".kbgraph/graph.redb"));
        assert_eq!(
            config.ingest_path(),
            PathBuf::from(".kbgraph/complete-metadata.json")
        );
        assert_eq!(config.inference.similarity_threshold, 0.5);
        assert_eq!(config.inference.min_keyword_mentions, 2);
        assert_eq!(config.inference.enabled_passes.len(), PassKind::ALL.len());
        assert_eq!(config.search.default_limit, 10);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = GraphConfig::from_toml(
            r#"
            corpus_root = "kb"

            [inference]
            min_keyword_mentions = 3
            enabled_passes = ["explains", "domain_tagging"]
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.corpus_root, PathBuf::from("kb"));
        assert_eq!(config.inference.min_keyword_mentions, 3);
        assert_eq!(config.inference.similarity_threshold, 0.5);
        assert_eq!(
            config.inference.enabled_passes,
            vec![PassKind::Explains, PassKind::DomainTagging]
        );
        assert_eq!(config.tables, InferenceTables::builtin());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = GraphConfig::from_toml("data_dir = [", "broken.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let err = GraphConfig::from_toml("[inference]\nenabled_passes = [\"bogus\"]", "x").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn explicit_missing_file_is_a_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = GraphConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn blank_table_entries_are_rejected() {
        let err = GraphConfig::from_toml(
            r#"
            [[tables.prevention_markers]]
            marker = "pragma"
            category = ""
            "#,
            "inline",
        )
        .unwrap_err();
        match err {
            ConfigError::Parse { message, .. } => assert!(message.contains("prevention_markers")),
            other => panic!("expected Parse, got {other:?}"),
        }

        let err = GraphConfig::from_toml(
            r#"
            [[tables.domains]]
            domain = "DeFi"
            keywords = ["swap", ""]
            "#,
            "inline",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn table_override_replaces_one_table() {
        let config = GraphConfig::from_toml(
            r#"
            [[tables.prevention_markers]]
            marker = "Guarded"
            category = "reentrancy"
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.tables.prevention_markers.len(), 1);
        assert_eq!(
            config.tables.vulnerability_keywords,
            InferenceTables::builtin().vulnerability_keywords
        );
    }
}
