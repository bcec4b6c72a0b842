//! Runs the enabled passes and applies their proposals.

use std::collections::BTreeSet;
use std::path::PathBuf;

use super::passes::build;
use super::tables::InferenceTables;
use super::{EnhanceReport, InferResult, InferencePass, PassKind, PassReport, Proposal, Snapshot};
use crate::config::{GraphConfig, InferenceConfig};
use crate::graph::{EdgeInsertion, KnowledgeGraph};
use crate::store::StoreResult;
use crate::store::ledger::Bump;

/// Parse pass names as given on the command line.
pub fn parse_passes<S: AsRef<str>>(names: &[S]) -> InferResult<Vec<PassKind>> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// The relationship inference engine.
///
/// Holds configuration only; the graph is passed to [`run`](Self::run).
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    config: InferenceConfig,
    tables: InferenceTables,
    corpus_root: PathBuf,
}

impl InferenceEngine {
    pub fn new(config: InferenceConfig, tables: InferenceTables, corpus_root: PathBuf) -> Self {
        Self {
            config,
            tables,
            corpus_root,
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(
            config.inference.clone(),
            config.tables.clone(),
            config.corpus_root.clone(),
        )
    }

    /// Restrict the run to `passes`.
    pub fn with_passes(mut self, passes: Vec<PassKind>) -> Self {
        self.config.enabled_passes = passes;
        self
    }

    /// Enabled passes, deduplicated, in configured order.
    pub fn passes(&self) -> Vec<Box<dyn InferencePass>> {
        let mut seen = BTreeSet::new();
        self.config
            .enabled_passes
            .iter()
            .filter(|k| seen.insert(**k))
            .map(|k| build(*k, &self.config, &self.tables))
            .collect()
    }

    /// Run every enabled pass against `graph` and apply the results.
    ///
    /// All proposals are computed from one snapshot and applied in one
    /// write batch. Edges go through the idempotent insert, annotations are
    /// written only when they change a value, so a second run on an
    /// unchanged graph reports zero additions. A run that changes the graph
    /// bumps the patch version.
    pub fn run(&self, graph: &KnowledgeGraph) -> StoreResult<EnhanceReport> {
        let passes = self.passes();
        let document_types = passes
            .iter()
            .flat_map(|p| p.documents().iter().copied())
            .collect();
        let snapshot = Snapshot::capture(graph, &self.corpus_root, &document_types)?;

        let proposals: Vec<(PassKind, Vec<Proposal>)> = passes
            .iter()
            .map(|p| {
                let proposed = p.propose(&snapshot);
                tracing::debug!(pass = %p.kind(), proposed = proposed.len(), "pass finished");
                (p.kind(), proposed)
            })
            .collect();

        let mut report = EnhanceReport {
            added_by_type: passes
                .iter()
                .filter_map(|p| p.kind().produces())
                .map(|r| (r, 0))
                .collect(),
            skipped: snapshot.skipped().to_vec(),
            ..EnhanceReport::default()
        };

        graph.write(|batch| {
            report.edges_before = batch.edge_count()?;

            for (kind, proposed) in &proposals {
                let mut pass_report = PassReport {
                    proposed: proposed.len(),
                    ..PassReport::default()
                };
                for proposal in proposed {
                    match proposal {
                        Proposal::Edge(edge) => match batch.add_edge_if_absent(edge)? {
                            EdgeInsertion::Inserted => {
                                pass_report.added += 1;
                                *report.added_by_type.entry(edge.relationship_type).or_insert(0) += 1;
                            }
                            EdgeInsertion::Duplicate => pass_report.duplicates += 1,
                            EdgeInsertion::Dangling { missing } => {
                                tracing::warn!(pass = %kind, ?missing, "proposal references missing node");
                            }
                        },
                        Proposal::Annotate {
                            node_id,
                            key,
                            value,
                        } => {
                            let Some(mut node) = batch.get_node(node_id)? else {
                                continue;
                            };
                            if node.payload.get(key) == Some(value) {
                                continue;
                            }
                            node.payload.insert(key.clone(), value.clone());
                            batch.upsert_node(&node)?;
                            pass_report.annotated += 1;
                            report.nodes_tagged += 1;
                        }
                    }
                }
                report.passes.insert(*kind, pass_report);
            }

            report.edges_after = batch.edge_count()?;
            if report.changed() {
                report.version = Some(batch.bump_version(Bump::Patch)?);
            }
            batch.record_enhance()
        })?;

        tracing::info!(
            edges_before = report.edges_before,
            edges_added = report.edges_added(),
            nodes_tagged = report.nodes_tagged,
            skipped = report.skipped.len(),
            "enhance finished"
        );
        Ok(report)
    }
}
