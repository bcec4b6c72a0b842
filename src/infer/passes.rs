//! The seven inference passes.
//!
//! Every pass compares names, locations or document text against the
//! tables in [`super::tables`] and emits [`Proposal`]s. Edges proposed by a
//! pass carry `auto_detected = true` in their properties.

use std::collections::BTreeSet;

use serde_json::{Value, json};

use super::tables::{InferenceTables, PreventionMarker};
use super::{INFERRED_DOMAIN_KEY, InferencePass, PassKind, Proposal, Snapshot};
use crate::config::InferenceConfig;
use crate::graph::{Edge, RelationshipType};
use crate::node::{Node, NodeType, normalize_name};
use crate::payload::{NodeView, Payload};

/// Jaccard similarity of the word sets of two names.
///
/// Words are the lowercased name split on whitespace only, so
/// `uniswap_v3` and `curve-finance` are single words. Symmetric. Identical
/// non-empty names score 1.0; an empty name scores 0.0 against anything.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words = |name: &str| -> BTreeSet<String> {
        name.to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    };
    let (left, right) = (words(a), words(b));
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union as f64
}

/// Build the pass for `kind` from configuration and tables.
pub fn build(
    kind: PassKind,
    config: &InferenceConfig,
    tables: &InferenceTables,
) -> Box<dyn InferencePass> {
    match kind {
        PassKind::Demonstrates => Box::new(Demonstrates),
        PassKind::PairsWith => Box::new(PairsWith {
            threshold: config.similarity_threshold,
        }),
        PassKind::Prevents => Box::new(Prevents {
            markers: tables.prevention_markers.clone(),
        }),
        PassKind::Explains => Box::new(Explains {
            tables: tables.clone(),
            min_mentions: config.min_keyword_mentions,
        }),
        PassKind::Uses => Box::new(Uses {
            tables: tables.clone(),
        }),
        PassKind::RelatesTo => Box::new(RelatesTo {
            tables: tables.clone(),
        }),
        PassKind::DomainTagging => Box::new(DomainTagging {
            tables: tables.clone(),
        }),
    }
}

fn edge(source: &str, target: &str, rel: RelationshipType, props: Value) -> Proposal {
    let mut properties = match props {
        Value::Object(map) => Payload::from(map),
        _ => Payload::new(),
    };
    properties.insert("auto_detected", true);
    Proposal::Edge(Edge::new(source, target, rel).with_properties(properties))
}

// ---------------------------------------------------------------------------
// Demonstrates
// ---------------------------------------------------------------------------

/// VulnerableContract → Vulnerability when the vulnerability's normalized
/// name occurs in the contract's normalized name or location.
pub struct Demonstrates;

impl InferencePass for Demonstrates {
    fn kind(&self) -> PassKind {
        PassKind::Demonstrates
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal> {
        let vulns: Vec<(String, &str)> = snapshot
            .of_type(NodeType::Vulnerability)
            .map(|v| (v.normalized_name(), v.id.as_str()))
            .filter(|(name, _)| !name.is_empty())
            .collect();

        let mut out = Vec::new();
        for contract in snapshot.of_type(NodeType::VulnerableContract) {
            let name = contract.normalized_name();
            let location = contract.location.as_deref().map(normalize_name).unwrap_or_default();
            for (needle, vuln_id) in &vulns {
                if name.contains(needle.as_str()) || location.contains(needle.as_str()) {
                    tracing::debug!(contract = %contract.id, vuln = %vuln_id, "demonstrates");
                    out.push(edge(&contract.id, vuln_id, RelationshipType::Demonstrates, json!({})));
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// PairsWith
// ---------------------------------------------------------------------------

/// DeepDive → Integration when declared protocols overlap or names are
/// similar enough.
pub struct PairsWith {
    pub threshold: f64,
}

impl InferencePass for PairsWith {
    fn kind(&self) -> PassKind {
        PassKind::PairsWith
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal> {
        let protocol = |n: &Node| NodeView::of(n).protocol().map(str::to_lowercase);
        let mut out = Vec::new();
        for dd in snapshot.of_type(NodeType::DeepDive) {
            let dd_protocol = protocol(dd);
            for integ in snapshot.of_type(NodeType::Integration) {
                let protocol_match = match (&dd_protocol, protocol(integ)) {
                    (Some(a), Some(b)) => a.contains(b.as_str()) || b.contains(a.as_str()),
                    _ => false,
                };
                let similarity = jaccard_similarity(&dd.name, &integ.name);
                if protocol_match || similarity > self.threshold {
                    let matched_on = if protocol_match { "protocol" } else { "name" };
                    out.push(edge(
                        &dd.id,
                        &integ.id,
                        RelationshipType::PairsWith,
                        json!({
                            "depth_ladder": "theory_to_practice",
                            "matched_on": matched_on,
                            "similarity": similarity,
                        }),
                    ));
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Prevents
// ---------------------------------------------------------------------------

/// Template → Vulnerability when the template document contains a
/// prevention marker for the vulnerability's category.
pub struct Prevents {
    pub markers: Vec<PreventionMarker>,
}

impl InferencePass for Prevents {
    fn kind(&self) -> PassKind {
        PassKind::Prevents
    }

    fn documents(&self) -> &'static [NodeType] {
        &[NodeType::Template]
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal> {
        let vulns: Vec<(String, &str)> = snapshot
            .of_type(NodeType::Vulnerability)
            .map(|v| (v.normalized_name(), v.id.as_str()))
            .collect();

        let mut out = Vec::new();
        for template in snapshot.of_type(NodeType::Template) {
            let Some(text) = snapshot.document(&template.id) else {
                continue;
            };
            let mut linked: BTreeSet<&str> = BTreeSet::new();
            for marker in &self.markers {
                if !text.contains(&marker.marker.to_lowercase()) {
                    continue;
                }
                let category = normalize_name(&marker.category);
                for (name, vuln_id) in &vulns {
                    if name.contains(category.as_str()) && linked.insert(*vuln_id) {
                        out.push(edge(
                            &template.id,
                            vuln_id,
                            RelationshipType::Prevents,
                            json!({ "mechanism": marker.marker }),
                        ));
                    }
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Explains
// ---------------------------------------------------------------------------

/// DeepDive → Vulnerability when the DeepDive document mentions enough of
/// the vulnerability's keywords.
pub struct Explains {
    pub tables: InferenceTables,
    pub min_mentions: usize,
}

impl Explains {
    /// Number of distinct keywords present in `text`.
    pub fn mentions(text: &str, keywords: &[String]) -> usize {
        keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect::<BTreeSet<_>>()
            .iter()
            .filter(|k| !k.is_empty() && text.contains(k.as_str()))
            .count()
    }
}

impl InferencePass for Explains {
    fn kind(&self) -> PassKind {
        PassKind::Explains
    }

    fn documents(&self) -> &'static [NodeType] {
        &[NodeType::DeepDive]
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal> {
        let vulns: Vec<(Vec<String>, &str)> = snapshot
            .of_type(NodeType::Vulnerability)
            .map(|v| (self.tables.keywords_for(v), v.id.as_str()))
            .collect();

        let mut out = Vec::new();
        for dd in snapshot.of_type(NodeType::DeepDive) {
            let Some(text) = snapshot.document(&dd.id) else {
                continue;
            };
            for (keywords, vuln_id) in &vulns {
                let mentions = Self::mentions(text, keywords);
                if mentions >= self.min_mentions {
                    out.push(edge(
                        &dd.id,
                        vuln_id,
                        RelationshipType::Explains,
                        json!({ "mentions": mentions }),
                    ));
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Uses
// ---------------------------------------------------------------------------

/// Integration → Template when the integration document mentions a marker
/// of the template's family.
pub struct Uses {
    pub tables: InferenceTables,
}

impl InferencePass for Uses {
    fn kind(&self) -> PassKind {
        PassKind::Uses
    }

    fn documents(&self) -> &'static [NodeType] {
        &[NodeType::Integration]
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal> {
        let templates: Vec<_> = snapshot
            .of_type(NodeType::Template)
            .filter_map(|t| self.tables.family_for(t).map(|f| (t.id.as_str(), f)))
            .collect();

        let mut out = Vec::new();
        for integ in snapshot.of_type(NodeType::Integration) {
            let Some(text) = snapshot.document(&integ.id) else {
                continue;
            };
            for (template_id, family) in &templates {
                let used = family
                    .markers
                    .iter()
                    .any(|m| text.contains(&m.to_lowercase()));
                if used {
                    out.push(edge(
                        &integ.id,
                        template_id,
                        RelationshipType::Uses,
                        json!({ "integration_type": family.integration_type }),
                    ));
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// RelatesTo
// ---------------------------------------------------------------------------

/// DeepDive → Template through the cross-domain table.
pub struct RelatesTo {
    pub tables: InferenceTables,
}

impl InferencePass for RelatesTo {
    fn kind(&self) -> PassKind {
        PassKind::RelatesTo
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal> {
        let mut out = Vec::new();
        for dd in snapshot.of_type(NodeType::DeepDive) {
            for template in snapshot.of_type(NodeType::Template) {
                if let Some(rule) = self.tables.cross_domain_for(&dd.name, &template.name) {
                    out.push(edge(
                        &dd.id,
                        &template.id,
                        RelationshipType::RelatesTo,
                        json!({ "domain": rule.domain }),
                    ));
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// DomainTagging
// ---------------------------------------------------------------------------

/// Stamps `inferred_domain` on every node whose name or location matches a
/// domain keyword. Adds no edges.
pub struct DomainTagging {
    pub tables: InferenceTables,
}

impl InferencePass for DomainTagging {
    fn kind(&self) -> PassKind {
        PassKind::DomainTagging
    }

    fn propose(&self, snapshot: &Snapshot) -> Vec<Proposal> {
        snapshot
            .nodes()
            .iter()
            .filter_map(|node| {
                let text = format!("{} {}", node.name, node.location.as_deref().unwrap_or(""));
                self.tables.domain_for(&text).map(|domain| Proposal::Annotate {
                    node_id: node.id.clone(),
                    key: INFERRED_DOMAIN_KEY.to_string(),
                    value: Value::String(domain.to_string()),
                })
            })
            .collect()
    }
}
