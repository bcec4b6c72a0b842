//! Persistent inverted index over node text.
//!
//! Each node contributes two fields: its name, and a body made of its id,
//! location, payload values and type/collection tags. Postings are stored
//! as `(term, node_id) → (name_tf, body_tf)` so a prefix scan over one
//! term is a single redb range read.
//!
//! Ranking is lexicographic, highest first:
//!
//! 1. the whole query appears in the node name
//! 2. number of distinct query terms matched
//! 3. exact name-token hits
//! 4. prefix name-token hits
//! 5. body hits (prefix hits weigh half)
//!
//! Remaining ties are broken by node id, so results are deterministic.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use redb::{ReadableTable, TableDefinition, WriteTransaction};
use regex::Regex;
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use super::{GraphStore, StoreResult, decode, encode, load_node, redb_err};
use crate::node::Node;

pub(super) const POSTINGS: TableDefinition<(&str, &str), (u32, u32)> =
    TableDefinition::new("search_postings");
pub(super) const DOC_TERMS: TableDefinition<&str, &[u8]> = TableDefinition::new("search_doc_terms");

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("token pattern is valid"));

/// Split text into lowercase alphanumeric tokens.
///
/// Underscores, dots and punctuation separate tokens, so
/// `vuln_integer_overflow.md` yields `vuln`, `integer`, `overflow`, `md`.
pub fn tokenize(text: &str) -> Vec<String> {
    let folded = text.nfkc().collect::<String>().to_lowercase();
    TOKEN
        .find_iter(&folded)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Term frequencies for one node, split by field.
fn term_counts(node: &Node) -> BTreeMap<String, (u32, u32)> {
    let mut counts: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    for term in tokenize(&node.name) {
        counts.entry(term).or_default().0 += 1;
    }

    let mut body = vec![
        node.id.clone(),
        node.node_type.as_str().to_string(),
        node.source_collection.as_str().to_string(),
    ];
    body.extend(node.location.iter().cloned());
    body.extend(node.payload.text_values());
    for term in body.iter().flat_map(|text| tokenize(text)) {
        counts.entry(term).or_default().1 += 1;
    }
    counts
}

/// Replace the postings of `node` with its current text.
pub(super) fn index_node(txn: &WriteTransaction, node: &Node) -> StoreResult<()> {
    let mut docs = txn.open_table(DOC_TERMS).map_err(redb_err("open_table"))?;
    let mut postings = txn.open_table(POSTINGS).map_err(redb_err("open_table"))?;
    let id = node.id.as_str();

    let previous: Option<Vec<String>> = match docs.get(id).map_err(redb_err("get"))? {
        Some(value) => Some(decode(value.value(), || format!("search_doc_terms/{id}"))?),
        None => None,
    };
    for term in previous.iter().flatten() {
        postings
            .remove((term.as_str(), id))
            .map_err(redb_err("remove"))?;
    }

    let counts = term_counts(node);
    for (term, tf) in &counts {
        postings
            .insert((term.as_str(), id), *tf)
            .map_err(redb_err("insert"))?;
    }
    let terms: Vec<&str> = counts.keys().map(String::as_str).collect();
    let bytes = encode(&terms)?;
    docs.insert(id, bytes.as_slice()).map_err(redb_err("insert"))?;
    Ok(())
}

/// Relevance of one node to a query. Ordered lexicographically by field.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchScore {
    pub phrase_in_name: bool,
    pub terms_matched: u32,
    pub name_exact: u32,
    pub name_prefix: u32,
    pub body: f64,
}

impl Ord for SearchScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.phrase_in_name
            .cmp(&other.phrase_in_name)
            .then(self.terms_matched.cmp(&other.terms_matched))
            .then(self.name_exact.cmp(&other.name_exact))
            .then(self.name_prefix.cmp(&other.name_prefix))
            .then(self.body.total_cmp(&other.body))
    }
}

impl PartialOrd for SearchScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SearchScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchScore {}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub node: Node,
    pub score: SearchScore,
}

impl GraphStore {
    /// Free-text search, best match first, at most `limit` hits.
    ///
    /// Query terms match indexed terms exactly or as a prefix. An empty
    /// query returns nothing.
    pub fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let txn = self.read()?;
        let postings = txn.open_table(POSTINGS).map_err(redb_err("open_table"))?;
        let mut scores: BTreeMap<String, SearchScore> = BTreeMap::new();

        for term in &terms {
            let mut matched: BTreeSet<String> = BTreeSet::new();
            for entry in postings.range((term.as_str(), "")..).map_err(redb_err("range"))? {
                let (key, value) = entry.map_err(redb_err("range"))?;
                let (indexed, node_id) = key.value();
                if !indexed.starts_with(term.as_str()) {
                    break;
                }
                let (name_tf, body_tf) = value.value();
                let exact = indexed == term;
                let score = scores.entry(node_id.to_string()).or_default();
                if exact {
                    score.name_exact += name_tf;
                    score.body += f64::from(body_tf);
                } else {
                    score.name_prefix += name_tf;
                    score.body += f64::from(body_tf) * 0.5;
                }
                matched.insert(node_id.to_string());
            }
            for id in matched {
                if let Some(score) = scores.get_mut(&id) {
                    score.terms_matched += 1;
                }
            }
        }

        let phrase = query.nfkc().collect::<String>().trim().to_lowercase();
        let nodes = txn.open_table(super::NODES).map_err(redb_err("open_table"))?;
        let mut hits = Vec::with_capacity(scores.len());
        for (id, mut score) in scores {
            let Some(node) = load_node(&nodes, &id)? else {
                continue;
            };
            score.phrase_in_name = node.name.to_lowercase().contains(&phrase);
            hits.push(SearchHit { node, score });
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.node.id.cmp(&b.node.id)));
        hits.truncate(limit);
        tracing::debug!(query, hits = hits.len(), "search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeType, SourceCollection};
    use crate::payload::Payload;

    fn node(id: &str, name: &str) -> Node {
        Node::new(id, NodeType::DeepDive, name, SourceCollection::Research)
    }

    #[test]
    fn tokenize_splits_identifiers() {
        assert_eq!(
            tokenize("vuln_Integer-Overflow.md"),
            vec!["vuln", "integer", "overflow", "md"]
        );
        assert!(tokenize("  --  ").is_empty());
    }

    #[test]
    fn name_match_outranks_body_match() {
        let store = GraphStore::in_memory().unwrap();
        let body_heavy = node("a_body", "Lending Markets").with_payload(
            Payload::new().with("notes", "oracle oracle oracle oracle manipulation"),
        );
        store.upsert_node(&body_heavy).unwrap();
        store.upsert_node(&node("z_name", "Oracle Manipulation")).unwrap();

        let hits = store.search("oracle", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node.id, "z_name");
    }

    #[test]
    fn exact_token_outranks_prefix() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&node("b", "ReentrancyGuard Pattern")).unwrap();
        store.upsert_node(&node("a", "Reentrancy")).unwrap();
        let hits = store.search("reentrancy", 10).unwrap();
        assert_eq!(hits[0].node.id, "a");
        assert_eq!(hits[1].node.id, "b");
    }

    #[test]
    fn reindex_replaces_old_terms() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&node("a", "Uniswap V2")).unwrap();
        store.upsert_node(&node("a", "Curve Finance")).unwrap();
        assert!(store.search("uniswap", 10).unwrap().is_empty());
        assert_eq!(store.search("curve", 10).unwrap().len(), 1);
    }

    #[test]
    fn ties_break_by_id_and_limit_applies() {
        let store = GraphStore::in_memory().unwrap();
        for id in ["c", "a", "b"] {
            store.upsert_node(&node(id, "Flash Loan")).unwrap();
        }
        let ids: Vec<String> = store
            .search("flash loan", 2)
            .unwrap()
            .into_iter()
            .map(|h| h.node.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.search("", 10).unwrap().is_empty());
    }
}
