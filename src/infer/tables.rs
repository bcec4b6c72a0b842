//! Keyword and marker tables that parameterize the inference passes.
//!
//! The passes themselves hold no vocabulary. Everything they match against
//! lives here, so a corpus with different conventions can override a table
//! from `[tables]` in `kbgraph.toml` without touching code. Tables are
//! ordered: where several entries could fire, the first one wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::{Node, normalize_name};
use crate::payload::NodeView;
use crate::store::search::tokenize;

/// A document marker that indicates protection against a vulnerability
/// category (e.g. `nonReentrant` guards against `reentrancy`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreventionMarker {
    /// Text searched for, case-insensitively, in template documents.
    pub marker: String,
    /// Normalized vulnerability category, matched as a substring of the
    /// vulnerability's normalized name.
    pub category: String,
}

/// A template family and the markers that show an integration uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFamily {
    /// Family key, matched against the template's declared `family` or its
    /// normalized name.
    pub family: String,
    /// Any of these in an integration document selects the family.
    pub markers: Vec<String>,
    /// Recorded on the USES edge.
    pub integration_type: String,
}

/// Cross-domain association between DeepDives and Templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossDomainRule {
    pub domain: String,
    /// Any of these in the DeepDive name.
    pub deepdive_keywords: Vec<String>,
    /// Any of these in the Template name.
    pub template_keywords: Vec<String>,
}

/// Keywords that place a node in a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainKeywords {
    pub domain: String,
    pub keywords: Vec<String>,
}

/// All tables used by the passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceTables {
    /// Normalized vulnerability category → keywords counted by Explains.
    pub vulnerability_keywords: BTreeMap<String, Vec<String>>,
    pub prevention_markers: Vec<PreventionMarker>,
    pub template_families: Vec<TemplateFamily>,
    pub cross_domain: Vec<CrossDomainRule>,
    pub domains: Vec<DomainKeywords>,
}

impl Default for InferenceTables {
    fn default() -> Self {
        Self::builtin()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl InferenceTables {
    /// The tables for a Solidity security corpus.
    pub fn builtin() -> Self {
        let vulnerability_keywords = [
            ("reentrancy", &["reentrancy", "reentrant", "call.value", "external call"][..]),
            (
                "access_control",
                &["access control", "ownable", "onlyowner", "permission", "authorization"][..],
            ),
            ("integer_overflow", &["overflow", "underflow", "safemath", "arithmetic"][..]),
            ("frontrunning", &["frontrun", "mev", "sandwich", "mempool"][..]),
            ("flash_loan", &["flash loan", "flash attack", "price manipulation"][..]),
            ("dos", &["dos", "denial of service", "gas limit", "block gas"][..]),
            ("delegatecall", &["delegatecall", "proxy", "upgradeable"][..]),
            ("timestamp", &["timestamp", "block.timestamp", "now"][..]),
            ("tx_origin", &["tx.origin", "transaction origin"][..]),
            ("unchecked", &["unchecked", "return value", "call return"][..]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), strings(v)))
        .collect();

        let prevention_markers = [
            ("ReentrancyGuard", "reentrancy"),
            ("nonReentrant", "reentrancy"),
            ("Ownable", "access_control"),
            ("AccessControl", "access_control"),
            ("SafeMath", "integer_overflow"),
            ("Pausable", "dos"),
            ("SafeERC20", "unchecked"),
        ]
        .into_iter()
        .map(|(marker, category)| PreventionMarker {
            marker: marker.into(),
            category: category.into(),
        })
        .collect();

        let template_families = vec![
            TemplateFamily {
                family: "erc20".into(),
                markers: strings(&["erc20"]),
                integration_type: "token".into(),
            },
            TemplateFamily {
                family: "erc721".into(),
                markers: strings(&["erc721", "nft"]),
                integration_type: "nft".into(),
            },
            TemplateFamily {
                family: "upgradeable".into(),
                markers: strings(&["proxy", "upgradeable"]),
                integration_type: "upgradeable".into(),
            },
        ];

        let cross_domain = vec![
            CrossDomainRule {
                domain: "NFT".into(),
                deepdive_keywords: strings(&["nft", "seaport"]),
                template_keywords: strings(&["erc721"]),
            },
            CrossDomainRule {
                domain: "DeFi".into(),
                deepdive_keywords: strings(&["defi", "uniswap", "curve"]),
                template_keywords: strings(&["erc20"]),
            },
            CrossDomainRule {
                domain: "Staking".into(),
                deepdive_keywords: strings(&["staking", "yield", "yearn"]),
                template_keywords: strings(&["staking"]),
            },
        ];

        let domains = [
            ("DeFi", &["defi", "swap", "amm", "dex", "liquidity", "yield", "lending"][..]),
            ("NFT", &["nft", "erc721", "erc1155", "marketplace", "collectible"][..]),
            ("Gaming", &["game", "gaming", "vrf", "random", "achievement"][..]),
            ("AI", &["ai", "oracle", "chainlink functions", "automation"][..]),
            ("Governance", &["governance", "dao", "vote", "proposal", "multisig"][..]),
        ]
        .into_iter()
        .map(|(domain, keywords)| DomainKeywords {
            domain: domain.into(),
            keywords: strings(keywords),
        })
        .collect();

        Self {
            vulnerability_keywords,
            prevention_markers,
            template_families,
            cross_domain,
            domains,
        }
    }

    /// Reject blank entries. An empty marker, category or keyword is a
    /// substring of every name and would link everything to everything.
    pub fn validate(&self) -> Result<(), String> {
        let blank = |s: &str| s.trim().is_empty();
        let blank_in = |items: &[String]| items.iter().any(|k| blank(k));

        for (category, keywords) in &self.vulnerability_keywords {
            if blank(category) {
                return Err("tables.vulnerability_keywords has an empty category".into());
            }
            if blank_in(keywords) {
                return Err(format!(
                    "tables.vulnerability_keywords.{category} has an empty keyword"
                ));
            }
        }
        for (i, m) in self.prevention_markers.iter().enumerate() {
            if blank(&m.marker) || blank(&m.category) {
                return Err(format!(
                    "tables.prevention_markers[{i}] needs a non-empty marker and category"
                ));
            }
        }
        for (i, f) in self.template_families.iter().enumerate() {
            if blank(&f.family) || blank_in(&f.markers) {
                return Err(format!(
                    "tables.template_families[{i}] has an empty family or marker"
                ));
            }
        }
        for (i, rule) in self.cross_domain.iter().enumerate() {
            if blank_in(&rule.deepdive_keywords) || blank_in(&rule.template_keywords) {
                return Err(format!("tables.cross_domain[{i}] has an empty keyword"));
            }
        }
        for d in &self.domains {
            if blank_in(&d.keywords) {
                return Err(format!("tables.domains \"{}\" has an empty keyword", d.domain));
            }
        }
        Ok(())
    }

    /// Keywords Explains counts for a vulnerability.
    ///
    /// Exact category match on the normalized name first, then the first
    /// category contained in it, then the lowercased name itself.
    pub fn keywords_for(&self, vulnerability: &Node) -> Vec<String> {
        let normalized = vulnerability.normalized_name();
        if let Some(words) = self.vulnerability_keywords.get(&normalized) {
            return words.clone();
        }
        if let Some((_, words)) = self
            .vulnerability_keywords
            .iter()
            .find(|(category, _)| normalized.contains(category.as_str()))
        {
            return words.clone();
        }
        vec![vulnerability.name.trim().to_lowercase()]
    }

    /// The family a template belongs to.
    ///
    /// A declared `family` attribute naming a known family wins. Otherwise
    /// the first family whose key occurs in the name (without `.sol`).
    pub fn family_for(&self, template: &Node) -> Option<&TemplateFamily> {
        if let NodeView::Template {
            family: Some(declared),
        } = NodeView::of(template)
        {
            let declared = normalize_name(declared);
            if let Some(found) = self.template_families.iter().find(|f| f.family == declared) {
                return Some(found);
            }
        }
        let name = template.normalized_name();
        let name = name.strip_suffix(".sol").unwrap_or(&name);
        self.template_families
            .iter()
            .find(|f| name.contains(f.family.as_str()))
    }

    /// First cross-domain rule linking a DeepDive name to a Template name.
    pub fn cross_domain_for(&self, deepdive: &str, template: &str) -> Option<&CrossDomainRule> {
        let (dd, tmpl) = (normalize_name(deepdive), normalize_name(template));
        self.cross_domain.iter().find(|rule| {
            rule.deepdive_keywords.iter().any(|k| dd.contains(k.as_str()))
                && rule.template_keywords.iter().any(|k| tmpl.contains(k.as_str()))
        })
    }

    /// First domain whose keywords occur in `text`.
    ///
    /// Keywords shorter than three characters must match a whole token, so
    /// `ai` does not fire on "chain" or "maintenance".
    pub fn domain_for(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        let tokens = tokenize(&haystack);
        self.domains
            .iter()
            .find(|d| {
                d.keywords.iter().any(|k| {
                    let k = k.to_lowercase();
                    if k.chars().count() < 3 {
                        tokens.iter().any(|t| *t == k)
                    } else {
                        haystack.contains(&k)
                    }
                })
            })
            .map(|d| d.domain.as_str())
    }
}
