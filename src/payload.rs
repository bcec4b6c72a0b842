//! Open attribute maps carried by nodes and edges.
//!
//! Payload shapes vary per node type, so the boundary type is a dynamic JSON
//! object ([`Payload`]). Passes and queries that need validated fields go
//! through the typed views ([`NodeView`]) instead of parsing ad hoc.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GraphError;
use crate::node::{Node, NodeType};

/// Dynamic attribute map attached to a node or edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Insert a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// A field as a non-empty string.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// A field as a number. Numeric strings are accepted ("1500000").
    pub fn number_field(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(value_as_f64)
    }

    /// All scalar values in the payload, flattened depth-first, as text.
    /// Keys are skipped. Used to build the search blob.
    pub fn text_values(&self) -> Vec<String> {
        let mut out = Vec::new();
        for value in self.0.values() {
            collect_text(value, &mut out);
        }
        out
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(_) | Value::Null => {}
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(['_', ','], "").parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

/// Validated, type-specific view over a node's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeView<'a> {
    Vulnerability {
        severity: Option<&'a str>,
        /// Historical loss in USD, see [`historical_loss`].
        loss_usd: Option<f64>,
    },
    DeepDive {
        protocol: Option<&'a str>,
    },
    Integration {
        protocol: Option<&'a str>,
    },
    Template {
        /// Declared `family` attribute; passes fall back to name inference.
        family: Option<&'a str>,
    },
    Other,
}

impl<'a> NodeView<'a> {
    pub fn of(node: &'a Node) -> Self {
        let p = &node.payload;
        match node.node_type {
            NodeType::Vulnerability => NodeView::Vulnerability {
                severity: p.str_field("severity"),
                loss_usd: historical_loss(p),
            },
            NodeType::DeepDive => NodeView::DeepDive {
                protocol: p.str_field("protocol"),
            },
            NodeType::Integration => NodeView::Integration {
                protocol: p.str_field("protocol"),
            },
            NodeType::Template => NodeView::Template {
                family: p.str_field("family"),
            },
            _ => NodeView::Other,
        }
    }

    /// The declared protocol of a DeepDive or Integration.
    pub fn protocol(&self) -> Option<&'a str> {
        match self {
            NodeView::DeepDive { protocol } | NodeView::Integration { protocol } => *protocol,
            _ => None,
        }
    }
}

/// Loss figure for a vulnerability-like payload.
///
/// Uses `historical_losses_usd` when present, otherwise the sum of
/// `real_exploits[].loss_usd`, otherwise `loss_usd`.
pub fn historical_loss(payload: &Payload) -> Option<f64> {
    if let Some(v) = payload.number_field("historical_losses_usd") {
        return Some(v);
    }
    if let Some(Value::Array(exploits)) = payload.get("real_exploits") {
        let losses: Vec<f64> = exploits
            .iter()
            .filter_map(|e| e.get("loss_usd").and_then(value_as_f64))
            .collect();
        if !losses.is_empty() {
            return Some(losses.iter().sum());
        }
    }
    payload.number_field("loss_usd")
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// A predicate over one named payload field.
///
/// A node whose payload lacks the field never matches; that is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadFilter {
    /// Equality. Strings compare case-insensitively.
    Eq { field: String, value: Value },
    /// Numeric `field >= threshold`.
    AtLeast { field: String, threshold: f64 },
    /// Numeric `field <= threshold`.
    AtMost { field: String, threshold: f64 },
}

impl PayloadFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        PayloadFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn at_least(field: impl Into<String>, threshold: f64) -> Self {
        PayloadFilter::AtLeast {
            field: field.into(),
            threshold,
        }
    }

    pub fn at_most(field: impl Into<String>, threshold: f64) -> Self {
        PayloadFilter::AtMost {
            field: field.into(),
            threshold,
        }
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            PayloadFilter::Eq { field, value } => match (payload.get(field), value) {
                (Some(Value::String(have)), Value::String(want)) => have.eq_ignore_ascii_case(want),
                (Some(have), Value::Number(_)) => {
                    value_as_f64(have).is_some_and(|h| Some(h) == value_as_f64(value))
                }
                (Some(have), want) => have == want,
                (None, _) => false,
            },
            PayloadFilter::AtLeast { field, threshold } => {
                payload.number_field(field).is_some_and(|v| v >= *threshold)
            }
            PayloadFilter::AtMost { field, threshold } => {
                payload.number_field(field).is_some_and(|v| v <= *threshold)
            }
        }
    }
}

impl FromStr for PayloadFilter {
    type Err = GraphError;

    /// Parse `field=value`, `field>=number` or `field<=number`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: String| GraphError::InvalidFilter { message };
        let threshold = |field: &str, raw: &str| -> Result<(String, f64), GraphError> {
            let n = raw
                .trim()
                .replace(['_', ','], "")
                .parse::<f64>()
                .map_err(|_| invalid(format!("`{raw}` is not a number")))?;
            Ok((field.trim().to_string(), n))
        };

        if let Some((field, raw)) = s.split_once(">=") {
            let (field, threshold) = threshold(field, raw)?;
            return Ok(PayloadFilter::AtLeast { field, threshold });
        }
        if let Some((field, raw)) = s.split_once("<=") {
            let (field, threshold) = threshold(field, raw)?;
            return Ok(PayloadFilter::AtMost { field, threshold });
        }
        if let Some((field, raw)) = s.split_once('=') {
            let field = field.trim();
            if field.is_empty() {
                return Err(invalid(format!("missing field name in `{s}`")));
            }
            let raw = raw.trim();
            let value = match raw.parse::<f64>() {
                Ok(_) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into())),
                Err(_) => Value::String(raw.to_string()),
            };
            return Ok(PayloadFilter::Eq {
                field: field.to_string(),
                value,
            });
        }
        Err(invalid(format!("no operator in `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::node::SourceCollection;

    fn payload(v: Value) -> Payload {
        match v {
            Value::Object(map) => Payload::from(map),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn number_field_accepts_numeric_strings() {
        let p = payload(json!({"a": 12, "b": "1,500,000", "c": "n/a"}));
        assert_eq!(p.number_field("a"), Some(12.0));
        assert_eq!(p.number_field("b"), Some(1_500_000.0));
        assert_eq!(p.number_field("c"), None);
        assert_eq!(p.number_field("missing"), None);
    }

    #[test]
    fn text_values_flatten_nested() {
        let p = payload(json!({"name": "x", "features": ["a", "b"], "n": 3, "nested": {"k": "v"}}));
        let mut text = p.text_values();
        text.sort();
        assert_eq!(text, vec!["3", "a", "b", "v", "x"]);
    }

    #[test]
    fn historical_loss_fallbacks() {
        assert_eq!(historical_loss(&payload(json!({"historical_losses_usd": 60_000_000}))), Some(6.0e7));
        let summed = payload(json!({"real_exploits": [{"loss_usd": 1.0e6}, {"loss_usd": 2.0e6}]}));
        assert_eq!(historical_loss(&summed), Some(3.0e6));
        assert_eq!(historical_loss(&payload(json!({"loss_usd": 5}))), Some(5.0));
        assert_eq!(historical_loss(&Payload::new()), None);
    }

    #[test]
    fn filters_match_and_never_fail_on_missing_fields() {
        let p = payload(json!({"severity": "HIGH", "historical_losses_usd": 2_000_000}));
        assert!(PayloadFilter::eq("severity", "high").matches(&p));
        assert!(PayloadFilter::at_least("historical_losses_usd", 1_000_000.0).matches(&p));
        assert!(!PayloadFilter::at_most("historical_losses_usd", 1_000_000.0).matches(&p));
        assert!(!PayloadFilter::eq("protocol", "Uniswap").matches(&p));
        assert!(!PayloadFilter::at_least("missing", 0.0).matches(&p));
    }

    #[test]
    fn filter_parsing() {
        assert_eq!(
            "severity=high".parse::<PayloadFilter>().unwrap(),
            PayloadFilter::eq("severity", "high")
        );
        assert_eq!(
            "loss_usd>=1_000_000".parse::<PayloadFilter>().unwrap(),
            PayloadFilter::at_least("loss_usd", 1_000_000.0)
        );
        assert!("severity".parse::<PayloadFilter>().is_err());
        assert!("loss>=lots".parse::<PayloadFilter>().is_err());
    }

    #[test]
    fn typed_view_reads_protocol() {
        let node = Node::new("dd", NodeType::DeepDive, "Curve Deep-Dive", SourceCollection::Research)
            .with_payload(payload(json!({"protocol": "Curve"})));
        assert_eq!(NodeView::of(&node).protocol(), Some("Curve"));
    }
}
