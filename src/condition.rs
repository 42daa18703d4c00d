//! Prerequisite expressions
//!
//! Authored content gates nodes with small JSON boolean trees:
//!
//! ```json
//! {
//!   "motive_known": true,
//!   "or_evidence": { "any_of": 2, "knife_found": true, "alibi_broken": true, "witness": true },
//!   "and_not_cleared": { "cleared_by_police": false }
//! }
//! ```
//!
//! Each entry is classified by the type of its value first, then by its key:
//!
//! - a boolean value is a leaf: the argument named by the key must have
//!   that status
//! - an object value under a key starting with `or` (any case) passes when
//!   at least `any_of` (default 1) of its other entries pass
//! - an object value under a key starting with `and` (any case), or named
//!   `depends_on`, passes when all of its entries pass
//! - anything else is unsupported and evaluates to `false`
//!
//! The root object is an AND group. So `{"android_user": true}` is a leaf,
//! not a group.
//!
//! The threshold key is exactly `any_of`. It takes an integer, an integral
//! float such as `2.0`, or an integer string. A group whose threshold cannot
//! be read never passes and shows up in [`Expression::diagnostics`]. That
//! includes a differently cased key such as `ANY_OF`, which is neither a
//! threshold nor a candidate.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

const THRESHOLD_KEY: &str = "any_of";
const DEPENDS_ON_KEY: &str = "depends_on";

/// Read access to the current status of each argument.
pub trait StatusLookup {
    /// `true` when the argument is currently proven
    fn status(&self, argument_id: &str) -> bool;
}

impl<T: StatusLookup + ?Sized> StatusLookup for &T {
    fn status(&self, argument_id: &str) -> bool {
        (**self).status(argument_id)
    }
}

impl StatusLookup for HashMap<String, bool> {
    fn status(&self, argument_id: &str) -> bool {
        self.get(argument_id).copied().unwrap_or(false)
    }
}

impl StatusLookup for BTreeMap<String, bool> {
    fn status(&self, argument_id: &str) -> bool {
        self.get(argument_id).copied().unwrap_or(false)
    }
}

/// Adapts a closure into a [`StatusLookup`].
pub struct LookupFn<F>(pub F);

impl<F: Fn(&str) -> bool> StatusLookup for LookupFn<F> {
    fn status(&self, argument_id: &str) -> bool {
        (self.0)(argument_id)
    }
}

#[derive(Debug, Error)]
pub enum EvaluationInputError {
    #[error("expression is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expression root must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// A classified prerequisite tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Leaf { argument: String, expected: bool },
    And(Vec<Expression>),
    Or {
        threshold: usize,
        candidates: Vec<Expression>,
        /// Why the authored threshold was unusable; such a group never passes
        bad_threshold: Option<String>,
    },
    /// An entry whose shape has no meaning; always `false`
    Unsupported { key: String, found: &'static str },
}

impl Expression {
    /// The expression with no prerequisites; always `true`
    pub fn always() -> Self {
        Expression::And(Vec::new())
    }

    /// Parse authored text. Blank text means no prerequisites.
    pub fn parse(text: &str) -> Result<Self, EvaluationInputError> {
        if text.trim().is_empty() {
            return Ok(Self::always());
        }
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Classify an already-parsed root. The root must be an object.
    pub fn from_value(value: &Value) -> Result<Self, EvaluationInputError> {
        match value {
            Value::Object(entries) => Ok(Self::and_group(entries)),
            other => Err(EvaluationInputError::NotAnObject(kind(other))),
        }
    }

    fn classify(key: &str, value: &Value) -> Self {
        match value {
            Value::Bool(expected) => Expression::Leaf {
                argument: key.to_string(),
                expected: *expected,
            },
            Value::Object(entries) if starts_with_ignore_case(key, "or") => {
                Self::or_group(entries)
            }
            Value::Object(entries)
                if starts_with_ignore_case(key, "and") || key == DEPENDS_ON_KEY =>
            {
                Self::and_group(entries)
            }
            other => Expression::Unsupported {
                key: key.to_string(),
                found: kind(other),
            },
        }
    }

    fn and_group(entries: &Map<String, Value>) -> Self {
        Expression::And(
            entries
                .iter()
                .map(|(key, value)| Self::classify(key, value))
                .collect(),
        )
    }

    fn or_group(entries: &Map<String, Value>) -> Self {
        let mut threshold = 1;
        let mut bad_threshold = None;
        let mut candidates = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if key == THRESHOLD_KEY {
                match parse_threshold(value) {
                    Some(n) => threshold = n,
                    None => {
                        bad_threshold = Some(format!("'{}' holds {}", key, value));
                    }
                }
            } else if key.eq_ignore_ascii_case(THRESHOLD_KEY) {
                bad_threshold = Some(format!("'{}' is not spelled '{}'", key, THRESHOLD_KEY));
            } else {
                candidates.push(Self::classify(key, value));
            }
        }
        Expression::Or {
            threshold,
            candidates,
            bad_threshold,
        }
    }

    /// Evaluate against the current argument statuses
    pub fn evaluate<L: StatusLookup + ?Sized>(&self, lookup: &L) -> bool {
        match self {
            Expression::Leaf { argument, expected } => lookup.status(argument) == *expected,
            Expression::And(children) => children.iter().all(|c| c.evaluate(lookup)),
            Expression::Or {
                threshold,
                candidates,
                bad_threshold,
            } => {
                if bad_threshold.is_some() {
                    return false;
                }
                // every candidate is counted, even past the threshold
                let passed = candidates
                    .iter()
                    .map(|c| c.evaluate(lookup))
                    .filter(|ok| *ok)
                    .count();
                passed >= *threshold
            }
            Expression::Unsupported { .. } => false,
        }
    }

    /// Authoring problems found in the tree: unsupported entries, unreadable
    /// thresholds and OR groups whose threshold can never be met.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.collect_diagnostics(&mut found);
        found
    }

    fn collect_diagnostics(&self, found: &mut Vec<String>) {
        match self {
            Expression::Leaf { .. } => {}
            Expression::And(children) => {
                for child in children {
                    child.collect_diagnostics(found);
                }
            }
            Expression::Or {
                threshold,
                candidates,
                bad_threshold,
            } => {
                if let Some(reason) = bad_threshold {
                    found.push(format!("OR group threshold {} and can never pass", reason));
                } else if *threshold > candidates.len() {
                    found.push(format!(
                        "OR group needs {} of {} candidates and can never pass",
                        threshold,
                        candidates.len()
                    ));
                }
                for candidate in candidates {
                    candidate.collect_diagnostics(found);
                }
            }
            Expression::Unsupported { key, found: what } => {
                found.push(format!("entry '{}' holds {}, expected a boolean or a group", key, what));
            }
        }
    }
}

/// Evaluate a classified expression
pub fn evaluate<L: StatusLookup + ?Sized>(root: &Expression, lookup: &L) -> bool {
    root.evaluate(lookup)
}

/// Parse and evaluate authored text in one step. Invalid input evaluates to
/// `false` and is logged.
pub fn evaluate_str<L: StatusLookup + ?Sized>(text: &str, lookup: &L) -> bool {
    match Expression::parse(text) {
        Ok(expression) => expression.evaluate(lookup),
        Err(e) => {
            tracing::error!("Invalid prerequisite expression: {}", e);
            false
        }
    }
}

/// `any_of` accepts an integer, an integral float or an integer string.
/// Values below 1 become 1. `None` for anything else.
fn parse_threshold(value: &Value) -> Option<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n >= 1 => Some(usize::try_from(n).unwrap_or(usize::MAX)),
        Some(_) => Some(1),
        None => {
            tracing::warn!("Unusable any_of value {}", value);
            None
        }
    }
}

fn starts_with_ignore_case(key: &str, prefix: &str) -> bool {
    key.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn status(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_and_group_requires_all() {
        let lookup = status(&[("a", true), ("b", false)]);
        assert!(!evaluate_str(r#"{"depends_on":{"a":true,"b":true}}"#, &lookup));
        assert!(evaluate_str(r#"{"depends_on":{"a":true,"b":false}}"#, &lookup));
    }

    #[test]
    fn test_or_threshold() {
        let expr = r#"{"or_1":{"any_of":2,"x":true,"y":true,"z":true}}"#;
        assert!(evaluate_str(expr, &status(&[("x", true), ("y", false), ("z", true)])));
        assert!(!evaluate_str(expr, &status(&[("x", true)])));
    }

    #[test]
    fn test_or_default_threshold_is_one() {
        let expr = r#"{"OR_any":{"x":true,"y":true}}"#;
        assert!(evaluate_str(expr, &status(&[("y", true)])));
        assert!(!evaluate_str(expr, &status(&[])));
    }

    #[test]
    fn test_threshold_below_one_becomes_one() {
        let parsed = Expression::parse(r#"{"or_g":{"any_of":0,"x":true}}"#).unwrap();
        assert_eq!(
            parsed,
            Expression::And(vec![Expression::Or {
                threshold: 1,
                candidates: vec![Expression::Leaf {
                    argument: "x".into(),
                    expected: true
                }],
                bad_threshold: None,
            }])
        );
        assert!(!parsed.evaluate(&status(&[])));
    }

    #[test]
    fn test_threshold_from_string_and_integral_float() {
        for expr in [
            r#"{"or_g":{"any_of":"2","x":true,"y":true,"z":true}}"#,
            r#"{"or_g":{"any_of":2.0,"x":true,"y":true,"z":true}}"#,
        ] {
            let root = Expression::parse(expr).unwrap();
            assert!(root.diagnostics().is_empty());
            assert!(!root.evaluate(&status(&[("x", true)])));
            assert!(root.evaluate(&status(&[("x", true), ("y", true)])));
        }
    }

    #[test]
    fn test_unusable_threshold_never_passes() {
        let everything = LookupFn(|_: &str| true);
        for bad in [r#"2.5"#, r#"true"#, r#""two""#, r#"null"#] {
            let expr = format!(r#"{{"or_g":{{"any_of":{},"x":true,"y":true,"z":true}}}}"#, bad);
            let root = Expression::parse(&expr).unwrap();
            assert!(!root.evaluate(&everything), "any_of {} passed", bad);
            let found = root.diagnostics();
            assert_eq!(found.len(), 1, "any_of {}: {:?}", bad, found);
            assert!(found[0].contains("'any_of' holds"));
        }
    }

    #[test]
    fn test_miscased_threshold_key_is_reported() {
        let root = Expression::parse(r#"{"or_g":{"ANY_OF":2,"x":true,"y":true}}"#).unwrap();
        assert!(!root.evaluate(&status(&[("x", true), ("y", true)])));
        let found = root.diagnostics();
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("'ANY_OF' is not spelled 'any_of'"));
    }

    #[test]
    fn test_leaf_wins_over_prefix() {
        let lookup = status(&[("android_user", true)]);
        assert!(evaluate_str(r#"{"android_user": true}"#, &lookup));
        assert!(!evaluate_str(r#"{"organ_donor": true}"#, &lookup));
    }

    #[test]
    fn test_expected_false_leaf() {
        assert!(evaluate_str(r#"{"cleared": false}"#, &status(&[])));
        assert!(!evaluate_str(r#"{"cleared": false}"#, &status(&[("cleared", true)])));
    }

    #[test]
    fn test_nested_groups() {
        let expr = json!({
            "motive": true,
            "or_evidence": {
                "any_of": 1,
                "and_pair": { "knife": true, "blood": true },
                "confession": true
            }
        });
        let root = Expression::from_value(&expr).unwrap();
        assert!(root.evaluate(&status(&[("motive", true), ("knife", true), ("blood", true)])));
        assert!(!root.evaluate(&status(&[("motive", true), ("knife", true)])));
        assert!(root.evaluate(&status(&[("motive", true), ("confession", true)])));
    }

    #[test]
    fn test_unsupported_shapes_are_false() {
        let lookup = LookupFn(|_: &str| true);
        assert!(!evaluate_str(r#"{"a": 1}"#, &lookup));
        assert!(!evaluate_str(r#"{"a": "yes"}"#, &lookup));
        assert!(!evaluate_str(r#"{"group": {"a": true}}"#, &lookup));
        assert!(!evaluate_str(r#"{"a": [true]}"#, &lookup));
    }

    #[test]
    fn test_blank_means_no_prerequisites() {
        assert!(evaluate_str("", &status(&[])));
        assert!(evaluate_str("   \n", &status(&[])));
        assert_eq!(Expression::parse("").unwrap(), Expression::always());
    }

    #[test]
    fn test_invalid_root() {
        assert!(matches!(
            Expression::parse("[true]"),
            Err(EvaluationInputError::NotAnObject("an array"))
        ));
        assert!(matches!(
            Expression::parse("{not json"),
            Err(EvaluationInputError::Json(_))
        ));
        assert!(!evaluate_str("true", &status(&[])));
    }

    #[test]
    fn test_diagnostics() {
        let root = Expression::parse(r#"{"a": 3, "or_g": {"any_of": 3, "x": true}}"#).unwrap();
        let found = root.diagnostics();
        assert_eq!(found.len(), 2);
        assert!(found[0].contains("'a'"));
        assert!(found[1].contains("needs 3 of 1"));
        assert!(Expression::parse(r#"{"a": true}"#).unwrap().diagnostics().is_empty());
    }

    #[test]
    fn test_multibyte_key_is_not_a_group() {
        let root = Expression::parse(r#"{"ó": {"a": true}}"#).unwrap();
        assert!(!root.evaluate(&status(&[("a", true)])));
    }

    fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("a"),
            Just("b"),
            Just("c"),
            Just("or_1"),
            Just("OR_x"),
            Just("and_1"),
            Just("any_of"),
            Just("depends_on"),
            Just("android_user"),
        ]
        .prop_map(String::from)
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            (-3i64..5).prop_map(Value::from),
            "[a-z0-9]{0,3}".prop_map(Value::from),
            Just(Value::Null),
        ];
        leaf.prop_recursive(4, 48, 4, |inner| {
            prop::collection::vec((arb_key(), inner), 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect()))
        })
    }

    fn arb_status() -> impl Strategy<Value = BTreeMap<String, bool>> {
        prop::collection::btree_map(arb_key(), any::<bool>(), 0..6)
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_deterministic(value in arb_value(), lookup in arb_status()) {
            let text = value.to_string();
            let first = evaluate_str(&text, &lookup);
            let second = evaluate_str(&text, &lookup);
            prop_assert_eq!(first, second);

            if let Ok(root) = Expression::from_value(&value) {
                prop_assert_eq!(root.evaluate(&lookup), first);
                prop_assert_eq!(root.clone(), Expression::parse(&text).unwrap());
            }
        }

        #[test]
        fn prop_flat_leaves_match_lookup(
            leaves in prop::collection::btree_map("[a-z]{1,4}", any::<bool>(), 0..6),
            lookup in prop::collection::btree_map("[a-z]{1,4}", any::<bool>(), 0..6),
        ) {
            let value = Value::Object(
                leaves.iter().map(|(k, v)| (k.clone(), Value::Bool(*v))).collect(),
            );
            let expected = leaves
                .iter()
                .all(|(k, v)| lookup.get(k).copied().unwrap_or(false) == *v);
            prop_assert_eq!(Expression::from_value(&value).unwrap().evaluate(&lookup), expected);
        }
    }
}
