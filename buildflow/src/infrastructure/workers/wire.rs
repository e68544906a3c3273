// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Wire Values
//!
//! Every payload crossing the worker boundary is projected into a
//! [`WireValue`] first: a closed universe of shapes both sides agree on.
//!
//! ## Projection rules
//!
//! - Primitives (including NaN and ±Infinity), dates (epoch milliseconds),
//!   regular expressions (source + flags), byte arrays, lists, sets, and
//!   maps pass through natively.
//! - Errors become [`WireValue::Fault`] records carrying name, message, and
//!   any extra properties.
//! - Structured records are walked to a bounded depth (default
//!   [`WireValue::DEFAULT_DEPTH`]); anything deeper is truncated to `Null`.
//!   The depth cap is what breaks reference cycles in loosely shaped plugin
//!   data, so projection always terminates.
//!
//! ## Shared nodes
//!
//! A value plugins alias by reference is wrapped in a
//! [`WireValue::Shared`] node. One projection call is one batch: the first
//! time a shared node is reached it is projected in full and memoized;
//! every later reference inside the same batch reuses the projected
//! allocation. Same-batch references therefore keep their identity across
//! the boundary, while separate batches never alias each other.
//!
//! ## Receiving
//!
//! The receiving side either rebuilds a fresh value or applies
//! [`WireValue::update_in_place`] path by path, so a value the main side
//! retains (the file a worker plugin mutates) keeps its identity while
//! absorbing the worker's changes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use buildflow_domain::EngineError;

/// A value in the worker wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    /// Absent / truncated value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point; NaN and ±Infinity are representable.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Instant as epoch milliseconds.
    Date(i64),
    /// A regular expression, as source plus flags.
    Regex {
        /// Pattern source.
        source: String,
        /// Pattern flags.
        flags: String,
    },
    /// Ordered sequence.
    List(Vec<WireValue>),
    /// Unordered unique collection, carried in insertion order.
    Set(Vec<WireValue>),
    /// Key/value pairs with arbitrary keys.
    Map(Vec<(WireValue, WireValue)>),
    /// String-keyed record.
    Record(BTreeMap<String, WireValue>),
    /// A node shared by reference. References to the same node within one
    /// projected message alias one allocation.
    Shared(Arc<WireValue>),
    /// A projected error.
    Fault {
        /// Error kind name.
        name: String,
        /// Rendered message.
        message: String,
        /// Optional backtrace text.
        stack: Option<String>,
        /// Extra own properties.
        properties: BTreeMap<String, WireValue>,
    },
}

impl WireValue {
    /// Default projection depth for structured values.
    pub const DEFAULT_DEPTH: usize = 5;

    /// Builds a record from key/value pairs.
    pub fn record<K: Into<String>>(entries: impl IntoIterator<Item = (K, WireValue)>) -> WireValue {
        WireValue::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wraps a value in a shareable node. Clones of the returned value
    /// alias one allocation, and projection keeps that aliasing within a
    /// batch.
    pub fn shared(value: WireValue) -> WireValue {
        WireValue::Shared(Arc::new(value))
    }

    /// Projects the value to the default depth.
    pub fn projected(&self) -> WireValue {
        self.project(Self::DEFAULT_DEPTH)
    }

    /// Projects the value, truncating structure deeper than `depth`.
    ///
    /// Scalars survive at any depth; containers at depth zero collapse to
    /// `Null`. One call is one batch: every [`WireValue::Shared`] node is
    /// projected the first time it is reached and memoized, so references
    /// to the same node within the batch keep their identity.
    pub fn project(&self, depth: usize) -> WireValue {
        let mut batch: HashMap<*const WireValue, Arc<WireValue>> = HashMap::new();
        self.project_with(depth, &mut batch)
    }

    fn project_with(&self, depth: usize, batch: &mut HashMap<*const WireValue, Arc<WireValue>>) -> WireValue {
        match self {
            WireValue::Null
            | WireValue::Bool(_)
            | WireValue::Int(_)
            | WireValue::Float(_)
            | WireValue::Text(_)
            | WireValue::Bytes(_)
            | WireValue::Date(_)
            | WireValue::Regex { .. } => self.clone(),
            WireValue::Shared(node) => {
                if let Some(projected) = batch.get(&Arc::as_ptr(node)) {
                    return WireValue::Shared(projected.clone());
                }
                if depth == 0 {
                    return WireValue::Null;
                }
                let projected = Arc::new(node.project_with(depth - 1, batch));
                batch.insert(Arc::as_ptr(node), projected.clone());
                WireValue::Shared(projected)
            }
            WireValue::Fault {
                name,
                message,
                stack,
                properties,
            } => {
                if depth == 0 {
                    return WireValue::Null;
                }
                WireValue::Fault {
                    name: name.clone(),
                    message: message.clone(),
                    stack: stack.clone(),
                    properties: properties
                        .iter()
                        .map(|(k, v)| (k.clone(), v.project_with(depth - 1, batch)))
                        .collect(),
                }
            }
            WireValue::List(items) => {
                if depth == 0 {
                    return WireValue::Null;
                }
                WireValue::List(items.iter().map(|v| v.project_with(depth - 1, batch)).collect())
            }
            WireValue::Set(items) => {
                if depth == 0 {
                    return WireValue::Null;
                }
                WireValue::Set(items.iter().map(|v| v.project_with(depth - 1, batch)).collect())
            }
            WireValue::Map(entries) => {
                if depth == 0 {
                    return WireValue::Null;
                }
                WireValue::Map(
                    entries
                        .iter()
                        .map(|(k, v)| (k.project_with(depth - 1, batch), v.project_with(depth - 1, batch)))
                        .collect(),
                )
            }
            WireValue::Record(fields) => {
                if depth == 0 {
                    return WireValue::Null;
                }
                WireValue::Record(
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.project_with(depth - 1, batch)))
                        .collect(),
                )
            }
        }
    }

    /// Applies `incoming` onto `self` path by path.
    ///
    /// Matching record fields and equal-length lists merge recursively;
    /// everything else is replaced wholesale. Fields present on `self` but
    /// absent from `incoming` are preserved — the incoming value is a
    /// delta-bearing snapshot, not an authority on absence.
    pub fn update_in_place(&mut self, incoming: &WireValue) {
        match (self, incoming) {
            (WireValue::Record(target), WireValue::Record(update)) => {
                for (key, value) in update {
                    match target.get_mut(key) {
                        Some(existing) => existing.update_in_place(value),
                        None => {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (WireValue::List(target), WireValue::List(update)) if target.len() == update.len() => {
                for (existing, value) in target.iter_mut().zip(update) {
                    existing.update_in_place(value);
                }
            }
            (WireValue::Shared(target), WireValue::Shared(update)) => {
                Arc::make_mut(target).update_in_place(update);
            }
            (target, update) => *target = update.clone(),
        }
    }

    /// Converts loose JSON into the wire format.
    pub fn from_json(value: &serde_json::Value) -> WireValue {
        match value {
            serde_json::Value::Null => WireValue::Null,
            serde_json::Value::Bool(b) => WireValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    WireValue::Int(i)
                } else {
                    WireValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => WireValue::Text(s.clone()),
            serde_json::Value::Array(items) => WireValue::List(items.iter().map(WireValue::from_json).collect()),
            serde_json::Value::Object(fields) => {
                WireValue::Record(fields.iter().map(|(k, v)| (k.clone(), WireValue::from_json(v))).collect())
            }
        }
    }

    /// Converts the value back into loose JSON. Lossy where JSON has no
    /// counterpart: non-finite floats become null, bytes become number
    /// arrays, dates become epoch milliseconds, map keys are rendered as
    /// text.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        match self {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(*b),
            WireValue::Int(i) => json!(i),
            WireValue::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            WireValue::Text(s) => Value::String(s.clone()),
            WireValue::Bytes(b) => Value::Array(b.iter().map(|byte| json!(byte)).collect()),
            WireValue::Date(ms) => json!(ms),
            WireValue::Regex { source, flags } => json!({ "source": source, "flags": flags }),
            WireValue::List(items) | WireValue::Set(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            WireValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| {
                        let key = k.as_str().map(str::to_string).unwrap_or_else(|| format!("{:?}", k));
                        (key, v.to_json())
                    })
                    .collect(),
            ),
            WireValue::Record(fields) => {
                Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            WireValue::Shared(node) => node.to_json(),
            WireValue::Fault { name, message, .. } => json!({ "name": name, "message": message }),
        }
    }

    /// Field lookup on records. Sees through shared nodes.
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        match self {
            WireValue::Record(fields) => fields.get(key),
            WireValue::Shared(node) => node.get(key),
            _ => None,
        }
    }

    /// Text accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Text(s) => Some(s),
            WireValue::Shared(node) => node.as_str(),
            _ => None,
        }
    }

    /// Integer accessor.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(i) => Some(*i),
            WireValue::Shared(node) => node.as_i64(),
            _ => None,
        }
    }

    /// Boolean accessor.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            WireValue::Shared(node) => node.as_bool(),
            _ => None,
        }
    }

    /// Bytes accessor.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            WireValue::Bytes(b) => Some(b),
            WireValue::Shared(node) => node.as_bytes(),
            _ => None,
        }
    }

    /// List accessor.
    pub fn as_list(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(items) => Some(items),
            WireValue::Shared(node) => node.as_list(),
            _ => None,
        }
    }

    /// Shared-node accessor. Unlike the other accessors this does not see
    /// through: it returns the node itself, which is what identity
    /// assertions compare.
    pub fn as_shared(&self) -> Option<&Arc<WireValue>> {
        match self {
            WireValue::Shared(node) => Some(node),
            _ => None,
        }
    }
}

/// Projects an engine error into a wire fault.
pub fn error_to_wire(error: &EngineError) -> WireValue {
    WireValue::Fault {
        name: error.category().to_string(),
        message: error.to_string(),
        stack: None,
        properties: BTreeMap::new(),
    }
}

/// Rebuilds an engine error from a wire fault, mapping the category name
/// back onto the matching variant.
pub fn wire_to_error(value: &WireValue) -> EngineError {
    let WireValue::Fault { name, message, .. } = value else {
        return EngineError::protocol(format!("Expected a fault payload, got {:?}", value));
    };

    fn strip(message: &str, prefix: &str) -> String {
        message.strip_prefix(prefix).unwrap_or(message).to_string()
    }

    match name.as_str() {
        "protocol" => EngineError::Protocol(strip(message, "Protocol fault: ")),
        "disposal" => EngineError::Disposed(strip(message, "Disposed: ")),
        "validation" => EngineError::Validation(strip(message, "Validation error: ")),
        "worker" => EngineError::WorkerCrash(strip(message, "Worker crashed: ")),
        "io" => EngineError::Io(strip(message, "IO error: ")),
        "serialization" => EngineError::Serialization(strip(message, "Serialization error: ")),
        "cancellation" => EngineError::Cancelled(strip(message, "Cancelled: ")),
        "internal" => EngineError::Internal(strip(message, "Internal error: ")),
        _ => EngineError::Internal(message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn deep_record(levels: usize) -> WireValue {
        let mut value = WireValue::Text("leaf".into());
        for i in 0..levels {
            value = WireValue::record([(format!("level{}", i), value)]);
        }
        value
    }

    #[test]
    fn test_scalars_survive_projection() {
        for value in [
            WireValue::Null,
            WireValue::Bool(true),
            WireValue::Int(-42),
            WireValue::Text("hi".into()),
            WireValue::Bytes(vec![0, 1, 2]),
            WireValue::Date(1_700_000_000_000),
            WireValue::Regex {
                source: r"\d+".into(),
                flags: "i".into(),
            },
        ] {
            assert_eq!(value.project(0), value);
        }
    }

    #[test]
    fn test_non_finite_floats_survive() {
        match WireValue::Float(f64::NAN).projected() {
            WireValue::Float(f) => assert!(f.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            WireValue::Float(f64::INFINITY).projected(),
            WireValue::Float(f64::INFINITY)
        );
        assert_eq!(
            WireValue::Float(f64::NEG_INFINITY).projected(),
            WireValue::Float(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn test_collections_round_trip_within_depth() {
        let value = WireValue::record([
            (
                "map",
                WireValue::Map(vec![(WireValue::Int(1), WireValue::Text("one".into()))]),
            ),
            ("set", WireValue::Set(vec![WireValue::Int(1), WireValue::Int(2)])),
            ("list", WireValue::List(vec![WireValue::Bool(false)])),
        ]);
        assert_eq!(value.projected(), value);
    }

    #[test]
    fn test_projection_truncates_beyond_depth() {
        let value = deep_record(8);
        let projected = value.projected();

        // Walk down the default depth; the level past it must be Null.
        let mut cursor = &projected;
        for _ in 0..WireValue::DEFAULT_DEPTH {
            let WireValue::Record(fields) = cursor else {
                panic!("expected record");
            };
            cursor = fields.values().next().unwrap();
        }
        assert_eq!(cursor, &WireValue::Null);

        // Within the depth budget nothing is lost.
        assert_eq!(deep_record(4).projected(), deep_record(4));
    }

    #[test]
    fn test_update_in_place_merges_records() {
        let mut target = WireValue::record([
            ("path", WireValue::Text("a.txt".into())),
            ("contents", WireValue::Bytes(vec![1])),
            (
                "metadata",
                WireValue::record([("kept", WireValue::Bool(true)), ("n", WireValue::Int(1))]),
            ),
        ]);
        let incoming = WireValue::record([
            ("contents", WireValue::Bytes(vec![9, 9])),
            ("metadata", WireValue::record([("n", WireValue::Int(2))])),
        ]);

        target.update_in_place(&incoming);

        assert_eq!(target.get("path").unwrap().as_str(), Some("a.txt"));
        assert_eq!(target.get("contents").unwrap().as_bytes(), Some(&[9u8, 9][..]));
        let metadata = target.get("metadata").unwrap();
        assert_eq!(metadata.get("kept").unwrap().as_bool(), Some(true));
        assert_eq!(metadata.get("n").unwrap().as_i64(), Some(2));
    }

    #[test]
    fn test_update_in_place_replaces_mismatched_shapes() {
        let mut target = WireValue::Int(1);
        target.update_in_place(&WireValue::Text("now text".into()));
        assert_eq!(target.as_str(), Some("now text"));
    }

    #[test]
    fn test_same_batch_references_keep_identity() {
        let node = Arc::new(WireValue::record([("n", WireValue::Int(1))]));
        let batch = WireValue::record([
            ("first", WireValue::Shared(node.clone())),
            ("second", WireValue::Shared(node)),
        ]);

        let projected = batch.projected();
        let first = projected.get("first").unwrap().as_shared().unwrap();
        let second = projected.get("second").unwrap().as_shared().unwrap();
        assert!(
            Arc::ptr_eq(first, second),
            "both references must alias one projected allocation"
        );
        assert_eq!(first.get("n").and_then(WireValue::as_i64), Some(1));
    }

    #[test]
    fn test_separate_batches_do_not_share() {
        let node = Arc::new(WireValue::Int(7));
        let a = WireValue::Shared(node.clone()).projected();
        let b = WireValue::Shared(node).projected();
        assert!(!Arc::ptr_eq(a.as_shared().unwrap(), b.as_shared().unwrap()));
    }

    #[test]
    fn test_shared_nodes_respect_the_depth_budget() {
        let mut value = WireValue::shared(WireValue::record([("x", WireValue::Int(1))]));
        for i in 0..WireValue::DEFAULT_DEPTH {
            value = WireValue::record([(format!("level{}", i), value)]);
        }

        let projected = value.projected();
        let mut cursor = &projected;
        for _ in 0..WireValue::DEFAULT_DEPTH {
            let WireValue::Record(fields) = cursor else {
                panic!("expected record");
            };
            cursor = fields.values().next().unwrap();
        }
        assert_eq!(cursor, &WireValue::Null);
    }

    #[test]
    fn test_update_in_place_merges_shared_nodes() {
        let mut target = WireValue::shared(WireValue::record([
            ("kept", WireValue::Bool(true)),
            ("n", WireValue::Int(1)),
        ]));
        let incoming = WireValue::shared(WireValue::record([("n", WireValue::Int(2))]));

        target.update_in_place(&incoming);

        assert_eq!(target.get("kept").and_then(WireValue::as_bool), Some(true));
        assert_eq!(target.get("n").and_then(WireValue::as_i64), Some(2));
    }

    #[test]
    fn test_error_round_trip_preserves_kind() {
        for error in [
            EngineError::validation("bad spec"),
            EngineError::protocol("dup response"),
            EngineError::disposed("pool"),
            EngineError::io_error("denied"),
            EngineError::cancelled("aborted"),
            EngineError::internal("bug"),
        ] {
            let back = wire_to_error(&error_to_wire(&error));
            assert_eq!(back.category(), error.category());
            assert_eq!(back.to_string(), error.to_string());
        }
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({
            "name": "demo",
            "count": 3,
            "ratio": 0.5,
            "flags": [true, false],
            "nested": {"ok": null}
        });
        let value = WireValue::from_json(&json);
        assert_eq!(value.get("name").unwrap().as_str(), Some("demo"));
        assert_eq!(value.get("count").unwrap().as_i64(), Some(3));
        assert_eq!(value.get("flags").unwrap().as_list().unwrap().len(), 2);
        assert_eq!(value.get("nested").unwrap().get("ok"), Some(&WireValue::Null));
    }

    fn arb_scalar() -> impl Strategy<Value = WireValue> {
        prop_oneof![
            Just(WireValue::Null),
            any::<bool>().prop_map(WireValue::Bool),
            any::<i64>().prop_map(WireValue::Int),
            any::<f64>().prop_map(WireValue::Float),
            "[a-z]{0,12}".prop_map(WireValue::Text),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(WireValue::Bytes),
            any::<i64>().prop_map(WireValue::Date),
        ]
    }

    fn arb_value() -> impl Strategy<Value = WireValue> {
        arb_scalar().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(WireValue::List),
                proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(WireValue::Record),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_projection_is_idempotent(value in arb_value()) {
            let once = value.projected();
            let twice = once.projected();
            // Compare through Debug so NaN payloads compare textually.
            prop_assert_eq!(format!("{:?}", once), format!("{:?}", twice));
        }

        #[test]
        fn prop_shallow_values_are_preserved(value in arb_value()) {
            // arb_value recurses at most 3 levels, well inside the budget.
            prop_assert_eq!(format!("{:?}", value.projected()), format!("{:?}", value));
        }
    }
}
