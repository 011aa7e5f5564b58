//! Tagged value encoding for evaluated driver expressions.
//!
//! Arguments passed into a remote expression, and results coming back, do not
//! travel as plain JSON: each node is wrapped in a single-key tagged object so
//! the driver can distinguish `undefined` from `null`, carry object key order,
//! and reference live handles. [`WireValue`] is the explicit sum type over
//! those tags; decode sites match it exhaustively so an unhandled tag is a
//! compile error rather than a silent fallthrough.
//!
//! On decode, the `null` and `undefined` sentinels both collapse to
//! [`Value::Null`]. This is a deliberate lossy simplification carried over
//! from the driver protocol; callers cannot tell the two apart after decode.

use serde_json::{Map, Number, Value, json};
use thiserror::Error;

/// Key of the marker object produced when decoding an unresolved handle
/// reference. This layer never dereferences handles.
pub const UNRESOLVED_HANDLE_KEY: &str = "__handle__";

/// Decode failure for a tagged wire value.
#[derive(Debug, Error)]
pub enum ValueError {
    /// The value did not match any known tag shape.
    #[error("unrecognized wire value: {0}")]
    UnrecognizedTag(String),

    /// A sentinel tag carried something other than "null" or "undefined".
    #[error("unrecognized sentinel: {0}")]
    UnrecognizedSentinel(String),
}

/// One node of the tagged wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// `{"v": "null"}`
    Null,
    /// `{"v": "undefined"}`
    Undefined,
    /// `{"b": bool}`
    Bool(bool),
    /// `{"n": number}` - integers and floats both travel as numbers.
    Number(Number),
    /// `{"s": string}`
    String(String),
    /// `{"a": [...]}` - order preserved.
    Array(Vec<WireValue>),
    /// `{"o": [{"k": key, "v": value}, ...]}` - an ordered list of pairs.
    Object(Vec<(String, WireValue)>),
    /// `{"h": index}` - a reference to a driver-side handle that this layer
    /// leaves unresolved.
    Handle(u64),
}

impl WireValue {
    /// Renders this value into its tagged JSON wire form.
    pub fn to_wire(&self) -> Value {
        match self {
            WireValue::Null => json!({"v": "null"}),
            WireValue::Undefined => json!({"v": "undefined"}),
            WireValue::Bool(b) => json!({"b": b}),
            WireValue::Number(n) => json!({"n": n}),
            WireValue::String(s) => json!({"s": s}),
            WireValue::Array(items) => {
                let items: Vec<Value> = items.iter().map(WireValue::to_wire).collect();
                json!({"a": items})
            }
            WireValue::Object(pairs) => {
                let pairs: Vec<Value> = pairs
                    .iter()
                    .map(|(k, v)| json!({"k": k, "v": v.to_wire()}))
                    .collect();
                json!({"o": pairs})
            }
            WireValue::Handle(index) => json!({"h": index}),
        }
    }

    /// Parses a tagged JSON wire form back into a [`WireValue`].
    ///
    /// A bare JSON array is accepted as an array tag; some driver responses
    /// deliver element lists without the wrapper. Any other untagged shape is
    /// a [`ValueError`].
    pub fn from_wire(value: &Value) -> Result<Self, ValueError> {
        if let Value::Array(items) = value {
            let items = items
                .iter()
                .map(WireValue::from_wire)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(WireValue::Array(items));
        }

        let map = value
            .as_object()
            .ok_or_else(|| ValueError::UnrecognizedTag(value.to_string()))?;

        if let Some(sentinel) = map.get("v") {
            return match sentinel.as_str() {
                Some("null") => Ok(WireValue::Null),
                Some("undefined") => Ok(WireValue::Undefined),
                _ => Err(ValueError::UnrecognizedSentinel(sentinel.to_string())),
            };
        }
        if let Some(b) = map.get("b") {
            let b = b
                .as_bool()
                .ok_or_else(|| ValueError::UnrecognizedTag(value.to_string()))?;
            return Ok(WireValue::Bool(b));
        }
        if let Some(n) = map.get("n") {
            let n = n
                .as_number()
                .cloned()
                .ok_or_else(|| ValueError::UnrecognizedTag(value.to_string()))?;
            return Ok(WireValue::Number(n));
        }
        if let Some(s) = map.get("s") {
            let s = s
                .as_str()
                .ok_or_else(|| ValueError::UnrecognizedTag(value.to_string()))?;
            return Ok(WireValue::String(s.to_string()));
        }
        if let Some(a) = map.get("a") {
            let items = a
                .as_array()
                .ok_or_else(|| ValueError::UnrecognizedTag(value.to_string()))?
                .iter()
                .map(WireValue::from_wire)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(WireValue::Array(items));
        }
        if let Some(o) = map.get("o") {
            let pairs = o
                .as_array()
                .ok_or_else(|| ValueError::UnrecognizedTag(value.to_string()))?
                .iter()
                .map(|entry| {
                    let key = entry
                        .get("k")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ValueError::UnrecognizedTag(entry.to_string()))?;
                    let nested = entry
                        .get("v")
                        .ok_or_else(|| ValueError::UnrecognizedTag(entry.to_string()))?;
                    Ok((key.to_string(), WireValue::from_wire(nested)?))
                })
                .collect::<Result<Vec<_>, ValueError>>()?;
            return Ok(WireValue::Object(pairs));
        }
        if let Some(h) = map.get("h") {
            let index = h
                .as_u64()
                .ok_or_else(|| ValueError::UnrecognizedTag(value.to_string()))?;
            return Ok(WireValue::Handle(index));
        }

        Err(ValueError::UnrecognizedTag(value.to_string()))
    }
}

/// Encodes an application value into the tagged wire form.
///
/// JSON `null` encodes as the undefined sentinel, matching the driver's
/// treatment of an absent argument. Enum-like scalars arrive here already
/// stringified by serde and encode as strings.
pub fn serialize_value(value: &Value) -> WireValue {
    match value {
        Value::Null => WireValue::Undefined,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Number(n) => WireValue::Number(n.clone()),
        Value::String(s) => WireValue::String(s.clone()),
        Value::Array(items) => WireValue::Array(items.iter().map(serialize_value).collect()),
        Value::Object(map) => WireValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), serialize_value(v)))
                .collect(),
        ),
    }
}

/// Decodes a [`WireValue`] into an application value.
///
/// Both sentinels collapse to `Value::Null`. An unresolved handle becomes the
/// distinguished marker object `{"__handle__": index}`.
pub fn parse_value(wire: &WireValue) -> Value {
    match wire {
        WireValue::Null | WireValue::Undefined => Value::Null,
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Number(n) => Value::Number(n.clone()),
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::Array(items) => Value::Array(items.iter().map(parse_value).collect()),
        WireValue::Object(pairs) => {
            let mut map = Map::with_capacity(pairs.len());
            for (key, value) in pairs {
                map.insert(key.clone(), parse_value(value));
            }
            Value::Object(map)
        }
        WireValue::Handle(index) => json!({ UNRESOLVED_HANDLE_KEY: index }),
    }
}

/// Parses a tagged JSON wire form straight to an application value.
pub fn parse_wire(value: &Value) -> Result<Value, ValueError> {
    Ok(parse_value(&WireValue::from_wire(value)?))
}
