//! Dynamically typed values decoded from JSON.
//!
//! Provisioning outputs and pricing metadata arrive as arbitrary JSON.
//! [`DynValue`] keeps them as a closed tagged union so consumers pick an
//! accessor and get a [`ValueError`] on mismatch instead of a silent coercion.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

/// Error returned by typed accessors on [`DynValue`].
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ValueError {
    /// The value holds a different variant than the one requested.
    #[snafu(display("expected {expected}, found {actual}"))]
    TypeMismatch {
        /// Variant the caller asked for.
        expected: &'static str,
        /// Variant actually stored.
        actual: &'static str,
    },

    /// The number cannot be represented in the requested numeric type.
    #[snafu(display("number {value} does not fit in {target}"))]
    NumberOutOfRange {
        /// Rendered number.
        value: String,
        /// Requested numeric type.
        target: &'static str,
    },
}

/// A decoded JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum DynValue {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number, kept exact so integers render without a fraction.
    Number(serde_json::Number),
    /// JSON string.
    String(String),
    /// JSON array.
    List(Vec<DynValue>),
    /// JSON object with sorted keys.
    Map(BTreeMap<String, DynValue>),
}

impl DynValue {
    /// Decode raw JSON text. Text that is not valid JSON is kept verbatim as a
    /// string, so `decode("10.0.0.1")` and `decode("\"10.0.0.1\"")` agree.
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => value.into(),
            Err(_) => DynValue::String(raw.to_string()),
        }
    }

    /// Variant name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DynValue::Null => "null",
            DynValue::Bool(_) => "bool",
            DynValue::Number(_) => "number",
            DynValue::String(_) => "string",
            DynValue::List(_) => "list",
            DynValue::Map(_) => "map",
        }
    }

    /// Borrow the string payload.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            DynValue::String(s) => Ok(s),
            other => Err(mismatch("string", other)),
        }
    }

    /// Read a boolean.
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            DynValue::Bool(b) => Ok(*b),
            other => Err(mismatch("bool", other)),
        }
    }

    /// Read a number as `f64`.
    pub fn as_f64(&self) -> Result<f64, ValueError> {
        match self {
            DynValue::Number(n) => n.as_f64().ok_or_else(|| ValueError::NumberOutOfRange {
                value: n.to_string(),
                target: "f64",
            }),
            other => Err(mismatch("number", other)),
        }
    }

    /// Read an integral number as `i64`.
    pub fn as_i64(&self) -> Result<i64, ValueError> {
        match self {
            DynValue::Number(n) => n.as_i64().ok_or_else(|| ValueError::NumberOutOfRange {
                value: n.to_string(),
                target: "i64",
            }),
            other => Err(mismatch("number", other)),
        }
    }

    /// Borrow the list payload.
    pub fn as_list(&self) -> Result<&[DynValue], ValueError> {
        match self {
            DynValue::List(items) => Ok(items),
            other => Err(mismatch("list", other)),
        }
    }

    /// Borrow the map payload.
    pub fn as_map(&self) -> Result<&BTreeMap<String, DynValue>, ValueError> {
        match self {
            DynValue::Map(map) => Ok(map),
            other => Err(mismatch("map", other)),
        }
    }

    /// Render the value for substitution into a command or variable.
    ///
    /// Strings render raw (no quotes), scalars with their JSON spelling,
    /// `null` as the empty string, lists and maps as compact JSON.
    pub fn render(&self) -> String {
        match self {
            DynValue::Null => String::new(),
            DynValue::Bool(b) => b.to_string(),
            DynValue::Number(n) => n.to_string(),
            DynValue::String(s) => s.clone(),
            DynValue::List(_) | DynValue::Map(_) => serde_json::Value::from(self.clone()).to_string(),
        }
    }
}

fn mismatch(expected: &'static str, actual: &DynValue) -> ValueError {
    ValueError::TypeMismatch {
        expected,
        actual: actual.kind(),
    }
}

impl fmt::Display for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<serde_json::Value> for DynValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DynValue::Null,
            serde_json::Value::Bool(b) => DynValue::Bool(b),
            serde_json::Value::Number(n) => DynValue::Number(n),
            serde_json::Value::String(s) => DynValue::String(s),
            serde_json::Value::Array(items) => DynValue::List(items.into_iter().map(DynValue::from).collect()),
            serde_json::Value::Object(map) => DynValue::Map(map.into_iter().map(|(k, v)| (k, DynValue::from(v))).collect()),
        }
    }
}

impl From<DynValue> for serde_json::Value {
    fn from(value: DynValue) -> Self {
        match value {
            DynValue::Null => serde_json::Value::Null,
            DynValue::Bool(b) => serde_json::Value::Bool(b),
            DynValue::Number(n) => serde_json::Value::Number(n),
            DynValue::String(s) => serde_json::Value::String(s),
            DynValue::List(items) => serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect()),
            DynValue::Map(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for DynValue {
    fn from(value: &str) -> Self {
        DynValue::String(value.to_string())
    }
}

impl From<String> for DynValue {
    fn from(value: String) -> Self {
        DynValue::String(value)
    }
}

impl From<bool> for DynValue {
    fn from(value: bool) -> Self {
        DynValue::Bool(value)
    }
}

impl From<i64> for DynValue {
    fn from(value: i64) -> Self {
        DynValue::Number(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_quoted_string() {
        assert_eq!(DynValue::decode("\"1.2.3.4\""), DynValue::String("1.2.3.4".into()));
    }

    #[test]
    fn test_decode_invalid_json_falls_back_to_raw() {
        assert_eq!(DynValue::decode("1.2.3.4"), DynValue::String("1.2.3.4".into()));
    }

    #[test]
    fn test_decode_integer_renders_without_fraction() {
        let value = DynValue::decode("22");
        assert_eq!(value.as_i64(), Ok(22));
        assert_eq!(value.render(), "22");
    }

    #[test]
    fn test_list_renders_as_json() {
        let value = DynValue::decode(r#"["a","b"]"#);
        assert_eq!(value.as_list().map(|l| l.len()), Ok(2));
        assert_eq!(value.render(), r#"["a","b"]"#);
    }

    #[test]
    fn test_accessor_mismatch_is_typed() {
        let value = DynValue::from("text");
        assert_eq!(
            value.as_bool(),
            Err(ValueError::TypeMismatch {
                expected: "bool",
                actual: "string"
            })
        );
    }

    #[test]
    fn test_null_renders_empty() {
        assert_eq!(DynValue::decode("null").render(), "");
    }

    #[test]
    fn test_serde_is_plain_json() {
        let value = DynValue::decode(r#"{"port":22,"tags":["x"]}"#);
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"port":22,"tags":["x"]}"#);
        let back: DynValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
