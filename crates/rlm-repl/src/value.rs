use std::fmt::{self, Write};

use num_bigint::BigInt;

/// A Python value copied out of (or into) a REPL namespace.
///
/// This is the public-facing type for namespace contents. It owns all its data and can be
/// freely cloned, compared, serialized, or stored. Holding a `Value` never keeps the
/// interpreter object alive, so snapshots taken from a session are unaffected by later
/// mutation inside the session, and values handed to a session are unaffected by later
/// mutation on the host side.
///
/// # Input vs Output Variants
///
/// Every variant except `Repr` can be converted into a fresh Python object. `Repr` is
/// output-only: it represents values with no structural mapping (functions, modules,
/// class instances) and converts back into its repr string.
///
/// # JSON Serialization
///
/// The derived serde impls use the externally tagged format. For human-facing JSON use
/// [`Value::to_json_value`] and [`Value::from_json_value`], which map onto natural JSON:
///
/// - `None` ↔ `null`
/// - `Bool` ↔ `true`/`false`
/// - `Int` ↔ integer
/// - `Float` ↔ float
/// - `String` ↔ string
/// - `List` ↔ array
/// - `Dict` ↔ object (non-string keys are written as their repr)
///
/// Output-only JSON forms: `BigInt` → `{"$bigint": "..."}`, `Bytes` → `{"$bytes": [...]}`,
/// `Tuple` → `{"$tuple": [...]}`, `Set` → `{"$set": [...]}`, `Repr` → `{"$repr": "..."}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// Python's `None` singleton.
    None,
    /// Python boolean (`True` or `False`).
    Bool(bool),
    /// Python integer (64-bit signed).
    Int(i64),
    /// Python arbitrary-precision integer (larger than i64).
    BigInt(BigInt),
    /// Python float (64-bit IEEE 754).
    Float(f64),
    /// Python string (UTF-8).
    String(String),
    /// Python bytes object.
    Bytes(Vec<u8>),
    /// Python list.
    List(Vec<Self>),
    /// Python tuple.
    Tuple(Vec<Self>),
    /// Python dictionary, as insertion-ordered key/value pairs.
    Dict(Vec<(Self, Self)>),
    /// Python set or frozenset.
    Set(Vec<Self>),
    /// A value with no structural mapping, captured by type name and `repr()`.
    Repr {
        /// Python type name, e.g. `"function"` or `"module"`.
        type_name: String,
        /// The value's `repr()` text.
        repr: String,
    },
}

impl fmt::Display for Value {
    /// Formats the value the way Python's `str()` would.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            _ => self.repr_fmt(f),
        }
    }
}

impl Value {
    /// Creates a dict value from string-keyed pairs.
    pub fn dict<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Dict(pairs.into_iter().map(|(k, v)| (Self::String(k.into()), v)).collect())
    }

    /// Looks up a string key in a dict value.
    ///
    /// Returns `None` for non-dict values and missing keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        let Self::Dict(pairs) = self else {
            return None;
        };
        pairs
            .iter()
            .find(|(k, _)| matches!(k, Self::String(s) if s == key))
            .map(|(_, v)| v)
    }

    /// Returns the string content if this is a `String` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the Python `repr()` string for this value.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut s = String::new();
        // writing into a String cannot fail
        let _ = self.repr_fmt(&mut s);
        s
    }

    /// Returns the Python type name of this value (e.g. `"int"`, `"list"`).
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Repr { type_name, .. } => type_name,
        }
    }

    /// Whether this is one of the plain data kinds worth surfacing to a model.
    ///
    /// Matches `str`, `int`, `float`, `bool`, `list`, `dict` and `tuple`; `None`,
    /// bytes, sets and opaque objects (modules, functions) are not data.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Self::Bool(_)
                | Self::Int(_)
                | Self::BigInt(_)
                | Self::Float(_)
                | Self::String(_)
                | Self::List(_)
                | Self::Tuple(_)
                | Self::Dict(_)
        )
    }

    /// Converts this value to its natural JSON representation.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::{Value as JV, json};
        match self {
            Self::None => JV::Null,
            Self::Bool(b) => JV::Bool(*b),
            Self::Int(i) => json!(i),
            Self::BigInt(bi) => json!({"$bigint": bi.to_string()}),
            Self::Float(f) => {
                if f.is_nan() || f.is_infinite() {
                    JV::Null
                } else {
                    json!(f)
                }
            }
            Self::String(s) => JV::String(s.clone()),
            Self::Bytes(b) => json!({"$bytes": b}),
            Self::List(items) => JV::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Tuple(items) => json!({"$tuple": items.iter().map(Self::to_json_value).collect::<Vec<_>>()}),
            Self::Dict(pairs) => {
                let map: serde_json::Map<String, JV> = pairs
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Self::String(s) => s.clone(),
                            other => other.py_repr(),
                        };
                        (key, v.to_json_value())
                    })
                    .collect();
                JV::Object(map)
            }
            Self::Set(items) => json!({"$set": items.iter().map(Self::to_json_value).collect::<Vec<_>>()}),
            Self::Repr { repr, .. } => json!({"$repr": repr}),
        }
    }

    /// Converts a natural JSON value into a `Value`.
    ///
    /// Objects become string-keyed dicts, arrays become lists; integers that do not fit
    /// in i64 become `BigInt`.
    #[must_use]
    pub fn from_json_value(value: serde_json::Value) -> Self {
        use serde_json::Value as JV;
        match value {
            JV::Null => Self::None,
            JV::Bool(b) => Self::Bool(b),
            JV::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::BigInt(BigInt::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JV::String(s) => Self::String(s),
            JV::Array(arr) => Self::List(arr.into_iter().map(Self::from_json_value).collect()),
            JV::Object(map) => Self::Dict(
                map.into_iter()
                    .map(|(k, v)| (Self::String(k), Self::from_json_value(v)))
                    .collect(),
            ),
        }
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => float_repr_fmt(*v, f),
            Self::String(s) => string_repr_fmt(s, f),
            Self::Bytes(b) => bytes_repr_fmt(b, f),
            Self::List(items) => {
                f.write_char('[')?;
                write_items(items, f)?;
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_items(items, f)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(pairs) => {
                f.write_char('{')?;
                let mut iter = pairs.iter();
                if let Some((k, v)) = iter.next() {
                    k.repr_fmt(f)?;
                    f.write_str(": ")?;
                    v.repr_fmt(f)?;
                    for (k, v) in iter {
                        f.write_str(", ")?;
                        k.repr_fmt(f)?;
                        f.write_str(": ")?;
                        v.repr_fmt(f)?;
                    }
                }
                f.write_char('}')
            }
            Self::Set(items) => {
                if items.is_empty() {
                    return f.write_str("set()");
                }
                f.write_char('{')?;
                write_items(items, f)?;
                f.write_char('}')
            }
            Self::Repr { repr, .. } => f.write_str(repr),
        }
    }
}

fn write_items(items: &[Value], f: &mut impl Write) -> fmt::Result {
    let mut iter = items.iter();
    if let Some(first) = iter.next() {
        first.repr_fmt(f)?;
        for item in iter {
            f.write_str(", ")?;
            item.repr_fmt(f)?;
        }
    }
    Ok(())
}

fn float_repr_fmt(v: f64, f: &mut impl Write) -> fmt::Result {
    f.write_str(&float_repr(v))
}

/// Returns a string representation of a float matching CPython's `repr()` behavior.
///
/// `ryu` produces the shortest decimal that round-trips through `f64` parsing, which
/// is the digit string CPython picks; [`fix_ryu_exponent`] then lays those digits out
/// the way CPython does.
fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f.is_sign_negative() { "-inf" } else { "inf" }.to_owned();
    }
    let mut buffer = ryu::Buffer::new();
    fix_ryu_exponent(buffer.format_finite(f))
}

/// Re-lays out ryu's output in CPython's float repr style.
///
/// ryu writes `1e20`, `1e-7` and `0.00001`; CPython writes `1e+20`, `1e-07` and
/// `1e-05`. CPython uses positional notation only while the decimal point sits between
/// 4 digits left of the first significant digit and 16 digits right of it, and always
/// shows a signed exponent of at least two digits.
fn fix_ryu_exponent(s: &str) -> String {
    let (sign, unsigned) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s),
    };
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (unsigned, 0),
    };
    let point = mantissa.find('.').unwrap_or(mantissa.len());
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    let significant = digits.trim_start_matches('0');
    let leading_zeros = digits.len() - significant.len();
    let significant = significant.trim_end_matches('0');
    if significant.is_empty() {
        return format!("{sign}0.0");
    }
    // position of the decimal point relative to the first significant digit
    let decpt = i32::try_from(point).unwrap_or(i32::MAX) - i32::try_from(leading_zeros).unwrap_or(0) + exponent;
    let len = i32::try_from(significant.len()).unwrap_or(i32::MAX);

    if -4 < decpt && decpt <= 16 {
        if decpt <= 0 {
            let zeros = "0".repeat(decpt.unsigned_abs() as usize);
            format!("{sign}0.{zeros}{significant}")
        } else if decpt >= len {
            let zeros = "0".repeat((decpt - len).unsigned_abs() as usize);
            format!("{sign}{significant}{zeros}.0")
        } else {
            let (whole, fraction) = significant.split_at(decpt.unsigned_abs() as usize);
            format!("{sign}{whole}.{fraction}")
        }
    } else {
        let (first, rest) = significant.split_at(1);
        let exponent = decpt - 1;
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        let exponent = exponent.unsigned_abs();
        if rest.is_empty() {
            format!("{sign}{first}e{exponent_sign}{exponent:02}")
        } else {
            format!("{sign}{first}.{rest}e{exponent_sign}{exponent:02}")
        }
    }
}

/// Writes a string repr using Python's quoting rules: single quotes unless the string
/// contains a single quote and no double quote.
fn string_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

fn bytes_repr_fmt(b: &[u8], f: &mut impl Write) -> fmt::Result {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') { '"' } else { '\'' };
    f.write_char('b')?;
    f.write_char(quote)?;
    for &byte in b {
        match byte {
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            byte if char::from(byte) == quote => {
                f.write_char('\\')?;
                f.write_char(quote)?;
            }
            0x20..=0x7e => f.write_char(char::from(byte))?,
            byte => write!(f, "\\x{byte:02x}")?,
        }
    }
    f.write_char(quote)
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn repr_matches_python_formatting() {
        let value = Value::List(vec![
            Value::Int(1),
            Value::from("it's"),
            Value::Float(2.0),
            Value::Tuple(vec![Value::None]),
            Value::dict([("k", Value::Bool(true))]),
        ]);
        assert_eq!(value.py_repr(), r#"[1, "it's", 2.0, (None,), {'k': True}]"#);
    }

    #[test]
    fn display_of_string_is_unquoted() {
        assert_eq!(Value::from("hello").to_string(), "hello");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Set(vec![]).to_string(), "set()");
    }

    #[test]
    fn float_repr_matches_python() {
        assert_eq!(Value::Float(1e20).py_repr(), "1e+20");
        assert_eq!(Value::Float(1e-7).py_repr(), "1e-07");
        assert_eq!(Value::Float(0.1 + 0.2).py_repr(), "0.30000000000000004");
        assert_eq!(Value::Float(1e16).to_string(), "1e+16");
        assert_eq!(Value::Float(1e15).to_string(), "1000000000000000.0");
        assert_eq!(Value::Float(1e-5).to_string(), "1e-05");
        assert_eq!(Value::Float(0.0001).to_string(), "0.0001");
        assert_eq!(Value::Float(-1.5e300).to_string(), "-1.5e+300");
        assert_eq!(Value::Float(123.456).to_string(), "123.456");
        assert_eq!(Value::Float(-0.0).to_string(), "-0.0");
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn json_conversion_keeps_structure() {
        let json = json!({"key": "value", "number": 42, "items": [1, 2.5, null]});
        let value = Value::from_json_value(json.clone());
        assert_eq!(value.get("number"), Some(&Value::Int(42)));
        assert_eq!(value.to_json_value(), json);
    }

    #[test]
    fn data_kinds() {
        assert!(Value::from("x").is_data());
        assert!(Value::Dict(vec![]).is_data());
        assert!(!Value::None.is_data());
        assert!(
            !Value::Repr {
                type_name: "module".to_owned(),
                repr: "<module 'math'>".to_owned(),
            }
            .is_data()
        );
    }
}
