//! Type conversion between [`Value`] and live Python objects.
//!
//! This module provides bidirectional conversion:
//! - `py_to_value`: snapshot a Python object into an owned `Value`
//! - `value_to_py`: build a fresh Python object from a `Value`
//!
//! Both directions copy. A `Value` never aliases interpreter memory, which is what
//! makes context/history slots and `ReplResult::locals` independent of later mutation.

use num_bigint::BigInt;
use pyo3::{
    prelude::*,
    types::{PyBool, PyBytes, PyDict, PyFloat, PyFrozenSet, PyInt, PyList, PySet, PyString, PyTuple},
};

use crate::{message::Message, value::Value};

/// Nesting depth past which containers are captured by repr instead of structurally.
///
/// Protects the host stack against self-referencing structures such as
/// `a = []; a.append(a)`, whose Python repr already renders the cycle as `[...]`.
pub(crate) const MAX_CONVERSION_DEPTH: usize = 100;

/// Converts a Python object to a `Value` snapshot.
///
/// Objects without a structural mapping are captured as [`Value::Repr`].
///
/// # Important
/// Checks `bool` before `int` since `bool` is a subclass of `int` in Python.
pub(crate) fn py_to_value(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    py_to_value_depth(obj, 0)
}

fn py_to_value_depth(obj: &Bound<'_, PyAny>, depth: usize) -> PyResult<Value> {
    if depth > MAX_CONVERSION_DEPTH {
        return opaque(obj);
    }
    let depth = depth + 1;
    if obj.is_none() {
        Ok(Value::None)
    } else if let Ok(bool) = obj.cast::<PyBool>() {
        Ok(Value::Bool(bool.is_true()))
    } else if let Ok(int) = obj.cast::<PyInt>() {
        if let Ok(i) = int.extract::<i64>() {
            Ok(Value::Int(i))
        } else {
            let bi: BigInt = int.extract()?;
            Ok(Value::BigInt(bi))
        }
    } else if let Ok(float) = obj.cast::<PyFloat>() {
        Ok(Value::Float(float.extract()?))
    } else if let Ok(string) = obj.cast::<PyString>() {
        Ok(Value::String(string.extract()?))
    } else if let Ok(bytes) = obj.cast::<PyBytes>() {
        Ok(Value::Bytes(bytes.as_bytes().to_vec()))
    } else if let Ok(list) = obj.cast::<PyList>() {
        let items: PyResult<Vec<Value>> = list.iter().map(|item| py_to_value_depth(&item, depth)).collect();
        Ok(Value::List(items?))
    } else if let Ok(tuple) = obj.cast::<PyTuple>() {
        let items: PyResult<Vec<Value>> = tuple.iter().map(|item| py_to_value_depth(&item, depth)).collect();
        Ok(Value::Tuple(items?))
    } else if let Ok(dict) = obj.cast::<PyDict>() {
        let pairs: PyResult<Vec<(Value, Value)>> = dict
            .iter()
            .map(|(k, v)| Ok((py_to_value_depth(&k, depth)?, py_to_value_depth(&v, depth)?)))
            .collect();
        Ok(Value::Dict(pairs?))
    } else if let Ok(set) = obj.cast::<PySet>() {
        let items: PyResult<Vec<Value>> = set.iter().map(|item| py_to_value_depth(&item, depth)).collect();
        Ok(Value::Set(items?))
    } else if let Ok(frozenset) = obj.cast::<PyFrozenSet>() {
        let items: PyResult<Vec<Value>> = frozenset.iter().map(|item| py_to_value_depth(&item, depth)).collect();
        Ok(Value::Set(items?))
    } else {
        opaque(obj)
    }
}

/// Captures an object by type name and repr.
///
/// A failing `__repr__` must not turn a namespace snapshot into an error, so it
/// degrades to a placeholder.
fn opaque(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    let type_name = obj.get_type().name()?.to_string();
    let repr = match obj.repr() {
        Ok(repr) => repr.to_string(),
        Err(_) => format!("<unprintable {type_name} object>"),
    };
    Ok(Value::Repr { type_name, repr })
}

/// Converts a `Value` into a newly allocated Python object.
pub(crate) fn value_to_py<'py>(py: Python<'py>, value: &Value) -> PyResult<Bound<'py, PyAny>> {
    match value {
        Value::None => Ok(py.None().into_bound(py)),
        Value::Bool(b) => Ok(PyBool::new(py, *b).to_owned().into_any()),
        Value::Int(i) => Ok(i.into_pyobject(py)?.into_any()),
        Value::BigInt(bi) => Ok(bi.into_pyobject(py)?.into_any()),
        Value::Float(f) => Ok(f.into_pyobject(py)?.into_any()),
        Value::String(s) => Ok(PyString::new(py, s).into_any()),
        Value::Bytes(b) => Ok(PyBytes::new(py, b).into_any()),
        Value::List(items) => {
            let py_items: PyResult<Vec<Bound<'py, PyAny>>> = items.iter().map(|item| value_to_py(py, item)).collect();
            Ok(PyList::new(py, py_items?)?.into_any())
        }
        Value::Tuple(items) => {
            let py_items: PyResult<Vec<Bound<'py, PyAny>>> = items.iter().map(|item| value_to_py(py, item)).collect();
            Ok(PyTuple::new(py, py_items?)?.into_any())
        }
        Value::Dict(pairs) => {
            let dict = PyDict::new(py);
            for (k, v) in pairs {
                dict.set_item(value_to_py(py, k)?, value_to_py(py, v)?)?;
            }
            Ok(dict.into_any())
        }
        Value::Set(items) => {
            let set = PySet::empty(py)?;
            for item in items {
                set.add(value_to_py(py, item)?)?;
            }
            Ok(set.into_any())
        }
        // output-only: the best a fresh object can do is the repr text
        Value::Repr { repr, .. } => Ok(PyString::new(py, repr).into_any()),
    }
}

/// Builds a Python list of `{"role": ..., "content": ...}` dicts.
pub(crate) fn messages_to_py<'py>(py: Python<'py>, messages: &[Message]) -> PyResult<Bound<'py, PyAny>> {
    let records: PyResult<Vec<Bound<'py, PyDict>>> = messages
        .iter()
        .map(|message| {
            let record = PyDict::new(py);
            record.set_item("role", message.role.as_str())?;
            record.set_item("content", &message.content)?;
            Ok(record)
        })
        .collect();
    Ok(PyList::new(py, records?)?.into_any())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_nested_data() {
        Python::attach(|py| {
            let value = Value::dict([
                ("name", Value::from("ada")),
                ("scores", Value::List(vec![Value::Int(1), Value::Float(2.5)])),
                ("pair", Value::Tuple(vec![Value::Bool(false), Value::None])),
            ]);
            let obj = value_to_py(py, &value).unwrap();
            assert_eq!(py_to_value(&obj).unwrap(), value);
        });
    }

    #[test]
    fn big_integers_survive_conversion() {
        Python::attach(|py| {
            let obj = py.eval(c"2 ** 100", None, None).unwrap();
            let Value::BigInt(bi) = py_to_value(&obj).unwrap() else {
                panic!("expected BigInt");
            };
            assert_eq!(bi.to_string(), "1267650600228229401496703205376");
        });
    }

    #[test]
    fn self_referencing_list_falls_back_to_repr() {
        Python::attach(|py| {
            let globals = PyDict::new(py);
            py.run(c"a = []\na.append(a)", Some(&globals), None).unwrap();
            let obj = globals.get_item("a").unwrap().unwrap();
            // conversion terminates instead of recursing forever
            assert!(py_to_value(&obj).is_ok());
        });
    }

    #[test]
    fn functions_are_opaque() {
        Python::attach(|py| {
            let obj = py.eval(c"len", None, None).unwrap();
            let value = py_to_value(&obj).unwrap();
            assert_eq!(value.type_name(), "builtin_function_or_method");
            assert!(!value.is_data());
        });
    }
}
