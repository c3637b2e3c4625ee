//! The restricted builtin set exposed to REPL fragments.
//!
//! The allow-list is plain data so it can be audited and tested on its own. A fragment's
//! `__builtins__` is built from exactly these names; anything absent from both lists is
//! simply undefined inside the sandbox and raises `NameError` when used.

use pyo3::{prelude::*, types::PyDict};

/// Core functions and types available to fragments.
///
/// `__import__` and `open` are deliberate: fragments may import the standard library and
/// use files, with the working directory pinned to the session scratch directory during
/// execution. `__build_class__` is what the `class` statement compiles to.
pub const SAFE_BUILTINS: &[&str] = &[
    "print",
    "len",
    "str",
    "int",
    "float",
    "list",
    "dict",
    "set",
    "frozenset",
    "tuple",
    "bool",
    "type",
    "isinstance",
    "issubclass",
    "enumerate",
    "zip",
    "map",
    "filter",
    "sorted",
    "reversed",
    "range",
    "min",
    "max",
    "sum",
    "abs",
    "round",
    "any",
    "all",
    "pow",
    "divmod",
    "chr",
    "ord",
    "hex",
    "bin",
    "oct",
    "repr",
    "ascii",
    "format",
    "hash",
    "id",
    "iter",
    "next",
    "slice",
    "callable",
    "hasattr",
    "getattr",
    "setattr",
    "delattr",
    "dir",
    "vars",
    "bytes",
    "bytearray",
    "memoryview",
    "complex",
    "object",
    "super",
    "property",
    "staticmethod",
    "classmethod",
    "__import__",
    "__build_class__",
    "open",
];

/// Exception classes available to fragments for raising and catching.
pub const SAFE_EXCEPTIONS: &[&str] = &[
    "BaseException",
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "AttributeError",
    "FileNotFoundError",
    "OSError",
    "IOError",
    "RuntimeError",
    "NameError",
    "ImportError",
    "StopIteration",
    "AssertionError",
    "NotImplementedError",
    "ArithmeticError",
    "ZeroDivisionError",
    "LookupError",
    "TimeoutError",
    "Warning",
];

/// Builtins that are explicitly bound to `None` so calling them fails loudly.
///
/// These would let a fragment evaluate arbitrary strings, read interactive input or
/// reach the raw namespace dicts.
pub const BLOCKED_BUILTINS: &[&str] = &["input", "eval", "exec", "compile", "globals", "locals"];

/// Returns true if `name` is callable from fragments.
#[must_use]
pub fn is_allowed(name: &str) -> bool {
    SAFE_BUILTINS.contains(&name) || SAFE_EXCEPTIONS.contains(&name)
}

/// Returns true if `name` is explicitly blocked.
#[must_use]
pub fn is_blocked(name: &str) -> bool {
    BLOCKED_BUILTINS.contains(&name)
}

/// Builds the `__builtins__` dict for a session from the allow-list.
///
/// Names missing from the running interpreter (e.g. a removed alias) are skipped rather
/// than failing setup.
pub(crate) fn restricted_builtins(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let module = py.import("builtins")?;
    let dict = PyDict::new(py);
    for name in SAFE_BUILTINS.iter().chain(SAFE_EXCEPTIONS) {
        if let Ok(value) = module.getattr(*name) {
            dict.set_item(*name, value)?;
        }
    }
    for name in BLOCKED_BUILTINS {
        dict.set_item(*name, py.None())?;
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_and_block_lists_are_disjoint() {
        for name in BLOCKED_BUILTINS {
            assert!(!is_allowed(name), "{name} is both allowed and blocked");
        }
    }

    #[test]
    fn escape_hatches_are_blocked() {
        for name in ["eval", "exec", "compile", "input", "globals", "locals"] {
            assert!(is_blocked(name));
        }
        assert!(!is_allowed("breakpoint"));
        assert!(!is_allowed("exit"));
    }

    #[test]
    fn restricted_dict_contains_exactly_the_lists() {
        Python::attach(|py| {
            let dict = restricted_builtins(py).unwrap();
            assert!(dict.get_item("len").unwrap().is_some());
            assert!(dict.get_item("eval").unwrap().unwrap().is_none());
            assert!(dict.get_item("breakpoint").unwrap().is_none());
            assert_eq!(dict.len(), SAFE_BUILTINS.len() + SAFE_EXCEPTIONS.len() + BLOCKED_BUILTINS.len());
        });
    }
}
