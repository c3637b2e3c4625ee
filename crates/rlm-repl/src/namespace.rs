use indexmap::IndexMap;
use pyo3::{prelude::*, types::PyDict};

use crate::{builtins::restricted_builtins, convert::py_to_value, helpers::LmBridge, value::Value};

/// Names starting with this prefix are internal and never shown to the agent.
pub const RESERVED_PREFIX: char = '_';

/// Pseudo-functions injected into every session namespace.
pub const HELPER_NAMES: &[&str] = &["FINAL_VAR", "SHOW_VARS", "llm_query", "llm_query_batched"];

/// Returns true if `name` belongs in the user-facing projection of a namespace.
#[must_use]
pub fn is_user_visible(name: &str) -> bool {
    !name.starts_with(RESERVED_PREFIX) && !HELPER_NAMES.contains(&name)
}

/// The variable bindings of one REPL session.
///
/// Fragments run with this dict as both globals and locals, so top-level assignments,
/// definitions and imports all land here and persist between fragments.
#[derive(Debug)]
pub(crate) struct Namespace {
    dict: Py<PyDict>,
}

impl Namespace {
    pub(crate) fn new(py: Python<'_>) -> Self {
        Self {
            dict: PyDict::new(py).unbind(),
        }
    }

    pub(crate) fn bind<'a, 'py>(&'a self, py: Python<'py>) -> &'a Bound<'py, PyDict> {
        self.dict.bind(py)
    }

    /// Restores the builtins and helpers, overwriting anything a fragment rebound.
    pub(crate) fn reinstall(&self, py: Python<'_>, lm: &LmBridge) -> PyResult<()> {
        let dict = self.bind(py);
        dict.set_item("__builtins__", restricted_builtins(py)?)?;
        dict.set_item("__name__", "__main__")?;
        crate::helpers::install(py, &self.dict, lm)
    }

    pub(crate) fn set(&self, py: Python<'_>, name: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        self.bind(py).set_item(name, value)
    }

    /// Snapshot of one binding, user-visible or not.
    pub(crate) fn get(&self, py: Python<'_>, name: &str) -> PyResult<Option<Value>> {
        match self.bind(py).get_item(name)? {
            Some(obj) => py_to_value(&obj).map(Some),
            None => Ok(None),
        }
    }

    /// `str()` of one binding, computed by the interpreter.
    pub(crate) fn get_str(&self, py: Python<'_>, name: &str) -> PyResult<Option<String>> {
        match self.bind(py).get_item(name)? {
            Some(obj) => Ok(Some(obj.str()?.to_string())),
            None => Ok(None),
        }
    }

    /// Snapshot of every user-visible binding, in insertion order.
    pub(crate) fn user_bindings(&self, py: Python<'_>) -> PyResult<IndexMap<String, Value>> {
        user_bindings(self.bind(py))
    }

    pub(crate) fn clear(&self, py: Python<'_>) {
        self.bind(py).clear();
    }
}

/// Projects a namespace dict onto its user-visible bindings.
///
/// Non-string keys can only appear through direct dict manipulation and are skipped.
pub(crate) fn user_bindings(dict: &Bound<'_, PyDict>) -> PyResult<IndexMap<String, Value>> {
    let mut bindings = IndexMap::new();
    for (key, value) in dict.iter() {
        let Ok(name) = key.extract::<String>() else {
            continue;
        };
        if is_user_visible(&name) {
            bindings.insert(name, py_to_value(&value)?);
        }
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_rules() {
        assert!(is_user_visible("answer"));
        assert!(is_user_visible("context_0"));
        assert!(!is_user_visible("_scratch"));
        assert!(!is_user_visible("__builtins__"));
        assert!(!is_user_visible("llm_query"));
        assert!(!is_user_visible("FINAL_VAR"));
    }

    #[test]
    fn projection_hides_reserved_names() {
        Python::attach(|py| {
            let namespace = Namespace::new(py);
            namespace.reinstall(py, &LmBridge::new(None, None)).unwrap();
            py.run(
                c"b = 2\na = 1\n_hidden = 3",
                Some(namespace.bind(py)),
                Some(namespace.bind(py)),
            )
            .unwrap();
            let names: Vec<String> = namespace.user_bindings(py).unwrap().into_keys().collect();
            assert_eq!(names, ["b", "a"]);
            assert_eq!(namespace.get(py, "_hidden").unwrap(), Some(Value::Int(3)));
        });
    }

    #[test]
    fn reinstall_restores_shadowed_helpers() {
        Python::attach(|py| {
            let namespace = Namespace::new(py);
            let lm = LmBridge::new(None, None);
            namespace.reinstall(py, &lm).unwrap();
            namespace.set(py, "FINAL_VAR", &1i64.into_pyobject(py).unwrap()).unwrap();
            namespace.reinstall(py, &lm).unwrap();
            let helper = namespace.bind(py).get_item("FINAL_VAR").unwrap().unwrap();
            assert!(helper.is_callable());
        });
    }
}
