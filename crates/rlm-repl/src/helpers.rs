//! Pseudo-functions injected into every session namespace.
//!
//! None of them raise for lookup or remote-call failures: the agent sees the problem as
//! an ordinary string it can react to. Only argument errors (a missing prompt, a
//! non-iterable prompt list) surface as Python exceptions, and those are captured on
//! stderr like any other fragment fault.

use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use pyo3::{
    exceptions::PyTypeError,
    prelude::*,
    types::{PyCFunction, PyDict, PyTuple},
};

use crate::{
    config::HandlerAddress,
    lm_client::{LmClient, LmCompletion, LmError},
    namespace::user_bindings,
    value::Value,
};

/// Connection to the LM handler shared by an environment and its injected closures.
///
/// Cloning shares the address cell and the call log, so `update_handler_address` on the
/// environment is seen by the next `llm_query` without reinstalling anything.
#[derive(Debug, Clone)]
pub(crate) struct LmBridge {
    address: Arc<RwLock<Option<HandlerAddress>>>,
    timeout: Option<Duration>,
    calls: Arc<Mutex<Vec<LmCompletion>>>,
}

impl LmBridge {
    pub(crate) fn new(address: Option<HandlerAddress>, timeout: Option<Duration>) -> Self {
        Self {
            address: Arc::new(RwLock::new(address)),
            timeout,
            calls: Arc::default(),
        }
    }

    pub(crate) fn address(&self) -> Option<HandlerAddress> {
        self.address.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_address(&self, address: Option<HandlerAddress>) {
        *self.address.write().unwrap_or_else(PoisonError::into_inner) = address;
    }

    /// Drains the completions recorded since the last call.
    pub(crate) fn take_calls(&self) -> Vec<LmCompletion> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn client(&self) -> Result<LmClient, LmError> {
        self.address()
            .map(|address| LmClient::new(address, self.timeout))
            .ok_or(LmError::NotConfigured)
    }

    fn record(&self, completions: impl IntoIterator<Item = LmCompletion>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(completions);
    }

    /// Runs one query, rendering any failure as an `Error: ...` string.
    pub(crate) fn query(&self, prompt: &str, model: Option<&str>) -> String {
        match self.client().and_then(|client| client.completion(prompt, model)) {
            Ok(completion) => {
                let response = completion.response.clone();
                self.record([completion]);
                response
            }
            Err(err) => {
                tracing::warn!(%err, "llm_query failed");
                format!("Error: {err}")
            }
        }
    }

    /// Runs a batched query; on failure every prompt gets the same error string.
    pub(crate) fn query_batched(&self, prompts: &[String], model: Option<&str>) -> Vec<String> {
        if prompts.is_empty() {
            return Vec::new();
        }
        match self.client().and_then(|client| client.completion_batched(prompts, model)) {
            Ok(completions) => {
                let responses = completions.iter().map(|c| c.response.clone()).collect();
                self.record(completions);
                responses
            }
            Err(err) => {
                tracing::warn!(%err, prompts = prompts.len(), "llm_query_batched failed");
                vec![format!("Error: {err}"); prompts.len()]
            }
        }
    }
}

/// Binds the helper functions into `namespace`.
pub(crate) fn install(py: Python<'_>, namespace: &Py<PyDict>, lm: &LmBridge) -> PyResult<()> {
    let dict = namespace.bind(py);
    dict.set_item("FINAL_VAR", final_var(py, namespace.clone_ref(py))?)?;
    dict.set_item("SHOW_VARS", show_vars(py, namespace.clone_ref(py))?)?;
    dict.set_item("llm_query", llm_query(py, lm.clone())?)?;
    dict.set_item("llm_query_batched", llm_query_batched(py, lm.clone())?)?;
    Ok(())
}

/// Strips the whitespace and quotes a model tends to leave around a variable name.
pub(crate) fn clean_variable_name(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

fn final_var<'py>(py: Python<'py>, namespace: Py<PyDict>) -> PyResult<Bound<'py, PyCFunction>> {
    PyCFunction::new_closure(
        py,
        Some(c"FINAL_VAR"),
        Some(c"FINAL_VAR(name) -> str: the printable form of a namespace variable."),
        move |args: &Bound<'_, PyTuple>, kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<String> {
            let py = args.py();
            let raw = argument(args, kwargs, 0, "name")?
                .ok_or_else(|| PyTypeError::new_err("FINAL_VAR() missing required argument: 'name'"))?
                .str()?
                .to_string();
            let name = clean_variable_name(&raw);
            let dict = namespace.bind(py);
            if let Some(value) = dict.get_item(name)? {
                return Ok(value.str()?.to_string());
            }
            let available: Vec<Value> = user_bindings(dict)?.into_keys().map(Value::String).collect();
            tracing::warn!(name, "FINAL_VAR references an unknown variable");
            Ok(format!(
                "Error: Variable '{name}' not found. Available variables: {}",
                Value::List(available).py_repr()
            ))
        },
    )
}

fn show_vars<'py>(py: Python<'py>, namespace: Py<PyDict>) -> PyResult<Bound<'py, PyCFunction>> {
    PyCFunction::new_closure(
        py,
        Some(c"SHOW_VARS"),
        Some(c"SHOW_VARS() -> str: the user variables and their types."),
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<String> {
            let bindings = user_bindings(namespace.bind(args.py()))?;
            if bindings.is_empty() {
                return Ok("No variables created yet. Use ```repl``` blocks to create variables.".to_owned());
            }
            let listing = Value::dict(
                bindings
                    .iter()
                    .map(|(name, value)| (name.as_str(), Value::from(value.type_name()))),
            );
            Ok(format!("Available variables: {}", listing.py_repr()))
        },
    )
}

fn llm_query(py: Python<'_>, lm: LmBridge) -> PyResult<Bound<'_, PyCFunction>> {
    PyCFunction::new_closure(
        py,
        Some(c"llm_query"),
        Some(c"llm_query(prompt, model=None) -> str: ask the LM handler a question."),
        move |args: &Bound<'_, PyTuple>, kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<String> {
            let prompt = argument(args, kwargs, 0, "prompt")?
                .ok_or_else(|| PyTypeError::new_err("llm_query() missing required argument: 'prompt'"))?
                .str()?
                .to_string();
            let model = optional_string(argument(args, kwargs, 1, "model")?)?;
            let lm = lm.clone();
            Ok(args.py().detach(move || lm.query(&prompt, model.as_deref())))
        },
    )
}

fn llm_query_batched(py: Python<'_>, lm: LmBridge) -> PyResult<Bound<'_, PyCFunction>> {
    PyCFunction::new_closure(
        py,
        Some(c"llm_query_batched"),
        Some(c"llm_query_batched(prompts, model=None) -> list[str]: one response per prompt."),
        move |args: &Bound<'_, PyTuple>, kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<Vec<String>> {
            let prompts = argument(args, kwargs, 0, "prompts")?
                .ok_or_else(|| PyTypeError::new_err("llm_query_batched() missing required argument: 'prompts'"))?;
            let prompts: Vec<String> = prompts
                .try_iter()?
                .map(|prompt| Ok(prompt?.str()?.to_string()))
                .collect::<PyResult<_>>()?;
            let model = optional_string(argument(args, kwargs, 1, "model")?)?;
            let lm = lm.clone();
            Ok(args.py().detach(move || lm.query_batched(&prompts, model.as_deref())))
        },
    )
}

/// Fetches an argument by position, falling back to its keyword.
fn argument<'py>(
    args: &Bound<'py, PyTuple>,
    kwargs: Option<&Bound<'py, PyDict>>,
    position: usize,
    keyword: &str,
) -> PyResult<Option<Bound<'py, PyAny>>> {
    if position < args.len() {
        return args.get_item(position).map(Some);
    }
    match kwargs {
        Some(kwargs) => kwargs.get_item(keyword),
        None => Ok(None),
    }
}

fn optional_string(value: Option<Bound<'_, PyAny>>) -> PyResult<Option<String>> {
    match value {
        Some(value) if !value.is_none() => Ok(Some(value.str()?.to_string())),
        _ => Ok(None),
    }
}
