use std::{
    ffi::CString,
    path::{Path, PathBuf},
    time::Instant,
};

use indexmap::IndexMap;
use pyo3::{
    exceptions::{PyTimeoutError, PyValueError},
    prelude::*,
};
use tempfile::TempDir;

use crate::{
    config::{ExecutionLimits, HandlerAddress, ReplConfig},
    context::{ContextPayload, SlotKind},
    convert::messages_to_py,
    environment::{Environment, EnvironmentKind, LifecycleState},
    error::EnvError,
    helpers::LmBridge,
    io::{OutputCapture, WorkingDir, execution_lock},
    message::Message,
    namespace::Namespace,
    resource::Watchdog,
    result::ReplResult,
    value::Value,
};

/// Prefix of every session scratch directory.
const SCRATCH_PREFIX: &str = "repl_env_";

/// An in-process REPL session backed by the embedded interpreter.
///
/// The namespace always survives between fragments of one session. `persistent` only
/// records whether the orchestrator may reuse this session across completions.
///
/// Dropping the session runs [`LocalRepl::cleanup`], so the namespace and scratch
/// directory are released on every exit path, including unwinding.
///
/// ```no_run
/// use rlm_repl::{LocalRepl, ReplConfig, Value};
///
/// let mut repl = LocalRepl::new(ReplConfig::new().context_payload("some document"))?;
/// let result = repl.execute_code("n = len(context)\nprint(n)")?;
/// assert_eq!(result.stdout, "13\n");
/// assert_eq!(result.locals["n"], Value::Int(13));
/// # Ok::<(), rlm_repl::EnvError>(())
/// ```
#[derive(Debug)]
pub struct LocalRepl {
    persistent: bool,
    limits: ExecutionLimits,
    state: LifecycleState,
    namespace: Option<Namespace>,
    scratch: Option<TempDir>,
    scratch_path: Option<PathBuf>,
    lm: LmBridge,
    initial_context: Option<ContextPayload>,
    context_count: usize,
    history_count: usize,
}

impl LocalRepl {
    /// Validates `config` and returns a ready session with the initial context loaded.
    pub fn new(config: ReplConfig) -> Result<Self, EnvError> {
        config.validate()?;
        let mut repl = Self {
            persistent: config.persistent,
            limits: config.limits,
            state: LifecycleState::Uninitialized,
            namespace: None,
            scratch: None,
            scratch_path: None,
            lm: LmBridge::new(config.lm_handler_address, config.limits.lm_request_timeout),
            initial_context: config.context_payload,
            context_count: 0,
            history_count: 0,
        };
        repl.setup()?;
        Ok(repl)
    }

    /// Allocates the scratch directory and namespace, then loads the initial context.
    ///
    /// Calling this on a ready session does nothing.
    pub fn setup(&mut self) -> Result<(), EnvError> {
        match self.state {
            LifecycleState::Ready | LifecycleState::Executing => return Ok(()),
            LifecycleState::CleanedUp => {
                return Err(EnvError::InvalidState {
                    operation: "set up",
                    state: self.state,
                });
            }
            LifecycleState::Uninitialized => {}
        }
        let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
        let namespace = Python::attach(|py| -> PyResult<Namespace> {
            let namespace = Namespace::new(py);
            namespace.reinstall(py, &self.lm)?;
            Ok(namespace)
        })?;
        tracing::debug!(scratch = %scratch.path().display(), "local REPL ready");
        self.scratch_path = Some(scratch.path().to_path_buf());
        self.scratch = Some(scratch);
        self.namespace = Some(namespace);
        self.state = LifecycleState::Ready;

        if let Some(payload) = self.initial_context.take() {
            self.add_context(payload, Some(0))?;
        }
        Ok(())
    }

    /// Replaces context slot 0.
    pub fn load_context(&mut self, payload: impl Into<ContextPayload>) -> Result<(), EnvError> {
        self.add_context(payload, Some(0)).map(|_| ())
    }

    /// Stores `payload` as `context_{index}` and returns the index used.
    ///
    /// Without an explicit index the next free slot is used. Slot 0 is also bound to
    /// the bare name `context`.
    pub fn add_context(&mut self, payload: impl Into<ContextPayload>, index: Option<usize>) -> Result<usize, EnvError> {
        let payload = payload.into();
        let index = index.unwrap_or(self.context_count);
        let namespace = self.ready_namespace("add context")?;
        Python::attach(|py| -> PyResult<()> { bind_slot(py, namespace, SlotKind::Context, index, &payload.to_py(py)?) })?;
        self.context_count = self.context_count.max(index.saturating_add(1));
        tracing::debug!(index, count = self.context_count, "context loaded");
        Ok(index)
    }

    /// Stores a conversation as `history_{index}` and returns the index used.
    ///
    /// Each message becomes a `{"role": ..., "content": ...}` dict. Slot 0 is also bound
    /// to the bare name `history`.
    pub fn add_history(&mut self, messages: &[Message], index: Option<usize>) -> Result<usize, EnvError> {
        let index = index.unwrap_or(self.history_count);
        let namespace = self.ready_namespace("add history")?;
        Python::attach(|py| -> PyResult<()> {
            bind_slot(py, namespace, SlotKind::History, index, &messages_to_py(py, messages)?)
        })?;
        self.history_count = self.history_count.max(index.saturating_add(1));
        tracing::debug!(index, messages = messages.len(), count = self.history_count, "history loaded");
        Ok(index)
    }

    #[must_use]
    pub fn get_context_count(&self) -> usize {
        self.context_count
    }

    #[must_use]
    pub fn get_history_count(&self) -> usize {
        self.history_count
    }

    /// Points `llm_query` at a different handler; takes effect on the next call.
    pub fn update_handler_address(&mut self, address: HandlerAddress) {
        tracing::debug!(%address, "LM handler address updated");
        self.lm.set_address(Some(address));
    }

    #[must_use]
    pub fn handler_address(&self) -> Option<HandlerAddress> {
        self.lm.address()
    }

    /// The session scratch directory.
    ///
    /// Still returned after cleanup (when it no longer exists); `None` before setup.
    #[must_use]
    pub fn temp_dir(&self) -> Option<&Path> {
        self.scratch_path.as_deref()
    }

    #[must_use]
    pub fn persistent(&self) -> bool {
        self.persistent
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Snapshot of every user-visible binding; empty once cleaned up.
    pub fn locals(&self) -> Result<IndexMap<String, Value>, EnvError> {
        match &self.namespace {
            Some(namespace) => Ok(Python::attach(|py| namespace.user_bindings(py))?),
            None => Ok(IndexMap::new()),
        }
    }

    /// Snapshot of one binding, or `None` if it is not bound.
    pub fn get_variable(&self, name: &str) -> Result<Option<Value>, EnvError> {
        match &self.namespace {
            Some(namespace) => Ok(Python::attach(|py| namespace.get(py, name))?),
            None => Ok(None),
        }
    }

    /// The printable form of one binding, exactly as Python's `str()` renders it.
    ///
    /// A `__str__` that raises is reported as an error.
    pub fn get_variable_str(&self, name: &str) -> Result<Option<String>, EnvError> {
        match &self.namespace {
            Some(namespace) => Ok(Python::attach(|py| namespace.get_str(py, name))?),
            None => Ok(None),
        }
    }

    /// Runs one fragment.
    ///
    /// Anything the fragment raises, including syntax errors and the time limit, is
    /// reported in the result's stderr. Bindings made before a fault are kept.
    pub fn execute_code(&mut self, code: &str) -> Result<ReplResult, EnvError> {
        let state = self.state;
        let (Some(namespace), LifecycleState::Ready) = (&self.namespace, state) else {
            return Err(EnvError::InvalidState {
                operation: "execute code",
                state,
            });
        };
        let Some(scratch) = self.scratch_path.as_deref() else {
            return Err(EnvError::InvalidState {
                operation: "execute code",
                state,
            });
        };
        self.state = LifecycleState::Executing;

        let outcome = {
            let _lock = execution_lock();
            Python::attach(|py| run_fragment(py, namespace, &self.lm, &self.limits, scratch, code))
        };

        self.state = LifecycleState::Ready;
        let result = outcome?;
        tracing::debug!(
            fragment_len = code.len(),
            elapsed = ?result.execution_time,
            failed = !result.stderr.is_empty(),
            llm_calls = result.llm_calls.len(),
            "fragment executed"
        );
        Ok(result)
    }

    /// Clears the namespace and deletes the scratch directory.
    ///
    /// Idempotent; after this no further fragments can run. The namespace is cleared
    /// even if the directory cannot be removed.
    pub fn cleanup(&mut self) -> Result<(), EnvError> {
        if self.state == LifecycleState::CleanedUp {
            return Ok(());
        }
        self.state = LifecycleState::CleanedUp;
        self.context_count = 0;
        self.history_count = 0;
        self.initial_context = None;
        self.lm.take_calls();
        if let Some(namespace) = self.namespace.take() {
            // clearing breaks the cycle between the dict and the helpers that capture it
            Python::attach(|py| namespace.clear(py));
        }
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(err) = scratch.close() {
                tracing::warn!(%err, path = %path.display(), "failed to remove scratch directory");
                return Err(err.into());
            }
        }
        tracing::debug!("local REPL cleaned up");
        Ok(())
    }

    fn ready_namespace(&self, operation: &'static str) -> Result<&Namespace, EnvError> {
        match (&self.namespace, self.state) {
            (Some(namespace), LifecycleState::Ready) => Ok(namespace),
            (_, state) => Err(EnvError::InvalidState { operation, state }),
        }
    }
}

impl Drop for LocalRepl {
    fn drop(&mut self) {
        if let Err(err) = self.cleanup() {
            tracing::warn!(%err, "local REPL cleanup failed");
        }
    }
}

impl Environment for LocalRepl {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::NonIsolated
    }

    fn persistent(&self) -> bool {
        self.persistent
    }

    fn state(&self) -> LifecycleState {
        self.state
    }

    fn setup(&mut self) -> Result<(), EnvError> {
        Self::setup(self)
    }

    fn load_context(&mut self, payload: ContextPayload) -> Result<(), EnvError> {
        Self::load_context(self, payload)
    }

    fn execute_code(&mut self, code: &str) -> Result<ReplResult, EnvError> {
        Self::execute_code(self, code)
    }

    fn cleanup(&mut self) -> Result<(), EnvError> {
        Self::cleanup(self)
    }

    fn get_variable(&self, name: &str) -> Result<Option<Value>, EnvError> {
        Self::get_variable(self, name)
    }

    fn get_variable_str(&self, name: &str) -> Result<Option<String>, EnvError> {
        Self::get_variable_str(self, name)
    }
}

/// Binds `slot_{index}`, plus the bare alias when `index` is 0.
fn bind_slot(
    py: Python<'_>,
    namespace: &Namespace,
    kind: SlotKind,
    index: usize,
    value: &Bound<'_, PyAny>,
) -> PyResult<()> {
    namespace.set(py, &kind.binding(index), value)?;
    if index == 0 {
        namespace.set(py, kind.alias(), value)?;
    }
    Ok(())
}

/// Runs `code` with output captured, the scratch directory as cwd and the watchdog armed.
///
/// Must be called with the execution lock held.
fn run_fragment(
    py: Python<'_>,
    namespace: &Namespace,
    lm: &LmBridge,
    limits: &ExecutionLimits,
    scratch: &Path,
    code: &str,
) -> Result<ReplResult, EnvError> {
    namespace.reinstall(py, lm)?;
    lm.take_calls();
    let _cwd = WorkingDir::enter(scratch)?;
    let capture = OutputCapture::start(py)?;

    let started = Instant::now();
    let watchdog = limits.max_duration.map(|limit| Watchdog::arm(py, limit)).transpose()?;
    let outcome = run_source(py, namespace, code);
    let timed_out = watchdog.and_then(|watchdog| watchdog.disarm(py));
    let execution_time = started.elapsed();

    let stdout = capture.stdout()?;
    let mut stderr = capture.stderr()?;
    drop(capture);

    if let Err(err) = &outcome {
        // the watchdog's own exception is reported below with the limit attached
        if !(timed_out.is_some() && err.is_instance_of::<PyTimeoutError>(py)) {
            append_line(&mut stderr, &describe_fault(py, err));
        }
    }
    if let Some(limit) = &timed_out {
        tracing::warn!(%limit, "fragment exceeded its time limit");
        append_line(&mut stderr, &format!("TimeoutError: {limit}"));
    }

    Ok(ReplResult {
        stdout,
        stderr,
        locals: namespace.user_bindings(py)?,
        execution_time,
        llm_calls: lm.take_calls(),
    })
}

fn run_source(py: Python<'_>, namespace: &Namespace, code: &str) -> PyResult<()> {
    let source =
        CString::new(code).map_err(|_| PyValueError::new_err("source code string cannot contain null bytes"))?;
    let dict = namespace.bind(py);
    py.run(&source, Some(dict), Some(dict))
}

/// Renders a fault as `TypeName: message`, the way the interpreter's last traceback line
/// reads.
fn describe_fault(py: Python<'_>, err: &PyErr) -> String {
    let type_name = err
        .get_type(py)
        .name()
        .map_or_else(|_| "Exception".to_owned(), |name| name.to_string());
    let message = err.value(py).str().map(|message| message.to_string()).unwrap_or_default();
    if message.is_empty() {
        type_name
    } else {
        format!("{type_name}: {message}")
    }
}

fn append_line(buffer: &mut String, line: &str) {
    if !buffer.is_empty() && !buffer.ends_with('\n') {
        buffer.push('\n');
    }
    buffer.push_str(line);
}

/// Prefix of the stderr line reported when a fragment exceeds its time limit.
pub const TIMEOUT_MARKER: &str = "TimeoutError: time limit exceeded";
