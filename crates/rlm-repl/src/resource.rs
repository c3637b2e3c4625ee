use std::{
    fmt,
    os::raw::{c_long, c_ulong},
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
    time::{Duration, Instant},
};

use pyo3::{
    PyTypeInfo,
    exceptions::{PyRuntimeError, PyTimeoutError},
    ffi,
    prelude::*,
};

/// Error returned when a fragment exceeds an execution bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

#[derive(Debug, Default)]
struct WatchState {
    finished: bool,
    fired: bool,
}

/// Interrupts the executing thread with `TimeoutError` once a deadline passes.
///
/// The exception is delivered asynchronously, so it is raised at the next bytecode
/// boundary of the fragment. Code that catches `TimeoutError` (or a bare `Exception`)
/// can swallow it; the result is still reported as timed out.
pub(crate) struct Watchdog {
    thread_id: c_long,
    limit: Duration,
    started: Instant,
    state: Arc<Mutex<WatchState>>,
    done: mpsc::Sender<()>,
}

impl Watchdog {
    /// Arms a watchdog for the calling thread.
    pub(crate) fn arm(py: Python<'_>, limit: Duration) -> PyResult<Self> {
        // `get_ident` is an unsigned long; the C API takes the same bits as a signed one
        let ident: c_ulong = py.import("threading")?.call_method0("get_ident")?.extract()?;
        let thread_id = ident.cast_signed();
        let state = Arc::new(Mutex::new(WatchState::default()));
        let (done, finished) = mpsc::channel::<()>();
        let shared = Arc::clone(&state);
        thread::Builder::new()
            .name("rlm-repl-watchdog".to_owned())
            .spawn(move || {
                if finished.recv_timeout(limit) != Err(mpsc::RecvTimeoutError::Timeout) {
                    return;
                }
                // the GIL is taken before the state lock, matching `disarm`
                Python::attach(|py| {
                    let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                    if state.finished {
                        return;
                    }
                    // SAFETY: the GIL is held, and the exception type is a static type object.
                    unsafe {
                        ffi::PyThreadState_SetAsyncExc(thread_id, PyTimeoutError::type_object_raw(py).cast());
                    }
                    state.fired = true;
                    tracing::debug!(?limit, "fragment interrupted by time limit");
                });
            })
            .map_err(|err| PyRuntimeError::new_err(err.to_string()))?;
        Ok(Self {
            thread_id,
            limit,
            started: Instant::now(),
            state,
            done,
        })
    }

    /// Stops the watchdog and reports whether it fired.
    ///
    /// Must be called with the GIL held on the watched thread. A pending exception that
    /// the fragment never reached is cancelled so it cannot surface later.
    pub(crate) fn disarm(self, _py: Python<'_>) -> Option<ResourceError> {
        let fired = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.finished = true;
            state.fired
        };
        // the watchdog thread may already be gone
        let _ = self.done.send(());
        if !fired {
            return None;
        }
        // SAFETY: the GIL is held; a null exception clears any pending async exception.
        unsafe {
            ffi::PyThreadState_SetAsyncExc(self.thread_id, std::ptr::null_mut());
        }
        Some(ResourceError::Time {
            limit: self.limit,
            elapsed: self.started.elapsed(),
        })
    }
}
