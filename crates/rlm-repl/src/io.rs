//! Process-wide I/O redirection around one fragment.
//!
//! `sys.stdout`, `sys.stderr` and the working directory are process globals, so two
//! sessions executing at the same time would see each other's output and files. Every
//! fragment therefore runs under [`EXECUTION_LOCK`], which is always taken before the
//! interpreter is attached; taking it while attached could deadlock against a thread
//! that holds the lock and waits for the GIL.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use pyo3::{prelude::*, types::PyModule};

/// Serializes fragment execution across all sessions in the process.
static EXECUTION_LOCK: Mutex<()> = Mutex::new(());

/// Acquires the execution lock.
///
/// A panic inside one fragment must not wedge every other session, so poisoning is
/// ignored; the guarded state is restored by the drop guards below either way.
pub(crate) fn execution_lock() -> MutexGuard<'static, ()> {
    EXECUTION_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replaces `sys.stdout` and `sys.stderr` with in-memory buffers until dropped.
pub(crate) struct OutputCapture<'py> {
    sys: Bound<'py, PyModule>,
    saved_stdout: Bound<'py, PyAny>,
    saved_stderr: Bound<'py, PyAny>,
    stdout: Bound<'py, PyAny>,
    stderr: Bound<'py, PyAny>,
}

impl<'py> OutputCapture<'py> {
    pub(crate) fn start(py: Python<'py>) -> PyResult<Self> {
        let sys = py.import("sys")?;
        let string_io = py.import("io")?.getattr("StringIO")?;
        let stdout = string_io.call0()?;
        let stderr = string_io.call0()?;
        let saved_stdout = sys.getattr("stdout")?;
        let saved_stderr = sys.getattr("stderr")?;
        sys.setattr("stdout", &stdout)?;
        sys.setattr("stderr", &stderr)?;
        Ok(Self {
            sys,
            saved_stdout,
            saved_stderr,
            stdout,
            stderr,
        })
    }

    /// Everything written to `sys.stdout` so far.
    pub(crate) fn stdout(&self) -> PyResult<String> {
        self.stdout.call_method0("getvalue")?.extract()
    }

    /// Everything written to `sys.stderr` so far.
    pub(crate) fn stderr(&self) -> PyResult<String> {
        self.stderr.call_method0("getvalue")?.extract()
    }
}

impl Drop for OutputCapture<'_> {
    fn drop(&mut self) {
        let restored = self
            .sys
            .setattr("stdout", &self.saved_stdout)
            .and_then(|()| self.sys.setattr("stderr", &self.saved_stderr));
        if let Err(err) = restored {
            tracing::warn!(%err, "failed to restore sys.stdout/sys.stderr");
        }
    }
}

/// Switches the process working directory until dropped.
pub(crate) struct WorkingDir {
    previous: Option<PathBuf>,
}

impl WorkingDir {
    /// Changes into `dir`.
    ///
    /// If the current directory cannot be read (it may have been deleted), the switch
    /// still happens and nothing is restored afterwards.
    pub(crate) fn enter(dir: &Path) -> std::io::Result<Self> {
        let previous = std::env::current_dir().ok();
        std::env::set_current_dir(dir)?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        if let Some(previous) = &self.previous
            && let Err(err) = std::env::set_current_dir(previous)
        {
            tracing::warn!(%err, path = %previous.display(), "failed to restore working directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_and_restores_streams() {
        let _lock = execution_lock();
        Python::attach(|py| {
            let sys = py.import("sys").unwrap();
            let original = sys.getattr("stdout").unwrap();
            {
                let capture = OutputCapture::start(py).unwrap();
                py.run(c"import sys\nprint('out')\nprint('err', file=sys.stderr)", None, None)
                    .unwrap();
                assert_eq!(capture.stdout().unwrap(), "out\n");
                assert_eq!(capture.stderr().unwrap(), "err\n");
            }
            assert!(sys.getattr("stdout").unwrap().is(&original));
        });
    }

    #[test]
    fn working_dir_is_restored() {
        let _lock = execution_lock();
        let before = std::env::current_dir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        {
            let _cwd = WorkingDir::enter(scratch.path()).unwrap();
            assert_eq!(
                std::env::current_dir().unwrap().canonicalize().unwrap(),
                scratch.path().canonicalize().unwrap()
            );
        }
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}
