use std::{fmt, io};

use pyo3::PyErr;

use crate::environment::LifecycleState;

/// Invalid construction parameters for an environment.
///
/// These are operator errors, so they are raised immediately when the environment is
/// built rather than surfaced later as fragment output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The environment variant cannot retain a namespace across calls.
    UnsupportedPersistence {
        /// Name of the rejecting environment variant.
        environment: &'static str,
    },
    /// Any other invalid parameter.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPersistence { environment } => {
                write!(f, "persistent REPLs are not supported for environment: {environment}")
            }
            Self::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised by environment operations.
///
/// Failures of agent-submitted code never appear here: they are captured as
/// `ReplResult::stderr`. This type only covers misuse and host-side failures.
#[derive(Debug)]
pub enum EnvError {
    /// The environment was built with invalid parameters.
    Config(ConfigError),
    /// The operation is not valid in the current lifecycle state
    /// (e.g. `execute_code` after `cleanup`).
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the environment was in.
        state: LifecycleState,
    },
    /// The embedded interpreter failed outside of a fragment (namespace setup, value
    /// conversion).
    Interpreter(String),
    /// Scratch-directory I/O failed.
    Io(io::Error),
    /// An isolated backend reported a failure.
    Backend(String),
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::InvalidState { operation, state } => {
                write!(f, "invalid state: cannot {operation} while {state}")
            }
            Self::Interpreter(msg) => write!(f, "interpreter error: {msg}"),
            Self::Io(e) => write!(f, "scratch directory error: {e}"),
            Self::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for EnvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for EnvError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl From<io::Error> for EnvError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<PyErr> for EnvError {
    fn from(error: PyErr) -> Self {
        Self::Interpreter(error.to_string())
    }
}
