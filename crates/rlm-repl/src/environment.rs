//! The uniform environment contract and its closed set of variants.

use std::fmt;

use crate::{
    config::ReplConfig,
    context::ContextPayload,
    error::{ConfigError, EnvError},
    repl::LocalRepl,
    result::ReplResult,
    value::Value,
};

/// Where an environment runs relative to the LM process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    /// On a separate machine, reached through a transport.
    Isolated,
    /// In-process, sharing the host with the LM client.
    NonIsolated,
}

/// Lifecycle of an environment.
///
/// `Uninitialized → Ready → Executing ⇄ Ready → CleanedUp`; `cleanup` is accepted from
/// every state and `CleanedUp` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    Executing,
    CleanedUp,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::CleanedUp => "cleaned_up",
        })
    }
}

/// Capability interface shared by every environment variant.
///
/// Fragment faults never surface as `Err`; they are reported through
/// [`ReplResult::stderr`]. `Err` is reserved for lifecycle misuse and host failures.
pub trait Environment: fmt::Debug {
    fn kind(&self) -> EnvironmentKind;

    /// Whether the namespace is retained across completions reusing this environment.
    fn persistent(&self) -> bool;

    fn state(&self) -> LifecycleState;

    /// Allocates backing resources; a no-op once ready.
    fn setup(&mut self) -> Result<(), EnvError>;

    /// Loads `payload` into context slot 0.
    fn load_context(&mut self, payload: ContextPayload) -> Result<(), EnvError>;

    /// Runs one fragment against the session namespace.
    fn execute_code(&mut self, code: &str) -> Result<ReplResult, EnvError>;

    /// Releases every backing resource. Idempotent.
    fn cleanup(&mut self) -> Result<(), EnvError>;

    /// Snapshot of one namespace binding.
    fn get_variable(&self, name: &str) -> Result<Option<Value>, EnvError>;

    /// The interpreter's `str()` of one namespace binding.
    fn get_variable_str(&self, name: &str) -> Result<Option<String>, EnvError>;
}

/// Execution backend of an [`IsolatedRepl`].
///
/// Implementations own the transport, authentication and remote process lifecycle.
/// Errors are plain strings, surfaced to callers as [`EnvError::Backend`].
pub trait SandboxBackend: fmt::Debug {
    /// Short backend name used in error messages.
    fn name(&self) -> &'static str;

    /// Provisions the remote sandbox.
    fn start(&mut self) -> Result<(), String>;

    /// Stores `payload` in remote context slot 0.
    fn load_context(&mut self, payload: &ContextPayload) -> Result<(), String>;

    /// Runs one fragment remotely.
    ///
    /// Faults raised by the fragment belong in the returned result's stderr, not in `Err`.
    fn execute(&mut self, code: &str) -> Result<ReplResult, String>;

    /// Reads one remote binding.
    fn get_variable(&self, name: &str) -> Result<Option<Value>, String>;

    /// Reads one remote binding as the remote interpreter's `str()` of it.
    ///
    /// Falls back to the snapshot's `Display`, which only matches `str()` for plain data.
    fn get_variable_str(&self, name: &str) -> Result<Option<String>, String> {
        Ok(self.get_variable(name)?.map(|value| value.to_string()))
    }

    /// Tears the remote sandbox down.
    fn shutdown(&mut self) -> Result<(), String>;
}

/// An environment that forwards to a remote [`SandboxBackend`].
///
/// Remote sandboxes are provisioned per completion, so persistence is rejected at
/// construction.
#[derive(Debug)]
pub struct IsolatedRepl {
    backend: Box<dyn SandboxBackend>,
    context_payload: Option<ContextPayload>,
    state: LifecycleState,
}

impl IsolatedRepl {
    /// Validates `config`, starts the backend and loads the initial context.
    pub fn new(config: ReplConfig, backend: Box<dyn SandboxBackend>) -> Result<Self, EnvError> {
        config.validate()?;
        if config.persistent {
            return Err(ConfigError::UnsupportedPersistence {
                environment: backend.name(),
            }
            .into());
        }
        let mut repl = Self {
            backend,
            context_payload: config.context_payload,
            state: LifecycleState::Uninitialized,
        };
        repl.setup()?;
        Ok(repl)
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<(), EnvError> {
        if self.state == LifecycleState::Ready {
            Ok(())
        } else {
            Err(EnvError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl Environment for IsolatedRepl {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Isolated
    }

    fn persistent(&self) -> bool {
        false
    }

    fn state(&self) -> LifecycleState {
        self.state
    }

    fn setup(&mut self) -> Result<(), EnvError> {
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
        self.backend.start().map_err(EnvError::Backend)?;
        self.state = LifecycleState::Ready;
        tracing::debug!(backend = self.backend.name(), "isolated environment ready");
        if let Some(payload) = self.context_payload.take() {
            self.load_context(payload)?;
        }
        Ok(())
    }

    fn load_context(&mut self, payload: ContextPayload) -> Result<(), EnvError> {
        self.ensure_ready("load context")?;
        self.backend.load_context(&payload).map_err(EnvError::Backend)
    }

    fn execute_code(&mut self, code: &str) -> Result<ReplResult, EnvError> {
        self.ensure_ready("execute code")?;
        self.state = LifecycleState::Executing;
        let result = self.backend.execute(code);
        self.state = LifecycleState::Ready;
        result.map_err(EnvError::Backend)
    }

    fn cleanup(&mut self) -> Result<(), EnvError> {
        let previous = std::mem::replace(&mut self.state, LifecycleState::CleanedUp);
        match previous {
            LifecycleState::CleanedUp | LifecycleState::Uninitialized => Ok(()),
            LifecycleState::Ready | LifecycleState::Executing => {
                tracing::debug!(backend = self.backend.name(), "shutting down isolated environment");
                self.backend.shutdown().map_err(EnvError::Backend)
            }
        }
    }

    fn get_variable(&self, name: &str) -> Result<Option<Value>, EnvError> {
        self.ensure_ready("read a variable")?;
        self.backend.get_variable(name).map_err(EnvError::Backend)
    }

    fn get_variable_str(&self, name: &str) -> Result<Option<String>, EnvError> {
        self.ensure_ready("read a variable")?;
        self.backend.get_variable_str(name).map_err(EnvError::Backend)
    }
}

impl Drop for IsolatedRepl {
    fn drop(&mut self) {
        if let Err(err) = self.cleanup() {
            tracing::warn!(%err, "isolated environment cleanup failed");
        }
    }
}

/// The closed set of environment variants.
#[derive(Debug)]
pub enum ReplEnvironment {
    Local(LocalRepl),
    Isolated(IsolatedRepl),
}

impl ReplEnvironment {
    /// Builds a ready in-process environment.
    pub fn local(config: ReplConfig) -> Result<Self, EnvError> {
        LocalRepl::new(config).map(Self::Local)
    }

    /// Builds a ready environment on top of a remote backend.
    pub fn isolated(config: ReplConfig, backend: Box<dyn SandboxBackend>) -> Result<Self, EnvError> {
        IsolatedRepl::new(config, backend).map(Self::Isolated)
    }

    fn inner(&self) -> &dyn Environment {
        match self {
            Self::Local(repl) => repl,
            Self::Isolated(repl) => repl,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Environment {
        match self {
            Self::Local(repl) => repl,
            Self::Isolated(repl) => repl,
        }
    }
}

impl Environment for ReplEnvironment {
    fn kind(&self) -> EnvironmentKind {
        self.inner().kind()
    }

    fn persistent(&self) -> bool {
        self.inner().persistent()
    }

    fn state(&self) -> LifecycleState {
        self.inner().state()
    }

    fn setup(&mut self) -> Result<(), EnvError> {
        self.inner_mut().setup()
    }

    fn load_context(&mut self, payload: ContextPayload) -> Result<(), EnvError> {
        self.inner_mut().load_context(payload)
    }

    fn execute_code(&mut self, code: &str) -> Result<ReplResult, EnvError> {
        self.inner_mut().execute_code(code)
    }

    fn cleanup(&mut self) -> Result<(), EnvError> {
        self.inner_mut().cleanup()
    }

    fn get_variable(&self, name: &str) -> Result<Option<Value>, EnvError> {
        self.inner().get_variable(name)
    }

    fn get_variable_str(&self, name: &str) -> Result<Option<String>, EnvError> {
        self.inner().get_variable_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(LifecycleState::CleanedUp.to_string(), "cleaned_up");
        assert_eq!(LifecycleState::Ready.to_string(), "ready");
    }
}
