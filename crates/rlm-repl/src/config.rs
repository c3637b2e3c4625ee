use std::{fmt, time::Duration};

use crate::{context::ContextPayload, error::ConfigError};

/// Default wall-clock bound for one fragment.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(300);
/// Default socket timeout for one LM handler round trip.
pub const DEFAULT_LM_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Address of the out-of-process LM handler that `llm_query` talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HandlerAddress {
    pub host: String,
    pub port: u16,
}

impl HandlerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HandlerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Execution bounds applied to every fragment of a session.
///
/// `None` disables a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock limit for one `execute_code` call.
    ///
    /// Enforced at bytecode boundaries; a fragment blocked inside a C call is
    /// interrupted once control returns to the interpreter loop.
    pub max_duration: Option<Duration>,
    /// Connect/read/write timeout for each LM handler round trip.
    pub lm_request_timeout: Option<Duration>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_duration: Some(DEFAULT_MAX_DURATION),
            lm_request_timeout: Some(DEFAULT_LM_REQUEST_TIMEOUT),
        }
    }
}

impl ExecutionLimits {
    /// Creates limits with every bound disabled.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_duration: None,
            lm_request_timeout: None,
        }
    }

    /// Sets the maximum duration of one fragment.
    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Sets the LM handler round-trip timeout.
    #[must_use]
    pub fn lm_request_timeout(mut self, limit: Duration) -> Self {
        self.lm_request_timeout = Some(limit);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid("max_duration must be non-zero".to_owned()));
        }
        // std sockets reject a zero timeout
        if self.lm_request_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid("lm_request_timeout must be non-zero".to_owned()));
        }
        Ok(())
    }
}

/// Construction parameters for a REPL environment.
///
/// Deserializable so hosts can keep it in their own configuration files; this crate
/// never reads configuration from disk itself.
///
/// ```
/// use rlm_repl::{HandlerAddress, ReplConfig};
///
/// let config = ReplConfig::new()
///     .context_payload("The quick brown fox.")
///     .lm_handler_address(HandlerAddress::new("127.0.0.1", 5000));
/// assert!(!config.persistent);
/// ```
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// Retain namespace state across completions that reuse this environment.
    pub persistent: bool,
    /// Initial context, loaded into slot 0 during setup.
    pub context_payload: Option<ContextPayload>,
    /// LM handler used by `llm_query` and `llm_query_batched`.
    pub lm_handler_address: Option<HandlerAddress>,
    /// Per-fragment execution bounds.
    pub limits: ExecutionLimits,
    /// Free-form, variant-specific options.
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ReplConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    #[must_use]
    pub fn context_payload(mut self, payload: impl Into<ContextPayload>) -> Self {
        self.context_payload = Some(payload.into());
        self
    }

    #[must_use]
    pub fn lm_handler_address(mut self, address: HandlerAddress) -> Self {
        self.lm_handler_address = Some(address);
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Adds one variant-specific option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Checks parameters that every variant rejects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if let Some(address) = &self.lm_handler_address
            && address.host.is_empty()
        {
            return Err(ConfigError::Invalid("lm_handler_address host must not be empty".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: ReplConfig = serde_json::from_value(json!({
            "lm_handler_address": {"host": "localhost", "port": 7000},
            "options": {"sandbox_name": "alpha"}
        }))
        .unwrap();
        assert!(!config.persistent);
        assert_eq!(config.lm_handler_address, Some(HandlerAddress::new("localhost", 7000)));
        assert_eq!(config.limits, ExecutionLimits::default());
        assert_eq!(config.options["sandbox_name"], json!("alpha"));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let config = ReplConfig::new().limits(ExecutionLimits::unbounded().max_duration(Duration::ZERO));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_handler_host_is_rejected() {
        let config = ReplConfig::new().lm_handler_address(HandlerAddress::new("", 1));
        assert!(config.validate().is_err());
    }
}
