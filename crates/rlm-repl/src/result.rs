use std::time::Duration;

use indexmap::IndexMap;

use crate::{lm_client::LmCompletion, value::Value};

/// Outcome of one `execute_code` call.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplResult {
    /// Everything the fragment wrote to standard output.
    pub stdout: String,
    /// Everything the fragment wrote to standard error, followed by the fault that ended
    /// it (if any) as `TypeName: message`.
    pub stderr: String,
    /// Snapshot of the user-visible namespace after the fragment ran.
    pub locals: IndexMap<String, Value>,
    /// Wall-clock time spent running the fragment.
    #[serde(with = "duration_secs")]
    pub execution_time: Duration,
    /// Completions obtained through `llm_query*` while the fragment ran.
    #[serde(default)]
    pub llm_calls: Vec<LmCompletion>,
}

impl ReplResult {
    /// A result carrying only error text, as isolated backends report transport
    /// failures.
    #[must_use]
    pub fn from_stderr(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Returns true if the fragment ran without any stderr output.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stderr.is_empty()
    }
}

/// Serializes a `Duration` as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_time_as_seconds() {
        let result = ReplResult {
            stdout: "3\n".to_owned(),
            execution_time: Duration::from_millis(250),
            ..ReplResult::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["execution_time"], json!(0.25));
        let back: ReplResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
