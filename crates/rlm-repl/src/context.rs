//! Context payloads and the slot naming scheme shared by context and history.

use pyo3::prelude::*;

use crate::{
    convert::value_to_py,
    message::{Message, Role},
    value::Value,
};

/// Externally supplied input for the agent, stored in a context slot.
///
/// Serializes through natural JSON; deserialization classifies the JSON shape with
/// [`ContextPayload::from_json`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum ContextPayload {
    /// Raw text.
    Text(String),
    /// A single structured object (usually a dict).
    Structured(Value),
    /// A sequence of items.
    Items(Vec<Value>),
    /// A conversation; only the content strings are stored in the slot.
    Messages(Vec<Message>),
}

impl ContextPayload {
    /// Classifies a JSON payload.
    ///
    /// - string → `Text`
    /// - array whose first element is an object with a `content` key → `Messages`
    ///   (a missing or unknown `role` defaults to `user`, missing content to `""`)
    /// - any other array → `Items`
    /// - anything else → `Structured`
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as JV;
        match value {
            JV::String(s) => Self::Text(s),
            JV::Array(items) => {
                let is_conversation = items
                    .first()
                    .and_then(JV::as_object)
                    .is_some_and(|first| first.contains_key("content"));
                if is_conversation {
                    Self::Messages(items.iter().map(message_from_json).collect())
                } else {
                    Self::Items(items.into_iter().map(Value::from_json_value).collect())
                }
            }
            other => Self::Structured(Value::from_json_value(other)),
        }
    }

    /// The value stored in the namespace slot.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Structured(value) => value.clone(),
            Self::Items(items) => Value::List(items.clone()),
            Self::Messages(messages) => Value::List(
                messages
                    .iter()
                    .map(|message| Value::String(message.content.clone()))
                    .collect(),
            ),
        }
    }

    /// Builds a fresh Python object for this payload.
    pub(crate) fn to_py<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        match self {
            Self::Messages(messages) => {
                let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
                Ok(pyo3::types::PyList::new(py, contents)?.into_any())
            }
            other => value_to_py(py, &other.to_value()),
        }
    }
}

fn message_from_json(item: &serde_json::Value) -> Message {
    let role = item
        .get("role")
        .and_then(|role| serde_json::from_value::<Role>(role.clone()).ok())
        .unwrap_or(Role::User);
    let content = match item.get("content") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Message::new(role, content)
}

impl From<serde_json::Value> for ContextPayload {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

impl From<ContextPayload> for serde_json::Value {
    fn from(payload: ContextPayload) -> Self {
        match payload {
            ContextPayload::Messages(messages) => serde_json::to_value(messages).unwrap_or_default(),
            other => other.to_value().to_json_value(),
        }
    }
}

impl From<&str> for ContextPayload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ContextPayload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for ContextPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::List(items) => Self::Items(items),
            other => Self::Structured(other),
        }
    }
}

impl From<Vec<Value>> for ContextPayload {
    fn from(items: Vec<Value>) -> Self {
        Self::Items(items)
    }
}

impl From<Vec<Message>> for ContextPayload {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

/// Which kind of versioned slot a binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Context,
    History,
}

impl SlotKind {
    /// The bare alias that always reflects slot 0.
    pub(crate) fn alias(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::History => "history",
        }
    }

    /// The versioned binding name for `index`, e.g. `context_2`.
    pub(crate) fn binding(self, index: usize) -> String {
        format!("{}_{index}", self.alias())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_json_payloads() {
        assert_eq!(ContextPayload::from_json(json!("text")), ContextPayload::Text("text".to_owned()));
        assert_eq!(
            ContextPayload::from_json(json!([1, "two"])),
            ContextPayload::Items(vec![Value::Int(1), Value::from("two")])
        );
        assert!(matches!(
            ContextPayload::from_json(json!({"key": "value"})),
            ContextPayload::Structured(Value::Dict(_))
        ));
    }

    #[test]
    fn conversation_payload_keeps_contents() {
        let payload = ContextPayload::from_json(json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hi"},
        ]));
        assert_eq!(
            payload,
            ContextPayload::Messages(vec![Message::system("be brief"), Message::user("hi")])
        );
        assert_eq!(
            payload.to_value(),
            Value::List(vec![Value::from("be brief"), Value::from("hi")])
        );
    }

    #[test]
    fn slot_names() {
        assert_eq!(SlotKind::Context.binding(3), "context_3");
        assert_eq!(SlotKind::History.alias(), "history");
    }
}
