//! Best-effort decoding of topic payloads.
//!
//! Senders conventionally publish JSON objects of the form
//! `{"type": "...", "data": ...}`. Nothing enforces that convention, so
//! decoding never fails: text that is not JSON is kept as [`Payload::Raw`].

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A typed event keyed by the payload's `type` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Value of the `type` field.
    pub kind: String,
    /// Value of the `data` field, if present.
    pub data: Option<Value>,
    /// Any other top-level fields.
    pub extra: Map<String, Value>,
}

impl Event {
    /// Create an event with no data.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            extra: Map::new(),
        }
    }

    /// Attach a `data` value.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Rebuild the JSON object this event was decoded from.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = self.extra.clone();
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        if let Some(data) = &self.data {
            object.insert("data".to_string(), data.clone());
        }
        Value::Object(object)
    }
}

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A JSON object carrying a string `type` field.
    Event(Event),
    /// Valid JSON that does not follow the event convention.
    Json(Value),
    /// Text that could not be parsed as JSON, delivered unchanged.
    Raw(String),
}

impl Payload {
    /// Decode raw payload text. Never fails.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => return Payload::Raw(raw.to_string()),
        };

        match value {
            Value::Object(mut object) => match object.remove("type") {
                Some(Value::String(kind)) => {
                    let data = object.remove("data");
                    Payload::Event(Event {
                        kind,
                        data,
                        extra: object,
                    })
                }
                Some(other) => {
                    object.insert("type".to_string(), other);
                    Payload::Json(Value::Object(object))
                }
                None => Payload::Json(Value::Object(object)),
            },
            other => Payload::Json(other),
        }
    }

    /// The event type, for [`Payload::Event`].
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            Payload::Event(event) => Some(&event.kind),
            _ => None,
        }
    }

    /// The event data, for [`Payload::Event`].
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match self {
            Payload::Event(event) => event.data.as_ref(),
            _ => None,
        }
    }

    /// Whether decoding fell back to the raw text.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Payload::Raw(_))
    }

    /// The payload as a JSON value, if it was JSON.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Payload::Event(event) => Some(event.to_value()),
            Payload::Json(value) => Some(value.clone()),
            Payload::Raw(_) => None,
        }
    }

    /// Deserialize the payload into an application type.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Raw(raw) => serde_json::from_str(raw),
            _ => serde_json::from_value(self.to_value().unwrap_or(Value::Null)),
        }
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Event(event) => write!(f, "{}", event.to_value()),
            Payload::Json(value) => write!(f, "{value}"),
            Payload::Raw(raw) => f.write_str(raw),
        }
    }
}
