//! Generic message handed over by the transport layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message body as delivered by a producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Structured(serde_json::Value),
}

impl Payload {
    /// Text view of the payload. Bytes are decoded lossily, structured values as JSON.
    pub fn as_text(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Payload::Structured(value) => match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            },
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// Payload plus ordered headers, header-data fragments and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    timestamp: DateTime<Utc>,
    payload: Option<Payload>,
    headers: Vec<(String, serde_json::Value)>,
    header_data: Vec<String>,
}

impl Message {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..Self::empty()
        }
    }

    /// A message without payload, e.g. a control message that only carries headers.
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload: None,
            headers: Vec::new(),
            header_data: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Text form of the payload, `None` when there is no payload at all.
    pub fn payload_as_text(&self) -> Option<String> {
        self.payload.as_ref().map(Payload::as_text)
    }

    /// True when the payload exists and contains non-whitespace text.
    pub fn has_text(&self) -> bool {
        self.payload_as_text()
            .is_some_and(|text| !text.trim().is_empty())
    }

    /// Sets a header, replacing an existing value in place so ordering is kept.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&serde_json::Value> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn headers(&self) -> &[(String, serde_json::Value)] {
        &self.headers
    }

    /// Appends an XML header fragment (e.g. a SOAP header block).
    pub fn add_header_data(&mut self, fragment: impl Into<String>) {
        self.header_data.push(fragment.into());
    }

    pub fn with_header_data(mut self, fragment: impl Into<String>) -> Self {
        self.add_header_data(fragment);
        self
    }

    pub fn header_data(&self) -> &[String] {
        &self.header_data
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_keep_insertion_order() {
        let mut message = Message::new("<root/>");
        message.set_header("operation", "sayHello");
        message.set_header("correlation", 42);
        message.set_header("operation", "sayGoodbye");

        let names: Vec<&str> = message.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["operation", "correlation"]);
        assert_eq!(message.header("operation"), Some(&json!("sayGoodbye")));
        assert_eq!(message.header("missing"), None);
    }

    #[test]
    fn test_payload_text_views() {
        assert_eq!(Payload::from("<a/>").as_text(), "<a/>");
        assert_eq!(Payload::from(b"<b/>".to_vec()).as_text(), "<b/>");
        assert_eq!(Payload::Structured(json!("<c/>")).as_text(), "<c/>");
        assert_eq!(Payload::Structured(json!({"k": 1})).as_text(), r#"{"k":1}"#);
    }

    #[test]
    fn test_has_text() {
        assert!(Message::new("<root/>").has_text());
        assert!(!Message::new("   \n").has_text());
        assert!(!Message::empty().has_text());
    }

    #[test]
    fn test_metadata_is_unique() {
        let a = Message::new("x");
        let b = Message::new("x");
        assert_ne!(a.id(), b.id());
        assert!(a.timestamp() <= Utc::now());
    }

    #[test]
    fn test_header_data() {
        let message = Message::new("<root/>")
            .with_header_data("<h:first xmlns:h=\"urn:h\"/>")
            .with_header_data("<h:second xmlns:h=\"urn:h\"/>");
        assert_eq!(message.header_data().len(), 2);
        assert!(message.header_data()[1].contains("second"));
    }

    #[test]
    fn test_message_serializes_with_metadata() {
        let message = Message::new("<root/>")
            .with_header("operation", "sayHello")
            .with_header_data("<h:first xmlns:h=\"urn:h\"/>");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["id"], json!(message.id().to_string()));
        assert_eq!(json["payload"], json!({"type": "text", "value": "<root/>"}));

        let restored: Message = serde_json::from_value(json).unwrap();
        assert_eq!(restored.id(), message.id());
        assert_eq!(restored.timestamp(), message.timestamp());
        assert_eq!(restored.header("operation"), Some(&json!("sayHello")));
        assert_eq!(restored.header_data(), message.header_data());
    }
}
