use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single outgoing message.
///
/// The routing key defaults to the empty string: on a fanout exchange every
/// bound queue gets a copy regardless of key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            routing_key: String::new(),
            payload: Vec::new(),
            content_type: None,
            headers: None,
        }
    }
}

impl Message {
    /// Creates a message with a fresh id and the current timestamp.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Message {
            payload: payload.into(),
            ..Message::default()
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Serializes `value` as the payload and marks it `application/json`.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.payload = serde_json::to_vec(value)?;
        self.content_type = Some("application/json".to_string());
        Ok(self)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// AMQP properties carried alongside the payload.
    pub fn properties(&self) -> BasicProperties {
        let mut properties = BasicProperties::default()
            .with_message_id(self.id.to_string().into())
            .with_timestamp(self.timestamp.timestamp().max(0) as u64);

        if let Some(content_type) = &self.content_type {
            properties = properties.with_content_type(content_type.clone().into());
        }

        if let Some(headers) = &self.headers {
            let mut table = FieldTable::default();
            for (key, value) in headers {
                table.insert(key.clone().into(), AMQPValue::LongString(value.clone().into()));
            }
            properties = properties.with_headers(table);
        }

        properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_routing_key_is_empty() {
        assert_eq!(Message::default().routing_key, "");
        assert_eq!(Message::new("hi").routing_key, "");
    }

    #[test]
    fn test_messages_get_distinct_ids() {
        assert_ne!(Message::default().id, Message::default().id);
    }

    #[test]
    fn test_with_json_sets_content_type() {
        let message = Message::default()
            .with_json(&json!({"level": "warn"}))
            .unwrap();

        assert_eq!(message.content_type.as_deref(), Some("application/json"));
        assert_eq!(message.payload_str(), Some(r#"{"level":"warn"}"#));
    }

    #[test]
    fn test_properties_carry_id_and_headers() {
        let message = Message::new("payload")
            .with_header("source", "sensor-7")
            .with_content_type("text/plain");

        let properties = message.properties();

        assert_eq!(
            properties.message_id().as_ref().map(|id| id.as_str()),
            Some(message.id.to_string().as_str())
        );
        assert_eq!(
            properties.content_type().as_ref().map(|ct| ct.as_str()),
            Some("text/plain")
        );

        let headers = properties.headers().as_ref().expect("headers set");
        assert!(headers.inner().keys().any(|key| key.as_str() == "source"));
    }

    #[test]
    fn test_properties_without_headers() {
        let properties = Message::new("payload").properties();
        assert!(properties.headers().is_none());
        assert!(properties.content_type().is_none());
    }

    #[test]
    fn test_payload_str_rejects_binary() {
        let message = Message::new(vec![0xff, 0xfe]);
        assert!(message.payload_str().is_none());
    }
}
