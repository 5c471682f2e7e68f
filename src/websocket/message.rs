use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Ping,
}

/// Control frames generated by the server itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "payload")]
        topics: Vec<String>,
    },
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        #[serde(rename = "payload")]
        topics: Vec<String>,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn subscribed(topics: Vec<String>) -> Self {
        Self::Subscribed { topics }
    }

    pub fn unsubscribed(topics: Vec<String>) -> Self {
        Self::Unsubscribed { topics }
    }
}

/// Opaque, already-encoded producer payload. Cloning shares the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Arc<str>);

impl Payload {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Item on a connection's outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Producer payload, written verbatim
    Payload(Payload),
    /// Server control frame, serialized on write
    Control(ServerMessage),
}

impl OutboundMessage {
    /// Text written to the socket
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Payload(payload) => Ok(payload.as_str().to_owned()),
            Self::Control(message) => serde_json::to_string(message),
        }
    }
}

impl From<Payload> for OutboundMessage {
    fn from(payload: Payload) -> Self {
        Self::Payload(payload)
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        Self::Payload(Payload::from(text))
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(message: ServerMessage) -> Self {
        Self::Control(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"Subscribe","payload":{"topics":["scan-7"]}}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { ref topics } if topics == &["scan-7"]));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"Ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"Nope"}"#).is_err());
    }

    #[test]
    fn test_server_message_format() {
        let json = serde_json::to_value(ServerMessage::subscribed(vec!["scan-7".into()])).unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["payload"][0], "scan-7");

        let json = serde_json::to_value(ServerMessage::error("INVALID_TOPIC", "bad")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "INVALID_TOPIC");
    }

    #[test]
    fn test_payload_written_verbatim() {
        let raw = r#"{"scan_id":"scan-7","progress":50}"#;
        let outbound = OutboundMessage::from(Payload::from(raw));
        assert_eq!(outbound.to_text().unwrap(), raw);

        let heartbeat = OutboundMessage::from(ServerMessage::Heartbeat);
        assert_eq!(heartbeat.to_text().unwrap(), r#"{"type":"heartbeat"}"#);
    }
}
