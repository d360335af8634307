//! Wire-format types for the `graphql-ws` sub-protocol.
//!
//! Every frame in either direction is an [`OperationMessage`] envelope:
//!
//! ```json
//! { "id": "1", "type": "start", "payload": { "query": "subscription { ... }" } }
//! ```
//!
//! The payload stays an opaque JSON value at the envelope level and is only
//! interpreted by the state-machine branch that matches the envelope's type.
//! Message type names follow apollographql `subscriptions-transport-ws`
//! (`PROTOCOL.md` at v0.9.4) plus the `ping`/`pong`/`receive` extensions.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{self, ProtocolError};

/// Envelope message type.
///
/// Unknown type strings decode into [`MessageType::Unknown`] so the envelope
/// still parses and the dispatcher can name the offending type in its reply.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Client → server: open the protocol session.
    ConnectionInit,
    /// Server → client: `connection_init` accepted.
    ConnectionAck,
    /// Server → client: connection-level or malformed-input error.
    ConnectionError,
    /// Client → server: close the connection.
    ConnectionTerminate,
    /// Server → client: keep-alive.
    KeepAlive,
    /// Client → server: begin an operation.
    Start,
    /// Client → server: cancel an operation.
    Stop,
    /// Server → client: one result of an operation.
    Data,
    /// Server → client: operation-scoped error.
    Error,
    /// Server → client: operation finished.
    Complete,
    /// Client → server: health probe.
    Ping,
    /// Server → client: probe response.
    Pong,
    /// Client → server: acknowledge receipt of an event.
    Receive,
    /// Any type outside the protocol vocabulary.
    Unknown(String),
}

impl MessageType {
    /// The wire name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::ConnectionTerminate => "connection_terminate",
            Self::KeepAlive => "ka",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Receive => "receive",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "connection_init" => Self::ConnectionInit,
            "connection_ack" => Self::ConnectionAck,
            "connection_error" => Self::ConnectionError,
            "connection_terminate" => Self::ConnectionTerminate,
            "ka" => Self::KeepAlive,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "data" => Self::Data,
            "error" => Self::Error,
            "complete" => Self::Complete,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "receive" => Self::Receive,
            _ => Self::Unknown(s),
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Unknown(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{id, type, payload}` envelope common to all messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    /// Client-assigned operation id. Absent for connection-level messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Type-specific payload, interpreted lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OperationMessage {
    /// Build an envelope. Empty ids are normalized to `None`.
    pub fn new(id: Option<String>, message_type: MessageType, payload: Option<Value>) -> Self {
        Self {
            id: id.filter(|id| !id.is_empty()),
            message_type,
            payload,
        }
    }

    /// Decode an inbound frame.
    pub fn from_json(frame: &str) -> errors::Result<Self> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }

    /// Encode for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The operation id, treating an empty string as absent.
    pub fn operation_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Decode the payload into the shape expected for this message type.
    ///
    /// A missing payload decodes as JSON `null`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> errors::Result<T> {
        let value = self.payload.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|_| ProtocolError::InvalidPayload {
            message_type: self.message_type.clone(),
        })
    }
}

/// A GraphQL request as carried by a `start` payload and handed to the
/// execution engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// The GraphQL document. Missing or `null` decodes as empty; the engine
    /// reports what it makes of that.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub query: String,
    /// Operation to run when the document holds several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variable values, keyed by variable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl GraphQLRequest {
    /// A request with only a document.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
        }
    }

    /// Attach variable values.
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Select the operation to run.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

fn null_as_empty<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// Payload of a `start` message.
pub type StartPayload = GraphQLRequest;

/// Payload of a `receive` message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePayload {
    /// Id of the event being acknowledged.
    pub id: String,
}

/// Payload of `error` and `connection_error` replies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Render any error as a wire payload.
    pub fn from_error(err: &(impl fmt::Display + ?Sized)) -> Value {
        serde_json::json!({ "message": err.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn known_types_round_trip_names() {
        let names = [
            "connection_init",
            "connection_ack",
            "connection_error",
            "connection_terminate",
            "ka",
            "start",
            "stop",
            "data",
            "error",
            "complete",
            "ping",
            "pong",
            "receive",
        ];
        for name in names {
            let t = MessageType::from(name);
            assert!(!matches!(t, MessageType::Unknown(_)), "{name} should be known");
            assert_eq!(t.as_str(), name);
        }
    }

    #[test]
    fn unknown_type_keeps_its_name() {
        let t = MessageType::from("subscribe");
        assert_eq!(t, MessageType::Unknown("subscribe".into()));
        assert_eq!(t.to_string(), "subscribe");
    }

    #[test]
    fn decode_start_envelope() {
        let msg = OperationMessage::from_json(
            r#"{"id":"1","type":"start","payload":{"query":"subscription { ticks }","operationName":"Ticks","variables":{"n":3}}}"#,
        )
        .unwrap();
        assert_eq!(msg.operation_id(), Some("1"));
        assert_eq!(msg.message_type, MessageType::Start);

        let payload: StartPayload = msg.decode_payload().unwrap();
        assert_eq!(payload.query, "subscription { ticks }");
        assert_eq!(payload.operation_name.as_deref(), Some("Ticks"));
        assert_eq!(payload.variables.unwrap()["n"], 3);
    }

    #[test]
    fn decode_envelope_with_unknown_type() {
        let msg = OperationMessage::from_json(r#"{"type":"subscribe","id":"9"}"#).unwrap();
        assert_eq!(msg.message_type, MessageType::Unknown("subscribe".into()));
        assert!(msg.payload.is_none());
    }

    #[test]
    fn envelope_without_type_is_malformed() {
        let err = OperationMessage::from_json(r#"{"id":"1"}"#).unwrap_err();
        assert_matches!(err, ProtocolError::MalformedMessage(_));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = OperationMessage::from_json("not json").unwrap_err();
        assert_matches!(err, ProtocolError::MalformedMessage(_));
    }

    #[test]
    fn empty_id_is_absent() {
        let msg = OperationMessage::from_json(r#"{"id":"","type":"start"}"#).unwrap();
        assert_eq!(msg.operation_id(), None);

        let built = OperationMessage::new(Some(String::new()), MessageType::Complete, None);
        assert!(built.id.is_none());
    }

    #[test]
    fn start_payload_without_query_is_empty() {
        for payload in [json!({}), json!({"query": null, "variables": {"n": 1}})] {
            let msg = OperationMessage::new(Some("1".into()), MessageType::Start, Some(payload));
            let request = msg.decode_payload::<StartPayload>().unwrap();
            assert_eq!(request.query, "");
        }
    }

    #[test]
    fn start_payload_must_be_an_object() {
        for payload in [None, Some(json!("query")), Some(json!({"query": 5}))] {
            let msg = OperationMessage::new(Some("1".into()), MessageType::Start, payload);
            let err = msg.decode_payload::<StartPayload>().unwrap_err();
            assert_matches!(err, ProtocolError::InvalidPayload { message_type } if message_type == MessageType::Start);
        }
    }

    #[test]
    fn missing_payload_decodes_as_null() {
        let msg = OperationMessage::new(None, MessageType::ConnectionInit, None);
        let init: Option<Map<String, Value>> = msg.decode_payload().unwrap();
        assert!(init.is_none());
    }

    #[test]
    fn receive_payload_requires_string_id() {
        let ok = OperationMessage::new(None, MessageType::Receive, Some(json!({"id": "evt_1"})));
        assert_eq!(ok.decode_payload::<ReceivePayload>().unwrap().id, "evt_1");

        let bad = OperationMessage::new(None, MessageType::Receive, Some(json!({"id": 7})));
        assert!(bad.decode_payload::<ReceivePayload>().is_err());
    }

    #[test]
    fn null_variables_accepted() {
        let msg = OperationMessage::from_json(
            r#"{"id":"2","type":"start","payload":{"query":"{ a }","variables":null}}"#,
        )
        .unwrap();
        let payload: StartPayload = msg.decode_payload().unwrap();
        assert!(payload.variables.is_none());
        assert!(payload.operation_name.is_none());
    }

    #[test]
    fn ack_wire_shape() {
        let msg = OperationMessage::new(None, MessageType::ConnectionAck, None);
        insta::assert_json_snapshot!(msg, @r#"
        {
          "type": "connection_ack"
        }
        "#);
    }

    #[test]
    fn data_wire_shape() {
        let msg = OperationMessage::new(
            Some("1".into()),
            MessageType::Data,
            Some(json!({"data": {"tick": 1}})),
        );
        insta::assert_json_snapshot!(msg, @r#"
        {
          "id": "1",
          "type": "data",
          "payload": {
            "data": {
              "tick": 1
            }
          }
        }
        "#);
    }

    #[test]
    fn error_payload_renders_message() {
        let payload = ErrorPayload::from_error(&"boom");
        assert_eq!(payload, json!({"message": "boom"}));
        let typed: ErrorPayload = serde_json::from_value(payload).unwrap();
        assert_eq!(typed.message, "boom");
    }

    #[test]
    fn to_json_omits_absent_fields() {
        let msg = OperationMessage::new(Some("3".into()), MessageType::Complete, None);
        assert_eq!(msg.to_json().unwrap(), r#"{"id":"3","type":"complete"}"#);
    }

    #[test]
    fn request_builder() {
        let mut vars = Map::new();
        let _ = vars.insert("id".into(), json!("42"));
        let req = GraphQLRequest::new("mutation ($id: ID!) { ack(id: $id) }")
            .with_variables(vars)
            .with_operation_name("Ack");
        assert_eq!(req.operation_name.as_deref(), Some("Ack"));
        assert_eq!(req.variables.unwrap()["id"], "42");
    }
}
