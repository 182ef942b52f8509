// chat-protocol: gateway wire format and transfer-pipeline payload types.
//
// The gateway frame (`Message`) is a flat struct, not a `kind`-tagged union --
// routing happens on the `method` field, and `data` is re-parsed per method
// by the handler registry. `Push` and the queue payloads use tagged unions
// where a fixed set of shapes is self-describing on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Gateway frame
// ---------------------------------------------------------------------------

/// Frame type discriminant, matches the wire's integer `frameType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde_repr::Serialize_repr, serde_repr::Deserialize_repr)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    Ping = 1,
    Ack = 2,
    NoAck = 3,
    Err = 9,
}

/// A single gateway frame, in both directions.
///
/// `id` and `ack_seq` are only meaningful for ack-tracked frames (anything
/// where `frame_type != NoAck` while the server is running in an ack mode).
/// `err_count` is never read off the wire by a well-behaved peer; it rides
/// along because frames are round-tripped through the same struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub ack_seq: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub err_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Message {
    pub fn data_frame(method: impl Into<String>, form_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            frame_type: FrameType::Data,
            id: None,
            ack_seq: 0,
            ack_time: None,
            err_count: 0,
            method: Some(method.into()),
            form_id: Some(form_id.into()),
            data,
        }
    }

    pub fn ack(id: impl Into<String>, ack_seq: u32) -> Self {
        Self {
            frame_type: FrameType::Ack,
            id: Some(id.into()),
            ack_seq,
            ack_time: Some(Utc::now()),
            err_count: 0,
            method: None,
            form_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn ping() -> Self {
        Self {
            frame_type: FrameType::Ping,
            id: None,
            ack_seq: 0,
            ack_time: None,
            err_count: 0,
            method: None,
            form_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn err(method: impl Into<String>, message: &str) -> Self {
        Self {
            frame_type: FrameType::Err,
            id: None,
            ack_seq: 0,
            ack_time: None,
            err_count: 0,
            method: Some(method.into()),
            form_id: None,
            data: serde_json::json!({ "message": message }),
        }
    }
}

// ---------------------------------------------------------------------------
// Method-specific `data` shapes
// ---------------------------------------------------------------------------

/// Chat type discriminant shared by conversations, chat logs and pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Direct,
    Group,
}

/// Body of a `conversation.chat` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub chat_type: ChatType,
    pub recv_id: String,
    pub msg: ChatMsgBody,
    /// Client-assigned id, carried through for idempotent persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMsgBody {
    pub m_type: u32,
    pub content: String,
}

/// Body of a `conversation.markRead` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub chat_type: ChatType,
    pub conversation_id: String,
    pub recv_id: String,
    pub msg_ids: Vec<String>,
}

/// Recipient addressing for a `Push` -- single id for direct chats, a list
/// for group fan-out. Flattened into `Push` so the wire carries `recvId` or
/// `recvIds` as a sibling of `conversationId`/`chatType`/etc rather than a
/// nested `recv` object (§6: "recvId | recvIds").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PushRecipients {
    One {
        #[serde(rename = "recvId")]
        recv_id: String,
    },
    Many {
        #[serde(rename = "recvIds")]
        recv_ids: Vec<String>,
    },
}

impl PushRecipients {
    pub fn one(recv_id: impl Into<String>) -> Self {
        Self::One { recv_id: recv_id.into() }
    }

    pub fn many(recv_ids: Vec<String>) -> Self {
        Self::Many { recv_ids }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushContentType {
    ChatMsg,
    MarkRead,
}

/// Body of a `push` frame, injected by the transfer pipeline under the
/// system identity and re-dispatched by the gateway to the actual recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Push {
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub send_id: String,
    #[serde(flatten)]
    pub recv: PushRecipients,
    pub send_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    /// `msg_id (hex) -> base64(bitmap bytes)`, populated on mark-read pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_records: Option<std::collections::HashMap<String, String>>,
    pub content_type: PushContentType,
    #[serde(default)]
    pub m_type: u32,
    #[serde(default)]
    pub content: String,
}

// ---------------------------------------------------------------------------
// Queue payloads (chat-transfer / read-transfer topics)
// ---------------------------------------------------------------------------

/// Payload enqueued by `conversation.chat` onto the `chat-transfer` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTransferPayload {
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub send_id: String,
    pub recv_id: String,
    pub send_time_ms: i64,
    pub m_type: u32,
    pub content: String,
    /// Used for the idempotent-insert dedupe key together with `conversation_id`.
    pub client_msg_id: String,
}

/// Payload enqueued by `conversation.markRead` onto the `read-transfer` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTransferPayload {
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub send_id: String,
    pub recv_id: String,
    pub msg_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Conversation read API (C7)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConversationState {
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub is_show: bool,
    pub total: i64,
    #[serde(default)]
    pub to_read: i64,
    #[serde(default)]
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationsResponse {
    pub conversations: std::collections::HashMap<String, UserConversationState>,
}

/// One PUT patch entry. `read` is a delta applied to the user's stored total,
/// not an absolute value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConversationPatch {
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub is_show: bool,
    pub read: i64,
    #[serde(default)]
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutConversationsRequest {
    pub conversations: std::collections::HashMap<String, UserConversationPatch>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Frozen error codes used on the wire and in the HTTP error envelope.
pub mod error_codes {
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::data_frame("conversation.chat", "1", serde_json::json!({"x": 1}));
        let s = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&s).unwrap();
        assert_eq!(back.method.as_deref(), Some("conversation.chat"));
        assert_eq!(back.form_id.as_deref(), Some("1"));
        assert!(matches!(back.frame_type, FrameType::Data));
    }

    #[test]
    fn frame_type_serializes_as_integer() {
        let m = Message::ping();
        let v: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert_eq!(v["frameType"], serde_json::json!(1));
    }

    #[test]
    fn push_recipients_flatten_as_recv_id_or_recv_ids() {
        let one = serde_json::to_value(PushRecipients::one("42")).unwrap();
        assert_eq!(one, serde_json::json!({"recvId": "42"}));
        let many = serde_json::to_value(PushRecipients::many(vec!["1".to_owned(), "2".to_owned()])).unwrap();
        assert_eq!(many, serde_json::json!({"recvIds": ["1", "2"]}));

        let one_back: PushRecipients = serde_json::from_value(serde_json::json!({"recvId": "42"})).unwrap();
        assert!(matches!(one_back, PushRecipients::One { recv_id } if recv_id == "42"));
        let many_back: PushRecipients =
            serde_json::from_value(serde_json::json!({"recvIds": ["1", "2"]})).unwrap();
        assert!(matches!(many_back, PushRecipients::Many { recv_ids } if recv_ids.len() == 2));
    }

    #[test]
    fn chat_request_serializes_with_camel_case_wire_keys() {
        let req = ChatRequest {
            conversation_id: Some("1_2".to_owned()),
            chat_type: ChatType::Direct,
            recv_id: "2".to_owned(),
            msg: ChatMsgBody {
                m_type: 1,
                content: "hi".to_owned(),
            },
            client_msg_id: Some("m-1".to_owned()),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["conversationId"], serde_json::json!("1_2"));
        assert_eq!(v["chatType"], serde_json::json!("direct"));
        assert_eq!(v["recvId"], serde_json::json!("2"));
        assert_eq!(v["clientMsgId"], serde_json::json!("m-1"));
        assert_eq!(v["msg"]["mType"], serde_json::json!(1));
        assert!(v.get("recv_id").is_none(), "must not also carry the snake_case key");
    }

    #[test]
    fn push_serializes_with_camel_case_wire_keys() {
        let push = Push {
            conversation_id: "1_2".to_owned(),
            chat_type: ChatType::Direct,
            send_id: "1".to_owned(),
            recv: PushRecipients::one("2"),
            send_time: 1000,
            msg_id: Some("abc".to_owned()),
            read_records: None,
            content_type: PushContentType::ChatMsg,
            m_type: 1,
            content: "hi".to_owned(),
        };
        let v = serde_json::to_value(&push).unwrap();
        assert_eq!(v["sendId"], serde_json::json!("1"));
        assert_eq!(v["sendTime"], serde_json::json!(1000));
        assert_eq!(v["msgId"], serde_json::json!("abc"));
        assert_eq!(v["contentType"], serde_json::json!("chat_msg"));
        assert_eq!(v["mType"], serde_json::json!(1));
    }

    #[test]
    fn mark_read_request_serializes_with_camel_case_wire_keys() {
        let req = MarkReadRequest {
            chat_type: ChatType::Group,
            conversation_id: "group-1".to_owned(),
            recv_id: "group-1".to_owned(),
            msg_ids: vec!["a".to_owned(), "b".to_owned()],
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["conversationId"], serde_json::json!("group-1"));
        assert_eq!(v["recvId"], serde_json::json!("group-1"));
        assert_eq!(v["msgIds"], serde_json::json!(["a", "b"]));
    }
}
