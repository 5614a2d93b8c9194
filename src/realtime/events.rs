//! Wire-format events exchanged over the realtime channel.
//!
//! Frames are JSON envelopes of the form `{"event": <name>, "data": <payload>}`.
//! Both directions are closed enums so the connection loop and the fan-out
//! router get exhaustiveness checking instead of string dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::store::{ChatId, MessageId, StoredMessage, UserId, UserRecord};

// ---------------------------------------------------------------------------
// Shared records
// ---------------------------------------------------------------------------

/// Public slice of a user row, embedded in message and friendship payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
}

impl From<&UserRecord> for UserSummary {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// Authoritative chat message record as delivered to clients: the persisted
/// row plus the sender profile.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

impl MessageRecord {
    pub fn new(message: &StoredMessage, sender: &UserRecord) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            created_at: message.created_at,
            sender: sender.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLikeUpdate {
    pub post_id: i64,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub user_like_type: Option<String>,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentLikeUpdate {
    pub comment_id: i64,
    pub likes_count: i64,
    pub user_has_liked: bool,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCreated {
    pub post_id: i64,
    pub comment: Value,
    pub is_reply: bool,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRemoved {
    pub comment_id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendshipUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: UserId,
    pub friend: UserSummary,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: String,
    pub message: String,
    pub from: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    ConnectionConfirmed {
        user_id: UserId,
        socket_id: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_id: ChatId,
        message: MessageRecord,
    },
    MessageSent(MessageRecord),
    MessageError {
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: UserId,
        chat_id: ChatId,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    UserOnline {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UserOffline {
        user_id: UserId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    NewNotification(Value),
    NewPost(Value),
    PostLikeUpdated(PostLikeUpdate),
    CommentLikeUpdated(CommentLikeUpdate),
    NewComment(CommentCreated),
    CommentDeleted(CommentRemoved),
    FriendshipUpdated(FriendshipUpdate),
    AdminNotification(AdminNotice),
}

impl ServerEvent {
    /// Serialize to the wire frame. Event payloads are plain data; this only
    /// fails if serde_json itself does.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(?e, "failed to serialize server event");
            r#"{"event":"message_error","data":{"error":"internal"}}"#.to_string()
        })
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub chat_id: ChatId,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub chat_id: ChatId,
    pub is_typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Ping,
    SendMessage(SendMessagePayload),
    /// Payload is the bare chat id.
    JoinChat(ChatId),
    LeaveChat(ChatId),
    Typing(TypingPayload),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frames_use_event_data_envelope() {
        let event = ServerEvent::UserOnline {
            user_id: 12,
            timestamp: Utc::now(),
        };
        let value: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(value["event"], "user_online");
        assert_eq!(value["data"]["userId"], 12);
        assert!(value["data"]["timestamp"].is_string());
    }

    #[test]
    fn payload_fields_are_camel_case() {
        let event = ServerEvent::PostLikeUpdated(PostLikeUpdate {
            post_id: 4,
            likes_count: 2,
            dislikes_count: 0,
            user_like_type: Some("like".to_string()),
            user_id: 9,
        });
        let value: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(value["event"], "post_like_updated");
        assert_eq!(value["data"]["postId"], 4);
        assert_eq!(value["data"]["likesCount"], 2);
        assert_eq!(value["data"]["userLikeType"], "like");
    }

    #[test]
    fn friendship_and_admin_payloads_expose_type_field() {
        let friend = UserSummary {
            id: 2,
            username: "sam".to_string(),
            first_name: "Sam".to_string(),
            last_name: "Lee".to_string(),
            avatar: None,
        };
        let event = ServerEvent::FriendshipUpdated(FriendshipUpdate {
            kind: "accepted".to_string(),
            user_id: 2,
            friend,
        });
        let value: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(value["data"]["type"], "accepted");
        assert_eq!(value["data"]["friend"]["firstName"], "Sam");

        let event = ServerEvent::AdminNotification(AdminNotice {
            kind: "admin_broadcast".to_string(),
            sub_type: "info".to_string(),
            message: "maintenance at noon".to_string(),
            from: "Admin: Ada Root".to_string(),
            timestamp: Utc::now(),
        });
        let value: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(value["data"]["type"], "admin_broadcast");
        assert_eq!(value["data"]["subType"], "info");
    }

    #[test]
    fn client_events_parse_from_envelopes() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Ping));

        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"send_message","data":{"chatId":3,"content":"hi"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage(p) => {
                assert_eq!(p.chat_id, 3);
                assert_eq!(p.content, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // join_chat / leave_chat carry a scalar chat id.
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"join_chat","data":17}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinChat(17)));

        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"typing","data":{"chatId":17,"isTyping":true}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::Typing(p) => assert!(p.is_typing),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_client_event_is_an_error() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"event":"shutdown","data":{}}"#);
        assert!(result.is_err());
    }
}
