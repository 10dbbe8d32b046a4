use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChannelKind, ChatMessage, OnlineUser};

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, display_name: String },

    /// Reply to a successful `join_event`
    JoinedEvent { event_id: Uuid, success: bool },

    /// Another user arrived in an event channel
    UserJoinedEvent {
        event_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    /// A user's last connection left an event channel
    UserLeftEvent {
        event_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    /// A message was persisted and fanned out
    NewMessage(ChatMessage),

    UserTyping {
        user_id: Uuid,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<Uuid>,
    },

    UserStoppedTyping {
        user_id: Uuid,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<Uuid>,
    },

    /// A page of history, oldest first
    ChatHistory {
        #[serde(rename = "type")]
        kind: ChannelKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<Uuid>,
        messages: Vec<ChatMessage>,
        limit: u32,
        offset: u32,
    },

    OnlineUsers {
        event_id: Uuid,
        users: Vec<OnlineUser>,
    },

    /// A user's last open connection closed
    UserDisconnected { user_id: Uuid, display_name: String },

    /// Direct messages were marked read. `user_id` is the other party.
    MessagesRead { user_id: Uuid, count: usize },

    /// System-generated event injected into an event channel (not persisted)
    EventUpdate {
        event_id: Uuid,
        name: String,
        data: serde_json::Value,
    },

    /// System-generated notice pushed to one user (not persisted)
    Notification {
        name: String,
        data: serde_json::Value,
    },

    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    JoinEvent { event_id: Uuid },

    LeaveEvent { event_id: Uuid },

    SendMessage {
        content: String,
        #[serde(rename = "type", default)]
        kind: Option<ChannelKind>,
        #[serde(default)]
        event_id: Option<Uuid>,
        #[serde(default)]
        receiver_id: Option<Uuid>,
    },

    TypingStart {
        #[serde(default)]
        event_id: Option<Uuid>,
        #[serde(default)]
        receiver_id: Option<Uuid>,
    },

    TypingStop {
        #[serde(default)]
        event_id: Option<Uuid>,
        #[serde(default)]
        receiver_id: Option<Uuid>,
    },

    GetChatHistory {
        #[serde(rename = "type", default)]
        kind: Option<ChannelKind>,
        #[serde(default)]
        event_id: Option<Uuid>,
        #[serde(default)]
        receiver_id: Option<Uuid>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },

    GetOnlineUsers { event_id: Uuid },

    /// Mark every unread direct message from `sender_id` as read
    MarkRead { sender_id: Uuid },
}

impl ClientCommand {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinEvent { .. } => "join_event",
            Self::LeaveEvent { .. } => "leave_event",
            Self::SendMessage { .. } => "send_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::GetChatHistory { .. } => "get_chat_history",
            Self::GetOnlineUsers { .. } => "get_online_users",
            Self::MarkRead { .. } => "mark_read",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_message_parses_camel_case_payload() {
        let event_id = Uuid::new_v4();
        let raw = json!({
            "type": "send_message",
            "data": { "content": "hello", "type": "event", "eventId": event_id }
        });

        match serde_json::from_value::<ClientCommand>(raw).unwrap() {
            ClientCommand::SendMessage {
                content,
                kind,
                event_id: parsed,
                receiver_id,
            } => {
                assert_eq!(content, "hello");
                assert_eq!(kind, Some(ChannelKind::Event));
                assert_eq!(parsed, Some(event_id));
                assert_eq!(receiver_id, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn history_request_fields_are_optional() {
        let raw = json!({ "type": "get_chat_history", "data": {} });
        let cmd = serde_json::from_value::<ClientCommand>(raw).unwrap();
        assert_eq!(cmd.name(), "get_chat_history");
    }

    #[test]
    fn joined_event_wire_shape() {
        let event_id = Uuid::new_v4();
        let value = serde_json::to_value(ServerEvent::JoinedEvent {
            event_id,
            success: true,
        })
        .unwrap();

        assert_eq!(
            value,
            json!({ "type": "joined_event", "data": { "eventId": event_id, "success": true } })
        );
    }

    #[test]
    fn error_wire_shape() {
        let value = serde_json::to_value(ServerEvent::error("Access denied to this event")).unwrap();
        assert_eq!(
            value,
            json!({ "type": "error", "data": { "message": "Access denied to this event" } })
        );
    }

    #[test]
    fn typing_omits_absent_discriminator() {
        let user_id = Uuid::new_v4();
        let receiver_id = Uuid::new_v4();
        let value = serde_json::to_value(ServerEvent::UserTyping {
            user_id,
            display_name: "ana".into(),
            event_id: None,
            receiver_id: Some(receiver_id),
        })
        .unwrap();

        assert_eq!(value["type"], "user_typing");
        assert!(value["data"].get("eventId").is_none());
        assert_eq!(value["data"]["receiverId"], json!(receiver_id));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let raw = json!({ "type": "drop_tables", "data": {} });
        assert!(serde_json::from_value::<ClientCommand>(raw).is_err());
    }
}
