use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CallSession, Chat, Message, MessageStatus};

/// Events pushed over the WebSocket gateway. Every event mirrors a write
/// that is also observable through the polling endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful identification
    Ready { user_id: String, name: String },

    /// A user logged in, logged out or was suspended
    PresenceUpdate {
        user_id: String,
        online: bool,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        last_seen: DateTime<Utc>,
    },

    /// A message was posted to a chat the recipient takes part in
    MessageCreate { chat_id: String, message: Message },

    /// Messages in a chat advanced to `status` on behalf of `user_id`
    MessageStatus {
        chat_id: String,
        user_id: String,
        status: MessageStatus,
        message_ids: Vec<String>,
    },

    /// Chat metadata changed (last message, lock, creation)
    ChatUpdate { chat: Chat },

    /// A call was created or changed status
    CallUpdate { call: CallSession },

    /// A story was posted, liked or removed
    StoryUpdate { story_id: String, removed: bool },

    /// A user started typing
    TypingStart {
        chat_id: String,
        user_id: String,
        name: String,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Indicate typing in a chat
    StartTyping { chat_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_uses_tagged_camel_case() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"StartTyping","data":{"chatId":"group_1"}}"#).unwrap();
        match cmd {
            GatewayCommand::StartTyping { chat_id } => assert_eq!(chat_id, "group_1"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn event_serializes_with_type_and_data() {
        let event = GatewayEvent::StoryUpdate {
            story_id: "s1".into(),
            removed: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StoryUpdate");
        assert_eq!(json["data"]["storyId"], "s1");
        assert_eq!(json["data"]["removed"], true);
    }
}
