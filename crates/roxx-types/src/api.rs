use serde::{Deserialize, Serialize};

use crate::models::{CallKind, CallStatus, MediaType, MessageKind, UserProfile};

// -- JWT Claims --

/// JWT claims shared across roxx-api (REST middleware) and roxx-gateway
/// (WebSocket identify).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Falls back to the local part of the email.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub profile: UserProfile,
    pub token: String,
}

// -- Users --

/// Partial profile update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub bio: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    /// An empty string clears the passcode.
    pub chat_lock_password: Option<String>,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub group_icon: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChatIdResponse {
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnlockChatsRequest {
    pub passcode: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// A user uid for private chats, a group chat id for groups.
    pub recipient_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Id of a message in the same chat this one replies to.
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ForwardMessageRequest {
    pub target_chat_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkStatusResponse {
    pub updated: usize,
}

// -- Calls --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct InitiateCallRequest {
    pub receiver_id: String,
    #[serde(rename = "type")]
    pub kind: CallKind,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCallRequest {
    pub status: CallStatus,
}

// -- Stories --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PostStoryRequest {
    pub media_url: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoryReplyRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeResponse {
    pub liked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ViewResponse {
    pub recorded: bool,
}

// -- Admin --

/// `deleted` is false when the target is the protected bootstrap admin.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteUserResponse {
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_defaults_to_text() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"recipientId":"b1","text":"hi"}"#).unwrap();
        assert_eq!(req.kind, MessageKind::Text);
        assert!(req.reply_to.is_none());

        let req: SendMessageRequest = serde_json::from_str(
            r#"{"recipientId":"b1","type":"image","fileUrl":"https://x/y.png"}"#,
        )
        .unwrap();
        assert_eq!(req.kind, MessageKind::Image);
        assert!(req.text.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<LoginRequest>(
            r#"{"email":"a@b.c","password":"x","isAdmin":true}"#,
        );
        assert!(err.is_err());
    }
}
