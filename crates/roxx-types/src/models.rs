use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group chat ids carry this prefix so routing can tell them apart from
/// deterministic private chat ids.
pub const GROUP_CHAT_PREFIX: &str = "group_";

/// Separator used when joining the two participant uids of a private chat.
pub const PRIVATE_CHAT_SEPARATOR: char = '_';

/// Sender uid of chat assistant replies. It has no account row.
pub const ASSISTANT_UID: &str = "roxx-assistant";

/// Deterministic id of the private chat between two users.
///
/// The two uids are sorted before joining, so the result is the same for
/// `(a, b)` and `(b, a)`. The id doubles as the insert-if-absent key, which
/// is what keeps a pair of users down to a single private chat.
pub fn private_chat_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}{PRIVATE_CHAT_SEPARATOR}{hi}")
}

pub fn is_group_chat_id(chat_id: &str) -> bool {
    chat_id.starts_with(GROUP_CHAT_PREFIX)
}

// -- Users --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A user's own view of their account. Never carries the password hash or
/// the chat-lock passcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub status: Presence,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub blocked_users: BTreeSet<String>,
    pub has_chat_lock: bool,
    pub is_admin: bool,
    pub is_globally_blocked: bool,
}

/// What other users get to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub uid: String,
    pub name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub status: Presence,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl From<UserProfile> for PublicUser {
    fn from(p: UserProfile) -> Self {
        Self {
            uid: p.uid,
            name: p.name,
            photo_url: p.photo_url,
            status: p.status,
            last_seen: p.last_seen,
            bio: p.bio,
        }
    }
}

// -- Chats --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub participants: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_icon: Option<String>,
    /// Only populated for groups.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub admin_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Participants who hid this chat behind their personal passcode.
    pub locked_by: BTreeSet<String>,
    /// Bumped on every mutation of the record.
    pub version: u64,
}

impl Chat {
    pub fn is_participant(&self, uid: &str) -> bool {
        self.participants.contains(uid)
    }
}

// -- Messages --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    File,
    Voice,
    StoryReply,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
            Self::Voice => "voice",
            Self::StoryReply => "story_reply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "file" => Some(Self::File),
            "voice" => Some(Self::Voice),
            "story_reply" => Some(Self::StoryReply),
            _ => None,
        }
    }

    /// Kinds whose payload is the text itself, so an empty body is meaningless.
    pub fn requires_text(self) -> bool {
        matches!(self, Self::Text | Self::StoryReply)
    }
}

/// Delivery state. Variant order is the only legal direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn rank(self) -> i64 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Seen => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::Sent),
            1 => Some(Self::Delivered),
            2 => Some(Self::Seen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Snapshot of the message being replied to, copied at send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyContext {
    pub message_id: String,
    pub text: String,
    pub sender_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryContext {
    pub story_id: String,
    pub media_url: String,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    /// A user uid for private messages, the chat id for group messages.
    pub recipient_id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub is_forwarded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_context: Option<ReplyContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_context: Option<StoryContext>,
}

impl Message {
    /// The chat this message belongs to, derived from sender and recipient.
    pub fn chat_id(&self) -> String {
        if is_group_chat_id(&self.recipient_id) {
            self.recipient_id.clone()
        } else {
            private_chat_id(&self.sender_id, &self.recipient_id)
        }
    }
}

/// One member's delivery state for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub message_id: String,
    pub user_id: String,
    pub status: MessageStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

// -- Calls --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voice" => Some(Self::Voice),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Accepted,
    Rejected,
    Ended,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(Self::Ringing),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }

    /// Allowed edges of the call state machine. Staying put is handled by
    /// the caller as a no-op and is not an edge.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Ringing, Accepted) | (Ringing, Rejected) | (Ringing, Ended) | (Accepted, Ended)
        )
    }

    /// Pollers stop once a session reaches one of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Ended)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: String,
    pub caller_id: String,
    pub receiver_id: String,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub status: CallStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

impl CallSession {
    pub fn is_party(&self, uid: &str) -> bool {
        self.caller_id == uid || self.receiver_id == uid
    }
}

// -- Stories --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryView {
    pub user_id: String,
    pub user_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_photo: String,
    pub media_url: String,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub likes: BTreeSet<String>,
    pub views: Vec<StoryView>,
}

// -- Admin --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStats {
    pub users: u64,
    pub messages: u64,
    pub chats: u64,
    pub stories: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_chat_id_is_order_independent() {
        assert_eq!(private_chat_id("a1", "b1"), "a1_b1");
        assert_eq!(private_chat_id("b1", "a1"), "a1_b1");
        assert_eq!(private_chat_id("b1", "a1"), private_chat_id("b1", "a1"));
        assert!(!is_group_chat_id(&private_chat_id("a1", "b1")));
        assert!(is_group_chat_id("group_123"));
    }

    #[test]
    fn message_status_orders_forward() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Seen);
        for s in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Seen] {
            assert_eq!(MessageStatus::from_rank(s.rank()), Some(s));
        }
        assert_eq!(MessageStatus::from_rank(7), None);
    }

    #[test]
    fn call_transition_table() {
        use CallStatus::*;
        assert!(Ringing.can_transition_to(Accepted));
        assert!(Ringing.can_transition_to(Rejected));
        assert!(Ringing.can_transition_to(Ended));
        assert!(Accepted.can_transition_to(Ended));

        assert!(!Ended.can_transition_to(Accepted));
        assert!(!Rejected.can_transition_to(Ended));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(!Accepted.can_transition_to(Ringing));
        assert!(Rejected.is_terminal() && Ended.is_terminal());
        assert!(!Ringing.is_terminal());
    }

    #[test]
    fn message_wire_format_uses_camel_case_and_millis() {
        let msg = Message {
            id: "m1".into(),
            sender_id: "a1".into(),
            recipient_id: "b1".into(),
            text: "hi".into(),
            kind: MessageKind::StoryReply,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            status: MessageStatus::Sent,
            file_url: None,
            file_name: None,
            is_forwarded: false,
            reply_context: None,
            story_context: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["senderId"], "a1");
        assert_eq!(json["type"], "story_reply");
        assert_eq!(json["status"], "sent");
        assert_eq!(json["timestamp"], 1_700_000_000_123i64);
        assert!(json.get("replyContext").is_none());
        assert_eq!(msg.chat_id(), "a1_b1");
    }
}
