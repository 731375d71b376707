//! Message store: ordered messages per chat, the sent -> delivered -> seen
//! status machine, per-recipient receipts and reply/forward linkage.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};
use uuid::Uuid;

use roxx_types::api::SendMessageRequest;
use roxx_types::models::{
    Chat, ChatKind, MediaType, Message, MessageKind, MessageStatus, Receipt, ReplyContext,
    StoryContext, ASSISTANT_UID, is_group_chat_id, private_chat_id,
};

use crate::chats::{load_chat, participant_chat, upsert_on_send};
use crate::rows::{from_ms, ms, parse_col};
use crate::users::{active_user, display_name, has_blocked, uid_exists};
use crate::{Database, Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, text, kind, timestamp, status, \
     file_url, file_name, is_forwarded, reply_message_id, reply_text, reply_sender_name, \
     story_id, story_media_url, story_media_type";

/// A stored message together with the chat record it updated.
#[derive(Debug, Clone)]
pub struct Posted {
    pub message: Message,
    pub chat: Chat,
}

impl Database {
    /// Post a new message from `sender`. Creates the private chat on first
    /// contact and updates the chat's last-message cache.
    pub fn send(&self, sender: &str, req: &SendMessageRequest, now: DateTime<Utc>) -> Result<Posted> {
        if req.kind == MessageKind::StoryReply {
            return Err(StoreError::invalid("story replies are posted through the story"));
        }
        let text = req.text.trim();
        validate_body(req.kind, text, req.file_url.as_deref())?;

        let max = self.limits.max_messages;
        self.with_tx(|tx| {
            let chat_id = route(tx, sender, &req.recipient_id)?;
            let reply_context = req
                .reply_to
                .as_deref()
                .map(|id| reply_context(tx, &chat_id, id))
                .transpose()?;

            let message = Message {
                id: Uuid::new_v4().to_string(),
                sender_id: sender.to_string(),
                recipient_id: req.recipient_id.clone(),
                text: text.to_string(),
                kind: req.kind,
                timestamp: now,
                status: MessageStatus::Sent,
                file_url: req.file_url.clone(),
                file_name: req.file_name.clone(),
                is_forwarded: false,
                reply_context,
                story_context: None,
            };
            let chat = insert_message(tx, &message, max)?;
            Ok(Posted { message, chat })
        })
    }

    /// Copy an existing message into another chat on behalf of `actor`.
    /// The copy drops its reply context and is flagged as forwarded.
    pub fn forward(
        &self,
        source_id: &str,
        target_chat_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Posted> {
        let max = self.limits.max_messages;
        self.with_tx(|tx| {
            let source = require_message(tx, source_id)?;
            ensure_can_read(tx, &source, actor)?;

            let target = participant_chat(tx, target_chat_id, actor)?;
            let recipient = match target.kind {
                ChatKind::Group => target.id.clone(),
                ChatKind::Private => target
                    .participants
                    .iter()
                    .find(|p| p.as_str() != actor)
                    .cloned()
                    .ok_or_else(|| StoreError::invalid("private chat has no other participant"))?,
            };
            route(tx, actor, &recipient)?;

            let message = Message {
                id: Uuid::new_v4().to_string(),
                sender_id: actor.to_string(),
                recipient_id: recipient,
                timestamp: now,
                status: MessageStatus::Sent,
                is_forwarded: true,
                reply_context: None,
                ..source
            };
            let chat = insert_message(tx, &message, max)?;
            Ok(Posted { message, chat })
        })
    }

    /// Store the assistant's answer to a prompt `asker` posted in
    /// `origin_chat_id`. Group prompts are answered in the group, private
    /// ones in the asker's own thread with the assistant. The reply is
    /// stored as already seen.
    pub fn post_assistant_reply(
        &self,
        asker: &str,
        origin_chat_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Posted> {
        let max = self.limits.max_messages;
        self.with_tx(|tx| {
            let recipient = if is_group_chat_id(origin_chat_id) {
                participant_chat(tx, origin_chat_id, asker)?;
                origin_chat_id.to_string()
            } else {
                active_user(tx, asker)?;
                asker.to_string()
            };
            let text = match text.trim() {
                "" => "I'm thinking...",
                trimmed => trimmed,
            };

            let message = Message {
                id: Uuid::new_v4().to_string(),
                sender_id: ASSISTANT_UID.to_string(),
                recipient_id: recipient,
                text: text.to_string(),
                kind: MessageKind::Text,
                timestamp: now,
                status: MessageStatus::Seen,
                file_url: None,
                file_name: None,
                is_forwarded: false,
                reply_context: None,
                story_context: None,
            };
            let chat = insert_message(tx, &message, max)?;
            debug!(chat_id = %chat.id, asker, "Assistant reply stored");
            Ok(Posted { message, chat })
        })
    }

    /// Messages of a chat in timestamp order, insertion order breaking ties.
    pub fn list_messages(&self, chat_id: &str, caller: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            if readable_chat(conn, chat_id, caller)?.is_none() {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1
                 ORDER BY timestamp ASC, seq ASC"
            ))?;
            let messages = stmt
                .query_map([chat_id], row_to_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    /// Advance messages addressed to `uid` in this chat to `delivered`.
    /// Returns the ids whose shared status moved.
    pub fn mark_delivered(&self, chat_id: &str, uid: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.advance(chat_id, uid, MessageStatus::Delivered, now)
    }

    /// Advance messages addressed to `uid` in this chat to `seen`.
    pub fn mark_seen(&self, chat_id: &str, uid: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.advance(chat_id, uid, MessageStatus::Seen, now)
    }

    /// Per-member delivery state of one message.
    pub fn receipts(&self, message_id: &str, caller: &str) -> Result<Vec<Receipt>> {
        self.with_conn(|conn| {
            let message = require_message(conn, message_id)?;
            ensure_can_read(conn, &message, caller)?;

            let mut stmt = conn.prepare(
                "SELECT message_id, user_id, status, at FROM receipts
                 WHERE message_id = ?1 ORDER BY at ASC, user_id ASC",
            )?;
            let receipts = stmt
                .query_map([message_id], |row| {
                    let rank: i64 = row.get(2)?;
                    Ok(Receipt {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        status: status_from_rank(2, rank)?,
                        timestamp: from_ms(3, row.get(3)?)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(receipts)
        })
    }

    /// Status only ever moves forward, both on the shared message field and
    /// in the caller's own receipt. Re-marking is a silent no-op.
    fn advance(
        &self,
        chat_id: &str,
        uid: &str,
        target: MessageStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        self.with_tx(|tx| {
            if readable_chat(tx, chat_id, uid)?.is_none() {
                return Ok(Vec::new());
            }

            // Addressed to uid directly (private) or to the chat (group),
            // never the reader's own messages.
            let mut stmt = tx.prepare(
                "SELECT id, status FROM messages
                 WHERE chat_id = ?1 AND sender_id != ?2 AND recipient_id IN (?1, ?2)
                 ORDER BY seq ASC",
            )?;
            let scoped = stmt
                .query_map(params![chat_id, uid], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut advanced = Vec::new();
            for (id, rank) in scoped {
                tx.execute(
                    "INSERT INTO receipts (message_id, user_id, status, at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(message_id, user_id) DO UPDATE
                     SET status = excluded.status, at = excluded.at
                     WHERE excluded.status > receipts.status",
                    params![id, uid, target.rank(), ms(now)],
                )?;
                if rank < target.rank() {
                    tx.execute(
                        "UPDATE messages SET status = ?2 WHERE id = ?1 AND status < ?2",
                        params![id, target.rank()],
                    )?;
                    advanced.push(id);
                }
            }

            if !advanced.is_empty() {
                debug!(chat_id, uid, count = advanced.len(), "Messages advanced to {:?}", target);
            }
            Ok(advanced)
        })
    }
}

/// Where `sender` may post when addressing `recipient`: the group itself
/// for members, or the deterministic private chat for an existing user who
/// has not blocked the sender.
pub(crate) fn route(conn: &Connection, sender: &str, recipient: &str) -> Result<String> {
    active_user(conn, sender)?;

    if is_group_chat_id(recipient) {
        participant_chat(conn, recipient, sender)?;
        return Ok(recipient.to_string());
    }
    if recipient == sender {
        return Err(StoreError::invalid("cannot message yourself"));
    }
    if !uid_exists(conn, recipient)? {
        return Err(StoreError::not_found("user", recipient));
    }
    if has_blocked(conn, recipient, sender)? {
        return Err(StoreError::forbidden("recipient has blocked you"));
    }
    Ok(private_chat_id(sender, recipient))
}

/// Append `msg`, refresh its chat and apply the retention bound.
pub(crate) fn insert_message(conn: &Connection, msg: &Message, max_messages: usize) -> Result<Chat> {
    let (reply_id, reply_text, reply_sender) = match &msg.reply_context {
        Some(r) => (Some(&r.message_id), Some(&r.text), Some(&r.sender_name)),
        None => (None, None, None),
    };
    let (story_id, story_url, story_type) = match &msg.story_context {
        Some(s) => (Some(&s.story_id), Some(&s.media_url), Some(s.media_type.as_str())),
        None => (None, None, None),
    };

    conn.execute(
        "INSERT INTO messages (
            id, chat_id, sender_id, recipient_id, text, kind, timestamp, status,
            file_url, file_name, is_forwarded,
            reply_message_id, reply_text, reply_sender_name,
            story_id, story_media_url, story_media_type
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            msg.id,
            msg.chat_id(),
            msg.sender_id,
            msg.recipient_id,
            msg.text,
            msg.kind.as_str(),
            ms(msg.timestamp),
            msg.status.rank(),
            msg.file_url,
            msg.file_name,
            msg.is_forwarded,
            reply_id,
            reply_text,
            reply_sender,
            story_id,
            story_url,
            story_type,
        ],
    )?;

    let chat = upsert_on_send(conn, msg)?;
    enforce_retention(conn, max_messages)?;
    Ok(chat)
}

pub(crate) fn count_messages(conn: &Connection) -> Result<u64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get::<_, i64>(0))? as u64)
}

fn validate_body(kind: MessageKind, text: &str, file_url: Option<&str>) -> Result<()> {
    if kind.requires_text() {
        if text.is_empty() {
            return Err(StoreError::invalid("message text is empty"));
        }
    } else if file_url.is_none_or(|url| url.trim().is_empty()) {
        return Err(StoreError::invalid(format!("{} message needs a file URL", kind.as_str())));
    }
    Ok(())
}

/// Snapshot of the replied-to message. It must live in the same chat.
fn reply_context(conn: &Connection, chat_id: &str, reply_to: &str) -> Result<ReplyContext> {
    let target = find_message(conn, reply_to)?
        .filter(|m| m.chat_id() == chat_id)
        .ok_or_else(|| StoreError::invalid("reply target is not in this chat"))?;
    let sender_name = match display_name(conn, &target.sender_id)? {
        Some(name) => name,
        None if target.sender_id == ASSISTANT_UID => "Assistant".to_string(),
        None => "User".to_string(),
    };
    let text = if target.text.is_empty() {
        "Media".to_string()
    } else {
        target.text
    };
    Ok(ReplyContext {
        message_id: target.id,
        text,
        sender_name,
    })
}

/// The chat if `uid` may read it; `None` for a private chat that has not
/// been created yet.
fn readable_chat(conn: &Connection, chat_id: &str, uid: &str) -> Result<Option<Chat>> {
    match load_chat(conn, chat_id)? {
        Some(chat) if chat.is_participant(uid) => Ok(Some(chat)),
        Some(_) => Err(StoreError::forbidden("not a participant of this chat")),
        None if is_group_chat_id(chat_id) => Err(StoreError::not_found("chat", chat_id)),
        None => Ok(None),
    }
}

fn ensure_can_read(conn: &Connection, msg: &Message, uid: &str) -> Result<()> {
    if msg.sender_id == uid || msg.recipient_id == uid {
        return Ok(());
    }
    match load_chat(conn, &msg.chat_id())? {
        Some(chat) if chat.is_participant(uid) => Ok(()),
        _ => Err(StoreError::forbidden("message is not visible to you")),
    }
}

fn find_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id],
            row_to_message,
        )
        .optional()?)
}

fn require_message(conn: &Connection, id: &str) -> Result<Message> {
    find_message(conn, id)?.ok_or_else(|| StoreError::not_found("message", id))
}

/// Keep only the newest `max` messages.
fn enforce_retention(conn: &Connection, max: usize) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM messages
         WHERE seq <= (SELECT seq FROM messages ORDER BY seq DESC LIMIT 1 OFFSET ?1)",
        [max as i64],
    )?;
    if removed > 0 {
        warn!(removed, max, "Message retention limit reached, dropped oldest messages");
    }
    Ok(removed)
}

fn status_from_rank(idx: usize, rank: i64) -> rusqlite::Result<MessageStatus> {
    MessageStatus::from_rank(rank).ok_or_else(|| {
        crate::rows::corrupt(idx, rusqlite::types::Type::Integer, format!("status {rank}"))
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(4)?;

    let reply_context = match row.get::<_, Option<String>>(10)? {
        Some(message_id) => Some(ReplyContext {
            message_id,
            text: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            sender_name: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
        }),
        None => None,
    };

    let story_context = match row.get::<_, Option<String>>(13)? {
        Some(story_id) => {
            let media_type: String = row.get(15)?;
            Some(StoryContext {
                story_id,
                media_url: row.get::<_, Option<String>>(14)?.unwrap_or_default(),
                media_type: parse_col(15, &media_type, MediaType::parse)?,
            })
        }
        None => None,
    };

    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        text: row.get(3)?,
        kind: parse_col(4, &kind, MessageKind::parse)?,
        timestamp: from_ms(5, row.get(5)?)?,
        status: status_from_rank(6, row.get(6)?)?,
        file_url: row.get(7)?,
        file_name: row.get(8)?,
        is_forwarded: row.get(9)?,
        reply_context,
        story_context,
    })
}
