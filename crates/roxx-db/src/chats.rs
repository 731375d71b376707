//! Chat registry: private and group conversations, membership, per-user
//! lock flags and the last-message cache.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use roxx_types::models::{
    Chat, ChatKind, GROUP_CHAT_PREFIX, LastMessage, Message, is_group_chat_id,
};

use crate::rows::{from_ms, ms, parse_col};
use crate::users::{active_user, uid_exists};
use crate::{Database, Result, StoreError};

const CHAT_COLUMNS: &str =
    "id, kind, name, group_icon, last_text, last_sender, last_ts, updated_at, version";

impl Database {
    /// Every chat `uid` takes part in, most recently active first.
    pub fn list_my_chats(&self, uid: &str) -> Result<Vec<Chat>> {
        self.with_conn(|conn| chats_where(conn, uid, false))
    }

    /// Participant-only read of a single chat.
    pub fn get_chat(&self, chat_id: &str, uid: &str) -> Result<Chat> {
        self.with_conn(|conn| participant_chat(conn, chat_id, uid))
    }

    pub fn create_group(
        &self,
        name: &str,
        member_ids: &[String],
        creator: &str,
        group_icon: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Chat> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::invalid("group name is empty"));
        }
        if member_ids.is_empty() {
            return Err(StoreError::invalid("group has no members"));
        }

        let chat = self.with_tx(|tx| {
            active_user(tx, creator)?;
            let members: BTreeSet<&str> = member_ids.iter().map(String::as_str).collect();
            for member in &members {
                if !uid_exists(tx, member)? {
                    return Err(StoreError::not_found("user", member));
                }
            }

            let id = format!("{GROUP_CHAT_PREFIX}{}", Uuid::new_v4());
            tx.execute(
                "INSERT INTO chats (id, kind, name, group_icon, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, ChatKind::Group.as_str(), name, group_icon, ms(now)],
            )?;
            for member in members.iter().filter(|m| **m != creator) {
                tx.execute(
                    "INSERT INTO chat_participants (chat_id, uid) VALUES (?1, ?2)",
                    params![id, member],
                )?;
            }
            tx.execute(
                "INSERT INTO chat_participants (chat_id, uid, is_admin) VALUES (?1, ?2, 1)",
                params![id, creator],
            )?;
            require_chat(tx, &id)
        })?;

        info!(chat_id = %chat.id, "{} created group '{}' with {} members", creator, name, chat.participants.len());
        Ok(chat)
    }

    /// Flip whether `uid` hides this chat behind their passcode.
    pub fn toggle_lock(&self, chat_id: &str, uid: &str) -> Result<Chat> {
        self.with_tx(|tx| {
            participant_chat(tx, chat_id, uid)?;
            tx.execute(
                "UPDATE chat_participants SET locked = 1 - locked WHERE chat_id = ?1 AND uid = ?2",
                params![chat_id, uid],
            )?;
            tx.execute(
                "UPDATE chats SET version = version + 1 WHERE id = ?1",
                [chat_id],
            )?;
            require_chat(tx, chat_id)
        })
    }

    /// The caller's locked chats, revealed only for the right passcode.
    pub fn unlock_chats(&self, uid: &str, passcode: &str) -> Result<Vec<Chat>> {
        self.verify_chat_lock(uid, passcode)?;
        self.with_conn(|conn| chats_where(conn, uid, true))
    }
}

pub(crate) fn load_chat(conn: &Connection, id: &str) -> Result<Option<Chat>> {
    let chat = conn
        .query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            [id],
            row_to_chat,
        )
        .optional()?;
    let Some(mut chat) = chat else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT uid, is_admin, locked FROM chat_participants WHERE chat_id = ?1")?;
    let rows = stmt.query_map([id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?, row.get::<_, bool>(2)?))
    })?;
    for row in rows {
        let (uid, is_admin, locked) = row?;
        if is_admin {
            chat.admin_ids.insert(uid.clone());
        }
        if locked {
            chat.locked_by.insert(uid.clone());
        }
        chat.participants.insert(uid);
    }
    Ok(Some(chat))
}

pub(crate) fn require_chat(conn: &Connection, id: &str) -> Result<Chat> {
    load_chat(conn, id)?.ok_or_else(|| StoreError::not_found("chat", id))
}

/// The chat, provided `uid` is one of its participants.
pub(crate) fn participant_chat(conn: &Connection, id: &str, uid: &str) -> Result<Chat> {
    let chat = require_chat(conn, id)?;
    if !chat.is_participant(uid) {
        return Err(StoreError::forbidden("not a participant of this chat"));
    }
    Ok(chat)
}

/// Record `msg` as the chat's latest activity, creating the private chat
/// on first contact. The deterministic id makes creation an
/// insert-if-absent, so two first messages racing each other still end up
/// in one chat.
pub(crate) fn upsert_on_send(conn: &Connection, msg: &Message) -> Result<Chat> {
    let chat_id = msg.chat_id();
    let at = ms(msg.timestamp);

    if !is_group_chat_id(&chat_id) {
        conn.execute(
            "INSERT OR IGNORE INTO chats (id, kind, updated_at) VALUES (?1, ?2, ?3)",
            params![chat_id, ChatKind::Private.as_str(), at],
        )?;
        for uid in [&msg.sender_id, &msg.recipient_id] {
            conn.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, uid) VALUES (?1, ?2)",
                params![chat_id, uid],
            )?;
        }
    }

    let updated = conn.execute(
        "UPDATE chats
         SET last_text = ?2, last_sender = ?3, last_ts = ?4, updated_at = ?4, version = version + 1
         WHERE id = ?1",
        params![chat_id, msg.text, msg.sender_id, at],
    )?;
    if updated == 0 {
        return Err(StoreError::not_found("chat", &chat_id));
    }
    require_chat(conn, &chat_id)
}

fn chats_where(conn: &Connection, uid: &str, locked_only: bool) -> Result<Vec<Chat>> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM chats c
         JOIN chat_participants p ON p.chat_id = c.id
         WHERE p.uid = ?1 AND (?2 = 0 OR p.locked = 1)
         ORDER BY c.updated_at DESC, c.id ASC",
    )?;
    let ids = stmt
        .query_map(params![uid, locked_only], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut chats = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(chat) = load_chat(conn, &id)? {
            chats.push(chat);
        }
    }
    Ok(chats)
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let kind: String = row.get(1)?;
    let last_text: Option<String> = row.get(4)?;
    let last_sender: Option<String> = row.get(5)?;
    let last_ts: Option<i64> = row.get(6)?;

    let last_message = match (last_sender, last_ts) {
        (Some(sender_id), Some(ts)) => Some(LastMessage {
            text: last_text.unwrap_or_default(),
            sender_id,
            timestamp: from_ms(6, ts)?,
        }),
        _ => None,
    };

    Ok(Chat {
        id: row.get(0)?,
        kind: parse_col(1, &kind, ChatKind::parse)?,
        participants: BTreeSet::new(),
        name: row.get(2)?,
        group_icon: row.get(3)?,
        admin_ids: BTreeSet::new(),
        last_message,
        updated_at: from_ms(7, row.get(7)?)?,
        locked_by: BTreeSet::new(),
        version: row.get::<_, i64>(8)? as u64,
    })
}
