use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Timestamps are Unix milliseconds. Set-valued fields (participants,
/// blocks, likes, views, receipts) live in link tables that cascade with
/// their parent row.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            uid                 TEXT PRIMARY KEY,
            email               TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password            TEXT NOT NULL,
            name                TEXT NOT NULL,
            photo_url           TEXT NOT NULL,
            status              TEXT NOT NULL DEFAULT 'offline',
            last_seen           INTEGER NOT NULL,
            bio                 TEXT,
            chat_lock           TEXT,
            is_admin            INTEGER NOT NULL DEFAULT 0,
            is_globally_blocked INTEGER NOT NULL DEFAULT 0,
            is_protected        INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS blocked_users (
            uid         TEXT NOT NULL REFERENCES users(uid) ON DELETE CASCADE,
            target      TEXT NOT NULL,
            PRIMARY KEY (uid, target)
        );

        CREATE TABLE IF NOT EXISTS chats (
            id          TEXT PRIMARY KEY,
            kind        TEXT NOT NULL,
            name        TEXT,
            group_icon  TEXT,
            last_text   TEXT,
            last_sender TEXT,
            last_ts     INTEGER,
            updated_at  INTEGER NOT NULL,
            version     INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            uid         TEXT NOT NULL,
            is_admin    INTEGER NOT NULL DEFAULT 0,
            locked      INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (chat_id, uid)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_uid
            ON chat_participants(uid);

        CREATE TABLE IF NOT EXISTS messages (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            chat_id             TEXT NOT NULL,
            sender_id           TEXT NOT NULL,
            recipient_id        TEXT NOT NULL,
            text                TEXT NOT NULL,
            kind                TEXT NOT NULL,
            timestamp           INTEGER NOT NULL,
            status              INTEGER NOT NULL DEFAULT 0,
            file_url            TEXT,
            file_name           TEXT,
            is_forwarded        INTEGER NOT NULL DEFAULT 0,
            reply_message_id    TEXT,
            reply_text          TEXT,
            reply_sender_name   TEXT,
            story_id            TEXT,
            story_media_url     TEXT,
            story_media_type    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, timestamp, seq);

        CREATE TABLE IF NOT EXISTS receipts (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            status      INTEGER NOT NULL,
            at          INTEGER NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS calls (
            id          TEXT PRIMARY KEY,
            caller_id   TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            kind        TEXT NOT NULL,
            status      TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,
            version     INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_calls_receiver
            ON calls(receiver_id, status, timestamp);

        CREATE TABLE IF NOT EXISTS stories (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            user_id     TEXT NOT NULL,
            user_name   TEXT NOT NULL,
            user_photo  TEXT NOT NULL,
            media_url   TEXT NOT NULL,
            media_type  TEXT NOT NULL,
            caption     TEXT,
            timestamp   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS story_likes (
            story_id    TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            uid         TEXT NOT NULL,
            PRIMARY KEY (story_id, uid)
        );

        CREATE TABLE IF NOT EXISTS story_views (
            story_id    TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            user_name   TEXT NOT NULL,
            at          INTEGER NOT NULL,
            PRIMARY KEY (story_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
