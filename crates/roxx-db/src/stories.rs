//! Story store: time-boxed posts with likes and one view per viewer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};
use uuid::Uuid;

use roxx_types::models::{
    MediaType, Message, MessageKind, MessageStatus, Story, StoryContext, StoryView,
};

use crate::messages::{Posted, insert_message, route};
use crate::rows::{from_ms, ms, parse_col};
use crate::users::{active_user, display_name};
use crate::{Database, Result, StoreError};

const STORY_COLUMNS: &str =
    "id, user_id, user_name, user_photo, media_url, media_type, caption, timestamp";

impl Database {
    /// Publish a story. Author name and photo come from the directory.
    pub fn post_story(
        &self,
        uid: &str,
        media_url: &str,
        media_type: MediaType,
        caption: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Story> {
        let media_url = media_url.trim();
        if media_url.is_empty() {
            return Err(StoreError::invalid("story media URL is empty"));
        }
        let caption = caption.map(str::trim).filter(|c| !c.is_empty());
        let max = self.limits.max_stories;

        let story = self.with_tx(|tx| {
            let author = active_user(tx, uid)?;
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO stories (id, user_id, user_name, user_photo, media_url, media_type, caption, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    uid,
                    author.name,
                    author.photo_url,
                    media_url,
                    media_type.as_str(),
                    caption,
                    ms(now)
                ],
            )?;
            let removed = tx.execute(
                "DELETE FROM stories
                 WHERE seq <= (SELECT seq FROM stories ORDER BY seq DESC LIMIT 1 OFFSET ?1)",
                [max as i64],
            )?;
            if removed > 0 {
                warn!(removed, max, "Story retention limit reached, dropped oldest stories");
            }
            require_story(tx, &id)
        })?;

        info!(story_id = %story.id, "{} posted a story", uid);
        Ok(story)
    }

    /// Stories still inside their visibility window, oldest first.
    pub fn list_stories(&self, now: DateTime<Utc>) -> Result<Vec<Story>> {
        let cutoff = ms(now - self.limits.story_ttl);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STORY_COLUMNS} FROM stories WHERE timestamp > ?1 ORDER BY seq ASC"
            ))?;
            let mut stories = stmt
                .query_map([cutoff], row_to_story)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for story in &mut stories {
                fill_reactions(conn, story)?;
            }
            Ok(stories)
        })
    }

    /// Record that `viewer` saw the story. At most one entry per viewer,
    /// the owner is never recorded, and an unknown story is ignored.
    /// Returns whether a new view was stored.
    pub fn record_view(&self, story_id: &str, viewer: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_tx(|tx| {
            let Some(story) = find_story(tx, story_id)? else {
                return Ok(false);
            };
            if story.user_id == viewer {
                return Ok(false);
            }
            let name = display_name(tx, viewer)?.ok_or_else(|| StoreError::not_found("user", viewer))?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO story_views (story_id, user_id, user_name, at) VALUES (?1, ?2, ?3, ?4)",
                params![story_id, viewer, name, ms(now)],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Flip `uid`'s like. Returns whether the story is now liked.
    pub fn toggle_like(&self, story_id: &str, uid: &str) -> Result<bool> {
        self.with_tx(|tx| {
            require_story(tx, story_id)?;
            let removed = tx.execute(
                "DELETE FROM story_likes WHERE story_id = ?1 AND uid = ?2",
                params![story_id, uid],
            )?;
            if removed > 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO story_likes (story_id, uid) VALUES (?1, ?2)",
                params![story_id, uid],
            )?;
            Ok(true)
        })
    }

    /// Owner-only removal.
    pub fn delete_story(&self, story_id: &str, actor: &str) -> Result<()> {
        self.with_tx(|tx| {
            let story = require_story(tx, story_id)?;
            if story.user_id != actor {
                return Err(StoreError::forbidden("only the owner can delete a story"));
            }
            tx.execute("DELETE FROM stories WHERE id = ?1", [story_id])?;
            Ok(())
        })?;
        info!(story_id, "{} deleted a story", actor);
        Ok(())
    }

    /// Answer a visible story with a private `story_reply` message to its
    /// owner.
    pub fn reply_to_story(
        &self,
        story_id: &str,
        replier: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Posted> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::invalid("message text is empty"));
        }
        let cutoff = now - self.limits.story_ttl;
        let max = self.limits.max_messages;

        self.with_tx(|tx| {
            let story = find_story(tx, story_id)?
                .filter(|s| s.timestamp > cutoff)
                .ok_or_else(|| StoreError::not_found("story", story_id))?;
            route(tx, replier, &story.user_id)?;

            let message = Message {
                id: Uuid::new_v4().to_string(),
                sender_id: replier.to_string(),
                recipient_id: story.user_id.clone(),
                text: text.to_string(),
                kind: MessageKind::StoryReply,
                timestamp: now,
                status: MessageStatus::Sent,
                file_url: None,
                file_name: None,
                is_forwarded: false,
                reply_context: None,
                story_context: Some(StoryContext {
                    story_id: story.id,
                    media_url: story.media_url,
                    media_type: story.media_type,
                }),
            };
            let chat = insert_message(tx, &message, max)?;
            Ok(Posted { message, chat })
        })
    }
}

pub(crate) fn count_stories(conn: &Connection) -> Result<u64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM stories", [], |row| row.get::<_, i64>(0))? as u64)
}

fn find_story(conn: &Connection, id: &str) -> Result<Option<Story>> {
    let story = conn
        .query_row(
            &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
            [id],
            row_to_story,
        )
        .optional()?;
    match story {
        Some(mut story) => {
            fill_reactions(conn, &mut story)?;
            Ok(Some(story))
        }
        None => Ok(None),
    }
}

fn require_story(conn: &Connection, id: &str) -> Result<Story> {
    find_story(conn, id)?.ok_or_else(|| StoreError::not_found("story", id))
}

fn fill_reactions(conn: &Connection, story: &mut Story) -> Result<()> {
    let mut likes = conn.prepare("SELECT uid FROM story_likes WHERE story_id = ?1")?;
    story.likes = likes
        .query_map([&story.id], |row| row.get(0))?
        .collect::<std::result::Result<BTreeSet<String>, _>>()?;

    let mut views = conn.prepare(
        "SELECT user_id, user_name, at FROM story_views WHERE story_id = ?1 ORDER BY at ASC, user_id ASC",
    )?;
    story.views = views
        .query_map([&story.id], |row| {
            Ok(StoryView {
                user_id: row.get(0)?,
                user_name: row.get(1)?,
                timestamp: from_ms(2, row.get(2)?)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(())
}

fn row_to_story(row: &rusqlite::Row<'_>) -> rusqlite::Result<Story> {
    let media_type: String = row.get(5)?;
    Ok(Story {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        user_photo: row.get(3)?,
        media_url: row.get(4)?,
        media_type: parse_col(5, &media_type, MediaType::parse)?,
        caption: row.get(6)?,
        timestamp: from_ms(7, row.get(7)?)?,
        likes: BTreeSet::new(),
        views: Vec::new(),
    })
}
