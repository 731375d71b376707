//! Administrator operations. Every call names the acting uid and the
//! admin check happens here, not in the caller.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{info, warn};

use roxx_types::models::{AdminStats, Presence, UserProfile};

use crate::events::AuthEvent;
use crate::messages::count_messages;
use crate::stories::count_stories;
use crate::users::{active_user, load_all_profiles, load_profile, set_presence};
use crate::{Database, Result, StoreError};

impl Database {
    /// Every account, suspended ones included.
    pub fn list_all(&self, actor: &str) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            require_admin(conn, actor)?;
            load_all_profiles(conn)
        })
    }

    /// Suspend or reinstate `uid`. Administrators cannot be suspended; the
    /// call then returns the unchanged profile. Suspension also signs the
    /// account out.
    pub fn toggle_global_block(&self, actor: &str, uid: &str, now: DateTime<Utc>) -> Result<UserProfile> {
        let profile = self.with_tx(|tx| {
            require_admin(tx, actor)?;
            let target = load_profile(tx, uid)?;
            if target.is_admin {
                return Ok(target);
            }
            let suspend = !target.is_globally_blocked;
            tx.execute(
                "UPDATE users SET is_globally_blocked = ?2 WHERE uid = ?1",
                params![uid, suspend],
            )?;
            if suspend {
                set_presence(tx, uid, Presence::Offline, now)?;
            }
            load_profile(tx, uid)
        })?;

        if profile.is_globally_blocked {
            warn!(uid, actor, "Account suspended");
            self.auth_events.publish(AuthEvent::Suspended {
                uid: uid.to_string(),
                at: now,
            });
        } else {
            info!(uid, actor, "Account suspension state is now off");
        }
        Ok(profile)
    }

    /// Grant or revoke admin rights. The protected bootstrap account keeps
    /// its rights whatever is asked.
    pub fn toggle_admin_access(&self, actor: &str, uid: &str) -> Result<UserProfile> {
        let profile = self.with_tx(|tx| {
            require_admin(tx, actor)?;
            let target = load_profile(tx, uid)?;
            if is_protected(tx, uid)? {
                return Ok(target);
            }
            tx.execute(
                "UPDATE users SET is_admin = NOT is_admin WHERE uid = ?1",
                [uid],
            )?;
            load_profile(tx, uid)
        })?;

        info!(uid, actor, is_admin = profile.is_admin, "Admin access changed");
        self.auth_events.publish(AuthEvent::ProfileUpdated {
            profile: profile.clone(),
        });
        Ok(profile)
    }

    /// Remove an account with its messages, the chats it takes part in,
    /// its stories and its calls. Returns `false` when `uid` is the
    /// protected bootstrap admin, which is never deleted.
    pub fn delete_user(&self, actor: &str, uid: &str) -> Result<bool> {
        let deleted = self.with_tx(|tx| {
            require_admin(tx, actor)?;
            load_profile(tx, uid)?;
            if is_protected(tx, uid)? {
                return Ok(false);
            }

            tx.execute(
                "DELETE FROM messages WHERE sender_id = ?1 OR recipient_id = ?1
                 OR chat_id IN (SELECT chat_id FROM chat_participants WHERE uid = ?1)",
                [uid],
            )?;
            tx.execute(
                "DELETE FROM chats WHERE id IN (SELECT chat_id FROM chat_participants WHERE uid = ?1)",
                [uid],
            )?;
            tx.execute("DELETE FROM stories WHERE user_id = ?1", [uid])?;
            tx.execute("DELETE FROM story_likes WHERE uid = ?1", [uid])?;
            tx.execute("DELETE FROM story_views WHERE user_id = ?1", [uid])?;
            tx.execute("DELETE FROM receipts WHERE user_id = ?1", [uid])?;
            tx.execute(
                "DELETE FROM calls WHERE caller_id = ?1 OR receiver_id = ?1",
                [uid],
            )?;
            tx.execute("DELETE FROM blocked_users WHERE target = ?1", [uid])?;
            tx.execute("DELETE FROM users WHERE uid = ?1", [uid])?;
            Ok(true)
        })?;

        if deleted {
            warn!(uid, actor, "User deleted");
            self.auth_events.publish(AuthEvent::Deleted { uid: uid.to_string() });
        } else {
            info!(uid, actor, "Refusing to delete the protected admin");
        }
        Ok(deleted)
    }

    pub fn stats(&self, actor: &str) -> Result<AdminStats> {
        self.with_conn(|conn| {
            require_admin(conn, actor)?;
            Ok(AdminStats {
                users: count(conn, "users")?,
                messages: count_messages(conn)?,
                chats: count(conn, "chats")?,
                stories: count_stories(conn)?,
            })
        })
    }

    /// Whether `uid` may use the admin operations.
    pub fn is_admin(&self, uid: &str) -> Result<bool> {
        self.with_conn(|conn| match require_admin(conn, uid) {
            Ok(_) => Ok(true),
            Err(StoreError::Forbidden(_)) => Ok(false),
            Err(e) => Err(e),
        })
    }
}

fn require_admin(conn: &Connection, actor: &str) -> Result<UserProfile> {
    let profile = active_user(conn, actor)?;
    if !profile.is_admin {
        return Err(StoreError::forbidden("administrator access required"));
    }
    Ok(profile)
}

fn is_protected(conn: &Connection, uid: &str) -> Result<bool> {
    Ok(conn.query_row("SELECT is_protected FROM users WHERE uid = ?1", [uid], |row| row.get(0))?)
}

fn count(conn: &Connection, table: &str) -> Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, t0, user};
    use crate::users::BOOTSTRAP_ADMIN_UID;
    use roxx_types::api::SendMessageRequest;
    use roxx_types::models::{CallKind, MediaType, MessageKind};

    fn admin(db: &Database) -> UserProfile {
        db.seed_bootstrap_admin("root@example.com", "rootpass", "Root", t0()).unwrap()
    }

    fn text(to: &str, body: &str) -> SendMessageRequest {
        SendMessageRequest {
            recipient_id: to.to_string(),
            text: body.to_string(),
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
            reply_to: None,
        }
    }

    #[test]
    fn suspended_user_cannot_sign_in() {
        let db = db();
        let root = admin(&db);
        let x = user(&db, "xena");

        let mut sub = db.auth_events().subscribe();
        let after = db.toggle_global_block(&root.uid, &x.uid, t0()).unwrap();
        assert!(after.is_globally_blocked);
        assert!(matches!(sub.try_recv(), Some(AuthEvent::Suspended { uid, .. }) if uid == x.uid));

        assert!(matches!(
            db.authenticate("xena@example.com", "password123", t0()),
            Err(StoreError::Suspended)
        ));

        db.toggle_global_block(&root.uid, &x.uid, t0()).unwrap();
        assert!(db.authenticate("xena@example.com", "password123", t0()).is_ok());
    }

    #[test]
    fn suspended_profiles_stay_visible_to_admins() {
        let db = db();
        let root = admin(&db);
        let x = user(&db, "xena");
        let y = user(&db, "yuri");
        db.toggle_global_block(&root.uid, &x.uid, t0()).unwrap();

        assert!(matches!(db.get_user(&y.uid, &x.uid), Err(StoreError::NotFound(_))));
        let seen = db.get_user(&root.uid, &x.uid).unwrap();
        assert_eq!(seen.uid, x.uid);
        assert!(db.get_user(&y.uid, &root.uid).is_ok());
    }

    #[test]
    fn admins_cannot_be_suspended() {
        let db = db();
        let root = admin(&db);
        let after = db.toggle_global_block(&root.uid, &root.uid, t0()).unwrap();
        assert!(!after.is_globally_blocked);
    }

    #[test]
    fn admin_operations_require_admin() {
        let db = db();
        admin(&db);
        let a = user(&db, "ana");
        let b = user(&db, "bea");

        assert!(matches!(db.list_all(&a.uid), Err(StoreError::Forbidden(_))));
        assert!(matches!(db.stats(&a.uid), Err(StoreError::Forbidden(_))));
        assert!(matches!(db.delete_user(&a.uid, &b.uid), Err(StoreError::Forbidden(_))));
        assert!(matches!(db.toggle_global_block(&a.uid, &b.uid, t0()), Err(StoreError::Forbidden(_))));
        assert!(!db.is_admin(&a.uid).unwrap());
    }

    #[test]
    fn bootstrap_admin_is_protected() {
        let db = db();
        let root = admin(&db);
        assert_eq!(root.uid, BOOTSTRAP_ADMIN_UID);
        let a = user(&db, "ana");

        let granted = db.toggle_admin_access(&root.uid, &a.uid).unwrap();
        assert!(granted.is_admin);
        assert!(db.is_admin(&a.uid).unwrap());

        let still = db.toggle_admin_access(&a.uid, &root.uid).unwrap();
        assert!(still.is_admin);
        assert!(!db.delete_user(&a.uid, &root.uid).unwrap());
        assert!(db.get_profile(&root.uid).is_ok());

        let revoked = db.toggle_admin_access(&root.uid, &a.uid).unwrap();
        assert!(!revoked.is_admin);
    }

    #[test]
    fn deleting_a_user_cascades() {
        let db = db();
        let root = admin(&db);
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let c = user(&db, "cyd");

        db.send(&a.uid, &text(&b.uid, "hi"), t0()).unwrap();
        db.send(&b.uid, &text(&a.uid, "hey"), t0()).unwrap();
        db.send(&b.uid, &text(&c.uid, "unrelated"), t0()).unwrap();
        let group = db.create_group("trio", &[b.uid.clone(), c.uid.clone()], &a.uid, None, t0()).unwrap();
        db.send(&c.uid, &text(&group.id, "group hello"), t0()).unwrap();
        db.post_story(&a.uid, "https://cdn.example.com/a.jpg", MediaType::Image, None, t0()).unwrap();
        db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();
        db.set_block(&b.uid, &a.uid, true).unwrap();

        assert!(db.delete_user(&root.uid, &a.uid).unwrap());

        assert!(matches!(db.get_profile(&a.uid), Err(StoreError::NotFound(_))));
        let remaining = db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE sender_id = ?1 OR recipient_id = ?1",
                [&a.uid],
                |row| row.get(0),
            )?;
            Ok(n)
        });
        assert_eq!(remaining.unwrap(), 0);
        for u in [&b.uid, &c.uid] {
            assert!(db.list_my_chats(u).unwrap().iter().all(|chat| !chat.is_participant(&a.uid)));
        }
        assert!(db.incoming_call(&b.uid, t0()).unwrap().is_none());
        assert!(db.list_stories(t0()).unwrap().is_empty());
        assert!(!db.get_profile(&b.uid).unwrap().blocked_users.contains(&a.uid));

        let stats = db.stats(&root.uid).unwrap();
        assert_eq!(stats.users, 3);
        assert_eq!(stats.chats, 1);
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.stories, 0);
    }
}
