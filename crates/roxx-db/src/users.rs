//! User directory: accounts, presence, per-user block lists.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use roxx_types::api::UpdateProfileRequest;
use roxx_types::models::{Presence, PublicUser, UserProfile};

use crate::events::AuthEvent;
use crate::rows::{from_ms, ms, parse_col};
use crate::{Database, Result, StoreError, password};

/// Fixed uid of the protected bootstrap administrator.
pub const BOOTSTRAP_ADMIN_UID: &str = "admin-001";

const PROFILE_COLUMNS: &str = "uid, email, name, photo_url, status, last_seen, bio, \
     chat_lock IS NOT NULL, is_admin, is_globally_blocked";

const PUBLIC_COLUMNS: &str = "uid, name, photo_url, status, last_seen, bio";

impl Database {
    // -- Accounts --

    /// Create an account and sign it in.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserProfile> {
        let email = email.trim();
        if !is_plausible_email(email) {
            return Err(StoreError::invalid("email address is malformed"));
        }
        if password.is_empty() {
            return Err(StoreError::invalid("password is empty"));
        }
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => email.split('@').next().unwrap_or(email).to_string(),
        };

        // Hash before taking the connection lock
        let hash = password::hash(password)?;
        let uid = Uuid::new_v4().to_string();

        let profile = self.with_tx(|tx| {
            if uid_by_email(tx, email)?.is_some() {
                return Err(StoreError::AlreadyExists(format!("account {email}")));
            }
            tx.execute(
                "INSERT INTO users (uid, email, password, name, photo_url, status, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    uid,
                    email,
                    hash,
                    name,
                    default_avatar(&uid),
                    Presence::Online.as_str(),
                    ms(now)
                ],
            )?;
            load_profile(tx, &uid)
        })?;

        info!(uid = %profile.uid, "Registered {}", profile.email);
        self.auth_events.publish(AuthEvent::SignedIn {
            uid: profile.uid.clone(),
            at: now,
        });
        Ok(profile)
    }

    /// Check credentials and mark the account online.
    ///
    /// Fails with `NotFound` for an unknown email, `InvalidCredential` on a
    /// password mismatch and `Suspended` for globally blocked accounts.
    pub fn authenticate(&self, email: &str, password: &str, now: DateTime<Utc>) -> Result<UserProfile> {
        let email = email.trim();
        let (uid, phc) = self
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT uid, password FROM users WHERE email = ?1",
                    [email],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(Into::into)
            })?
            .ok_or_else(|| StoreError::not_found("account", email))?;

        if !password::verify(password, &phc)? {
            return Err(StoreError::InvalidCredential);
        }

        let profile = self.with_tx(|tx| {
            if load_profile(tx, &uid)?.is_globally_blocked {
                return Err(StoreError::Suspended);
            }
            set_presence(tx, &uid, Presence::Online, now)?;
            load_profile(tx, &uid)
        })?;

        info!(uid = %profile.uid, "{} signed in", profile.email);
        self.auth_events.publish(AuthEvent::SignedIn {
            uid: profile.uid.clone(),
            at: now,
        });
        Ok(profile)
    }

    pub fn sign_out(&self, uid: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            if set_presence(conn, uid, Presence::Offline, now)? == 0 {
                return Err(StoreError::not_found("user", uid));
            }
            Ok(())
        })?;

        info!(uid, "Signed out");
        self.auth_events.publish(AuthEvent::SignedOut {
            uid: uid.to_string(),
            at: now,
        });
        Ok(())
    }

    /// Merge the present fields of `update` into the profile. An empty
    /// `chatLockPassword` removes the passcode.
    pub fn update_profile(&self, uid: &str, update: &UpdateProfileRequest) -> Result<UserProfile> {
        let name = match update.name.as_deref().map(str::trim) {
            Some("") => return Err(StoreError::invalid("name is empty")),
            other => other,
        };
        let photo_url = match update.photo_url.as_deref().map(str::trim) {
            Some("") => return Err(StoreError::invalid("photo URL is empty")),
            other => other,
        };
        let chat_lock = match update.chat_lock_password.as_deref().map(str::trim) {
            None => None,
            Some("") => Some(None),
            Some(code) => Some(Some(password::hash(code)?)),
        };

        let profile = self.with_tx(|tx| {
            load_profile(tx, uid)?;
            if let Some(name) = name {
                tx.execute("UPDATE users SET name = ?2 WHERE uid = ?1", params![uid, name])?;
            }
            if let Some(photo_url) = photo_url {
                tx.execute(
                    "UPDATE users SET photo_url = ?2 WHERE uid = ?1",
                    params![uid, photo_url],
                )?;
            }
            if let Some(bio) = update.bio.as_deref() {
                let bio = Some(bio.trim()).filter(|b| !b.is_empty());
                tx.execute("UPDATE users SET bio = ?2 WHERE uid = ?1", params![uid, bio])?;
            }
            if let Some(chat_lock) = &chat_lock {
                tx.execute(
                    "UPDATE users SET chat_lock = ?2 WHERE uid = ?1",
                    params![uid, chat_lock],
                )?;
            }
            load_profile(tx, uid)
        })?;

        self.auth_events.publish(AuthEvent::ProfileUpdated {
            profile: profile.clone(),
        });
        Ok(profile)
    }

    /// Add or remove `target` from the actor's block list. Idempotent.
    pub fn set_block(&self, actor: &str, target: &str, blocked: bool) -> Result<UserProfile> {
        if actor == target {
            return Err(StoreError::invalid("cannot block yourself"));
        }
        self.with_tx(|tx| {
            load_profile(tx, actor)?;
            if !uid_exists(tx, target)? {
                return Err(StoreError::not_found("user", target));
            }
            if blocked {
                tx.execute(
                    "INSERT OR IGNORE INTO blocked_users (uid, target) VALUES (?1, ?2)",
                    params![actor, target],
                )?;
            } else {
                tx.execute(
                    "DELETE FROM blocked_users WHERE uid = ?1 AND target = ?2",
                    params![actor, target],
                )?;
            }
            load_profile(tx, actor)
        })
    }

    // -- Reads --

    pub fn get_profile(&self, uid: &str) -> Result<UserProfile> {
        self.with_conn(|conn| load_profile(conn, uid))
    }

    /// Public profile. Suspended accounts are hidden unless `caller` is an
    /// administrator.
    pub fn get_user(&self, caller: &str, uid: &str) -> Result<PublicUser> {
        let include_suspended = self.is_admin(caller)?;
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {PUBLIC_COLUMNS} FROM users
                     WHERE uid = ?1 AND (?2 OR is_globally_blocked = 0)"
                ),
                params![uid, include_suspended],
                row_to_public,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("user", uid))
        })
    }

    /// Everyone the caller may start a conversation with: active accounts,
    /// minus the caller and the caller's own block list.
    pub fn list_directory(&self, caller: &str) -> Result<Vec<PublicUser>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PUBLIC_COLUMNS} FROM users
                 WHERE is_globally_blocked = 0
                   AND uid != ?1
                   AND uid NOT IN (SELECT target FROM blocked_users WHERE uid = ?1)
                 ORDER BY name COLLATE NOCASE ASC"
            ))?;
            let users = stmt
                .query_map([caller], row_to_public)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    // -- Chat lock passcode --

    /// `Forbidden` on mismatch, `InvalidArgument` if no passcode is set.
    pub fn verify_chat_lock(&self, uid: &str, passcode: &str) -> Result<()> {
        let phc: Option<String> = self.with_conn(|conn| {
            conn.query_row("SELECT chat_lock FROM users WHERE uid = ?1", [uid], |row| row.get(0))
                .optional()?
                .ok_or_else(|| StoreError::not_found("user", uid))
        })?;
        let phc = phc.ok_or_else(|| StoreError::invalid("no chat lock passcode set"))?;
        if password::verify(passcode.trim(), &phc)? {
            Ok(())
        } else {
            Err(StoreError::forbidden("wrong chat lock passcode"))
        }
    }

    // -- Bootstrap --

    /// Ensure the protected administrator exists. An existing account with
    /// the same email is promoted in place and keeps its password.
    pub fn seed_bootstrap_admin(
        &self,
        email: &str,
        password: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<UserProfile> {
        let email = email.trim();
        if !is_plausible_email(email) || password.is_empty() {
            return Err(StoreError::invalid("bootstrap admin needs an email and a password"));
        }
        let hash = password::hash(password)?;

        let profile = self.with_tx(|tx| {
            let uid = match uid_by_email(tx, email)? {
                Some(uid) => uid,
                None => {
                    let uid = if uid_exists(tx, BOOTSTRAP_ADMIN_UID)? {
                        Uuid::new_v4().to_string()
                    } else {
                        BOOTSTRAP_ADMIN_UID.to_string()
                    };
                    tx.execute(
                        "INSERT INTO users (uid, email, password, name, photo_url, last_seen)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![uid, email, hash, name, default_avatar(&uid), ms(now)],
                    )?;
                    uid
                }
            };
            tx.execute(
                "UPDATE users SET is_admin = 1, is_protected = 1, is_globally_blocked = 0
                 WHERE uid = ?1",
                [&uid],
            )?;
            load_profile(tx, &uid)
        })?;

        info!(uid = %profile.uid, "Bootstrap admin {} ready", profile.email);
        Ok(profile)
    }
}

// -- Helpers shared with the other collections --

pub(crate) fn load_profile(conn: &Connection, uid: &str) -> Result<UserProfile> {
    let mut profile = conn
        .query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM users WHERE uid = ?1"),
            [uid],
            row_to_profile,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("user", uid))?;
    profile.blocked_users = blocked_by(conn, uid)?;
    Ok(profile)
}

pub(crate) fn load_all_profiles(conn: &Connection) -> Result<Vec<UserProfile>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users ORDER BY name COLLATE NOCASE ASC"
    ))?;
    let mut profiles = stmt
        .query_map([], row_to_profile)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for profile in &mut profiles {
        profile.blocked_users = blocked_by(conn, &profile.uid)?;
    }
    Ok(profiles)
}

/// An existing account that is allowed to act.
pub(crate) fn active_user(conn: &Connection, uid: &str) -> Result<UserProfile> {
    let profile = load_profile(conn, uid)?;
    if profile.is_globally_blocked {
        return Err(StoreError::Suspended);
    }
    Ok(profile)
}

pub(crate) fn uid_exists(conn: &Connection, uid: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE uid = ?1", [uid], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Whether `uid` has `target` on their block list.
pub(crate) fn has_blocked(conn: &Connection, uid: &str, target: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM blocked_users WHERE uid = ?1 AND target = ?2",
            params![uid, target],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn display_name(conn: &Connection, uid: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT name FROM users WHERE uid = ?1", [uid], |row| row.get(0))
        .optional()?)
}

pub(crate) fn set_presence(
    conn: &Connection,
    uid: &str,
    presence: Presence,
    now: DateTime<Utc>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE users SET status = ?2, last_seen = ?3 WHERE uid = ?1",
        params![uid, presence.as_str(), ms(now)],
    )?)
}

fn uid_by_email(conn: &Connection, email: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT uid FROM users WHERE email = ?1", [email], |row| row.get(0))
        .optional()?)
}

fn blocked_by(conn: &Connection, uid: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT target FROM blocked_users WHERE uid = ?1")?;
    let targets = stmt
        .query_map([uid], |row| row.get(0))?
        .collect::<std::result::Result<BTreeSet<String>, _>>()?;
    Ok(targets)
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let status: String = row.get(4)?;
    Ok(UserProfile {
        uid: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        photo_url: row.get(3)?,
        status: parse_col(4, &status, Presence::parse)?,
        last_seen: from_ms(5, row.get(5)?)?,
        bio: row.get(6)?,
        blocked_users: BTreeSet::new(),
        has_chat_lock: row.get(7)?,
        is_admin: row.get(8)?,
        is_globally_blocked: row.get(9)?,
    })
}

fn row_to_public(row: &rusqlite::Row<'_>) -> rusqlite::Result<PublicUser> {
    let status: String = row.get(3)?;
    Ok(PublicUser {
        uid: row.get(0)?,
        name: row.get(1)?,
        photo_url: row.get(2)?,
        status: parse_col(3, &status, Presence::parse)?,
        last_seen: from_ms(4, row.get(4)?)?,
        bio: row.get(5)?,
    })
}

fn default_avatar(uid: &str) -> String {
    format!("https://picsum.photos/seed/{uid}/200")
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, t0, user};
    use chrono::TimeDelta;

    #[test]
    fn register_then_authenticate() {
        let db = db();
        let alice = db.register("Alice@Example.com", "s3cret", None, t0()).unwrap();
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.status, Presence::Online);
        assert!(alice.blocked_users.is_empty());
        assert!(!alice.has_chat_lock);

        db.sign_out(&alice.uid, t0()).unwrap();
        assert_eq!(db.get_profile(&alice.uid).unwrap().status, Presence::Offline);

        let later = t0() + TimeDelta::minutes(3);
        let again = db.authenticate("alice@example.com", "s3cret", later).unwrap();
        assert_eq!(again.uid, alice.uid);
        assert_eq!(again.status, Presence::Online);
        assert_eq!(again.last_seen, later);
    }

    #[test]
    fn authenticate_failures() {
        let db = db();
        user(&db, "bob");
        assert!(matches!(
            db.authenticate("nobody@example.com", "password123", t0()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.authenticate("bob@example.com", "wrong", t0()),
            Err(StoreError::InvalidCredential)
        ));
    }

    #[test]
    fn duplicate_email_is_case_insensitive() {
        let db = db();
        user(&db, "carol");
        assert!(matches!(
            db.register("CAROL@example.com", "x", None, t0()),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            db.register("not-an-email", "x", None, t0()),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn sign_out_unknown_user() {
        let db = db();
        assert!(matches!(db.sign_out("ghost", t0()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn update_profile_merges_and_hides_passcode() {
        let db = db();
        let dave = user(&db, "dave");
        let updated = db
            .update_profile(
                &dave.uid,
                &UpdateProfileRequest {
                    bio: Some("hello there".into()),
                    chat_lock_password: Some("1234".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "dave");
        assert_eq!(updated.bio.as_deref(), Some("hello there"));
        assert!(updated.has_chat_lock);

        db.verify_chat_lock(&dave.uid, "1234").unwrap();
        assert!(matches!(
            db.verify_chat_lock(&dave.uid, "0000"),
            Err(StoreError::Forbidden(_))
        ));

        let cleared = db
            .update_profile(
                &dave.uid,
                &UpdateProfileRequest {
                    chat_lock_password: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!cleared.has_chat_lock);
        assert!(matches!(
            db.verify_chat_lock(&dave.uid, "1234"),
            Err(StoreError::InvalidArgument(_))
        ));

        assert!(matches!(
            db.update_profile("ghost", &UpdateProfileRequest::default()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn block_list_is_idempotent_and_filters_directory() {
        let db = db();
        let a = user(&db, "anna");
        let b = user(&db, "ben");
        let c = user(&db, "cleo");

        db.set_block(&a.uid, &b.uid, true).unwrap();
        let profile = db.set_block(&a.uid, &b.uid, true).unwrap();
        assert_eq!(profile.blocked_users.len(), 1);

        let visible: Vec<String> = db
            .list_directory(&a.uid)
            .unwrap()
            .into_iter()
            .map(|u| u.uid)
            .collect();
        assert_eq!(visible, vec![c.uid.clone()]);

        db.set_block(&a.uid, &b.uid, false).unwrap();
        let profile = db.set_block(&a.uid, &b.uid, false).unwrap();
        assert!(profile.blocked_users.is_empty());
        assert_eq!(db.list_directory(&a.uid).unwrap().len(), 2);

        assert!(matches!(
            db.set_block(&a.uid, "ghost", true),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn auth_events_follow_sign_in_and_out() {
        let db = db();
        let mut sub = db.auth_events().subscribe();
        let eve = user(&db, "eve");
        db.sign_out(&eve.uid, t0()).unwrap();

        assert!(matches!(sub.try_recv(), Some(AuthEvent::SignedIn { uid, .. }) if uid == eve.uid));
        assert!(matches!(sub.try_recv(), Some(AuthEvent::SignedOut { uid, .. }) if uid == eve.uid));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn bootstrap_admin_is_idempotent() {
        let db = db();
        let admin = db
            .seed_bootstrap_admin("root@example.com", "wanted9090", "Super Admin", t0())
            .unwrap();
        assert_eq!(admin.uid, BOOTSTRAP_ADMIN_UID);
        assert!(admin.is_admin);

        let again = db
            .seed_bootstrap_admin("root@example.com", "other", "Super Admin", t0())
            .unwrap();
        assert_eq!(again.uid, BOOTSTRAP_ADMIN_UID);
        // original password still valid
        db.authenticate("root@example.com", "wanted9090", t0()).unwrap();
    }
}
