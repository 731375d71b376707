pub mod admin;
pub mod calls;
pub mod chats;
pub mod error;
pub mod events;
pub mod limits;
pub mod messages;
pub mod migrations;
pub mod password;
pub mod stories;
pub mod users;

mod rows;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

pub use error::{Result, StoreError};
pub use events::{AuthBus, AuthEvent, AuthSubscription};
pub use limits::Limits;

/// The message, chat, call, story and user collections behind one SQLite
/// connection. Every write goes through the connection mutex, which makes
/// the store the single writer authority for all records.
pub struct Database {
    conn: Mutex<Connection>,
    limits: Limits,
    auth_events: AuthBus,
}

impl Database {
    pub fn open(path: &Path, limits: Limits) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn, limits)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Fresh private database, used by tests and throwaway instances.
    pub fn open_in_memory(limits: Limits) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, limits)
    }

    fn from_connection(conn: Connection, limits: Limits) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            limits,
            auth_events: AuthBus::default(),
        })
    }

    /// Login/logout/profile notifications published by the user directory.
    pub fn auth_events(&self) -> &AuthBus {
        &self.auth_events
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Run a read-modify-write sequence atomically. The transaction commits
    /// only if `f` returns `Ok`.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use roxx_types::models::UserProfile;

    use crate::{Database, Limits};

    pub fn db() -> Database {
        Database::open_in_memory(Limits::default()).expect("in-memory db")
    }

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    pub fn user(db: &Database, name: &str) -> UserProfile {
        db.register(&format!("{name}@example.com"), "password123", Some(name), t0())
            .expect("register")
    }
}
