//! Call signaling: session records moving through
//! `ringing -> {accepted, rejected} -> ended`, read by both parties.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};
use uuid::Uuid;

use roxx_types::models::{CallKind, CallSession, CallStatus};

use crate::rows::{from_ms, ms, parse_col};
use crate::users::{active_user, has_blocked, uid_exists};
use crate::{Database, Result, StoreError};

const CALL_COLUMNS: &str = "id, caller_id, receiver_id, kind, status, timestamp, version";

impl Database {
    /// Start ringing `receiver`.
    pub fn initiate_call(
        &self,
        caller: &str,
        receiver: &str,
        kind: CallKind,
        now: DateTime<Utc>,
    ) -> Result<CallSession> {
        if caller == receiver {
            return Err(StoreError::invalid("cannot call yourself"));
        }
        let call = self.with_tx(|tx| {
            active_user(tx, caller)?;
            if !uid_exists(tx, receiver)? {
                return Err(StoreError::not_found("user", receiver));
            }
            if has_blocked(tx, receiver, caller)? {
                return Err(StoreError::forbidden("receiver has blocked you"));
            }

            let call = CallSession {
                id: format!("call_{}", Uuid::new_v4()),
                caller_id: caller.to_string(),
                receiver_id: receiver.to_string(),
                kind,
                status: CallStatus::Ringing,
                timestamp: now,
                version: 0,
            };
            tx.execute(
                "INSERT INTO calls (id, caller_id, receiver_id, kind, status, timestamp, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                params![
                    call.id,
                    call.caller_id,
                    call.receiver_id,
                    call.kind.as_str(),
                    call.status.as_str(),
                    ms(now)
                ],
            )?;
            Ok(call)
        })?;

        info!(call_id = %call.id, "{} calling {} ({})", caller, receiver, kind.as_str());
        Ok(call)
    }

    /// Newest call still ringing for `uid` within the ring timeout.
    /// Older ringing sessions are ignored without being rewritten.
    pub fn incoming_call(&self, uid: &str, now: DateTime<Utc>) -> Result<Option<CallSession>> {
        let cutoff = ms(now - self.limits.ring_timeout);
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {CALL_COLUMNS} FROM calls
                         WHERE receiver_id = ?1 AND status = ?2 AND timestamp > ?3
                         ORDER BY timestamp DESC, rowid DESC
                         LIMIT 1"
                    ),
                    params![uid, CallStatus::Ringing.as_str(), cutoff],
                    row_to_call,
                )
                .optional()?)
        })
    }

    /// Party-only read used to observe the other side's transitions.
    pub fn get_call(&self, call_id: &str, uid: &str) -> Result<CallSession> {
        self.with_conn(|conn| party_call(conn, call_id, uid))
    }

    /// The single mutation point of a call. Only the receiver may accept
    /// or reject; either party may end. Repeating the current status is a
    /// no-op, any other move off the transition table is refused. A ringing
    /// session past the ring timeout counts as ended and can only be ended.
    pub fn update_call_status(
        &self,
        call_id: &str,
        actor: &str,
        next: CallStatus,
        now: DateTime<Utc>,
    ) -> Result<CallSession> {
        let ring_timeout = self.limits.ring_timeout;
        self.with_tx(|tx| {
            let call = party_call(tx, call_id, actor)?;
            if call.status == next {
                return Ok(call);
            }
            if matches!(next, CallStatus::Accepted | CallStatus::Rejected) && actor != call.receiver_id {
                return Err(StoreError::forbidden("only the receiver can answer a call"));
            }
            if call.status == CallStatus::Ringing
                && next != CallStatus::Ended
                && now - call.timestamp >= ring_timeout
            {
                warn!(call_id, to = %next, "Answer after ring timeout");
                return Err(StoreError::IllegalTransition {
                    from: CallStatus::Ended,
                    to: next,
                });
            }
            if !call.status.can_transition_to(next) {
                warn!(call_id, from = %call.status, to = %next, "Rejected call transition");
                return Err(StoreError::IllegalTransition {
                    from: call.status,
                    to: next,
                });
            }

            tx.execute(
                "UPDATE calls SET status = ?2, version = version + 1 WHERE id = ?1",
                params![call_id, next.as_str()],
            )?;
            info!(call_id, "Call {} -> {}", call.status, next);
            party_call(tx, call_id, actor)
        })
    }

    /// Drop sessions older than the configured maximum age, whatever their
    /// status. Returns how many were removed.
    pub fn purge_stale_calls(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = ms(now - self.limits.call_max_age);
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM calls WHERE timestamp < ?1", [cutoff])?)
        })
    }
}

fn party_call(conn: &Connection, call_id: &str, uid: &str) -> Result<CallSession> {
    let call = conn
        .query_row(
            &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
            [call_id],
            row_to_call,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("call", call_id))?;
    if !call.is_party(uid) {
        return Err(StoreError::forbidden("not a party to this call"));
    }
    Ok(call)
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallSession> {
    let kind: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(CallSession {
        id: row.get(0)?,
        caller_id: row.get(1)?,
        receiver_id: row.get(2)?,
        kind: parse_col(3, &kind, CallKind::parse)?,
        status: parse_col(4, &status, CallStatus::parse)?,
        timestamp: from_ms(5, row.get(5)?)?,
        version: row.get::<_, i64>(6)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, t0, user};
    use chrono::TimeDelta;

    #[test]
    fn ringing_call_shows_up_for_receiver_only() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let call = db.initiate_call(&a.uid, &b.uid, CallKind::Video, t0()).unwrap();
        assert_eq!(call.status, CallStatus::Ringing);
        assert!(call.id.starts_with("call_"));

        let incoming = db.incoming_call(&b.uid, t0() + TimeDelta::seconds(5)).unwrap();
        assert_eq!(incoming.map(|c| c.id), Some(call.id));
        assert!(db.incoming_call(&a.uid, t0()).unwrap().is_none());
    }

    #[test]
    fn ended_call_is_no_longer_incoming() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let call = db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();

        // caller hangs up before it is answered
        let ended = db.update_call_status(&call.id, &a.uid, CallStatus::Ended, t0()).unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
        assert_eq!(db.get_call(&call.id, &b.uid).unwrap().status, CallStatus::Ended);
        assert!(db.incoming_call(&b.uid, t0()).unwrap().is_none());
    }

    #[test]
    fn ring_timeout_is_a_soft_expiry() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let call = db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();

        assert!(db.incoming_call(&b.uid, t0() + TimeDelta::seconds(61)).unwrap().is_none());
        // stored status is untouched
        assert_eq!(db.get_call(&call.id, &a.uid).unwrap().status, CallStatus::Ringing);
    }

    #[test]
    fn newest_ringing_call_wins() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let c = user(&db, "cai");
        db.initiate_call(&a.uid, &c.uid, CallKind::Voice, t0()).unwrap();
        let newer = db
            .initiate_call(&b.uid, &c.uid, CallKind::Voice, t0() + TimeDelta::seconds(2))
            .unwrap();
        let incoming = db.incoming_call(&c.uid, t0() + TimeDelta::seconds(3)).unwrap().unwrap();
        assert_eq!(incoming.id, newer.id);
    }

    #[test]
    fn accept_then_hang_up() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let call = db.initiate_call(&a.uid, &b.uid, CallKind::Video, t0()).unwrap();

        assert!(matches!(
            db.update_call_status(&call.id, &a.uid, CallStatus::Accepted, t0()),
            Err(StoreError::Forbidden(_))
        ));
        let accepted = db.update_call_status(&call.id, &b.uid, CallStatus::Accepted, t0()).unwrap();
        assert_eq!(accepted.status, CallStatus::Accepted);
        assert_eq!(accepted.version, 1);

        // repeating is harmless
        let again = db.update_call_status(&call.id, &b.uid, CallStatus::Accepted, t0()).unwrap();
        assert_eq!(again.version, 1);

        let ended = db.update_call_status(&call.id, &a.uid, CallStatus::Ended, t0()).unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
        assert!(ended.status.is_terminal());
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let call = db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();
        db.update_call_status(&call.id, &b.uid, CallStatus::Rejected, t0()).unwrap();

        assert!(matches!(
            db.update_call_status(&call.id, &a.uid, CallStatus::Ended, t0()),
            Err(StoreError::IllegalTransition {
                from: CallStatus::Rejected,
                to: CallStatus::Ended
            })
        ));

        let other = db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();
        db.update_call_status(&other.id, &a.uid, CallStatus::Ended, t0()).unwrap();
        assert!(matches!(
            db.update_call_status(&other.id, &b.uid, CallStatus::Accepted, t0()),
            Err(StoreError::IllegalTransition { .. })
        ));
        assert!(matches!(
            db.update_call_status(&other.id, &b.uid, CallStatus::Ringing, t0()),
            Err(StoreError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn expired_ring_cannot_be_accepted() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let call = db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();
        let late = t0() + TimeDelta::minutes(4);
        assert!(db.incoming_call(&b.uid, late).unwrap().is_none());

        assert!(matches!(
            db.update_call_status(&call.id, &b.uid, CallStatus::Accepted, late),
            Err(StoreError::IllegalTransition {
                from: CallStatus::Ended,
                to: CallStatus::Accepted
            })
        ));
        assert!(matches!(
            db.update_call_status(&call.id, &b.uid, CallStatus::Rejected, t0() + TimeDelta::seconds(60)),
            Err(StoreError::IllegalTransition { .. })
        ));
        // the caller can still hang up the stale session
        let ended = db.update_call_status(&call.id, &a.uid, CallStatus::Ended, late).unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
    }

    #[test]
    fn strangers_and_unknown_calls() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let c = user(&db, "cai");
        let call = db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();
        assert!(matches!(db.get_call(&call.id, &c.uid), Err(StoreError::Forbidden(_))));
        assert!(matches!(db.get_call("call_x", &a.uid), Err(StoreError::NotFound(_))));
        assert!(matches!(
            db.initiate_call(&a.uid, "ghost", CallKind::Voice, t0()),
            Err(StoreError::NotFound(_))
        ));

        db.set_block(&b.uid, &a.uid, true).unwrap();
        assert!(matches!(
            db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn purge_removes_old_sessions_regardless_of_status() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bea");
        let old = db.initiate_call(&a.uid, &b.uid, CallKind::Voice, t0()).unwrap();
        db.update_call_status(&old.id, &b.uid, CallStatus::Accepted, t0()).unwrap();
        let fresh = db
            .initiate_call(&a.uid, &b.uid, CallKind::Voice, t0() + TimeDelta::minutes(4))
            .unwrap();

        let removed = db.purge_stale_calls(t0() + TimeDelta::minutes(6)).unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(db.get_call(&old.id, &a.uid), Err(StoreError::NotFound(_))));
        assert!(db.get_call(&fresh.id, &a.uid).is_ok());
    }
}
