//! # Blocking-Chain Analyzer
//!
//! Derives (blocker, blocked) pairs from one session snapshot.
//!
//! ```text
//! sessions ──► index by sid ──► for each session with blocking_session:
//!                                  skip if blocker == self
//!                                  skip if blocker not in snapshot
//!                                  keep longest wait per pair
//!          ──► sort: wait desc, blocker sid, blocked sid
//! ```
//!
//! Pure: the same snapshot always yields the same output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::oracle::RawSession;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockingRelationship {
    pub blocker_sid: i64,
    pub blocker_serial: i64,
    pub blocker_username: Option<String>,
    pub blocker_schema: Option<String>,
    pub blocker_status: String,
    pub blocker_sql_id: Option<String>,
    pub blocker_sql_text: Option<String>,

    pub blocked_sid: i64,
    pub blocked_serial: i64,
    pub blocked_username: Option<String>,
    pub blocked_schema: Option<String>,
    pub blocked_wait_class: Option<String>,
    pub blocked_event: Option<String>,
    pub blocked_duration_seconds: i64,
    pub blocked_sql_text: Option<String>,
}

fn relationship(blocker: &RawSession, blocked: &RawSession) -> BlockingRelationship {
    BlockingRelationship {
        blocker_sid: blocker.sid,
        blocker_serial: blocker.serial,
        blocker_username: blocker.username.clone(),
        blocker_schema: blocker.schema_name.clone(),
        blocker_status: blocker.status.clone(),
        blocker_sql_id: blocker.sql_id.clone(),
        blocker_sql_text: blocker.sql_text.clone(),
        blocked_sid: blocked.sid,
        blocked_serial: blocked.serial,
        blocked_username: blocked.username.clone(),
        blocked_schema: blocked.schema_name.clone(),
        blocked_wait_class: blocked.wait_class.clone(),
        blocked_event: blocked.event.clone(),
        blocked_duration_seconds: blocked.seconds_in_wait.unwrap_or(0).max(0),
        blocked_sql_text: blocked.sql_text.clone(),
    }
}

/// One relationship per (blocker, blocked) pair in `sessions`, longest
/// wait first.
pub fn analyze(sessions: &[RawSession]) -> Vec<BlockingRelationship> {
    let mut by_sid: HashMap<i64, &RawSession> = HashMap::with_capacity(sessions.len());
    for session in sessions {
        by_sid.entry(session.sid).or_insert(session);
    }

    let mut pairs: HashMap<(i64, i64), BlockingRelationship> = HashMap::new();
    for blocked in sessions {
        let Some(blocker_sid) = blocked.blocking_session else {
            continue;
        };
        if blocker_sid == blocked.sid {
            continue;
        }
        let Some(blocker) = by_sid.get(&blocker_sid) else {
            continue;
        };

        let candidate = relationship(blocker, blocked);
        pairs
            .entry((blocker_sid, blocked.sid))
            .and_modify(|existing| {
                if candidate.blocked_duration_seconds > existing.blocked_duration_seconds {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }

    let mut result: Vec<BlockingRelationship> = pairs.into_values().collect();
    result.sort_by(|a, b| {
        b.blocked_duration_seconds
            .cmp(&a.blocked_duration_seconds)
            .then(a.blocker_sid.cmp(&b.blocker_sid))
            .then(a.blocked_sid.cmp(&b.blocked_sid))
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::session;

    fn blocked_by(sid: i64, blocker: i64, wait: i64) -> RawSession {
        RawSession {
            blocking_session: Some(blocker),
            seconds_in_wait: Some(wait),
            wait_class: Some("Application".into()),
            event: Some("enq: TX - row lock contention".into()),
            ..session(sid)
        }
    }

    #[test]
    fn test_single_pair() {
        let sessions = vec![blocked_by(20, 10, 45), session(10)];
        let result = analyze(&sessions);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].blocker_sid, 10);
        assert_eq!(result[0].blocked_sid, 20);
        assert_eq!(result[0].blocked_duration_seconds, 45);
        assert_eq!(result[0].blocked_event.as_deref(), Some("enq: TX - row lock contention"));
    }

    #[test]
    fn test_self_reference_dropped() {
        let sessions = vec![blocked_by(7, 7, 100), session(8)];
        assert!(analyze(&sessions).is_empty());
    }

    #[test]
    fn test_absent_blocker_dropped() {
        let sessions = vec![blocked_by(20, 99, 30)];
        assert!(analyze(&sessions).is_empty());
    }

    #[test]
    fn test_chain_and_fan_out_ordered_by_wait() {
        // 10 blocks 20 and 30; 20 blocks 40.
        let sessions = vec![
            session(10),
            blocked_by(20, 10, 15),
            blocked_by(30, 10, 90),
            blocked_by(40, 20, 15),
        ];
        let pairs: Vec<(i64, i64, i64)> = analyze(&sessions)
            .iter()
            .map(|r| (r.blocker_sid, r.blocked_sid, r.blocked_duration_seconds))
            .collect();

        assert_eq!(pairs, vec![(10, 30, 90), (10, 20, 15), (20, 40, 15)]);
    }

    #[test]
    fn test_duplicate_pair_keeps_longest_wait() {
        let sessions = vec![session(10), blocked_by(20, 10, 5), blocked_by(20, 10, 50)];
        let result = analyze(&sessions);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].blocked_duration_seconds, 50);
    }

    #[test]
    fn test_negative_or_missing_wait_clamped() {
        let mut missing = blocked_by(20, 10, 0);
        missing.seconds_in_wait = None;
        let sessions = vec![session(10), missing, blocked_by(30, 10, -3)];
        assert!(analyze(&sessions).iter().all(|r| r.blocked_duration_seconds == 0));
    }

    #[test]
    fn test_idempotent_and_never_self_blocking() {
        let sessions = vec![
            session(1),
            blocked_by(2, 1, 10),
            blocked_by(3, 3, 10),
            blocked_by(4, 2, 20),
            blocked_by(5, 1, 20),
        ];
        let first = analyze(&sessions);
        assert_eq!(first, analyze(&sessions));
        assert!(first.iter().all(|r| r.blocker_sid != r.blocked_sid));
        assert_eq!(first.len(), 3);
    }
}
