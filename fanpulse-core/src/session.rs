//! Session lifecycle tracking
//!
//! A session bounds one user's continuous interaction on one device. All
//! operations follow the ingest policy: store failures are logged and
//! swallowed. Sessions that are never ended explicitly are closed by
//! [`SessionTracker::sweep_idle`].

use crate::db::TelemetrySink;
use crate::types::{Session, SessionUpdate};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Action name seeded into every new session.
pub const SESSION_START: &str = "session_start";

/// Build a session id: `sess_<unix-millis>_<12 hex chars>`.
///
/// The random suffix keeps concurrent starts apart. Ids are correlation
/// tokens, not credentials.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("sess_{}_{}", now.timestamp_millis(), &suffix[..12])
}

#[derive(Clone)]
pub struct SessionTracker {
    sink: Arc<dyn TelemetrySink>,
}

impl SessionTracker {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Open a session. Returns its id, or `None` if it could not be stored.
    pub fn start(
        &self,
        user_id: &str,
        device_info: Option<Value>,
        location: Option<Value>,
    ) -> Option<String> {
        self.start_at(user_id, device_info, location, Utc::now())
    }

    pub fn start_at(
        &self,
        user_id: &str,
        device_info: Option<Value>,
        location: Option<Value>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let session = Session {
            id: new_session_id(now),
            user_id: user_id.to_string(),
            started_at: now,
            ended_at: None,
            last_activity_at: now,
            duration_secs: None,
            page_views: 1,
            actions: vec![SESSION_START.to_string()],
            is_active: true,
            device_info,
            location,
        };

        match self.sink.insert_session(&session) {
            Ok(()) => {
                tracing::debug!(session_id = %session.id, user_id, "Session started");
                Some(session.id)
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to start session");
                None
            }
        }
    }

    /// Merge an update and stamp last activity. Returns whether a session
    /// was updated; unknown ids are a logged no-op.
    pub fn update(&self, session_id: &str, update: &SessionUpdate) -> bool {
        self.update_at(session_id, update, Utc::now())
    }

    pub fn update_at(&self, session_id: &str, update: &SessionUpdate, now: DateTime<Utc>) -> bool {
        match self.sink.update_session(session_id, update, now) {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!(session_id, "Update for unknown session ignored");
                false
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to update session");
                false
            }
        }
    }

    /// Close a session. Calling it again re-stamps the end time.
    pub fn end(&self, session_id: &str) -> bool {
        self.end_at(session_id, Utc::now())
    }

    pub fn end_at(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        match self.sink.end_session(session_id, now) {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!(session_id, "End for unknown session ignored");
                false
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to end session");
                false
            }
        }
    }

    /// End every active session with no activity for `idle_timeout`.
    ///
    /// Swept sessions end at their last activity, not at sweep time.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        self.sweep_idle_at(idle_timeout, Utc::now())
    }

    pub fn sweep_idle_at(&self, idle_timeout: Duration, now: DateTime<Utc>) -> usize {
        match self.sink.close_idle_sessions(now - idle_timeout, now) {
            Ok(closed) => {
                if closed > 0 {
                    tracing::info!(closed, "Closed idle sessions");
                }
                closed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Idle session sweep failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FailingStore;
    use crate::db::Database;
    use chrono::SubsecRound;
    use serde_json::json;

    fn tracker() -> (Arc<Database>, SessionTracker) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let db = Arc::new(db);
        (db.clone(), SessionTracker::new(db))
    }

    #[test]
    fn test_session_id_format() {
        let now = Utc::now();
        let id = new_session_id(now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "sess");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 12);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_session_id(now));
    }

    #[test]
    fn test_start_seeds_session() {
        let (db, tracker) = tracker();
        let id = tracker
            .start("u1", Some(json!({"os": "android"})), None)
            .unwrap();

        let session = db.get_session(&id).unwrap().unwrap();
        assert!(session.is_active);
        assert_eq!(session.page_views, 1);
        assert_eq!(session.actions, vec![SESSION_START]);
        assert_eq!(session.device_info, Some(json!({"os": "android"})));
    }

    #[test]
    fn test_update_unknown_session_is_noop() {
        let (db, tracker) = tracker();
        assert!(!tracker.update("sess_0_000000000000", &SessionUpdate::default()));
        assert_eq!(db.get_session("sess_0_000000000000").unwrap(), None);
    }

    #[test]
    fn test_end_is_idempotent() {
        let (db, tracker) = tracker();
        // Stored timestamps keep microsecond precision
        let start = Utc::now().trunc_subsecs(6) - Duration::minutes(10);
        let id = tracker.start_at("u1", None, None, start).unwrap();

        assert!(tracker.end_at(&id, start + Duration::minutes(5)));
        assert!(tracker.end_at(&id, start + Duration::minutes(8)));

        let session = db.get_session(&id).unwrap().unwrap();
        assert!(!session.is_active);
        assert_eq!(session.ended_at, Some(start + Duration::minutes(8)));
        assert_eq!(session.duration_secs, Some(480));

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_sweep_closes_idle_sessions_only() {
        let (db, tracker) = tracker();
        let now = Utc::now();
        let idle = tracker
            .start_at("u1", None, None, now - Duration::hours(2))
            .unwrap();
        let busy = tracker
            .start_at("u2", None, None, now - Duration::hours(2))
            .unwrap();
        tracker.update_at(
            &busy,
            &SessionUpdate {
                page_views_delta: 1,
                ..Default::default()
            },
            now - Duration::minutes(5),
        );

        assert_eq!(tracker.sweep_idle_at(Duration::minutes(30), now), 1);
        assert_eq!(tracker.sweep_idle_at(Duration::minutes(30), now), 0);

        let idle = db.get_session(&idle).unwrap().unwrap();
        assert!(!idle.is_active);
        assert_eq!(idle.ended_at, Some(idle.last_activity_at));
        assert_eq!(idle.duration_secs, Some(0));
        assert!(db.get_session(&busy).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_broken_store_is_swallowed() {
        let tracker = SessionTracker::new(Arc::new(FailingStore::broken()));
        assert_eq!(tracker.start("u1", None, None), None);
        assert!(!tracker.end("sess_1_abcdefabcdef"));
        assert_eq!(tracker.sweep_idle(Duration::minutes(30)), 0);
    }
}
