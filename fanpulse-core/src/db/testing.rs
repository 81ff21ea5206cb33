//! Store double for exercising the best-effort write policy.

use super::{ArtistCounter, ContentCounter, Database, TelemetrySink};
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Wraps a real database and fails the selected kinds of writes.
pub(crate) struct FailingStore {
    inner: Database,
    pub fail_appends: AtomicBool,
    pub fail_projections: AtomicBool,
    pub fail_sessions: AtomicBool,
    pub calls: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        let inner = Database::open_in_memory().unwrap();
        inner.migrate().unwrap();
        Self {
            inner,
            fail_appends: AtomicBool::new(false),
            fail_projections: AtomicBool::new(false),
            fail_sessions: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// A store where every write fails.
    pub fn broken() -> Self {
        let store = Self::new();
        store.fail_appends.store(true, Ordering::SeqCst);
        store.fail_projections.store(true, Ordering::SeqCst);
        store.fail_sessions.store(true, Ordering::SeqCst);
        store
    }

    pub fn db(&self) -> &Database {
        &self.inner
    }

    fn gate(&self, flag: &AtomicBool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if flag.load(Ordering::SeqCst) {
            Err(Error::Database(rusqlite::Error::InvalidQuery))
        } else {
            Ok(())
        }
    }
}

impl TelemetrySink for FailingStore {
    fn append_event(&self, event: &NewEvent, at: DateTime<Utc>) -> Result<i64> {
        self.gate(&self.fail_appends)?;
        self.inner.append_event(event, at)
    }

    fn adjust_content_counter(
        &self,
        content_id: &str,
        counter: ContentCounter,
        delta: i64,
    ) -> Result<bool> {
        self.gate(&self.fail_projections)?;
        self.inner.adjust_content_counter(content_id, counter, delta)
    }

    fn adjust_artist_counter(
        &self,
        artist_id: &str,
        counter: ArtistCounter,
        delta: i64,
    ) -> Result<bool> {
        self.gate(&self.fail_projections)?;
        self.inner.adjust_artist_counter(artist_id, counter, delta)
    }

    fn insert_session(&self, session: &Session) -> Result<()> {
        self.gate(&self.fail_sessions)?;
        self.inner.insert_session(session)
    }

    fn update_session(&self, id: &str, update: &SessionUpdate, at: DateTime<Utc>) -> Result<bool> {
        self.gate(&self.fail_sessions)?;
        self.inner.update_session(id, update, at)
    }

    fn end_session(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.gate(&self.fail_sessions)?;
        self.inner.end_session(id, at)
    }

    fn close_idle_sessions(&self, idle_before: DateTime<Utc>, at: DateTime<Utc>) -> Result<usize> {
        self.gate(&self.fail_sessions)?;
        self.inner.close_idle_sessions(idle_before, at)
    }

    fn insert_search_query(&self, query: &NewSearchQuery, at: DateTime<Utc>) -> Result<i64> {
        self.gate(&self.fail_appends)?;
        self.inner.insert_search_query(query, at)
    }

    fn insert_subscription_record(
        &self,
        record: &SubscriptionRecord,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        self.gate(&self.fail_appends)?;
        self.inner.insert_subscription_record(record, at)
    }

    fn upsert_order(&self, order: &OrderRecord, at: DateTime<Utc>) -> Result<()> {
        self.gate(&self.fail_appends)?;
        self.inner.upsert_order(order, at)
    }

    fn upsert_content_performance(
        &self,
        content_id: &str,
        content_type: ContentType,
        patch: ContentMetricsPatch,
    ) -> Result<ContentPerformance> {
        self.gate(&self.fail_projections)?;
        self.inner
            .upsert_content_performance(content_id, content_type, patch)
    }
}
