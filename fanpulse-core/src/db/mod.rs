//! Database layer for fanpulse
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - The [`TelemetrySink`] write seam used by ingest and session tracking

pub mod repo;
pub mod schema;
#[cfg(test)]
pub(crate) mod testing;

pub use repo::{ArtistCounter, ContentCounter, Database, EventScope};

use crate::error::Result;
use crate::types::{
    ContentMetricsPatch, ContentPerformance, ContentType, NewEvent, NewSearchQuery, OrderRecord,
    Session, SessionUpdate, SubscriptionRecord,
};
use chrono::{DateTime, Utc};

/// Every write the telemetry pipeline performs.
///
/// [`Database`] is the production implementation. Ingest and the session
/// tracker only hold a `dyn TelemetrySink`, so tests can swap in a store that
/// fails on demand.
pub trait TelemetrySink: Send + Sync {
    /// Append one event stamped `at`, returning its id.
    fn append_event(&self, event: &NewEvent, at: DateTime<Utc>) -> Result<i64>;

    /// Add `delta` to a catalog content counter, clamped at zero.
    ///
    /// Returns `false` when the content item is not in the catalog mirror.
    fn adjust_content_counter(
        &self,
        content_id: &str,
        counter: ContentCounter,
        delta: i64,
    ) -> Result<bool>;

    /// Add `delta` to an artist counter, clamped at zero.
    ///
    /// Returns `false` when the artist is not in the catalog mirror.
    fn adjust_artist_counter(
        &self,
        artist_id: &str,
        counter: ArtistCounter,
        delta: i64,
    ) -> Result<bool>;

    fn insert_session(&self, session: &Session) -> Result<()>;

    /// Merge an update into a session. Returns `false` for an unknown id.
    fn update_session(&self, id: &str, update: &SessionUpdate, at: DateTime<Utc>) -> Result<bool>;

    /// Mark a session ended at `at`. Returns `false` for an unknown id.
    fn end_session(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// End every active session idle since before `idle_before`.
    fn close_idle_sessions(&self, idle_before: DateTime<Utc>, at: DateTime<Utc>) -> Result<usize>;

    fn insert_search_query(&self, query: &NewSearchQuery, at: DateTime<Utc>) -> Result<i64>;

    fn insert_subscription_record(
        &self,
        record: &SubscriptionRecord,
        at: DateTime<Utc>,
    ) -> Result<i64>;

    fn upsert_order(&self, order: &OrderRecord, at: DateTime<Utc>) -> Result<()>;

    fn upsert_content_performance(
        &self,
        content_id: &str,
        content_type: ContentType,
        patch: ContentMetricsPatch,
    ) -> Result<ContentPerformance>;
}
