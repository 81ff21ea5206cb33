//! Database repository layer
//!
//! Write paths live in the [`TelemetrySink`] impl so ingest and session
//! tracking can run against a test double. Read paths are inherent methods
//! on [`Database`]; none of them mutate anything.

use super::TelemetrySink;
use crate::analytics::views::{
    MerchSales, PopularSearch, ProductSales, SongEngagement, SubscriptionCounts, TopSong,
};
use crate::analytics::TimeWindow;
use crate::error::{Error, Result};
use crate::taxonomy::{Action, Context};
use crate::types::*;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Format a timestamp the way every table stores it.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt_column(format!("bad timestamp '{s}': {e}")))
}

fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Which events an aggregation looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope<'a> {
    /// Every event on the platform
    Platform,
    /// Events whose `user_id` matches
    User(&'a str),
    /// Events whose `artist_id` matches
    Artist(&'a str),
    /// Events whose `song_id` matches
    Song(&'a str),
}

impl<'a> EventScope<'a> {
    fn column(&self) -> Option<(&'static str, &'a str)> {
        match self {
            EventScope::Platform => None,
            EventScope::User(id) => Some(("user_id", id)),
            EventScope::Artist(id) => Some(("artist_id", id)),
            EventScope::Song(id) => Some(("song_id", id)),
        }
    }
}

/// Build the WHERE fragment and its arguments for an event aggregation.
///
/// `alias` prefixes column names (`"e."`) when the query joins other tables.
fn event_filter(
    alias: &str,
    scope: EventScope<'_>,
    window: &TimeWindow,
    actions: &[&str],
) -> (String, Vec<String>) {
    let mut sql = format!("{alias}ts >= ? AND {alias}ts < ?");
    let mut args = vec![fmt_ts(window.start), fmt_ts(window.end)];

    if let Some((column, id)) = scope.column() {
        sql.push_str(&format!(" AND {alias}{column} = ?"));
        args.push(id.to_string());
    }
    if !actions.is_empty() {
        sql.push_str(&format!(
            " AND {alias}action IN ({})",
            placeholders(actions.len())
        ));
        args.extend(actions.iter().map(|a| a.to_string()));
    }

    (sql, args)
}

/// Denormalized counters on catalog content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCounter {
    Plays,
    Likes,
}

impl ContentCounter {
    fn column(&self) -> &'static str {
        match self {
            ContentCounter::Plays => "plays",
            ContentCounter::Likes => "likes",
        }
    }
}

/// Denormalized counters on the artist profile aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtistCounter {
    Plays,
    Likes,
    Followers,
}

impl ArtistCounter {
    fn column(&self) -> &'static str {
        match self {
            ArtistCounter::Plays => "total_plays",
            ArtistCounter::Likes => "total_likes",
            ArtistCounter::Followers => "follower_count",
        }
    }
}

/// Database handle (single connection behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }

    // A panic while holding the lock cannot leave SQLite half-written
    // (statements are atomic), so a poisoned guard is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Event reads
    // ============================================

    /// Get an event by ID
    pub fn get_event(&self, id: i64) -> Result<Option<Event>> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM events WHERE id = ?", [id], Self::row_to_event)
            .optional()
            .map_err(Error::from)
    }

    /// Total number of events ever recorded.
    pub fn count_all_events(&self) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count)
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
        let action_str: String = row.get("action")?;
        let context_str: String = row.get("context")?;
        let metadata_str: String = row.get("metadata")?;
        let ts_str: String = row.get("ts")?;

        let action: Action = parse_stored(&action_str)?;
        let metadata = match serde_json::from_str(&metadata_str) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };

        Ok(Event {
            id: row.get("id")?,
            action,
            context: parse_stored::<Context>(&context_str)?,
            refs: EntityRefs {
                user_id: row.get("user_id")?,
                artist_id: row.get("artist_id")?,
                song_id: row.get("song_id")?,
                merch_id: row.get("merch_id")?,
                event_id: row.get("event_id")?,
                subscription_id: row.get("subscription_id")?,
                order_id: row.get("order_id")?,
                ad_id: row.get("ad_id")?,
                nft_id: row.get("nft_id")?,
            },
            value: row.get("value")?,
            details: EventDetails::from_metadata(action, metadata),
            timestamp: parse_ts(&ts_str)?,
        })
    }

    // ============================================
    // Event aggregations
    // ============================================

    /// Count events in scope and window, optionally restricted to actions.
    pub fn count_events(
        &self,
        scope: EventScope<'_>,
        window: &TimeWindow,
        actions: &[&str],
    ) -> Result<i64> {
        let conn = self.conn();
        let (filter, args) = event_filter("", scope, window, actions);
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM events WHERE {filter}"),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Event counts keyed by action name.
    pub fn count_by_action(
        &self,
        scope: EventScope<'_>,
        window: &TimeWindow,
    ) -> Result<HashMap<String, i64>> {
        let conn = self.conn();
        let (filter, args) = event_filter("", scope, window, &[]);
        let mut stmt = conn.prepare(&format!(
            "SELECT action, COUNT(*) FROM events WHERE {filter} GROUP BY action"
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(Error::from)
    }

    /// Sum of non-null `value` in scope and window.
    pub fn sum_event_values(
        &self,
        scope: EventScope<'_>,
        window: &TimeWindow,
        actions: &[&str],
    ) -> Result<f64> {
        let conn = self.conn();
        let (filter, args) = event_filter("", scope, window, actions);
        let sum = conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(value), 0.0) FROM events WHERE {filter} AND value IS NOT NULL"
            ),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )?;
        Ok(sum)
    }

    /// Distinct non-null `user_id` in scope and window.
    pub fn count_distinct_users(
        &self,
        scope: EventScope<'_>,
        window: &TimeWindow,
        actions: &[&str],
    ) -> Result<i64> {
        let conn = self.conn();
        let (filter, args) = event_filter("", scope, window, actions);
        let count = conn.query_row(
            &format!("SELECT COUNT(DISTINCT user_id) FROM events WHERE {filter}"),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Most frequent `metadata.genre` values, ties broken alphabetically.
    pub fn top_genres(
        &self,
        scope: EventScope<'_>,
        window: &TimeWindow,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let (filter, args) = event_filter("", scope, window, &[]);
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT json_extract(metadata, '$.genre') AS genre, COUNT(*) AS n
            FROM events
            WHERE {filter}
              AND json_type(metadata, '$.genre') = 'text'
            GROUP BY genre
            ORDER BY n DESC, genre ASC
            LIMIT {limit}
            "#
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    /// Sum of `metadata.duration` (seconds) across play events.
    pub fn listening_seconds(&self, scope: EventScope<'_>, window: &TimeWindow) -> Result<f64> {
        let conn = self.conn();
        let play = [Action::PLAY.as_str()];
        let (filter, args) = event_filter("", scope, window, &play);
        let secs = conn.query_row(
            &format!(
                r#"
                SELECT COALESCE(SUM(CAST(json_extract(metadata, '$.duration') AS REAL)), 0.0)
                FROM events
                WHERE {filter}
                  AND json_type(metadata, '$.duration') IN ('integer', 'real')
                "#
            ),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )?;
        Ok(secs)
    }

    /// Songs of one artist ranked by plays, joined to catalog titles.
    pub fn top_songs_for_artist(
        &self,
        artist_id: &str,
        window: &TimeWindow,
        limit: usize,
    ) -> Result<Vec<TopSong>> {
        let conn = self.conn();
        let play = [Action::PLAY.as_str()];
        let (filter, args) = event_filter("e.", EventScope::Artist(artist_id), window, &play);
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT e.song_id, c.title, COUNT(*) AS plays
            FROM events e
            LEFT JOIN content c ON c.id = e.song_id
            WHERE {filter}
              AND e.song_id IS NOT NULL
            GROUP BY e.song_id
            ORDER BY plays DESC, e.song_id ASC
            LIMIT {limit}
            "#
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok(TopSong {
                song_id: r.get(0)?,
                title: r.get(1)?,
                plays: r.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    /// Per-song play/like/share/listener counts for every song with activity.
    pub fn song_engagement(&self, window: &TimeWindow) -> Result<Vec<SongEngagement>> {
        let conn = self.conn();
        let actions = [
            Action::PLAY.as_str(),
            Action::LIKE.as_str(),
            Action::SHARE.as_str(),
        ];
        let (filter, args) = event_filter("e.", EventScope::Platform, window, &actions);
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT
                e.song_id,
                MAX(c.title),
                COALESCE(MAX(c.artist_id), MAX(e.artist_id)),
                SUM(CASE WHEN e.action = 'play' THEN 1 ELSE 0 END),
                SUM(CASE WHEN e.action = 'like' THEN 1 ELSE 0 END),
                SUM(CASE WHEN e.action = 'share' THEN 1 ELSE 0 END),
                COUNT(DISTINCT CASE WHEN e.action = 'play' THEN e.user_id END)
            FROM events e
            LEFT JOIN content c ON c.id = e.song_id
            WHERE {filter}
              AND e.song_id IS NOT NULL
            GROUP BY e.song_id
            "#
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok(SongEngagement {
                song_id: r.get(0)?,
                title: r.get(1)?,
                artist_id: r.get(2)?,
                plays: r.get(3)?,
                likes: r.get(4)?,
                shares: r.get(5)?,
                unique_listeners: r.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    /// Signups and revenue per UTC day in the window.
    ///
    /// Days without activity are absent; callers fill the gaps.
    pub fn daily_signups_and_revenue(
        &self,
        window: &TimeWindow,
    ) -> Result<BTreeMap<NaiveDate, (i64, f64)>> {
        let conn = self.conn();
        let revenue_actions = Action::names_where(Action::is_revenue);
        let mut args = vec![Action::SIGNUP.as_str().to_string()];
        args.extend(revenue_actions.iter().map(|a| a.to_string()));
        args.push(fmt_ts(window.start));
        args.push(fmt_ts(window.end));

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT
                substr(ts, 1, 10) AS day,
                SUM(CASE WHEN action = ? THEN 1 ELSE 0 END),
                COALESCE(SUM(CASE WHEN action IN ({}) THEN value END), 0.0)
            FROM events
            WHERE ts >= ? AND ts < ?
            GROUP BY day
            "#,
            placeholders(revenue_actions.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (day, signups, revenue) = row?;
            if let Ok(date) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") {
                out.insert(date, (signups, revenue));
            }
        }
        Ok(out)
    }

    /// First-signup cohort size and how many of them started a session in
    /// `return_window`.
    pub fn retention_counts(
        &self,
        cohort_window: &TimeWindow,
        return_window: &TimeWindow,
    ) -> Result<(i64, i64)> {
        let conn = self.conn();
        let cohort_sql = r#"
            SELECT user_id FROM events
            WHERE action = 'signup' AND user_id IS NOT NULL
            GROUP BY user_id
            HAVING MIN(ts) >= ?1 AND MIN(ts) < ?2
        "#;
        let cohort_args = params![fmt_ts(cohort_window.start), fmt_ts(cohort_window.end)];

        let cohort: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM ({cohort_sql})"),
            cohort_args,
            |r| r.get(0),
        )?;
        if cohort == 0 {
            return Ok((0, 0));
        }

        let retained: i64 = conn.query_row(
            &format!(
                r#"
                SELECT COUNT(DISTINCT user_id) FROM sessions
                WHERE started_at >= ?3 AND started_at < ?4
                  AND user_id IN ({cohort_sql})
                "#
            ),
            params![
                fmt_ts(cohort_window.start),
                fmt_ts(cohort_window.end),
                fmt_ts(return_window.start),
                fmt_ts(return_window.end),
            ],
            |r| r.get(0),
        )?;

        Ok((cohort, retained))
    }

    // ============================================
    // Session reads
    // ============================================

    /// Get a session by ID
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?",
            [id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Sessions a user started within the window.
    pub fn count_user_sessions(&self, user_id: &str, window: &TimeWindow) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE user_id = ? AND started_at >= ? AND started_at < ?",
            params![user_id, fmt_ts(window.start), fmt_ts(window.end)],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Distinct users with a session starting in the window (DAU/MAU).
    pub fn count_session_users(&self, window: &TimeWindow) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM sessions WHERE started_at >= ? AND started_at < ?",
            params![fmt_ts(window.start), fmt_ts(window.end)],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Whether the user has any recorded event or session at all.
    pub fn user_has_activity(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            r#"
            SELECT EXISTS(SELECT 1 FROM events WHERE user_id = ?1)
                OR EXISTS(SELECT 1 FROM sessions WHERE user_id = ?1)
            "#,
            [user_id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        let started_at: String = row.get("started_at")?;
        let last_activity_at: String = row.get("last_activity_at")?;
        let actions_str: String = row.get("actions")?;
        let device_info: Option<String> = row.get("device_info")?;
        let location: Option<String> = row.get("location")?;

        Ok(Session {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            started_at: parse_ts(&started_at)?,
            ended_at: parse_opt_ts(row.get("ended_at")?)?,
            last_activity_at: parse_ts(&last_activity_at)?,
            duration_secs: row.get("duration_secs")?,
            page_views: row.get("page_views")?,
            actions: serde_json::from_str(&actions_str).unwrap_or_default(),
            is_active: row.get("is_active")?,
            device_info: device_info.and_then(|s| serde_json::from_str(&s).ok()),
            location: location.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }

    // ============================================
    // Search reads
    // ============================================

    /// Most issued search strings (case-insensitive) in the window.
    pub fn popular_searches(&self, window: &TimeWindow, limit: usize) -> Result<Vec<PopularSearch>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                lower(trim(query)) AS q,
                COUNT(*) AS searches,
                AVG(result_count),
                COALESCE(SUM(json_array_length(clicked_results)), 0)
            FROM search_queries
            WHERE ts >= ? AND ts < ? AND trim(query) != ''
            GROUP BY q
            ORDER BY searches DESC, q ASC
            LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map(
            params![fmt_ts(window.start), fmt_ts(window.end), limit as i64],
            |r| {
                let count: i64 = r.get(1)?;
                let clicks: i64 = r.get(3)?;
                Ok(PopularSearch {
                    query: r.get(0)?,
                    search_count: count,
                    avg_result_count: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    click_through_rate: if count > 0 {
                        clicks as f64 / count as f64
                    } else {
                        0.0
                    },
                })
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    // ============================================
    // Commerce reads
    // ============================================

    /// Units and revenue from orders placed in the window, excluding
    /// cancelled and refunded orders.
    pub fn merch_sales(&self, window: &TimeWindow, limit: usize) -> Result<MerchSales> {
        let conn = self.conn();
        let base = r#"
            FROM order_items i
            JOIN orders o ON o.order_id = i.order_id
            WHERE o.ts >= ?1 AND o.ts < ?2
              AND o.status NOT IN ('cancelled', 'refunded')
        "#;
        let (total_units, total_revenue): (i64, f64) = conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(i.quantity), 0), COALESCE(SUM(i.quantity * i.unit_price), 0.0) {base}"
            ),
            params![fmt_ts(window.start), fmt_ts(window.end)],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT i.merch_id, SUM(i.quantity) AS units, SUM(i.quantity * i.unit_price)
            {base}
            GROUP BY i.merch_id
            ORDER BY units DESC, i.merch_id ASC
            LIMIT ?3
            "#
        ))?;
        let rows = stmt.query_map(
            params![fmt_ts(window.start), fmt_ts(window.end), limit as i64],
            |r| {
                Ok(ProductSales {
                    merch_id: r.get(0)?,
                    units: r.get(1)?,
                    revenue: r.get(2)?,
                })
            },
        )?;

        Ok(MerchSales {
            total_units,
            total_revenue,
            top_products: rows.collect::<rusqlite::Result<Vec<_>>>()?,
        })
    }

    /// Subscription lifecycle counts for the window.
    ///
    /// `active` is the number of subscriptions created before the window end
    /// with no cancellation or expiry before it.
    pub fn subscription_counts(&self, window: &TimeWindow) -> Result<SubscriptionCounts> {
        let conn = self.conn();
        let start = fmt_ts(window.start);
        let end = fmt_ts(window.end);

        let mut counts = SubscriptionCounts::default();
        {
            let mut stmt = conn.prepare(
                "SELECT kind, COUNT(*) FROM subscription_events WHERE ts >= ? AND ts < ? GROUP BY kind",
            )?;
            let rows = stmt.query_map(params![start, end], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (kind, n) = row?;
                match kind.as_str() {
                    "created" => counts.created = n,
                    "cancelled" => counts.cancelled = n,
                    "renewed" => counts.renewed = n,
                    "upgraded" => counts.upgraded = n,
                    _ => {}
                }
            }
        }

        counts.active = conn.query_row(
            r#"
            SELECT COUNT(DISTINCT subscription_id) FROM subscription_events s
            WHERE kind = 'created' AND ts < ?1
              AND NOT EXISTS (
                SELECT 1 FROM subscription_events x
                WHERE x.subscription_id = s.subscription_id
                  AND x.kind IN ('cancelled', 'expired')
                  AND x.ts < ?1
              )
            "#,
            [&end],
            |r| r.get(0),
        )?;

        Ok(counts)
    }

    // ============================================
    // Catalog mirror
    // ============================================

    /// Insert or update an artist profile
    pub fn upsert_artist(&self, artist: &Artist) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO artists (id, name, follower_count, total_plays, total_likes)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                follower_count = excluded.follower_count
            "#,
            params![
                artist.id,
                artist.name,
                artist.follower_count,
                artist.total_plays,
                artist.total_likes,
            ],
        )?;
        Ok(())
    }

    /// Get an artist by ID
    pub fn get_artist(&self, id: &str) -> Result<Option<Artist>> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM artists WHERE id = ?", [id], |row| {
            Ok(Artist {
                id: row.get("id")?,
                name: row.get("name")?,
                follower_count: row.get("follower_count")?,
                total_plays: row.get("total_plays")?,
                total_likes: row.get("total_likes")?,
            })
        })
        .optional()
        .map_err(Error::from)
    }

    /// Whether the artist is in the catalog or referenced by any event.
    pub fn artist_known(&self, artist_id: &str) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            r#"
            SELECT EXISTS(SELECT 1 FROM artists WHERE id = ?1)
                OR EXISTS(SELECT 1 FROM events WHERE artist_id = ?1)
            "#,
            [artist_id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    /// Insert or update a catalog content item. Counters are left alone on update.
    pub fn upsert_content(&self, item: &ContentItem) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO content (id, artist_id, content_type, title, genre, plays, likes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                artist_id = excluded.artist_id,
                content_type = excluded.content_type,
                title = excluded.title,
                genre = excluded.genre
            "#,
            params![
                item.id,
                item.artist_id,
                item.content_type.as_str(),
                item.title,
                item.genre,
                item.plays,
                item.likes,
                fmt_ts(item.created_at),
            ],
        )?;
        Ok(())
    }

    /// Get a content item by ID
    pub fn get_content(&self, id: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM content WHERE id = ?", [id], |row| {
            let content_type: String = row.get("content_type")?;
            let created_at: String = row.get("created_at")?;
            Ok(ContentItem {
                id: row.get("id")?,
                artist_id: row.get("artist_id")?,
                content_type: parse_stored(&content_type)?,
                title: row.get("title")?,
                genre: row.get("genre")?,
                plays: row.get("plays")?,
                likes: row.get("likes")?,
                created_at: parse_ts(&created_at)?,
            })
        })
        .optional()
        .map_err(Error::from)
    }

    /// Catalog item counts for an artist keyed by content type.
    pub fn content_counts_by_type(&self, artist_id: &str) -> Result<BTreeMap<String, i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT content_type, COUNT(*) FROM content WHERE artist_id = ? GROUP BY content_type",
        )?;
        let rows = stmt.query_map([artist_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(Error::from)
    }

    // ============================================
    // Content performance
    // ============================================

    /// Get the performance snapshot for a content item
    pub fn get_content_performance(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> Result<Option<ContentPerformance>> {
        let conn = self.conn();
        Self::load_content_performance(&conn, content_id, content_type)
    }

    fn load_content_performance(
        conn: &Connection,
        content_id: &str,
        content_type: ContentType,
    ) -> Result<Option<ContentPerformance>> {
        conn.query_row(
            "SELECT * FROM content_performance WHERE content_id = ? AND content_type = ?",
            params![content_id, content_type.as_str()],
            Self::row_to_content_performance,
        )
        .optional()
        .map_err(Error::from)
    }

    fn store_content_performance(conn: &Connection, perf: &ContentPerformance) -> Result<()> {
        let m = &perf.metrics;
        conn.execute(
            r#"
            INSERT INTO content_performance (
                content_id, content_type, views, plays, likes, shares, saves, downloads,
                revenue, engagement_rate, trending_score, trending_rank, trending_at,
                demographics, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(content_id, content_type) DO UPDATE SET
                views = excluded.views,
                plays = excluded.plays,
                likes = excluded.likes,
                shares = excluded.shares,
                saves = excluded.saves,
                downloads = excluded.downloads,
                revenue = excluded.revenue,
                engagement_rate = excluded.engagement_rate,
                trending_score = excluded.trending_score,
                trending_rank = excluded.trending_rank,
                trending_at = excluded.trending_at,
                demographics = excluded.demographics,
                updated_at = excluded.updated_at
            "#,
            params![
                perf.content_id,
                perf.content_type.as_str(),
                m.views,
                m.plays,
                m.likes,
                m.shares,
                m.saves,
                m.downloads,
                m.revenue,
                m.engagement_rate,
                perf.trending.score,
                perf.trending.rank,
                perf.trending.last_calculated.map(fmt_ts),
                serde_json::to_string(&perf.demographics)?,
                fmt_ts(perf.updated_at),
            ],
        )?;
        Ok(())
    }

    fn row_to_content_performance(row: &Row) -> rusqlite::Result<ContentPerformance> {
        let content_type: String = row.get("content_type")?;
        let demographics: String = row.get("demographics")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(ContentPerformance {
            content_id: row.get("content_id")?,
            content_type: parse_stored(&content_type)?,
            metrics: ContentMetrics {
                views: row.get("views")?,
                plays: row.get("plays")?,
                likes: row.get("likes")?,
                shares: row.get("shares")?,
                saves: row.get("saves")?,
                downloads: row.get("downloads")?,
                revenue: row.get("revenue")?,
                engagement_rate: row.get("engagement_rate")?,
            },
            trending: TrendingInfo {
                score: row.get("trending_score")?,
                rank: row.get("trending_rank")?,
                last_calculated: parse_opt_ts(row.get("trending_at")?)?,
            },
            demographics: serde_json::from_str(&demographics).unwrap_or_default(),
            updated_at: parse_ts(&updated_at)?,
        })
    }

    /// Write trending score and rank into each song's snapshot.
    pub fn write_trending(
        &self,
        ranked: &[(String, f64, u32)],
        calculated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (song_id, score, rank) in ranked {
            let mut perf = Self::load_content_performance(&tx, song_id, ContentType::Song)?
                .unwrap_or_else(|| ContentPerformance::empty(song_id.clone(), ContentType::Song));
            perf.trending = TrendingInfo {
                score: *score,
                rank: Some(*rank),
                last_calculated: Some(calculated_at),
            };
            perf.updated_at = calculated_at;
            Self::store_content_performance(&tx, &perf)?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl TelemetrySink for Database {
    fn append_event(&self, event: &NewEvent, at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn();
        let r = &event.refs;
        conn.execute(
            r#"
            INSERT INTO events (
                action, context, user_id, artist_id, song_id, merch_id, event_id,
                subscription_id, order_id, ad_id, nft_id, value, metadata, ts
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                event.action.as_str(),
                event.context.as_str(),
                r.user_id,
                r.artist_id,
                r.song_id,
                r.merch_id,
                r.event_id,
                r.subscription_id,
                r.order_id,
                r.ad_id,
                r.nft_id,
                event.value,
                event.details.to_json().to_string(),
                fmt_ts(at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn adjust_content_counter(
        &self,
        content_id: &str,
        counter: ContentCounter,
        delta: i64,
    ) -> Result<bool> {
        let conn = self.conn();
        let column = counter.column();
        let changed = conn.execute(
            &format!("UPDATE content SET {column} = MAX(0, {column} + ?1) WHERE id = ?2"),
            params![delta, content_id],
        )?;
        Ok(changed > 0)
    }

    fn adjust_artist_counter(
        &self,
        artist_id: &str,
        counter: ArtistCounter,
        delta: i64,
    ) -> Result<bool> {
        let conn = self.conn();
        let column = counter.column();
        let changed = conn.execute(
            &format!("UPDATE artists SET {column} = MAX(0, {column} + ?1) WHERE id = ?2"),
            params![delta, artist_id],
        )?;
        Ok(changed > 0)
    }

    fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO sessions (
                id, user_id, started_at, ended_at, last_activity_at, duration_secs,
                page_views, actions, is_active, device_info, location
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                session.id,
                session.user_id,
                fmt_ts(session.started_at),
                session.ended_at.map(fmt_ts),
                fmt_ts(session.last_activity_at),
                session.duration_secs,
                session.page_views,
                serde_json::to_string(&session.actions)?,
                session.is_active,
                session.device_info.as_ref().map(|v| v.to_string()),
                session.location.as_ref().map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    fn update_session(&self, id: &str, update: &SessionUpdate, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row("SELECT actions FROM sessions WHERE id = ?", [id], |r| {
                r.get(0)
            })
            .optional()?;
        let Some(actions_str) = current else {
            return Ok(false);
        };

        let mut actions: Vec<String> = serde_json::from_str(&actions_str).unwrap_or_default();
        actions.extend(update.actions.iter().cloned());

        tx.execute(
            r#"
            UPDATE sessions SET
                page_views = page_views + ?1,
                actions = ?2,
                device_info = COALESCE(?3, device_info),
                last_activity_at = ?4
            WHERE id = ?5
            "#,
            params![
                i64::from(update.page_views_delta),
                serde_json::to_string(&actions)?,
                update.device_info.as_ref().map(|v| v.to_string()),
                fmt_ts(at),
                id,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn end_session(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let at_str = fmt_ts(at);
        let changed = conn.execute(
            r#"
            UPDATE sessions SET
                is_active = 0,
                ended_at = ?1,
                last_activity_at = MAX(last_activity_at, ?1),
                duration_secs = MAX(0, CAST(ROUND((julianday(?1) - julianday(started_at)) * 86400) AS INTEGER))
            WHERE id = ?2
            "#,
            params![at_str, id],
        )?;
        Ok(changed > 0)
    }

    fn close_idle_sessions(&self, idle_before: DateTime<Utc>, at: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let changed = conn.execute(
            r#"
            UPDATE sessions SET
                is_active = 0,
                ended_at = last_activity_at,
                duration_secs = MAX(0, CAST(ROUND((julianday(last_activity_at) - julianday(started_at)) * 86400) AS INTEGER))
            WHERE is_active = 1 AND last_activity_at < ?1 AND started_at <= ?2
            "#,
            params![fmt_ts(idle_before), fmt_ts(at)],
        )?;
        Ok(changed)
    }

    fn insert_search_query(&self, query: &NewSearchQuery, at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO search_queries (
                query, filters, result_count, clicked_results, time_to_first_click_ms,
                session_id, user_id, ts
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                query.query,
                serde_json::Value::Object(query.filters.clone()).to_string(),
                query.result_count,
                serde_json::to_string(&query.clicked_results)?,
                query.time_to_first_click_ms.map(|ms| ms as i64),
                query.session_id,
                query.user_id,
                fmt_ts(at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_subscription_record(
        &self,
        record: &SubscriptionRecord,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO subscription_events (subscription_id, user_id, artist_id, tier, kind, amount, ts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.subscription_id,
                record.user_id,
                record.artist_id,
                record.tier,
                record.kind.as_str(),
                record.amount,
                fmt_ts(at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn upsert_order(&self, order: &OrderRecord, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // Re-reporting an order replaces its status and items but keeps the
        // original placement time.
        tx.execute(
            r#"
            INSERT INTO orders (order_id, user_id, status, total, ts)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(order_id) DO UPDATE SET
                user_id = COALESCE(excluded.user_id, orders.user_id),
                status = excluded.status,
                total = excluded.total
            "#,
            params![
                order.order_id,
                order.user_id,
                order.status.as_str(),
                order.total(),
                fmt_ts(at),
            ],
        )?;
        tx.execute(
            "DELETE FROM order_items WHERE order_id = ?",
            [&order.order_id],
        )?;
        for item in &order.items {
            tx.execute(
                r#"
                INSERT INTO order_items (order_id, merch_id, artist_id, quantity, unit_price)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    order.order_id,
                    item.merch_id,
                    item.artist_id,
                    item.quantity,
                    item.unit_price,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_content_performance(
        &self,
        content_id: &str,
        content_type: ContentType,
        patch: ContentMetricsPatch,
    ) -> Result<ContentPerformance> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut perf = Self::load_content_performance(&tx, content_id, content_type)?
            .unwrap_or_else(|| ContentPerformance::empty(content_id, content_type));
        perf.apply(patch);
        Self::store_content_performance(&tx, &perf)?;
        tx.commit()?;
        Ok(perf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Context;
    use chrono::Duration;
    use serde_json::json;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn play(user: &str, song: &str, artist: &str) -> NewEvent {
        NewEvent::new(Action::PLAY, Context::Player)
            .user(user)
            .song(song)
            .artist(artist)
    }

    #[test]
    fn test_event_insert_and_read_back() {
        let db = test_db();
        let now = Utc::now();
        let event = play("u1", "s1", "a1")
            .value(1.0)
            .details(EventDetails::Play(PlayDetails {
                genre: Some("house".to_string()),
                duration_secs: Some(200.0),
                ..Default::default()
            }));

        let id = db.append_event(&event, now).unwrap();
        let stored = db.get_event(id).unwrap().unwrap();

        assert_eq!(stored.action, Action::PLAY);
        assert_eq!(stored.context, Context::Player);
        assert_eq!(stored.refs.song_id.as_deref(), Some("s1"));
        assert_eq!(stored.details.genre(), Some("house"));
        assert_eq!(fmt_ts(stored.timestamp), fmt_ts(now));
    }

    #[test]
    fn test_count_events_respects_window_and_scope() {
        let db = test_db();
        let now = Utc::now();
        db.append_event(&play("u1", "s1", "a1"), now - Duration::hours(1))
            .unwrap();
        db.append_event(&play("u2", "s1", "a1"), now - Duration::days(3))
            .unwrap();
        db.append_event(&play("u1", "s2", "a2"), now - Duration::days(10))
            .unwrap();

        let week = TimeWindow::last_days(7, now);
        assert_eq!(
            db.count_events(EventScope::Platform, &week, &["play"])
                .unwrap(),
            2
        );
        assert_eq!(
            db.count_events(EventScope::User("u1"), &week, &[]).unwrap(),
            1
        );
        assert_eq!(
            db.count_distinct_users(EventScope::Artist("a1"), &week, &["play"])
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_counters_clamp_at_zero() {
        let db = test_db();
        db.upsert_artist(&Artist::new("a1", "Artist One")).unwrap();
        db.upsert_content(&ContentItem::song("s1", "a1", "First")).unwrap();

        assert!(db
            .adjust_content_counter("s1", ContentCounter::Plays, 1)
            .unwrap());
        assert!(db
            .adjust_content_counter("s1", ContentCounter::Likes, -1)
            .unwrap());
        assert!(!db
            .adjust_content_counter("missing", ContentCounter::Plays, 1)
            .unwrap());
        assert!(db
            .adjust_artist_counter("a1", ArtistCounter::Followers, 2)
            .unwrap());

        let content = db.get_content("s1").unwrap().unwrap();
        assert_eq!(content.plays, 1);
        assert_eq!(content.likes, 0);
        assert_eq!(db.get_artist("a1").unwrap().unwrap().follower_count, 2);
    }

    #[test]
    fn test_upsert_content_keeps_counters() {
        let db = test_db();
        db.upsert_content(&ContentItem::song("s1", "a1", "Draft")).unwrap();
        db.adjust_content_counter("s1", ContentCounter::Plays, 5)
            .unwrap();

        db.upsert_content(&ContentItem::song("s1", "a1", "Final")).unwrap();
        let content = db.get_content("s1").unwrap().unwrap();
        assert_eq!(content.title, "Final");
        assert_eq!(content.plays, 5);
    }

    #[test]
    fn test_session_update_appends_actions() {
        let db = test_db();
        let now = Utc::now();
        db.insert_session(&Session {
            id: "sess-1".to_string(),
            user_id: "u1".to_string(),
            started_at: now,
            ended_at: None,
            last_activity_at: now,
            duration_secs: None,
            page_views: 1,
            actions: vec!["session_start".to_string()],
            is_active: true,
            device_info: None,
            location: Some(json!({"country": "NL"})),
        })
        .unwrap();

        let update = SessionUpdate {
            page_views_delta: 2,
            actions: vec!["play".to_string(), "like".to_string()],
            device_info: Some(json!({"os": "ios"})),
        };
        assert!(db
            .update_session("sess-1", &update, now + Duration::minutes(1))
            .unwrap());
        assert!(!db.update_session("nope", &update, now).unwrap());

        let session = db.get_session("sess-1").unwrap().unwrap();
        assert_eq!(session.page_views, 3);
        assert_eq!(session.actions, vec!["session_start", "play", "like"]);
        assert_eq!(session.device_info, Some(json!({"os": "ios"})));
        assert_eq!(session.location, Some(json!({"country": "NL"})));
        assert!(session.last_activity_at > now);
    }

    #[test]
    fn test_order_upsert_replaces_items() {
        let db = test_db();
        let now = Utc::now();
        let mut order = OrderRecord {
            order_id: "o1".to_string(),
            user_id: Some("u1".to_string()),
            items: vec![OrderItem {
                merch_id: "tee".to_string(),
                artist_id: Some("a1".to_string()),
                quantity: 2,
                unit_price: 20.0,
            }],
            status: OrderStatus::Paid,
        };
        db.upsert_order(&order, now).unwrap();
        db.upsert_order(&order, now).unwrap();

        let window = TimeWindow::last_days(1, now + Duration::seconds(1));
        let sales = db.merch_sales(&window, 10).unwrap();
        assert_eq!(sales.total_units, 2);
        assert_eq!(sales.total_revenue, 40.0);

        order.status = OrderStatus::Refunded;
        db.upsert_order(&order, now).unwrap();
        let sales = db.merch_sales(&window, 10).unwrap();
        assert_eq!(sales.total_units, 0);
        assert!(sales.top_products.is_empty());
    }

    #[test]
    fn test_subscription_active_count() {
        let db = test_db();
        let now = Utc::now();
        let record = |id: &str, kind| SubscriptionRecord {
            subscription_id: id.to_string(),
            user_id: "u1".to_string(),
            artist_id: Some("a1".to_string()),
            tier: None,
            kind,
            amount: Some(5.0),
        };
        db.insert_subscription_record(&record("sub1", SubscriptionEventKind::Created), now)
            .unwrap();
        db.insert_subscription_record(&record("sub2", SubscriptionEventKind::Created), now)
            .unwrap();
        db.insert_subscription_record(&record("sub2", SubscriptionEventKind::Cancelled), now)
            .unwrap();
        db.insert_subscription_record(&record("sub1", SubscriptionEventKind::Renewed), now)
            .unwrap();

        let window = TimeWindow::last_days(1, now + Duration::seconds(1));
        let counts = db.subscription_counts(&window).unwrap();
        assert_eq!(counts.created, 2);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.renewed, 1);
        assert_eq!(counts.active, 1);
    }

    #[test]
    fn test_content_performance_round_trip() {
        let db = test_db();
        let perf = db
            .upsert_content_performance(
                "s1",
                ContentType::Song,
                ContentMetricsPatch {
                    views: Some(10),
                    likes: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(perf.metrics.engagement_rate, 10.0);

        db.write_trending(&[("s1".to_string(), 17.5, 1)], Utc::now())
            .unwrap();

        let stored = db
            .get_content_performance("s1", ContentType::Song)
            .unwrap()
            .unwrap();
        assert_eq!(stored.metrics.views, 10);
        assert_eq!(stored.trending.rank, Some(1));
        assert_eq!(stored.trending.score, 17.5);
        assert!(db
            .get_content_performance("s1", ContentType::Album)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_corrupt_timestamp_is_a_row_error() {
        let db = test_db();
        let now = Utc::now();
        let id = db.append_event(&play("u1", "s1", "a1"), now).unwrap();
        db.insert_session(&Session {
            id: "sess-1".to_string(),
            user_id: "u1".to_string(),
            started_at: now,
            ended_at: Some(now),
            last_activity_at: now,
            duration_secs: Some(0),
            page_views: 1,
            actions: Vec::new(),
            is_active: false,
            device_info: None,
            location: None,
        })
        .unwrap();

        {
            let conn = db.connection();
            conn.execute("UPDATE events SET ts = 'yesterday' WHERE id = ?", [id])
                .unwrap();
            conn.execute(
                "UPDATE sessions SET ended_at = '2026-13-01' WHERE id = 'sess-1'",
                [],
            )
            .unwrap();
        }

        let err = db.get_event(id).unwrap_err();
        assert!(matches!(
            err,
            Error::Database(rusqlite::Error::FromSqlConversionFailure(..))
        ));
        assert!(err.to_string().contains("yesterday"));
        assert!(db.get_session("sess-1").is_err());
    }

    #[test]
    fn test_corrupt_action_is_not_a_config_error() {
        let db = test_db();
        let id = db.append_event(&play("u1", "s1", "a1"), Utc::now()).unwrap();
        db.connection()
            .execute("UPDATE events SET action = 'moonwalk' WHERE id = ?", [id])
            .unwrap();

        let err = db.get_event(id).unwrap_err();
        assert!(matches!(
            err,
            Error::Database(rusqlite::Error::FromSqlConversionFailure(..))
        ));
        assert!(err.to_string().contains("moonwalk"));
        assert!(!err.to_string().contains("configuration"));
    }
}
