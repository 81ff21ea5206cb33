//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! Timestamps are stored as RFC 3339 UTC strings with microsecond precision
//! (`2026-01-31T12:00:00.000000Z`) so range filters can compare them as text.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: event log, sessions, search, content performance, catalog mirror
    r#"
    -- ============================================
    -- Append-only facts
    -- ============================================

    -- Entity references are foreign keys into other services and are
    -- deliberately not constrained.
    CREATE TABLE IF NOT EXISTS events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        action           TEXT NOT NULL,
        context          TEXT NOT NULL,
        user_id          TEXT,
        artist_id        TEXT,
        song_id          TEXT,
        merch_id         TEXT,
        event_id         TEXT,
        subscription_id  TEXT,
        order_id         TEXT,
        ad_id            TEXT,
        nft_id           TEXT,
        value            REAL,
        metadata         JSON NOT NULL DEFAULT '{}',
        ts               TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
    CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id, ts);
    CREATE INDEX IF NOT EXISTS idx_events_artist ON events(artist_id, ts);
    CREATE INDEX IF NOT EXISTS idx_events_song ON events(song_id, ts);
    CREATE INDEX IF NOT EXISTS idx_events_action ON events(action, ts);

    CREATE TABLE IF NOT EXISTS search_queries (
        id                      INTEGER PRIMARY KEY AUTOINCREMENT,
        query                   TEXT NOT NULL,
        filters                 JSON NOT NULL DEFAULT '{}',
        result_count            INTEGER NOT NULL DEFAULT 0,
        clicked_results         JSON NOT NULL DEFAULT '[]',
        time_to_first_click_ms  INTEGER,
        session_id              TEXT,
        user_id                 TEXT,
        ts                      TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_search_ts ON search_queries(ts);

    -- ============================================
    -- Mutable records
    -- ============================================

    CREATE TABLE IF NOT EXISTS sessions (
        id                TEXT PRIMARY KEY,
        user_id           TEXT NOT NULL,
        started_at        TEXT NOT NULL,
        ended_at          TEXT,
        last_activity_at  TEXT NOT NULL,
        duration_secs     INTEGER,
        page_views        INTEGER NOT NULL DEFAULT 1,
        actions           JSON NOT NULL DEFAULT '[]',
        is_active         INTEGER NOT NULL DEFAULT 1,
        device_info       JSON,
        location          JSON
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, started_at);
    CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);
    CREATE INDEX IF NOT EXISTS idx_sessions_active ON sessions(is_active) WHERE is_active = 1;

    -- Materialized view, one row per content item
    CREATE TABLE IF NOT EXISTS content_performance (
        content_id       TEXT NOT NULL,
        content_type     TEXT NOT NULL,
        views            INTEGER NOT NULL DEFAULT 0,
        plays            INTEGER NOT NULL DEFAULT 0,
        likes            INTEGER NOT NULL DEFAULT 0,
        shares           INTEGER NOT NULL DEFAULT 0,
        saves            INTEGER NOT NULL DEFAULT 0,
        downloads        INTEGER NOT NULL DEFAULT 0,
        revenue          REAL NOT NULL DEFAULT 0,
        engagement_rate  REAL NOT NULL DEFAULT 0,
        trending_score   REAL NOT NULL DEFAULT 0,
        trending_rank    INTEGER,
        trending_at      TEXT,
        demographics     JSON NOT NULL DEFAULT '{}',
        updated_at       TEXT NOT NULL,
        PRIMARY KEY (content_id, content_type)
    );

    -- ============================================
    -- Catalog mirror (owned by the content service)
    -- ============================================

    CREATE TABLE IF NOT EXISTS artists (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        follower_count  INTEGER NOT NULL DEFAULT 0,
        total_plays     INTEGER NOT NULL DEFAULT 0,
        total_likes     INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS content (
        id            TEXT PRIMARY KEY,
        artist_id     TEXT NOT NULL,
        content_type  TEXT NOT NULL,
        title         TEXT NOT NULL,
        genre         TEXT,
        plays         INTEGER NOT NULL DEFAULT 0,
        likes         INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_content_artist ON content(artist_id, content_type);
    "#,
    // Version 2: subscription lifecycle and merch orders
    r#"
    CREATE TABLE IF NOT EXISTS subscription_events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        subscription_id  TEXT NOT NULL,
        user_id          TEXT NOT NULL,
        artist_id        TEXT,
        tier             TEXT,
        kind             TEXT NOT NULL,
        amount           REAL,
        ts               TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_subscription_events_ts ON subscription_events(ts, kind);
    CREATE INDEX IF NOT EXISTS idx_subscription_events_sub ON subscription_events(subscription_id);

    CREATE TABLE IF NOT EXISTS orders (
        order_id  TEXT PRIMARY KEY,
        user_id   TEXT,
        status    TEXT NOT NULL,
        total     REAL NOT NULL,
        ts        TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS order_items (
        order_id    TEXT NOT NULL REFERENCES orders(order_id),
        merch_id    TEXT NOT NULL,
        artist_id   TEXT,
        quantity    INTEGER NOT NULL,
        unit_price  REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);
    CREATE INDEX IF NOT EXISTS idx_orders_ts ON orders(ts);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "events",
            "search_queries",
            "sessions",
            "content_performance",
            "artists",
            "content",
            "subscription_events",
            "orders",
            "order_items",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_events_have_no_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        let fk_count = conn
            .prepare("PRAGMA foreign_key_list(events)")
            .unwrap()
            .query_map([], |_| Ok(()))
            .unwrap()
            .count();
        assert_eq!(fk_count, 0, "event references must stay unconstrained");
    }
}
