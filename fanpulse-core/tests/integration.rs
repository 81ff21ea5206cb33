//! Integration tests for the fanpulse ingest → storage → metrics pipeline
//!
//! These tests run against an on-disk database in a temporary directory to
//! cover the same path the server takes.

use chrono::{Duration, Utc};
use fanpulse_core::analytics::MetricsService;
use fanpulse_core::config::AnalyticsConfig;
use fanpulse_core::ingest::SongPlay;
use fanpulse_core::taxonomy::{Action, Context};
use fanpulse_core::{
    Artist, ContentItem, ContentMetricsPatch, ContentType, Database, EventIngest, NewEvent,
    SessionTracker, SessionUpdate, TrackOutcome,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Pipeline {
    _dir: TempDir,
    db: Arc<Database>,
    ingest: EventIngest,
    sessions: SessionTracker,
    metrics: MetricsService,
}

fn pipeline() -> Pipeline {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("data.db")).expect("open database");
    db.migrate().expect("migrate");
    let db = Arc::new(db);

    Pipeline {
        ingest: EventIngest::new(db.clone()),
        sessions: SessionTracker::new(db.clone()),
        metrics: MetricsService::new(db.clone(), AnalyticsConfig::default()),
        db,
        _dir: dir,
    }
}

// ============================================
// End-to-end
// ============================================

#[test]
fn test_plays_and_likes_roll_up_into_user_metrics() {
    let p = pipeline();

    for _ in 0..3 {
        let outcome = p.ingest.track_song_play(&SongPlay {
            user_id: "fan-1".to_string(),
            song_id: "S1".to_string(),
            artist_id: "A1".to_string(),
            context: Context::Player,
            genre: Some("afrobeats".to_string()),
            duration_secs: Some(240.0),
        });
        assert!(outcome.is_recorded());
    }
    for _ in 0..2 {
        p.ingest
            .track_song_like("fan-1", "S1", "A1", Context::Player, true);
    }

    let m = p.metrics.user_metrics("fan-1", 1).expect("user metrics");
    assert_eq!(m.total_plays, 3);
    assert_eq!(m.total_likes, 2);
    assert_eq!(m.total_actions, 5);
    assert_eq!(m.favorite_genres[0].genre, "afrobeats");
    assert_eq!(m.listening_hours, 0.2);
}

#[test]
fn test_track_and_project_updates_catalog_mirror() {
    let p = pipeline();
    p.db.upsert_artist(&Artist::new("A1", "Ayra")).unwrap();
    p.db.upsert_content(&ContentItem::song("S1", "A1", "Rush"))
        .unwrap();

    let play = SongPlay {
        user_id: "fan-1".to_string(),
        song_id: "S1".to_string(),
        artist_id: "A1".to_string(),
        context: Context::Player,
        genre: None,
        duration_secs: None,
    };
    assert_eq!(p.ingest.track_song_play(&play), TrackOutcome::Projected);
    assert_eq!(
        p.ingest
            .track_follow("fan-1", "A1", Context::ArtistPage, true),
        TrackOutcome::Projected
    );

    let artist = p.db.get_artist("A1").unwrap().unwrap();
    assert_eq!(artist.total_plays, 1);
    assert_eq!(artist.follower_count, 1);

    let m = p.metrics.artist_metrics("A1", 30).expect("artist metrics");
    assert_eq!(m.followers, 1);
    assert_eq!(m.new_followers, 1);
    assert_eq!(m.total_plays, 1);
    assert_eq!(m.top_songs[0].title.as_deref(), Some("Rush"));
}

// ============================================
// Sessions
// ============================================

#[test]
fn test_session_lifecycle_feeds_platform_metrics() {
    let p = pipeline();

    let id = p
        .sessions
        .start("fan-1", None, Some(serde_json::json!({"country": "GH"})))
        .expect("session id");
    assert!(id.starts_with("sess_"));

    assert!(p.sessions.update(
        &id,
        &SessionUpdate {
            page_views_delta: 2,
            actions: vec![Action::PLAY.as_str().to_string()],
            device_info: None,
        }
    ));
    assert!(p.sessions.end(&id));
    assert!(p.sessions.end(&id));

    let session = p.db.get_session(&id).unwrap().unwrap();
    assert!(!session.is_active);
    assert_eq!(session.page_views, 3);
    assert_eq!(session.actions, vec!["session_start", "play"]);

    let platform = p.metrics.platform_metrics(30);
    assert_eq!(platform.daily_active_users, 1);
    assert_eq!(platform.monthly_active_users, 1);
}

#[test]
fn test_sweep_leaves_fresh_sessions_open() {
    let p = pipeline();
    let now = Utc::now();

    let stale = p
        .sessions
        .start_at("fan-1", None, None, now - Duration::hours(3))
        .unwrap();
    let fresh = p.sessions.start("fan-2", None, None).unwrap();

    assert_eq!(p.sessions.sweep_idle(Duration::minutes(30)), 1);
    assert!(!p.db.get_session(&stale).unwrap().unwrap().is_active);
    assert!(p.db.get_session(&fresh).unwrap().unwrap().is_active);
}

// ============================================
// Content performance
// ============================================

#[test]
fn test_content_performance_upsert_and_trending_refresh() {
    let p = pipeline();

    let perf = p
        .ingest
        .upsert_content_performance(
            "S1",
            ContentType::Song,
            ContentMetricsPatch {
                views: Some(50),
                likes: Some(4),
                shares: Some(1),
                ..Default::default()
            },
        )
        .expect("upsert");
    assert_eq!(perf.metrics.engagement_rate, 10.0);

    p.ingest.record(
        &NewEvent::new(Action::PLAY, Context::Player)
            .user("fan-1")
            .song("S1"),
    );
    assert_eq!(p.metrics.refresh_trending(10), 1);

    let stored = p
        .metrics
        .content_performance("S1", ContentType::Song)
        .expect("snapshot");
    assert_eq!(stored.metrics.views, 50);
    assert_eq!(stored.trending.rank, Some(1));
}

#[test]
fn test_reopening_database_keeps_events() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");

    {
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        let ingest = EventIngest::new(Arc::new(db));
        ingest.record(&NewEvent::new(Action::SIGNUP, Context::Home).user("fan-9"));
    }

    let db = Database::open(&path).unwrap();
    db.migrate().unwrap();
    assert_eq!(db.count_all_events().unwrap(), 1);
}
