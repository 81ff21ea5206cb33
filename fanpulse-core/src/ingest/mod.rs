//! Best-effort event ingest
//!
//! Losing an analytics event must never break the feature that triggered it,
//! so every write here logs failures at `warn` and returns a no-data value
//! instead of an error.
//!
//! ## Track-and-project
//!
//! Some actions also move denormalized counters in the catalog mirror (song
//! plays, likes, artist followers). Those operations run in two steps:
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────────┐
//! │ append event │ ──► │ adjust counters (±1) │
//! └──────────────┘     └──────────────────────┘
//! ```
//!
//! The steps are not atomic. If the append fails nothing is projected; if the
//! projection fails the event stays recorded and the counters lag the log.
//! Each step runs at most once and the caller learns which case happened
//! from the returned [`TrackOutcome`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanpulse_core::{Config, Database, EventIngest};
//! use fanpulse_core::ingest::SongPlay;
//! use fanpulse_core::taxonomy::Context;
//!
//! let db = Database::open(&Config::database_path()).expect("open database");
//! db.migrate().expect("migrate");
//! let ingest = EventIngest::new(Arc::new(db));
//!
//! let outcome = ingest.track_song_play(&SongPlay {
//!     user_id: "u1".into(),
//!     song_id: "s1".into(),
//!     artist_id: "a1".into(),
//!     context: Context::Player,
//!     genre: Some("house".into()),
//!     duration_secs: Some(212.0),
//! });
//! println!("{outcome:?}");
//! ```

use crate::db::{ArtistCounter, ContentCounter, TelemetrySink};
use crate::error::Result;
use crate::taxonomy::{Action, Context, MusicAction, PlatformAction};
use crate::types::*;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// What a track-and-project operation managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Event recorded and counters adjusted
    Projected,
    /// Event recorded, counter adjustment failed
    RecordedOnly,
    /// Event append failed; counters were not touched
    Dropped,
}

impl TrackOutcome {
    /// Whether the event made it into the log.
    pub fn is_recorded(&self) -> bool {
        !matches!(self, TrackOutcome::Dropped)
    }
}

/// A song play as reported by the player.
#[derive(Debug, Clone, PartialEq)]
pub struct SongPlay {
    pub user_id: String,
    pub song_id: String,
    pub artist_id: String,
    pub context: Context,
    pub genre: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Untyped event as it arrives over the wire.
///
/// Action and context are checked against the closed taxonomy by
/// [`EventInput::into_event`]; metadata is shaped by the action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub action: String,
    pub context: String,
    #[serde(flatten)]
    pub refs: EntityRefs,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EventInput {
    pub fn into_event(self) -> Result<NewEvent> {
        let action: Action = self.action.parse()?;
        let context: Context = self.context.parse()?;
        Ok(NewEvent {
            action,
            context,
            refs: self.refs,
            value: self.value,
            details: EventDetails::from_metadata(action, self.metadata),
        })
    }
}

/// Write side of the analytics pipeline.
#[derive(Clone)]
pub struct EventIngest {
    sink: Arc<dyn TelemetrySink>,
}

impl EventIngest {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Stamp and append one event. Returns the new id, or `None` if the
    /// store rejected it.
    pub fn record(&self, event: &NewEvent) -> Option<i64> {
        match self.try_record(event) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(action = %event.action, error = %e, "Dropped analytics event");
                None
            }
        }
    }

    /// Like [`record`](Self::record) but hands the store error back.
    pub fn try_record(&self, event: &NewEvent) -> Result<i64> {
        let id = self.sink.append_event(event, Utc::now())?;
        tracing::trace!(id, action = %event.action, "Recorded event");
        Ok(id)
    }

    /// Record any event and move the counters its action carries.
    ///
    /// `play`, `like`/`unlike` and `follow`/`unfollow` adjust the counters
    /// of whichever song and artist the event references. Every other
    /// action is only appended, and a successful append is `Projected`.
    pub fn track_event(&self, event: &NewEvent) -> TrackOutcome {
        let Some((content_counter, artist_counter, delta)) = projection(event.action) else {
            return match self.record(event) {
                Some(_) => TrackOutcome::Projected,
                None => TrackOutcome::Dropped,
            };
        };
        let song_id = event.refs.song_id.as_deref();
        let artist_id = event.refs.artist_id.as_deref();

        self.track(event, |sink| {
            if let (Some(counter), Some(id)) = (content_counter, song_id) {
                project_content(sink, id, counter, delta)?;
            }
            if let Some(id) = artist_id {
                project_artist(sink, id, artist_counter, delta)?;
            }
            Ok(())
        })
    }

    /// Record a `play` and bump the song's and artist's play counters.
    pub fn track_song_play(&self, play: &SongPlay) -> TrackOutcome {
        let event = NewEvent::new(Action::PLAY, play.context)
            .user(&play.user_id)
            .song(&play.song_id)
            .artist(&play.artist_id)
            .details(EventDetails::Play(PlayDetails {
                genre: play.genre.clone(),
                duration_secs: play.duration_secs,
                ..Default::default()
            }));

        self.track_event(&event)
    }

    /// Record a `like` or `unlike` and move the like counters by one.
    pub fn track_song_like(
        &self,
        user_id: &str,
        song_id: &str,
        artist_id: &str,
        context: Context,
        liked: bool,
    ) -> TrackOutcome {
        let action = if liked { Action::LIKE } else { Action::UNLIKE };
        let event = NewEvent::new(action, context)
            .user(user_id)
            .song(song_id)
            .artist(artist_id)
            .details(EventDetails::Like(LikeDetails {
                liked,
                ..Default::default()
            }));

        self.track_event(&event)
    }

    /// Record a `follow` or `unfollow` and move the artist's follower count.
    pub fn track_follow(
        &self,
        user_id: &str,
        artist_id: &str,
        context: Context,
        following: bool,
    ) -> TrackOutcome {
        let action = if following {
            Action::FOLLOW
        } else {
            Action::UNFOLLOW
        };
        let event = NewEvent::new(action, context).user(user_id).artist(artist_id);

        self.track_event(&event)
    }

    fn track<F>(&self, event: &NewEvent, project: F) -> TrackOutcome
    where
        F: FnOnce(&dyn TelemetrySink) -> Result<()>,
    {
        if self.record(event).is_none() {
            return TrackOutcome::Dropped;
        }

        match project(self.sink.as_ref()) {
            Ok(()) => TrackOutcome::Projected,
            Err(e) => {
                tracing::warn!(
                    action = %event.action,
                    error = %e,
                    "Counter projection failed; counters lag the event log"
                );
                TrackOutcome::RecordedOnly
            }
        }
    }

    /// Store one search invocation.
    pub fn record_search(&self, query: &NewSearchQuery) -> Option<i64> {
        self.sink
            .insert_search_query(query, Utc::now())
            .map_err(|e| tracing::warn!(error = %e, "Dropped search query"))
            .ok()
    }

    /// Append a subscription lifecycle fact.
    pub fn record_subscription(&self, record: &SubscriptionRecord) -> Option<i64> {
        self.sink
            .insert_subscription_record(record, Utc::now())
            .map_err(|e| {
                tracing::warn!(
                    subscription_id = %record.subscription_id,
                    kind = record.kind.as_str(),
                    error = %e,
                    "Dropped subscription record"
                )
            })
            .ok()
    }

    /// Insert or replace a merch order.
    pub fn record_order(&self, order: &OrderRecord) -> Option<()> {
        self.sink
            .upsert_order(order, Utc::now())
            .map_err(|e| tracing::warn!(order_id = %order.order_id, error = %e, "Dropped order"))
            .ok()
    }

    /// Merge a patch into a content performance snapshot.
    pub fn upsert_content_performance(
        &self,
        content_id: &str,
        content_type: ContentType,
        patch: ContentMetricsPatch,
    ) -> Option<ContentPerformance> {
        self.sink
            .upsert_content_performance(content_id, content_type, patch)
            .map_err(|e| {
                tracing::warn!(
                    content_id,
                    content_type = content_type.as_str(),
                    error = %e,
                    "Content performance upsert failed"
                )
            })
            .ok()
    }
}

/// Counters moved by an action: song counter, artist counter, delta.
fn projection(action: Action) -> Option<(Option<ContentCounter>, ArtistCounter, i64)> {
    match action {
        Action::Music(MusicAction::Play) => {
            Some((Some(ContentCounter::Plays), ArtistCounter::Plays, 1))
        }
        Action::Music(MusicAction::Like) => {
            Some((Some(ContentCounter::Likes), ArtistCounter::Likes, 1))
        }
        Action::Music(MusicAction::Unlike) => {
            Some((Some(ContentCounter::Likes), ArtistCounter::Likes, -1))
        }
        Action::Platform(PlatformAction::Follow) => Some((None, ArtistCounter::Followers, 1)),
        Action::Platform(PlatformAction::Unfollow) => Some((None, ArtistCounter::Followers, -1)),
        _ => None,
    }
}

// A reference missing from the catalog mirror is not a failure: references
// are never existence-checked, so there is simply no counter to move.
fn project_content(
    sink: &dyn TelemetrySink,
    content_id: &str,
    counter: ContentCounter,
    delta: i64,
) -> Result<()> {
    if !sink.adjust_content_counter(content_id, counter, delta)? {
        tracing::debug!(content_id, ?counter, "Content not in catalog mirror");
    }
    Ok(())
}

fn project_artist(
    sink: &dyn TelemetrySink,
    artist_id: &str,
    counter: ArtistCounter,
    delta: i64,
) -> Result<()> {
    if !sink.adjust_artist_counter(artist_id, counter, delta)? {
        tracing::debug!(artist_id, ?counter, "Artist not in catalog mirror");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FailingStore;
    use crate::error::Error;
    use crate::db::Database;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn catalog_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.upsert_artist(&Artist::new("a1", "Artist One")).unwrap();
        db.upsert_content(&ContentItem::song("s1", "a1", "First Song"))
            .unwrap();
        Arc::new(db)
    }

    fn play() -> SongPlay {
        SongPlay {
            user_id: "u1".to_string(),
            song_id: "s1".to_string(),
            artist_id: "a1".to_string(),
            context: Context::Player,
            genre: Some("house".to_string()),
            duration_secs: Some(180.0),
        }
    }

    #[test]
    fn test_record_assigns_ids() {
        let db = catalog_db();
        let ingest = EventIngest::new(db.clone());

        let first = ingest.record(&NewEvent::new(Action::SIGNUP, Context::Home).user("u1"));
        let second = ingest.record(&NewEvent::new(Action::SIGNUP, Context::Home).user("u2"));

        assert!(first.is_some());
        assert!(second > first);
        assert_eq!(db.count_all_events().unwrap(), 2);
    }

    #[test]
    fn test_record_never_fails_on_broken_store() {
        crate::logging::init_test();
        let store = Arc::new(FailingStore::broken());
        let ingest = EventIngest::new(store.clone());

        let event = NewEvent::new(Action::PLAY, Context::Player).user("u1");
        assert_eq!(ingest.record(&event), None);
        assert!(ingest.try_record(&event).is_err());
        assert_eq!(ingest.track_song_play(&play()), TrackOutcome::Dropped);
        assert_eq!(ingest.record_search(&NewSearchQuery::default()), None);
        assert_eq!(
            ingest.upsert_content_performance("s1", ContentType::Song, Default::default()),
            None
        );
        assert!(store.calls.load(Ordering::SeqCst) > 0);
        assert_eq!(store.db().count_all_events().unwrap(), 0);
    }

    #[test]
    fn test_track_song_play_projects_counters() {
        let db = catalog_db();
        let ingest = EventIngest::new(db.clone());

        assert_eq!(ingest.track_song_play(&play()), TrackOutcome::Projected);
        assert_eq!(ingest.track_song_play(&play()), TrackOutcome::Projected);

        assert_eq!(db.get_content("s1").unwrap().unwrap().plays, 2);
        assert_eq!(db.get_artist("a1").unwrap().unwrap().total_plays, 2);

        let event = db.get_event(1).unwrap().unwrap();
        assert_eq!(event.details.genre(), Some("house"));
    }

    #[test]
    fn test_projection_failure_reports_recorded_only() {
        let store = Arc::new(FailingStore::new());
        store.fail_projections.store(true, Ordering::SeqCst);
        let ingest = EventIngest::new(store.clone());

        assert_eq!(ingest.track_song_play(&play()), TrackOutcome::RecordedOnly);
        assert!(TrackOutcome::RecordedOnly.is_recorded());
        assert_eq!(store.db().count_all_events().unwrap(), 1);
    }

    #[test]
    fn test_like_unlike_clamps_at_zero() {
        let db = catalog_db();
        let ingest = EventIngest::new(db.clone());

        ingest.track_song_like("u1", "s1", "a1", Context::SongPage, false);
        ingest.track_song_like("u1", "s1", "a1", Context::SongPage, true);

        assert_eq!(db.get_content("s1").unwrap().unwrap().likes, 1);
        assert_eq!(db.get_artist("a1").unwrap().unwrap().total_likes, 1);
        assert_eq!(
            db.get_event(1).unwrap().unwrap().action,
            Action::UNLIKE
        );
    }

    #[test]
    fn test_dangling_references_still_project() {
        let db = catalog_db();
        let ingest = EventIngest::new(db.clone());

        let outcome = ingest.track_follow("u1", "unknown-artist", Context::ArtistPage, true);
        assert_eq!(outcome, TrackOutcome::Projected);
        assert_eq!(db.count_all_events().unwrap(), 1);

        ingest.track_follow("u1", "a1", Context::ArtistPage, true);
        assert_eq!(db.get_artist("a1").unwrap().unwrap().follower_count, 1);
    }

    #[test]
    fn test_event_input_validation() {
        let input: EventInput = serde_json::from_value(json!({
            "userId": "u1",
            "songId": "s1",
            "action": "play",
            "context": "player",
            "metadata": {"genre": "jazz", "duration": 95}
        }))
        .unwrap();
        let event = input.into_event().unwrap();
        assert_eq!(event.action, Action::PLAY);
        assert_eq!(event.refs.user_id.as_deref(), Some("u1"));
        assert_eq!(event.details.genre(), Some("jazz"));

        let bad = EventInput {
            action: "teleport".to_string(),
            context: "home".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad.into_event(), Err(Error::InvalidAction(_))));

        let bad = EventInput {
            action: "play".to_string(),
            context: "moon".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad.into_event(), Err(Error::InvalidContext(_))));
    }

    #[test]
    fn test_recorded_metadata_keeps_client_keys() {
        let db = catalog_db();
        let ingest = EventIngest::new(db.clone());
        let input = |action: &str, metadata: Value| -> NewEvent {
            serde_json::from_value::<EventInput>(json!({
                "userId": "u9",
                "songId": "s1",
                "action": action,
                "context": "player",
                "metadata": metadata
            }))
            .unwrap()
            .into_event()
            .unwrap()
        };

        let like = ingest
            .record(&input(
                "like",
                json!({"liked": true, "genre": "soul", "source": "radio"}),
            ))
            .unwrap();
        let play = ingest
            .record(&input(
                "play",
                json!({"genre": "jazz", "duration": 60, "playlistId": "p9"}),
            ))
            .unwrap();

        let stored = db.get_event(like).unwrap().unwrap();
        assert_eq!(
            stored.details.to_json(),
            json!({"liked": true, "genre": "soul", "source": "radio"})
        );
        assert_eq!(stored.details.genre(), Some("soul"));

        let stored = db.get_event(play).unwrap().unwrap();
        assert_eq!(
            stored.details.to_json(),
            json!({"genre": "jazz", "duration": 60.0, "playlistId": "p9"})
        );

        let metrics = crate::analytics::MetricsService::new(db, Default::default());
        let genres: Vec<String> = metrics
            .user_metrics("u9", 1)
            .unwrap()
            .favorite_genres
            .into_iter()
            .map(|g| g.genre)
            .collect();
        assert_eq!(genres, vec!["jazz".to_string(), "soul".to_string()]);
    }

    #[test]
    fn test_track_event_projects_by_action_and_refs() {
        let db = catalog_db();
        let ingest = EventIngest::new(db.clone());

        let play = NewEvent::new(Action::PLAY, Context::Player)
            .user("u1")
            .song("s1")
            .artist("a1");
        assert_eq!(ingest.track_event(&play), TrackOutcome::Projected);
        assert_eq!(ingest.track_event(&play), TrackOutcome::Projected);

        let unlike = NewEvent::new(Action::UNLIKE, Context::Player).song("s1");
        assert_eq!(ingest.track_event(&unlike), TrackOutcome::Projected);

        let follow = NewEvent::new(Action::FOLLOW, Context::ArtistPage)
            .user("u1")
            .artist("a1");
        assert_eq!(ingest.track_event(&follow), TrackOutcome::Projected);

        let signup = NewEvent::new(Action::SIGNUP, Context::Home).user("u2");
        assert_eq!(ingest.track_event(&signup), TrackOutcome::Projected);

        let song = db.get_content("s1").unwrap().unwrap();
        assert_eq!(song.plays, 2);
        assert_eq!(song.likes, 0);
        let artist = db.get_artist("a1").unwrap().unwrap();
        assert_eq!(artist.total_plays, 2);
        assert_eq!(artist.follower_count, 1);
        assert_eq!(db.count_all_events().unwrap(), 5);
    }
}
