//! Metrics facade
//!
//! Composes the aggregation queries into the three audience views (user,
//! artist, platform). Each view has three entry points:
//!
//! - `user_metrics(..)` applies the read-failure policy: store errors are
//!   logged at `error` and the caller gets `None` or a zero-valued result.
//! - `user_metrics_at(.., now)` does the same with a pinned clock.
//! - `try_user_metrics_at(.., now)` returns the store error instead.
//!
//! Windows are rolling `[now - days, now)` intervals computed per call.

use super::ratios::{self, round2};
use super::trending::rank_songs;
use super::views::*;
use super::window::{start_of_day, TimeWindow};
use crate::config::AnalyticsConfig;
use crate::db::{Database, EventScope};
use crate::error::Result;
use crate::taxonomy::{Action, AdAction, CommerceAction, LiveEventAction, SubscriptionAction};
use crate::types::{ContentPerformance, ContentType};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const TOP_GENRES: usize = 5;
const TOP_SONGS: usize = 5;
const TOP_SEARCHES: usize = 10;
const TOP_PRODUCTS: usize = 10;

fn names(actions: &[Action]) -> Vec<&'static str> {
    actions.iter().map(|a| a.as_str()).collect()
}

/// Read side of the analytics pipeline.
#[derive(Clone)]
pub struct MetricsService {
    db: Arc<Database>,
    config: AnalyticsConfig,
}

impl MetricsService {
    pub fn new(db: Arc<Database>, config: AnalyticsConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    // ============================================
    // User metrics
    // ============================================

    /// Activity summary for one user, `None` if the user has never been seen.
    pub fn user_metrics(&self, user_id: &str, days: u32) -> Option<UserMetrics> {
        self.user_metrics_at(user_id, days, Utc::now())
    }

    pub fn user_metrics_at(
        &self,
        user_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Option<UserMetrics> {
        self.try_user_metrics_at(user_id, days, now)
            .unwrap_or_else(|e| {
                tracing::error!(user_id, days, error = %e, "User metrics query failed");
                None
            })
    }

    pub fn try_user_metrics_at(
        &self,
        user_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<UserMetrics>> {
        if !self.db.user_has_activity(user_id)? {
            return Ok(None);
        }

        let window = TimeWindow::last_days(days, now);
        let scope = EventScope::User(user_id);
        let by_action = self.db.count_by_action(scope, &window)?;
        let count = |action: Action| by_action.get(action.as_str()).copied().unwrap_or(0);

        let total_purchases: i64 = Action::names_where(Action::is_purchase)
            .iter()
            .filter_map(|name| by_action.get(*name))
            .sum();

        let favorite_genres = self
            .db
            .top_genres(scope, &window, TOP_GENRES)?
            .into_iter()
            .map(|(genre, count)| GenreCount { genre, count })
            .collect();

        Ok(Some(UserMetrics {
            user_id: user_id.to_string(),
            days,
            total_plays: count(Action::PLAY),
            total_likes: count(Action::LIKE),
            total_shares: count(Action::SHARE),
            total_searches: count(Action::SEARCH),
            total_follows: count(Action::FOLLOW),
            total_purchases,
            total_actions: by_action.values().sum(),
            total_revenue: self.db.sum_event_values(scope, &window, &[])?,
            favorite_genres,
            listening_hours: round2(self.db.listening_seconds(scope, &window)? / 3600.0),
            session_count: self.db.count_user_sessions(user_id, &window)?,
        }))
    }

    // ============================================
    // Artist metrics
    // ============================================

    /// Performance summary for one artist, `None` if the artist is unknown.
    pub fn artist_metrics(&self, artist_id: &str, days: u32) -> Option<ArtistMetrics> {
        self.artist_metrics_at(artist_id, days, Utc::now())
    }

    pub fn artist_metrics_at(
        &self,
        artist_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Option<ArtistMetrics> {
        self.try_artist_metrics_at(artist_id, days, now)
            .unwrap_or_else(|e| {
                tracing::error!(artist_id, days, error = %e, "Artist metrics query failed");
                None
            })
    }

    pub fn try_artist_metrics_at(
        &self,
        artist_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<ArtistMetrics>> {
        if !self.db.artist_known(artist_id)? {
            return Ok(None);
        }

        let window = TimeWindow::last_days(days, now);
        let scope = EventScope::Artist(artist_id);
        let db = &self.db;

        let followers = db
            .get_artist(artist_id)?
            .map(|a| a.follower_count)
            .unwrap_or(0);

        let earnings = EarningsBreakdown::new(
            db.sum_event_values(
                scope,
                &window,
                &names(&[
                    Action::Subscription(SubscriptionAction::Subscribe),
                    Action::Subscription(SubscriptionAction::SubscriptionRenew),
                    Action::Subscription(SubscriptionAction::SubscriptionUpgrade),
                ]),
            )?,
            db.sum_event_values(
                scope,
                &window,
                &names(&[Action::Commerce(CommerceAction::MerchPurchase)]),
            )?,
            db.sum_event_values(
                scope,
                &window,
                &names(&[Action::LiveEvent(LiveEventAction::TicketPurchase)]),
            )?,
            db.sum_event_values(scope, &window, &names(&[Action::Ad(AdAction::AdRevenue)]))?,
        );

        let by_action = db.count_by_action(scope, &window)?;
        let count = |action: Action| by_action.get(action.as_str()).copied().unwrap_or(0);

        let new_followers = count(Action::FOLLOW);
        let new_subscribers = estimate_new_subscribers(new_followers, self.config.new_subscriber_ratio);

        let (first_half, second_half) = window.halves();
        let growth_rate = ratios::growth_rate(
            db.count_events(scope, &first_half, &[])?,
            db.count_events(scope, &second_half, &[])?,
        );

        Ok(Some(ArtistMetrics {
            artist_id: artist_id.to_string(),
            days,
            followers,
            uploads: db.content_counts_by_type(artist_id)?,
            earnings,
            total_plays: count(Action::PLAY),
            unique_listeners: db.count_distinct_users(scope, &window, &[Action::PLAY.as_str()])?,
            total_likes: count(Action::LIKE),
            new_followers,
            new_subscribers,
            new_subscribers_estimated: true,
            conversion_rate: round2(ratios::conversion_rate(new_subscribers, followers)),
            top_songs: db.top_songs_for_artist(artist_id, &window, TOP_SONGS)?,
            engagement_rate: ratios::engagement_rate(
                count(Action::LIKE),
                count(Action::SHARE),
                count(Action::NFT_BID),
                count(Action::VIEW),
            ),
            growth_rate: round2(growth_rate),
        }))
    }

    // ============================================
    // Platform metrics
    // ============================================

    /// Platform-wide dashboard. Never fails; a broken store yields zeros.
    pub fn platform_metrics(&self, days: u32) -> PlatformMetrics {
        self.platform_metrics_at(days, Utc::now())
    }

    pub fn platform_metrics_at(&self, days: u32, now: DateTime<Utc>) -> PlatformMetrics {
        self.try_platform_metrics_at(days, now)
            .unwrap_or_else(|e| {
                tracing::error!(days, error = %e, "Platform metrics query failed");
                PlatformMetrics {
                    days,
                    ..Default::default()
                }
            })
    }

    pub fn try_platform_metrics_at(&self, days: u32, now: DateTime<Utc>) -> Result<PlatformMetrics> {
        let window = TimeWindow::last_days(days, now);
        let db = &self.db;

        let subscriptions = {
            let counts = db.subscription_counts(&window)?;
            SubscriptionAnalytics {
                total_subscriptions: counts.created,
                active_subscriptions: counts.active,
                cancellations: counts.cancelled,
                churn_rate: round2(ratios::churn_rate(counts.cancelled, counts.created)),
                renewals: counts.renewed,
                upgrades: counts.upgraded,
            }
        };

        Ok(PlatformMetrics {
            days,
            total_signups: db.count_events(
                EventScope::Platform,
                &window,
                &[Action::SIGNUP.as_str()],
            )?,
            daily_active_users: db.count_session_users(&TimeWindow::today(now))?,
            monthly_active_users: db.count_session_users(&TimeWindow::month_to_date(now))?,
            retention_7d: self.try_retention_at(7, now)?,
            retention_30d: self.try_retention_at(30, now)?,
            trending_songs: self.try_trending_songs_at(self.config.trending_limit, now)?,
            popular_searches: db.popular_searches(&window, TOP_SEARCHES)?,
            merch_sales: db.merch_sales(&window, TOP_PRODUCTS)?,
            subscriptions,
            growth_trend: self.try_growth_trend_at(days, now)?,
        })
    }

    /// Share of users who first signed up on `cohort_date`'s day and started
    /// a session `days` later, in percent.
    pub fn retention_rate(&self, days: u32, cohort_date: DateTime<Utc>) -> f64 {
        self.try_retention_rate(days, cohort_date)
            .unwrap_or_else(|e| {
                tracing::error!(days, error = %e, "Retention query failed");
                0.0
            })
    }

    pub fn try_retention_rate(&self, days: u32, cohort_date: DateTime<Utc>) -> Result<f64> {
        let cohort_window = TimeWindow::day_from(cohort_date);
        let return_window = TimeWindow::day_from(cohort_date + Duration::days(i64::from(days)));
        let (cohort, retained) = self.db.retention_counts(&cohort_window, &return_window)?;
        Ok(round2(ratios::retention_rate(retained, cohort)))
    }

    // The cohort is the UTC day `days` before today, so the return window is
    // today so far.
    fn try_retention_at(&self, days: u32, now: DateTime<Utc>) -> Result<f64> {
        let cohort_date = start_of_day(now) - Duration::days(i64::from(days));
        self.try_retention_rate(days, cohort_date)
    }

    /// Top songs by trending score over the configured lookback.
    pub fn trending_songs(&self, limit: usize) -> Vec<TrendingSong> {
        self.try_trending_songs_at(limit, Utc::now())
            .unwrap_or_else(|e| {
                tracing::error!(limit, error = %e, "Trending query failed");
                Vec::new()
            })
    }

    pub fn try_trending_songs_at(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<TrendingSong>> {
        let window = TimeWindow::last_days(self.config.trending_lookback_days, now);
        let songs = self.db.song_engagement(&window)?;
        Ok(rank_songs(songs, &self.config.trending_weights, limit))
    }

    /// One point per UTC day for the last `days` days, oldest first. Days
    /// without activity are reported as zero.
    fn try_growth_trend_at(&self, days: u32, now: DateTime<Utc>) -> Result<Vec<DailyGrowth>> {
        let today = start_of_day(now);
        let first_day = today - Duration::days(i64::from(days.saturating_sub(1)));
        let by_day = self
            .db
            .daily_signups_and_revenue(&TimeWindow::new(first_day, now))?;

        Ok((0..i64::from(days))
            .map(|offset| {
                let date = (first_day + Duration::days(offset)).date_naive();
                let (signups, revenue) = by_day.get(&date).copied().unwrap_or((0, 0.0));
                DailyGrowth {
                    date,
                    signups,
                    revenue: round2(revenue),
                }
            })
            .collect())
    }

    // ============================================
    // Content performance
    // ============================================

    /// Stored performance snapshot, `None` if absent or unreadable.
    pub fn content_performance(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> Option<ContentPerformance> {
        self.db
            .get_content_performance(content_id, content_type)
            .unwrap_or_else(|e| {
                tracing::error!(content_id, error = %e, "Content performance read failed");
                None
            })
    }

    /// Recompute trending songs and write score and rank into each song's
    /// snapshot. Returns how many snapshots were written.
    pub fn refresh_trending(&self, limit: usize) -> usize {
        self.try_refresh_trending_at(limit, Utc::now())
            .unwrap_or_else(|e| {
                tracing::warn!(limit, error = %e, "Trending refresh failed");
                0
            })
    }

    pub fn try_refresh_trending_at(&self, limit: usize, now: DateTime<Utc>) -> Result<usize> {
        let ranked: Vec<(String, f64, u32)> = self
            .try_trending_songs_at(limit, now)?
            .into_iter()
            .map(|song| (song.song_id, song.score, song.rank))
            .collect();
        self.db.write_trending(&ranked, now)?;
        tracing::info!(songs = ranked.len(), "Trending ranks refreshed");
        Ok(ranked.len())
    }
}

/// Placeholder estimate: a fixed share of new followers, rounded down.
pub fn estimate_new_subscribers(new_followers: i64, ratio: f64) -> i64 {
    (new_followers as f64 * ratio).floor() as i64
}
