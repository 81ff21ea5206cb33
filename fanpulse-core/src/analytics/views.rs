//! Response shapes for the metrics facade.
//!
//! Every struct serializes to camelCase JSON and has a zero-valued
//! `Default`, which is what callers get when the underlying query set is
//! empty.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-user activity over a lookback window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetrics {
    pub user_id: String,
    pub days: u32,
    pub total_plays: i64,
    pub total_likes: i64,
    pub total_shares: i64,
    pub total_searches: i64,
    pub total_follows: i64,
    pub total_purchases: i64,
    pub total_actions: i64,
    /// Sum of every non-null event `value` in the window, whatever the
    /// action. Search result counts or bid sizes land here too; kept as is
    /// until product decides what "revenue" should mean for a fan.
    pub total_revenue: f64,
    /// Up to five genres, most played first
    pub favorite_genres: Vec<GenreCount>,
    pub listening_hours: f64,
    pub session_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreCount {
    pub genre: String,
    pub count: i64,
}

/// Earnings per revenue stream for an artist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsBreakdown {
    pub subscriptions: f64,
    pub merch: f64,
    pub events: f64,
    pub ads: f64,
    pub total: f64,
}

impl EarningsBreakdown {
    pub fn new(subscriptions: f64, merch: f64, events: f64, ads: f64) -> Self {
        Self {
            subscriptions,
            merch,
            events,
            ads,
            total: subscriptions + merch + events + ads,
        }
    }
}

/// A song ranked by plays within one artist's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSong {
    pub song_id: String,
    /// `None` when the song is missing from the catalog mirror
    pub title: Option<String>,
    pub plays: i64,
}

/// Per-artist performance over a lookback window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistMetrics {
    pub artist_id: String,
    pub days: u32,
    pub followers: i64,
    /// Catalog item counts keyed by content type
    pub uploads: BTreeMap<String, i64>,
    pub earnings: EarningsBreakdown,
    pub total_plays: i64,
    pub unique_listeners: i64,
    pub total_likes: i64,
    pub new_followers: i64,
    /// Estimated as a fixed share of new followers, not measured.
    pub new_subscribers: i64,
    /// Always true; marks `new_subscribers` as an estimate for API readers.
    pub new_subscribers_estimated: bool,
    pub conversion_rate: f64,
    pub top_songs: Vec<TopSong>,
    pub engagement_rate: f64,
    pub growth_rate: f64,
}

/// Raw per-song counts over the trending lookback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongEngagement {
    pub song_id: String,
    pub title: Option<String>,
    pub artist_id: Option<String>,
    pub plays: i64,
    pub likes: i64,
    pub shares: i64,
    pub unique_listeners: i64,
}

/// A song with its trending score and rank (1-based).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingSong {
    pub rank: u32,
    pub song_id: String,
    pub title: Option<String>,
    pub artist_id: Option<String>,
    pub plays: i64,
    pub likes: i64,
    pub shares: i64,
    pub unique_listeners: i64,
    pub score: f64,
}

/// A search string ranked by how often it was issued.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularSearch {
    pub query: String,
    pub search_count: i64,
    pub avg_result_count: f64,
    /// `total_clicks / search_count`
    pub click_through_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub merch_id: String,
    pub units: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchSales {
    pub total_units: i64,
    pub total_revenue: f64,
    pub top_products: Vec<ProductSales>,
}

/// Raw subscription lifecycle counts for a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionCounts {
    pub created: i64,
    pub active: i64,
    pub cancelled: i64,
    pub renewed: i64,
    pub upgraded: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionAnalytics {
    pub total_subscriptions: i64,
    pub active_subscriptions: i64,
    pub cancellations: i64,
    pub churn_rate: f64,
    pub renewals: i64,
    pub upgrades: i64,
}

/// One day of the platform growth series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyGrowth {
    pub date: NaiveDate,
    pub signups: i64,
    pub revenue: f64,
}

/// Platform-wide view for administrators.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMetrics {
    pub days: u32,
    pub total_signups: i64,
    pub daily_active_users: i64,
    pub monthly_active_users: i64,
    pub retention_7d: f64,
    pub retention_30d: f64,
    pub trending_songs: Vec<TrendingSong>,
    pub popular_searches: Vec<PopularSearch>,
    pub merch_sales: MerchSales,
    pub subscriptions: SubscriptionAnalytics,
    /// Oldest day first
    pub growth_trend: Vec<DailyGrowth>,
}
