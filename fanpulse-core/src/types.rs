//! Core domain types for fanpulse
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | Immutable fact recording one tracked action |
//! | **Session** | Mutable record bounding a user's continuous interaction window |
//! | **Search query** | One search invocation and the results the user clicked |
//! | **Content performance** | Mutable materialized metrics row per content item |
//! | **Catalog** | Artists and content owned by the content service, mirrored here |
//!
//! Entity references on events (`user_id`, `song_id`, ...) are foreign keys
//! into other services. They are never existence-checked, so joins against
//! the catalog may come back empty.

use crate::taxonomy::{Action, CommerceAction, LiveEventAction, MusicAction, NftAction};
use crate::taxonomy::{AdAction, Context, PlatformAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ============================================
// Events
// ============================================

/// Optional references from an event to entities owned elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_id: Option<String>,
}

/// Details for listening actions (`play`, `pause`, `skip`, `complete`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Listened duration in seconds
    #[serde(
        default,
        rename = "duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_secs: Option<f64>,
    /// Client keys outside this shape, stored as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Details for `like` / `unlike`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LikeDetails {
    pub liked: bool,
    /// Client keys outside this shape, stored as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Details for purchase-type actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchaseDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Client keys outside this shape, stored as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Details for `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDetails {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u32>,
    /// Client keys outside this shape, stored as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Details for NFT and ad bids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Client keys outside this shape, stored as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Details for `page_view` / `view`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageViewDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Client keys outside this shape, stored as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Action-specific event metadata.
///
/// Persisted as a flat JSON object. The shape is chosen by the event's
/// action, so the stored form carries no tag; see [`EventDetails::from_metadata`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetails {
    Play(PlayDetails),
    Like(LikeDetails),
    Purchase(PurchaseDetails),
    Search(SearchDetails),
    Bid(BidDetails),
    PageView(PageViewDetails),
    /// Actions without a dedicated shape, or metadata that did not fit it.
    Custom(Map<String, Value>),
}

impl Default for EventDetails {
    fn default() -> Self {
        EventDetails::Custom(Map::new())
    }
}

impl EventDetails {
    /// Interpret an open metadata bag according to the action's shape.
    ///
    /// Metadata that does not fit the shape is kept verbatim as `Custom`;
    /// ingest never rejects an event over its metadata.
    pub fn from_metadata(action: Action, metadata: Map<String, Value>) -> Self {
        fn typed<T: serde::de::DeserializeOwned>(map: &Map<String, Value>) -> Option<T> {
            serde_json::from_value(Value::Object(map.clone())).ok()
        }

        let parsed = match action {
            Action::Music(
                MusicAction::Play | MusicAction::Pause | MusicAction::Skip | MusicAction::Complete,
            ) => typed(&metadata).map(EventDetails::Play),
            Action::Music(MusicAction::Like) | Action::Music(MusicAction::Unlike) => {
                let liked = match metadata.get("liked") {
                    None => Some(action == Action::LIKE),
                    Some(v) => v.as_bool(),
                };
                liked.map(|liked| {
                    let mut extra = metadata.clone();
                    extra.remove("liked");
                    EventDetails::Like(LikeDetails { liked, extra })
                })
            }
            Action::Platform(PlatformAction::Search) => typed(&metadata).map(EventDetails::Search),
            Action::Platform(PlatformAction::PageView | PlatformAction::View) => {
                typed(&metadata).map(EventDetails::PageView)
            }
            Action::Nft(NftAction::NftBid) | Action::Ad(AdAction::AdBid) => {
                typed(&metadata).map(EventDetails::Bid)
            }
            Action::Commerce(CommerceAction::Purchase | CommerceAction::MerchPurchase)
            | Action::LiveEvent(LiveEventAction::TicketPurchase)
            | Action::Nft(NftAction::NftPurchase) => typed(&metadata).map(EventDetails::Purchase),
            _ => None,
        };

        parsed.unwrap_or(EventDetails::Custom(metadata))
    }

    /// Serialize to the stored JSON object.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Metadata keys that are not part of the typed shape.
    pub fn extra(&self) -> &Map<String, Value> {
        match self {
            EventDetails::Play(d) => &d.extra,
            EventDetails::Like(d) => &d.extra,
            EventDetails::Purchase(d) => &d.extra,
            EventDetails::Search(d) => &d.extra,
            EventDetails::Bid(d) => &d.extra,
            EventDetails::PageView(d) => &d.extra,
            EventDetails::Custom(m) => m,
        }
    }

    /// `genre` from the metadata, whatever the action.
    pub fn genre(&self) -> Option<&str> {
        match self {
            EventDetails::Play(p) => p.genre.as_deref(),
            other => other.extra().get("genre").and_then(Value::as_str),
        }
    }
}

/// An event as submitted for ingest. The timestamp is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub action: Action,
    pub context: Context,
    pub refs: EntityRefs,
    pub value: Option<f64>,
    pub details: EventDetails,
}

impl NewEvent {
    pub fn new(action: Action, context: Context) -> Self {
        Self {
            action,
            context,
            refs: EntityRefs::default(),
            value: None,
            details: EventDetails::default(),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.refs.user_id = Some(user_id.into());
        self
    }

    pub fn artist(mut self, artist_id: impl Into<String>) -> Self {
        self.refs.artist_id = Some(artist_id.into());
        self
    }

    pub fn song(mut self, song_id: impl Into<String>) -> Self {
        self.refs.song_id = Some(song_id.into());
        self
    }

    pub fn refs(mut self, refs: EntityRefs) -> Self {
        self.refs = refs;
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn details(mut self, details: EventDetails) -> Self {
        self.details = details;
        self
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub action: Action,
    pub context: Context,
    #[serde(flatten)]
    pub refs: EntityRefs,
    pub value: Option<f64>,
    #[serde(rename = "metadata")]
    pub details: EventDetails,
    pub timestamp: DateTime<Utc>,
}

// ============================================
// Sessions
// ============================================

/// A contiguous interaction window for one user on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    /// Set when the session is ended
    pub duration_secs: Option<i64>,
    pub page_views: i64,
    /// Action names appended over the session's life
    pub actions: Vec<String>,
    pub is_active: bool,
    pub device_info: Option<Value>,
    pub location: Option<Value>,
}

/// Partial update merged into an active session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    /// Added to the page view counter
    #[serde(default)]
    pub page_views_delta: u32,
    /// Appended to the action list
    #[serde(default)]
    pub actions: Vec<String>,
    /// Replaces device info when present
    #[serde(default)]
    pub device_info: Option<Value>,
}

// ============================================
// Search
// ============================================

/// A search result the user clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickedResult {
    pub entity_id: String,
    pub entity_kind: String,
    /// Rank position in the result list (1-based)
    pub position: u32,
}

/// A search invocation as submitted for ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSearchQuery {
    pub query: String,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub result_count: u32,
    #[serde(default)]
    pub clicked_results: Vec<ClickedResult>,
    #[serde(default)]
    pub time_to_first_click_ms: Option<u64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

// ============================================
// Subscriptions and orders
// ============================================

/// Lifecycle step of a fan subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventKind {
    Created,
    Renewed,
    Upgraded,
    Downgraded,
    Cancelled,
    Expired,
}

impl SubscriptionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionEventKind::Created => "created",
            SubscriptionEventKind::Renewed => "renewed",
            SubscriptionEventKind::Upgraded => "upgraded",
            SubscriptionEventKind::Downgraded => "downgraded",
            SubscriptionEventKind::Cancelled => "cancelled",
            SubscriptionEventKind::Expired => "expired",
        }
    }
}

/// One subscription lifecycle fact. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub user_id: String,
    #[serde(default)]
    pub artist_id: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    pub kind: SubscriptionEventKind,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Fulfilment state of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    #[default]
    Paid,
    Fulfilled,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

/// One line of a merch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub merch_id: String,
    #[serde(default)]
    pub artist_id: Option<String>,
    pub quantity: u32,
    pub unit_price: f64,
}

/// A merch order as reported by the commerce service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub status: OrderStatus,
}

impl OrderRecord {
    /// Sum of quantity * unit price across items.
    pub fn total(&self) -> f64 {
        self.items
            .iter()
            .map(|i| f64::from(i.quantity) * i.unit_price)
            .sum()
    }
}

// ============================================
// Catalog mirror
// ============================================

/// Kind of catalog content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Song,
    Album,
    Video,
    Podcast,
    Merch,
    Event,
    Nft,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Song => "song",
            ContentType::Album => "album",
            ContentType::Video => "video",
            ContentType::Podcast => "podcast",
            ContentType::Merch => "merch",
            ContentType::Event => "event",
            ContentType::Nft => "nft",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "song" => Ok(ContentType::Song),
            "album" => Ok(ContentType::Album),
            "video" => Ok(ContentType::Video),
            "podcast" => Ok(ContentType::Podcast),
            "merch" => Ok(ContentType::Merch),
            "event" => Ok(ContentType::Event),
            "nft" => Ok(ContentType::Nft),
            _ => Err(format!("unknown content type: {}", s)),
        }
    }
}

/// Artist profile aggregate, mirrored from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub follower_count: i64,
    /// Denormalized counter, projected by track-and-project operations
    #[serde(default)]
    pub total_plays: i64,
    /// Denormalized counter, projected by track-and-project operations
    #[serde(default)]
    pub total_likes: i64,
}

impl Artist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            follower_count: 0,
            total_plays: 0,
            total_likes: 0,
        }
    }
}

/// A catalog content item (song, album, merch, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub artist_id: String,
    pub content_type: ContentType,
    pub title: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub plays: i64,
    #[serde(default)]
    pub likes: i64,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn song(id: impl Into<String>, artist_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artist_id: artist_id.into(),
            content_type: ContentType::Song,
            title: title.into(),
            genre: None,
            plays: 0,
            likes: 0,
            created_at: Utc::now(),
        }
    }
}

// ============================================
// Content performance
// ============================================

/// Aggregate counters for one content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetrics {
    pub views: i64,
    pub plays: i64,
    pub likes: i64,
    pub shares: i64,
    pub saves: i64,
    pub downloads: i64,
    pub revenue: f64,
    /// `(likes + shares) / views * 100`, derived after every merge
    pub engagement_rate: f64,
}

/// Trending position of one content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingInfo {
    pub score: f64,
    pub rank: Option<u32>,
    pub last_calculated: Option<DateTime<Utc>>,
}

/// Audience histograms keyed by bucket label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    #[serde(default)]
    pub age: BTreeMap<String, i64>,
    #[serde(default)]
    pub gender: BTreeMap<String, i64>,
    #[serde(default)]
    pub country: BTreeMap<String, i64>,
    #[serde(default)]
    pub device: BTreeMap<String, i64>,
}

impl Demographics {
    /// Merge another histogram set into this one; incoming buckets win.
    pub fn merge(&mut self, other: Demographics) {
        self.age.extend(other.age);
        self.gender.extend(other.gender);
        self.country.extend(other.country);
        self.device.extend(other.device);
    }
}

/// Materialized performance row keyed by `(content_id, content_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPerformance {
    pub content_id: String,
    pub content_type: ContentType,
    pub metrics: ContentMetrics,
    pub trending: TrendingInfo,
    pub demographics: Demographics,
    pub updated_at: DateTime<Utc>,
}

impl ContentPerformance {
    pub fn empty(content_id: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            content_id: content_id.into(),
            content_type,
            metrics: ContentMetrics::default(),
            trending: TrendingInfo::default(),
            demographics: Demographics::default(),
            updated_at: Utc::now(),
        }
    }

    /// Apply a patch field by field, then re-derive the engagement rate.
    pub fn apply(&mut self, patch: ContentMetricsPatch) {
        let m = &mut self.metrics;
        if let Some(v) = patch.views {
            m.views = v;
        }
        if let Some(v) = patch.plays {
            m.plays = v;
        }
        if let Some(v) = patch.likes {
            m.likes = v;
        }
        if let Some(v) = patch.shares {
            m.shares = v;
        }
        if let Some(v) = patch.saves {
            m.saves = v;
        }
        if let Some(v) = patch.downloads {
            m.downloads = v;
        }
        if let Some(v) = patch.revenue {
            m.revenue = v;
        }
        m.engagement_rate = if m.views > 0 {
            let rate = (m.likes + m.shares) as f64 / m.views as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        } else {
            0.0
        };

        if let Some(t) = patch.trending {
            self.trending = t;
        }
        if let Some(d) = patch.demographics {
            self.demographics.merge(d);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update for a content performance row. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetricsPatch {
    pub views: Option<i64>,
    pub plays: Option<i64>,
    pub likes: Option<i64>,
    pub shares: Option<i64>,
    pub saves: Option<i64>,
    pub downloads: Option<i64>,
    pub revenue: Option<f64>,
    pub trending: Option<TrendingInfo>,
    pub demographics: Option<Demographics>,
}

/// A stored text column that no longer decodes.
pub(crate) fn corrupt_column(msg: impl Into<String>) -> rusqlite::Error {
    let msg: String = msg.into();
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, msg.into())
}

/// Parse a stored taxonomy name, mapping the error for row decoding.
pub(crate) fn parse_stored<T>(s: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    s.parse::<T>().map_err(|e| corrupt_column(e.to_string()))
}
