//! fanpulse-analyze - print analytics from the local database
//!
//! Reads the same store the server writes and renders user, artist or
//! platform metrics as text or JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fanpulse_core::analytics::views::{ArtistMetrics, PlatformMetrics, TrendingSong, UserMetrics};
use fanpulse_core::{Config, Database, MetricsService};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "fanpulse-analyze")]
#[command(about = "Run analytics over recorded fan activity")]
#[command(version)]
struct Args {
    /// Lookback window in days (clamped to 1..=365)
    #[arg(short, long, global = true)]
    days: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Metrics for one fan
    User { user_id: String },
    /// Metrics for one artist
    Artist { artist_id: String },
    /// Platform-wide metrics
    Platform,
    /// Current trending songs
    Trending {
        /// Number of songs to rank, defaults to `analytics.trending_limit`
        #[arg(short, long)]
        limit: Option<usize>,

        /// Also write ranks into the content performance table
        #[arg(long)]
        refresh: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = fanpulse_core::logging::init(&config.logging, false)
        .context("failed to initialize logging")?;

    let db = Database::open(&Config::database_path()).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let metrics = MetricsService::new(Arc::new(db), config.analytics.clone());
    let days = metrics.config().window_days(args.days);

    match args.command {
        Command::User { user_id } => {
            let m = metrics
                .try_user_metrics_at(&user_id, days, chrono::Utc::now())
                .context("failed to compute user metrics")?
                .with_context(|| format!("no activity recorded for user '{user_id}'"))?;
            emit(args.format, &m, print_user)
        }
        Command::Artist { artist_id } => {
            let m = metrics
                .try_artist_metrics_at(&artist_id, days, chrono::Utc::now())
                .context("failed to compute artist metrics")?
                .with_context(|| format!("no activity recorded for artist '{artist_id}'"))?;
            emit(args.format, &m, print_artist)
        }
        Command::Platform => {
            let m = metrics
                .try_platform_metrics_at(days, chrono::Utc::now())
                .context("failed to compute platform metrics")?;
            emit(args.format, &m, print_platform)
        }
        Command::Trending { limit, refresh } => {
            let limit = limit.unwrap_or(metrics.config().trending_limit);
            if refresh {
                let ranked = metrics
                    .try_refresh_trending_at(limit, chrono::Utc::now())
                    .context("failed to refresh trending ranks")?;
                if args.format == Format::Text {
                    println!("Refreshed {ranked} trending rank(s)\n");
                }
            }
            let songs = metrics
                .try_trending_songs_at(limit, chrono::Utc::now())
                .context("failed to rank trending songs")?;
            emit(args.format, &songs, |s| print_trending(s))
        }
    }
}

fn emit<T: Serialize>(format: Format, value: &T, text: impl Fn(&T)) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => text(value),
    }
    Ok(())
}

fn print_user(m: &UserMetrics) {
    println!("User: {} (last {} days)", m.user_id, m.days);
    println!("  Plays:      {}", m.total_plays);
    println!("  Likes:      {}", m.total_likes);
    println!("  Shares:     {}", m.total_shares);
    println!("  Searches:   {}", m.total_searches);
    println!("  Follows:    {}", m.total_follows);
    println!("  Purchases:  {}", m.total_purchases);
    println!("  Actions:    {}", m.total_actions);
    println!("  Revenue:    {:.2}", m.total_revenue);
    println!("  Listening:  {:.1}h", m.listening_hours);
    println!("  Sessions:   {}", m.session_count);
    if !m.favorite_genres.is_empty() {
        let genres = m
            .favorite_genres
            .iter()
            .map(|g| format!("{} ({})", g.genre, g.count))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  Genres:     {genres}");
    }
}

fn print_artist(m: &ArtistMetrics) {
    println!("Artist: {} (last {} days)", m.artist_id, m.days);
    println!("  Followers:        {} (+{})", m.followers, m.new_followers);
    println!("  Plays:            {}", m.total_plays);
    println!("  Likes:            {}", m.total_likes);
    println!("  Engagement rate:  {:.2}%", m.engagement_rate);
    println!("  Conversion rate:  {:.2}%", m.conversion_rate);
    println!("  Earnings:         {:.2}", m.earnings.total);
    if !m.top_songs.is_empty() {
        println!("  Top songs:");
        for song in &m.top_songs {
            let title = song.title.as_deref().unwrap_or("(untitled)");
            println!("    {:<24} {} plays", title, song.plays);
        }
    }
}

fn print_platform(m: &PlatformMetrics) {
    println!("Platform (last {} days)", m.days);
    println!("  Signups:        {}", m.total_signups);
    println!("  DAU / MAU:      {} / {}", m.daily_active_users, m.monthly_active_users);
    println!("  Retention 7d:   {:.2}%", m.retention_7d);
    println!("  Retention 30d:  {:.2}%", m.retention_30d);
    println!(
        "  Merch:          {} units, {:.2} revenue",
        m.merch_sales.total_units, m.merch_sales.total_revenue
    );
    println!(
        "  Subscriptions:  {} new, {} active, {:.2}% churn",
        m.subscriptions.total_subscriptions,
        m.subscriptions.active_subscriptions,
        m.subscriptions.churn_rate
    );
    if !m.popular_searches.is_empty() {
        println!("  Top searches:");
        for search in &m.popular_searches {
            println!("    {:<24} {}", search.query, search.search_count);
        }
    }
    print_trending(&m.trending_songs);
}

fn print_trending(songs: &[TrendingSong]) {
    if songs.is_empty() {
        println!("No trending songs.");
        return;
    }
    println!("Trending:");
    for song in songs {
        println!(
            "  {:>2}. {:<24} score {:.2} ({} plays)",
            song.rank,
            song.song_id,
            song.score,
            song.plays
        );
    }
}
