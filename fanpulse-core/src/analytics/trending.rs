//! Trending song ranking.

use super::ratios::{round2, trending_score, TrendingCounts};
use super::views::{SongEngagement, TrendingSong};
use crate::config::TrendingWeights;
use std::cmp::Ordering;

/// Score every song, sort by score descending and keep the top `limit`.
///
/// Ties fall back to plays, then song id, so the order is stable across calls.
pub fn rank_songs(
    songs: Vec<SongEngagement>,
    weights: &TrendingWeights,
    limit: usize,
) -> Vec<TrendingSong> {
    let mut scored: Vec<(f64, SongEngagement)> = songs
        .into_iter()
        .map(|song| {
            let counts = TrendingCounts {
                plays: song.plays,
                likes: song.likes,
                shares: song.shares,
                unique_listeners: song.unique_listeners,
            };
            (trending_score(counts, weights), song)
        })
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.plays.cmp(&a.plays))
            .then_with(|| a.song_id.cmp(&b.song_id))
    });

    scored
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (score, song))| TrendingSong {
            rank: i as u32 + 1,
            song_id: song.song_id,
            title: song.title,
            artist_id: song.artist_id,
            plays: song.plays,
            likes: song.likes,
            shares: song.shares,
            unique_listeners: song.unique_listeners,
            score: round2(score),
        })
        .collect()
}
