//! Derived ratios.
//!
//! Every function is pure and guards its denominator: a zero denominator
//! yields 0, never NaN or infinity.

use crate::config::TrendingWeights;

/// `subscribers / followers * 100`.
pub fn conversion_rate(subscribers: i64, followers: i64) -> f64 {
    percent(subscribers, followers)
}

/// `cancellations / total * 100`.
pub fn churn_rate(cancellations: i64, total_subscriptions: i64) -> f64 {
    percent(cancellations, total_subscriptions)
}

/// `(likes + shares + bids) / views * 100`, rounded to the nearest integer.
pub fn engagement_rate(likes: i64, shares: i64, bids: i64, views: i64) -> f64 {
    percent(likes + shares + bids, views).round()
}

/// `retained / cohort * 100`; 0 for an empty cohort.
pub fn retention_rate(retained: i64, cohort: i64) -> f64 {
    percent(retained, cohort)
}

/// Change in activity between two halves of a window, in percent.
///
/// With no activity in the first half the result is 100 if anything happened
/// in the second half and 0 otherwise.
pub fn growth_rate(first_half: i64, second_half: i64) -> f64 {
    if first_half == 0 {
        return if second_half > 0 { 100.0 } else { 0.0 };
    }
    (second_half - first_half) as f64 / first_half as f64 * 100.0
}

/// Raw counts feeding a trending score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrendingCounts {
    pub plays: i64,
    pub likes: i64,
    pub shares: i64,
    pub unique_listeners: i64,
}

pub fn trending_score(counts: TrendingCounts, weights: &TrendingWeights) -> f64 {
    counts.plays as f64 * weights.plays
        + counts.likes as f64 * weights.likes
        + counts.shares as f64 * weights.shares
        + counts.unique_listeners as f64 * weights.unique_listeners
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64 * 100.0
}
