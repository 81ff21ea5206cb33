//! Analytics module for fanpulse
//!
//! Read side of the pipeline:
//! - [`window`]: half-open time windows
//! - [`ratios`]: pure, zero-guarded derived ratios
//! - [`trending`]: trending song ranking
//! - [`metrics`]: the user / artist / platform facade
//! - [`views`]: serializable response shapes
//!
//! Aggregation SQL lives in [`crate::db::repo`]; everything here composes it.

pub mod metrics;
pub mod ratios;
pub mod trending;
pub mod views;
pub mod window;

pub use metrics::MetricsService;
pub use ratios::{round2, TrendingCounts};
pub use views::{ArtistMetrics, PlatformMetrics, TrendingSong, UserMetrics};
pub use window::TimeWindow;
