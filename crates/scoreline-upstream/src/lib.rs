//! Upstream provider access.
//!
//! Raw HTTP lives in `client`, payload searching and normalization in
//! `normalize`, and the `LiveFeed` seam the rest of the system depends on in
//! `feed`.

pub mod client;
pub mod feed;
pub mod normalize;

pub use client::UpstreamClient;
pub use feed::{HttpLiveFeed, LiveFeed};
pub use normalize::{collect_ids, find_event, map_status, normalize_live, LiveFields};
pub use scoreline_governor::UpstreamError;
