// =============================================================================
// Exchange Module — futures REST client
// =============================================================================

pub mod client;

pub use client::{FundingRate, FuturesRestClient, OpenInterest};
