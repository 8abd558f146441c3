//! Statistical reduction of timing samples.
//!
//! - Welford online mean/variance
//! - Per-candidate aggregation of paired differences
//! - Ranking with an explicit tie-break and a separation measure

mod aggregate;
mod online;
mod serde_float;

pub use aggregate::{aggregate, rank, AggregateScore, Ranking};
pub use online::OnlineStats;
