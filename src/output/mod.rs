//! Presentation of round reports, results and survey tables.

pub mod json;
pub mod terminal;

pub use json::{to_json, to_json_pretty};
#[cfg(feature = "remote")]
pub use terminal::{format_summary, format_watch};
pub use terminal::{format_ranking, format_result, format_round};
