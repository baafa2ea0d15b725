//! Metric samples and the inbound payload decoder.

mod decode;
mod models;

pub use decode::*;
pub use models::*;
