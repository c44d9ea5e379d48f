//! Remote card source: bulk snapshot, card lookups and image downloads.

mod client;
mod types;

pub use client::{assess_staleness, face_file_name, CardDownloader};
pub use types::*;
