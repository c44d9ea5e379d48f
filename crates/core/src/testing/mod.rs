//! Testing utilities and test doubles.
//!
//! Lets the download queue, downloader and image service be exercised
//! without the real remote API.
//!
//! # Example
//!
//! ```rust,ignore
//! use cardcache_core::testing::{fixtures, MockFetcher, StaticHttpServer, StaticResponse};
//!
//! let server = StaticHttpServer::start().await?;
//! server
//!     .route("/cards/named", StaticResponse::json(&fixtures::card_json("id", "Opt", "dom", "60")))
//!     .await;
//!
//! let fetcher = MockFetcher::gated();
//! fetcher.release(1);
//! ```

mod http_server;
mod mock_fetcher;

pub use http_server::{StaticHttpServer, StaticResponse};
pub use mock_fetcher::{MockFetcher, MockResponse};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use serde_json::{json, Value};

    use crate::card::CardRecord;

    /// Remote card JSON with the fields every record carries.
    pub fn card_json(id: &str, name: &str, set: &str, collector_number: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "set": set,
            "set_name": format!("{} set", set.to_uppercase()),
            "collector_number": collector_number,
            "scryfall_uri": format!("https://scryfall.com/card/{}/{}", set, collector_number),
        })
    }

    /// Parsed card record with a release date.
    pub fn card(
        id: &str,
        name: &str,
        set: &str,
        collector_number: &str,
        released_at: &str,
    ) -> CardRecord {
        let mut value = card_json(id, name, set, collector_number);
        value["released_at"] = json!(released_at);
        serde_json::from_value(value).expect("fixture card is valid")
    }

    /// Double-faced card JSON, faces without images.
    pub fn double_faced_json(id: &str, front: &str, back: &str, set: &str) -> Value {
        let mut value = card_json(id, &format!("{} // {}", front, back), set, "1");
        value["card_faces"] = json!([{ "name": front }, { "name": back }]);
        value
    }

    /// Write a bulk snapshot file containing `cards`.
    pub fn write_bulk(path: &Path, cards: &[Value]) {
        let body = serde_json::to_vec(cards).expect("fixture cards serialize");
        std::fs::write(path, body).expect("write bulk snapshot");
    }
}
