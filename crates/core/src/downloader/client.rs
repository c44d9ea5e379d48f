//! HTTP client for card metadata, the bulk snapshot and image assets.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::types::{
    AssetOutcome, BulkDownload, BulkImageStats, BulkProgress, CardDownload, DownloadError,
    Freshness,
};
use crate::atomic;
use crate::cache::{ImageCache, ImageEntry, ImageSize, RemoteMetadataRecord, ALIAS_FACE_INDEX};
use crate::card::{image_url, BulkMetadata, CardRecord, ImageUris, SearchPage};
use crate::config::{BulkConfig, Config, RemoteConfig};
use crate::metrics;
use crate::queue::{ImageFetcher, ImageRequest};

/// Progress is reported every this many completed cards.
const PROGRESS_INTERVAL: usize = 100;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Deterministic file name for one face image.
pub fn face_file_name(identity: &str, face_index: i64, size: ImageSize) -> String {
    if face_index <= 0 {
        format!("{}.{}", identity, size.extension())
    } else {
        format!("{}-f{}.{}", identity, face_index, size.extension())
    }
}

/// Decide whether the local snapshot is stale.
///
/// Vendor metadata wins when both sides carry `updated_at` and the download
/// URI; otherwise the snapshot's age is compared against `max_age`.
/// `snapshot_age` is `None` when there is no snapshot.
pub fn assess_staleness(
    metadata: &BulkMetadata,
    record: Option<&RemoteMetadataRecord>,
    snapshot_age: Option<Duration>,
    max_age: Duration,
) -> (bool, String) {
    let Some(age) = snapshot_age else {
        return (true, "Bulk data cache not found".to_string());
    };

    let remote = metadata
        .updated_at
        .as_deref()
        .filter(|s| !s.is_empty())
        .zip(metadata.download_uri.as_deref().filter(|s| !s.is_empty()));
    let local = record.filter(|r| !r.downloaded_at.is_empty() && !r.source_uri.is_empty());
    if let (Some((updated_at, uri)), Some(local)) = (remote, local) {
        if local.downloaded_at == updated_at && local.source_uri == uri {
            return (false, "Bulk data matches vendor metadata".to_string());
        }
        return (true, format!("Vendor published newer bulk data ({})", updated_at));
    }

    let days = age.as_secs() / 86_400;
    if age < max_age {
        (false, format!("Bulk data is {} day(s) old", days))
    } else {
        (
            true,
            format!(
                "Bulk data is {} day(s) old (max {})",
                days,
                max_age.as_secs() / 86_400
            ),
        )
    }
}

fn snapshot_age(path: &Path) -> Option<Duration> {
    let metadata = std::fs::metadata(path).ok()?;
    Some(
        metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .unwrap_or(Duration::ZERO),
    )
}

/// Fetches card data and images from the remote API, writing results through
/// an [`ImageCache`].
pub struct CardDownloader {
    client: Client,
    bulk_client: Client,
    cache: Arc<dyn ImageCache>,
    api_base_url: String,
    metadata_url: String,
    bulk_path: PathBuf,
    bulk_timeout: Duration,
    chunk_size: usize,
    max_age: Duration,
    image_workers: usize,
}

impl CardDownloader {
    pub fn new(
        cache: Arc<dyn ImageCache>,
        remote: &RemoteConfig,
        bulk: &BulkConfig,
        bulk_path: PathBuf,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(&remote.user_agent)
            .timeout(remote.request_timeout())
            .build()?;

        // No total timeout: the snapshot is hundreds of MB. Stalls are caught
        // per chunk instead.
        let bulk_client = Client::builder()
            .user_agent(&remote.user_agent)
            .connect_timeout(remote.request_timeout())
            .build()?;

        Ok(Self {
            client,
            bulk_client,
            cache,
            api_base_url: remote.api_base_url.trim_end_matches('/').to_string(),
            metadata_url: remote.bulk_metadata_url(),
            bulk_path,
            bulk_timeout: remote.bulk_timeout(),
            chunk_size: remote.chunk_size.max(1),
            max_age: bulk.max_age(),
            image_workers: bulk.image_workers.max(1),
        })
    }

    pub fn from_config(cache: Arc<dyn ImageCache>, config: &Config) -> Result<Self, DownloadError> {
        Self::new(cache, &config.remote, &config.bulk, config.cache.bulk_path())
    }

    pub fn bulk_path(&self) -> &Path {
        &self.bulk_path
    }

    async fn check_status(response: Response, what: &str) -> Result<Response, DownloadError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DownloadError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            if message.is_empty() {
                message = status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string();
            }
            return Err(DownloadError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, DownloadError> {
        let response = Self::check_status(request.send().await?, what).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| DownloadError::Parse(format!("{}: {}", what, e)))
    }

    /// Fetch the bulk data metadata from the vendor.
    pub async fn fetch_bulk_metadata(&self) -> Result<BulkMetadata, DownloadError> {
        info!("Fetching bulk data metadata");
        self.send_json(self.client.get(&self.metadata_url), "bulk data metadata")
            .await
    }

    /// Compare the vendor metadata with the local snapshot.
    pub async fn check_freshness(&self) -> Result<Freshness, DownloadError> {
        let metadata = self.fetch_bulk_metadata().await?;
        let record = self.cache.get_remote_metadata()?;
        let (stale, reason) = assess_staleness(
            &metadata,
            record.as_ref(),
            snapshot_age(&self.bulk_path),
            self.max_age,
        );
        debug!(stale, reason = %reason, "Checked bulk data freshness");
        Ok(Freshness {
            stale,
            reason,
            metadata,
        })
    }

    /// Download the bulk snapshot unless the local copy matches the vendor.
    pub async fn download_bulk_data(&self, force: bool) -> Result<BulkDownload, DownloadError> {
        let result = self.download_bulk_data_inner(force).await;
        let label = match &result {
            Ok(BulkDownload::UpToDate) => "cached",
            Ok(BulkDownload::Downloaded { .. }) => "downloaded",
            Err(_) => "failed",
        };
        metrics::BULK_DOWNLOADS.with_label_values(&[label]).inc();
        result
    }

    async fn download_bulk_data_inner(&self, force: bool) -> Result<BulkDownload, DownloadError> {
        let metadata = self.fetch_bulk_metadata().await?;
        let download_uri = metadata
            .download_uri
            .clone()
            .filter(|uri| !uri.is_empty())
            .ok_or(DownloadError::NoDownloadUri)?;
        let remote_updated_at = metadata.updated_at.clone().filter(|s| !s.is_empty());

        if !force && self.bulk_path.exists() {
            if let (Some(updated_at), Some(record)) =
                (remote_updated_at.as_deref(), self.cache.get_remote_metadata()?)
            {
                if record.downloaded_at == updated_at && record.source_uri == download_uri {
                    info!("Using cached bulk data (vendor metadata is current)");
                    return Ok(BulkDownload::UpToDate);
                }
            }
        }

        info!(
            uri = %download_uri,
            size_mb = metadata.size.unwrap_or(0) as f64 / (1024.0 * 1024.0),
            "Downloading bulk data"
        );
        let response = self.bulk_client.get(&download_uri).send().await?;
        let response = Self::check_status(response, "bulk data").await?;

        let part = part_path(&self.bulk_path);
        let bytes = match self.stream_to_file(response, &part).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&part, &self.bulk_path).await?;

        // Card count is deferred; counting means parsing the whole file.
        self.cache.upsert_remote_metadata(&RemoteMetadataRecord {
            downloaded_at: remote_updated_at.unwrap_or_else(|| Utc::now().to_rfc3339()),
            total_cards: 0,
            source_uri: download_uri.clone(),
        })?;

        info!(bytes, "Bulk data downloaded");
        Ok(BulkDownload::Downloaded {
            source_uri: download_uri,
            bytes,
        })
    }

    async fn stream_to_file(&self, response: Response, path: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        let mut writer = tokio::io::BufWriter::with_capacity(self.chunk_size, file);
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = tokio::time::timeout(self.bulk_timeout, body.next())
                .await
                .map_err(|_| {
                    DownloadError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "bulk data stream stalled",
                    ))
                })?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        Ok(written)
    }

    /// Look up the card record a request refers to: by identity, then by
    /// set and collector number, then by exact name.
    pub async fn fetch_card(&self, request: &ImageRequest) -> Result<CardRecord, DownloadError> {
        let what = request.to_string();
        let builder = if let Some(identity) = request.identity() {
            self.client.get(format!(
                "{}/cards/{}",
                self.api_base_url,
                urlencoding::encode(identity)
            ))
        } else if let (Some(set), Some(number)) = (request.set_code(), request.collector_number())
        {
            self.client.get(format!(
                "{}/cards/{}/{}",
                self.api_base_url,
                urlencoding::encode(&set.to_lowercase()),
                urlencoding::encode(number)
            ))
        } else {
            let mut query = vec![("exact", request.card_name.trim().to_string())];
            if let Some(set) = request.set_code() {
                query.push(("set", set.to_lowercase()));
            }
            self.client
                .get(format!("{}/cards/named", self.api_base_url))
                .query(&query)
        };
        self.send_json(builder, &what).await
    }

    /// Resolve and download the image(s) for a request.
    pub async fn download_request(
        &self,
        request: &ImageRequest,
    ) -> Result<CardDownload, DownloadError> {
        if let Some(identity) = request.identity() {
            if let Some(path) = self
                .cache
                .get_image_by_identity(identity, request.size, Some(0))?
            {
                let mut download = CardDownload::default();
                download.record(0, AssetOutcome::Cached(path));
                return Ok(download);
            }
        }
        let card = self.fetch_card(request).await?;
        self.download_card(&card, request.size).await
    }

    /// Download every face of a card. Multi-faced cards also get an alias
    /// row for the combined name, written after all faces.
    pub async fn download_card(
        &self,
        card: &CardRecord,
        size: ImageSize,
    ) -> Result<CardDownload, DownloadError> {
        let name = card.display_name();
        let identity = card
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DownloadError::MissingIdentity(display_or_unknown(name).to_string()))?;

        let faces = card.faces();
        if !faces.iter().any(|face| face.image_uris.is_some()) {
            let outcome = self
                .download_face(card, identity, 0, name, card.image_uris.as_ref(), size)
                .await?;
            let mut download = CardDownload::default();
            download.record(0, outcome);
            return Ok(download);
        }

        let mut download = CardDownload::default();
        let mut first_error = None;
        for (index, face) in faces.iter().enumerate() {
            let face_index = index as i64;
            let face_name = face
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(name);
            match self
                .download_face(
                    card,
                    identity,
                    face_index,
                    face_name,
                    face.image_uris.as_ref(),
                    size,
                )
                .await
            {
                Ok(outcome) => download.record(face_index, outcome),
                Err(e) => {
                    debug!(card = name, face_index, error = %e, "Face download failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(front) = &download.front {
            if !name.is_empty() {
                self.cache.add_image(&ImageEntry {
                    identity: identity.to_string(),
                    face_index: ALIAS_FACE_INDEX,
                    name: name.to_string(),
                    set_code: card.set_code().to_string(),
                    collector_number: card.collector_number().to_string(),
                    size,
                    file_path: front.clone(),
                    source_uri: card.scryfall_uri.clone(),
                    artist: card.artist.clone(),
                })?;
            }
        }

        if download.downloaded + download.cached == 0 {
            return Err(first_error.unwrap_or_else(|| DownloadError::MissingImage {
                name: display_or_unknown(name).to_string(),
                size,
            }));
        }
        Ok(download)
    }

    async fn download_face(
        &self,
        card: &CardRecord,
        identity: &str,
        face_index: i64,
        name: &str,
        image_uris: Option<&ImageUris>,
        size: ImageSize,
    ) -> Result<AssetOutcome, DownloadError> {
        if let Some(path) = self
            .cache
            .get_image_by_identity(identity, size, Some(face_index))?
        {
            return Ok(AssetOutcome::Cached(path));
        }

        let url = image_url(image_uris, size).ok_or_else(|| DownloadError::MissingImage {
            name: display_or_unknown(name).to_string(),
            size,
        })?;

        let response = self.client.get(url).send().await?;
        let response = Self::check_status(response, &format!("{} image", name)).await?;
        let bytes = response.bytes().await?;

        let path = self
            .cache
            .cache_dir()
            .join(size.as_str())
            .join(face_file_name(identity, face_index, size));
        atomic::write_bytes(&path, &bytes)?;

        self.cache.add_image(&ImageEntry {
            identity: identity.to_string(),
            face_index,
            name: name.to_string(),
            set_code: card.set_code().to_string(),
            collector_number: card.collector_number().to_string(),
            size,
            file_path: path.clone(),
            source_uri: card.scryfall_uri.clone(),
            artist: card.artist.clone(),
        })?;

        debug!(card = name, face_index, size = %size, "Downloaded image");
        Ok(AssetOutcome::Downloaded(path))
    }

    /// Every printing of a card, newest first. A name the remote does not
    /// know has no printings.
    pub async fn fetch_printings_by_name(
        &self,
        name: &str,
    ) -> Result<Vec<CardRecord>, DownloadError> {
        let query = format!("!\"{}\"", name.trim());
        let mut request = self
            .client
            .get(format!("{}/cards/search", self.api_base_url))
            .query(&[
                ("q", query.as_str()),
                ("unique", "prints"),
                ("order", "released"),
            ]);

        let mut printings = Vec::new();
        loop {
            let page: SearchPage = match self.send_json(request, name).await {
                Ok(page) => page,
                Err(DownloadError::NotFound(_)) => break,
                Err(e) => return Err(e),
            };
            printings.extend(page.data);
            match page.next_page {
                Some(next) if page.has_more => request = self.client.get(next),
                _ => break,
            }
        }

        debug!(name, count = printings.len(), "Fetched printings");
        Ok(printings)
    }

    /// Download images for every card in the bulk snapshot.
    pub async fn download_all_images(
        &self,
        size: ImageSize,
        max_cards: Option<usize>,
        progress: Option<&(dyn Fn(BulkProgress) + Send + Sync)>,
    ) -> Result<BulkImageStats, DownloadError> {
        if !self.bulk_path.exists() {
            return Err(DownloadError::BulkDataMissing(self.bulk_path.clone()));
        }

        let bulk_path = self.bulk_path.clone();
        let mut cards = tokio::task::spawn_blocking(move || -> Result<Vec<CardRecord>, DownloadError> {
            let raw = std::fs::read(&bulk_path)?;
            Ok(serde_json::from_slice(&raw)?)
        })
        .await
        .map_err(|e| DownloadError::Io(std::io::Error::other(e)))??;

        if let Some(max) = max_cards {
            cards.truncate(max);
        }

        let mut stats = BulkImageStats {
            total: cards.len(),
            ..Default::default()
        };
        info!(total = stats.total, size = %size, "Starting bulk image download");

        let mut results = stream::iter(cards.iter())
            .map(|card| self.download_card(card, size))
            .buffer_unordered(self.image_workers);

        let mut completed = 0;
        while let Some(result) = results.next().await {
            completed += 1;
            match result {
                Ok(download) if download.already_cached() => stats.skipped += 1,
                Ok(_) => stats.downloaded += 1,
                Err(e) => {
                    stats.failed += 1;
                    debug!(error = %e, "Bulk image download failed");
                }
            }
            if completed % PROGRESS_INTERVAL == 0 {
                if let Some(progress) = progress {
                    progress(BulkProgress { completed, stats });
                }
            }
        }

        if stats.failed > 0 {
            warn!(failed = stats.failed, "Some images failed to download");
        }
        info!(
            downloaded = stats.downloaded,
            skipped = stats.skipped,
            failed = stats.failed,
            "Bulk image download complete"
        );
        Ok(stats)
    }
}

#[async_trait]
impl ImageFetcher for CardDownloader {
    async fn fetch(&self, request: &ImageRequest) -> Result<(), DownloadError> {
        self.download_request(request).await.map(|_| ())
    }
}

fn display_or_unknown(name: &str) -> &str {
    if name.is_empty() {
        "Unknown"
    } else {
        name
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CardImageCache;
    use crate::testing::{fixtures, StaticHttpServer, StaticResponse};
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        server: StaticHttpServer,
        cache: Arc<CardImageCache>,
        downloader: CardDownloader,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let server = StaticHttpServer::start().await.unwrap();
        let cache = Arc::new(CardImageCache::new(dir.path(), dir.path().join("images.db")).unwrap());
        let remote = RemoteConfig {
            api_base_url: server.base_url(),
            ..Default::default()
        };
        let downloader = CardDownloader::new(
            cache.clone(),
            &remote,
            &BulkConfig::default(),
            dir.path().join("bulk_data.json"),
        )
        .unwrap();
        Harness {
            _dir: dir,
            server,
            cache,
            downloader,
        }
    }

    fn metadata(uri: Option<&str>, updated_at: Option<&str>) -> BulkMetadata {
        BulkMetadata {
            download_uri: uri.map(str::to_string),
            updated_at: updated_at.map(str::to_string),
            size: None,
        }
    }

    fn record(updated_at: &str, uri: &str) -> RemoteMetadataRecord {
        RemoteMetadataRecord {
            downloaded_at: updated_at.to_string(),
            total_cards: 0,
            source_uri: uri.to_string(),
        }
    }

    const WEEK: Duration = Duration::from_secs(7 * 86_400);

    #[test]
    fn test_face_file_name() {
        assert_eq!(face_file_name("abc", 0, ImageSize::Normal), "abc.jpg");
        assert_eq!(face_file_name("abc", -1, ImageSize::Normal), "abc.jpg");
        assert_eq!(face_file_name("abc", 1, ImageSize::Png), "abc-f1.png");
    }

    #[test]
    fn test_staleness_missing_snapshot() {
        let (stale, _) = assess_staleness(
            &metadata(Some("u"), Some("t")),
            Some(&record("t", "u")),
            None,
            WEEK,
        );
        assert!(stale);
    }

    #[test]
    fn test_staleness_vendor_metadata_wins_over_age() {
        let meta = metadata(Some("https://x/a.json"), Some("2024-01-02"));
        let (stale, _) = assess_staleness(
            &meta,
            Some(&record("2024-01-02", "https://x/a.json")),
            Some(WEEK * 10),
            WEEK,
        );
        assert!(!stale);

        let (stale, _) = assess_staleness(
            &meta,
            Some(&record("2024-01-01", "https://x/a.json")),
            Some(Duration::ZERO),
            WEEK,
        );
        assert!(stale);
    }

    #[test]
    fn test_staleness_falls_back_to_age() {
        let meta = metadata(Some("https://x/a.json"), None);
        let (stale, _) = assess_staleness(&meta, None, Some(Duration::from_secs(60)), WEEK);
        assert!(!stale);
        let (stale, _) = assess_staleness(&meta, None, Some(WEEK * 2), WEEK);
        assert!(stale);
    }

    #[tokio::test]
    async fn test_download_bulk_data_then_reuse() {
        let h = harness().await;
        let bulk_body = serde_json::to_vec(&json!([fixtures::card_json(
            "uuid-bolt",
            "Lightning Bolt",
            "m11",
            "146"
        )]))
        .unwrap();
        h.server
            .route(
                "/bulk-data/default-cards",
                StaticResponse::json(&json!({
                    "download_uri": h.server.url("/files/bulk.json"),
                    "updated_at": "2024-01-01T00:00:00Z",
                    "size": bulk_body.len()
                })),
            )
            .await;
        h.server
            .route("/files/bulk.json", StaticResponse::bytes(bulk_body.clone()))
            .await;

        let first = h.downloader.download_bulk_data(false).await.unwrap();
        assert!(matches!(first, BulkDownload::Downloaded { bytes, .. } if bytes == bulk_body.len() as u64));
        assert_eq!(std::fs::read(h.downloader.bulk_path()).unwrap(), bulk_body);

        let meta = h.cache.get_remote_metadata().unwrap().unwrap();
        assert_eq!(meta.downloaded_at, "2024-01-01T00:00:00Z");
        assert_eq!(meta.total_cards, 0);

        let second = h.downloader.download_bulk_data(false).await.unwrap();
        assert_eq!(second, BulkDownload::UpToDate);
        assert_eq!(h.server.hit_count("/files/bulk.json").await, 1);

        let forced = h.downloader.download_bulk_data(true).await.unwrap();
        assert!(matches!(forced, BulkDownload::Downloaded { .. }));
        assert_eq!(h.server.hit_count("/files/bulk.json").await, 2);

        let freshness = h.downloader.check_freshness().await.unwrap();
        assert!(!freshness.stale);
    }

    #[tokio::test]
    async fn test_download_bulk_data_without_uri() {
        let h = harness().await;
        h.server
            .route("/bulk-data/default-cards", StaticResponse::json(&json!({})))
            .await;
        let err = h.downloader.download_bulk_data(false).await.unwrap_err();
        assert!(matches!(err, DownloadError::NoDownloadUri));
        assert!(!h.downloader.bulk_path().exists());
    }

    #[tokio::test]
    async fn test_download_request_by_name() {
        let h = harness().await;
        let mut card = fixtures::card_json("uuid-bolt", "Lightning Bolt", "m11", "146");
        card["image_uris"] = json!({"normal": h.server.url("/img/bolt.jpg")});
        h.server.route("/cards/named", StaticResponse::json(&card)).await;
        h.server
            .route("/img/bolt.jpg", StaticResponse::bytes(b"jpeg".to_vec()))
            .await;

        let request = ImageRequest::new("Lightning Bolt");
        let download = h.downloader.download_request(&request).await.unwrap();
        assert_eq!(download.downloaded, 1);

        let path = h
            .cache
            .get_image_path("lightning bolt", ImageSize::Normal)
            .unwrap()
            .unwrap();
        assert!(path.ends_with("normal/uuid-bolt.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");

        // Second run is served from the cache.
        let again = h
            .downloader
            .download_request(&request.clone().with_identity("uuid-bolt"))
            .await
            .unwrap();
        assert!(again.already_cached());
        assert_eq!(h.server.hit_count("/img/bolt.jpg").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_card_is_not_found() {
        let h = harness().await;
        let err = h
            .downloader
            .download_request(&ImageRequest::new("Mirrorpool").with_set("aeoe"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let h = harness().await;
        h.server
            .route("/cards/named", StaticResponse::status(429, "Too Many Requests"))
            .await;
        let err = h
            .downloader
            .download_request(&ImageRequest::new("Bolt"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Http { status: 429, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_multi_face_card_writes_faces_and_alias() {
        let h = harness().await;
        let card: CardRecord = serde_json::from_value(json!({
            "id": "uuid-delver",
            "name": "Delver of Secrets // Insectile Aberration",
            "set": "isd",
            "collector_number": "51",
            "card_faces": [
                {"name": "Delver of Secrets", "image_uris": {"normal": h.server.url("/img/front.jpg")}},
                {"name": "Insectile Aberration", "image_uris": {"normal": h.server.url("/img/back.jpg")}}
            ]
        }))
        .unwrap();
        h.server
            .route("/img/front.jpg", StaticResponse::bytes(b"front".to_vec()))
            .await;
        h.server
            .route("/img/back.jpg", StaticResponse::bytes(b"back".to_vec()))
            .await;

        let download = h.downloader.download_card(&card, ImageSize::Normal).await.unwrap();
        assert_eq!(download.downloaded, 2);

        let faces = h
            .cache
            .get_image_paths_by_identity("uuid-delver", ImageSize::Normal)
            .unwrap();
        assert_eq!(faces.len(), 2);
        assert!(faces[1].ends_with("uuid-delver-f1.jpg"));

        let combined = h
            .cache
            .get_image_path("Delver of Secrets // Insectile Aberration", ImageSize::Normal)
            .unwrap()
            .unwrap();
        assert_eq!(combined, faces[0]);
        let back = h
            .cache
            .get_image_path("Insectile Aberration", ImageSize::Normal)
            .unwrap()
            .unwrap();
        assert_eq!(back, faces[1]);
    }

    #[tokio::test]
    async fn test_missing_image_is_terminal() {
        let h = harness().await;
        let card: CardRecord = serde_json::from_value(json!({
            "id": "uuid-x",
            "name": "No Art",
            "image_uris": {"small": h.server.url("/img/small.jpg")}
        }))
        .unwrap();
        let err = h
            .downloader
            .download_card(&card, ImageSize::Large)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::MissingImage { size: ImageSize::Large, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_printings_follows_pages() {
        let h = harness().await;
        h.server
            .route(
                "/cards/search",
                StaticResponse::json(&json!({
                    "data": [fixtures::card_json("p2", "Opt", "dom", "60")],
                    "has_more": true,
                    "next_page": h.server.url("/cards/search/page2")
                })),
            )
            .await;
        h.server
            .route(
                "/cards/search/page2",
                StaticResponse::json(&json!({
                    "data": [fixtures::card_json("p1", "Opt", "inv", "64")],
                    "has_more": false
                })),
            )
            .await;

        let printings = h.downloader.fetch_printings_by_name("Opt").await.unwrap();
        let ids: Vec<_> = printings.iter().filter_map(|p| p.id.as_deref()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
    }

    #[tokio::test]
    async fn test_fetch_printings_unknown_name_is_empty() {
        let h = harness().await;
        let printings = h.downloader.fetch_printings_by_name("Nope").await.unwrap();
        assert!(printings.is_empty());
    }

    #[tokio::test]
    async fn test_download_all_images_counts_outcomes() {
        let h = harness().await;
        let mut with_image = fixtures::card_json("uuid-a", "Card A", "tst", "1");
        with_image["image_uris"] = json!({"normal": h.server.url("/img/a.jpg")});
        let without_image = fixtures::card_json("uuid-b", "Card B", "tst", "2");
        std::fs::write(
            h.downloader.bulk_path(),
            serde_json::to_vec(&json!([with_image, without_image])).unwrap(),
        )
        .unwrap();
        h.server
            .route("/img/a.jpg", StaticResponse::bytes(b"a".to_vec()))
            .await;

        let stats = h
            .downloader
            .download_all_images(ImageSize::Normal, None, None)
            .await
            .unwrap();
        assert_eq!(
            stats,
            BulkImageStats {
                total: 2,
                downloaded: 1,
                skipped: 0,
                failed: 1
            }
        );

        let again = h
            .downloader
            .download_all_images(ImageSize::Normal, Some(1), None)
            .await
            .unwrap();
        assert_eq!(again.total, 1);
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn test_download_all_images_requires_snapshot() {
        let h = harness().await;
        let err = h
            .downloader
            .download_all_images(ImageSize::Normal, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::BulkDataMissing(_)));
    }
}
