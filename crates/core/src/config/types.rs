use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// On-disk cache layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Root directory holding the size subdirectories, the database and the bulk snapshot.
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
    /// Database file name, relative to `root`.
    #[serde(default = "default_db_file")]
    pub db_file: String,
    /// Bulk snapshot file name, relative to `root`.
    #[serde(default = "default_bulk_file")]
    pub bulk_file: String,
}

impl CacheConfig {
    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.db_file)
    }

    pub fn bulk_path(&self) -> PathBuf {
        self.root.join(&self.bulk_file)
    }

    /// Printing index cache file; the name embeds the format version.
    pub fn printing_index_path(&self, version: u32) -> PathBuf {
        self.root.join(format!("printings_v{}.json", version))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            db_file: default_db_file(),
            bulk_file: default_bulk_file(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("cache/card_images")
}

fn default_db_file() -> String {
    "images.db".to_string()
}

fn default_bulk_file() -> String {
    "bulk_data.json".to_string()
}

/// Remote card metadata / image CDN configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// API base URL (e.g., "https://api.scryfall.com")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Path of the bulk metadata endpoint, relative to `api_base_url`
    #[serde(default = "default_bulk_data_path")]
    pub bulk_data_path: String,
    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Timeout for the streamed bulk snapshot download in seconds (default: 120)
    #[serde(default = "default_bulk_timeout")]
    pub bulk_timeout_secs: u64,
    /// Write buffer size for the bulk snapshot stream (default: 8192)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl RemoteConfig {
    pub fn bulk_metadata_url(&self) -> String {
        format!(
            "{}{}",
            self.api_base_url.trim_end_matches('/'),
            self.bulk_data_path
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            bulk_data_path: default_bulk_data_path(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            bulk_timeout_secs: default_bulk_timeout(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.scryfall.com".to_string()
}

fn default_bulk_data_path() -> String {
    "/bulk-data/default-cards".to_string()
}

fn default_user_agent() -> String {
    format!("cardcache/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_bulk_timeout() -> u64 {
    120
}

fn default_chunk_size() -> usize {
    8192
}

/// Single-image download queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Concurrency ceiling for single-image downloads
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// A "successful" fetch slower than this must leave the image on disk
    #[serde(default = "default_slow_success_threshold")]
    pub slow_success_threshold_ms: u64,
    /// How long `stop` waits for the dispatch loop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
    /// Dispatch loop wake-up interval while idle
    #[serde(default = "default_dispatch_poll")]
    pub dispatch_poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            slow_success_threshold_ms: default_slow_success_threshold(),
            stop_timeout_ms: default_stop_timeout(),
            dispatch_poll_ms: default_dispatch_poll(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_slow_success_threshold() -> u64 {
    1500
}

fn default_stop_timeout() -> u64 {
    2000
}

fn default_dispatch_poll() -> u64 {
    500
}

/// Bulk snapshot handling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulkConfig {
    /// Age after which the snapshot is stale when the vendor omits freshness fields
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// Concurrency for `download_all_images`
    #[serde(default = "default_image_workers")]
    pub image_workers: usize,
}

impl BulkConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            image_workers: default_image_workers(),
        }
    }
}

fn default_max_age_days() -> u64 {
    7
}

fn default_image_workers() -> usize {
    10
}

/// How heavy jobs are executed
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Isolated worker process (re-executes the worker program)
    #[default]
    Process,
    /// Blocking task inside the current process
    Inline,
}

/// Out-of-process job configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub mode: JobMode,
    /// Worker executable; defaults to the current executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
    /// How often the watcher checks worker liveness
    #[serde(default = "default_job_poll")]
    pub poll_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            mode: JobMode::default(),
            worker_program: None,
            poll_interval_ms: default_job_poll(),
        }
    }
}

fn default_job_poll() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.root, PathBuf::from("cache/card_images"));
        assert_eq!(config.remote.api_base_url, "https://api.scryfall.com");
        assert_eq!(config.queue.max_concurrent_downloads, 10);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.initial_backoff_ms, 500);
        assert_eq!(config.bulk.max_age_days, 7);
        assert_eq!(config.jobs.mode, JobMode::Process);
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let toml = r#"
[cache]
root = "/data/cards"

[queue]
max_concurrent_downloads = 4

[jobs]
mode = "inline"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.root, PathBuf::from("/data/cards"));
        assert_eq!(config.cache.db_file, "images.db");
        assert_eq!(config.queue.max_concurrent_downloads, 4);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.jobs.mode, JobMode::Inline);
    }

    #[test]
    fn test_cache_paths() {
        let cache = CacheConfig {
            root: PathBuf::from("/tmp/cards"),
            ..Default::default()
        };
        assert_eq!(cache.db_path(), PathBuf::from("/tmp/cards/images.db"));
        assert_eq!(cache.bulk_path(), PathBuf::from("/tmp/cards/bulk_data.json"));
        assert_eq!(
            cache.printing_index_path(2),
            PathBuf::from("/tmp/cards/printings_v2.json")
        );
    }

    #[test]
    fn test_bulk_metadata_url_trims_trailing_slash() {
        let remote = RemoteConfig {
            api_base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            remote.bulk_metadata_url(),
            "http://localhost:8080/bulk-data/default-cards"
        );
    }

    #[test]
    fn test_bulk_max_age() {
        let bulk = BulkConfig::default();
        assert_eq!(bulk.max_age(), Duration::from_secs(7 * 86_400));
    }
}
