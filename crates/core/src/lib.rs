pub mod atomic;
pub mod cache;
pub mod card;
pub mod config;
pub mod downloader;
pub mod jobs;
pub mod metrics;
pub mod printings;
pub mod queue;
pub mod service;
pub mod testing;

pub use cache::{
    CacheError, CacheStats, CardImageCache, ImageCache, ImageEntry, ImageRecord, ImageSize,
    PathResolver, RemoteMetadataRecord, SqliteImageStore,
};
pub use card::{BulkMetadata, CardFace, CardRecord};
pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, Config,
    ConfigError,
};
pub use downloader::{BulkDownload, BulkImageStats, BulkProgress, CardDownloader, DownloadError};
pub use jobs::{
    create_job_launcher, InlineJobRunner, JobError, JobHandle, JobKind, JobLauncher, JobOutcome,
    JobSpec, ProcessJobRunner,
};
pub use printings::{
    PrintingEntry, PrintingIndexError, PrintingIndexPayload, PrintingIndexStats,
    PRINTING_INDEX_VERSION,
};
pub use queue::{DownloadQueue, ImageFetcher, ImageRequest, NotFoundMemo, QueueEvent};
pub use service::{DataReadiness, EnsureOptions, ImageEvent, ImageService, ServiceError};
