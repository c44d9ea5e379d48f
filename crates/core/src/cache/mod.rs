//! Local card image cache.
//!
//! Images live under `<root>/<size>/`; their metadata lives in a SQLite
//! database next to them. Lookups only ever return paths that exist on disk.

mod resolver;
mod store;
mod types;

pub use resolver::PathResolver;
pub use store::SqliteImageStore;
pub use types::*;

use std::path::{Path, PathBuf};

use crate::config::CacheConfig;

/// Cache operations needed by the downloader and download queue.
pub trait ImageCache: Send + Sync {
    /// Root directory images are written under.
    fn cache_dir(&self) -> &Path;

    /// First on-disk image for a card name, with double-faced alias recovery.
    fn get_image_path(&self, name: &str, size: ImageSize) -> Result<Option<PathBuf>, CacheError>;

    /// On-disk image for one printing (name + set code).
    fn get_image_path_for_printing(
        &self,
        name: &str,
        set_code: &str,
        size: ImageSize,
    ) -> Result<Option<PathBuf>, CacheError>;

    /// On-disk image for an identity. `None` as face index means any face.
    fn get_image_by_identity(
        &self,
        identity: &str,
        size: ImageSize,
        face_index: Option<i64>,
    ) -> Result<Option<PathBuf>, CacheError>;

    /// True when a record exists and its file is on disk.
    fn is_cached(
        &self,
        identity: &str,
        size: ImageSize,
        face_index: Option<i64>,
    ) -> Result<bool, CacheError> {
        Ok(self
            .get_image_by_identity(identity, size, face_index)?
            .is_some())
    }

    fn add_image(&self, entry: &ImageEntry) -> Result<(), CacheError>;

    fn get_remote_metadata(&self) -> Result<Option<RemoteMetadataRecord>, CacheError>;

    fn upsert_remote_metadata(&self, record: &RemoteMetadataRecord) -> Result<(), CacheError>;
}

/// SQLite-backed image cache.
#[derive(Debug, Clone)]
pub struct CardImageCache {
    cache_dir: PathBuf,
    store: SqliteImageStore,
    resolver: PathResolver,
}

impl CardImageCache {
    /// Open a cache rooted at `cache_dir`, creating one subdirectory per
    /// image size.
    pub fn new(cache_dir: impl AsRef<Path>, db_path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let cache_dir = store::absolute_path(cache_dir.as_ref())?;
        for size in ImageSize::ALL {
            std::fs::create_dir_all(cache_dir.join(size.as_str()))?;
        }
        let store = SqliteImageStore::new(store::absolute_path(db_path.as_ref())?)?;
        let resolver = PathResolver::new(&cache_dir);
        Ok(Self {
            cache_dir,
            store,
            resolver,
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::new(&config.root, config.db_path())
    }

    pub fn store(&self) -> &SqliteImageStore {
        &self.store
    }

    pub fn db_path(&self) -> &Path {
        self.store.db_path()
    }

    /// Directory images of `size` are written to.
    pub fn size_dir(&self, size: ImageSize) -> PathBuf {
        self.cache_dir.join(size.as_str())
    }

    fn first_existing(&self, records: &[ImageRecord]) -> Option<PathBuf> {
        records
            .iter()
            .map(|record| self.resolver.resolve(&record.file_path))
            .find(|path| path.exists())
    }

    /// Match a single face name against stored `front // back` names.
    fn lookup_face_alias(&self, name: &str, size: ImageSize) -> Result<Option<PathBuf>, CacheError> {
        let alias = name.trim();
        if alias.is_empty() || alias.contains("//") {
            return Ok(None);
        }

        let escaped = escape_like(&alias.to_lowercase());
        for pattern in [format!("{} // %", escaped), format!("% // {}", escaped)] {
            let rows = self.store.get_rows_by_name_pattern(&pattern, size)?;
            if let Some(path) = self.first_existing(&rows[..rows.len().min(1)]) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// All on-disk face images for an identity, ordered by face index.
    /// The alias row is excluded.
    pub fn get_image_paths_by_identity(
        &self,
        identity: &str,
        size: ImageSize,
    ) -> Result<Vec<PathBuf>, CacheError> {
        Ok(self
            .store
            .get_all_face_rows(identity, size)?
            .iter()
            .map(|record| self.resolver.resolve(&record.file_path))
            .filter(|path| path.exists())
            .collect())
    }

    pub fn get_cache_stats(&self) -> Result<CacheStats, CacheError> {
        self.store.get_cache_stats()
    }
}

impl ImageCache for CardImageCache {
    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn get_image_path(&self, name: &str, size: ImageSize) -> Result<Option<PathBuf>, CacheError> {
        let rows = self.store.get_rows_by_name(name, size)?;
        if let Some(path) = self.first_existing(&rows[..rows.len().min(1)]) {
            return Ok(Some(path));
        }
        self.lookup_face_alias(name, size)
    }

    fn get_image_path_for_printing(
        &self,
        name: &str,
        set_code: &str,
        size: ImageSize,
    ) -> Result<Option<PathBuf>, CacheError> {
        let rows = self.store.get_rows_by_name_and_set(name, set_code, size)?;
        Ok(self.first_existing(&rows))
    }

    fn get_image_by_identity(
        &self,
        identity: &str,
        size: ImageSize,
        face_index: Option<i64>,
    ) -> Result<Option<PathBuf>, CacheError> {
        let rows = self.store.get_rows_by_identity(identity, size, face_index)?;
        Ok(self.first_existing(&rows[..rows.len().min(1)]))
    }

    fn add_image(&self, entry: &ImageEntry) -> Result<(), CacheError> {
        self.store.add_image(entry)
    }

    fn get_remote_metadata(&self) -> Result<Option<RemoteMetadataRecord>, CacheError> {
        self.store.get_remote_metadata()
    }

    fn upsert_remote_metadata(&self, record: &RemoteMetadataRecord) -> Result<(), CacheError> {
        self.store.upsert_remote_metadata(record)
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
