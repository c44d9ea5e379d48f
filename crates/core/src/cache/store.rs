//! SQLite-backed image metadata store.
//!
//! Every operation opens its own connection so the store can be shared
//! freely between threads and worker processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use super::types::{
    CacheError, CacheStats, ImageEntry, ImageRecord, ImageSize, RemoteMetadataRecord,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const IMAGE_COLUMNS: &str = "uuid, face_index, name, set_code, collector_number, image_size, \
                             file_path, downloaded_at, scryfall_uri, artist";

/// Columns that may be carried over from a pre-face-index table.
const LEGACY_COLUMNS: [&str; 9] = [
    "uuid",
    "name",
    "set_code",
    "collector_number",
    "image_size",
    "file_path",
    "downloaded_at",
    "scryfall_uri",
    "artist",
];

/// Image metadata store backed by a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteImageStore {
    db_path: PathBuf,
}

impl SqliteImageStore {
    /// Open the store, creating the database and schema if needed and
    /// migrating tables written before multi-face support.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let store = Self {
            db_path: db_path.into(),
        };
        if let Some(parent) = store.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = store.connect()?;
        Self::initialize_schema(&mut conn)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, CacheError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn initialize_schema(conn: &mut Connection) -> Result<(), CacheError> {
        let tx = conn.transaction()?;
        Self::create_tables(&tx)?;
        if !Self::has_column(&tx, "card_images", "face_index")? {
            Self::migrate_face_index(&tx)?;
        }
        Self::create_indexes(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn create_tables(tx: &Transaction<'_>) -> Result<(), CacheError> {
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS card_images (
                uuid TEXT NOT NULL,
                face_index INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                set_code TEXT,
                collector_number TEXT,
                image_size TEXT NOT NULL,
                file_path TEXT NOT NULL,
                downloaded_at TEXT NOT NULL,
                scryfall_uri TEXT,
                artist TEXT,
                PRIMARY KEY (uuid, face_index, image_size)
            );

            CREATE TABLE IF NOT EXISTS bulk_data_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                downloaded_at TEXT NOT NULL,
                total_cards INTEGER NOT NULL,
                bulk_data_uri TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn create_indexes(tx: &Transaction<'_>) -> Result<(), CacheError> {
        tx.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_card_name ON card_images(name);
            CREATE INDEX IF NOT EXISTS idx_set_code ON card_images(set_code);
            "#,
        )?;
        Ok(())
    }

    fn table_columns(tx: &Transaction<'_>, table: &str) -> Result<Vec<String>, CacheError> {
        let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn has_column(tx: &Transaction<'_>, table: &str, column: &str) -> Result<bool, CacheError> {
        Ok(Self::table_columns(tx, table)?.iter().any(|c| c == column))
    }

    /// Rebuild `card_images` with the face-aware primary key. Existing rows
    /// become front faces (face_index 0). Runs inside the caller's transaction.
    fn migrate_face_index(tx: &Transaction<'_>) -> Result<(), CacheError> {
        info!("Migrating card_images table to multi-face schema");

        tx.execute_batch("ALTER TABLE card_images RENAME TO card_images_old")
            .map_err(|e| CacheError::Migration(e.to_string()))?;
        Self::create_tables(tx)?;

        let old_columns = Self::table_columns(tx, "card_images_old")?;
        let carried: Vec<&str> = LEGACY_COLUMNS
            .iter()
            .copied()
            .filter(|c| old_columns.iter().any(|o| o == c))
            .collect();
        let column_list = carried.join(", ");

        let copied = tx
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO card_images ({cols}, face_index) \
                     SELECT {cols}, 0 FROM card_images_old",
                    cols = column_list
                ),
                [],
            )
            .map_err(|e| CacheError::Migration(e.to_string()))?;

        tx.execute_batch("DROP TABLE card_images_old")
            .map_err(|e| CacheError::Migration(e.to_string()))?;

        info!(rows = copied, "card_images migration complete");
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ImageRecord> {
        let size_str: String = row.get(5)?;
        let downloaded_at_str: String = row.get(7)?;

        let size = size_str.parse::<ImageSize>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let downloaded_at = DateTime::parse_from_rfc3339(&downloaded_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        Ok(ImageRecord {
            identity: row.get(0)?,
            face_index: row.get(1)?,
            name: row.get(2)?,
            set_code: row.get(3)?,
            collector_number: row.get(4)?,
            size,
            file_path: row.get(6)?,
            downloaded_at,
            source_uri: row.get(8)?,
            artist: row.get(9)?,
        })
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ImageRecord>, CacheError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Insert or replace the row for (identity, face_index, size). The file
    /// path is stored in absolute form.
    pub fn add_image(&self, entry: &ImageEntry) -> Result<(), CacheError> {
        let file_path = absolute_path(&entry.file_path)?;
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO card_images ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                IMAGE_COLUMNS
            ),
            params![
                entry.identity,
                entry.face_index,
                entry.name,
                entry.set_code,
                entry.collector_number,
                entry.size.as_str(),
                file_path.to_string_lossy(),
                Utc::now().to_rfc3339(),
                entry.source_uri,
                entry.artist,
            ],
        )?;
        debug!(
            identity = %entry.identity,
            face_index = entry.face_index,
            size = %entry.size,
            "Recorded image"
        );
        Ok(())
    }

    /// Rows whose name matches case-insensitively, ordered by face index.
    pub fn get_rows_by_name(
        &self,
        name: &str,
        size: ImageSize,
    ) -> Result<Vec<ImageRecord>, CacheError> {
        self.query_records(
            &format!(
                "SELECT {} FROM card_images \
                 WHERE LOWER(name) = LOWER(?1) AND image_size = ?2 \
                 ORDER BY face_index",
                IMAGE_COLUMNS
            ),
            &[&name, &size.as_str()],
        )
    }

    /// Rows whose name matches a LIKE pattern (`\` escapes). At most one row.
    pub fn get_rows_by_name_pattern(
        &self,
        pattern: &str,
        size: ImageSize,
    ) -> Result<Vec<ImageRecord>, CacheError> {
        self.query_records(
            &format!(
                "SELECT {} FROM card_images \
                 WHERE LOWER(name) LIKE LOWER(?1) ESCAPE '\\' AND image_size = ?2 \
                 ORDER BY face_index LIMIT 1",
                IMAGE_COLUMNS
            ),
            &[&pattern, &size.as_str()],
        )
    }

    /// Rows for a remote identity, optionally restricted to one face.
    pub fn get_rows_by_identity(
        &self,
        identity: &str,
        size: ImageSize,
        face_index: Option<i64>,
    ) -> Result<Vec<ImageRecord>, CacheError> {
        match face_index {
            Some(face) => self.query_records(
                &format!(
                    "SELECT {} FROM card_images \
                     WHERE uuid = ?1 AND image_size = ?2 AND face_index = ?3",
                    IMAGE_COLUMNS
                ),
                &[&identity, &size.as_str(), &face],
            ),
            None => self.query_records(
                &format!(
                    "SELECT {} FROM card_images \
                     WHERE uuid = ?1 AND image_size = ?2 \
                     ORDER BY face_index",
                    IMAGE_COLUMNS
                ),
                &[&identity, &size.as_str()],
            ),
        }
    }

    /// Rows for one printing, matched by name and set code case-insensitively.
    pub fn get_rows_by_name_and_set(
        &self,
        name: &str,
        set_code: &str,
        size: ImageSize,
    ) -> Result<Vec<ImageRecord>, CacheError> {
        self.query_records(
            &format!(
                "SELECT {} FROM card_images \
                 WHERE LOWER(name) = LOWER(?1) AND LOWER(set_code) = LOWER(?2) \
                 AND image_size = ?3 \
                 ORDER BY face_index",
                IMAGE_COLUMNS
            ),
            &[&name, &set_code, &size.as_str()],
        )
    }

    /// Real face rows (face_index >= 0) for an identity, ascending.
    pub fn get_all_face_rows(
        &self,
        identity: &str,
        size: ImageSize,
    ) -> Result<Vec<ImageRecord>, CacheError> {
        self.query_records(
            &format!(
                "SELECT {} FROM card_images \
                 WHERE uuid = ?1 AND image_size = ?2 AND face_index >= 0 \
                 ORDER BY face_index",
                IMAGE_COLUMNS
            ),
            &[&identity, &size.as_str()],
        )
    }

    pub fn get_remote_metadata(&self) -> Result<Option<RemoteMetadataRecord>, CacheError> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT downloaded_at, total_cards, bulk_data_uri FROM bulk_data_meta WHERE id = 1",
                [],
                |row| {
                    Ok(RemoteMetadataRecord {
                        downloaded_at: row.get(0)?,
                        total_cards: row.get::<_, i64>(1)?.max(0) as u64,
                        source_uri: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Replace the single metadata row.
    pub fn upsert_remote_metadata(&self, record: &RemoteMetadataRecord) -> Result<(), CacheError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO bulk_data_meta (id, downloaded_at, total_cards, bulk_data_uri) \
             VALUES (1, ?1, ?2, ?3)",
            params![
                record.downloaded_at,
                record.total_cards as i64,
                record.source_uri
            ],
        )?;
        Ok(())
    }

    pub fn get_cache_stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.connect()?;
        let mut stats = CacheStats {
            unique_cards: conn
                .query_row("SELECT COUNT(DISTINCT uuid) FROM card_images", [], |row| {
                    row.get::<_, i64>(0)
                })?
                .max(0) as u64,
            ..Default::default()
        };

        let mut stmt =
            conn.prepare("SELECT image_size, COUNT(*) FROM card_images GROUP BY image_size")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (size, count) in counts {
            if let Ok(size) = size.parse::<ImageSize>() {
                stats.by_size.set(size, count.max(0) as u64);
            }
        }

        drop(stmt);
        if let Some(meta) = self.get_remote_metadata()? {
            stats.bulk_data_date = Some(meta.downloaded_at);
            stats.bulk_total_cards = Some(meta.total_cards);
        }
        Ok(stats)
    }
}

/// Make a path absolute against the working directory without requiring
/// it to exist.
pub(crate) fn absolute_path(path: &Path) -> Result<PathBuf, CacheError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
