//! Atomic file replacement.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

/// Write `data` to a temp file beside `path`, sync it, then rename it over
/// `path`. Readers see either the old file or the complete new one.
pub fn write_bytes(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".cardcache.")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as compact JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let data = serde_json::to_vec(value)?;
    write_bytes(path, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_bytes_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.bin");
        write_bytes(&path, b"first").unwrap();
        write_bytes(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_json_is_compact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        write_json(&path, &serde_json::json!({"a": 1, "b": [1, 2]})).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"a":1,"b":[1,2]}"#);
    }
}
