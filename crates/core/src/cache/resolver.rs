//! Resolution of stored image paths into usable filesystem paths.
//!
//! Cache databases move between machines and operating systems, so a stored
//! path may be relative, use foreign separators, or carry a Windows drive
//! letter that has to be reached through a `/mnt/<drive>` mount.

use std::path::{Path, PathBuf};

use tracing::trace;

/// Turns stored path strings into paths that exist on this machine when
/// possible.
#[derive(Debug, Clone)]
pub struct PathResolver {
    cache_dir: PathBuf,
    roots: Vec<PathBuf>,
}

impl PathResolver {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        let cache_dir = make_absolute(cache_dir.as_ref());
        let roots = build_roots(&cache_dir);
        Self { cache_dir, roots }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Base directories tried, in order, for relative paths.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve a stored path. Falls back to the best-effort interpretation
    /// when nothing matching exists on disk.
    pub fn resolve(&self, stored: &str) -> PathBuf {
        let raw = stored.trim();
        if raw.is_empty() {
            return PathBuf::new();
        }

        let resolved = self.normalize(Path::new(raw));
        if resolved.exists() {
            return resolved;
        }

        if raw.contains('\\') {
            let forward = raw.replace('\\', "/");
            let candidate = self.normalize(Path::new(&forward));
            if candidate.exists() {
                return candidate;
            }

            if let Some(candidate) = foreign_windows_path(raw) {
                if candidate.exists() {
                    return candidate;
                }
            }

            if let Some(candidate) = drive_mount_path(raw) {
                if candidate.exists() {
                    return candidate;
                }
            }
        }

        trace!(stored = raw, "No existing file for stored path");
        resolved
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.roots
            .iter()
            .map(|root| root.join(path))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| path.to_path_buf())
    }
}

fn make_absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Working directory, cache dir, its parent and grandparent. Deduplicated,
/// order preserved.
fn build_roots(cache_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(4);
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }
    candidates.push(cache_dir.to_path_buf());
    if let Some(parent) = cache_dir.parent() {
        candidates.push(parent.to_path_buf());
        if let Some(grandparent) = parent.parent() {
            candidates.push(grandparent.to_path_buf());
        }
    }

    let mut roots: Vec<PathBuf> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !roots.contains(&candidate) {
            roots.push(candidate);
        }
    }
    roots
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Interpret `raw` as a Windows path and rebuild it with native separators.
#[cfg(windows)]
fn foreign_windows_path(raw: &str) -> Option<PathBuf> {
    Some(PathBuf::from(raw))
}

/// Interpret `raw` as a Windows path and rebuild it with native separators.
/// Drive-qualified paths are left to the mount translation.
#[cfg(not(windows))]
fn foreign_windows_path(raw: &str) -> Option<PathBuf> {
    if has_drive_prefix(raw) {
        return None;
    }
    let mut path = if raw.starts_with('\\') || raw.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    };
    for segment in raw.split(['\\', '/']).filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    Some(path)
}

#[cfg(windows)]
fn drive_mount_path(_raw: &str) -> Option<PathBuf> {
    None
}

/// `C:\cards\x.jpg` becomes `/mnt/c/cards/x.jpg`.
#[cfg(not(windows))]
fn drive_mount_path(raw: &str) -> Option<PathBuf> {
    if !has_drive_prefix(raw) {
        return None;
    }
    let drive = raw[..1].to_ascii_lowercase();
    let remainder = raw[3..].replace('\\', "/");
    Some(Path::new("/mnt").join(drive).join(remainder))
}
