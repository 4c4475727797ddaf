//! Local filesystem adapter for one synced directory
//!
//! All disk access for a session goes through [`LocalDir`], built on
//! `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Non-recursive**: only top-level regular files are synced;
//!   sub-directories are never descended into and never listed.
//! - **Atomic writes**: remote updates are applied via write-to-temp +
//!   rename so a crash mid-apply never leaves a partial file.
//! - **Absent over error**: digesting a file that disappeared or became
//!   unreadable between listing and reading yields `None`, not an error;
//!   the next poll cycle retries naturally.
//! - **Whole-second mtimes**: the wire contract carries POSIX seconds, so
//!   sub-second precision is dropped at the adapter boundary.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use pairsync_core::domain::digest::{DigestMap, FileDigest};
use pairsync_core::domain::newtypes::FileName;

/// Adapter for the synced directory on disk
///
/// Holds the canonical absolute path of one session's directory; every
/// operation takes file names relative to it.
#[derive(Debug, Clone)]
pub struct LocalDir {
    root: PathBuf,
}

impl LocalDir {
    /// Create an adapter over an already-canonicalized directory path
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The directory this adapter operates on
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &FileName) -> PathBuf {
        self.root.join(name)
    }

    /// Whether the directory still exists on disk
    pub async fn exists(&self) -> bool {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------
    // Listing and digesting
    // ------------------------------------------------------------------

    /// List the top-level regular files in the directory
    ///
    /// Entries that are not regular files (directories, symlinks to
    /// nothing) and names that are not valid [`FileName`]s are skipped.
    ///
    /// # Errors
    /// Returns an error if the directory itself cannot be read; callers
    /// skip the poll cycle rather than treating every file as deleted.
    pub async fn list_files(&self) -> Result<Vec<FileName>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read directory: {}", self.root.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(err) => {
                    debug!(path = ?entry.path(), error = %err, "skipping unstattable entry");
                    continue;
                }
            };
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().to_str().map(FileName::new) {
                Some(Ok(name)) => files.push(name),
                _ => {
                    warn!(path = ?entry.path(), "skipping file with unrepresentable name");
                }
            }
        }
        Ok(files)
    }

    /// Compute the digest of one file, or `None` if it cannot be read
    pub async fn digest(&self, name: &FileName) -> Option<FileDigest> {
        let path = self.path_of(name);
        let mtime_secs = mtime_secs_of(&path).await?;
        let bytes = tokio::fs::read(&path).await.ok()?;
        Some(FileDigest::of_bytes(mtime_secs, &bytes))
    }

    /// Build a digest map for the given names, omitting unreadable files
    pub async fn digest_map(&self, names: &[FileName]) -> DigestMap {
        let mut map = DigestMap::new();
        for name in names {
            if let Some(digest) = self.digest(name).await {
                map.insert(name.clone(), digest);
            }
        }
        map
    }

    // ------------------------------------------------------------------
    // Content access
    // ------------------------------------------------------------------

    /// Read a file's mtime and content for pushing, or `None` if unreadable
    pub async fn load(&self, name: &FileName) -> Option<(i64, Vec<u8>)> {
        let path = self.path_of(name);
        let mtime_secs = mtime_secs_of(&path).await?;
        let bytes = tokio::fs::read(&path).await.ok()?;
        Some((mtime_secs, bytes))
    }

    /// A file's mtime in whole seconds, or `None` if it cannot be statted
    pub async fn mtime_secs(&self, name: &FileName) -> Option<i64> {
        mtime_secs_of(&self.path_of(name)).await
    }

    /// Create or overwrite a file atomically (write-to-temp + rename)
    pub async fn write(&self, name: &FileName, content: &[u8]) -> Result<()> {
        let target = self.path_of(name);

        // Temp file in the same directory so the rename stays on one
        // filesystem and is atomic.
        let tmp_path = {
            let mut p = target.as_os_str().to_owned();
            p.push(".pairsync-tmp");
            PathBuf::from(p)
        };

        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("Failed to write temp file for: {}", target.display()))?;
        tokio::fs::rename(&tmp_path, &target)
            .await
            .with_context(|| format!("Failed to rename temp file into: {}", target.display()))?;

        debug!(path = %target.display(), bytes = content.len(), "file written");
        Ok(())
    }

    /// Remove a file; returns whether it existed
    ///
    /// Absence is not an error: a delete can race with the file already
    /// being gone.
    pub async fn remove(&self, name: &FileName) -> Result<bool> {
        let path = self.path_of(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "file removed");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to remove file: {}", path.display()))
            }
        }
    }
}

/// Stat a path's mtime in whole POSIX seconds
async fn mtime_secs_of(path: &Path) -> Option<i64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(since) => Some(since.as_secs() as i64),
        // Pre-epoch mtimes are negative seconds.
        Err(err) => Some(-(err.duration().as_secs() as i64)),
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn name(s: &str) -> FileName {
        FileName::new(s).unwrap()
    }

    fn local_dir(dir: &TempDir) -> LocalDir {
        LocalDir::new(dir.path().to_path_buf())
    }

    // ------------------------------------------------------------------
    // read / write roundtrip
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_write_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("hello.txt"), b"Hello, PairSync!").await.unwrap();

        let (mtime, bytes) = fs.load(&name("hello.txt")).await.unwrap();
        assert!(mtime > 0);
        assert_eq!(bytes, b"Hello, PairSync!");
    }

    #[tokio::test]
    async fn test_write_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("a.txt"), b"first").await.unwrap();
        fs.write(&name("a.txt"), b"second").await.unwrap();

        let (_, bytes) = fs.load(&name("a.txt")).await.unwrap();
        assert_eq!(bytes, b"second");
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("a.txt"), b"data").await.unwrap();

        let files = fs.list_files().await.unwrap();
        assert_eq!(files, vec![name("a.txt")]);
    }

    // ------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_remove_existing_file() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("bye.txt"), b"bye").await.unwrap();
        assert!(fs.remove(&name("bye.txt")).await.unwrap());
        assert!(fs.load(&name("bye.txt")).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_absent_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        assert!(!fs.remove(&name("ghost.txt")).await.unwrap());
    }

    // ------------------------------------------------------------------
    // listing
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("a.txt"), b"a").await.unwrap();
        tokio::fs::create_dir(dir.path().join("subdir")).await.unwrap();
        tokio::fs::write(dir.path().join("subdir").join("nested.txt"), b"n")
            .await
            .unwrap();

        let mut files = fs.list_files().await.unwrap();
        files.sort();
        assert_eq!(files, vec![name("a.txt")]);
    }

    #[tokio::test]
    async fn test_list_files_on_missing_directory_errors() {
        let dir = TempDir::new().unwrap();
        let fs = LocalDir::new(dir.path().join("nope"));

        assert!(fs.list_files().await.is_err());
    }

    #[tokio::test]
    async fn test_exists_tracks_directory() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);
        assert!(fs.exists().await);

        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(!LocalDir::new(path).exists().await);
    }

    // ------------------------------------------------------------------
    // digesting
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_digest_stable_for_unchanged_file() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("a.txt"), b"stable").await.unwrap();
        let d1 = fs.digest(&name("a.txt")).await.unwrap();
        let d2 = fs.digest(&name("a.txt")).await.unwrap();
        assert_eq!(d1, d2);
    }

    #[tokio::test]
    async fn test_digest_absent_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        assert!(fs.digest(&name("missing.txt")).await.is_none());
    }

    #[tokio::test]
    async fn test_digest_map_omits_unreadable_entries() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("real.txt"), b"real").await.unwrap();
        let names = [name("real.txt"), name("ghost.txt")];
        let map = fs.digest_map(&names).await;

        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&name("real.txt")));
    }

    #[tokio::test]
    async fn test_mtime_matches_digest_mtime() {
        let dir = TempDir::new().unwrap();
        let fs = local_dir(&dir);

        fs.write(&name("a.txt"), b"content").await.unwrap();
        let digest = fs.digest(&name("a.txt")).await.unwrap();
        let mtime = fs.mtime_secs(&name("a.txt")).await.unwrap();
        assert_eq!(digest.mtime_secs, mtime);
    }
}
