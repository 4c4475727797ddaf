//! File digests and the poll-cycle diff
//!
//! A [`FileDigest`] fingerprints a file's state at a point in time as the
//! pair `(mtime in whole seconds, SHA-256 of the content)`. Two digests
//! are equal iff both fields are equal, so a rewrite that preserves the
//! bytes but bumps the mtime still registers as a change.
//!
//! [`diff`] implements the change-detection split used by the ServeActor:
//! additions and modifications are detected by fingerprint comparison
//! (robust to directory listing order), deletions by disappearance from
//! the listing (a fingerprint is meaningless for an absent file).

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::newtypes::FileName;

// ============================================================================
// FileDigest
// ============================================================================

/// Fingerprint of one file's state: modification time plus content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    /// POSIX modification time, whole seconds
    pub mtime_secs: i64,
    /// SHA-256 of the file content
    pub content_hash: [u8; 32],
}

impl FileDigest {
    /// Compute the digest of a file's bytes at the given modification time
    #[must_use]
    pub fn of_bytes(mtime_secs: i64, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            mtime_secs,
            content_hash: hasher.finalize().into(),
        }
    }
}

/// Mapping from file name to digest, covering every regular file under the
/// synced directory at the time of the last poll
///
/// Directories are never entries. Exclusively owned by the ServeActor;
/// rebuilt every poll cycle.
pub type DigestMap = HashMap<FileName, FileDigest>;

// ============================================================================
// diff
// ============================================================================

/// Outcome of comparing two consecutive poll cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestDiff {
    /// Files whose digest differs from (or is absent in) the previous map
    pub changed: BTreeSet<FileName>,
    /// Files present in the previous map but gone from the new listing
    pub deleted: BTreeSet<FileName>,
}

impl DigestDiff {
    /// True when neither set has entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Diff the previous cycle's digest map against the new listing and map
///
/// `changed` holds names from `new_files` whose entry in `new` differs
/// byte-for-byte from `old` (or has no entry in `old`). Names missing from
/// `new` (the file vanished between listing and digesting) are skipped;
/// they will either show up as deleted next cycle or be re-digested when
/// they reappear.
///
/// `deleted` holds names present in `old` but absent from `new_files`:
/// a listing difference, deliberately not digest-based.
#[must_use]
pub fn diff(old: &DigestMap, new_files: &[FileName], new: &DigestMap) -> DigestDiff {
    let mut changed = BTreeSet::new();
    for name in new_files {
        match (old.get(name), new.get(name)) {
            (Some(prev), Some(curr)) if prev == curr => {}
            (_, Some(_)) => {
                changed.insert(name.clone());
            }
            // Unreadable during this cycle; treated as absent.
            (_, None) => {}
        }
    }

    let deleted = old
        .keys()
        .filter(|name| !new_files.contains(name))
        .cloned()
        .collect();

    DigestDiff { changed, deleted }
}

// ============================================================================
// Unit tests
// ============================================================================
