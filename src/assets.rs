//! Content-addressed asset store.
//!
//! Assets (product images and similar binaries) are stored under their
//! SHA-256 hex digest.  The address is a deterministic function of the bytes,
//! so concurrent uploads of identical content converge on one object and a
//! retry of a crashed upload is a no-op.  Retrieval re-hashes the bytes and
//! fails on mismatch instead of serving altered content.  There is no update
//! or delete operation.

use std::path::{Path, PathBuf};

use rand::RngCore as _;
use tracing::debug;

use crate::error::{Result, VeritagError};
use crate::util;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Trait boundary for asset storage backends.
///
/// Production deployments may back this with an object store or IPFS-style
/// gateway; [`FsAssetStore`] keeps everything on the local filesystem.
pub trait AssetStore {
    /// Store `bytes` and return their content address (SHA-256 hex).
    fn put(&self, bytes: &[u8]) -> Result<String>;

    /// Retrieve the bytes for a content address.  Fails with
    /// [`VeritagError::NotFound`] if absent and with [`VeritagError::Asset`]
    /// if the stored bytes no longer match the address.
    fn get(&self, content_hash: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Filesystem implementation
// ---------------------------------------------------------------------------

/// Filesystem-backed content-addressed store.
///
/// Objects live at `<root>/<first two hex chars>/<full hash>` to keep
/// directory fan-out bounded.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, content_hash: &str) -> PathBuf {
        let shard = &content_hash[..2.min(content_hash.len())];
        self.root.join(shard).join(content_hash)
    }
}

impl AssetStore for FsAssetStore {
    fn put(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(VeritagError::Validation("asset bytes are empty".into()));
        }
        let hash = util::sha256_hex(bytes);
        let path = self.object_path(&hash);

        if path.exists() {
            // Content addressing makes the write idempotent.
            debug!(hash = %hash, "asset already staged");
            return Ok(hash);
        }

        let parent = path
            .parent()
            .ok_or_else(|| VeritagError::Asset(format!("no parent dir for {}", path.display())))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| VeritagError::Asset(format!("create dir {}: {e}", parent.display())))?;

        // Write to a per-writer temporary name first, then rename, so a
        // concurrent reader never observes a half-written object and
        // concurrent writers of the same content never share a staging file.
        let mut suffix = [0u8; 8];
        rand::rng().fill_bytes(&mut suffix);
        let tmp = parent.join(format!("{hash}.{}.tmp", hex::encode(suffix)));
        std::fs::write(&tmp, bytes)
            .map_err(|e| VeritagError::Asset(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| VeritagError::Asset(format!("rename {}: {e}", path.display())))?;

        debug!(hash = %hash, size = bytes.len(), "asset staged");
        Ok(hash)
    }

    fn get(&self, content_hash: &str) -> Result<Vec<u8>> {
        util::validate_token_id(content_hash)?;
        let path = self.object_path(content_hash);
        if !path.exists() {
            return Err(VeritagError::NotFound(format!(
                "asset {content_hash} not found"
            )));
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| VeritagError::Asset(format!("read {}: {e}", path.display())))?;

        // Integrity check: the address must still describe the content.
        let actual = util::sha256_hex(&bytes);
        if actual != content_hash {
            return Err(VeritagError::Asset(format!(
                "content hash mismatch for {content_hash}: stored bytes hash to {actual}"
            )));
        }
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Fill an externally-documented URL template (`{hash}` placeholder) with a
/// content address.  Returns `None` for an empty template — a retrievable
/// reference is never fabricated.
pub fn asset_url(template: &str, content_hash: &str) -> Option<String> {
    if template.is_empty() {
        return None;
    }
    Some(template.replace("{hash}", content_hash))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FsAssetStore::new(dir.path());
        let h1 = store.put(b"product image bytes").unwrap();
        let h2 = store.put(b"product image bytes").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.get(&h1).unwrap(), b"product image bytes");
    }

    #[test]
    fn distinct_content_distinct_hash() {
        let dir = tempdir().unwrap();
        let store = FsAssetStore::new(dir.path());
        let h1 = store.put(b"one").unwrap();
        let h2 = store.put(b"two").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn concurrent_identical_puts_converge() {
        let dir = tempdir().unwrap();
        let store = FsAssetStore::new(dir.path());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.put(b"shared product image").unwrap()
            }));
        }
        let hashes: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(hashes.iter().all(|h| h == &hashes[0]));
        assert_eq!(store.get(&hashes[0]).unwrap(), b"shared product image");

        // Every staging file was consumed by its rename; only the object
        // itself remains in its shard.
        let shard = dir.path().join(&hashes[0][..2]);
        let entries: Vec<_> = std::fs::read_dir(&shard)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].to_string_lossy(), hashes[0]);
    }

    #[test]
    fn missing_asset_not_found() {
        let dir = tempdir().unwrap();
        let store = FsAssetStore::new(dir.path());
        let err = store
            .get("0000000000000000000000000000000000000000000000000000000000000000")
            .unwrap_err();
        assert!(matches!(err, VeritagError::NotFound(_)));
    }

    #[test]
    fn tampered_asset_rejected() {
        let dir = tempdir().unwrap();
        let store = FsAssetStore::new(dir.path());
        let hash = store.put(b"original").unwrap();

        // Corrupt the stored object in place.
        let path = dir.path().join(&hash[..2]).join(&hash);
        std::fs::write(&path, b"tampered").unwrap();

        let err = store.get(&hash).unwrap_err();
        assert!(err.to_string().contains("content hash mismatch"));
    }

    #[test]
    fn empty_bytes_rejected() {
        let dir = tempdir().unwrap();
        let store = FsAssetStore::new(dir.path());
        assert!(store.put(b"").is_err());
    }

    #[test]
    fn url_template() {
        assert_eq!(
            asset_url("https://ipfs.io/ipfs/{hash}", "abc123"),
            Some("https://ipfs.io/ipfs/abc123".to_string())
        );
        assert_eq!(asset_url("", "abc123"), None);
    }
}
