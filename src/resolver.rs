//! Verification resolver.
//!
//! Given a scan token, asks the registry (authoritative) and the metadata
//! store (supplementary) and merges both into one verdict.  The registry's
//! answer is final in both directions: an unknown token is not authentic no
//! matter what the store says, and a committed token stays authentic even if
//! the store is lagging, failed, or unreachable.  Store-side problems degrade
//! the result instead of failing it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::assets;
use crate::error::{Result, VeritagError};
use crate::registry::AuthenticityRegistry;
use crate::store::{BatchStatus, MetadataStore};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Derived verification verdict.  Never stored or cached: the registry is
/// re-checked on every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub authentic: bool,
    pub token_id: String,
    pub product_id: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub created_at_utc: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub asset_ref: Option<String>,
    pub asset_url: Option<String>,
    pub commit_seq: Option<i64>,
}

impl VerificationResult {
    /// The minimal "not authentic" result.  No product data is disclosed for
    /// unknown tokens, so near-miss identifiers leak nothing.
    fn unknown(token_id: &str) -> Self {
        Self {
            authentic: false,
            token_id: token_id.to_string(),
            product_id: None,
            name: None,
            manufacturer: None,
            created_at_utc: None,
            metadata: BTreeMap::new(),
            asset_ref: None,
            asset_url: None,
            commit_seq: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    /// `{hash}` template used to turn an asset reference into a URL.  Empty
    /// means asset URLs are omitted.
    asset_url_template: String,
}

impl Resolver {
    pub fn new(asset_url_template: &str) -> Self {
        Self {
            asset_url_template: asset_url_template.to_string(),
        }
    }

    /// Resolve one token into a verdict.  Read-only and idempotent; safe for
    /// unbounded parallel callers.
    pub fn verify<R, M>(&self, registry: &R, store: &M, token_id: &str) -> Result<VerificationResult>
    where
        R: AuthenticityRegistry,
        M: MetadataStore,
    {
        // Registry first; its absence verdict is final.  A scanned string
        // that is not even token-shaped (a URL, embedded whitespace, over
        // length) can never have been issued, so it resolves to the same
        // not-authentic verdict instead of a hard error.
        let record = match registry.lookup(token_id) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(VerificationResult::unknown(token_id)),
            Err(VeritagError::Validation(_)) => {
                return Ok(VerificationResult::unknown(token_id))
            }
            Err(e) => return Err(e),
        };

        // Enrichment is best-effort.  A missing, failed, or unreadable store
        // record degrades the result to registry-held fields only.
        let enrichment = match store.find_by_token(token_id) {
            Ok(Some(stored)) if stored.status == BatchStatus::Committed => Some(stored),
            Ok(Some(stored)) => {
                warn!(
                    token = %token_id,
                    status = %stored.status,
                    "store record not committed; ignoring for enrichment"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(token = %token_id, error = %e, "metadata store unavailable; degrading");
                None
            }
        };

        // Merge: start from the store's richer copy, then overwrite with the
        // registry's authoritative fields so a stale or compromised store can
        // never alter what was committed.
        let mut metadata = enrichment
            .as_ref()
            .map(|s| s.metadata.clone())
            .unwrap_or_default();
        for (k, v) in &record.compact_metadata {
            metadata.insert(k.clone(), v.clone());
        }
        let asset_ref = enrichment.as_ref().and_then(|s| s.asset_ref.clone());
        let asset_url = asset_ref
            .as_deref()
            .and_then(|h| assets::asset_url(&self.asset_url_template, h));

        Ok(VerificationResult {
            authentic: true,
            token_id: token_id.to_string(),
            product_id: Some(record.product_id),
            name: Some(record.name),
            manufacturer: Some(record.manufacturer),
            created_at_utc: Some(record.created_at_utc),
            metadata,
            asset_ref,
            asset_url,
            commit_seq: Some(record.commit_seq),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VeritagError;
    use crate::registry::{AuthenticityRegistry, BatchInput, SqliteRegistry};
    use crate::store::{MetadataStore as _, ProvisionalBatch, SqliteMetadataStore, StoredProduct};
    use tempfile::tempdir;

    fn registered_fixture() -> (tempfile::TempDir, SqliteRegistry, SqliteMetadataStore) {
        let dir = tempdir().unwrap();
        let mut registry = SqliteRegistry::create_new(&dir.path().join("registry.db")).unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("store.db")).unwrap();

        let receipt = registry
            .register_batch(&BatchInput {
                product_id: "prod-1".to_string(),
                token_ids: vec!["tok-1".to_string(), "tok-2".to_string()],
                name: "Widget".to_string(),
                compact_metadata: BTreeMap::from([("color".to_string(), "red".to_string())]),
                manufacturer: "acme".to_string(),
            })
            .unwrap();

        store
            .upsert_provisional(&ProvisionalBatch {
                product_id: "prod-1".to_string(),
                name: "Widget".to_string(),
                manufacturer: "acme".to_string(),
                metadata: BTreeMap::from([
                    ("color".to_string(), "blue".to_string()), // stale conflict
                    ("weight".to_string(), "2kg".to_string()),
                ]),
                asset_ref: Some("aabbcc".to_string()),
                token_ids: vec!["tok-1".to_string(), "tok-2".to_string()],
            })
            .unwrap();
        store.finalize("prod-1", &receipt).unwrap();

        (dir, registry, store)
    }

    #[test]
    fn unknown_token_not_authentic_and_minimal() {
        let (_dir, registry, store) = registered_fixture();
        let resolver = Resolver::default();
        let res = resolver.verify(&registry, &store, "nope-123").unwrap();
        assert!(!res.authentic);
        assert!(res.product_id.is_none());
        assert!(res.name.is_none());
        assert!(res.metadata.is_empty());
    }

    #[test]
    fn committed_token_authentic_with_merged_metadata() {
        let (_dir, registry, store) = registered_fixture();
        let resolver = Resolver::new("https://assets.example/{hash}");
        let res = resolver.verify(&registry, &store, "tok-1").unwrap();

        assert!(res.authentic);
        assert_eq!(res.product_id.as_deref(), Some("prod-1"));
        assert_eq!(res.name.as_deref(), Some("Widget"));
        // Registry copy wins the conflict; store-only keys survive.
        assert_eq!(res.metadata.get("color").unwrap(), "red");
        assert_eq!(res.metadata.get("weight").unwrap(), "2kg");
        assert_eq!(res.asset_ref.as_deref(), Some("aabbcc"));
        assert_eq!(
            res.asset_url.as_deref(),
            Some("https://assets.example/aabbcc")
        );
    }

    #[test]
    fn malformed_scanned_identifier_not_authentic() {
        let (_dir, registry, store) = registered_fixture();
        let resolver = Resolver::default();

        let over_length = "x".repeat(200);
        let scans = [
            "http://localhost:3000/verify/abc",
            "has space",
            over_length.as_str(),
        ];
        for scanned in scans {
            let res = resolver.verify(&registry, &store, scanned).unwrap();
            assert!(!res.authentic, "{scanned:?} must not verify");
            assert!(res.product_id.is_none());
            assert!(res.metadata.is_empty());
        }
    }

    #[test]
    fn no_url_without_template() {
        let (_dir, registry, store) = registered_fixture();
        let resolver = Resolver::default();
        let res = resolver.verify(&registry, &store, "tok-1").unwrap();
        assert!(res.asset_url.is_none());
        assert_eq!(res.asset_ref.as_deref(), Some("aabbcc"));
    }

    #[test]
    fn degrades_when_store_unavailable() {
        struct DownStore;
        impl crate::store::MetadataStore for DownStore {
            fn upsert_provisional(&mut self, _b: &ProvisionalBatch) -> crate::error::Result<()> {
                Err(VeritagError::StoreUnavailable("down".into()))
            }
            fn finalize(
                &mut self,
                _p: &str,
                _r: &crate::registry::CommitReceipt,
            ) -> crate::error::Result<()> {
                Err(VeritagError::StoreUnavailable("down".into()))
            }
            fn mark_failed(&mut self, _p: &str) -> crate::error::Result<()> {
                Err(VeritagError::StoreUnavailable("down".into()))
            }
            fn find_by_token(&self, _t: &str) -> crate::error::Result<Option<StoredProduct>> {
                Err(VeritagError::StoreUnavailable("down".into()))
            }
            fn list_by_manufacturer(
                &self,
                _m: &str,
            ) -> crate::error::Result<Vec<StoredProduct>> {
                Err(VeritagError::StoreUnavailable("down".into()))
            }
            fn find_pending(&self) -> crate::error::Result<Vec<StoredProduct>> {
                Err(VeritagError::StoreUnavailable("down".into()))
            }
        }

        let (_dir, registry, _store) = registered_fixture();
        let resolver = Resolver::default();
        let res = resolver.verify(&registry, &DownStore, "tok-2").unwrap();

        // Ledger confirms authenticity even though enrichment is gone.
        assert!(res.authentic);
        assert_eq!(res.name.as_deref(), Some("Widget"));
        assert_eq!(res.manufacturer.as_deref(), Some("acme"));
        // Registry-held compact metadata still present; store-only keys absent.
        assert_eq!(res.metadata.get("color").unwrap(), "red");
        assert!(res.metadata.get("weight").is_none());
        assert!(res.asset_ref.is_none());
    }

    #[test]
    fn failed_store_record_never_enriches() {
        let dir = tempdir().unwrap();
        let mut registry = SqliteRegistry::create_new(&dir.path().join("r.db")).unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("s.db")).unwrap();

        registry
            .register_batch(&BatchInput {
                product_id: "prod-1".to_string(),
                token_ids: vec!["tok-1".to_string()],
                name: "Widget".to_string(),
                compact_metadata: BTreeMap::new(),
                manufacturer: "acme".to_string(),
            })
            .unwrap();

        // A Failed store record that (anomalously) shares the token.
        store
            .upsert_provisional(&ProvisionalBatch {
                product_id: "prod-1".to_string(),
                name: "Widget".to_string(),
                manufacturer: "acme".to_string(),
                metadata: BTreeMap::from([("weight".to_string(), "2kg".to_string())]),
                asset_ref: None,
                token_ids: vec!["tok-1".to_string()],
            })
            .unwrap();
        store.mark_failed("prod-1").unwrap();

        let resolver = Resolver::default();
        let res = resolver.verify(&registry, &store, "tok-1").unwrap();
        assert!(res.authentic);
        assert!(res.metadata.get("weight").is_none());
    }
}
