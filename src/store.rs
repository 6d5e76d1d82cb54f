//! Mutable off-ledger metadata store.
//!
//! Keyed by product id, this store holds the rich product record the registry
//! deliberately does not: full metadata, asset references, and the
//! coordinator's registration status.  It is an enrichment layer only — it
//! never overrides the registry's authenticity verdict, and a record here
//! proves nothing by itself.
//!
//! Every record carries enough state (`status`, token set, optional commit
//! receipt) for a restarted coordinator to classify it: Pending records are
//! reconciled against the registry, Committed and Failed records are terminal.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ResultExt as _, VeritagError};
use crate::registry::CommitReceipt;
use crate::util;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Registration status of a stored batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Provisional record written before the registry commit was attempted.
    Pending,
    /// The registry durably accepted the batch; the receipt is stored.
    Committed,
    /// The registry commit failed or was abandoned.  Diagnostic only; never
    /// part of a verification verdict.
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = VeritagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "committed" => Ok(Self::Committed),
            "failed" => Ok(Self::Failed),
            other => Err(VeritagError::StoreUnavailable(format!(
                "unknown batch status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisional batch written by the coordinator before the registry commit.
#[derive(Debug, Clone)]
pub struct ProvisionalBatch {
    pub product_id: String,
    pub name: String,
    pub manufacturer: String,
    pub metadata: BTreeMap<String, String>,
    pub asset_ref: Option<String>,
    pub token_ids: Vec<String>,
}

/// Full stored record, status included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProduct {
    pub product_id: String,
    pub name: String,
    pub manufacturer: String,
    pub created_at_utc: String,
    pub metadata: BTreeMap<String, String>,
    pub asset_ref: Option<String>,
    pub status: BatchStatus,
    pub token_ids: Vec<String>,
    pub receipt: Option<CommitReceipt>,
    pub updated_at_utc: String,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Trait boundary for the metadata store.  The coordinator and resolver are
/// generic over this so tests can inject an unreachable store.
pub trait MetadataStore {
    fn upsert_provisional(&mut self, batch: &ProvisionalBatch) -> Result<()>;
    fn finalize(&mut self, product_id: &str, receipt: &CommitReceipt) -> Result<()>;
    fn mark_failed(&mut self, product_id: &str) -> Result<()>;
    fn find_by_token(&self, token_id: &str) -> Result<Option<StoredProduct>>;
    fn list_by_manufacturer(&self, manufacturer: &str) -> Result<Vec<StoredProduct>>;
    /// Pending records awaiting reconciliation after a crash.
    fn find_pending(&self) -> Result<Vec<StoredProduct>>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

pub struct SqliteMetadataStore {
    conn: Connection,
}

impl std::fmt::Debug for SqliteMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMetadataStore").finish_non_exhaustive()
    }
}

impl SqliteMetadataStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ctx_store("create store parent dir")?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| VeritagError::StoreUnavailable(format!(
                "open store db {}: {e}",
                db_path.display()
            )))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .ctx_store("set busy timeout")?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS products(
              product_id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              manufacturer TEXT NOT NULL,
              created_at_utc TEXT NOT NULL,
              metadata_json TEXT NOT NULL,
              asset_ref TEXT,
              status TEXT NOT NULL,
              commit_seq INTEGER,
              commit_hash TEXT,
              committed_at_utc TEXT,
              updated_at_utc TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS product_tokens(
              token_id TEXT PRIMARY KEY,
              product_id TEXT NOT NULL REFERENCES products(product_id),
              batch_pos INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_products_manufacturer
              ON products(manufacturer);
            CREATE INDEX IF NOT EXISTS idx_products_status
              ON products(status);
            CREATE INDEX IF NOT EXISTS idx_product_tokens_product
              ON product_tokens(product_id);
            "#,
        )
        .ctx_store("create store tables")?;
        Ok(Self { conn })
    }

    fn product_row(&self, product_id: &str) -> Result<Option<StoredProduct>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT product_id, name, manufacturer, created_at_utc, metadata_json,
                       asset_ref, status, commit_seq, commit_hash, committed_at_utc,
                       updated_at_utc
                FROM products WHERE product_id=?1
                "#,
                params![product_id],
                row_to_stored,
            )
            .optional()
            .ctx_store("select product")?;
        match row {
            Some(partial) => Ok(Some(self.attach_tokens(partial?)?)),
            None => Ok(None),
        }
    }

    fn attach_tokens(&self, mut product: StoredProduct) -> Result<StoredProduct> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT token_id FROM product_tokens WHERE product_id=?1 ORDER BY batch_pos ASC",
            )
            .ctx_store("prepare token select")?;
        let mut rows = stmt
            .query(params![product.product_id])
            .ctx_store("query tokens")?;
        while let Some(row) = rows.next().ctx_store("next token row")? {
            product.token_ids.push(row.get(0)?);
        }
        Ok(product)
    }

    fn collect_products(&self, sql: &str, bind: Option<&str>) -> Result<Vec<StoredProduct>> {
        let mut stmt = self.conn.prepare(sql).ctx_store("prepare product select")?;
        let mut rows = match bind {
            Some(v) => stmt.query(params![v]).ctx_store("query products")?,
            None => stmt.query([]).ctx_store("query products")?,
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next().ctx_store("next product row")? {
            let product = row_to_stored(row).ctx_store("read product row")??;
            out.push(self.attach_tokens(product)?);
        }
        Ok(out)
    }
}

type StoredRow = std::result::Result<Result<StoredProduct>, rusqlite::Error>;

fn row_to_stored(row: &rusqlite::Row<'_>) -> StoredRow {
    let metadata_json: String = row.get(4)?;
    let status_str: String = row.get(6)?;
    let commit_seq: Option<i64> = row.get(7)?;
    let commit_hash: Option<String> = row.get(8)?;
    let committed_at: Option<String> = row.get(9)?;
    Ok((|| {
        let metadata: BTreeMap<String, String> =
            serde_json::from_str(&metadata_json).ctx_store("parse stored metadata")?;
        let status = BatchStatus::from_str(&status_str)?;
        let receipt = match (commit_seq, commit_hash, committed_at) {
            (Some(seq), Some(hash), Some(ts)) => Some(CommitReceipt {
                seq,
                commit_hash_hex: hash,
                committed_at_utc: ts,
            }),
            _ => None,
        };
        Ok(StoredProduct {
            product_id: row.get(0)?,
            name: row.get(1)?,
            manufacturer: row.get(2)?,
            created_at_utc: row.get(3)?,
            metadata,
            asset_ref: row.get(5)?,
            status,
            token_ids: Vec::new(),
            receipt,
            updated_at_utc: row.get(10)?,
        })
    })())
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert_provisional(&mut self, batch: &ProvisionalBatch) -> Result<()> {
        util::validate_token_id(&batch.product_id)?;
        util::validate_product_name(&batch.name)?;
        let metadata_json =
            serde_json::to_string(&batch.metadata).ctx_store("serialize metadata")?;
        let now = util::now_utc_rfc3339();

        let tx = self.conn.transaction().ctx_store("begin tx")?;
        tx.execute(
            r#"
            INSERT INTO products(product_id, name, manufacturer, created_at_utc,
                                 metadata_json, asset_ref, status, updated_at_utc)
            VALUES (?1,?2,?3,?4,?5,?6,'pending',?7)
            ON CONFLICT(product_id) DO UPDATE SET
              name=excluded.name,
              manufacturer=excluded.manufacturer,
              metadata_json=excluded.metadata_json,
              asset_ref=excluded.asset_ref,
              status='pending',
              commit_seq=NULL,
              commit_hash=NULL,
              committed_at_utc=NULL,
              updated_at_utc=excluded.updated_at_utc
            "#,
            params![
                batch.product_id,
                batch.name,
                batch.manufacturer,
                now,
                metadata_json,
                batch.asset_ref,
                now,
            ],
        )
        .ctx_store("upsert provisional product")?;

        // A retried registration carries fresh tokens; the provisional token
        // set is replaced wholesale.
        tx.execute(
            "DELETE FROM product_tokens WHERE product_id=?1",
            params![batch.product_id],
        )
        .ctx_store("clear provisional tokens")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO product_tokens(token_id, product_id, batch_pos) VALUES (?1,?2,?3)",
                )
                .ctx_store("prepare token insert")?;
            for (pos, t) in batch.token_ids.iter().enumerate() {
                stmt.execute(params![t, batch.product_id, pos as i64])
                    .ctx_store("insert provisional token")?;
            }
        }
        tx.commit().ctx_store("commit tx")?;
        debug!(product_id = %batch.product_id, tokens = batch.token_ids.len(), "provisional record staged");
        Ok(())
    }

    fn finalize(&mut self, product_id: &str, receipt: &CommitReceipt) -> Result<()> {
        let updated = self
            .conn
            .execute(
                r#"
                UPDATE products
                SET status='committed', commit_seq=?2, commit_hash=?3,
                    committed_at_utc=?4, updated_at_utc=?5
                WHERE product_id=?1
                "#,
                params![
                    product_id,
                    receipt.seq,
                    receipt.commit_hash_hex,
                    receipt.committed_at_utc,
                    util::now_utc_rfc3339(),
                ],
            )
            .ctx_store("finalize product")?;
        if updated == 0 {
            return Err(VeritagError::NotFound(format!(
                "no metadata record for product {product_id}"
            )));
        }
        Ok(())
    }

    fn mark_failed(&mut self, product_id: &str) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE products SET status='failed', updated_at_utc=?2 WHERE product_id=?1",
                params![product_id, util::now_utc_rfc3339()],
            )
            .ctx_store("mark product failed")?;
        if updated == 0 {
            return Err(VeritagError::NotFound(format!(
                "no metadata record for product {product_id}"
            )));
        }
        Ok(())
    }

    fn find_by_token(&self, token_id: &str) -> Result<Option<StoredProduct>> {
        util::validate_token_id(token_id)?;
        let product_id: Option<String> = self
            .conn
            .query_row(
                "SELECT product_id FROM product_tokens WHERE token_id=?1",
                params![token_id],
                |row| row.get(0),
            )
            .optional()
            .ctx_store("find token")?;
        match product_id {
            Some(id) => self.product_row(&id),
            None => Ok(None),
        }
    }

    fn list_by_manufacturer(&self, manufacturer: &str) -> Result<Vec<StoredProduct>> {
        self.collect_products(
            r#"
            SELECT product_id, name, manufacturer, created_at_utc, metadata_json,
                   asset_ref, status, commit_seq, commit_hash, committed_at_utc,
                   updated_at_utc
            FROM products WHERE manufacturer=?1
            ORDER BY created_at_utc ASC
            "#,
            Some(manufacturer),
        )
    }

    fn find_pending(&self) -> Result<Vec<StoredProduct>> {
        self.collect_products(
            r#"
            SELECT product_id, name, manufacturer, created_at_utc, metadata_json,
                   asset_ref, status, commit_seq, commit_hash, committed_at_utc,
                   updated_at_utc
            FROM products WHERE status='pending'
            ORDER BY created_at_utc ASC
            "#,
            None,
        )
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn provisional(product_id: &str, tokens: &[&str]) -> ProvisionalBatch {
        ProvisionalBatch {
            product_id: product_id.to_string(),
            name: "Widget".to_string(),
            manufacturer: "acme".to_string(),
            metadata: BTreeMap::from([("batch".to_string(), "7".to_string())]),
            asset_ref: None,
            token_ids: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn receipt(seq: i64) -> CommitReceipt {
        CommitReceipt {
            seq,
            commit_hash_hex: format!("{:064x}", seq),
            committed_at_utc: util::now_utc_rfc3339(),
        }
    }

    #[test]
    fn provisional_then_finalize() {
        let dir = tempdir().unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("s.db")).unwrap();

        store
            .upsert_provisional(&provisional("prod-1", &["t1", "t2"]))
            .unwrap();
        let rec = store.find_by_token("t1").unwrap().unwrap();
        assert_eq!(rec.status, BatchStatus::Pending);
        assert!(rec.receipt.is_none());
        assert_eq!(rec.token_ids, vec!["t1", "t2"]);

        store.finalize("prod-1", &receipt(9)).unwrap();
        let rec = store.find_by_token("t2").unwrap().unwrap();
        assert_eq!(rec.status, BatchStatus::Committed);
        assert_eq!(rec.receipt.as_ref().unwrap().seq, 9);
    }

    #[test]
    fn retry_replaces_token_set() {
        let dir = tempdir().unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("s.db")).unwrap();

        store
            .upsert_provisional(&provisional("prod-1", &["old-1", "old-2"]))
            .unwrap();
        store
            .upsert_provisional(&provisional("prod-1", &["new-1", "new-2"]))
            .unwrap();

        assert!(store.find_by_token("old-1").unwrap().is_none());
        let rec = store.find_by_token("new-1").unwrap().unwrap();
        assert_eq!(rec.token_ids, vec!["new-1", "new-2"]);
        assert_eq!(rec.status, BatchStatus::Pending);
    }

    #[test]
    fn mark_failed_is_terminal_diagnostic() {
        let dir = tempdir().unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("s.db")).unwrap();

        store
            .upsert_provisional(&provisional("prod-1", &["t1"]))
            .unwrap();
        store.mark_failed("prod-1").unwrap();
        let rec = store.find_by_token("t1").unwrap().unwrap();
        assert_eq!(rec.status, BatchStatus::Failed);
        assert!(store.find_pending().unwrap().is_empty());
    }

    #[test]
    fn finalize_missing_product_errors() {
        let dir = tempdir().unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("s.db")).unwrap();
        let err = store.finalize("ghost", &receipt(1)).unwrap_err();
        assert!(matches!(err, VeritagError::NotFound(_)));
    }

    #[test]
    fn list_by_manufacturer_filters() {
        let dir = tempdir().unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("s.db")).unwrap();

        store
            .upsert_provisional(&provisional("prod-1", &["t1"]))
            .unwrap();
        let mut other = provisional("prod-2", &["t2"]);
        other.manufacturer = "globex".to_string();
        store.upsert_provisional(&other).unwrap();

        let acme = store.list_by_manufacturer("acme").unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].product_id, "prod-1");
        assert!(store.list_by_manufacturer("initech").unwrap().is_empty());
    }

    #[test]
    fn find_pending_lists_only_pending() {
        let dir = tempdir().unwrap();
        let mut store = SqliteMetadataStore::open(&dir.path().join("s.db")).unwrap();

        store
            .upsert_provisional(&provisional("prod-1", &["t1"]))
            .unwrap();
        store
            .upsert_provisional(&provisional("prod-2", &["t2"]))
            .unwrap();
        store.finalize("prod-2", &receipt(1)).unwrap();

        let pending = store.find_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].product_id, "prod-1");
    }
}
