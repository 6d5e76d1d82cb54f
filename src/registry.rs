//! Tamper-evident, hash-chained, append-only SQLite authenticity registry.
//!
//! The registry is the single source of truth for authenticity: a scan token
//! is genuine iff it appears here.  Batch registration is atomic (one SQLite
//! immediate transaction per batch), commits form a hash chain whose links
//! double as durable commit receipts, and committed rows are never updated or
//! deleted.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension as _, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, ResultExt as _, VeritagError};
use crate::util;

pub const REGISTRY_SCHEMA_VERSION: i64 = 1;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryMeta {
    pub registry_id: Uuid,
    pub created_at_utc: String,
    pub schema_version: i64,
}

/// The authenticating fields the registry holds for a committed product.
/// Richer metadata lives in the off-ledger store; these fields are immutable
/// once committed and override any off-ledger copy on conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: String,
    pub name: String,
    pub manufacturer: String,
    pub created_at_utc: String,
    pub compact_metadata: BTreeMap<String, String>,
    pub commit_seq: i64,
    pub commit_hash_hex: String,
}

/// Input to one atomic batch registration.
#[derive(Debug, Clone)]
pub struct BatchInput {
    pub product_id: String,
    pub token_ids: Vec<String>,
    pub name: String,
    pub compact_metadata: BTreeMap<String, String>,
    pub manufacturer: String,
}

/// Durable proof that a batch was accepted into the registry's total order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub seq: i64,
    pub commit_hash_hex: String,
    pub committed_at_utc: String,
}

/// One link of the commit chain, as read back for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEntry {
    pub seq: i64,
    pub ts_utc: String,
    pub product_id: String,
    pub token_count: i64,
    pub batch_hash_hex: String,
    pub prev_hash_hex: String,
    pub commit_hash_hex: String,
}

// ---------------------------------------------------------------------------
// Registry trait
// ---------------------------------------------------------------------------

/// The two operations the rest of the system is allowed to ask of the
/// registry.  The coordinator and resolver are generic over this boundary so
/// that failure injection in tests does not need a real database.
pub trait AuthenticityRegistry {
    /// Atomically bind every token in the batch to one new product record.
    /// Either the whole batch commits or none of it does.
    fn register_batch(&mut self, input: &BatchInput) -> Result<CommitReceipt>;

    /// Point lookup.  `None` means the token was never committed, which is
    /// the sole authoritative signal for "not authentic".
    fn lookup(&self, token_id: &str) -> Result<Option<ProductRecord>>;
}

// ---------------------------------------------------------------------------
// SQLite registry
// ---------------------------------------------------------------------------

pub struct SqliteRegistry {
    conn: Connection,
    meta: RegistryMeta,
}

impl std::fmt::Debug for SqliteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRegistry")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

const SCHEMA_SQL: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=FULL;
    PRAGMA foreign_keys=ON;

    CREATE TABLE IF NOT EXISTS meta(
      k TEXT PRIMARY KEY,
      v TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS products(
      product_id TEXT PRIMARY KEY,
      name TEXT NOT NULL,
      manufacturer TEXT NOT NULL,
      created_at_utc TEXT NOT NULL,
      compact_metadata TEXT NOT NULL,
      commit_seq INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tokens(
      token_id TEXT PRIMARY KEY,
      product_id TEXT NOT NULL REFERENCES products(product_id),
      batch_pos INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS commits(
      seq INTEGER PRIMARY KEY,
      ts_utc TEXT NOT NULL,
      product_id TEXT NOT NULL,
      token_count INTEGER NOT NULL,
      batch_hash BLOB NOT NULL,
      prev_hash BLOB NOT NULL,
      commit_hash BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tokens_product ON tokens(product_id);
"#;

impl SqliteRegistry {
    pub fn create_new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VeritagError::Registry(format!("create db parent dir {}: {e}", parent.display()))
            })?;
        }

        let conn = open_connection(db_path)?;
        conn.execute_batch(SCHEMA_SQL).ctx_registry("create tables")?;

        // Never re-identify an already-initialized registry in place.  An
        // unreadable or unsupported one must surface through open_existing,
        // not be papered over with fresh metadata.
        let meta_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))
            .ctx_registry("check meta table")?;
        if meta_rows > 0 {
            return Err(VeritagError::Registry(format!(
                "refusing to initialize {}: registry metadata already present",
                db_path.display()
            )));
        }

        let meta = RegistryMeta {
            registry_id: Uuid::new_v4(),
            created_at_utc: util::now_utc_rfc3339(),
            schema_version: REGISTRY_SCHEMA_VERSION,
        };
        conn.execute(
            "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
            params!["registry_id", meta.registry_id.to_string()],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
            params!["created_at_utc", &meta.created_at_utc],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
            params!["schema_version", meta.schema_version.to_string()],
        )?;

        Ok(Self { conn, meta })
    }

    pub fn open_existing(db_path: &Path) -> Result<Self> {
        let conn = open_connection(db_path)?;

        let registry_id: String = conn
            .query_row("SELECT v FROM meta WHERE k='registry_id'", [], |row| {
                row.get(0)
            })
            .ctx_registry("read registry_id")?;
        let created_at_utc: String = conn
            .query_row("SELECT v FROM meta WHERE k='created_at_utc'", [], |row| {
                row.get(0)
            })
            .ctx_registry("read created_at_utc")?;
        let schema_version: i64 = conn
            .query_row("SELECT v FROM meta WHERE k='schema_version'", [], |row| {
                row.get::<_, String>(0)
            })
            .ctx_registry("read schema_version")?
            .parse()
            .ctx_registry("parse schema_version")?;

        if schema_version != REGISTRY_SCHEMA_VERSION {
            return Err(VeritagError::Registry(format!(
                "unsupported schema_version {schema_version} (expected {REGISTRY_SCHEMA_VERSION})"
            )));
        }

        let meta = RegistryMeta {
            registry_id: Uuid::parse_str(&registry_id).ctx_registry("parse registry_id uuid")?,
            created_at_utc,
            schema_version,
        };
        Ok(Self { conn, meta })
    }

    /// Open if the database file exists, create otherwise.  An existing
    /// database that fails to open is an error; it is never re-created.
    pub fn open_or_create(db_path: &Path) -> Result<Self> {
        if db_path.exists() {
            Self::open_existing(db_path)
        } else {
            Self::create_new(db_path)
        }
    }

    pub fn meta(&self) -> &RegistryMeta {
        &self.meta
    }

    pub fn latest_seq(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COALESCE(MAX(seq),0) FROM commits", [], |row| {
                row.get(0)
            })
            .ctx_registry("latest seq")
    }

    pub fn iter_commits(&self) -> Result<Vec<CommitEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT seq, ts_utc, product_id, token_count, batch_hash, prev_hash, commit_hash
                FROM commits
                ORDER BY seq ASC
                "#,
            )
            .ctx_registry("prepare select commits")?;

        let mut rows = stmt.query([]).ctx_registry("query commits")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().ctx_registry("next row")? {
            let batch_hash: Vec<u8> = row.get(4)?;
            let prev_hash: Vec<u8> = row.get(5)?;
            let commit_hash: Vec<u8> = row.get(6)?;
            out.push(CommitEntry {
                seq: row.get(0)?,
                ts_utc: row.get(1)?,
                product_id: row.get(2)?,
                token_count: row.get(3)?,
                batch_hash_hex: hex::encode(batch_hash),
                prev_hash_hex: hex::encode(prev_hash),
                commit_hash_hex: hex::encode(commit_hash),
            });
        }
        Ok(out)
    }

    /// The committed token sequence for a product, in batch order.
    pub fn tokens_for_product(&self, product_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT token_id FROM tokens WHERE product_id=?1 ORDER BY batch_pos ASC")
            .ctx_registry("prepare select tokens")?;
        let mut rows = stmt.query(params![product_id]).ctx_registry("query tokens")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().ctx_registry("next token row")? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    /// Verify every link of the commit hash chain, recomputing each batch
    /// hash from the products and tokens tables.
    pub fn verify_integrity(&self) -> Result<()> {
        let commits = self.iter_commits()?;
        let mut prev_hash = vec![0u8; 32];
        for c in &commits {
            let product = self
                .product_by_id(&c.product_id)?
                .ok_or_else(|| {
                    VeritagError::Registry(format!(
                        "commit seq {} references missing product {}",
                        c.seq, c.product_id
                    ))
                })?;
            let tokens = self.tokens_for_product(&c.product_id)?;
            if tokens.len() as i64 != c.token_count {
                return Err(VeritagError::Registry(format!(
                    "token count mismatch at seq {}: chain says {}, table has {}",
                    c.seq,
                    c.token_count,
                    tokens.len()
                )));
            }

            let batch_hash = batch_hash(
                &c.product_id,
                &product.name,
                &product.manufacturer,
                &product.created_at_utc,
                &product.compact_metadata,
                &tokens,
            )?;
            if hex::encode(batch_hash) != c.batch_hash_hex {
                return Err(VeritagError::Registry(format!(
                    "batch_hash mismatch at seq {}",
                    c.seq
                )));
            }
            if hex::encode(&prev_hash) != c.prev_hash_hex {
                return Err(VeritagError::Registry(format!(
                    "prev_hash mismatch at seq {}",
                    c.seq
                )));
            }

            let commit_hash = chain_hash(&prev_hash, &batch_hash);
            if hex::encode(commit_hash) != c.commit_hash_hex {
                return Err(VeritagError::Registry(format!(
                    "commit_hash mismatch at seq {}",
                    c.seq
                )));
            }

            prev_hash = commit_hash.to_vec();
        }
        Ok(())
    }

    fn product_by_id(&self, product_id: &str) -> Result<Option<ProductRecord>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT p.product_id, p.name, p.manufacturer, p.created_at_utc,
                       p.compact_metadata, p.commit_seq, c.commit_hash
                FROM products p
                JOIN commits c ON c.seq = p.commit_seq
                WHERE p.product_id = ?1
                "#,
                params![product_id],
                row_to_product,
            )
            .optional()
            .ctx_registry("select product")?;
        row.transpose()
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .map_err(|e| VeritagError::Registry(format!("open db {}: {e}", db_path.display())))?;
    // Concurrent registrars serialize on the write lock instead of erroring.
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .ctx_registry("set busy timeout")?;
    Ok(conn)
}

type ProductRow = std::result::Result<Result<ProductRecord>, rusqlite::Error>;

fn row_to_product(row: &rusqlite::Row<'_>) -> ProductRow {
    let metadata_json: String = row.get(4)?;
    let commit_hash: Vec<u8> = row.get(6)?;
    Ok((|| {
        let compact_metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
            .ctx_registry("parse compact metadata")?;
        Ok(ProductRecord {
            product_id: row.get(0)?,
            name: row.get(1)?,
            manufacturer: row.get(2)?,
            created_at_utc: row.get(3)?,
            compact_metadata,
            commit_seq: row.get(5)?,
            commit_hash_hex: hex::encode(commit_hash),
        })
    })())
}

impl AuthenticityRegistry for SqliteRegistry {
    fn register_batch(&mut self, input: &BatchInput) -> Result<CommitReceipt> {
        // Reject bad input before touching the database.
        if input.token_ids.is_empty() {
            return Err(VeritagError::EmptyBatch);
        }
        if input.token_ids.len() > util::MAX_BATCH_TOKENS {
            return Err(VeritagError::Validation(format!(
                "batch of {} tokens exceeds limit of {}",
                input.token_ids.len(),
                util::MAX_BATCH_TOKENS
            )));
        }
        util::validate_token_id(&input.product_id)?;
        util::validate_product_name(&input.name)?;
        for t in &input.token_ids {
            util::validate_token_id(t)?;
        }
        {
            let mut seen = std::collections::HashSet::with_capacity(input.token_ids.len());
            for t in &input.token_ids {
                if !seen.insert(t.as_str()) {
                    return Err(VeritagError::DuplicateToken(t.clone()));
                }
            }
        }

        let created_at_utc = util::now_utc_rfc3339();
        let metadata_json = serde_json::to_string(&input.compact_metadata)
            .ctx_registry("serialize compact metadata")?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_registry("begin tx")?;

        let product_exists: bool = tx
            .query_row(
                "SELECT 1 FROM products WHERE product_id=?1",
                params![input.product_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if product_exists {
            return Err(VeritagError::Registry(format!(
                "product {} already registered",
                input.product_id
            )));
        }

        // Namespace-wide uniqueness check, serialized by the immediate
        // transaction's write lock.
        {
            let mut stmt = tx
                .prepare("SELECT 1 FROM tokens WHERE token_id=?1")
                .ctx_registry("prepare token check")?;
            for t in &input.token_ids {
                let taken: bool = stmt
                    .query_row(params![t], |_| Ok(true))
                    .optional()?
                    .unwrap_or(false);
                if taken {
                    return Err(VeritagError::DuplicateToken(t.clone()));
                }
            }
        }

        let (last_seq, last_hash): (i64, Vec<u8>) = tx
            .query_row(
                "SELECT seq, commit_hash FROM commits ORDER BY seq DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unwrap_or((0, vec![0u8; 32]));
        let next_seq = last_seq + 1;

        let batch_hash = batch_hash(
            &input.product_id,
            &input.name,
            &input.manufacturer,
            &created_at_utc,
            &input.compact_metadata,
            &input.token_ids,
        )?;
        let commit_hash = chain_hash(&last_hash, &batch_hash);

        tx.execute(
            r#"
            INSERT INTO products(product_id, name, manufacturer, created_at_utc,
                                 compact_metadata, commit_seq)
            VALUES (?1,?2,?3,?4,?5,?6)
            "#,
            params![
                input.product_id,
                input.name,
                input.manufacturer,
                created_at_utc,
                metadata_json,
                next_seq,
            ],
        )
        .ctx_registry("insert product")?;

        {
            let mut stmt = tx
                .prepare("INSERT INTO tokens(token_id, product_id, batch_pos) VALUES (?1,?2,?3)")
                .ctx_registry("prepare token insert")?;
            for (pos, t) in input.token_ids.iter().enumerate() {
                stmt.execute(params![t, input.product_id, pos as i64])
                    .ctx_registry("insert token")?;
            }
        }

        tx.execute(
            r#"
            INSERT INTO commits(seq, ts_utc, product_id, token_count,
                                batch_hash, prev_hash, commit_hash)
            VALUES (?1,?2,?3,?4,?5,?6,?7)
            "#,
            params![
                next_seq,
                created_at_utc,
                input.product_id,
                input.token_ids.len() as i64,
                batch_hash.to_vec(),
                last_hash,
                commit_hash.to_vec(),
            ],
        )
        .ctx_registry("insert commit")?;

        tx.commit().ctx_registry("commit tx")?;

        info!(
            seq = next_seq,
            product_id = %input.product_id,
            tokens = input.token_ids.len(),
            "batch committed"
        );

        Ok(CommitReceipt {
            seq: next_seq,
            commit_hash_hex: hex::encode(commit_hash),
            committed_at_utc: created_at_utc,
        })
    }

    fn lookup(&self, token_id: &str) -> Result<Option<ProductRecord>> {
        util::validate_token_id(token_id)?;
        let row = self
            .conn
            .query_row(
                r#"
                SELECT p.product_id, p.name, p.manufacturer, p.created_at_utc,
                       p.compact_metadata, p.commit_seq, c.commit_hash
                FROM tokens t
                JOIN products p ON p.product_id = t.product_id
                JOIN commits c ON c.seq = p.commit_seq
                WHERE t.token_id = ?1
                "#,
                params![token_id],
                row_to_product,
            )
            .optional()
            .ctx_registry("lookup token")?;
        row.transpose()
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Deterministic digest of one batch's authenticating fields.  Metadata is a
/// `BTreeMap`, so key order is stable; tokens keep their issuance order.
fn batch_hash(
    product_id: &str,
    name: &str,
    manufacturer: &str,
    created_at_utc: &str,
    compact_metadata: &BTreeMap<String, String>,
    token_ids: &[String],
) -> Result<[u8; 32]> {
    let metadata_json =
        serde_json::to_string(compact_metadata).ctx_registry("serialize metadata for hash")?;
    let mut preimage = String::new();
    preimage.push_str("veritag.batch.v1\n");
    preimage.push_str(&format!("product_id={product_id}\n"));
    preimage.push_str(&format!("name={name}\n"));
    preimage.push_str(&format!("manufacturer={manufacturer}\n"));
    preimage.push_str(&format!("created_at_utc={created_at_utc}\n"));
    preimage.push_str(&format!("metadata={metadata_json}\n"));
    preimage.push_str("tokens=");
    for (i, t) in token_ids.iter().enumerate() {
        if i > 0 {
            preimage.push(',');
        }
        preimage.push_str(t);
    }
    preimage.push('\n');
    Ok(util::sha256(preimage.as_bytes()))
}

fn chain_hash(prev_hash: &[u8], batch_hash: &[u8; 32]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(prev_hash.len() + 32);
    preimage.extend_from_slice(prev_hash);
    preimage.extend_from_slice(batch_hash);
    util::sha256(&preimage)
}

// ---------------------------------------------------------------------------
// Backup / restore
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct RegistryExport {
    meta: RegistryMeta,
    products: Vec<ExportedProduct>,
    commits: Vec<CommitEntry>,
}

#[derive(Serialize, Deserialize)]
struct ExportedProduct {
    product_id: String,
    name: String,
    manufacturer: String,
    created_at_utc: String,
    compact_metadata: BTreeMap<String, String>,
    commit_seq: i64,
    token_ids: Vec<String>,
}

/// Export the full registry (meta + products + commit chain) to a JSON file.
pub fn export_registry_json(registry: &SqliteRegistry, out_path: &Path) -> Result<()> {
    let commits = registry.iter_commits()?;
    let mut products = Vec::with_capacity(commits.len());
    for c in &commits {
        let p = registry
            .product_by_id(&c.product_id)?
            .ok_or_else(|| {
                VeritagError::Registry(format!("export: missing product {}", c.product_id))
            })?;
        let token_ids = registry.tokens_for_product(&c.product_id)?;
        products.push(ExportedProduct {
            product_id: p.product_id,
            name: p.name,
            manufacturer: p.manufacturer,
            created_at_utc: p.created_at_utc,
            compact_metadata: p.compact_metadata,
            commit_seq: p.commit_seq,
            token_ids,
        });
    }

    let export = serde_json::json!({
        "format": "veritag-registry-backup-v1",
        "exported_at_utc": util::now_utc_rfc3339(),
        "meta": registry.meta(),
        "products": products,
        "commits": commits,
    });
    let json = serde_json::to_vec_pretty(&export)
        .map_err(|e| VeritagError::Registry(format!("serialize registry export: {e}")))?;
    std::fs::write(out_path, json)
        .map_err(|e| VeritagError::Registry(format!("write export {}: {e}", out_path.display())))?;
    info!(path = %out_path.display(), commits = commits.len(), "registry exported");
    Ok(())
}

/// Import a registry from a JSON backup into a new database.
///
/// Replays all products, tokens, and commit-chain links verbatim, then
/// verifies hash-chain integrity before handing the registry back.
pub fn import_registry_json(json_path: &Path, db_path: &Path) -> Result<SqliteRegistry> {
    let json_bytes = std::fs::read(json_path)
        .map_err(|e| VeritagError::Registry(format!("read import {}: {e}", json_path.display())))?;
    let export: RegistryExport = serde_json::from_slice(&json_bytes)
        .map_err(|e| VeritagError::Registry(format!("parse registry backup: {e}")))?;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| VeritagError::Registry(format!("create dir {}: {e}", parent.display())))?;
    }

    let conn = open_connection(db_path)?;
    conn.execute_batch(SCHEMA_SQL)
        .ctx_registry("create tables for import")?;

    let meta = export.meta;
    conn.execute(
        "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
        params!["registry_id", meta.registry_id.to_string()],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
        params!["created_at_utc", &meta.created_at_utc],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
        params!["schema_version", meta.schema_version.to_string()],
    )?;

    for p in &export.products {
        let metadata_json = serde_json::to_string(&p.compact_metadata)
            .ctx_registry("serialize imported metadata")?;
        conn.execute(
            r#"
            INSERT INTO products(product_id, name, manufacturer, created_at_utc,
                                 compact_metadata, commit_seq)
            VALUES (?1,?2,?3,?4,?5,?6)
            "#,
            params![
                p.product_id,
                p.name,
                p.manufacturer,
                p.created_at_utc,
                metadata_json,
                p.commit_seq,
            ],
        )
        .ctx_registry("insert imported product")?;
        for (pos, t) in p.token_ids.iter().enumerate() {
            conn.execute(
                "INSERT INTO tokens(token_id, product_id, batch_pos) VALUES (?1,?2,?3)",
                params![t, p.product_id, pos as i64],
            )
            .ctx_registry("insert imported token")?;
        }
    }

    for c in &export.commits {
        let batch_hash = hex::decode(&c.batch_hash_hex)
            .map_err(|e| VeritagError::Registry(format!("decode batch_hash: {e}")))?;
        let prev_hash = hex::decode(&c.prev_hash_hex)
            .map_err(|e| VeritagError::Registry(format!("decode prev_hash: {e}")))?;
        let commit_hash = hex::decode(&c.commit_hash_hex)
            .map_err(|e| VeritagError::Registry(format!("decode commit_hash: {e}")))?;
        conn.execute(
            r#"
            INSERT INTO commits(seq, ts_utc, product_id, token_count,
                                batch_hash, prev_hash, commit_hash)
            VALUES (?1,?2,?3,?4,?5,?6,?7)
            "#,
            params![
                c.seq,
                c.ts_utc,
                c.product_id,
                c.token_count,
                batch_hash,
                prev_hash,
                commit_hash,
            ],
        )
        .ctx_registry("insert imported commit")?;
    }

    let registry = SqliteRegistry { conn, meta };
    registry.verify_integrity()?;
    info!(commits = export.commits.len(), "registry imported and verified");
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
