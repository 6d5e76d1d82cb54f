//! Hashing helpers, time formatting, and input validation.

use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{Result, VeritagError};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Regex for scan tokens and product ids: starts with alphanumeric, then up
/// to 127 more alphanumeric / hyphen / dot / underscore characters.  Issued
/// tokens are lowercase hex, but verification accepts anything in this shape
/// so that a scanned unknown identifier yields "not authentic" rather than a
/// validation error.
static TOKEN_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-_.]{0,127}$").unwrap()
});

/// Validate a scan-token (or product-id) format.
pub fn validate_token_id(token_id: &str) -> Result<()> {
    if token_id.is_empty() {
        return Err(VeritagError::Validation(
            "token id must not be empty".into(),
        ));
    }
    if !TOKEN_RE.is_match(token_id) {
        return Err(VeritagError::Validation(format!(
            "invalid token id '{}': 1-128 chars, alphanumeric/hyphen/dot/underscore",
            token_id
        )));
    }
    Ok(())
}

/// Validate a manufacturer-supplied product name.
pub fn validate_product_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(VeritagError::Validation(
            "product name must not be empty".into(),
        ));
    }
    if trimmed.len() > 256 {
        return Err(VeritagError::Validation(
            "product name exceeds 256 characters".into(),
        ));
    }
    Ok(())
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &std::path::Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(VeritagError::Validation(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(VeritagError::Validation(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// Maximum number of tokens allowed in a single registration batch.
pub const MAX_BATCH_TOKENS: usize = 10_000;

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("VERITAG_GIT_HASH");
pub const BUILD_TS: &str = env!("VERITAG_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("veritag v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
