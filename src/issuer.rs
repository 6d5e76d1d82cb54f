//! Scan-token issuance for registration batches.
//!
//! Issued tokens carry 128 bits of entropy (32 lowercase hex chars), so a
//! collision inside the registry is cryptographically negligible.  Uniqueness
//! is nevertheless enforced downstream by the registry, not here: issuance is
//! pure generation with no side effects, and a batch whose commit fails must
//! discard its tokens rather than reuse them.

use rand::{RngCore as _, SeedableRng as _};

use crate::error::{Result, VeritagError};

/// Bytes of entropy per scan token (hex-encoded to twice this length).
pub const TOKEN_ENTROPY_BYTES: usize = 16;

/// Bytes of entropy per product id.
pub const PRODUCT_ID_BYTES: usize = 8;

// ---------------------------------------------------------------------------
// Issuer trait
// ---------------------------------------------------------------------------

/// Trait that every token issuer must implement.
///
/// Production uses [`RandomTokenIssuer`] (OS entropy).  Deterministic tests
/// use [`SeededTokenIssuer`], which also makes forced-collision scenarios
/// reproducible.
pub trait TokenIssuer {
    /// Generate `count` distinct scan tokens.  Fails with a validation error
    /// when `count` is zero.
    fn issue(&mut self, count: usize) -> Result<Vec<String>>;

    /// Generate a fresh opaque product id.
    fn new_product_id(&mut self) -> String;
}

fn check_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(VeritagError::Validation(
            "token count must be at least 1".into(),
        ));
    }
    if count > crate::util::MAX_BATCH_TOKENS {
        return Err(VeritagError::Validation(format!(
            "token count {count} exceeds batch limit of {}",
            crate::util::MAX_BATCH_TOKENS
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OS-entropy issuer
// ---------------------------------------------------------------------------

/// Issues tokens from the operating system's entropy source.
#[derive(Debug, Default)]
pub struct RandomTokenIssuer;

impl TokenIssuer for RandomTokenIssuer {
    fn issue(&mut self, count: usize) -> Result<Vec<String>> {
        check_count(count)?;
        let mut rng = rand::rng();
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let mut buf = [0u8; TOKEN_ENTROPY_BYTES];
            rng.fill_bytes(&mut buf);
            out.push(hex::encode(buf));
        }
        Ok(out)
    }

    fn new_product_id(&mut self) -> String {
        let mut buf = [0u8; PRODUCT_ID_BYTES];
        rand::rng().fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

// ---------------------------------------------------------------------------
// Seeded issuer (deterministic, for tests and benchmarks)
// ---------------------------------------------------------------------------

/// A deterministic issuer for development and CI.  Two issuers constructed
/// with the same seed emit the same token sequence, which makes the
/// coordinator's duplicate-retry path testable.
#[derive(Debug)]
pub struct SeededTokenIssuer {
    rng: rand::rngs::StdRng,
}

impl SeededTokenIssuer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }
}

impl TokenIssuer for SeededTokenIssuer {
    fn issue(&mut self, count: usize) -> Result<Vec<String>> {
        check_count(count)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let mut buf = [0u8; TOKEN_ENTROPY_BYTES];
            self.rng.fill_bytes(&mut buf);
            out.push(hex::encode(buf));
        }
        Ok(out)
    }

    fn new_product_id(&mut self) -> String {
        let mut buf = [0u8; PRODUCT_ID_BYTES];
        self.rng.fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
