//! Structured error types for the veritag library.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! domain-specific [`VeritagError`].  The coordinator's failure policy
//! depends on the distinction between retryable ([`VeritagError::DuplicateToken`])
//! and terminal registry failures, so those are first-class variants rather
//! than stringly-typed sub-cases.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the veritag library.
#[derive(Error, Debug)]
pub enum VeritagError {
    /// Bad input rejected before any side effect (empty name, zero quantity,
    /// malformed token id).
    #[error("validation: {0}")]
    Validation(String),

    #[error("issuer: {0}")]
    Issuer(String),

    #[error("registry: {0}")]
    Registry(String),

    /// A token in a submitted batch already exists in the registry.  The whole
    /// batch is rejected; the coordinator re-issues fresh tokens and retries.
    #[error("duplicate token: {0}")]
    DuplicateToken(String),

    /// `register_batch` was called with no tokens.
    #[error("empty batch")]
    EmptyBatch,

    /// Terminal registration failure: the batch was marked Failed and its
    /// tokens permanently discarded.
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// Asset or record absent.  At the resolver layer this is folded into an
    /// empty/optional result, never surfaced as a hard failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// Metadata store or asset store unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("asset: {0}")]
    Asset(String),

    #[error("config: {0}")]
    Config(String),

    /// Direct database errors (auto-converted via `?` in the storage modules).
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    /// Catch-all for errors that do not fit a specific domain.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, VeritagError>;

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds domain-specific context to any `Result<T, E>`.
///
/// Usage mirrors `anyhow::Context` but tags the error with the originating
/// subsystem so that callers can categorise failures.
///
/// ```ignore
/// std::fs::read(path).ctx_asset("read staged asset")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_registry(self, msg: &str) -> Result<T>;
    fn ctx_store(self, msg: &str) -> Result<T>;
    fn ctx_asset(self, msg: &str) -> Result<T>;
    fn ctx_issuer(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_registry(self, msg: &str) -> Result<T> {
        self.map_err(|e| VeritagError::Registry(format!("{msg}: {e}")))
    }
    fn ctx_store(self, msg: &str) -> Result<T> {
        self.map_err(|e| VeritagError::StoreUnavailable(format!("{msg}: {e}")))
    }
    fn ctx_asset(self, msg: &str) -> Result<T> {
        self.map_err(|e| VeritagError::Asset(format!("{msg}: {e}")))
    }
    fn ctx_issuer(self, msg: &str) -> Result<T> {
        self.map_err(|e| VeritagError::Issuer(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| VeritagError::Config(format!("{msg}: {e}")))
    }
}

/// Same as [`ResultExt`] but for `Option<T>` (converts `None` into an error).
pub trait OptionExt<T> {
    fn required_registry(self, msg: &str) -> Result<T>;
    fn required_store(self, msg: &str) -> Result<T>;
    fn required_config(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required_registry(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| VeritagError::Registry(msg.to_string()))
    }
    fn required_store(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| VeritagError::StoreUnavailable(msg.to_string()))
    }
    fn required_config(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| VeritagError::Config(msg.to_string()))
    }
}
