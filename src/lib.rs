//! Veritag — ledger-backed authenticity registry for physical products.
//!
//! This crate provides:
//! - High-entropy scan-token issuance for registration batches
//! - An append-only, hash-chained SQLite authenticity registry
//! - A content-addressed asset store for product imagery
//! - A mutable metadata store for rich off-ledger product records
//! - A two-phase registration coordinator with fail-closed semantics
//! - A verification resolver that merges both stores into one verdict
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod assets;
pub mod coordinator;
pub mod issuer;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod util;
