use std::collections::BTreeMap;
use std::collections::HashSet;

use anyhow::Result;
use tempfile::tempdir;

use veritag_core::{
    assets::FsAssetStore,
    coordinator::{Coordinator, RegistrationRequest},
    issuer::RandomTokenIssuer,
    registry::{AuthenticityRegistry as _, SqliteRegistry},
    store::SqliteMetadataStore,
};

const REGISTRARS: usize = 4;
const TOKENS_PER_BATCH: usize = 25;

/// Uniqueness under concurrent submission: N parallel registrars, each
/// committing one batch of M tokens against the same registry, must end with
/// exactly N*M distinct committed tokens and an intact commit chain.
#[test]
fn parallel_batches_commit_disjoint_tokens() -> Result<()> {
    let dir = tempdir()?;
    let registry_db = dir.path().join("registry.db");
    SqliteRegistry::create_new(&registry_db)?;

    let mut handles = Vec::new();
    for i in 0..REGISTRARS {
        let registry_db = registry_db.clone();
        let store_db = dir.path().join(format!("store-{i}.db"));
        let asset_dir = dir.path().join(format!("assets-{i}"));
        handles.push(std::thread::spawn(move || -> Result<Vec<String>> {
            // Each registrar is a separate process in production; here each
            // thread opens its own connections against the shared registry.
            let registry = SqliteRegistry::open_existing(&registry_db)?;
            let store = SqliteMetadataStore::open(&store_db)?;
            let mut coordinator = Coordinator::new(
                RandomTokenIssuer,
                FsAssetStore::new(&asset_dir),
                store,
                registry,
                &format!("manufacturer-{i}"),
            );
            let outcome = coordinator.register(&RegistrationRequest {
                name: format!("Widget-{i}"),
                quantity: TOKENS_PER_BATCH,
                metadata: BTreeMap::new(),
                asset_bytes: None,
            })?;
            Ok(outcome.token_ids)
        }));
    }

    let mut all_tokens: Vec<String> = Vec::new();
    for handle in handles {
        let tokens = handle.join().expect("registrar thread panicked")?;
        assert_eq!(tokens.len(), TOKENS_PER_BATCH);
        all_tokens.extend(tokens);
    }

    let distinct: HashSet<&String> = all_tokens.iter().collect();
    assert_eq!(distinct.len(), REGISTRARS * TOKENS_PER_BATCH);

    // Every token resolves to exactly the product its batch registered, and
    // the serialized commit order produced one chain link per batch.
    let registry = SqliteRegistry::open_existing(&registry_db)?;
    for token in &all_tokens {
        assert!(registry.lookup(token)?.is_some(), "{token} missing");
    }
    assert_eq!(registry.latest_seq()?, REGISTRARS as i64);
    registry.verify_integrity()?;
    Ok(())
}
