use std::collections::BTreeMap;

use anyhow::Result;
use tempfile::tempdir;

use veritag_core::{
    assets::{AssetStore as _, FsAssetStore},
    coordinator::{Coordinator, RegistrationRequest},
    issuer::RandomTokenIssuer,
    registry::{self, AuthenticityRegistry as _, SqliteRegistry},
    resolver::Resolver,
    store::{BatchStatus, MetadataStore as _, SqliteMetadataStore},
};

#[test]
fn full_pipeline_smoke() -> Result<()> {
    let dir = tempdir()?;
    let registry_db = dir.path().join("registry.db");
    let store_db = dir.path().join("store.db");
    let asset_dir = dir.path().join("assets");

    let registry = SqliteRegistry::create_new(&registry_db)?;
    let store = SqliteMetadataStore::open(&store_db)?;
    let mut coordinator = Coordinator::new(
        RandomTokenIssuer,
        FsAssetStore::new(&asset_dir),
        store,
        registry,
        "acme",
    );

    let outcome = coordinator.register(&RegistrationRequest {
        name: "Widget".to_string(),
        quantity: 3,
        metadata: BTreeMap::from([("line".to_string(), "alpha".to_string())]),
        asset_bytes: Some(b"widget product shot".to_vec()),
    })?;

    assert_eq!(outcome.token_ids.len(), 3);
    let distinct: std::collections::HashSet<_> = outcome.token_ids.iter().collect();
    assert_eq!(distinct.len(), 3);
    let asset_ref = outcome.asset_ref.clone().expect("asset was staged");

    // The staged asset reads back byte-identical.
    let assets = FsAssetStore::new(&asset_dir);
    assert_eq!(assets.get(&asset_ref)?, b"widget product shot");

    // Every issued token verifies as authentic with merged enrichment.
    let registry = SqliteRegistry::open_existing(&registry_db)?;
    let store = SqliteMetadataStore::open(&store_db)?;
    let resolver = Resolver::new("https://assets.example/{hash}");
    for token in &outcome.token_ids {
        let res = resolver.verify(&registry, &store, token)?;
        assert!(res.authentic);
        assert_eq!(res.name.as_deref(), Some("Widget"));
        assert_eq!(res.manufacturer.as_deref(), Some("acme"));
        assert_eq!(res.product_id.as_deref(), Some(outcome.product_id.as_str()));
        assert_eq!(res.metadata.get("line").map(String::as_str), Some("alpha"));
        assert_eq!(res.asset_ref.as_deref(), Some(asset_ref.as_str()));
        assert_eq!(
            res.asset_url.as_deref(),
            Some(format!("https://assets.example/{asset_ref}").as_str())
        );
    }

    // Unknown token: not authentic, nothing disclosed.
    let res = resolver.verify(&registry, &store, "unknown-token")?;
    assert!(!res.authentic);
    assert!(res.product_id.is_none());

    // Dashboard listing sees one committed product.
    let listed = store.list_by_manufacturer("acme")?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, BatchStatus::Committed);
    assert_eq!(listed[0].receipt.as_ref().unwrap(), &outcome.receipt);

    // The commit chain holds end to end, survives a backup round trip.
    registry.verify_integrity()?;
    let backup = dir.path().join("backup.json");
    registry::export_registry_json(&registry, &backup)?;
    let restored = registry::import_registry_json(&backup, &dir.path().join("restored.db"))?;
    let rec = restored
        .lookup(&outcome.token_ids[0])?
        .expect("restored registry holds the token");
    assert_eq!(rec.product_id, outcome.product_id);

    Ok(())
}

#[test]
fn repeated_verification_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let registry = SqliteRegistry::create_new(&dir.path().join("registry.db"))?;
    let store = SqliteMetadataStore::open(&dir.path().join("store.db"))?;
    let mut coordinator = Coordinator::new(
        RandomTokenIssuer,
        FsAssetStore::new(dir.path().join("assets")),
        store,
        registry,
        "acme",
    );

    let outcome = coordinator.register(&RegistrationRequest {
        name: "Gadget".to_string(),
        quantity: 1,
        metadata: BTreeMap::new(),
        asset_bytes: None,
    })?;

    let registry = SqliteRegistry::open_existing(&dir.path().join("registry.db"))?;
    let store = SqliteMetadataStore::open(&dir.path().join("store.db"))?;
    let resolver = Resolver::default();

    let first = resolver.verify(&registry, &store, &outcome.token_ids[0])?;
    let second = resolver.verify(&registry, &store, &outcome.token_ids[0])?;
    assert!(first.authentic && second.authentic);
    assert_eq!(first.commit_seq, second.commit_seq);
    assert_eq!(first.metadata, second.metadata);

    Ok(())
}
