use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use veritag_core::{
    assets::FsAssetStore,
    config::VeritagConfig,
    coordinator::{Coordinator, RegistrationRequest},
    issuer::RandomTokenIssuer,
    registry::{self, SqliteRegistry},
    resolver::Resolver,
    store::{MetadataStore as _, SqliteMetadataStore},
    util,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "veritag",
    version = util::VERSION,
    about = "Ledger-backed authenticity registry for physical products"
)]
struct Cli {
    /// Path to the registry database (authoritative, append-only).
    #[arg(long, global = true)]
    registry_db: Option<PathBuf>,

    /// Path to the metadata store database (mutable enrichment layer).
    #[arg(long, global = true)]
    store_db: Option<PathBuf>,

    /// Directory for the content-addressed asset store.
    #[arg(long, global = true)]
    asset_dir: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new, empty registry and metadata store.
    Init,

    /// Register a batch of units and issue their scan tokens.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        quantity: usize,
        /// Metadata entries as key=value pairs (repeatable).
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
        /// Optional product image staged into the asset store.
        #[arg(long)]
        asset: Option<PathBuf>,
        /// Manufacturer principal; defaults to the configured identity.
        #[arg(long)]
        manufacturer: Option<String>,
    },

    /// Verify a scan token against the registry and print the verdict.
    Verify {
        token: String,
    },

    /// List products registered by a manufacturer.
    List {
        #[arg(long)]
        manufacturer: Option<String>,
    },

    /// Reconcile pending metadata records against the registry after a crash.
    Recover,

    /// Verify the registry's commit hash chain end to end.
    VerifyChain,

    /// Export the registry to a JSON backup file.
    ExportRegistry {
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a registry from a JSON backup into a new database.
    ImportRegistry {
        #[arg(long)]
        json: PathBuf,
        /// Path for the new database (must not already exist).
        #[arg(long)]
        target_db: PathBuf,
    },

    /// Print version information.
    Version,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = VeritagConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env();

    init_logging(&cfg.logging);

    let registry_db = cli.registry_db.unwrap_or(cfg.paths.registry_db.clone());
    let store_db = cli.store_db.unwrap_or(cfg.paths.store_db.clone());
    let asset_dir = cli.asset_dir.unwrap_or(cfg.paths.asset_dir.clone());
    util::validate_path(&registry_db, "registry db")?;
    util::validate_path(&store_db, "store db")?;

    match cli.cmd {
        Commands::Init => {
            let registry = SqliteRegistry::create_new(&registry_db).context("create registry")?;
            SqliteMetadataStore::open(&store_db).context("create metadata store")?;
            info!(registry_id = %registry.meta().registry_id, "registry initialized");
        }

        Commands::Register {
            name,
            quantity,
            metadata,
            asset,
            manufacturer,
        } => {
            let metadata = parse_metadata(&metadata)?;
            let asset_bytes = asset
                .as_ref()
                .map(|p| std::fs::read(p).with_context(|| format!("read asset {}", p.display())))
                .transpose()?;
            let manufacturer = manufacturer.unwrap_or(cfg.identity.manufacturer.clone());

            let registry =
                SqliteRegistry::open_or_create(&registry_db).context("open registry")?;
            let store = SqliteMetadataStore::open(&store_db).context("open metadata store")?;
            let mut coordinator = Coordinator::new(
                RandomTokenIssuer,
                FsAssetStore::new(asset_dir),
                store,
                registry,
                &manufacturer,
            )
            .with_max_duplicate_retries(cfg.registration.max_duplicate_retries);

            let outcome = coordinator
                .register(&RegistrationRequest {
                    name,
                    quantity,
                    metadata,
                    asset_bytes,
                })
                .context("register batch")?;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "product_id": outcome.product_id,
                    "token_ids": outcome.token_ids,
                    "receipt": outcome.receipt,
                    "asset_ref": outcome.asset_ref,
                }))
                .context("serialize outcome")?
            );
        }

        Commands::Verify { token } => {
            let registry = SqliteRegistry::open_existing(&registry_db).context("open registry")?;
            let store = SqliteMetadataStore::open(&store_db).context("open metadata store")?;
            let resolver = Resolver::new(&cfg.verify.asset_url_template);
            let result = resolver
                .verify(&registry, &store, token.trim())
                .context("verify token")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("serialize result")?
            );
            if !result.authentic {
                std::process::exit(1);
            }
        }

        Commands::List { manufacturer } => {
            let manufacturer = manufacturer.unwrap_or(cfg.identity.manufacturer.clone());
            let store = SqliteMetadataStore::open(&store_db).context("open metadata store")?;
            let products = store
                .list_by_manufacturer(&manufacturer)
                .context("list products")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&products).context("serialize products")?
            );
        }

        Commands::Recover => {
            let registry = SqliteRegistry::open_existing(&registry_db).context("open registry")?;
            let store = SqliteMetadataStore::open(&store_db).context("open metadata store")?;
            let mut coordinator = Coordinator::new(
                RandomTokenIssuer,
                FsAssetStore::new(asset_dir),
                store,
                registry,
                &cfg.identity.manufacturer,
            );
            let report = coordinator.recover().context("recover pending records")?;
            info!(
                finalized = report.finalized.len(),
                failed = report.failed.len(),
                inconsistent = report.inconsistent.len(),
                "recovery sweep complete"
            );
            anyhow::ensure!(
                report.inconsistent.is_empty(),
                "inconsistent pending records need manual inspection: {:?}",
                report.inconsistent
            );
        }

        Commands::VerifyChain => {
            let registry = SqliteRegistry::open_existing(&registry_db).context("open registry")?;
            let meta = registry.meta().clone();
            info!(registry_id = %meta.registry_id, schema_version = meta.schema_version, "verifying");
            registry.verify_integrity().context("verify commit chain")?;
            info!(
                commits = registry.latest_seq().context("latest seq")?,
                "registry chain verification passed"
            );
        }

        Commands::ExportRegistry { out } => {
            let registry = SqliteRegistry::open_existing(&registry_db).context("open registry")?;
            registry::export_registry_json(&registry, &out).context("export registry")?;
            info!(out = %out.display(), "registry exported");
        }

        Commands::ImportRegistry { json, target_db } => {
            anyhow::ensure!(
                !target_db.exists(),
                "target database {} already exists -- will not overwrite",
                target_db.display()
            );
            let imported = registry::import_registry_json(&json, &target_db)
                .context("import registry")?;
            info!(
                registry_id = %imported.meta().registry_id,
                "registry imported to {}",
                target_db.display()
            );
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_metadata(entries: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("metadata entry '{entry}' is not KEY=VALUE"))?;
        anyhow::ensure!(!key.trim().is_empty(), "metadata key must not be empty");
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}

fn init_logging(cfg: &veritag_core::config::LoggingConfig) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        // JSON output to stdout for container pipelines.
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        // JSON-lines output to file.
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .expect("failed to open json log file");
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer();
        registry.with(file_layer).with(console_layer).init();
    } else {
        // Default: human-readable output to stderr.
        let console_layer = tracing_subscriber::fmt::layer();
        registry.with(console_layer).init();
    }
}
