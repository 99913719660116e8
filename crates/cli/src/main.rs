//! Operator CLI for the private asset vault.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use vault_core::{AppConfig, AssetReference};
use vault_service::{MetadataRecord, UploadContext, VaultService};
use vault_signer::{IssueOutcome, TokenSigner, UrlService};
use vault_storage::StorageError;

#[derive(Parser)]
#[command(name = "vaultctl")]
#[command(about = "Operator CLI for the private asset vault")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "VAULT_CONFIG", default_value = "vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and print its reference
    Upload {
        file: PathBuf,

        /// Owning entity id (e.g. a course id)
        #[arg(long)]
        owner: String,

        /// Category within the owner's namespace (e.g. "videos")
        #[arg(long)]
        category: String,
    },
    /// Issue a signed delivery URL for a reference
    Sign {
        reference: String,

        /// Validity window in seconds (default from config)
        #[arg(long)]
        window_secs: Option<u64>,
    },
    /// Delete the object behind a reference
    Delete { reference: String },
    /// Check metadata records (JSON array) against the backend and emit a
    /// remediation script for orphaned records
    Reconcile {
        records: PathBuf,

        /// Write the remediation script to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Metadata table name used in the generated script
        #[arg(long, default_value = "assets")]
        table: String,
    },
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("VAULT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    if config.delivery.allow_unsigned {
        tracing::warn!(
            "allow_unsigned is set: missing signing secret will not fail startup, \
             and issued URLs will report a configuration gap"
        );
    }

    Ok(config)
}

async fn build_service(config: &AppConfig) -> Result<VaultService> {
    let signer = match &config.delivery.signing_secret {
        Some(secret) => Some(TokenSigner::new(
            secret.resolve().context("failed to resolve signing secret")?,
        )),
        None => None,
    };

    let store = vault_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage backend")?;

    let urls = UrlService::new(config.delivery.host.clone(), signer);
    Ok(VaultService::new(config.resolved_storage_id(), store, urls))
}

async fn handle_upload(
    config: &AppConfig,
    file: &Path,
    owner: String,
    category: String,
) -> Result<()> {
    let vault = build_service(config).await?;

    let metadata = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file has no usable name")?;

    let context =
        UploadContext::new(owner, category, filename).with_total_bytes(metadata.len());

    let mut progress = vault.hub().subscribe(context.operation_id);
    let render = tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            match event.percentage {
                Some(pct) => eprintln!("  {:?}: {pct}% ({} bytes)", event.phase, event.bytes_sent),
                None => eprintln!("  {:?}: {} bytes", event.phase, event.bytes_sent),
            }
        }
    });

    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("cannot open {}", file.display()))?;
    let source = ReaderStream::new(handle).map_err(StorageError::Io);

    let reference = vault
        .upload(&context, source)
        .await
        .context("upload failed")?;
    let _ = render.await;

    println!("{reference}");
    Ok(())
}

async fn handle_sign(config: &AppConfig, reference: &str, window_secs: Option<u64>) -> Result<()> {
    let vault = build_service(config).await?;
    let reference = AssetReference::parse(reference).context("invalid reference")?;
    let window = Duration::from_secs(window_secs.unwrap_or(config.delivery.default_window_secs));

    match vault.issue(&reference, window) {
        IssueOutcome::Signed(signed) => {
            println!("{}", signed.to_url());
            Ok(())
        }
        IssueOutcome::ConfigurationGap => {
            anyhow::bail!("no signing secret configured; set delivery.signing_secret")
        }
    }
}

async fn handle_delete(config: &AppConfig, reference: &str) -> Result<()> {
    let vault = build_service(config).await?;
    let reference = AssetReference::parse(reference).context("invalid reference")?;
    vault.delete(&reference).await.context("delete failed")?;
    println!("deleted {reference}");
    Ok(())
}

async fn handle_reconcile(
    config: &AppConfig,
    records_path: &Path,
    out: Option<&Path>,
    table: &str,
) -> Result<()> {
    let vault = build_service(config).await?;

    let raw = tokio::fs::read_to_string(records_path)
        .await
        .with_context(|| format!("cannot read {}", records_path.display()))?;
    let records: Vec<MetadataRecord> =
        serde_json::from_str(&raw).context("records file is not a JSON array of records")?;

    let report = vault.reconcile(&records).await;
    eprintln!(
        "scanned {} records: {} orphaned, {} inconclusive",
        report.scanned,
        report.orphaned.len(),
        report.inconclusive.len()
    );

    let script = report.remediation_script(table);
    match out {
        Some(path) => {
            tokio::fs::write(path, &script)
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
            eprintln!("remediation script written to {}", path.display());
        }
        None => print!("{script}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Upload {
            file,
            owner,
            category,
        } => handle_upload(&config, &file, owner, category).await,
        Commands::Sign {
            reference,
            window_secs,
        } => handle_sign(&config, &reference, window_secs).await,
        Commands::Delete { reference } => handle_delete(&config, &reference).await,
        Commands::Reconcile {
            records,
            out,
            table,
        } => handle_reconcile(&config, &records, out.as_deref(), &table).await,
    }
}
