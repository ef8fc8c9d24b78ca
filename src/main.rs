#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::ffi::OsStr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use jute::config::{Config, LogFormat};
use jute::proxy::NpmProxy;
use jute::registry::Registry;
use jute::tarball::TgzArchive;
use jute::upstream::HttpRemote;
use jute_adapter::FilesystemStorage;

#[derive(Debug, Parser)]
#[command(author, version, about = "Jute npm registry proxy cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Warm the cache with a package's metadata and, optionally, its tarballs
    Prefetch {
        /// Path to the configuration file
        #[arg(long, default_value = "jute.toml")]
        config: PathBuf,
        /// Package name, e.g. lodash or @types/node
        package: String,
        /// Asset path to fetch, e.g. /lodash/-/lodash-4.17.21.tgz (repeatable)
        #[arg(long)]
        asset: Vec<String>,
    },
    /// Import a local .tgz archive into the registry
    Publish {
        /// Path to the configuration file
        #[arg(long, default_value = "jute.toml")]
        config: PathBuf,
        /// Path to the archive
        archive: PathBuf,
    },
    /// Print the manifest of a local .tgz archive
    Inspect {
        /// Path to the archive
        archive: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Prefetch {
            config,
            package,
            asset,
        } => run_prefetch(config, package, asset),
        Command::Publish { config, archive } => run_publish(config, archive),
        Command::Inspect { archive } => run_inspect(archive),
    }
}

fn run_prefetch(config_path: PathBuf, package: String, assets: Vec<String>) -> Result<()> {
    let config = Config::load(Some(config_path)).context("loading configuration")?;
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;

    let Some(upstream) = config.upstream.as_ref() else {
        bail!("no [upstream] section in configuration, nothing to prefetch from");
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing prefetch runtime")?;

    let storage = FilesystemStorage::new(config.storage.path.clone());
    rt.block_on(storage.prepare())
        .context("preparing storage directory")?;

    let remote = HttpRemote::new(upstream).context("building upstream client")?;
    let proxy = NpmProxy::new(storage, remote);

    rt.block_on(async {
        match proxy.get_package(&package).await? {
            Some(entry) => println!(
                "{}: metadata cached (last modified {})",
                entry.name, entry.last_modified
            ),
            None => bail!("package '{package}' not found upstream or in cache"),
        }
        for path in &assets {
            match proxy.get_asset(path).await? {
                Some(asset) => println!(
                    "{}: {} bytes ({})",
                    asset.path,
                    asset.data.len(),
                    asset.content_type
                ),
                None => println!("{path}: not found upstream"),
            }
        }
        proxy.close();
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn run_publish(config_path: PathBuf, archive_path: PathBuf) -> Result<()> {
    let config = Config::load(Some(config_path)).context("loading configuration")?;
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;

    let raw = std::fs::read(&archive_path)
        .with_context(|| format!("reading {}", archive_path.display()))?;
    let filename = archive_path
        .file_name()
        .and_then(OsStr::to_str)
        .context("archive path has no file name")?;

    let data = BASE64.encode(&raw);
    let manifest = TgzArchive::new(data.clone())
        .package_descriptor()
        .context("reading archive manifest")?;

    let mut body = json!({
        "name": manifest.name,
        "versions": {},
        "_attachments": {}
    });
    body["versions"][manifest.version.as_str()] = json!({});
    body["_attachments"][filename] = json!({
        "data": data,
        "length": raw.len(),
    });

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing publish runtime")?;

    let storage = FilesystemStorage::new(config.storage.path.clone());
    rt.block_on(storage.prepare())
        .context("preparing storage directory")?;

    let registry = Registry::new(storage);
    let record = rt
        .block_on(registry.publish(&body.to_string()))
        .context("publishing archive")?;

    println!("published {} {}", record.name, manifest.version);
    Ok(())
}

fn run_inspect(archive_path: PathBuf) -> Result<()> {
    let raw = std::fs::read(&archive_path)
        .with_context(|| format!("reading {}", archive_path.display()))?;
    let archive = TgzArchive::new(BASE64.encode(&raw));

    let descriptor = archive
        .package_descriptor()
        .context("reading archive manifest")?;
    println!("name:    {}", descriptor.name);
    println!("version: {}", descriptor.version);
    if let Some(description) = descriptor.extra.get("description").and_then(Value::as_str) {
        println!("description: {description}");
    }
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("building log filter")?;

    let fmt_layer = match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
