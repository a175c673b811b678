//! # Corpus Sync CLI (`csync`)
//!
//! Thin orchestration over the `corpus_sync` library: reads the TOML
//! configuration, wires storage, search, and embedding clients together, and
//! runs one operation.
//!
//! ## Usage
//!
//! ```bash
//! csync --config ./config/csync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `csync ensure-indexes` | Create missing indexes, add missing fields |
//! | `csync sync` | Ingest changed files into every configured index |
//! | `csync sync --acl-only` | Re-propagate permissions without re-embedding |
//! | `csync remove --path <p>` | Delete a file and its documents |
//! | `csync folders` | Top-level folders, oldest activity first |
//! | `csync paths` | Every content path in the storage tree |
//! | `csync status` | Document count per index |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use corpus_sync::config::{self, Config, StorageAuth, StorageKind};
use corpus_sync::embedding::create_provider;
use corpus_sync::ingest::Ingester;
use corpus_sync::manager::{RemovalPolicy, SearchManager};
use corpus_sync::progress::default_observer;
use corpus_sync::schema::{IndexSchemaManager, SchemaOptions};
use corpus_sync::search::azure::AzureSearchService;
use corpus_sync::search::SearchIndexService;
use corpus_sync::source::{FileSource, LocalFileSource, StorageFileSource};
use corpus_sync::splitter::ExtractingSplitter;
use corpus_sync::storage::adls::{AdlsStorage, StorageCredential};
use corpus_sync::storage::StorageProvider;

/// Corpus Sync CLI — keeps search indexes in step with a document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/csync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "csync",
    about = "Corpus Sync — keep search indexes synchronized with a document corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/csync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or additively extend every configured index.
    ///
    /// Safe to run repeatedly; existing fields are never modified.
    EnsureIndexes,

    /// Ingest changed files.
    ///
    /// Files whose content hash matches their hash record are skipped.
    Sync {
        /// Only re-propagate permissions of already indexed documents.
        #[arg(long)]
        acl_only: bool,

        /// Do nothing if the default index already has documents.
        #[arg(long)]
        skip_if_populated: bool,
    },

    /// Remove documents from every index.
    ///
    /// Without `--path`, every document is removed.
    Remove {
        /// Storage path (or file name) whose documents are removed.
        #[arg(long)]
        path: Option<String>,

        /// Only remove documents owned solely by this user object id.
        #[arg(long)]
        only_oid: Option<String>,
    },

    /// List top-level folders ordered by most recent activity below them.
    Folders,

    /// List content paths in the storage tree.
    Paths,

    /// Show the document count of each configured index.
    Status,
}

struct App {
    source: Arc<dyn FileSource>,
    search: Arc<dyn SearchIndexService>,
    ingester: Ingester,
}

fn env_secret(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{} environment variable not set", name))
}

fn schema_options(cfg: &Config) -> SchemaOptions {
    SchemaOptions {
        embedding_dims: cfg.embedding.dims.unwrap_or(1536),
        use_acls: cfg.search.use_acls,
        search_images: cfg.search.search_images,
        use_int_vectorization: cfg.search.use_int_vectorization,
        analyzer_name: cfg.search.analyzer_name.clone(),
    }
}

fn build(cfg: &Config) -> anyhow::Result<App> {
    let observer = default_observer();

    let (source, storage): (Arc<dyn FileSource>, Option<Arc<dyn StorageProvider>>) =
        match cfg.storage.kind {
            StorageKind::Local => {
                let root = cfg
                    .storage
                    .root
                    .clone()
                    .context("storage.root must be set")?;
                let source: Arc<dyn FileSource> = Arc::new(LocalFileSource::new(
                    root,
                    &cfg.storage.include_globs,
                    &cfg.storage.exclude_globs,
                    cfg.storage.follow_symlinks,
                    observer.clone(),
                )?);
                (source, None)
            }
            StorageKind::Adls => {
                let account = cfg.storage.account.as_deref().unwrap_or_default();
                let filesystem = cfg.storage.filesystem.as_deref().unwrap_or_default();
                let secret = env_secret(&cfg.storage.credential_env)?;
                let credential = match cfg.storage.auth {
                    StorageAuth::SharedKey => StorageCredential::SharedKey(secret),
                    StorageAuth::Bearer => StorageCredential::Bearer(secret),
                };
                let storage: Arc<dyn StorageProvider> =
                    Arc::new(AdlsStorage::new(account, filesystem, credential));
                let source: Arc<dyn FileSource> = Arc::new(StorageFileSource::new(
                    storage.clone(),
                    cfg.storage.path.clone(),
                    observer.clone(),
                ));
                (source, Some(storage))
            }
        };

    let search: Arc<dyn SearchIndexService> = Arc::new(AzureSearchService::new(
        &cfg.search.endpoint,
        env_secret(&cfg.search.api_key_env)?,
    ));
    let embeddings = create_provider(&cfg.embedding)?;

    let schema = IndexSchemaManager::new(
        search.clone(),
        schema_options(cfg),
        observer.clone(),
    );
    let manager = SearchManager::new(search.clone(), cfg.search.default_index(), observer.clone())
        .with_embeddings(embeddings)
        .with_acls(cfg.search.use_acls)
        .with_removal_policy(RemovalPolicy::from(&cfg.removal));

    let mut ingester = Ingester::new(
        source.clone(),
        schema,
        manager,
        Arc::new(ExtractingSplitter::new(cfg.chunking.max_tokens)),
        cfg.search.index_names.clone(),
        observer,
    )?
    .with_category(cfg.search.category.clone());
    if let Some(storage) = storage {
        ingester = ingester.with_storage(storage);
    }

    Ok(App {
        source,
        search,
        ingester,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let app = build(&cfg)?;

    match cli.command {
        Commands::EnsureIndexes => {
            IndexSchemaManager::new(
                app.search.clone(),
                schema_options(&cfg),
                default_observer(),
            )
            .ensure_indexes(&cfg.search.index_names)
            .await?;
            println!("ensure-indexes");
            println!("  indexes: {}", cfg.search.index_names.join(", "));
            println!("ok");
        }
        Commands::Sync {
            acl_only,
            skip_if_populated,
        } => {
            if acl_only && skip_if_populated {
                bail!("--acl-only and --skip-if-populated cannot be combined");
            }
            let ingester = app.ingester.skip_if_populated(skip_if_populated);
            let report = if acl_only {
                ingester.run_acl_only().await?
            } else {
                ingester.run().await?
            };
            println!("sync{}", if acl_only { " (acl-only)" } else { "" });
            if report.skipped_populated {
                println!("  skipped: default index already has documents");
            }
            println!("  files ingested: {}", report.files_ingested);
            println!("  files failed: {}", report.files_failed);
            println!("  documents written: {}", report.sections_uploaded);
            println!("ok");
        }
        Commands::Remove { path, only_oid } => {
            let removed = match path.as_deref() {
                Some(path) => app.ingester.remove_file(path, only_oid.as_deref()).await?,
                None => {
                    let mut total = 0;
                    for index in &cfg.search.index_names {
                        total += app
                            .ingester
                            .manager()
                            .remove_content_from(index, None, only_oid.as_deref())
                            .await?;
                    }
                    total
                }
            };
            println!("remove {}", path.as_deref().unwrap_or("<all>"));
            println!("  documents removed: {}", removed);
            println!("ok");
        }
        Commands::Folders => {
            for folder in app.source.folder_entries().await? {
                println!(
                    "{}\t{}",
                    folder.effective_creation_time.to_rfc3339(),
                    folder.name
                );
            }
        }
        Commands::Paths => {
            let mut paths = app.source.list_paths();
            while let Some(path) = paths.next().await {
                println!("{}", path?);
            }
        }
        Commands::Status => {
            for index in &cfg.search.index_names {
                match app.search.document_count(index).await {
                    Ok(count) => println!("{}\t{} documents", index, count),
                    Err(corpus_sync::SyncError::NotFound(_)) => {
                        println!("{}\t(missing)", index)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    Ok(())
}
