//! metadata-sync: Keeps file metadata consistent with a local storage mirror.
//!
//! Runs the same engine a file-tree host embeds, against the metadata service over HTTP
//! and a directory laid out as `{root}/{node_id}/{provider}/...`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use metadata_client::{ClientConfig, LocalStorage, StorageEvent, StorageWatcher, connect};
use metadata_core::{
    FileTreeHooks, MetadataController, MoveEvent, MoveLocation, MoveOutcome, Resolution,
    ResolveTarget, Validation,
};

#[derive(Parser, Debug)]
#[command(name = "metadata-sync")]
#[command(about = "File metadata consistency tool")]
struct Args {
    /// Node (project) whose metadata to work on
    #[arg(short, long)]
    node: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check every metadata record against storage
    Status,

    /// Re-associate a record whose file no longer exists
    Resolve {
        /// Metadata path of the record, e.g. osfstorage/dir/a.txt
        path: String,

        /// Re-path the record to this candidate
        #[arg(long, conflicts_with = "delete")]
        target: Option<String>,

        /// Delete the record
        #[arg(long)]
        delete: bool,
    },

    /// Follow metadata after a storage move
    Moved {
        /// Source path (folders end with /)
        from: String,

        /// Destination path (folders end with /)
        to: String,

        /// Destination node, if different
        #[arg(long)]
        to_node: Option<String>,

        /// Also perform the move in the local mirror
        #[arg(long)]
        apply: bool,
    },

    /// Link a record to exactly the given drafts and registries
    Register {
        path: String,

        /// Draft registration or registry id (repeatable; none unlinks everything)
        #[arg(long = "select")]
        selected: Vec<String>,
    },

    /// List registration schemas
    Schemas,

    /// Revalidate records as the mirror changes
    Watch,
}

async fn status(controller: &MetadataController) -> Result<()> {
    let results = controller.validate_node(controller.home_node_id()).await?;
    let mut missing = 0;
    for (record, validation) in &results {
        let state = match validation {
            Validation::InFlight => "checking",
            v if v.is_missing() => {
                missing += 1;
                "missing"
            }
            _ => "ok",
        };
        println!(
            "{:<8} {} {}",
            state,
            record.path,
            record.hash.as_deref().unwrap_or("-")
        );
    }
    info!("{} record(s), {} missing", results.len(), missing);
    Ok(())
}

async fn resolve(
    controller: &MetadataController,
    path: &str,
    target: Option<String>,
    delete: bool,
) -> Result<()> {
    let node = controller.home_node_id();
    let plan = controller.plan_resolution(node, path).await?;
    let choice = if delete {
        Some(ResolveTarget::Delete)
    } else {
        target.map(ResolveTarget::Repath)
    };

    let Some(choice) = choice else {
        println!("Candidates for {}:", path);
        for candidate in &plan.candidates {
            println!("  {}", candidate.path);
        }
        if plan.candidates.is_empty() {
            println!("  (none, resolve with --delete)");
        }
        return Ok(());
    };
    if !plan.targets().contains(&choice) {
        bail!("{:?} is not a candidate for {}", choice, path);
    }

    match controller.resolve(node, path, choice).await? {
        Resolution::Repathed { from, to } => println!("Moved metadata {} -> {}", from, to),
        Resolution::Deleted { path } => println!("Deleted metadata for {}", path),
    }
    Ok(())
}

async fn moved(
    controller: &MetadataController,
    config: &ClientConfig,
    storage: &LocalStorage,
    from: String,
    to: String,
    to_node: Option<String>,
    apply: bool,
) -> Result<()> {
    let node = controller.home_node_id().to_string();
    let to_node = to_node.unwrap_or_else(|| node.clone());
    if to_node != node
        && controller
            .load_metadata(&to_node, &config.metadata_url(&to_node))
            .await?
            .is_none()
    {
        bail!("{} is already loading", to_node);
    }
    if apply {
        storage.move_path(&node, &from, &to_node, &to).await?;
        info!("Moved {}/{} to {}/{} in the mirror", node, from, to_node, to);
    }

    let event = MoveEvent {
        from: MoveLocation::new(node, from),
        to: MoveLocation::new(to_node, to),
    };
    match controller.on_move_complete(&event).await? {
        MoveOutcome::NothingToSync => println!("No metadata to move"),
        MoveOutcome::Synchronized {
            attempts,
            moved,
            lingering,
        } => {
            println!("{} record(s) moved after {} attempt(s)", moved.len(), attempts);
            for path in lingering {
                println!("  still listed at source: {}", path);
            }
        }
        MoveOutcome::GivenUp { attempts, missing } => {
            bail!(
                "Gave up after {} attempts; {} record(s) never arrived",
                attempts,
                missing.len()
            );
        }
    }
    Ok(())
}

async fn register(controller: &MetadataController, path: &str, selected: Vec<String>) -> Result<()> {
    controller.load_drafts().await?;
    let selected: HashSet<String> = selected.into_iter().collect();
    let results = controller
        .register(controller.home_node_id(), path, &selected)
        .await?;
    if results.is_empty() {
        println!("Registrations already up to date");
    }
    for result in results {
        println!(
            "{} {} {}",
            if result.checked { "linked  " } else { "unlinked" },
            result.target_id,
            result.result.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Drop cached hashes and validations touched by `event`, then validate again.
async fn revalidate(controller: &MetadataController, event: &StorageEvent) {
    let Some(context) = controller.context(&event.node_id) else {
        return;
    };
    context.hash_cache.clear_cache();

    let affected: Vec<String> = context
        .project
        .files
        .iter()
        .filter(|record| event.affects(&record.path))
        .map(|record| record.path.clone())
        .collect();
    for path in affected {
        context.validation.forget(&path);
        match controller.validate_file(&event.node_id, &path).await {
            Ok(validation) if validation.is_missing() => {
                warn!("{} no longer resolves; see `resolve {}`", path, path)
            }
            Ok(_) => debug!("{} still resolves", path),
            Err(e) => error!("Failed to validate {}: {}", path, e),
        }
    }
}

async fn watch(controller: &MetadataController, storage: &LocalStorage) -> Result<()> {
    let mut watcher = StorageWatcher::new(storage.root().to_path_buf())?;
    info!("Watching {}. Press Ctrl+C to stop.", watcher.root().display());

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                if event.node_id == controller.home_node_id() {
                    revalidate(controller, &event).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,metadata_sync=debug"
    } else {
        "info,metadata_sync=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    info!("Storage mirror: {:?}", config.storage_root);

    let storage = Arc::new(LocalStorage::new(config.storage_root.clone()));
    let controller = connect(&config, &args.node, Arc::clone(&storage))?;
    controller
        .init()
        .await
        .with_context(|| format!("Failed to load metadata for {}", args.node))?;

    match args.command {
        Command::Status => status(&controller).await,
        Command::Resolve {
            path,
            target,
            delete,
        } => resolve(&controller, &path, target, delete).await,
        Command::Moved {
            from,
            to,
            to_node,
            apply,
        } => moved(&controller, &config, &storage, from, to, to_node, apply).await,
        Command::Register { path, selected } => register(&controller, &path, selected).await,
        Command::Schemas => {
            for schema in controller.schemas() {
                let state = if schema.active { "active" } else { "inactive" };
                println!("{} {} ({})", schema.id, schema.name, state);
            }
            Ok(())
        }
        Command::Watch => watch(&controller, &storage).await,
    }
}
