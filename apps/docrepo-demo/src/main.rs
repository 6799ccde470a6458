use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docrepo::{OpOptions, Repository, RepositoryConfig};
use docrepo_core::{Document, DocumentMeta, PatchOperation};
use docrepo_runtime::{AppConfig, CliArgs, StaticUser, WorkerQueue};
use docrepo_store::ContainerManager;

/// Repository name looked up under `repositories` in the config file.
const NOTES: &str = "notes";

/// docrepo demo - drives a typed repository against the in-memory store
#[derive(Parser)]
#[command(name = "docrepo-demo")]
#[command(about = "docrepo demo - drives a typed repository against the in-memory store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Background queue workers (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add, read, page and delete a handful of notes
    Run,
    /// Check configuration
    Check,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Note {
    #[serde(flatten)]
    meta: DocumentMeta,
    title: String,
    #[serde(default)]
    revision: u32,
}

impl Note {
    fn new(team: &str, id: &str, title: String) -> Self {
        Self {
            meta: DocumentMeta::new(team, id),
            title,
            revision: 0,
        }
    }
}

impl Document for Note {
    fn meta(&self) -> &DocumentMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocumentMeta {
        &mut self.meta
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        workers: cli.workers,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config
        .logging
        .clone()
        .unwrap_or_else(docrepo_runtime::default_logging_config);
    docrepo_runtime::logging::init_logging_from_config(&logging_config, Path::new(&config.home_dir));
    tracing::info!("docrepo demo starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_demo(config, cli.config.as_deref()).await,
        Commands::Check => check_config(config, cli.config.as_deref()),
    }
}

fn notes_config(config: &AppConfig) -> Result<RepositoryConfig> {
    let repo = config
        .repository_config::<RepositoryConfig>(NOTES)?
        .unwrap_or_else(|| RepositoryConfig::new(NOTES));
    repo.validate()
        .with_context(|| format!("Invalid settings for repository '{NOTES}'"))?;
    Ok(repo)
}

/// The store section is read through the same layered Figment as the rest of
/// the config, so `DOCREPO__STORE__*` overrides apply.
fn container_manager(config: &AppConfig, config_path: Option<&Path>) -> Result<ContainerManager> {
    match config_path {
        Some(path) => ContainerManager::from_figment(&AppConfig::figment(path))
            .context("Invalid store configuration"),
        None => Ok(ContainerManager::new(config.store.clone())),
    }
}

async fn run_demo(config: AppConfig, config_path: Option<&Path>) -> Result<()> {
    let repo_config = notes_config(&config)?;
    let audit_container = repo_config.audit_container.clone();

    let manager = Arc::new(container_manager(&config, config_path)?);
    let queue = Arc::new(WorkerQueue::start(&config.queue));
    let repo: Repository<Note> = Repository::new(
        repo_config,
        manager.clone(),
        queue.clone(),
        Arc::new(StaticUser("demo".into())),
    )?;

    let opts = OpOptions::default();
    let mut notes: Vec<Note> = (1..=5)
        .map(|i| {
            let team = if i % 2 == 0 { "team-a" } else { "team-b" };
            Note::new(team, &format!("n{i}"), format!("Note {i}"))
        })
        .collect();
    let ids = repo.add_items(&mut notes, &opts).await?;
    tracing::info!(count = ids.len(), "notes added");

    let first = repo
        .get_item(&ids[0], &opts)
        .await?
        .context("freshly added note is missing")?;
    println!("read back {}: {}", first.entity_id(), first.title);

    repo.patch_item(
        &ids[1],
        &[PatchOperation::increment("/revision", 1)],
        &OpOptions::queued(),
    )
    .await?;
    queue.flush().await;

    let mut continuation = None;
    let mut page_no = 0;
    loop {
        let page = repo
            .get_all_paged(2, continuation, &opts)
            .await?
            .map_items(|n| format!("{} (rev {})", n.title, n.revision));
        page_no += 1;
        println!("page {page_no}: {}", page.items.join(", "));
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    repo.delete_item(&ids[0], &opts).await?;
    repo.delete_all_paged(2, &OpOptions::queued()).await?;
    queue.flush().await;

    let remaining = repo.count(&opts).await?;
    let audits = manager.get(&audit_container)?.len();
    println!("remaining notes: {remaining}, audit records: {audits}");

    queue.shutdown().await;
    tracing::info!("docrepo demo finished");
    Ok(())
}

fn check_config(config: AppConfig, config_path: Option<&Path>) -> Result<()> {
    tracing::info!("Checking configuration...");
    notes_config(&config)?;
    container_manager(&config, config_path)?;
    println!("Configuration check passed");
    println!("{}", config.to_yaml()?);
    Ok(())
}
