//! `scmsync` command line.
//!
//! Administrative front end and batch entry point for the mirror:
//! project and repository registration, committer mapping, history
//! queries, and the `sync` command a scheduler invokes periodically.
//! All real work happens in `scmsync-core`; this binary parses
//! arguments, wires the components from configuration and prints
//! results.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use scmsync_adapters::AdapterRegistry;
use scmsync_core::Config;
use scmsync_core::CredentialCipher;
use scmsync_core::NewRepository;
use scmsync_core::Project;
use scmsync_core::ReferenceScanner;
use scmsync_core::Repository;
use scmsync_core::RepositoryRegistry;
use scmsync_core::StaticUserDirectory;
use scmsync_core::Store;
use scmsync_core::SyncEngine;
use scmsync_core::SyncOutcome;
use scmsync_core::UserId;

#[derive(Debug, Parser)]
#[command(name = "scmsync", version, about = "Mirror SCM history for projects")]
struct Cli {
    /// Path to the configuration file (default: ./scmsync.toml).
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Synchronize repositories with their backends.
    Sync(SyncArgs),
    /// Manage projects.
    Project(ProjectCli),
    /// Manage a project's repositories.
    Repo(RepoCli),
    /// List distinct committers of a repository and their mapped users.
    Committers(RepoRefArgs),
    /// Map a committer string to a user across mirrored history.
    MapCommitter(MapCommitterArgs),
    /// Show mirrored changesets, newest first.
    Log(LogArgs),
    /// Rebuild work item references from mirrored commit messages.
    RescanRefs(RepoRefArgs),
    /// Check backend client installations and configuration.
    Doctor,
}

#[derive(Debug, Parser)]
struct SyncArgs {
    /// Sync only this project instead of every active one.
    #[arg(long)]
    project: Option<String>,

    /// Sync only this repository (identifier or id) of `--project`.
    #[arg(long, requires = "project")]
    repo: Option<String>,
}

#[derive(Debug, Parser)]
struct ProjectCli {
    #[command(subcommand)]
    command: ProjectCommand,
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    /// Register a project.
    Add {
        /// Project identifier (lowercase letters, digits, dashes).
        identifier: String,
        /// Display name; defaults to the identifier.
        #[arg(long)]
        name: Option<String>,
    },
    /// List projects.
    List,
    /// Include a project in batch synchronization again.
    Activate { identifier: String },
    /// Exclude a project from batch synchronization.
    Deactivate { identifier: String },
}

#[derive(Debug, Parser)]
struct RepoCli {
    #[command(subcommand)]
    command: RepoCommand,
}

#[derive(Debug, Subcommand)]
enum RepoCommand {
    /// Register a repository for a project.
    Add(RepoAddArgs),
    /// List a project's repositories, default first.
    List { project: String },
    /// Make a repository the project default.
    SetDefault {
        project: String,
        /// Repository identifier or id.
        repo: String,
    },
    /// Delete a repository and all mirrored history.
    Rm {
        project: String,
        /// Repository identifier or id.
        repo: String,
    },
}

#[derive(Debug, Parser)]
struct RepoAddArgs {
    project: String,

    /// Backend type, e.g. `git`.
    #[arg(long)]
    backend: String,

    /// Connection URL; for git, the repository path.
    #[arg(long)]
    url: String,

    /// Identifier, unique within the project. May only be omitted for
    /// the default repository.
    #[arg(long)]
    identifier: Option<String>,

    /// Make this repository the project default.
    #[arg(long)]
    default: bool,

    #[arg(long)]
    username: Option<String>,

    /// Credential, encrypted at rest when a secret is configured.
    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    path_encoding: Option<String>,

    #[arg(long)]
    log_encoding: Option<String>,
}

#[derive(Debug, Parser)]
struct RepoRefArgs {
    project: String,

    /// Repository identifier or id; defaults to the project default.
    repo: Option<String>,
}

#[derive(Debug, Parser)]
struct MapCommitterArgs {
    project: String,

    /// Repository identifier or id.
    repo: String,

    /// Committer string exactly as stored, e.g. `Jane Doe <jane@x.com>`.
    committer: String,

    /// User id to assign.
    #[arg(long, conflicts_with = "clear")]
    user: Option<i64>,

    /// Remove the user assignment instead.
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Parser)]
struct LogArgs {
    project: String,

    /// Repository identifier or id; defaults to the project default.
    repo: Option<String>,

    /// Only changesets touching this path.
    #[arg(long)]
    path: Option<String>,

    /// Maximum number of changesets to show.
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Also list the files each changeset touched.
    #[arg(long)]
    files: bool,
}

/// Components built once from configuration and shared by every command.
struct App {
    config: Config,
    registry: RepositoryRegistry,
    engine: SyncEngine,
}

impl App {
    fn build(config_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config = Config::load(config_path)?;
        let store = Store::open(&config.database.path).with_context(|| {
            format!("cannot open database {}", config.database.path.display())
        })?;
        let registry = RepositoryRegistry::new(
            store,
            CredentialCipher::new(&config.secret),
            Arc::new(AdapterRegistry::builtin()),
            config.scm.enabled.clone(),
        );
        let scanner = ReferenceScanner::new(&config.references.patterns)?;
        let engine = SyncEngine::new(
            registry.clone(),
            Arc::new(StaticUserDirectory::new(&config.users)),
            scanner,
            config.workers(),
        );
        Ok(Self {
            config,
            registry,
            engine,
        })
    }

    async fn project(&self, identifier: &str) -> anyhow::Result<Project> {
        self.registry
            .find_project(identifier)
            .await?
            .with_context(|| format!("no project {identifier:?}"))
    }

    /// Resolve a repository argument; `None` means the project default.
    async fn repository(
        &self,
        project: &Project,
        repo: Option<&str>,
    ) -> anyhow::Result<Repository> {
        match repo {
            Some(param) => self
                .registry
                .find_by_identifier_param(project.id, param)
                .await?
                .with_context(|| {
                    format!("no repository {param:?} in project {}", project.identifier)
                }),
            None => self
                .registry
                .store()
                .default_repository(project.id)
                .await?
                .with_context(|| {
                    format!("project {} has no default repository", project.identifier)
                }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::build(cli.config.as_deref())?;

    match cli.command {
        Command::Sync(args) => sync(&app, args).await,
        Command::Project(project) => match project.command {
            ProjectCommand::Add { identifier, name } => {
                let project = app
                    .registry
                    .create_project(&identifier, name.as_deref().unwrap_or(""))
                    .await?;
                println!("created project {} (id {})", project.identifier, project.id);
                Ok(())
            }
            ProjectCommand::List => list_projects(&app).await,
            ProjectCommand::Activate { identifier } => {
                set_project_active(&app, &identifier, true).await
            }
            ProjectCommand::Deactivate { identifier } => {
                set_project_active(&app, &identifier, false).await
            }
        },
        Command::Repo(repo) => match repo.command {
            RepoCommand::Add(args) => add_repository(&app, args).await,
            RepoCommand::List { project } => list_repositories(&app, &project).await,
            RepoCommand::SetDefault { project, repo } => {
                let project = app.project(&project).await?;
                let repository = app.repository(&project, Some(&repo)).await?;
                app.registry.set_default(repository.id).await?;
                println!("{} is now the default repository", repository.display_name());
                Ok(())
            }
            RepoCommand::Rm { project, repo } => {
                let project = app.project(&project).await?;
                let repository = app.repository(&project, Some(&repo)).await?;
                let mirrored = app
                    .registry
                    .store()
                    .changeset_count(repository.id)
                    .await?;
                app.registry.delete_repository(repository.id).await?;
                println!(
                    "deleted {} and {mirrored} mirrored changesets",
                    repository.display_name()
                );
                Ok(())
            }
        },
        Command::Committers(args) => committers(&app, args).await,
        Command::MapCommitter(args) => map_committer(&app, args).await,
        Command::Log(args) => log(&app, args).await,
        Command::RescanRefs(args) => {
            let project = app.project(&args.project).await?;
            let repository = app.repository(&project, args.repo.as_deref()).await?;
            let scanned = app.engine.rescan_references(repository.id).await?;
            println!("rescanned {scanned} changesets");
            Ok(())
        }
        Command::Doctor => doctor(&app),
    }
}

async fn sync(app: &App, args: SyncArgs) -> anyhow::Result<()> {
    match args.project.as_deref() {
        None => {
            let report = app.engine.sync_all().await?;
            for (id, outcome) in &report.outcomes {
                if let SyncOutcome::Failed { error } = outcome {
                    let name = match app.registry.repository(*id).await {
                        Ok(repo) => repo.display_name(),
                        Err(_) => id.to_string(),
                    };
                    println!("failed  {name}: {error}");
                }
            }
            println!(
                "synced {} repositories, {} new changesets, {} skipped, {} failed",
                report.synced(),
                report.ingested(),
                report.skipped(),
                report.failed()
            );
            if report.failed() > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(identifier) => {
            let project = app.project(identifier).await?;
            let repositories = match args.repo.as_deref() {
                Some(repo) => vec![app.repository(&project, Some(repo)).await?],
                None => app.registry.repositories_of(project.id).await?,
            };
            let mut failed = false;
            for repository in repositories {
                match app.engine.sync_repository(&repository).await {
                    SyncOutcome::Done { ingested } => {
                        println!("synced  {}: {ingested} new", repository.display_name());
                    }
                    SyncOutcome::Skipped => {
                        println!("skipped {}: already running", repository.display_name());
                    }
                    SyncOutcome::Failed { error } => {
                        failed = true;
                        println!("failed  {}: {error}", repository.display_name());
                    }
                }
            }
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn list_projects(app: &App) -> anyhow::Result<()> {
    let projects = app.registry.list_projects().await?;
    if projects.is_empty() {
        println!("no projects");
        return Ok(());
    }
    for project in projects {
        let state = if project.is_active { "active" } else { "inactive" };
        println!(
            "{:<6} {:<24} {state:<8} {}",
            project.id.0, project.identifier, project.name
        );
    }
    Ok(())
}

async fn set_project_active(app: &App, identifier: &str, active: bool) -> anyhow::Result<()> {
    let project = app.project(identifier).await?;
    app.registry.set_project_active(project.id, active).await?;
    let state = if active { "active" } else { "inactive" };
    println!("project {} is now {state}", project.identifier);
    Ok(())
}

async fn add_repository(app: &App, args: RepoAddArgs) -> anyhow::Result<()> {
    let project = app.project(&args.project).await?;
    let repository = app
        .registry
        .create_repository(
            project.id,
            NewRepository {
                backend: args.backend,
                identifier: args.identifier,
                url: args.url,
                username: args.username,
                password: args.password,
                path_encoding: args.path_encoding,
                log_encoding: args.log_encoding,
                is_default: args.default,
            },
        )
        .await?;
    println!(
        "registered {} ({}) for project {}{}",
        repository.display_name(),
        repository.backend,
        project.identifier,
        if repository.is_default { " [default]" } else { "" }
    );
    Ok(())
}

async fn list_repositories(app: &App, project: &str) -> anyhow::Result<()> {
    let project = app.project(project).await?;
    let repositories = app.registry.repositories_of(project.id).await?;
    if repositories.is_empty() {
        println!("no repositories in project {}", project.identifier);
        return Ok(());
    }
    for repository in repositories {
        let mirrored = app
            .registry
            .store()
            .changeset_count(repository.id)
            .await?;
        println!(
            "{:<6} {:<24} {:<8} {:<9} {mirrored:>8}  {}",
            repository.id.0,
            repository.display_name(),
            repository.backend,
            if repository.is_default { "default" } else { "" },
            repository.url
        );
    }
    Ok(())
}

async fn committers(app: &App, args: RepoRefArgs) -> anyhow::Result<()> {
    let project = app.project(&args.project).await?;
    let repository = app.repository(&project, args.repo.as_deref()).await?;
    let committers = app.registry.committers(repository.id).await?;
    if committers.is_empty() {
        println!("no mirrored changesets");
        return Ok(());
    }
    for (committer, user) in committers {
        match user {
            Some(user) => println!("{committer} -> user {user}"),
            None => println!("{committer} -> (unmapped)"),
        }
    }
    Ok(())
}

async fn map_committer(app: &App, args: MapCommitterArgs) -> anyhow::Result<()> {
    let user = match (args.user, args.clear) {
        (Some(id), false) => Some(UserId(id)),
        (None, true) => None,
        (None, false) | (Some(_), true) => bail!("pass either --user <ID> or --clear"),
    };
    let project = app.project(&args.project).await?;
    let repository = app.repository(&project, Some(&args.repo)).await?;
    let touched = app
        .registry
        .apply_committer_mapping(repository.id, vec![(args.committer.clone(), user)])
        .await?;
    match user {
        Some(user) => println!("mapped {:?} to user {user} ({touched} changesets)", args.committer),
        None => println!("cleared mapping for {:?} ({touched} changesets)", args.committer),
    }
    Ok(())
}

async fn log(app: &App, args: LogArgs) -> anyhow::Result<()> {
    let project = app.project(&args.project).await?;
    let repository = app.repository(&project, args.repo.as_deref()).await?;
    let changesets = app
        .registry
        .store()
        .latest_changesets(repository.id, args.path.as_deref().unwrap_or(""), args.limit)
        .await?;
    if changesets.is_empty() {
        println!("no mirrored changesets");
        return Ok(());
    }
    for changeset in changesets {
        let user = match changeset.user_id {
            Some(user) => format!(" (user {user})"),
            None => String::new(),
        };
        let subject = changeset.message.lines().next().unwrap_or("");
        println!(
            "{}  {}  {}{user}  {subject}",
            changeset.short_revision(),
            changeset.committed_at.format("%Y-%m-%d %H:%M"),
            changeset.committer,
        );
        if args.files {
            for change in app.registry.store().changes_of(changeset.id).await? {
                match &change.from_path {
                    Some(from) => println!("    {} {} <- {from}", change.action, change.path),
                    None => println!("    {} {}", change.action, change.path),
                }
            }
        }
    }
    Ok(())
}

fn doctor(app: &App) -> anyhow::Result<()> {
    let adapters = app.registry.adapters();
    println!("enabled backends: {}", app.config.scm.enabled.join(", "));
    for backend in adapters.backends() {
        let Some(factory) = adapters.factory(backend) else {
            continue;
        };
        let enabled = app.config.scm.enabled.iter().any(|b| b == backend);
        let status = if factory.client_available() {
            factory
                .client_version()
                .unwrap_or_else(|| "available".to_string())
        } else {
            "client not found".to_string()
        };
        println!(
            "{backend:<10} {status}{}",
            if enabled { "" } else { "  (not enabled)" }
        );
    }
    for backend in &app.config.scm.enabled {
        if adapters.factory(backend).is_none() {
            println!("{backend:<10} no adapter registered");
        }
    }
    println!(
        "database: {} | cipher: {} | workers: {}",
        app.config.database.path.display(),
        if app.registry.cipher().is_enabled() {
            "enabled"
        } else {
            "disabled"
        },
        app.config.workers()
    );
    Ok(())
}
