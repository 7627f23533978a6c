//! HvacStore CLI - inspect, recover and migrate saved HVAC projects

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use hvacstore_core::clock::{Clock, SystemClock};
use hvacstore_core::config::{Config, StorageBackend};
use hvacstore_core::error::{Error, StorageError};
use hvacstore_core::project::{MetadataUpdate, ProjectDocument, ProjectMetadata};
use hvacstore_core::storage::database::default_database_path;
use hvacstore_core::storage::serialization::{self, DeserializeError};
use hvacstore_core::storage::{
    DatabaseAdapter, DatabaseConfig, DirectoryAdapter, DirectoryHandle, LoadOutcome,
    PermissionGrant, SaveOptions, ScopedDirectory, StorageAdapter, create_adapter,
    migrate_projects,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hvacstore")]
#[command(author, version, about = "Inspect, recover and migrate saved HVAC projects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List saved projects, most recently modified first
    List {
        /// Include archived projects
        #[arg(short, long)]
        all: bool,
    },

    /// Search projects by name, number, client or location
    Search { query: String },

    /// Load a project and show where it was recovered from
    Show {
        /// Project ID or exact name
        project: String,
    },

    /// Save a project file into the configured storage
    Import { file: PathBuf },

    /// Write a project to a file
    Export { project: String, file: PathBuf },

    /// Delete a project with its backup, auto-saves and thumbnail
    Delete {
        project: String,
        #[arg(long)]
        force: bool,
    },

    /// Copy a project under a new name
    Duplicate { project: String, name: String },

    /// Manage auto-saves
    Autosaves {
        #[command(subcommand)]
        action: AutoSaveAction,
    },

    /// Update project metadata
    Update {
        project: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        number: Option<String>,
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long, conflicts_with = "unarchive")]
        archive: bool,
        #[arg(long)]
        unarchive: bool,
        #[arg(long)]
        thumbnail_url: Option<String>,
    },

    /// Store a PNG thumbnail for a project
    Thumbnail { project: String, image: PathBuf },

    /// Show storage usage
    Info,

    /// Move every project from the embedded database into a directory
    MigrateDbToDir {
        /// Database file (defaults to storage.database_path)
        #[arg(long)]
        database: Option<PathBuf>,
        /// Target directory (defaults to storage.directory_path)
        #[arg(long)]
        directory: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand, Debug)]
enum AutoSaveAction {
    /// List auto-saves, newest first
    List { project: String },
    /// Make an auto-save the current version
    Restore { project: String, timestamp: String },
    /// Delete all but the newest auto-saves
    Cleanup {
        project: String,
        #[arg(long, default_value_t = 1)]
        keep: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet { "hvacstore=warn" } else { "hvacstore=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;
    if let Err(err) = &result {
        if let Some(hint) = suggestion_for(err) {
            eprintln!("Hint: {}", hint);
        }
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Config { action } => cmd_config(action, &out),
        Commands::Doctor => cmd_doctor(&out).await,
        Commands::MigrateDbToDir {
            database,
            directory,
        } => cmd_migrate(database, directory, &out).await,
        command => {
            let config = Config::load()?;
            let adapter = open_adapter(&config).await?;
            run_storage_command(adapter.as_ref(), &config, command, &out).await
        }
    }
}

fn suggestion_for(err: &anyhow::Error) -> Option<String> {
    if let Some(e) = err.downcast_ref::<Error>() {
        return e.suggestion();
    }
    err.downcast_ref::<StorageError>()
        .and_then(|e| Error::Storage(e.clone()).suggestion())
}

struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json(&self, value: &serde_json::Value) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Status line, suppressed by --quiet and by JSON output
    fn note(&self, message: impl AsRef<str>) {
        if !self.quiet && !self.json() {
            println!("{}", message.as_ref());
        }
    }
}

// ============================================================================
// Session setup
// ============================================================================

async fn open_directory(path: &Path) -> anyhow::Result<Arc<dyn DirectoryHandle>> {
    let handle = ScopedDirectory::open(path, PermissionGrant::granted())
        .await
        .with_context(|| format!("Failed to open directory: {}", path.display()))?;
    Ok(Arc::new(handle))
}

async fn open_adapter(config: &Config) -> anyhow::Result<Box<dyn StorageAdapter>> {
    let handle = match &config.storage.directory_path {
        Some(path) if config.storage.backend != StorageBackend::Filesystem => {
            match open_directory(path).await {
                Ok(handle) => Some(handle),
                Err(e) if config.storage.backend == StorageBackend::Auto => {
                    warn!(error = %e, "Directory unavailable, using filesystem storage");
                    None
                }
                Err(e) => return Err(e),
            }
        }
        _ => None,
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Ok(create_adapter(config, handle, clock).await?)
}

/// Accept a project id, or an exact (case-insensitive) project name
async fn resolve_project(adapter: &dyn StorageAdapter, key: &str) -> anyhow::Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(key) {
        return Ok(id);
    }
    let projects = adapter.list_projects().await?;
    let mut matches = projects
        .iter()
        .filter(|m| m.project_name.eq_ignore_ascii_case(key));
    match (matches.next(), matches.next()) {
        (Some(m), None) => Ok(m.project_id),
        (Some(_), Some(_)) => Err(Error::InvalidInput(format!(
            "More than one project is named '{}'; use the project ID",
            key
        ))
        .into()),
        (None, _) => Err(Error::ProjectNotFound(key.to_string()).into()),
    }
}

/// Decode a project file, upgrading older schema versions
fn read_project_file(path: &Path) -> anyhow::Result<(ProjectDocument, bool)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read project file: {}", path.display()))?;
    match serialization::deserialize(&text) {
        Ok(project) => Ok((project, false)),
        Err(DeserializeError::RequiresMigration { found_version, raw }) => {
            let project = serialization::migrate(raw, &found_version)
                .map_err(|e| StorageError::MigrationRequired(e.to_string()))?;
            Ok((project, true))
        }
        Err(e) => Err(Error::InvalidInput(format!(
            "{} is not a readable project file: {}",
            path.display(),
            e
        ))
        .into()),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_storage_command(
    adapter: &dyn StorageAdapter,
    config: &Config,
    command: Commands,
    out: &Output,
) -> anyhow::Result<()> {
    debug!(backend = %adapter.kind(), "Storage session opened");
    match command {
        Commands::List { all } => {
            let projects: Vec<ProjectMetadata> = adapter
                .list_projects()
                .await?
                .into_iter()
                .filter(|m| all || !m.is_archived)
                .collect();
            print_projects(&projects, out, "No projects found.")
        }

        Commands::Search { query } => {
            let projects = adapter.search_projects(&query).await?;
            print_projects(&projects, out, &format!("No projects match '{}'.", query))
        }

        Commands::Show { project } => {
            let id = resolve_project(adapter, &project).await?;
            let loaded = adapter.load_project(id).await?;
            print_loaded(&loaded, out)
        }

        Commands::Import { file } => {
            let (project, migrated) = read_project_file(&file)?;
            let options = SaveOptions {
                update_metadata: true,
                ..SaveOptions::default()
            };
            let saved = adapter.save_project(&project, options).await?;
            if out.json() {
                out.print_json(&json!({
                    "projectId": project.project_id,
                    "filePath": saved.file_path,
                    "sizeBytes": saved.size_bytes,
                    "migrated": migrated,
                }))?;
            } else {
                out.note(format!(
                    "Imported '{}' ({}){}",
                    project.project_name,
                    project.project_id,
                    if migrated { " [migrated]" } else { "" }
                ));
            }
            Ok(())
        }

        Commands::Export { project, file } => {
            let id = resolve_project(adapter, &project).await?;
            let loaded = adapter.load_project(id).await?;
            let text = serialization::serialize(&loaded.project)?;
            std::fs::write(&file, text)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            out.note(format!(
                "Exported '{}' to {}",
                loaded.project.project_name,
                file.display()
            ));
            Ok(())
        }

        Commands::Delete { project, force } => {
            let id = resolve_project(adapter, &project).await?;
            if !force {
                if !out.quiet {
                    println!("Warning: This will permanently delete project '{}'.", project);
                    println!("Use --force to confirm deletion.");
                }
                return Ok(());
            }
            adapter.delete_project(id).await?;
            out.note(format!("Project '{}' permanently deleted.", project));
            Ok(())
        }

        Commands::Duplicate { project, name } => {
            let id = resolve_project(adapter, &project).await?;
            let copy = adapter.duplicate_project(id, &name).await?;
            if out.json() {
                out.print_json(&json!({
                    "projectId": copy.project.project_id,
                    "projectName": copy.project.project_name,
                    "source": copy.source,
                }))?;
            } else {
                out.note(format!(
                    "Created '{}' ({})",
                    copy.project.project_name, copy.project.project_id
                ));
            }
            Ok(())
        }

        Commands::Autosaves { action } => cmd_autosaves(adapter, config, action, out).await,

        Commands::Update {
            project,
            name,
            number,
            client,
            location,
            archive,
            unarchive,
            thumbnail_url,
        } => {
            let id = resolve_project(adapter, &project).await?;
            let update = MetadataUpdate {
                project_name: name,
                project_number: number,
                client_name: client,
                location,
                is_archived: match (archive, unarchive) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                thumbnail_url,
            };
            if update.is_empty() {
                return Err(Error::InvalidInput("Nothing to update".to_string()).into());
            }
            adapter.update_metadata(id, &update).await?;
            out.note(format!("Updated project {}", id));
            Ok(())
        }

        Commands::Thumbnail { project, image } => {
            let id = resolve_project(adapter, &project).await?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Failed to read image: {}", image.display()))?;
            adapter.save_thumbnail(id, &bytes).await?;
            out.note(format!("Thumbnail saved ({} bytes)", bytes.len()));
            Ok(())
        }

        Commands::Info => {
            let info = adapter.storage_info().await?;
            if out.json() {
                return out.print_json(&serde_json::to_value(&info)?);
            }
            let bytes = |value: Option<u64>| {
                value
                    .map(|b| format!("{} bytes", b))
                    .unwrap_or_else(|| "unknown".to_string())
            };
            println!("Storage: {}", info.storage_type);
            println!("  Used: {}", bytes(info.used_bytes));
            println!("  Total: {}", bytes(info.total_bytes));
            println!("  Available: {}", bytes(info.available_bytes));
            if info.quota_exceeded {
                println!("  [WARNING] Storage quota exceeded");
            }
            Ok(())
        }

        Commands::Config { .. } | Commands::Doctor | Commands::MigrateDbToDir { .. } => {
            bail!("Command does not run against the configured storage")
        }
    }
}

fn print_projects(projects: &[ProjectMetadata], out: &Output, empty: &str) -> anyhow::Result<()> {
    if out.json() {
        return out.print_json(&serde_json::to_value(projects)?);
    }
    if projects.is_empty() {
        out.note(empty);
        return Ok(());
    }
    if !out.quiet {
        println!("Projects:");
    }
    for p in projects {
        let archived = if p.is_archived { " [archived]" } else { "" };
        println!(
            "  {} - {}{} (modified {})",
            p.project_id,
            p.project_name,
            archived,
            p.modified_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn print_loaded(loaded: &LoadOutcome, out: &Output) -> anyhow::Result<()> {
    let p = &loaded.project;
    if out.json() {
        return out.print_json(&json!({
            "source": loaded.source,
            "migrated": loaded.migrated,
            "lenient": loaded.lenient,
            "project": p,
        }));
    }
    println!("Project: {}", p.project_name);
    println!("  ID: {}", p.project_id);
    if let Some(number) = &p.project_number {
        println!("  Number: {}", number);
    }
    if let Some(client) = &p.client_name {
        println!("  Client: {}", client);
    }
    if let Some(location) = &p.location {
        println!("  Location: {}", location);
    }
    println!("  Schema: {}", p.schema_version);
    println!("  Entities: {}", p.entities.len());
    println!("  Archived: {}", p.is_archived);
    println!("  Created: {}", p.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Modified: {}", p.modified_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Loaded from: {}", loaded.source);
    if loaded.migrated {
        println!("  [NOTE] Upgraded from an older schema version");
    }
    if loaded.lenient {
        println!("  [WARNING] Recovered from a damaged file; some fields were reset");
    }
    Ok(())
}

async fn cmd_autosaves(
    adapter: &dyn StorageAdapter,
    config: &Config,
    action: AutoSaveAction,
    out: &Output,
) -> anyhow::Result<()> {
    match action {
        AutoSaveAction::List { project } => {
            let id = resolve_project(adapter, &project).await?;
            let records = adapter.list_auto_saves(id).await?;
            if out.json() {
                return out.print_json(&serde_json::to_value(&records)?);
            }
            if records.is_empty() {
                out.note("No auto-saves found.");
                return Ok(());
            }
            if !out.quiet {
                println!(
                    "Auto-saves (keeping {} per project):",
                    config.auto_save.keep_count
                );
            }
            for record in records {
                println!("  {} ({} bytes)", record.timestamp, record.size_bytes);
            }
            Ok(())
        }
        AutoSaveAction::Restore { project, timestamp } => {
            let id = resolve_project(adapter, &project).await?;
            let restored = adapter
                .restore_auto_save(id, &timestamp)
                .await
                .map_err(|e| match e {
                    StorageError::NotFound(_) => Error::AutoSaveNotFound(project.clone()),
                    other => Error::Storage(other),
                })?;
            out.note(format!(
                "Restored '{}' from auto-save {}",
                restored.project.project_name, timestamp
            ));
            Ok(())
        }
        AutoSaveAction::Cleanup { project, keep } => {
            let id = resolve_project(adapter, &project).await?;
            let removed = adapter.cleanup_auto_saves(id, keep).await?;
            if out.json() {
                return out.print_json(&json!({ "removed": removed }));
            }
            out.note(format!("Removed {} auto-save(s)", removed));
            Ok(())
        }
    }
}

async fn cmd_migrate(
    database: Option<PathBuf>,
    directory: Option<PathBuf>,
    out: &Output,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let db_path = database
        .or_else(|| config.storage.database_path.clone())
        .unwrap_or_else(default_database_path);
    if !db_path.exists() {
        bail!("No project database at {}", db_path.display());
    }
    let dir_path = directory
        .or_else(|| config.storage.directory_path.clone())
        .ok_or_else(|| {
            Error::PermissionNotGranted("no target directory given".to_string())
        })?;
    std::fs::create_dir_all(&dir_path)
        .with_context(|| format!("Failed to create directory: {}", dir_path.display()))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = DatabaseAdapter::open(DatabaseConfig::with_path(&db_path), Arc::clone(&clock))
        .await?
        .with_auto_save_keep(config.auto_save.keep_count);
    let destination = DirectoryAdapter::new(open_directory(&dir_path).await?, clock)
        .with_auto_save_keep(config.auto_save.keep_count);

    out.note(format!(
        "Moving projects from {} to {}...",
        db_path.display(),
        dir_path.display()
    ));
    let mut finished = 0;
    let progress = migrate_projects(&source, &destination, |p| {
        let done = p.completed + p.errors.len();
        if done > finished {
            finished = done;
            out.note(format!("  [{}/{}] {}", done, p.total, p.current));
        }
    })
    .await?;
    source.database().close().await;

    if out.json() {
        return out.print_json(&serde_json::to_value(&progress)?);
    }
    out.note(format!(
        "Moved {} of {} project(s).",
        progress.completed, progress.total
    ));
    for failure in &progress.errors {
        eprintln!("  [!!] {}: {}", failure.project_id, failure.error);
    }
    if !progress.errors.is_empty() {
        bail!("{} project(s) could not be moved", progress.errors.len());
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: &Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config
                .save()
                .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
            out.note(format!("Set {} = {}", key, value));
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.json() {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                return out.print_json(&serde_json::Value::Object(map));
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            out.note("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(out: &Output) -> anyhow::Result<()> {
    let quiet = out.quiet;
    if !quiet {
        println!("HvacStore Health Check");
        println!("======================");
        println!();
    }

    let mut all_ok = true;

    // Check configuration
    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
                println!("     Backend: {}", config.storage.backend);
                if config.auto_save.enabled {
                    println!(
                        "     Auto-save: every {} ms, keeping {}",
                        config.auto_save.interval_ms, config.auto_save.keep_count
                    );
                } else {
                    println!("     Auto-save: disabled");
                }
            }
            config
        }
        Err(e) => {
            if !quiet {
                println!("[!!] Configuration: Error - {:#}", e);
            }
            println!();
            println!("Some checks failed. See above for details.");
            return Ok(());
        }
    };

    // Check config file location
    if !quiet {
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    // Check directory access
    if let Some(path) = &config.storage.directory_path {
        match open_directory(path).await {
            Ok(_) => {
                if !quiet {
                    println!("[OK] Directory: {}", path.display());
                }
            }
            Err(e) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] Directory: {:#}", e);
                }
            }
        }
    }

    // Check the active storage
    match open_adapter(&config).await {
        Ok(adapter) => {
            match adapter.list_projects().await {
                Ok(projects) => {
                    if !quiet {
                        println!("[OK] Storage: {}", adapter.kind());
                        println!("     Projects: {}", projects.len());
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Storage: {} - {}", e.code(), e);
                    }
                }
            }
            if let Ok(info) = adapter.storage_info().await {
                if info.quota_exceeded {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Storage: Quota exceeded");
                    }
                }
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Storage: Failed to open - {:#}", e);
            }
        }
    }

    // Check the embedded database schema when one exists
    let db_path = config
        .storage
        .database_path
        .clone()
        .unwrap_or_else(default_database_path);
    if !quiet && db_path.exists() {
        match DatabaseAdapter::open(
            DatabaseConfig::with_path(&db_path).no_migrate(),
            Arc::new(SystemClock),
        )
        .await
        {
            Ok(adapter) => {
                let db = adapter.database();
                if let Err(e) = db.health_check().await {
                    all_ok = false;
                    println!("[!!] Database: {:#}", e);
                }
                match db.migration_status().await {
                    Ok(status) if status.needs_migration => println!(
                        "[!!] Database: Migrations pending (v{} -> v{})",
                        status.current_version, status.target_version
                    ),
                    Ok(status) => println!("[OK] Database: Schema v{}", status.current_version),
                    Err(e) => println!("[!!] Database: Migration check failed - {:#}", e),
                }
                println!("     Path: {}", db.path().display());
                db.close().await;
            }
            Err(e) => println!("[!!] Database: Failed to open - {}", e),
        }
    }

    // Summary
    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}
