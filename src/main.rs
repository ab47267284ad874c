// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use recpack::config::{Config, DEFAULT_CONFIG_PATH};
use recpack::db::models::Record;
use recpack::import::{self, PackageConflict};
use recpack::package::{PackageDefinition, ops};
use recpack::session::Session;
use recpack::store::SaveOptions;
use recpack::update_log::{self, UpdateLogRecord};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_DB_PATH: &str = "recpack.db";

#[derive(Parser)]
#[command(name = "recpack")]
#[command(author, version, long_about = None)]
#[command(about = "Versioned record packages with reversible update logs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Database and configuration locations shared by every command
#[derive(Args)]
struct StoreArgs {
    /// Database path
    #[arg(short, long, default_value = DEFAULT_DB_PATH)]
    db_path: String,
    /// Configuration file (optional; defaults apply if missing)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Create or update a package definition
    Define {
        /// Package key
        key: String,
        /// Classify mutations into this package
        #[arg(long)]
        build: bool,
        /// Mirror package contents to the filesystem
        #[arg(long)]
        filesystem_sync: bool,
        /// Mirror directory
        #[arg(long)]
        fs_path: Option<PathBuf>,
        /// Directory the package is installed from
        #[arg(long)]
        source: Option<PathBuf>,
        /// Classes to include (repeatable)
        #[arg(long)]
        include: Vec<String>,
        /// Classes to exclude (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Create or update a record from a JSON object
    Put {
        /// Record class
        class: String,
        /// JSON file holding the plain object (`-` for stdin)
        file: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Delete a record
    Delete {
        class: String,
        id: String,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Install a package from its source directory
    Install {
        /// Package key
        key: String,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Import objects of one class from a JSON file
    Import {
        class: String,
        /// JSON file holding an object or a list of objects
        file: PathBuf,
        /// Import on behalf of this package
        #[arg(short, long)]
        package: Option<String>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Export a package to a directory
    Export {
        /// Package key
        key: String,
        /// Target directory (defaults to the package's mirror path)
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Show the update log
    History {
        /// Only this class
        class: Option<String>,
        /// Only this record
        id: Option<String>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// List recorded import conflicts
    Conflicts {
        /// Only conflicts of this package
        #[arg(short, long)]
        package: Option<String>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Revert the mutation recorded by a log entry
    Rollback {
        /// Update log record ID
        log_id: String,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// List package definitions
    Packages {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Generate shell completion scripts
    Completions {
        shell: Shell,
    },
}

fn open_session(args: &StoreArgs) -> Result<Session> {
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;
    Ok(Session::open(&args.db_path, config)?)
}

fn read_json(path: &Path) -> Result<Value> {
    let content = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    Ok(serde_json::from_str(&content)?)
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing database at: {}", db_path);
            recpack::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Define {
            key,
            build,
            filesystem_sync,
            fs_path,
            source,
            include,
            exclude,
            store,
        }) => {
            let session = open_session(&store)?;

            let mut definition = PackageDefinition::find_by_key(&session.store, &key)?
                .unwrap_or_else(|| PackageDefinition::new(key.clone(), key.clone()));
            definition.build |= build;
            definition.filesystem_sync |= filesystem_sync;
            if fs_path.is_some() {
                definition.fs_path = fs_path;
            }
            if source.is_some() {
                definition.source = source;
            }
            if !include.is_empty() {
                definition.include = Some(serde_json::to_value(&include)?);
            }
            if !exclude.is_empty() {
                definition.exclude = Some(serde_json::to_value(&exclude)?);
            }

            let mut record = definition.to_record()?;
            session.store.save(&mut record, SaveOptions::default())?;
            println!("Package {} saved (id {})", definition.key, definition.id);
            Ok(())
        }
        Some(Commands::Put { class, file, store }) => {
            let session = open_session(&store)?;
            let mut record = Record::from_plain(&class, &read_json(&file)?)?;
            let kind = session.store.save(&mut record, SaveOptions::default())?;

            println!(
                "{} {} {}d at version {}",
                record.class,
                record.id,
                kind.as_str(),
                record.ver.as_ref().map(|v| v.to_string()).unwrap_or_default()
            );
            if let Some(pkg) = &record.pkg {
                println!("  Package: {}", pkg);
            }
            Ok(())
        }
        Some(Commands::Delete { class, id, store }) => {
            let session = open_session(&store)?;
            let mut record = Record::new(class, id);
            session.store.delete(&mut record, SaveOptions::default())?;
            println!("Deleted {} {}", record.class, record.id);
            Ok(())
        }
        Some(Commands::Install { key, store }) => {
            info!("Installing package: {}", key);
            let session = open_session(&store)?;
            let report = ops::install_package(&session.store, &key)?;

            println!("Installed package: {}", key);
            println!("  Created: {}", report.created);
            println!("  Updated: {}", report.updated);
            println!("  Unchanged: {}", report.unchanged);
            println!("  Classes: {}", report.schema_installed);
            if report.conflicts > 0 {
                println!(
                    "  Conflicts: {} (run 'recpack conflicts --package {}')",
                    report.conflicts, key
                );
            }
            Ok(())
        }
        Some(Commands::Import {
            class,
            file,
            package,
            store,
        }) => {
            let session = open_session(&store)?;
            let package_ref = match &package {
                Some(key) => Some(
                    session
                        .registry
                        .load()
                        .reference_for(key)
                        .ok_or_else(|| anyhow::anyhow!("Package '{}' not found", key))?,
                ),
                None => None,
            };

            let objects: Vec<(String, Value)> = match read_json(&file)? {
                Value::Array(items) => items.into_iter().map(|v| (class.clone(), v)).collect(),
                single => vec![(class.clone(), single)],
            };

            let report = import::import_batch(&session.store, &objects, package_ref.as_ref())?;
            println!(
                "Imported {} object(s): {} created, {} updated, {} unchanged, {} conflicts",
                report.total(),
                report.created,
                report.updated,
                report.unchanged,
                report.conflicts
            );
            Ok(())
        }
        Some(Commands::Export { key, out, store }) => {
            let session = open_session(&store)?;
            let summary =
                ops::export_package(&session.store, &session.config, &key, out.as_deref())?;
            println!(
                "Exported {} object(s) of {} to {}",
                summary.objects,
                key,
                summary.path.display()
            );
            Ok(())
        }
        Some(Commands::History { class, id, store }) => {
            let session = open_session(&store)?;
            let entries = UpdateLogRecord::list(&session.store, class.as_deref(), id.as_deref())?;

            if entries.is_empty() {
                println!("No update history.");
            } else {
                println!("Update history:");
                for entry in &entries {
                    print!(
                        "  [{}] {} {} {} {} ({})",
                        entry.id,
                        entry.timestamp,
                        entry.update_type.as_str(),
                        entry.object_class,
                        entry.object_id,
                        entry.object_disp
                    );
                    if let Some(package) = &entry.package_ref {
                        let external = if entry.external_pkg { ", external" } else { "" };
                        print!(" [{}{}]", package, external);
                    }
                    println!();
                }
                let noun = if entries.len() == 1 { "entry" } else { "entries" };
                println!("\nTotal: {} {}", entries.len(), noun);
            }
            Ok(())
        }
        Some(Commands::Conflicts { package, store }) => {
            let session = open_session(&store)?;
            let conflicts = PackageConflict::list(&session.store, package.as_deref())?;

            if conflicts.is_empty() {
                println!("No conflicts.");
            } else {
                println!("Import conflicts:");
                for conflict in &conflicts {
                    let version = |v: &Option<recpack::version::VersionId>| {
                        v.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
                    };
                    println!(
                        "  [{}] {} {} {}: {} (installed {}, package {})",
                        conflict.id,
                        conflict.package_ref,
                        conflict.object_class,
                        conflict.object_id,
                        conflict.conflict_type,
                        version(&conflict.installed_version_id),
                        version(&conflict.package_version_id)
                    );
                }
                println!("\nTotal: {} conflict(s)", conflicts.len());
            }
            Ok(())
        }
        Some(Commands::Rollback { log_id, store }) => {
            info!("Rolling back log record: {}", log_id);
            let session = open_session(&store)?;
            let record = update_log::revert(&session.store, &log_id)?;
            println!("Rollback complete: {} {} restored.", record.class, record.id);
            Ok(())
        }
        Some(Commands::Packages { store }) => {
            let session = open_session(&store)?;
            let definitions = PackageDefinition::list(&session.store)?;
            let registry = session.registry.load();

            if definitions.is_empty() {
                println!("No packages defined.");
            } else {
                println!("Packages:");
                for definition in &definitions {
                    print!("  {}", definition.key);
                    if let Some(version) = &definition.version {
                        print!(" {}", version);
                    }
                    match registry.get(&definition.key) {
                        Some(config) => {
                            print!(" [building]");
                            if let Some(path) = config.mirror_path() {
                                print!(" -> {}", path.display());
                            }
                        }
                        None => print!(" [idle]"),
                    }
                    println!();
                }
                println!("\nTotal: {} package(s)", definitions.len());

                let order: Vec<&str> =
                    registry.packages().iter().map(|p| p.key.as_str()).collect();
                if !order.is_empty() {
                    println!("Classification order: {}", order.join(", "));
                }
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "recpack", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Recpack v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'recpack --help' for usage information");
            Ok(())
        }
    }
}
