//! alarmctl - read-only inspection of the alarm engine's durable state.

use std::path::PathBuf;

use alarm_engine::{init_logging_for_service, parse_level, EngineConfig, Paths, LOG_LEVEL_ENV};
use alarm_store::{AlarmFilter, AlarmId, AlarmStore, BackendKind, NullSink, SyncStatus};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

/// Inspect alarms, queued backend work and migration state.
#[derive(Parser)]
#[command(name = "alarmctl")]
#[command(about = "Read-only inspection of the alarm engine store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base directory (config, database, logs). Defaults to ~/.alarm-engine
    #[arg(long, global = true, env = "ALARM_ENGINE_HOME")]
    base_dir: Option<PathBuf>,

    /// Log level for this invocation (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List alarms by next fire time
    List {
        /// Include disabled alarms and pending deletes
        #[arg(short, long)]
        all: bool,

        /// Only alarms with this sync status
        #[arg(long)]
        status: Option<StatusArg>,

        /// Only alarms hosted by this backend
        #[arg(long)]
        backend: Option<BackendArg>,
    },
    /// Show one alarm with its sync metadata and queued tasks
    Show { id: String },
    /// List queued backend tasks
    Tasks,
    /// Show legacy migration state
    Migration,
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Unsynced,
    Pending,
    Synced,
    Degraded,
    Migrating,
}

impl From<StatusArg> for SyncStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Unsynced => SyncStatus::Unsynced,
            StatusArg::Pending => SyncStatus::Pending,
            StatusArg::Synced => SyncStatus::Synced,
            StatusArg::Degraded => SyncStatus::Degraded,
            StatusArg::Migrating => SyncStatus::Migrating,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Native,
    Legacy,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Native => BackendKind::Native,
            BackendArg::Legacy => BackendKind::Legacy,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };

    if let Err(err) = init_logging_for_service("alarmctl", &cli.log_level, &paths, false) {
        eprintln!("warning: logging disabled: {err}");
    }

    match cli.command {
        Commands::Config => {
            let config = EngineConfig::load(&paths)
                .with_context(|| format!("loading {}", paths.config_file().display()))?;
            print_config(&paths, &config, cli.json)
        }
        Commands::List {
            all,
            status,
            backend,
        } => {
            let store = open_store(&paths)?;
            let filter = AlarmFilter {
                enabled: (!all).then_some(true),
                status: status.map(Into::into),
                backend: backend.map(Into::into),
                include_pending_delete: all,
                now: None,
            };
            let listing = store.list(filter);
            if cli.json {
                let records = listing.to_vec();
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<8} {:<7} {:<26} LABEL",
                "ID", "STATUS", "HOSTED", "ENABLED", "NEXT FIRE"
            );
            for (next, record) in listing.iter_with_next_fire() {
                let next = next.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
                let enabled = match (record.pending_delete, record.enabled) {
                    (true, _) => "deleting",
                    (false, true) => "yes",
                    (false, false) => "no",
                };
                println!(
                    "{:<38} {:<10} {:<8} {:<7} {:<26} {}",
                    record.id,
                    record.sync.status,
                    record.affinity().as_str(),
                    enabled,
                    next,
                    record.label
                );
            }
            Ok(())
        }
        Commands::Show { id } => {
            let store = open_store(&paths)?;
            let id = AlarmId::from_string(id);
            let record = store.get(&id).with_context(|| format!("alarm {id}"))?;
            let tasks = store.tasks_for(&id)?;
            if cli.json {
                let value = serde_json::json!({ "record": &*record, "tasks": tasks });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }
            println!("id:          {}", record.id);
            println!("label:       {}", record.label);
            println!("trigger:     {}", record.trigger);
            println!("enabled:     {}", record.enabled);
            println!("version:     {}", record.version);
            println!("origin:      {}", record.origin.as_str());
            println!("status:      {}", record.sync.status);
            if let Some(error) = &record.sync.last_error {
                println!("last error:  {error}");
            }
            for kind in BackendKind::ALL {
                let sync = record.sync.backend(kind);
                println!(
                    "{:<12} affine={} synced_version={} block={}",
                    format!("{kind}:"),
                    sync.affine,
                    sync.last_synced_version,
                    sync.block.map_or("-", |b| b.as_str())
                );
            }
            for task in tasks {
                println!(
                    "task:        {} {} v{} attempt={} due={}",
                    task.backend,
                    task.op.as_str(),
                    task.target_version,
                    task.attempt,
                    task.next_retry_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Commands::Tasks => {
            let store = open_store(&paths)?;
            let tasks = store.all_tasks()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
                return Ok(());
            }
            println!(
                "{:<38} {:<8} {:<7} {:>7} {:>7} {:<26} LAST ERROR",
                "ALARM", "BACKEND", "OP", "VERSION", "ATTEMPT", "DUE"
            );
            for task in tasks {
                println!(
                    "{:<38} {:<8} {:<7} {:>7} {:>7} {:<26} {}",
                    task.alarm_id,
                    task.backend,
                    task.op.as_str(),
                    task.target_version,
                    task.attempt,
                    task.next_retry_at.to_rfc3339(),
                    task.last_error.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Migration => {
            let store = open_store(&paths)?;
            let state = store.migration_state()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if state.completed {
                let at = state
                    .completed_at
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
                println!("completed at {at}, {} alarms imported", state.imported);
            } else {
                println!("not yet run");
            }
            Ok(())
        }
    }
}

/// Opens the store without a change consumer. Refuses to create a database.
fn open_store(paths: &Paths) -> Result<AlarmStore<NullSink>> {
    let path = paths.database_file();
    if !path.exists() {
        bail!("no alarm database at {}", path.display());
    }
    AlarmStore::open(&path, NullSink).with_context(|| format!("opening {}", path.display()))
}

fn print_config(paths: &Paths, config: &EngineConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    println!("config file:    {}", paths.config_file().display());
    println!("database:       {}", paths.database_file().display());
    println!("log file:       {}", paths.log_file().display());
    println!(
        "log level:      {} (effective {}, override with {LOG_LEVEL_ENV})",
        config.log_level,
        parse_level(&config.log_level)
    );
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
