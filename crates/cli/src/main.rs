use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use egok_renamer_core::{
    app_paths, render_example, validate_template, AppPaths, ComboField, ConfigStore, Monitor,
    PluginContext, PluginRegistry, RecordFilter, RenameHistory, RenameOutcome, RenameWorker,
    RenamedLedger, Renamer, ReportLog, RouteHistoryRecorder, WorkerCommand,
};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "egok-renamer")]
#[command(about = "Watches a folder and renames new files from a naming template")]
struct Cli {
    /// Directory holding settings.json, the ledger, the history database and the log.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Watch the active folder and rename files as they arrive.
    Watch(WatchArgs),
    /// Rename the given files, or every eligible file in the active folder.
    Rename(RenameArgs),
    /// Render an example file name for a template.
    CheckTemplate(CheckTemplateArgs),
    Config(ConfigArgs),
    Report(ReportArgs),
    Plugins(PluginsArgs),
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[arg(long, default_value_t = 500)]
    debounce_ms: u64,
    /// Rename files already in the folder before watching.
    #[arg(long, default_value_t = false)]
    scan: bool,
}

#[derive(Debug, Args)]
struct RenameArgs {
    paths: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct CheckTemplateArgs {
    /// Template to check instead of the saved one.
    #[arg(long)]
    template: Option<String>,
    /// Save the template after a successful check.
    #[arg(long, default_value_t = false)]
    save: bool,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    /// Set one of the profile fields.
    Set { field: FieldArg, value: String },
    /// Change the active folder.
    Folder { path: PathBuf },
    /// Change the naming template.
    Template { template: String },
    /// Comma separated list of extensions to rename.
    Extensions { list: String },
    /// Only rename files created today.
    OnlyToday {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FieldArg {
    Project,
    Type,
    Route,
    NumberFormat,
    DateFormat,
    Var1,
    Var2,
    Var3,
}

impl From<FieldArg> for ComboField {
    fn from(field: FieldArg) -> Self {
        match field {
            FieldArg::Project => ComboField::Project,
            FieldArg::Type => ComboField::TypeCode,
            FieldArg::Route => ComboField::Route,
            FieldArg::NumberFormat => ComboField::NumberFormat,
            FieldArg::DateFormat => ComboField::DateFormat,
            FieldArg::Var1 => ComboField::Var1,
            FieldArg::Var2 => ComboField::Var2,
            FieldArg::Var3 => ComboField::Var3,
        }
    }
}

#[derive(Debug, Args)]
struct ReportArgs {
    #[command(subcommand)]
    action: ReportAction,
}

#[derive(Debug, Subcommand)]
enum ReportAction {
    List(FilterArgs),
    Dates,
    Routes,
    Clear,
    Export {
        path: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Day in YYYY-MM-DD form.
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,
    #[arg(long)]
    route: Option<String>,
}

impl From<FilterArgs> for RecordFilter {
    fn from(args: FilterArgs) -> Self {
        RecordFilter {
            date: args.date,
            route: args.route,
        }
    }
}

#[derive(Debug, Args)]
struct PluginsArgs {
    #[command(subcommand)]
    action: PluginsAction,
}

#[derive(Debug, Subcommand)]
enum PluginsAction {
    List,
    Show {
        id: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.config_dir {
        Some(dir) => AppPaths::in_dir(dir),
        None => app_paths()?,
    };
    fs::create_dir_all(&paths.config_dir).with_context(|| {
        format!(
            "could not create config directory: {}",
            paths.config_dir.display()
        )
    })?;
    setup_tracing(cli.verbose, &paths)?;
    install_panic_hook();

    let config = Arc::new(ConfigStore::load(&paths.settings_path));

    match cli.command {
        Commands::Watch(args) => cmd_watch(&paths, config, args),
        Commands::Rename(args) => cmd_rename(&paths, config, args),
        Commands::CheckTemplate(args) => cmd_check_template(&config, args),
        Commands::Config(args) => cmd_config(&config, args.action),
        Commands::Report(args) => cmd_report(&paths, args.action),
        Commands::Plugins(args) => cmd_plugins(&paths, config, args.action),
    }
}

fn setup_tracing(verbosity: u8, paths: &AppPaths) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => match verbosity {
            0 => EnvFilter::new("egok_renamer=info,egok_renamer_core=info"),
            1 => EnvFilter::new("egok_renamer=debug,egok_renamer_core=debug"),
            _ => EnvFilter::new("egok_renamer=trace,egok_renamer_core=trace"),
        },
    };

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_path)
        .with_context(|| format!("could not open log file: {}", paths.log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false),
        )
        .init();

    Ok(())
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        error!("unhandled panic: {panic}");
        previous(panic);
    }));
}

fn open_history(paths: &AppPaths) -> Option<RenameHistory> {
    match RenameHistory::open(&paths.history_db_path) {
        Ok(history) => Some(history),
        Err(err) => {
            warn!("rename history unavailable, continuing without it: {err:#}");
            None
        }
    }
}

/// Builds the renamer together with the report it feeds.
fn build_renamer(paths: &AppPaths, config: Arc<ConfigStore>) -> (Renamer, ReportLog) {
    let ledger = RenamedLedger::load(&paths.ledger_path);
    let history = open_history(paths);

    let report = match &history {
        Some(history) => ReportLog::load_from(history, &RecordFilter::default())
            .unwrap_or_else(|err| {
                warn!("could not load rename history into the report: {err:#}");
                ReportLog::default()
            }),
        None => ReportLog::default(),
    };

    let mut renamer = Renamer::new(config.clone(), ledger);
    if let Some(history) = history {
        renamer = renamer.with_history(history);
    }
    renamer.add_listener(Box::new(report.clone()));
    renamer.add_listener(Box::new(RouteHistoryRecorder::new(config)));
    (renamer, report)
}

fn cmd_watch(paths: &AppPaths, config: Arc<ConfigStore>, args: WatchArgs) -> Result<()> {
    let (renamer, report) = build_renamer(paths, config.clone());
    let worker = RenameWorker::spawn(renamer, Duration::from_millis(args.debounce_ms))?;

    let registry = PluginRegistry::with_builtin();
    let ctx = PluginContext {
        config: config.clone(),
        report,
        filter: RecordFilter::default(),
    };
    let surfaces = registry.build_enabled(&config.snapshot(), &ctx);

    let mut monitor = Monitor::new(config.clone(), worker.sender());
    if config.snapshot().monitoring_enabled {
        monitor.start()?;
    } else {
        info!("monitoring is paused, type `start` to resume");
    }
    if args.scan {
        worker.send(WorkerCommand::RenameFolder)?;
    }

    eprintln!("commands: scan | start | stop | folder <path> | show | quit");
    for line in io::stdin().lock().lines() {
        let line = line.context("could not read from stdin")?;
        let (command, rest) = line
            .trim()
            .split_once(' ')
            .map_or((line.trim(), ""), |(c, r)| (c, r.trim()));
        match command {
            "" => {}
            "scan" => worker.send(WorkerCommand::RenameFolder)?,
            "start" => {
                if let Err(err) = monitor.start() {
                    error!("could not start monitoring: {err:#}");
                }
            }
            "stop" => monitor.stop(),
            "folder" if !rest.is_empty() => {
                if let Err(err) = monitor.change_folder(&PathBuf::from(rest)) {
                    error!("could not change folder: {err:#}");
                }
            }
            "show" => {
                for loaded in &surfaces {
                    println!("== {} ==", loaded.surface.title());
                    println!("{}", loaded.surface.render());
                }
            }
            "quit" | "exit" => break,
            other => eprintln!("unknown command: {other}"),
        }
    }

    drop(monitor);
    worker.shutdown()?;
    Ok(())
}

fn cmd_rename(paths: &AppPaths, config: Arc<ConfigStore>, args: RenameArgs) -> Result<()> {
    let (mut renamer, _report) = build_renamer(paths, config);
    let outcome = if args.paths.is_empty() {
        renamer.rename_folder()
    } else {
        renamer.rename(&args.paths)
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Table => print_outcome(&outcome),
    }

    if !outcome.failed.is_empty() {
        anyhow::bail!("{} file(s) could not be renamed", outcome.failed.len());
    }
    Ok(())
}

fn print_outcome(outcome: &RenameOutcome) {
    for file in &outcome.renamed {
        println!("{} -> {}", file.from.display(), file.to.display());
    }
    for (path, reason) in &outcome.skipped {
        println!("skipped {} ({reason:?})", path.display());
    }
    for failed in &outcome.failed {
        println!("failed {}: {}", failed.path.display(), failed.error);
    }
    println!(
        "\nrenamed={} skipped={} failed={}",
        outcome.renamed.len(),
        outcome.skipped.len(),
        outcome.failed.len()
    );
}

fn cmd_check_template(config: &ConfigStore, args: CheckTemplateArgs) -> Result<()> {
    let mut snapshot = config.snapshot();
    if let Some(template) = args.template {
        snapshot.template = template;
    }

    let today = chrono::Local::now().date_naive();
    let example = render_example(&snapshot, today)?;
    println!("{example}");

    if args.save {
        config.set_template(&snapshot.template)?;
        eprintln!("template saved");
    }
    Ok(())
}

fn cmd_config(config: &ConfigStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("settings file: {}", config.path().display());
            println!("{}", serde_json::to_string_pretty(&config.snapshot())?);
        }
        ConfigAction::Set { field, value } => {
            config.set_field(field.into(), &value)?;
        }
        ConfigAction::Folder { path } => {
            if !path.is_dir() {
                warn!(folder = %path.display(), "folder does not exist yet");
            }
            config.set_folder(path)?;
        }
        ConfigAction::Template { template } => {
            validate_template(&template)?;
            config.set_template(&template)?;
        }
        ConfigAction::Extensions { list } => {
            config.update(|c| c.extensions = list)?;
        }
        ConfigAction::OnlyToday { enabled } => {
            config.update(|c| c.rename_only_today = enabled)?;
        }
    }
    Ok(())
}

fn cmd_report(paths: &AppPaths, action: ReportAction) -> Result<()> {
    let history = RenameHistory::open(&paths.history_db_path)?;
    match action {
        ReportAction::List(filter) => {
            let filter = RecordFilter::from(filter);
            let report = ReportLog::load_from(&history, &filter)?;
            print!("{}", report.render_table(&filter));
        }
        ReportAction::Dates => {
            for date in history.all_dates()? {
                println!("{}", date.format("%Y-%m-%d"));
            }
        }
        ReportAction::Routes => {
            for route in history.all_routes()? {
                println!("{route}");
            }
        }
        ReportAction::Clear => {
            let removed = history.clear_all()?;
            println!("removed {removed} record(s)");
        }
        ReportAction::Export { path, filter } => {
            let filter = RecordFilter::from(filter);
            let report = ReportLog::load_from(&history, &filter)?;
            let written = report.export(&path, &filter)?;
            println!("exported {written} record(s) to {}", path.display());
        }
    }
    Ok(())
}

fn cmd_plugins(paths: &AppPaths, config: Arc<ConfigStore>, action: PluginsAction) -> Result<()> {
    let registry = PluginRegistry::with_builtin();
    match action {
        PluginsAction::List => {
            let enabled = config.snapshot().enabled_plugins;
            for id in registry.ids() {
                let marker = if enabled.iter().any(|e| e == id) { "*" } else { " " };
                let name = registry.get(id).map(|p| p.name()).unwrap_or_default();
                println!("{marker} {id}\t{name}");
            }
        }
        PluginsAction::Show { id, filter } => {
            let report = match open_history(paths) {
                Some(history) => ReportLog::load_from(&history, &RecordFilter::default())?,
                None => ReportLog::default(),
            };
            let ctx = PluginContext {
                config,
                report,
                filter: filter.into(),
            };
            let surface = registry.build(&id, &ctx)?;
            println!("== {} ==", surface.title());
            print!("{}", surface.render());
        }
    }
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| format!("invalid date {raw}: {err}"))
}
