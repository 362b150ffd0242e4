//! Beacon Attendance CLI
//!
//! Administers rotating modules, records sightings and prints attendance
//! queries as JSON.

use anyhow::{bail, Context};
use beacon_attendance::{
    activity::create_shared_log_with_persistence,
    config::Config,
    core::{AttendanceAggregator, MemberId, SessionAccumulator, StatsOrder},
    identity::{Directory, IdentityStore},
    rotation::{Module, RotationEvent, RotationScheduler, Seed},
    store::{JsonFileStore, SharedStore},
    SharedActivityLog, VERSION,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beacon-attendance")]
#[command(version = VERSION)]
#[command(about = "Attendance tracking through rotating network identifiers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage rotating modules
    Module {
        #[command(subcommand)]
        action: ModuleCommand,
    },

    /// Run rotation timers until Ctrl+C
    Run,

    /// Record a sighting for a member
    Sighting {
        /// Member identifier
        member: String,

        /// Module the member was seen at
        #[arg(long, conflicts_with = "identifier")]
        module: Option<String>,

        /// Identifier the member's device reported
        #[arg(long)]
        identifier: Option<String>,

        /// Sighting time (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Summary of one day
    Daily {
        /// Date (YYYY-MM-DD, defaults to today)
        date: Option<NaiveDate>,
    },

    /// Summary of a date range with per-member statistics
    Range {
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,

        /// presentCount, avgDuration, totalDuration or member; prefix with - for descending
        #[arg(long, default_value = "-presentCount", allow_hyphen_values = true)]
        order: StatsOrder,
    },

    /// Members seen within the live window
    Live {
        /// Window in minutes (defaults to the configured live window)
        #[arg(long)]
        window: Option<i64>,
    },

    /// A member's attendance today, or over a range when --start is given
    Member {
        member: String,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// Show activity counters and modules
    Status,

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum ModuleCommand {
    /// Register a new module
    Add {
        name: String,

        /// Prefix of the published identifier
        #[arg(long)]
        prefix: String,

        /// Initial seed
        #[arg(long)]
        seed: u64,

        /// Minutes between rotations
        #[arg(long, default_value = "10")]
        interval: u32,
    },

    /// List modules
    List,

    /// Stop rotating a module
    Pause { name: String },

    /// Resume rotating a module
    Resume { name: String },

    /// Replace a module's seed
    Seed { name: String, seed: u64 },
}

/// Everything a command needs, wired from the configuration.
struct App {
    config: Config,
    activity: SharedActivityLog,
    scheduler: RotationScheduler,
    accumulator: SessionAccumulator,
    aggregator: AttendanceAggregator,
}

impl App {
    fn open(config: Config) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        config
            .ensure_directories()
            .context("could not create data directory")?;

        let tz = config.tz()?;
        let store: SharedStore = Arc::new(
            JsonFileStore::open(config.store_path())
                .with_context(|| format!("could not open {}", config.store_path().display()))?,
        );

        let identities: Arc<dyn IdentityStore> = match config.identity_path {
            Some(ref path) => Arc::new(
                Directory::load(path)
                    .with_context(|| format!("could not load identities from {}", path.display()))?,
            ),
            None => Arc::new(Directory::new()),
        };

        let activity = create_shared_log_with_persistence(config.activity_path());

        let scheduler =
            RotationScheduler::new(Arc::clone(&store)).with_activity_log(Arc::clone(&activity));
        let accumulator =
            SessionAccumulator::new(Arc::clone(&store), tz, config.merge_threshold()?)
                .with_max_retries(config.max_merge_retries)
                .with_activity_log(Arc::clone(&activity));
        let aggregator = AttendanceAggregator::new(store, identities, tz)
            .with_live_window(config.live_window()?);

        Ok(Self {
            config,
            activity,
            scheduler,
            accumulator,
            aggregator,
        })
    }

    fn save_activity(&self) {
        if let Err(e) = self.activity.save() {
            tracing::warn!("could not save activity counters: {e}");
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("beacon_attendance=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("could not load configuration")?;

    if let Commands::Config = cli.command {
        return cmd_config(&config);
    }

    let app = App::open(config)?;
    let now = Utc::now();

    match cli.command {
        Commands::Module { action } => cmd_module(&app, action, now),
        Commands::Run => cmd_run(app),
        Commands::Sighting {
            member,
            module,
            identifier,
            at,
        } => cmd_sighting(&app, &member, module, identifier, at.unwrap_or(now)),
        Commands::Daily { date } => {
            let date = date.unwrap_or_else(|| app.aggregator.today(now));
            print_json(&app.aggregator.daily_summary(date)?)
        }
        Commands::Range { start, end, order } => {
            let today = app.aggregator.today(now);
            print_json(&app.aggregator.range_summary(start, end, order, today)?)
        }
        Commands::Live { window } => {
            let window = window
                .map(|minutes| {
                    chrono::Duration::try_minutes(minutes)
                        .with_context(|| format!("window of {minutes} minutes is out of range"))
                })
                .transpose()?;
            print_json(&app.aggregator.live_presence(now, window)?)
        }
        Commands::Member { member, start, end } => {
            let member = MemberId::new(member);
            if start.is_some() {
                let today = app.aggregator.today(now);
                print_json(&app.aggregator.member_attendance(&member, start, end, today)?)
            } else {
                print_json(&app.aggregator.member_current_day(&member, now)?)
            }
        }
        Commands::Status => cmd_status(&app),
        Commands::Config => cmd_config(&app.config),
    }
}

fn cmd_module(app: &App, action: ModuleCommand, now: DateTime<Utc>) -> anyhow::Result<()> {
    let result = match action {
        ModuleCommand::Add {
            name,
            prefix,
            seed,
            interval,
        } => {
            let module = Module::new(name, prefix, Seed::new(seed)?, interval)?;
            print_json(&app.scheduler.register(module)?)
        }
        ModuleCommand::List => print_json(&app.scheduler.modules()?),
        ModuleCommand::Pause { name } => print_json(&app.scheduler.set_paused(&name, true)?),
        ModuleCommand::Resume { name } => print_json(&app.scheduler.set_paused(&name, false)?),
        ModuleCommand::Seed { name, seed } => {
            let edit = app.scheduler.edit_seed(&name, Seed::new(seed)?, now)?;
            tracing::info!(module = %name, ?edit, "seed edit applied");
            print_json(&app.scheduler.module(&name)?)
        }
    };
    app.save_activity();
    result
}

fn cmd_run(app: App) -> anyhow::Result<()> {
    println!("Beacon Attendance v{VERSION}");
    println!("Rotating every {}s tick", app.config.tick_interval_secs);
    println!("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(Arc::clone(&running))?;

    let (tx, rx) = crossbeam_channel::unbounded::<RotationEvent>();
    let printer = thread::spawn(move || {
        for event in rx.iter() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("could not serialize rotation event: {e}"),
            }
        }
    });

    let App {
        config,
        activity,
        scheduler,
        ..
    } = app;
    let scheduler = Arc::new(scheduler.with_events(tx));
    let every = config.tick_interval()?;

    let runtime = tokio::runtime::Runtime::new().context("could not start async runtime")?;
    runtime.block_on(async {
        let supervisor = Arc::clone(&scheduler).spawn(every, Arc::clone(&running));
        tracing::info!("rotation supervisor started");

        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        supervisor.abort();
        let _ = supervisor.await;
    });

    // Dropping the last scheduler closes the event channel.
    drop(scheduler);
    if printer.join().is_err() {
        tracing::warn!("event printer panicked");
    }

    println!("Stopping rotation...");
    if let Err(e) = activity.save() {
        eprintln!("Warning: Could not save activity counters: {e}");
    }
    println!("{}", activity.summary());
    Ok(())
}

fn cmd_sighting(
    app: &App,
    member: &str,
    module: Option<String>,
    identifier: Option<String>,
    at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let member = MemberId::new(member);
    let result = match (module, identifier) {
        (Some(module), None) => app.accumulator.record_sighting(&member, &module, at),
        (None, Some(identifier)) => app.accumulator.record_report(&member, &identifier, at),
        _ => bail!("pass exactly one of --module or --identifier"),
    };
    app.save_activity();
    print_json(&result?)
}

fn cmd_status(app: &App) -> anyhow::Result<()> {
    println!("Beacon Attendance Status");
    println!("========================");
    println!();
    println!("Configuration:");
    println!("  Config file: {:?}", Config::config_path());
    println!("  Record store: {:?}", app.config.store_path());
    println!("  Time zone: {}", app.config.timezone);
    println!();

    let modules = app.scheduler.modules()?;
    println!("Modules ({}):", modules.len());
    for module in &modules {
        let last = module
            .last_refresh_time()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {} [{:?}] {} (every {}m, last rotated {})",
            module.name(),
            module.state(),
            module.published_identifier(),
            module.refresh_interval_minutes(),
            last
        );
    }
    println!();
    println!("{}", app.activity.summary());
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("Config file: {:?}", Config::config_path());
    print_json(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("could not set Ctrl+C handler")
}
