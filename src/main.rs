mod api;
mod clock;
mod foreground;
mod logging;
mod notify;
mod profile;
mod store;
#[cfg(test)]
mod testing;
mod timer;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::api::{ApiContext, ApiServer, ApiServerConfig};
use crate::clock::{Clock, SystemClock, format_local_hm};
use crate::foreground::{TICK_INTERVAL, countdown_line, run_countdown};
use crate::notify::{FallbackNotifier, LogNotifier, Notifier};
use crate::profile::{
    ProfileUpdate, UserProfile, WAIT_PRESETS, format_wait, load_profile, parse_wait_minutes,
};
use crate::store::{JsonFileStore, KeyValueStore, default_store_path};
use crate::timer::engine::{FiredExpiry, TimerEngine, TimerStatus};
use crate::timer::model::{Category, format_countdown};
use crate::timer::poller::{
    DEFAULT_MINIMUM_INTERVAL_SECS, PollOutcome, PollerOptions, StoreTaskRegistry, run_poll_daemon,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCategory {
    #[value(alias = "beef")]
    Meat,
    #[value(alias = "poultry")]
    Chicken,
}

impl From<CliCategory> for Category {
    fn from(value: CliCategory) -> Self {
        match value {
            CliCategory::Meat => Category::Meat,
            CliCategory::Chicken => Category::Chicken,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliNotifier {
    /// Desktop notification, falling back to stdout.
    Desktop,
    /// Print the notification to stdout only.
    Log,
}

impl From<CliNotifier> for Arc<dyn Notifier> {
    fn from(value: CliNotifier) -> Self {
        match value {
            CliNotifier::Desktop => Arc::new(FallbackNotifier::default()),
            CliNotifier::Log => Arc::new(LogNotifier),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "fleishig",
    version,
    about = "Counts down the wait between eating meat or chicken and having dairy"
)]
struct Cli {
    /// JSON file holding the profile, the running timer and the background task.
    #[arg(long, global = true, env = "FLEISHIG_STORE")]
    store: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = CliNotifier::Desktop)]
    notifier: CliNotifier,

    /// Shortest spacing between background checks, stored with the registration.
    #[arg(long, global = true, default_value_t = DEFAULT_MINIMUM_INTERVAL_SECS)]
    min_check_interval_secs: u64,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show or edit your name and waiting times.
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Start the wait after eating meat or chicken. Replaces any running timer.
    Start {
        #[arg(value_enum)]
        category: CliCategory,
        /// Override the profile's wait (90, 1:30, 6h, 45m or 3h30m).
        #[arg(long, value_parser = parse_wait_arg)]
        minutes: Option<u32>,
        /// Keep printing the countdown until it ends.
        #[arg(long)]
        watch: bool,
    },
    /// Show the running timer, notifying if it has already ended.
    Status,
    /// Print the countdown once per second until it ends.
    Watch,
    /// Stop the running timer without notifying.
    Cancel,
    /// Run the background expiry check once.
    Poll,
    /// Run the background expiry check periodically.
    Daemon {
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Serve the local timer API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8477)]
        port: u16,
    },
    /// Open the timer window.
    Gui,
    /// Delete the profile, the timer and the background task.
    Reset,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    Show,
    Set {
        #[arg(long)]
        name: Option<String>,
        /// Wait after meat (90, 1:30, 6h, 45m or 3h30m).
        #[arg(long, value_parser = parse_wait_arg)]
        meat: Option<u32>,
        /// Wait after chicken.
        #[arg(long, value_parser = parse_wait_arg)]
        chicken: Option<u32>,
    },
}

fn parse_wait_arg(input: &str) -> Result<u32, String> {
    parse_wait_minutes(input).map_err(|err| err.to_string())
}

struct Runtime {
    store: Arc<JsonFileStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<StoreTaskRegistry>,
    poller_options: PollerOptions,
}

impl Runtime {
    fn new(cli: &Cli) -> Self {
        let path = cli.store.clone().unwrap_or_else(default_store_path);
        let store = Arc::new(JsonFileStore::open(path));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(StoreTaskRegistry::new(store.clone(), clock.clone()));
        Self {
            store,
            clock,
            notifier: cli.notifier.into(),
            registry,
            poller_options: PollerOptions {
                minimum_interval_seconds: cli.min_check_interval_secs,
                ..PollerOptions::default()
            },
        }
    }

    fn engine(&self) -> TimerEngine {
        TimerEngine::new(
            self.store.clone(),
            self.notifier.clone(),
            self.registry.clone(),
            self.clock.clone(),
        )
        .with_poller_options(self.poller_options)
    }

    fn shared_store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    let runtime = Runtime::new(&cli);
    info!(store = %runtime.store.path().display(), "store opened");

    match cli.command {
        Command::Profile { action } => run_profile(&runtime, action),
        Command::Start {
            category,
            minutes,
            watch,
        } => run_start(&runtime, category.into(), minutes, watch),
        Command::Status => {
            let status = runtime.engine().resume()?;
            print_status(&status);
            Ok(())
        }
        Command::Watch => run_watch(&mut runtime.engine()),
        Command::Cancel => {
            runtime.engine().cancel()?;
            println!("Timer cancelled.");
            Ok(())
        }
        Command::Poll => {
            let outcome = runtime.engine().poll();
            println!("{}", outcome.as_str());
            if outcome == PollOutcome::Failed {
                bail!("background check failed; see the log above");
            }
            Ok(())
        }
        Command::Daemon { interval_secs } => {
            if interval_secs == 0 {
                bail!("--interval-secs must be greater than zero");
            }
            let stop = AtomicBool::new(false);
            info!(interval_secs, "background checks running");
            let stats = run_poll_daemon(
                &runtime.engine(),
                &runtime.registry,
                Duration::from_secs(interval_secs),
                &stop,
            );
            info!(
                polls = stats.polls,
                fired = stats.fired,
                failed = stats.failed,
                "background checks stopped"
            );
            Ok(())
        }
        Command::Serve { bind, port } => {
            let server = ApiServer::start(
                ApiServerConfig {
                    bind_addr: bind.clone(),
                    port,
                    tick_interval: TICK_INTERVAL,
                },
                ApiContext {
                    engine: runtime.engine(),
                    store: runtime.shared_store(),
                },
            )
            .with_context(|| format!("failed to start local API at {bind}:{port}"))?;
            println!("Serving the timer API on http://{bind}:{port}/api/v1/timer");
            while server.is_running() {
                std::thread::sleep(Duration::from_millis(500));
            }
            bail!("API server stopped unexpectedly")
        }
        Command::Gui => ui::app::run_gui(runtime.engine(), runtime.shared_store()),
        Command::Reset => {
            runtime.store.clear()?;
            println!("All data cleared.");
            Ok(())
        }
    }
}

fn run_profile(runtime: &Runtime, action: ProfileCommand) -> Result<()> {
    match action {
        ProfileCommand::Show => match load_profile(&*runtime.store)? {
            Some(profile) => print_profile(&profile),
            None => println!("No profile saved."),
        },
        ProfileCommand::Set {
            name,
            meat,
            chicken,
        } => {
            let profile = profile::update_profile(
                &*runtime.store,
                ProfileUpdate {
                    name,
                    meat_minutes: meat,
                    chicken_minutes: chicken,
                },
            )?;
            println!("Profile saved.");
            print_profile(&profile);
        }
    }
    Ok(())
}

fn run_start(
    runtime: &Runtime,
    category: Category,
    minutes: Option<u32>,
    watch: bool,
) -> Result<()> {
    let profile = profile::require_profile(&*runtime.store)?;
    let minutes = minutes.unwrap_or_else(|| profile.waiting_times.for_category(category));

    let mut engine = runtime.engine();
    let display = engine
        .start(category, minutes, Some(&profile.name))
        .context("failed to start the timer")?;
    println!(
        "{}. Dairy at {} ({} from now).",
        category.headline(),
        format_local_hm(display.end_time_epoch_ms),
        format_countdown(display.seconds_remaining)
    );

    if watch {
        run_watch(&mut engine)?;
    }
    Ok(())
}

fn run_watch(engine: &mut TimerEngine) -> Result<()> {
    let stop = AtomicBool::new(false);
    let status = run_countdown(engine, TICK_INTERVAL, &stop, &mut io::stdout())?;
    print_status(&status);
    Ok(())
}

fn print_profile(profile: &UserProfile) {
    let waits = profile.waiting_times;
    println!("Name: {}", profile.name);
    println!("Wait after meat: {} ({} min)", format_wait(waits.meat), waits.meat);
    println!(
        "Wait after chicken: {} ({} min)",
        format_wait(waits.chicken),
        waits.chicken
    );
    let presets = WAIT_PRESETS
        .iter()
        .map(|preset| format!("{} ({})", preset.label, preset.minutes))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Common waits: {presets}");
}

fn print_status(status: &TimerStatus) {
    match status {
        TimerStatus::Idle => println!("No active timer."),
        TimerStatus::Running(display) => println!(
            "{}; dairy at {}.",
            countdown_line(display),
            format_local_hm(display.end_time_epoch_ms)
        ),
        TimerStatus::Expired(FiredExpiry {
            notification,
            delivered,
            ..
        }) => {
            println!("Wait is over: {}", notification.title);
            if !delivered {
                println!("{}", notification.body);
            }
        }
    }
}
