use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ora::alarm::port::{AlarmPayload, TimerAlarmPort};
use ora::boot::{BootOutcome, BootPhase};
use ora::clock::{Clock, ManualClock, SystemClock, parse_instant};
use ora::config::{
    BootFlagStore, FileBootFlags, FilePreferences, MemoryBootFlags, MemoryPreferences,
    PreferenceStore,
};
use ora::countdown::{format_countdown, remaining, time_until};
use ora::event::model::EventId;
use ora::event::store::{EventStore, MemoryEventStore};
use ora::notification::content::{refresh_interval, select_event_to_show};
use ora::notification::notifier::LogNotifier;
use ora::notification::service::PersistentNotificationService;
use ora::reminder::scheduler::ReminderScheduler;
use ora::reminder::token::ReminderLabel;
use ora::runtime::OraRuntime;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliBootPhase {
    Locked,
    Unlocked,
    Updated,
}

impl From<CliBootPhase> for BootPhase {
    fn from(value: CliBootPhase) -> Self {
        match value {
            CliBootPhase::Locked => BootPhase::LockedBoot,
            CliBootPhase::Unlocked => BootPhase::UserUnlocked,
            CliBootPhase::Updated => BootPhase::PackageReplaced,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Parser, Debug)]
#[command(
    name = "ora",
    version,
    about = "Event countdowns with exact reminders and a persistent notification"
)]
struct Cli {
    #[arg(long, global = true, default_value = "events.json")]
    events: PathBuf,

    /// Preferences file; defaults are used when omitted.
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,

    /// Boot-readable copy of the notifications flag.
    #[arg(long, global = true)]
    boot_flags: Option<PathBuf>,

    /// Freeze the clock at this RFC 3339 instant.
    #[arg(long, global = true)]
    now: Option<String>,

    /// Behave as if the exact alarm permission were revoked.
    #[arg(long, global = true)]
    deny_exact_alarms: bool,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the reminders every event would register.
    Plan,
    /// Print the countdown to an instant.
    Remaining {
        #[arg(long)]
        target: String,
    },
    /// Print the event the persistent notification would show.
    Select,
    /// Run the boot restore for a phase.
    Boot {
        #[arg(long, value_enum)]
        phase: CliBootPhase,
    },
    /// Turn notifications on or off.
    Notifications {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Pin or unpin an event.
    Pin {
        #[arg(long)]
        id: i64,
    },
    /// Archive or delete expired events.
    Sweep,
    /// Restore, then deliver reminders and keep the countdown notification updated.
    Run {
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

struct App {
    store: Arc<MemoryEventStore>,
    runtime: OraRuntime,
    clock: Arc<dyn Clock>,
    fired: mpsc::UnboundedReceiver<AlarmPayload>,
    // Keeps registered timers alive for the life of the command.
    _alarms: Arc<TimerAlarmPort>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_command(cli))
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("ora=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ora=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

async fn run_command(cli: Cli) -> Result<()> {
    let app = || build_app(&cli);
    match &cli.command {
        Command::Remaining { target } => {
            let now = current_instant(cli.now.as_deref())?;
            let target = parse_instant(target)?;
            let time = remaining(now, target);
            println!("{} ({})", format_countdown(&time), time_until(&time));
            Ok(())
        }
        Command::Plan => print_plan(&app()?).await,
        Command::Select => print_selection(&app()?).await,
        Command::Boot { phase } => run_boot(app()?, (*phase).into()).await,
        Command::Notifications { state } => {
            let app = app()?;
            let enabled = *state == Switch::On;
            let summary = app.runtime.set_notifications_enabled(enabled).await?;
            if enabled {
                println!(
                    "notifications on: {} events, {} alarms",
                    summary.events, summary.alarms
                );
                if summary.permission_denied {
                    println!("exact alarm permission missing; reminders not scheduled");
                }
            } else {
                println!("notifications off");
            }
            app.runtime.stop_persistent_notification().await;
            Ok(())
        }
        Command::Pin { id } => {
            let app = app()?;
            let event = app.runtime.toggle_pin(EventId(*id)).await?;
            let state = if event.is_pinned { "pinned" } else { "unpinned" };
            println!("{state} event {}: {}", event.id, event.title);
            app.runtime.stop_persistent_notification().await;
            Ok(())
        }
        Command::Sweep => {
            let swept = app()?.runtime.sweep_expired().await?;
            println!("swept {swept} expired events");
            Ok(())
        }
        Command::Run { duration_secs } => run_service(app()?, *duration_secs).await,
    }
}

fn current_instant(now: Option<&str>) -> Result<chrono::DateTime<chrono::Utc>> {
    match now {
        Some(now) => parse_instant(now),
        None => Ok(chrono::Utc::now()),
    }
}

fn build_app(cli: &Cli) -> Result<App> {
    let clock: Arc<dyn Clock> = match cli.now.as_deref() {
        Some(now) => Arc::new(ManualClock::new(parse_instant(now)?)),
        None => Arc::new(SystemClock),
    };

    let store = Arc::new(
        MemoryEventStore::open(&cli.events, Arc::clone(&clock))
            .with_context(|| format!("failed to load {}", cli.events.display()))?,
    );
    let preferences: Arc<dyn PreferenceStore> = match &cli.prefs {
        Some(path) => Arc::new(
            FilePreferences::open(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
        ),
        None => Arc::new(MemoryPreferences::default()),
    };
    let boot_flags: Arc<dyn BootFlagStore> = match &cli.boot_flags {
        Some(path) => Arc::new(FileBootFlags::new(path)),
        None => Arc::new(MemoryBootFlags::default()),
    };

    let (alarms, fired) = TimerAlarmPort::new(Arc::clone(&clock));
    let alarms = Arc::new(alarms);
    if cli.deny_exact_alarms {
        alarms.set_exact_allowed(false);
    }

    let notifier = Arc::new(LogNotifier::default());
    let service = Arc::new(PersistentNotificationService::new(
        store.clone(),
        notifier.clone(),
        Arc::clone(&preferences),
        Arc::clone(&clock),
    ));
    let runtime = OraRuntime::new(
        store.clone(),
        Arc::new(ReminderScheduler::new(alarms.clone(), Arc::clone(&clock))),
        notifier,
        service,
        preferences,
        boot_flags,
        Arc::clone(&clock),
    );

    Ok(App {
        store,
        runtime,
        clock,
        fired,
        _alarms: alarms,
    })
}

async fn print_plan(app: &App) -> Result<()> {
    let now = app.clock.now();
    let events = app.store.all_events().await?;
    if events.is_empty() {
        println!("no events");
        return Ok(());
    }

    for event in &events {
        let planned = ReminderScheduler::plan_reminders(event, now);
        if planned.is_empty() {
            println!("event {} \"{}\": no reminders", event.id, event.title);
            continue;
        }
        println!("event {} \"{}\":", event.id, event.title);
        if event.reminder_intervals.is_none() {
            let suggested = ReminderScheduler::smart_intervals(event.target, now)
                .into_iter()
                .map(|minutes| ReminderLabel::lead(minutes).short_text())
                .collect::<Vec<_>>();
            println!("  {:<14} {}", "suggested", suggested.join(", "));
        }
        for reminder in planned {
            println!(
                "  {:<14} {}  token {}",
                reminder.label.to_string(),
                reminder.fire_at.to_rfc3339(),
                reminder.token
            );
        }
    }
    Ok(())
}

async fn print_selection(app: &App) -> Result<()> {
    let now = app.clock.now();
    let events = app.store.all_events().await?;
    match select_event_to_show(&events, now) {
        Some(event) => {
            let time = remaining(now, event.target);
            let refresh = refresh_interval(event.target - now);
            println!(
                "event {} \"{}\" in {}, refresh every {}s",
                event.id,
                event.title,
                format_countdown(&time),
                refresh.as_secs()
            );
        }
        None => println!("no upcoming events"),
    }
    Ok(())
}

async fn run_boot(app: App, phase: BootPhase) -> Result<()> {
    if phase == BootPhase::LockedBoot {
        app.store.lock_storage();
    }
    let outcome = app.runtime.boot_coordinator().on_boot(phase).await;
    println!("{outcome}");
    app.runtime.stop_persistent_notification().await;

    if let BootOutcome::Aborted { reason } = outcome {
        bail!("boot restore failed: {reason}");
    }
    Ok(())
}

async fn run_service(app: App, duration_secs: Option<u64>) -> Result<()> {
    let summary = app.runtime.restore_on_launch().await?;
    println!(
        "restored {} events, {} alarms scheduled",
        summary.events, summary.alarms
    );
    if summary.permission_denied {
        println!("exact alarm permission missing; reminders not scheduled");
    }

    let fired_loop = app.runtime.spawn_fired_loop(app.fired);
    match duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
        }
    }

    info!("shutting down");
    app.runtime.stop_persistent_notification().await;
    fired_loop.abort();
    Ok(())
}
