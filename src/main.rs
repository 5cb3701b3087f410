//! Entry point for the **adjwin** command.
//!
//! `adjwin apply` runs one placement pass and exits with `0` (everything
//! placed), `1` (something abandoned, failed or interrupted) or `2`
//! (configuration error).  `adjwin monitors` and `adjwin windows` print what
//! the backend sees, which helps when writing rules.

use adjwin::config::{default_config_path, Config, ConfigError};
use adjwin::hyprland::wm::HyprlandBackend;
use adjwin::orchestrator::{Orchestrator, RunError};
use adjwin::traits::{BackendError, WindowBackend};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "adjwin", version, about = "Place windows according to rules")]
struct Cli {
    /// Path to the JSON rule file [default: $XDG_CONFIG_HOME/adjwin/config.json]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Add debug output (RUST_LOG still takes precedence)
    #[arg(short = 'D', long, global = true)]
    debug: bool,

    /// Windowing system to talk to
    #[arg(long, value_enum, default_value_t = BackendKind::Auto, global = true)]
    backend: BackendKind,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Place all matching windows once, waiting for expected ones
    Apply {
        /// Use this profile instead of detecting one from the monitors
        #[arg(short, long)]
        profile: Option<String>,

        /// Override retry.deadline_ms from the config
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Resolve and log target geometry without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List the monitors the backend reports
    Monitors,
    /// List the windows the backend reports
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Hyprland if HYPRLAND_INSTANCE_SIGNATURE is set, X11 otherwise
    Auto,
    X11,
    Hyprland,
}

/// What to do once a backend is connected.  Built before connecting, so
/// that a bad configuration is reported without touching the display.
enum Job {
    Apply {
        config: Config,
        profile: Option<String>,
        dry_run: bool,
    },
    Monitors,
    Windows,
}

impl Job {
    fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        match &cli.command {
            Cmd::Apply {
                profile,
                deadline_ms,
                dry_run,
            } => {
                let path = cli.config.clone().unwrap_or_else(default_config_path);
                let mut config = Config::load(&path)?;
                if let Some(ms) = deadline_ms {
                    config.retry.deadline_ms = *ms;
                }
                Ok(Job::Apply {
                    config,
                    profile: profile.clone(),
                    dry_run: *dry_run,
                })
            }
            Cmd::Monitors => Ok(Job::Monitors),
            Cmd::Windows => Ok(Job::Windows),
        }
    }
}

//  Main

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let job = match Job::from_cli(&cli) {
        Ok(job) => job,
        Err(e) => {
            error!("{}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let kind = match cli.backend {
        BackendKind::Auto if HyprlandBackend::detected() => BackendKind::Hyprland,
        BackendKind::Auto => BackendKind::X11,
        other => other,
    };

    let code = match kind {
        BackendKind::Hyprland => run(HyprlandBackend::new(), job),
        _ => run_x11(job),
    };
    std::process::exit(code);
}

#[cfg(feature = "backend-x11")]
fn run_x11(job: Job) -> i32 {
    match adjwin::x11::wm::X11Backend::connect() {
        Ok(backend) => run(backend, job),
        Err(e) => {
            error!("{}", e);
            EXIT_FAILURE
        }
    }
}

#[cfg(not(feature = "backend-x11"))]
fn run_x11(_job: Job) -> i32 {
    error!("adjwin was built without the `backend-x11` feature");
    EXIT_FAILURE
}

/// Run `job` against a connected backend.
fn run<B: WindowBackend>(backend: B, job: Job) -> i32 {
    match job {
        Job::Apply {
            config,
            profile,
            dry_run,
        } => apply(backend, config, profile, dry_run),
        Job::Monitors => report(list_monitors(&backend)),
        Job::Windows => report(list_windows(&backend)),
    }
}

fn apply<B: WindowBackend>(
    backend: B,
    config: Config,
    profile: Option<String>,
    dry_run: bool,
) -> i32 {
    let cancel = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&cancel)) {
            error!("cannot install handler for signal {}: {}", signal, e);
        }
    }

    let mut orchestrator = Orchestrator::new(backend, config);
    orchestrator.set_profile(profile);
    orchestrator.set_dry_run(dry_run);
    orchestrator.set_cancel_flag(cancel);

    match orchestrator.run() {
        Ok(summary) => {
            println!("{}", summary);
            summary.exit_code()
        }
        Err(RunError::Config(e)) => {
            error!("{}", e);
            EXIT_CONFIG
        }
        Err(e) => {
            error!("{}", e);
            EXIT_FAILURE
        }
    }
}

//  Helpers

fn report(result: Result<(), BackendError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            EXIT_FAILURE
        }
    }
}

fn list_monitors<B: WindowBackend>(backend: &B) -> Result<(), BackendError> {
    let monitors = backend.monitors()?;
    info!("found {} monitor(s)", monitors.len());
    for m in monitors {
        println!("{:>2}  {:<12} {}", m.index, m.name, m.bounds());
    }
    Ok(())
}

fn list_windows<B: WindowBackend>(backend: &B) -> Result<(), BackendError> {
    for w in backend.enumerate()? {
        println!(
            "{:<16} mon {:<2} {:<20} class={:?} instance={:?} title={:?}",
            w.handle.to_string(),
            w.monitor,
            w.geometry.to_string(),
            w.class,
            w.instance,
            w.title
        );
    }
    Ok(())
}
