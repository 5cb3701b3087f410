//! The main orchestrator that ties configuration, backend, matcher,
//! placement engine and retry scheduler together.
//!
//! One call to [`Orchestrator::run`] is one complete pass:
//!
//! 1. query monitors and pick the rule set (profile selection);
//! 2. validate every rule's monitor selector against the live monitors;
//! 3. enumerate windows, match each one, place the matches;
//! 4. hand expected rules that matched nothing to the
//!    [`RetryScheduler`];
//! 5. return a [`RunSummary`].
//!
//! Only configuration problems abort a run.  Everything that can go wrong
//! with an individual window is logged and counted.

use crate::config::{Config, ConfigError};
use crate::matcher::best_match;
use crate::placement::{PlacementEngine, PlacementError, PlacementOutcome};
use crate::retry::{enumerate_with_retry, RetryScheduler};
use crate::rule::{MonitorSelector, PlacementRule};
use crate::traits::{BackendError, Clock, SystemClock, WindowBackend};
use crate::window::MonitorGeometry;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Possible errors from a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// The rules cannot be applied as written.  Nothing was placed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The backend could not report monitors, so no geometry can be
    /// resolved.
    #[error("cannot query monitors: {0}")]
    Monitors(BackendError),
}

/// Counts of what happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Windows moved or resized.
    pub placed: usize,
    /// Windows that already had their target geometry.
    pub unchanged: usize,
    /// Windows that closed before they could be placed.
    pub gone: usize,
    /// Windows the backend failed to place.
    pub errored: usize,
    /// Windows only resolved because of `--dry-run`.
    pub skipped: usize,
    /// Expected rules whose window never showed up.
    pub abandoned: usize,
    /// Labels of the abandoned rules, in the order they gave up.
    pub abandoned_rules: Vec<String>,
    /// The run was interrupted.
    pub cancelled: bool,
    /// No enumeration succeeded, so the windows were never seen.
    pub enumeration_failed: bool,
}

impl RunSummary {
    /// Count one placement outcome.
    pub fn record(&mut self, outcome: &PlacementOutcome) {
        match outcome {
            PlacementOutcome::Placed(_) => self.placed += 1,
            PlacementOutcome::Unchanged(_) => self.unchanged += 1,
            PlacementOutcome::Gone => self.gone += 1,
            PlacementOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    /// Count one abandoned retry task.
    pub fn abandon(&mut self, label: String) {
        self.abandoned += 1;
        self.abandoned_rules.push(label);
    }

    /// Process exit status for this summary.
    ///
    /// `0` when every matched window was placed, `1` when anything was
    /// abandoned or failed, windows could not be enumerated at all, or the
    /// run was cancelled.  (`2` is reserved for configuration errors, which
    /// never produce a summary.)
    pub fn exit_code(&self) -> i32 {
        if self.abandoned > 0 || self.errored > 0 || self.cancelled || self.enumeration_failed {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "placed {}, unchanged {}, gone {}, errored {}, abandoned {}",
            self.placed, self.unchanged, self.gone, self.errored, self.abandoned
        )?;
        if self.skipped > 0 {
            write!(f, ", dry-run {}", self.skipped)?;
        }
        if !self.abandoned_rules.is_empty() {
            write!(f, " ({})", self.abandoned_rules.join(", "))?;
        }
        if self.enumeration_failed {
            write!(f, " [enumeration failed]")?;
        }
        if self.cancelled {
            write!(f, " [cancelled]")?;
        }
        Ok(())
    }
}

/// Runs one placement pass against a [`WindowBackend`].
///
/// Generic over the backend and the clock so it is completely independent
/// of X11, Hyprland or wall-clock time.
///
/// # Typical usage
///
/// ```ignore
/// let config = Config::load(&path)?;
/// let summary = Orchestrator::new(X11Backend::connect()?, config).run()?;
/// std::process::exit(summary.exit_code());
/// ```
pub struct Orchestrator<B: WindowBackend, C: Clock = SystemClock> {
    backend: B,
    clock: C,
    config: Config,
    profile: Option<String>,
    dry_run: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl<B: WindowBackend> Orchestrator<B, SystemClock> {
    /// Create an orchestrator that uses the wall clock.
    pub fn new(backend: B, config: Config) -> Self {
        Self::with_clock(backend, SystemClock, config)
    }
}

impl<B: WindowBackend, C: Clock> Orchestrator<B, C> {
    pub fn with_clock(backend: B, clock: C, config: Config) -> Self {
        Self {
            backend,
            clock,
            config,
            profile: None,
            dry_run: false,
            cancel: None,
        }
    }

    /// Force a profile instead of detecting one from the monitors.
    pub fn set_profile(&mut self, profile: Option<String>) {
        self.profile = profile;
    }

    /// Resolve targets without moving anything.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Abandon waiting as soon as `flag` becomes `true`.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Return a shared reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Execute one full pass.
    pub fn run(&self) -> Result<RunSummary, RunError> {
        let monitors = self.query_monitors()?;
        info!(
            "{} backend reports {} monitor(s)",
            self.backend.name(),
            monitors.len()
        );

        let names: Vec<String> = monitors.iter().map(|m| m.name.clone()).collect();
        let rules = self.config.select_rules(self.profile.as_deref(), &names)?;
        let engine = PlacementEngine::new(self.config.primary_index()).dry_run(self.dry_run);
        if self.config.primary_monitor.is_some() {
            engine
                .check_selector(MonitorSelector::Primary, &monitors)
                .map_err(|e| ConfigError(format!("primary_monitor: {}", e)))?;
        }
        check_selectors(&engine, &rules, &monitors)?;

        let mut summary = RunSummary::default();
        let snapshot = match enumerate_with_retry(&self.backend) {
            Ok(windows) => windows,
            Err(e) => {
                error!("cannot enumerate windows, continuing with none: {}", e);
                summary.enumeration_failed = true;
                Vec::new()
            }
        };
        debug!("{} window(s) enumerated", snapshot.len());

        let mut satisfied = HashSet::new();
        for window in &snapshot {
            let Some(idx) = best_match(window, &rules) else {
                debug!("{} ({}): no rule", window.handle, window.class);
                continue;
            };
            let rule = &rules[idx];
            match engine.place(&self.backend, window, rule, &monitors) {
                Ok(outcome) => {
                    summary.record(&outcome);
                    if outcome != PlacementOutcome::Gone {
                        satisfied.insert(idx);
                    }
                }
                Err(e) => {
                    warn!("placing {} with rule {}: {}", window.handle, rule.label(), e);
                    summary.errored += 1;
                }
            }
        }

        let mut scheduler = RetryScheduler::new(&self.clock, self.config.retry);
        if let Some(flag) = &self.cancel {
            scheduler.set_cancel_flag(flag.clone());
        }
        for (idx, rule) in rules.iter().enumerate() {
            if rule.expected && !satisfied.contains(&idx) {
                debug!("expected rule {} matched nothing yet", rule.label());
                scheduler.schedule(idx);
            }
        }
        scheduler.run(
            &self.backend,
            &engine,
            &rules,
            &monitors,
            snapshot,
            &mut summary,
        );

        info!("{}", summary);
        Ok(summary)
    }

    /// Query monitors, retrying once like enumeration does.
    fn query_monitors(&self) -> Result<Vec<MonitorGeometry>, RunError> {
        let monitors = match self.backend.monitors() {
            Ok(m) => m,
            Err(e) => {
                warn!("monitor query failed, retrying once: {}", e);
                self.backend.monitors().map_err(RunError::Monitors)?
            }
        };
        if monitors.is_empty() {
            return Err(RunError::Monitors(BackendError::Backend(
                "no monitors reported".into(),
            )));
        }
        Ok(monitors)
    }
}

/// Reject rules whose monitor selector points at a monitor that does not
/// exist.  Runs before any window is touched.
fn check_selectors(
    engine: &PlacementEngine,
    rules: &[PlacementRule],
    monitors: &[MonitorGeometry],
) -> Result<(), ConfigError> {
    for rule in rules {
        engine
            .check_selector(rule.monitor, monitors)
            .map_err(|e: PlacementError| ConfigError(format!("rule {}: {}", rule.label(), e)))?;
    }
    Ok(())
}

//  Tests
