//! Waits for windows that have not mapped yet.
//!
//! Applications launched at login map their windows seconds after the
//! session starts.  For every rule marked `expected` that matched nothing in
//! the first pass a [`RetryTask`] is created; the [`RetryScheduler`] then
//! sleeps, re-enumerates and re-matches until each task is placed or its
//! deadline passes.
//!
//! ```text
//!            window appears + placed
//!   Pending ─────────────────────────▶ Placed
//!      │  │
//!      │  │ window appears, backend refuses it
//!      │  └──────────────────────────▶ Failed
//!      │
//!      │ deadline passed / cancelled
//!      ▼
//!   Abandoned
//! ```
//!
//! Everything runs on the calling thread.  Time comes from a
//! [`Clock`](crate::traits::Clock) so tests never sleep for real.

use crate::config::RetryConfig;
use crate::matcher::best_match;
use crate::orchestrator::RunSummary;
use crate::placement::{PlacementEngine, PlacementOutcome};
use crate::rule::PlacementRule;
use crate::traits::{BackendError, Clock, WindowBackend};
use crate::window::{MonitorGeometry, WindowInfo};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while a cancellation flag is installed.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Exponential backoff: `initial`, doubling every step, capped at `max`.
///
/// Infinite iterator; the deadline is enforced by the caller.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// Why a task gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The deadline passed without a matching window showing up.
    DeadlineExceeded,
    /// The run was cancelled (SIGINT/SIGTERM).
    Cancelled,
}

/// Lifecycle of a [`RetryTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Placed,
    /// A matching window showed up but the backend failed to place it.
    /// Counted as errored, never as abandoned.
    Failed,
    Abandoned(AbandonReason),
}

/// One expected rule that is still waiting for its window.
#[derive(Debug, Clone)]
pub struct RetryTask {
    /// Index of the rule in the run's rule list.
    pub rule: usize,
    pub deadline: Instant,
    pub attempts: u32,
    pub state: TaskState,
    backoff: Backoff,
    next_attempt: Instant,
}

impl RetryTask {
    fn new(rule: usize, now: Instant, config: &RetryConfig) -> Self {
        let deadline = now + config.deadline();
        let mut backoff = Backoff::new(config.initial_backoff(), config.max_backoff());
        let first = backoff.next().unwrap_or_default();
        Self {
            rule,
            deadline,
            attempts: 0,
            state: TaskState::Pending,
            backoff,
            next_attempt: (now + first).min(deadline),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    fn reschedule(&mut self, now: Instant) {
        let delay = self.backoff.next().unwrap_or_default();
        self.next_attempt = (now + delay).min(self.deadline);
    }
}

/// Enumerate windows, retrying once on failure.
///
/// Returns the error of the second attempt if both fail; the caller decides
/// what snapshot to fall back to.
pub fn enumerate_with_retry<B: WindowBackend + ?Sized>(
    backend: &B,
) -> Result<Vec<WindowInfo>, BackendError> {
    match backend.enumerate() {
        Ok(windows) => Ok(windows),
        Err(e) => {
            warn!("{} enumeration failed, retrying once: {}", backend.name(), e);
            backend.enumerate()
        }
    }
}

/// Drives every [`RetryTask`] to `Placed` or `Abandoned`.
pub struct RetryScheduler<'a, C: Clock> {
    clock: &'a C,
    config: RetryConfig,
    tasks: Vec<RetryTask>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, C: Clock> RetryScheduler<'a, C> {
    pub fn new(clock: &'a C, config: RetryConfig) -> Self {
        Self {
            clock,
            config,
            tasks: Vec::new(),
            cancel: None,
        }
    }

    /// Abandon all pending tasks as soon as `flag` becomes `true`.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Start waiting for a window matching `rules[rule]`.
    pub fn schedule(&mut self, rule: usize) {
        let task = RetryTask::new(rule, self.clock.now(), &self.config);
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[RetryTask] {
        &self.tasks
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Run until no task is pending.
    ///
    /// `snapshot` is the last successful enumeration; it is reused whenever
    /// a fresh enumeration fails twice in a row.
    pub fn run<B: WindowBackend + ?Sized>(
        &mut self,
        backend: &B,
        engine: &PlacementEngine,
        rules: &[PlacementRule],
        monitors: &[MonitorGeometry],
        mut snapshot: Vec<WindowInfo>,
        summary: &mut RunSummary,
    ) {
        if self.tasks.is_empty() {
            return;
        }
        info!(
            "waiting for {} expected window(s) (deadline {} ms)",
            self.tasks.len(),
            self.config.deadline_ms
        );

        while self.tasks.iter().any(RetryTask::is_pending) {
            if self.cancelled() {
                self.abandon_pending(AbandonReason::Cancelled, rules, summary);
                summary.cancelled = true;
                break;
            }

            let now = self.clock.now();
            let wake = self
                .tasks
                .iter()
                .filter(|t| t.is_pending())
                .map(|t| t.next_attempt)
                .min()
                .unwrap_or(now);
            if wake > now {
                let mut nap = wake - now;
                if self.cancel.is_some() {
                    nap = nap.min(CANCEL_POLL);
                }
                self.clock.sleep(nap);
                continue;
            }

            match enumerate_with_retry(backend) {
                Ok(windows) => {
                    snapshot = windows;
                    summary.enumeration_failed = false;
                }
                Err(e) => warn!("enumeration failed twice, reusing previous snapshot: {}", e),
            }

            for task in self.tasks.iter_mut().filter(|t| t.is_pending()) {
                if task.next_attempt > now {
                    continue;
                }
                task.attempts += 1;
                let rule = &rules[task.rule];
                let mut placed = false;
                let mut failed = false;
                for window in snapshot
                    .iter()
                    .filter(|w| best_match(w, rules) == Some(task.rule))
                {
                    match engine.place(backend, window, rule, monitors) {
                        Ok(outcome @ PlacementOutcome::Gone) => summary.record(&outcome),
                        Ok(outcome) => {
                            summary.record(&outcome);
                            placed = true;
                        }
                        Err(e) => {
                            warn!("placing {} for rule {}: {}", window.handle, rule.label(), e);
                            summary.errored += 1;
                            failed = true;
                        }
                    }
                }

                if placed {
                    info!(
                        "rule {} satisfied after {} attempt(s)",
                        rule.label(),
                        task.attempts
                    );
                    task.state = TaskState::Placed;
                } else if failed {
                    task.state = TaskState::Failed;
                } else if now >= task.deadline {
                    warn!(
                        "giving up on rule {} after {} attempt(s): deadline exceeded",
                        rule.label(),
                        task.attempts
                    );
                    task.state = TaskState::Abandoned(AbandonReason::DeadlineExceeded);
                    summary.abandon(rule.label());
                } else {
                    task.reschedule(now);
                    debug!(
                        "rule {}: no window yet (attempt {})",
                        rule.label(),
                        task.attempts
                    );
                }
            }
        }
    }

    fn abandon_pending(
        &mut self,
        reason: AbandonReason,
        rules: &[PlacementRule],
        summary: &mut RunSummary,
    ) {
        for task in self.tasks.iter_mut().filter(|t| t.is_pending()) {
            warn!("abandoning rule {}: {:?}", rules[task.rule].label(), reason);
            task.state = TaskState::Abandoned(reason);
            summary.abandon(rules[task.rule].label());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{GeometrySpec, Length, Matcher, MonitorSelector};
    use crate::traits::testing::{monitor_1080p, window, FakeBackend, FakeClock, ScheduledWindow};
    use crate::window::Geometry;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn expected_rule(class: &str) -> PlacementRule {
        PlacementRule {
            name: Some(class.to_lowercase()),
            matcher: Matcher {
                class: Some(class.into()),
                ..Default::default()
            },
            geometry: GeometrySpec {
                x: Length::Percent(0.0),
                y: Length::Percent(0.0),
                width: Length::Percent(50.0),
                height: Length::Percent(50.0),
            },
            monitor: MonitorSelector::Primary,
            priority: 0,
            expected: true,
            desktop: None,
        }
    }

    fn config(deadline_ms: u64) -> RetryConfig {
        RetryConfig {
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            deadline_ms,
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let seq: Vec<u64> = Backoff::new(ms(200), ms(5000))
            .take(8)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(seq, vec![200, 400, 800, 1600, 3200, 5000, 5000, 5000]);
    }

    #[test]
    fn backoff_initial_above_cap_is_capped() {
        let mut b = Backoff::new(ms(900), ms(500));
        assert_eq!(b.next(), Some(ms(500)));
        assert_eq!(b.next(), Some(ms(500)));
    }

    #[test]
    fn missing_window_is_abandoned_exactly_once_at_deadline() {
        let backend = FakeBackend::new(vec![monitor_1080p()]);
        let clock = FakeClock::new();
        let rules = vec![expected_rule("Editor")];
        let mut summary = RunSummary::default();

        let mut sched = RetryScheduler::new(&clock, config(1000));
        sched.schedule(0);
        sched.run(
            &backend,
            &PlacementEngine::new(0),
            &rules,
            &backend.monitors,
            Vec::new(),
            &mut summary,
        );

        // Attempts at 200, 600 and finally at the 1000 ms deadline.
        assert_eq!(clock.sleeps.borrow().as_slice(), &[ms(200), ms(400), ms(400)]);
        let task = &sched.tasks()[0];
        assert_eq!(task.attempts, 3);
        assert_eq!(task.state, TaskState::Abandoned(AbandonReason::DeadlineExceeded));
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.abandoned_rules, vec!["editor".to_string()]);
        assert_eq!(backend.enumerations.get(), 3);
    }

    #[test]
    fn late_window_is_placed() {
        let backend = FakeBackend::new(vec![monitor_1080p()]);
        backend.scheduled.borrow_mut().push(ScheduledWindow {
            visible_after: 2,
            window: window(5, "Editor", Geometry::new(100, 100, 640, 480)),
        });
        let clock = FakeClock::new();
        let rules = vec![expected_rule("Editor")];
        let mut summary = RunSummary::default();

        let mut sched = RetryScheduler::new(&clock, config(30_000));
        sched.schedule(0);
        sched.run(
            &backend,
            &PlacementEngine::new(0),
            &rules,
            &backend.monitors,
            Vec::new(),
            &mut summary,
        );

        let task = &sched.tasks()[0];
        assert_eq!(task.state, TaskState::Placed);
        assert_eq!(task.attempts, 3);
        assert_eq!(summary.placed, 1);
        assert_eq!(summary.abandoned, 0);
        assert_eq!(
            backend.geometry_of(&crate::window::WindowHandle::X11(5)),
            Some(Geometry::new(0, 0, 960, 540))
        );
    }

    #[test]
    fn refused_late_window_is_errored_not_abandoned() {
        let backend = FakeBackend::new(vec![monitor_1080p()]);
        backend.scheduled.borrow_mut().push(ScheduledWindow {
            visible_after: 0,
            window: window(6, "Editor", Geometry::new(100, 100, 640, 480)),
        });
        backend.apply_failures.borrow_mut().push(crate::window::WindowHandle::X11(6));
        let clock = FakeClock::new();
        let rules = vec![expected_rule("Editor")];
        let mut summary = RunSummary::default();

        let mut sched = RetryScheduler::new(&clock, config(1000));
        sched.schedule(0);
        sched.run(
            &backend,
            &PlacementEngine::new(0),
            &rules,
            &backend.monitors,
            Vec::new(),
            &mut summary,
        );

        let task = &sched.tasks()[0];
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempts, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.abandoned, 0);
        assert_eq!(backend.applies.borrow().len(), 1);
    }

    #[test]
    fn window_claimed_by_higher_priority_rule_does_not_satisfy_task() {
        let backend = FakeBackend::new(vec![monitor_1080p()])
            .with_window(window(1, "Editor", Geometry::new(0, 0, 10, 10)));
        let clock = FakeClock::new();
        let mut other = expected_rule("Edit");
        other.priority = 10;
        other.expected = false;
        let rules = vec![expected_rule("Editor"), other];
        let mut summary = RunSummary::default();

        let mut sched = RetryScheduler::new(&clock, config(500));
        sched.schedule(0);
        sched.run(
            &backend,
            &PlacementEngine::new(0),
            &rules,
            &backend.monitors,
            Vec::new(),
            &mut summary,
        );
        assert_eq!(summary.abandoned, 1);
        assert!(backend.applies.borrow().is_empty());
    }

    #[test]
    fn cancellation_abandons_pending_tasks() {
        let backend = FakeBackend::new(vec![monitor_1080p()]);
        let clock = FakeClock::new();
        let rules = vec![expected_rule("Editor"), expected_rule("Mail")];
        let mut summary = RunSummary::default();
        let flag = Arc::new(AtomicBool::new(true));

        let mut sched = RetryScheduler::new(&clock, config(30_000));
        sched.set_cancel_flag(flag);
        sched.schedule(0);
        sched.schedule(1);
        sched.run(
            &backend,
            &PlacementEngine::new(0),
            &rules,
            &backend.monitors,
            Vec::new(),
            &mut summary,
        );

        assert!(summary.cancelled);
        assert_eq!(summary.abandoned, 2);
        assert!(sched
            .tasks()
            .iter()
            .all(|t| t.state == TaskState::Abandoned(AbandonReason::Cancelled)));
        assert_eq!(backend.enumerations.get(), 0);
    }

    #[test]
    fn sleeps_are_sliced_when_cancellable() {
        let backend = FakeBackend::new(vec![monitor_1080p()]);
        let clock = FakeClock::new();
        let rules = vec![expected_rule("Editor")];
        let mut summary = RunSummary::default();

        let mut sched = RetryScheduler::new(&clock, config(300));
        sched.set_cancel_flag(Arc::new(AtomicBool::new(false)));
        sched.schedule(0);
        sched.run(
            &backend,
            &PlacementEngine::new(0),
            &rules,
            &backend.monitors,
            Vec::new(),
            &mut summary,
        );
        assert!(clock.sleeps.borrow().iter().all(|d| *d <= CANCEL_POLL));
        assert_eq!(summary.abandoned, 1);
        assert!(!summary.cancelled);
    }

    #[test]
    fn failed_enumeration_is_retried_once() {
        let backend = FakeBackend::new(vec![monitor_1080p()])
            .with_window(window(1, "Editor", Geometry::new(0, 0, 10, 10)));
        backend
            .enumerate_failures
            .borrow_mut()
            .push_back(BackendError::Backend("socket hiccup".into()));
        let windows = enumerate_with_retry(&backend).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(backend.enumerations.get(), 2);
    }

    #[test]
    fn double_failure_reuses_previous_snapshot() {
        let w = window(4, "Editor", Geometry::new(0, 0, 10, 10));
        let backend = FakeBackend::new(vec![monitor_1080p()]).with_window(w.clone());
        for _ in 0..2 {
            backend
                .enumerate_failures
                .borrow_mut()
                .push_back(BackendError::Backend("down".into()));
        }
        let clock = FakeClock::new();
        let rules = vec![expected_rule("Editor")];
        let mut summary = RunSummary::default();

        let mut sched = RetryScheduler::new(&clock, config(5000));
        sched.schedule(0);
        sched.run(
            &backend,
            &PlacementEngine::new(0),
            &rules,
            &backend.monitors,
            vec![w],
            &mut summary,
        );
        assert_eq!(sched.tasks()[0].state, TaskState::Placed);
        assert_eq!(sched.tasks()[0].attempts, 1);
        assert_eq!(summary.placed, 1);
    }
}
