//! Core traits that decouple adjwin from any specific windowing system or
//! time source.
//!
//! Every concrete backend (X11, Hyprland, a test harness, …) implements
//! [`WindowBackend`].  The [`Orchestrator`](crate::orchestrator::Orchestrator)
//! and the [`RetryScheduler`](crate::retry::RetryScheduler) only depend on
//! these abstractions.

use crate::window::{Geometry, MonitorGeometry, WindowHandle, WindowInfo};
use std::time::{Duration, Instant};

/// Errors a [`WindowBackend`] can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The handle no longer refers to a live window.  The window closed
    /// between enumeration and the call; callers skip it.
    #[error("window {0} no longer exists")]
    WindowGone(WindowHandle),

    /// Any other failure talking to the windowing system.  May be
    /// transient (a dropped IPC request) or permanent (no display).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Abstraction over a windowing system that can list, inspect and move
/// windows.
///
/// An implementation might talk to an X server, to Hyprland over IPC, or it
/// might be an in-memory stub used in tests.  All calls happen on a single
/// thread; implementations need not be thread-safe.
pub trait WindowBackend {
    /// Short name used in log messages (`"x11"`, `"hyprland"`).
    fn name(&self) -> &'static str;

    /// Return every managed window as it is *right now*.
    ///
    /// Must not cache between calls: the retry loop relies on each call
    /// reflecting windows that mapped since the previous one.
    fn enumerate(&self) -> Result<Vec<WindowInfo>, BackendError>;

    /// Return the list of monitors, in a stable order.  `index` of each
    /// entry equals its position in the returned vector.
    fn monitors(&self) -> Result<Vec<MonitorGeometry>, BackendError>;

    /// Move and resize `handle` to `geometry`.
    ///
    /// Applying the geometry a window already has must leave it unchanged.
    /// Returns [`BackendError::WindowGone`] when the window has closed.
    fn apply(&self, handle: &WindowHandle, geometry: Geometry) -> Result<(), BackendError>;

    /// Move `handle` to virtual desktop / workspace `desktop` (0-based).
    fn move_to_desktop(&self, handle: &WindowHandle, desktop: u32) -> Result<(), BackendError>;
}

/// Time source for the retry loop.
///
/// Production code uses [`SystemClock`]; tests substitute a clock whose
/// `sleep` merely advances a counter so that deadlines of many seconds run
/// instantly.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// The wall clock: [`Instant::now`] and [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
