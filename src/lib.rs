//! **adjwin**: rule-based window placement.
//!
//! adjwin runs once per login (or whenever the monitor layout changes),
//! finds every window, matches it against declarative placement rules and
//! moves/resizes it.  Rules for applications that are still starting up can
//! be marked `expected`; adjwin then polls for their windows with
//! exponential backoff until a deadline.
//!
//! # Architecture
//!
//! The crate is organised around one core trait:
//!
//! * [`traits::WindowBackend`] abstracts window enumeration, monitor
//!   geometry and move/resize so the rule logic is not coupled to any
//!   specific windowing system.
//!
//! On top of it sit the pure [`matcher`], the [`placement`] engine, the
//! [`retry`] scheduler and the [`orchestrator`] that runs one pass.
//! Concrete backends live in [`x11`] (EWMH via `x11rb`) and [`hyprland`]
//! (Hyprland IPC).

pub mod config;
pub mod hyprland;
pub mod matcher;
pub mod orchestrator;
pub mod placement;
pub mod retry;
pub mod rule;
pub mod traits;
pub mod window;
#[cfg(feature = "backend-x11")]
pub mod x11;
