//! Hyprland-specific implementations.
//!
//! This module provides the compositor-protocol backend for the
//! [`WindowBackend`](crate::traits::WindowBackend) trait, powered by
//! Hyprland's IPC socket.
//!
//! Nothing outside this module should reference Hyprland directly.

pub mod wm;
