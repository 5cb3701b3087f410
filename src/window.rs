//! Types shared by every component of adjwin.
//!
//! This module defines the vocabulary the backends, the matcher and the
//! placement engine agree on: [`WindowHandle`] identifies a live window,
//! [`WindowInfo`] is a snapshot of one, [`MonitorGeometry`] describes one
//! output and [`Geometry`] is a rectangle in global pixel coordinates.

use std::fmt;

/// Opaque, backend-specific identifier for a live window.
///
/// A handle is only meaningful to the backend that produced it and becomes
/// invalid once the window closes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WindowHandle {
    /// An X11 window id (a client listed in `_NET_CLIENT_LIST`).
    X11(u32),
    /// A compositor-side address, e.g. Hyprland's `0x55d0c4a1b2c0`.
    Address(String),
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowHandle::X11(id) => write!(f, "0x{:08x}", id),
            WindowHandle::Address(addr) => write!(f, "{}", addr),
        }
    }
}

/// A rectangle in global (root window / layout) pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre point of the rectangle.
    pub fn centre(&self) -> (i64, i64) {
        (
            self.x as i64 + self.width as i64 / 2,
            self.y as i64 + self.height as i64 / 2,
        )
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Snapshot of one window as reported by a backend.
///
/// Captured fresh on every enumeration pass and never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    /// Window class (second half of X11 `WM_CLASS`, Hyprland `class`).
    pub class: String,
    /// Window instance (first half of X11 `WM_CLASS`, Hyprland
    /// `initialClass`).
    pub instance: String,
    /// Human-readable title.
    pub title: String,
    /// Current outer geometry.
    pub geometry: Geometry,
    /// Index into the monitor list the window currently sits on.
    pub monitor: usize,
}

/// One output as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorGeometry {
    /// Position in the backend's monitor list (0-based).
    pub index: usize,
    /// Output name, e.g. `"DP-1"`.
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl MonitorGeometry {
    /// The monitor's bounds as a [`Geometry`].
    pub fn bounds(&self) -> Geometry {
        Geometry::new(self.x, self.y, self.width, self.height)
    }

    /// Whether the point `(px, py)` lies inside this monitor.
    pub fn contains(&self, px: i64, py: i64) -> bool {
        let (x, y) = (self.x as i64, self.y as i64);
        px >= x && px < x + self.width as i64 && py >= y && py < y + self.height as i64
    }
}

/// Find the monitor a window with `geometry` belongs to.
///
/// The monitor containing the window's centre wins.  A window whose centre
/// is off every monitor (partially dragged off-screen, for instance) is
/// assigned to the monitor whose centre is closest.  Returns `0` when the
/// monitor list is empty.
pub fn monitor_index_for(monitors: &[MonitorGeometry], geometry: &Geometry) -> usize {
    let (cx, cy) = geometry.centre();
    if let Some(m) = monitors.iter().find(|m| m.contains(cx, cy)) {
        return m.index;
    }

    monitors
        .iter()
        .min_by_key(|m| {
            let (mx, my) = m.bounds().centre();
            let dx = mx - cx;
            let dy = my - cy;
            dx * dx + dy * dy
        })
        .map(|m| m.index)
        .unwrap_or(0)
}
