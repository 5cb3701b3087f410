//! X11-specific implementations.
//!
//! [`wm::X11Backend`] talks to any EWMH-compliant window manager through
//! `x11rb`: clients come from `_NET_CLIENT_LIST`, outputs from RandR, and
//! moves are requested with `_NET_MOVERESIZE_WINDOW` the way `wmctrl -e`
//! does it.
//!
//! Nothing outside this module should reference X11 directly.

pub mod wm;
