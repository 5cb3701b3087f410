//! [`WindowBackend`] implementation backed by Hyprland IPC.
//!
//! Communicates directly with Hyprland through its Unix socket at
//! `$XDG_RUNTIME_DIR/hypr/$HYPRLAND_INSTANCE_SIGNATURE/.socket.sock`,
//! avoiding any shell command invocation or third-party crate for socket
//! discovery.

use crate::traits::{BackendError, WindowBackend};
use crate::window::{Geometry, MonitorGeometry, WindowHandle, WindowInfo};
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

/// Hyprland-backed window backend.
///
/// All communication happens over Hyprland's IPC socket.  No child
/// processes are spawned and nothing is cached: each method call opens a
/// short-lived IPC request.
#[derive(Debug, Default)]
pub struct HyprlandBackend;

impl HyprlandBackend {
    pub fn new() -> Self {
        Self
    }

    /// Whether the current session looks like Hyprland.
    pub fn detected() -> bool {
        std::env::var_os("HYPRLAND_INSTANCE_SIGNATURE").is_some()
    }

    fn clients(&self) -> Result<Vec<ClientJson>, BackendError> {
        let json = ipc_json("clients")?;
        parse(&json)
    }

    fn monitor_list(&self) -> Result<Vec<MonitorJson>, BackendError> {
        let json = ipc_json("monitors")?;
        let mut monitors: Vec<MonitorJson> = parse(&json)?;
        monitors.sort_by_key(|m| m.id);
        Ok(monitors)
    }

    /// Look up a client by handle, mapping "not listed" to
    /// [`BackendError::WindowGone`].
    fn client(&self, handle: &WindowHandle) -> Result<ClientJson, BackendError> {
        let WindowHandle::Address(address) = handle else {
            return Err(BackendError::Backend(format!(
                "{} is not a Hyprland address",
                handle
            )));
        };
        self.clients()?
            .into_iter()
            .find(|c| &c.address == address)
            .ok_or_else(|| BackendError::WindowGone(handle.clone()))
    }
}

//  Direct Hyprland IPC helpers

/// Resolve the Hyprland command socket path.
///
/// Hyprland ≥ 0.40 stores its sockets at
/// `$XDG_RUNTIME_DIR/hypr/$HYPRLAND_INSTANCE_SIGNATURE/.socket.sock`.
fn socket_path() -> Result<PathBuf, BackendError> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .map_err(|_| BackendError::Backend("XDG_RUNTIME_DIR not set".into()))?;
    let his = std::env::var("HYPRLAND_INSTANCE_SIGNATURE")
        .map_err(|_| BackendError::Backend("HYPRLAND_INSTANCE_SIGNATURE not set".into()))?;
    Ok(PathBuf::from(format!(
        "{}/hypr/{}/.socket.sock",
        runtime_dir, his
    )))
}

/// Send a raw command to the Hyprland command socket and return the
/// response as a string.
fn ipc_request(command: &str) -> Result<String, BackendError> {
    let path = socket_path()?;
    let mut stream = UnixStream::connect(&path).map_err(|e| {
        BackendError::Backend(format!("connect to {}: {}", path.display(), e))
    })?;

    stream
        .write_all(command.as_bytes())
        .map_err(|e| BackendError::Backend(format!("write: {}", e)))?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .map_err(|e| BackendError::Backend(format!("read: {}", e)))?;

    String::from_utf8(response).map_err(|e| BackendError::Backend(format!("utf-8: {}", e)))
}

/// Send a JSON data query (`j/<command>`) and return the raw JSON string.
fn ipc_json(data_command: &str) -> Result<String, BackendError> {
    ipc_request(&format!("j/{}", data_command))
}

/// Send a dispatch command and check for `"ok"`.
fn ipc_dispatch(args: &str) -> Result<(), BackendError> {
    debug!("hyprctl dispatch {}", args);
    let response = ipc_request(&format!("/dispatch {}", args))?;
    if response.trim() == "ok" {
        Ok(())
    } else {
        Err(BackendError::Backend(format!("dispatch error: {}", response)))
    }
}

fn parse<'de, T: Deserialize<'de>>(json: &'de str) -> Result<T, BackendError> {
    serde_json::from_str(json).map_err(|e| BackendError::Backend(format!("parse: {}", e)))
}

//  Minimal serde structs for the JSON we care about

/// Subset of the JSON object returned by `j/monitors`.
#[derive(Debug, Deserialize)]
struct MonitorJson {
    id: i64,
    name: String,
    width: u32,
    height: u32,
    x: i32,
    y: i32,
    #[serde(default = "unit_scale")]
    scale: f64,
    #[serde(default)]
    transform: u32,
}

fn unit_scale() -> f64 {
    1.0
}

/// Subset of the JSON object returned by `j/clients`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientJson {
    address: String,
    #[serde(default = "mapped_default")]
    mapped: bool,
    #[serde(default)]
    hidden: bool,
    at: [i32; 2],
    size: [i32; 2],
    #[serde(default)]
    floating: bool,
    monitor: i64,
    #[serde(default)]
    class: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    initial_class: String,
}

fn mapped_default() -> bool {
    true
}

impl ClientJson {
    fn geometry(&self) -> Geometry {
        Geometry::new(
            self.at[0],
            self.at[1],
            self.size[0].max(0) as u32,
            self.size[1].max(0) as u32,
        )
    }
}

/// Convert `j/monitors` entries (already sorted by id) to layout-space
/// monitors.  Hyprland reports physical pixels; windows live in the scaled
/// layout, so sizes are divided by the scale and swapped for rotated
/// outputs.
fn to_monitors(raw: &[MonitorJson]) -> Vec<MonitorGeometry> {
    raw.iter()
        .enumerate()
        .map(|(index, m)| {
            let scale = if m.scale > 0.0 { m.scale } else { 1.0 };
            let w = (m.width as f64 / scale).round() as u32;
            let h = (m.height as f64 / scale).round() as u32;
            let (width, height) = if m.transform % 2 == 1 { (h, w) } else { (w, h) };
            MonitorGeometry {
                index,
                name: m.name.clone(),
                x: m.x,
                y: m.y,
                width,
                height,
            }
        })
        .collect()
}

/// Convert `j/clients` entries to [`WindowInfo`]s, skipping unmapped and
/// hidden clients.
fn to_windows(clients: Vec<ClientJson>, raw_monitors: &[MonitorJson]) -> Vec<WindowInfo> {
    let by_id: HashMap<i64, usize> = raw_monitors
        .iter()
        .enumerate()
        .map(|(index, m)| (m.id, index))
        .collect();

    clients
        .into_iter()
        .filter(|c| c.mapped && !c.hidden)
        .map(|c| WindowInfo {
            geometry: c.geometry(),
            monitor: by_id.get(&c.monitor).copied().unwrap_or(0),
            handle: WindowHandle::Address(c.address),
            class: c.class,
            instance: c.initial_class,
            title: c.title,
        })
        .collect()
}

/// Hyprland workspace ids start at 1; desktops are 0-based.
fn workspace_id(desktop: u32) -> u32 {
    desktop.saturating_add(1)
}

//  WindowBackend implementation

impl WindowBackend for HyprlandBackend {
    fn name(&self) -> &'static str {
        "hyprland"
    }

    fn enumerate(&self) -> Result<Vec<WindowInfo>, BackendError> {
        let monitors = self.monitor_list()?;
        let clients = self.clients()?;
        Ok(to_windows(clients, &monitors))
    }

    fn monitors(&self) -> Result<Vec<MonitorGeometry>, BackendError> {
        Ok(to_monitors(&self.monitor_list()?))
    }

    fn apply(&self, handle: &WindowHandle, geometry: Geometry) -> Result<(), BackendError> {
        let client = self.client(handle)?;
        if client.geometry() == geometry {
            return Ok(());
        }

        // Tiled windows ignore pixel moves; float them first.
        if !client.floating {
            ipc_dispatch(&format!("setfloating address:{}", client.address))?;
        }
        ipc_dispatch(&format!(
            "movewindowpixel exact {} {},address:{}",
            geometry.x, geometry.y, client.address
        ))?;
        ipc_dispatch(&format!(
            "resizewindowpixel exact {} {},address:{}",
            geometry.width, geometry.height, client.address
        ))
    }

    fn move_to_desktop(&self, handle: &WindowHandle, desktop: u32) -> Result<(), BackendError> {
        let client = self.client(handle)?;
        ipc_dispatch(&format!(
            "movetoworkspacesilent {},address:{}",
            workspace_id(desktop),
            client.address
        ))
    }
}
