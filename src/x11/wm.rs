//! [`WindowBackend`] implementation for EWMH window managers on X11.

use crate::traits::{BackendError, WindowBackend};
use crate::window::{monitor_index_for, Geometry, MonitorGeometry, WindowHandle, WindowInfo};
use log::debug;
use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ClientMessageEvent, ConnectionExt as _, EventMask, Window,
};
use x11rb::protocol::ErrorKind;
use x11rb::rust_connection::RustConnection;

x11rb::atom_manager! {
    /// Atoms interned once at connect time.
    pub Atoms: AtomsCookie {
        _NET_CLIENT_LIST,
        _NET_WM_NAME,
        _NET_WM_STATE,
        _NET_WM_STATE_MAXIMIZED_VERT,
        _NET_WM_STATE_MAXIMIZED_HORZ,
        _NET_MOVERESIZE_WINDOW,
        _NET_WM_DESKTOP,
        _NET_FRAME_EXTENTS,
        UTF8_STRING,
    }
}

/// `_NET_WM_STATE` action: remove the listed states.
const NET_WM_STATE_REMOVE: u32 = 0;
/// EWMH source indication for pagers and other tools acting on behalf of
/// the user.  Window managers honour these requests unconditionally.
const SOURCE_PAGER: u32 = 2;
/// `NorthWestGravity`: x/y name the top-left corner of the frame.
const GRAVITY_NORTH_WEST: u32 = 1;

/// `data[0]` of a `_NET_MOVERESIZE_WINDOW` message that sets all four of
/// x, y, width and height.
pub fn moveresize_flags() -> u32 {
    GRAVITY_NORTH_WEST | (0b1111 << 8) | (SOURCE_PAGER << 12)
}

/// Split a `WM_CLASS` value (`instance\0class\0`) into `(instance, class)`.
pub fn parse_wm_class(raw: &[u8]) -> (String, String) {
    let mut parts = raw
        .split(|b| *b == 0)
        .map(|p| String::from_utf8_lossy(p).into_owned());
    let instance = parts.next().unwrap_or_default();
    let class = parts.next().unwrap_or_default();
    (instance, class)
}

/// Window decorations (`_NET_FRAME_EXTENTS`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameExtents {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl FrameExtents {
    fn from_values(values: &[u32]) -> Self {
        match values {
            [left, right, top, bottom, ..] => Self {
                left: *left,
                right: *right,
                top: *top,
                bottom: *bottom,
            },
            _ => Self::default(),
        }
    }
}

/// Geometry adjwin reports for a client: frame origin plus client size,
/// which is exactly what `_NET_MOVERESIZE_WINDOW` with north-west gravity
/// expects back.  Keeping both sides in the same convention makes a second
/// apply of the same geometry a no-op.
pub fn reported_geometry(
    client_x: i32,
    client_y: i32,
    width: u32,
    height: u32,
    extents: FrameExtents,
) -> Geometry {
    Geometry::new(
        client_x - extents.left as i32,
        client_y - extents.top as i32,
        width,
        height,
    )
}

fn conn_err(e: ConnectionError) -> BackendError {
    BackendError::Backend(format!("x11 connection: {}", e))
}

/// Map a reply error for `window`, turning `BadWindow`/`BadDrawable` into
/// [`BackendError::WindowGone`].
fn reply_err(window: Window, e: ReplyError) -> BackendError {
    match e {
        ReplyError::X11Error(ref x)
            if matches!(x.error_kind, ErrorKind::Window | ErrorKind::Drawable) =>
        {
            BackendError::WindowGone(WindowHandle::X11(window))
        }
        other => BackendError::Backend(format!("x11 request: {}", other)),
    }
}

/// X11 backend holding one connection for the lifetime of the run.
pub struct X11Backend {
    conn: RustConnection,
    root: Window,
    screen_width: u16,
    screen_height: u16,
    atoms: Atoms,
}

impl X11Backend {
    /// Connect to `$DISPLAY` and intern the atoms we need.
    pub fn connect() -> Result<Self, BackendError> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| BackendError::Backend(format!("cannot connect to X server: {}", e)))?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let (screen_width, screen_height) = (screen.width_in_pixels, screen.height_in_pixels);
        let atoms = Atoms::new(&conn)
            .map_err(conn_err)?
            .reply()
            .map_err(|e| BackendError::Backend(format!("intern atoms: {}", e)))?;
        Ok(Self {
            conn,
            root,
            screen_width,
            screen_height,
            atoms,
        })
    }

    fn handle_id(handle: &WindowHandle) -> Result<Window, BackendError> {
        match handle {
            WindowHandle::X11(id) => Ok(*id),
            other => Err(BackendError::Backend(format!(
                "{} is not an X11 window id",
                other
            ))),
        }
    }

    fn property(
        &self,
        window: Window,
        property: impl Into<Atom>,
        type_: impl Into<Atom>,
    ) -> Result<x11rb::protocol::xproto::GetPropertyReply, BackendError> {
        self.conn
            .get_property(false, window, property, type_, 0, u32::MAX)
            .map_err(conn_err)?
            .reply()
            .map_err(|e| reply_err(window, e))
    }

    fn client_list(&self) -> Result<Vec<Window>, BackendError> {
        let reply = self.property(self.root, self.atoms._NET_CLIENT_LIST, AtomEnum::WINDOW)?;
        Ok(reply.value32().map(|v| v.collect()).unwrap_or_default())
    }

    fn title(&self, window: Window) -> Result<String, BackendError> {
        let net = self.property(window, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING)?;
        if !net.value.is_empty() {
            return Ok(String::from_utf8_lossy(&net.value).into_owned());
        }
        let legacy = self.property(window, AtomEnum::WM_NAME, AtomEnum::ANY)?;
        Ok(String::from_utf8_lossy(&legacy.value).into_owned())
    }

    fn frame_extents(&self, window: Window) -> Result<FrameExtents, BackendError> {
        let reply = self.property(window, self.atoms._NET_FRAME_EXTENTS, AtomEnum::CARDINAL)?;
        let values: Vec<u32> = reply.value32().map(|v| v.collect()).unwrap_or_default();
        Ok(FrameExtents::from_values(&values))
    }

    /// Current geometry in the convention described on
    /// [`reported_geometry`].
    fn geometry(&self, window: Window) -> Result<Geometry, BackendError> {
        let geo = self
            .conn
            .get_geometry(window)
            .map_err(conn_err)?
            .reply()
            .map_err(|e| reply_err(window, e))?;
        let origin = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)
            .map_err(conn_err)?
            .reply()
            .map_err(|e| reply_err(window, e))?;
        let extents = self.frame_extents(window)?;
        Ok(reported_geometry(
            origin.dst_x as i32,
            origin.dst_y as i32,
            geo.width as u32,
            geo.height as u32,
            extents,
        ))
    }

    fn window_info(
        &self,
        window: Window,
        monitors: &[MonitorGeometry],
    ) -> Result<WindowInfo, BackendError> {
        let class = self.property(window, AtomEnum::WM_CLASS, AtomEnum::STRING)?;
        let (instance, class) = parse_wm_class(&class.value);
        let geometry = self.geometry(window)?;
        Ok(WindowInfo {
            handle: WindowHandle::X11(window),
            class,
            instance,
            title: self.title(window)?,
            monitor: monitor_index_for(monitors, &geometry),
            geometry,
        })
    }

    fn send_root_message(
        &self,
        window: Window,
        type_: Atom,
        data: [u32; 5],
    ) -> Result<(), BackendError> {
        let event = ClientMessageEvent::new(32, window, type_, data);
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )
            .map_err(conn_err)?;
        self.conn.flush().map_err(conn_err)
    }
}

impl WindowBackend for X11Backend {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn enumerate(&self) -> Result<Vec<WindowInfo>, BackendError> {
        let monitors = self.monitors()?;
        let mut windows = Vec::new();
        for id in self.client_list()? {
            match self.window_info(id, &monitors) {
                Ok(info) => windows.push(info),
                // Closed while we were looking at it.
                Err(BackendError::WindowGone(handle)) => {
                    debug!("{} vanished during enumeration", handle)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(windows)
    }

    fn monitors(&self) -> Result<Vec<MonitorGeometry>, BackendError> {
        let reply = self
            .conn
            .randr_get_monitors(self.root, true)
            .map_err(conn_err)?
            .reply()
            .map_err(|e| BackendError::Backend(format!("randr: {}", e)))?;

        if reply.monitors.is_empty() {
            return Ok(vec![MonitorGeometry {
                index: 0,
                name: "screen".into(),
                x: 0,
                y: 0,
                width: self.screen_width as u32,
                height: self.screen_height as u32,
            }]);
        }

        reply
            .monitors
            .iter()
            .enumerate()
            .map(|(index, m)| -> Result<MonitorGeometry, BackendError> {
                let name = self
                    .conn
                    .get_atom_name(m.name)
                    .map_err(conn_err)?
                    .reply()
                    .map(|r| String::from_utf8_lossy(&r.name).into_owned())
                    .unwrap_or_else(|_| format!("monitor-{}", index));
                Ok(MonitorGeometry {
                    index,
                    name,
                    x: m.x as i32,
                    y: m.y as i32,
                    width: m.width as u32,
                    height: m.height as u32,
                })
            })
            .collect()
    }

    fn apply(&self, handle: &WindowHandle, geometry: Geometry) -> Result<(), BackendError> {
        let window = Self::handle_id(handle)?;
        // Also serves as the liveness check.
        if self.geometry(window)? == geometry {
            return Ok(());
        }

        // Maximized windows ignore move/resize requests.
        self.send_root_message(
            window,
            self.atoms._NET_WM_STATE,
            [
                NET_WM_STATE_REMOVE,
                self.atoms._NET_WM_STATE_MAXIMIZED_VERT,
                self.atoms._NET_WM_STATE_MAXIMIZED_HORZ,
                SOURCE_PAGER,
                0,
            ],
        )?;
        debug!("_NET_MOVERESIZE_WINDOW {} -> {}", handle, geometry);
        self.send_root_message(
            window,
            self.atoms._NET_MOVERESIZE_WINDOW,
            [
                moveresize_flags(),
                geometry.x as u32,
                geometry.y as u32,
                geometry.width,
                geometry.height,
            ],
        )
    }

    fn move_to_desktop(&self, handle: &WindowHandle, desktop: u32) -> Result<(), BackendError> {
        let window = Self::handle_id(handle)?;
        self.geometry(window)?;
        self.send_root_message(
            window,
            self.atoms._NET_WM_DESKTOP,
            [desktop, SOURCE_PAGER, 0, 0, 0],
        )
    }
}
