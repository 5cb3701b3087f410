//! Turns a matched rule into pixels and pushes them to the backend.
//!
//! Resolution happens in three steps:
//!
//! 1. pick the target monitor from the rule's
//!    [`MonitorSelector`](crate::rule::MonitorSelector);
//! 2. convert every [`Length`](crate::rule::Length) to pixels relative to
//!    that monitor (`origin + round(percent / 100 * dimension)`);
//! 3. clamp so the whole rectangle stays on the monitor.
//!
//! A window that already has the target geometry is left alone, which makes
//! repeated runs free of flicker.

use crate::rule::{GeometrySpec, MonitorSelector, PlacementRule};
use crate::traits::{BackendError, WindowBackend};
use crate::window::{monitor_index_for, Geometry, MonitorGeometry, WindowInfo};
use log::{debug, info, warn};

/// What happened to one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// The backend was asked to move/resize the window.
    Placed(Geometry),
    /// The window was already at the target; no backend call was made.
    Unchanged(Geometry),
    /// The window closed before it could be placed.
    Gone,
    /// Dry run: the target was computed but not applied.
    Skipped(Geometry),
}

/// Errors from resolving or applying a placement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// The selector names a monitor the backend does not report.
    #[error("monitor {selector} does not exist ({count} monitor(s) connected)")]
    NoSuchMonitor {
        selector: MonitorSelector,
        count: usize,
    },
    /// The backend reported no monitors at all.
    #[error("backend reported no monitors")]
    NoMonitors,
    /// The backend failed for a reason other than the window closing.
    #[error(transparent)]
    Backend(BackendError),
}

/// Resolves and applies placements.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementEngine {
    primary: usize,
    dry_run: bool,
}

impl PlacementEngine {
    /// `primary` is the monitor index the `"primary"` selector refers to.
    pub fn new(primary: usize) -> Self {
        Self {
            primary,
            dry_run: false,
        }
    }

    /// Compute targets but never call [`WindowBackend::apply`].
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check that `selector` names an existing monitor.
    ///
    /// `"current"` always resolves as long as there is at least one monitor.
    pub fn check_selector(
        &self,
        selector: MonitorSelector,
        monitors: &[MonitorGeometry],
    ) -> Result<(), PlacementError> {
        if monitors.is_empty() {
            return Err(PlacementError::NoMonitors);
        }
        let index = match selector {
            MonitorSelector::Index(i) => i,
            MonitorSelector::Primary => self.primary,
            MonitorSelector::Current => return Ok(()),
        };
        if index < monitors.len() {
            Ok(())
        } else {
            Err(PlacementError::NoSuchMonitor {
                selector,
                count: monitors.len(),
            })
        }
    }

    /// Pick the monitor `rule` places `window` on.
    pub fn resolve_monitor<'a>(
        &self,
        rule: &PlacementRule,
        window: &WindowInfo,
        monitors: &'a [MonitorGeometry],
    ) -> Result<&'a MonitorGeometry, PlacementError> {
        if monitors.is_empty() {
            return Err(PlacementError::NoMonitors);
        }
        let index = match rule.monitor {
            MonitorSelector::Index(i) => i,
            MonitorSelector::Primary => self.primary,
            // The snapshot may predate a monitor being unplugged; fall back
            // to whatever monitor the window overlaps now.
            MonitorSelector::Current if window.monitor < monitors.len() => window.monitor,
            MonitorSelector::Current => monitor_index_for(monitors, &window.geometry),
        };
        monitors.get(index).ok_or(PlacementError::NoSuchMonitor {
            selector: rule.monitor,
            count: monitors.len(),
        })
    }

    /// Target geometry for `window` under `rule`.
    pub fn target_geometry(
        &self,
        rule: &PlacementRule,
        window: &WindowInfo,
        monitors: &[MonitorGeometry],
    ) -> Result<Geometry, PlacementError> {
        let monitor = self.resolve_monitor(rule, window, monitors)?;
        Ok(resolve_geometry(&rule.geometry, monitor))
    }

    /// Resolve `rule` for `window` and apply it through `backend`.
    ///
    /// A window that vanished is logged and reported as
    /// [`PlacementOutcome::Gone`]; it is not retried.
    pub fn place<B: WindowBackend + ?Sized>(
        &self,
        backend: &B,
        window: &WindowInfo,
        rule: &PlacementRule,
        monitors: &[MonitorGeometry],
    ) -> Result<PlacementOutcome, PlacementError> {
        let target = self.target_geometry(rule, window, monitors)?;
        debug!(
            "{} {:?} ({}) -> {} via rule {}",
            window.handle,
            window.title,
            window.geometry,
            target,
            rule.label()
        );

        if self.dry_run {
            info!("dry run: would place {} at {}", window.handle, target);
            return Ok(PlacementOutcome::Skipped(target));
        }

        let outcome = if window.geometry == target {
            debug!("{} already at {}", window.handle, target);
            PlacementOutcome::Unchanged(target)
        } else {
            match backend.apply(&window.handle, target) {
                Ok(()) => {
                    info!("placed {} ({}) at {}", window.handle, window.class, target);
                    PlacementOutcome::Placed(target)
                }
                Err(BackendError::WindowGone(handle)) => {
                    warn!("window {} closed before it could be placed", handle);
                    return Ok(PlacementOutcome::Gone);
                }
                Err(e) => return Err(PlacementError::Backend(e)),
            }
        };

        if let Some(desktop) = rule.desktop {
            match backend.move_to_desktop(&window.handle, desktop) {
                Ok(()) => debug!("moved {} to desktop {}", window.handle, desktop),
                Err(BackendError::WindowGone(handle)) => {
                    warn!("window {} closed before it could change desktop", handle);
                    return Ok(PlacementOutcome::Gone);
                }
                Err(e) => return Err(PlacementError::Backend(e)),
            }
        }

        Ok(outcome)
    }
}

/// Convert `spec` to pixels on `monitor` and clamp it there.
pub fn resolve_geometry(spec: &GeometrySpec, monitor: &MonitorGeometry) -> Geometry {
    let x = monitor.x as i64 + spec.x.resolve(monitor.width);
    let y = monitor.y as i64 + spec.y.resolve(monitor.height);
    let width = spec.width.resolve(monitor.width);
    let height = spec.height.resolve(monitor.height);
    clamp_to_monitor(x, y, width, height, monitor)
}

/// Clamp a rectangle so that it lies entirely within `monitor`.
///
/// Sizes are limited to `1..=monitor dimension` first; the origin is then
/// pushed back inside so that the far edge does not cross the monitor edge.
pub fn clamp_to_monitor(
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    monitor: &MonitorGeometry,
) -> Geometry {
    let mon_w = (monitor.width as i64).max(1);
    let mon_h = (monitor.height as i64).max(1);
    let width = width.clamp(1, mon_w);
    let height = height.clamp(1, mon_h);

    let min_x = monitor.x as i64;
    let min_y = monitor.y as i64;
    let x = x.clamp(min_x, min_x + mon_w - width);
    let y = y.clamp(min_y, min_y + mon_h - height);

    Geometry::new(x as i32, y as i32, width as u32, height as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Length, Matcher};
    use crate::traits::testing::{monitor_1080p, window, FakeBackend};
    use crate::window::WindowHandle;

    fn spec(x: Length, y: Length, w: Length, h: Length) -> GeometrySpec {
        GeometrySpec {
            x,
            y,
            width: w,
            height: h,
        }
    }

    fn rule(geometry: GeometrySpec, monitor: MonitorSelector) -> PlacementRule {
        PlacementRule {
            name: None,
            matcher: Matcher {
                class: Some("Terminal".into()),
                ..Default::default()
            },
            geometry,
            monitor,
            priority: 0,
            expected: false,
            desktop: None,
        }
    }

    fn right_half() -> GeometrySpec {
        spec(
            Length::Percent(50.0),
            Length::Percent(0.0),
            Length::Percent(50.0),
            Length::Percent(100.0),
        )
    }

    fn two_monitors() -> Vec<MonitorGeometry> {
        vec![
            monitor_1080p(),
            MonitorGeometry {
                index: 1,
                name: "HDMI-A-1".into(),
                x: 1920,
                y: 0,
                width: 2560,
                height: 1440,
            },
        ]
    }

    #[test]
    fn percentage_resolution() {
        let g = resolve_geometry(&right_half(), &monitor_1080p());
        assert_eq!(g, Geometry::new(960, 0, 960, 1080));
    }

    #[test]
    fn pixels_are_relative_to_monitor_origin() {
        let mons = two_monitors();
        let s = spec(
            Length::Pixels(100),
            Length::Pixels(50),
            Length::Pixels(800),
            Length::Pixels(600),
        );
        assert_eq!(resolve_geometry(&s, &mons[1]), Geometry::new(2020, 50, 800, 600));
    }

    #[test]
    fn negative_origin_clamps_to_monitor_edge() {
        let s = spec(
            Length::Pixels(-50),
            Length::Pixels(0),
            Length::Pixels(800),
            Length::Pixels(600),
        );
        assert_eq!(resolve_geometry(&s, &monitor_1080p()).x, 0);
    }

    #[test]
    fn oversized_geometry_is_shrunk_and_pulled_back() {
        let s = spec(
            Length::Percent(80.0),
            Length::Percent(90.0),
            Length::Percent(150.0),
            Length::Percent(50.0),
        );
        let g = resolve_geometry(&s, &monitor_1080p());
        assert_eq!(g, Geometry::new(0, 540, 1920, 540));
    }

    #[test]
    fn resolve_monitor_by_selector() {
        let mons = two_monitors();
        let engine = PlacementEngine::new(1);
        let mut w = window(1, "Terminal", Geometry::new(0, 0, 100, 100));

        let r = rule(right_half(), MonitorSelector::Primary);
        assert_eq!(engine.resolve_monitor(&r, &w, &mons).unwrap().index, 1);

        let r = rule(right_half(), MonitorSelector::Index(0));
        assert_eq!(engine.resolve_monitor(&r, &w, &mons).unwrap().index, 0);

        w.monitor = 1;
        let r = rule(right_half(), MonitorSelector::Current);
        assert_eq!(engine.resolve_monitor(&r, &w, &mons).unwrap().index, 1);
    }

    #[test]
    fn stale_current_monitor_falls_back_to_overlap() {
        let mons = vec![monitor_1080p()];
        let mut w = window(1, "Terminal", Geometry::new(100, 100, 100, 100));
        w.monitor = 3;
        let r = rule(right_half(), MonitorSelector::Current);
        let m = PlacementEngine::new(0).resolve_monitor(&r, &w, &mons).unwrap();
        assert_eq!(m.index, 0);
    }

    #[test]
    fn missing_monitor_is_reported() {
        let engine = PlacementEngine::new(0);
        let w = window(1, "Terminal", Geometry::new(0, 0, 100, 100));
        let r = rule(right_half(), MonitorSelector::Index(4));
        let err = engine.resolve_monitor(&r, &w, &[monitor_1080p()]).unwrap_err();
        assert_eq!(
            err,
            PlacementError::NoSuchMonitor {
                selector: MonitorSelector::Index(4),
                count: 1
            }
        );
        assert_eq!(
            engine.check_selector(MonitorSelector::Primary, &[]),
            Err(PlacementError::NoMonitors)
        );
        assert!(PlacementEngine::new(2)
            .check_selector(MonitorSelector::Primary, &two_monitors())
            .is_err());
        assert!(engine
            .check_selector(MonitorSelector::Current, &two_monitors())
            .is_ok());
    }

    #[test]
    fn second_apply_is_a_no_op() {
        let w = window(1, "Terminal", Geometry::new(0, 0, 800, 600));
        let backend = FakeBackend::new(vec![monitor_1080p()]).with_window(w.clone());
        let engine = PlacementEngine::new(0);
        let r = rule(right_half(), MonitorSelector::Primary);

        let first = engine.place(&backend, &w, &r, &backend.monitors).unwrap();
        assert_eq!(first, PlacementOutcome::Placed(Geometry::new(960, 0, 960, 1080)));
        let state_after_first = backend.enumerate().unwrap();

        let refreshed = state_after_first[0].clone();
        let second = engine.place(&backend, &refreshed, &r, &backend.monitors).unwrap();
        assert_eq!(second, PlacementOutcome::Unchanged(Geometry::new(960, 0, 960, 1080)));
        assert_eq!(backend.enumerate().unwrap(), state_after_first);
        assert_eq!(backend.applies.borrow().len(), 1);
    }

    #[test]
    fn vanished_window_is_discarded() {
        let w = window(9, "Terminal", Geometry::new(0, 0, 800, 600));
        let backend = FakeBackend::new(vec![monitor_1080p()]).with_window(w.clone());
        backend.vanishing.borrow_mut().push(WindowHandle::X11(9));
        let r = rule(right_half(), MonitorSelector::Primary);
        let outcome = PlacementEngine::new(0)
            .place(&backend, &w, &r, &backend.monitors)
            .unwrap();
        assert_eq!(outcome, PlacementOutcome::Gone);
    }

    #[test]
    fn desktop_is_applied_after_geometry() {
        let w = window(2, "Terminal", Geometry::new(0, 0, 800, 600));
        let backend = FakeBackend::new(vec![monitor_1080p()]).with_window(w.clone());
        let mut r = rule(right_half(), MonitorSelector::Primary);
        r.desktop = Some(3);
        PlacementEngine::new(0)
            .place(&backend, &w, &r, &backend.monitors)
            .unwrap();
        assert_eq!(
            backend.desktop_moves.borrow().as_slice(),
            &[(WindowHandle::X11(2), 3)]
        );
    }

    #[test]
    fn dry_run_never_applies() {
        let w = window(3, "Terminal", Geometry::new(0, 0, 800, 600));
        let backend = FakeBackend::new(vec![monitor_1080p()]).with_window(w.clone());
        let r = rule(right_half(), MonitorSelector::Primary);
        let outcome = PlacementEngine::new(0)
            .dry_run(true)
            .place(&backend, &w, &r, &backend.monitors)
            .unwrap();
        assert_eq!(outcome, PlacementOutcome::Skipped(Geometry::new(960, 0, 960, 1080)));
        assert!(backend.applies.borrow().is_empty());
    }
}
