//! Window focus watching over X11.
//!
//! A background thread subscribes to root-window property changes and emits
//! a `WindowInfo` whenever the focused window (or its fullscreen/maximized
//! state) changes. Consumers receive events over an mpsc channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use tracing::{debug, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::constants::focus;
use crate::types::Rect;

/// Snapshot of the focused window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub window: u32,
    pub title: String,
    /// WM_CLASS class part (second string).
    pub class: String,
    /// WM_CLASS instance part (first string).
    pub instance: String,
    pub is_fullscreen: bool,
    pub is_maximized: bool,
    /// Root-relative geometry; `None` when the query failed.
    pub geometry: Option<Rect>,
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl WindowInfo {
    /// Case-insensitive glob match against class, instance and title.
    pub fn matches_class_pattern(&self, pattern: &str) -> bool {
        let Ok(p) = Pattern::new(pattern) else {
            return false;
        };
        p.matches_with(&self.class, GLOB_OPTIONS)
            || p.matches_with(&self.instance, GLOB_OPTIONS)
            || p.matches_with(&self.title, GLOB_OPTIONS)
    }

    /// Case-insensitive glob match against the title only.
    pub fn matches_title_pattern(&self, pattern: &str) -> bool {
        Pattern::new(pattern)
            .map(|p| p.matches_with(&self.title, GLOB_OPTIONS))
            .unwrap_or(false)
    }
}

/// Pre-cached X11 atoms to avoid repeated roundtrips
struct FocusAtoms {
    net_active_window: Atom,
    net_wm_state: Atom,
    net_wm_state_fullscreen: Atom,
    net_wm_state_maximized_vert: Atom,
    net_wm_state_maximized_horz: Atom,
    net_wm_name: Atom,
    utf8_string: Atom,
}

impl FocusAtoms {
    fn new(conn: &RustConnection) -> Result<Self> {
        let intern = |name: &[u8]| -> Result<Atom> {
            Ok(conn
                .intern_atom(false, name)
                .with_context(|| format!("interning {}", String::from_utf8_lossy(name)))?
                .reply()
                .with_context(|| format!("reply for {}", String::from_utf8_lossy(name)))?
                .atom)
        };
        Ok(Self {
            net_active_window: intern(b"_NET_ACTIVE_WINDOW")?,
            net_wm_state: intern(b"_NET_WM_STATE")?,
            net_wm_state_fullscreen: intern(b"_NET_WM_STATE_FULLSCREEN")?,
            net_wm_state_maximized_vert: intern(b"_NET_WM_STATE_MAXIMIZED_VERT")?,
            net_wm_state_maximized_horz: intern(b"_NET_WM_STATE_MAXIMIZED_HORZ")?,
            net_wm_name: intern(b"_NET_WM_NAME")?,
            utf8_string: intern(b"UTF8_STRING")?,
        })
    }
}

/// Watches the focused window and forwards changes to a channel.
pub struct FocusWatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FocusWatcher {
    /// Connects to the X server and starts the watcher thread.
    pub fn spawn(tx: Sender<WindowInfo>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("connecting to X server")?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = FocusAtoms::new(&conn)?;

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )
        .context("subscribing to root property changes")?;
        conn.flush().context("flushing subscription")?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let handle = std::thread::Builder::new()
            .name("focus-watcher".into())
            .spawn(move || {
                watch_loop(conn, root, atoms, tx, thread_running);
            })
            .context("spawning focus watcher thread")?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FocusWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_loop(
    conn: RustConnection,
    root: Window,
    atoms: FocusAtoms,
    tx: Sender<WindowInfo>,
    running: Arc<AtomicBool>,
) {
    let mut last_sent: Option<(u32, bool, bool)> = None;
    let mut watched: Option<Window> = None;

    // Emit the initially focused window before any event arrives.
    if let Some(info) = query_active(&conn, root, &atoms) {
        watched = watch_window(&conn, watched, info.window);
        last_sent = Some((info.window, info.is_fullscreen, info.is_maximized));
        let _ = tx.send(info);
    }

    while running.load(Ordering::SeqCst) {
        let mut saw_change = false;
        loop {
            match conn.poll_for_event() {
                Ok(Some(Event::PropertyNotify(ev))) => {
                    if ev.atom == atoms.net_active_window || ev.atom == atoms.net_wm_state {
                        saw_change = true;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "X connection lost, focus watcher exiting");
                    return;
                }
            }
        }

        if saw_change {
            if let Some(info) = query_active(&conn, root, &atoms) {
                let key = (info.window, info.is_fullscreen, info.is_maximized);
                if last_sent != Some(key) {
                    trace!(window = info.window, class = %info.class, title = %info.title, "focus changed");
                    watched = watch_window(&conn, watched, info.window);
                    last_sent = Some(key);
                    if tx.send(info).is_err() {
                        return;
                    }
                }
            }
        }
        std::thread::sleep(focus::POLL_SLICE);
    }
    debug!("focus watcher stopped");
}

/// Subscribes to the focused window's own property changes so fullscreen
/// toggles are seen without a focus change. The previous subscription is
/// dropped.
fn watch_window(conn: &RustConnection, previous: Option<Window>, window: Window) -> Option<Window> {
    if previous == Some(window) {
        return previous;
    }
    if let Some(prev) = previous {
        let _ = conn.change_window_attributes(
            prev,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::NO_EVENT),
        );
    }
    let r = conn.change_window_attributes(
        window,
        &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
    );
    let _ = conn.flush();
    match r {
        Ok(_) => Some(window),
        Err(_) => previous,
    }
}

fn query_active(conn: &RustConnection, root: Window, atoms: &FocusAtoms) -> Option<WindowInfo> {
    let prop = conn
        .get_property(false, root, atoms.net_active_window, AtomEnum::WINDOW, 0, 1)
        .ok()?
        .reply()
        .ok()?;
    let window = prop.value32()?.next()?;
    if window == 0 {
        return None;
    }
    Some(query_window(conn, root, atoms, window))
}

fn query_window(
    conn: &RustConnection,
    root: Window,
    atoms: &FocusAtoms,
    window: Window,
) -> WindowInfo {
    let title = read_title(conn, atoms, window).unwrap_or_default();
    let (instance, class) = read_class(conn, window).unwrap_or_default();
    let (is_fullscreen, is_maximized) = read_state(conn, atoms, window);
    let geometry = read_geometry(conn, root, window);

    WindowInfo {
        window,
        title,
        class,
        instance,
        is_fullscreen,
        is_maximized,
        geometry,
    }
}

fn read_title(conn: &RustConnection, atoms: &FocusAtoms, window: Window) -> Option<String> {
    // _NET_WM_NAME (UTF-8) preferred, WM_NAME as fallback.
    let prop = conn
        .get_property(false, window, atoms.net_wm_name, atoms.utf8_string, 0, 1024)
        .ok()?
        .reply()
        .ok()?;
    if !prop.value.is_empty() {
        return Some(String::from_utf8_lossy(&prop.value).into_owned());
    }
    let prop = conn
        .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::STRING, 0, 1024)
        .ok()?
        .reply()
        .ok()?;
    Some(String::from_utf8_lossy(&prop.value).into_owned())
}

/// WM_CLASS is two NUL-terminated strings: instance, then class.
fn read_class(conn: &RustConnection, window: Window) -> Option<(String, String)> {
    let prop = conn
        .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)
        .ok()?
        .reply()
        .ok()?;
    let mut parts = prop.value.split(|&b| b == 0);
    let instance = String::from_utf8_lossy(parts.next()?).into_owned();
    let class = String::from_utf8_lossy(parts.next().unwrap_or(b"")).into_owned();
    Some((instance, class))
}

fn read_state(conn: &RustConnection, atoms: &FocusAtoms, window: Window) -> (bool, bool) {
    let Ok(cookie) = conn.get_property(false, window, atoms.net_wm_state, AtomEnum::ATOM, 0, 64)
    else {
        return (false, false);
    };
    let Ok(prop) = cookie.reply() else {
        return (false, false);
    };
    let mut fullscreen = false;
    let mut max_v = false;
    let mut max_h = false;
    if let Some(values) = prop.value32() {
        for atom in values {
            if atom == atoms.net_wm_state_fullscreen {
                fullscreen = true;
            } else if atom == atoms.net_wm_state_maximized_vert {
                max_v = true;
            } else if atom == atoms.net_wm_state_maximized_horz {
                max_h = true;
            }
        }
    }
    (fullscreen, max_v && max_h)
}

/// Root-relative window geometry via translate_coordinates.
fn read_geometry(conn: &RustConnection, root: Window, window: Window) -> Option<Rect> {
    let geom = conn.get_geometry(window).ok()?.reply().ok()?;
    let translated = conn
        .translate_coordinates(window, root, 0, 0)
        .ok()?
        .reply()
        .ok()?;
    Some(Rect::new(
        translated.dst_x as i32,
        translated.dst_y as i32,
        geom.width as u32,
        geom.height as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(class: &str, instance: &str, title: &str) -> WindowInfo {
        WindowInfo {
            window: 1,
            title: title.to_string(),
            class: class.to_string(),
            instance: instance.to_string(),
            is_fullscreen: false,
            is_maximized: false,
            geometry: None,
        }
    }

    #[test]
    fn class_pattern_matches_any_of_three() {
        let w = info("firefox", "Navigator", "Mozilla Firefox");
        assert!(w.matches_class_pattern("firefox"));
        assert!(w.matches_class_pattern("navigator"));
        assert!(w.matches_class_pattern("*Mozilla*"));
        assert!(!w.matches_class_pattern("chromium"));
    }

    #[test]
    fn title_pattern_matches_title_only() {
        let w = info("mpv", "gl", "some_movie.mkv - mpv");
        assert!(w.matches_title_pattern("*.mkv*"));
        assert!(!w.matches_title_pattern("gl"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let w = info("Steam", "steamwebhelper", "Steam");
        assert!(w.matches_class_pattern("STEAM"));
        assert!(w.matches_title_pattern("steam"));
    }

    #[test]
    fn invalid_glob_never_matches() {
        let w = info("firefox", "Navigator", "Firefox");
        assert!(!w.matches_class_pattern("[unclosed"));
        assert!(!w.matches_title_pattern("[unclosed"));
    }
}
