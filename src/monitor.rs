//! Monitor detection.
//!
//! Combines `ddcutil detect` output (DDC display numbers, model/serial, DRM
//! connector) with `xrandr` output (connector geometry) so every DDC display
//! is tied to a screen-space rectangle.

use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::types::Rect;

/// One connected output as reported by the X server.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGeometry {
    pub output: String,
    pub rect: Rect,
    pub primary: bool,
    /// Native panel resolution, when a mode list followed the header line.
    pub native: Option<(u32, u32)>,
}

impl OutputGeometry {
    /// Ratio between the framebuffer size and the native panel width, for
    /// mapping capture pixels back to panel pixels under scaling.
    pub fn scale(&self) -> f64 {
        match self.native {
            Some((nw, _)) if nw > 0 => self.rect.width as f64 / nw as f64,
            _ => 1.0,
        }
    }
}

/// A DDC-capable display with its screen placement.
#[derive(Debug, Clone)]
pub struct MonitorInfo {
    /// ddcutil display number, used to address commands.
    pub display: u32,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub i2c_bus: Option<u32>,
    pub drm_connector: Option<String>,
    pub geometry: Option<OutputGeometry>,
}

impl MonitorInfo {
    /// Stable identifier used for per-monitor config files.
    pub fn config_id(&self) -> String {
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>()
        };
        if self.serial.is_empty() {
            sanitize(&self.model)
        } else {
            format!("{}_{}", sanitize(&self.model), sanitize(&self.serial))
        }
    }

    /// Whether a window's center point falls on this monitor.
    pub fn contains_window(&self, win: &Rect) -> bool {
        match &self.geometry {
            Some(g) => {
                let (cx, cy) = win.center();
                g.rect.contains_point(cx, cy)
            }
            None => false,
        }
    }
}

/// Checks that the ddcutil binary is present and runnable.
pub fn probe_ddcutil() -> Result<()> {
    let output = Command::new("ddcutil")
        .arg("--version")
        .output()
        .context("ddcutil not found; install ddcutil and load the i2c-dev module")?;
    if !output.status.success() {
        bail!("ddcutil --version exited with {}", output.status);
    }
    let version = String::from_utf8_lossy(&output.stdout);
    debug!(version = %version.lines().next().unwrap_or(""), "ddcutil present");
    Ok(())
}

/// Detects DDC displays and attaches xrandr geometry to each.
pub fn detect_monitors() -> Result<Vec<MonitorInfo>> {
    let detect = Command::new("ddcutil")
        .args(["detect", "--terse"])
        .output()
        .context("running ddcutil detect")?;
    if !detect.status.success() {
        bail!(
            "ddcutil detect failed: {}",
            String::from_utf8_lossy(&detect.stderr).trim()
        );
    }
    let mut monitors = parse_detect(&String::from_utf8_lossy(&detect.stdout));
    if monitors.is_empty() {
        warn!("ddcutil detect reported no displays");
        return Ok(monitors);
    }

    match Command::new("xrandr").output() {
        Ok(out) if out.status.success() => {
            let outputs = parse_xrandr(&String::from_utf8_lossy(&out.stdout));
            for mon in &mut monitors {
                mon.geometry = match_output(mon, &outputs);
                if mon.geometry.is_none() {
                    warn!(display = mon.display, model = %mon.model, "no xrandr geometry matched");
                }
            }
        }
        Ok(out) => warn!(
            status = %out.status,
            "xrandr failed; monitors have no geometry"
        ),
        Err(err) => warn!(error = %err, "xrandr not available; monitors have no geometry"),
    }

    for mon in &monitors {
        info!(
            display = mon.display,
            model = %mon.model,
            connector = mon.drm_connector.as_deref().unwrap_or("?"),
            output = mon.geometry.as_ref().map(|g| g.output.as_str()).unwrap_or("?"),
            "detected monitor"
        );
    }
    Ok(monitors)
}

/// Parses `ddcutil detect --terse` output into display records.
pub fn parse_detect(text: &str) -> Vec<MonitorInfo> {
    let mut monitors = Vec::new();
    let mut current: Option<MonitorInfo> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Display ") {
            if let Some(mon) = current.take() {
                monitors.push(mon);
            }
            if let Ok(n) = rest.trim().parse::<u32>() {
                current = Some(MonitorInfo {
                    display: n,
                    manufacturer: String::new(),
                    model: String::new(),
                    serial: String::new(),
                    i2c_bus: None,
                    drm_connector: None,
                    geometry: None,
                });
            }
            continue;
        }
        let Some(mon) = current.as_mut() else { continue };

        if let Some(rest) = trimmed.strip_prefix("I2C bus:") {
            // "/dev/i2c-5"
            mon.i2c_bus = rest
                .trim()
                .rsplit('-')
                .next()
                .and_then(|n| n.parse().ok());
        } else if let Some(rest) = trimmed.strip_prefix("DRM connector:") {
            let c = rest.trim();
            // "card1-DP-2" -> "DP-2"
            let conn = c.split_once('-').map_or(c, |(prefix, tail)| {
                if prefix.starts_with("card") { tail } else { c }
            });
            mon.drm_connector = Some(conn.to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Monitor:") {
            let mut parts = rest.trim().splitn(3, ':');
            mon.manufacturer = parts.next().unwrap_or("").to_string();
            mon.model = parts.next().unwrap_or("").to_string();
            mon.serial = parts.next().unwrap_or("").to_string();
        }
    }
    if let Some(mon) = current {
        monitors.push(mon);
    }
    monitors
}

/// Parses `xrandr` output into connected-output geometries.
pub fn parse_xrandr(text: &str) -> Vec<OutputGeometry> {
    let mut outputs: Vec<OutputGeometry> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') {
            // Mode line under the previous output; the preferred mode
            // (marked '+') gives the native resolution.
            if let Some(out) = outputs.last_mut() {
                if out.native.is_none() && line.contains('+') {
                    let mode = line.trim().split_whitespace().next().unwrap_or("");
                    if let Some((w, h)) = parse_dims(mode) {
                        out.native = Some((w, h));
                    }
                }
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else { continue };
        if parts.next() != Some("connected") {
            continue;
        }
        let mut primary = false;
        let mut geom = None;
        for tok in parts {
            if tok == "primary" {
                primary = true;
            } else if geom.is_none() && tok.contains('+') && tok.contains('x') {
                geom = parse_geometry(tok);
            }
        }
        if let Some(rect) = geom {
            outputs.push(OutputGeometry {
                output: name.to_string(),
                rect,
                primary,
                native: None,
            });
        }
    }
    outputs
}

/// "1920x1080+1920+0" -> Rect
fn parse_geometry(tok: &str) -> Option<Rect> {
    let (dims, offsets) = tok.split_once('+')?;
    let (w, h) = parse_dims(dims)?;
    let (x, y) = offsets.split_once('+')?;
    Some(Rect::new(x.parse().ok()?, y.parse().ok()?, w, h))
}

fn parse_dims(dims: &str) -> Option<(u32, u32)> {
    let (w, h) = dims.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// Candidate xrandr output names for a DRM connector. Driver naming differs:
/// DRM "DP-2" may surface as xrandr "DisplayPort-1" (AMD, zero-shifted) or
/// "DP-2" (Intel/NVIDIA).
fn connector_candidates(drm: &str) -> Vec<String> {
    let mut names = vec![drm.to_string()];
    if let Some(num) = drm.strip_prefix("DP-").and_then(|n| n.parse::<u32>().ok()) {
        if num > 0 {
            names.push(format!("DisplayPort-{}", num - 1));
        }
        names.push(format!("DisplayPort-{num}"));
    } else if let Some(rest) = drm.strip_prefix("HDMI-A-") {
        names.push(format!("HDMI-{rest}"));
        names.push(format!("HDMI-A-{rest}"));
    } else if drm.starts_with("eDP") {
        names.push("eDP-1".to_string());
        names.push("eDP1".to_string());
    }
    names
}

fn match_output(mon: &MonitorInfo, outputs: &[OutputGeometry]) -> Option<OutputGeometry> {
    if let Some(drm) = &mon.drm_connector {
        for cand in connector_candidates(drm) {
            if let Some(out) = outputs.iter().find(|o| o.output == cand) {
                return Some(out.clone());
            }
        }
        // Last resort substring match, e.g. "DP-2" inside "DP-2-1".
        if let Some(out) = outputs.iter().find(|o| o.output.contains(drm.as_str())) {
            return Some(out.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETECT_OUTPUT: &str = "\
Display 1
   I2C bus:  /dev/i2c-5
   DRM connector:           card1-DP-2
   Monitor:                 DEL:DELL U2720Q:ABC123

Display 2
   I2C bus:  /dev/i2c-7
   DRM connector:           card1-HDMI-A-1
   Monitor:                 GSM:LG HDR 4K:
";

    const XRANDR_OUTPUT: &str = "\
Screen 0: minimum 320 x 200, current 3840 x 1080, maximum 16384 x 16384
DP-2 connected primary 1920x1080+0+0 (normal left inverted right x axis y axis) 600mm x 340mm
   3840x2160     60.00 +  30.00
   1920x1080     60.00*
HDMI-1 connected 1920x1080+1920+0 (normal left inverted right x axis y axis) 600mm x 340mm
   1920x1080     60.00*+  50.00
DP-1 disconnected (normal left inverted right x axis y axis)
";

    #[test]
    fn detect_parses_two_displays() {
        let mons = parse_detect(DETECT_OUTPUT);
        assert_eq!(mons.len(), 2);
        assert_eq!(mons[0].display, 1);
        assert_eq!(mons[0].i2c_bus, Some(5));
        assert_eq!(mons[0].drm_connector.as_deref(), Some("DP-2"));
        assert_eq!(mons[0].manufacturer, "DEL");
        assert_eq!(mons[0].model, "DELL U2720Q");
        assert_eq!(mons[0].serial, "ABC123");
        assert_eq!(mons[1].display, 2);
        assert_eq!(mons[1].drm_connector.as_deref(), Some("HDMI-A-1"));
        assert_eq!(mons[1].serial, "");
    }

    #[test]
    fn xrandr_parses_connected_outputs() {
        let outs = parse_xrandr(XRANDR_OUTPUT);
        assert_eq!(outs.len(), 2);
        assert_eq!(outs[0].output, "DP-2");
        assert!(outs[0].primary);
        assert_eq!(outs[0].rect, Rect::new(0, 0, 1920, 1080));
        assert_eq!(outs[0].native, Some((3840, 2160)));
        assert_eq!(outs[1].output, "HDMI-1");
        assert!(!outs[1].primary);
        assert_eq!(outs[1].rect, Rect::new(1920, 0, 1920, 1080));
    }

    #[test]
    fn scale_from_native_resolution() {
        let outs = parse_xrandr(XRANDR_OUTPUT);
        assert!((outs[0].scale() - 0.5).abs() < 1e-9);
        assert!((outs[1].scale() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn drm_connectors_match_across_driver_naming() {
        let mons = parse_detect(DETECT_OUTPUT);
        let outs = parse_xrandr(XRANDR_OUTPUT);
        let g1 = match_output(&mons[0], &outs).unwrap();
        assert_eq!(g1.output, "DP-2");
        let g2 = match_output(&mons[1], &outs).unwrap();
        assert_eq!(g2.output, "HDMI-1");
    }

    #[test]
    fn config_id_sanitizes() {
        let mons = parse_detect(DETECT_OUTPUT);
        assert_eq!(mons[0].config_id(), "DELL_U2720Q_ABC123");
        assert_eq!(mons[1].config_id(), "LG_HDR_4K");
    }

    #[test]
    fn window_attribution_uses_center_point() {
        let mut mons = parse_detect(DETECT_OUTPUT);
        let outs = parse_xrandr(XRANDR_OUTPUT);
        mons[0].geometry = match_output(&mons[0], &outs);
        mons[1].geometry = match_output(&mons[1], &outs);

        // Window entirely on the second monitor.
        let win = Rect::new(2000, 100, 800, 600);
        assert!(!mons[0].contains_window(&win));
        assert!(mons[1].contains_window(&win));

        // Window straddling the boundary; its center is on the first.
        let straddle = Rect::new(1500, 100, 800, 600);
        assert!(mons[0].contains_window(&straddle));
        assert!(!mons[1].contains_window(&straddle));
    }
}
