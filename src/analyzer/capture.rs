//! Screen capture backends.
//!
//! Capture is tried through an ordered chain: the X server's own GetImage
//! first, then external screenshot tools. The chain caches whichever backend
//! last worked and only re-searches after repeated failures.

use std::process::Command;

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{debug, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt, ImageFormat};

use crate::constants::analyzer as tuning;
use crate::types::Rect;

/// One way of obtaining screen pixels.
///
/// `Ok(None)` means the backend is unavailable on this system (tool not
/// installed, wrong session type); `Err` means it exists but failed.
pub trait CaptureBackend: Send {
    fn name(&self) -> &'static str;

    /// Captures the given region, or the whole screen when `None`.
    fn capture(&mut self, region: Option<Rect>) -> Result<Option<RgbImage>>;
}

/// Captures via the X11 GetImage request on the root window.
pub struct X11RootCapture;

impl CaptureBackend for X11RootCapture {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn capture(&mut self, region: Option<Rect>) -> Result<Option<RgbImage>> {
        let Ok((conn, screen_num)) = x11rb::connect(None) else {
            return Ok(None);
        };
        let screen = &conn.setup().roots[screen_num];
        let (x, y, w, h) = match region {
            Some(r) => (r.x as i16, r.y as i16, r.width as u16, r.height as u16),
            None => (0, 0, screen.width_in_pixels, screen.height_in_pixels),
        };
        let reply = conn
            .get_image(ImageFormat::Z_PIXMAP, screen.root, x, y, w, h, !0)
            .context("GetImage request failed")?
            .reply()
            .context("GetImage reply failed")?;

        // ZPixmap on a 24/32-bit visual is BGRX, little-endian.
        let data = reply.data;
        if data.len() < (w as usize) * (h as usize) * 4 {
            anyhow::bail!("short GetImage reply: {} bytes for {w}x{h}", data.len());
        }
        let mut img = RgbImage::new(w as u32, h as u32);
        for (i, px) in img.pixels_mut().enumerate() {
            let off = i * 4;
            *px = image::Rgb([data[off + 2], data[off + 1], data[off]]);
        }
        Ok(Some(img))
    }
}

/// Runs an external screenshot tool writing PNG to a temp file.
pub struct ToolCapture {
    tool: &'static str,
    /// Builds argv for a full-screen shot into the given path.
    args: fn(&str) -> Vec<String>,
}

impl ToolCapture {
    pub fn grim() -> Self {
        Self {
            tool: "grim",
            args: |path| vec![path.to_string()],
        }
    }

    pub fn gnome_screenshot() -> Self {
        Self {
            tool: "gnome-screenshot",
            args: |path| vec!["-f".to_string(), path.to_string()],
        }
    }

    pub fn scrot() -> Self {
        Self {
            tool: "scrot",
            args: |path| vec!["-o".to_string(), path.to_string()],
        }
    }

    pub fn import() -> Self {
        Self {
            tool: "import",
            args: |path| {
                vec![
                    "-window".to_string(),
                    "root".to_string(),
                    path.to_string(),
                ]
            },
        }
    }
}

impl CaptureBackend for ToolCapture {
    fn name(&self) -> &'static str {
        self.tool
    }

    fn capture(&mut self, region: Option<Rect>) -> Result<Option<RgbImage>> {
        let file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .context("creating capture temp file")?;
        let path = file.path().to_string_lossy().to_string();

        let mut cmd = Command::new(self.tool);
        cmd.args((self.args)(&path));
        let status = match run_with_deadline(&mut cmd, tuning::CAPTURE_TOOL_TIMEOUT) {
            Ok(Some(s)) => s,
            Ok(None) => anyhow::bail!(
                "{} did not finish within {:?}",
                self.tool,
                tuning::CAPTURE_TOOL_TIMEOUT
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(tool = self.tool, "not installed");
                return Ok(None);
            }
            Err(e) => return Err(e).context(format!("running {}", self.tool)),
        };
        if !status.success() {
            anyhow::bail!("{} exited with {status}", self.tool);
        }

        let full = image::open(file.path())
            .with_context(|| format!("decoding {} output", self.tool))?
            .into_rgb8();
        Ok(Some(match region {
            Some(r) => crop_to_region(&full, r),
            None => full,
        }))
    }
}

/// Runs a command with a deadline, killing it on expiry. `Ok(None)` means
/// the process had to be killed. A hung screenshot tool must not wedge the
/// analyzer thread (or the shared-capture slot it may hold).
fn run_with_deadline(
    cmd: &mut Command,
    timeout: std::time::Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let mut child = cmd.spawn()?;
    let deadline = std::time::Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if std::time::Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(None);
                }
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
        }
    }
}

/// Crops a full-screen frame to a monitor region. When the frame is smaller
/// than the virtual screen (a scaled capture), the region is rescaled
/// proportionally before cropping.
pub fn crop_to_region(frame: &RgbImage, region: Rect) -> RgbImage {
    let (fw, fh) = frame.dimensions();
    let need_w = (region.x.max(0) as u32).saturating_add(region.width);
    let need_h = (region.y.max(0) as u32).saturating_add(region.height);

    let (x, y, w, h) = if need_w > fw || need_h > fh {
        // Assume the frame covers the same virtual screen at reduced scale.
        let sx = fw as f64 / need_w.max(1) as f64;
        let sy = fh as f64 / need_h.max(1) as f64;
        let s = sx.min(sy);
        (
            (region.x.max(0) as f64 * s) as u32,
            (region.y.max(0) as f64 * s) as u32,
            ((region.width as f64 * s) as u32).max(1),
            ((region.height as f64 * s) as u32).max(1),
        )
    } else {
        (
            region.x.max(0) as u32,
            region.y.max(0) as u32,
            region.width,
            region.height,
        )
    };

    let w = w.min(fw.saturating_sub(x)).max(1);
    let h = h.min(fh.saturating_sub(y)).max(1);
    image::imageops::crop_imm(frame, x, y, w, h).to_image()
}

/// Ordered backend chain with sticky selection.
pub struct CaptureChain {
    backends: Vec<Box<dyn CaptureBackend>>,
    cached: Option<usize>,
    failures: u32,
}

impl Default for CaptureChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(X11RootCapture),
            Box::new(ToolCapture::grim()),
            Box::new(ToolCapture::gnome_screenshot()),
            Box::new(ToolCapture::scrot()),
            Box::new(ToolCapture::import()),
        ])
    }
}

impl CaptureChain {
    pub fn new(backends: Vec<Box<dyn CaptureBackend>>) -> Self {
        Self {
            backends,
            cached: None,
            failures: 0,
        }
    }

    /// Captures using the cached backend, or searches the chain. Returns
    /// `None` when nothing worked this cycle.
    pub fn capture(&mut self, region: Option<Rect>) -> Option<RgbImage> {
        if let Some(idx) = self.cached {
            match self.backends[idx].capture(region) {
                Ok(Some(img)) => {
                    self.failures = 0;
                    return Some(img);
                }
                Ok(None) => {
                    self.cached = None;
                    self.failures = 0;
                }
                Err(err) => {
                    self.failures += 1;
                    warn!(
                        backend = self.backends[idx].name(),
                        failures = self.failures,
                        error = %err,
                        "cached capture backend failed"
                    );
                    if self.failures >= tuning::MAX_BACKEND_FAILURES {
                        self.cached = None;
                        self.failures = 0;
                    } else {
                        return None;
                    }
                }
            }
        }

        for idx in 0..self.backends.len() {
            match self.backends[idx].capture(region) {
                Ok(Some(img)) => {
                    debug!(backend = self.backends[idx].name(), "capture backend selected");
                    self.cached = Some(idx);
                    self.failures = 0;
                    return Some(img);
                }
                Ok(None) => continue,
                Err(err) => {
                    trace!(backend = self.backends[idx].name(), error = %err, "backend failed during search");
                }
            }
        }
        None
    }
}
