//! Screen content analysis.
//!
//! Periodically captures a monitor's region, reduces it to luminance
//! statistics and maps those to suggested brightness and contrast values.
//! Suggestions are exponentially smoothed so scene cuts do not slam the
//! backlight around.

mod capture;
mod shared;

pub use capture::{CaptureBackend, CaptureChain, ToolCapture, X11RootCapture, crop_to_region};
pub use shared::{SharedCapture, SharedCaptureTimeout};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::constants::analyzer as tuning;
use crate::types::Rect;

/// Tuning for the content-to-settings mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveParams {
    pub min_brightness: u16,
    pub max_brightness: u16,
    pub min_contrast: u16,
    pub max_contrast: u16,
    /// Weight of the previous output in the smoothing filter, 0..1.
    pub smoothing: f64,
    /// Seconds between capture cycles.
    pub interval_secs: f64,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            min_brightness: 10,
            max_brightness: 90,
            min_contrast: 40,
            max_contrast: 80,
            smoothing: 0.5,
            interval_secs: tuning::DEFAULT_INTERVAL.as_secs_f64(),
        }
    }
}

/// Result of analyzing one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenAnalysis {
    /// Mean luminance, 0..1.
    pub mean: f64,
    /// Luminance standard deviation, 0..1.
    pub stddev: f64,
    /// Fraction of pixels with luminance below 0.3.
    pub dark_ratio: f64,
    /// Fraction of pixels with luminance above 0.7.
    pub bright_ratio: f64,
    /// Smoothed brightness suggestion.
    pub brightness: u16,
    /// Smoothed contrast suggestion.
    pub contrast: u16,
}

/// Luminance statistics of a downsampled frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub mean: f64,
    pub stddev: f64,
    pub dark_ratio: f64,
    pub bright_ratio: f64,
}

/// Computes luminance statistics, downsampling large frames first.
pub fn frame_stats(frame: &RgbImage) -> FrameStats {
    let (w, h) = frame.dimensions();
    let longest = w.max(h);
    let scaled;
    let img = if longest > tuning::MAX_ANALYSIS_EDGE {
        let s = tuning::MAX_ANALYSIS_EDGE as f64 / longest as f64;
        scaled = image::imageops::resize(
            frame,
            ((w as f64 * s) as u32).max(1),
            ((h as f64 * s) as u32).max(1),
            image::imageops::FilterType::Nearest,
        );
        &scaled
    } else {
        frame
    };

    let n = (img.width() * img.height()) as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut dark = 0u32;
    let mut bright = 0u32;
    for px in img.pixels() {
        let lum = luminance(px);
        sum += lum;
        sum_sq += lum * lum;
        if lum < 0.3 {
            dark += 1;
        } else if lum > 0.7 {
            bright += 1;
        }
    }
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    FrameStats {
        mean,
        stddev: variance.sqrt(),
        dark_ratio: dark as f64 / n,
        bright_ratio: bright as f64 / n,
    }
}

fn luminance(px: &image::Rgb<u8>) -> f64 {
    let [r, g, b] = px.0;
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) / 255.0
}

/// Raw (unsmoothed) brightness for a frame: bright content gets less
/// backlight, dark content more.
pub fn raw_brightness(stats: &FrameStats, p: &AdaptiveParams) -> f64 {
    let range = (p.max_brightness - p.min_brightness.min(p.max_brightness)) as f64;
    p.max_brightness as f64 - stats.mean * range
}

/// Raw contrast for a frame. Predominantly dark or bright content gets a
/// value pulled in from the respective extreme; mixed content scales with
/// mean luminance.
pub fn raw_contrast(stats: &FrameStats, p: &AdaptiveParams) -> f64 {
    let min_c = p.min_contrast as f64;
    let max_c = p.max_contrast as f64;
    if stats.dark_ratio > 0.6 || stats.mean < 0.35 {
        (max_c - 10.0).max(min_c)
    } else if stats.bright_ratio > 0.6 || stats.mean > 0.65 {
        (min_c + 10.0).min(max_c)
    } else {
        let range = max_c - min_c;
        max_c - stats.mean * range
    }
}

/// One smoothing step: previous output weighted by `smoothing`, new raw
/// value by the remainder, rounded half-to-even and clamped.
pub fn smooth(previous: Option<u16>, raw: f64, smoothing: f64, min: u16, max: u16) -> u16 {
    let blended = match previous {
        Some(prev) => smoothing * prev as f64 + (1.0 - smoothing) * raw,
        None => raw,
    };
    (blended.round_ties_even() as i64).clamp(min as i64, max as i64) as u16
}

/// Hash of a handful of fixed pixels, cheap proxy for "has the screen
/// changed". Corners, center and two interior points.
pub fn frame_fingerprint(frame: &RgbImage) -> u64 {
    let (w, h) = frame.dimensions();
    let (w1, h1) = (w.saturating_sub(1), h.saturating_sub(1));
    let points = [
        (0, 0),
        (w1, 0),
        (0, h1),
        (w1, h1),
        (w / 2, h / 2),
        (w / 4, h / 4),
        (w1 - w / 4, h1 - h / 4),
    ];
    let mut hasher = DefaultHasher::new();
    for (x, y) in points {
        frame.get_pixel(x, y).0.hash(&mut hasher);
    }
    hasher.finish()
}

/// Per-analyzer smoothing and change-detection state.
#[derive(Default)]
pub struct AnalysisState {
    last_brightness: Option<u16>,
    last_contrast: Option<u16>,
    last_fingerprint: Option<u64>,
    last_analysis: Option<ScreenAnalysis>,
    reuse_count: u32,
}

impl AnalysisState {
    /// Seeds the smoothing history, typically from the current hardware
    /// values, so the first suggestion ramps from reality.
    pub fn seed(&mut self, brightness: Option<u16>, contrast: Option<u16>) {
        self.last_brightness = brightness;
        self.last_contrast = contrast;
    }

    /// Analyzes a frame, short-circuiting on an unchanged fingerprint.
    pub fn analyze(&mut self, frame: &RgbImage, p: &AdaptiveParams) -> ScreenAnalysis {
        let fp = frame_fingerprint(frame);
        if self.last_fingerprint == Some(fp) && self.reuse_count < tuning::MAX_UNCHANGED_REUSE {
            if let Some(prev) = self.last_analysis {
                self.reuse_count += 1;
                trace!(reuse = self.reuse_count, "frame unchanged, reusing analysis");
                return prev;
            }
        }
        self.reuse_count = 0;
        self.last_fingerprint = Some(fp);

        let stats = frame_stats(frame);
        let brightness = smooth(
            self.last_brightness,
            raw_brightness(&stats, p),
            p.smoothing,
            p.min_brightness,
            p.max_brightness,
        );
        let contrast = smooth(
            self.last_contrast,
            raw_contrast(&stats, p),
            p.smoothing,
            p.min_contrast,
            p.max_contrast,
        );
        self.last_brightness = Some(brightness);
        self.last_contrast = Some(contrast);

        let analysis = ScreenAnalysis {
            mean: stats.mean,
            stddev: stats.stddev,
            dark_ratio: stats.dark_ratio,
            bright_ratio: stats.bright_ratio,
            brightness,
            contrast,
        };
        self.last_analysis = Some(analysis);
        analysis
    }
}

pub type AnalysisCallback = Box<dyn Fn(ScreenAnalysis) + Send>;

/// Background analyzer for one monitor's region.
pub struct ScreenAnalyzer {
    region: Option<Rect>,
    params: Arc<Mutex<AdaptiveParams>>,
    shared: Arc<SharedCapture>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    seed: Arc<Mutex<(Option<u16>, Option<u16>)>>,
}

impl ScreenAnalyzer {
    pub fn new(region: Option<Rect>, params: AdaptiveParams, shared: Arc<SharedCapture>) -> Self {
        Self {
            region,
            params: Arc::new(Mutex::new(params)),
            shared,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            seed: Arc::new(Mutex::new((None, None))),
        }
    }

    /// Updates tuning for a running analyzer.
    pub fn set_params(&self, params: AdaptiveParams) {
        *self.params.lock().unwrap() = params;
    }

    /// Sets the smoothing start point picked up when monitoring starts.
    pub fn seed(&self, brightness: Option<u16>, contrast: Option<u16>) {
        *self.seed.lock().unwrap() = (brightness, contrast);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the capture loop; each cycle's analysis is handed to
    /// `callback`. A second start while running is a no-op.
    pub fn start(&mut self, callback: AnalysisCallback) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let region = self.region;
        let params = self.params.clone();
        let shared = self.shared.clone();
        let running = self.running.clone();
        let seed = self.seed.clone();

        self.handle = Some(std::thread::spawn(move || {
            let mut chain = CaptureChain::default();
            let mut state = AnalysisState::default();
            {
                let (b, c) = *seed.lock().unwrap();
                state.seed(b, c);
            }
            debug!(?region, "analyzer started");

            while running.load(Ordering::SeqCst) {
                let cycle_start = Instant::now();
                let p = params.lock().unwrap().clone();

                let frame = match shared.acquire(|| chain.capture(None)) {
                    Ok(Some(full)) => Some(full),
                    Ok(None) => None,
                    Err(SharedCaptureTimeout) => {
                        warn!("shared capture lock timed out, capturing independently");
                        chain.capture(None)
                    }
                };

                if let Some(full) = frame {
                    let frame = match region {
                        Some(r) => crop_to_region(&full, r),
                        None => full,
                    };
                    let analysis = state.analyze(&frame, &p);
                    callback(analysis);
                } else {
                    trace!("no capture this cycle");
                }

                // Interruptible sleep for the rest of the interval.
                let interval = Duration::from_secs_f64(p.interval_secs.max(0.1));
                while running.load(Ordering::SeqCst) && cycle_start.elapsed() < interval {
                    std::thread::sleep(tuning::SLEEP_SLICE.min(
                        interval.saturating_sub(cycle_start.elapsed()),
                    ));
                }
            }
            debug!(?region, "analyzer stopped");
        }));
    }

    /// Signals the loop to stop and joins it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScreenAnalyzer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(lum: u8, w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([lum, lum, lum]))
    }

    #[test]
    fn stats_of_solid_frames() {
        let dark = frame_stats(&solid(0, 10, 10));
        assert!(dark.mean < 0.01);
        assert!(dark.dark_ratio > 0.99);
        assert!(dark.bright_ratio < 0.01);

        let bright = frame_stats(&solid(255, 10, 10));
        assert!(bright.mean > 0.99);
        assert!(bright.bright_ratio > 0.99);
        assert!(bright.stddev < 0.01);
    }

    #[test]
    fn large_frames_are_downsampled() {
        // Would be slow without downsampling; mostly checks it doesn't skew stats.
        let stats = frame_stats(&solid(128, 1000, 600));
        assert!((stats.mean - 128.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn brightness_mapping_is_inverse() {
        let p = AdaptiveParams::default();
        let dark = frame_stats(&solid(0, 4, 4));
        let bright = frame_stats(&solid(255, 4, 4));
        assert!(raw_brightness(&dark, &p) > raw_brightness(&bright, &p));
        assert!((raw_brightness(&dark, &p) - p.max_brightness as f64).abs() < 1.0);
        assert!((raw_brightness(&bright, &p) - p.min_brightness as f64).abs() < 1.0);
    }

    #[test]
    fn contrast_mapping_special_cases() {
        let p = AdaptiveParams::default();
        let dark = frame_stats(&solid(10, 4, 4));
        assert!((raw_contrast(&dark, &p) - (p.max_contrast as f64 - 10.0)).abs() < 1e-9);
        let bright = frame_stats(&solid(250, 4, 4));
        assert!((raw_contrast(&bright, &p) - (p.min_contrast as f64 + 10.0)).abs() < 1e-9);
        let mid = frame_stats(&solid(128, 4, 4));
        let expected =
            p.max_contrast as f64 - mid.mean * (p.max_contrast - p.min_contrast) as f64;
        assert!((raw_contrast(&mid, &p) - expected).abs() < 1e-9);
    }

    #[test]
    fn smoothing_ramps_toward_raw() {
        // From 20 with a constant raw of 80 at weight 0.5:
        // 50, 65, 72.5 -> 72 (ties to even), 76.
        let mut last = Some(20);
        let mut seen = Vec::new();
        for _ in 0..4 {
            let next = smooth(last, 80.0, 0.5, 0, 100);
            seen.push(next);
            last = Some(next);
        }
        assert_eq!(seen, vec![50, 65, 72, 76]);
    }

    #[test]
    fn smoothing_converges_to_raw() {
        let mut last = Some(20);
        for _ in 0..64 {
            last = Some(smooth(last, 80.0, 0.5, 0, 100));
        }
        assert_eq!(last, Some(80));
    }

    #[test]
    fn smoothing_clamps_to_range() {
        assert_eq!(smooth(Some(90), 200.0, 0.5, 10, 95), 95);
        assert_eq!(smooth(Some(12), -50.0, 0.5, 10, 95), 10);
        // No history: raw value directly, still clamped.
        assert_eq!(smooth(None, 120.0, 0.5, 10, 95), 95);
    }

    #[test]
    fn unchanged_frame_reuses_analysis_up_to_limit() {
        let p = AdaptiveParams::default();
        let mut state = AnalysisState::default();
        let frame = solid(128, 50, 50);

        let first = state.analyze(&frame, &p);
        // Same frame: reused, including the smoothed values.
        for _ in 0..tuning::MAX_UNCHANGED_REUSE {
            assert_eq!(state.analyze(&frame, &p), first);
        }
        // Limit hit: a full re-analysis runs and smoothing advances.
        let after = state.analyze(&frame, &p);
        assert_eq!(state.reuse_count, 0);
        // Raw is constant so values converge; they may equal or differ by
        // the smoothing step, but the path went through a fresh analysis.
        assert!(after.brightness.abs_diff(first.brightness) <= 30);
    }

    #[test]
    fn changed_frame_is_always_reanalyzed() {
        let p = AdaptiveParams::default();
        let mut state = AnalysisState::default();
        let a = state.analyze(&solid(0, 50, 50), &p);
        let b = state.analyze(&solid(255, 50, 50), &p);
        assert!(a.brightness > b.brightness || a.mean < b.mean);
        assert_eq!(state.reuse_count, 0);
    }

    #[test]
    fn analyzer_thread_stops_cleanly() {
        let shared = Arc::new(SharedCapture::default());
        let mut analyzer = ScreenAnalyzer::new(None, AdaptiveParams::default(), shared);
        analyzer.start(Box::new(|_| {}));
        assert!(analyzer.is_running());
        analyzer.stop();
        assert!(!analyzer.is_running());
    }
}
