//! Shared full-screen capture.
//!
//! With several monitors each running an analyzer, a fresh full-screen
//! capture per analyzer per cycle wastes work and hammers the capture tool.
//! One `SharedCapture` instance is passed to every analyzer; a frame younger
//! than the freshness window is reused, otherwise the caller's capture
//! closure refreshes it. The lock wait is bounded so one stuck analyzer
//! cannot stall the rest.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::trace;

use crate::constants::analyzer as tuning;

/// Returned when the shared lock could not be taken in time; the caller
/// should capture on its own.
#[derive(Debug)]
pub struct SharedCaptureTimeout;

struct Slot {
    frame: RgbImage,
    taken_at: Instant,
}

pub struct SharedCapture {
    max_age: Duration,
    lock_timeout: Duration,
    slot: Mutex<Option<Slot>>,
}

impl Default for SharedCapture {
    fn default() -> Self {
        Self::new(
            tuning::SHARED_CAPTURE_MAX_AGE,
            tuning::SHARED_CAPTURE_LOCK_TIMEOUT,
        )
    }
}

impl SharedCapture {
    pub fn new(max_age: Duration, lock_timeout: Duration) -> Self {
        Self {
            max_age,
            lock_timeout,
            slot: Mutex::new(None),
        }
    }

    /// Gets a full-screen frame, reusing a fresh shared one or refreshing
    /// via `capture`.
    ///
    /// `Ok(None)` means `capture` itself produced nothing; `Err` means the
    /// lock wait timed out and the caller must fall back to its own capture.
    pub fn acquire(
        &self,
        capture: impl FnOnce() -> Option<RgbImage>,
    ) -> Result<Option<RgbImage>, SharedCaptureTimeout> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut guard = loop {
            match self.slot.try_lock() {
                Ok(g) => break g,
                Err(std::sync::TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(SharedCaptureTimeout);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(std::sync::TryLockError::Poisoned(p)) => break p.into_inner(),
            }
        };

        if let Some(slot) = guard.as_ref() {
            if slot.taken_at.elapsed() <= self.max_age {
                trace!(age_ms = slot.taken_at.elapsed().as_millis() as u64, "reusing shared frame");
                return Ok(Some(slot.frame.clone()));
            }
        }

        match capture() {
            Some(frame) => {
                *guard = Some(Slot {
                    frame: frame.clone(),
                    taken_at: Instant::now(),
                });
                Ok(Some(frame))
            }
            None => {
                *guard = None;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn frame() -> RgbImage {
        RgbImage::new(2, 2)
    }

    #[test]
    fn fresh_frame_is_reused() {
        let shared = SharedCapture::new(Duration::from_secs(60), Duration::from_millis(100));
        let captures = AtomicU32::new(0);
        let take = || {
            captures.fetch_add(1, Ordering::SeqCst);
            Some(frame())
        };
        assert!(shared.acquire(take).unwrap().is_some());
        assert!(shared.acquire(take).unwrap().is_some());
        assert_eq!(captures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_frame_is_refreshed() {
        let shared = SharedCapture::new(Duration::ZERO, Duration::from_millis(100));
        let captures = AtomicU32::new(0);
        let take = || {
            captures.fetch_add(1, Ordering::SeqCst);
            Some(frame())
        };
        shared.acquire(take).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        shared.acquire(take).unwrap();
        assert_eq!(captures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn held_lock_times_out() {
        let shared = std::sync::Arc::new(SharedCapture::new(
            Duration::from_secs(60),
            Duration::from_millis(50),
        ));
        // Hold the slot lock from another thread past the caller's timeout.
        let held = shared.clone();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = held.slot.lock().unwrap();
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });
        started_rx.recv().unwrap();

        let r = shared.acquire(|| Some(frame()));
        assert!(r.is_err());
        holder.join().unwrap();
    }

    #[test]
    fn failed_capture_clears_slot() {
        let shared = SharedCapture::new(Duration::from_secs(60), Duration::from_millis(100));
        assert!(shared.acquire(|| None).unwrap().is_none());
        // Next caller captures again rather than reusing anything.
        let r = shared.acquire(|| Some(frame())).unwrap();
        assert!(r.is_some());
    }
}
