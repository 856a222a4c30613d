//! Per-feature write coalescing.
//!
//! Rapid setting changes (a slider drag, a burst of analysis updates) must
//! not queue one hardware write per intermediate value. For each feature at
//! most one write is in flight; values arriving meanwhile overwrite a single
//! pending slot, and when the in-flight write finishes only the newest value
//! goes out next.
//!
//! Caller pattern:
//!
//! ```ignore
//! if let Some(mut value) = coalescer.submit(code, requested) {
//!     loop {
//!         channel.write(code, value)?;
//!         match coalescer.complete(code, value) {
//!             Some(next) => value = next,
//!             None => break,
//!         }
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use crate::vcp::FeatureCode;

#[derive(Debug, Clone, Copy)]
struct Pending {
    latest: u16,
    in_flight: bool,
}

#[derive(Default)]
pub struct WriteCoalescer {
    state: Mutex<HashMap<FeatureCode, Pending>>,
}

impl WriteCoalescer {
    /// Offers a value for writing. `Some(value)` means the caller now owns
    /// the in-flight slot and must write then call `complete`; `None` means
    /// another write is in flight and this value was parked.
    pub fn submit(&self, code: FeatureCode, value: u16) -> Option<u16> {
        let mut state = self.state.lock().unwrap();
        match state.get_mut(&code) {
            Some(p) if p.in_flight => {
                p.latest = value;
                None
            }
            _ => {
                state.insert(
                    code,
                    Pending {
                        latest: value,
                        in_flight: true,
                    },
                );
                Some(value)
            }
        }
    }

    /// Reports a finished write of `sent`. Returns the next value to write
    /// when a newer one was parked; otherwise releases the slot.
    pub fn complete(&self, code: FeatureCode, sent: u16) -> Option<u16> {
        let mut state = self.state.lock().unwrap();
        match state.get_mut(&code) {
            Some(p) if p.in_flight => {
                if p.latest != sent {
                    Some(p.latest)
                } else {
                    state.remove(&code);
                    None
                }
            }
            _ => None,
        }
    }
}
