//! Serialized, cached, rate-limited command channel to one display.
//!
//! All hardware traffic for a display funnels through one `DdcChannel`. The
//! channel remembers the last value written or read per feature so repeated
//! writes of the same value never touch the wire, remembers features the
//! display rejected so they fail fast, and spaces commands out so slow DDC
//! buses are not overwhelmed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::constants::ddc as tuning;
use crate::error::{DdcError, DdcResult};
use crate::vcp::{ColorValue, FeatureCode, VcpValue};

use super::transport::{DdcTransport, TransportError};

/// Called around commands that may stall, so UIs can show a busy state
/// with a human-readable description of the command in flight. Panics in
/// observers are the observer's problem and must not kill the channel
/// thread, so calls go through `catch_unwind`.
pub type BusyObserver = Box<dyn Fn(bool, &str) + Send>;

/// Channel tuning knobs, from the global config.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub retry_count: u32,
    pub sleep_multiplier: f64,
    pub command_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry_count: tuning::DEFAULT_RETRY_COUNT,
            sleep_multiplier: tuning::DEFAULT_SLEEP_MULTIPLIER,
            command_timeout: tuning::COMMAND_TIMEOUT,
        }
    }
}

/// Parsed capabilities of a display.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub model: Option<String>,
    pub mccs_version: Option<String>,
    /// Feature code -> advertised value list (empty for continuous features).
    pub features: BTreeMap<u8, FeatureCaps>,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureCaps {
    pub name: Option<String>,
    pub values: BTreeMap<u16, String>,
}

struct ChannelState {
    transport: Box<dyn DdcTransport>,
    /// Last value confirmed on the wire, per feature.
    cache: HashMap<FeatureCode, u16>,
    /// Features the display rejected; cleared only by `reset`.
    unsupported: HashSet<FeatureCode>,
    last_command: Option<Instant>,
    capabilities: Option<Capabilities>,
}

pub struct DdcChannel {
    display: u32,
    cfg: ChannelConfig,
    state: Mutex<ChannelState>,
    busy_observers: Mutex<Vec<BusyObserver>>,
}

impl DdcChannel {
    pub fn new(display: u32, cfg: ChannelConfig, transport: Box<dyn DdcTransport>) -> Self {
        Self {
            display,
            cfg,
            state: Mutex::new(ChannelState {
                transport,
                cache: HashMap::new(),
                unsupported: HashSet::new(),
                last_command: None,
                capabilities: None,
            }),
            busy_observers: Mutex::new(Vec::new()),
        }
    }

    pub fn display(&self) -> u32 {
        self.display
    }

    /// Registers a callback fired with `true` before hardware traffic and
    /// `false` after.
    pub fn add_busy_observer(&self, observer: BusyObserver) {
        self.busy_observers.lock().unwrap().push(observer);
    }

    fn notify_busy(&self, busy: bool, what: &str) {
        let observers = self.busy_observers.lock().unwrap();
        for obs in observers.iter() {
            // An observer must never take the channel down with it.
            let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| obs(busy, what)));
            if r.is_err() {
                warn!(display = self.display, "busy observer panicked");
            }
        }
    }

    /// Last value seen for a feature without touching hardware.
    pub fn cached(&self, code: FeatureCode) -> Option<u16> {
        self.state.lock().unwrap().cache.get(&code).copied()
    }

    /// Drops the cached value for one feature, forcing the next write out.
    pub fn invalidate(&self, code: FeatureCode) {
        self.state.lock().unwrap().cache.remove(&code);
    }

    pub fn is_unsupported(&self, code: FeatureCode) -> bool {
        self.state.lock().unwrap().unsupported.contains(&code)
    }

    /// Pre-marks a feature rejected, e.g. from persisted state of an
    /// earlier run.
    pub fn mark_unsupported(&self, code: FeatureCode) {
        self.state.lock().unwrap().unsupported.insert(code);
    }

    /// Clears the cache and the rejected-feature set, e.g. after the monitor
    /// was power-cycled.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.cache.clear();
        state.unsupported.clear();
        state.capabilities = None;
    }

    /// Reads a feature's current and maximum value.
    pub fn read(&self, code: FeatureCode) -> DdcResult<VcpValue> {
        let mut state = self.state.lock().unwrap();
        if state.unsupported.contains(&code) {
            return Err(DdcError::Unsupported(code));
        }
        let what = format!("read {code}");
        self.notify_busy(true, &what);
        let result = self.run_get(&mut state, code);
        self.notify_busy(false, &what);

        match &result {
            Ok(value) => {
                state.cache.insert(code, value.current);
            }
            Err(e) if e.is_permanent() => {
                state.unsupported.insert(code);
            }
            Err(_) => {}
        }
        result
    }

    /// Writes a feature, suppressing the command when the cached value
    /// already matches.
    pub fn write(&self, code: FeatureCode, value: u16) -> DdcResult<()> {
        self.write_opts(code, value, false)
    }

    /// Writes a feature. `force` bypasses the cache check but still updates
    /// the cache on success.
    pub fn write_opts(&self, code: FeatureCode, value: u16, force: bool) -> DdcResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.unsupported.contains(&code) {
            return Err(DdcError::Unsupported(code));
        }
        if !force && state.cache.get(&code) == Some(&value) {
            trace!(display = self.display, %code, value, "write suppressed");
            return Ok(());
        }

        let what = format!("write {code} = {value}");
        self.notify_busy(true, &what);
        let result = self.run_set(&mut state, code, value);
        self.notify_busy(false, &what);

        match &result {
            Ok(()) => {
                state.cache.insert(code, value);
                debug!(display = self.display, %code, value, "wrote feature");
            }
            Err(e) => {
                // A failed write leaves the hardware state unknown.
                state.cache.remove(&code);
                if e.is_permanent() {
                    state.unsupported.insert(code);
                }
            }
        }
        result
    }

    /// Capabilities string, parsed and cached after the first query.
    pub fn capabilities(&self) -> DdcResult<Capabilities> {
        let mut state = self.state.lock().unwrap();
        if let Some(caps) = &state.capabilities {
            return Ok(caps.clone());
        }
        self.notify_busy(true, "read capabilities");
        let result = self.run_capabilities(&mut state);
        self.notify_busy(false, "read capabilities");

        let caps = result?;
        state.capabilities = Some(caps.clone());
        Ok(caps)
    }

    /// Advertised color choices: display-mode presets, then
    /// color-temperature presets, each with a label.
    pub fn color_modes(&self) -> DdcResult<Vec<(ColorValue, String)>> {
        let caps = self.capabilities()?;
        let mut modes = Vec::new();
        if let Some(fc) = caps.features.get(&FeatureCode::DisplayMode.code()) {
            for (&value, label) in &fc.values {
                modes.push((ColorValue::DisplayMode(value), label.clone()));
            }
        }
        if let Some(fc) = caps.features.get(&FeatureCode::ColorTemperature.code()) {
            for (&value, label) in &fc.values {
                modes.push((ColorValue::ColorTemperature(value), label.clone()));
            }
        }
        Ok(modes)
    }

    /// Reads every known feature once, priming the cache. Errors are
    /// per-feature; a rejected feature does not abort the scan.
    pub fn read_all(&self) -> HashMap<FeatureCode, VcpValue> {
        let mut values = HashMap::new();
        for code in FeatureCode::ALL {
            match self.read(code) {
                Ok(v) => {
                    values.insert(code, v);
                }
                Err(e) => debug!(display = self.display, %code, error = %e, "skipped in scan"),
            }
        }
        values
    }

    // Internal helpers; all assume the state lock is held.

    fn pace(&self, state: &mut ChannelState) {
        let min_interval = tuning::MIN_COMMAND_INTERVAL.mul_f64(self.cfg.sleep_multiplier);
        if let Some(last) = state.last_command {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
        state.last_command = Some(Instant::now());
    }

    fn run_get(&self, state: &mut ChannelState, code: FeatureCode) -> DdcResult<VcpValue> {
        let mut last_err = None;
        for attempt in 1..=self.cfg.retry_count.max(1) {
            self.pace(state);
            // Garbled replies are transient on flaky buses, so a parse
            // failure burns an attempt like a timeout does.
            let err = match state.transport.get_vcp(code.code(), self.cfg.command_timeout) {
                Ok(reply) => match parse_vcp_reply(&reply) {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                },
                Err(e) => interpret(code, e),
            };
            if err.is_permanent() {
                return Err(err);
            }
            trace!(display = self.display, %code, attempt, error = %err, "get retry");
            last_err = Some(err);
            std::thread::sleep(tuning::RETRY_BACKOFF * attempt);
        }
        Err(last_err.unwrap_or_else(|| DdcError::Timeout("no attempts made".into())))
    }

    fn run_set(&self, state: &mut ChannelState, code: FeatureCode, value: u16) -> DdcResult<()> {
        let verify = !code.skip_verification();
        let mut last_err = None;
        for attempt in 1..=self.cfg.retry_count.max(1) {
            self.pace(state);
            match state
                .transport
                .set_vcp(code.code(), value, verify, self.cfg.command_timeout)
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let err = interpret(code, e);
                    if err.is_permanent() {
                        return Err(err);
                    }
                    trace!(display = self.display, %code, attempt, error = %err, "set retry");
                    last_err = Some(err);
                    std::thread::sleep(tuning::RETRY_BACKOFF * attempt);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            DdcError::Write {
                code,
                reason: "no attempts made".into(),
            }
        }))
    }

    fn run_capabilities(&self, state: &mut ChannelState) -> DdcResult<Capabilities> {
        self.pace(state);
        match state.transport.capabilities(tuning::CAPABILITIES_TIMEOUT) {
            Ok(text) => Ok(parse_capabilities(&text)),
            Err(e) => Err(interpret(FeatureCode::DisplayMode, e)),
        }
    }
}

/// Maps transport outcomes to channel errors. Rejections are permanent;
/// process failures and timeouts are transient.
fn interpret(code: FeatureCode, err: TransportError) -> DdcError {
    match err {
        TransportError::Rejected(_) => DdcError::Unsupported(code),
        TransportError::Failed(msg) => DdcError::Timeout(msg),
        TransportError::TimedOut(d) => DdcError::Timeout(format!("no reply after {d:?}")),
    }
}

/// Parses the value out of a `getvcp` reply. Handles the continuous form
/// ("current value = 40, max value = 100"), the hex form
/// ("current value = 0x0b"), and the two non-continuous forms that only
/// carry an `sl` byte.
pub fn parse_vcp_reply(reply: &str) -> DdcResult<VcpValue> {
    let line = reply
        .lines()
        .find(|l| l.contains("current value") || l.contains("sl=0x"))
        .ok_or_else(|| DdcError::Parse(reply.trim().to_string()))?;

    if let Some(idx) = line.find("current value") {
        let after = &line[idx..];
        if let Some(current) = number_after_eq(after) {
            let maximum = line
                .find("max value")
                .and_then(|m| number_after_eq(&line[m..]))
                .unwrap_or(current);
            return Ok(VcpValue { current, maximum });
        }
    }
    // "Invalid value (sl=0x0b)" or "sRGB (sl=0x01)"
    if let Some(idx) = line.find("sl=0x") {
        let hex: String = line[idx + 5..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        if let Ok(current) = u16::from_str_radix(&hex, 16) {
            return Ok(VcpValue {
                current,
                maximum: current,
            });
        }
    }
    Err(DdcError::Parse(line.trim().to_string()))
}

/// Number following the first '=' in `text`, decimal or 0x-prefixed hex.
fn number_after_eq(text: &str) -> Option<u16> {
    let after = text.split_once('=')?.1.trim_start();
    let token: String = after
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

/// Parses `ddcutil capabilities` output. The format is an indented tree:
///
/// ```text
///    Model: U2720Q
///    MCCS version: 2.1
///    VCP Features:
///       Feature: 10 (Brightness)
///       Feature: DC (Display Mode)
///          Values:
///             00: Standard
///             03: Movie
/// ```
pub fn parse_capabilities(text: &str) -> Capabilities {
    let mut caps = Capabilities::default();
    let mut current_feature: Option<u8> = None;
    let mut in_values = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Model:") {
            caps.model = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("MCCS version:") {
            caps.mccs_version = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Feature:") {
            in_values = false;
            let rest = rest.trim();
            let (code_part, name_part) = match rest.split_once(' ') {
                Some((c, n)) => (c, Some(n)),
                None => (rest, None),
            };
            if let Ok(code) = u8::from_str_radix(code_part.trim_start_matches("0x"), 16) {
                let name = name_part
                    .map(|n| n.trim().trim_start_matches('(').trim_end_matches(')').to_string());
                caps.features.insert(
                    code,
                    FeatureCaps {
                        name,
                        values: BTreeMap::new(),
                    },
                );
                current_feature = Some(code);
            } else {
                current_feature = None;
            }
        } else if trimmed.starts_with("Values:") {
            in_values = current_feature.is_some();
        } else if in_values {
            if let Some((code_part, label)) = trimmed.split_once(':') {
                if let Ok(value) = u16::from_str_radix(code_part.trim().trim_start_matches("0x"), 16)
                {
                    if let Some(fc) = current_feature.and_then(|c| caps.features.get_mut(&c)) {
                        fc.values.insert(value, label.trim().to_string());
                        continue;
                    }
                }
            }
            // Dedent or unparseable line ends the value list.
            in_values = false;
        }
    }
    caps
}
