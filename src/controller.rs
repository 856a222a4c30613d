//! Per-monitor controller.
//!
//! Ties one monitor's DDC channel, content analyzer and profile state
//! together. Window focus events and analysis results arrive here; hardware
//! writes leave through the write coalescer so bursts collapse.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::analyzer::{ScreenAnalysis, ScreenAnalyzer, SharedCapture};
use crate::coalesce::WriteCoalescer;
use crate::config::{Config, MonitorConfig};
use crate::constants::own_window;
use crate::ddc::DdcChannel;
use crate::monitor::MonitorInfo;
use crate::profile::find_matching;
use crate::vcp::{ColorValue, FeatureCode};
use crate::window::WindowInfo;

/// State changes surfaced to observers (UIs, telemetry).
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A profile is about to be applied. Fired before hardware I/O so UIs
    /// track intent, not completion.
    ProfileChanged { profile: String },
    /// Analysis produced new suggestions (sent whether or not auto modes
    /// are on).
    Analysis(ScreenAnalysis),
    /// A setting was written to the hardware.
    SettingWritten { code: FeatureCode, value: u16 },
}

pub type EventHandler = Box<dyn Fn(&str, &ControllerEvent) + Send + Sync>;

struct ControllerState {
    active_profile: Option<String>,
    last_sent_brightness: Option<u16>,
    last_sent_contrast: Option<u16>,
}

pub struct ProfileController {
    monitor: MonitorInfo,
    /// Windows with no usable geometry are attributed to the first monitor.
    is_first: bool,
    channel: Arc<DdcChannel>,
    config: Arc<RwLock<Config>>,
    monitor_cfg: Mutex<MonitorConfig>,
    state: Mutex<ControllerState>,
    coalescer: WriteCoalescer,
    observers: Mutex<Vec<EventHandler>>,
    analyzer: Mutex<ScreenAnalyzer>,
}

impl ProfileController {
    pub fn new(
        monitor: MonitorInfo,
        is_first: bool,
        channel: Arc<DdcChannel>,
        config: Arc<RwLock<Config>>,
        shared_capture: Arc<SharedCapture>,
    ) -> Arc<Self> {
        let monitor_cfg = MonitorConfig::load_or_default(&monitor.config_id());
        Self::with_state(monitor, is_first, channel, config, shared_capture, monitor_cfg)
    }

    /// Builds a controller around an explicit per-monitor state instead of
    /// loading it from disk.
    pub fn with_state(
        monitor: MonitorInfo,
        is_first: bool,
        channel: Arc<DdcChannel>,
        config: Arc<RwLock<Config>>,
        shared_capture: Arc<SharedCapture>,
        monitor_cfg: MonitorConfig,
    ) -> Arc<Self> {
        for &code in &monitor_cfg.unsupported_features {
            if let Some(f) = FeatureCode::from_code(code) {
                debug!(monitor = %monitor.config_id(), feature = %f, "known unsupported");
                channel.mark_unsupported(f);
            }
        }
        let params = monitor_cfg
            .adaptive
            .clone()
            .unwrap_or_else(|| config.read().unwrap().adaptive.clone());
        let region = monitor.geometry.as_ref().map(|g| g.rect);
        let analyzer = ScreenAnalyzer::new(region, params, shared_capture);

        Arc::new(Self {
            monitor,
            is_first,
            channel,
            config,
            monitor_cfg: Mutex::new(monitor_cfg),
            state: Mutex::new(ControllerState {
                active_profile: None,
                last_sent_brightness: None,
                last_sent_contrast: None,
            }),
            coalescer: WriteCoalescer::default(),
            observers: Mutex::new(Vec::new()),
            analyzer: Mutex::new(analyzer),
        })
    }

    pub fn monitor(&self) -> &MonitorInfo {
        &self.monitor
    }

    pub fn channel(&self) -> &Arc<DdcChannel> {
        &self.channel
    }

    pub fn active_profile(&self) -> Option<String> {
        self.state.lock().unwrap().active_profile.clone()
    }

    pub fn add_observer(&self, handler: EventHandler) {
        self.observers.lock().unwrap().push(handler);
    }

    fn emit(&self, event: ControllerEvent) {
        let id = self.monitor.config_id();
        for obs in self.observers.lock().unwrap().iter() {
            obs(&id, &event);
        }
    }

    /// Starts background work: primes the cache and smoothing history from
    /// the hardware, refreshes the color-mode list, starts the analyzer if
    /// an auto mode is on.
    pub fn start(self: &Arc<Self>) {
        let current = self.channel.read_all();
        {
            let analyzer = self.analyzer.lock().unwrap();
            analyzer.seed(
                current.get(&FeatureCode::Brightness).map(|v| v.current),
                current.get(&FeatureCode::Contrast).map(|v| v.current),
            );
        }

        self.refresh_color_modes();

        let auto = self.monitor_cfg.lock().unwrap().auto.clone();
        if auto.brightness || auto.contrast {
            self.start_analyzer();
        }
        info!(
            monitor = %self.monitor.config_id(),
            display = self.monitor.display,
            auto_brightness = auto.brightness,
            auto_contrast = auto.contrast,
            "controller started"
        );
    }

    pub fn stop(&self) {
        self.analyzer.lock().unwrap().stop();
    }

    /// Queries capabilities and persists the advertised color modes.
    fn refresh_color_modes(&self) {
        match self.channel.color_modes() {
            Ok(modes) if !modes.is_empty() => {
                let mut cfg = self.monitor_cfg.lock().unwrap();
                cfg.color_modes = modes
                    .into_iter()
                    .map(|(value, label)| crate::config::ColorModeEntry { value, label })
                    .collect();
                self.persist_monitor_cfg(&cfg);
            }
            Ok(_) => {}
            Err(err) => debug!(monitor = %self.monitor.config_id(), error = %err, "no capabilities"),
        }
    }

    fn persist_monitor_cfg(&self, cfg: &MonitorConfig) {
        if let Err(err) = cfg.save(&self.monitor.config_id()) {
            warn!(monitor = %self.monitor.config_id(), error = %err, "failed to save monitor state");
        }
    }

    fn start_analyzer(self: &Arc<Self>) {
        let controller = Arc::downgrade(self);
        self.analyzer.lock().unwrap().start(Box::new(move |analysis| {
            if let Some(c) = controller.upgrade() {
                c.on_analysis(analysis);
            }
        }));
    }

    /// Would a focus event for this window be one of our own UI surfaces?
    fn is_own_window(window: &WindowInfo) -> bool {
        window.class.eq_ignore_ascii_case(own_window::WINDOW_CLASS)
            || window
                .instance
                .eq_ignore_ascii_case(own_window::WINDOW_CLASS)
            || window.title.contains(own_window::TITLE_MARKER)
    }

    /// Whether the focus event belongs to this monitor. Windows without
    /// geometry cannot be placed and fall to the first monitor.
    fn owns_window(&self, window: &WindowInfo) -> bool {
        match &window.geometry {
            Some(g) if g.width > 0 && g.height > 0 => self.monitor.contains_window(g),
            _ => self.is_first,
        }
    }

    /// Handles a focus change. Returns the matched profile name when this
    /// event dispatched a switch; the hardware work itself runs on a
    /// background thread so a stalled bus never holds up focus routing for
    /// other monitors.
    pub fn on_window_change(self: &Arc<Self>, window: &WindowInfo) -> Option<String> {
        if Self::is_own_window(window) {
            return None;
        }
        if !self.owns_window(window) {
            return None;
        }

        let config = self.config.read().unwrap();
        let auto = self.monitor_cfg.lock().unwrap().auto.clone();
        if !config.auto_profile || !auto.profile {
            return None;
        }
        // Borderless-fullscreen games often report maximized instead.
        if auto.fullscreen_only && !(window.is_fullscreen || window.is_maximized) {
            return None;
        }

        let matched = find_matching(&config.profiles, window)?.name.clone();
        drop(config);

        if self.state.lock().unwrap().active_profile.as_deref() == Some(matched.as_str()) {
            return None;
        }
        debug!(
            monitor = %self.monitor.config_id(),
            window = %window.class,
            profile = %matched,
            "window matched profile"
        );
        let controller = self.clone();
        let name = matched.clone();
        std::thread::spawn(move || controller.apply_profile(&name, false));
        Some(matched)
    }

    /// Applies a named profile. `force` rewrites the color even when the
    /// cache says it is already set.
    pub fn apply_profile(self: &Arc<Self>, name: &str, force: bool) {
        let Some(profile) = self.config.read().unwrap().profile(name).cloned() else {
            warn!(profile = name, "unknown profile");
            return;
        };

        // Observers first: the switch is visible even if hardware lags.
        self.emit(ControllerEvent::ProfileChanged {
            profile: name.to_string(),
        });

        // Profile may pin or release the adaptive loops.
        if profile.auto_brightness.is_some() || profile.auto_contrast.is_some() {
            let mut cfg = self.monitor_cfg.lock().unwrap();
            if let Some(b) = profile.auto_brightness {
                cfg.auto.brightness = b;
            }
            if let Some(c) = profile.auto_contrast {
                cfg.auto.contrast = c;
            }
            let auto = cfg.auto.clone();
            self.persist_monitor_cfg(&cfg);
            drop(cfg);
            if auto.brightness || auto.contrast {
                self.start_analyzer();
            } else {
                self.analyzer.lock().unwrap().stop();
            }
        }

        // Per-monitor override beats the profile's own color.
        let color = {
            let cfg = self.monitor_cfg.lock().unwrap();
            cfg.profile_colors
                .get(name)
                .copied()
                .or(profile.settings.color)
        };

        let mut color_ok = true;
        if let Some(color) = color {
            color_ok = self.write_color(color, force);
        }

        for (code, value) in [
            (FeatureCode::Brightness, profile.settings.brightness),
            (FeatureCode::Contrast, profile.settings.contrast),
            (FeatureCode::RedGain, profile.settings.red_gain),
            (FeatureCode::GreenGain, profile.settings.green_gain),
            (FeatureCode::BlueGain, profile.settings.blue_gain),
        ] {
            if let Some(v) = value {
                self.request_write(code, v);
            }
        }

        // The profile only becomes active once its color stuck; a failed
        // color write leaves us eligible to retry on the next focus event.
        if color_ok {
            let mut state = self.state.lock().unwrap();
            state.active_profile = Some(name.to_string());
            if let Some(b) = profile.settings.brightness {
                state.last_sent_brightness = Some(b);
            }
            if let Some(c) = profile.settings.contrast {
                state.last_sent_contrast = Some(c);
            }
            info!(monitor = %self.monitor.config_id(), profile = name, "profile applied");
        } else {
            warn!(monitor = %self.monitor.config_id(), profile = name, "color write failed, profile not marked active");
        }
    }

    /// Synchronous color write, diffed against the cache unless forced.
    fn write_color(&self, color: ColorValue, force: bool) -> bool {
        let code = color.feature();
        match self.channel.write_opts(code, color.raw(), force) {
            Ok(()) => {
                self.emit(ControllerEvent::SettingWritten {
                    code,
                    value: color.raw(),
                });
                true
            }
            Err(err) => {
                warn!(monitor = %self.monitor.config_id(), %color, error = %err, "color write failed");
                false
            }
        }
    }

    /// Coalesced, fire-and-forget hardware write.
    pub fn request_write(self: &Arc<Self>, code: FeatureCode, value: u16) {
        let Some(first) = self.coalescer.submit(code, value) else {
            return;
        };
        let controller = self.clone();
        std::thread::spawn(move || {
            let mut value = first;
            loop {
                match controller.channel.write(code, value) {
                    Ok(()) => controller.emit(ControllerEvent::SettingWritten { code, value }),
                    Err(err) => {
                        debug!(monitor = %controller.monitor.config_id(), %code, error = %err, "write failed")
                    }
                }
                match controller.coalescer.complete(code, value) {
                    Some(next) => value = next,
                    None => break,
                }
            }
        });
    }

    /// Handles one analysis result. Telemetry always goes out; hardware is
    /// only touched for enabled auto modes, and only on change.
    pub fn on_analysis(self: &Arc<Self>, analysis: ScreenAnalysis) {
        self.emit(ControllerEvent::Analysis(analysis));

        let auto = self.monitor_cfg.lock().unwrap().auto.clone();
        let mut state = self.state.lock().unwrap();
        if auto.brightness && state.last_sent_brightness != Some(analysis.brightness) {
            // Recorded before the write lands so a slow bus does not cause
            // duplicate sends of the same suggestion.
            state.last_sent_brightness = Some(analysis.brightness);
            drop(state);
            self.request_write(FeatureCode::Brightness, analysis.brightness);
            state = self.state.lock().unwrap();
        }
        if auto.contrast && state.last_sent_contrast != Some(analysis.contrast) {
            state.last_sent_contrast = Some(analysis.contrast);
            drop(state);
            self.request_write(FeatureCode::Contrast, analysis.contrast);
        }
    }

    /// Toggles adaptive brightness, persists the switch and starts or stops
    /// the analyzer as needed.
    pub fn set_auto_brightness(self: &Arc<Self>, on: bool) {
        self.set_auto(on, |auto, v| auto.brightness = v);
    }

    pub fn set_auto_contrast(self: &Arc<Self>, on: bool) {
        self.set_auto(on, |auto, v| auto.contrast = v);
    }

    fn set_auto(self: &Arc<Self>, on: bool, apply: impl Fn(&mut crate::config::AutoSwitches, bool)) {
        let auto = {
            let mut cfg = self.monitor_cfg.lock().unwrap();
            apply(&mut cfg.auto, on);
            self.persist_monitor_cfg(&cfg);
            cfg.auto.clone()
        };
        if auto.brightness || auto.contrast {
            self.start_analyzer();
        } else {
            self.analyzer.lock().unwrap().stop();
        }
    }

    /// Pins a color for a profile on this monitor and re-applies it when
    /// that profile is currently active.
    pub fn set_profile_color(self: &Arc<Self>, profile: &str, color: ColorValue) {
        {
            let mut cfg = self.monitor_cfg.lock().unwrap();
            cfg.profile_colors.insert(profile.to_string(), color);
            self.persist_monitor_cfg(&cfg);
        }
        if self.active_profile().as_deref() == Some(profile) {
            self.apply_profile(profile, true);
        }
    }

    /// Writes what this run learned about the hardware into the per-monitor
    /// file: rejected features and the last values on the wire.
    pub fn persist_hardware_state(&self) {
        let mut cfg = self.monitor_cfg.lock().unwrap();
        let mut changed = false;
        for f in FeatureCode::ALL {
            if self.channel.is_unsupported(f) && !cfg.unsupported_features.contains(&f.code()) {
                cfg.unsupported_features.push(f.code());
                changed = true;
            }
            if let Some(v) = self.channel.cached(f) {
                if cfg.last_settings.insert(f.name().to_string(), v) != Some(v) {
                    changed = true;
                }
            }
        }
        if changed {
            self.persist_monitor_cfg(&cfg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DdcSettings;
    use crate::ddc::{ChannelConfig, DdcTransport, TransportError, TransportResult};
    use crate::monitor::OutputGeometry;
    use crate::profile::{Profile, ProfileMatch, ProfileSettings};
    use crate::types::Rect;
    use std::time::Duration;

    /// Accepts every command and logs it.
    struct RecordingTransport {
        log: Arc<Mutex<Vec<(u8, u16)>>>,
    }

    impl DdcTransport for RecordingTransport {
        fn get_vcp(&mut self, _code: u8, _timeout: Duration) -> TransportResult<String> {
            Err(TransportError::Rejected("not in test".into()))
        }

        fn set_vcp(
            &mut self,
            code: u8,
            value: u16,
            _verify: bool,
            _timeout: Duration,
        ) -> TransportResult<()> {
            self.log.lock().unwrap().push((code, value));
            Ok(())
        }

        fn capabilities(&mut self, _timeout: Duration) -> TransportResult<String> {
            Err(TransportError::Failed("not in test".into()))
        }
    }

    fn monitor(display: u32, rect: Rect) -> MonitorInfo {
        MonitorInfo {
            display,
            manufacturer: "TST".into(),
            model: format!("Panel{display}"),
            serial: format!("S{display}"),
            i2c_bus: None,
            drm_connector: None,
            geometry: Some(OutputGeometry {
                output: format!("DP-{display}"),
                rect,
                primary: display == 1,
                native: None,
            }),
        }
    }

    fn test_config() -> Arc<RwLock<Config>> {
        let mut config = Config::default();
        config.ddc = DdcSettings::default();
        config.profiles.insert(
            0,
            Profile {
                name: "video".into(),
                priority: 10,
                matching: ProfileMatch {
                    window_class: vec!["mpv".into()],
                    window_title: Vec::new(),
                },
                settings: ProfileSettings {
                    color: Some(ColorValue::DisplayMode(0x03)),
                    brightness: Some(30),
                    ..Default::default()
                },
                ..Profile::default()
            },
        );
        config.normalize();
        Arc::new(RwLock::new(config))
    }

    fn controller_with(
        display: u32,
        rect: Rect,
        is_first: bool,
        config: Arc<RwLock<Config>>,
        monitor_cfg: MonitorConfig,
        transport: Box<dyn DdcTransport>,
    ) -> Arc<ProfileController> {
        let channel = Arc::new(DdcChannel::new(
            display,
            ChannelConfig {
                retry_count: 1,
                sleep_multiplier: 0.0,
                command_timeout: Duration::from_millis(10),
            },
            transport,
        ));
        ProfileController::with_state(
            monitor(display, rect),
            is_first,
            channel,
            config,
            Arc::new(SharedCapture::default()),
            monitor_cfg,
        )
    }

    fn controller(
        display: u32,
        rect: Rect,
        is_first: bool,
        config: Arc<RwLock<Config>>,
    ) -> (Arc<ProfileController>, Arc<Mutex<Vec<(u8, u16)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let c = controller_with(
            display,
            rect,
            is_first,
            config,
            MonitorConfig::default(),
            Box::new(RecordingTransport { log: log.clone() }),
        );
        (c, log)
    }

    fn window(class: &str, geometry: Option<Rect>) -> WindowInfo {
        WindowInfo {
            window: 42,
            title: format!("{class} window"),
            class: class.to_string(),
            instance: class.to_string(),
            is_fullscreen: false,
            is_maximized: false,
            geometry,
        }
    }

    fn wait_for_writes(log: &Arc<Mutex<Vec<(u8, u16)>>>, n: usize) {
        for _ in 0..100 {
            if log.lock().unwrap().len() >= n {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn wait_for_profile(c: &Arc<ProfileController>, name: &str) {
        for _ in 0..200 {
            if c.active_profile().as_deref() == Some(name) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("profile {name} never became active");
    }

    #[test]
    fn window_on_other_monitor_is_ignored() {
        let config = test_config();
        let (left, left_log) =
            controller(1, Rect::new(0, 0, 1920, 1080), true, config.clone());
        let (right, _) = controller(2, Rect::new(1920, 0, 1920, 1080), false, config);

        let win = window("mpv", Some(Rect::new(2000, 100, 800, 600)));
        assert_eq!(left.on_window_change(&win), None);
        assert_eq!(right.on_window_change(&win).as_deref(), Some("video"));
        assert!(left_log.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_geometry_window_falls_to_first_monitor() {
        let config = test_config();
        let (first, _) = controller(1, Rect::new(0, 0, 1920, 1080), true, config.clone());
        let (second, _) = controller(2, Rect::new(1920, 0, 1920, 1080), false, config);

        let win = window("mpv", None);
        assert_eq!(first.on_window_change(&win).as_deref(), Some("video"));
        assert_eq!(second.on_window_change(&win), None);

        let zero = window("mpv", Some(Rect::new(0, 0, 0, 0)));
        // Degenerate geometry is treated the same as none.
        assert_eq!(second.on_window_change(&zero), None);
    }

    #[test]
    fn own_window_never_switches_profiles() {
        let config = test_config();
        let (c, _) = controller(1, Rect::new(0, 0, 1920, 1080), true, config);
        let win = window(own_window::WINDOW_CLASS, Some(Rect::new(10, 10, 400, 300)));
        assert_eq!(c.on_window_change(&win), None);
    }

    #[test]
    fn refocus_on_active_profile_does_nothing() {
        let config = test_config();
        let (c, log) = controller(1, Rect::new(0, 0, 1920, 1080), true, config);
        let win = window("mpv", Some(Rect::new(10, 10, 800, 600)));

        assert_eq!(c.on_window_change(&win).as_deref(), Some("video"));
        wait_for_profile(&c, "video");
        wait_for_writes(&log, 2);
        std::thread::sleep(Duration::from_millis(30));
        let writes_after_first = log.lock().unwrap().len();
        assert_eq!(c.on_window_change(&win), None);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(log.lock().unwrap().len(), writes_after_first);
    }

    #[test]
    fn fullscreen_only_accepts_maximized_windows() {
        let config = test_config();
        let monitor_cfg = MonitorConfig {
            auto: crate::config::AutoSwitches {
                fullscreen_only: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let log = Arc::new(Mutex::new(Vec::new()));
        let c = controller_with(
            1,
            Rect::new(0, 0, 1920, 1080),
            true,
            config,
            monitor_cfg,
            Box::new(RecordingTransport { log }),
        );

        let mut win = window("mpv", Some(Rect::new(10, 10, 800, 600)));
        assert_eq!(c.on_window_change(&win), None);

        win.is_maximized = true;
        assert_eq!(c.on_window_change(&win).as_deref(), Some("video"));
        wait_for_profile(&c, "video");

        let mut other = window("mpv", Some(Rect::new(10, 10, 800, 600)));
        other.window = 43;
        other.is_fullscreen = true;
        // Fullscreen still passes the gate; same profile so no re-dispatch.
        assert_eq!(c.on_window_change(&other), None);
    }

    /// A slow transport models a stalled DDC bus.
    struct SlowTransport {
        delay: Duration,
        log: Arc<Mutex<Vec<(u8, u16)>>>,
    }

    impl DdcTransport for SlowTransport {
        fn get_vcp(&mut self, _code: u8, _timeout: Duration) -> TransportResult<String> {
            Err(TransportError::Rejected("not in test".into()))
        }

        fn set_vcp(
            &mut self,
            code: u8,
            value: u16,
            _verify: bool,
            _timeout: Duration,
        ) -> TransportResult<()> {
            std::thread::sleep(self.delay);
            self.log.lock().unwrap().push((code, value));
            Ok(())
        }

        fn capabilities(&mut self, _timeout: Duration) -> TransportResult<String> {
            Err(TransportError::Failed("not in test".into()))
        }
    }

    #[test]
    fn focus_routing_is_not_blocked_by_slow_hardware() {
        let config = test_config();
        let log = Arc::new(Mutex::new(Vec::new()));
        let c = controller_with(
            1,
            Rect::new(0, 0, 1920, 1080),
            true,
            config,
            MonitorConfig::default(),
            Box::new(SlowTransport {
                delay: Duration::from_millis(500),
                log,
            }),
        );

        let win = window("mpv", Some(Rect::new(10, 10, 800, 600)));
        let started = std::time::Instant::now();
        assert_eq!(c.on_window_change(&win).as_deref(), Some("video"));
        assert!(
            started.elapsed() < Duration::from_millis(200),
            "focus handling waited on the bus: {:?}",
            started.elapsed()
        );
        // The switch still lands, just asynchronously.
        wait_for_profile(&c, "video");
    }

    #[test]
    fn apply_profile_writes_color_and_settings() {
        let config = test_config();
        let (c, log) = controller(1, Rect::new(0, 0, 1920, 1080), true, config);

        c.apply_profile("video", false);
        wait_for_writes(&log, 2);
        let writes = log.lock().unwrap().clone();
        assert!(writes.contains(&(FeatureCode::DisplayMode.code(), 0x03)));
        assert!(writes.contains(&(FeatureCode::Brightness.code(), 30)));
        assert_eq!(c.active_profile().as_deref(), Some("video"));
    }

    #[test]
    fn observers_see_profile_change_before_writes() {
        let config = test_config();
        let (c, _) = controller(1, Rect::new(0, 0, 1920, 1080), true, config);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        c.add_observer(Box::new(move |_, ev| {
            sink.lock().unwrap().push(match ev {
                ControllerEvent::ProfileChanged { profile } => format!("profile:{profile}"),
                ControllerEvent::SettingWritten { code, .. } => format!("write:{code}"),
                ControllerEvent::Analysis(_) => "analysis".to_string(),
            });
        }));

        c.apply_profile("video", false);
        let events = events.lock().unwrap();
        assert_eq!(events.first().map(String::as_str), Some("profile:video"));
    }

    #[test]
    fn analysis_only_writes_when_auto_and_changed() {
        let config = test_config();
        let (c, log) = controller(1, Rect::new(0, 0, 1920, 1080), true, config);

        let analysis = ScreenAnalysis {
            mean: 0.5,
            stddev: 0.1,
            dark_ratio: 0.2,
            bright_ratio: 0.2,
            brightness: 55,
            contrast: 60,
        };
        // Auto modes off: telemetry only, no hardware.
        c.on_analysis(analysis);
        std::thread::sleep(Duration::from_millis(30));
        assert!(log.lock().unwrap().is_empty());
    }
}
