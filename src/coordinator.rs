//! Coordinator: owns one controller per detected monitor and fans events
//! out to them.

use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use tracing::{info, warn};

use crate::analyzer::SharedCapture;
use crate::config::Config;
use crate::controller::{EventHandler, ProfileController};
use crate::ddc::{DdcChannel, DdcutilTransport};
use crate::monitor::{MonitorInfo, detect_monitors};
use crate::vcp::FeatureCode;
use crate::window::WindowInfo;

pub struct Coordinator {
    config: Arc<RwLock<Config>>,
    shared_capture: Arc<SharedCapture>,
    controllers: Mutex<Vec<Arc<ProfileController>>>,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            shared_capture: Arc::new(SharedCapture::default()),
            controllers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    /// Detects monitors and builds a controller stack for each. Replaces
    /// any existing controllers, so this also serves as a rescan.
    pub fn sync_monitors(&self) -> Result<usize> {
        let monitors = detect_monitors()?;
        self.attach_all(monitors);
        Ok(self.controllers.lock().unwrap().len())
    }

    /// Builds controllers for the given monitors; the first one becomes the
    /// fallback for windows without geometry.
    pub fn attach_all(&self, monitors: Vec<MonitorInfo>) {
        self.stop_all();
        let ddc = self.config.read().unwrap().ddc.clone();
        let mut controllers = Vec::with_capacity(monitors.len());
        for (idx, monitor) in monitors.into_iter().enumerate() {
            let transport = DdcutilTransport::new(monitor.display, ddc.sleep_multiplier);
            let channel = Arc::new(DdcChannel::new(
                monitor.display,
                ddc.channel_config(),
                Box::new(transport),
            ));
            controllers.push(ProfileController::new(
                monitor,
                idx == 0,
                channel,
                self.config.clone(),
                self.shared_capture.clone(),
            ));
        }
        *self.controllers.lock().unwrap() = controllers;
    }

    /// Starts every controller (hardware scan, analyzers).
    pub fn start_all(&self) {
        for c in self.controllers.lock().unwrap().iter() {
            c.start();
        }
    }

    /// Stops analyzers and persists learned hardware quirks.
    pub fn stop_all(&self) {
        for c in self.controllers.lock().unwrap().iter() {
            c.persist_hardware_state();
            c.stop();
        }
        info!("all controllers stopped");
    }

    pub fn controllers(&self) -> Vec<Arc<ProfileController>> {
        self.controllers.lock().unwrap().clone()
    }

    pub fn controller_for(&self, config_id: &str) -> Option<Arc<ProfileController>> {
        self.controllers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.monitor().config_id() == config_id)
            .cloned()
    }

    /// Fans a focus event out; each controller decides ownership itself.
    pub fn route_window_event(&self, window: &WindowInfo) {
        for c in self.controllers.lock().unwrap().iter() {
            c.on_window_change(window);
        }
    }

    /// Writes a feature on one monitor through its coalescer.
    pub fn set_feature(&self, config_id: &str, code: FeatureCode, value: u16) {
        match self.controller_for(config_id) {
            Some(c) => c.request_write(code, value),
            None => warn!(monitor = config_id, "no such monitor"),
        }
    }

    /// Registers an observer on every controller.
    pub fn add_observer(&self, handler: impl Fn(&str, &crate::controller::ControllerEvent) + Send + Sync + Clone + 'static) {
        for c in self.controllers.lock().unwrap().iter() {
            let h = handler.clone();
            let boxed: EventHandler = Box::new(move |id, ev| h(id, ev));
            c.add_observer(boxed);
        }
    }
}
