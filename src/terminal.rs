//! Time-critical context: dispatches between the scan and enrollment engines on a fixed
//! cadence and keeps the display's clock fresh while nothing else is happening.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::display::{Feedback, Instruction};
use crate::enroll::{EnrollSettings, EnrollmentEngine};
use crate::error::BootError;
use crate::scan::{ScanEngine, ScanSettings};
use crate::sensor::Sensor;
use crate::store::SharedStore;

const LOOP_YIELD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct TerminalSettings {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

pub struct Terminal<S> {
    sensor: S,
    store: Arc<SharedStore>,
    ui: Arc<dyn Feedback>,
    clock: Arc<Clock>,
    scan: ScanEngine,
    enroll: EnrollmentEngine,
    settings: TerminalSettings,
    capacity: u16,
    last_poll: Option<Instant>,
    last_heartbeat: Option<Instant>,
}

impl<S> fmt::Debug for Terminal<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("scan", &self.scan)
            .field("enroll", &self.enroll)
            .finish_non_exhaustive()
    }
}

impl<S: Sensor> Terminal<S> {
    pub fn new(
        sensor: S,
        store: Arc<SharedStore>,
        ui: Arc<dyn Feedback>,
        clock: Arc<Clock>,
        scan: ScanSettings,
        enroll: EnrollSettings,
        settings: TerminalSettings,
    ) -> Self {
        Self {
            sensor,
            store,
            ui,
            clock,
            capacity: scan.capacity,
            scan: ScanEngine::new(scan),
            enroll: EnrollmentEngine::new(enroll),
            settings,
            last_poll: None,
            last_heartbeat: None,
        }
    }

    pub fn scan(&self) -> &ScanEngine {
        &self.scan
    }

    pub fn enrollment(&self) -> &EnrollmentEngine {
        &self.enroll
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    /// Unlocks the module and logs how full its library is. Only a rejected password is fatal.
    pub fn check_sensor(&mut self, password: u32) -> Result<(), BootError> {
        let code = self.sensor.verify_password(password);
        if !code.is_ok() {
            log::error!("terminal: password check failed: {:?}", code);
            return Err(BootError::Password(code));
        }
        match self.sensor.template_count() {
            Ok(count) => log::info!("terminal: sensor ready, {} templates stored", count),
            Err(code) => log::warn!("terminal: cannot read template count: {:?}", code),
        }
        if let Ok(size) = self.sensor.library_size() {
            if size < self.capacity {
                log::warn!(
                    "terminal: capacity {} exceeds the module's {} template pages",
                    self.capacity,
                    size
                );
            }
        }
        Ok(())
    }

    /// Runs until `stop` is raised.
    pub fn run(&mut self, stop: &AtomicBool) {
        self.ui.show(Instruction::Main);
        while !stop.load(Ordering::Relaxed) {
            self.tick(Instant::now());
            thread::sleep(LOOP_YIELD);
        }
    }

    pub fn tick(&mut self, now: Instant) {
        let poll_due = self.last_poll.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.settings.poll_interval
        });
        if poll_due {
            self.last_poll = Some(now);
            self.poll_engines(now);
        }

        let idle = self.scan.is_idle() && !self.enroll.is_active();
        let heartbeat_due = self.last_heartbeat.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.settings.heartbeat_interval
        });
        if idle && heartbeat_due {
            self.last_heartbeat = Some(now);
            self.ui.show(Instruction::Main);
        }
    }

    fn poll_engines(&mut self, now: Instant) {
        let ui = &*self.ui;
        if self.enroll.is_active() {
            self.enroll.poll(&mut self.sensor, &self.store, ui, now);
            return;
        }

        // enrollment may only begin between scans
        if self.scan.is_idle() {
            if let Some(control) = self.store.control() {
                if control.register_target().is_some()
                    && self.enroll.start(&self.store, &control, now)
                {
                    return;
                }
            }
        }
        self.scan
            .poll(&mut self.sensor, &self.store, ui, &self.clock, now);
    }
}
