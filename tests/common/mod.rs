#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use parking_lot::Mutex;

use r502_attendance::worker::Connectivity;
use r502_attendance::{
    Backend, BackendError, CharBuffer, Clock, CollectionRecord, CommandToken, Config,
    ControlCommand, Feedback, IdentityId, IdentityRecord, Instruction, Match, Mode, NetworkWorker,
    Sensor, SensorCode, SharedStore, Signal, Slot, Terminal,
};

/// Fingerprint module driven by a capture script.
#[derive(Debug, Default)]
pub struct FakeSensor {
    pub captures: VecDeque<SensorCode>,
    pub search: Option<Match>,
    pub occupied: HashSet<u16>,
    pub stored: Vec<u16>,
    pub loads: usize,
}

impl FakeSensor {
    pub fn touches(&mut self, codes: &[SensorCode]) {
        self.captures.extend(codes.iter().copied());
    }
}

impl Sensor for FakeSensor {
    fn verify_password(&mut self, password: u32) -> SensorCode {
        if password == 0 {
            SensorCode::Ok
        } else {
            SensorCode::WrongPassword
        }
    }

    fn capture(&mut self) -> SensorCode {
        self.captures.pop_front().unwrap_or(SensorCode::NoFinger)
    }

    fn extract(&mut self, _: CharBuffer) -> SensorCode {
        SensorCode::Ok
    }

    fn fast_search(&mut self, _: u16) -> Result<Match, SensorCode> {
        self.search.ok_or(SensorCode::NotFound)
    }

    fn create_model(&mut self) -> SensorCode {
        SensorCode::Ok
    }

    fn store_model(&mut self, slot: u16) -> SensorCode {
        self.occupied.insert(slot);
        self.stored.push(slot);
        SensorCode::Ok
    }

    fn load_model(&mut self, slot: u16) -> SensorCode {
        self.loads += 1;
        if self.occupied.contains(&slot) {
            SensorCode::Ok
        } else {
            SensorCode::InvalidTemplate
        }
    }

    fn template_count(&mut self) -> Result<u16, SensorCode> {
        Ok(self.occupied.len() as u16)
    }

    fn library_size(&mut self) -> Result<u16, SensorCode> {
        Ok(200)
    }
}

#[derive(Debug, Default)]
pub struct BackendState {
    pub command: Option<ControlCommand>,
    pub identities: Vec<IdentityRecord>,
    pub known: HashSet<IdentityId>,
    pub collected: Vec<IdentityId>,
    pub posted: Vec<CollectionRecord>,
    pub processed: Vec<CommandToken>,
    pub bound: Vec<(IdentityId, Slot)>,
    pub failing_posts: usize,
    pub failing_binds: usize,
    pub failing_acks: usize,
    pub offline: bool,
}

/// In-memory backend recording every write.
#[derive(Debug, Default)]
pub struct FakeBackend(pub Mutex<BackendState>);

impl FakeBackend {
    fn transport(&self) -> Result<(), BackendError> {
        if self.0.lock().offline {
            Err(BackendError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl Backend for FakeBackend {
    fn fetch_command(&self) -> Result<Option<ControlCommand>, BackendError> {
        self.transport()?;
        Ok(self.0.lock().command.clone())
    }

    fn mark_command_processed(&self, token: &CommandToken) -> Result<(), BackendError> {
        self.transport()?;
        let mut state = self.0.lock();
        if state.failing_acks > 0 {
            state.failing_acks -= 1;
            return Err(BackendError::Status { status: 502 });
        }
        if state.command.as_ref().map(|c| &c.token) == Some(token) {
            state.command = None;
        }
        state.processed.push(token.clone());
        Ok(())
    }

    fn fetch_identities(&self) -> Result<Vec<IdentityRecord>, BackendError> {
        self.transport()?;
        Ok(self.0.lock().identities.clone())
    }

    fn fetch_identity_by_slot(&self, slot: Slot) -> Result<Option<IdentityRecord>, BackendError> {
        self.transport()?;
        Ok(self
            .0
            .lock()
            .identities
            .iter()
            .find(|r| r.fingerprint_slot == slot)
            .cloned())
    }

    fn identity_exists(&self, identity: IdentityId) -> Result<bool, BackendError> {
        self.transport()?;
        Ok(self.0.lock().known.contains(&identity))
    }

    fn fetch_collected_since(
        &self,
        _: DateTime<FixedOffset>,
    ) -> Result<Vec<IdentityId>, BackendError> {
        self.transport()?;
        Ok(self.0.lock().collected.clone())
    }

    fn create_collection(&self, record: &CollectionRecord) -> Result<(), BackendError> {
        self.transport()?;
        let mut state = self.0.lock();
        if state.failing_posts > 0 {
            state.failing_posts -= 1;
            return Err(BackendError::Status { status: 500 });
        }
        state.posted.push(record.clone());
        state.collected.push(record.identity_id);
        Ok(())
    }

    fn bind_identity(
        &self,
        identity: IdentityId,
        slot: Slot,
    ) -> Result<IdentityRecord, BackendError> {
        self.transport()?;
        let mut state = self.0.lock();
        if state.failing_binds > 0 {
            state.failing_binds -= 1;
            return Err(BackendError::Status { status: 503 });
        }
        state.bound.push((identity, slot));
        let record = IdentityRecord {
            identity_id: identity,
            fingerprint_slot: slot,
            tag: 1,
        };
        state.identities.retain(|r| r.identity_id != identity);
        state.identities.push(record.clone());
        Ok(record)
    }

    fn server_time(&self) -> Result<DateTime<Utc>, BackendError> {
        self.transport()?;
        Ok(server_time())
    }
}

#[derive(Debug, Default)]
pub struct FakeLink {
    pub connected: bool,
    pub refuse: bool,
    pub attempts: usize,
}

impl Connectivity for FakeLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, _: Duration) -> bool {
        self.attempts += 1;
        self.connected = !self.refuse;
        self.connected
    }

    fn lost(&mut self) {
        self.connected = false;
    }
}

#[derive(Debug, Default)]
pub struct RecordingFeedback {
    pub shown: Mutex<Vec<Instruction>>,
    pub signals: Mutex<Vec<Signal>>,
}

impl RecordingFeedback {
    pub fn shown(&self) -> Vec<Instruction> {
        self.shown.lock().clone()
    }

    pub fn clear(&self) {
        self.shown.lock().clear();
        self.signals.lock().clear();
    }
}

impl Feedback for RecordingFeedback {
    fn show(&self, instruction: Instruction) {
        self.shown.lock().push(instruction);
    }

    fn signal(&self, signal: Signal) {
        self.signals.lock().push(signal);
    }
}

pub fn server_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 29, 8, 0, 0).unwrap()
}

pub fn identity(id: IdentityId, slot: Slot) -> IdentityRecord {
    IdentityRecord {
        identity_id: id,
        fingerprint_slot: slot,
        tag: 1,
    }
}

pub fn register(token: &str, target: IdentityId) -> ControlCommand {
    ControlCommand {
        token: CommandToken(token.into()),
        mode: Mode::Register,
        target_identity_id: Some(target),
    }
}

/// Everything both contexts share, wired the way the host binary wires it.
pub struct Rig {
    pub config: Config,
    pub store: Arc<SharedStore>,
    pub clock: Arc<Clock>,
    pub ui: Arc<RecordingFeedback>,
    pub t0: Instant,
}

impl Rig {
    pub fn new() -> Self {
        let t0 = Instant::now();
        let config = Config::default();
        let offset = config.utc_offset().unwrap();
        Self {
            store: Arc::new(SharedStore::new(config.lock_timeout())),
            clock: Arc::new(Clock::anchored(offset, server_time(), t0)),
            ui: Arc::new(RecordingFeedback::default()),
            config,
            t0,
        }
    }

    pub fn at(&self, millis: u64) -> Instant {
        self.t0 + Duration::from_millis(millis)
    }

    pub fn terminal(&self, sensor: FakeSensor) -> Terminal<FakeSensor> {
        let ui: Arc<dyn Feedback> = self.ui.clone();
        Terminal::new(
            sensor,
            Arc::clone(&self.store),
            ui,
            Arc::clone(&self.clock),
            self.config.scan(),
            self.config.enroll(),
            self.config.terminal(),
        )
    }

    pub fn worker(&self, backend: FakeBackend, link: FakeLink) -> NetworkWorker<FakeBackend, FakeLink> {
        let ui: Arc<dyn Feedback> = self.ui.clone();
        NetworkWorker::new(
            backend,
            link,
            Arc::clone(&self.store),
            ui,
            Arc::clone(&self.clock),
            self.config.worker(),
        )
    }
}
