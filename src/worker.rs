//! Background network worker.
//!
//! Each call to [`NetworkWorker::step`] is one pass: keep the link up, run whichever periodic
//! refreshes are due, then work on at most one pending action. The store lock is only taken
//! between remote calls, never across them.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::clock::Clock;
use crate::display::Feedback;
use crate::error::BackendError;
use crate::model::{CollectionRecord, ControlCommand, Mode, PendingAction};
use crate::store::{Collect, SharedStore};

/// Network reachability as seen by the worker.
pub trait Connectivity: Send {
    fn is_connected(&self) -> bool;

    /// Tries to (re)establish the link, waiting at most `wait`.
    fn connect(&mut self, wait: Duration) -> bool;

    /// Called after a transport failure.
    fn lost(&mut self);
}

/// Treats the backend as reachable once a TCP connection to it succeeds.
#[derive(Debug)]
pub struct TcpProbe {
    host: String,
    port: u16,
    connected: bool,
}

impl TcpProbe {
    /// Probes the host and port of `base_url`.
    pub fn for_url(base_url: &str) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(base_url)?;
        let host = parsed
            .host_str()
            .ok_or(url::ParseError::EmptyHost)?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);
        Ok(Self {
            host,
            port,
            connected: false,
        })
    }
}

impl Connectivity for TcpProbe {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, wait: Duration) -> bool {
        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs.collect::<Vec<_>>(),
            Err(err) => {
                log::warn!("net: cannot resolve {}: {}", self.host, err);
                return false;
            }
        };
        self.connected = addrs
            .iter()
            .any(|addr| TcpStream::connect_timeout(addr, wait).is_ok());
        self.connected
    }

    fn lost(&mut self) {
        self.connected = false;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub control_poll_interval: Duration,
    pub identity_refresh_interval: Duration,
    pub collection_refresh_interval: Duration,
    pub clock_resync_interval: Duration,
    pub reconnect_interval: Duration,
    pub connect_wait: Duration,
    pub busy_sleep: Duration,
    pub idle_sleep: Duration,
    pub offline_sleep: Duration,
}

/// What one pass amounted to; decides how long the worker sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Offline,
    Idle,
    Worked,
}

pub struct NetworkWorker<B, C> {
    backend: B,
    link: C,
    store: Arc<SharedStore>,
    ui: Arc<dyn Feedback>,
    clock: Arc<Clock>,
    settings: WorkerSettings,
    last_connect_attempt: Option<Instant>,
    last_control_poll: Option<Instant>,
    last_identity_refresh: Option<Instant>,
    last_collection_refresh: Option<Instant>,
    last_clock_sync: Option<Instant>,
}

impl<B, C> fmt::Debug for NetworkWorker<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkWorker")
            .field("settings", &self.settings)
            .field("last_control_poll", &self.last_control_poll)
            .finish_non_exhaustive()
    }
}

fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.map_or(true, |at| now.saturating_duration_since(at) >= interval)
}

impl<B, C> NetworkWorker<B, C>
where
    B: Backend,
    C: Connectivity,
{
    pub fn new(
        backend: B,
        link: C,
        store: Arc<SharedStore>,
        ui: Arc<dyn Feedback>,
        clock: Arc<Clock>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            backend,
            link,
            store,
            ui,
            clock,
            settings,
            last_connect_attempt: None,
            last_control_poll: None,
            last_identity_refresh: None,
            last_collection_refresh: None,
            last_clock_sync: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn link(&self) -> &C {
        &self.link
    }

    /// Runs passes until `stop` is raised.
    pub fn run(mut self, stop: Arc<AtomicBool>) {
        log::info!("net: worker started");
        while !stop.load(Ordering::Relaxed) {
            let pass = self.step(Instant::now());
            thread::sleep(self.sleep_after(pass));
        }
        log::info!("net: worker stopped");
    }

    pub fn sleep_after(&self, pass: Pass) -> Duration {
        match pass {
            Pass::Offline => self.settings.offline_sleep,
            Pass::Idle => self.settings.idle_sleep,
            Pass::Worked => self.settings.busy_sleep,
        }
    }

    pub fn step(&mut self, now: Instant) -> Pass {
        if !self.link.is_connected() {
            if !due(self.last_connect_attempt, self.settings.reconnect_interval, now) {
                return Pass::Offline;
            }
            self.last_connect_attempt = Some(now);
            log::info!("net: connecting");
            if !self.link.connect(self.settings.connect_wait) {
                log::warn!("net: connection failed");
                return Pass::Offline;
            }
            log::info!("net: connected, forcing refresh");
            self.last_control_poll = None;
            self.last_identity_refresh = None;
            self.last_collection_refresh = None;
            self.last_clock_sync = None;
        }

        if due(self.last_clock_sync, self.settings.clock_resync_interval, now) {
            self.last_clock_sync = Some(now);
            self.sync_clock(now);
        }
        if due(self.last_control_poll, self.settings.control_poll_interval, now) {
            self.last_control_poll = Some(now);
            self.poll_control(now);
        }
        if due(self.last_identity_refresh, self.settings.identity_refresh_interval, now) {
            self.last_identity_refresh = Some(now);
            self.refresh_identities();
        }
        if due(self.last_collection_refresh, self.settings.collection_refresh_interval, now) {
            self.last_collection_refresh = Some(now);
            self.refresh_collections(now);
        }

        if self.drain_one(now) {
            Pass::Worked
        } else {
            Pass::Idle
        }
    }

    fn failed(&mut self, what: &str, err: &BackendError) {
        log::warn!("net: {} failed: {}", what, err);
        if let BackendError::Transport(_) = err {
            self.link.lost();
        }
    }

    fn sync_clock(&mut self, now: Instant) {
        match self.backend.server_time() {
            Ok(utc) => self.clock.sync(utc, now),
            Err(err) => self.failed("clock sync", &err),
        }
    }

    fn poll_control(&mut self, now: Instant) {
        let cmd = match self.backend.fetch_command() {
            Ok(cmd) => cmd,
            Err(err) => return self.failed("control poll", &err),
        };

        let cmd = match cmd {
            Some(cmd) => cmd,
            None => {
                self.store.with(|s| {
                    if !s.enrollment_active() {
                        s.reset_control();
                    }
                });
                return;
            }
        };

        let blocked = match self.store.with(|s| s.command_blocked(&cmd.token, now)) {
            Some(blocked) => blocked,
            None => return,
        };
        if let Some(reason) = blocked {
            log::debug!("net: command {} not taken: {:?}", cmd.token, reason);
            return;
        }

        if cmd.mode == Mode::Register && !self.register_target_known(&cmd) {
            return;
        }

        match self.store.with(|s| s.accept_command(&cmd, now)) {
            Some(Ok(())) => {
                log::info!(
                    "net: command {} accepted: {:?} {:?}",
                    cmd.token,
                    cmd.mode,
                    cmd.target_identity_id
                );
                if cmd.mode == Mode::Collection {
                    // nothing to wait for; acknowledge so it does not shadow later commands
                    if let Err(err) = self.backend.mark_command_processed(&cmd.token) {
                        self.failed("command ack", &err);
                    }
                }
            }
            Some(Err(reason)) => log::debug!("net: command {} not taken: {:?}", cmd.token, reason),
            None => {}
        }
    }

    /// Checks the register target exists; unknown targets have their command closed.
    fn register_target_known(&mut self, cmd: &ControlCommand) -> bool {
        let target = match cmd.target_identity_id {
            Some(target) => target,
            None => {
                log::warn!("net: register command {} has no target", cmd.token);
                self.close_command(cmd);
                return false;
            }
        };
        match self.backend.identity_exists(target) {
            Ok(true) => true,
            Ok(false) => {
                log::warn!("net: identity {} does not exist, dropping command {}", target, cmd.token);
                self.close_command(cmd);
                false
            }
            Err(err) => {
                self.failed("identity check", &err);
                false
            }
        }
    }

    fn close_command(&mut self, cmd: &ControlCommand) {
        if let Err(err) = self.backend.mark_command_processed(&cmd.token) {
            self.failed("command ack", &err);
        }
    }

    fn refresh_identities(&mut self) {
        match self.backend.fetch_identities() {
            Ok(records) => {
                let count = records.len();
                if self.store.with(|s| s.replace_identities(records)).is_some() {
                    log::info!("net: identity map refreshed ({} entries)", count);
                }
            }
            Err(err) => self.failed("identity refresh", &err),
        }
    }

    fn refresh_collections(&mut self, now: Instant) {
        let since = self.clock.day_start(now);
        match self.backend.fetch_collected_since(since) {
            Ok(ids) => {
                if let Some(count) = self.store.with(|s| {
                    s.replace_collected(ids);
                    s.collected_count()
                }) {
                    log::info!("net: collection cache refreshed ({} today)", count);
                }
            }
            Err(err) => self.failed("collection refresh", &err),
        }
    }

    /// Works on the head of the queue. Returns `true` if there was something to do.
    fn drain_one(&mut self, now: Instant) -> bool {
        let action = match self.store.with(|s| s.peek_action()) {
            Some(Some(action)) => action,
            _ => return false,
        };

        match &action {
            PendingAction::Resolve(request) => {
                let slot = request.fingerprint_slot;
                log::debug!(
                    "net: resolving slot {} (waited {:?})",
                    slot,
                    now.saturating_duration_since(request.enqueued_at)
                );
                let timestamp = self.clock.at(request.enqueued_at);
                match self.backend.fetch_identity_by_slot(slot) {
                    Ok(Some(identity)) => {
                        let outcome = self.store.with(|s| {
                            s.complete(&action);
                            s.insert_identity(identity.clone());
                            s.collect(CollectionRecord::new(&identity, timestamp))
                        });
                        match outcome {
                            Some(Collect::Queued) => {
                                log::info!("net: slot {} resolved to identity {}", slot, identity.identity_id);
                                self.ui.succeed();
                            }
                            Some(_) => {
                                log::info!("net: identity {} already collected today", identity.identity_id);
                                self.ui.fail();
                            }
                            None => {}
                        }
                    }
                    Ok(None) => {
                        log::info!("net: slot {} is not bound to anyone", slot);
                        if self.store.with(|s| s.complete(&action)).is_some() {
                            self.ui.fail();
                        }
                    }
                    Err(err) => {
                        self.failed("resolve", &err);
                        if self.store.with(|s| s.complete(&action)).is_some() {
                            self.ui.fail();
                        }
                    }
                }
            }

            PendingAction::Collection(record) => match self.backend.create_collection(record) {
                Ok(()) => {
                    log::info!("net: collection for identity {} stored", record.identity_id);
                    self.store.with(|s| s.complete(&action));
                }
                Err(err) => {
                    self.failed("collection post", &err);
                    self.store.with(|s| s.retry_later(&action));
                }
            },

            PendingAction::Bind(bind) => {
                let record = match self.backend.bind_identity(bind.identity_id, bind.fingerprint_slot) {
                    Ok(record) => record,
                    Err(err) => {
                        self.failed("bind", &err);
                        self.store.with(|s| s.retry_later(&action));
                        return true;
                    }
                };
                log::info!("net: identity {} bound to slot {}", bind.identity_id, bind.fingerprint_slot);

                let acked = match &bind.control_token {
                    Some(token) => match self.backend.mark_command_processed(token) {
                        Ok(()) => true,
                        Err(err) => {
                            self.failed("command ack", &err);
                            false
                        }
                    },
                    None => true,
                };

                self.store.with(|s| {
                    s.insert_identity(record);
                    s.acknowledge_bind(bind.identity_id, bind.fingerprint_slot);
                    if acked {
                        s.complete(&action);
                    } else {
                        // binding is durable; keep the item so the command ack is retried
                        s.retry_later(&action);
                    }
                });
            }
        }
        true
    }
}
