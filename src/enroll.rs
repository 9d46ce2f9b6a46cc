//! Enrollment state machine.
//!
//! The session first looks for a free library slot a few pages per poll. Two captures of the
//! same finger are then combined into a template, stored in that slot, and the binding is queued
//! for the network worker. The session holds the device until the worker acknowledges the
//! binding or the acknowledgment deadline passes.

use std::time::{Duration, Instant};

use crate::display::{Feedback, Instruction};
use crate::model::{BindUpdate, CommandToken, ControlState, IdentityId, PendingAction, Slot};
use crate::responses::SensorCode;
use crate::sensor::{find_free_slot, CharBuffer, Sensor};
use crate::store::SharedStore;

/// Library pages checked per poll while looking for a free slot.
pub const SLOTS_PER_POLL: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollStep {
    FindSlot { next: Slot },
    WaitFirst,
    WaitRemove,
    WaitSecond,
    SecondCaptured,
    WaitNetworkAck { deadline: Instant },
    Done,
    Failed(Failure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NoFreeSlot,
    SlotUnreadable(SensorCode),
    Timeout,
    Extract(SensorCode),
    Mismatch(SensorCode),
    Store(SensorCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentSession {
    pub target_identity_id: IdentityId,
    /// Set once the slot search finds an empty page.
    pub assigned_slot: Option<Slot>,
    pub control_token: Option<CommandToken>,
    pub step: EnrollStep,
    pub step_started_at: Instant,
    pub network_wait_started_at: Option<Instant>,
    template_stored: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EnrollSettings {
    pub capacity: u16,
    pub step_timeout: Duration,
    pub ack_timeout: Duration,
    pub retry_delay: Duration,
}

#[derive(Debug)]
pub struct EnrollmentEngine {
    session: Option<EnrollmentSession>,
    settings: EnrollSettings,
}

impl EnrollmentEngine {
    pub fn new(settings: EnrollSettings) -> Self {
        Self {
            session: None,
            settings,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&EnrollmentSession> {
        self.session.as_ref()
    }

    /// Opens a session for the register command in `control`, starting with the slot search.
    /// Returns `false` if there is nothing to enroll or the store was busy; the caller retries
    /// on its next pass.
    pub fn start(&mut self, store: &SharedStore, control: &ControlState, now: Instant) -> bool {
        if self.session.is_some() {
            return false;
        }
        let target = match control.register_target() {
            Some(target) => target,
            None => return false,
        };
        if store.with(|s| s.begin_enrollment()).is_none() {
            return false;
        }

        log::info!("enroll: session for identity {} opened", target);
        self.session = Some(EnrollmentSession {
            target_identity_id: target,
            assigned_slot: None,
            control_token: control.control_token.clone(),
            step: EnrollStep::FindSlot { next: 1 },
            step_started_at: now,
            network_wait_started_at: None,
            template_stored: false,
        });
        true
    }

    /// Advances the session by at most one step. `sensor` is only called a bounded number of
    /// times per poll.
    pub fn poll<S: Sensor + ?Sized>(
        &mut self,
        sensor: &mut S,
        store: &SharedStore,
        ui: &dyn Feedback,
        now: Instant,
    ) {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return,
        };

        let waiting = matches!(
            session.step,
            EnrollStep::WaitFirst | EnrollStep::WaitRemove | EnrollStep::WaitSecond
        );
        if waiting
            && now.saturating_duration_since(session.step_started_at) > self.settings.step_timeout
        {
            log::warn!("enroll: timed out in {:?}", session.step);
            fail(session, ui, Failure::Timeout, now);
            return;
        }

        match session.step {
            EnrollStep::FindSlot { next } => {
                let capacity = self.settings.capacity;
                let last = next.saturating_add(SLOTS_PER_POLL - 1).min(capacity);
                match find_free_slot(sensor, next..=last) {
                    Ok(Some(slot)) => {
                        log::info!("enroll: identity {} -> slot {}", session.target_identity_id, slot);
                        session.assigned_slot = Some(slot);
                        ui.show(Instruction::Scan);
                        advance(session, EnrollStep::WaitFirst, now);
                    }
                    Ok(None) if last < capacity => {
                        session.step = EnrollStep::FindSlot { next: last + 1 };
                    }
                    Ok(None) => {
                        log::warn!("enroll: no free slot for identity {}", session.target_identity_id);
                        fail(session, ui, Failure::NoFreeSlot, now);
                    }
                    Err(code) => {
                        log::warn!("enroll: slot search stopped at an unreadable page ({:?})", code);
                        fail(session, ui, Failure::SlotUnreadable(code), now);
                    }
                }
            }

            EnrollStep::WaitFirst => {
                if sensor.capture().is_ok() {
                    let code = sensor.extract(CharBuffer::One);
                    if code.is_ok() {
                        ui.succeed();
                        advance(session, EnrollStep::WaitRemove, now);
                    } else {
                        fail(session, ui, Failure::Extract(code), now);
                    }
                }
            }

            EnrollStep::WaitRemove => {
                if sensor.capture() == SensorCode::NoFinger {
                    ui.show(Instruction::Scan);
                    advance(session, EnrollStep::WaitSecond, now);
                }
            }

            EnrollStep::WaitSecond => {
                if sensor.capture().is_ok() {
                    let code = sensor.extract(CharBuffer::Two);
                    if code.is_ok() {
                        advance(session, EnrollStep::SecondCaptured, now);
                    } else {
                        fail(session, ui, Failure::Extract(code), now);
                    }
                }
            }

            EnrollStep::SecondCaptured => {
                let slot = match session.assigned_slot {
                    Some(slot) => slot,
                    None => {
                        fail(session, ui, Failure::NoFreeSlot, now);
                        return;
                    }
                };
                if !session.template_stored {
                    let code = sensor.create_model();
                    if !code.is_ok() {
                        log::info!("enroll: captures do not match ({:?})", code);
                        fail(session, ui, Failure::Mismatch(code), now);
                        return;
                    }
                    let code = sensor.store_model(slot);
                    if !code.is_ok() {
                        log::warn!("enroll: storing slot {} failed ({:?})", slot, code);
                        fail(session, ui, Failure::Store(code), now);
                        return;
                    }
                    session.template_stored = true;
                }

                let bind = BindUpdate {
                    identity_id: session.target_identity_id,
                    fingerprint_slot: slot,
                    control_token: session.control_token.clone(),
                };
                if store.with(|s| s.enqueue(PendingAction::Bind(bind))).is_none() {
                    return;
                }
                log::info!("enroll: slot {} stored, waiting for binding", slot);
                ui.succeed();
                session.network_wait_started_at = Some(now);
                advance(
                    session,
                    EnrollStep::WaitNetworkAck {
                        deadline: now + self.settings.ack_timeout,
                    },
                    now,
                );
            }

            EnrollStep::WaitNetworkAck { deadline } => {
                let identity = session.target_identity_id;
                let slot = match session.assigned_slot {
                    Some(slot) => slot,
                    None => {
                        fail(session, ui, Failure::NoFreeSlot, now);
                        return;
                    }
                };
                if store.with(|s| s.take_bind_ack(identity, slot)) == Some(true) {
                    log::info!("enroll: binding for slot {} confirmed", slot);
                    advance(session, EnrollStep::Done, now);
                } else if now >= deadline {
                    log::warn!("enroll: no confirmation for slot {}, binding stays queued", slot);
                    advance(session, EnrollStep::Done, now);
                }
            }

            EnrollStep::Done => {
                if store.with(|s| s.finish_enrollment()).is_some() {
                    ui.show(Instruction::Main);
                    self.session = None;
                }
            }

            EnrollStep::Failed(failure) => {
                log::info!("enroll: session for identity {} failed: {:?}", session.target_identity_id, failure);
                let token = session.control_token.clone();
                self.abandon(store, token, now);
            }
        }
    }

    /// Ends the session, deferring the command so it is not picked up again straight away.
    /// A busy store leaves the session in `Failed` for the next poll.
    fn abandon(&mut self, store: &SharedStore, token: Option<CommandToken>, now: Instant) {
        let not_before = now + self.settings.retry_delay;
        let closed = store.with(|s| {
            if let Some(token) = token {
                s.defer_command(token, not_before);
            }
            s.finish_enrollment();
        });
        if closed.is_some() {
            self.session = None;
        }
    }
}

fn advance(session: &mut EnrollmentSession, step: EnrollStep, now: Instant) {
    log::debug!("enroll: {:?} -> {:?}", session.step, step);
    session.step = step;
    session.step_started_at = now;
}

fn fail(session: &mut EnrollmentSession, ui: &dyn Feedback, failure: Failure, now: Instant) {
    ui.fail();
    advance(session, EnrollStep::Failed(failure), now);
}
