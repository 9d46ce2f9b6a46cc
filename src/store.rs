//! State shared between the time-critical engines and the network worker.
//!
//! All fields live in [`StoreState`] behind one lock. [`SharedStore::with`] acquires it with a
//! short bounded wait and returns `None` on contention; callers skip that unit of work and try
//! again on their next pass. Nothing blocking may run inside the closure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::model::{
    BindUpdate, CollectionRecord, CommandToken, ControlCommand, ControlState, IdentityId,
    IdentityRecord, PendingAction, ResolveRequest, Slot,
};

/// Result of offering an action to the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    Duplicate,
}

/// Result of attempting to record an attendance event for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collect {
    Queued,
    AlreadyCollected,
    Duplicate,
}

/// Why a control command was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    EnrollmentActive,
    Deferred,
    BindPending,
}

#[derive(Debug, Default)]
pub struct StoreState {
    identities: HashMap<Slot, IdentityRecord>,
    collected_today: HashSet<IdentityId>,
    queue: VecDeque<PendingAction>,
    dedupe: HashSet<String>,
    cooldowns: HashMap<Slot, Instant>,
    control: ControlState,
    retry_after: HashMap<CommandToken, Instant>,
    enrollment_active: bool,
    bind_ack: Option<(IdentityId, Slot)>,
}

impl StoreState {
    pub fn identity(&self, slot: Slot) -> Option<&IdentityRecord> {
        self.identities.get(&slot)
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn replace_identities(&mut self, records: Vec<IdentityRecord>) {
        self.identities = records
            .into_iter()
            .map(|record| (record.fingerprint_slot, record))
            .collect();
    }

    /// Inserts `record`, dropping any older slot bound to the same identity.
    pub fn insert_identity(&mut self, record: IdentityRecord) {
        self.identities
            .retain(|_, existing| existing.identity_id != record.identity_id);
        self.identities.insert(record.fingerprint_slot, record);
    }

    pub fn has_collected(&self, identity: IdentityId) -> bool {
        self.collected_today.contains(&identity)
    }

    pub fn collected_count(&self) -> usize {
        self.collected_today.len()
    }

    /// Replaces today's set with the backend's view. Identities whose collection is still
    /// queued stay in the set so an unsent record cannot be collected twice.
    pub fn replace_collected(&mut self, identities: impl IntoIterator<Item = IdentityId>) {
        let mut fresh: HashSet<IdentityId> = identities.into_iter().collect();
        fresh.extend(self.queue.iter().filter_map(|action| match action {
            PendingAction::Collection(record) => Some(record.identity_id),
            _ => None,
        }));
        self.collected_today = fresh;
    }

    /// Offers `action` to the tail of the queue unless an equivalent one is already waiting.
    pub fn enqueue(&mut self, action: PendingAction) -> Enqueue {
        if let PendingAction::Resolve(request) = &action {
            if self.resolve_pending(request.fingerprint_slot) {
                return Enqueue::Duplicate;
            }
        } else if let Some(key) = action.dedupe_key() {
            if !self.dedupe.insert(key) {
                return Enqueue::Duplicate;
            }
        }
        log::debug!("store: queued {} ({} pending)", action.kind(), self.queue.len() + 1);
        self.queue.push_back(action);
        Enqueue::Queued
    }

    /// Queues a collection for `record.identity_id` and optimistically marks it collected.
    pub fn collect(&mut self, record: CollectionRecord) -> Collect {
        let identity = record.identity_id;
        if self.has_collected(identity) {
            return Collect::AlreadyCollected;
        }
        match self.enqueue(PendingAction::Collection(record)) {
            Enqueue::Queued => {
                self.collected_today.insert(identity);
                Collect::Queued
            }
            Enqueue::Duplicate => Collect::Duplicate,
        }
    }

    pub fn resolve_pending(&self, slot: Slot) -> bool {
        self.queue.iter().any(|action| {
            matches!(action, PendingAction::Resolve(r) if r.fingerprint_slot == slot)
        })
    }

    /// Next action to work on, left in place until [`complete`](Self::complete) or
    /// [`retry_later`](Self::retry_later). Resolve requests go first.
    pub fn peek_action(&self) -> Option<PendingAction> {
        self.queue
            .iter()
            .find(|action| matches!(action, PendingAction::Resolve(_)))
            .or_else(|| self.queue.front())
            .cloned()
    }

    /// Removes `action` from the queue and releases its dedupe key.
    pub fn complete(&mut self, action: &PendingAction) -> bool {
        match self.queue.iter().position(|queued| queued == action) {
            Some(pos) => {
                self.queue.remove(pos);
                if let Some(key) = action.dedupe_key() {
                    self.dedupe.remove(&key);
                }
                true
            }
            None => false,
        }
    }

    /// Moves `action` to the tail of the queue. Its dedupe key stays held.
    pub fn retry_later(&mut self, action: &PendingAction) {
        if let Some(pos) = self.queue.iter().position(|queued| queued == action) {
            if let Some(item) = self.queue.remove(pos) {
                self.queue.push_back(item);
            }
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingAction> {
        self.queue.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending_bind(&self, token: &CommandToken) -> bool {
        self.queue.iter().any(|action| {
            matches!(action, PendingAction::Bind(BindUpdate { control_token: Some(t), .. }) if t == token)
        })
    }

    /// True if `slot` was processed less than `window` before `now`.
    pub fn in_cooldown(&self, slot: Slot, now: Instant, window: Duration) -> bool {
        self.cooldowns
            .get(&slot)
            .map_or(false, |last| now.saturating_duration_since(*last) < window)
    }

    pub fn touch(&mut self, slot: Slot, now: Instant) {
        self.cooldowns.insert(slot, now);
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn reset_control(&mut self) {
        self.control = ControlState::default();
    }

    pub fn command_blocked(&self, token: &CommandToken, now: Instant) -> Option<Blocked> {
        if self.enrollment_active {
            Some(Blocked::EnrollmentActive)
        } else if self.is_deferred(token, now) {
            Some(Blocked::Deferred)
        } else if self.has_pending_bind(token) {
            Some(Blocked::BindPending)
        } else {
            None
        }
    }

    /// Mirrors `cmd` into the control state unless it is blocked.
    pub fn accept_command(&mut self, cmd: &ControlCommand, now: Instant) -> Result<(), Blocked> {
        if let Some(reason) = self.command_blocked(&cmd.token, now) {
            return Err(reason);
        }
        self.control = ControlState::from_command(cmd);
        Ok(())
    }

    /// Refuses `token` until `not_before`.
    pub fn defer_command(&mut self, token: CommandToken, not_before: Instant) {
        self.retry_after.insert(token, not_before);
    }

    pub fn is_deferred(&self, token: &CommandToken, now: Instant) -> bool {
        self.retry_after
            .get(token)
            .map_or(false, |not_before| now < *not_before)
    }

    pub fn enrollment_active(&self) -> bool {
        self.enrollment_active
    }

    pub fn begin_enrollment(&mut self) {
        self.enrollment_active = true;
        self.bind_ack = None;
    }

    /// Ends the session and hands the device back to collection mode in one step.
    pub fn finish_enrollment(&mut self) {
        self.enrollment_active = false;
        self.bind_ack = None;
        self.reset_control();
    }

    /// Set by the network worker once a binding is persisted.
    pub fn acknowledge_bind(&mut self, identity: IdentityId, slot: Slot) {
        self.bind_ack = Some((identity, slot));
    }

    pub fn take_bind_ack(&mut self, identity: IdentityId, slot: Slot) -> bool {
        if self.bind_ack == Some((identity, slot)) {
            self.bind_ack = None;
            true
        } else {
            false
        }
    }
}

/// Lock-guarded [`StoreState`] shared by both execution contexts.
#[derive(Debug)]
pub struct SharedStore {
    state: Mutex<StoreState>,
    lock_timeout: Duration,
}

impl SharedStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            lock_timeout,
        }
    }

    /// Runs `f` under the lock, or returns `None` if it could not be taken in time.
    pub fn with<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> Option<R> {
        match self.state.try_lock_for(self.lock_timeout) {
            Some(mut state) => Some(f(&mut state)),
            None => {
                log::debug!("store: lock busy after {:?}, skipping", self.lock_timeout);
                None
            }
        }
    }

    pub fn control(&self) -> Option<ControlState> {
        self.with(|s| s.control().clone())
    }

    pub fn pending(&self) -> Option<Vec<PendingAction>> {
        self.with(|s| s.pending().cloned().collect())
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}
