//! Attendance scanning state machine.
//!
//! `Idle -> Scanning -> Processing -> Complete -> Idle`, one sensor call per poll.

use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::display::{Feedback, Instruction};
use crate::model::{CollectionRecord, PendingAction, ResolveRequest};
use crate::sensor::{CharBuffer, Match, Sensor};
use crate::store::{Collect, Enqueue, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    /// Carries the search hit while the bookkeeping waits for the store lock.
    Processing(Option<Match>),
    Complete { since: Instant },
}

#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    pub capacity: u16,
    pub complete_dwell: Duration,
    pub post_scan_cooldown: Duration,
    pub slot_cooldown: Duration,
}

/// What a matched touch led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Cooldown,
    Collected,
    AlreadyCollected,
    Duplicate,
    Resolving,
}

#[derive(Debug)]
pub struct ScanEngine {
    state: ScanState,
    last_complete: Option<Instant>,
    settings: ScanSettings,
}

impl ScanEngine {
    pub fn new(settings: ScanSettings) -> Self {
        Self {
            state: ScanState::Idle,
            last_complete: None,
            settings,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == ScanState::Idle
    }

    pub fn poll<S: Sensor + ?Sized>(
        &mut self,
        sensor: &mut S,
        store: &SharedStore,
        ui: &dyn Feedback,
        clock: &Clock,
        now: Instant,
    ) {
        match self.state {
            ScanState::Idle => {
                let cooling = self.last_complete.map_or(false, |at| {
                    now.saturating_duration_since(at) < self.settings.post_scan_cooldown
                });
                if cooling {
                    return;
                }
                let code = sensor.capture();
                if code.is_ok() {
                    log::debug!("scan: finger detected");
                    ui.show(Instruction::Scan);
                    self.state = ScanState::Scanning;
                }
            }

            ScanState::Scanning => {
                let code = sensor.extract(CharBuffer::One);
                if code.is_ok() {
                    self.state = ScanState::Processing(None);
                } else {
                    log::info!("scan: feature extraction failed: {:?}", code);
                    ui.fail();
                    self.complete(now);
                }
            }

            ScanState::Processing(pending) => {
                let hit = match pending {
                    Some(hit) => hit,
                    None => match sensor.fast_search(self.settings.capacity) {
                        Ok(hit) => hit,
                        Err(code) => {
                            log::info!("scan: no match ({:?})", code);
                            ui.fail();
                            self.complete(now);
                            return;
                        }
                    },
                };
                log::info!("scan: slot {} matched (confidence {})", hit.slot, hit.confidence);

                let timestamp = clock.at(now);
                let slot_cooldown = self.settings.slot_cooldown;
                let outcome = store.with(|s| {
                    let suppressed = s.in_cooldown(hit.slot, now, slot_cooldown);
                    s.touch(hit.slot, now);
                    if suppressed {
                        return Outcome::Cooldown;
                    }
                    match s.identity(hit.slot).cloned() {
                        Some(identity) => match s.collect(CollectionRecord::new(&identity, timestamp)) {
                            Collect::Queued => Outcome::Collected,
                            Collect::AlreadyCollected => Outcome::AlreadyCollected,
                            Collect::Duplicate => Outcome::Duplicate,
                        },
                        None => {
                            let request = ResolveRequest {
                                fingerprint_slot: hit.slot,
                                enqueued_at: now,
                            };
                            if s.enqueue(PendingAction::Resolve(request)) == Enqueue::Duplicate {
                                log::debug!("scan: slot {} already awaiting resolve", hit.slot);
                            }
                            Outcome::Resolving
                        }
                    }
                });

                let outcome = match outcome {
                    Some(outcome) => outcome,
                    None => {
                        self.state = ScanState::Processing(Some(hit));
                        return;
                    }
                };

                match outcome {
                    Outcome::Cooldown => ui.show(Instruction::Main),
                    Outcome::Collected => {
                        log::info!("scan: slot {} collected", hit.slot);
                        ui.succeed();
                    }
                    Outcome::AlreadyCollected => {
                        log::info!("scan: slot {} already collected today", hit.slot);
                        ui.fail();
                    }
                    Outcome::Duplicate => {
                        log::info!("scan: slot {} collection already pending", hit.slot);
                        ui.fail();
                    }
                    Outcome::Resolving => ui.show(Instruction::Processing),
                }
                self.complete(now);
            }

            ScanState::Complete { since } => {
                if now.saturating_duration_since(since) >= self.settings.complete_dwell {
                    ui.show(Instruction::Main);
                    self.last_complete = Some(now);
                    self.state = ScanState::Idle;
                }
            }
        }
    }

    fn complete(&mut self, now: Instant) {
        self.state = ScanState::Complete { since: now };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IdentityRecord;
    use crate::responses::SensorCode;
    use chrono::{FixedOffset, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        captures: VecDeque<SensorCode>,
        search: Option<Match>,
    }

    impl Sensor for Scripted {
        fn verify_password(&mut self, _: u32) -> SensorCode {
            SensorCode::Ok
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
        fn store_model(&mut self, _: u16) -> SensorCode {
            SensorCode::Ok
        }
        fn load_model(&mut self, _: u16) -> SensorCode {
            SensorCode::Ok
        }
        fn template_count(&mut self) -> Result<u16, SensorCode> {
            Ok(0)
        }
        fn library_size(&mut self) -> Result<u16, SensorCode> {
            Ok(200)
        }
    }

    #[derive(Default)]
    struct Shown(Mutex<Vec<Instruction>>);

    impl Feedback for Shown {
        fn show(&self, instruction: Instruction) {
            self.0.lock().push(instruction);
        }
    }

    fn settings() -> ScanSettings {
        ScanSettings {
            capacity: 127,
            complete_dwell: Duration::from_millis(800),
            post_scan_cooldown: Duration::from_millis(1500),
            slot_cooldown: Duration::from_secs(3),
        }
    }

    fn clock() -> Clock {
        Clock::anchored(
            FixedOffset::east_opt(3600).unwrap(),
            Utc.with_ymd_and_hms(2025, 8, 29, 8, 0, 0).unwrap(),
            Instant::now(),
        )
    }

    #[test]
    fn full_cycle_collects_and_returns_to_idle() {
        let store = SharedStore::default();
        store.with(|s| {
            s.replace_identities(vec![IdentityRecord {
                identity_id: 42,
                fingerprint_slot: 5,
                tag: 1,
            }])
        });
        let mut sensor = Scripted {
            captures: vec![SensorCode::Ok].into(),
            search: Some(Match {
                slot: 5,
                confidence: 120,
            }),
        };
        let ui = Shown::default();
        let clock = clock();
        let mut engine = ScanEngine::new(settings());
        let t0 = Instant::now();

        engine.poll(&mut sensor, &store, &ui, &clock, t0);
        assert_eq!(engine.state(), ScanState::Scanning);
        engine.poll(&mut sensor, &store, &ui, &clock, t0);
        engine.poll(&mut sensor, &store, &ui, &clock, t0);
        assert!(matches!(engine.state(), ScanState::Complete { .. }));

        engine.poll(&mut sensor, &store, &ui, &clock, t0 + Duration::from_millis(100));
        assert!(matches!(engine.state(), ScanState::Complete { .. }));
        engine.poll(&mut sensor, &store, &ui, &clock, t0 + Duration::from_millis(900));
        assert!(engine.is_idle());

        assert_eq!(
            *ui.0.lock(),
            vec![Instruction::Scan, Instruction::Successful, Instruction::Main]
        );
        assert_eq!(store.with(|s| s.has_collected(42)), Some(true));
    }

    #[test]
    fn post_scan_cooldown_skips_the_sensor() {
        let store = SharedStore::default();
        let mut sensor = Scripted {
            captures: vec![SensorCode::Ok, SensorCode::Ok].into(),
            search: None,
        };
        let ui = Shown::default();
        let clock = clock();
        let mut engine = ScanEngine::new(settings());
        let t0 = Instant::now();

        for _ in 0..3 {
            engine.poll(&mut sensor, &store, &ui, &clock, t0);
        }
        engine.poll(&mut sensor, &store, &ui, &clock, t0 + Duration::from_secs(1));
        assert!(engine.is_idle());

        // inside the cooldown the queued capture is never consumed
        engine.poll(&mut sensor, &store, &ui, &clock, t0 + Duration::from_secs(2));
        assert_eq!(sensor.captures.len(), 1);
        engine.poll(&mut sensor, &store, &ui, &clock, t0 + Duration::from_secs(3));
        assert_eq!(engine.state(), ScanState::Scanning);
    }

    #[test]
    fn no_match_is_unsuccessful() {
        let store = SharedStore::default();
        let mut sensor = Scripted {
            captures: vec![SensorCode::Ok].into(),
            search: None,
        };
        let ui = Shown::default();
        let clock = clock();
        let mut engine = ScanEngine::new(settings());
        let t0 = Instant::now();
        for _ in 0..3 {
            engine.poll(&mut sensor, &store, &ui, &clock, t0);
        }
        assert_eq!(*ui.0.lock(), vec![Instruction::Scan, Instruction::Unsuccessful]);
        assert_eq!(store.with(|s| s.pending_len()), Some(0));
    }
}
