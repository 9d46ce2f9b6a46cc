use std::fmt;
use std::time::Instant;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Backend identifier of a person.
pub type IdentityId = i64;

/// Sensor library page holding one template.
pub type Slot = u16;

/// Attendance category of an identity.
pub type Tag = i64;

/// Binding of a template slot to a person and their attendance category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_id: IdentityId,
    pub fingerprint_slot: Slot,
    pub tag: Tag,
}

/// Identifier of an external command, kept in the backend's own representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandToken(pub String);

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Collection,
    Register,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Collection
    }
}

/// Oldest unprocessed command as published by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub token: CommandToken,
    pub mode: Mode,
    pub target_identity_id: Option<IdentityId>,
}

/// Local mirror of the accepted command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    pub mode: Mode,
    pub target_identity_id: Option<IdentityId>,
    pub control_token: Option<CommandToken>,
}

impl ControlState {
    pub fn from_command(cmd: &ControlCommand) -> Self {
        Self {
            mode: cmd.mode,
            target_identity_id: cmd.target_identity_id,
            control_token: Some(cmd.token.clone()),
        }
    }

    /// Register target, if this state asks for an enrollment.
    pub fn register_target(&self) -> Option<IdentityId> {
        match self.mode {
            Mode::Register => self.target_identity_id,
            Mode::Collection => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionRecord {
    pub fingerprint_slot: Slot,
    pub tag: Tag,
    pub identity_id: IdentityId,
    pub timestamp: DateTime<FixedOffset>,
}

impl CollectionRecord {
    pub fn new(identity: &IdentityRecord, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            fingerprint_slot: identity.fingerprint_slot,
            tag: identity.tag,
            identity_id: identity.identity_id,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveRequest {
    pub fingerprint_slot: Slot,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindUpdate {
    pub identity_id: IdentityId,
    pub fingerprint_slot: Slot,
    pub control_token: Option<CommandToken>,
}

/// Unit of work handed from the engines to the network worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    Collection(CollectionRecord),
    Resolve(ResolveRequest),
    Bind(BindUpdate),
}

impl PendingAction {
    /// Key of the dedupe set: the serialized action. Resolve requests are deduplicated per
    /// slot instead and have no key.
    pub fn dedupe_key(&self) -> Option<String> {
        match self {
            Self::Collection(record) => serde_json::to_string(record)
                .ok()
                .map(|json| format!("collection:{}", json)),
            Self::Bind(bind) => serde_json::to_string(bind)
                .ok()
                .map(|json| format!("bind:{}", json)),
            Self::Resolve(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Collection(_) => "collection",
            Self::Resolve(_) => "resolve",
            Self::Bind(_) => "bind",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> CollectionRecord {
        let ts = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 8, 29, 14, 5, 33)
            .unwrap();
        CollectionRecord {
            fingerprint_slot: 5,
            tag: 2,
            identity_id: 42,
            timestamp: ts,
        }
    }

    #[test]
    fn identical_actions_share_a_key() {
        let a = PendingAction::Collection(record());
        let b = PendingAction::Collection(record());
        assert_eq!(a.dedupe_key(), b.dedupe_key());
        assert!(a.dedupe_key().unwrap().contains("2025-08-29T14:05:33+01:00"));
    }

    #[test]
    fn bind_and_collection_keys_never_collide() {
        let bind = PendingAction::Bind(BindUpdate {
            identity_id: 42,
            fingerprint_slot: 5,
            control_token: None,
        });
        assert_ne!(
            bind.dedupe_key(),
            PendingAction::Collection(record()).dedupe_key()
        );
    }

    #[test]
    fn only_register_state_has_a_target() {
        let mut state = ControlState {
            mode: Mode::Register,
            target_identity_id: Some(7),
            control_token: None,
        };
        assert_eq!(state.register_target(), Some(7));
        state.mode = Mode::Collection;
        assert_eq!(state.register_target(), None);
    }
}
