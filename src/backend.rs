//! Remote identity and attendance store.
//!
//! [`Backend`] lists the calls the network worker makes. [`RestBackend`] speaks to a
//! PostgREST-style API with `ureq`; only 200, 201 and 204 count as success.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::parse_http_date;
use crate::error::BackendError;
use crate::model::{
    CollectionRecord, CommandToken, ControlCommand, IdentityId, IdentityRecord, Mode, Slot,
};

pub trait Backend: Send {
    /// Oldest unprocessed external command, if any.
    fn fetch_command(&self) -> Result<Option<ControlCommand>, BackendError>;

    fn mark_command_processed(&self, token: &CommandToken) -> Result<(), BackendError>;

    /// Every identity currently bound to a slot.
    fn fetch_identities(&self) -> Result<Vec<IdentityRecord>, BackendError>;

    fn fetch_identity_by_slot(&self, slot: Slot) -> Result<Option<IdentityRecord>, BackendError>;

    fn identity_exists(&self, identity: IdentityId) -> Result<bool, BackendError>;

    /// Identities with an attendance event at or after `since`.
    fn fetch_collected_since(
        &self,
        since: DateTime<FixedOffset>,
    ) -> Result<Vec<IdentityId>, BackendError>;

    fn create_collection(&self, record: &CollectionRecord) -> Result<(), BackendError>;

    /// Binds `identity` to `slot` and returns the stored record.
    fn bind_identity(&self, identity: IdentityId, slot: Slot)
        -> Result<IdentityRecord, BackendError>;

    fn server_time(&self) -> Result<DateTime<Utc>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug)]
pub struct RestBackend {
    agent: ureq::Agent,
    config: RestConfig,
}

#[derive(Debug, Deserialize)]
struct StaffRow {
    staffid: IdentityId,
    #[serde(default)]
    fingerprintid: Option<i64>,
    #[serde(default)]
    tag: Option<i64>,
}

impl StaffRow {
    fn into_record(self) -> Option<IdentityRecord> {
        let slot = self.fingerprintid?;
        if slot <= 0 || slot > Slot::MAX as i64 {
            return None;
        }
        Some(IdentityRecord {
            identity_id: self.staffid,
            fingerprint_slot: slot as Slot,
            tag: self.tag.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ControlRow {
    id: Value,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    staffid: Option<IdentityId>,
}

impl ControlRow {
    fn into_command(self) -> Option<ControlCommand> {
        let token = match self.id {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let mode = match self.mode.as_deref() {
            Some("register") => Mode::Register,
            _ => Mode::Collection,
        };
        Some(ControlCommand {
            token: CommandToken(token),
            mode,
            target_identity_id: self.staffid.filter(|id| *id > 0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CollectedRow {
    staffid: IdentityId,
}

#[derive(Debug, Serialize)]
struct CollectionBody<'a> {
    fingerprintid: Slot,
    tag: i64,
    staffid: IdentityId,
    time_collected: &'a DateTime<FixedOffset>,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.request_timeout)
            .timeout_write(config.request_timeout)
            .build();
        Self { agent, config }
    }

    fn url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            table
        )
    }

    fn request(&self, method: &str, table: &str) -> ureq::Request {
        self.agent
            .request(method, &self.url(table))
            .set("apikey", &self.config.api_key)
            .set("authorization", &format!("Bearer {}", self.config.api_key))
            .set("accept", "application/json")
    }

    fn get<T: DeserializeOwned>(&self, req: ureq::Request) -> Result<T, BackendError> {
        let resp = call(req.call())?;
        let body = resp.into_string()?;
        Ok(serde_json::from_str(&body)?)
    }

    fn send(&self, req: ureq::Request, body: &impl Serialize) -> Result<ureq::Response, BackendError> {
        let payload = serde_json::to_string(body)?;
        call(
            req.set("content-type", "application/json")
                .send_string(&payload),
        )
    }
}

/// Maps a ureq outcome onto the success codes the backend uses.
fn call(result: Result<ureq::Response, ureq::Error>) -> Result<ureq::Response, BackendError> {
    match result {
        Ok(resp) => match resp.status() {
            200 | 201 | 204 => Ok(resp),
            status => Err(BackendError::Status { status }),
        },
        Err(ureq::Error::Status(status, _)) => Err(BackendError::Status { status }),
        Err(ureq::Error::Transport(err)) => Err(BackendError::Transport(err.to_string())),
    }
}

impl Backend for RestBackend {
    fn fetch_command(&self) -> Result<Option<ControlCommand>, BackendError> {
        let req = self
            .request("GET", "control")
            .query("select", "id,mode,staffid")
            .query("processed", "eq.false")
            .query("order", "id.asc")
            .query("limit", "1");
        let rows: Vec<ControlRow> = self.get(req)?;
        Ok(rows.into_iter().next().and_then(ControlRow::into_command))
    }

    fn mark_command_processed(&self, token: &CommandToken) -> Result<(), BackendError> {
        let req = self
            .request("PATCH", "control")
            .query("id", &format!("eq.{}", token))
            .set("prefer", "return=minimal");
        let body = serde_json::json!({ "processed": true, "mode": "collection" });
        self.send(req, &body).map(|_| ())
    }

    fn fetch_identities(&self) -> Result<Vec<IdentityRecord>, BackendError> {
        let req = self
            .request("GET", "staff")
            .query("select", "staffid,fingerprintid,tag")
            .query("fingerprintid", "not.is.null");
        let rows: Vec<StaffRow> = self.get(req)?;
        Ok(rows.into_iter().filter_map(StaffRow::into_record).collect())
    }

    fn fetch_identity_by_slot(&self, slot: Slot) -> Result<Option<IdentityRecord>, BackendError> {
        let req = self
            .request("GET", "staff")
            .query("select", "staffid,fingerprintid,tag")
            .query("fingerprintid", &format!("eq.{}", slot))
            .query("limit", "1");
        let rows: Vec<StaffRow> = self.get(req)?;
        Ok(rows.into_iter().next().and_then(StaffRow::into_record))
    }

    fn identity_exists(&self, identity: IdentityId) -> Result<bool, BackendError> {
        let req = self
            .request("GET", "staff")
            .query("select", "staffid")
            .query("staffid", &format!("eq.{}", identity))
            .query("limit", "1");
        let rows: Vec<Value> = self.get(req)?;
        Ok(!rows.is_empty())
    }

    fn fetch_collected_since(
        &self,
        since: DateTime<FixedOffset>,
    ) -> Result<Vec<IdentityId>, BackendError> {
        let req = self
            .request("GET", "food_collections")
            .query("select", "staffid")
            .query("time_collected", &format!("gte.{}", since.to_rfc3339()));
        let rows: Vec<CollectedRow> = self.get(req)?;
        Ok(rows.into_iter().map(|row| row.staffid).collect())
    }

    fn create_collection(&self, record: &CollectionRecord) -> Result<(), BackendError> {
        let req = self
            .request("POST", "food_collections")
            .set("prefer", "return=minimal");
        let body = CollectionBody {
            fingerprintid: record.fingerprint_slot,
            tag: record.tag,
            staffid: record.identity_id,
            time_collected: &record.timestamp,
        };
        self.send(req, &body).map(|_| ())
    }

    fn bind_identity(
        &self,
        identity: IdentityId,
        slot: Slot,
    ) -> Result<IdentityRecord, BackendError> {
        let req = self
            .request("PATCH", "staff")
            .query("staffid", &format!("eq.{}", identity))
            .query("select", "staffid,fingerprintid,tag")
            .set("prefer", "return=representation");
        let body = serde_json::json!({ "fingerprintid": slot });
        let resp = self.send(req, &body)?;
        // the PATCH went through even if the returned row cannot be decoded
        let tag = resp
            .into_string()
            .ok()
            .and_then(|text| serde_json::from_str::<Vec<StaffRow>>(&text).ok())
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.tag)
            .unwrap_or_default();
        Ok(IdentityRecord {
            identity_id: identity,
            fingerprint_slot: slot,
            tag,
        })
    }

    fn server_time(&self) -> Result<DateTime<Utc>, BackendError> {
        let resp = call(self.request("HEAD", "control").query("limit", "1").call())?;
        resp.header("date")
            .and_then(parse_http_date)
            .ok_or_else(|| BackendError::Transport("response carries no usable Date header".into()))
    }
}
