use std::fmt::Display;

use anyhow::{Context, Result};
use jiff::Timestamp;
use minicbor::{Decode, Encode};
use serde::Serialize;
use serde_json::Value;

use crate::activity_stream::entity::EntityRef;

/// Monotonic action id, also used as the incremental feed cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl ActionId {
    pub(crate) fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<&[u8]> for ActionId {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(ActionId(u64::from_be_bytes(value.try_into()?)))
    }
}

impl<C> Encode<C> for ActionId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for ActionId {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        Ok(ActionId(d.u64()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[n(0)]
    Active,
    #[n(1)]
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Encode, Decode)]
pub struct Action {
    #[n(0)]
    pub id: ActionId,
    #[n(1)]
    pub actor: EntityRef,
    #[n(2)]
    pub verb: String,
    #[n(3)]
    pub action_object: Option<EntityRef>,
    #[n(4)]
    pub target: Option<EntityRef>,
    #[cbor(n(5), with = "crate::activity_stream::model::timestamp_cbor")]
    pub timestamp: Timestamp,
    #[n(6)]
    pub public: bool,
    #[n(7)]
    pub state: ActionState,
    #[n(8)]
    pub is_batchable: bool,
    /// Zero means "use the configured default window".
    #[n(9)]
    pub batch_time_minutes: u32,
    /// Free-form JSON payload, kept as text.
    #[serde(skip)]
    #[n(10)]
    pub data: Option<String>,
}

impl Action {
    pub fn is_active(&self) -> bool {
        self.state == ActionState::Active
    }
    pub fn data(&self) -> Result<Option<Value>> {
        self.data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("action payload is not valid JSON")
    }
    /// The four fields that make two actions the same semantic event.
    pub(crate) fn same_event(&self, other: &NewAction) -> bool {
        self.actor == other.actor
            && self.verb == other.verb
            && self.target == other.target
            && self.action_object == other.action_object
    }
    pub(crate) fn into_bytes(self) -> Result<Vec<u8>> {
        minicbor::to_vec(&self).context("unable to encode action")
    }
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Action> {
        minicbor::decode(bytes).context("unable to decode action")
    }
}

/// An action about to be recorded.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub actor: EntityRef,
    pub verb: String,
    pub target: Option<EntityRef>,
    pub action_object: Option<EntityRef>,
    pub timestamp: Option<Timestamp>,
    pub public: bool,
    pub is_batchable: bool,
    pub batch_time_minutes: u32,
    pub data: Option<Value>,
}

impl NewAction {
    pub fn new(actor: EntityRef, verb: impl Into<String>) -> NewAction {
        NewAction {
            actor,
            verb: verb.into(),
            target: None,
            action_object: None,
            timestamp: None,
            public: true,
            is_batchable: false,
            batch_time_minutes: 30,
            data: None,
        }
    }
    pub fn target(mut self, target: EntityRef) -> NewAction {
        self.target = Some(target);
        self
    }
    pub fn action_object(mut self, object: EntityRef) -> NewAction {
        self.action_object = Some(object);
        self
    }
    pub fn at(mut self, timestamp: Timestamp) -> NewAction {
        self.timestamp = Some(timestamp);
        self
    }
    pub fn private(mut self) -> NewAction {
        self.public = false;
        self
    }
    pub fn batchable(mut self, minutes: u32) -> NewAction {
        self.is_batchable = true;
        self.batch_time_minutes = minutes;
        self
    }
    pub fn data(mut self, data: Value) -> NewAction {
        self.data = Some(data);
        self
    }
    pub(crate) fn into_action(self, id: ActionId, timestamp: Timestamp) -> Action {
        Action {
            id,
            actor: self.actor,
            verb: self.verb,
            action_object: self.action_object,
            target: self.target,
            timestamp,
            public: self.public,
            state: ActionState::Active,
            is_batchable: self.is_batchable,
            batch_time_minutes: self.batch_time_minutes,
            data: self.data.map(|value| value.to_string()),
        }
    }
}
