use std::fmt::Display;

use anyhow::{Context, Result};
use jiff::Timestamp;
use minicbor::{Decode, Encode};
use serde::Serialize;
use uuid::Uuid;

use crate::activity_stream::entity::EntityRef;

/// Time-ordered follow record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FollowId(Uuid);

impl FollowId {
    pub(crate) fn new() -> FollowId {
        FollowId(Uuid::now_v7())
    }
}

impl Display for FollowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_simple().fmt(f)
    }
}

impl Serialize for FollowId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<C> Encode<C> for FollowId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(self.0.as_bytes())?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for FollowId {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let uuid = Uuid::from_slice(bytes).map_err(minicbor::decode::Error::custom)?;
        Ok(FollowId(uuid))
    }
}

/// Which roles of the followed entity reach the follower.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum FollowScope {
    /// Only actions the entity performs.
    #[default]
    #[n(0)]
    ActorOnly,
    /// Also actions naming the entity as target or action-object.
    #[n(1)]
    AllRoles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Encode, Decode)]
pub struct Follow {
    #[n(0)]
    pub id: FollowId,
    #[n(1)]
    pub user: EntityRef,
    #[n(2)]
    pub entity: EntityRef,
    #[n(3)]
    pub scope: FollowScope,
    /// Empty for a plain follow.
    #[n(4)]
    pub category: String,
    #[cbor(n(5), with = "crate::activity_stream::model::timestamp_cbor")]
    pub started: Timestamp,
}

impl Follow {
    pub(crate) fn into_bytes(self) -> Result<Vec<u8>> {
        minicbor::to_vec(&self).context("unable to encode follow")
    }
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Follow> {
        minicbor::decode(bytes).context("unable to decode follow")
    }
}
