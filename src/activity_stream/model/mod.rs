mod action;
mod follow;

pub use action::{Action, ActionId, ActionState, NewAction};
pub use follow::{Follow, FollowId, FollowScope};

/// Drops the sub-millisecond part that [`timestamp_cbor`] does not store.
pub(crate) fn stored_precision(timestamp: jiff::Timestamp) -> anyhow::Result<jiff::Timestamp> {
    Ok(jiff::Timestamp::from_millisecond(timestamp.as_millisecond())?)
}

/// CBOR codec for timestamps, stored as milliseconds since the Unix epoch.
pub(crate) mod timestamp_cbor {
    use jiff::Timestamp;
    use minicbor::{Decoder, Encoder};

    pub(crate) fn encode<Ctx, W: minicbor::encode::Write>(
        v: &Timestamp,
        e: &mut Encoder<W>,
        _ctx: &mut Ctx,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(v.as_millisecond())?;
        Ok(())
    }

    pub(crate) fn decode<'b, Ctx>(
        d: &mut Decoder<'b>,
        _ctx: &mut Ctx,
    ) -> Result<Timestamp, minicbor::decode::Error> {
        let millis = d.i64()?;
        Timestamp::from_millisecond(millis)
            .map_err(|_| minicbor::decode::Error::message("timestamp out of range"))
    }
}
