//! Outbox for the notification side-channel.
//!
//! Notices are fire-and-forget for the feed engine. A delivery worker outside
//! this crate drains them with [`NoticeQueue::receive`] and
//! [`NoticeQueue::ack`].

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fjall::{Keyspace, PartitionHandle, PersistMode, UserKey};
use minicbor::{Decode, Encode};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::entity::EntityRef;

type Bytes = [u8; 16];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Encode, Decode)]
pub struct Notice {
    #[n(0)]
    pub recipients: Vec<EntityRef>,
    #[n(1)]
    pub kind: String,
    /// The entity the notice is about.
    #[n(2)]
    pub context: EntityRef,
    #[n(3)]
    pub sender: EntityRef,
}

/// Receives notices; must not block on delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice) -> Result<()>;
}

#[derive(Debug, Encode, Decode)]
struct QueuedNotice {
    #[n(0)]
    notice: Notice,
    #[n(1)]
    receipt_handle: Bytes,
    #[n(2)]
    approximate_receive_count: u64,
}

#[derive(Debug)]
pub struct Delivery {
    pub key: Bytes,
    pub receipt_handle: Bytes,
    pub receive_count: u64,
    pub notice: Notice,
}

#[derive(Clone)]
pub struct NoticeQueue {
    keyspace: Keyspace,
    messages: PartitionHandle,
    visibility: PartitionHandle,
}

impl NoticeQueue {
    pub fn new(keyspace: Keyspace) -> Result<NoticeQueue> {
        let messages = keyspace.open_partition("notices", Default::default())?;
        let visibility = keyspace.open_partition("notice_visibility", Default::default())?;
        Ok(NoticeQueue {
            keyspace,
            messages,
            visibility,
        })
    }

    pub fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
    }
    pub fn is_empty(&self) -> Result<bool> {
        self.messages
            .is_empty()
            .context("unable to read from notices partition")
    }
    pub fn len(&self) -> Result<usize> {
        self.messages
            .len()
            .context("unable to read from notices partition")
    }
    pub fn enqueue(&self, notice: Notice) -> Result<()> {
        let key = Uuid::now_v7().into_bytes();
        let message = QueuedNotice {
            notice,
            receipt_handle: key,
            approximate_receive_count: 0,
        };
        debug!(target: "notice", ?key, ?message, "enqueue notice");
        let bytes = minicbor::to_vec(&message).context("unable to encode notice")?;
        self.messages.insert(key.to_vec(), bytes)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
    /// Leases the oldest visible notice for `visibility_timeout` seconds.
    ///
    /// `now` comes from the caller so leases survive restarts consistently.
    pub fn receive(&self, now: u64, visibility_timeout: u64) -> Result<Option<Delivery>> {
        for item in self.messages.iter() {
            let (key, value_bytes) = item?;

            if let Some(visible_at) = self.visibility.get(&key)? {
                let visible_at = u64::from_le_bytes(visible_at.as_ref().try_into()?);
                if visible_at > now {
                    continue;
                }
            }

            let mut message: QueuedNotice =
                minicbor::decode(&value_bytes).context("unable to decode notice")?;
            message.receipt_handle = Uuid::now_v7().into_bytes();
            message.approximate_receive_count += 1;

            let mut batch = self.keyspace.batch();
            batch.insert(
                &self.visibility,
                key.clone(),
                (now + visibility_timeout).to_le_bytes().to_vec(),
            );
            batch.insert(&self.messages, key.clone(), minicbor::to_vec(&message)?);
            batch.commit()?;
            self.keyspace.persist(PersistMode::SyncAll)?;

            debug!(target: "notice", ?key, ?message, "leased notice");
            return Ok(Some(Delivery {
                key: key.as_ref().try_into()?,
                receipt_handle: message.receipt_handle,
                receive_count: message.approximate_receive_count,
                notice: message.notice,
            }));
        }
        Ok(None)
    }
    /// Drops a delivered notice. Returns false when the lease has since been
    /// handed to another receiver.
    pub fn ack(&self, key: Bytes, receipt_handle: Bytes) -> Result<bool> {
        let q_key = UserKey::from(key.to_vec());
        let Some(bytes) = self.messages.get(&q_key)? else {
            return Ok(true);
        };
        let message: QueuedNotice = minicbor::decode(&bytes).context("unable to decode notice")?;
        if message.receipt_handle != receipt_handle {
            return Ok(false);
        }
        let mut batch = self.keyspace.batch();
        batch.remove(&self.messages, q_key.clone());
        batch.remove(&self.visibility, q_key);
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(target: "notice", ?key, "acknowledged notice");
        Ok(true)
    }
}

impl Notifier for NoticeQueue {
    fn notify(&self, notice: Notice) -> Result<()> {
        self.enqueue(notice)
    }
}
