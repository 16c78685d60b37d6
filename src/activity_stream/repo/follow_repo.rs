use anyhow::Result;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};

use crate::activity_stream::entity::EntityRef;
use crate::activity_stream::model::Follow;

use super::xkey::{edge_key, edge_prefix, entity_prefix};

/// Follow edges keyed `user -> entity -> category`, with a reverse index for
/// follower lookups.
#[derive(Clone)]
pub struct FollowRepo {
    keyspace: Keyspace,
    follows: PartitionHandle,
    followers: PartitionHandle,
}

impl FollowRepo {
    pub fn new(keyspace: Keyspace) -> Result<FollowRepo> {
        let options = PartitionCreateOptions::default();
        let follows = keyspace.open_partition("follows", options.clone())?;
        let followers = keyspace.open_partition("followers_index", options)?;
        Ok(FollowRepo {
            keyspace,
            follows,
            followers,
        })
    }
    pub fn insert(&self, follow: Follow) -> Result<()> {
        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.followers,
            edge_key(&follow.entity, &follow.user, &follow.category),
            Vec::<u8>::new(),
        );
        batch.insert(
            &self.follows,
            edge_key(&follow.user, &follow.entity, &follow.category),
            follow.into_bytes()?,
        );
        batch.commit()?;
        Ok(())
    }
    pub fn find_one(
        &self,
        user: &EntityRef,
        entity: &EntityRef,
        category: &str,
    ) -> Result<Option<Follow>> {
        if let Some(bytes) = self.follows.get(edge_key(user, entity, category))? {
            return Ok(Some(Follow::from_bytes(&bytes)?));
        }
        Ok(None)
    }
    /// Every follow row between `user` and `entity`, whatever the category.
    pub fn find_all(&self, user: &EntityRef, entity: &EntityRef) -> Result<Vec<Follow>> {
        let mut result = vec![];
        for pair in self.follows.prefix(edge_prefix(user, entity)) {
            let (_, bytes) = pair?;
            result.push(Follow::from_bytes(&bytes)?);
        }
        Ok(result)
    }
    /// Removes the rows with `category`, or every row when it is `None`.
    pub fn remove(
        &self,
        user: &EntityRef,
        entity: &EntityRef,
        category: Option<&str>,
    ) -> Result<usize> {
        let rows: Vec<Follow> = self
            .find_all(user, entity)?
            .into_iter()
            .filter(|follow| category.is_none_or(|c| follow.category == c))
            .collect();
        let mut batch = self.keyspace.batch();
        for follow in &rows {
            batch.remove(&self.follows, edge_key(user, entity, &follow.category));
            batch.remove(&self.followers, edge_key(entity, user, &follow.category));
        }
        batch.commit()?;
        Ok(rows.len())
    }
    pub fn following(&self, user: &EntityRef) -> Result<Vec<Follow>> {
        let mut result = vec![];
        for pair in self.follows.prefix(entity_prefix(user)) {
            let (_, bytes) = pair?;
            result.push(Follow::from_bytes(&bytes)?);
        }
        Ok(result)
    }
    pub fn followers(&self, entity: &EntityRef) -> Result<Vec<Follow>> {
        let prefix = entity_prefix(entity);
        let mut result = vec![];
        for pair in self.followers.prefix(&prefix) {
            let (key, _) = pair?;
            // reverse key is <entity>\0<user>\0<category>
            let rest = &key[prefix.len()..];
            let Some(split) = rest.iter().position(|&b| b == 0) else {
                continue;
            };
            let user: EntityRef = std::str::from_utf8(&rest[..split])?.parse()?;
            let category = std::str::from_utf8(&rest[split + 1..])?;
            if let Some(follow) = self.find_one(&user, entity, category)? {
                result.push(follow);
            }
        }
        Ok(result)
    }
}
