//! Entities that act, get acted upon, and can be followed.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{Result, bail};
use minicbor::{Decode, Encode};
use serde::{Serialize, Serializer};

use crate::error::FeedError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub enum EntityKind {
    #[n(0)]
    User,
    #[n(1)]
    Organization,
    #[n(2)]
    Post,
    /// An action used as the target of another action, e.g. a share.
    #[n(3)]
    Action,
    #[n(4)]
    Other(#[n(0)] String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::User => "user",
            EntityKind::Organization => "organization",
            EntityKind::Post => "post",
            EntityKind::Action => "action",
            EntityKind::Other(kind) => kind.as_str(),
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "user" => EntityKind::User,
            "organization" => EntityKind::Organization,
            "post" => EntityKind::Post,
            "action" => EntityKind::Action,
            "" => return Err(FeedError::InvalidEntity(s.to_string())),
            other if other.contains([':', '\0']) => {
                return Err(FeedError::InvalidEntity(s.to_string()));
            }
            other => EntityKind::Other(other.to_string()),
        };
        Ok(kind)
    }
}

/// Type plus id of anything that takes part in an action.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct EntityRef {
    #[n(0)]
    pub kind: EntityKind,
    #[n(1)]
    pub id: u64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: u64) -> EntityRef {
        EntityRef { kind, id }
    }
    pub fn user(id: u64) -> EntityRef {
        EntityRef::new(EntityKind::User, id)
    }
    pub fn organization(id: u64) -> EntityRef {
        EntityRef::new(EntityKind::Organization, id)
    }
    pub fn post(id: u64) -> EntityRef {
        EntityRef::new(EntityKind::Post, id)
    }
    pub fn action(id: u64) -> EntityRef {
        EntityRef::new(EntityKind::Action, id)
    }
    pub fn is_user(&self) -> bool {
        self.kind == EntityKind::User
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .rsplit_once(':')
            .ok_or_else(|| FeedError::InvalidEntity(s.to_string()))?;
        let id = id
            .parse()
            .map_err(|_| FeedError::InvalidEntity(s.to_string()))?;
        Ok(EntityRef::new(kind.parse()?, id))
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What the follow graph needs to know about a followed entity.
pub trait Followable {
    fn entity(&self) -> EntityRef;

    /// Who hears about a new follower. `None` suppresses the notification.
    fn notification_recipients(&self) -> Option<Vec<EntityRef>> {
        Some(vec![self.entity()])
    }

    /// Whether actions naming this entity as target or action-object also
    /// reach its followers.
    fn supports_legacy_follow(&self) -> bool {
        !self.entity().is_user()
    }

    /// Identity under which this entity's own actions are recorded.
    fn actor_identity(&self) -> EntityRef {
        self.entity()
    }
}

impl Followable for EntityRef {
    fn entity(&self) -> EntityRef {
        self.clone()
    }
    fn notification_recipients(&self) -> Option<Vec<EntityRef>> {
        match self.kind {
            EntityKind::Post => None,
            _ => Some(vec![self.clone()]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub is_staff: bool,
}

impl Followable for User {
    fn entity(&self) -> EntityRef {
        EntityRef::user(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: u64,
    pub primary_admin: Option<User>,
    pub admins: Vec<User>,
}

impl Followable for Organization {
    fn entity(&self) -> EntityRef {
        EntityRef::organization(self.id)
    }
    fn notification_recipients(&self) -> Option<Vec<EntityRef>> {
        let mut recipients = BTreeSet::new();
        if let Some(primary) = self.primary_admin.as_ref().filter(|admin| !admin.is_staff) {
            recipients.insert(primary.entity());
        }
        recipients.extend(self.admins.iter().map(User::entity));
        Some(recipients.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: u64,
}

impl Followable for Post {
    fn entity(&self) -> EntityRef {
        EntityRef::post(self.id)
    }
    fn notification_recipients(&self) -> Option<Vec<EntityRef>> {
        None
    }
}

/// Entity kinds allowed to act, be acted upon, or be followed.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    kinds: BTreeSet<EntityKind>,
}

impl Registry {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Registry> {
        let mut registry = Registry::default();
        for name in names {
            registry.register(name.as_ref().parse()?);
        }
        Ok(registry)
    }
    pub fn register(&mut self, kind: EntityKind) {
        self.kinds.insert(kind);
    }
    pub fn is_registered(&self, kind: &EntityKind) -> bool {
        self.kinds.contains(kind)
    }
    pub fn check(&self, entity: &EntityRef) -> Result<()> {
        if !self.is_registered(&entity.kind) {
            bail!(FeedError::NotActionable(entity.kind.to_string()));
        }
        Ok(())
    }
}
