//! Entity identifiers for agents and users
//!
//! Every participant in the exchange — an agent or a user client — is
//! addressed by a typed, globally-unique [`EntityId`]. Identifiers compare
//! and hash by their underlying UUID only; the optional display name is
//! carried purely for logs and diagnostics.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while parsing an [`EntityId`] from its display form.
#[derive(Debug, Error)]
pub enum IdentifierParseError {
    #[error("identifier is missing a kind prefix: {0:?}")]
    MissingKind(String),

    #[error("unknown identifier kind {kind:?} (expected \"agent\" or \"user\")")]
    UnknownKind { kind: String },

    #[error("invalid uuid in identifier {0:?}: {1}")]
    InvalidUuid(String, uuid::Error),
}

/// Unique identifier for an agent.
///
/// `AgentId` carries a phantom behavior type parameter so handles can be
/// labeled with the behavior they address at compile time. The parameter
/// has no effect on equality, hashing, or wire representation — it exists
/// purely for documentation and type-directed dispatch at the handle layer.
pub struct AgentId<B = ()> {
    uid: Uuid,
    name: Option<String>,
    _behavior: PhantomData<fn() -> B>,
}

impl<B> AgentId<B> {
    /// Creates a new random agent identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: None,
            _behavior: PhantomData,
        }
    }

    /// Creates a new random agent identifier with a display name.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: Some(name.into()),
            _behavior: PhantomData,
        }
    }

    /// Rebuilds an `AgentId` from a caller-chosen UUID and optional name.
    ///
    /// Used when reviving a registration (e.g. agent restart) where the
    /// identity must be preserved across runs.
    #[must_use]
    pub fn from_parts(uid: Uuid, name: Option<String>) -> Self {
        Self {
            uid,
            name,
            _behavior: PhantomData,
        }
    }

    /// The underlying UUID.
    #[must_use]
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    /// The display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Erases the phantom behavior type, e.g. to store heterogeneous
    /// agent IDs in a single collection.
    #[must_use]
    pub fn erase(&self) -> AgentId {
        AgentId::from_parts(self.uid, self.name.clone())
    }
}

impl<B> Default for AgentId<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> Clone for AgentId<B> {
    fn clone(&self) -> Self {
        Self {
            uid: self.uid,
            name: self.name.clone(),
            _behavior: PhantomData,
        }
    }
}

impl<B> fmt::Debug for AgentId<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", self)
    }
}

impl<B> PartialEq for AgentId<B> {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl<B> Eq for AgentId<B> {}

impl<B> std::hash::Hash for AgentId<B> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

impl<B> fmt::Display for AgentId<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "agent:{}:{}", self.uid, name),
            None => write!(f, "agent:{}", self.uid),
        }
    }
}

impl<B> FromStr for AgentId<B> {
    type Err = IdentifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = split_kind(s)?;
        if kind != "agent" {
            return Err(IdentifierParseError::UnknownKind {
                kind: kind.to_string(),
            });
        }
        let (uid, name) = split_uuid_name(rest, s)?;
        Ok(Self::from_parts(uid, name))
    }
}

/// Unique identifier for a user client.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId {
    uid: Uuid,
    name: Option<String>,
}

impl UserId {
    /// Creates a new random user identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: None,
        }
    }

    /// Creates a new random user identifier with a display name.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: Some(name.into()),
        }
    }

    /// The underlying UUID.
    #[must_use]
    pub fn uid(&self) -> Uuid {
        self.uid
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "user:{}:{}", self.uid, name),
            None => write!(f, "user:{}", self.uid),
        }
    }
}

impl FromStr for UserId {
    type Err = IdentifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = split_kind(s)?;
        if kind != "user" {
            return Err(IdentifierParseError::UnknownKind {
                kind: kind.to_string(),
            });
        }
        let (uid, name) = split_uuid_name(rest, s)?;
        Ok(Self { uid, name })
    }
}

/// Tagged union of every addressable mailbox owner.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityId {
    Agent(AgentId),
    User(UserId),
}

impl EntityId {
    /// The underlying UUID, regardless of entity kind.
    #[must_use]
    pub fn uid(&self) -> Uuid {
        match self {
            Self::Agent(id) => id.uid(),
            Self::User(id) => id.uid(),
        }
    }

    /// `true` if this identifies an agent.
    #[must_use]
    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent(_))
    }
}

impl<B> From<AgentId<B>> for EntityId {
    fn from(id: AgentId<B>) -> Self {
        Self::Agent(id.erase())
    }
}

impl From<UserId> for EntityId {
    fn from(id: UserId) -> Self {
        Self::User(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::User(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = IdentifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, _) = split_kind(s)?;
        match kind {
            "agent" => Ok(Self::Agent(s.parse()?)),
            "user" => Ok(Self::User(s.parse()?)),
            other => Err(IdentifierParseError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

fn split_kind(s: &str) -> Result<(&str, &str), IdentifierParseError> {
    s.split_once(':')
        .ok_or_else(|| IdentifierParseError::MissingKind(s.to_string()))
}

fn split_uuid_name(
    rest: &str,
    original: &str,
) -> Result<(Uuid, Option<String>), IdentifierParseError> {
    let (uid_str, name) = match rest.split_once(':') {
        Some((uid_str, name)) => (uid_str, Some(name.to_string())),
        None => (rest, None),
    };
    let uid = Uuid::parse_str(uid_str)
        .map_err(|e| IdentifierParseError::InvalidUuid(original.to_string(), e))?;
    Ok((uid, name))
}

// Every identifier serializes to its canonical `"<kind>:<uuid>[:<name>]"`
// string so the wire representation matches what appears in logs and CLI
// output. This keeps the HTTP transport's JSON bodies human-readable.

impl<B> Serialize for AgentId<B> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de, B> Deserialize<'de> for AgentId<B> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(DeError::custom)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(DeError::custom)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_round_trips_through_display() {
        let id: AgentId = AgentId::with_name("echo-1");
        let text = id.to_string();
        let parsed: AgentId = text.parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(parsed.name(), Some("echo-1"));
    }

    #[test]
    fn entity_id_round_trips_for_both_kinds() {
        let agent: EntityId = AgentId::<()>::new().into();
        let user: EntityId = UserId::new().into();

        assert_eq!(agent, agent.to_string().parse().unwrap());
        assert_eq!(user, user.to_string().parse().unwrap());
    }

    #[test]
    fn equality_ignores_display_name() {
        let uid = Uuid::new_v4();
        let a: AgentId = AgentId::from_parts(uid, Some("a".into()));
        let b: AgentId = AgentId::from_parts(uid, Some("b".into()));
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "robot:not-a-uuid".parse::<EntityId>().unwrap_err();
        assert!(matches!(err, IdentifierParseError::UnknownKind { .. }));
    }
}
