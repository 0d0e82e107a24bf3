//! Cart owner identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a registered user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random user ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a user ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Opaque session identifier of an unauthenticated shopper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestId(String);

impl GuestId {
    /// Creates a guest ID from a session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the guest ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GuestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GuestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GuestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Owner of a cart: exactly one of a user or a guest session.
///
/// Serializes as `{"userId": ...}` or `{"guestId": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    #[serde(rename = "userId")]
    User(UserId),
    #[serde(rename = "guestId")]
    Guest(GuestId),
}

impl Identity {
    /// Returns true for guest identities.
    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }

    /// Returns the user ID, if this is a user identity.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::User(id) => Some(*id),
            Identity::Guest(_) => None,
        }
    }

    /// Returns the guest ID, if this is a guest identity.
    pub fn guest_id(&self) -> Option<&GuestId> {
        match self {
            Identity::User(_) => None,
            Identity::Guest(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user:{id}"),
            Identity::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

impl From<UserId> for Identity {
    fn from(id: UserId) -> Self {
        Identity::User(id)
    }
}

impl From<GuestId> for Identity {
    fn from(id: GuestId) -> Self {
        Identity::Guest(id)
    }
}
