//! Session hook trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CartId;
use domain::Identity;
use serde::Serialize;

/// What the session layer keeps about an identity's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionPointer {
    pub cart_id: CartId,
    pub item_count: usize,
    /// When the session should lapse. Follows the cart expiry for guests.
    pub session_expires_at: DateTime<Utc>,
}

/// Keeps the caller's session in step with the cart.
///
/// Called after commit. The session layer is not owned by the engine, so
/// hook failures are the hook's own business and never undo a cart change.
#[async_trait]
pub trait SessionHook: Send + Sync {
    /// Points the identity's session at its cart and extends its TTL.
    async fn refresh(&self, identity: &Identity, pointer: SessionPointer);

    /// Forgets the identity's cart pointer.
    async fn clear(&self, identity: &Identity);
}

/// In-memory session registry for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionRegistry {
    pointers: Arc<RwLock<HashMap<Identity, SessionPointer>>>,
}

impl InMemorySessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pointer recorded for `identity`.
    pub fn pointer(&self, identity: &Identity) -> Option<SessionPointer> {
        self.pointers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Returns the number of identities with a cart pointer.
    pub fn len(&self) -> usize {
        self.pointers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionHook for InMemorySessionRegistry {
    async fn refresh(&self, identity: &Identity, pointer: SessionPointer) {
        self.pointers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.clone(), pointer);
    }

    async fn clear(&self, identity: &Identity) {
        self.pointers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::GuestId;

    #[tokio::test]
    async fn test_refresh_and_clear() {
        let registry = InMemorySessionRegistry::new();
        let identity = Identity::Guest(GuestId::new("g1"));
        let pointer = SessionPointer {
            cart_id: CartId::new(),
            item_count: 2,
            session_expires_at: Utc::now(),
        };

        registry.refresh(&identity, pointer.clone()).await;
        assert_eq!(registry.pointer(&identity), Some(pointer));
        assert_eq!(registry.len(), 1);

        registry.clear(&identity).await;
        assert!(registry.pointer(&identity).is_none());
        assert!(registry.is_empty());
    }
}
