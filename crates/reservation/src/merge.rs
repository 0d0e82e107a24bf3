//! Guest-to-user cart merge at login.

use cart_store::{CartStore, Store, Transaction};
use chrono::{DateTime, Utc};
use domain::{Cart, GuestId, Identity, UserId};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine::{reprice_coupon, session_pointer};
use crate::error::Result;
use crate::outcome::CartWarning;
use crate::services::coupon::CouponEvaluator;
use crate::services::session::SessionHook;

/// Which of the four merge cases applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// Both carts existed; the guest lines were folded into the user cart.
    Combined,
    /// Only the guest cart existed; it now belongs to the user.
    Promoted,
    /// Only the user cart existed; nothing changed.
    UserOnly,
    /// Neither cart existed; nothing changed.
    Empty,
}

impl MergeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeKind::Combined => "combined",
            MergeKind::Promoted => "promoted",
            MergeKind::UserOnly => "user_only",
            MergeKind::Empty => "empty",
        }
    }
}

impl std::fmt::Display for MergeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user's cart after a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub cart: Option<Cart>,
    pub expires_at: Option<DateTime<Utc>>,
    pub kind: MergeKind,
    pub warnings: Vec<CartWarning>,
}

/// Folds a guest cart into the user's cart at login.
///
/// Merging only moves bookkeeping: the guest's units were reserved when they
/// were added, so the stock ledger is never called.
pub struct MergeCoordinator<S, C, H>
where
    S: Store,
    C: CouponEvaluator,
    H: SessionHook,
{
    store: S,
    coupons: C,
    sessions: H,
    config: EngineConfig,
}

impl<S, C, H> MergeCoordinator<S, C, H>
where
    S: Store,
    C: CouponEvaluator,
    H: SessionHook,
{
    /// Creates a new merge coordinator.
    pub fn new(store: S, coupons: C, sessions: H, config: EngineConfig) -> Self {
        Self {
            store,
            coupons,
            sessions,
            config,
        }
    }

    /// Merges the guest's cart into the user's.
    ///
    /// Safe to repeat: once the guest cart is gone a second call finds only
    /// the user cart and changes nothing.
    #[tracing::instrument(skip_all, fields(guest_id = %guest_id, user_id = %user_id))]
    pub async fn merge(&self, guest_id: &GuestId, user_id: UserId) -> Result<MergeOutcome> {
        let now = Utc::now();
        let guest = Identity::Guest(guest_id.clone());
        let user = Identity::User(user_id);

        let mut tx = self.store.begin().await?;
        let guest_cart = tx.find_by_identity(&guest).await?;
        let user_cart = tx.find_by_identity(&user).await?;

        let (cart, kind, warnings) = match (guest_cart, user_cart) {
            (Some(guest_cart), Some(mut user_cart)) => {
                user_cart.absorb(&guest_cart, now)?;
                let warnings = reprice_coupon(&self.coupons, &mut user_cart).await;
                tx.save(&mut user_cart).await?;
                tx.delete(&guest_cart).await?;
                tx.commit().await?;
                (Some(user_cart), MergeKind::Combined, warnings)
            }
            (Some(mut guest_cart), None) => {
                guest_cart.promote_to(user_id, now)?;
                let warnings = reprice_coupon(&self.coupons, &mut guest_cart).await;
                tx.save(&mut guest_cart).await?;
                tx.commit().await?;
                (Some(guest_cart), MergeKind::Promoted, warnings)
            }
            (None, Some(user_cart)) => {
                tx.rollback().await?;
                (Some(user_cart), MergeKind::UserOnly, Vec::new())
            }
            (None, None) => {
                tx.rollback().await?;
                (None, MergeKind::Empty, Vec::new())
            }
        };

        if matches!(kind, MergeKind::Combined | MergeKind::Promoted) {
            self.sessions.clear(&guest).await;
        }
        if let Some(cart) = &cart {
            self.sessions
                .refresh(&user, session_pointer(cart, now, &self.config))
                .await;
        }

        metrics::counter!("cart_merges_total", "kind" => kind.as_str()).increment(1);
        tracing::info!(kind = %kind, "guest cart merged");

        Ok(MergeOutcome {
            expires_at: cart.as_ref().and_then(Cart::expires_at),
            cart,
            kind,
            warnings,
        })
    }
}
