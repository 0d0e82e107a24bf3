//! Cart aggregate implementation.

use chrono::{DateTime, Duration, Utc};
use common::{CartId, Version};
use serde::{Deserialize, Serialize};

use crate::coupon::AppliedCoupon;

use super::{CartError, CartItem, GuestId, Identity, Money, ProductId, Sku, UserId};

/// Cart aggregate root.
///
/// One cart exists per [`Identity`]. Guest carts carry an expiry; user carts
/// never expire. `total_price` always equals the sum of the line totals and
/// is recomputed by every mutating method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    id: CartId,

    /// Optimistic concurrency token, owned by the store.
    #[serde(default)]
    version: Version,

    identity: Identity,

    /// Lines in insertion order, unique by (product, sku).
    items: Vec<CartItem>,

    total_price: Money,

    expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    applied_coupon: Option<AppliedCoupon>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty cart for `identity`.
    ///
    /// Guest carts expire `guest_ttl` after `now`; user carts get no expiry.
    pub fn new(identity: Identity, now: DateTime<Utc>, guest_ttl: Duration) -> Self {
        let expires_at = identity.is_guest().then(|| now + guest_ttl);
        Self {
            id: CartId::new(),
            version: Version::initial(),
            identity,
            items: Vec::new(),
            total_price: Money::zero(),
            expires_at,
            applied_coupon: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// Query methods
impl Cart {
    pub fn id(&self) -> CartId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the persisted version. Only stores should call this.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the total number of units across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn applied_coupon(&self) -> Option<&AppliedCoupon> {
        self.applied_coupon.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the line for `(product_id, sku)`, if present.
    pub fn item(&self, product_id: &ProductId, sku: &Sku) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|item| &item.product_id == product_id && &item.sku == sku)
    }

    /// Returns the first line holding `sku`, if present.
    pub fn item_by_sku(&self, sku: &Sku) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.sku == sku)
    }

    /// Units of `(product_id, sku)` currently held, 0 when absent.
    pub fn quantity_of(&self, product_id: &ProductId, sku: &Sku) -> u32 {
        self.item(product_id, sku).map_or(0, |item| item.quantity)
    }

    /// True for guest carts whose expiry lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.identity.is_guest() && self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

// Command methods
impl Cart {
    /// Inserts a new line or sets the quantity of the existing
    /// `(product_id, sku)` line.
    ///
    /// An existing line keeps its original price snapshot.
    pub fn upsert_item(&mut self, item: CartItem, now: DateTime<Utc>) -> Result<(), CartError> {
        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity {
                quantity: item.quantity,
            });
        }
        if item.price_at_time_added.is_negative() {
            return Err(CartError::InvalidPrice {
                price: item.price_at_time_added.cents(),
            });
        }

        match self
            .items
            .iter_mut()
            .find(|existing| existing.product_id == item.product_id && existing.sku == item.sku)
        {
            Some(existing) => existing.quantity = item.quantity,
            None => self.items.push(item),
        }

        self.recalculate(now);
        Ok(())
    }

    /// Removes the first line holding `sku` and returns it.
    pub fn remove_item(&mut self, sku: &Sku, now: DateTime<Utc>) -> Result<CartItem, CartError> {
        let index = self
            .items
            .iter()
            .position(|item| &item.sku == sku)
            .ok_or_else(|| CartError::ItemNotFound { sku: sku.clone() })?;

        let removed = self.items.remove(index);
        self.recalculate(now);
        Ok(removed)
    }

    /// Folds a guest cart's lines into this user cart.
    ///
    /// Lines matching on (product_id, sku) have their quantities added and
    /// keep the user's price snapshot; the rest are appended in the guest cart's order. No stock changes
    /// hands: the guest's units were reserved when they were added.
    pub fn absorb(&mut self, guest: &Cart, now: DateTime<Utc>) -> Result<(), CartError> {
        if self.identity.is_guest() {
            return Err(CartError::NotUserCart {
                identity: self.identity.clone(),
            });
        }
        if !guest.identity.is_guest() {
            return Err(CartError::NotGuestCart {
                identity: guest.identity.clone(),
            });
        }

        for guest_item in &guest.items {
            match self
                .items
                .iter_mut()
                .find(|item| item.same_line(guest_item))
            {
                Some(item) => item.quantity += guest_item.quantity,
                None => self.items.push(guest_item.clone()),
            }
        }

        self.recalculate(now);
        Ok(())
    }

    /// Turns a guest cart into a user cart, dropping its expiry.
    pub fn promote_to(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<(), CartError> {
        if !self.identity.is_guest() {
            return Err(CartError::NotGuestCart {
                identity: self.identity.clone(),
            });
        }

        self.identity = Identity::User(user_id);
        self.expires_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Slides a guest cart's expiry to `now + ttl`. User carts are untouched.
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>, ttl: Duration) {
        if self.identity.is_guest() {
            self.expires_at = Some(now + ttl);
        }
    }

    /// Records an applied coupon.
    pub fn apply_coupon(&mut self, coupon: AppliedCoupon, now: DateTime<Utc>) {
        self.applied_coupon = Some(coupon);
        self.updated_at = now;
    }

    /// Updates the discount of the applied coupon, if any.
    pub fn update_coupon_discount(&mut self, discount: Money) {
        if let Some(coupon) = self.applied_coupon.as_mut() {
            coupon.discount = discount;
        }
    }

    /// Drops the applied coupon and returns it.
    pub fn clear_coupon(&mut self) -> Option<AppliedCoupon> {
        self.applied_coupon.take()
    }

    fn recalculate(&mut self, now: DateTime<Utc>) {
        self.total_price = self.items.iter().map(CartItem::line_total).sum();
        self.updated_at = now;
    }
}

impl Cart {
    /// Convenience constructor for a guest cart.
    pub fn for_guest(guest_id: GuestId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::new(Identity::Guest(guest_id), now, ttl)
    }

    /// Convenience constructor for a user cart.
    pub fn for_user(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self::new(Identity::User(user_id), now, Duration::zero())
    }
}
