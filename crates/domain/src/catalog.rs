//! Read-only product catalog snapshot.
//!
//! The cart subsystem never writes product metadata; the only mutable field
//! is [`StockEntry::quantity`], and that is changed exclusively through the
//! stock ledger.

use serde::{Deserialize, Serialize};

use crate::cart::{Money, ProductId, Sku};

/// Per-SKU inventory row embedded in a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub sku: Sku,
    pub color: String,
    pub size: String,
    pub quantity: u32,
}

impl StockEntry {
    pub fn new(
        sku: impl Into<Sku>,
        color: impl Into<String>,
        size: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            sku: sku.into(),
            color: color.into(),
            size: size.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub url: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// Catalog product as seen by the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub sales_price: Option<Money>,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub inventory: Vec<StockEntry>,
}

impl Product {
    /// Creates a product with no images and no inventory rows.
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            sales_price: None,
            images: Vec::new(),
            inventory: Vec::new(),
        }
    }

    pub fn with_sales_price(mut self, sales_price: Money) -> Self {
        self.sales_price = Some(sales_price);
        self
    }

    pub fn with_image(mut self, url: impl Into<String>, is_primary: bool) -> Self {
        self.images.push(ProductImage {
            url: url.into(),
            is_primary,
        });
        self
    }

    pub fn with_stock(mut self, entry: StockEntry) -> Self {
        self.inventory.push(entry);
        self
    }

    /// Price a new cart line snapshots: the sales price when one is set,
    /// otherwise the list price.
    pub fn unit_price(&self) -> Money {
        match self.sales_price {
            Some(sales) if sales.is_positive() => sales,
            _ => self.price,
        }
    }

    /// The primary image URL, falling back to the first image.
    pub fn primary_image(&self) -> Option<&str> {
        self.images
            .iter()
            .find(|image| image.is_primary)
            .or_else(|| self.images.first())
            .map(|image| image.url.as_str())
    }

    /// Looks up the inventory row for a SKU.
    pub fn stock_entry(&self, sku: &Sku) -> Option<&StockEntry> {
        self.inventory.iter().find(|entry| &entry.sku == sku)
    }
}
