//! Demo catalog and coupons for local runs.

use domain::{Money, Product, StockEntry};
use reservation::{Coupon, InMemoryCouponBook};

/// A small catalog to try the API against.
pub fn demo_products() -> Vec<Product> {
    vec![
        Product::new("tee-classic", "Classic Tee", Money::from_cents(2500))
            .with_image("https://cdn.example.com/tee-classic.jpg", true)
            .with_stock(StockEntry::new("TEE-BLK-M", "black", "M", 20))
            .with_stock(StockEntry::new("TEE-BLK-L", "black", "L", 12))
            .with_stock(StockEntry::new("TEE-WHT-M", "white", "M", 3)),
        Product::new("hoodie-zip", "Zip Hoodie", Money::from_cents(6000))
            .with_sales_price(Money::from_cents(4800))
            .with_image("https://cdn.example.com/hoodie-zip.jpg", true)
            .with_stock(StockEntry::new("HOOD-GRY-M", "grey", "M", 8))
            .with_stock(StockEntry::new("HOOD-GRY-XL", "grey", "XL", 1)),
        Product::new("cap-logo", "Logo Cap", Money::from_cents(1800))
            .with_stock(StockEntry::new("CAP-NVY-OS", "navy", "OS", 30)),
    ]
}

/// Registers the demo coupons.
pub fn seed_coupons(book: &InMemoryCouponBook) {
    book.insert(Coupon::percentage("WELCOME10", 10));
    book.insert(
        Coupon::fixed("FIVEOFF", Money::from_cents(500)).with_minimum(Money::from_cents(3000)),
    );
}
