//! Capability interface to the page-scraping side of the tracker.
//!
//! The pipeline never inspects page markup itself. Whatever the host can
//! extract is handed over through [`PageCollector`]; every field is optional
//! and every method may return `None`.

use serde::{Deserialize, Serialize};

/// One line of a cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub title: Option<String>,
    pub quantity: u32,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub key: Option<String>,
}

/// A cart as last seen by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub id: Option<String>,
    pub total: f64,
    #[serde(rename = "itemCount")]
    pub item_count: u32,
    pub items: Vec<CartItem>,
}

impl CartSnapshot {
    pub fn has_items(&self) -> bool {
        self.item_count > 0
    }
}

/// Order details found on a confirmation page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFields {
    pub order_total: Option<f64>,
    pub order_shipping_total: Option<f64>,
    pub order_discount_total: Option<f64>,
    pub items: Vec<CartItem>,
    pub payment_method_type: Option<String>,
    pub shipping_method: Option<String>,
    pub coupon_code: Option<String>,
}

/// Extraction hooks supplied by the host page integration.
pub trait PageCollector: Send {
    /// Fetch the current cart. `None` when it cannot be determined.
    fn cart_snapshot(&mut self) -> Option<CartSnapshot> {
        None
    }

    /// Extract order details for a confirmed order.
    fn order_fields(&mut self, _order_id: &str) -> Option<OrderFields> {
        None
    }
}

/// A collector that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCollector;

impl PageCollector for NoCollector {}
