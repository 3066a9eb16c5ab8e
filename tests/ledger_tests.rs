mod common;

use common::{cart, harness, harness_with_config};
use serde_json::{Value, json};
use shoptrace::{CartItem, DedupLedger, EventType, OrderFields, StorageDir, TrackerConfig};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_purchase_reported_once() {
    let dir = tempdir().unwrap();
    let mut h = harness(dir.path(), 10);

    let first = h.pipeline.track_purchase("1001");
    let second = h.pipeline.track_purchase("1001");

    assert!(first.is_some());
    assert_eq!(second, None);
    let purchases: Vec<Value> = h
        .recorder
        .singles()
        .into_iter()
        .filter(|e| e["event_type"] == "purchase")
        .collect();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0]["order_id"], "1001");
    assert_eq!(purchases[0]["checkout_completed"], true);
}

#[test]
fn test_dedup_survives_reload() {
    let dir = tempdir().unwrap();
    {
        let mut h = harness(dir.path(), 10);
        assert!(h.pipeline.track_purchase("A-77").is_some());
    }
    let mut h = harness(dir.path(), 10);
    assert_eq!(h.pipeline.track_purchase("A-77"), None);
    assert_eq!(h.recorder.attempts(), 0);
}

#[test]
fn test_ledger_evicts_oldest() {
    let dir = tempdir().unwrap();
    let mut h = harness(dir.path(), 10);

    for i in 1..=51 {
        assert!(h.pipeline.track_purchase(&format!("order-{i}")).is_some());
    }
    let tracked = h.pipeline.ledger().tracked().unwrap();
    assert_eq!(tracked.len(), 50);
    assert_eq!(tracked[0], "order-2");

    for i in 2..=51 {
        assert_eq!(h.pipeline.track_purchase(&format!("order-{i}")), None);
    }
    // The oldest id was forgotten and is reported again.
    assert!(h.pipeline.track_purchase("order-1").is_some());
}

#[test]
fn test_configured_capacity() {
    let dir = tempdir().unwrap();
    let config = TrackerConfig::builder("http://localhost:8000/ingest")
        .storage_dir(dir.path())
        .ledger_capacity(2)
        .build()
        .unwrap();
    let mut h = harness_with_config(&config);

    h.pipeline.track_purchase("a").unwrap();
    h.pipeline.track_purchase("b").unwrap();
    h.pipeline.track_purchase("c").unwrap();
    assert_eq!(h.pipeline.ledger().tracked().unwrap(), vec!["b", "c"]);
}

#[test]
fn test_empty_order_id_is_rejected() {
    let dir = tempdir().unwrap();
    let mut h = harness(dir.path(), 10);
    assert_eq!(h.pipeline.track_purchase("   "), None);
    assert_eq!(h.recorder.attempts(), 0);
    assert!(h.pipeline.ledger().tracked().unwrap().is_empty());
}

#[test]
fn test_suppressed_purchase_has_no_side_effects() {
    let dir = tempdir().unwrap();
    let mut h = harness(dir.path(), 10);
    h.pipeline.track_purchase("1001").unwrap();
    let tracked_before = h.pipeline.context().events_tracked();

    h.pipeline.track_purchase("1001");

    assert_eq!(h.pipeline.context().events_tracked(), tracked_before);
    assert_eq!(h.recorder.attempts(), 1);
}

#[test]
fn test_purchase_falls_back_to_cart() {
    let dir = tempdir().unwrap();
    let mut h = harness(dir.path(), 10);
    h.collector.set_cart(Some(cart()));
    h.pipeline.get_cart().unwrap();

    h.pipeline.track_purchase("2002").unwrap();

    let purchase = h.recorder.singles().pop().unwrap();
    assert_eq!(purchase["order_total"], 59.5);
    assert_eq!(purchase["cart_id"], "cart-token-1");
    assert_eq!(purchase["order_items"][0]["product_id"], "101");
    assert_eq!(purchase["coupon_code"], Value::Null);
    assert_eq!(purchase["shipping_method"], Value::Null);
}

#[test]
fn test_purchase_prefers_collected_order_fields() {
    let dir = tempdir().unwrap();
    let mut h = harness(dir.path(), 10);
    h.collector.set_cart(Some(cart()));
    h.pipeline.get_cart().unwrap();
    h.collector.set_order(Some(OrderFields {
        order_total: Some(64.0),
        order_shipping_total: Some(4.5),
        order_discount_total: None,
        items: vec![CartItem {
            title: Some("Wool Scarf".to_string()),
            quantity: 1,
            ..CartItem::default()
        }],
        payment_method_type: Some("card".to_string()),
        shipping_method: Some("standard".to_string()),
        coupon_code: Some("SPRING10".to_string()),
    }));

    h.pipeline.track_purchase("2003").unwrap();

    let purchase = h.recorder.singles().pop().unwrap();
    assert_eq!(purchase["order_total"], 64.0);
    assert_eq!(purchase["order_shipping_total"], 4.5);
    assert_eq!(purchase["order_discount_total"], Value::Null);
    assert_eq!(purchase["order_items"].as_array().unwrap().len(), 1);
    assert_eq!(purchase["order_items"][0]["title"], "Wool Scarf");
    assert_eq!(purchase["payment_method_type"], "card");
    assert_eq!(purchase["coupon_code"], "SPRING10");
    assert_eq!(purchase["event_type"], json!(EventType::Purchase.as_str()));
}

#[test]
fn test_unavailable_ledger_still_reports() {
    let dir = tempdir().unwrap();
    let blocked = dir.path().join("storage");
    fs::write(&blocked, b"occupied").unwrap();
    let mut h = harness(&blocked, 10);

    // Without durable storage duplicates cannot be detected.
    assert!(h.pipeline.track_purchase("3003").is_some());
    assert!(h.pipeline.track_purchase("3003").is_some());
    assert_eq!(h.recorder.singles().len(), 2);
}

#[test]
fn test_corrupt_ledger_reports_and_keeps_file() {
    let dir = tempdir().unwrap();
    let storage = StorageDir::new(dir.path());
    fs::write(storage.path("tracked_orders.json"), b"[not json").unwrap();

    let ledger = DedupLedger::new(storage.clone(), 50);
    assert!(ledger.is_tracked("1").is_err());
    assert!(ledger.mark_tracked("1").is_err());
    assert_eq!(
        fs::read(storage.path("tracked_orders.json")).unwrap(),
        b"[not json"
    );
}
