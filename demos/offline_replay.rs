//! Offline replay: events tracked while offline survive and are sent on
//! reconnect.
//!
//! A printing transport stands in for the ingestion endpoint. The tracker
//! goes offline, a purchase is reported (it lands in the offline store),
//! and going back online replays the store as one batch.

use serde_json::{Value, json};
use shoptrace::{
    EventType, Identity, NetworkState, PageContext, Tracker, TrackerConfig, Transport,
    TransportError,
};
use std::fs;

struct PrintTransport;

impl Transport for PrintTransport {
    fn post(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let body: Value = serde_json::from_slice(body)?;
        match body.get("events").and_then(Value::as_array) {
            Some(events) => {
                let types: Vec<&str> = events
                    .iter()
                    .filter_map(|e| e["event_type"].as_str())
                    .collect();
                println!("[endpoint] batch of {}: {types:?}", events.len());
            }
            None => println!("[endpoint] single: {}", body["event_type"]),
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = TrackerConfig::builder("http://localhost:8000/ingest")
        .batch_size(3)
        .storage_dir(dir.path())
        .build()?;

    let identity = Identity {
        store_id: "demo-store".to_string(),
        session_id: "sess_demo".to_string(),
        anonymous_id: "anon_demo".to_string(),
        user_id: None,
    };
    let network = NetworkState::new(true);

    let tracker = Tracker::builder(config)
        .identity(&identity)
        .page(PageContext::from_url(
            "https://demo-store.example/products/mug?utm_source=newsletter",
            None,
        ))
        .transport(Box::new(PrintTransport))
        .network(network)
        .start()?;

    tracker.track(EventType::ProductView, Default::default());

    println!("[host] going offline");
    tracker.set_online(false);
    let mut payload = serde_json::Map::new();
    payload.insert("cart_total".to_string(), json!(24.0));
    tracker.track(EventType::CheckoutStart, payload);
    tracker.track_purchase("1001");
    tracker.queue_len();

    let pending = fs::read_to_string(dir.path().join("pending.jsonl"))?;
    println!("[host] {} events stored offline", pending.lines().count());

    println!("[host] back online");
    tracker.set_online(true);
    tracker.queue_len();

    // Reported already: suppressed by the dedup ledger.
    assert!(tracker.track_purchase("1001").is_none());

    drop(tracker);
    println!("\nDone: session unloaded.");
    Ok(())
}
