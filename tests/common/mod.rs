#![allow(dead_code)]

use serde_json::Value;
use shoptrace::{
    CartItem, CartSnapshot, DeviceContext, Identity, NetworkState, OrderFields, PageCollector,
    PageContext, Payload, Pipeline, SessionContext, TrackerConfig, Transport, TransportError,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared view of everything a [`RecordingTransport`] was asked to send.
#[derive(Clone, Default)]
pub struct Recorder {
    bodies: Arc<Mutex<Vec<Value>>>,
    attempts: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl Recorder {
    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(RecordingTransport {
            recorder: self.clone(),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every post, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Bodies of successful posts.
    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn singles(&self) -> Vec<Value> {
        self.bodies()
            .into_iter()
            .filter(|b| b.get("events").is_none())
            .collect()
    }

    pub fn batches(&self) -> Vec<Vec<Value>> {
        self.bodies()
            .into_iter()
            .filter_map(|b| b.get("events").and_then(|e| e.as_array()).cloned())
            .collect()
    }

    /// Event ids of everything delivered, in delivery order.
    pub fn delivered_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for body in self.bodies() {
            match body.get("events").and_then(|e| e.as_array()) {
                Some(events) => ids.extend(events.iter().map(event_id)),
                None => ids.push(event_id(&body)),
            }
        }
        ids
    }
}

pub fn event_id(event: &Value) -> String {
    event["event_id"].as_str().unwrap().to_string()
}

pub struct RecordingTransport {
    recorder: Recorder,
}

impl Transport for RecordingTransport {
    fn post(&mut self, body: &[u8]) -> Result<(), TransportError> {
        self.recorder.attempts.fetch_add(1, Ordering::SeqCst);
        if self.recorder.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        let value: Value = serde_json::from_slice(body)?;
        self.recorder.bodies.lock().unwrap().push(value);
        Ok(())
    }
}

/// Collector returning whatever the test put in it.
#[derive(Clone, Default)]
pub struct FakeCollector {
    pub cart: Arc<Mutex<Option<CartSnapshot>>>,
    pub order: Arc<Mutex<Option<OrderFields>>>,
}

impl FakeCollector {
    pub fn set_cart(&self, cart: Option<CartSnapshot>) {
        *self.cart.lock().unwrap() = cart;
    }

    pub fn set_order(&self, order: Option<OrderFields>) {
        *self.order.lock().unwrap() = order;
    }
}

impl PageCollector for FakeCollector {
    fn cart_snapshot(&mut self) -> Option<CartSnapshot> {
        self.cart.lock().unwrap().clone()
    }

    fn order_fields(&mut self, _order_id: &str) -> Option<OrderFields> {
        self.order.lock().unwrap().clone()
    }
}

pub fn identity() -> Identity {
    Identity {
        store_id: "demo-store".to_string(),
        session_id: "sess_1700000000_abc".to_string(),
        anonymous_id: "anon_QmFzZTY0".to_string(),
        user_id: None,
    }
}

pub fn home_page() -> PageContext {
    PageContext::from_url(
        "https://demo-store.example/?utm_source=newsletter&utm_campaign=spring",
        Some("https://search.example/".to_string()),
    )
}

pub fn device() -> DeviceContext {
    DeviceContext::from_user_agent(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        Some((1920, 1080)),
        Some("Europe/Berlin".to_string()),
    )
}

pub fn cart() -> CartSnapshot {
    CartSnapshot {
        id: Some("cart-token-1".to_string()),
        total: 59.5,
        item_count: 2,
        items: vec![CartItem {
            product_id: Some("101".to_string()),
            variant_id: Some("9001".to_string()),
            title: Some("Linen Shirt".to_string()),
            quantity: 2,
            price: Some(29.75),
            currency: Some("USD".to_string()),
            key: Some("9001:abc".to_string()),
        }],
    }
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be an object, got {other}"),
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub recorder: Recorder,
    pub network: Arc<NetworkState>,
    pub collector: FakeCollector,
}

pub fn config(dir: &Path, batch_size: usize) -> TrackerConfig {
    TrackerConfig::builder("http://localhost:8000/ingest")
        .batch_size(batch_size)
        .storage_dir(dir)
        .build()
        .unwrap()
}

pub fn harness(dir: &Path, batch_size: usize) -> Harness {
    harness_with_config(&config(dir, batch_size))
}

pub fn harness_with_config(config: &TrackerConfig) -> Harness {
    let recorder = Recorder::default();
    let network = NetworkState::new(true);
    let collector = FakeCollector::default();
    let ctx = SessionContext::initialize(&identity(), home_page(), device());
    let pipeline = Pipeline::new(
        config,
        ctx,
        recorder.transport(),
        network.clone(),
        Box::new(collector.clone()),
    );
    Harness {
        pipeline,
        recorder,
        network,
        collector,
    }
}
