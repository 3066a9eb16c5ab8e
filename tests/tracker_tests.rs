mod common;

use common::{FakeCollector, Recorder, cart, config, device, event_id, home_page, identity, payload};
use serde_json::json;
use shoptrace::{
    Connectivity, Consent, EventType, GdprConsent, NetworkState, Tracker, Transport,
    TransportError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// Accepts every post after holding it for `delay`.
struct SlowTransport {
    delay: Duration,
    posts: Arc<AtomicUsize>,
}

impl Transport for SlowTransport {
    fn post(&mut self, _body: &[u8]) -> Result<(), TransportError> {
        thread::sleep(self.delay);
        self.posts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn start(dir: &std::path::Path, recorder: &Recorder, network: Arc<NetworkState>) -> Tracker {
    start_with_collector(dir, recorder, network, FakeCollector::default())
}

fn start_with_collector(
    dir: &std::path::Path,
    recorder: &Recorder,
    network: Arc<NetworkState>,
    collector: FakeCollector,
) -> Tracker {
    Tracker::builder(config(dir, 3))
        .identity(&identity())
        .page(home_page())
        .device(device())
        .transport(recorder.transport())
        .collector(Box::new(collector))
        .network(network)
        .start()
        .unwrap()
}

#[test]
fn test_track_returns_event_id() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let tracker = start(dir.path(), &recorder, NetworkState::new(true));

    let id = tracker
        .track(EventType::CheckoutStart, payload(json!({"cart_total": 10.0})))
        .unwrap();

    assert_eq!(tracker.queue_len(), 0);
    let singles = recorder.singles();
    assert_eq!(singles.len(), 1);
    assert_eq!(event_id(&singles[0]), id);
    assert_eq!(singles[0]["cart_total"], 10.0);
}

#[test]
fn test_track_named_rejects_unknown_types() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let tracker = start(dir.path(), &recorder, NetworkState::new(true));

    assert!(tracker.track_named("video_play", Default::default()).is_some());
    assert_eq!(tracker.track_named("teleport", Default::default()), None);
    assert_eq!(tracker.queue_len(), 1);
}

#[test]
fn test_drop_unloads_session() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    {
        let tracker = start(dir.path(), &recorder, NetworkState::new(true));
        tracker.track(EventType::Click, Default::default()).unwrap();
        tracker.track(EventType::Hover, Default::default()).unwrap();
    }

    let batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    let singles = recorder.singles();
    assert_eq!(singles.len(), 1);
    assert_eq!(singles[0]["event_type"], "session_end");
}

#[test]
fn test_reconnect_flushes_offline_events() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let network = NetworkState::new(true);
    let tracker = start(dir.path(), &recorder, network.clone());

    tracker.set_online(false);
    assert!(!tracker.is_online());
    let id = tracker.track_purchase("5005").unwrap();
    assert_eq!(recorder.attempts(), 0);

    tracker.set_online(true);
    // Barrier: the reconnect flush has run once this returns.
    tracker.queue_len();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(event_id(&batches[0][0]), id);
    assert!(network.is_online());
}

#[test]
fn test_start_delivers_leftovers_from_previous_session() {
    let dir = tempdir().unwrap();
    let first = Recorder::default();
    let id = {
        let tracker = start(dir.path(), &first, NetworkState::new(false));
        tracker.track(EventType::CartAbandon, Default::default()).unwrap()
    };
    assert_eq!(first.attempts(), 0);

    let second = Recorder::default();
    let tracker = start(dir.path(), &second, NetworkState::new(true));
    tracker.queue_len();

    let delivered = second.delivered_ids();
    assert_eq!(delivered[0], id);
    // The earlier session_end was persisted offline too.
    assert_eq!(delivered.len(), 2);
}

#[test]
fn test_cart_and_consent_round_trip_through_worker() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let collector = FakeCollector::default();
    collector.set_cart(Some(cart()));
    let tracker =
        start_with_collector(dir.path(), &recorder, NetworkState::new(true), collector);

    assert_eq!(tracker.get_cart(), Some(cart()));

    let consent = Consent {
        gdpr: GdprConsent {
            required: true,
            consented: true,
            timestamp: None,
        },
        ..Consent::default()
    };
    tracker.set_consent(consent.clone());
    assert_eq!(tracker.consent(), consent);
}

#[test]
fn test_resolve_user_applies_to_later_events() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let tracker = start(dir.path(), &recorder, NetworkState::new(true));

    tracker.track(EventType::CheckoutStart, Default::default()).unwrap();
    tracker.resolve_user("hashed-customer");
    tracker.track(EventType::CheckoutStart, Default::default()).unwrap();
    tracker.queue_len();

    let singles = recorder.singles();
    assert!(singles[0]["user_id"].is_null());
    assert_eq!(singles[1]["user_id"], "hashed-customer");
}

#[test]
fn test_tracking_does_not_wait_for_delivery() {
    let dir = tempdir().unwrap();
    let delay = Duration::from_millis(1000);
    let posts = Arc::new(AtomicUsize::new(0));
    let tracker = Tracker::builder(config(dir.path(), 2))
        .identity(&identity())
        .page(home_page())
        .transport(Box::new(SlowTransport {
            delay,
            posts: posts.clone(),
        }))
        .start()
        .unwrap();

    let started = Instant::now();
    let critical = tracker.track(EventType::CheckoutStart, Default::default());
    tracker.track(EventType::Click, Default::default()).unwrap();
    // Fills the batch of two.
    tracker.track(EventType::Click, Default::default()).unwrap();
    let purchase = tracker.track_purchase("7007");
    let elapsed = started.elapsed();

    assert!(critical.is_some());
    assert!(purchase.is_some());
    assert!(
        elapsed < delay,
        "tracking calls took {elapsed:?}, at least one waited on the transport"
    );

    tracker.queue_len();
    assert_eq!(posts.load(Ordering::SeqCst), 3);
}
