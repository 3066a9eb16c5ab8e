use crate::collector::{CartSnapshot, PageCollector};
use crate::config::TrackerConfig;
use crate::consent::{Consent, ConsentStore};
use crate::context::{Enricher, PageContext, SessionContext};
use crate::delivery::{Delivery, DeliveryEngine, Router};
use crate::event::{Event, EventType, Payload};
use crate::ledger::DedupLedger;
use crate::offline::OfflineStore;
use crate::queue::EventQueue;
use crate::storage::StorageDir;
use crate::transport::{Connectivity, Transport};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;

/// Stack traces attached to `js_error` events are cut to this many
/// characters.
pub const MAX_STACK_CHARS: usize = 500;

/// A script fault observed on the host page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptError {
    pub message: String,
    pub source: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub stack: Option<String>,
    /// e.g. `"promise_rejection"`.
    pub kind: Option<String>,
}

/// The event pipeline of one page session.
///
/// Owns the session context and the consent and ledger stores, and hands
/// admitted events to a [`Router`]. With the default [`DeliveryEngine`]
/// router everything, queue included, is touched from the calling thread
/// only; see [`Tracker`](crate::Tracker) for the threaded wrapper that
/// delivers in the background.
pub struct Pipeline<R = DeliveryEngine> {
    ctx: SessionContext,
    enricher: Enricher,
    consent: ConsentStore,
    ledger: DedupLedger,
    router: R,
    collector: Box<dyn PageCollector>,
    gate_on_consent: bool,
    debug_mode: bool,
}

impl Pipeline<DeliveryEngine> {
    pub fn new(
        config: &TrackerConfig,
        ctx: SessionContext,
        transport: Box<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
        collector: Box<dyn PageCollector>,
    ) -> Self {
        let engine = DeliveryEngine::from_config(config, transport, connectivity);
        Pipeline::with_router(config, ctx, engine, collector)
    }

    pub fn queue(&self) -> &EventQueue {
        self.router.queue()
    }

    pub fn offline(&self) -> &OfflineStore {
        self.router.offline()
    }
}

impl<R: Router> Pipeline<R> {
    pub fn with_router(
        config: &TrackerConfig,
        ctx: SessionContext,
        router: R,
        collector: Box<dyn PageCollector>,
    ) -> Self {
        let storage = StorageDir::new(&config.storage_dir);
        Pipeline {
            ctx,
            enricher: Enricher::new(),
            consent: ConsentStore::new(storage.clone()),
            ledger: DedupLedger::new(storage, config.ledger_capacity),
            router,
            collector,
            gate_on_consent: config.gates_on_consent(),
            debug_mode: config.debug_mode,
        }
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    /// Deliver anything left in the offline store by a previous session.
    pub fn start(&mut self) -> Delivery {
        log::info!(
            "shoptrace: pipeline started for session {} on {} page",
            self.ctx.identity().session_id,
            self.ctx.page().page_type
        );
        self.router.flush_pending()
    }

    /// Build an event from the current context without routing it.
    pub fn build(&mut self, event_type: EventType, payload: Payload) -> Event {
        let consent = self.consent.get();
        self.enricher.enrich(&self.ctx, consent, event_type, payload)
    }

    /// Build an event and route it. Returns the event id, or `None` when
    /// the consent gate suppressed it.
    pub fn track(&mut self, event_type: EventType, payload: Payload) -> Option<String> {
        let event = self.admit(event_type, payload)?;
        Some(self.dispatch(event))
    }

    /// Consent gate, enrichment and session accounting, without routing.
    pub(crate) fn admit(&mut self, event_type: EventType, payload: Payload) -> Option<Event> {
        if self.gate_on_consent && self.consent.get().blocks_tracking() {
            log::warn!("shoptrace: {event_type} not tracked, consent missing");
            return None;
        }

        let event = self.build(event_type, payload);
        self.ctx.count_event(event_type);
        self.log_event(&event);
        Some(event)
    }

    /// Hand an admitted event to the router.
    pub(crate) fn route(&mut self, event: Event) -> Delivery {
        self.router.enqueue(event)
    }

    fn dispatch(&mut self, event: Event) -> String {
        let event_id = event.event_id().to_string();
        self.route(event);
        event_id
    }

    /// Report a purchase for `order_id` at most once per ledger lifetime.
    pub fn track_purchase(&mut self, order_id: &str) -> Option<String> {
        let event = self.purchase_event(order_id)?;
        Some(self.dispatch(event))
    }

    /// Admit a purchase event and record the order in the ledger.
    pub(crate) fn purchase_event(&mut self, order_id: &str) -> Option<Event> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            log::error!("shoptrace: cannot track purchase without an order id");
            return None;
        }

        match self.ledger.is_tracked(order_id) {
            Ok(true) => {
                log::info!("shoptrace: purchase already tracked for order {order_id}");
                return None;
            }
            Ok(false) => {}
            Err(e) => log::warn!("shoptrace: dedup ledger unreadable, tracking anyway: {e}"),
        }

        let payload = self.purchase_payload(order_id);
        let event = self.admit(EventType::Purchase, payload)?;

        if let Err(e) = self.ledger.mark_tracked(order_id) {
            log::warn!("shoptrace: cannot record order {order_id} in dedup ledger: {e}");
        }
        Some(event)
    }

    fn purchase_payload(&mut self, order_id: &str) -> Payload {
        let fields = self.collector.order_fields(order_id).unwrap_or_default();
        let cart = self.ctx.cart();

        let order_total = fields.order_total.or_else(|| {
            cart.map(|c| c.total).filter(|total| *total != 0.0)
        });
        let order_items = if fields.items.is_empty() {
            cart.map(|c| c.items.clone()).unwrap_or_default()
        } else {
            fields.items
        };

        object(json!({
            "order_id": order_id,
            "checkout_completed": true,
            "order_total": order_total,
            "order_items": order_items,
            "order_discount_total": fields.order_discount_total,
            "order_shipping_total": fields.order_shipping_total,
            "cart_id": cart.and_then(|c| c.id.clone()),
            "coupon_code": fields.coupon_code,
            "shipping_method": fields.shipping_method,
            "payment_method_type": fields.payment_method_type,
        }))
    }

    /// Move to a new page, emit `page_view` and refresh the cart.
    pub fn navigate(&mut self, page: PageContext) -> Option<String> {
        let event_id = self
            .page_view_event(page)
            .map(|event| self.dispatch(event));
        self.get_cart();
        event_id
    }

    pub(crate) fn page_view_event(&mut self, page: PageContext) -> Option<Event> {
        self.ctx.navigate(page);
        self.admit(EventType::PageView, Payload::new())
    }

    /// Record the page-load measurement and emit `page_load`. Nothing is
    /// emitted for an out-of-range measurement.
    pub fn page_load(
        &mut self,
        load_ms: f64,
        dom_content_loaded_ms: Option<f64>,
        dom_interactive_ms: Option<f64>,
    ) -> Option<String> {
        let event = self.page_load_event(load_ms, dom_content_loaded_ms, dom_interactive_ms)?;
        Some(self.dispatch(event))
    }

    pub(crate) fn page_load_event(
        &mut self,
        load_ms: f64,
        dom_content_loaded_ms: Option<f64>,
        dom_interactive_ms: Option<f64>,
    ) -> Option<Event> {
        self.ctx.record_page_load(load_ms)?;
        let payload = object(json!({
            "dom_content_loaded": dom_content_loaded_ms.map(f64::round),
            "dom_interactive": dom_interactive_ms.map(f64::round),
        }));
        self.admit(EventType::PageLoad, payload)
    }

    /// Observe a host-page script fault as a `js_error` event.
    pub fn report_error(&mut self, error: ScriptError) -> Option<String> {
        let event = self.script_error_event(error)?;
        Some(self.dispatch(event))
    }

    pub(crate) fn script_error_event(&mut self, error: ScriptError) -> Option<Event> {
        let stack = error
            .stack
            .map(|s| s.chars().take(MAX_STACK_CHARS).collect::<String>());
        let mut payload = object(json!({
            "error_message": error.message,
            "error_source": error.source,
            "error_line": error.line,
            "error_column": error.column,
            "error_stack": stack,
        }));
        if let Some(kind) = error.kind {
            payload.insert("error_type".to_string(), Value::String(kind));
        }
        self.admit(EventType::JsError, payload)
    }

    pub fn resolve_user(&mut self, user_id: impl Into<String>) {
        self.ctx.resolve_user(user_id);
    }

    /// Refresh the cart from the collector. Falls back to the last known
    /// cart when the refresh fails and that cart has items.
    pub fn get_cart(&mut self) -> Option<CartSnapshot> {
        match self.collector.cart_snapshot() {
            Some(cart) => {
                log::debug!(
                    "shoptrace: cart refreshed, {} items, total {}",
                    cart.item_count,
                    cart.total
                );
                self.ctx.set_cart(cart.clone());
                Some(cart)
            }
            None => {
                log::warn!("shoptrace: cart refresh failed");
                self.ctx.cart().filter(|c| c.has_items()).cloned()
            }
        }
    }

    pub fn consent(&self) -> Consent {
        self.consent.get()
    }

    pub fn set_consent(&mut self, consent: Consent) {
        self.consent.set(consent);
    }

    /// Connectivity came back: retry the offline store.
    pub fn on_online(&mut self) -> Delivery {
        self.router.flush_pending()
    }

    pub fn on_offline(&mut self) {
        log::warn!("shoptrace: offline, events will be queued");
    }

    /// Deliver everything waiting in the batch queue.
    pub fn flush(&mut self) -> Delivery {
        self.router.flush()
    }

    /// Page is going away: flush the queue, then send `cart_abandon` (if the
    /// cart has items) and `session_end`, each at most once per session.
    pub fn unload(&mut self) {
        self.router.flush();

        if !self.ctx.cart_abandon_sent {
            if let Some(cart) = self.ctx.cart().filter(|c| c.has_items()).cloned() {
                self.ctx.cart_abandon_sent = true;
                let payload = object(json!({
                    "cart_id": cart.id,
                    "cart_total": cart.total,
                    "cart_items": cart.items,
                    "cart_item_count": cart.item_count,
                }));
                let event = self.build(EventType::CartAbandon, payload);
                self.log_event(&event);
                self.router.send_single(event);
            }
        }

        if !self.ctx.session_end_sent {
            self.ctx.session_end_sent = true;
            let length = (Utc::now() - self.ctx.started_at()).num_seconds().max(0);
            let payload = object(json!({
                "session_length_seconds": length,
                "pages_per_session": self.ctx.page_views(),
                "events_per_session": self.ctx.events_tracked(),
            }));
            let event = self.build(EventType::SessionEnd, payload);
            self.log_event(&event);
            self.router.send_single(event);
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    fn log_event(&self, event: &Event) {
        if self.debug_mode {
            log::info!("shoptrace: event {} {}", event.event_type(), event.event_id());
        } else {
            log::debug!("shoptrace: event {} {}", event.event_type(), event.event_id());
        }
    }
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}
