use crate::collector::{CartSnapshot, NoCollector, PageCollector};
use crate::config::TrackerConfig;
use crate::consent::Consent;
use crate::context::{DeviceContext, Identity, IdentityProvider, PageContext, SessionContext};
use crate::delivery::{Delivery, DeliveryEngine, Router};
use crate::error::TrackerError;
use crate::event::{Event, EventType, Payload};
use crate::pipeline::{Pipeline, ScriptError};
use crate::transport::{Connectivity, HttpTransport, NetworkState, Transport};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

type Reply<T> = Sender<T>;

enum Command {
    Track {
        event_type: EventType,
        payload: Payload,
        reply: Reply<Option<String>>,
    },
    Purchase {
        order_id: String,
        reply: Reply<Option<String>>,
    },
    Navigate {
        page: PageContext,
        reply: Reply<Option<String>>,
    },
    PageLoad {
        load_ms: f64,
        dom_content_loaded_ms: Option<f64>,
        dom_interactive_ms: Option<f64>,
        reply: Reply<Option<String>>,
    },
    ReportError {
        error: ScriptError,
        reply: Reply<Option<String>>,
    },
    ResolveUser(String),
    GetCart(Reply<Option<CartSnapshot>>),
    GetConsent(Reply<Consent>),
    SetConsent(Consent),
    Online,
    Offline,
    Flush,
    Unload,
    QueueLen(Reply<usize>),
    Shutdown,
}

/// Work for the delivery worker, which owns the queue and offline store.
enum Routing {
    Enqueue(Event),
    Single(Event),
    Flush,
    FlushPending,
    QueueLen(Reply<usize>),
}

/// [`Router`] that forwards to the delivery worker without waiting.
struct DeliveryHandle {
    routing: Sender<Routing>,
}

impl DeliveryHandle {
    fn forward(&self, routing: Routing) -> Delivery {
        match self.routing.send(routing) {
            Ok(()) => Delivery::Dispatched,
            Err(_) => {
                log::warn!("shoptrace: delivery worker is gone, dropping work");
                Delivery::Dropped
            }
        }
    }

    fn queue_len(&self, reply: Reply<usize>) {
        self.forward(Routing::QueueLen(reply));
    }
}

impl Router for DeliveryHandle {
    fn enqueue(&mut self, event: Event) -> Delivery {
        self.forward(Routing::Enqueue(event))
    }

    fn send_single(&mut self, event: Event) -> Delivery {
        self.forward(Routing::Single(event))
    }

    fn flush(&mut self) -> Delivery {
        self.forward(Routing::Flush)
    }

    fn flush_pending(&mut self) -> Delivery {
        self.forward(Routing::FlushPending)
    }
}

/// Public handle to a running pipeline.
///
/// Two worker threads sit behind the handle. The pipeline worker admits
/// and enriches events; the delivery worker owns the batch queue and the
/// offline store and is the only thread that talks to the transport. Each
/// is reached through a channel, so queue and storage access never
/// interleave, and tracking calls return once the event is built without
/// waiting for the network.
///
/// Methods never fail: if a worker is gone they return `None` or a default.
/// Dropping the tracker unloads the session (flush, cart abandon, session
/// end), lets the delivery worker drain, and joins both threads.
pub struct Tracker {
    commands: Sender<Command>,
    network: Arc<NetworkState>,
    worker: Option<JoinHandle<()>>,
    delivery: Option<JoinHandle<()>>,
}

impl Tracker {
    pub fn builder(config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder {
            config,
            identity: None,
            page: None,
            device: DeviceContext::default(),
            transport: None,
            collector: Box::new(NoCollector),
            network: None,
        }
    }

    /// Track an event. Returns its id, or `None` if it was suppressed.
    pub fn track(&self, event_type: EventType, payload: Payload) -> Option<String> {
        self.request(|reply| Command::Track {
            event_type,
            payload,
            reply,
        })
        .flatten()
    }

    /// Track an event by its wire name. Unknown names are rejected.
    pub fn track_named(&self, event_type: &str, payload: Payload) -> Option<String> {
        match event_type.parse() {
            Ok(event_type) => self.track(event_type, payload),
            Err(e) => {
                log::warn!("shoptrace: {e}");
                None
            }
        }
    }

    /// Report a purchase, suppressed if the order was already reported.
    pub fn track_purchase(&self, order_id: impl Into<String>) -> Option<String> {
        let order_id = order_id.into();
        self.request(|reply| Command::Purchase { order_id, reply })
            .flatten()
    }

    pub fn navigate(&self, page: PageContext) -> Option<String> {
        self.request(|reply| Command::Navigate { page, reply })
            .flatten()
    }

    pub fn page_load(
        &self,
        load_ms: f64,
        dom_content_loaded_ms: Option<f64>,
        dom_interactive_ms: Option<f64>,
    ) -> Option<String> {
        self.request(|reply| Command::PageLoad {
            load_ms,
            dom_content_loaded_ms,
            dom_interactive_ms,
            reply,
        })
        .flatten()
    }

    pub fn report_error(&self, error: ScriptError) -> Option<String> {
        self.request(|reply| Command::ReportError { error, reply })
            .flatten()
    }

    /// Identity resolution finished; later events carry `user_id`.
    pub fn resolve_user(&self, user_id: impl Into<String>) {
        self.send(Command::ResolveUser(user_id.into()));
    }

    /// Refresh and return the cart, or `None` if it is unknown.
    pub fn get_cart(&self) -> Option<CartSnapshot> {
        self.request(Command::GetCart).flatten()
    }

    pub fn consent(&self) -> Consent {
        self.request(Command::GetConsent).unwrap_or_default()
    }

    pub fn set_consent(&self, consent: Consent) {
        self.send(Command::SetConsent(consent));
    }

    /// Connectivity changed. Going online retries the offline store.
    pub fn set_online(&self, online: bool) {
        self.network.set_online(online);
        self.send(if online { Command::Online } else { Command::Offline });
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Run the page-unload sequence without stopping the worker.
    pub fn unload(&self) {
        self.send(Command::Unload);
    }

    /// Events waiting in the batch queue. Also acts as a barrier: every
    /// command sent before it has been processed, and every resulting
    /// delivery attempted, when it returns.
    pub fn queue_len(&self) -> usize {
        self.request(Command::QueueLen).unwrap_or_default()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("shoptrace: pipeline worker is gone, command dropped");
        }
    }

    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Option<T> {
        let (tx, rx) = mpsc::channel();
        self.send(command(tx));
        rx.recv().ok()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        // The delivery worker stops once the pipeline worker drops its handle.
        let workers = [
            ("pipeline", self.worker.take()),
            ("delivery", self.delivery.take()),
        ];
        for (name, worker) in workers {
            if let Some(worker) = worker {
                if worker.join().is_err() {
                    log::error!("shoptrace: {name} worker panicked");
                }
            }
        }
    }
}

/// Builder for [`Tracker`].
pub struct TrackerBuilder {
    config: TrackerConfig,
    identity: Option<Identity>,
    page: Option<PageContext>,
    device: DeviceContext,
    transport: Option<Box<dyn Transport>>,
    collector: Box<dyn PageCollector>,
    network: Option<Arc<NetworkState>>,
}

impl TrackerBuilder {
    pub fn identity(mut self, provider: &dyn IdentityProvider) -> Self {
        self.identity = Some(provider.identity());
        self
    }

    pub fn page(mut self, page: PageContext) -> Self {
        self.page = Some(page);
        self
    }

    pub fn device(mut self, device: DeviceContext) -> Self {
        self.device = device;
        self
    }

    /// Use a custom transport instead of HTTP to the configured endpoint.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn collector(mut self, collector: Box<dyn PageCollector>) -> Self {
        self.collector = collector;
        self
    }

    /// Share a connectivity flag with the host. Defaults to online.
    pub fn network(mut self, network: Arc<NetworkState>) -> Self {
        self.network = Some(network);
        self
    }

    /// Spawn the worker and deliver any events left offline by an earlier
    /// session.
    pub fn start(self) -> Result<Tracker, TrackerError> {
        self.config.validate()?;

        let transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new(
                self.config.endpoint_url()?,
                self.config.request_timeout(),
            )?),
        };
        let network = self.network.unwrap_or_else(|| NetworkState::new(true));
        let identity = self.identity.unwrap_or_else(|| Identity {
            store_id: String::new(),
            session_id: format!("sess_{}", uuid::Uuid::new_v4().simple()),
            anonymous_id: format!("anon_{}", uuid::Uuid::new_v4().simple()),
            user_id: None,
        });
        let page = self
            .page
            .unwrap_or_else(|| PageContext::from_url("about:blank", None));

        let connectivity: Arc<dyn Connectivity> = network.clone();
        let engine = DeliveryEngine::from_config(&self.config, transport, connectivity);
        let (routing, routing_rx) = mpsc::channel();
        let delivery = thread::Builder::new()
            .name("shoptrace-delivery".to_string())
            .spawn(move || deliver(engine, routing_rx))
            .map_err(TrackerError::Spawn)?;

        let ctx = SessionContext::initialize(&identity, page, self.device);
        let mut pipeline = Pipeline::with_router(
            &self.config,
            ctx,
            DeliveryHandle { routing },
            self.collector,
        );

        let (commands, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("shoptrace-pipeline".to_string())
            .spawn(move || {
                pipeline.start();
                run(pipeline, rx);
            })
            .map_err(TrackerError::Spawn)?;

        Ok(Tracker {
            commands,
            network,
            worker: Some(worker),
            delivery: Some(delivery),
        })
    }
}

fn deliver(mut engine: DeliveryEngine, routing: Receiver<Routing>) {
    for work in routing {
        match work {
            Routing::Enqueue(event) => {
                engine.enqueue(event);
            }
            Routing::Single(event) => {
                engine.send_single(event);
            }
            Routing::Flush => {
                engine.flush();
            }
            Routing::FlushPending => {
                engine.flush_pending();
            }
            Routing::QueueLen(reply) => {
                let _ = reply.send(engine.queue().len());
            }
        }
    }
}

/// Answer the caller with the event id, then route the event.
fn reply_then_route(
    pipeline: &mut Pipeline<DeliveryHandle>,
    event: Option<Event>,
    reply: Reply<Option<String>>,
) {
    let _ = reply.send(event.as_ref().map(|e| e.event_id().to_string()));
    if let Some(event) = event {
        pipeline.route(event);
    }
}

fn run(mut pipeline: Pipeline<DeliveryHandle>, commands: Receiver<Command>) {
    // Replies are best effort: the caller may have stopped waiting.
    for command in commands {
        match command {
            Command::Track {
                event_type,
                payload,
                reply,
            } => {
                let event = pipeline.admit(event_type, payload);
                reply_then_route(&mut pipeline, event, reply);
            }
            Command::Purchase { order_id, reply } => {
                let event = pipeline.purchase_event(&order_id);
                reply_then_route(&mut pipeline, event, reply);
            }
            Command::Navigate { page, reply } => {
                let event = pipeline.page_view_event(page);
                reply_then_route(&mut pipeline, event, reply);
                pipeline.get_cart();
            }
            Command::PageLoad {
                load_ms,
                dom_content_loaded_ms,
                dom_interactive_ms,
                reply,
            } => {
                let event =
                    pipeline.page_load_event(load_ms, dom_content_loaded_ms, dom_interactive_ms);
                reply_then_route(&mut pipeline, event, reply);
            }
            Command::ReportError { error, reply } => {
                let event = pipeline.script_error_event(error);
                reply_then_route(&mut pipeline, event, reply);
            }
            Command::ResolveUser(user_id) => pipeline.resolve_user(user_id),
            Command::GetCart(reply) => {
                let _ = reply.send(pipeline.get_cart());
            }
            Command::GetConsent(reply) => {
                let _ = reply.send(pipeline.consent());
            }
            Command::SetConsent(consent) => pipeline.set_consent(consent),
            Command::Online => {
                pipeline.on_online();
            }
            Command::Offline => pipeline.on_offline(),
            Command::Flush => {
                pipeline.flush();
            }
            Command::Unload => pipeline.unload(),
            Command::QueueLen(reply) => pipeline.router().queue_len(reply),
            Command::Shutdown => {
                pipeline.unload();
                break;
            }
        }
    }
}
