mod collector;
mod config;
mod consent;
mod context;
mod delivery;
mod error;
mod event;
mod ledger;
mod offline;
mod pipeline;
mod queue;
pub mod storage;
mod tracker;
mod transport;

pub use collector::{CartItem, CartSnapshot, NoCollector, OrderFields, PageCollector};
pub use config::{DEFAULT_ENDPOINT, TrackerConfig, TrackerConfigBuilder};
pub use consent::{CcpaConsent, Consent, ConsentStore, GdprConsent, MarketingConsent};
pub use context::{
    DeviceContext, Enricher, Identity, IdentityProvider, MAX_PAGE_LOAD_MS, PageContext, PageType,
    SessionContext, Utm, valid_load_time,
};
pub use delivery::{Delivery, DeliveryEngine, Router};
pub use error::{ConfigError, StorageError, TrackerError, TransportError, UnknownEventType};
pub use event::{Event, EventType, Payload};
pub use ledger::{DEFAULT_LEDGER_CAPACITY, DedupLedger};
pub use offline::OfflineStore;
pub use pipeline::{MAX_STACK_CHARS, Pipeline, ScriptError};
pub use queue::{DEFAULT_BATCH_SIZE, EventQueue};
pub use storage::StorageDir;
pub use tracker::{Tracker, TrackerBuilder};
pub use transport::{Connectivity, HttpTransport, NetworkState, Transport};
