use crate::consent::Consent;
use crate::context::{PageType, Utm};
use crate::error::UnknownEventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Flat mapping of field name to value supplied alongside an event type.
pub type Payload = Map<String, Value>;

/// The closed vocabulary of telemetry events.
///
/// Serialized in snake_case, e.g. `EventType::AddToCart` is `"add_to_cart"`.
///
/// ```
/// use shoptrace::EventType;
///
/// let kind: EventType = "3d_view_opened".parse().unwrap();
/// assert_eq!(kind, EventType::ThreeDViewOpened);
/// assert!(EventType::Purchase.is_critical());
/// assert!(!EventType::Click.is_critical());
/// assert!("not_an_event".parse::<EventType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    ProductView,
    ProductImpression,
    AddToCart,
    RemoveFromCart,
    CartQuantityIncrease,
    CartQuantityDecrease,
    CartUpdate,
    CartAbandon,
    CheckoutStart,
    CheckoutStep,
    Purchase,
    Search,
    Scroll,
    TimeOnPage,
    Click,
    Hover,
    VideoPlay,
    AddToWishlist,
    ProductImageZoom,
    SizeChartView,
    ReviewClick,
    ChatInteraction,
    #[serde(rename = "3d_view_opened")]
    ThreeDViewOpened,
    ReturnInitiated,
    CustomerLoggedIn,
    CustomerCreated,
    CustomerLoggedOut,
    AddressAdded,
    SubscriptionStarted,
    SubscriptionCancelled,
    PageLoad,
    JsError,
    SessionEnd,
}

impl EventType {
    pub const ALL: [EventType; 34] = [
        EventType::PageView,
        EventType::ProductView,
        EventType::ProductImpression,
        EventType::AddToCart,
        EventType::RemoveFromCart,
        EventType::CartQuantityIncrease,
        EventType::CartQuantityDecrease,
        EventType::CartUpdate,
        EventType::CartAbandon,
        EventType::CheckoutStart,
        EventType::CheckoutStep,
        EventType::Purchase,
        EventType::Search,
        EventType::Scroll,
        EventType::TimeOnPage,
        EventType::Click,
        EventType::Hover,
        EventType::VideoPlay,
        EventType::AddToWishlist,
        EventType::ProductImageZoom,
        EventType::SizeChartView,
        EventType::ReviewClick,
        EventType::ChatInteraction,
        EventType::ThreeDViewOpened,
        EventType::ReturnInitiated,
        EventType::CustomerLoggedIn,
        EventType::CustomerCreated,
        EventType::CustomerLoggedOut,
        EventType::AddressAdded,
        EventType::SubscriptionStarted,
        EventType::SubscriptionCancelled,
        EventType::PageLoad,
        EventType::JsError,
        EventType::SessionEnd,
    ];

    /// Wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::ProductView => "product_view",
            EventType::ProductImpression => "product_impression",
            EventType::AddToCart => "add_to_cart",
            EventType::RemoveFromCart => "remove_from_cart",
            EventType::CartQuantityIncrease => "cart_quantity_increase",
            EventType::CartQuantityDecrease => "cart_quantity_decrease",
            EventType::CartUpdate => "cart_update",
            EventType::CartAbandon => "cart_abandon",
            EventType::CheckoutStart => "checkout_start",
            EventType::CheckoutStep => "checkout_step",
            EventType::Purchase => "purchase",
            EventType::Search => "search",
            EventType::Scroll => "scroll",
            EventType::TimeOnPage => "time_on_page",
            EventType::Click => "click",
            EventType::Hover => "hover",
            EventType::VideoPlay => "video_play",
            EventType::AddToWishlist => "add_to_wishlist",
            EventType::ProductImageZoom => "product_image_zoom",
            EventType::SizeChartView => "size_chart_view",
            EventType::ReviewClick => "review_click",
            EventType::ChatInteraction => "chat_interaction",
            EventType::ThreeDViewOpened => "3d_view_opened",
            EventType::ReturnInitiated => "return_initiated",
            EventType::CustomerLoggedIn => "customer_logged_in",
            EventType::CustomerCreated => "customer_created",
            EventType::CustomerLoggedOut => "customer_logged_out",
            EventType::AddressAdded => "address_added",
            EventType::SubscriptionStarted => "subscription_started",
            EventType::SubscriptionCancelled => "subscription_cancelled",
            EventType::PageLoad => "page_load",
            EventType::JsError => "js_error",
            EventType::SessionEnd => "session_end",
        }
    }

    /// Critical events skip the batch queue and go straight to the
    /// single-event delivery path.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            EventType::Purchase | EventType::CheckoutStart | EventType::CartAbandon
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Field names owned by the event envelope. Payload keys with these names
/// are discarded during enrichment so the flat record never carries a key
/// twice.
pub(crate) const ENVELOPE_FIELDS: &[&str] = &[
    "event_id",
    "event_type",
    "timestamp",
    "store_id",
    "session_id",
    "user_id",
    "anonymous_id",
    "consent",
    "page_type",
    "page_url",
    "referrer",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "browser",
    "device_type",
    "os",
    "screen_resolution",
    "local_time_zone",
    "page_load_time_ms",
];

/// An immutable telemetry record.
///
/// Events are produced by [`Enricher::enrich`](crate::Enricher::enrich) and
/// serialize as one flat JSON object: the envelope fields followed by the
/// type-specific payload. There is no way to mutate an event after it has
/// been constructed; fields are exposed through accessors only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    event_id: String,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    store_id: String,
    session_id: String,
    user_id: Option<String>,
    anonymous_id: String,
    consent: Consent,
    page_type: PageType,
    page_url: String,
    referrer: Option<String>,
    #[serde(flatten)]
    utm: Utm,
    browser: String,
    device_type: String,
    os: String,
    screen_resolution: Option<String>,
    local_time_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page_load_time_ms: Option<u64>,
    // Must stay after `utm`: flattened structs claim their keys first and the
    // payload receives whatever is left.
    #[serde(flatten)]
    payload: Payload,
}

/// Everything an [`Event`] is assembled from, gathered by the enricher.
pub(crate) struct EventParts {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub store_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub anonymous_id: String,
    pub consent: Consent,
    pub page_type: PageType,
    pub page_url: String,
    pub referrer: Option<String>,
    pub utm: Utm,
    pub browser: String,
    pub device_type: String,
    pub os: String,
    pub screen_resolution: Option<String>,
    pub local_time_zone: Option<String>,
    pub page_load_time_ms: Option<u64>,
    pub payload: Payload,
}

impl Event {
    pub(crate) fn from_parts(parts: EventParts) -> Self {
        Event {
            event_id: parts.event_id,
            event_type: parts.event_type,
            timestamp: parts.timestamp,
            store_id: parts.store_id,
            session_id: parts.session_id,
            user_id: parts.user_id,
            anonymous_id: parts.anonymous_id,
            consent: parts.consent,
            page_type: parts.page_type,
            page_url: parts.page_url,
            referrer: parts.referrer,
            utm: parts.utm,
            browser: parts.browser,
            device_type: parts.device_type,
            os: parts.os,
            screen_resolution: parts.screen_resolution,
            local_time_zone: parts.local_time_zone,
            page_load_time_ms: parts.page_load_time_ms,
            payload: parts.payload,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Resolved user id, `None` for events built before identity
    /// resolution completed.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }

    /// Consent state captured when the event was built.
    pub fn consent(&self) -> &Consent {
        &self.consent
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    pub fn utm(&self) -> &Utm {
        &self.utm
    }

    pub fn browser(&self) -> &str {
        &self.browser
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn screen_resolution(&self) -> Option<&str> {
        self.screen_resolution.as_deref()
    }

    pub fn local_time_zone(&self) -> Option<&str> {
        self.local_time_zone.as_deref()
    }

    pub fn page_load_time_ms(&self) -> Option<u64> {
        self.page_load_time_ms
    }

    /// The type-specific fields merged into this record.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Look up a payload field. Missing fields and explicit nulls both
    /// return `None`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name).filter(|v| !v.is_null())
    }
}
