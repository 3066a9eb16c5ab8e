//! Ambient context attached to every event: identity, page, device, UTM
//! attribution and page-load timing.
//!
//! [`SessionContext`] holds this state explicitly for one pipeline and is
//! updated through its lifecycle methods. [`Enricher`] reads it when an
//! event is built.

use crate::collector::CartSnapshot;
use crate::consent::Consent;
use crate::event::{ENVELOPE_FIELDS, Event, EventParts, EventType, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Upper bound (inclusive) for a believable page-load measurement.
pub const MAX_PAGE_LOAD_MS: f64 = 300_000.0;

/// Filter a raw page-load measurement.
///
/// Values in `(0, 300000]` milliseconds are kept and rounded; zero, negative,
/// non-finite and oversized values are treated as absent, as is anything
/// that rounds down to zero.
///
/// ```
/// use shoptrace::valid_load_time;
///
/// assert_eq!(valid_load_time(1500.0), Some(1500));
/// assert_eq!(valid_load_time(0.0), None);
/// assert_eq!(valid_load_time(0.3), None);
/// assert_eq!(valid_load_time(-5.0), None);
/// assert_eq!(valid_load_time(400_000.0), None);
/// ```
pub fn valid_load_time(ms: f64) -> Option<u64> {
    if ms.is_finite() && ms > 0.0 && ms <= MAX_PAGE_LOAD_MS {
        Some(ms.round() as u64).filter(|ms| *ms > 0)
    } else {
        None
    }
}

/// Identity snapshot. `user_id` stays `None` until resolution completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub store_id: String,
    pub session_id: String,
    pub anonymous_id: String,
    pub user_id: Option<String>,
}

/// Source of identity. Session and anonymous id lifecycles are managed by
/// the implementor.
pub trait IdentityProvider {
    fn identity(&self) -> Identity;
}

impl IdentityProvider for Identity {
    fn identity(&self) -> Identity {
        self.clone()
    }
}

/// Coarse classification of a storefront page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Home,
    Collection,
    Product,
    Cart,
    Checkout,
    OrderConfirmation,
    OrderStatus,
    Search,
    Blog,
    Account,
    Other,
}

impl PageType {
    pub fn as_str(self) -> &'static str {
        match self {
            PageType::Home => "home",
            PageType::Collection => "collection",
            PageType::Product => "product",
            PageType::Cart => "cart",
            PageType::Checkout => "checkout",
            PageType::OrderConfirmation => "order_confirmation",
            PageType::OrderStatus => "order_status",
            PageType::Search => "search",
            PageType::Blog => "blog",
            PageType::Account => "account",
            PageType::Other => "other",
        }
    }

    /// Classify a page from its URL alone.
    ///
    /// ```
    /// use shoptrace::PageType;
    ///
    /// assert_eq!(PageType::classify("https://shop.example/"), PageType::Home);
    /// assert_eq!(
    ///     PageType::classify("https://shop.example/products/blue-shirt"),
    ///     PageType::Product
    /// );
    /// assert_eq!(
    ///     PageType::classify("https://checkout.shopify.com/123/thank_you"),
    ///     PageType::OrderConfirmation
    /// );
    /// ```
    pub fn classify(url: &str) -> PageType {
        let Ok(url) = Url::parse(url) else {
            return PageType::Other;
        };
        let host = url.host_str().unwrap_or_default().to_lowercase();
        let path = url.path().to_lowercase();
        let has_query = |key: &str| url.query_pairs().any(|(k, _)| k == key);

        if host.contains("checkout") {
            if path.contains("thank_you")
                || path.contains("thank-you")
                || path.contains("success")
                || has_query("order")
            {
                return PageType::OrderConfirmation;
            }
            return PageType::Checkout;
        }

        if path.contains("/thank_you")
            || path.contains("/thank-you")
            || path.contains("/success")
            || path.contains("/order-confirmation")
            || has_query("order")
            || has_query("checkout_id")
        {
            return PageType::OrderConfirmation;
        }

        match path.as_str() {
            "/" | "/index" => PageType::Home,
            p if p.contains("/collections/") => PageType::Collection,
            p if p.contains("/products/") => PageType::Product,
            p if p.contains("/cart") => PageType::Cart,
            p if p.contains("/checkout") => PageType::Checkout,
            p if p.contains("/orders/") => PageType::OrderStatus,
            p if p.contains("/search") => PageType::Search,
            p if p.contains("/blogs/") || p.contains("/blog/") => PageType::Blog,
            p if p.contains("/account") => PageType::Account,
            _ => PageType::Other,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UTM attribution parameters. Each is `None` when absent or empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Utm {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
}

impl Utm {
    /// Read UTM parameters from a URL's query string. The first occurrence
    /// of a repeated key wins.
    pub fn from_url(url: &str) -> Utm {
        let Ok(url) = Url::parse(url) else {
            return Utm::default();
        };
        let get = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        };
        Utm {
            utm_source: get("utm_source"),
            utm_medium: get("utm_medium"),
            utm_campaign: get("utm_campaign"),
            utm_term: get("utm_term"),
            utm_content: get("utm_content"),
        }
    }
}

/// The page currently being viewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub page_type: PageType,
    pub url: String,
    pub referrer: Option<String>,
    pub title: Option<String>,
}

impl PageContext {
    /// Build a page context, classifying the page from its URL. An empty
    /// referrer is stored as `None`.
    pub fn from_url(url: impl Into<String>, referrer: Option<String>) -> Self {
        let url = url.into();
        PageContext {
            page_type: PageType::classify(&url),
            url,
            referrer: referrer.filter(|r| !r.is_empty()),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Browser, OS and screen classification of the visitor's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub browser: String,
    pub os: String,
    pub device_type: String,
    pub screen_resolution: Option<String>,
    pub local_time_zone: Option<String>,
}

impl Default for DeviceContext {
    fn default() -> Self {
        DeviceContext {
            browser: "unknown".to_string(),
            os: "unknown".to_string(),
            device_type: "desktop".to_string(),
            screen_resolution: None,
            local_time_zone: None,
        }
    }
}

impl DeviceContext {
    /// Classify a user-agent string.
    ///
    /// ```
    /// use shoptrace::DeviceContext;
    ///
    /// let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
    ///           AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    /// let device = DeviceContext::from_user_agent(ua, Some((390, 844)), None);
    /// assert_eq!(device.browser, "safari");
    /// assert_eq!(device.os, "ios");
    /// assert_eq!(device.device_type, "mobile");
    /// assert_eq!(device.screen_resolution.as_deref(), Some("390x844"));
    /// ```
    pub fn from_user_agent(
        user_agent: &str,
        screen: Option<(u32, u32)>,
        local_time_zone: Option<String>,
    ) -> Self {
        let ua = user_agent;
        let browser = if ua.contains("Edg") {
            "edge"
        } else if ua.contains("Opera") || ua.contains("OPR") {
            "opera"
        } else if ua.contains("Chrome") {
            "chrome"
        } else if ua.contains("Firefox") {
            "firefox"
        } else if ua.contains("Safari") {
            "safari"
        } else {
            "unknown"
        };

        // Mobile agents also claim "Linux" or "Mac OS X", so they go first.
        let os = if ua.contains("Android") {
            "android"
        } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
            "ios"
        } else if ua.contains("Windows") {
            "windows"
        } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
            "macos"
        } else if ua.contains("Linux") {
            "linux"
        } else {
            "unknown"
        };

        let lower = ua.to_lowercase();
        let device_type = if lower.contains("tablet") || lower.contains("ipad") {
            "tablet"
        } else if lower.contains("mobi") || lower.contains("android") || lower.contains("iphone") {
            "mobile"
        } else {
            "desktop"
        };

        DeviceContext {
            browser: browser.to_string(),
            os: os.to_string(),
            device_type: device_type.to_string(),
            screen_resolution: screen.map(|(w, h)| format!("{w}x{h}")),
            local_time_zone,
        }
    }
}

/// Explicit ambient state of one pipeline.
///
/// Owned by the pipeline and reset on a full reload; nothing here is
/// persisted.
#[derive(Debug, Clone)]
pub struct SessionContext {
    identity: Identity,
    page: PageContext,
    device: DeviceContext,
    page_load_time_ms: Option<u64>,
    cart: Option<CartSnapshot>,
    started_at: DateTime<Utc>,
    page_views: u64,
    events_tracked: u64,
    pub(crate) cart_abandon_sent: bool,
    pub(crate) session_end_sent: bool,
}

impl SessionContext {
    /// Start a session for the given page and device.
    pub fn initialize(
        identity: &dyn IdentityProvider,
        page: PageContext,
        device: DeviceContext,
    ) -> Self {
        SessionContext {
            identity: identity.identity(),
            page,
            device,
            page_load_time_ms: None,
            cart: None,
            started_at: Utc::now(),
            page_views: 0,
            events_tracked: 0,
            cart_abandon_sent: false,
            session_end_sent: false,
        }
    }

    /// Switch to a new page. The previous page's load measurement no longer
    /// applies and is cleared.
    pub fn navigate(&mut self, page: PageContext) {
        self.page = page;
        self.page_load_time_ms = None;
    }

    /// Attach a resolved user id. Only events built afterwards carry it.
    pub fn resolve_user(&mut self, user_id: impl Into<String>) {
        self.identity.user_id = Some(user_id.into());
    }

    /// Record a page-load measurement if it is in range. Returns the stored
    /// value.
    pub fn record_page_load(&mut self, ms: f64) -> Option<u64> {
        let valid = valid_load_time(ms);
        if valid.is_some() {
            self.page_load_time_ms = valid;
        }
        valid
    }

    pub fn set_cart(&mut self, cart: CartSnapshot) {
        self.cart = Some(cart);
    }

    pub(crate) fn count_event(&mut self, event_type: EventType) {
        self.events_tracked += 1;
        if event_type == EventType::PageView {
            self.page_views += 1;
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn page_load_time_ms(&self) -> Option<u64> {
        self.page_load_time_ms
    }

    /// Last known cart, if any refresh has succeeded.
    pub fn cart(&self) -> Option<&CartSnapshot> {
        self.cart.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn page_views(&self) -> u64 {
        self.page_views
    }

    pub fn events_tracked(&self) -> u64 {
        self.events_tracked
    }
}

/// Builds [`Event`]s from an event type, a payload fragment and the current
/// [`SessionContext`].
///
/// Payload keys that name envelope fields are discarded. A payload-supplied
/// `page_load_time_ms` is used only when the session has no measurement of
/// its own, and goes through the same range filter.
#[derive(Debug, Default)]
pub struct Enricher {
    last_timestamp: Option<DateTime<Utc>>,
}

impl Enricher {
    pub fn new() -> Self {
        Enricher::default()
    }

    /// Construct an event. Never fails; unavailable context is null.
    pub fn enrich(
        &mut self,
        ctx: &SessionContext,
        consent: Consent,
        event_type: EventType,
        mut payload: Payload,
    ) -> Event {
        let payload_load_time = payload
            .remove("page_load_time_ms")
            .and_then(|v| v.as_f64())
            .and_then(valid_load_time);
        payload.retain(|key, _| {
            let reserved = ENVELOPE_FIELDS.contains(&key.as_str());
            if reserved {
                log::debug!("shoptrace: payload field {key:?} shadows an envelope field, dropped");
            }
            !reserved
        });

        let identity = &ctx.identity;
        let page = &ctx.page;
        let device = &ctx.device;

        Event::from_parts(EventParts {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: self.next_timestamp(),
            store_id: identity.store_id.clone(),
            session_id: identity.session_id.clone(),
            user_id: identity.user_id.clone(),
            anonymous_id: identity.anonymous_id.clone(),
            consent,
            page_type: page.page_type,
            page_url: page.url.clone(),
            referrer: page.referrer.clone(),
            utm: Utm::from_url(&page.url),
            browser: device.browser.clone(),
            device_type: device.device_type.clone(),
            os: device.os.clone(),
            screen_resolution: device.screen_resolution.clone(),
            local_time_zone: device.local_time_zone.clone(),
            page_load_time_ms: ctx.page_load_time_ms.or(payload_load_time),
            payload,
        })
    }

    // Millisecond precision, never earlier than the previous event.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utm_empty_values_are_absent() {
        let utm = Utm::from_url("https://shop.example/?utm_source=news&utm_medium=&utm_source=ads");
        assert_eq!(utm.utm_source.as_deref(), Some("news"));
        assert_eq!(utm.utm_medium, None);
        assert_eq!(utm.utm_campaign, None);
    }

    #[test]
    fn classify_order_confirmation_by_query() {
        assert_eq!(
            PageType::classify("https://shop.example/pages/done?checkout_id=9"),
            PageType::OrderConfirmation
        );
        assert_eq!(
            PageType::classify("https://checkout.shop.example/c/abc"),
            PageType::Checkout
        );
        assert_eq!(PageType::classify("not a url"), PageType::Other);
    }

    #[test]
    fn android_is_not_linux() {
        let ua = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 \
                  (KHTML, like Gecko) Chrome/124.0 Mobile Safari/537.36";
        let device = DeviceContext::from_user_agent(ua, None, None);
        assert_eq!(device.os, "android");
        assert_eq!(device.browser, "chrome");
        assert_eq!(device.device_type, "mobile");
    }

    #[test]
    fn out_of_range_measurement_keeps_previous() {
        let identity = Identity {
            store_id: "s".into(),
            session_id: "sess".into(),
            anonymous_id: "anon".into(),
            user_id: None,
        };
        let mut ctx = SessionContext::initialize(
            &identity,
            PageContext::from_url("https://shop.example/", None),
            DeviceContext::default(),
        );
        assert_eq!(ctx.record_page_load(900.0), Some(900));
        assert_eq!(ctx.record_page_load(-1.0), None);
        assert_eq!(ctx.page_load_time_ms(), Some(900));

        ctx.navigate(PageContext::from_url("https://shop.example/cart", None));
        assert_eq!(ctx.page_load_time_ms(), None);
    }
}
