use crate::error::StorageError;
use crate::storage::StorageDir;
use serde::{Deserialize, Serialize};

const CONSENT_DOC: &str = "consent.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GdprConsent {
    pub required: bool,
    pub consented: bool,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcpaConsent {
    pub required: bool,
    pub opted_out: bool,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketingConsent {
    pub opted_in: bool,
    pub timestamp: Option<String>,
}

/// GDPR/CCPA/marketing consent state.
///
/// Every section defaults to "not required, not given". Stored documents may
/// carry only some sections; missing ones fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Consent {
    pub gdpr: GdprConsent,
    pub ccpa: CcpaConsent,
    pub marketing: MarketingConsent,
}

impl Consent {
    /// Whether GDPR blocks tracking for this state. Only consulted when the
    /// tracker is configured to require consent.
    pub fn blocks_tracking(&self) -> bool {
        self.gdpr.required && !self.gdpr.consented
    }
}

/// Reads and writes the consent document, falling back to memory when
/// durable storage is unavailable.
#[derive(Debug)]
pub struct ConsentStore {
    storage: StorageDir,
    fallback: Option<Consent>,
}

impl ConsentStore {
    pub fn new(storage: StorageDir) -> Self {
        ConsentStore {
            storage,
            fallback: None,
        }
    }

    /// Current consent state. Never fails: corrupt data reads as the
    /// defaults, unavailable storage reads the in-memory fallback.
    pub fn get(&self) -> Consent {
        match self.storage.load_document::<Consent>(CONSENT_DOC) {
            Ok(Some(consent)) => consent,
            Ok(None) => self.fallback.clone().unwrap_or_default(),
            Err(StorageError::Corrupt(e)) => {
                log::warn!("shoptrace: stored consent is corrupt, using defaults: {e}");
                Consent::default()
            }
            Err(StorageError::Unavailable(_)) => self.fallback.clone().unwrap_or_default(),
        }
    }

    /// Persist a new consent state for future reads.
    pub fn set(&mut self, consent: Consent) {
        if let Err(e) = self.storage.save_document(CONSENT_DOC, &consent) {
            log::warn!("shoptrace: cannot save consent, keeping it in memory: {e}");
            self.fallback = Some(consent);
        }
    }
}
