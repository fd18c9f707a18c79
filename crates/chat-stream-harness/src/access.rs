//! Access resolution and vendor rate limiting.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::errors::HarnessError;
use crate::model::{ModelSettings, VendorId};

/// Credentials and endpoint used to reach a vendor.
#[derive(Clone, Default)]
pub struct VendorAccess {
    pub api_host: Option<String>,
    pub api_key: Option<String>,
    /// Vendor-specific extras (organization ids, regions, ...).
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for VendorAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorAccess")
            .field("api_host", &self.api_host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("extra", &self.extra)
            .finish()
    }
}

/// Vendor routing for a resolved model.
#[derive(Clone)]
pub struct VendorRoute {
    pub id: VendorId,
    /// Awaited before every request to this vendor, when present.
    pub rate_limiter: Option<Arc<dyn VendorRateLimiter>>,
}

impl VendorRoute {
    pub fn new(id: impl Into<VendorId>) -> Self {
        Self {
            id: id.into(),
            rate_limiter: None,
        }
    }

    pub fn rate_limiter(mut self, limiter: Arc<dyn VendorRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

impl fmt::Debug for VendorRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorRoute")
            .field("id", &self.id)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

/// Everything needed to issue a request for one model.
#[derive(Clone, Debug)]
pub struct ResolvedAccess {
    pub access: VendorAccess,
    pub settings: ModelSettings,
    pub vendor: VendorRoute,
}

/// Resolves a model identifier to credentials, settings and vendor routing.
#[async_trait::async_trait]
pub trait AccessResolver: Send + Sync {
    async fn resolve(&self, model_id: &str) -> Result<ResolvedAccess, HarnessError>;
}

/// Vendor-imposed request pacing.
#[async_trait::async_trait]
pub trait VendorRateLimiter: Send + Sync {
    /// Waits until a request for `model_id` may be issued.
    async fn acquire(&self, model_id: &str, settings: &ModelSettings);
}

/// Rate limiter that spaces requests to one vendor by a fixed interval.
///
/// Concurrent callers reserve consecutive slots, so a burst of `n` requests
/// is spread over `n - 1` intervals.
pub struct IntervalRateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl IntervalRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Limiter allowing at most `requests` per minute.
    pub fn per_minute(requests: u32) -> Self {
        Self::new(Duration::from_secs(60) / requests.max(1))
    }

    fn reserve(&self) -> SlotReservation<'_> {
        let mut next = self.lock_next_slot();
        let now = Instant::now();
        let slot = next.map_or(now, |at| at.max(now));
        *next = Some(slot + self.min_interval);
        SlotReservation {
            limiter: self,
            slot,
            used: false,
        }
    }

    fn lock_next_slot(&self) -> MutexGuard<'_, Option<Instant>> {
        self.next_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved request slot; dropping it unused hands the slot back.
struct SlotReservation<'a> {
    limiter: &'a IntervalRateLimiter,
    slot: Instant,
    used: bool,
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.used {
            return;
        }
        let mut next = self.limiter.lock_next_slot();
        // Only the latest reservation can be handed back; earlier ones are
        // already followed by other callers' slots.
        if *next == Some(self.slot + self.limiter.min_interval) {
            *next = Some(self.slot);
        }
    }
}

#[async_trait::async_trait]
impl VendorRateLimiter for IntervalRateLimiter {
    /// Cancel-safe: a caller dropped while waiting releases its slot.
    async fn acquire(&self, model_id: &str, _settings: &ModelSettings) {
        let mut reservation = self.reserve();
        if reservation.slot > Instant::now() {
            let wait_ms =
                u64::try_from((reservation.slot - Instant::now()).as_millis()).unwrap_or(u64::MAX);
            debug!(model = model_id, wait_ms, "waiting for vendor rate limit");
            tokio::time::sleep_until(reservation.slot).await;
        }
        reservation.used = true;
    }
}
