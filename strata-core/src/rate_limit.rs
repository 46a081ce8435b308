use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use strata_model::RateLimitSpec;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, StrataError};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;

static GLOBAL: Lazy<Arc<RateLimiterRegistry>> =
    Lazy::new(|| Arc::new(RateLimiterRegistry::new(DEFAULT_MAX_CONCURRENT)));

/// Per-endpoint concurrency gates shared by every task in the process.
///
/// A gate is created on first acquisition with the configured limit for
/// its endpoint, or the default when none was configured. Reconfiguring an
/// endpoint swaps in a fresh gate; holders of the old gate keep their
/// permits and new callers queue on the new one.
pub struct RateLimiterRegistry {
    gates: DashMap<String, Gate>,
    limits: DashMap<String, usize>,
    default_limit: AtomicUsize,
}

#[derive(Clone)]
struct Gate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("gates", &self.gates.len())
            .field("configured", &self.limits.len())
            .field("default_limit", &self.default_limit())
            .finish()
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl RateLimiterRegistry {
    pub fn new(default_limit: usize) -> Self {
        Self {
            gates: DashMap::new(),
            limits: DashMap::new(),
            default_limit: AtomicUsize::new(default_limit.max(1)),
        }
    }

    /// Registry seeded from a list of endpoint specs.
    pub fn with_specs<'a, I>(default_limit: usize, specs: I) -> Self
    where
        I: IntoIterator<Item = &'a RateLimitSpec>,
    {
        let registry = Self::new(default_limit);
        for spec in specs {
            registry.configure(&spec.endpoint_name, spec.max_concurrent);
        }
        registry
    }

    /// Process-wide registry.
    pub fn global() -> Arc<RateLimiterRegistry> {
        Arc::clone(&GLOBAL)
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit.load(Ordering::Relaxed)
    }

    /// Sets the limit for one endpoint, replacing any live gate.
    pub fn configure(&self, endpoint: &str, max_concurrent: usize) {
        let limit = max_concurrent.max(1);
        self.limits.insert(endpoint.to_string(), limit);
        if self.gates.contains_key(endpoint) {
            self.gates.insert(endpoint.to_string(), Gate::new(limit));
            tracing::debug!(
                target: "strata::fetch",
                endpoint,
                limit,
                "replaced rate limit gate"
            );
        }
    }

    /// Sets the limit used by endpoints without an explicit one. Gates
    /// that already exist keep their size.
    pub fn configure_default(&self, max_concurrent: usize) {
        self.default_limit
            .store(max_concurrent.max(1), Ordering::Relaxed);
    }

    /// Limit a new gate for `endpoint` would get, or the live gate's size.
    pub fn limit_for(&self, endpoint: &str) -> usize {
        if let Some(gate) = self.gates.get(endpoint) {
            return gate.limit;
        }
        self.limits
            .get(endpoint)
            .map(|l| *l)
            .unwrap_or_else(|| self.default_limit())
    }

    /// Free slots on the live gate, if one exists.
    pub fn available(&self, endpoint: &str) -> Option<usize> {
        self.gates
            .get(endpoint)
            .map(|g| g.semaphore.available_permits())
    }

    /// Waits for a slot on the endpoint's gate. The slot is released when
    /// the returned handle drops.
    pub async fn acquire(&self, endpoint: &str) -> Result<RatePermit> {
        let semaphore = self.gate(endpoint);
        let permit = semaphore.acquire_owned().await.map_err(|_| {
            StrataError::Internal(format!("rate limit gate for {endpoint} closed"))
        })?;
        Ok(RatePermit {
            endpoint: endpoint.to_string(),
            _permit: permit,
        })
    }

    fn gate(&self, endpoint: &str) -> Arc<Semaphore> {
        let entry = self
            .gates
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                let limit = self
                    .limits
                    .get(endpoint)
                    .map(|l| *l)
                    .unwrap_or_else(|| self.default_limit());
                Gate::new(limit)
            });
        Arc::clone(&entry.semaphore)
    }
}

impl Gate {
    fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }
}

/// Held slot on an endpoint gate.
#[derive(Debug)]
pub struct RatePermit {
    endpoint: String,
    _permit: OwnedSemaphorePermit,
}

impl RatePermit {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_configured_limit() {
        let registry = Arc::new(RateLimiterRegistry::new(10));
        registry.configure("daily", 2);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let registry = Arc::clone(&registry);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = registry.acquire("daily").await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(registry.available("daily"), Some(2));
    }

    #[tokio::test]
    async fn unconfigured_endpoints_use_default() {
        let registry = RateLimiterRegistry::new(3);
        assert_eq!(registry.limit_for("income"), 3);
        let _a = registry.acquire("income").await.unwrap();
        assert_eq!(registry.available("income"), Some(2));

        // existing gates keep their size
        registry.configure_default(7);
        assert_eq!(registry.limit_for("income"), 3);
        assert_eq!(registry.limit_for("other"), 7);
    }

    #[tokio::test]
    async fn reconfigure_swaps_gate_without_revoking_holders() {
        let registry = RateLimiterRegistry::new(1);
        let held = registry.acquire("daily").await.unwrap();
        assert_eq!(registry.available("daily"), Some(0));

        registry.configure("daily", 4);
        assert_eq!(registry.available("daily"), Some(4));
        let _next = registry.acquire("daily").await.unwrap();
        assert_eq!(registry.available("daily"), Some(3));
        assert_eq!(held.endpoint(), "daily");
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let registry = RateLimiterRegistry::new(1);
        {
            let _p = registry.acquire("daily").await.unwrap();
            assert_eq!(registry.available("daily"), Some(0));
        }
        assert_eq!(registry.available("daily"), Some(1));
    }
}
