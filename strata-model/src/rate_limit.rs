#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Concurrency ceiling for one logical upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RateLimitSpec {
    pub endpoint_name: String,
    pub max_concurrent: usize,
}

impl RateLimitSpec {
    pub fn new(endpoint_name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            max_concurrent,
        }
    }
}
