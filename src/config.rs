//! Configuration types for flows and hubs

use crate::error::{FlowError, FlowResult};

/// Policy applied when a bounded buffer is full and a new item arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the producer until space is available
    Suspend,
    /// Evict the oldest buffered item to admit the new one
    DropOldest,
    /// Discard the newly produced item, keeping the buffer unchanged
    DropLatest,
}

/// Buffer configuration for a multicast hub.
///
/// `replay` items are retained for new subscribers after delivery; `extra` is
/// additional in-flight slack before the overflow policy triggers. Total
/// capacity is `replay + extra`.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub replay: usize,
    pub extra: usize,
    pub policy: OverflowPolicy,
}

impl HubConfig {
    pub fn new(replay: usize, extra: usize, policy: OverflowPolicy) -> Self {
        Self {
            replay,
            extra,
            policy,
        }
    }

    /// Total buffer capacity
    pub fn total(&self) -> usize {
        self.replay + self.extra
    }

    /// A zero-capacity buffer has nothing to drop or replay, so only the
    /// Suspend policy is a meaningful combination.
    pub fn validate(&self) -> FlowResult<()> {
        if self.total() == 0 && self.policy != OverflowPolicy::Suspend {
            return Err(FlowError::Config(format!(
                "total capacity is 0 but policy is {:?}; a drop policy needs at least one slot",
                self.policy
            )));
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            replay: 0,
            extra: 16,
            policy: OverflowPolicy::Suspend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_requires_suspend() {
        assert!(HubConfig::new(0, 0, OverflowPolicy::Suspend).validate().is_ok());
        assert!(HubConfig::new(0, 0, OverflowPolicy::DropOldest).validate().is_err());
        assert!(HubConfig::new(0, 0, OverflowPolicy::DropLatest).validate().is_err());
        assert!(HubConfig::new(1, 0, OverflowPolicy::DropOldest).validate().is_ok());
    }
}
