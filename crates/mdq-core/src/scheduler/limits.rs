//! Concurrency limits and current slot usage.
//!
//! Two budgets apply at once: `max_concurrent_transfers` (N) bounds jobs that are
//! transferring, `max_total_busy` (M ≥ N) bounds every job holding a slot, including
//! those in a post-processing phase.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::registry::JobRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyLimits {
    pub max_concurrent_transfers: usize,
    pub max_total_busy: usize,
}

impl ConcurrencyLimits {
    pub fn new(max_concurrent_transfers: usize, max_total_busy: usize) -> Result<Self> {
        if max_concurrent_transfers == 0 {
            return Err(EngineError::validation(
                "max_concurrent_transfers must be at least 1",
            ));
        }
        if max_total_busy < max_concurrent_transfers {
            return Err(EngineError::validation(format!(
                "max_total_busy ({max_total_busy}) must be >= max_concurrent_transfers ({max_concurrent_transfers})"
            )));
        }
        Ok(Self {
            max_concurrent_transfers,
            max_total_busy,
        })
    }

    /// Slots free under both budgets. Zero when either is exhausted, including when
    /// a limit was lowered below current usage.
    pub fn available(&self, usage: SlotUsage) -> usize {
        let transfers = self
            .max_concurrent_transfers
            .saturating_sub(usage.transferring);
        let busy = self.max_total_busy.saturating_sub(usage.busy);
        transfers.min(busy)
    }
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            max_total_busy: 10,
        }
    }
}

/// Slot usage derived from the registry, never tracked separately, so a slot cannot
/// be counted twice or leaked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotUsage {
    pub transferring: usize,
    pub busy: usize,
}

impl SlotUsage {
    pub fn of(registry: &JobRegistry) -> Self {
        let mut usage = SlotUsage::default();
        for job in registry.jobs() {
            if job.status.is_busy() {
                usage.busy += 1;
            }
            if job.is_transferring() {
                usage.transferring += 1;
            }
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_validate_ordering() {
        assert!(ConcurrencyLimits::new(0, 4).is_err());
        assert!(ConcurrencyLimits::new(5, 4).is_err());
        let l = ConcurrencyLimits::new(3, 3).unwrap();
        assert_eq!(l.max_total_busy, 3);
    }

    #[test]
    fn available_is_min_of_both_budgets() {
        let l = ConcurrencyLimits::new(2, 5).unwrap();
        assert_eq!(l.available(SlotUsage::default()), 2);
        assert_eq!(
            l.available(SlotUsage {
                transferring: 1,
                busy: 4
            }),
            1
        );
        assert_eq!(
            l.available(SlotUsage {
                transferring: 0,
                busy: 5
            }),
            0
        );
        // Usage above a lowered limit saturates at zero.
        assert_eq!(
            l.available(SlotUsage {
                transferring: 4,
                busy: 7
            }),
            0
        );
    }
}
