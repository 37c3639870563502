//! The defense applier capability.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use feedguard_core::types::{Indicator, IndicatorKind};

use crate::error::Result;

/// Outcome of applying one batch to a live mechanism.
///
/// The two sets together enumerate exactly what happened: nothing routed to
/// the mechanism is left in an ambiguous state.
#[derive(Debug, Default, Clone)]
pub struct ApplyReport {
    pub applied: BTreeSet<Indicator>,
    pub failed: BTreeMap<Indicator, String>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A live defense mechanism fed with newly confirmed indicators.
#[async_trait]
pub trait DefenseApplier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Which indicator kinds this mechanism accepts.
    fn handles(&self, kind: IndicatorKind) -> bool;

    /// Apply a batch to the mechanism.
    ///
    /// Idempotent: an indicator already present in the live mechanism is
    /// reported as applied, not failed. A mechanism-level failure (missing
    /// binary, unreachable service) is an `Err` and fails the whole batch.
    async fn apply(&self, batch: &BTreeSet<Indicator>) -> Result<ApplyReport>;
}
