//! The source provider capability.

use async_trait::async_trait;

use feedguard_core::types::{ContentItem, SourceKind};

use crate::error::Result;

/// A pluggable content source.
///
/// The implementation set is closed — news, advisory, threat blog — and a
/// new kind is a deliberate code change, not runtime configuration.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Clamp a requested fetch budget into this provider's supported range.
    /// Out-of-range values are clamped, never rejected.
    fn clamp_limit(&self, limit: usize) -> usize;

    /// Fetch up to `limit` items. Providers perform outbound HTTP only and
    /// must not mutate shared state.
    async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>>;
}
