//! Core domain logic for Feedguard.
//!
//! This crate provides:
//! - Shared content and indicator type definitions
//! - TOML + environment configuration with load-time validation
//! - The IOC extraction engine (regex grammars plus policy filters)
//! - The durable indicator store that backs deduplication
//! - Digest body composition for both recipient audiences
//! - The bounded-retry helper wrapped around network calls

pub mod config;
pub mod digest;
pub mod error;
pub mod extract;
pub mod retry;
pub mod store;
pub mod types;

// Re-export key types at crate root for convenience.
pub use config::FeedguardConfig;
pub use error::{CoreError, Result};
pub use extract::IocExtractor;
pub use store::{DigestLedger, IndicatorStore};
pub use types::*;
