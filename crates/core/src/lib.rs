//! Core domain types and shared logic for the private asset vault.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Private asset references and their textual encoding
//! - Upload operation identifiers and lifecycle states
//! - Progress event shapes
//! - Application configuration

pub mod config;
pub mod error;
pub mod progress;
pub mod reference;

pub use config::{AppConfig, DeliveryConfig, SigningSecretConfig, StorageConfig};
pub use error::{Error, Result};
pub use progress::{OperationId, ProgressEvent, UploadPhase};
pub use reference::AssetReference;

/// Default signed-URL validity window: 6 hours.
pub const DEFAULT_SIGNING_WINDOW_SECS: u64 = 6 * 60 * 60;
