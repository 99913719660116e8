//! Delivery token signing and signed-URL issuance for the private asset vault.
//!
//! This crate provides:
//! - HMAC-SHA256 signing and verification of (path, expiry) pairs
//! - Composition of signed, short-lived delivery URLs
//! - Batch issuance with per-item failure isolation

pub mod error;
pub mod token;
pub mod url;

pub use error::{SignerError, SignerResult};
pub use token::TokenSigner;
pub use url::{IssueOutcome, SignedUrl, UrlService};
