//! Signed delivery URL composition and issuance.

use crate::error::{SignerError, SignerResult};
use crate::token::TokenSigner;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::time::Duration;
use time::OffsetDateTime;
use vault_core::AssetReference;

/// Characters escaped in URL path segments. `/` is kept as the segment
/// separator; the token is signed over the decoded storage path.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%')
    .add(b'&');

/// Per-item timeout for batch issuance.
const BATCH_ITEM_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum in-flight items during batch issuance.
const BATCH_CONCURRENCY: usize = 16;

/// A short-lived, tamper-evident delivery URL.
///
/// Ephemeral: regenerated on each access request, never persisted. The
/// `token` and `expires` query parameter names are a wire contract with the
/// edge verifier and must not be renamed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUrl {
    /// Public delivery hostname.
    pub host: String,
    /// Decoded object path within the delivery zone.
    pub path: String,
    /// Hex-encoded HMAC token over (path, expiry).
    pub token: String,
    /// Expiry as unix epoch seconds.
    pub expires_at_unix: i64,
}

impl SignedUrl {
    /// Render the full client-usable URL.
    pub fn to_url(&self) -> String {
        let encoded_path = utf8_percent_encode(&self.path, PATH_ESCAPE);
        format!(
            "https://{}/{}?token={}&expires={}",
            self.host, encoded_path, self.token, self.expires_at_unix
        )
    }

    /// Check whether the URL has expired as of `now` (unix epoch seconds).
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        now_unix > self.expires_at_unix
    }
}

/// Outcome of a signed-URL issuance request.
///
/// A missing signing secret is an explicit, handleable result rather than a
/// silent null or an unsigned URL; every caller decides how to degrade.
#[derive(Clone, Debug)]
pub enum IssueOutcome {
    /// A signed URL was produced.
    Signed(SignedUrl),
    /// No signing secret is configured; no URL was produced.
    ConfigurationGap,
}

impl IssueOutcome {
    /// Unwrap the signed URL, mapping a configuration gap to an error.
    pub fn into_signed(self) -> SignerResult<SignedUrl> {
        match self {
            Self::Signed(url) => Ok(url),
            Self::ConfigurationGap => Err(SignerError::MissingSecret),
        }
    }
}

/// Issues signed delivery URLs from private asset references.
///
/// One instance is constructed at process startup and shared by reference;
/// there is no hidden per-call-site state.
pub struct UrlService {
    host: String,
    signer: Option<TokenSigner>,
}

impl UrlService {
    /// Create a URL service for a delivery host.
    ///
    /// `signer` is `None` when no signing secret is configured; issuance then
    /// reports a configuration gap instead of producing unsigned URLs.
    pub fn new(host: impl Into<String>, signer: Option<TokenSigner>) -> Self {
        Self {
            host: host.into(),
            signer,
        }
    }

    /// Whether a signing secret is configured.
    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    /// Issue a signed URL valid for `window` from now.
    pub fn issue(&self, reference: &AssetReference, window: Duration) -> IssueOutcome {
        let expires_at_unix =
            OffsetDateTime::now_utc().unix_timestamp() + window.as_secs() as i64;
        self.issue_expiring_at(reference, expires_at_unix)
    }

    /// Issue a signed URL with an explicit expiry (unix epoch seconds).
    pub fn issue_expiring_at(
        &self,
        reference: &AssetReference,
        expires_at_unix: i64,
    ) -> IssueOutcome {
        let Some(signer) = &self.signer else {
            return IssueOutcome::ConfigurationGap;
        };

        let path = reference.storage_path().to_string();
        let token = signer.sign(&path, expires_at_unix);
        IssueOutcome::Signed(SignedUrl {
            host: self.host.clone(),
            path,
            token,
            expires_at_unix,
        })
    }

    /// Issue signed URLs for a batch of reference strings.
    ///
    /// Items are processed independently and concurrently; one item's decode
    /// or signing failure never aborts its siblings. Results are returned in
    /// input order.
    pub async fn issue_batch(
        &self,
        references: &[String],
        window: Duration,
    ) -> Vec<SignerResult<IssueOutcome>> {
        use futures::StreamExt;

        let expires_at_unix =
            OffsetDateTime::now_utc().unix_timestamp() + window.as_secs() as i64;

        let mut indexed: Vec<(usize, SignerResult<IssueOutcome>)> =
            futures::stream::iter(references.iter().enumerate())
                .map(|(index, raw)| async move {
                    let result = tokio::time::timeout(BATCH_ITEM_TIMEOUT, async {
                        let reference = AssetReference::parse(raw)?;
                        Ok(self.issue_expiring_at(&reference, expires_at_unix))
                    })
                    .await
                    .unwrap_or_else(|_| {
                        Err(SignerError::InvalidToken(format!(
                            "issuance timed out for {raw}"
                        )))
                    });
                    if let Err(e) = &result {
                        tracing::debug!(reference = %raw, error = %e, "batch issuance item failed");
                    }
                    (index, result)
                })
                .buffer_unordered(BATCH_CONCURRENCY)
                .collect()
                .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}
