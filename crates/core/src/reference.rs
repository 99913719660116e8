//! Private asset references and their textual encoding.
//!
//! A reference encodes a storage object's identity as an opaque string that
//! calling code persists in place of a directly fetchable URL. The textual
//! form is `private:<storage_id>:<storage_path>` and must stay stable across
//! storage provider migrations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheme prefix for private references.
pub const REFERENCE_SCHEME: &str = "private";

/// Delimiter between scheme, storage id, and storage path.
pub const REFERENCE_DELIMITER: char = ':';

/// A decoded private asset reference.
///
/// The storage id never contains the delimiter; the storage path may. Parsing
/// splits on the first two delimiters only, so everything after the second
/// colon is the path.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetReference {
    storage_id: String,
    storage_path: String,
}

impl AssetReference {
    /// Create a reference from components, validating the storage id.
    pub fn new(
        storage_id: impl Into<String>,
        storage_path: impl Into<String>,
    ) -> crate::Result<Self> {
        let storage_id = storage_id.into();
        let storage_path = storage_path.into();

        if storage_id.is_empty() {
            return Err(crate::Error::InvalidIdentifier(
                "storage id cannot be empty".to_string(),
            ));
        }
        if storage_id.contains(REFERENCE_DELIMITER) {
            return Err(crate::Error::InvalidIdentifier(format!(
                "storage id cannot contain '{REFERENCE_DELIMITER}': {storage_id}"
            )));
        }
        if storage_path.is_empty() {
            return Err(crate::Error::InvalidPath(
                "storage path cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            storage_id,
            storage_path,
        })
    }

    /// Parse the canonical `private:<id>:<path>` form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let mut parts = s.splitn(3, REFERENCE_DELIMITER);

        let scheme = parts.next().unwrap_or_default();
        if scheme != REFERENCE_SCHEME {
            return Err(crate::Error::MalformedReference(format!(
                "expected '{REFERENCE_SCHEME}{REFERENCE_DELIMITER}' prefix: {s}"
            )));
        }

        let storage_id = parts.next().ok_or_else(|| {
            crate::Error::MalformedReference(format!("missing storage id: {s}"))
        })?;
        let storage_path = parts.next().ok_or_else(|| {
            crate::Error::MalformedReference(format!("missing storage path: {s}"))
        })?;

        if storage_id.is_empty() {
            return Err(crate::Error::MalformedReference(format!(
                "empty storage id: {s}"
            )));
        }
        if storage_path.is_empty() {
            return Err(crate::Error::MalformedReference(format!(
                "empty storage path: {s}"
            )));
        }

        Ok(Self {
            storage_id: storage_id.to_string(),
            storage_path: storage_path.to_string(),
        })
    }

    /// Get the storage account identifier.
    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    /// Get the object path within the storage backend.
    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }
}

impl fmt::Display for AssetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{REFERENCE_SCHEME}{REFERENCE_DELIMITER}{}{REFERENCE_DELIMITER}{}",
            self.storage_id, self.storage_path
        )
    }
}

impl fmt::Debug for AssetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetReference({self})")
    }
}

impl FromStr for AssetReference {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssetReference {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<AssetReference> for String {
    fn from(r: AssetReference) -> String {
        r.to_string()
    }
}
