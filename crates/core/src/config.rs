//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage (development and testing).
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO
        /// and some S3-compatible services; AWS S3 requires virtual-hosted
        /// style (false). Defaults to false.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(crate::Error::Config(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                )),
            },
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Signing secret source configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SigningSecretConfig {
    /// Secret stored in a file.
    File {
        /// Path to the secret file.
        path: PathBuf,
    },
    /// Secret stored in an environment variable.
    Env {
        /// Environment variable name.
        var: String,
    },
    /// Secret provided directly as a value (NOT recommended for production).
    Value {
        /// The raw secret string.
        secret: String,
    },
}

impl SigningSecretConfig {
    /// Load the secret bytes from the configured source.
    pub fn resolve(&self) -> crate::Result<Vec<u8>> {
        let secret = match self {
            Self::File { path } => std::fs::read_to_string(path)
                .map_err(|e| {
                    crate::Error::Config(format!(
                        "failed to read signing secret from {}: {e}",
                        path.display()
                    ))
                })?
                .trim_end()
                .to_string(),
            Self::Env { var } => std::env::var(var).map_err(|_| {
                crate::Error::Config(format!("signing secret env var {var} is not set"))
            })?,
            Self::Value { secret } => secret.clone(),
        };

        if secret.is_empty() {
            return Err(crate::Error::Config(
                "signing secret cannot be empty".to_string(),
            ));
        }
        Ok(secret.into_bytes())
    }
}

/// Delivery configuration: the public host that serves signed URLs and the
/// secret used to sign them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Public delivery hostname (e.g., "cdn.example.com").
    pub host: String,
    /// Signing secret source. Absence is a startup fault unless
    /// `allow_unsigned` is explicitly enabled.
    pub signing_secret: Option<SigningSecretConfig>,
    /// Serve unsigned URLs when no signing secret is configured.
    /// SECURITY: This exposes nominally private assets without access
    /// control. Off by default; enabling it is an audited decision.
    #[serde(default)]
    pub allow_unsigned: bool,
    /// Default signed-URL validity window in seconds.
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
}

fn default_window_secs() -> u64 {
    crate::DEFAULT_SIGNING_WINDOW_SECS
}

impl DeliveryConfig {
    /// Validate delivery configuration invariants.
    ///
    /// A missing signing secret is a hard configuration fault unless the
    /// deployment explicitly opted into unsigned delivery.
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.is_empty() {
            return Err(crate::Error::Config(
                "delivery host cannot be empty".to_string(),
            ));
        }
        if self.host.contains("://") {
            return Err(crate::Error::Config(format!(
                "delivery host must be a bare hostname, not a URL: {}",
                self.host
            )));
        }
        if self.signing_secret.is_none() && !self.allow_unsigned {
            return Err(crate::Error::Config(
                "no signing secret configured; set delivery.signing_secret or \
                 explicitly enable delivery.allow_unsigned"
                    .to_string(),
            ));
        }
        if self.default_window_secs == 0 {
            return Err(crate::Error::Config(
                "delivery.default_window_secs cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Stable identifier embedded in asset references. Must survive provider
    /// migrations; defaults to the S3 bucket name, or "local" for filesystem
    /// storage.
    #[serde(default)]
    pub storage_id: Option<String>,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Delivery configuration (required).
    pub delivery: DeliveryConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage and an inline secret.
    pub fn for_testing() -> Self {
        Self {
            storage_id: Some("test-vault".to_string()),
            storage: StorageConfig::default(),
            delivery: DeliveryConfig {
                host: "cdn.test".to_string(),
                signing_secret: Some(SigningSecretConfig::Value {
                    secret: "test-signing-secret".to_string(),
                }),
                allow_unsigned: false,
                default_window_secs: default_window_secs(),
            },
        }
    }

    /// The storage identifier to embed in references.
    pub fn resolved_storage_id(&self) -> String {
        if let Some(id) = &self.storage_id {
            return id.clone();
        }
        match &self.storage {
            StorageConfig::S3 { bucket, .. } => bucket.clone(),
            StorageConfig::Filesystem { .. } => "local".to_string(),
        }
    }

    /// Validate all configuration sections.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(id) = &self.storage_id {
            // The reference format reserves ':' as its delimiter.
            if id.is_empty() || id.contains(':') {
                return Err(crate::Error::Config(format!(
                    "storage_id must be non-empty and must not contain ':': {id:?}"
                )));
            }
        }
        self.storage.validate()?;
        self.delivery.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let invalid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(invalid.validate().is_err());

        let valid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: Some("secret-key".to_string()),
            force_path_style: false,
        };
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_delivery_config_missing_secret_is_a_fault() {
        let config = DeliveryConfig {
            host: "cdn.example.com".to_string(),
            signing_secret: None,
            allow_unsigned: false,
            default_window_secs: 3600,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delivery_config_unsigned_requires_explicit_opt_in() {
        let config = DeliveryConfig {
            host: "cdn.example.com".to_string(),
            signing_secret: None,
            allow_unsigned: true,
            default_window_secs: 3600,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delivery_config_rejects_url_host() {
        let config = DeliveryConfig {
            host: "https://cdn.example.com".to_string(),
            signing_secret: Some(SigningSecretConfig::Value {
                secret: "s".to_string(),
            }),
            allow_unsigned: false,
            default_window_secs: 3600,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_signing_secret_resolve_value() {
        let config = SigningSecretConfig::Value {
            secret: "hunter2".to_string(),
        };
        assert_eq!(config.resolve().unwrap(), b"hunter2");

        let empty = SigningSecretConfig::Value {
            secret: String::new(),
        };
        assert!(empty.resolve().is_err());
    }

    #[test]
    fn test_default_window_applied_on_deserialize() {
        let json = r#"{"host": "cdn.example.com", "signing_secret": {"type": "value", "secret": "s"}}"#;
        let config: DeliveryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.default_window_secs, crate::DEFAULT_SIGNING_WINDOW_SECS);
        assert!(!config.allow_unsigned);
    }

    #[test]
    fn test_storage_config_s3_roundtrip() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: Some("assets".to_string()),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
        };

        let json = serde_json::to_string(&config).unwrap();
        let decoded: StorageConfig = serde_json::from_str(&json).unwrap();
        match decoded {
            StorageConfig::S3 {
                bucket,
                force_path_style,
                ..
            } => {
                assert_eq!(bucket, "bucket");
                assert!(force_path_style);
            }
            _ => panic!("expected S3 config"),
        }
    }

    #[test]
    fn test_storage_id_defaults_to_bucket_or_local() {
        let mut config = AppConfig::for_testing();
        config.storage_id = None;
        assert_eq!(config.resolved_storage_id(), "local");

        config.storage = StorageConfig::S3 {
            bucket: "media-vault".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        };
        assert_eq!(config.resolved_storage_id(), "media-vault");

        config.storage_id = Some("stable-id".to_string());
        assert_eq!(config.resolved_storage_id(), "stable-id");
    }

    #[test]
    fn test_storage_id_rejects_delimiter() {
        let mut config = AppConfig::for_testing();
        config.storage_id = Some("bad:id".to_string());
        assert!(config.validate().is_err());
    }
}
