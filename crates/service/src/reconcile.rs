//! Reconciliation of metadata records against backend object existence.

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use vault_core::AssetReference;
use vault_storage::ObjectStore;

/// How many existence checks run concurrently during a scan.
pub const SCAN_CONCURRENCY: usize = 16;

/// Per-record timeout for one existence check.
pub const SCAN_ITEM_TIMEOUT: Duration = Duration::from_secs(5);

/// The shape of a metadata record as far as reconciliation is concerned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Primary key of the record in the metadata store.
    pub record_id: String,
    /// Encoded asset reference, if the record has a stored asset.
    pub reference: Option<String>,
}

/// A record whose backing object is confirmed absent from the backend.
#[derive(Clone, Debug)]
pub struct OrphanedRecord {
    pub record_id: String,
    pub reference: AssetReference,
}

/// A record whose backing object could not be checked.
///
/// Inconclusive records are never deletion candidates; they carry the
/// reason so an operator can re-check them.
#[derive(Clone, Debug)]
pub struct InconclusiveRecord {
    pub record_id: String,
    pub reference: String,
    pub reason: String,
}

/// Result of one reconciliation run.
#[derive(Debug, Default)]
pub struct OrphanReport {
    /// Number of records with a reference that were checked.
    pub scanned: usize,
    pub orphaned: Vec<OrphanedRecord>,
    pub inconclusive: Vec<InconclusiveRecord>,
}

/// Records per DELETE statement in the remediation script.
const REMEDIATION_BATCH_SIZE: usize = 100;

impl OrphanReport {
    /// Render a remediation SQL script for operator review.
    ///
    /// Deletes are batched inside one explicit transaction. The script is
    /// never executed by this crate; it exists so a human can inspect every
    /// candidate before anything is destroyed. Inconclusive records appear
    /// only as trailing comments.
    pub fn remediation_script(&self, table: &str) -> String {
        let mut script = String::new();
        script.push_str(&format!(
            "-- Orphan remediation: {} orphaned of {} scanned records.\n",
            self.orphaned.len(),
            self.scanned
        ));
        script.push_str("-- Review every statement before executing.\n");

        if self.orphaned.is_empty() {
            script.push_str("-- No orphaned records found; nothing to delete.\n");
        } else {
            script.push_str("BEGIN;\n");
            for batch in self.orphaned.chunks(REMEDIATION_BATCH_SIZE) {
                let ids: Vec<String> = batch
                    .iter()
                    .map(|o| format!("'{}'", o.record_id.replace('\'', "''")))
                    .collect();
                script.push_str(&format!(
                    "DELETE FROM {table} WHERE id IN ({});\n",
                    ids.join(", ")
                ));
            }
            script.push_str("COMMIT;\n");
        }

        if !self.inconclusive.is_empty() {
            script.push_str("-- Inconclusive records (re-check, do NOT delete):\n");
            for record in &self.inconclusive {
                script.push_str(&format!(
                    "--   {} ({}): {}\n",
                    record.record_id, record.reference, record.reason
                ));
            }
        }

        script
    }
}

enum Verdict {
    Present,
    Orphaned(AssetReference),
    Inconclusive { reference: String, reason: String },
}

/// Walks metadata records and classifies each referenced object as present,
/// orphaned, or inconclusive.
///
/// Checks fan out with bounded concurrency and a per-record timeout.
/// Existence checks are never retried here: a flaky check becomes
/// inconclusive instead of stalling the scan, and an inconclusive record is
/// excluded from deletion candidates.
pub struct ReconcileScanner {
    store: Arc<dyn ObjectStore>,
    storage_id: Option<String>,
    concurrency: usize,
    item_timeout: Duration,
}

impl ReconcileScanner {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_limits(store, SCAN_CONCURRENCY, SCAN_ITEM_TIMEOUT)
    }

    pub fn with_limits(
        store: Arc<dyn ObjectStore>,
        concurrency: usize,
        item_timeout: Duration,
    ) -> Self {
        Self {
            store,
            storage_id: None,
            concurrency: concurrency.max(1),
            item_timeout,
        }
    }

    /// Restrict the scan to references carrying this storage id.
    ///
    /// A reference with a different storage id points at another backend,
    /// so checking it against this one would misreport it as orphaned;
    /// such records are classified inconclusive instead.
    pub fn expecting_storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = Some(storage_id.into());
        self
    }

    /// Scan `records`, skipping those without a reference.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn scan(&self, records: &[MetadataRecord]) -> OrphanReport {
        let candidates: Vec<(String, String)> = records
            .iter()
            .filter_map(|r| {
                r.reference
                    .as_ref()
                    .map(|reference| (r.record_id.clone(), reference.clone()))
            })
            .collect();

        let mut verdicts: Vec<(usize, String, Verdict)> = stream::iter(
            candidates.into_iter().enumerate(),
        )
        .map(|(index, (record_id, reference))| async move {
            let verdict = self.classify(&reference).await;
            (index, record_id, verdict)
        })
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        // Restore input order after unordered completion.
        verdicts.sort_by_key(|(index, _, _)| *index);

        let mut report = OrphanReport {
            scanned: verdicts.len(),
            ..OrphanReport::default()
        };
        for (_, record_id, verdict) in verdicts {
            match verdict {
                Verdict::Present => {}
                Verdict::Orphaned(reference) => {
                    tracing::debug!(record_id = %record_id, reference = %reference, "orphaned");
                    report.orphaned.push(OrphanedRecord {
                        record_id,
                        reference,
                    });
                }
                Verdict::Inconclusive { reference, reason } => {
                    tracing::debug!(
                        record_id = %record_id,
                        reference = %reference,
                        reason = %reason,
                        "inconclusive"
                    );
                    report.inconclusive.push(InconclusiveRecord {
                        record_id,
                        reference,
                        reason,
                    });
                }
            }
        }
        report
    }

    async fn classify(&self, raw_reference: &str) -> Verdict {
        let reference = match AssetReference::parse(raw_reference) {
            Ok(reference) => reference,
            Err(e) => {
                return Verdict::Inconclusive {
                    reference: raw_reference.to_string(),
                    reason: format!("unparseable reference: {e}"),
                };
            }
        };

        if let Some(expected) = &self.storage_id {
            if reference.storage_id() != expected.as_str() {
                return Verdict::Inconclusive {
                    reference: raw_reference.to_string(),
                    reason: format!(
                        "foreign storage id {} (scanning {expected})",
                        reference.storage_id()
                    ),
                };
            }
        }

        let check = self.store.exists(reference.storage_path());
        match tokio::time::timeout(self.item_timeout, check).await {
            Ok(Ok(true)) => Verdict::Present,
            Ok(Ok(false)) => Verdict::Orphaned(reference),
            Ok(Err(e)) => Verdict::Inconclusive {
                reference: raw_reference.to_string(),
                reason: format!("existence check failed: {e}"),
            },
            Err(_) => Verdict::Inconclusive {
                reference: raw_reference.to_string(),
                reason: format!(
                    "existence check timed out after {}s",
                    self.item_timeout.as_secs()
                ),
            },
        }
    }
}
