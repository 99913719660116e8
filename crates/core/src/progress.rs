//! Upload operation identifiers, lifecycle states, and progress events.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an upload operation.
///
/// Callers supply (or generate) one per upload and use it to subscribe to
/// progress events for that operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a new random operation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidOperationId(e.to_string()))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload operation lifecycle state.
///
/// Transitions are `Idle -> Uploading -> Completed | Failed`; the last two
/// are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    /// Operation created but no bytes transferred yet.
    Idle,
    /// Bytes are being transferred to the storage backend.
    Uploading,
    /// Upload finished and a reference was produced.
    Completed,
    /// Upload failed; no partial object remains resolvable.
    Failed,
}

impl UploadPhase {
    /// Check if the phase is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check whether a transition to `next` is valid.
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Idle => matches!(next, Self::Uploading | Self::Failed),
            Self::Uploading => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }
}

/// A transient progress notification for an upload operation.
///
/// Delivered at most once per tick on a best-effort channel; consumers must
/// tolerate dropped events. Byte counts are monotonically non-decreasing
/// within one operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The operation this event belongs to.
    pub operation_id: OperationId,
    /// Bytes transferred so far.
    pub bytes_sent: u64,
    /// Total payload size in bytes, if known up front.
    pub total_bytes: Option<u64>,
    /// Completion percentage (0-100), when the total is known.
    pub percentage: Option<u8>,
    /// Current lifecycle phase.
    pub phase: UploadPhase,
}

impl ProgressEvent {
    /// Build an event for a given byte count, deriving the percentage.
    pub fn at(
        operation_id: OperationId,
        bytes_sent: u64,
        total_bytes: Option<u64>,
        phase: UploadPhase,
    ) -> Self {
        let percentage = total_bytes.and_then(|total| {
            if total == 0 {
                None
            } else {
                // Saturate rather than report >100 if the caller's total was low.
                Some(((bytes_sent.saturating_mul(100) / total).min(100)) as u8)
            }
        });
        Self {
            operation_id,
            bytes_sent,
            total_bytes,
            percentage,
            phase,
        }
    }
}
