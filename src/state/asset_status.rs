/// Asset status definitions for tracking pipeline progress
///
/// This module defines the lifecycle states of an asset record and the
/// transitions the store is allowed to apply between them.
use std::fmt;

/// Represents the current status of an asset in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetStatus {
    // ===== Waiting =====
    /// Asset has been discovered or seeded and waits for a worker
    Pending,

    // ===== In-flight =====
    /// A worker is resolving the page to a media reference
    Extracting,

    /// A worker is fetching the media into a local artifact
    Downloading,

    /// A worker is relaying the local artifact to the hosting library
    Uploading,

    // ===== Outcomes =====
    /// Asset was relayed and carries a remote id
    Completed,

    /// The last attempt failed; eligible for a future batch
    Failed,
}

impl AssetStatus {
    /// Returns true if this is a terminal status (never overwritten)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if a worker holds the asset in this status
    ///
    /// In-flight statuses observed outside a running batch are crash artifacts.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Extracting | Self::Downloading | Self::Uploading)
    }

    /// Returns true if a batch should pick the asset up
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Statuses from which a move into `self` is allowed
    ///
    /// The forward sequence is Pending -> Extracting -> Downloading -> Uploading
    /// -> Completed. Any in-flight status may drop to Failed, and an eligible
    /// asset may fail admission before extraction starts. Nothing leaves Completed.
    pub fn allowed_predecessors(&self) -> &'static [AssetStatus] {
        match self {
            Self::Pending => &[Self::Extracting, Self::Downloading, Self::Uploading],
            Self::Extracting => &[Self::Pending, Self::Failed],
            Self::Downloading => &[Self::Extracting],
            Self::Uploading => &[Self::Downloading],
            Self::Completed => &[Self::Uploading],
            Self::Failed => &[
                Self::Pending,
                Self::Failed,
                Self::Extracting,
                Self::Downloading,
                Self::Uploading,
            ],
        }
    }

    /// Returns true if the store may move an asset from `self` to `next`
    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }

    /// Converts the status to its database representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Extracting => "EXTRACTING",
            Self::Downloading => "DOWNLOADING",
            Self::Uploading => "UPLOADING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parses a status from its database representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "EXTRACTING" => Some(Self::Extracting),
            "DOWNLOADING" => Some(Self::Downloading),
            "UPLOADING" => Some(Self::Uploading),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all statuses in lifecycle order
    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Extracting,
            Self::Downloading,
            Self::Uploading,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
