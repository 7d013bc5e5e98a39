//! Enum types for MEGAPHONE entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Entity type discriminator for polymorphic references in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Campaign,
    Delivery,
    BatchRun,
    ProcessingLock,
}

/// Status of a campaign (one day-bucket of a logical broadcast).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CampaignStatus {
    /// Waiting for its scheduled time
    #[default]
    Scheduled,
    /// At least one delivery record has been picked up by the processor
    Processing,
    /// Every delivery record reached a terminal state with at least one
    /// sent, or none failed (individual failures do not fail the campaign)
    Completed,
    /// Every delivery record reached a terminal state, nothing was sent and
    /// at least one record failed
    Failed,
    /// Cancelled before completion; remaining recipients are skipped
    Cancelled,
}

impl CampaignStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Processing => "processing",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, CampaignStatusParseError> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "processing" => Ok(CampaignStatus::Processing),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(CampaignStatusParseError(s.to_string())),
        }
    }

    /// Check if the campaign can still receive processor work.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = CampaignStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid campaign status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignStatusParseError(pub String);

impl fmt::Display for CampaignStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid campaign status: {}", self.0)
    }
}

impl std::error::Error for CampaignStatusParseError {}

/// Status of one recipient's delivery record within a campaign.
///
/// Records transition forward only: `pending → processing → sent|failed|skipped`.
/// A `failed` record below the retry ceiling is reset to `pending` with a
/// future `scheduled_at`; only a record that exhausted its retries stays
/// `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeliveryStatus {
    /// Queued, waiting to become due
    #[default]
    Pending,
    /// Picked up by the current run
    Processing,
    /// Delivered by a provider
    Sent,
    /// Failed with retries exhausted
    Failed,
    /// Skipped (opted out or campaign cancelled)
    Skipped,
}

impl DeliveryStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, DeliveryStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "processing" => Ok(DeliveryStatus::Processing),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "skipped" => Ok(DeliveryStatus::Skipped),
            _ => Err(DeliveryStatusParseError(s.to_string())),
        }
    }

    /// Terminal states are never revisited by the processor.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Sent | DeliveryStatus::Failed | DeliveryStatus::Skipped
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DeliveryStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid delivery status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatusParseError(pub String);

impl fmt::Display for DeliveryStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid delivery status: {}", self.0)
    }
}

impl std::error::Error for DeliveryStatusParseError {}

/// Status of one batch processor invocation in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// The run is working through its batch
    Processing,
    /// The run completed its batch (individual sends may still have failed)
    Completed,
    /// The run aborted before completing its batch
    Failed,
}

impl RunStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, RunStatusParseError> {
        match s.to_lowercase().as_str() {
            "processing" => Ok(RunStatus::Processing),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(RunStatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid run status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid run status: {}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// =============================================================================
// TESTS
// =============================================================================
