//! Saga identifiers, types and states for the origination flow
//!
//! The state graph is deliberately small and strictly forward-moving:
//!
//! ```text
//! (none) --ApplicationSubmitted--> KYC_REQUESTED
//! KYC_REQUESTED --KycCompleted--> VERIFICATION_COMPLETE
//! VERIFICATION_COMPLETE --DecisionMade(APPROVED)--> SANCTION   (terminal)
//! VERIFICATION_COMPLETE --DecisionMade(other)----> REJECTED    (terminal)
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// SAGA ID
// ============================================================================

/// Deterministic saga id for an (saga type, application) pair.
///
/// UUID v5 over the pair: a re-delivered triggering event resolves to the
/// same instance instead of minting a duplicate, which keeps instance
/// creation idempotent without a lookup-before-insert race.
pub fn saga_id_for_application(saga_type: SagaType, application_id: Uuid) -> SagaId {
    let name = format!("saga:{}:{}", saga_type.as_str(), application_id);
    SagaId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
}

/// Unique identifier of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Random id; prefer [`saga_id_for_application`] for orchestrated flows.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    #[inline]
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SagaId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// SAGA TYPE
// ============================================================================

/// Kind of business process an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaType {
    /// Loan origination: submission through sanction or rejection
    Origination,
}

impl SagaType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Origination => "ORIGINATION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ORIGINATION" => Some(Self::Origination),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SAGA STATE
// ============================================================================

/// Named stage of an origination instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanSagaState {
    KycRequested,
    VerificationComplete,
    /// Approved: sanction letter on its way. Terminal.
    Sanction,
    /// Any non-approved decision. Terminal.
    Rejected,
}

impl LoanSagaState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KycRequested => "KYC_REQUESTED",
            Self::VerificationComplete => "VERIFICATION_COMPLETE",
            Self::Sanction => "SANCTION",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "KYC_REQUESTED" => Some(Self::KycRequested),
            "VERIFICATION_COMPLETE" => Some(Self::VerificationComplete),
            "SANCTION" => Some(Self::Sanction),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Legal forward edges of the state graph. Terminal states have none.
    pub fn can_transition_to(&self, next: LoanSagaState) -> bool {
        matches!(
            (self, next),
            (Self::KycRequested, Self::VerificationComplete)
                | (Self::VerificationComplete, Self::Sanction)
                | (Self::VerificationComplete, Self::Rejected)
        )
    }

    /// Terminal states are never exited.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sanction | Self::Rejected)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for LoanSagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STEP STATUS
// ============================================================================

/// Outcome of processing one step, recorded on the instance and on every
/// log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Completed,
    Failed,
    InProgress,
}

impl StepStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::InProgress => "IN_PROGRESS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "IN_PROGRESS" => Some(Self::InProgress),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
