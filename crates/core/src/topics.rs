//! Centralized topic constants for the loan-origination bus
//!
//! Single source of truth for every subject the substrate publishes or
//! consumes, preventing mismatches between producers and the orchestrator.
//!
//! ## Naming Convention
//! - Format: `los.{service}.{EventName}.{version}`
//! - service: the owning domain service (application, kyc, underwriting, ...)
//! - EventName: PascalCase event or command name
//! - version: schema version suffix (`v1`)

/// Subject prefix for all loan-origination traffic
pub const TOPIC_PREFIX: &str = "los";

/// Stream name covering all loan-origination subjects
pub const EVENTS_STREAM_NAME: &str = "LOS_EVENTS";

/// Events consumed by the saga orchestrator
pub mod event_topics {

    /// A borrower submitted a loan application (saga trigger)
    pub const APPLICATION_SUBMITTED: &str = "los.application.ApplicationSubmitted.v1";
    /// Identity verification finished for an application
    pub const KYC_COMPLETED: &str = "los.kyc.KycCompleted.v1";
    /// The decision engine produced its final verdict
    pub const DECISION_MADE: &str = "los.underwriting.DecisionMade.v1";
}

/// Commands the orchestrator emits durably through the outbox
pub mod command_topics {

    /// Start identity verification for an application
    pub const START_KYC: &str = "los.kyc.StartKyc.v1";
    /// Pull the credit-bureau report for an application
    pub const BUREAU_PULL: &str = "los.bureau.BureauPull.v1";
    /// Run underwriting for a verified application
    pub const UNDERWRITE: &str = "los.underwriting.Underwrite.v1";
    /// Issue the sanction letter for an approved application
    pub const ISSUE_SANCTION: &str = "los.sanction.IssueSanction.v1";
}

/// All loan-origination subjects (wildcard)
pub const ALL_TOPICS: &str = "los.>";

/// Helper to build a subject from service, name and version
#[inline]
pub fn topic(service: &str, name: &str, version: &str) -> String {
    format!("{}.{}.{}.{}", TOPIC_PREFIX, service, name, version)
}

#[cfg(test)]
mod tests {
    use crate::topics::{ALL_TOPICS, command_topics, event_topics, topic};

    #[test]
    fn test_topic_format() {
        assert!(event_topics::APPLICATION_SUBMITTED.starts_with("los."));
        assert!(event_topics::APPLICATION_SUBMITTED.ends_with(".v1"));
        assert!(event_topics::KYC_COMPLETED.contains(".kyc."));
        assert!(command_topics::ISSUE_SANCTION.contains(".sanction."));
    }

    #[test]
    fn test_wildcard() {
        assert!(ALL_TOPICS.ends_with(".>"));
    }

    #[test]
    fn test_topic_helper() {
        let subject = topic("application", "ApplicationSubmitted", "v1");
        assert_eq!(subject, event_topics::APPLICATION_SUBMITTED);

        let subject = topic("underwriting", "DecisionMade", "v1");
        assert_eq!(subject, event_topics::DECISION_MADE);
    }
}
