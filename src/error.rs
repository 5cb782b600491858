use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Build-time failures: parsing, store construction, template linking.
///
/// Request-time problems never surface here; they are recorded as
/// [`EvaluationError`](crate::EvaluationError) values on the decision.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyError {
    #[error("failed to parse: {0}")]
    ParseError(String),

    #[error("cyclic entity hierarchy through {0}")]
    CyclicHierarchy(String),

    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("duplicate policy id: {0}")]
    DuplicatePolicyId(String),

    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    #[error("template {template} has no binding for slot {slot}")]
    UnboundSlot { template: String, slot: String },

    #[error("template {template} has no slot {slot} to bind")]
    ExtraBinding { template: String, slot: String },

    #[error("policy {0} contains template slots and must be linked before use")]
    UnlinkedSlots(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::InvalidFormat(err.to_string())
    }
}
