//! Authorization decisions and the diagnostics attached to them.

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;
use utoipa::ToSchema;

use super::policy::PolicyId;

/// Version metadata for the slice used during an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct PolicyVersion {
    /// SHA-256 of the canonical slice document.
    pub hash: String,
    /// When this slice was built.
    pub loaded_at: String,
}

impl Display for PolicyVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} @ {}", self.hash, self.loaded_at)
    }
}

/// What went wrong while evaluating one policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, StrumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvaluationErrorKind {
    /// A missing attribute or an unknown entity; the condition counts as false.
    Attribute,
    /// A type error, overflow or other malformed condition; the policy is skipped.
    PolicyEval,
    /// The request names an entity the store does not know (strict mode only).
    UnknownEntity,
}

/// A request-time diagnostic. Never fatal to the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct EvaluationError {
    /// The policy being evaluated, if the error belongs to one.
    #[schema(value_type = Option<String>)]
    pub policy_id: Option<PolicyId>,
    pub kind: EvaluationErrorKind,
    pub message: String,
}

impl Display for EvaluationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.policy_id {
            Some(id) => write!(f, "{} error in policy {id}: {}", self.kind, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

/// The outcome of one authorization call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct Decision {
    pub allowed: bool,
    /// Applying permits when allowed, applying forbids when denied by one.
    #[schema(value_type = Vec<String>)]
    pub determining_policies: Vec<PolicyId>,
    pub errors: Vec<EvaluationError>,
    pub version: PolicyVersion,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Ids of the determining policies, as plain strings.
    pub fn policy_ids(&self) -> Vec<&str> {
        self.determining_policies.iter().map(|id| id.as_str()).collect()
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let verdict = if self.allowed { "Allow" } else { "Deny" };
        write!(
            f,
            "{verdict}(hash={}; {})",
            self.version.hash,
            self.determining_policies.iter().join(", ")
        )
    }
}
