//! Data model: entity identifiers, attribute values, entities, policies,
//! requests and decisions.
//!
//! Canonical string forms:
//! - Entity: `Type::"id"` or `NS::Type::"id"`, the id always quoted
//! - Policy: `permit (principal in Group::"admins", action, resource) when { .. };`
//!
//! Every type here has a JSON form; attribute values use the Cedar JSON
//! conventions (`__entity`, `__extn`) on the slice wire format.

mod attr_value;
mod decision;
mod entity;
pub(crate) mod entity_uid;
mod policy;
mod principal_policies;
mod request;
mod request_context;

pub use attr_value::{AttrValue, IpPrefix};
pub use decision::{Decision, EvaluationError, EvaluationErrorKind, PolicyVersion};
pub use entity::Entity;
pub use entity_uid::{EntityUid, MAX_UID_LEN};
pub use policy::{
    ActionConstraint, BinaryOp, Clause, ClauseKind, Effect, EntityRef, Expr, Function, Method,
    PatternElem, Policy, PolicyId, ScopeConstraint, SlotId, UnaryOp, Var, pattern_matches,
};
pub use principal_policies::{
    PolicyEffectFilter, PolicyMatch, PolicyMatchReason, PrincipalPolicies,
};
pub use request::Request;
pub use request_context::RequestContext;
