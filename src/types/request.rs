//! Authorization request type.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PolicyError;

use super::attr_value::AttrValue;
use super::entity_uid::EntityUid;
use super::request_context::RequestContext;

/// One authorization question: may `principal` perform `action` on `resource`?
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
pub struct Request {
    pub principal: EntityUid,
    pub action: EntityUid,
    pub resource: EntityUid,
    #[serde(default, skip_serializing_if = "RequestContext::is_empty")]
    pub context: RequestContext,
}

impl Request {
    pub fn new(principal: EntityUid, action: EntityUid, resource: EntityUid) -> Self {
        Request {
            principal,
            action,
            resource,
            context: RequestContext::new(),
        }
    }

    /// Build a request from the canonical text forms of the three UIDs.
    pub fn parse(principal: &str, action: &str, resource: &str) -> Result<Self, PolicyError> {
        Ok(Request::new(
            principal.parse()?,
            action.parse()?,
            resource.parse()?,
        ))
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_context_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.context.insert(key, value);
        self
    }
}
