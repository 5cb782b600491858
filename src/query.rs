use crate::entities::EntityStore;
use crate::policy_match::{
    action_match_reason, matches_effect, principal_match_reason, resource_match_reason,
};
use crate::slice::Slice;
use crate::types::{
    EntityUid, Policy, PolicyEffectFilter, PolicyMatch, PolicyMatchReason, PrincipalPolicies,
    Request,
};

/// Scope-only filter used to list policies; conditions are not evaluated.
#[derive(Debug, Clone)]
pub(crate) struct PolicyQuery<'a> {
    pub(crate) principal: &'a EntityUid,
    pub(crate) action: Option<&'a EntityUid>,
    pub(crate) resource: Option<&'a EntityUid>,
    pub(crate) effect: PolicyEffectFilter,
}

impl<'a> PolicyQuery<'a> {
    pub(crate) fn for_principal(principal: &'a EntityUid, effect: PolicyEffectFilter) -> Self {
        Self {
            principal,
            action: None,
            resource: None,
            effect,
        }
    }

    pub(crate) fn for_request(request: &'a Request, effect: PolicyEffectFilter) -> Self {
        Self {
            principal: &request.principal,
            action: Some(&request.action),
            resource: Some(&request.resource),
            effect,
        }
    }

    /// Why `policy` matches, or `None` if some constrained part does not.
    pub(crate) fn match_reasons(
        &self,
        policy: &Policy,
        store: &EntityStore,
    ) -> Option<Vec<PolicyMatchReason>> {
        if !matches_effect(policy.effect(), self.effect) {
            return None;
        }
        let mut reasons = vec![principal_match_reason(
            policy.principal_constraint(),
            self.principal,
            store,
        )?];
        if let Some(action) = self.action {
            reasons.push(action_match_reason(policy.action_constraint(), action, store)?);
        }
        if let Some(resource) = self.resource {
            reasons.push(resource_match_reason(
                policy.resource_constraint(),
                resource,
                store,
            )?);
        }
        Some(reasons)
    }

    pub(crate) fn run(&self, slice: &Slice) -> PrincipalPolicies {
        let matches = slice
            .expanded()
            .iter()
            .filter_map(|policy| {
                self.match_reasons(policy, slice.entities())
                    .map(|reasons| PolicyMatch {
                        policy: policy.clone(),
                        reasons,
                    })
            })
            .collect();
        PrincipalPolicies::new(self.principal.clone(), matches)
    }
}
