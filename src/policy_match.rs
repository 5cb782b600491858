//! Scope matching shared by the evaluator and policy listing.

use crate::entities::EntityStore;
use crate::types::{
    ActionConstraint, Effect, EntityRef, EntityUid, PolicyEffectFilter, PolicyMatchReason,
    ScopeConstraint,
};

/// Which form of a principal or resource constraint matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeMatch {
    Any,
    Eq,
    In,
    Is,
    IsIn,
}

/// Match one principal or resource constraint against `uid`.
///
/// `in` includes equality. A constraint still holding a slot never matches.
pub(crate) fn scope_match(
    constraint: &ScopeConstraint,
    uid: &EntityUid,
    store: &EntityStore,
) -> Option<ScopeMatch> {
    let within = |entity: &EntityRef| match entity {
        EntityRef::Uid(ancestor) => store.is_descendant_of(uid, ancestor),
        EntityRef::Slot(_) => false,
    };

    match constraint {
        ScopeConstraint::Any => Some(ScopeMatch::Any),
        ScopeConstraint::Eq {
            entity: EntityRef::Uid(expected),
        } if expected == uid => Some(ScopeMatch::Eq),
        ScopeConstraint::In { entity } if within(entity) => Some(ScopeMatch::In),
        ScopeConstraint::Is { entity_type } if entity_type == uid.type_name() => {
            Some(ScopeMatch::Is)
        }
        ScopeConstraint::IsIn {
            entity_type,
            entity,
        } if entity_type == uid.type_name() && within(entity) => Some(ScopeMatch::IsIn),
        _ => None,
    }
}

pub(crate) fn principal_match_reason(
    constraint: &ScopeConstraint,
    principal: &EntityUid,
    store: &EntityStore,
) -> Option<PolicyMatchReason> {
    scope_match(constraint, principal, store).map(|m| match m {
        ScopeMatch::Any => PolicyMatchReason::PrincipalAny,
        ScopeMatch::Eq => PolicyMatchReason::PrincipalEq,
        ScopeMatch::In => PolicyMatchReason::PrincipalIn,
        ScopeMatch::Is => PolicyMatchReason::PrincipalIs,
        ScopeMatch::IsIn => PolicyMatchReason::PrincipalIsIn,
    })
}

pub(crate) fn resource_match_reason(
    constraint: &ScopeConstraint,
    resource: &EntityUid,
    store: &EntityStore,
) -> Option<PolicyMatchReason> {
    scope_match(constraint, resource, store).map(|m| match m {
        ScopeMatch::Any => PolicyMatchReason::ResourceAny,
        ScopeMatch::Eq => PolicyMatchReason::ResourceEq,
        ScopeMatch::In => PolicyMatchReason::ResourceIn,
        ScopeMatch::Is => PolicyMatchReason::ResourceIs,
        ScopeMatch::IsIn => PolicyMatchReason::ResourceIsIn,
    })
}

/// `action == A` is exact; `action in [..]` follows the action hierarchy.
pub(crate) fn action_match_reason(
    constraint: &ActionConstraint,
    action: &EntityUid,
    store: &EntityStore,
) -> Option<PolicyMatchReason> {
    match constraint {
        ActionConstraint::Any => Some(PolicyMatchReason::ActionAny),
        ActionConstraint::Eq { entity } if entity == action => Some(PolicyMatchReason::ActionEq),
        ActionConstraint::In { entities }
            if entities
                .iter()
                .any(|group| store.is_descendant_of(action, group)) =>
        {
            Some(PolicyMatchReason::ActionIn)
        }
        _ => None,
    }
}

pub(crate) fn matches_effect(effect: Effect, filter: PolicyEffectFilter) -> bool {
    match filter {
        PolicyEffectFilter::Any => true,
        PolicyEffectFilter::Permit => effect == Effect::Permit,
        PolicyEffectFilter::Forbid => effect == Effect::Forbid,
    }
}
