//! Templates and their instantiation into concrete policies.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::parser::parse_policy;
use crate::types::{EntityRef, EntityUid, Policy, PolicyId, SlotId};

/// A policy whose scope may name `?principal` and `?resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    policy: Policy,
}

impl Template {
    pub fn new(policy: Policy) -> Self {
        Template { policy }
    }

    /// Parse a single template and store it under `id`.
    pub fn parse(id: impl Into<PolicyId>, text: &str) -> Result<Self, PolicyError> {
        let mut policy = parse_policy(text)?;
        policy.set_id(id.into());
        Ok(Template::new(policy))
    }

    pub fn id(&self) -> &PolicyId {
        self.policy.id()
    }

    pub fn slots(&self) -> BTreeSet<SlotId> {
        self.policy.slots()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// A request to instantiate `template` with concrete entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateLink {
    pub template: PolicyId,
    #[serde(default)]
    pub bindings: BTreeMap<SlotId, EntityUid>,
}

impl TemplateLink {
    pub fn new(template: impl Into<PolicyId>) -> Self {
        TemplateLink {
            template: template.into(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, slot: SlotId, uid: EntityUid) -> Self {
        self.bindings.insert(slot, uid);
        self
    }

    /// The id given to the linked policy; the same bindings always give the same id.
    pub fn derived_id(&self) -> PolicyId {
        link_id(&self.template, &self.bindings)
    }
}

fn link_id(template: &PolicyId, bindings: &BTreeMap<SlotId, EntityUid>) -> PolicyId {
    let args = bindings
        .iter()
        .map(|(slot, uid)| format!("{slot}={uid}"))
        .join(",");
    PolicyId::new(format!("{template}({args})"))
}

/// Substitute every slot of `template`, producing a concrete policy.
///
/// Every slot needs a binding and every binding needs a slot.
pub fn instantiate(
    template: &Template,
    bindings: &BTreeMap<SlotId, EntityUid>,
) -> Result<Policy, PolicyError> {
    let slots = template.slots();
    if let Some(slot) = slots.iter().find(|slot| !bindings.contains_key(*slot)) {
        return Err(PolicyError::UnboundSlot {
            template: template.id().to_string(),
            slot: slot.to_string(),
        });
    }
    if let Some(slot) = bindings.keys().find(|slot| !slots.contains(*slot)) {
        return Err(PolicyError::ExtraBinding {
            template: template.id().to_string(),
            slot: slot.to_string(),
        });
    }

    let mut policy = template.policy.clone();
    for constraint in policy.scope_mut() {
        let Some(entity) = constraint.entity_mut() else {
            continue;
        };
        if let EntityRef::Slot(slot) = *entity {
            if let Some(uid) = bindings.get(&slot) {
                *entity = EntityRef::Uid(uid.clone());
            }
        }
    }
    policy.set_id(link_id(template.id(), bindings));
    policy.set_template_id(template.id().clone());
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScopeConstraint;

    fn uid(text: &str) -> EntityUid {
        text.parse().unwrap()
    }

    fn share() -> Template {
        Template::parse(
            "share",
            r#"permit (principal == ?principal, action == Action::"view", resource in ?resource);"#,
        )
        .unwrap()
    }

    fn bindings(pairs: &[(SlotId, &str)]) -> BTreeMap<SlotId, EntityUid> {
        pairs.iter().map(|(slot, u)| (*slot, uid(u))).collect()
    }

    #[test]
    fn test_instantiate_substitutes_slots() {
        let policy = instantiate(
            &share(),
            &bindings(&[
                (SlotId::Principal, r#"User::"alice""#),
                (SlotId::Resource, r#"Album::"trip""#),
            ]),
        )
        .unwrap();

        assert!(!policy.is_template());
        assert_eq!(policy.template_id(), Some(&PolicyId::new("share")));
        assert_eq!(
            policy.principal_constraint(),
            &ScopeConstraint::Eq {
                entity: EntityRef::Uid(uid(r#"User::"alice""#))
            }
        );
        assert_eq!(
            policy.id().as_str(),
            r#"share(?principal=User::"alice",?resource=Album::"trip")"#
        );
    }

    #[test]
    fn test_instantiate_is_idempotent() {
        let b = bindings(&[
            (SlotId::Resource, r#"Album::"trip""#),
            (SlotId::Principal, r#"User::"alice""#),
        ]);
        let first = instantiate(&share(), &b).unwrap();
        let second = instantiate(&share(), &b).unwrap();
        assert_eq!(first, second);

        let link = TemplateLink::new("share")
            .bind(SlotId::Principal, uid(r#"User::"alice""#))
            .bind(SlotId::Resource, uid(r#"Album::"trip""#));
        assert_eq!(link.derived_id(), *first.id());
    }

    #[test]
    fn test_unbound_slot() {
        let err = instantiate(&share(), &bindings(&[(SlotId::Principal, r#"User::"a""#)]))
            .unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnboundSlot {
                template: "share".to_string(),
                slot: "?resource".to_string(),
            }
        );
    }

    #[test]
    fn test_extra_binding() {
        let template = Template::parse(
            "owner",
            r#"permit (principal == ?principal, action, resource);"#,
        )
        .unwrap();
        let err = instantiate(
            &template,
            &bindings(&[
                (SlotId::Principal, r#"User::"a""#),
                (SlotId::Resource, r#"Photo::"p""#),
            ]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PolicyError::ExtraBinding {
                template: "owner".to_string(),
                slot: "?resource".to_string(),
            }
        );
    }

    #[test]
    fn test_template_without_slots() {
        let template = Template::parse("static", r#"permit (principal, action, resource);"#).unwrap();
        let policy = instantiate(&template, &BTreeMap::new()).unwrap();
        assert_eq!(policy.id().as_str(), "static()");
    }

    #[test]
    fn test_link_wire_shape() {
        let link: TemplateLink = serde_json::from_value(serde_json::json!({
            "template": "share",
            "bindings": {"?principal": {"type": "User", "id": "alice"}}
        }))
        .unwrap();
        assert_eq!(link.bindings[&SlotId::Principal], uid(r#"User::"alice""#));
    }
}
