//! Ordered collection of concrete policies with unique ids.

use std::collections::HashMap;

use crate::error::PolicyError;
use crate::types::{Effect, Policy, PolicyId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    policies: Vec<Policy>,
    index: HashMap<PolicyId, usize>,
}

impl PolicySet {
    pub fn new() -> Self {
        PolicySet::default()
    }

    pub fn from_policies(policies: impl IntoIterator<Item = Policy>) -> Result<Self, PolicyError> {
        let mut set = PolicySet::new();
        for policy in policies {
            set.add(policy)?;
        }
        Ok(set)
    }

    /// Append a policy. Ids must be unique and templates must be linked first.
    pub fn add(&mut self, policy: Policy) -> Result<(), PolicyError> {
        if policy.is_template() {
            return Err(PolicyError::UnlinkedSlots(policy.id().to_string()));
        }
        if self.index.contains_key(policy.id()) {
            return Err(PolicyError::DuplicatePolicyId(policy.id().to_string()));
        }
        self.index.insert(policy.id().clone(), self.policies.len());
        self.policies.push(policy);
        Ok(())
    }

    pub fn get(&self, id: &PolicyId) -> Option<&Policy> {
        self.index.get(id).map(|&idx| &self.policies[idx])
    }

    pub fn contains(&self, id: &PolicyId) -> bool {
        self.index.contains_key(id)
    }

    /// Policies in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    pub fn permits(&self) -> impl Iterator<Item = &Policy> {
        self.with_effect(Effect::Permit)
    }

    pub fn forbids(&self) -> impl Iterator<Item = &Policy> {
        self.with_effect(Effect::Forbid)
    }

    fn with_effect(&self, effect: Effect) -> impl Iterator<Item = &Policy> {
        self.policies.iter().filter(move |p| p.effect() == effect)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl<'a> IntoIterator for &'a PolicySet {
    type Item = &'a Policy;
    type IntoIter = std::slice::Iter<'a, Policy>;

    fn into_iter(self) -> Self::IntoIter {
        self.policies.iter()
    }
}

impl IntoIterator for PolicySet {
    type Item = Policy;
    type IntoIter = std::vec::IntoIter<Policy>;

    fn into_iter(self) -> Self::IntoIter {
        self.policies.into_iter()
    }
}
