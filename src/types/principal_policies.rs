//! Policies listed for one principal, with the reasons each one matched.

use itertools::Itertools;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::{Display, EnumString};

use super::entity_uid::EntityUid;
use super::policy::Policy;

/// Which effects a listing should include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyEffectFilter {
    #[default]
    Any,
    Permit,
    Forbid,
}

/// The scope element that made a policy match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyMatchReason {
    PrincipalEq,
    PrincipalIn,
    PrincipalAny,
    PrincipalIs,
    PrincipalIsIn,
    ResourceEq,
    ResourceIn,
    ResourceAny,
    ResourceIs,
    ResourceIsIn,
    ActionEq,
    ActionIn,
    ActionAny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyMatch {
    pub policy: Policy,
    pub reasons: Vec<PolicyMatchReason>,
}

/// Every policy whose scope admits a principal, in policy set order.
///
/// Conditions are not evaluated; a listed policy may still not apply to a
/// concrete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalPolicies {
    principal: EntityUid,
    matches: Vec<PolicyMatch>,
}

impl PrincipalPolicies {
    pub fn new(principal: EntityUid, matches: Vec<PolicyMatch>) -> Self {
        PrincipalPolicies { principal, matches }
    }

    pub fn principal(&self) -> &EntityUid {
        &self.principal
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn matches(&self) -> &[PolicyMatch] {
        &self.matches
    }

    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.matches.iter().map(|m| &m.policy)
    }

    /// Actions named by the listed policies. Unconstrained actions name none.
    pub fn actions(&self) -> Vec<&EntityUid> {
        self.policies()
            .flat_map(|p| p.action_constraint().actions())
            .collect()
    }

    /// Distinct action names, sorted.
    pub fn actions_by_name(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .map(|a| a.to_string())
            .sorted()
            .dedup()
            .collect()
    }

    /// Policy ids, sorted.
    pub fn policies_by_name(&self) -> Vec<String> {
        self.policies()
            .map(|p| p.id().to_string())
            .sorted()
            .collect()
    }
}

impl Serialize for PrincipalPolicies {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = ser.serialize_struct("PrincipalPolicies", 2)?;
        s.serialize_field("principal", &self.principal.to_string())?;
        s.serialize_field("policies", &self.matches)?;
        s.end()
    }
}
