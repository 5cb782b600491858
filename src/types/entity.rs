//! Entity records: a UID, its attributes and its direct parents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::PolicyError;

use super::attr_value::AttrValue;
use super::entity_uid::EntityUid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    uid: EntityUid,
    attrs: BTreeMap<String, AttrValue>,
    parents: BTreeSet<EntityUid>,
}

impl Entity {
    pub fn new(
        uid: EntityUid,
        attrs: BTreeMap<String, AttrValue>,
        parents: impl IntoIterator<Item = EntityUid>,
    ) -> Self {
        Entity {
            uid,
            attrs,
            parents: parents.into_iter().collect(),
        }
    }

    /// An entity with no attributes and no parents.
    pub fn with_uid(uid: EntityUid) -> Self {
        Entity::new(uid, BTreeMap::new(), [])
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn with_parent(mut self, parent: EntityUid) -> Self {
        self.parents.insert(parent);
        self
    }

    pub fn uid(&self) -> &EntityUid {
        &self.uid
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    pub fn parents(&self) -> &BTreeSet<EntityUid> {
        &self.parents
    }
}

/// Wire shape: `{"uid": {..}, "attrs": {..}, "parents": [{..}]}` with Cedar JSON attribute values.
#[derive(Serialize, Deserialize)]
struct EntityJson {
    uid: EntityUid,
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
    #[serde(default)]
    parents: Vec<EntityUid>,
}

impl TryFrom<EntityJson> for Entity {
    type Error = PolicyError;

    fn try_from(json: EntityJson) -> Result<Self, Self::Error> {
        let attrs = json
            .attrs
            .iter()
            .map(|(k, v)| Ok((k.clone(), AttrValue::from_cedar_json(v)?)))
            .collect::<Result<BTreeMap<_, _>, PolicyError>>()?;
        Ok(Entity::new(json.uid, attrs, json.parents))
    }
}

impl From<&Entity> for EntityJson {
    fn from(entity: &Entity) -> Self {
        EntityJson {
            uid: entity.uid.clone(),
            attrs: entity
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.to_cedar_json()))
                .collect(),
            parents: entity.parents.iter().cloned().collect(),
        }
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        EntityJson::from(self).serialize(ser)
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let json = EntityJson::deserialize(de)?;
        Entity::try_from(json).map_err(serde::de::Error::custom)
    }
}
