//! Request context values visible to conditions as `context`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::AttrValue;

/// Typed wrapper for request context attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RequestContext(BTreeMap<String, AttrValue>);

impl RequestContext {
    /// Create an empty request context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one context attribute and return the updated context.
    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Insert one context attribute.
    pub fn insert(&mut self, key: impl Into<String>, value: AttrValue) -> Option<AttrValue> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }

    /// The context as a record value, which is how conditions see it.
    pub fn to_record(&self) -> AttrValue {
        AttrValue::Record(self.0.clone())
    }
}

impl From<BTreeMap<String, AttrValue>> for RequestContext {
    fn from(value: BTreeMap<String, AttrValue>) -> Self {
        Self(value)
    }
}

impl From<RequestContext> for BTreeMap<String, AttrValue> {
    fn from(value: RequestContext) -> Self {
        value.0
    }
}

impl<'a> IntoIterator for &'a RequestContext {
    type Item = (&'a String, &'a AttrValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, AttrValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
