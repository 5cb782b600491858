//! Attribute values carried by entities, context and evaluation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::net::IpAddr;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use utoipa::ToSchema;

use crate::error::PolicyError;

use super::entity_uid::EntityUid;

/// Values that can be attached to entities or the request context.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "type", content = "value")]
pub enum AttrValue {
    Bool(bool),
    Long(i64),
    String(String),
    Entity(EntityUid),
    Ip(IpPrefix),
    #[schema(no_recursion)]
    Set(BTreeSet<AttrValue>),
    #[schema(no_recursion)]
    Record(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Long(_) => "long",
            AttrValue::String(_) => "string",
            AttrValue::Entity(_) => "entity",
            AttrValue::Ip(_) => "ipaddr",
            AttrValue::Set(_) => "set",
            AttrValue::Record(_) => "record",
        }
    }

    pub fn set(values: impl IntoIterator<Item = AttrValue>) -> Self {
        AttrValue::Set(values.into_iter().collect())
    }

    pub fn record<K: Into<String>>(pairs: impl IntoIterator<Item = (K, AttrValue)>) -> Self {
        AttrValue::Record(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Decode Cedar's JSON value form.
    ///
    /// Entities are written `{"__entity": {"type": .., "id": ..}}` and
    /// extension values `{"__extn": {"fn": "ip", "arg": ".."}}`; any other
    /// object is a record and any array a set.
    pub fn from_cedar_json(value: &Value) -> Result<Self, PolicyError> {
        match value {
            Value::Bool(b) => Ok(AttrValue::Bool(*b)),
            Value::Number(n) => n.as_i64().map(AttrValue::Long).ok_or_else(|| {
                PolicyError::InvalidFormat(format!("{n} is not a 64-bit integer"))
            }),
            Value::String(s) => Ok(AttrValue::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(AttrValue::from_cedar_json)
                .collect::<Result<BTreeSet<_>, _>>()
                .map(AttrValue::Set),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(uid) = map.get("__entity") {
                        return Ok(AttrValue::Entity(serde_json::from_value(uid.clone())?));
                    }
                    if let Some(extn) = map.get("__extn") {
                        return decode_extension(extn);
                    }
                }
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), AttrValue::from_cedar_json(v)?)))
                    .collect::<Result<BTreeMap<_, _>, PolicyError>>()
                    .map(AttrValue::Record)
            }
            Value::Null => Err(PolicyError::InvalidFormat(
                "null is not an attribute value".to_string(),
            )),
        }
    }

    /// Encode as Cedar's JSON value form; inverse of [`AttrValue::from_cedar_json`].
    pub fn to_cedar_json(&self) -> Value {
        match self {
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::Long(n) => json!(n),
            AttrValue::String(s) => Value::String(s.clone()),
            AttrValue::Entity(uid) => json!({ "__entity": uid }),
            AttrValue::Ip(ip) => json!({ "__extn": { "fn": "ip", "arg": ip.to_string() } }),
            AttrValue::Set(items) => Value::Array(items.iter().map(|v| v.to_cedar_json()).collect()),
            AttrValue::Record(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_cedar_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

fn decode_extension(extn: &Value) -> Result<AttrValue, PolicyError> {
    let function = extn.get("fn").and_then(Value::as_str);
    let arg = extn.get("arg").and_then(Value::as_str);
    match (function, arg) {
        (Some("ip"), Some(arg)) => Ok(AttrValue::Ip(arg.parse()?)),
        (Some(other), _) => Err(PolicyError::InvalidFormat(format!(
            "unsupported extension function `{other}`"
        ))),
        _ => Err(PolicyError::InvalidFormat(format!(
            "malformed extension value {extn}"
        ))),
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Long(n) => write!(f, "{n}"),
            AttrValue::String(s) => write!(f, "\"{}\"", super::entity_uid::escape_id(s)),
            AttrValue::Entity(uid) => write!(f, "{uid}"),
            AttrValue::Ip(ip) => write!(f, "ip(\"{ip}\")"),
            AttrValue::Set(items) => write!(f, "[{}]", items.iter().join(", ")),
            AttrValue::Record(map) => write!(
                f,
                "{{{}}}",
                map.iter()
                    .map(|(k, v)| format!("\"{}\": {v}", super::entity_uid::escape_id(k)))
                    .join(", ")
            ),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Long(n)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<EntityUid> for AttrValue {
    fn from(uid: EntityUid) -> Self {
        AttrValue::Entity(uid)
    }
}

/// An IP address with a prefix length; a plain address has a full-length prefix.
///
/// Serialised as its text form (`10.0.0.0/8`), so decoding goes through the
/// same checks as parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    #[schema(value_type = String)]
    addr: IpAddr,
    prefix: u8,
}

impl IpPrefix {
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn width(addr: &IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    fn bits(addr: &IpAddr) -> u128 {
        match addr {
            IpAddr::V4(v4) => u128::from(u32::from(*v4)),
            IpAddr::V6(v6) => u128::from(*v6),
        }
    }

    fn network(addr: &IpAddr, prefix: u8) -> u128 {
        let width = IpPrefix::width(addr);
        let host_bits = u32::from(width - prefix);
        let bits = IpPrefix::bits(addr);
        if host_bits >= 128 {
            0
        } else {
            (bits >> host_bits) << host_bits
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    pub fn is_loopback(&self) -> bool {
        self.addr.is_loopback()
    }

    /// True when every address of `self` lies within `range`.
    pub fn is_in_range(&self, range: &IpPrefix) -> bool {
        if self.is_ipv4() != range.is_ipv4() || self.prefix < range.prefix {
            return false;
        }
        IpPrefix::network(&self.addr, range.prefix) == IpPrefix::network(&range.addr, range.prefix)
    }
}

impl FromStr for IpPrefix {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PolicyError::ParseError(format!("invalid ip address `{s}`"));
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let width = IpPrefix::width(&addr);
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => width,
        };
        if prefix > width {
            return Err(invalid());
        }
        Ok(IpPrefix { addr, prefix })
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = PolicyError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(ip: IpPrefix) -> Self {
        ip.to_string()
    }
}

impl Display for IpPrefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.prefix == IpPrefix::width(&self.addr) {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{}/{}", self.addr, self.prefix)
        }
    }
}
