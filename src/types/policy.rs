//! Policy syntax tree: scope constraints, conditions and the policy itself.
//!
//! Every node renders back to policy text through `Display`, and the text
//! parses back into the same tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

use super::attr_value::AttrValue;
use super::entity_uid::{EntityUid, escape_id, is_ident_continue, is_ident_start};

/// Identifier of a policy, template or linked policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    pub fn new(id: impl Into<String>) -> Self {
        PolicyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PolicyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for PolicyId {
    fn from(id: &str) -> Self {
        PolicyId::new(id)
    }
}

impl From<String> for PolicyId {
    fn from(id: String) -> Self {
        PolicyId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Effect {
    Permit,
    Forbid,
}

/// Template placeholders.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, StrumDisplay, EnumString,
)]
pub enum SlotId {
    #[serde(rename = "?principal")]
    #[strum(serialize = "?principal")]
    Principal,
    #[serde(rename = "?resource")]
    #[strum(serialize = "?resource")]
    Resource,
}

/// An entity named in a scope constraint: concrete, or a slot to be linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Uid(EntityUid),
    Slot(SlotId),
}

impl EntityRef {
    pub fn as_uid(&self) -> Option<&EntityUid> {
        match self {
            EntityRef::Uid(uid) => Some(uid),
            EntityRef::Slot(_) => None,
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EntityRef::Uid(uid) => write!(f, "{uid}"),
            EntityRef::Slot(slot) => write!(f, "{slot}"),
        }
    }
}

/// Constraint on the principal or the resource of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ScopeConstraint {
    #[serde(rename = "All")]
    Any,
    #[serde(rename = "==")]
    Eq { entity: EntityRef },
    #[serde(rename = "in")]
    In { entity: EntityRef },
    #[serde(rename = "is")]
    Is { entity_type: String },
    #[serde(rename = "is_in")]
    IsIn {
        entity_type: String,
        entity: EntityRef,
    },
}

impl ScopeConstraint {
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            ScopeConstraint::Eq { entity }
            | ScopeConstraint::In { entity }
            | ScopeConstraint::IsIn { entity, .. } => Some(entity),
            ScopeConstraint::Any | ScopeConstraint::Is { .. } => None,
        }
    }

    pub(crate) fn entity_mut(&mut self) -> Option<&mut EntityRef> {
        match self {
            ScopeConstraint::Eq { entity }
            | ScopeConstraint::In { entity }
            | ScopeConstraint::IsIn { entity, .. } => Some(entity),
            ScopeConstraint::Any | ScopeConstraint::Is { .. } => None,
        }
    }

    fn fmt_for(&self, var: &str, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ScopeConstraint::Any => write!(f, "{var}"),
            ScopeConstraint::Eq { entity } => write!(f, "{var} == {entity}"),
            ScopeConstraint::In { entity } => write!(f, "{var} in {entity}"),
            ScopeConstraint::Is { entity_type } => write!(f, "{var} is {entity_type}"),
            ScopeConstraint::IsIn {
                entity_type,
                entity,
            } => write!(f, "{var} is {entity_type} in {entity}"),
        }
    }
}

/// Constraint on the action of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ActionConstraint {
    #[serde(rename = "All")]
    Any,
    #[serde(rename = "==")]
    Eq { entity: EntityUid },
    #[serde(rename = "in")]
    In { entities: Vec<EntityUid> },
}

impl ActionConstraint {
    /// Every action named by this constraint.
    pub fn actions(&self) -> Vec<&EntityUid> {
        match self {
            ActionConstraint::Any => Vec::new(),
            ActionConstraint::Eq { entity } => vec![entity],
            ActionConstraint::In { entities } => entities.iter().collect(),
        }
    }
}

impl Display for ActionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ActionConstraint::Any => write!(f, "action"),
            ActionConstraint::Eq { entity } => write!(f, "action == {entity}"),
            ActionConstraint::In { entities } => {
                write!(f, "action in [{}]", entities.iter().join(", "))
            }
        }
    }
}

/// The variables a condition can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Var {
    Principal,
    Action,
    Resource,
    Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay)]
pub enum UnaryOp {
    #[serde(rename = "!")]
    #[strum(serialize = "!")]
    Not,
    #[serde(rename = "neg")]
    #[strum(serialize = "-")]
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay)]
pub enum BinaryOp {
    #[serde(rename = "&&")]
    #[strum(serialize = "&&")]
    And,
    #[serde(rename = "||")]
    #[strum(serialize = "||")]
    Or,
    #[serde(rename = "==")]
    #[strum(serialize = "==")]
    Eq,
    #[serde(rename = "!=")]
    #[strum(serialize = "!=")]
    NotEq,
    #[serde(rename = "<")]
    #[strum(serialize = "<")]
    Less,
    #[serde(rename = "<=")]
    #[strum(serialize = "<=")]
    LessEq,
    #[serde(rename = ">")]
    #[strum(serialize = ">")]
    Greater,
    #[serde(rename = ">=")]
    #[strum(serialize = ">=")]
    GreaterEq,
    #[serde(rename = "in")]
    #[strum(serialize = "in")]
    In,
    #[serde(rename = "+")]
    #[strum(serialize = "+")]
    Add,
    #[serde(rename = "-")]
    #[strum(serialize = "-")]
    Sub,
    #[serde(rename = "*")]
    #[strum(serialize = "*")]
    Mul,
}

/// Methods callable with `receiver.method(args)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Method {
    Contains,
    ContainsAll,
    ContainsAny,
    IsInRange,
    IsIpv4,
    IsIpv6,
    IsLoopback,
}

impl Method {
    /// Number of arguments besides the receiver.
    pub fn arity(&self) -> usize {
        match self {
            Method::Contains | Method::ContainsAll | Method::ContainsAny | Method::IsInRange => 1,
            Method::IsIpv4 | Method::IsIpv6 | Method::IsLoopback => 0,
        }
    }
}

/// Free functions, called as `name(args)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Function {
    Ip,
}

impl Function {
    pub fn arity(&self) -> usize {
        match self {
            Function::Ip => 1,
        }
    }
}

/// One element of a `like` pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternElem {
    Literal(char),
    Wildcard,
}

/// Match `text` against a `like` pattern, where `Wildcard` spans any run of characters.
pub fn pattern_matches(pattern: &[PatternElem], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(PatternElem::Wildcard) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(PatternElem::Literal(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|e| *e == PatternElem::Wildcard)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Value(AttrValue),
    Var(Var),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    #[serde(rename = ".")]
    GetAttr { left: Box<Expr>, attr: String },
    #[serde(rename = "has")]
    HasAttr { left: Box<Expr>, attr: String },
    #[serde(rename = "like")]
    Like {
        left: Box<Expr>,
        pattern: Vec<PatternElem>,
    },
    #[serde(rename = "is")]
    Is {
        left: Box<Expr>,
        entity_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_expr: Option<Box<Expr>>,
    },
    Set(Vec<Expr>),
    Record(BTreeMap<String, Expr>),
    Method {
        receiver: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn value(value: impl Into<AttrValue>) -> Self {
        Expr::Value(value.into())
    }

    pub fn var(var: Var) -> Self {
        Expr::Var(var)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Or, left, right)
    }

    pub fn not(arg: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            arg: Box::new(arg),
        }
    }

    pub fn get_attr(left: Expr, attr: impl Into<String>) -> Self {
        Expr::GetAttr {
            left: Box::new(left),
            attr: attr.into(),
        }
    }

    pub fn has_attr(left: Expr, attr: impl Into<String>) -> Self {
        Expr::HasAttr {
            left: Box::new(left),
            attr: attr.into(),
        }
    }

    /// Binds looser than a member access; needs parentheses as an operand.
    fn is_compound(&self) -> bool {
        matches!(
            self,
            Expr::Binary { .. }
                | Expr::If { .. }
                | Expr::Like { .. }
                | Expr::Is { .. }
                | Expr::HasAttr { .. }
        )
    }

    fn fmt_operand(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.is_compound() {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }

    fn fmt_receiver(&self, f: &mut Formatter<'_>) -> FmtResult {
        let negative = matches!(self, Expr::Value(AttrValue::Long(n)) if *n < 0);
        if self.is_compound() || negative || matches!(self, Expr::Unary { .. }) {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

fn is_plain_ident(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if is_ident_start(c)) && chars.all(is_ident_continue)
}

fn fmt_attr_name(attr: &str, f: &mut Formatter<'_>) -> FmtResult {
    if is_plain_ident(attr) {
        f.write_str(attr)
    } else {
        write!(f, "\"{}\"", escape_id(attr))
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Expr::Value(value) => write!(f, "{value}"),
            Expr::Var(var) => write!(f, "{var}"),
            Expr::Unary { op, arg } => {
                write!(f, "{op}")?;
                if matches!(**arg, Expr::Value(AttrValue::Long(_))) {
                    write!(f, "({arg})")
                } else {
                    arg.fmt_operand(f)
                }
            }
            Expr::Binary { op, left, right } => {
                left.fmt_operand(f)?;
                write!(f, " {op} ")?;
                right.fmt_operand(f)
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => write!(f, "if {cond} then {then} else {otherwise}"),
            Expr::GetAttr { left, attr } => {
                left.fmt_receiver(f)?;
                if is_plain_ident(attr) {
                    write!(f, ".{attr}")
                } else {
                    write!(f, "[\"{}\"]", escape_id(attr))
                }
            }
            Expr::HasAttr { left, attr } => {
                left.fmt_operand(f)?;
                f.write_str(" has ")?;
                fmt_attr_name(attr, f)
            }
            Expr::Like { left, pattern } => {
                left.fmt_operand(f)?;
                f.write_str(" like \"")?;
                for elem in pattern {
                    match elem {
                        PatternElem::Wildcard => f.write_str("*")?,
                        PatternElem::Literal('*') => f.write_str("\\*")?,
                        PatternElem::Literal(c) => f.write_str(&escape_id(&c.to_string()))?,
                    }
                }
                f.write_str("\"")
            }
            Expr::Is {
                left,
                entity_type,
                in_expr,
            } => {
                left.fmt_operand(f)?;
                write!(f, " is {entity_type}")?;
                if let Some(in_expr) = in_expr {
                    f.write_str(" in ")?;
                    in_expr.fmt_operand(f)?;
                }
                Ok(())
            }
            Expr::Set(items) => write!(f, "[{}]", items.iter().join(", ")),
            Expr::Record(fields) => {
                f.write_str("{")?;
                for (idx, (key, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{}\": {value}", escape_id(key))?;
                }
                f.write_str("}")
            }
            Expr::Method {
                receiver,
                method,
                args,
            } => {
                receiver.fmt_receiver(f)?;
                write!(f, ".{method}({})", args.iter().join(", "))
            }
            Expr::Call { function, args } => write!(f, "{function}({})", args.iter().join(", ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClauseKind {
    When,
    Unless,
}

/// A `when { .. }` or `unless { .. }` block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clause {
    pub kind: ClauseKind,
    pub body: Expr,
}

impl Display for Clause {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} {{ {} }}", self.kind, self.body)
    }
}

/// A permit or forbid rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    /// Slice documents key policies by id, so the AST may leave this out.
    #[serde(default)]
    id: PolicyId,
    effect: Effect,
    principal: ScopeConstraint,
    action: ActionConstraint,
    resource: ScopeConstraint,
    #[serde(default)]
    conditions: Vec<Clause>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
    /// Set on policies produced by linking a template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_id: Option<PolicyId>,
}

impl Policy {
    pub fn new(
        id: impl Into<PolicyId>,
        effect: Effect,
        principal: ScopeConstraint,
        action: ActionConstraint,
        resource: ScopeConstraint,
    ) -> Self {
        Policy {
            id: id.into(),
            effect,
            principal,
            action,
            resource,
            conditions: Vec::new(),
            annotations: BTreeMap::new(),
            template_id: None,
        }
    }

    pub fn with_condition(mut self, kind: ClauseKind, body: Expr) -> Self {
        self.conditions.push(Clause { kind, body });
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &PolicyId {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: PolicyId) {
        self.id = id;
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn principal_constraint(&self) -> &ScopeConstraint {
        &self.principal
    }

    pub fn action_constraint(&self) -> &ActionConstraint {
        &self.action
    }

    pub fn resource_constraint(&self) -> &ScopeConstraint {
        &self.resource
    }

    pub fn conditions(&self) -> &[Clause] {
        &self.conditions
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn template_id(&self) -> Option<&PolicyId> {
        self.template_id.as_ref()
    }

    pub(crate) fn set_template_id(&mut self, template_id: PolicyId) {
        self.template_id = Some(template_id);
    }

    /// The principal and resource constraints, the only places slots may appear.
    pub(crate) fn scope_mut(&mut self) -> [&mut ScopeConstraint; 2] {
        [&mut self.principal, &mut self.resource]
    }

    /// Slots used anywhere in the scope.
    pub fn slots(&self) -> BTreeSet<SlotId> {
        [&self.principal, &self.resource]
            .into_iter()
            .filter_map(|constraint| match constraint.entity() {
                Some(EntityRef::Slot(slot)) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    pub fn is_template(&self) -> bool {
        !self.slots().is_empty()
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (key, value) in &self.annotations {
            writeln!(f, "@{key}(\"{}\")", escape_id(value))?;
        }
        write!(f, "{} (", self.effect)?;
        self.principal.fmt_for("principal", f)?;
        write!(f, ", {}, ", self.action)?;
        self.resource.fmt_for("resource", f)?;
        f.write_str(")")?;
        for clause in &self.conditions {
            write!(f, " {clause}")?;
        }
        f.write_str(";")
    }
}
