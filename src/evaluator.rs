//! Authorization decisions over an immutable [`Slice`].
//!
//! A policy applies when its scope matches the request and every condition
//! holds. Any applying forbid denies; otherwise any applying permit allows;
//! otherwise the request is denied by default.
//!
//! Condition errors never abort a request. An error makes its policy not
//! apply and is reported in [`Decision::errors`]; the remaining policies are
//! still evaluated.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::config::{EngineConfig, UnknownEntityMode};
use crate::entities::EntityStore;
use crate::policy_match::{action_match_reason, scope_match};
use crate::slice::Slice;
use crate::timers::{PhaseDurations, PhaseTimer};
use crate::types::{
    AttrValue, BinaryOp, ClauseKind, Decision, Effect, EntityUid, EvaluationError,
    EvaluationErrorKind, Expr, Function, IpPrefix, Method, Policy, PolicyId, Request, UnaryOp,
    Var, pattern_matches,
};

/// Decide `request` against `slice` with the default configuration.
pub fn is_authorized(slice: &Slice, request: &Request) -> Decision {
    Authorizer::default().is_authorized(slice, request)
}

/// Evaluates requests under an [`EngineConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Authorizer {
    unknown_entities: UnknownEntityMode,
}

impl Authorizer {
    pub fn new(config: &EngineConfig) -> Self {
        Authorizer {
            unknown_entities: config.unknown_entities,
        }
    }

    pub fn is_authorized(&self, slice: &Slice, request: &Request) -> Decision {
        self.authorize(slice, request, None)
    }

    /// Like [`Authorizer::is_authorized`], also reporting time spent per phase.
    pub fn is_authorized_timed(&self, slice: &Slice, request: &Request) -> (Decision, PhaseDurations) {
        let mut phases = PhaseDurations::default();
        let decision = self.authorize(slice, request, Some(&mut phases));
        (decision, phases)
    }

    fn authorize(
        &self,
        slice: &Slice,
        request: &Request,
        mut phases: Option<&mut PhaseDurations>,
    ) -> Decision {
        let store = slice.entities();

        if self.unknown_entities == UnknownEntityMode::Strict {
            let errors = unknown_request_entities(request, store);
            if !errors.is_empty() {
                debug!(
                    event = "Request",
                    phase = "Strict",
                    errors = errors.iter().join("; ")
                );
                return Decision {
                    allowed: false,
                    determining_policies: Vec::new(),
                    errors,
                    version: slice.version().clone(),
                };
            }
        }

        let candidates: Vec<&Policy> = {
            let _timer = PhaseTimer::optional(phases.as_deref_mut().map(|p| &mut p.scope));
            slice
                .expanded()
                .iter()
                .filter(|policy| scope_applies(policy, request, store))
                .collect()
        };

        let mut permits: Vec<PolicyId> = Vec::new();
        let mut forbids: Vec<PolicyId> = Vec::new();
        let mut errors: Vec<EvaluationError> = Vec::new();
        {
            let _timer = PhaseTimer::optional(phases.as_deref_mut().map(|p| &mut p.conditions));
            let eval = Evaluation::new(request, store);
            for policy in candidates {
                match eval.conditions_hold(policy) {
                    Ok(true) => match policy.effect() {
                        Effect::Permit => permits.push(policy.id().clone()),
                        Effect::Forbid => forbids.push(policy.id().clone()),
                    },
                    Ok(false) => {}
                    Err(err) => {
                        debug!(
                            event = "Request",
                            phase = "Condition",
                            policy = policy.id().to_string(),
                            error = err.to_string()
                        );
                        errors.push(err.into_evaluation_error(policy.id()));
                    }
                }
            }
        }

        let allowed = forbids.is_empty() && !permits.is_empty();
        let determining_policies = if !forbids.is_empty() {
            forbids
        } else if allowed {
            permits
        } else {
            Vec::new()
        };

        Decision {
            allowed,
            determining_policies,
            errors,
            version: slice.version().clone(),
        }
    }
}

fn scope_applies(policy: &Policy, request: &Request, store: &EntityStore) -> bool {
    scope_match(policy.principal_constraint(), &request.principal, store).is_some()
        && action_match_reason(policy.action_constraint(), &request.action, store).is_some()
        && scope_match(policy.resource_constraint(), &request.resource, store).is_some()
}

fn unknown_request_entities(request: &Request, store: &EntityStore) -> Vec<EvaluationError> {
    [("principal", &request.principal), ("resource", &request.resource)]
        .into_iter()
        .filter(|(_, uid)| !store.contains(uid))
        .map(|(role, uid)| EvaluationError {
            policy_id: None,
            kind: EvaluationErrorKind::UnknownEntity,
            message: format!("unknown {role} {uid}"),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum EvalError {
    /// Missing attribute or unknown entity.
    #[error("{0}")]
    Attribute(String),
    /// Type mismatch, overflow, bad extension argument.
    #[error("{0}")]
    PolicyEval(String),
}

impl EvalError {
    fn into_evaluation_error(self, policy: &PolicyId) -> EvaluationError {
        let (kind, message) = match self {
            EvalError::Attribute(message) => (EvaluationErrorKind::Attribute, message),
            EvalError::PolicyEval(message) => (EvaluationErrorKind::PolicyEval, message),
        };
        EvaluationError {
            policy_id: Some(policy.clone()),
            kind,
            message,
        }
    }
}

type EvalResult<T> = Result<T, EvalError>;

fn type_error(expected: &str, found: &AttrValue) -> EvalError {
    EvalError::PolicyEval(format!("expected {expected}, found {}", found.type_name()))
}

fn overflow(op: BinaryOp, a: i64, b: i64) -> EvalError {
    EvalError::PolicyEval(format!("integer overflow in `{a} {op} {b}`"))
}

fn as_bool(value: AttrValue) -> EvalResult<bool> {
    match value {
        AttrValue::Bool(b) => Ok(b),
        other => Err(type_error("bool", &other)),
    }
}

fn as_long(value: AttrValue) -> EvalResult<i64> {
    match value {
        AttrValue::Long(n) => Ok(n),
        other => Err(type_error("long", &other)),
    }
}

fn as_entity(value: AttrValue) -> EvalResult<EntityUid> {
    match value {
        AttrValue::Entity(uid) => Ok(uid),
        other => Err(type_error("entity", &other)),
    }
}

/// Expression evaluation for one request.
struct Evaluation<'a> {
    request: &'a Request,
    store: &'a EntityStore,
    context: AttrValue,
}

impl<'a> Evaluation<'a> {
    fn new(request: &'a Request, store: &'a EntityStore) -> Self {
        Evaluation {
            request,
            store,
            context: request.context.to_record(),
        }
    }

    /// True when every `when` holds and no `unless` does.
    fn conditions_hold(&self, policy: &Policy) -> EvalResult<bool> {
        for clause in policy.conditions() {
            let value = self.eval_bool(&clause.body)?;
            let holds = match clause.kind {
                ClauseKind::When => value,
                ClauseKind::Unless => !value,
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_bool(&self, expr: &Expr) -> EvalResult<bool> {
        as_bool(self.eval(expr)?)
    }

    fn eval(&self, expr: &Expr) -> EvalResult<AttrValue> {
        match expr {
            Expr::Value(value) => Ok(value.clone()),
            Expr::Var(var) => Ok(self.var(*var)),
            Expr::Unary { op, arg } => {
                let value = self.eval(arg)?;
                match op {
                    UnaryOp::Not => Ok(AttrValue::Bool(!as_bool(value)?)),
                    UnaryOp::Neg => {
                        let n = as_long(value)?;
                        n.checked_neg().map(AttrValue::Long).ok_or_else(|| {
                            EvalError::PolicyEval(format!("integer overflow in `-{n}`"))
                        })
                    }
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::GetAttr { left, attr } => self.get_attr(self.eval(left)?, attr),
            Expr::HasAttr { left, attr } => self.has_attr(self.eval(left)?, attr).map(AttrValue::Bool),
            Expr::Like { left, pattern } => match self.eval(left)? {
                AttrValue::String(text) => Ok(AttrValue::Bool(pattern_matches(pattern, &text))),
                other => Err(type_error("string", &other)),
            },
            Expr::Is {
                left,
                entity_type,
                in_expr,
            } => {
                let uid = as_entity(self.eval(left)?)?;
                if uid.type_name() != entity_type {
                    return Ok(AttrValue::Bool(false));
                }
                match in_expr {
                    Some(target) => self.is_in(&uid, self.eval(target)?).map(AttrValue::Bool),
                    None => Ok(AttrValue::Bool(true)),
                }
            }
            Expr::Set(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<EvalResult<BTreeSet<_>>>()
                .map(AttrValue::Set),
            Expr::Record(fields) => fields
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.eval(value)?)))
                .collect::<EvalResult<BTreeMap<_, _>>>()
                .map(AttrValue::Record),
            Expr::Method {
                receiver,
                method,
                args,
            } => self.method(*method, self.eval(receiver)?, args),
            Expr::Call { function, args } => self.call(*function, args),
        }
    }

    fn var(&self, var: Var) -> AttrValue {
        match var {
            Var::Principal => AttrValue::Entity(self.request.principal.clone()),
            Var::Action => AttrValue::Entity(self.request.action.clone()),
            Var::Resource => AttrValue::Entity(self.request.resource.clone()),
            Var::Context => self.context.clone(),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> EvalResult<AttrValue> {
        let value = match op {
            BinaryOp::And => AttrValue::Bool(self.eval_bool(left)? && self.eval_bool(right)?),
            BinaryOp::Or => AttrValue::Bool(self.eval_bool(left)? || self.eval_bool(right)?),
            BinaryOp::Eq => AttrValue::Bool(self.eval(left)? == self.eval(right)?),
            BinaryOp::NotEq => AttrValue::Bool(self.eval(left)? != self.eval(right)?),
            BinaryOp::Less => self.compare(left, right, |a, b| a < b)?,
            BinaryOp::LessEq => self.compare(left, right, |a, b| a <= b)?,
            BinaryOp::Greater => self.compare(left, right, |a, b| a > b)?,
            BinaryOp::GreaterEq => self.compare(left, right, |a, b| a >= b)?,
            BinaryOp::Add => self.arith(op, left, right, i64::checked_add)?,
            BinaryOp::Sub => self.arith(op, left, right, i64::checked_sub)?,
            BinaryOp::Mul => self.arith(op, left, right, i64::checked_mul)?,
            BinaryOp::In => {
                let uid = as_entity(self.eval(left)?)?;
                AttrValue::Bool(self.is_in(&uid, self.eval(right)?)?)
            }
        };
        Ok(value)
    }

    fn compare(&self, left: &Expr, right: &Expr, cmp: fn(i64, i64) -> bool) -> EvalResult<AttrValue> {
        let a = as_long(self.eval(left)?)?;
        let b = as_long(self.eval(right)?)?;
        Ok(AttrValue::Bool(cmp(a, b)))
    }

    fn arith(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        apply: fn(i64, i64) -> Option<i64>,
    ) -> EvalResult<AttrValue> {
        let a = as_long(self.eval(left)?)?;
        let b = as_long(self.eval(right)?)?;
        apply(a, b)
            .map(AttrValue::Long)
            .ok_or_else(|| overflow(op, a, b))
    }

    /// `uid in target`, where target is an entity or a set of entities.
    fn is_in(&self, uid: &EntityUid, target: AttrValue) -> EvalResult<bool> {
        match target {
            AttrValue::Entity(ancestor) => Ok(self.store.is_descendant_of(uid, &ancestor)),
            AttrValue::Set(items) => {
                let mut found = false;
                for item in &items {
                    match item {
                        AttrValue::Entity(ancestor) => {
                            found |= self.store.is_descendant_of(uid, ancestor)
                        }
                        other => return Err(type_error("entity", other)),
                    }
                }
                Ok(found)
            }
            other => Err(type_error("entity or set of entities", &other)),
        }
    }

    fn get_attr(&self, value: AttrValue, attr: &str) -> EvalResult<AttrValue> {
        match value {
            AttrValue::Entity(uid) => {
                let entity = self
                    .store
                    .get(&uid)
                    .map_err(|_| EvalError::Attribute(format!("entity {uid} does not exist")))?;
                entity.attr(attr).cloned().ok_or_else(|| {
                    EvalError::Attribute(format!("{uid} has no attribute `{attr}`"))
                })
            }
            AttrValue::Record(mut fields) => fields
                .remove(attr)
                .ok_or_else(|| EvalError::Attribute(format!("record has no attribute `{attr}`"))),
            other => Err(type_error("entity or record", &other)),
        }
    }

    /// Unknown entities have no attributes.
    fn has_attr(&self, value: AttrValue, attr: &str) -> EvalResult<bool> {
        match value {
            AttrValue::Entity(uid) => Ok(self
                .store
                .get(&uid)
                .is_ok_and(|entity| entity.attr(attr).is_some())),
            AttrValue::Record(fields) => Ok(fields.contains_key(attr)),
            other => Err(type_error("entity or record", &other)),
        }
    }

    fn eval_args(&self, args: &[Expr]) -> EvalResult<Vec<AttrValue>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn method(&self, method: Method, receiver: AttrValue, args: &[Expr]) -> EvalResult<AttrValue> {
        let args = self.eval_args(args)?;
        let result = match (method, receiver, args.as_slice()) {
            (Method::Contains, AttrValue::Set(items), [arg]) => items.contains(arg),
            (Method::ContainsAll, AttrValue::Set(items), [AttrValue::Set(other)]) => {
                other.is_subset(&items)
            }
            (Method::ContainsAny, AttrValue::Set(items), [AttrValue::Set(other)]) => {
                !items.is_disjoint(other)
            }
            (Method::IsInRange, AttrValue::Ip(ip), [AttrValue::Ip(range)]) => ip.is_in_range(range),
            (Method::IsIpv4, AttrValue::Ip(ip), []) => ip.is_ipv4(),
            (Method::IsIpv6, AttrValue::Ip(ip), []) => ip.is_ipv6(),
            (Method::IsLoopback, AttrValue::Ip(ip), []) => ip.is_loopback(),
            (method, receiver, args) => {
                return Err(EvalError::PolicyEval(format!(
                    "cannot call `{method}` on {} with ({})",
                    receiver.type_name(),
                    args.iter().map(AttrValue::type_name).join(", ")
                )));
            }
        };
        Ok(AttrValue::Bool(result))
    }

    fn call(&self, function: Function, args: &[Expr]) -> EvalResult<AttrValue> {
        let args = self.eval_args(args)?;
        match (function, args.as_slice()) {
            (Function::Ip, [AttrValue::String(text)]) => text
                .parse::<IpPrefix>()
                .map(AttrValue::Ip)
                .map_err(|err| EvalError::PolicyEval(err.to_string())),
            (function, args) => Err(EvalError::PolicyEval(format!(
                "cannot call `{function}` with ({})",
                args.iter().map(AttrValue::type_name).join(", ")
            ))),
        }
    }
}
