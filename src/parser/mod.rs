//! Recursive-descent parser for policy text.
//!
//! ```text
//! policy    := annotation* ("permit" | "forbid") "(" scope "," action "," scope ")" clause* ";"
//! scope     := VAR [ "==" ref | "in" ref | "is" PATH [ "in" ref ] ]
//! action    := "action" [ "==" UID | "in" UID | "in" "[" UID,* "]" ]
//! clause    := ("when" | "unless") "{" expr "}"
//! expr      := "if" expr "then" expr "else" expr | or
//! or        := and ("||" and)*
//! and       := relation ("&&" relation)*
//! relation  := add [ RELOP add | "in" add | "has" NAME | "like" STR | "is" PATH [ "in" add ] ]
//! add       := mul (("+" | "-") mul)*
//! mul       := unary ("*" unary)*
//! unary     := ("!" | "-") unary | member
//! member    := primary ( "." NAME [ "(" args ")" ] | "[" STR "]" )*
//! ```
//!
//! Slots (`?principal`, `?resource`) are only accepted in the matching
//! scope position.

mod lexer;

use std::collections::BTreeMap;

use crate::error::PolicyError;
use crate::types::entity_uid::parse_escape;
use crate::types::{
    ActionConstraint, BinaryOp, Clause, ClauseKind, Effect, EntityRef, EntityUid, Expr, Function,
    Method, PatternElem, Policy, ScopeConstraint, SlotId, UnaryOp, Var,
};

use lexer::{Token, TokenKind, tokenize};

/// Parse every policy in `text`.
///
/// Policies are named by their `@id("..")` annotation, or `policy0`,
/// `policy1`, ... by position.
pub fn parse_policies(text: &str) -> Result<Vec<Policy>, PolicyError> {
    let mut parser = Parser::new(text)?;
    let mut policies = Vec::new();
    while *parser.peek() != TokenKind::Eof {
        let policy = parser.policy(format!("policy{}", policies.len()))?;
        policies.push(policy);
    }
    Ok(policies)
}

/// Parse exactly one policy (or template).
pub fn parse_policy(text: &str) -> Result<Policy, PolicyError> {
    let mut parser = Parser::new(text)?;
    let policy = parser.policy("policy0".to_string())?;
    parser.expect_end()?;
    Ok(policy)
}

/// Parse a standalone condition expression.
pub fn parse_expr(text: &str) -> Result<Expr, PolicyError> {
    let mut parser = Parser::new(text)?;
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Deepest expression nesting accepted, counted both in syntax tree levels
/// and in nested operands.
const MAX_NESTING: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Operands currently being parsed, one per enclosing `unary`.
    nesting: usize,
}

/// A parsed expression and the height of its syntax tree.
struct Node {
    expr: Expr,
    depth: usize,
}

impl Node {
    fn leaf(expr: Expr) -> Self {
        Node { expr, depth: 1 }
    }
}

fn unescape_str(raw: &str) -> Result<String, String> {
    let mut chars = raw.chars().peekable();
    let mut out = String::with_capacity(raw.len());
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(parse_escape(&mut chars)?);
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn unescape_pattern(raw: &str) -> Result<Vec<PatternElem>, String> {
    let mut chars = raw.chars().peekable();
    let mut out = Vec::new();
    while let Some(c) = chars.next() {
        let elem = match c {
            '*' => PatternElem::Wildcard,
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                PatternElem::Literal('*')
            }
            '\\' => PatternElem::Literal(parse_escape(&mut chars)?),
            c => PatternElem::Literal(c),
        };
        out.push(elem);
    }
    Ok(out)
}

/// Negate an unsigned literal, allowing `-9223372036854775808`.
fn negate_literal(n: u64) -> Option<i64> {
    if n == i64::MIN.unsigned_abs() {
        Some(i64::MIN)
    } else {
        i64::try_from(n).ok().map(|n| -n)
    }
}

impl Parser {
    fn new(text: &str) -> Result<Self, PolicyError> {
        Ok(Parser {
            tokens: tokenize(text)?,
            pos: 0,
            nesting: 0,
        })
    }

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    /// Look `n` tokens ahead; past the end this stays on `Eof`.
    fn peek_at(&self, n: usize) -> &TokenKind {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> PolicyError {
        PolicyError::ParseError(format!("{}:{}: {}", token.line, token.col, message.into()))
    }

    fn error_here(&self, message: impl Into<String>) -> PolicyError {
        self.error_at(&self.tokens[self.pos], message)
    }

    fn unexpected(&self, expected: &str) -> PolicyError {
        self.error_here(format!("expected {expected}, found {}", self.peek()))
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), PolicyError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(word) if word == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), PolicyError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{keyword}`")))
        }
    }

    fn expect_end(&self) -> Result<(), PolicyError> {
        if *self.peek() == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, PolicyError> {
        match self.peek().clone() {
            TokenKind::Ident(word) => {
                self.advance();
                Ok(word)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /// A string literal with escapes resolved.
    fn string(&mut self) -> Result<String, PolicyError> {
        match self.peek().clone() {
            TokenKind::Str(raw) => {
                let token = self.advance();
                unescape_str(&raw).map_err(|e| self.error_at(&token, e))
            }
            _ => Err(self.unexpected("a string")),
        }
    }

    /// An attribute or record key: identifier or string.
    fn attr_name(&mut self) -> Result<String, PolicyError> {
        if matches!(self.peek(), TokenKind::Str(_)) {
            self.string()
        } else {
            self.ident("an attribute name")
        }
    }

    fn type_path(&mut self) -> Result<String, PolicyError> {
        let mut segments = vec![self.ident("an entity type")?];
        while *self.peek() == TokenKind::ColonColon
            && matches!(self.peek_at(1), TokenKind::Ident(_))
        {
            self.advance();
            segments.push(self.ident("an entity type")?);
        }
        Ok(segments.join("::"))
    }

    fn entity_uid(&mut self) -> Result<EntityUid, PolicyError> {
        let start = self.tokens[self.pos].clone();
        let mut segments = vec![self.ident("an entity uid")?];
        loop {
            self.expect(&TokenKind::ColonColon)?;
            match self.peek().clone() {
                TokenKind::Ident(segment) => {
                    self.advance();
                    segments.push(segment);
                }
                TokenKind::Str(_) => {
                    let id = self.string()?;
                    return EntityUid::from_parts(&segments.join("::"), &id).map_err(|e| match e {
                        PolicyError::ParseError(message) => self.error_at(&start, message),
                        other => other,
                    });
                }
                _ => return Err(self.unexpected("a type name or a quoted id")),
            }
        }
    }

    fn policy(&mut self, default_id: String) -> Result<Policy, PolicyError> {
        let mut annotations = BTreeMap::new();
        while *self.peek() == TokenKind::At {
            let at = self.advance();
            let key = self.ident("an annotation name")?;
            self.expect(&TokenKind::LParen)?;
            let value = self.string()?;
            self.expect(&TokenKind::RParen)?;
            if annotations.insert(key.clone(), value).is_some() {
                return Err(self.error_at(&at, format!("duplicate annotation `@{key}`")));
            }
        }

        let effect = match self.peek() {
            TokenKind::Ident(word) => word.parse::<Effect>().ok(),
            _ => None,
        }
        .ok_or_else(|| self.unexpected("`permit` or `forbid`"))?;
        self.advance();

        self.expect(&TokenKind::LParen)?;
        let principal = self.scope("principal", SlotId::Principal)?;
        self.expect(&TokenKind::Comma)?;
        let action = self.action_scope()?;
        self.expect(&TokenKind::Comma)?;
        let resource = self.scope("resource", SlotId::Resource)?;
        self.expect(&TokenKind::RParen)?;

        let mut conditions = Vec::new();
        while let Some(kind) = match self.peek() {
            TokenKind::Ident(word) => word.parse::<ClauseKind>().ok(),
            _ => None,
        } {
            self.advance();
            self.expect(&TokenKind::LBrace)?;
            let body = self.expr()?;
            self.expect(&TokenKind::RBrace)?;
            conditions.push(Clause { kind, body });
        }
        self.expect(&TokenKind::Semi)?;

        let id = annotations.get("id").cloned().unwrap_or(default_id);
        let mut policy = Policy::new(id, effect, principal, action, resource);
        for clause in conditions {
            policy = policy.with_condition(clause.kind, clause.body);
        }
        for (key, value) in annotations {
            policy = policy.with_annotation(key, value);
        }
        Ok(policy)
    }

    fn scope(&mut self, var: &str, slot: SlotId) -> Result<ScopeConstraint, PolicyError> {
        self.expect_keyword(var)?;
        if self.eat(&TokenKind::EqEq) {
            return Ok(ScopeConstraint::Eq {
                entity: self.entity_ref(slot)?,
            });
        }
        if self.eat_keyword("in") {
            return Ok(ScopeConstraint::In {
                entity: self.entity_ref(slot)?,
            });
        }
        if self.eat_keyword("is") {
            let entity_type = self.type_path()?;
            if self.eat_keyword("in") {
                return Ok(ScopeConstraint::IsIn {
                    entity_type,
                    entity: self.entity_ref(slot)?,
                });
            }
            return Ok(ScopeConstraint::Is { entity_type });
        }
        Ok(ScopeConstraint::Any)
    }

    fn entity_ref(&mut self, expected: SlotId) -> Result<EntityRef, PolicyError> {
        if let TokenKind::Slot(name) = self.peek() {
            let slot = format!("?{name}")
                .parse::<SlotId>()
                .ok()
                .filter(|slot| *slot == expected)
                .ok_or_else(|| {
                    self.error_here(format!("slot `?{name}` is not allowed here, expected `{expected}`"))
                })?;
            self.advance();
            return Ok(EntityRef::Slot(slot));
        }
        Ok(EntityRef::Uid(self.entity_uid()?))
    }

    fn action_scope(&mut self) -> Result<ActionConstraint, PolicyError> {
        self.expect_keyword("action")?;
        if matches!(self.peek_at(1), TokenKind::Slot(_)) {
            self.advance();
            return Err(self.error_here("slots are not allowed in the action scope"));
        }
        if self.eat(&TokenKind::EqEq) {
            return Ok(ActionConstraint::Eq {
                entity: self.entity_uid()?,
            });
        }
        if self.eat_keyword("in") {
            if !self.eat(&TokenKind::LBracket) {
                return Ok(ActionConstraint::In {
                    entities: vec![self.entity_uid()?],
                });
            }
            let mut entities = Vec::new();
            if !self.eat(&TokenKind::RBracket) {
                loop {
                    entities.push(self.entity_uid()?);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBracket)?;
                        break;
                    }
                }
            }
            return Ok(ActionConstraint::In { entities });
        }
        Ok(ActionConstraint::Any)
    }

    fn expr(&mut self) -> Result<Expr, PolicyError> {
        Ok(self.or()?.expr)
    }

    /// Wrap `expr` one level above its deepest child.
    fn node(&self, expr: Expr, child_depth: usize) -> Result<Node, PolicyError> {
        let depth = child_depth + 1;
        if depth > MAX_NESTING {
            return Err(self.error_here("nesting too deep"));
        }
        Ok(Node { expr, depth })
    }

    fn binary(&self, op: BinaryOp, left: Node, right: Node) -> Result<Node, PolicyError> {
        let depth = left.depth.max(right.depth);
        self.node(Expr::binary(op, left.expr, right.expr), depth)
    }

    fn or(&mut self) -> Result<Node, PolicyError> {
        let mut left = self.and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.and()?;
            left = self.binary(BinaryOp::Or, left, right)?;
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, PolicyError> {
        let mut left = self.relation()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.relation()?;
            left = self.binary(BinaryOp::And, left, right)?;
        }
        Ok(left)
    }

    fn relation(&mut self) -> Result<Node, PolicyError> {
        let left = self.add()?;
        let op = match self.peek() {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::Lt => Some(BinaryOp::Less),
            TokenKind::Le => Some(BinaryOp::LessEq),
            TokenKind::Gt => Some(BinaryOp::Greater),
            TokenKind::Ge => Some(BinaryOp::GreaterEq),
            TokenKind::Ident(word) if word == "in" => Some(BinaryOp::In),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.add()?;
            return self.binary(op, left, right);
        }
        if self.eat_keyword("has") {
            let attr = self.attr_name()?;
            return self.node(Expr::has_attr(left.expr, attr), left.depth);
        }
        if self.eat_keyword("like") {
            let token = self.tokens[self.pos].clone();
            let TokenKind::Str(raw) = &token.kind else {
                return Err(self.unexpected("a pattern string"));
            };
            self.advance();
            let pattern = unescape_pattern(raw).map_err(|e| self.error_at(&token, e))?;
            let like = Expr::Like {
                left: Box::new(left.expr),
                pattern,
            };
            return self.node(like, left.depth);
        }
        if self.eat_keyword("is") {
            let entity_type = self.type_path()?;
            let (in_expr, depth) = if self.eat_keyword("in") {
                let target = self.add()?;
                (Some(Box::new(target.expr)), left.depth.max(target.depth))
            } else {
                (None, left.depth)
            };
            let is = Expr::Is {
                left: Box::new(left.expr),
                entity_type,
                in_expr,
            };
            return self.node(is, depth);
        }
        Ok(left)
    }

    fn add(&mut self) -> Result<Node, PolicyError> {
        let mut left = self.mul()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.mul()?;
            left = self.binary(op, left, right)?;
        }
    }

    fn mul(&mut self) -> Result<Node, PolicyError> {
        let mut left = self.unary()?;
        while self.eat(&TokenKind::Star) {
            let right = self.unary()?;
            left = self.binary(BinaryOp::Mul, left, right)?;
        }
        Ok(left)
    }

    /// Every nested operand passes through here, so this bounds recursion
    /// even where nesting adds no node, as with parentheses.
    fn unary(&mut self) -> Result<Node, PolicyError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error_here("nesting too deep"));
        }
        self.nesting += 1;
        let node = self.unary_inner();
        self.nesting -= 1;
        node
    }

    fn unary_inner(&mut self) -> Result<Node, PolicyError> {
        if self.eat(&TokenKind::Bang) {
            let arg = self.unary()?;
            return self.node(Expr::not(arg.expr), arg.depth);
        }
        if self.eat(&TokenKind::Minus) {
            if let TokenKind::Long(n) = *self.peek() {
                let value = negate_literal(n)
                    .ok_or_else(|| self.error_here(format!("integer `-{n}` is out of range")))?;
                self.advance();
                return self.member_tail(Node::leaf(Expr::value(value)));
            }
            let arg = self.unary()?;
            let neg = Expr::Unary {
                op: UnaryOp::Neg,
                arg: Box::new(arg.expr),
            };
            return self.node(neg, arg.depth);
        }
        let base = self.primary()?;
        self.member_tail(base)
    }

    fn member_tail(&mut self, mut node: Node) -> Result<Node, PolicyError> {
        loop {
            if self.eat(&TokenKind::Dot) {
                let name_token = self.tokens[self.pos].clone();
                let name = self.ident("an attribute or method name")?;
                if *self.peek() != TokenKind::LParen {
                    node = self.node(Expr::get_attr(node.expr, name), node.depth)?;
                    continue;
                }
                let method = name
                    .parse::<Method>()
                    .map_err(|_| self.error_at(&name_token, format!("unknown method `{name}`")))?;
                self.advance();
                let (args, args_depth) = self.list(&TokenKind::RParen)?;
                if args.len() != method.arity() {
                    return Err(self.error_at(
                        &name_token,
                        format!(
                            "`{method}` takes {} argument(s), got {}",
                            method.arity(),
                            args.len()
                        ),
                    ));
                }
                let depth = node.depth.max(args_depth);
                let call = Expr::Method {
                    receiver: Box::new(node.expr),
                    method,
                    args,
                };
                node = self.node(call, depth)?;
            } else if self.eat(&TokenKind::LBracket) {
                let attr = self.string()?;
                self.expect(&TokenKind::RBracket)?;
                node = self.node(Expr::get_attr(node.expr, attr), node.depth)?;
            } else {
                return Ok(node);
            }
        }
    }

    /// Comma-separated expressions up to and including `close`, with the
    /// depth of the deepest one.
    fn list(&mut self, close: &TokenKind) -> Result<(Vec<Expr>, usize), PolicyError> {
        let mut items = Vec::new();
        let mut depth = 0;
        if self.eat(close) {
            return Ok((items, depth));
        }
        loop {
            let item = self.or()?;
            depth = depth.max(item.depth);
            items.push(item.expr);
            if !self.eat(&TokenKind::Comma) {
                self.expect(close)?;
                return Ok((items, depth));
            }
        }
    }

    fn primary(&mut self) -> Result<Node, PolicyError> {
        match self.peek().clone() {
            TokenKind::Long(n) => {
                let value = i64::try_from(n)
                    .map_err(|_| self.error_here(format!("integer `{n}` is out of range")))?;
                self.advance();
                Ok(Node::leaf(Expr::value(value)))
            }
            TokenKind::Str(_) => Ok(Node::leaf(Expr::value(self.string()?))),
            TokenKind::Slot(name) => Err(self.error_here(format!(
                "slot `?{name}` may only appear in the policy scope"
            ))),
            TokenKind::LParen => {
                self.advance();
                let node = self.or()?;
                self.expect(&TokenKind::RParen)?;
                Ok(node)
            }
            TokenKind::LBracket => {
                self.advance();
                let (items, depth) = self.list(&TokenKind::RBracket)?;
                self.node(Expr::Set(items), depth)
            }
            TokenKind::LBrace => {
                self.advance();
                self.record()
            }
            TokenKind::Ident(word) => self.ident_primary(&word),
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn ident_primary(&mut self, word: &str) -> Result<Node, PolicyError> {
        match self.peek_at(1) {
            TokenKind::ColonColon => return Ok(Node::leaf(Expr::value(self.entity_uid()?))),
            TokenKind::LParen => return self.call(word),
            _ => {}
        }
        if let Ok(var) = word.parse::<Var>() {
            self.advance();
            return Ok(Node::leaf(Expr::var(var)));
        }
        match word {
            "true" | "false" => {
                self.advance();
                Ok(Node::leaf(Expr::value(word == "true")))
            }
            "if" => {
                self.advance();
                let cond = self.or()?;
                self.expect_keyword("then")?;
                let then = self.or()?;
                self.expect_keyword("else")?;
                let otherwise = self.or()?;
                let depth = cond.depth.max(then.depth).max(otherwise.depth);
                let branch = Expr::If {
                    cond: Box::new(cond.expr),
                    then: Box::new(then.expr),
                    otherwise: Box::new(otherwise.expr),
                };
                self.node(branch, depth)
            }
            _ => Err(self.error_here(format!("unknown identifier `{word}`"))),
        }
    }

    fn call(&mut self, name: &str) -> Result<Node, PolicyError> {
        let name_token = self.tokens[self.pos].clone();
        let function = name
            .parse::<Function>()
            .map_err(|_| self.error_here(format!("unknown function `{name}`")))?;
        self.advance();
        self.expect(&TokenKind::LParen)?;
        let (args, depth) = self.list(&TokenKind::RParen)?;
        if args.len() != function.arity() {
            return Err(self.error_at(
                &name_token,
                format!(
                    "`{function}` takes {} argument(s), got {}",
                    function.arity(),
                    args.len()
                ),
            ));
        }
        self.node(Expr::Call { function, args }, depth)
    }

    fn record(&mut self) -> Result<Node, PolicyError> {
        let mut fields = BTreeMap::new();
        let mut depth = 0;
        if self.eat(&TokenKind::RBrace) {
            return self.node(Expr::Record(fields), depth);
        }
        loop {
            let key_token = self.tokens[self.pos].clone();
            let key = self.attr_name()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.or()?;
            depth = depth.max(value.depth);
            if fields.insert(key.clone(), value.expr).is_some() {
                return Err(self.error_at(&key_token, format!("duplicate record key `{key}`")));
            }
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace)?;
                return self.node(Expr::Record(fields), depth);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttrValue;
    use yare::parameterized;

    fn uid(text: &str) -> EntityUid {
        text.parse().unwrap()
    }

    #[test]
    fn test_parse_basic_policy() {
        let policy = parse_policy(
            r#"permit (principal in Group::"admins", action == Action::"read", resource);"#,
        )
        .unwrap();
        assert_eq!(policy.id().as_str(), "policy0");
        assert_eq!(policy.effect(), Effect::Permit);
        assert_eq!(
            policy.principal_constraint(),
            &ScopeConstraint::In {
                entity: EntityRef::Uid(uid(r#"Group::"admins""#))
            }
        );
        assert_eq!(
            policy.action_constraint(),
            &ActionConstraint::Eq {
                entity: uid(r#"Action::"read""#)
            }
        );
        assert_eq!(policy.resource_constraint(), &ScopeConstraint::Any);
        assert!(policy.conditions().is_empty());
    }

    #[test]
    fn test_parse_policies_ids() {
        let policies = parse_policies(
            r#"
            // first
            permit (principal, action, resource);
            @id("deny-interns")
            forbid (principal in Group::"interns", action, resource);
            permit (principal, action, resource is Photo);
            "#,
        )
        .unwrap();
        let ids: Vec<&str> = policies.iter().map(|p| p.id().as_str()).collect();
        assert_eq!(ids, vec!["policy0", "deny-interns", "policy2"]);
        assert_eq!(policies[1].annotation("id"), Some("deny-interns"));
    }

    #[test]
    fn test_parse_template_slots() {
        let policy = parse_policy(
            r#"permit (principal == ?principal, action in [Action::"view", Action::"edit"], resource is Photo in ?resource);"#,
        )
        .unwrap();
        assert!(policy.is_template());
        assert_eq!(
            policy.resource_constraint(),
            &ScopeConstraint::IsIn {
                entity_type: "Photo".to_string(),
                entity: EntityRef::Slot(SlotId::Resource),
            }
        );
        assert_eq!(policy.action_constraint().actions().len(), 2);
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("false || true && 1 + 2 * 3 == 7").unwrap();
        let expected = Expr::or(
            Expr::value(false),
            Expr::and(
                Expr::value(true),
                Expr::binary(
                    BinaryOp::Eq,
                    Expr::binary(
                        BinaryOp::Add,
                        Expr::value(1),
                        Expr::binary(BinaryOp::Mul, Expr::value(2), Expr::value(3)),
                    ),
                    Expr::value(7),
                ),
            ),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_negative_literals() {
        assert_eq!(
            parse_expr("-9223372036854775808").unwrap(),
            Expr::value(i64::MIN)
        );
        assert_eq!(parse_expr("-5").unwrap(), Expr::value(-5));
        assert_eq!(
            parse_expr("-(5)").unwrap(),
            Expr::Unary {
                op: UnaryOp::Neg,
                arg: Box::new(Expr::value(5)),
            }
        );
        assert!(parse_expr("9223372036854775808").is_err());
    }

    #[test]
    fn test_members_and_methods() {
        let expr = parse_expr(r#"context.src.isInRange(ip("10.0.0.0/8"))"#).unwrap();
        assert_eq!(
            expr,
            Expr::Method {
                receiver: Box::new(Expr::get_attr(Expr::var(Var::Context), "src")),
                method: Method::IsInRange,
                args: vec![Expr::Call {
                    function: Function::Ip,
                    args: vec![Expr::value("10.0.0.0/8")],
                }],
            }
        );

        let expr = parse_expr(r#"resource["first name"] like "J\*n*""#).unwrap();
        assert_eq!(
            expr,
            Expr::Like {
                left: Box::new(Expr::get_attr(Expr::var(Var::Resource), "first name")),
                pattern: vec![
                    PatternElem::Literal('J'),
                    PatternElem::Literal('*'),
                    PatternElem::Literal('n'),
                    PatternElem::Wildcard,
                ],
            }
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            parse_expr(r#"User::"a\"b""#).unwrap(),
            Expr::Value(AttrValue::Entity(uid(r#"User::"a\"b""#)))
        );
        assert_eq!(
            parse_expr(r#"{"a": 1, b: [true]}"#).unwrap(),
            Expr::Record(BTreeMap::from([
                ("a".to_string(), Expr::value(1)),
                ("b".to_string(), Expr::Set(vec![Expr::value(true)])),
            ]))
        );
    }

    #[parameterized(
        plain = { r#"permit (principal, action, resource);"# },
        scope = { r#"forbid (principal is User in Group::"g", action in [Action::"a"], resource == Photo::"p");"# },
        when_unless = { r#"permit (principal, action, resource) when { resource.owner == principal } unless { context.risk > 3 };"# },
        annotations = { "@advice(\"say \\\"hi\\\"\")\n@id(\"x\")\npermit (principal, action, resource);" },
        has_guard = { r#"permit (principal, action, resource) when { resource has owner && resource.owner == principal };"# },
        negation = { r#"permit (principal, action, resource) when { !(context has mfa) || -(1) < -1 };"# },
        if_else = { r#"permit (principal, action, resource) when { if context.admin then true else principal in resource.viewers };"# },
        like = { r#"permit (principal, action, resource) when { resource.name like "*.jpg\*" };"# },
        is_in = { r#"permit (principal, action, resource) when { principal is App::User in Group::"g" };"# },
        methods = { r#"permit (principal, action, resource) when { [1, 2].containsAll([2]) && context.ip.isLoopback() };"# },
        record = { r#"permit (principal, action, resource) when { {"a b": 1, "c": [-2]} == context.rec };"# },
        template = { r#"permit (principal in ?principal, action, resource == ?resource);"# },
        nested_arith = { r#"permit (principal, action, resource) when { (1 + 2) * 3 - 4 >= context.n };"# },
    )]
    fn test_display_roundtrip(text: &str) {
        let policy = parse_policy(text).unwrap();
        let rendered = policy.to_string();
        let reparsed = parse_policy(&rendered).unwrap();
        assert_eq!(reparsed, policy, "rendered as {rendered}");
    }

    #[parameterized(
        bad_effect = { r#"allow (principal, action, resource);"# },
        missing_semi = { r#"permit (principal, action, resource)"# },
        slot_in_condition = { r#"permit (principal, action, resource) when { principal == ?principal };"# },
        slot_wrong_position = { r#"permit (principal == ?resource, action, resource);"# },
        slot_unknown = { r#"permit (principal == ?owner, action, resource);"# },
        slot_in_action = { r#"permit (principal, action == ?principal, resource);"# },
        chained_relation = { r#"permit (principal, action, resource) when { 1 == 1 == true };"# },
        unknown_method = { r#"permit (principal, action, resource) when { context.tags.size() == 1 };"# },
        wrong_arity = { r#"permit (principal, action, resource) when { context.tags.contains() };"# },
        unknown_function = { r#"permit (principal, action, resource) when { decimal("1.0") };"# },
        duplicate_key = { r#"permit (principal, action, resource) when { {a: 1, a: 2} == context };"# },
        duplicate_annotation = { "@id(\"a\") @id(\"b\") permit (principal, action, resource);" },
        unquoted_uid = { r#"permit (principal == User::alice, action, resource);"# },
        bad_escape = { r#"permit (principal == User::"\q", action, resource);"# },
        trailing = { r#"permit (principal, action, resource); permit"# },
        unknown_ident = { r#"permit (principal, action, resource) when { subject };"# },
    )]
    fn test_parse_errors(text: &str) {
        let result = parse_policy(text);
        assert!(
            matches!(result, Err(PolicyError::ParseError(_))),
            "expected parse error, got {result:?}"
        );
    }

    fn deep_condition(depth: usize, open: &str, inner: &str, close: &str) -> String {
        format!(
            "permit (principal, action, resource) when {{ {}{inner}{} }};",
            open.repeat(depth),
            close.repeat(depth)
        )
    }

    #[parameterized(
        parens = { "(", "true", ")" },
        nots = { "!", "true", "" },
        negations = { "-", "1 == 1", "" },
        if_chain = { "if true then true else ", "false", "" },
        sets = { "[", "1", "]" },
        records = { "{a: ", "1", "}" },
        calls = { "ip(", "\"10.0.0.1\"", ")" },
    )]
    fn test_deep_nesting_rejected(open: &str, inner: &str, close: &str) {
        for depth in [MAX_NESTING + 1, 3_000, 100_000] {
            let result = parse_policy(&deep_condition(depth, open, inner, close));
            match result {
                Err(PolicyError::ParseError(message)) => {
                    assert!(message.ends_with("nesting too deep"), "{message}")
                }
                other => panic!("depth {depth}: expected a parse error, got {other:?}"),
            }
        }
    }

    #[parameterized(
        ors = { "", " || ", "true" },
        sums = { "", " + ", "1" },
        members = { "context.", ".", "a" },
    )]
    fn test_long_chains_rejected(prefix: &str, separator: &str, operand: &str) {
        let chain = vec![operand; 10_000].join(separator);
        let text = format!("permit (principal, action, resource) when {{ {prefix}{chain} }};");
        assert!(matches!(
            parse_policy(&text),
            Err(PolicyError::ParseError(message)) if message.ends_with("nesting too deep")
        ));
    }

    #[test]
    fn test_moderate_nesting_accepted() {
        let text = deep_condition(50, "(", "true", ")");
        assert!(parse_policy(&text).is_ok());
        let text = deep_condition(50, "!", "true", "");
        assert!(parse_policy(&text).is_ok());
        let chain = vec!["context.flag"; 60].join(" || ");
        assert!(parse_expr(&chain).is_ok());
    }

    #[test]
    fn test_error_position() {
        let err = parse_policy("permit (\n  principal,\n  action ==,\n  resource);").unwrap_err();
        assert_eq!(
            err,
            PolicyError::ParseError("3:12: expected an entity uid, found `,`".to_string())
        );
    }

    #[test]
    fn test_uid_length_limit_applies() {
        let long = "a".repeat(1100);
        let text = format!(r#"permit (principal == User::"{long}", action, resource);"#);
        assert!(matches!(parse_policy(&text), Err(PolicyError::ParseError(_))));
    }
}
