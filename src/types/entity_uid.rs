//! Entity identifiers, `Type::"id"`, with a hand-written parser.
//!
//! The text form is a `::`-separated type path followed by a quoted id.
//! Inside the quotes, `\\`, `\"` and unicode escapes (`\u0041` with 4 to 6
//! hex digits, or `\u{41}`) are understood, along with `\n`, `\r`, `\t`,
//! `\0` and `\'`.

use std::fmt::{Display, Formatter, Result as FmtResult, Write as _};
use std::iter::Peekable;
use std::str::{Chars, FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PolicyError;

/// Upper bound on the rendered length of a UID, in characters.
pub const MAX_UID_LEN: usize = 1024;

/// A validated entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "UidParts")]
pub struct EntityUid {
    #[serde(rename = "type")]
    type_name: String,
    id: String,
}

/// Wire shape of a UID, before validation.
#[derive(Deserialize)]
struct UidParts {
    #[serde(rename = "type")]
    type_name: String,
    id: String,
}

impl TryFrom<UidParts> for EntityUid {
    type Error = PolicyError;

    fn try_from(parts: UidParts) -> Result<Self, Self::Error> {
        EntityUid::from_parts(&parts.type_name, &parts.id)
    }
}

impl EntityUid {
    /// Parse the canonical text form, e.g. `Photos::User::"alice"`.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PolicyError::ParseError("empty entity uid".to_string()));
        }
        if text.chars().count() > MAX_UID_LEN {
            return Err(PolicyError::ParseError(format!(
                "entity uid exceeds {MAX_UID_LEN} characters"
            )));
        }

        let mut chars = text.chars().peekable();
        let mut segments: Vec<String> = Vec::new();
        loop {
            segments.push(parse_ident(&mut chars).map_err(|e| uid_error(text, &e))?);
            if !(chars.next() == Some(':') && chars.next() == Some(':')) {
                return Err(uid_error(text, "expected `::` after type name"));
            }
            if chars.peek() == Some(&'"') {
                break;
            }
        }

        let id = parse_quoted(&mut chars).map_err(|e| uid_error(text, &e))?;
        if chars.next().is_some() {
            return Err(uid_error(text, "trailing characters after quoted id"));
        }

        Ok(EntityUid {
            type_name: segments.join("::"),
            id,
        })
    }

    /// Build a UID from a type path and a raw (unescaped) id.
    ///
    /// The id is escaped, the canonical form reassembled and parsed again,
    /// so anything accepted here also survives [`EntityUid::parse`].
    pub fn from_parts(type_name: &str, id: &str) -> Result<Self, PolicyError> {
        let rendered = format!(r#"{type_name}::"{}""#, escape_id(id));
        let uid = EntityUid::parse(&rendered)?;
        if uid.type_name != type_name || uid.id != id {
            return Err(PolicyError::ParseError(format!(
                "`{type_name}` and `{id}` do not form a valid entity uid"
            )));
        }
        Ok(uid)
    }

    /// The full type path, e.g. `Photos::User`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The raw id, with escapes resolved.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Namespace segments in front of the base type name.
    pub fn namespace(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.type_name.split("::").collect();
        segments.pop();
        segments
    }

    /// The last segment of the type path.
    pub fn basename(&self) -> &str {
        self.type_name
            .rsplit("::")
            .next()
            .unwrap_or(self.type_name.as_str())
    }
}

impl Display for EntityUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, r#"{}::"{}""#, self.type_name, escape_id(&self.id))
    }
}

impl FromStr for EntityUid {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityUid::parse(s)
    }
}

fn uid_error(text: &str, reason: &str) -> PolicyError {
    PolicyError::ParseError(format!("invalid entity uid `{text}`: {reason}"))
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Check a `::`-separated type path like `App::Photo`.
pub(crate) fn is_valid_type_name(name: &str) -> bool {
    name.split("::").all(|segment| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if is_ident_start(c)) && chars.all(is_ident_continue)
    })
}

fn parse_ident(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    let mut ident = String::new();
    match chars.peek() {
        Some(&c) if is_ident_start(c) => {}
        Some(&c) => return Err(format!("unexpected `{c}` where a type name was expected")),
        None => return Err("unexpected end of input".to_string()),
    }
    while let Some(&c) = chars.peek() {
        if !is_ident_continue(c) {
            break;
        }
        ident.push(c);
        chars.next();
    }
    Ok(ident)
}

/// Parse a double-quoted string, resolving escapes. Shared with the policy lexer.
pub(crate) fn parse_quoted(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    if chars.next() != Some('"') {
        return Err("expected `\"`".to_string());
    }
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err("unterminated string".to_string()),
            Some('"') => return Ok(out),
            Some('\\') => out.push(parse_escape(chars)?),
            Some(c) => out.push(c),
        }
    }
}

pub(crate) fn parse_escape(chars: &mut Peekable<Chars<'_>>) -> Result<char, String> {
    match chars.next() {
        Some('\\') => Ok('\\'),
        Some('"') => Ok('"'),
        Some('\'') => Ok('\''),
        Some('n') => Ok('\n'),
        Some('r') => Ok('\r'),
        Some('t') => Ok('\t'),
        Some('0') => Ok('\0'),
        Some('*') => Err("`\\*` is only valid in `like` patterns".to_string()),
        Some('u') => {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }
            let mut hex = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_hexdigit() || hex.len() == 6 {
                    break;
                }
                hex.push(c);
                chars.next();
            }
            if braced {
                if chars.next() != Some('}') || hex.is_empty() {
                    return Err("malformed `\\u{...}` escape".to_string());
                }
            } else if hex.len() < 4 {
                return Err("unicode escape needs 4 to 6 hex digits".to_string());
            }
            u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| format!("`\\u{hex}` is not a unicode scalar value"))
        }
        Some(c) => Err(format!("unknown escape `\\{c}`")),
        None => Err("unterminated escape".to_string()),
    }
}

/// Render a raw id for use between double quotes.
pub(crate) fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '"' => out.push_str(r#"\""#),
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            '\t' => out.push_str(r"\t"),
            '\0' => out.push_str(r"\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use yare::parameterized;

    #[parameterized(
        simple = { r#"User::"alice""#, "User", "alice" },
        namespaced = { r#"App::Core::User::"alice""#, "App::Core::User", "alice" },
        id_with_separator = { r#"Host::"a::b""#, "Host", "a::b" },
        namespaced_id_with_separator = { r#"Ns::Host::"x::\"y\"::z""#, "Ns::Host", r#"x::"y"::z"# },
        escaped_backslash = { r#"File::"C:\\tmp""#, "File", r"C:\tmp" },
        unicode_four = { r#"User::"\u0041lice""#, "User", "Alice" },
        unicode_six = { r#"User::"\u01F600""#, "User", "\u{1F600}" },
        unicode_braced = { r#"User::"\u{1F600}""#, "User", "\u{1F600}" },
        empty_id = { r#"User::"""#, "User", "" },
        trimmed = { "  User::\"bob\"\n", "User", "bob" },
        underscore_type = { r#"_Private9::"x""#, "_Private9", "x" },
    )]
    fn test_parse_valid(text: &str, type_name: &str, id: &str) {
        let uid = EntityUid::parse(text).unwrap();
        assert_eq!(uid.type_name(), type_name);
        assert_eq!(uid.id(), id);
    }

    #[parameterized(
        empty = { "" },
        whitespace = { "   " },
        unquoted_id = { "User::alice" },
        no_type = { r#""alice""# },
        single_colon = { r#"User:"alice""# },
        digit_type = { r#"9User::"alice""# },
        trailing = { r#"User::"alice"x"# },
        unterminated = { r#"User::"alice"# },
        raw_quote = { r#"User::"al"ice""# },
        bad_escape = { r#"User::"\q""# },
        short_unicode = { r#"User::"\u41""# },
        empty_segment = { r#"App::::User::"a""# },
    )]
    fn test_parse_invalid(text: &str) {
        assert!(matches!(
            EntityUid::parse(text),
            Err(PolicyError::ParseError(_))
        ));
    }

    #[test]
    fn test_length_limit() {
        let at_limit = format!(r#"User::"{}""#, "a".repeat(MAX_UID_LEN - 8));
        assert_eq!(at_limit.chars().count(), MAX_UID_LEN);
        assert!(EntityUid::parse(&at_limit).is_ok());

        let over_limit = format!(r#"User::"{}""#, "a".repeat(MAX_UID_LEN - 7));
        assert!(EntityUid::parse(&over_limit).is_err());
        assert!(EntityUid::from_parts("User", &"a".repeat(MAX_UID_LEN)).is_err());
    }

    #[parameterized(
        plain = { "User", "alice" },
        quotes = { "User", r#"say "hi""# },
        backslashes = { "Path", r"C:\dir\file" },
        separator = { "A::B::C", "x::y" },
        newline = { "Note", "line1\nline2" },
        control = { "Note", "bell\u{7}" },
        unicode = { "User", "Jos\u{e9}" },
    )]
    fn test_from_parts_roundtrip(type_name: &str, id: &str) {
        let uid = EntityUid::from_parts(type_name, id).unwrap();
        let reparsed = EntityUid::parse(&uid.to_string()).unwrap();
        assert_eq!(reparsed, uid);
        assert_eq!(reparsed.type_name(), type_name);
        assert_eq!(reparsed.id(), id);
    }

    #[parameterized(
        empty_type = { "", "x" },
        bad_type = { "User-Name", "x" },
        trailing_separator = { "User::", "x" },
        leading_digit = { "1User", "x" },
    )]
    fn test_from_parts_invalid_type(type_name: &str, id: &str) {
        assert!(EntityUid::from_parts(type_name, id).is_err());
    }

    #[test]
    fn test_display_escapes() {
        let uid = EntityUid::from_parts("User", r#"a"b\c"#).unwrap();
        assert_eq!(uid.to_string(), r#"User::"a\"b\\c""#);
    }

    #[test]
    fn test_namespace_and_basename() {
        let uid: EntityUid = r#"App::Core::User::"alice""#.parse().unwrap();
        assert_eq!(uid.namespace(), vec!["App", "Core"]);
        assert_eq!(uid.basename(), "User");

        let plain: EntityUid = r#"User::"alice""#.parse().unwrap();
        assert!(plain.namespace().is_empty());
        assert_eq!(plain.basename(), "User");
    }

    #[test]
    fn test_equality_and_hash_by_parts() {
        use std::collections::HashSet;
        let a: EntityUid = r#"User::"\u0061""#.parse().unwrap();
        let b = EntityUid::from_parts("User", "a").unwrap();
        assert_eq!(a, b);
        let set: HashSet<EntityUid> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_json_shape() {
        let uid = EntityUid::from_parts("Photo", "1").unwrap();
        let json = serde_json::to_value(&uid).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Photo", "id": "1"}));

        let back: EntityUid = serde_json::from_value(json).unwrap();
        assert_eq!(back, uid);

        let bad = serde_json::from_value::<EntityUid>(serde_json::json!({"type": "9x", "id": "1"}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_valid_type_name() {
        assert!(is_valid_type_name("User"));
        assert!(is_valid_type_name("A::B_2"));
        assert!(!is_valid_type_name("A::"));
        assert!(!is_valid_type_name("A B"));
    }

    fn type_name_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,11}", 1..4).prop_map(|s| s.join("::"))
    }

    fn id_char() -> impl Strategy<Value = char> {
        prop_oneof![
            3 => any::<char>(),
            1 => prop::sample::select(vec!['"', '\\', ':', '\n', '\r', '\t', '\0', '\u{7}', '\u{9f}']),
        ]
    }

    fn id_strategy(len: std::ops::Range<usize>) -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                4 => id_char().prop_map(String::from),
                1 => Just("::".to_string()),
                1 => Just(r#"\u{41}"#.to_string()),
            ],
            len,
        )
        .prop_map(|pieces| pieces.concat())
    }

    proptest! {
        #[test]
        fn test_display_parses_back(type_name in type_name_strategy(), id in id_strategy(0..128)) {
            let uid = EntityUid::from_parts(&type_name, &id).unwrap();
            let reparsed = EntityUid::parse(&uid.to_string()).unwrap();
            prop_assert_eq!(reparsed.type_name(), type_name.as_str());
            prop_assert_eq!(reparsed.id(), id.as_str());
            prop_assert_eq!(reparsed, uid);
        }

        #[test]
        fn test_json_parses_back(type_name in type_name_strategy(), id in id_strategy(0..64)) {
            let uid = EntityUid::from_parts(&type_name, &id).unwrap();
            let json = serde_json::to_string(&uid).unwrap();
            prop_assert_eq!(serde_json::from_str::<EntityUid>(&json).unwrap(), uid);
        }

        #[test]
        fn test_overlong_uid_rejected(
            type_name in type_name_strategy(),
            id in prop::collection::vec(id_char(), MAX_UID_LEN..MAX_UID_LEN * 2),
        ) {
            let id: String = id.into_iter().collect();
            let text = format!(r#"{type_name}::"{}""#, escape_id(&id));
            prop_assert!(EntityUid::parse(&text).is_err());
            prop_assert!(EntityUid::from_parts(&type_name, &id).is_err());
        }

        #[test]
        fn test_overlong_text_rejected(body in "\\PC{1023,1500}") {
            let text = format!("x{body}x");
            prop_assert!(EntityUid::parse(&text).is_err());
        }
    }
}
