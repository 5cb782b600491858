//! Tokenizer for policy text.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::iter::Peekable;
use std::str::Chars;

use crate::error::PolicyError;
use crate::types::entity_uid::{is_ident_continue, is_ident_start};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident(String),
    /// String contents with escapes left in place; `like` needs to see `\*`.
    Str(String),
    Long(u64),
    /// `?name`
    Slot(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    ColonColon,
    Dot,
    At,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Eof,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let symbol = match self {
            TokenKind::Ident(word) => return write!(f, "`{word}`"),
            TokenKind::Str(raw) => return write!(f, "\"{raw}\""),
            TokenKind::Long(n) => return write!(f, "`{n}`"),
            TokenKind::Slot(name) => return write!(f, "`?{name}`"),
            TokenKind::Eof => return f.write_str("end of input"),
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Colon => ":",
            TokenKind::ColonColon => "::",
            TokenKind::Dot => ".",
            TokenKind::At => "@",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
        };
        write!(f, "`{symbol}`")
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) line: usize,
    pub(crate) col: usize,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl Lexer<'_> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, col: usize, message: impl Into<String>) -> PolicyError {
        PolicyError::ParseError(format!("{line}:{col}: {}", message.into()))
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.next() != Some('/') {
                        return;
                    }
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    /// Consume `next` if it follows, returning `then`; otherwise `otherwise`.
    fn pair(&mut self, next: char, then: TokenKind, otherwise: TokenKind) -> TokenKind {
        if self.chars.peek() == Some(&next) {
            self.bump();
            then
        } else {
            otherwise
        }
    }

    fn next_token(&mut self) -> Result<Token, PolicyError> {
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        let Some(c) = self.bump() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
                col,
            });
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '.' => TokenKind::Dot,
            '@' => TokenKind::At,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            ':' => self.pair(':', TokenKind::ColonColon, TokenKind::Colon),
            '<' => self.pair('=', TokenKind::Le, TokenKind::Lt),
            '>' => self.pair('=', TokenKind::Ge, TokenKind::Gt),
            '!' => self.pair('=', TokenKind::NotEq, TokenKind::Bang),
            '=' => match self.bump() {
                Some('=') => TokenKind::EqEq,
                _ => return Err(self.error(line, col, "expected `==`")),
            },
            '&' => match self.bump() {
                Some('&') => TokenKind::AndAnd,
                _ => return Err(self.error(line, col, "expected `&&`")),
            },
            '|' => match self.bump() {
                Some('|') => TokenKind::OrOr,
                _ => return Err(self.error(line, col, "expected `||`")),
            },
            '"' => TokenKind::Str(self.raw_string(line, col)?),
            '?' => {
                let name = self.ident_tail(None);
                if name.is_empty() {
                    return Err(self.error(line, col, "expected a slot name after `?`"));
                }
                TokenKind::Slot(name)
            }
            c if c.is_ascii_digit() => {
                let digits = self.digits(c);
                let value = digits
                    .parse::<u64>()
                    .map_err(|_| self.error(line, col, format!("integer `{digits}` is too large")))?;
                TokenKind::Long(value)
            }
            c if is_ident_start(c) => TokenKind::Ident(self.ident_tail(Some(c))),
            other => return Err(self.error(line, col, format!("unexpected character `{other}`"))),
        };

        Ok(Token { kind, line, col })
    }

    fn ident_tail(&mut self, first: Option<char>) -> String {
        let mut ident: String = first.into_iter().collect();
        while let Some(&c) = self.chars.peek() {
            let accept = if ident.is_empty() {
                is_ident_start(c)
            } else {
                is_ident_continue(c)
            };
            if !accept {
                break;
            }
            ident.push(c);
            self.bump();
        }
        ident
    }

    fn digits(&mut self, first: char) -> String {
        let mut digits = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(c);
            self.bump();
        }
        digits
    }

    fn raw_string(&mut self, line: usize, col: usize) -> Result<String, PolicyError> {
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, col, "unterminated string")),
                Some('"') => return Ok(raw),
                Some('\\') => {
                    raw.push('\\');
                    match self.bump() {
                        Some(c) => raw.push(c),
                        None => return Err(self.error(line, col, "unterminated string")),
                    }
                }
                Some(c) => raw.push(c),
            }
        }
    }
}

/// Split policy text into tokens, ending with a single `Eof`.
pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, PolicyError> {
    let mut lexer = Lexer {
        chars: text.chars().peekable(),
        line: 1,
        col: 1,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
