//! Tokenizer for Nova source text.
//!
//! The lexer is a single-pass byte cursor producing [`Token`]s with 1-based
//! line/column positions. String literals keep their interpolation structure:
//! a [`StrTemplate`] holds literal text runs and raw `${...}` / `$id` segments
//! that the parser re-parses as expressions.
//!
//! Newlines are significant statement separators. The lexer suppresses them
//! inside `(...)` and `[...]` so multi-line argument lists read naturally.

use std::fmt;

use crate::error::{CodeLoc, Error, RunResult};

/// Hard keywords. Scope/task builders (`coroutineScope`, `launch`, ...) are
/// ordinary identifiers resolved against the builtin table, which keeps them
/// usable as method names (`scope.launch { ... }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum Keyword {
    Val,
    Var,
    Fun,
    Class,
    Interface,
    Object,
    Annotation,
    Open,
    Private,
    Static,
    If,
    Else,
    When,
    For,
    While,
    Do,
    Return,
    Throw,
    Try,
    Catch,
    Finally,
    Is,
    As,
    In,
    Import,
    Use,
    Break,
    Continue,
    Null,
    True,
    False,
}

/// One piece of an interpolated string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text with escapes already resolved.
    Text(String),
    /// Raw expression source from `${...}` or a bare `$identifier`, plus the
    /// (line, column) where it starts, for error positions.
    Interp(String, u32, u32),
}

/// An interpolated string literal broken into parts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StrTemplate {
    pub parts: Vec<TemplatePart>,
}

impl StrTemplate {
    /// Returns the literal text when the template has no interpolations.
    #[must_use]
    pub fn as_plain(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [] => Some(""),
            [TemplatePart::Text(text)] => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Kw(Keyword),
    Int(i64),
    Long(i64),
    Double(f64),
    Char(char),
    Str(StrTemplate),
    Newline,

    // punctuation and operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    NotIs,
    NotIn,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    DotDotLt,
    Colon,
    ColonColon,
    Semi,
    Arrow,
    At,
    Underscore,
    Question,
    SafeDot,
    Elvis,
    SafeBracket,
    CoalesceAssign,
    Pipeline,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier '{name}'"),
            Self::Kw(kw) => write!(f, "'{kw}'"),
            Self::Int(v) => write!(f, "int literal {v}"),
            Self::Long(v) => write!(f, "long literal {v}"),
            Self::Double(v) => write!(f, "double literal {v}"),
            Self::Char(c) => write!(f, "char literal '{c}'"),
            Self::Str(_) => f.write_str("string literal"),
            Self::Newline => f.write_str("newline"),
            Self::Eof => f.write_str("end of input"),
            other => write!(f, "'{}'", other.symbol()),
        }
    }
}

impl TokenKind {
    /// Symbol text for punctuation tokens, used in diagnostics.
    fn symbol(&self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::StarAssign => "*=",
            Self::SlashAssign => "/=",
            Self::PercentAssign => "%=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
            Self::NotIs => "!is",
            Self::NotIn => "!in",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::DotDot => "..",
            Self::DotDotLt => "..<",
            Self::Colon => ":",
            Self::ColonColon => "::",
            Self::Semi => ";",
            Self::Arrow => "->",
            Self::At => "@",
            Self::Underscore => "_",
            Self::Question => "?",
            Self::SafeDot => "?.",
            Self::Elvis => "?:",
            Self::SafeBracket => "?[",
            Self::CoalesceAssign => "??=",
            Self::Pipeline => "|>",
            _ => "",
        }
    }
}

/// A token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

/// Byte-cursor lexer over one source file.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    file: &'a str,
    /// Depth of open `(` / `[` pairs; newlines inside are insignificant.
    bracket_depth: usize,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str, file: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            file,
            bracket_depth: 0,
        }
    }

    /// Tokenizes the whole input.
    ///
    /// # Errors
    /// Returns a `SyntaxError` with position on malformed literals or
    /// unexpected characters.
    pub fn tokenize(mut self) -> RunResult<Vec<Token>> {
        let mut tokens = Vec::new();
        // Shebang line tolerance for `#!/usr/bin/env nova` scripts.
        if self.source.starts_with("#!") {
            while self.peek().is_some_and(|b| b != b'\n') {
                self.advance();
            }
        }
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            // Collapse consecutive newlines.
            if token.kind == TokenKind::Newline && matches!(tokens.last(), None | Some(Token { kind: TokenKind::Newline, .. })) {
                if done {
                    break;
                }
                continue;
            }
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::syntax(message).with_pos(CodeLoc::new(self.file, self.line, self.column))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn token(&self, kind: TokenKind, line: u32, column: u32) -> Token {
        Token { kind, line, column }
    }

    fn skip_trivia(&mut self) -> RunResult<()> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => return Err(self.err("unterminated block comment")),
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> RunResult<Token> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let Some(b) = self.peek() else {
            return Ok(self.token(TokenKind::Eof, line, column));
        };

        if b == b'\n' {
            self.advance();
            if self.bracket_depth > 0 {
                return self.next_token();
            }
            return Ok(self.token(TokenKind::Newline, line, column));
        }
        if b.is_ascii_digit() {
            return self.number(line, column);
        }
        if b == b'_' && !self.ident_continues_at(1) {
            self.advance();
            return Ok(self.token(TokenKind::Underscore, line, column));
        }
        if b == b'_' || b.is_ascii_alphabetic() || b >= 0x80 {
            return Ok(self.ident_or_keyword(line, column));
        }
        if b == b'"' {
            return self.string(line, column);
        }
        if b == b'\'' {
            return self.char_literal(line, column);
        }

        self.advance();
        let kind = match b {
            b'+' => self.with_eq(TokenKind::Plus, TokenKind::PlusAssign),
            b'-' => {
                if self.peek() == Some(b'>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    self.with_eq(TokenKind::Minus, TokenKind::MinusAssign)
                }
            }
            b'*' => self.with_eq(TokenKind::Star, TokenKind::StarAssign),
            b'/' => self.with_eq(TokenKind::Slash, TokenKind::SlashAssign),
            b'%' => self.with_eq(TokenKind::Percent, TokenKind::PercentAssign),
            b'=' => self.with_eq(TokenKind::Assign, TokenKind::Eq),
            b'<' => self.with_eq(TokenKind::Lt, TokenKind::Le),
            b'>' => self.with_eq(TokenKind::Gt, TokenKind::Ge),
            b'&' if self.peek() == Some(b'&') => {
                self.advance();
                TokenKind::AndAnd
            }
            b'|' => match self.peek() {
                Some(b'|') => {
                    self.advance();
                    TokenKind::OrOr
                }
                Some(b'>') => {
                    self.advance();
                    TokenKind::Pipeline
                }
                _ => return Err(self.err("expected '||' or '|>'")),
            },
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::NotEq
                } else if self.rest().starts_with("is") && !self.ident_continues_at(2) {
                    self.advance();
                    self.advance();
                    TokenKind::NotIs
                } else if self.rest().starts_with("in") && !self.ident_continues_at(2) {
                    self.advance();
                    self.advance();
                    TokenKind::NotIn
                } else {
                    TokenKind::Bang
                }
            }
            b'(' => {
                self.bracket_depth += 1;
                TokenKind::LParen
            }
            b')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RParen
            }
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => {
                self.bracket_depth += 1;
                TokenKind::LBracket
            }
            b']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RBracket
            }
            b',' => TokenKind::Comma,
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.advance();
                    if self.peek() == Some(b'<') {
                        self.advance();
                        TokenKind::DotDotLt
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            b':' => {
                if self.peek() == Some(b':') {
                    self.advance();
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            b';' => TokenKind::Semi,
            b'@' => TokenKind::At,
            b'?' => match self.peek() {
                Some(b'.') => {
                    self.advance();
                    TokenKind::SafeDot
                }
                Some(b':') => {
                    self.advance();
                    TokenKind::Elvis
                }
                Some(b'[') => {
                    self.advance();
                    self.bracket_depth += 1;
                    TokenKind::SafeBracket
                }
                Some(b'?') if self.peek_at(1) == Some(b'=') => {
                    self.advance();
                    self.advance();
                    TokenKind::CoalesceAssign
                }
                _ => TokenKind::Question,
            },
            other => return Err(self.err(format!("unexpected character '{}'", other as char))),
        };
        Ok(self.token(kind, line, column))
    }

    fn rest(&self) -> &str {
        &self.source[self.pos..]
    }

    fn ident_continues_at(&self, offset: usize) -> bool {
        self.peek_at(offset)
            .is_some_and(|b| b == b'_' || b.is_ascii_alphanumeric() || b >= 0x80)
    }

    fn with_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        if self.peek() == Some(b'=') {
            self.advance();
            with_eq
        } else {
            plain
        }
    }

    fn ident_or_keyword(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while self.ident_continues_at(0) {
            self.advance();
        }
        let text = &self.source[start..self.pos];
        let kind = match text.parse::<Keyword>() {
            Ok(kw) => TokenKind::Kw(kw),
            Err(_) => TokenKind::Ident(text.to_owned()),
        };
        self.token(kind, line, column)
    }

    fn number(&mut self, line: u32, column: u32) -> RunResult<Token> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
            self.advance();
        }
        let mut is_double = false;
        // A '.' is part of the number only when followed by a digit, so range
        // expressions like `0..5` lex as Int DotDot Int.
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_double = true;
            self.advance();
            while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut offset = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                offset = 2;
            }
            if self.peek_at(offset).is_some_and(|b| b.is_ascii_digit()) {
                is_double = true;
                for _ in 0..offset {
                    self.advance();
                }
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        let text: String = self.source[start..self.pos].chars().filter(|c| *c != '_').collect();
        let kind = match self.peek() {
            Some(b'L') => {
                self.advance();
                let value = text.parse::<i64>().map_err(|_| self.err("invalid long literal"))?;
                TokenKind::Long(value)
            }
            Some(b'f' | b'F') => {
                self.advance();
                let value = text.parse::<f64>().map_err(|_| self.err("invalid float literal"))?;
                TokenKind::Double(value)
            }
            _ if is_double => {
                let value = text.parse::<f64>().map_err(|_| self.err("invalid double literal"))?;
                TokenKind::Double(value)
            }
            _ => {
                let value = text.parse::<i64>().map_err(|_| self.err("integer literal out of range"))?;
                TokenKind::Int(value)
            }
        };
        Ok(self.token(kind, line, column))
    }

    fn escape(&mut self) -> RunResult<char> {
        let Some(b) = self.advance() else {
            return Err(self.err("unterminated escape sequence"));
        };
        Ok(match b {
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'0' => '\0',
            b'\\' => '\\',
            b'\'' => '\'',
            b'"' => '"',
            b'$' => '$',
            b'u' => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let Some(digit) = self.advance().and_then(|b| (b as char).to_digit(16)) else {
                        return Err(self.err("invalid unicode escape"));
                    };
                    code = code * 16 + digit;
                }
                char::from_u32(code).ok_or_else(|| self.err("invalid unicode escape"))?
            }
            other => return Err(self.err(format!("unknown escape '\\{}'", other as char))),
        })
    }

    fn char_literal(&mut self, line: u32, column: u32) -> RunResult<Token> {
        self.advance(); // opening quote
        let c = match self.advance() {
            None | Some(b'\'') => return Err(self.err("empty char literal")),
            Some(b'\\') => self.escape()?,
            Some(b) if b < 0x80 => b as char,
            Some(_) => {
                // Multi-byte UTF-8: back up and decode the full char.
                self.pos -= 1;
                self.column -= 1;
                let c = self.rest().chars().next().ok_or_else(|| self.err("bad char literal"))?;
                for _ in 0..c.len_utf8() {
                    self.advance();
                }
                c
            }
        };
        if self.advance() != Some(b'\'') {
            return Err(self.err("unterminated char literal"));
        }
        Ok(self.token(TokenKind::Char(c), line, column))
    }

    fn string(&mut self, line: u32, column: u32) -> RunResult<Token> {
        self.advance(); // opening quote
        let mut template = StrTemplate::default();
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(self.err("unterminated string literal")),
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    text.push(self.escape()?);
                }
                Some(b'$') => {
                    let (interp_line, interp_column) = (self.line, self.column);
                    self.advance();
                    if self.peek() == Some(b'{') {
                        self.advance();
                        if !text.is_empty() {
                            template.parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                        }
                        let start = self.pos;
                        let mut depth = 1usize;
                        loop {
                            match self.peek() {
                                None => return Err(self.err("unterminated '${' interpolation")),
                                Some(b'{') => depth += 1,
                                Some(b'}') => {
                                    depth -= 1;
                                    if depth == 0 {
                                        break;
                                    }
                                }
                                _ => {}
                            }
                            self.advance();
                        }
                        let expr = self.source[start..self.pos].to_owned();
                        self.advance(); // closing brace
                        template
                            .parts
                            .push(TemplatePart::Interp(expr, interp_line, interp_column + 2));
                    } else if self.ident_continues_at(0) && !self.peek().is_some_and(|b| b.is_ascii_digit()) {
                        if !text.is_empty() {
                            template.parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                        }
                        let start = self.pos;
                        while self.ident_continues_at(0) {
                            self.advance();
                        }
                        let name = self.source[start..self.pos].to_owned();
                        template
                            .parts
                            .push(TemplatePart::Interp(name, interp_line, interp_column + 1));
                    } else {
                        text.push('$');
                    }
                }
                Some(b) if b < 0x80 => {
                    self.advance();
                    text.push(b as char);
                }
                Some(_) => {
                    let c = self.rest().chars().next().ok_or_else(|| self.err("bad string literal"))?;
                    for _ in 0..c.len_utf8() {
                        self.advance();
                    }
                    text.push(c);
                }
            }
        }
        if !text.is_empty() || template.parts.is_empty() {
            template.parts.push(TemplatePart::Text(text));
        }
        Ok(self.token(TokenKind::Str(template), line, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, "test.nova")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn ranges_do_not_eat_dots() {
        assert_eq!(
            kinds("0..<5"),
            vec![TokenKind::Int(0), TokenKind::DotDotLt, TokenKind::Int(5), TokenKind::Eof]
        );
        assert_eq!(
            kinds("1..10"),
            vec![TokenKind::Int(1), TokenKind::DotDot, TokenKind::Int(10), TokenKind::Eof]
        );
    }

    #[test]
    fn numeric_literal_forms() {
        assert_eq!(kinds("10L")[0], TokenKind::Long(10));
        assert_eq!(kinds("1.5")[0], TokenKind::Double(1.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Double(1000.0));
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
    }

    #[test]
    fn null_safety_operators() {
        assert_eq!(
            kinds("a?.b ?: c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::SafeDot,
                TokenKind::Ident("b".into()),
                TokenKind::Elvis,
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("x ??= y")[1], TokenKind::CoalesceAssign);
    }

    #[test]
    fn interpolated_string_parts() {
        let tokens = kinds("\"a ${x + 1} b $y\"");
        let TokenKind::Str(template) = &tokens[0] else {
            panic!("expected string, got {tokens:?}");
        };
        assert_eq!(template.parts.len(), 4);
        assert_eq!(template.parts[0], TemplatePart::Text("a ".into()));
        assert!(matches!(&template.parts[1], TemplatePart::Interp(e, _, _) if e == "x + 1"));
        assert_eq!(template.parts[2], TemplatePart::Text(" b ".into()));
        assert!(matches!(&template.parts[3], TemplatePart::Interp(e, _, _) if e == "y"));
    }

    #[test]
    fn newlines_suppressed_inside_parens() {
        let tokens = kinds("f(1,\n2)");
        assert!(!tokens.contains(&TokenKind::Newline));
    }

    #[test]
    fn not_is_lexes_as_one_token() {
        assert_eq!(kinds("x !is Int")[1], TokenKind::NotIs);
        assert_eq!(kinds("!ok")[0], TokenKind::Bang);
    }

    #[test]
    fn keywords_and_soft_names() {
        assert_eq!(kinds("val x")[0], TokenKind::Kw(Keyword::Val));
        // Concurrency builders stay identifiers so they work as method names.
        assert_eq!(kinds("launch")[0], TokenKind::Ident("launch".into()));
    }
}
