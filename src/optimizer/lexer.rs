//! Minimal script tokenizer
//!
//! Splits source into tokens precisely enough to tell code apart from
//! strings, template literals, regular expressions and comments. It does not
//! build a syntax tree.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    LineComment,
    BlockComment,
    Ident,
    Number,
    Str,
    Template,
    Regex,
    Punct,
}

impl TokenKind {
    /// Whitespace and comments
    pub fn is_trivia(self) -> bool {
        matches!(self, Self::Whitespace | Self::LineComment | Self::BlockComment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset into the source
    pub start: usize,
}

impl Token<'_> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == keyword
    }
}

/// Keywords after which a `/` starts a regular expression
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "instanceof", "new", "delete", "void", "throw",
    "yield", "await",
];

/// Multi-character punctuators, longest first
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==", "!=",
    "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "**", "<<", ">>",
];

pub fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

pub fn is_ident_part(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

/// Tokenize a script; the concatenated token texts always equal the source
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let mut chars = rest.chars();
        let Some(c) = chars.next() else { break };
        let next = chars.next();

        let (kind, len) = if c.is_whitespace() {
            (TokenKind::Whitespace, take_while(rest, char::is_whitespace))
        } else if c == '/' && next == Some('/') {
            (TokenKind::LineComment, rest.find('\n').unwrap_or(rest.len()))
        } else if c == '/' && next == Some('*') {
            let len = rest[2..].find("*/").map(|i| i + 4).unwrap_or(rest.len());
            (TokenKind::BlockComment, len)
        } else if c == '/' && regex_allowed(&tokens) {
            (TokenKind::Regex, scan_regex(rest))
        } else if c == '"' || c == '\'' {
            (TokenKind::Str, scan_string(rest, c))
        } else if c == '`' {
            (TokenKind::Template, scan_template(rest))
        } else if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            (TokenKind::Number, take_while(rest, |ch| ch.is_alphanumeric() || ch == '.' || ch == '_'))
        } else if is_ident_start(c) {
            (TokenKind::Ident, take_while(rest, is_ident_part))
        } else {
            let len = PUNCTUATORS
                .iter()
                .find(|p| rest.starts_with(**p))
                .map(|p| p.len())
                .unwrap_or(c.len_utf8());
            (TokenKind::Punct, len)
        };

        tokens.push(Token {
            kind,
            text: &rest[..len],
            start: pos,
        });
        pos += len;
    }

    tokens
}

fn take_while(s: &str, pred: impl Fn(char) -> bool) -> usize {
    s.char_indices()
        .find(|(_, c)| !pred(*c))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn regex_allowed(tokens: &[Token<'_>]) -> bool {
    let Some(previous) = tokens.iter().rev().find(|t| !t.kind.is_trivia()) else {
        return true;
    };
    match previous.kind {
        TokenKind::Punct => !matches!(previous.text, ")" | "]" | "}" | "++" | "--"),
        TokenKind::Ident => REGEX_PRECEDING_KEYWORDS.contains(&previous.text),
        _ => false,
    }
}

/// Length of a quoted string starting at `s[0]`; unterminated strings end at the newline
fn scan_string(s: &str, quote: char) -> usize {
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' => return i,
            c if c == quote => return i + 1,
            _ => {}
        }
    }
    s.len()
}

/// Length of a template literal, including any `${ ... }` substitutions
fn scan_template(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 1;
    let mut depth = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'`' if depth == 0 => return i + 1,
            b'`' => i += scan_template(&s[i..]) - 1,
            b'$' if depth == 0 && bytes.get(i + 1) == Some(&b'{') => {
                depth = 1;
                i += 1;
            }
            b'{' if depth > 0 => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            quote @ (b'"' | b'\'') if depth > 0 => i += scan_string(&s[i..], quote as char) - 1,
            _ => {}
        }
        i += 1;
    }

    s.len()
}

/// Length of a regular expression literal including its flags
fn scan_regex(s: &str) -> usize {
    let mut in_class = false;
    let mut chars = s.char_indices().skip(1);

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' => return i,
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                let flags = take_while(&s[i + 1..], is_ident_part);
                return i + 1 + flags;
            }
            _ => {}
        }
    }

    s.len()
}
