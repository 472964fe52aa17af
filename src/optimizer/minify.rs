//! Whitespace and comment removal for scripts, identifier mangling, and
//! stylesheet minification through lightningcss.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use once_cell::sync::Lazy;
use regex::Regex;

use super::lexer::{is_ident_part, tokenize, Token, TokenKind};

/// Names never renamed: keywords, module wrapper parameters, common globals
static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // keywords
        "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
        "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
        "import", "in", "instanceof", "new", "null", "return", "super", "switch", "this", "throw",
        "true", "try", "typeof", "var", "void", "while", "with", "yield", "let", "static",
        "implements", "interface", "package", "private", "protected", "public", "await", "async",
        "of", "get", "set", "arguments", "eval", "undefined", "NaN", "Infinity",
        // module wrapper
        "module", "exports", "require", "__splitpack__",
        // globals a local declaration could shadow elsewhere in the file
        "window", "document", "self", "globalThis", "console", "name", "location", "navigator",
        "history", "top", "parent", "frames", "length", "status", "event", "process", "global",
        "Object", "Array", "String", "Number", "Boolean", "Symbol", "Math", "JSON", "Date",
        "Promise", "Error", "RegExp", "Map", "Set",
    ]
    .into_iter()
    .collect()
});

const DECLARATION_KEYWORDS: &[&str] = &["const", "let", "var", "function", "class"];

/// Remove comments and collapse whitespace in a script.
///
/// A whitespace run that contained a line break becomes a single newline so
/// automatic semicolon insertion behaves as before.
pub fn minify_js(source: &str) -> String {
    let tokens = tokenize(source);
    let mut result = String::with_capacity(source.len());
    let mut previous: Option<Token<'_>> = None;
    let mut pending_newline = false;
    let mut pending_space = false;

    for token in tokens {
        match token.kind {
            TokenKind::Whitespace | TokenKind::BlockComment => {
                if token.text.contains('\n') {
                    pending_newline = true;
                } else {
                    pending_space = true;
                }
            }
            TokenKind::LineComment => pending_space = true,
            _ => {
                if let Some(prev) = previous {
                    if pending_newline {
                        result.push('\n');
                    } else if pending_space && needs_separator(&prev, &token) {
                        result.push(' ');
                    }
                }
                result.push_str(token.text);
                previous = Some(token);
                pending_newline = false;
                pending_space = false;
            }
        }
    }

    result
}

/// Whether two tokens separated by whitespace would merge if joined
fn needs_separator(prev: &Token<'_>, next: &Token<'_>) -> bool {
    let last = prev.text.chars().last().unwrap_or(' ');
    let first = next.text.chars().next().unwrap_or(' ');

    (is_ident_part(last) && is_ident_part(first))
        || (last == '+' && first == '+')
        || (last == '-' && first == '-')
        || (last == '/' && (first == '/' || first == '*'))
        || (prev.kind == TokenKind::Number && first == '.')
        || (last == '<' && first == '!')
}

/// Rename module-local declarations to short names.
///
/// Only names declared with `const`, `let`, `var`, `function` or `class` that
/// are never exported, never used as a property key and not in `reserved` are
/// renamed. Modules using `eval`, `with` or template substitutions are left
/// untouched.
pub fn mangle(source: &str, reserved: &HashSet<String>) -> String {
    let tokens = tokenize(source);
    let code: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.kind.is_trivia()).collect();

    let unsafe_module = code.iter().any(|t| {
        t.is_keyword("eval") || t.is_keyword("with") || (t.kind == TokenKind::Template && t.text.contains("${"))
    });
    if unsafe_module {
        return source.to_string();
    }

    let mut candidates: Vec<&str> = Vec::new();
    let mut excluded: HashSet<&str> = HashSet::new();
    let mut in_export_list = false;

    for (i, token) in code.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| code[p]);
        let next = code.get(i + 1).copied();

        if token.is_keyword("export") {
            if let Some(name) = exported_declaration(&code[i + 1..]) {
                excluded.insert(name);
            }
            in_export_list = next.is_some_and(|n| n.is_punct("{"));
            continue;
        }
        if in_export_list {
            if token.is_punct("}") {
                in_export_list = false;
            } else if token.kind == TokenKind::Ident {
                excluded.insert(token.text);
            }
            continue;
        }

        if token.kind != TokenKind::Ident {
            continue;
        }

        if prev.is_some_and(|p| DECLARATION_KEYWORDS.iter().any(|k| p.is_keyword(k))) {
            candidates.push(token.text);
        }

        let after_dot = prev.is_some_and(|p| p.is_punct(".") || p.is_punct("?."));
        let object_key = next.is_some_and(|n| n.is_punct(":"))
            && prev.is_some_and(|p| p.is_punct("{") || p.is_punct(","));
        let shorthand = prev.is_some_and(|p| p.is_punct("{") || p.is_punct(","))
            && next.is_some_and(|n| n.is_punct("}") || n.is_punct(","))
            && opens_object(&code[..i]);
        let method = next.is_some_and(|n| n.is_punct("("))
            && prev.is_some_and(|p| p.is_punct("{") || p.is_punct("}") || p.is_punct(";"))
            && opens_class_body(&code[..i]);

        if after_dot || object_key || shorthand || method {
            excluded.insert(token.text);
        }
    }

    let existing: HashSet<&str> = code
        .iter()
        .filter(|t| t.kind == TokenKind::Ident)
        .map(|t| t.text)
        .collect();

    let mut renames: HashMap<&str, String> = HashMap::new();
    let mut generator = NameGenerator::default();

    for name in candidates {
        if renames.contains_key(name)
            || excluded.contains(name)
            || reserved.contains(name)
            || RESERVED.contains(name)
            || name.len() <= 1
        {
            continue;
        }
        let fresh = generator.next_free(|candidate| {
            existing.contains(candidate) || RESERVED.contains(candidate) || reserved.contains(candidate)
        });
        renames.insert(name, fresh);
    }

    if renames.is_empty() {
        return source.to_string();
    }

    let mut result = String::with_capacity(source.len());
    for token in &tokens {
        match renames.get(token.text) {
            Some(fresh) if token.kind == TokenKind::Ident => result.push_str(fresh),
            _ => result.push_str(token.text),
        }
    }
    result
}

/// Name bound by `export [default] [async] function|class|const|let|var <name>`
fn exported_declaration<'a>(rest: &[&Token<'a>]) -> Option<&'a str> {
    rest.iter()
        .take(4)
        .find(|t| {
            t.kind == TokenKind::Ident
                && !matches!(
                    t.text,
                    "default" | "async" | "function" | "class" | "const" | "let" | "var"
                )
        })
        .map(|t| t.text)
}

/// Whether the innermost unclosed `{` before this point opens an object literal
fn opens_object(before: &[&Token<'_>]) -> bool {
    innermost_open_brace(before).is_some_and(|i| {
        i == 0 || {
            let prev = before[i - 1];
            prev.kind == TokenKind::Punct && !matches!(prev.text, ")" | "}" | ";")
                || prev.is_keyword("return")
        }
    })
}

/// Whether the innermost unclosed `{` opens a class body
fn opens_class_body(before: &[&Token<'_>]) -> bool {
    innermost_open_brace(before).is_some_and(|i| {
        before[..i]
            .iter()
            .rev()
            .take(4)
            .any(|t| t.is_keyword("class"))
    })
}

fn innermost_open_brace(before: &[&Token<'_>]) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in before.iter().enumerate().rev() {
        if token.is_punct("}") {
            depth += 1;
        } else if token.is_punct("{") {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
        }
    }
    None
}

/// Produces a, b, ..., Z, aa, ab, ...
#[derive(Default)]
struct NameGenerator {
    counter: usize,
}

impl NameGenerator {
    const ALPHABET: &'static [u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    fn next_free(&mut self, taken: impl Fn(&str) -> bool) -> String {
        loop {
            let name = Self::encode(self.counter);
            self.counter += 1;
            if !taken(&name) {
                return name;
            }
        }
    }

    fn encode(mut n: usize) -> String {
        let base = Self::ALPHABET.len();
        let mut name = Vec::new();
        loop {
            name.push(Self::ALPHABET[n % base]);
            if n < base {
                break;
            }
            n = n / base - 1;
        }
        name.reverse();
        String::from_utf8_lossy(&name).into_owned()
    }
}

static CSS_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static CSS_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static CSS_PUNCT_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*([{}:;,>])\s*").unwrap());

/// Minify a stylesheet with lightningcss
pub fn minify_css(css: &str) -> Result<String> {
    let mut stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| anyhow!("CSS parse error: {}", e))?;

    stylesheet
        .minify(MinifyOptions::default())
        .map_err(|e| anyhow!("CSS minify error: {}", e))?;

    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..Default::default()
        })
        .map_err(|e| anyhow!("CSS print error: {}", e))?;

    Ok(result.code)
}

/// Textual fallback for stylesheets lightningcss rejects
pub fn collapse_css(css: &str) -> String {
    let without_comments = CSS_COMMENT.replace_all(css, "");
    let collapsed = CSS_WHITESPACE.replace_all(&without_comments, " ");
    CSS_PUNCT_SPACE.replace_all(&collapsed, "$1").trim().replace(";}", "}")
}
