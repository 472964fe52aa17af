//! Unused stylesheet rule removal
//!
//! A rule survives when one of its selector tokens (tag, class or id names)
//! appears literally in scanned content. Rules whose selectors carry no such
//! tokens (`*`, `:root`) are always kept.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{BuildError, Result};

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9_-]+").unwrap());

/// Pseudo classes/elements with their optional argument, and attribute selectors
static SELECTOR_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"::?[A-Za-z-]+(?:\([^)]*\))?|\[[^\]]*\]|\\.").unwrap()
});

/// At-rules whose block holds nested rules
const NESTING_AT_RULES: &[&str] = &["media", "supports", "layer", "container", "document"];

/// Words found in scanned content
#[derive(Debug, Default, Clone)]
pub struct ContentTokens {
    tokens: HashSet<String>,
}

impl ContentTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every token of `content`
    pub fn scan(&mut self, content: &str) {
        for m in TOKEN.find_iter(content) {
            if !self.tokens.contains(m.as_str()) {
                self.tokens.insert(m.as_str().to_string());
            }
        }
    }

    /// Scan every file under `root` matching one of `patterns`
    pub fn scan_globs(&mut self, root: &Path, patterns: &[String]) -> Result<()> {
        if patterns.is_empty() {
            return Ok(());
        }
        let globs = build_globset(patterns)?;

        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| !matches!(entry.file_name().to_str(), Some("node_modules" | ".git")));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if globs.is_match(relative) {
                if let Ok(content) = fs::read_to_string(entry.path()) {
                    debug!("Scanning {} for selectors", relative.display());
                    self.scan(&content);
                }
            }
        }

        Ok(())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            BuildError::Config(format!("invalid purify.content glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| BuildError::Config(format!("invalid purify.content globs: {}", e)))
}

/// Drop rules whose selectors reference nothing in `tokens`
pub fn purify_css(css: &str, tokens: &ContentTokens) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;

    while !rest.is_empty() {
        let trimmed = rest.trim_start();
        out.push_str(&rest[..rest.len() - trimmed.len()]);
        rest = trimmed;

        if rest.starts_with("/*") {
            let end = rest[2..].find("*/").map(|i| i + 4).unwrap_or(rest.len());
            rest = &rest[end..];
            continue;
        }

        if rest.is_empty() {
            break;
        }

        let Some(open) = find_outside_strings(rest, &['{', ';', '}']) else {
            out.push_str(rest);
            break;
        };

        match rest.as_bytes()[open] {
            b';' | b'}' => {
                // Statement at-rule (`@import`, `@charset`) or stray brace
                out.push_str(&rest[..=open]);
                rest = &rest[open + 1..];
            }
            _ => {
                let prelude = &rest[..open];
                let Some(close) = matching_brace(rest, open) else {
                    warn!("Unterminated block after '{}', kept as is", prelude.trim());
                    out.push_str(rest);
                    break;
                };
                let body = &rest[open + 1..close];

                if let Some(at_rule) = prelude.strip_prefix('@') {
                    let name: String = at_rule.chars().take_while(|c| c.is_alphanumeric() || *c == '-').collect();
                    if NESTING_AT_RULES.contains(&name.as_str()) {
                        let inner = purify_css(body, tokens);
                        if !inner.trim().is_empty() {
                            out.push_str(prelude);
                            out.push('{');
                            out.push_str(&inner);
                            out.push('}');
                        }
                    } else {
                        out.push_str(&rest[..=close]);
                    }
                } else if selector_used(prelude, tokens) {
                    out.push_str(&rest[..=close]);
                }

                rest = &rest[close + 1..];
            }
        }
    }

    out
}

/// Whether a selector list has to be kept
pub fn selector_used(selector_list: &str, tokens: &ContentTokens) -> bool {
    let mut any_tokens = false;

    for selector in selector_list.split(',') {
        let cleaned = SELECTOR_NOISE.replace_all(selector, " ");
        let mut selector_tokens = TOKEN.find_iter(&cleaned).map(|m| m.as_str()).peekable();

        if selector_tokens.peek().is_none() {
            // `*`, `:root` and friends match without naming anything
            return true;
        }
        any_tokens = true;

        if selector_tokens.any(|token| tokens.contains(token)) {
            return true;
        }
    }

    !any_tokens
}

fn find_outside_strings(s: &str, targets: &[char]) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, c) if targets.contains(&c) => return Some(i),
            _ => {}
        }
    }

    None
}

/// Index of the `}` closing the `{` at `open`
fn matching_brace(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut offset = open;

    while let Some(i) = find_outside_strings(&s[offset..], &['{', '}']) {
        let at = offset + i;
        if s.as_bytes()[at] == b'{' {
            depth += 1;
        } else {
            depth -= 1;
            if depth == 0 {
                return Some(at);
            }
        }
        offset = at + 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(content: &str) -> ContentTokens {
        let mut tokens = ContentTokens::new();
        tokens.scan(content);
        tokens
    }

    #[test]
    fn test_unused_rules_removed() {
        let css = ".used { color: red; }\n.unused { color: blue; }\n#app > .title:hover { margin: 0; }\n";
        let purified = purify_css(css, &tokens(r#"<div id="app" class="used title">"#));

        assert_eq!(
            purified,
            ".used { color: red; }\n\n#app > .title:hover { margin: 0; }\n"
        );
    }

    #[test]
    fn test_tokenless_selectors_kept() {
        let css = "* { box-sizing: border-box; }\n:root { --x: 1; }\n.gone { a: b; }";
        let purified = purify_css(css, &tokens(""));
        assert!(purified.contains("* {"));
        assert!(purified.contains(":root"));
        assert!(!purified.contains(".gone"));
    }

    #[test]
    fn test_media_queries_recurse() {
        let css = "@media (min-width: 10px) { .a { x: y; } .b { x: y; } }\n@media print { .c { x: y; } }\n@font-face { font-family: F; }";
        let purified = purify_css(css, &tokens("a"));

        assert!(purified.contains("@media (min-width: 10px) {"));
        assert!(purified.contains(".a {"));
        assert!(!purified.contains(".b"));
        assert!(!purified.contains("print"));
        assert!(purified.contains("@font-face"));
    }

    #[test]
    fn test_statements_and_strings() {
        let css = "@charset \"utf-8\";\n.icon::before { content: \"}\"; }\n";
        let purified = purify_css(css, &tokens("icon"));
        assert_eq!(purified, css);
    }

    #[test]
    fn test_unterminated_block_kept() {
        assert_eq!(purify_css(".a {", &tokens("")), ".a {");
        assert_eq!(purify_css(".a { content: é", &tokens("")), ".a { content: é");
        assert_eq!(purify_css(".b{x:y}.gone{x:y}\n.c {", &tokens("b")), ".b{x:y}\n.c {");
        assert_eq!(purify_css("@media print { .a {", &tokens("a")), "@media print { .a {");
    }

    #[test]
    fn test_removing_content_never_adds_rules() {
        let css = ".a{x:y}.b{x:y}.c{x:y}";
        let full = purify_css(css, &tokens("a b c"));
        let partial = purify_css(css, &tokens("a c"));
        assert!(partial.len() <= full.len());
        assert_eq!(partial, ".a{x:y}.c{x:y}");
    }

    #[test]
    fn test_scan_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/page.html"), "<p class=\"lead\"></p>").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored-token").unwrap();

        let mut tokens = ContentTokens::new();
        tokens.scan_globs(dir.path(), &["src/**/*.html".to_string()]).unwrap();
        assert!(tokens.contains("lead"));
        assert!(!tokens.contains("ignored-token"));
    }
}
