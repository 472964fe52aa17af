//! Bundled transforms
//!
//! Stand-ins for the usual loader chain: import discovery for scripts and
//! stylesheets, JSON and raw-text module wrapping, and a text case transform.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Transform, TransformInput, TransformOptions, TransformOutput};

/// Static imports, re-exports and require calls
static IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)(?:^|[^\w$.])(?:import|export)\s*(?:[\w$*{}\s,]+?\s*from\s*)?["']([^"'\n]+)["']|\brequire\s*\(\s*["']([^"'\n]+)["']\s*\)"#).unwrap()
});

static DYNAMIC_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*\)"#).unwrap()
});

/// `@import "x";`, `@import url(x) screen;`
static CSS_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;[ \t]*\n?"#).unwrap()
});

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

fn option_bool(options: &TransformOptions, key: &str, default: bool) -> bool {
    options.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Module prologue for generated modules
fn export_default(options: &TransformOptions, value: &str) -> String {
    if option_bool(options, "es_module", true) {
        format!("export default {};", value)
    } else {
        format!("module.exports = {};", value)
    }
}

/// Discovers script imports; leaves content unchanged
pub struct ScriptTransform;

impl Transform for ScriptTransform {
    fn name(&self) -> &str {
        "script"
    }

    fn transform(&self, input: &TransformInput<'_>, _options: &TransformOptions) -> Result<TransformOutput> {
        let source = strip_comments(input.content);
        let mut imports = Vec::new();

        for cap in IMPORT_REGEX.captures_iter(&source) {
            if let Some(specifier) = cap.get(1).or_else(|| cap.get(2)) {
                push_unique(&mut imports, specifier.as_str());
            }
        }

        for cap in DYNAMIC_IMPORT_REGEX.captures_iter(&source) {
            if let Some(specifier) = cap.get(1) {
                push_unique(&mut imports, specifier.as_str());
            }
        }

        Ok(TransformOutput {
            content: input.content.to_string(),
            imports,
        })
    }
}

/// Replace comments by spaces so commented-out imports are not discovered
fn strip_comments(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            result.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    result.push(next);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => {
                quote = Some(c);
                result.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        result.push('\n');
                    }
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                result.push(' ');
            }
            _ => result.push(c),
        }
    }

    result
}

/// Discovers and removes bundled `@import` rules
pub struct StylesheetTransform;

impl Transform for StylesheetTransform {
    fn name(&self) -> &str {
        "css"
    }

    fn transform(&self, input: &TransformInput<'_>, _options: &TransformOptions) -> Result<TransformOutput> {
        let mut imports = Vec::new();

        let content = CSS_IMPORT_REGEX.replace_all(input.content, |cap: &regex::Captures<'_>| {
            let target = &cap[1];
            if is_remote(target) {
                // External stylesheets stay as they are
                return cap[0].to_string();
            }
            push_unique(&mut imports, &css_specifier(target));
            String::new()
        });

        Ok(TransformOutput {
            content: content.into_owned(),
            imports,
        })
    }
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("//")
        || target.starts_with("data:")
}

/// CSS imports are relative unless prefixed with `~`
fn css_specifier(target: &str) -> String {
    if let Some(package) = target.strip_prefix('~') {
        package.to_string()
    } else if target.starts_with("./") || target.starts_with("../") || target.starts_with('/') {
        target.to_string()
    } else {
        format!("./{}", target)
    }
}

/// Validates JSON and exposes it as the default export
pub struct JsonTransform;

impl Transform for JsonTransform {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(&self, input: &TransformInput<'_>, options: &TransformOptions) -> Result<TransformOutput> {
        let value: serde_json::Value = serde_json::from_str(input.content)
            .with_context(|| format!("Invalid JSON in {}", input.module))?;

        Ok(TransformOutput {
            content: export_default(options, &serde_json::to_string(&value)?),
            imports: Vec::new(),
        })
    }
}

/// Exposes text content as a string default export
pub struct RawTransform;

impl Transform for RawTransform {
    fn name(&self) -> &str {
        "raw"
    }

    fn transform(&self, input: &TransformInput<'_>, options: &TransformOptions) -> Result<TransformOutput> {
        Ok(TransformOutput {
            content: export_default(options, &serde_json::to_string(input.content)?),
            imports: Vec::new(),
        })
    }
}

/// Uppercases text content
pub struct UppercaseTransform;

impl Transform for UppercaseTransform {
    fn name(&self) -> &str {
        "uppercase"
    }

    fn transform(&self, input: &TransformInput<'_>, _options: &TransformOptions) -> Result<TransformOutput> {
        Ok(TransformOutput::unchanged(&input.content.to_uppercase()))
    }
}
