//! Export liveness and unused export removal
//!
//! Liveness is collected from the import clauses of every script in the
//! graph. A module imported through a namespace, `require`, a dynamic import
//! or `export *` keeps all of its exports, as does every entry module.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::lexer::{tokenize, Token, TokenKind};
use crate::bundler::{ModuleGraph, ModuleId, ModuleType};

/// `import <clause> from 'x'` and `export <clause> from 'x'`
static CLAUSE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[^\w$.])(import|export)\s*([\w$*{}\s,]+?)\s*from\s*["']([^"'\n]+)["']"#).unwrap()
});

/// `require('x')` and `import('x')`
static OPAQUE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:\brequire|(?:^|[^\w$.])import)\s*\(\s*["']([^"'\n]+)["']\s*\)"#).unwrap()
});

/// Exports of a module some importer uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsedExports {
    All,
    Names(HashSet<String>),
}

impl UsedExports {
    pub fn is_used(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => names.contains(name),
        }
    }
}

/// Used exports per module
#[derive(Debug, Default, Clone)]
pub struct LiveExports {
    used: HashMap<ModuleId, UsedExports>,
}

impl LiveExports {
    /// Collect liveness for every module in the graph
    pub fn collect(graph: &ModuleGraph) -> Self {
        let mut live = Self::default();

        for id in graph.entries().values() {
            live.mark_all(id);
        }

        for module in graph.modules() {
            if module.module_type != ModuleType::Script {
                continue;
            }
            let resolve = |specifier: &str| graph.resolved_import(&module.id, specifier);

            for cap in CLAUSE_IMPORT.captures_iter(&module.transformed) {
                let Some(target) = resolve(&cap[3]) else { continue };
                match parse_clause(&cap[1], &cap[2]) {
                    Clause::All => live.mark_all(target),
                    Clause::Names(names) => live.mark_names(target, names),
                }
            }

            for cap in OPAQUE_IMPORT.captures_iter(&module.transformed) {
                if let Some(target) = resolve(&cap[1]) {
                    live.mark_all(target);
                }
            }
        }

        debug!("Collected export liveness for {} modules", live.used.len());
        live
    }

    fn mark_all(&mut self, id: &ModuleId) {
        self.used.insert(id.clone(), UsedExports::All);
    }

    fn mark_names(&mut self, id: &ModuleId, names: Vec<String>) {
        let entry = self
            .used
            .entry(id.clone())
            .or_insert_with(|| UsedExports::Names(HashSet::new()));
        if let UsedExports::Names(existing) = entry {
            existing.extend(names);
        }
    }

    /// Exports of `id` in use; a module nobody imports by name uses none
    pub fn used(&self, id: &ModuleId) -> UsedExports {
        self.used
            .get(id)
            .cloned()
            .unwrap_or_else(|| UsedExports::Names(HashSet::new()))
    }
}

enum Clause {
    All,
    Names(Vec<String>),
}

/// Names a clause takes from its source module
fn parse_clause(keyword: &str, clause: &str) -> Clause {
    let clause = clause.trim();
    if clause.starts_with('*') || clause.contains("* as") {
        return Clause::All;
    }

    let mut names = Vec::new();
    let (default_part, named_part) = match clause.find('{') {
        Some(open) => (&clause[..open], Some(&clause[open + 1..])),
        None => (clause, None),
    };

    let default_part = default_part.trim().trim_end_matches(',').trim();
    if keyword == "import" && !default_part.is_empty() {
        names.push("default".to_string());
    }

    if let Some(named) = named_part {
        let named = named.split('}').next().unwrap_or_default();
        for specifier in named.split(',') {
            let imported = specifier.split_whitespace().next().unwrap_or_default();
            if !imported.is_empty() {
                names.push(imported.to_string());
            }
        }
    }

    Clause::Names(names)
}

struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

/// Remove unused exports from a script.
///
/// Unused exported declarations lose their `export` keyword. Function and
/// class declarations (and call-free variable declarations) whose name is no
/// longer referenced are removed outright. Unused names are pruned from
/// `export { ... }` lists.
pub fn shake(source: &str, used: &UsedExports) -> String {
    if *used == UsedExports::All {
        return source.to_string();
    }

    let tokens = tokenize(source);
    let code: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.kind.is_trivia()).collect();

    let mut references: HashMap<&str, usize> = HashMap::new();
    for token in code.iter().filter(|t| t.kind == TokenKind::Ident) {
        *references.entry(token.text).or_default() += 1;
    }

    let mut edits = Vec::new();
    let mut i = 0;

    while i < code.len() {
        let token = code[i];
        let at_statement_start = i == 0 || matches!(code[i - 1].text, ";" | "}" | "{");

        if !(token.is_keyword("export") && at_statement_start) {
            i += 1;
            continue;
        }

        if code.get(i + 1).is_some_and(|t| t.is_punct("{")) {
            if let Some((edit, next)) = prune_export_list(source, &code, i, used) {
                edits.extend(edit);
                i = next;
                continue;
            }
        } else if let Some(decl) = declaration_after_export(&code, i).filter(|d| d.single) {
            let export_name = if decl.is_default { "default" } else { decl.name };
            if !used.is_used(export_name) {
                let removable = references.get(decl.name).copied().unwrap_or(0) <= 1
                    && decl.end.is_some();
                let (start, end, replacement) = match decl.end {
                    Some(end) if removable => (token.start, end, String::new()),
                    _ => (token.start, code[decl.keyword_index].start, String::new()),
                };
                edits.push(Edit { start, end, replacement });
            }
        }

        i += 1;
    }

    apply_edits(source, edits)
}

struct Declaration<'a> {
    name: &'a str,
    is_default: bool,
    /// Index of the declaration keyword (or `async`) in `code`
    keyword_index: usize,
    /// End offset if the whole declaration is safe to delete
    end: Option<usize>,
    /// Declares exactly one binding (`export const a = 1, b = 2` does not)
    single: bool,
}

fn declaration_after_export<'a>(code: &[&Token<'a>], export_index: usize) -> Option<Declaration<'a>> {
    let mut i = export_index + 1;
    let is_default = code.get(i)?.is_keyword("default");
    if is_default {
        i += 1;
    }

    let keyword_index = i;
    if code.get(i)?.is_keyword("async") {
        i += 1;
    }
    let keyword = code.get(i)?;
    let kind = keyword.text;
    if !matches!(kind, "function" | "class" | "const" | "let" | "var") || keyword.kind != TokenKind::Ident {
        return None;
    }
    i += 1;
    if code.get(i)?.is_punct("*") {
        i += 1;
    }

    let name_token = code.get(i)?;
    if name_token.kind != TokenKind::Ident {
        return None;
    }

    let (end, single) = match kind {
        "function" | "class" => (block_end(code, i + 1), true),
        _ => variable_end(code, i + 1),
    };

    Some(Declaration {
        name: name_token.text,
        is_default,
        keyword_index,
        end,
        single,
    })
}

/// End of the first brace-delimited block at or after `from`
fn block_end(code: &[&Token<'_>], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for token in &code[from..] {
        if token.is_punct("{") {
            depth += 1;
        } else if token.is_punct("}") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(token.end());
            }
        }
    }
    None
}

/// End of a variable declaration if its initializer calls nothing, and
/// whether it declares a single binding
fn variable_end(code: &[&Token<'_>], from: usize) -> (Option<usize>, bool) {
    let mut depth = 0usize;
    let mut pure = true;

    for token in &code[from..] {
        if token.kind == TokenKind::Template {
            pure = false;
            continue;
        }
        match token.text {
            "(" => {
                pure = false;
                depth += 1;
            }
            "new" => pure = false,
            "{" | "[" => depth += 1,
            ")" | "}" | "]" => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return (None, true),
            },
            "," if depth == 0 => return (None, false),
            ";" if depth == 0 => return (pure.then(|| token.end()), true),
            _ => {}
        }
    }
    (None, true)
}

/// Drop unused specifiers from `export { a, b as c } [from '...']`
fn prune_export_list(
    source: &str,
    code: &[&Token<'_>],
    export_index: usize,
    used: &UsedExports,
) -> Option<(Option<Edit>, usize)> {
    let open = export_index + 1;
    let close = open + code[open..].iter().position(|t| t.is_punct("}"))?;

    let specifiers: Vec<&[&Token<'_>]> = code[open + 1..close]
        .split(|t| t.is_punct(","))
        .filter(|s| !s.is_empty())
        .collect();

    let kept: Vec<String> = specifiers
        .iter()
        .filter(|spec| spec.last().is_some_and(|exported| used.is_used(exported.text)))
        .map(|spec| {
            let start = spec[0].start;
            let end = spec[spec.len() - 1].end();
            source[start..end].to_string()
        })
        .collect();

    if kept.len() == specifiers.len() {
        return Some((None, close + 1));
    }

    // Statement extent, including `from '...'` and the semicolon
    let mut last = close;
    if code.get(last + 1).is_some_and(|t| t.is_keyword("from")) {
        last += 2;
    }
    if code.get(last + 1).is_some_and(|t| t.is_punct(";")) {
        last += 1;
    }
    let last = last.min(code.len() - 1);

    let replacement = if kept.is_empty() {
        String::new()
    } else {
        let tail = &source[code[close].end()..code[last].end()];
        format!("export {{ {} }}{}", kept.join(", "), tail)
    };

    Some((
        Some(Edit {
            start: code[export_index].start,
            end: code[last].end(),
            replacement,
        }),
        last + 1,
    ))
}

fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| e.start);
    let mut result = String::with_capacity(source.len());
    let mut cursor = 0;

    for edit in edits {
        if edit.start < cursor {
            continue;
        }
        result.push_str(&source[cursor..edit.start]);
        result.push_str(&edit.replacement);
        cursor = edit.end;
    }

    result.push_str(&source[cursor..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::tests::graph_of;
    use crate::bundler::graph::tests::id;
    use pretty_assertions::assert_eq;

    fn names(list: &[&str]) -> UsedExports {
        UsedExports::Names(list.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_collect_liveness() {
        let graph = graph_of(
            &[
                ("index.js", "import def, { a, b as c } from './lib.js';\nimport * as ns from './ns.js';\nconst x = require('./req.js');\nexport { z } from './re.js';"),
                ("lib.js", "export const a = 1;"),
                ("ns.js", ""),
                ("req.js", ""),
                ("re.js", ""),
                ("orphan.js", ""),
            ],
            &[
                ("index.js", "lib.js"),
                ("index.js", "ns.js"),
                ("index.js", "req.js"),
                ("index.js", "re.js"),
            ],
            &[("main", "index.js")],
        );

        let live = LiveExports::collect(&graph);
        assert_eq!(live.used(&id("index.js")), UsedExports::All);
        assert_eq!(live.used(&id("lib.js")), names(&["default", "a", "b"]));
        assert_eq!(live.used(&id("ns.js")), UsedExports::All);
        assert_eq!(live.used(&id("req.js")), UsedExports::All);
        assert_eq!(live.used(&id("re.js")), names(&["z"]));
        assert_eq!(live.used(&id("orphan.js")), names(&[]));
    }

    #[test]
    fn test_shake_unused_declarations() {
        let source = "export function used() { return 1; }\nexport function unused() { return { a: 2 }; }\nexport const KEEP = 1;\nexport const DROP = 2;\nexport const CALLED = setup();\n";
        let shaken = shake(source, &names(&["used", "KEEP"]));

        assert_eq!(
            shaken,
            "export function used() { return 1; }\n\nexport const KEEP = 1;\n\nconst CALLED = setup();\n"
        );
    }

    #[test]
    fn test_shake_keeps_locally_referenced() {
        let source = "export function helper() { return 1; }\nexport const value = helper();\n";
        let shaken = shake(source, &names(&["value"]));
        assert_eq!(shaken, "function helper() { return 1; }\nexport const value = helper();\n");
    }

    #[test]
    fn test_shake_export_lists() {
        let source = "const a = 1, b = 2;\nexport { a, b as c };\nexport { d } from './d';\n";
        let shaken = shake(source, &names(&["c"]));
        assert_eq!(shaken, "const a = 1, b = 2;\nexport { b as c };\n\n");
    }

    #[test]
    fn test_shake_leaves_multi_declarator_exports() {
        let source = "export const a = 1, b = 2;\nexport let c = f(1), d = 2;\n";
        assert_eq!(shake(source, &names(&["b", "d"])), source);
        assert_eq!(shake(source, &names(&[])), source);
    }

    #[test]
    fn test_shake_all_is_identity() {
        let source = "export const x = 1;";
        assert_eq!(shake(source, &UsedExports::All), source);
    }
}
