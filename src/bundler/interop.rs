//! ES module syntax to registry calls
//!
//! The runtime output format registers every script as a function of
//! `(module, exports, require)`, where `import` and `export` statements are
//! syntax errors. This pass rewrites them into that shape. Exports become
//! getters on `exports`, defined before the module body runs so that cyclic
//! importers see them. Imports become `require` calls hoisted above the body
//! in source order. Imported bindings are copied when the import runs, so a
//! cyclic import observes the value at that point.

use crate::optimizer::lexer::{tokenize, Token, TokenKind};

/// Name of the registry global defined by the runtime
const REGISTRY: &str = "__splitpack__";

/// Local holding an anonymous default export
const DEFAULT_BINDING: &str = "__splitpack_default__";

/// Rewrite static `import`/`export` statements and dynamic `import()` calls
/// into registry calls. A script without module syntax comes back unchanged.
pub fn to_registry_module(source: &str) -> String {
    let tokens = tokenize(source);
    let code: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.kind.is_trivia()).collect();

    let mut rewriter = Rewriter {
        source,
        code: &code,
        getters: Vec::new(),
        requires: Vec::new(),
        edits: Vec::new(),
        bindings: 0,
        module_syntax: false,
    };
    rewriter.run();
    rewriter.finish()
}

struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

struct Rewriter<'s, 'c> {
    source: &'s str,
    code: &'c [&'c Token<'s>],
    /// `(exported name, expression)` pairs
    getters: Vec<(String, String)>,
    /// Hoisted import statements
    requires: Vec<String>,
    edits: Vec<Edit>,
    bindings: usize,
    module_syntax: bool,
}

impl<'s, 'c> Rewriter<'s, 'c> {
    fn run(&mut self) {
        let mut i = 0;
        while i < self.code.len() {
            let token = self.code[i];
            let after_dot = i > 0 && self.code[i - 1].is_punct(".");

            if token.is_keyword("import") && !after_dot {
                match self.code.get(i + 1) {
                    Some(next) if next.is_punct("(") => {
                        self.replace(token.start, token.end(), format!("{}.dynamic(require)", REGISTRY));
                        i += 1;
                        continue;
                    }
                    Some(next) if next.is_punct(".") => {
                        i += 1;
                        continue;
                    }
                    _ => {}
                }
                if self.at_statement_start(i) {
                    if let Some(next) = self.import_statement(i) {
                        self.module_syntax = true;
                        i = next;
                        continue;
                    }
                }
            } else if token.is_keyword("export") && !after_dot && self.at_statement_start(i) {
                if let Some(next) = self.export_statement(i) {
                    self.module_syntax = true;
                    i = next;
                    continue;
                }
            }
            i += 1;
        }
    }

    fn finish(self) -> String {
        if !self.module_syntax && self.edits.is_empty() {
            return self.source.to_string();
        }

        let mut out = String::new();
        if self.module_syntax {
            out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
        }
        for (name, expression) in &self.getters {
            out.push_str(&format!(
                "Object.defineProperty(exports, {}, {{ enumerable: true, get: function () {{ return {}; }} }});\n",
                quoted(name),
                expression
            ));
        }
        for statement in &self.requires {
            out.push_str(statement);
            out.push('\n');
        }
        out.push_str(&apply_edits(self.source, self.edits));
        out
    }

    /// Import and export declarations only appear at the top level, so a
    /// statement boundary before the keyword is enough to tell them apart
    /// from property names and labels.
    fn at_statement_start(&self, i: usize) -> bool {
        let Some(prev) = i.checked_sub(1).map(|p| self.code[p]) else {
            return true;
        };
        prev.is_punct(";")
            || prev.is_punct("}")
            || self.source[prev.end()..self.code[i].start].contains('\n')
    }

    fn replace(&mut self, start: usize, end: usize, replacement: String) {
        self.edits.push(Edit { start, end, replacement });
    }

    fn next_binding(&mut self) -> String {
        let name = format!("__splitpack_import_{}__", self.bindings);
        self.bindings += 1;
        name
    }

    fn token(&self, i: usize) -> Option<&'c Token<'s>> {
        self.code.get(i).copied()
    }

    /// Index after an optional `;` at `i`
    fn skip_semicolon(&self, i: usize) -> usize {
        match self.token(i) {
            Some(t) if t.is_punct(";") => i + 1,
            _ => i,
        }
    }

    /// Byte offset where the statement ending before token `next` ends
    fn end_offset(&self, next: usize) -> usize {
        self.code[next - 1].end()
    }

    /// `from '<specifier>'` at `i`, returning the quoted specifier
    fn from_clause(&self, i: usize) -> Option<&'s str> {
        let from = self.token(i)?;
        let specifier = self.token(i + 1)?;
        (from.is_keyword("from") && specifier.kind == TokenKind::Str).then_some(specifier.text)
    }

    fn import_statement(&mut self, i: usize) -> Option<usize> {
        let start = self.code[i].start;
        let mut j = i + 1;

        if let Some(specifier) = self.token(j).filter(|t| t.kind == TokenKind::Str) {
            let next = self.skip_semicolon(j + 1);
            self.requires.push(format!("require({});", specifier.text));
            self.replace(start, self.end_offset(next), String::new());
            return Some(next);
        }

        let mut default = None;
        let mut namespace = None;
        let mut named = Vec::new();
        loop {
            let token = self.token(j)?;
            if token.is_keyword("from") && self.from_clause(j).is_some() {
                break;
            } else if token.is_punct("{") {
                let (list, next) = self.specifier_list(j)?;
                named = list;
                j = next;
            } else if token.is_punct("*") {
                let alias = self.token(j + 2)?;
                if !self.token(j + 1)?.is_keyword("as") || alias.kind != TokenKind::Ident {
                    return None;
                }
                namespace = Some(alias.text);
                j += 3;
            } else if token.is_punct(",") {
                j += 1;
            } else if token.kind == TokenKind::Ident && default.is_none() {
                default = Some(token.text);
                j += 1;
            } else {
                return None;
            }
        }

        let specifier = self.from_clause(j)?;
        let next = self.skip_semicolon(j + 2);
        let binding = self.next_binding();

        let mut declarators = vec![format!("{} = {}.interop(require({}))", binding, REGISTRY, specifier)];
        if let Some(local) = default {
            declarators.push(format!("{} = {}.default", local, binding));
        }
        if let Some(local) = namespace {
            declarators.push(format!("{} = {}", local, binding));
        }
        for (imported, local) in named {
            declarators.push(format!("{} = {}", local, member(&binding, &imported)));
        }
        self.requires.push(format!("var {};", declarators.join(", ")));
        self.replace(start, self.end_offset(next), String::new());
        Some(next)
    }

    fn export_statement(&mut self, i: usize) -> Option<usize> {
        let export = self.code[i];
        let next = self.token(i + 1)?;

        if next.is_punct("*") {
            let (alias, from) = if self.token(i + 2)?.is_keyword("as") {
                (Some(self.token(i + 3)?), i + 4)
            } else {
                (None, i + 2)
            };
            let specifier = self.from_clause(from)?;
            let end = self.skip_semicolon(from + 2);
            match alias {
                Some(alias) => {
                    let binding = self.next_binding();
                    self.requires
                        .push(format!("var {} = {}.interop(require({}));", binding, REGISTRY, specifier));
                    self.getters.push((name_of(alias), binding));
                }
                None => self.requires.push(format!(
                    "{}.reexport(exports, {}.interop(require({})));",
                    REGISTRY, REGISTRY, specifier
                )),
            }
            self.replace(export.start, self.end_offset(end), String::new());
            return Some(end);
        }

        if next.is_punct("{") {
            let (list, after) = self.specifier_list(i + 1)?;
            let end = match self.from_clause(after) {
                Some(specifier) => {
                    let binding = self.next_binding();
                    self.requires
                        .push(format!("var {} = {}.interop(require({}));", binding, REGISTRY, specifier));
                    for (local, exported) in list {
                        self.getters.push((exported, member(&binding, &local)));
                    }
                    self.skip_semicolon(after + 2)
                }
                None => {
                    for (local, exported) in list {
                        self.getters.push((exported, local));
                    }
                    self.skip_semicolon(after)
                }
            };
            self.replace(export.start, self.end_offset(end), String::new());
            return Some(end);
        }

        if next.is_keyword("default") {
            return self.export_default(i);
        }

        let mut k = i + 1;
        if next.is_keyword("async") {
            k += 1;
        }
        let keyword = self.token(k)?;
        let names = match keyword.text {
            "function" | "class" if keyword.kind == TokenKind::Ident => {
                let mut n = k + 1;
                if self.token(n)?.is_punct("*") {
                    n += 1;
                }
                let name = self.token(n).filter(|t| t.kind == TokenKind::Ident)?;
                vec![name.text.to_string()]
            }
            "const" | "let" | "var" if keyword.kind == TokenKind::Ident => {
                declared_names(self.source, self.code, k + 1)
            }
            _ => return None,
        };
        for name in names {
            self.getters.push((name.clone(), name));
        }
        self.replace(export.start, next.start, String::new());
        Some(i + 1)
    }

    fn export_default(&mut self, i: usize) -> Option<usize> {
        let export = self.code[i];
        let value = self.token(i + 2)?;

        let mut k = i + 2;
        if value.is_keyword("async") && self.token(k + 1).is_some_and(|t| t.is_keyword("function")) {
            k += 1;
        }
        let keyword = self.code.get(k)?;

        if keyword.is_keyword("function") || keyword.is_keyword("class") {
            let mut n = k + 1;
            if self.token(n).is_some_and(|t| t.is_punct("*")) {
                n += 1;
            }
            let name = self
                .token(n)
                .filter(|t| t.kind == TokenKind::Ident && !t.is_keyword("extends"));
            if let Some(name) = name {
                self.getters.push(("default".to_string(), name.text.to_string()));
                self.replace(export.start, value.start, String::new());
                return Some(i + 2);
            }
            // Anonymous declarations become expressions and need their own terminator
            if let Some(end) = body_end(self.code, n) {
                self.replace(end, end, ";".to_string());
            }
        }

        self.getters.push(("default".to_string(), DEFAULT_BINDING.to_string()));
        self.replace(export.start, value.start, format!("var {} = ", DEFAULT_BINDING));
        Some(i + 2)
    }

    /// `{ a, b as c, "d" as e }` starting at the `{` at `i`, as
    /// `(left, right)` name pairs
    fn specifier_list(&self, i: usize) -> Option<(Vec<(String, String)>, usize)> {
        let mut list = Vec::new();
        let mut j = i + 1;
        loop {
            let token = self.token(j)?;
            if token.is_punct("}") {
                return Some((list, j + 1));
            }
            if token.is_punct(",") {
                j += 1;
                continue;
            }
            if !matches!(token.kind, TokenKind::Ident | TokenKind::Str) {
                return None;
            }
            let left = name_of(token);
            j += 1;
            let right = match self.token(j) {
                Some(t) if t.is_keyword("as") => {
                    let alias = self.token(j + 1)?;
                    j += 2;
                    name_of(alias)
                }
                _ => left.clone(),
            };
            list.push((left, right));
        }
    }
}

/// Byte offset just past the body of a function or class whose name (if
/// any) would sit at token `from`
fn body_end(code: &[&Token<'_>], from: usize) -> Option<usize> {
    let mut parens = 0usize;
    let mut open = None;
    for (offset, token) in code[from..].iter().enumerate() {
        match token.text {
            "(" if token.kind == TokenKind::Punct => parens += 1,
            ")" if token.kind == TokenKind::Punct => parens = parens.saturating_sub(1),
            "{" if token.kind == TokenKind::Punct && parens == 0 => {
                open = Some(from + offset);
                break;
            }
            _ => {}
        }
    }

    let mut depth = 0usize;
    for token in &code[open?..] {
        if token.is_punct("{") {
            depth += 1;
        } else if token.is_punct("}") {
            depth -= 1;
            if depth == 0 {
                return Some(token.end());
            }
        }
    }
    None
}

/// Names bound by the declarators of a `const`/`let`/`var` statement whose
/// first declarator starts at token `from`
fn declared_names(source: &str, code: &[&Token<'_>], from: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut expect_binding = true;
    let mut i = from;

    while let Some(token) = code.get(i) {
        if expect_binding {
            expect_binding = false;
            if token.kind == TokenKind::Ident {
                names.push(token.text.to_string());
                i += 1;
                continue;
            }
            if token.is_punct("{") || token.is_punct("[") {
                i = pattern_names(code, i, &mut names);
                continue;
            }
            break;
        }

        if depth == 0 && ends_statement(source, code, i) {
            break;
        }
        match token.text {
            "(" | "[" | "{" if token.kind == TokenKind::Punct => depth += 1,
            ")" | "]" | "}" if token.kind == TokenKind::Punct => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => break,
            },
            "," if depth == 0 => expect_binding = true,
            ";" if depth == 0 => break,
            _ => {}
        }
        i += 1;
    }
    names
}

/// Automatic semicolon insertion, approximated: a token on a new line that
/// cannot continue the previous expression starts the next statement
fn ends_statement(source: &str, code: &[&Token<'_>], i: usize) -> bool {
    let Some(prev) = i.checked_sub(1).map(|p| code[p]) else {
        return false;
    };
    let token = code[i];
    if !source[prev.end()..token.start].contains('\n') {
        return false;
    }
    let prev_ends_value = matches!(
        prev.kind,
        TokenKind::Ident | TokenKind::Number | TokenKind::Str | TokenKind::Template | TokenKind::Regex
    ) || prev.is_punct(")")
        || prev.is_punct("]")
        || prev.is_punct("}");
    let starts_value = matches!(token.kind, TokenKind::Ident | TokenKind::Number | TokenKind::Str);
    prev_ends_value && starts_value
}

/// Binding names of a destructuring pattern opening at `open`; returns the
/// index after its closing bracket
fn pattern_names(code: &[&Token<'_>], open: usize, names: &mut Vec<String>) -> usize {
    let mut depth = 0usize;
    // Depth at which a default value is being skipped
    let mut skipping: Option<usize> = None;
    let mut i = open;

    while let Some(token) = code.get(i) {
        match token.text {
            "{" | "[" | "(" if token.kind == TokenKind::Punct => depth += 1,
            "}" | "]" | ")" if token.kind == TokenKind::Punct => {
                if skipping == Some(depth) {
                    skipping = None;
                }
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            "," if skipping == Some(depth) => skipping = None,
            "=" if skipping.is_none() && token.kind == TokenKind::Punct => skipping = Some(depth),
            _ if skipping.is_none() && token.kind == TokenKind::Ident => {
                let binds = code
                    .get(i + 1)
                    .is_some_and(|next| [",", "}", "]", "="].iter().any(|p| next.is_punct(p)));
                if binds {
                    names.push(token.text.to_string());
                }
            }
            _ => {}
        }
        i += 1;
    }
    i
}

/// Name of an identifier or string-literal specifier
fn name_of(token: &Token<'_>) -> String {
    match token.kind {
        TokenKind::Str if token.text.len() >= 2 => token.text[1..token.text.len() - 1].to_string(),
        _ => token.text.to_string(),
    }
}

/// Property access on `object`, bracketed when `name` is not an identifier
fn member(object: &str, name: &str) -> String {
    let identifier = name
        .chars()
        .next()
        .is_some_and(crate::optimizer::lexer::is_ident_start)
        && name.chars().all(crate::optimizer::lexer::is_ident_part);
    if identifier {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, quoted(name))
    }
}

fn quoted(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
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
    use pretty_assertions::assert_eq;

    /// Statement-level `import`/`export` keywords left in a script
    fn module_keywords(source: &str) -> Vec<String> {
        let tokens = tokenize(source);
        let code: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.kind.is_trivia()).collect();
        code.iter()
            .enumerate()
            .filter(|(i, t)| {
                (t.is_keyword("import") || t.is_keyword("export"))
                    && !code.get(i + 1).is_some_and(|n| n.is_punct("("))
                    && !(*i > 0 && code[i - 1].is_punct("."))
            })
            .map(|(_, t)| t.text.to_string())
            .collect()
    }

    #[test]
    fn test_plain_script_unchanged() {
        let source = "const a = require('./a');\nmodule.exports = a;\n";
        assert_eq!(to_registry_module(source), source);
    }

    #[test]
    fn test_imports_hoisted_to_requires() {
        let source = "console.log(d, a, c, ns);\nimport d, { a, b as c } from './x';\nimport * as ns from \"./y\";\nimport './side.css';\n";
        let out = to_registry_module(source);

        assert_eq!(
            out,
            "Object.defineProperty(exports, \"__esModule\", { value: true });\n\
             var __splitpack_import_0__ = __splitpack__.interop(require('./x')), d = __splitpack_import_0__.default, a = __splitpack_import_0__.a, c = __splitpack_import_0__.b;\n\
             var __splitpack_import_1__ = __splitpack__.interop(require(\"./y\")), ns = __splitpack_import_1__;\n\
             require('./side.css');\n\
             console.log(d, a, c, ns);\n\n\n\n"
        );
    }

    #[test]
    fn test_export_declarations_become_getters() {
        let source = "export function f() {}\nexport async function g() {}\nexport class C {}\nexport const a = 1, { b, c: [d] } = o, e = f(1, 2);\n";
        let out = to_registry_module(source);

        for name in ["f", "g", "C", "a", "b", "d", "e"] {
            let getter = format!(
                "Object.defineProperty(exports, \"{}\", {{ enumerable: true, get: function () {{ return {}; }} }});",
                name, name
            );
            assert!(out.contains(&getter), "missing getter for {}:\n{}", name, out);
        }
        assert!(!out.contains("\"c\""));
        assert!(out.contains("function f() {}\nasync function g() {}\nclass C {}\nconst a = 1,"));
        assert!(module_keywords(&out).is_empty());
    }

    #[test]
    fn test_export_lists_and_reexports() {
        let source = "const a = 1, b = 2;\nexport { a, b as default };\nexport { x as y } from './x';\nexport * from './all';\nexport * as ns from './ns';\n";
        let out = to_registry_module(source);

        assert!(out.contains("\"a\", { enumerable: true, get: function () { return a; } }"));
        assert!(out.contains("\"default\", { enumerable: true, get: function () { return b; } }"));
        assert!(out.contains("var __splitpack_import_0__ = __splitpack__.interop(require('./x'));"));
        assert!(out.contains("\"y\", { enumerable: true, get: function () { return __splitpack_import_0__.x; } }"));
        assert!(out.contains("__splitpack__.reexport(exports, __splitpack__.interop(require('./all')));"));
        assert!(out.contains("\"ns\", { enumerable: true, get: function () { return __splitpack_import_1__; } }"));
        assert!(module_keywords(&out).is_empty());
    }

    #[test]
    fn test_default_exports() {
        let named = to_registry_module("export default function main() { return 1; }\n");
        assert!(named.contains("get: function () { return main; }"));
        assert!(named.ends_with("function main() { return 1; }\n"));

        let anonymous = to_registry_module("export default class extends Base {}\nfoo();\n");
        assert!(anonymous.ends_with("var __splitpack_default__ = class extends Base {};\nfoo();\n"));

        let expression = to_registry_module("export default { a: 1 };\n");
        assert!(expression.contains("get: function () { return __splitpack_default__; }"));
        assert!(expression.ends_with("var __splitpack_default__ = { a: 1 };\n"));
    }

    #[test]
    fn test_dynamic_import_and_properties() {
        let source = "const m = import('./lazy');\nconst meta = obj.import;\nconst o = { export: 1 };\n";
        let out = to_registry_module(source);

        assert_eq!(
            out,
            "const m = __splitpack__.dynamic(require)('./lazy');\nconst meta = obj.import;\nconst o = { export: 1 };\n"
        );
    }

    #[test]
    fn test_strings_and_comments_untouched() {
        let source = "// import x from 'y'\nconst s = \"export default 1\";\n";
        assert_eq!(to_registry_module(source), source);
    }
}
