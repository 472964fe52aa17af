//! Chunk rendering
//!
//! Turns a chunk's (optimized) module contents into the text of its script
//! and stylesheet files. The runtime format rewrites module syntax into
//! registry calls first; plain concatenation keeps sources verbatim.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::interop::to_registry_module;
use super::{Chunk, ModuleGraph, ModuleId};
use crate::config::OutputFormat;
use crate::utils::relative_path;

/// Module registry shared by all chunks of a page
const RUNTIME: &str = r#"var __splitpack__ = (function (g) {
  if (g.__splitpack__) return g.__splitpack__;
  var modules = {};
  var cache = {};
  function load(id) {
    if (cache[id]) return cache[id].exports;
    var module = { exports: {} };
    cache[id] = module;
    var record = modules[id];
    if (!record) throw new Error("Module not found: " + id);
    record[0].call(module.exports, module, module.exports, function (specifier) {
      var target = record[1][specifier];
      return target ? load(target) : {};
    });
    return module.exports;
  }
  function interop(exports) {
    return exports && exports.__esModule ? exports : Object.assign({ default: exports }, exports);
  }
  function reexport(target, source) {
    Object.keys(source).forEach(function (key) {
      if (key === "default" || key === "__esModule" || Object.prototype.hasOwnProperty.call(target, key)) return;
      Object.defineProperty(target, key, { enumerable: true, get: function () { return source[key]; } });
    });
  }
  function dynamic(require) {
    return function (specifier) {
      return Promise.resolve().then(function () { return require(specifier); });
    };
  }
  return (g.__splitpack__ = {
    modules: modules,
    load: load,
    interop: interop,
    reexport: reexport,
    dynamic: dynamic
  });
})(typeof self !== "undefined" ? self : globalThis);
"#;

/// Chunk members ordered so that dependencies come before their importers
pub fn dependency_order<'a>(chunk: &'a Chunk, graph: &ModuleGraph) -> Vec<&'a ModuleId> {
    let mut visited: HashSet<&ModuleId> = HashSet::new();
    let mut order = Vec::with_capacity(chunk.len());

    for root in &chunk.modules {
        if visited.contains(root) {
            continue;
        }
        // Iterative post-order walk restricted to chunk members
        let mut stack: Vec<(&ModuleId, Vec<&ModuleId>)> = vec![(root, children(chunk, graph, root))];
        visited.insert(root);

        while let Some((node, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(next) if visited.insert(next) => {
                    let next_children = children(chunk, graph, next);
                    stack.push((next, next_children));
                }
                Some(_) => {}
                None => {
                    order.push(*node);
                    stack.pop();
                }
            }
        }
    }

    order
}

/// Dependencies of `id` inside `chunk`, reversed so popping yields edge order
fn children<'a>(chunk: &'a Chunk, graph: &ModuleGraph, id: &ModuleId) -> Vec<&'a ModuleId> {
    let mut deps: Vec<&'a ModuleId> = graph
        .dependencies(id)
        .filter_map(|dep| chunk.modules.get(dep))
        .collect();
    deps.reverse();
    deps
}

/// Root-relative name under which a module is registered
pub fn module_name(root: &Path, id: &ModuleId) -> String {
    relative_path(root, id.path()).unwrap_or_else(|| id.to_string())
}

/// Render the script of a chunk from `(module, content)` pairs in load order
pub fn render_script(
    chunk: &Chunk,
    modules: &[(&ModuleId, String)],
    graph: &ModuleGraph,
    root: &Path,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Concat => modules
            .iter()
            .map(|(_, content)| content.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Runtime => render_runtime(chunk, modules, graph, root),
    }
}

fn render_runtime(
    chunk: &Chunk,
    modules: &[(&ModuleId, String)],
    graph: &ModuleGraph,
    root: &Path,
) -> String {
    let mut out = String::from(RUNTIME);

    for (id, content) in modules {
        let name = module_name(root, id);
        let specifiers: HashMap<&str, String> = graph
            .resolved_imports(id)
            .map(|imports| {
                // Stylesheets are emitted separately and resolve to an empty module
                imports
                    .iter()
                    .filter(|(_, target)| {
                        graph.get_module(target).is_some_and(|m| !m.module_type.is_stylesheet())
                    })
                    .map(|(specifier, target)| (specifier.as_str(), module_name(root, target)))
                    .collect()
            })
            .unwrap_or_default();
        let mut pairs: Vec<(&&str, &String)> = specifiers.iter().collect();
        pairs.sort();
        let map = pairs
            .iter()
            .map(|(specifier, target)| format!("{}:{}", json_string(specifier), json_string(target)))
            .collect::<Vec<_>>()
            .join(",");

        out.push_str(&format!(
            "\n// {}\n__splitpack__.modules[{}] = [function (module, exports, require) {{\n{}\n}}, {{{}}}];\n",
            name,
            json_string(&name),
            to_registry_module(content),
            map
        ));
    }

    if let Some(entry) = &chunk.entry {
        if graph.get_module(entry).is_some_and(|m| !m.module_type.is_stylesheet()) {
            out.push_str(&format!("\n__splitpack__.load({});\n", json_string(&module_name(root, entry))));
        }
    }

    out
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Render the stylesheet of a chunk from contents in load order
pub fn render_stylesheet(contents: &[String]) -> String {
    contents
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| c.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::tests::{graph_of, id};
    use pretty_assertions::assert_eq;

    fn chunk_of(names: &[&str]) -> Chunk {
        let mut chunk = Chunk::entry("main".into(), id(names[0]), vec!["main".into()]);
        for name in &names[1..] {
            chunk.modules.insert(id(name));
        }
        chunk
    }

    #[test]
    fn test_dependencies_first() {
        let graph = graph_of(
            &[("a.js", ""), ("b.js", ""), ("c.js", ""), ("d.js", "")],
            &[("a.js", "b.js"), ("a.js", "c.js"), ("b.js", "d.js"), ("c.js", "d.js"), ("d.js", "a.js")],
            &[("main", "a.js")],
        );
        let chunk = chunk_of(&["a.js", "b.js", "c.js", "d.js"]);

        let order: Vec<String> = dependency_order(&chunk, &graph)
            .into_iter()
            .map(|id| module_name(Path::new("/app"), id))
            .collect();
        assert_eq!(order, vec!["src/d.js", "src/b.js", "src/c.js", "src/a.js"]);
    }

    #[test]
    fn test_concat_is_verbatim() {
        let graph = graph_of(&[("a.js", "const a = 1;")], &[], &[("main", "a.js")]);
        let chunk = chunk_of(&["a.js"]);
        let a = id("a.js");

        let rendered = render_script(
            &chunk,
            &[(&a, "const a = 1;".to_string())],
            &graph,
            Path::new("/app"),
            OutputFormat::Concat,
        );
        assert_eq!(rendered, "const a = 1;");
    }

    #[test]
    fn test_runtime_registers_modules_and_loads_entry() {
        let graph = graph_of(&[("a.js", ""), ("b.js", "")], &[("a.js", "b.js")], &[("main", "a.js")]);
        let chunk = chunk_of(&["a.js", "b.js"]);
        let (a, b) = (id("a.js"), id("b.js"));

        let rendered = render_script(
            &chunk,
            &[(&b, "exports.b = 1;".to_string()), (&a, "require('./b.js');".to_string())],
            &graph,
            Path::new("/app"),
            OutputFormat::Runtime,
        );

        assert!(rendered.starts_with("var __splitpack__"));
        assert!(rendered.contains("__splitpack__.modules[\"src/b.js\"] = [function (module, exports, require) {\nexports.b = 1;\n}, {}];"));
        assert!(rendered.contains("{\"./b.js\":\"src/b.js\"}"));
        assert!(rendered.ends_with("__splitpack__.load(\"src/a.js\");\n"));
    }

    #[test]
    fn test_runtime_rewrites_module_syntax() {
        let graph = graph_of(
            &[("a.js", ""), ("b.js", ""), ("s.css", "")],
            &[("a.js", "b.js"), ("a.js", "s.css")],
            &[("main", "a.js")],
        );
        let chunk = chunk_of(&["a.js", "b.js"]);
        let (a, b) = (id("a.js"), id("b.js"));

        let rendered = render_script(
            &chunk,
            &[
                (&b, "export const b = 1;".to_string()),
                (&a, "import { b } from './b.js';\nimport './s.css';\nconsole.log(b);".to_string()),
            ],
            &graph,
            Path::new("/app"),
            OutputFormat::Runtime,
        );

        assert!(!rendered.contains("import "));
        assert!(!rendered.contains("export "));
        assert!(rendered.contains("{\"./b.js\":\"src/b.js\"}"));
        assert!(!rendered.contains("\"./s.css\":"));
        assert!(rendered.contains("var __splitpack_import_0__ = __splitpack__.interop(require('./b.js')), b = __splitpack_import_0__.b;"));
        assert!(rendered.contains("get: function () { return b; }"));
    }

    #[test]
    fn test_stylesheet_concatenation() {
        let css = render_stylesheet(&[".a{}\n".to_string(), "  ".to_string(), ".b{}".to_string()]);
        assert_eq!(css, ".a{}\n.b{}");
    }
}
