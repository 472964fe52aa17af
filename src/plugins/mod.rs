//! Plugin system for Splitpack
//!
//! Lifecycle hooks as an explicit ordered list: every registered plugin is
//! asked, in registration order, at each stage it implements.
//!
//! - `pre_resolve`: rewrite or drop an import specifier before resolution
//! - `post_transform`: adjust a module's transform output before its imports
//!   are followed
//! - `pre_emit`: inspect or extend the final asset list and manifest

mod html;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::bundler::{ModuleId, ModuleType};
use crate::config::Config;
use crate::emitter::EmitPlan;
use crate::error::BuildError;
use crate::optimizer::lexer::{tokenize, Token, TokenKind};
use crate::transform::{compile_regex, TransformOutput};

pub use html::HtmlPlugin;

/// Plugin hook context
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Project root directory
    pub root: PathBuf,
}

/// Result of a pre-resolve hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveResult {
    /// Continue to next plugin unchanged
    Skip,
    /// Continue with a different specifier
    Rewrite(String),
    /// Drop the import; no edge is recorded
    Ignore,
}

/// Plugin trait - implement this to hook into a build
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name for logging and debugging
    fn name(&self) -> &str;

    /// Called when the build starts
    async fn build_start(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Called before an import specifier is resolved
    async fn pre_resolve(
        &self,
        _specifier: &str,
        _importer: Option<&ModuleId>,
        _ctx: &PluginContext,
    ) -> Result<ResolveResult> {
        Ok(ResolveResult::Skip)
    }

    /// Called once per module after its transform chain ran
    async fn post_transform(
        &self,
        _module: &ModuleId,
        _module_type: ModuleType,
        _output: &mut TransformOutput,
        _ctx: &PluginContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Called with the complete asset list before anything is written
    async fn pre_emit(&self, _plan: &mut EmitPlan, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Called when the build ends successfully
    async fn build_end(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }
}

/// Plugin manager
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
    context: PluginContext,
}

impl PluginManager {
    /// Create a new plugin manager
    pub fn new(root: PathBuf) -> Self {
        Self {
            plugins: Vec::new(),
            context: PluginContext { root },
        }
    }

    /// Plugin manager with the built-in plugins the configuration asks for
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let mut manager = Self::new(config.root.clone());

        if !config.ignore.is_empty() {
            manager.register(Arc::new(IgnorePlugin::from_config(config)?));
        }
        if !config.define.is_empty() {
            manager.register(Arc::new(DefinePlugin::new(
                config.define.iter().map(|(k, v)| (k.clone(), v.clone())),
            )));
        }
        if let Some(html) = &config.html {
            manager.register(Arc::new(HtmlPlugin::new(html.clone(), config.output.public_url.clone())));
        }

        Ok(manager)
    }

    /// Register a plugin
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Names of registered plugins, in order
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Run build_start hooks
    pub async fn run_build_start(&self) -> crate::Result<()> {
        for plugin in &self.plugins {
            plugin
                .build_start(&self.context)
                .await
                .map_err(|cause| hook_error(plugin.as_ref(), "build-start", cause))?;
        }
        Ok(())
    }

    /// Run build_end hooks
    pub async fn run_build_end(&self) -> crate::Result<()> {
        for plugin in &self.plugins {
            plugin
                .build_end(&self.context)
                .await
                .map_err(|cause| hook_error(plugin.as_ref(), "build-end", cause))?;
        }
        Ok(())
    }

    /// Run pre_resolve hooks; `None` means the import is dropped
    pub async fn pre_resolve(
        &self,
        specifier: &str,
        importer: Option<&ModuleId>,
    ) -> crate::Result<Option<String>> {
        let mut current = specifier.to_string();

        for plugin in &self.plugins {
            let result = plugin
                .pre_resolve(&current, importer, &self.context)
                .await
                .map_err(|cause| hook_error(plugin.as_ref(), "pre-resolve", cause))?;
            match result {
                ResolveResult::Skip => continue,
                ResolveResult::Rewrite(next) => current = next,
                ResolveResult::Ignore => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Run post_transform hooks
    pub async fn post_transform(
        &self,
        module: &ModuleId,
        module_type: ModuleType,
        output: &mut TransformOutput,
    ) -> crate::Result<()> {
        for plugin in &self.plugins {
            plugin
                .post_transform(module, module_type, output, &self.context)
                .await
                .map_err(|cause| hook_error(plugin.as_ref(), "post-transform", cause))?;
        }
        Ok(())
    }

    /// Run pre_emit hooks
    pub async fn pre_emit(&self, plan: &mut EmitPlan) -> crate::Result<()> {
        for plugin in &self.plugins {
            plugin
                .pre_emit(plan, &self.context)
                .await
                .map_err(|cause| hook_error(plugin.as_ref(), "pre-emit", cause))?;
        }
        Ok(())
    }
}

fn hook_error(plugin: &dyn Plugin, stage: &'static str, cause: anyhow::Error) -> BuildError {
    BuildError::Plugin {
        plugin: plugin.name().to_string(),
        stage,
        cause,
    }
}

// Built-in plugins

/// Drops imports matching a resource pattern, optionally only in some directories
pub struct IgnorePlugin {
    rules: Vec<(Regex, Option<Regex>)>,
}

impl IgnorePlugin {
    pub fn new(rules: Vec<(Regex, Option<Regex>)>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let rules = config
            .ignore
            .iter()
            .map(|rule| {
                let resource = compile_regex(&rule.resource, "ignore.resource")?;
                let context = rule
                    .context
                    .as_deref()
                    .map(|pattern| compile_regex(pattern, "ignore.context"))
                    .transpose()?;
                Ok((resource, context))
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }
}

#[async_trait]
impl Plugin for IgnorePlugin {
    fn name(&self) -> &str {
        "ignore"
    }

    async fn pre_resolve(
        &self,
        specifier: &str,
        importer: Option<&ModuleId>,
        _ctx: &PluginContext,
    ) -> Result<ResolveResult> {
        let importer_dir = importer.map(|id| id.dir().to_string_lossy().replace('\\', "/"));

        let ignored = self.rules.iter().any(|(resource, context)| {
            resource.is_match(specifier)
                && match (context, &importer_dir) {
                    (None, _) => true,
                    (Some(context), Some(dir)) => context.is_match(dir),
                    (Some(_), None) => false,
                }
        });

        Ok(if ignored {
            ResolveResult::Ignore
        } else {
            ResolveResult::Skip
        })
    }
}

/// Whether the identifier between `previous` and `next` names a property, a
/// declared binding or an object key rather than reading a value
fn names_binding(previous: Option<&Token<'_>>, next: Option<&Token<'_>>) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    if previous.is_punct(".") || previous.is_punct("?.") {
        return true;
    }
    if ["const", "let", "var", "function", "class"].iter().any(|k| previous.is_keyword(k)) {
        return true;
    }
    (previous.is_punct("{") || previous.is_punct(",")) && next.is_some_and(|n| n.is_punct(":"))
}

/// Substitutes compile-time constants into script modules
pub struct DefinePlugin {
    /// Dotted key split into segments, and the replacement text
    definitions: Vec<(Vec<String>, String)>,
}

impl DefinePlugin {
    pub fn new(definitions: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|(key, value)| (key.split('.').map(str::to_string).collect(), value))
                .collect(),
        }
    }

    /// Replace defined identifiers outside strings, comments, property
    /// accesses, declarations and object keys
    pub fn apply(&self, source: &str) -> String {
        let tokens = tokenize(source);
        let significant: Vec<usize> = (0..tokens.len())
            .filter(|&i| !tokens[i].kind.is_trivia())
            .collect();

        let mut result = String::with_capacity(source.len());
        let mut cursor = 0;
        let mut pos = 0;

        while pos < significant.len() {
            let index = significant[pos];
            let previous = pos.checked_sub(1).map(|p| &tokens[significant[p]]);
            let next = significant.get(pos + 1).map(|&t| &tokens[t]);

            let matched = if tokens[index].kind == TokenKind::Ident && !names_binding(previous, next) {
                self.definitions.iter().find_map(|(segments, value)| {
                    let width = segments.len() * 2 - 1;
                    let window = significant.get(pos..pos + width)?;
                    let matches = window.iter().enumerate().all(|(offset, &t)| {
                        if offset % 2 == 0 {
                            tokens[t].kind == TokenKind::Ident && tokens[t].text == segments[offset / 2]
                        } else {
                            tokens[t].text == "."
                        }
                    });
                    let followed_by_dot = significant
                        .get(pos + width)
                        .is_some_and(|&t| tokens[t].text == "." && segments.len() == 1);
                    (matches && !followed_by_dot).then_some((width, value))
                })
            } else {
                None
            };

            match matched {
                Some((width, value)) => {
                    let first = &tokens[index];
                    let last = &tokens[significant[pos + width - 1]];
                    result.push_str(&source[cursor..first.start]);
                    result.push_str(value);
                    cursor = last.start + last.text.len();
                    pos += width;
                }
                None => pos += 1,
            }
        }

        result.push_str(&source[cursor..]);
        result
    }
}

#[async_trait]
impl Plugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    async fn post_transform(
        &self,
        _module: &ModuleId,
        module_type: ModuleType,
        output: &mut TransformOutput,
        _ctx: &PluginContext,
    ) -> Result<()> {
        if module_type == ModuleType::Script {
            output.content = self.apply(&output.content);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct Prefixer;

    #[async_trait]
    impl Plugin for Prefixer {
        fn name(&self) -> &str {
            "prefixer"
        }

        async fn pre_resolve(
            &self,
            specifier: &str,
            _importer: Option<&ModuleId>,
            _ctx: &PluginContext,
        ) -> Result<ResolveResult> {
            Ok(match specifier.strip_prefix("virtual:") {
                Some(rest) => ResolveResult::Rewrite(format!("./virtual/{}", rest)),
                None => ResolveResult::Skip,
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn build_start(&self, _ctx: &PluginContext) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn importer(path: &str) -> ModuleId {
        ModuleId::from_path(Path::new(path))
    }

    #[tokio::test]
    async fn test_pre_resolve_chain() {
        let mut manager = PluginManager::new(PathBuf::from("/app"));
        manager.register(Arc::new(Prefixer));
        let locale = Regex::new(r"^\./locale$").unwrap();
        let moment = Regex::new("moment$").unwrap();
        manager.register(Arc::new(IgnorePlugin::new(vec![(locale, Some(moment))])));

        let from_moment = importer("/app/node_modules/moment/index.js");
        let from_src = importer("/app/src/index.js");

        assert_eq!(
            manager.pre_resolve("virtual:a", Some(&from_src)).await.unwrap(),
            Some("./virtual/a".to_string())
        );
        assert_eq!(manager.pre_resolve("./locale", Some(&from_moment)).await.unwrap(), None);
        assert_eq!(
            manager.pre_resolve("./locale", Some(&from_src)).await.unwrap(),
            Some("./locale".to_string())
        );
        assert_eq!(manager.names(), vec!["prefixer", "ignore"]);
    }

    #[tokio::test]
    async fn test_hook_failure_names_plugin() {
        let mut manager = PluginManager::new(PathBuf::from("/app"));
        manager.register(Arc::new(Broken));

        match manager.run_build_start().await.unwrap_err() {
            BuildError::Plugin { plugin, stage, .. } => {
                assert_eq!(plugin, "broken");
                assert_eq!(stage, "build-start");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_define_replaces_free_identifiers() {
        let define = DefinePlugin::new(vec![
            ("ENVIRONMENT".to_string(), "\"production\"".to_string()),
            ("process.env.NODE_ENV".to_string(), "\"production\"".to_string()),
        ]);

        let source = "if (ENVIRONMENT === 'x') { log(config.ENVIRONMENT, \"ENVIRONMENT\", process.env.NODE_ENV); } // ENVIRONMENT";
        assert_eq!(
            define.apply(source),
            "if (\"production\" === 'x') { log(config.ENVIRONMENT, \"ENVIRONMENT\", \"production\"); } // ENVIRONMENT"
        );
    }

    #[test]
    fn test_define_skips_declarations_and_keys() {
        let define = DefinePlugin::new(vec![("ENV".to_string(), "\"prod\"".to_string())]);

        let source = "const ENV = load();\nfunction ENV() {}\nconst o = { ENV: 1, a: 2, ENV: ENV };\nx = a ? ENV : b;";
        assert_eq!(
            define.apply(source),
            "const ENV = load();\nfunction ENV() {}\nconst o = { ENV: 1, a: 2, ENV: \"prod\" };\nx = a ? \"prod\" : b;"
        );
        assert_eq!(define.apply("obj?.ENV"), "obj?.ENV");
    }

    #[tokio::test]
    async fn test_define_only_touches_scripts() {
        let define = DefinePlugin::new(vec![("DEBUG".to_string(), "false".to_string())]);
        let ctx = PluginContext { root: PathBuf::from("/app") };
        let id = importer("/app/src/a.css");

        let mut output = TransformOutput::unchanged(".DEBUG { color: red }");
        define
            .post_transform(&id, ModuleType::Stylesheet, &mut output, &ctx)
            .await
            .unwrap();
        assert_eq!(output.content, ".DEBUG { color: red }");
    }
}
