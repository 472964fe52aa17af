//! Code transformation
//!
//! Transforms are external collaborators behind a single contract: content in,
//! content plus discovered import specifiers out. Rules select which
//! transforms run for a module; every matching rule contributes its
//! transforms, in declaration order, each consuming the previous output.

mod builtin;
mod cache;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundler::{ModuleId, ModuleType};
use crate::config::Config;
use crate::error::{BuildError, Result};

pub use builtin::{
    JsonTransform, RawTransform, ScriptTransform, StylesheetTransform, UppercaseTransform,
};
pub use cache::TransformCache;

/// Options handed to a transform, straight from the rule configuration
pub type TransformOptions = toml::Table;

/// What a transform produces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    /// New module content
    pub content: String,

    /// Import specifiers discovered while transforming
    pub imports: Vec<String>,
}

impl TransformOutput {
    /// Output that leaves content unchanged and discovers nothing
    pub fn unchanged(content: &str) -> Self {
        Self {
            content: content.to_string(),
            imports: Vec::new(),
        }
    }
}

/// What a transform receives
#[derive(Debug, Clone, Copy)]
pub struct TransformInput<'a> {
    pub module: &'a ModuleId,
    pub module_type: ModuleType,
    pub content: &'a str,
}

/// A content transform
pub trait Transform: Send + Sync {
    /// Name rules refer to
    fn name(&self) -> &str;

    /// Transform content; must be a pure function of input and options
    fn transform(
        &self,
        input: &TransformInput<'_>,
        options: &TransformOptions,
    ) -> anyhow::Result<TransformOutput>;
}

/// Transforms available to rules, by name
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled transforms
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptTransform));
        registry.register(Arc::new(StylesheetTransform));
        registry.register(Arc::new(JsonTransform));
        registry.register(Arc::new(RawTransform));
        registry.register(Arc::new(UppercaseTransform));
        registry
    }

    /// Register a transform, replacing any previous one with the same name
    pub fn register(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.insert(transform.name().to_string(), transform);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Transform>> {
        self.transforms.get(name)
    }
}

/// One step of a rule: a transform name plus its options
#[derive(Debug, Clone)]
struct TransformStep {
    name: String,
    options: TransformOptions,
    /// Stable rendering of the options, part of the cache key
    signature: String,
}

/// Compiled rule
#[derive(Debug, Clone)]
struct TransformRule {
    test: Regex,
    include: Option<PathBuf>,
    exclude: Option<Regex>,
    steps: Vec<TransformStep>,
    cache: bool,
}

impl TransformRule {
    fn matches(&self, id: &ModuleId) -> bool {
        if !self.test.is_match(id.as_str()) {
            return false;
        }
        if let Some(include) = &self.include {
            if !id.path().starts_with(include) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default, Clone)]
struct TransformTiming {
    calls: usize,
    cache_hits: usize,
    total: Duration,
}

/// Per-transform execution summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformStats {
    pub name: String,
    pub calls: usize,
    pub cache_hits: usize,
    pub total_ms: f64,
}

/// Selects and runs transform chains
pub struct TransformPipeline {
    rules: Vec<TransformRule>,
    registry: TransformRegistry,
    cache: Option<Arc<TransformCache>>,
    timings: DashMap<String, TransformTiming>,
}

impl TransformPipeline {
    /// Compile the configured rules against a registry
    pub fn new(config: &Config, registry: TransformRegistry) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let test = compile_regex(&rule.test, "rules.test")?;
                let exclude = rule
                    .exclude
                    .as_deref()
                    .map(|pattern| compile_regex(pattern, "rules.exclude"))
                    .transpose()?;
                let steps = rule
                    .uses
                    .iter()
                    .map(|step| {
                        let options = step.options();
                        let signature = toml::to_string(&options).unwrap_or_default();
                        TransformStep {
                            name: step.name().to_string(),
                            options,
                            signature,
                        }
                    })
                    .collect();

                Ok(TransformRule {
                    test,
                    include: rule.include.as_ref().map(|dir| config.root.join(dir)),
                    exclude,
                    steps,
                    cache: rule.cache,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            registry,
            cache: None,
            timings: DashMap::new(),
        })
    }

    /// Use a transform cache for rules that ask for one
    pub fn with_cache(mut self, cache: Arc<TransformCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register an additional transform
    pub fn register(&mut self, transform: Arc<dyn Transform>) {
        self.registry.register(transform);
    }

    /// Names of the transforms that would run for a module, in order
    pub fn chain_for<'a>(&'a self, id: &'a ModuleId) -> Vec<&'a str> {
        self.steps_for(id).map(|(_, step)| step.name.as_str()).collect()
    }

    fn steps_for<'a>(
        &'a self,
        id: &'a ModuleId,
    ) -> impl Iterator<Item = (&'a TransformRule, &'a TransformStep)> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.matches(id))
            .flat_map(|rule| rule.steps.iter().map(move |step| (rule, step)))
    }

    /// Thread a module's raw content through its transform chain
    pub fn run(&self, id: &ModuleId, module_type: ModuleType, raw: &str) -> Result<TransformOutput> {
        let mut output = TransformOutput::unchanged(raw);

        for (rule, step) in self.steps_for(id) {
            let transform = self.registry.get(&step.name).ok_or_else(|| {
                BuildError::NoTransformRegistered {
                    transform: step.name.clone(),
                    module: id.clone(),
                }
            })?;

            let started = Instant::now();
            let cache = self.cache.as_ref().filter(|_| rule.cache);
            let key = cache.map(|_| TransformCache::key(&output.content, &step.name, &step.signature));

            let cached = match (cache, &key) {
                (Some(cache), Some(key)) => cache.get(key),
                _ => None,
            };
            let hit = cached.is_some();

            let result = match cached {
                Some(result) => result,
                None => {
                    let input = TransformInput {
                        module: id,
                        module_type,
                        content: &output.content,
                    };
                    let result = transform.transform(&input, &step.options).map_err(|cause| {
                        BuildError::Transform {
                            transform: step.name.clone(),
                            module: id.clone(),
                            cause,
                        }
                    })?;
                    if let (Some(cache), Some(key)) = (cache, key) {
                        cache.insert(key, result.clone());
                    }
                    result
                }
            };

            self.record(&step.name, started.elapsed(), hit);
            debug!(
                "{} -> {} ({} imports{})",
                step.name,
                id,
                result.imports.len(),
                if hit { ", cached" } else { "" }
            );

            output.content = result.content;
            for import in result.imports {
                if !output.imports.contains(&import) {
                    output.imports.push(import);
                }
            }
        }

        Ok(output)
    }

    fn record(&self, name: &str, elapsed: Duration, hit: bool) {
        let mut timing = self.timings.entry(name.to_string()).or_default();
        timing.calls += 1;
        timing.total += elapsed;
        if hit {
            timing.cache_hits += 1;
        }
    }

    /// Timing summary, sorted by transform name
    pub fn stats(&self) -> Vec<TransformStats> {
        let mut stats: Vec<TransformStats> = self
            .timings
            .iter()
            .map(|entry| TransformStats {
                name: entry.key().clone(),
                calls: entry.calls,
                cache_hits: entry.cache_hits,
                total_ms: entry.total.as_secs_f64() * 1000.0,
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

pub(crate) fn compile_regex(pattern: &str, field: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| BuildError::Config(format!("{} '{}' is not a valid regex: {}", field, pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuleConfig, TransformUseConfig};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Suffix(&'static str);

    impl Transform for Suffix {
        fn name(&self) -> &str {
            self.0
        }

        fn transform(
            &self,
            input: &TransformInput<'_>,
            _options: &TransformOptions,
        ) -> anyhow::Result<TransformOutput> {
            Ok(TransformOutput {
                content: format!("{}+{}", input.content, self.0),
                imports: vec![format!("./{}", self.0)],
            })
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl Transform for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn transform(
            &self,
            input: &TransformInput<'_>,
            _options: &TransformOptions,
        ) -> anyhow::Result<TransformOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TransformOutput::unchanged(input.content))
        }
    }

    struct Failing;

    impl Transform for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn transform(
            &self,
            _input: &TransformInput<'_>,
            _options: &TransformOptions,
        ) -> anyhow::Result<TransformOutput> {
            anyhow::bail!("syntax error at 1:1")
        }
    }

    fn rule(test: &str, uses: &[&str], cache: bool) -> RuleConfig {
        RuleConfig {
            test: test.to_string(),
            include: None,
            exclude: None,
            uses: uses.iter().map(|u| TransformUseConfig::Name(u.to_string())).collect(),
            cache,
        }
    }

    fn pipeline(rules: Vec<RuleConfig>, transforms: Vec<Arc<dyn Transform>>) -> TransformPipeline {
        let mut config = Config::default_config();
        config.root = "/app".into();
        config.rules = rules;
        let mut registry = TransformRegistry::new();
        for transform in transforms {
            registry.register(transform);
        }
        TransformPipeline::new(&config, registry).unwrap()
    }

    fn id(path: &str) -> ModuleId {
        ModuleId::from_path(Path::new(path))
    }

    #[test]
    fn test_matching_rules_run_in_registration_order() {
        let pipeline = pipeline(
            vec![rule(r"\.js$", &["a", "b"], false), rule(r"\.(js|ts)$", &["c"], false)],
            vec![Arc::new(Suffix("a")), Arc::new(Suffix("b")), Arc::new(Suffix("c"))],
        );
        let module = id("/app/src/index.js");

        let output = pipeline.run(&module, ModuleType::Script, "src").unwrap();
        assert_eq!(output.content, "src+a+b+c");
        assert_eq!(output.imports, vec!["./a", "./b", "./c"]);
        assert_eq!(pipeline.chain_for(&module), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unmatched_module_passes_through() {
        let pipeline = pipeline(vec![rule(r"\.css$", &["a"], false)], vec![Arc::new(Suffix("a"))]);

        let output = pipeline.run(&id("/app/src/index.js"), ModuleType::Script, "x").unwrap();
        assert_eq!(output, TransformOutput::unchanged("x"));
    }

    #[test]
    fn test_include_and_exclude() {
        let mut config = Config::default_config();
        config.root = "/app".into();
        let mut with_scope = rule(r"\.js$", &["a"], false);
        with_scope.include = Some("src".to_string());
        with_scope.exclude = Some("node_modules".to_string());
        config.rules = vec![with_scope];
        let mut registry = TransformRegistry::new();
        registry.register(Arc::new(Suffix("a")));
        let pipeline = TransformPipeline::new(&config, registry).unwrap();

        assert_eq!(pipeline.chain_for(&id("/app/src/a.js")), vec!["a"]);
        assert!(pipeline.chain_for(&id("/app/lib/a.js")).is_empty());
        assert!(pipeline.chain_for(&id("/app/src/node_modules/x/a.js")).is_empty());
    }

    #[test]
    fn test_unregistered_transform() {
        let pipeline = pipeline(vec![rule(r"\.less$", &["less"], false)], vec![]);

        let err = pipeline
            .run(&id("/app/src/theme.less"), ModuleType::Stylesheet, "")
            .unwrap_err();
        assert!(matches!(err, BuildError::NoTransformRegistered { ref transform, .. } if transform == "less"));
    }

    #[test]
    fn test_transform_error_is_wrapped() {
        let pipeline = pipeline(vec![rule(r"\.js$", &["failing"], false)], vec![Arc::new(Failing)]);
        let module = id("/app/src/index.js");

        match pipeline.run(&module, ModuleType::Script, "").unwrap_err() {
            BuildError::Transform { transform, module: failed, cause } => {
                assert_eq!(transform, "failing");
                assert_eq!(failed, module);
                assert!(cause.to_string().contains("syntax error"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_cached_rule_skips_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(TransformCache::in_memory());
        let pipeline = pipeline(
            vec![rule(r"\.js$", &["counting"], true)],
            vec![Arc::new(Counting(calls.clone()))],
        )
        .with_cache(cache.clone());

        pipeline.run(&id("/app/src/a.js"), ModuleType::Script, "same").unwrap();
        pipeline.run(&id("/app/src/b.js"), ModuleType::Script, "same").unwrap();
        pipeline.run(&id("/app/src/c.js"), ModuleType::Script, "different").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.hits(), 1);

        let stats = pipeline.stats();
        assert_eq!(stats[0].name, "counting");
        assert_eq!(stats[0].calls, 3);
        assert_eq!(stats[0].cache_hits, 1);
    }

    #[test]
    fn test_uncached_rule_ignores_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline(
            vec![rule(r"\.js$", &["counting"], false)],
            vec![Arc::new(Counting(calls.clone()))],
        )
        .with_cache(Arc::new(TransformCache::in_memory()));

        pipeline.run(&id("/app/src/a.js"), ModuleType::Script, "same").unwrap();
        pipeline.run(&id("/app/src/a.js"), ModuleType::Script, "same").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_rule_regex() {
        let mut config = Config::default_config();
        config.rules = vec![rule("(", &["a"], false)];

        let err = TransformPipeline::new(&config, TransformRegistry::new()).err().unwrap();
        assert!(matches!(err, BuildError::Config(_)));
    }
}
