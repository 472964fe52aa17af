//! Module resolution
//!
//! Handles resolving import specifiers to canonical module ids. Resolution is
//! a pure function of the static configuration and the filesystem contents,
//! so a single resolver is shared by every traversal step.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bundler::ModuleId;
use crate::config::Config;
use crate::error::{BuildError, Result};
use crate::utils::normalize_path;

/// Module resolver
#[derive(Debug, Clone)]
pub struct Resolver {
    /// Project root; entries and alias targets are relative to it
    root: PathBuf,

    /// Extensions tried in priority order (with leading dot)
    extensions: Vec<String>,

    /// Alias prefix -> absolute target, longest prefix first
    aliases: Vec<(String, PathBuf)>,

    /// Directory names searched for bare specifiers
    module_dirs: Vec<String>,
}

impl Resolver {
    /// Create a new resolver
    pub fn new(config: &Config) -> Self {
        let extensions = config
            .resolve
            .extensions
            .iter()
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();

        let mut aliases: Vec<(String, PathBuf)> = config
            .resolve
            .alias
            .iter()
            .map(|(prefix, target)| (prefix.clone(), config.root.join(target)))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            root: config.root.clone(),
            extensions,
            aliases,
            module_dirs: config.resolve.modules.clone(),
        }
    }

    /// Resolve an import specifier requested by `from` (or an entry when `None`)
    pub fn resolve(&self, specifier: &str, from: Option<&ModuleId>) -> Result<ModuleId> {
        debug!(
            "Resolving '{}' from '{}'",
            specifier,
            from.map(|id| id.as_str()).unwrap_or("<root>")
        );

        let base_dir = from
            .map(|id| id.dir().to_path_buf())
            .unwrap_or_else(|| self.root.clone());

        let found = if let Some(target) = self.apply_alias(specifier) {
            self.find_file(&target)
        } else if is_path_like(specifier) || from.is_none() {
            self.find_file(&normalize_path(&base_dir.join(specifier)))
        } else {
            self.resolve_bare(specifier, &base_dir)
        };

        let Some(found) = found else {
            return Err(BuildError::UnresolvedImport {
                specifier: specifier.to_string(),
                importer: from.cloned(),
            });
        };

        let canonical = fs::canonicalize(&found).unwrap_or_else(|_| normalize_path(&found));
        let id = ModuleId::from_path(&canonical);

        debug!("Resolved to: {}", id);

        Ok(id)
    }

    /// Substitute a matching alias prefix
    fn apply_alias(&self, specifier: &str) -> Option<PathBuf> {
        self.aliases.iter().find_map(|(prefix, target)| {
            if specifier == prefix {
                return Some(target.clone());
            }
            let rest = specifier.strip_prefix(prefix.as_str())?;
            let rest = rest.strip_prefix('/')?;
            Some(normalize_path(&target.join(rest)))
        })
    }

    /// Find the file a path refers to: exact, with extension, or directory index
    fn find_file(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return Some(target.to_path_buf());
        }

        for ext in &self.extensions {
            let with_ext = append_extension(target, ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        if target.is_dir() {
            for ext in &self.extensions {
                let index = target.join(format!("index{}", ext));
                if index.is_file() {
                    return Some(index);
                }
            }
        }

        None
    }

    /// Resolve a bare import by walking up through module directories
    fn resolve_bare(&self, specifier: &str, from_dir: &Path) -> Option<PathBuf> {
        let mut current = from_dir.to_path_buf();

        loop {
            for dir_name in &self.module_dirs {
                let modules_dir = current.join(dir_name);
                if modules_dir.is_dir() {
                    if let Some(resolved) = self.resolve_in_module_dir(&modules_dir, specifier) {
                        return Some(resolved);
                    }
                }
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Resolve a package within a module directory
    fn resolve_in_module_dir(&self, modules_dir: &Path, specifier: &str) -> Option<PathBuf> {
        // Split specifier into package name and subpath
        let (package_name, subpath) = if specifier.starts_with('@') {
            let mut parts = specifier.splitn(3, '/');
            let scope = parts.next()?;
            let name = parts.next()?;
            (format!("{}/{}", scope, name), parts.next())
        } else {
            let mut parts = specifier.splitn(2, '/');
            (parts.next()?.to_string(), parts.next())
        };

        let package_dir = modules_dir.join(&package_name);
        if !package_dir.is_dir() {
            return None;
        }

        if let Some(sub) = subpath {
            return self.find_file(&package_dir.join(sub));
        }

        let package_json = package_dir.join("package.json");
        if let Some(pkg) = fs::read_to_string(&package_json)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        {
            for field in ["module", "main"] {
                if let Some(entry) = pkg.get(field).and_then(|v| v.as_str()) {
                    if let Some(found) = self.find_file(&normalize_path(&package_dir.join(entry))) {
                        return Some(found);
                    }
                }
            }
        }

        self.find_file(&package_dir.join("index"))
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute()
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(ext);
    PathBuf::from(raw)
}
