//! Build error taxonomy
//!
//! Every failure aborts the whole build. Nothing is retried: inputs and
//! transforms are deterministic, so a retry would reproduce the same error.

use std::path::PathBuf;
use std::time::Duration;

use crate::bundler::ModuleId;

/// Result alias used throughout the engine
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// Errors produced by a build
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// An import specifier could not be mapped to a file
    #[error("Cannot resolve '{specifier}' from {}", importer.as_ref().map(|id| id.to_string()).unwrap_or_else(|| "<entry>".to_string()))]
    UnresolvedImport {
        specifier: String,
        importer: Option<ModuleId>,
    },

    /// A rule matching the module names a transform nobody registered
    #[error("No transform registered under '{transform}' (required by {module})")]
    NoTransformRegistered { transform: String, module: ModuleId },

    /// A transform collaborator failed
    #[error("Transform '{transform}' failed on {module}: {cause:#}")]
    Transform {
        transform: String,
        module: ModuleId,
        #[source]
        cause: anyhow::Error,
    },

    /// Module source could not be read
    #[error("Failed to read module {module}: {source}")]
    Read {
        module: ModuleId,
        #[source]
        source: std::io::Error,
    },

    /// Internal bug: the chunk assignment lost or duplicated a module
    #[error("Chunk partition invariant violated: {0}")]
    PartitionInvariantViolation(String),

    /// Emission failed
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Graph traversal exceeded the configured build timeout
    #[error("Build timed out after {0:?}")]
    BuildTimeout(Duration),

    /// A lifecycle hook failed
    #[error("Plugin '{plugin}' failed during {stage}: {cause:#}")]
    Plugin {
        plugin: String,
        stage: &'static str,
        #[source]
        cause: anyhow::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BuildError {
    /// Short name of the pipeline stage that produced this error
    pub fn stage(&self) -> &'static str {
        match self {
            BuildError::UnresolvedImport { .. } => "resolve",
            BuildError::NoTransformRegistered { .. }
            | BuildError::Transform { .. }
            | BuildError::Read { .. } => "transform",
            BuildError::PartitionInvariantViolation(_) => "split",
            BuildError::Write { .. } => "emit",
            BuildError::BuildTimeout(_) => "graph",
            BuildError::Plugin { stage, .. } => *stage,
            BuildError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_unresolved_import_message() {
        let err = BuildError::UnresolvedImport {
            specifier: "./missing".to_string(),
            importer: Some(ModuleId::from_path(Path::new("/app/src/index.js"))),
        };

        assert_eq!(
            err.to_string(),
            "Cannot resolve './missing' from /app/src/index.js"
        );
        assert_eq!(err.stage(), "resolve");
    }

    #[test]
    fn test_transform_error_keeps_cause() {
        let err = BuildError::Transform {
            transform: "json".to_string(),
            module: ModuleId::from_path(Path::new("/app/data.json")),
            cause: anyhow::anyhow!("expected value at line 1"),
        };

        let message = err.to_string();
        assert!(message.contains("json"));
        assert!(message.contains("/app/data.json"));
        assert!(message.contains("expected value"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
