//! Pluggable destination/archive path functions.
//!
//! A path function maps a resolved source file to its relative publish
//! path. Handlers either supply a function directly or name one out of a
//! registry; registry lookups happen eagerly at handler initialisation so
//! a bad name fails the run before any file is touched.

use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("unknown path function '{0}'")]
    UnknownFunction(String),

    #[error("cannot derive a path for '{0}'")]
    Underivable(String),
}

/// Maps a source file to a relative destination path.
pub type PathFn = fn(&Path) -> Result<String, PathError>;

/// Either a direct function or a name to resolve against the registry.
#[derive(Clone)]
pub enum PathSpec {
    Function(PathFn),
    Named(String),
}

impl std::fmt::Debug for PathSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSpec::Function(_) => f.write_str("PathSpec::Function(..)"),
            PathSpec::Named(name) => write!(f, "PathSpec::Named({:?})", name),
        }
    }
}

#[derive(Default)]
pub struct PathFunctionRegistry {
    functions: BTreeMap<String, PathFn>,
}

impl PathFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, function: PathFn) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Result<PathFn, PathError> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| PathError::UnknownFunction(name.to_string()))
    }

    /// Resolve a spec to a concrete function.
    pub fn resolve(&self, spec: &PathSpec) -> Result<PathFn, PathError> {
        match spec {
            PathSpec::Function(function) => Ok(*function),
            PathSpec::Named(name) => self.get(name),
        }
    }
}

/// Basename-only destination, the common default for flat layouts.
pub fn basename_path(path: &Path) -> Result<String, PathError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| PathError::Underivable(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn prefixed(path: &Path) -> Result<String, PathError> {
        Ok(format!("moorings/{}", basename_path(path)?))
    }

    #[test]
    fn registry_lookup_and_resolution() {
        let mut registry = PathFunctionRegistry::new();
        registry.register("moorings", prefixed);

        let direct = registry
            .resolve(&PathSpec::Function(basename_path))
            .unwrap();
        assert_eq!(direct(&PathBuf::from("/tmp/a.nc")).unwrap(), "a.nc");

        let named = registry
            .resolve(&PathSpec::Named("moorings".to_string()))
            .unwrap();
        assert_eq!(named(&PathBuf::from("/tmp/a.nc")).unwrap(), "moorings/a.nc");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = PathFunctionRegistry::new();
        let result = registry.resolve(&PathSpec::Named("nope".to_string()));
        assert!(matches!(result, Err(PathError::UnknownFunction(_))));
    }
}
