use std::path::{Component, Path, PathBuf};

use crate::executor::ToolError;

/// Directory tree the file tools and shell working directories may touch.
#[derive(Debug, Clone)]
pub(crate) struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self {
            root: root.canonicalize().unwrap_or(root),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative paths are taken from the root) and require
    /// it to stay inside the root, following symlinks of existing ancestors.
    pub(crate) fn resolve(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = resolve_via_ancestors(&joined).ok_or_else(|| ToolError::SandboxViolation {
            path: joined.display().to_string(),
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(ToolError::SandboxViolation {
                path: resolved.display().to_string(),
            });
        }
        Ok(resolved)
    }
}

/// Canonicalize the longest existing ancestor and re-append the rest.
///
/// Returns `None` when the non-existent remainder contains `..`, which
/// could otherwise climb out of the canonicalized base.
fn resolve_via_ancestors(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut suffix = PathBuf::new();
    while !existing.exists() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            break;
        };
        suffix = PathBuf::from(name).join(&suffix);
        existing = parent;
    }
    if path.components().any(|c| c == Component::ParentDir) && !suffix.as_os_str().is_empty() {
        return None;
    }
    let base = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    if suffix.as_os_str().is_empty() {
        Some(base)
    } else {
        Some(base.join(&suffix))
    }
}
