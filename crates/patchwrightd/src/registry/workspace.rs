//! Confinement of caller-supplied paths to the workspace root.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use super::ToolError;

/// Root directory every tool path is resolved against.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    excluded: Gitignore,
}

impl Workspace {
    /// Opens the workspace rooted at `root`.
    ///
    /// `ignore_file` names a gitignore-style file directly under the root.
    /// Its patterns are read once here; paths they match are refused by
    /// [`Workspace::resolve`]. An empty name or a missing file excludes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Fails when the root cannot be canonicalised or the ignore file holds
    /// an invalid pattern.
    pub fn open(root: impl AsRef<Path>, ignore_file: &str) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| ToolError::Io {
            path: root.display().to_string(),
            action: "open workspace",
            source,
        })?;
        let excluded = load_ignore_file(&root, ignore_file)?;
        Ok(Self { root, excluded })
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a workspace-relative path to the file it really names.
    ///
    /// Rejects empty and absolute paths, `..` components, broken symlinks,
    /// paths that escape the root through a symlink, and paths excluded by
    /// the ignore file. Symlinks inside the root are followed, so a write
    /// through a link lands on its target and the link itself survives.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Validation`] naming the offending path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::validation(None, "path is empty"));
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Err(ToolError::validation(
                Some(path),
                "absolute paths are not allowed",
            ));
        }
        for component in candidate.components() {
            if matches!(component, Component::ParentDir | Component::Prefix(_)) {
                return Err(ToolError::validation(
                    Some(path),
                    "path traversal is not allowed",
                ));
            }
        }
        let resolved = self.contain(path, &self.root.join(candidate))?;
        if self.is_excluded(&resolved, resolved.is_dir()) {
            return Err(ToolError::validation(
                Some(path),
                "path is excluded by the ignore file",
            ));
        }
        Ok(resolved)
    }

    /// Canonicalises the longest existing prefix of `resolved` and appends
    /// the components that do not exist yet.
    fn contain(&self, path: &str, resolved: &Path) -> Result<PathBuf, ToolError> {
        let mut missing: Vec<&OsStr> = Vec::new();
        let mut current = resolved;
        loop {
            match current.canonicalize() {
                Ok(real) if real.starts_with(&self.root) => {
                    return Ok(missing
                        .iter()
                        .rev()
                        .fold(real, |base, name| base.join(name)));
                }
                Ok(_) => {
                    return Err(ToolError::validation(
                        Some(path),
                        "path escapes the workspace",
                    ));
                }
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    if fs::symlink_metadata(current).is_ok() {
                        return Err(ToolError::validation(Some(path), "path is a broken symlink"));
                    }
                    let (Some(parent), Some(name)) = (current.parent(), current.file_name())
                    else {
                        return Err(ToolError::validation(
                            Some(path),
                            "path escapes the workspace",
                        ));
                    };
                    missing.push(name);
                    current = parent;
                }
                Err(source) => {
                    return Err(ToolError::Io {
                        path: path.to_owned(),
                        action: "resolve",
                        source,
                    });
                }
            }
        }
    }

    /// True when the ignore file matches `path` or one of its parents.
    #[must_use]
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        path.strip_prefix(&self.root).is_ok_and(|relative| {
            !relative.as_os_str().is_empty()
                && self
                    .excluded
                    .matched_path_or_any_parents(relative, is_dir)
                    .is_ignore()
        })
    }

    /// Workspace-relative rendering of a resolved path.
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

fn load_ignore_file(root: &Path, name: &str) -> Result<Gitignore, ToolError> {
    if name.trim().is_empty() {
        return Ok(Gitignore::empty());
    }
    let path = root.join(name);
    if !path.is_file() {
        return Ok(Gitignore::empty());
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(error) = builder.add(&path) {
        return Err(ToolError::validation(Some(name), error.to_string()));
    }
    builder
        .build()
        .map_err(|error| ToolError::validation(Some(name), error.to_string()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    const IGNORE_FILE: &str = ".patchwrightignore";

    #[fixture]
    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().expect("temp dir");
        let workspace = Workspace::open(dir.path(), IGNORE_FILE).expect("workspace");
        (dir, workspace)
    }

    fn with_ignore_file(patterns: &str) -> (TempDir, Workspace) {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join(IGNORE_FILE), patterns).expect("ignore file");
        let workspace = Workspace::open(dir.path(), IGNORE_FILE).expect("workspace");
        (dir, workspace)
    }

    #[rstest]
    #[case("", "path is empty")]
    #[case("   ", "path is empty")]
    #[case("/etc/passwd", "absolute paths are not allowed")]
    #[case("../outside", "path traversal is not allowed")]
    #[case("src/../../outside", "path traversal is not allowed")]
    fn rejects_unsafe_paths(
        workspace: (TempDir, Workspace),
        #[case] path: &str,
        #[case] message: &str,
    ) {
        let (_dir, workspace) = workspace;
        let error = workspace.resolve(path).expect_err("path must be rejected");
        assert!(error.to_string().contains(message), "{error}");
        assert_eq!(error.kind(), "validation_error");
    }

    #[rstest]
    fn resolves_missing_nested_paths(workspace: (TempDir, Workspace)) {
        let (_dir, workspace) = workspace;
        let resolved = workspace.resolve("a/b/new.txt").expect("resolves");
        assert_eq!(resolved, workspace.root().join("a/b/new.txt"));
        assert_eq!(workspace.relative(&resolved), "a/b/new.txt");
    }

    #[cfg(unix)]
    #[rstest]
    fn rejects_symlinks_leaving_the_root(workspace: (TempDir, Workspace)) {
        let (dir, workspace) = workspace;
        let outside = TempDir::new().expect("outside dir");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");
        let error = workspace
            .resolve("link/file.txt")
            .expect_err("escape must be rejected");
        assert!(error.to_string().contains("escapes the workspace"));
    }

    #[cfg(unix)]
    #[rstest]
    fn symlinks_inside_the_root_resolve_to_their_target(workspace: (TempDir, Workspace)) {
        let (dir, workspace) = workspace;
        fs::write(dir.path().join("real.txt"), "x").expect("target");
        std::os::unix::fs::symlink("real.txt", dir.path().join("alias.txt")).expect("symlink");

        let resolved = workspace.resolve("alias.txt").expect("resolves");
        assert_eq!(resolved, workspace.root().join("real.txt"));
    }

    #[cfg(unix)]
    #[rstest]
    fn broken_symlinks_are_rejected(workspace: (TempDir, Workspace)) {
        let (dir, workspace) = workspace;
        std::os::unix::fs::symlink("nowhere.txt", dir.path().join("dangling")).expect("symlink");
        let error = workspace
            .resolve("dangling")
            .expect_err("dangling link must be rejected");
        assert!(error.to_string().contains("broken symlink"), "{error}");
    }

    #[rstest]
    #[case("secrets/token.txt")]
    #[case("build.log")]
    #[case("nested/deeper/run.log")]
    fn ignored_paths_are_rejected(#[case] path: &str) {
        let (_dir, workspace) = with_ignore_file("secrets/\n*.log\n!keep.log\n");
        let error = workspace.resolve(path).expect_err("ignored path");
        assert!(error.to_string().contains("excluded by the ignore file"), "{error}");
        assert_eq!(error.kind(), "validation_error");
    }

    #[test]
    fn negated_and_unmatched_paths_resolve() {
        let (_dir, workspace) = with_ignore_file("secrets/\n*.log\n!keep.log\n");
        assert!(workspace.resolve("keep.log").is_ok());
        assert!(workspace.resolve("src/main.rs").is_ok());
        assert!(workspace.resolve(".").is_ok());
    }

    #[test]
    fn an_empty_ignore_file_name_excludes_nothing() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join(IGNORE_FILE), "*\n").expect("ignore file");
        let workspace = Workspace::open(dir.path(), "").expect("workspace");
        assert!(workspace.resolve("anything.txt").is_ok());
    }
}
