/// Workspace directory: the only part of the host filesystem that
/// sandboxed code (through its helpers) and the workspace tools can touch.
///
/// Layout:
///   {root}/...   : arbitrary files written by scripts or tools
///
/// Every relative path is normalised lexically before use. Absolute paths
/// and `..` components that climb above the root are rejected as capability
/// violations, and the deepest existing ancestor of the target is
/// canonicalised so a symlink cannot lead outside the root either.
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::error::SandboxError;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Opens (creating if needed) the workspace at `path`.
    pub fn open(path: &Path) -> Result<Self, SandboxError> {
        fs::create_dir_all(path)?;
        let root = path.canonicalize()?;
        debug!("Workspace opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a caller-supplied relative path to a host path under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let requested = Path::new(relative);
        let mut clean = PathBuf::new();
        for component in requested.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !clean.pop() {
                        return Err(SandboxError::capability(format!(
                            "path '{relative}' escapes the workspace"
                        )));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::capability(format!(
                        "absolute path '{relative}' is outside the workspace"
                    )));
                }
            }
        }

        let full = self.root.join(&clean);
        self.check_symlinks(&full, relative)?;
        Ok(full)
    }

    /// Canonicalises the deepest existing ancestor and checks it is still
    /// under the root.
    fn check_symlinks(&self, full: &Path, relative: &str) -> Result<(), SandboxError> {
        let mut probe = full;
        loop {
            if probe.exists() || probe.symlink_metadata().is_ok() {
                let real = probe.canonicalize().map_err(|_| {
                    SandboxError::capability(format!("path '{relative}' cannot be resolved"))
                })?;
                if !real.starts_with(&self.root) {
                    return Err(SandboxError::capability(format!(
                        "path '{relative}' resolves outside the workspace"
                    )));
                }
                return Ok(());
            }
            match probe.parent() {
                Some(parent) => probe = parent,
                None => return Ok(()),
            }
        }
    }

    fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn read(&self, relative: &str) -> Result<String, SandboxError> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(SandboxError::not_found(format!("File not found: {relative}")));
        }
        Ok(fs::read_to_string(&path)?)
    }

    /// Writes `content`, creating parent directories. Returns the byte count.
    pub fn write(&self, relative: &str, content: &str) -> Result<usize, SandboxError> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(SandboxError::Validation("a file name is required".to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        info!("Wrote {} bytes to workspace file {relative}", content.len());
        Ok(content.len())
    }

    /// Files under `dir`, recursively, as sorted root-relative paths.
    pub fn list(&self, dir: &str) -> Result<Vec<String>, SandboxError> {
        let start = self.resolve(dir)?;
        if !start.is_dir() {
            return Err(SandboxError::not_found(format!("Directory not found: {dir}")));
        }
        let mut files = Vec::new();
        let mut pending = vec![start];
        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current)?.filter_map(|e| e.ok()) {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    files.push(self.relative_display(&path));
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn delete(&self, relative: &str) -> Result<(), SandboxError> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(SandboxError::not_found(format!("File not found: {relative}")));
        }
        fs::remove_file(&path)?;
        info!("Deleted workspace file {relative}");
        Ok(())
    }

    /// Number of files in the workspace.
    pub fn file_count(&self) -> usize {
        self.list(".").map(|files| files.len()).unwrap_or(0)
    }

    /// Strips host paths from a message before it leaves the process:
    /// the root becomes `<workspace>`, any other absolute path `<path>`.
    pub fn sanitize_message(&self, message: &str) -> String {
        sanitize_paths(message, &self.root)
    }
}

/// See [`Workspace::sanitize_message`].
pub fn sanitize_paths(message: &str, root: &Path) -> String {
    let root = root.to_string_lossy();
    let replaced = if root.is_empty() || root == "/" {
        message.to_string()
    } else {
        message.replace(root.as_ref(), "<workspace>")
    };

    let mut out = String::with_capacity(replaced.len());
    let mut chars = replaced.char_indices().peekable();
    let mut prev: Option<char> = None;
    while let Some((i, c)) = chars.next() {
        let starts_path = c == '/'
            && prev.map_or(true, |p| p.is_whitespace() || matches!(p, '\'' | '"' | '(' | '=' | ':'))
            && replaced[i + 1..].starts_with(|n: char| n.is_alphanumeric() || n == '_' || n == '.');
        if starts_path {
            while let Some(&(_, n)) = chars.peek() {
                if n.is_whitespace() || matches!(n, '\'' | '"' | ')' | ',' | ':') {
                    break;
                }
                chars.next();
            }
            out.push_str("<path>");
            prev = Some('>');
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        (dir, ws)
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_dir, ws) = workspace();
        assert_eq!(ws.write("notes.txt", "hello").unwrap(), 5);
        assert_eq!(ws.read("notes.txt").unwrap(), "hello");
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let (_dir, ws) = workspace();
        ws.write("a/b/c.txt", "x").unwrap();
        assert_eq!(ws.list(".").unwrap(), vec!["a/b/c.txt"]);
    }

    #[test]
    fn test_list_is_sorted_and_recursive() {
        let (_dir, ws) = workspace();
        ws.write("z.txt", "").unwrap();
        ws.write("a.txt", "").unwrap();
        ws.write("sub/m.txt", "").unwrap();
        assert_eq!(ws.list(".").unwrap(), vec!["a.txt", "sub/m.txt", "z.txt"]);
        assert_eq!(ws.list("sub").unwrap(), vec!["sub/m.txt"]);
        assert_eq!(ws.file_count(), 3);
    }

    #[test]
    fn test_inner_dotdot_stays_inside() {
        let (_dir, ws) = workspace();
        ws.write("sub/../top.txt", "ok").unwrap();
        assert_eq!(ws.read("top.txt").unwrap(), "ok");
    }

    #[test]
    fn test_traversal_is_capability_violation() {
        let (_dir, ws) = workspace();
        let err = ws.read("../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), "capability_violation");
        let err = ws.write("../escape.txt", "x").unwrap_err();
        assert_eq!(err.kind(), "capability_violation");
    }

    #[test]
    fn test_absolute_path_is_capability_violation() {
        let (_dir, ws) = workspace();
        assert_eq!(ws.read("/etc/passwd").unwrap_err().kind(), "capability_violation");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (_dir, ws) = workspace();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.root().join("link")).unwrap();
        let err = ws.read("link/secret.txt").unwrap_err();
        assert_eq!(err.kind(), "capability_violation");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let (_dir, ws) = workspace();
        assert_eq!(ws.read("nope.txt").unwrap_err().kind(), "not_found");
        assert_eq!(ws.delete("nope.txt").unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_delete_removes_file() {
        let (_dir, ws) = workspace();
        ws.write("gone.txt", "x").unwrap();
        ws.delete("gone.txt").unwrap();
        assert!(ws.list(".").unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_message_hides_host_paths() {
        let (_dir, ws) = workspace();
        let message = format!(
            "cannot open {}/data.csv: see /usr/lib/python3/x.py",
            ws.root().display()
        );
        assert_eq!(
            ws.sanitize_message(&message),
            "cannot open <workspace>/data.csv: see <path>"
        );
    }

    #[test]
    fn test_sanitize_leaves_relative_text_alone() {
        assert_eq!(
            sanitize_paths("ratio 3/4 and a/b", Path::new("/srv/ws")),
            "ratio 3/4 and a/b"
        );
    }
}
