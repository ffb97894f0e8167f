use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::error::KiraError;

/// Project-local state directory (`.kira-ri/` under the working directory).
#[derive(Debug, Clone)]
pub struct Workspace {
    project_root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self, KiraError> {
        let cwd = std::env::current_dir().map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let project_root = Utf8PathBuf::from_path_buf(cwd.join(".kira-ri"))
            .map_err(|_| KiraError::Filesystem("invalid project path".to_string()))?;
        Ok(Self { project_root })
    }

    pub fn new_with_root(project_root: Utf8PathBuf) -> Self {
        Self { project_root }
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn database_path(&self) -> Utf8PathBuf {
        self.project_root.join("hits.sqlite")
    }

    pub fn checkpoint_path(&self) -> Utf8PathBuf {
        self.project_root.join("checkpoint.txt")
    }

    pub fn ensure_project_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.project_root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

/// Replaces `path` with `content` so that readers see either the old or the
/// new bytes, and the new bytes are on disk before this returns.
pub fn write_bytes_durable(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".kira-ri-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    sync_dir(parent);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Utf8Path) {
    if let Ok(handle) = fs::File::open(dir.as_std_path()) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Utf8Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let workspace = Workspace::new().unwrap();
        assert!(workspace.project_root().ends_with(".kira-ri"));
        assert!(workspace.database_path().ends_with(".kira-ri/hits.sqlite"));
        assert!(workspace.checkpoint_path().ends_with(".kira-ri/checkpoint.txt"));
    }

    #[test]
    fn durable_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("nested/value.txt")).unwrap();
        write_bytes_durable(&path, b"first").unwrap();
        write_bytes_durable(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), "second");
        let leftovers = fs::read_dir(temp.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
