//! Per-user upload staging area ("sandbox").

use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Physical location of the user's sandbox file `name`, if it exists.
    async fn physical_path(&self, user_id: i64, name: &str) -> Option<PathBuf>;
}

/// Sandbox laid out as `<root>/<user_id>/<name>`.
#[derive(Debug, Clone)]
pub struct DirSandbox {
    root: PathBuf,
}

impl DirSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn user_dir(&self, user_id: i64) -> PathBuf {
        self.root.join(user_id.to_string())
    }
}

/// A sandbox name is a single plain path component.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

#[async_trait]
impl Sandbox for DirSandbox {
    async fn physical_path(&self, user_id: i64, name: &str) -> Option<PathBuf> {
        if !is_plain_file_name(name) {
            return None;
        }
        let path = self.user_dir(user_id).join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_only_plain_existing_files() {
        let td = tempfile::tempdir().unwrap();
        let sb = DirSandbox::new(td.path());
        std::fs::create_dir_all(sb.user_dir(5).join("sub")).unwrap();
        std::fs::write(sb.user_dir(5).join("jobs.txt"), "a.json\n").unwrap();
        std::fs::write(td.path().join("secret"), "x").unwrap();

        assert_eq!(
            sb.physical_path(5, "jobs.txt").await,
            Some(sb.user_dir(5).join("jobs.txt"))
        );
        assert_eq!(sb.physical_path(6, "jobs.txt").await, None);
        assert_eq!(sb.physical_path(5, "missing.zip").await, None);
        assert_eq!(sb.physical_path(5, "sub").await, None);
        assert_eq!(sb.physical_path(5, "../secret").await, None);
        assert_eq!(sb.physical_path(5, "..").await, None);
    }
}
