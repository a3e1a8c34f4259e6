use std::io;
use std::path::Path;
use tempfile::TempDir;

/// Private host directory for one request, deleted on drop
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("sandbox-").tempdir()?;
        Ok(Self { dir })
    }

    /// Create under `root` instead of the system temp dir.
    /// Needed when the Docker daemon cannot see the host's temp dir.
    pub fn create_in(root: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("sandbox-").tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspaces_are_distinct_and_removed() {
        let a = Workspace::create().unwrap();
        let b = Workspace::create().unwrap();
        assert_ne!(a.path(), b.path());

        let path = a.path().to_path_buf();
        assert!(path.is_dir());
        drop(a);
        assert!(!path.exists());
    }

    #[test]
    fn test_create_in_root() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create_in(root.path()).unwrap();
        assert!(ws.path().starts_with(root.path()));
        assert!(ws
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("sandbox-"));
    }
}
