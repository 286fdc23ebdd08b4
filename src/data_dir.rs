use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the storage location from, in order of priority:
    /// 1. An explicit path (from --data-dir or the config)
    /// 2. The KB_STORAGE_PATH environment variable
    /// 3. The XDG data directory (~/.local/share/kbase/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Some(val) =
            std::env::var_os("KB_STORAGE_PATH").filter(|v| !v.is_empty())
        {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("kbase")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn redb_path(&self) -> PathBuf {
        self.root.join("kbase.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.redb_path(), tmp.path().join("kbase.redb"));
    }

    #[test]
    fn missing_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("knowledge/base");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
    }

    #[test]
    fn unusable_location_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"not a directory").unwrap();

        assert!(matches!(
            DataDir::resolve(Some(&file)),
            Err(Error::DataDir(_))
        ));
    }
}
