//! On-disk locations used by the binary.

use std::io;
use std::path::{Path, PathBuf};

use lattice_config::default_config_dir;

const APP_NAME: &str = "lattice";

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("could not determine the OS data directory")]
    NoDataDir,

    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Config, world and log directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Holds `config.ron`.
    pub config_dir: PathBuf,
    /// Default parent of world saves.
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    /// Platform directories (XDG on Linux, Known Folders on Windows,
    /// Library on macOS). `config_override` replaces the config directory;
    /// logs live next to the config file.
    pub fn resolve(config_override: Option<&Path>) -> Result<Self, PathError> {
        let data_base = dirs::data_dir().ok_or(PathError::NoDataDir)?;
        let config_dir = config_override.map_or_else(default_config_dir, Path::to_path_buf);
        Ok(Self {
            log_dir: config_dir.join("logs"),
            data_dir: data_base.join(APP_NAME),
            config_dir,
        })
    }

    /// Everything under one root. Used by tests.
    pub fn with_root(root: &Path) -> Self {
        let app = root.join(APP_NAME);
        Self {
            config_dir: app.join("config"),
            data_dir: app.join("data"),
            log_dir: app.join("logs"),
        }
    }

    /// Default directory for world saves.
    pub fn worlds_dir(&self) -> PathBuf {
        self.data_dir.join("worlds")
    }

    pub fn create_dirs(&self) -> Result<(), PathError> {
        for dir in [&self.config_dir, &self.data_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|source| PathError::Create {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root_layout() {
        let root = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_root(root.path());
        assert!(paths.config_dir.starts_with(root.path()));
        assert_eq!(paths.worlds_dir(), root.path().join("lattice").join("data").join("worlds"));
    }

    #[test]
    fn test_create_dirs() {
        let root = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_root(root.path());
        paths.create_dirs().unwrap();
        assert!(paths.config_dir.is_dir());
        assert!(paths.data_dir.is_dir());
        assert!(paths.log_dir.is_dir());
        // Creating again is fine.
        paths.create_dirs().unwrap();
    }

    #[test]
    fn test_config_override() {
        let custom = PathBuf::from("custom").join("cfg");
        if let Ok(paths) = AppPaths::resolve(Some(&custom)) {
            assert_eq!(paths.config_dir, custom);
            assert_eq!(paths.log_dir, custom.join("logs"));
            assert!(paths.data_dir.ends_with(APP_NAME));
        }
    }
}
