//! Directory resolution for the client.
//!
//! The config directory comes from the command line or the platform default;
//! logs live beside it. Everything else about the platform is the session's
//! socket layer's business.

use std::path::{Path, PathBuf};
use std::{fmt, io};

/// Errors that can occur while preparing client directories.
#[derive(Debug)]
pub enum PlatformError {
    /// A directory could not be created.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to create {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
        }
    }
}

/// Directories the client writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDirs {
    /// Holds `config.ron`.
    pub config_dir: PathBuf,
    /// Holds the debug-build JSON log.
    pub log_dir: PathBuf,
}

impl ClientDirs {
    /// Directories rooted at `config_dir`.
    pub fn under(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            log_dir: config_dir.join("logs"),
        }
    }

    /// Directories under `override_dir`, or under the platform config dir.
    pub fn resolve(override_dir: Option<&Path>) -> Self {
        match override_dir {
            Some(dir) => Self::under(dir),
            None => Self::under(&nebula_config::default_config_dir()),
        }
    }

    /// Create all directories on disk.
    pub fn create_dirs(&self) -> Result<(), PlatformError> {
        for dir in [&self.config_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|source| PlatformError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
