//! Working directory tracking
//!
//! The session never changes the process-wide working directory. It keeps its
//! own current directory and hands it to each spawned child instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("No such directory: '{}'", .0.display())]
    NotFound(PathBuf),

    #[error("Permission denied: '{}'", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Cannot enter {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DirectoryError {
    fn from_io(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => DirectoryError::NotFound(path),
            io::ErrorKind::PermissionDenied => DirectoryError::PermissionDenied(path),
            _ => DirectoryError::Io { path, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Current directory of the session
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    current: PathBuf,
}

impl WorkingDirectory {
    /// Start in `path`, which must be an existing directory
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        // Relative paths resolve against the process directory
        let current = Self::resolve_from(Path::new(""), path.as_ref())?;
        Ok(Self { current })
    }

    /// Start in the directory the process was launched from
    pub fn from_process() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| DirectoryError::from_io(PathBuf::from("."), e))?;
        Self::new(cwd)
    }

    pub fn current(&self) -> &Path {
        &self.current
    }

    /// Change to `target`, relative to the current directory unless
    /// absolute. On failure the current directory is left untouched.
    pub fn change_directory(&mut self, target: &str) -> Result<&Path> {
        let target = target.trim();
        if target.is_empty() {
            return Err(DirectoryError::NotFound(PathBuf::new()));
        }

        let resolved = Self::resolve_from(&self.current, Path::new(target))?;
        tracing::info!("Directory changed: {} -> {}", self.current.display(), resolved.display());
        self.current = resolved;
        Ok(&self.current)
    }

    /// Resolve and validate without touching any state
    fn resolve_from(base: &Path, target: &Path) -> Result<PathBuf> {
        let joined = if target.is_absolute() {
            target.to_path_buf()
        } else {
            base.join(target)
        };

        let canonical = fs::canonicalize(&joined)
            .map_err(|e| DirectoryError::from_io(joined.clone(), e))?;

        let metadata = fs::metadata(&canonical)
            .map_err(|e| DirectoryError::from_io(canonical.clone(), e))?;
        if !metadata.is_dir() {
            return Err(DirectoryError::NotFound(joined));
        }

        // Surfaces access problems now rather than at the next spawn
        fs::read_dir(&canonical).map_err(|e| DirectoryError::from_io(canonical.clone(), e))?;

        Ok(canonical)
    }
}
