//! Resolution of the local host's compute instance identifier.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::ids::InstanceId;

/// Platform file holding the instance UUID on OpenStack/KVM guests.
pub const DEFAULT_IDENTITY_PATH: &str = "/sys/class/dmi/id/product_uuid";

/// Errors raised while resolving the host identity.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdentityError {
    /// Raised when the identity source cannot be read.
    #[error("failed to read instance identity from {path}: {message}")]
    Unreadable {
        /// Identity source path.
        path: Utf8PathBuf,
        /// Error reported by the filesystem.
        message: String,
    },
    /// Raised when the identity source holds no identifier.
    #[error("instance identity at {path} is empty")]
    Empty {
        /// Identity source path.
        path: Utf8PathBuf,
    },
}

/// Source of the local instance identifier.
pub trait IdentitySource: Send + Sync {
    /// Returns the identifier of the instance this process runs on.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the identity cannot be determined.
    fn instance_id(&self) -> Result<InstanceId, IdentityError>;
}

/// Reads the identifier from a file such as the DMI product UUID.
///
/// The file is read on every call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileIdentity {
    path: Utf8PathBuf,
}

impl FileIdentity {
    /// Creates a resolver reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path the resolver reads from.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read(&self) -> Result<String, IdentityError> {
        let unreadable = |message: String| IdentityError::Unreadable {
            path: self.path.clone(),
            message,
        };
        let parent = self.path.parent().unwrap_or_else(|| Utf8Path::new("/"));
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| unreadable(String::from("path has no file name")))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| unreadable(err.to_string()))?;
        dir.read_to_string(file_name)
            .map_err(|err| unreadable(err.to_string()))
    }
}

impl Default for FileIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_PATH)
    }
}

impl IdentitySource for FileIdentity {
    fn instance_id(&self) -> Result<InstanceId, IdentityError> {
        let raw = self.read()?;
        let normalised = normalise(&raw);
        if normalised.is_empty() {
            return Err(IdentityError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(InstanceId::from(normalised))
    }
}

/// Matches the compute service's identifier format: trimmed and lower case.
fn normalise(raw: &str) -> String {
    raw.trim().to_lowercase()
}
