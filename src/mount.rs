//! Mount directories under the mount root, and mounting devices into them.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info, warn};

use crate::host::{HostError, HostOps};
use crate::volume::VolumeName;

/// Result of an unmount request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnmountOutcome {
    /// A mount was removed.
    Unmounted,
    /// Nothing was mounted at the path.
    NotMounted,
}

/// Mounts and unmounts devices at paths derived from volume names.
#[derive(Debug)]
pub struct MountManager<'a, H> {
    host: &'a H,
}

impl<'a, H: HostOps> MountManager<'a, H> {
    /// Creates a manager over `host`.
    #[must_use]
    pub const fn new(host: &'a H) -> Self {
        Self { host }
    }

    /// Mounts `device` at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the mount fails.
    pub fn mount(&self, device: &Utf8Path, path: &Utf8Path) -> Result<(), HostError> {
        self.host.mount(device, path)?;
        info!(%device, %path, "device mounted");
        Ok(())
    }

    /// Unmounts `path`, treating "not mounted" as success.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] for any failure other than "not mounted".
    pub fn unmount(&self, path: &Utf8Path) -> Result<UnmountOutcome, HostError> {
        match self.host.unmount(path) {
            Ok(()) => {
                info!(%path, "volume unmounted");
                Ok(UnmountOutcome::Unmounted)
            }
            Err(HostError::NotMounted { .. }) => {
                warn!(%path, "unmount requested but nothing is mounted");
                Ok(UnmountOutcome::NotMounted)
            }
            Err(other) => Err(other),
        }
    }
}

/// Directory under which each volume gets its mount point.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountRoot {
    path: Utf8PathBuf,
}

impl MountRoot {
    /// Wraps the mount root path without touching the filesystem.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Root directory path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Mount point for `name`.
    #[must_use]
    pub fn path_for(&self, name: &VolumeName) -> Utf8PathBuf {
        self.path.join(name.as_str())
    }

    /// Creates the root directory and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Directory`] when the directory cannot be created.
    pub fn ensure_exists(&self) -> Result<(), HostError> {
        Dir::create_ambient_dir_all(&self.path, ambient_authority())
            .map_err(|err| directory_error(&self.path, &err))
    }

    /// Creates the empty mount directory for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Directory`] when the directory cannot be created,
    /// including when it already exists.
    pub fn create(&self, name: &VolumeName) -> Result<Utf8PathBuf, HostError> {
        let path = self.path_for(name);
        self.open()?
            .create_dir(name.as_str())
            .map_err(|err| directory_error(&path, &err))?;
        debug!(%path, "mount directory created");
        Ok(path)
    }

    /// Creates the mount directory for `name` unless it is already present.
    ///
    /// Used at mount time on hosts that did not create the volume.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Directory`] when the directory cannot be created.
    pub fn ensure_dir(&self, name: &VolumeName) -> Result<(), HostError> {
        let path = self.path_for(name);
        match self.open()?.create_dir(name.as_str()) {
            Ok(()) => {
                debug!(%path, "mount directory created on first mount");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(directory_error(&path, &err)),
        }
    }

    /// Removes the mount directory for `name`; an absent directory is fine.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Directory`] for any failure other than the
    /// directory being absent.
    pub fn remove(&self, name: &VolumeName) -> Result<(), HostError> {
        let path = self.path_for(name);
        match self.open()?.remove_dir(name.as_str()) {
            Ok(()) => {
                debug!(%path, "mount directory removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(%path, "mount directory already absent");
                Ok(())
            }
            Err(err) => Err(directory_error(&path, &err)),
        }
    }

    fn open(&self) -> Result<Dir, HostError> {
        Dir::open_ambient_dir(&self.path, ambient_authority())
            .map_err(|err| directory_error(&self.path, &err))
    }
}

fn directory_error(path: &Utf8Path, err: &io::Error) -> HostError {
    HostError::Directory {
        path: path.to_string(),
        message: err.to_string(),
    }
}
