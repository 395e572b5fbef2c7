//! Host primitives for block devices: existence, signature probe, format,
//! mount, and unmount.

use std::ffi::OsString;

use camino::Utf8Path;
use thiserror::Error;

use crate::command::{CommandOutput, CommandRunner, ProcessCommandRunner, SpawnError};

/// `blkid` exit status meaning no recognised signature was found.
const BLKID_NOTHING_FOUND: i32 = 2;

/// Errors raised by host-level utilities.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when the utility could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// Raised when the utility exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when an unmount targets a path that is not mounted.
    #[error("{path} is not mounted")]
    NotMounted {
        /// Path passed to the unmount call.
        path: String,
    },
    /// Raised when a mount directory cannot be created or removed.
    #[error("directory operation on {path} failed: {message}")]
    Directory {
        /// Directory being manipulated.
        path: String,
        /// Error reported by the filesystem.
        message: String,
    },
    /// Raised when a blocking host task panicked or was cancelled.
    #[error("host task did not complete: {message}")]
    Interrupted {
        /// Join error reported by the runtime.
        message: String,
    },
}

/// Synchronous host operations the driver relies on.
pub trait HostOps: Send + Sync {
    /// Returns `true` when the device node exists.
    fn device_exists(&self, device: &Utf8Path) -> bool;

    /// Returns the filesystem type found on `device`, or `None` when the
    /// device carries no recognised signature.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the probe itself fails.
    fn filesystem_type(&self, device: &Utf8Path) -> Result<Option<String>, HostError>;

    /// Creates a filesystem of `fs_type` on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when formatting fails.
    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<(), HostError>;

    /// Mounts `device` at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the mount fails.
    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), HostError>;

    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotMounted`] when nothing is mounted at `target`
    /// and another [`HostError`] for any other failure.
    fn unmount(&self, target: &Utf8Path) -> Result<(), HostError>;
}

/// [`HostOps`] backed by `blkid`, `mkfs`, `mount`, and `umount`.
#[derive(Clone, Debug, Default)]
pub struct CommandHost<R: CommandRunner> {
    runner: R,
}

impl CommandHost<ProcessCommandRunner> {
    /// Creates a host wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner() -> Self {
        Self::new(ProcessCommandRunner)
    }
}

impl<R: CommandRunner> CommandHost<R> {
    /// Creates a host that executes utilities through `runner`.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, HostError> {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        Ok(self.runner.run(program, &os_args)?)
    }

    fn check(program: &str, output: CommandOutput) -> Result<CommandOutput, HostError> {
        if output.is_success() {
            return Ok(output);
        }
        Err(HostError::CommandFailure {
            program: program.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

impl<R: CommandRunner> HostOps for CommandHost<R> {
    fn device_exists(&self, device: &Utf8Path) -> bool {
        device.exists()
    }

    fn filesystem_type(&self, device: &Utf8Path) -> Result<Option<String>, HostError> {
        let output = self.run("blkid", &["-p", "-s", "TYPE", "-o", "value", device.as_str()])?;
        if output.code == Some(BLKID_NOTHING_FOUND) {
            return Ok(None);
        }
        let probed = Self::check("blkid", output)?;
        let fs_type = probed.stdout.trim();
        Ok((!fs_type.is_empty()).then(|| fs_type.to_owned()))
    }

    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<(), HostError> {
        let output = self.run("mkfs", &["-t", fs_type, device.as_str()])?;
        Self::check("mkfs", output).map(drop)
    }

    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), HostError> {
        let output = self.run("mount", &[device.as_str(), target.as_str()])?;
        Self::check("mount", output).map(drop)
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), HostError> {
        let output = self.run("umount", &[target.as_str()])?;
        if !output.is_success() && output.stderr.contains("not mounted") {
            return Err(HostError::NotMounted {
                path: target.to_string(),
            });
        }
        Self::check("umount", output).map(drop)
    }
}
