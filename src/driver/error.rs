//! Error types for the driver facade.

use thiserror::Error;

use crate::host::HostError;
use crate::identity::IdentityError;
use crate::ids::{InstanceId, VolumeId};
use crate::volume::{VolumeNameError, VolumeStatus};

/// Errors raised by driver operations.
///
/// `BackendError` is the error type of the cloud backend; provider failures
/// are carried verbatim in [`DriverError::Provider`].
#[derive(Debug, Error)]
pub enum DriverError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Raised when the volume name cannot be used as a mount directory.
    #[error(transparent)]
    InvalidName(#[from] VolumeNameError),
    /// Raised when no volume carries the requested name.
    #[error("volume '{name}' not found")]
    NotFound {
        /// Requested volume name.
        name: String,
    },
    /// Raised when the local instance holds no attachment for the volume.
    #[error("no attachment of volume {volume_id} found on instance {instance_id}")]
    AttachmentNotFound {
        /// Volume being detached.
        volume_id: VolumeId,
        /// Instance whose attachments were listed.
        instance_id: InstanceId,
    },
    /// Raised when several volumes share the requested name.
    #[error("{count} volumes share the name '{name}'")]
    AmbiguousName {
        /// Requested volume name.
        name: String,
        /// Number of matching volumes.
        count: usize,
    },
    /// Raised when an instance holds several attachments of one volume.
    #[error("volume {volume_id} has {count} attachments on instance {instance_id}")]
    AmbiguousAttachment {
        /// Volume being detached.
        volume_id: VolumeId,
        /// Instance whose attachments were listed.
        instance_id: InstanceId,
        /// Number of matching attachments.
        count: usize,
    },
    /// Raised when creating a volume whose name is already taken.
    #[error("volume '{name}' already exists with id {id}")]
    AlreadyExists {
        /// Requested volume name.
        name: String,
        /// Identifier of the existing volume.
        id: VolumeId,
    },
    /// Raised when the volume status forbids the requested operation.
    #[error("volume {volume_id} is {status} but must be {required}")]
    InvalidState {
        /// Volume being operated on.
        volume_id: VolumeId,
        /// Status observed last.
        status: VolumeStatus,
        /// Condition the operation requires.
        required: String,
    },
    /// Raised when a bounded poll runs out of attempts.
    #[error("timed out waiting for {action} on {target} after {attempts} attempts")]
    Timeout {
        /// Condition being waited on.
        action: &'static str,
        /// Device or volume being watched.
        target: String,
        /// Number of probes performed.
        attempts: u32,
    },
    /// Raised when the local instance identity cannot be resolved.
    #[error("instance identity unavailable: {0}")]
    Identity(#[from] IdentityError),
    /// Raised when a cloud call fails.
    #[error("cloud service error: {0}")]
    Provider(#[source] BackendError),
    /// Raised when a host-level operation fails.
    #[error("local I/O error: {0}")]
    LocalIo(#[from] HostError),
}
