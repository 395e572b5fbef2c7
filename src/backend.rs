//! Backend abstraction over the cloud block-storage and compute services.

use std::future::Future;
use std::pin::Pin;

use crate::ids::{AttachmentId, InstanceId, VolumeId};
use crate::volume::{Attachment, Volume, VolumeRequest};

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Volume inventory operations offered by the block-storage service.
pub trait BlockStorage: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists volumes visible to the current credentials.
    ///
    /// When `name` is set the provider may pre-filter by it; callers still
    /// compare names exactly.
    fn list_volumes<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> BackendFuture<'a, Vec<Volume>, Self::Error>;

    /// Reads the current state of a single volume.
    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, Volume, Self::Error>;

    /// Creates a volume and returns its initial snapshot.
    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume, Self::Error>;

    /// Deletes a volume. The call is irreversible.
    fn delete_volume<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, (), Self::Error>;
}

/// Attachment operations offered by the compute service.
pub trait Compute: BlockStorage {
    /// Lists the volume attachments of an instance.
    fn list_attachments<'a>(
        &'a self,
        instance_id: &'a InstanceId,
    ) -> BackendFuture<'a, Vec<Attachment>, Self::Error>;

    /// Attaches a volume to an instance, letting the provider pick the device.
    fn attach_volume<'a>(
        &'a self,
        instance_id: &'a InstanceId,
        volume_id: &'a VolumeId,
    ) -> BackendFuture<'a, Attachment, Self::Error>;

    /// Deletes an attachment from an instance.
    fn detach_volume<'a>(
        &'a self,
        instance_id: &'a InstanceId,
        attachment_id: &'a AttachmentId,
    ) -> BackendFuture<'a, (), Self::Error>;
}
