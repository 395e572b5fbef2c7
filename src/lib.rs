//! Docker volume plugin backed by OpenStack block storage.
//!
//! Volumes live in Cinder and are attached to the local instance through
//! Nova. The [`VolumeDriver`] serialises mutating requests, reconciles
//! attachments, waits for the block device, formats blank volumes, and
//! mounts them under a per-volume directory. The [`plugin`] module exposes
//! the driver over the Docker plugin protocol.

pub mod attachment;
pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod directory;
pub mod driver;
pub mod filesystem;
pub mod host;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod mount;
pub mod openstack;
pub mod plugin;
pub mod poll;
pub mod test_support;
pub mod volume;

pub use attachment::{AttachmentOrchestrator, ReconcilePolicy};
pub use backend::{BackendFuture, BlockStorage, Compute};
pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner, SpawnError};
pub use config::{ConfigError, DriverConfig, OpenStackConfig};
pub use directory::VolumeDirectory;
pub use driver::{Capabilities, DriverError, DriverSettings, Scope, VolumeDriver, VolumeInfo};
pub use host::{CommandHost, HostError, HostOps};
pub use identity::{FileIdentity, IdentityError, IdentitySource};
pub use ids::{AttachmentId, InstanceId, VolumeId};
pub use mount::{MountManager, MountRoot, UnmountOutcome};
pub use openstack::{OpenStackBackend, OpenStackError, Session};
pub use plugin::VolumePlugin;
pub use poll::{PollOutcome, PollPolicy};
pub use volume::{Attachment, CreateOptions, Volume, VolumeName, VolumeRequest, VolumeStatus};
