//! Volume driver facade.
//!
//! [`VolumeDriver`] is what the plugin endpoint calls. It validates names,
//! serialises every mutating operation through one async lock, and sequences
//! the directory, attachment, device, filesystem and mount steps. The lock is
//! held across remote calls and polling sleeps so that concurrent runtime
//! requests never interleave cloud-side changes. Formatting, mounting and
//! unmounting run on the blocking pool so lookups stay responsive while
//! `mkfs` holds the lock.

mod error;

use std::sync::Arc;

use camino::Utf8PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use error::DriverError;

use crate::attachment::{AttachmentOrchestrator, ReconcilePolicy};
use crate::backend::Compute;
use crate::device::{self, default_device_wait, wait_for_device};
use crate::directory::VolumeDirectory;
use crate::filesystem::{FormatOutcome, ensure_formatted};
use crate::host::{HostError, HostOps};
use crate::identity::IdentitySource;
use crate::ids::InstanceId;
use crate::mount::{MountManager, MountRoot, UnmountOutcome};
use crate::poll::PollPolicy;
use crate::volume::{CreateOptions, VolumeName};

/// Filesystem created on blank devices unless configured otherwise.
pub const DEFAULT_FS_TYPE: &str = "ext4";
/// Default device wait in seconds.
pub const DEFAULT_DEVICE_WAIT_SECS: u32 = 60;

/// Immutable settings resolved once at start-up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DriverSettings {
    /// Filesystem type used when formatting blank devices.
    pub fs_type: String,
    /// Directory holding one mount point per volume.
    pub mount_root: MountRoot,
    /// Pre-attach reconciliation timings and migration toggle.
    pub reconcile: ReconcilePolicy,
    /// Poll used while waiting for the device node.
    pub device_wait: PollPolicy,
}

impl DriverSettings {
    /// Settings with default timings and filesystem under `mount_root`.
    #[must_use]
    pub fn new(mount_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            fs_type: String::from(DEFAULT_FS_TYPE),
            mount_root: MountRoot::new(mount_root),
            reconcile: ReconcilePolicy::default(),
            device_wait: default_device_wait(DEFAULT_DEVICE_WAIT_SECS),
        }
    }
}

/// Volume as reported to the container runtime.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Mount point, when the operation reports one.
    pub mountpoint: Option<Utf8PathBuf>,
}

/// Visibility of volumes across hosts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Volumes are visible from every host.
    Global,
}

impl Scope {
    /// Protocol spelling of the scope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
        }
    }
}

/// Capabilities advertised to the container runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    /// Volume visibility.
    pub scope: Scope,
}

/// Driver composed of a cloud backend, host primitives, and an identity
/// source.
#[derive(Debug)]
pub struct VolumeDriver<C, H, I> {
    cloud: C,
    host: Arc<H>,
    identity: I,
    settings: DriverSettings,
    lock: Mutex<()>,
}

impl<C, H, I> VolumeDriver<C, H, I>
where
    C: Compute,
    H: HostOps + 'static,
    I: IdentitySource,
{
    /// Builds a driver from its collaborators.
    #[must_use]
    pub fn new(cloud: C, host: H, identity: I, settings: DriverSettings) -> Self {
        Self {
            cloud,
            host: Arc::new(host),
            identity,
            settings,
            lock: Mutex::new(()),
        }
    }

    /// Settings the driver was built with.
    #[must_use]
    pub const fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Cloud backend the driver talks to.
    #[must_use]
    pub const fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Host primitives the driver runs.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Creates a cloud volume and its empty mount directory.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidName`] for unusable names,
    /// [`DriverError::AlreadyExists`] when the name is taken,
    /// [`DriverError::Provider`] for cloud failures, and
    /// [`DriverError::LocalIo`] when the directory cannot be created.
    pub async fn create(
        &self,
        name: &str,
        options: CreateOptions,
    ) -> Result<VolumeInfo, DriverError<C::Error>> {
        let _guard = self.lock.lock().await;
        let name = VolumeName::parse(name)?;
        info!(volume = %name, "create requested");

        let volume = self.directory().create(&name, options).await?;
        let path = self.settings.mount_root.create(&name)?;
        info!(volume = %name, id = %volume.id, %path, "volume ready");
        Ok(VolumeInfo {
            name: volume.name,
            mountpoint: Some(path),
        })
    }

    /// Looks up a single volume by name.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] or [`DriverError::AmbiguousName`]
    /// when the name does not resolve to exactly one volume.
    pub async fn get(&self, name: &str) -> Result<VolumeInfo, DriverError<C::Error>> {
        let name = VolumeName::parse(name)?;
        let volume = self.directory().find(&name).await?;
        debug!(volume = %name, id = %volume.id, status = %volume.status, "volume found");
        Ok(VolumeInfo {
            mountpoint: Some(self.settings.mount_root.path_for(&name)),
            name: volume.name,
        })
    }

    /// Lists every visible volume by name.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Provider`] when listing fails.
    pub async fn list(&self) -> Result<Vec<VolumeInfo>, DriverError<C::Error>> {
        let volumes = self.directory().list().await?;
        debug!(count = volumes.len(), "volumes listed");
        Ok(volumes
            .into_iter()
            .map(|volume| VolumeInfo {
                name: volume.name,
                mountpoint: None,
            })
            .collect())
    }

    /// Deletes the cloud volume and removes its mount directory.
    ///
    /// # Errors
    ///
    /// Returns lookup errors, [`DriverError::Provider`] when deletion fails,
    /// and [`DriverError::LocalIo`] when the directory cannot be removed.
    pub async fn remove(&self, name: &str) -> Result<(), DriverError<C::Error>> {
        let _guard = self.lock.lock().await;
        let name = VolumeName::parse(name)?;
        info!(volume = %name, "remove requested");

        let directory = self.directory();
        let volume = directory.find(&name).await?;
        directory.remove(&volume).await?;
        self.settings.mount_root.remove(&name)?;
        Ok(())
    }

    /// Returns the mount path of `name` without contacting the cloud.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidName`] for unusable names.
    pub fn path(&self, name: &str) -> Result<Utf8PathBuf, DriverError<C::Error>> {
        let name = VolumeName::parse(name)?;
        Ok(self.settings.mount_root.path_for(&name))
    }

    /// Attaches the volume to this instance, prepares its filesystem and
    /// mounts it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Identity`] when the local identity is
    /// unreadable, lookup and reconciliation errors,
    /// [`DriverError::Timeout`] when the device never appears, and
    /// [`DriverError::LocalIo`] when formatting or mounting fails.
    pub async fn mount(&self, name: &str) -> Result<Utf8PathBuf, DriverError<C::Error>> {
        let _guard = self.lock.lock().await;
        let name = VolumeName::parse(name)?;
        let instance_id = self.instance_id()?;
        info!(volume = %name, %instance_id, "mount requested");

        let volume = self.directory().find(&name).await?;
        let attachment = self.orchestrator().attach(&volume, &instance_id).await?;

        let device = device::device_path(&attachment.volume_id);
        wait_for_device(self.host.as_ref(), &device, self.settings.device_wait)
            .await
            .map_err(|timeout| DriverError::Timeout {
                action: "device",
                target: device.to_string(),
                attempts: timeout.attempts,
            })?;

        let (node, fs_type) = (device.clone(), self.settings.fs_type.clone());
        let outcome = self
            .on_host(move |host| ensure_formatted(host, &node, &fs_type))
            .await?;
        if outcome == FormatOutcome::Formatted {
            info!(volume = %name, %device, fs_type = %self.settings.fs_type, "device formatted");
        }

        let path = self.settings.mount_root.path_for(&name);
        self.settings.mount_root.ensure_dir(&name)?;
        let target = path.clone();
        self.on_host(move |host| MountManager::new(host).mount(&device, &target))
            .await?;
        Ok(path)
    }

    /// Unmounts the volume and detaches it from this instance.
    ///
    /// Detach is attempted even when nothing was mounted.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Identity`] when the local identity is
    /// unreadable, lookup errors, [`DriverError::LocalIo`] when unmounting
    /// fails, and attachment discovery or provider errors from detach.
    pub async fn unmount(&self, name: &str) -> Result<(), DriverError<C::Error>> {
        let _guard = self.lock.lock().await;
        let name = VolumeName::parse(name)?;
        let instance_id = self.instance_id()?;
        info!(volume = %name, %instance_id, "unmount requested");

        let volume = self.directory().find(&name).await?;
        let path = self.settings.mount_root.path_for(&name);
        let outcome = self
            .on_host(move |host| MountManager::new(host).unmount(&path))
            .await?;
        if outcome == UnmountOutcome::NotMounted {
            warn!(volume = %name, "volume was not mounted; detaching anyway");
        }

        self.orchestrator().detach(&volume.id, &instance_id).await?;
        Ok(())
    }

    /// Capabilities advertised to the runtime.
    #[must_use]
    #[expect(clippy::unused_self, reason = "capabilities are part of the driver surface")]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }

    async fn on_host<T, F>(&self, task: F) -> Result<T, HostError>
    where
        T: Send + 'static,
        F: FnOnce(&H) -> Result<T, HostError> + Send + 'static,
    {
        let host = Arc::clone(&self.host);
        tokio::task::spawn_blocking(move || task(host.as_ref()))
            .await
            .map_err(|err| HostError::Interrupted {
                message: err.to_string(),
            })?
    }

    fn instance_id(&self) -> Result<InstanceId, DriverError<C::Error>> {
        Ok(self.identity.instance_id()?)
    }

    const fn directory(&self) -> VolumeDirectory<'_, C> {
        VolumeDirectory::new(&self.cloud)
    }

    const fn orchestrator(&self) -> AttachmentOrchestrator<'_, C> {
        AttachmentOrchestrator::new(&self.cloud, self.settings.reconcile)
    }
}
