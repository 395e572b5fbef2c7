//! Local device node naming and readiness polling.

use std::convert::Infallible;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::host::HostOps;
use crate::ids::VolumeId;
use crate::poll::{PollOutcome, PollPolicy, poll_until};

/// Stable by-id prefix under which virtio disks appear.
const DISK_BY_ID_PREFIX: &str = "/dev/disk/by-id/virtio-";
/// The virtio serial carries at most this many characters of the volume id.
const VIRTIO_SERIAL_LEN: usize = 20;
const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Device wait probing once per second for `timeout_secs` seconds.
#[must_use]
pub const fn default_device_wait(timeout_secs: u32) -> PollPolicy {
    PollPolicy::new(DEVICE_POLL_INTERVAL, timeout_secs)
}

/// Returns the stable device path for an attached volume.
///
/// The kernel device name (`/dev/vdX`) depends on attach order, so the path
/// is derived from the volume id instead.
#[must_use]
pub fn device_path(volume_id: &VolumeId) -> Utf8PathBuf {
    let serial: String = volume_id.chars().take(VIRTIO_SERIAL_LEN).collect();
    Utf8PathBuf::from(format!("{DISK_BY_ID_PREFIX}{serial}"))
}

/// Raised when the device node does not appear within the poll budget.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceTimeout {
    /// Number of existence probes performed.
    pub attempts: u32,
}

/// Polls until `device` exists or the budget runs out.
///
/// # Errors
///
/// Returns [`DeviceTimeout`] after exactly `policy.max_attempts` failed
/// probes.
pub async fn wait_for_device<H: HostOps>(
    host: &H,
    device: &Utf8Path,
    policy: PollPolicy,
) -> Result<(), DeviceTimeout> {
    debug!(%device, attempts = policy.max_attempts, "waiting for device node");
    let outcome = poll_until(policy, move || async move {
        Ok::<_, Infallible>(host.device_exists(device).then_some(()))
    })
    .await;

    match outcome {
        Ok(PollOutcome::Ready(())) => Ok(()),
        Ok(PollOutcome::Exhausted { attempts }) => Err(DeviceTimeout { attempts }),
        Err(never) => match never {},
    }
}
