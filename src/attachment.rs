//! Attach and detach orchestration, including pre-attach status
//! reconciliation.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::Compute;
use crate::driver::DriverError;
use crate::ids::{AttachmentId, InstanceId, VolumeId};
use crate::poll::{PollOutcome, PollPolicy, poll_until};
use crate::volume::{Attachment, Volume, VolumeStatus};

const CREATING_GRACE: Duration = Duration::from_secs(5);
const DETACH_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DETACH_POLL_ATTEMPTS: u32 = 300;

/// Timing and mode settings for pre-attach reconciliation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReconcilePolicy {
    /// Single wait applied when the volume is still `creating`.
    pub creating_grace: Duration,
    /// Whether a volume `in-use` elsewhere may be detached from its owner.
    pub migration_mode: bool,
    /// Poll used while waiting for a migrated volume to become `available`.
    pub detach_poll: PollPolicy,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            creating_grace: CREATING_GRACE,
            migration_mode: false,
            detach_poll: PollPolicy::new(DETACH_POLL_INTERVAL, DETACH_POLL_ATTEMPTS),
        }
    }
}

/// Attaches volumes to, and detaches them from, compute instances.
#[derive(Debug)]
pub struct AttachmentOrchestrator<'a, C> {
    cloud: &'a C,
    policy: ReconcilePolicy,
}

impl<'a, C: Compute> AttachmentOrchestrator<'a, C> {
    /// Creates an orchestrator over `cloud`.
    #[must_use]
    pub const fn new(cloud: &'a C, policy: ReconcilePolicy) -> Self {
        Self { cloud, policy }
    }

    /// Reconciles the volume status and attaches it to `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidState`] when the volume cannot be made
    /// `available` or the provider records the attachment on another
    /// instance, and [`DriverError::Provider`] when a cloud call fails.
    pub async fn attach(
        &self,
        volume: &Volume,
        instance_id: &InstanceId,
    ) -> Result<Attachment, DriverError<C::Error>> {
        let current = self.reconcile(volume).await?;

        debug!(volume_id = %current.id, instance_id = %instance_id, "attaching volume");
        let attachment = self
            .cloud
            .attach_volume(instance_id, &current.id)
            .await
            .map_err(DriverError::Provider)?;

        if attachment.server_id != *instance_id {
            return Err(DriverError::InvalidState {
                volume_id: current.id,
                status: VolumeStatus::InUse,
                required: format!("attached to instance {instance_id}"),
            });
        }

        info!(
            volume_id = %attachment.volume_id,
            attachment_id = %attachment.id,
            device = ?attachment.device,
            "volume attached"
        );
        Ok(attachment)
    }

    /// Brings the volume to `available`, or fails without attaching.
    ///
    /// The status is re-read first since the caller's snapshot may be stale.
    /// A `creating` volume gets one grace wait. An `in-use` volume is detached
    /// from its recorded owner only in migration mode.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidState`] when the volume is not
    /// `available` after reconciliation.
    pub async fn reconcile(&self, volume: &Volume) -> Result<Volume, DriverError<C::Error>> {
        let mut current = self.refresh(&volume.id).await?;

        if current.status == VolumeStatus::Creating {
            debug!(volume_id = %current.id, grace = ?self.policy.creating_grace,
                "volume still creating; waiting once");
            sleep(self.policy.creating_grace).await;
            current = self.refresh(&volume.id).await?;
        }

        if current.status == VolumeStatus::InUse && self.policy.migration_mode {
            current = self.migrate(current).await?;
        }

        if current.status != VolumeStatus::Available {
            warn!(volume_id = %current.id, status = %current.status,
                "refusing to attach volume that is not available");
            return Err(DriverError::InvalidState {
                volume_id: current.id,
                status: current.status,
                required: String::from("available"),
            });
        }

        Ok(current)
    }

    /// Detaches `volume_id` from `instance_id` using the discovered
    /// attachment id.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AttachmentNotFound`] or
    /// [`DriverError::AmbiguousAttachment`] when discovery does not find
    /// exactly one attachment, and [`DriverError::Provider`] when a cloud call
    /// fails.
    pub async fn detach(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
    ) -> Result<AttachmentId, DriverError<C::Error>> {
        let attachment_id = self.find_attachment(volume_id, instance_id).await?;
        debug!(%volume_id, %instance_id, %attachment_id, "detaching volume");
        self.cloud
            .detach_volume(instance_id, &attachment_id)
            .await
            .map_err(DriverError::Provider)?;
        info!(%volume_id, %instance_id, "volume detached");
        Ok(attachment_id)
    }

    async fn find_attachment(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
    ) -> Result<AttachmentId, DriverError<C::Error>> {
        let mut matches: Vec<AttachmentId> = self
            .cloud
            .list_attachments(instance_id)
            .await
            .map_err(DriverError::Provider)?
            .into_iter()
            .filter(|attachment| attachment.volume_id == *volume_id)
            .map(|attachment| attachment.id)
            .collect();

        if matches.len() > 1 {
            return Err(DriverError::AmbiguousAttachment {
                volume_id: volume_id.clone(),
                instance_id: instance_id.clone(),
                count: matches.len(),
            });
        }
        matches.pop().ok_or_else(|| DriverError::AttachmentNotFound {
            volume_id: volume_id.clone(),
            instance_id: instance_id.clone(),
        })
    }

    async fn migrate(&self, volume: Volume) -> Result<Volume, DriverError<C::Error>> {
        let Some(owner) = volume
            .attachments
            .first()
            .map(|attachment| attachment.server_id.clone())
        else {
            return Err(DriverError::InvalidState {
                volume_id: volume.id,
                status: volume.status,
                required: String::from("available"),
            });
        };

        warn!(volume_id = %volume.id, owner = %owner,
            "volume in use elsewhere; detaching from previous owner");
        self.detach(&volume.id, &owner).await?;

        let last_seen = Mutex::new(volume.status.clone());
        let this = self;
        let volume_id = &volume.id;
        let seen = &last_seen;
        let outcome = poll_until(self.policy.detach_poll, move || async move {
            let refreshed = this.refresh(volume_id).await?;
            if refreshed.status == VolumeStatus::Available {
                return Ok(Some(refreshed));
            }
            if let Ok(mut slot) = seen.lock() {
                *slot = refreshed.status;
            }
            Ok::<_, DriverError<C::Error>>(None)
        })
        .await?;

        match outcome {
            PollOutcome::Ready(available) => {
                debug!(volume_id = %available.id, "volume detached from previous owner");
                Ok(available)
            }
            PollOutcome::Exhausted { attempts } => {
                let status = last_seen
                    .into_inner()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                warn!(volume_id = %volume.id, attempts, status = %status,
                    "volume did not become available after detach");
                Err(DriverError::InvalidState {
                    volume_id: volume.id,
                    status,
                    required: String::from("available"),
                })
            }
        }
    }

    async fn refresh(&self, id: &VolumeId) -> Result<Volume, DriverError<C::Error>> {
        self.cloud
            .get_volume(id)
            .await
            .map_err(DriverError::Provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCloud, volume_fixture};

    const FAST: Duration = Duration::from_millis(1);

    fn policy(migration_mode: bool) -> ReconcilePolicy {
        ReconcilePolicy {
            creating_grace: FAST,
            migration_mode,
            detach_poll: PollPolicy::new(FAST, 5),
        }
    }

    fn local() -> InstanceId {
        InstanceId::from("local-instance")
    }

    #[tokio::test]
    async fn attach_available_volume() {
        let cloud = FakeCloud::new();
        let volume = volume_fixture("vol-1", "db1", VolumeStatus::Available);
        cloud.insert_volume(volume.clone());

        let attachment = AttachmentOrchestrator::new(&cloud, policy(false))
            .attach(&volume, &local())
            .await
            .expect("attach should succeed");

        assert_eq!(attachment.server_id, local());
        assert_eq!(cloud.attach_calls(), 1);
    }

    #[tokio::test]
    async fn creating_volume_gets_one_grace_wait() {
        let cloud = FakeCloud::new();
        let volume = volume_fixture("vol-1", "db1", VolumeStatus::Creating);
        cloud.insert_volume(volume.clone());
        cloud.script_statuses("vol-1", [VolumeStatus::Creating, VolumeStatus::Available]);

        AttachmentOrchestrator::new(&cloud, policy(false))
            .attach(&volume, &local())
            .await
            .expect("attach should succeed after grace");
        assert_eq!(cloud.get_calls(), 2);
    }

    #[tokio::test]
    async fn creating_volume_is_not_retried_beyond_grace() {
        let cloud = FakeCloud::new();
        let volume = volume_fixture("vol-1", "db1", VolumeStatus::Creating);
        cloud.insert_volume(volume.clone());

        let err = AttachmentOrchestrator::new(&cloud, policy(false))
            .attach(&volume, &local())
            .await
            .expect_err("still creating");
        assert!(matches!(
            err,
            DriverError::InvalidState {
                status: VolumeStatus::Creating,
                ..
            }
        ));
        assert_eq!(cloud.get_calls(), 2);
        assert_eq!(cloud.attach_calls(), 0);
    }

    #[tokio::test]
    async fn in_use_without_migration_fails_closed() {
        let cloud = FakeCloud::new();
        let volume = cloud.insert_attached_volume("vol-1", "db1", "other-host");

        let err = AttachmentOrchestrator::new(&cloud, policy(false))
            .attach(&volume, &local())
            .await
            .expect_err("in use elsewhere");
        assert!(matches!(err, DriverError::InvalidState { .. }));
        assert_eq!(cloud.detach_calls(), 0);
        assert_eq!(cloud.attach_calls(), 0);
    }

    #[tokio::test]
    async fn migration_detaches_previous_owner_then_attaches() {
        let cloud = FakeCloud::new();
        let volume = cloud.insert_attached_volume("vol-1", "db1", "other-host");
        cloud.script_statuses(
            "vol-1",
            [VolumeStatus::InUse, VolumeStatus::Other(String::from("detaching"))],
        );

        let attachment = AttachmentOrchestrator::new(&cloud, policy(true))
            .attach(&volume, &local())
            .await
            .expect("migration should succeed");

        assert_eq!(attachment.server_id, local());
        let trace = cloud.trace();
        let detach = trace
            .iter()
            .position(|entry| entry == "detach vol-1 from other-host")
            .expect("detach recorded");
        let attach = trace
            .iter()
            .position(|entry| entry == "attach vol-1 to local-instance")
            .expect("attach recorded");
        assert!(detach < attach);
    }

    #[tokio::test]
    async fn migration_gives_up_after_poll_budget() {
        let cloud = FakeCloud::new();
        let volume = cloud.insert_attached_volume("vol-1", "db1", "other-host");
        cloud.hold_status_after_detach("vol-1", VolumeStatus::Other(String::from("detaching")));

        let err = AttachmentOrchestrator::new(&cloud, policy(true))
            .attach(&volume, &local())
            .await
            .expect_err("volume never frees up");

        assert!(matches!(
            err,
            DriverError::InvalidState { ref status, .. }
                if status.as_str() == "detaching"
        ));
        // one reconcile read plus five poll probes
        assert_eq!(cloud.get_calls(), 6);
        assert_eq!(cloud.attach_calls(), 0);
    }

    #[tokio::test]
    async fn detach_requires_matching_attachment() {
        let cloud = FakeCloud::new();
        cloud.insert_volume(volume_fixture("vol-1", "db1", VolumeStatus::Available));

        let err = AttachmentOrchestrator::new(&cloud, policy(false))
            .detach(&VolumeId::from("vol-1"), &local())
            .await
            .expect_err("nothing attached");
        assert!(matches!(err, DriverError::AttachmentNotFound { .. }));
        assert_eq!(cloud.detach_calls(), 0);
    }

    #[tokio::test]
    async fn detach_rejects_duplicate_attachments() {
        let cloud = FakeCloud::new();
        cloud.insert_attached_volume("vol-1", "db1", "local-instance");
        cloud.duplicate_attachment("vol-1", "local-instance");

        let err = AttachmentOrchestrator::new(&cloud, policy(false))
            .detach(&VolumeId::from("vol-1"), &local())
            .await
            .expect_err("ambiguous attachments");
        assert!(matches!(
            err,
            DriverError::AmbiguousAttachment { count: 2, .. }
        ));
    }
}
