//! Name-based volume lookup with one-volume-per-name enforcement.
//!
//! The block-storage service does not require unique names, so the directory
//! resolves names itself: every lookup lists the inventory and insists on
//! exactly one exact match.

use tracing::{debug, info};

use crate::backend::BlockStorage;
use crate::driver::DriverError;
use crate::volume::{CreateOptions, Volume, VolumeName, VolumeRequest};

/// Resolves volume names against the cloud inventory.
#[derive(Debug)]
pub struct VolumeDirectory<'a, C> {
    cloud: &'a C,
}

impl<'a, C: BlockStorage> VolumeDirectory<'a, C> {
    /// Creates a directory over `cloud`.
    #[must_use]
    pub const fn new(cloud: &'a C) -> Self {
        Self { cloud }
    }

    /// Finds the single volume named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when no volume matches,
    /// [`DriverError::AmbiguousName`] when several do, and
    /// [`DriverError::Provider`] when listing fails.
    pub async fn find(&self, name: &VolumeName) -> Result<Volume, DriverError<C::Error>> {
        debug!(volume = %name, "searching for volume");
        let volumes = self
            .cloud
            .list_volumes(Some(name.as_str()))
            .await
            .map_err(DriverError::Provider)?;
        select_by_name(volumes, name)
    }

    /// Lists every volume visible to the current credentials.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Provider`] when listing fails.
    pub async fn list(&self) -> Result<Vec<Volume>, DriverError<C::Error>> {
        self.cloud
            .list_volumes(None)
            .await
            .map_err(DriverError::Provider)
    }

    /// Creates a volume named `name` after checking the name is unused.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyExists`] when the name is taken,
    /// [`DriverError::AmbiguousName`] when it is already duplicated, and
    /// [`DriverError::Provider`] when a cloud call fails.
    pub async fn create(
        &self,
        name: &VolumeName,
        options: CreateOptions,
    ) -> Result<Volume, DriverError<C::Error>> {
        match self.find(name).await {
            Ok(existing) => {
                return Err(DriverError::AlreadyExists {
                    name: existing.name,
                    id: existing.id,
                });
            }
            Err(DriverError::NotFound { .. }) => {}
            Err(other) => return Err(other),
        }

        let request = VolumeRequest::new(name, options);
        debug!(volume = %name, size_gb = ?request.options.size_gb,
            volume_type = ?request.options.volume_type, "creating volume");
        let volume = self
            .cloud
            .create_volume(&request)
            .await
            .map_err(DriverError::Provider)?;
        info!(volume = %name, id = %volume.id, "volume created");
        Ok(volume)
    }

    /// Deletes `volume` from the block-storage service.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Provider`] with the provider's error verbatim.
    pub async fn remove(&self, volume: &Volume) -> Result<(), DriverError<C::Error>> {
        self.cloud
            .delete_volume(&volume.id)
            .await
            .map_err(DriverError::Provider)?;
        info!(volume = %volume.name, id = %volume.id, "volume deleted");
        Ok(())
    }
}

fn select_by_name<E>(volumes: Vec<Volume>, name: &VolumeName) -> Result<Volume, DriverError<E>>
where
    E: std::error::Error + 'static,
{
    let mut matches: Vec<Volume> = volumes
        .into_iter()
        .filter(|volume| volume.name == name.as_str())
        .collect();
    match matches.len() {
        0 => Err(DriverError::NotFound {
            name: name.to_string(),
        }),
        1 => matches.pop().ok_or_else(|| DriverError::NotFound {
            name: name.to_string(),
        }),
        count => Err(DriverError::AmbiguousName {
            name: name.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCloud, FakeCloudError, volume_fixture};
    use crate::volume::VolumeStatus;

    type Error = DriverError<FakeCloudError>;

    fn name(value: &str) -> VolumeName {
        VolumeName::parse(value).expect("valid name")
    }

    #[test]
    fn select_by_name_requires_exact_match() {
        let volumes = vec![
            volume_fixture("vol-1", "db10", VolumeStatus::Available),
            volume_fixture("vol-2", "db1", VolumeStatus::Available),
        ];
        let found: Result<Volume, Error> = select_by_name(volumes, &name("db1"));
        assert_eq!(found.expect("match").id.as_str(), "vol-2");
    }

    #[test]
    fn select_by_name_rejects_duplicates() {
        let volumes = vec![
            volume_fixture("vol-1", "db1", VolumeStatus::Available),
            volume_fixture("vol-2", "db1", VolumeStatus::InUse),
        ];
        let result: Result<Volume, Error> = select_by_name(volumes, &name("db1"));
        assert!(matches!(
            result,
            Err(DriverError::AmbiguousName { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn find_reports_missing_volume() {
        let cloud = FakeCloud::new();
        let result = VolumeDirectory::new(&cloud).find(&name("db1")).await;
        assert!(matches!(result, Err(DriverError::NotFound { .. })));
    }

    #[tokio::test]
    async fn create_rejects_existing_name_without_calling_create() {
        let cloud = FakeCloud::new();
        cloud.insert_volume(volume_fixture("vol-1", "db1", VolumeStatus::Available));
        let result = VolumeDirectory::new(&cloud)
            .create(&name("db1"), CreateOptions::default())
            .await;
        assert!(matches!(result, Err(DriverError::AlreadyExists { .. })));
        assert_eq!(cloud.volume_count(), 1);
        assert!(!cloud.trace().iter().any(|entry| entry.starts_with("create")));
    }

    #[tokio::test]
    async fn create_forwards_options() {
        let cloud = FakeCloud::new();
        let options = CreateOptions {
            size_gb: Some(10),
            volume_type: Some(String::from("ssd")),
        };
        let volume = VolumeDirectory::new(&cloud)
            .create(&name("db1"), options)
            .await
            .expect("create should succeed");
        assert_eq!(volume.size, 10);
        assert_eq!(volume.volume_type.as_deref(), Some("ssd"));
    }

    #[tokio::test]
    async fn remove_propagates_provider_errors() {
        let cloud = FakeCloud::new();
        let volume = volume_fixture("vol-1", "db1", VolumeStatus::InUse);
        cloud.insert_volume(volume.clone());
        cloud.fail_delete("volume is still attached");
        let err = VolumeDirectory::new(&cloud)
            .remove(&volume)
            .await
            .expect_err("delete should fail");
        assert!(err.to_string().contains("volume is still attached"));
    }
}
