//! Volume model shared by the driver and the cloud backends.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::ids::{AttachmentId, InstanceId, VolumeId};

/// Lifecycle status reported by the block-storage service.
///
/// The service is the only authority on status; the driver never caches it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeStatus {
    /// The volume is still being provisioned.
    Creating,
    /// The volume is detached and ready to attach.
    Available,
    /// The volume is attached to an instance.
    InUse,
    /// Provisioning or a later operation failed.
    Error,
    /// The volume is being deleted.
    Deleting,
    /// Any other provider status, kept verbatim.
    Other(String),
}

impl VolumeStatus {
    /// Returns the provider spelling of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Error => "error",
            Self::Deleting => "deleting",
            Self::Other(status) => status,
        }
    }
}

impl From<&str> for VolumeStatus {
    fn from(value: &str) -> Self {
        match value {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "in-use" => Self::InUse,
            "error" => Self::Error,
            "deleting" => Self::Deleting,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Attachment as recorded on the volume by the block-storage service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeAttachment {
    /// Instance that owns the attachment.
    pub server_id: InstanceId,
}

/// Snapshot of a cloud volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider-assigned identifier.
    pub id: VolumeId,
    /// User-chosen name.
    pub name: String,
    /// Status at the time of the snapshot.
    pub status: VolumeStatus,
    /// Size in GiB.
    pub size: u64,
    /// Provider-specific volume class.
    pub volume_type: Option<String>,
    /// Current attachments, in provider order.
    pub attachments: Vec<VolumeAttachment>,
}

/// Attachment as recorded by the compute service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attachment {
    /// Attachment identifier used to address detach calls.
    pub id: AttachmentId,
    /// Instance the volume is attached to.
    pub server_id: InstanceId,
    /// Attached volume.
    pub volume_id: VolumeId,
    /// Device hint chosen by the compute service (for example `/dev/vdb`).
    pub device: Option<String>,
}

/// Errors raised when a volume name cannot be used as a mount directory.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid volume name '{name}': {reason}")]
pub struct VolumeNameError {
    /// Rejected name.
    pub name: String,
    /// Why the name was rejected.
    pub reason: &'static str,
}

/// Volume name validated to be a single path component.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VolumeName(String);

impl VolumeName {
    /// Validates `name` for use as both a cloud name and a directory name.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeNameError`] when the name is empty, is `.` or `..`, or
    /// contains a path separator or NUL byte.
    pub fn parse(name: &str) -> Result<Self, VolumeNameError> {
        let reject = |reason| VolumeNameError {
            name: name.to_owned(),
            reason,
        };
        if name.is_empty() {
            return Err(reject("name must not be empty"));
        }
        if name == "." || name == ".." {
            return Err(reject("name must not be a relative path component"));
        }
        if name.contains('/') || name.contains('\0') {
            return Err(reject("name must not contain '/' or NUL"));
        }
        Ok(Self(name.to_owned()))
    }

    /// Borrows the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Create-time options recognised by the driver.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateOptions {
    /// Requested size in GiB; `None` leaves the provider default.
    pub size_gb: Option<u64>,
    /// Requested volume class.
    pub volume_type: Option<String>,
}

impl CreateOptions {
    /// Extracts recognised keys from runtime-supplied options.
    ///
    /// An unparsable `size` is ignored rather than rejected, and an empty
    /// `type` is not forwarded. Unknown keys are ignored.
    #[must_use]
    pub fn from_options<S: std::hash::BuildHasher>(options: &HashMap<String, String, S>) -> Self {
        let size_gb = options
            .get("size")
            .and_then(|value| value.trim().parse::<u64>().ok());
        let volume_type = options
            .get("type")
            .filter(|value| !value.is_empty())
            .cloned();
        Self {
            size_gb,
            volume_type,
        }
    }
}

/// Parameters sent to the block-storage service to create a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRequest {
    /// Volume name.
    pub name: String,
    /// Recognised create options.
    pub options: CreateOptions,
}

impl VolumeRequest {
    /// Builds a request for `name` with the given options.
    #[must_use]
    pub fn new(name: &VolumeName, options: CreateOptions) -> Self {
        Self {
            name: name.as_str().to_owned(),
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[rstest]
    #[case("creating", VolumeStatus::Creating)]
    #[case("available", VolumeStatus::Available)]
    #[case("in-use", VolumeStatus::InUse)]
    #[case("error", VolumeStatus::Error)]
    #[case("deleting", VolumeStatus::Deleting)]
    #[case("maintenance", VolumeStatus::Other(String::from("maintenance")))]
    fn status_parses_provider_spelling(#[case] raw: &str, #[case] expected: VolumeStatus) {
        let status = VolumeStatus::from(raw);
        assert_eq!(status, expected);
        assert_eq!(status.as_str(), raw);
    }

    #[test]
    fn create_options_reads_size_and_type() {
        let parsed = CreateOptions::from_options(&options(&[("size", "10"), ("type", "ssd")]));
        assert_eq!(parsed.size_gb, Some(10));
        assert_eq!(parsed.volume_type.as_deref(), Some("ssd"));
    }

    #[rstest]
    #[case("ten")]
    #[case("-1")]
    #[case("")]
    fn create_options_ignores_unparsable_size(#[case] size: &str) {
        let parsed = CreateOptions::from_options(&options(&[("size", size)]));
        assert_eq!(parsed.size_gb, None);
    }

    #[test]
    fn create_options_drops_empty_type_and_unknown_keys() {
        let parsed = CreateOptions::from_options(&options(&[("type", ""), ("colour", "blue")]));
        assert_eq!(parsed, CreateOptions::default());
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("a/b")]
    #[case("nul\0byte")]
    fn volume_name_rejects_unsafe_components(#[case] name: &str) {
        assert!(VolumeName::parse(name).is_err());
    }

    #[test]
    fn volume_name_accepts_plain_names() {
        let name = VolumeName::parse("db1").expect("valid name");
        assert_eq!(name.as_str(), "db1");
    }
}
