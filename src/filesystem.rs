//! Conditional formatting of freshly attached devices.

use camino::Utf8Path;
use tracing::{debug, info};

use crate::host::{HostError, HostOps};

/// What [`ensure_formatted`] did to the device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormatOutcome {
    /// The device already carried a filesystem, which was left untouched.
    Existing(String),
    /// The device was blank and has been formatted.
    Formatted,
}

/// Formats `device` with `fs_type` only when it has no filesystem signature.
///
/// An existing filesystem is never replaced, even when its type differs from
/// `fs_type`.
///
/// # Errors
///
/// Returns [`HostError`] when the probe or the format fails.
pub fn ensure_formatted<H: HostOps>(
    host: &H,
    device: &Utf8Path,
    fs_type: &str,
) -> Result<FormatOutcome, HostError> {
    if let Some(existing) = host.filesystem_type(device)? {
        debug!(%device, filesystem = %existing, "device already formatted");
        return Ok(FormatOutcome::Existing(existing));
    }

    info!(%device, filesystem = %fs_type, "formatting blank device");
    host.format(device, fs_type)?;
    Ok(FormatOutcome::Formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHost;

    #[test]
    fn blank_device_is_formatted_with_requested_type() {
        let host = FakeHost::new();
        let outcome = ensure_formatted(&host, Utf8Path::new("/dev/x"), "ext4").expect("format");
        assert_eq!(outcome, FormatOutcome::Formatted);
        assert_eq!(host.formats(), vec![(String::from("/dev/x"), String::from("ext4"))]);
    }

    #[test]
    fn mismatched_filesystem_is_left_alone() {
        let host = FakeHost::new().with_filesystem("xfs");
        let outcome = ensure_formatted(&host, Utf8Path::new("/dev/x"), "ext4").expect("probe");
        assert_eq!(outcome, FormatOutcome::Existing(String::from("xfs")));
        assert!(host.formats().is_empty());
    }

    #[test]
    fn format_failure_is_surfaced() {
        let host = FakeHost::new().fail_format();
        let err = ensure_formatted(&host, Utf8Path::new("/dev/x"), "ext4").expect_err("fails");
        assert!(matches!(err, HostError::CommandFailure { .. }));
    }
}
