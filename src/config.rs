//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::attachment::ReconcilePolicy;
use crate::device::default_device_wait;
use crate::driver::{DEFAULT_DEVICE_WAIT_SECS, DEFAULT_FS_TYPE, DriverSettings};
use crate::identity::DEFAULT_IDENTITY_PATH;
use crate::mount::MountRoot;

/// Default directory under which volumes are mounted.
pub const DEFAULT_MOUNT_ROOT: &str = "/var/lib/openstack-docker-driver";
/// Default plugin name, which also names the socket.
pub const DEFAULT_PLUGIN_NAME: &str = "openstack";
const CONFIG_FILE: &str = "cinderblock.toml";

/// OpenStack credentials, read from the standard `OS_*` variables or the
/// configuration file.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OS",
    discovery(
        app_name = "cinderblock",
        env_var = "CINDERBLOCK_CONFIG_PATH",
        config_file_name = "cinderblock.toml",
        dotfile_name = ".cinderblock.toml",
        project_file_name = "cinderblock.toml"
    )
)]
pub struct OpenStackConfig {
    /// Keystone endpoint, for example `https://keystone.example.com/v3`.
    pub auth_url: String,
    /// User to authenticate as.
    pub username: String,
    /// Password for `username`.
    pub password: String,
    /// Project the token is scoped to; may be left empty when `project_id`
    /// is set.
    #[ortho_config(default = String::new())]
    pub project_name: String,
    /// Project id; takes precedence over the name when set.
    pub project_id: Option<String>,
    /// Domain of the user. Defaults to `Default`.
    #[ortho_config(default = "Default".to_owned())]
    pub user_domain_name: String,
    /// Domain of the project. Defaults to `Default`.
    #[ortho_config(default = "Default".to_owned())]
    pub project_domain_name: String,
    /// Region used when picking catalog endpoints.
    pub region_name: Option<String>,
}

/// Driver behaviour settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CINDERBLOCK",
    discovery(
        app_name = "cinderblock",
        env_var = "CINDERBLOCK_CONFIG_PATH",
        config_file_name = "cinderblock.toml",
        dotfile_name = ".cinderblock.toml",
        project_file_name = "cinderblock.toml"
    )
)]
pub struct DriverConfig {
    /// Filesystem created on blank volumes.
    #[ortho_config(default = DEFAULT_FS_TYPE.to_owned())]
    pub fs_type: String,
    /// Directory holding one mount point per volume.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_root: String,
    /// Detach volumes from their previous owner before attaching here.
    ///
    /// Unset means disabled. An `Option` keeps the absent CLI flag from
    /// masking the environment and file values.
    pub migration_mode: Option<bool>,
    /// File holding this host's instance id.
    #[ortho_config(default = DEFAULT_IDENTITY_PATH.to_owned())]
    pub identity_path: String,
    /// Plugin name; the socket is `/run/docker/plugins/<name>.sock`.
    #[ortho_config(default = DEFAULT_PLUGIN_NAME.to_owned())]
    pub plugin_name: String,
    /// Seconds to wait for the device node after attaching.
    #[ortho_config(default = DEFAULT_DEVICE_WAIT_SECS)]
    pub device_wait_secs: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidField(format!(
            "invalid {}: {reason}; check {} or {} in {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

impl OpenStackConfig {
    /// Loads credentials from defaults, configuration files, and environment
    /// variables, without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cinderblock")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that every credential needed for authentication is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the variable and file key
    /// to set, or [`ConfigError::InvalidField`] when the auth URL is not HTTP.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let auth_url = FieldMetadata::new("Keystone auth URL", "OS_AUTH_URL", "auth_url");
        require_field(&self.auth_url, &auth_url)?;
        if !(self.auth_url.starts_with("http://") || self.auth_url.starts_with("https://")) {
            return Err(auth_url.invalid("expected an http:// or https:// URL"));
        }
        require_field(
            &self.username,
            &FieldMetadata::new("OpenStack user name", "OS_USERNAME", "username"),
        )?;
        require_field(
            &self.password,
            &FieldMetadata::new("OpenStack password", "OS_PASSWORD", "password"),
        )?;
        if self.project_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            require_field(
                &self.project_name,
                &FieldMetadata::new("OpenStack project name", "OS_PROJECT_NAME", "project_name"),
            )?;
        }
        require_field(
            &self.user_domain_name,
            &FieldMetadata::new("user domain", "OS_USER_DOMAIN_NAME", "user_domain_name"),
        )?;
        require_field(
            &self.project_domain_name,
            &FieldMetadata::new("project domain", "OS_PROJECT_DOMAIN_NAME", "project_domain_name"),
        )
    }
}

impl DriverConfig {
    /// Loads driver settings from defaults, configuration files, and
    /// environment variables, without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cinderblock")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending variable and file key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.fs_type,
            &FieldMetadata::new("filesystem type", "CINDERBLOCK_FS_TYPE", "fs_type"),
        )?;
        let mount_root = FieldMetadata::new("mount root", "CINDERBLOCK_MOUNT_ROOT", "mount_root");
        require_field(&self.mount_root, &mount_root)?;
        if !self.mount_root.starts_with('/') {
            return Err(mount_root.invalid("must be an absolute path"));
        }
        require_field(
            &self.identity_path,
            &FieldMetadata::new(
                "instance identity path",
                "CINDERBLOCK_IDENTITY_PATH",
                "identity_path",
            ),
        )?;
        let plugin_name = FieldMetadata::new(
            "plugin name",
            "CINDERBLOCK_PLUGIN_NAME",
            "plugin_name",
        );
        require_field(&self.plugin_name, &plugin_name)?;
        if self.plugin_name.contains('/') {
            return Err(plugin_name.invalid("must not contain '/'"));
        }
        if self.device_wait_secs == 0 {
            return Err(FieldMetadata::new(
                "device wait",
                "CINDERBLOCK_DEVICE_WAIT_SECS",
                "device_wait_secs",
            )
            .invalid("must be at least one second"));
        }
        Ok(())
    }

    /// Default socket path derived from the plugin name.
    #[must_use]
    pub fn socket_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("/run/docker/plugins/{}.sock", self.plugin_name))
    }

    /// Resolves validated settings for the driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn to_settings(&self) -> Result<DriverSettings, ConfigError> {
        self.validate()?;
        Ok(DriverSettings {
            fs_type: self.fs_type.clone(),
            mount_root: MountRoot::new(self.mount_root.as_str()),
            reconcile: ReconcilePolicy {
                migration_mode: self.migration_mode.unwrap_or(false),
                ..ReconcilePolicy::default()
            },
            device_wait: default_device_wait(self.device_wait_secs),
        })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration field holds an unusable value.
    #[error("invalid configuration field: {0}")]
    InvalidField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn driver_config() -> DriverConfig {
        DriverConfig {
            fs_type: String::from("xfs"),
            mount_root: String::from("/srv/volumes"),
            migration_mode: Some(true),
            identity_path: String::from(DEFAULT_IDENTITY_PATH),
            plugin_name: String::from("cinder"),
            device_wait_secs: 30,
        }
    }

    #[test]
    fn settings_carry_configured_values() {
        let settings = driver_config().to_settings().expect("valid config");
        assert_eq!(settings.fs_type, "xfs");
        assert_eq!(settings.mount_root.path().as_str(), "/srv/volumes");
        assert!(settings.reconcile.migration_mode);
        assert_eq!(settings.device_wait.max_attempts, 30);
        assert_eq!(settings.device_wait.interval, Duration::from_secs(1));
    }

    #[test]
    fn unset_migration_mode_is_disabled() {
        let config = DriverConfig {
            migration_mode: None,
            ..driver_config()
        };
        let settings = config.to_settings().expect("valid config");
        assert!(!settings.reconcile.migration_mode);
    }

    #[test]
    fn socket_path_uses_plugin_name() {
        assert_eq!(
            driver_config().socket_path().as_str(),
            "/run/docker/plugins/cinder.sock"
        );
    }
}
