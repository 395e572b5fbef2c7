//! Configuration loading and validation.

use cinderblock::config::{ConfigError, DriverConfig, OpenStackConfig};
use cinderblock::test_support::EnvGuard;
use rstest::{fixture, rstest};

const OS_VARS: [&str; 8] = [
    "OS_AUTH_URL",
    "OS_USERNAME",
    "OS_PASSWORD",
    "OS_PROJECT_NAME",
    "OS_PROJECT_ID",
    "OS_USER_DOMAIN_NAME",
    "OS_PROJECT_DOMAIN_NAME",
    "OS_REGION_NAME",
];

#[fixture]
fn credentials() -> OpenStackConfig {
    OpenStackConfig {
        auth_url: String::from("https://keystone.example.com/v3"),
        username: String::from("demo"),
        password: String::from("secret"),
        project_name: String::from("demo-project"),
        project_id: None,
        user_domain_name: String::from("Default"),
        project_domain_name: String::from("Default"),
        region_name: None,
    }
}

#[fixture]
fn driver_config() -> DriverConfig {
    DriverConfig {
        fs_type: String::from("ext4"),
        mount_root: String::from("/var/lib/openstack-docker-driver"),
        migration_mode: None,
        identity_path: String::from("/sys/class/dmi/id/product_uuid"),
        plugin_name: String::from("openstack"),
        device_wait_secs: 60,
    }
}

#[rstest]
fn complete_credentials_validate(credentials: OpenStackConfig) {
    assert_eq!(credentials.validate(), Ok(()));
}

#[rstest]
#[case::auth_url(|cfg: &mut OpenStackConfig| cfg.auth_url.clear(), "OS_AUTH_URL", "auth_url")]
#[case::username(|cfg: &mut OpenStackConfig| cfg.username.clear(), "OS_USERNAME", "username")]
#[case::password(|cfg: &mut OpenStackConfig| cfg.password.clear(), "OS_PASSWORD", "password")]
#[case::project(
    |cfg: &mut OpenStackConfig| cfg.project_name.clear(),
    "OS_PROJECT_NAME",
    "project_name"
)]
#[case::user_domain(
    |cfg: &mut OpenStackConfig| cfg.user_domain_name.clear(),
    "OS_USER_DOMAIN_NAME",
    "user_domain_name"
)]
fn missing_credentials_are_actionable(
    mut credentials: OpenStackConfig,
    #[case] mutate: fn(&mut OpenStackConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut credentials);
    let error = credentials.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField, got {error:?}");
    };
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
    assert!(message.contains("cinderblock.toml"), "should mention file: {message}");
}

#[rstest]
fn project_id_makes_project_name_optional(mut credentials: OpenStackConfig) {
    credentials.project_name.clear();
    credentials.project_id = Some(String::from("0a1b2c"));
    assert_eq!(credentials.validate(), Ok(()));
}

#[rstest]
fn auth_url_must_be_http(mut credentials: OpenStackConfig) {
    credentials.auth_url = String::from("keystone.example.com:5000/v3");
    let error = credentials.validate().expect_err("scheme required");
    assert!(matches!(error, ConfigError::InvalidField(_)), "{error:?}");
    assert!(error.to_string().contains("OS_AUTH_URL"), "{error}");
}

#[rstest]
#[case::relative_root(
    |cfg: &mut DriverConfig| cfg.mount_root = String::from("volumes"),
    "CINDERBLOCK_MOUNT_ROOT"
)]
#[case::nested_plugin_name(
    |cfg: &mut DriverConfig| cfg.plugin_name = String::from("a/b"),
    "CINDERBLOCK_PLUGIN_NAME"
)]
#[case::zero_wait(
    |cfg: &mut DriverConfig| cfg.device_wait_secs = 0,
    "CINDERBLOCK_DEVICE_WAIT_SECS"
)]
fn invalid_driver_settings_are_rejected(
    mut driver_config: DriverConfig,
    #[case] mutate: fn(&mut DriverConfig),
    #[case] env_var: &str,
) {
    mutate(&mut driver_config);
    let error = driver_config.to_settings().expect_err("invalid settings");
    assert!(matches!(error, ConfigError::InvalidField(_)), "{error:?}");
    assert!(error.to_string().contains(env_var), "{error}");
}

#[rstest]
fn empty_fs_type_is_missing(mut driver_config: DriverConfig) {
    driver_config.fs_type = String::from("  ");
    let error = driver_config.validate().expect_err("fs type required");
    assert!(error.to_string().contains("CINDERBLOCK_FS_TYPE"), "{error}");
}

#[tokio::test]
async fn credentials_load_from_environment_with_domain_defaults() {
    let clear: Vec<&str> = OS_VARS
        .iter()
        .copied()
        .filter(|key| {
            !matches!(
                *key,
                "OS_AUTH_URL" | "OS_USERNAME" | "OS_PASSWORD" | "OS_PROJECT_NAME"
            )
        })
        .collect();
    let _guard = EnvGuard::apply(
        &[
            ("OS_AUTH_URL", "https://keystone.example.com/v3"),
            ("OS_USERNAME", "demo"),
            ("OS_PASSWORD", "secret"),
            ("OS_PROJECT_NAME", "demo-project"),
        ],
        &clear,
    )
    .await;

    let config = OpenStackConfig::load_without_cli_args().expect("load");
    assert_eq!(config.auth_url, "https://keystone.example.com/v3");
    assert_eq!(config.project_name, "demo-project");
    assert_eq!(config.user_domain_name, "Default");
    assert_eq!(config.project_domain_name, "Default");
    assert_eq!(config.project_id, None);
    assert_eq!(config.validate(), Ok(()));
}

#[tokio::test]
async fn driver_settings_including_migration_load_from_environment() {
    let _guard = EnvGuard::apply(
        &[
            ("CINDERBLOCK_FS_TYPE", "xfs"),
            ("CINDERBLOCK_MOUNT_ROOT", "/srv/volumes"),
            ("CINDERBLOCK_MIGRATION_MODE", "true"),
            ("CINDERBLOCK_PLUGIN_NAME", "cinder"),
        ],
        &["CINDERBLOCK_DEVICE_WAIT_SECS", "CINDERBLOCK_IDENTITY_PATH"],
    )
    .await;

    let config = DriverConfig::load_without_cli_args().expect("load");
    assert_eq!(config.device_wait_secs, 60);
    assert_eq!(config.migration_mode, Some(true));
    assert_eq!(config.socket_path().as_str(), "/run/docker/plugins/cinder.sock");

    let settings = config.to_settings().expect("settings");
    assert_eq!(settings.fs_type, "xfs");
    assert_eq!(settings.mount_root.path().as_str(), "/srv/volumes");
    assert!(settings.reconcile.migration_mode);
}
