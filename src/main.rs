//! Binary entry point for the cinderblock volume plugin.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use cinderblock::config::{ConfigError, DriverConfig, OpenStackConfig};
use cinderblock::{
    CommandHost, FileIdentity, HostError, IdentityError, IdentitySource, OpenStackBackend,
    OpenStackError, VolumeDriver, logging, plugin,
};
use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot determine this instance: {0}")]
    Identity(#[from] IdentityError),
    #[error("openstack error: {0}")]
    OpenStack(#[from] OpenStackError),
    #[error("mount root unavailable: {0}")]
    MountRoot(#[from] HostError),
    #[error("plugin socket failed: {0}")]
    Serve(#[from] io::Error),
}

#[actix_web::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    if let Err(err) = run(cli).await {
        report_error(&err);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let driver_config = DriverConfig::load_without_cli_args()?;
    let settings = driver_config.to_settings()?;
    let socket = cli.socket.unwrap_or_else(|| driver_config.socket_path());

    let identity = FileIdentity::new(driver_config.identity_path.as_str());
    let instance_id = identity.instance_id()?;

    let cloud = OpenStackBackend::connect(OpenStackConfig::load_without_cli_args()?).await?;
    settings.mount_root.ensure_exists()?;
    info!(
        instance = %instance_id,
        mount_root = %settings.mount_root.path(),
        fs_type = %settings.fs_type,
        migration_mode = settings.reconcile.migration_mode,
        "volume driver initialised"
    );

    let driver = VolumeDriver::new(cloud, CommandHost::with_process_runner(), identity, settings);
    plugin::serve(&socket, Arc::new(driver)).await?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_renders_cause() {
        let mut buf = Vec::new();
        let err = CliError::Config(ConfigError::MissingField(String::from(
            "missing Keystone auth URL",
        )));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            rendered,
            "configuration error: missing configuration field: missing Keystone auth URL\n"
        );
    }

    #[test]
    fn cli_accepts_socket_override() {
        let cli = Cli::try_parse_from(["cinderblock", "--debug", "--socket", "/tmp/p.sock"])
            .expect("parse");
        assert!(cli.debug);
        assert_eq!(cli.socket.as_deref().map(camino::Utf8Path::as_str), Some("/tmp/p.sock"));
    }
}
