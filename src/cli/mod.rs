//! Command-line interface definitions for the `cinderblock` binary.
//!
//! Shared with the build script, which renders the manual page from it.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `cinderblock` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cinderblock",
    version,
    about = "Docker volume plugin backed by OpenStack Cinder block storage"
)]
pub struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long)]
    pub debug: bool,
    /// Listen on this Unix socket instead of the one derived from the
    /// plugin name.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<Utf8PathBuf>,
}
