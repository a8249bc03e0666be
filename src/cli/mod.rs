//! Command-line interface

pub mod output;

use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

/// Provision this device as a Dagr appliance
#[derive(Debug, Parser, Clone)]
#[command(name = "dagr-install")]
#[command(version)]
#[command(about = "Provision this device as a Dagr appliance", long_about = None)]
pub struct Cli {
    /// Stream command output and print extra diagnostics
    #[arg(short, long)]
    pub verbose: bool,

    /// YAML file overriding installer defaults
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Do not offer to reboot when provisioning completes
    #[arg(long)]
    pub no_reboot: bool,

    /// Check an existing installation instead of provisioning
    #[arg(long)]
    pub verify: bool,
}

impl Cli {
    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

/// Process exit code for an argument error
///
/// Help and version requests succeed; everything else is a usage error.
pub fn exit_code_for(error: &clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}
