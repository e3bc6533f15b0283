//! Command dispatch logic for aosp-harvest

use super::{
    DownloadArgs, InitArgs, PackagesArgs, PermissionsArgs, ProvidersArgs, SearchArgs, VersionsArgs, download_package, dump_permissions,
    dump_providers, dump_versions, init_config, list_packages, search_files,
};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};
use std::io::Write;

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "aosp-harvest", author, version, long_about = None)]
#[command(about = "Harvest Android platform metadata from AOSP sources and the SDK repository")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: HarvestSubcommand,
}

#[derive(Subcommand, Debug)]
enum HarvestSubcommand {
    /// Collect content providers declared across the platform's manifests
    Providers(Box<ProvidersArgs>),
    /// Search the platform sources and print matching files
    Search(Box<SearchArgs>),
    /// List packages in the SDK repository index
    Packages(Box<PackagesArgs>),
    /// Download the latest archive of an SDK package
    Download(Box<DownloadArgs>),
    /// Write the published API levels and build tags
    Versions(Box<VersionsArgs>),
    /// Collect framework permissions for a ref and each API level
    Permissions(Box<PermissionsArgs>),
    /// Generate a default configuration file
    Init(InitArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// This function parses the command-line arguments and executes the corresponding
/// subcommand. It's designed to be called from main.rs with the program arguments.
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let code = e.exit_code();
            let rendered = e.render();
            if e.use_stderr() {
                let _ = write!(host.error(), "{rendered}");
            } else {
                let _ = write!(host.output(), "{rendered}");
            }
            host.exit(code);
            return Ok(());
        }
    };

    match &cli.command {
        HarvestSubcommand::Providers(args) => dump_providers(host, args).await,
        HarvestSubcommand::Search(args) => search_files(host, args).await,
        HarvestSubcommand::Packages(args) => list_packages(host, args).await,
        HarvestSubcommand::Download(args) => download_package(host, args).await,
        HarvestSubcommand::Versions(args) => dump_versions(host, args).await,
        HarvestSubcommand::Permissions(args) => dump_permissions(host, args).await,
        HarvestSubcommand::Init(args) => init_config(host, args),
    }
}
