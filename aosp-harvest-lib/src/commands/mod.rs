//! Command-line interface for aosp-harvest
//!
//! Each subcommand wires the library's building blocks together:
//!
//! - **providers**: search for manifests declaring content providers, crawl
//!   them, and write the provider lists as JSON
//! - **search**: run a code search and print the matching files
//! - **packages**: list packages from the SDK repository index
//! - **download**: fetch the newest archive of an SDK package
//! - **versions**: write the published API levels and build tags as JSON
//! - **permissions**: write the framework permissions of a ref and of each
//!   API level as JSON
//! - **init**: write the default configuration file
//!
//! The network commands share [`common::Common`], which loads the
//! configuration, sets up logging and progress output, and locks the cache
//! directory for the duration of the run.

mod common;
mod config;
mod download;
mod host;
mod init;
mod packages;
mod permissions;
mod progress_reporter;
mod providers;
mod run;
mod search;
mod versions;

pub use config::Config;
pub use download::{DownloadArgs, download_package};
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use packages::{PackagesArgs, list_packages};
pub use permissions::{PermissionsArgs, dump_permissions};
pub use progress_reporter::ProgressReporter;
pub use providers::{ProvidersArgs, dump_providers};
pub use run::run;
pub use search::{SearchArgs, search_files};
pub use versions::{VersionsArgs, dump_versions};
