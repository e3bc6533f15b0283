#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for aosp-harvest
//!
//! This library gathers metadata about the Android platform from its public
//! sources: content providers declared in the platform's manifests, located
//! through the code search behind cs.android.com and read from Gitiles, the
//! framework permissions of every API level, the published releases and
//! build tags, and packages published in the SDK repository index.
//!
//! # Module Organization
//!
//! - [`crawl`]: Search, fetching, caching and the concurrent manifest crawl
//! - [`records`]: Records extracted from crawled documents
//! - [`repository`]: The SDK package index and archive downloads
//! - [`versions`]: API levels, build tags and the build numbers page
//! - `commands`: Command-line interface and orchestration

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

mod commands;
pub mod crawl;
pub mod records;
pub mod repository;
pub mod versions;

pub use crate::commands::{Config, Host, run};
