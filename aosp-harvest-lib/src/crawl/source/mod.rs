//! Retrieval of individual files from the Gitiles source browser.

mod client;
mod file_table;

pub use client::{SOURCE_BASE_URL, SourceClient};
pub use file_table::extract_file_text;
