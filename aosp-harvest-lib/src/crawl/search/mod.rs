//! Discovery of files through the code search service behind cs.android.com.

mod batch_codec;
mod client;
mod project_manifest;
mod query;

pub use batch_codec::{decode_response, encode_request, new_boundary};
pub use client::{BatchSearchClient, SEARCH_BASE_URL, SEARCH_REFERER, SearchSettings};
pub use project_manifest::{MANIFEST_PATH, MANIFEST_REPOSITORY, ProjectMapping, ProjectMappings};
pub use query::{QueryConfig, QueryPage};
