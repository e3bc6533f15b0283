//! SDK packages: the repository index and archive downloads.

mod download;
mod host_os;
mod index;
mod package;

pub use download::DOWNLOAD_CHUNK_SIZE;
pub use host_os::HostOs;
pub use index::{DEFAULT_CHANNEL, IndexDocument, REPOSITORY_DOWNLOAD_URL, REPOSITORY_INDEX_URL, RepositoryIndex};
pub use package::{ArchiveVariant, PackageDescriptor, Revision};
