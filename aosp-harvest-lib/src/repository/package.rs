use super::host_os::HostOs;
use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// A `(major, minor, micro)` package revision. Missing parts are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl Revision {
    #[must_use]
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self { major, minor, micro }
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// One downloadable build of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveVariant {
    /// Archive name, or an absolute URL.
    pub url: String,
    /// `None` when the archive works on every host.
    pub host_os: Option<HostOs>,
}

/// A `remotePackage` entry of the repository index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub path: String,
    pub revision: Revision,
    pub display_name: Option<String>,
    /// Channel id, such as `channel-0`.
    pub channel: Option<String>,
    pub archives: Vec<ArchiveVariant>,
}

impl PackageDescriptor {
    /// The version suffix of the path, after the last `;`.
    #[must_use]
    pub fn version_suffix(&self) -> &str {
        self.path.rsplit_once(';').map_or("", |(_, suffix)| suffix)
    }
}
