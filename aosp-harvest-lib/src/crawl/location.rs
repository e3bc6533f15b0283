use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Identifies a remote file by repository and path within that repository.
///
/// The relative path keeps the leading `/` it has when carved out of a
/// tree-wide search result, for example `/core/res/AndroidManifest.xml`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentLocation {
    repository: String,
    relative_path: String,
}

impl DocumentLocation {
    #[must_use]
    pub fn new(repository: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            relative_path: relative_path.into(),
        }
    }

    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Another document in the same repository.
    #[must_use]
    pub fn sibling(&self, relative_path: impl Into<String>) -> Self {
        Self::new(self.repository.clone(), relative_path)
    }
}

impl Display for DocumentLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.relative_path.starts_with('/') {
            write!(f, "{}{}", self.repository, self.relative_path)
        } else {
            write!(f, "{}/{}", self.repository, self.relative_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_repository_and_path() {
        assert_eq!(DocumentLocation::new("platform/frameworks/base", "/core/res/AndroidManifest.xml").to_string(), "platform/frameworks/base/core/res/AndroidManifest.xml");
        assert_eq!(DocumentLocation::new("platform/manifest", "default.xml").to_string(), "platform/manifest/default.xml");
    }

    #[test]
    fn sibling_stays_in_repository() {
        let manifest = DocumentLocation::new("platform/packages/apps/Dialer", "/java/AndroidManifest.xml");
        let gradle = manifest.sibling("/build.gradle");
        assert_eq!(gradle.repository(), "platform/packages/apps/Dialer");
        assert_eq!(gradle.relative_path(), "/build.gradle");
    }
}
