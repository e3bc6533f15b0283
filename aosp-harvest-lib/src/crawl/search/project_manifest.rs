//! The repo-tool manifest that maps checkout paths to repositories.
//!
//! Search results carry tree-wide paths such as
//! `frameworks/base/core/res/AndroidManifest.xml`. The manifest says that the
//! `frameworks/base` checkout comes from the `platform/frameworks/base`
//! repository, which is what the source browser needs.

use crate::Result;
use crate::crawl::location::DocumentLocation;
use ohno::{app_err, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

pub const MANIFEST_REPOSITORY: &str = "platform/manifest";
pub const MANIFEST_PATH: &str = "default.xml";

/// One `<project>` entry: a checkout path and the repository behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMapping {
    repository: String,
    prefix: String,
}

impl ProjectMapping {
    #[must_use]
    pub fn new(repository: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The remainder of `path` below this checkout, leading `/` included.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.prefix.as_str()).filter(|rest| rest.starts_with('/'))
    }
}

/// All project mappings of a manifest.
#[derive(Debug, Clone, Default)]
pub struct ProjectMappings {
    mappings: Vec<ProjectMapping>,
}

impl ProjectMappings {
    #[must_use]
    pub const fn new(mappings: Vec<ProjectMapping>) -> Self {
        Self { mappings }
    }

    /// Read the `<project name=".." path="..">` entries of a manifest.
    ///
    /// A project without `path` is checked out at its `name`.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut mappings = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(element) | Event::Empty(element) if element.local_name().as_ref() == b"project" => {
                    mappings.push(Self::read_project(&element)?);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if mappings.is_empty() {
            bail!("project manifest does not list any projects");
        }

        Ok(Self { mappings })
    }

    fn read_project(element: &BytesStart<'_>) -> Result<ProjectMapping> {
        let mut name = None;
        let mut path = None;

        for attribute in element.attributes() {
            let attribute = attribute?;
            match attribute.key.as_ref() {
                b"name" => name = Some(attribute.unescape_value()?.into_owned()),
                b"path" => path = Some(attribute.unescape_value()?.into_owned()),
                _ => {}
            }
        }

        let name = name.ok_or_else(|| app_err!("project manifest has a <project> without a name"))?;
        let prefix = path.unwrap_or_else(|| name.clone());
        Ok(ProjectMapping::new(name, prefix.trim_end_matches('/')))
    }

    /// Translate a tree-wide path into a location.
    ///
    /// The longest matching checkout prefix wins. A path outside every
    /// checkout is an error, never silently dropped.
    pub fn resolve(&self, path: &str) -> Result<DocumentLocation> {
        self.mappings
            .iter()
            .filter_map(|mapping| mapping.strip(path).map(|rest| (mapping, rest)))
            .max_by_key(|(mapping, _)| mapping.prefix.len())
            .map(|(mapping, rest)| DocumentLocation::new(mapping.repository.as_str(), rest))
            .ok_or_else(|| app_err!("search result '{path}' does not belong to any project in the manifest"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectMapping> {
        self.mappings.iter()
    }
}
