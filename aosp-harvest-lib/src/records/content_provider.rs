//! Content providers declared in `AndroidManifest.xml`.
//!
//! A provider is reported when it declares authorities and can be reached
//! from outside its own package, either because it is exported or because it
//! grants URI permissions.

use crate::Result;
use crate::crawl::{CrawlRecord, ManifestParser};
use ohno::{IntoAppError, app_err, bail};
use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Namespace of the `android:` attributes.
pub const ANDROID_NAMESPACE: &str = "http://schemas.android.com/apk/res/android";

/// `grant-uri-permission` attributes, in the order they are looked up.
const URI_PERMISSION_KINDS: [&str; 3] = ["path", "pathPrefix", "pathPattern"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UriPermission {
    /// `path`, `pathPrefix` or `pathPattern`.
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentProvider {
    pub package: String,
    pub name: String,
    pub authorities: Vec<String>,
    pub exported: bool,
    pub read_permission: Option<String>,
    pub write_permission: Option<String>,
    pub has_uri_permission: bool,
    pub grant_uri_permissions: Vec<UriPermission>,
}

impl ContentProvider {
    /// The read and write permissions, in that order, where declared.
    pub fn all_permissions(&self) -> impl Iterator<Item = &str> {
        self.read_permission.iter().chain(self.write_permission.iter()).map(String::as_str)
    }

    #[must_use]
    pub const fn needs_permission(&self) -> bool {
        self.read_permission.is_some() || self.write_permission.is_some()
    }
}

impl CrawlRecord for ContentProvider {
    type Identity = BTreeSet<String>;

    fn identity(&self) -> Self::Identity {
        self.authorities.iter().cloned().collect()
    }

    fn sort_key(&self) -> (&str, &str) {
        (&self.package, &self.name)
    }
}

/// Providers guarded by a read or write permission.
pub fn permission_providers(providers: &[ContentProvider]) -> Vec<ContentProvider> {
    providers.iter().filter(|p| p.needs_permission()).cloned().collect()
}

/// [`ManifestParser`] producing [`ContentProvider`] records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderManifestParser;

impl ManifestParser for ProviderManifestParser {
    type Record = ContentProvider;

    fn declared_owner(&self, document: &str) -> Result<Option<String>> {
        let mut reader = NsReader::from_str(document);

        loop {
            match reader.read_event().into_app_err("reading manifest")? {
                Event::Start(element) | Event::Empty(element) => {
                    if element.local_name().as_ref() != b"manifest" {
                        bail!("document root is <{}>, not <manifest>", String::from_utf8_lossy(element.name().as_ref()));
                    }
                    return plain_attribute(&element, b"package");
                }
                Event::Eof => bail!("document has no root element"),
                _ => {}
            }
        }
    }

    fn parse(&self, document: &str, owner: &str) -> Result<Vec<ContentProvider>> {
        let mut reader = NsReader::from_str(document);
        let mut path: Vec<Vec<u8>> = Vec::new();
        let mut pending: Option<PendingProvider> = None;
        let mut providers = Vec::new();

        loop {
            let event = reader.read_event().into_app_err("reading manifest")?;
            match event {
                Event::Start(ref element) | Event::Empty(ref element) => {
                    let local = element.local_name().as_ref().to_vec();
                    let parent = path.last().map(Vec::as_slice);

                    if local == b"provider" && parent == Some(b"application".as_slice()) {
                        pending = Some(PendingProvider {
                            attributes: android_attributes(&reader, element)?,
                            uri_permissions: Vec::new(),
                        });
                    } else if local == b"grant-uri-permission"
                        && parent == Some(b"provider".as_slice())
                        && let Some(provider) = pending.as_mut()
                    {
                        let attributes = android_attributes(&reader, element)?;
                        if let Some(permission) = uri_permission(&attributes) {
                            provider.uri_permissions.push(permission);
                        }
                    }

                    if matches!(event, Event::Start(_)) {
                        path.push(local);
                    } else if local == b"provider"
                        && let Some(provider) = pending.take()
                    {
                        providers.extend(provider.finish(owner)?);
                    }
                }
                Event::End(_) => {
                    if path.pop().as_deref() == Some(b"provider".as_slice())
                        && let Some(provider) = pending.take()
                    {
                        providers.extend(provider.finish(owner)?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(providers)
    }
}

/// A `<provider>` whose children are still being read.
#[derive(Debug)]
struct PendingProvider {
    attributes: HashMap<String, String>,
    uri_permissions: Vec<UriPermission>,
}

impl PendingProvider {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn flag(&self, name: &str) -> Result<bool> {
        match self.attribute(name).unwrap_or("false") {
            "true" => Ok(true),
            "false" => Ok(false),
            other => bail!("unknown boolean value '{other}' for android:{name}"),
        }
    }

    /// Build the record, or `None` when the provider is not reachable from other packages.
    fn finish(self, package: &str) -> Result<Option<ContentProvider>> {
        let Some(authorities) = self.attribute("authorities") else {
            return Ok(None);
        };
        if self.attribute("exported") != Some("true") && self.attribute("grantUriPermissions") != Some("true") {
            return Ok(None);
        }

        let name = self
            .attribute("name")
            .ok_or_else(|| app_err!("provider with authorities '{authorities}' has no android:name"))?;

        let mut read_permission = self.attribute("permission").map(str::to_owned);
        let mut write_permission = read_permission.clone();
        if let Some(permission) = self.attribute("readPermission") {
            read_permission = Some(permission.to_owned());
        }
        if let Some(permission) = self.attribute("writePermission") {
            write_permission = Some(permission.to_owned());
        }

        Ok(Some(ContentProvider {
            package: package.to_owned(),
            name: qualify_name(package, name),
            authorities: authorities.split(';').map(|authority| substitute_package(package, authority)).collect(),
            exported: self.flag("exported")?,
            read_permission,
            write_permission,
            has_uri_permission: self.flag("grantUriPermissions")?,
            grant_uri_permissions: self.uri_permissions,
        }))
    }
}

/// Expand a component name that is relative to the package.
fn qualify_name(package: &str, name: &str) -> String {
    if name.starts_with('.') {
        format!("{package}{name}")
    } else if !name.contains('.') {
        format!("{package}.{name}")
    } else {
        name.to_owned()
    }
}

fn substitute_package(package: &str, text: &str) -> String {
    text.replace("${packageName}", package).replace("${applicationId}", package)
}

fn uri_permission(attributes: &HashMap<String, String>) -> Option<UriPermission> {
    URI_PERMISSION_KINDS.iter().find_map(|kind| {
        attributes.get(*kind).map(|path| UriPermission {
            kind: (*kind).to_owned(),
            path: path.clone(),
        })
    })
}

/// The `android:`-namespaced attributes of an element, keyed by local name.
pub(super) fn android_attributes(reader: &NsReader<&[u8]>, element: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut attributes = HashMap::new();

    for attribute in element.attributes() {
        let attribute = attribute?;
        let (namespace, local) = reader.resolve_attribute(attribute.key);
        if namespace == ResolveResult::Bound(Namespace(ANDROID_NAMESPACE.as_bytes())) {
            let key = String::from_utf8_lossy(local.as_ref()).into_owned();
            let _ = attributes.insert(key, attribute.unescape_value()?.into_owned());
        }
    }

    Ok(attributes)
}

pub(super) fn plain_attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attribute in element.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
