//! Permissions and permission groups declared by the framework.
//!
//! `frameworks/base/core/res/AndroidManifest.xml` declares every platform
//! permission. Labels and descriptions there are usually `@string/` references
//! into `core/res/res/values/strings.xml`, and the javadoc-style comment right
//! before a declaration tells whether it is part of the public SDK.

use super::content_provider::{android_attributes, plain_attribute};
use crate::Result;
use ohno::{IntoAppError, app_err, bail};
use quick_xml::events::Event;
use quick_xml::{NsReader, Reader};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Protection levels that keep a permission out of reach of ordinary apps.
const PRIVILEGED_PROTECTION_LEVELS: [&str; 6] = ["signature", "knownSigner", "signatureOrSystem", "privileged", "internal", "development"];

/// Visibility markers from the comment preceding a declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionComment {
    pub deprecated: bool,
    pub system_api: bool,
    pub test_api: bool,
    pub hide: bool,
}

impl PermissionComment {
    #[must_use]
    pub fn from_comment(text: &str) -> Self {
        Self {
            deprecated: text.contains("@deprecated"),
            system_api: text.contains("@SystemApi"),
            test_api: text.contains("@TestApi"),
            hide: text.contains("@hide"),
        }
    }

    /// Public SDK surface: neither system, test nor hidden API.
    #[must_use]
    pub const fn is_sdk(&self) -> bool {
        !(self.system_api || self.test_api || self.hide)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    pub name: String,
    pub description: Option<String>,
    pub label: Option<String>,
    pub priority: i32,
    pub comment: PermissionComment,
}

impl PermissionGroup {
    #[must_use]
    pub const fn is_sdk(&self) -> bool {
        self.comment.is_sdk()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub name: String,
    pub description: Option<String>,
    pub label: Option<String>,
    /// `android:permissionGroup`.
    pub group: Option<String>,
    pub protection_levels: Vec<String>,
    pub permission_flags: Vec<String>,
    pub priority: i32,
    pub comment: PermissionComment,
}

impl Permission {
    /// Requestable by any app built against the public SDK.
    #[must_use]
    pub fn is_sdk(&self) -> bool {
        self.comment.is_sdk()
            && !self
                .protection_levels
                .iter()
                .any(|level| PRIVILEGED_PROTECTION_LEVELS.contains(&level.as_str()))
    }
}

/// Everything declared in one framework manifest, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkPermissions {
    pub groups: BTreeMap<String, PermissionGroup>,
    pub permissions: BTreeMap<String, Permission>,
}

impl FrameworkPermissions {
    /// Only the groups and permissions of the public SDK.
    #[must_use]
    pub fn sdk_only(&self) -> Self {
        Self {
            groups: self.groups.iter().filter(|(_, group)| group.is_sdk()).map(|(k, v)| (k.clone(), v.clone())).collect(),
            permissions: self
                .permissions
                .iter()
                .filter(|(_, permission)| permission.is_sdk())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// `<string name="...">` entries of a resource file.
///
/// The whole text content is kept, including that of nested markup such as
/// `<xliff:g>`. A later entry with the same name replaces an earlier one.
pub fn parse_string_resources(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = HashMap::new();
    let mut depth = 0usize;
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event().into_app_err("reading string resources")? {
            Event::Start(element) => {
                if depth == 1
                    && element.local_name().as_ref() == b"string"
                    && let Some(name) = plain_attribute(&element, b"name")?
                {
                    current = Some((name, String::new()));
                }
                depth += 1;
            }
            Event::Empty(element) => {
                if depth == 1
                    && element.local_name().as_ref() == b"string"
                    && let Some(name) = plain_attribute(&element, b"name")?
                {
                    let _ = strings.insert(name, String::new());
                }
            }
            Event::Text(text) => {
                if let Some((_, value)) = current.as_mut() {
                    let decoded = text.unescape().unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&text).into_owned()));
                    value.push_str(&decoded);
                }
            }
            Event::CData(data) => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1
                    && let Some((name, value)) = current.take()
                {
                    let _ = strings.insert(name, value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

/// Read the `<permission-group>` and `<permission>` children of `<manifest>`,
/// resolving `@string/` references through `strings`.
pub fn parse_permission_manifest(xml: &str, strings: &HashMap<String, String>) -> Result<FrameworkPermissions> {
    let mut reader = NsReader::from_str(xml);
    let mut depth = 0usize;
    let mut pending_comment: Option<PermissionComment> = None;
    let mut declared = FrameworkPermissions::default();

    loop {
        let event = reader.read_event().into_app_err("reading permission manifest")?;
        match event {
            Event::Start(ref element) | Event::Empty(ref element) => {
                let is_start = matches!(event, Event::Start(_));
                if depth == 0 && element.local_name().as_ref() != b"manifest" {
                    bail!("document root is <{}>, not <manifest>", String::from_utf8_lossy(element.name().as_ref()));
                }

                if depth == 1 {
                    let comment = pending_comment.take().unwrap_or_default();
                    let kind = element.local_name().as_ref().to_vec();
                    if kind == b"permission" || kind == b"permission-group" {
                        let attributes = android_attributes(&reader, element)?;
                        if let Some(name) = attributes.get("name") {
                            let declaration = Declaration {
                                name,
                                attributes: &attributes,
                                comment,
                                strings,
                            };
                            if kind == b"permission" {
                                let permission = declaration.permission().into_app_err_with(|| format!("reading permission {name}"))?;
                                let _ = declared.permissions.insert(name.clone(), permission);
                            } else {
                                let group = declaration.group().into_app_err_with(|| format!("reading permission group {name}"))?;
                                let _ = declared.groups.insert(name.clone(), group);
                            }
                        }
                    }
                }

                if is_start {
                    depth += 1;
                }
            }
            Event::Comment(text) => {
                if depth == 1 {
                    pending_comment = Some(PermissionComment::from_comment(&String::from_utf8_lossy(&text)));
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(declared)
}

/// Attributes of one declaration, with what is needed to resolve them.
struct Declaration<'a> {
    name: &'a str,
    attributes: &'a HashMap<String, String>,
    comment: PermissionComment,
    strings: &'a HashMap<String, String>,
}

impl Declaration<'_> {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn text(&self, key: &str) -> Result<Option<String>> {
        self.attribute(key).map(|raw| resolve_text(raw, self.strings)).transpose()
    }

    fn priority(&self) -> Result<i32> {
        self.attribute("priority").map_or(Ok(0), |raw| {
            raw.trim()
                .parse::<i32>()
                .into_app_err_with(|| format!("invalid android:priority '{raw}'"))
        })
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.attribute(key)
            .map(|raw| raw.split('|').map(str::to_owned).collect())
            .unwrap_or_default()
    }

    fn group(&self) -> Result<PermissionGroup> {
        Ok(PermissionGroup {
            name: self.name.to_owned(),
            description: self.text("description")?,
            label: self.text("label")?,
            priority: self.priority()?,
            comment: self.comment,
        })
    }

    fn permission(&self) -> Result<Permission> {
        Ok(Permission {
            name: self.name.to_owned(),
            description: self.text("description")?,
            label: self.text("label")?,
            group: self.attribute("permissionGroup").map(str::to_owned),
            protection_levels: self.list("protectionLevel"),
            permission_flags: self.list("permissionFlags"),
            priority: self.priority()?,
            comment: self.comment,
        })
    }
}

/// Look up `@string/` references and tidy the text for display.
fn resolve_text(raw: &str, strings: &HashMap<String, String>) -> Result<String> {
    let Some(reference) = raw.strip_prefix('@') else {
        return Ok(clean_text(raw));
    };

    let key = reference
        .strip_prefix("android:")
        .unwrap_or(reference)
        .strip_prefix("string/")
        .ok_or_else(|| app_err!("unsupported resource reference '{raw}'"))?;
    let text = strings.get(key).ok_or_else(|| app_err!("unknown string resource '{raw}'"))?;
    Ok(clean_text(text))
}

/// Trim every line, decode HTML entities and backslash escapes, and collapse whitespace.
fn clean_text(text: &str) -> String {
    let joined = text.lines().map(str::trim).filter(|line| !line.is_empty()).collect::<Vec<_>>().join("\n");
    let unescaped = quick_xml::escape::unescape(&joined).unwrap_or(Cow::Borrowed(joined.as_str()));
    decode_escapes(&unescaped).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve the backslash escapes of Android string resources.
fn decode_escapes(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => decoded.push('\n'),
            Some('t') => decoded.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => decoded.push(ch),
                    None => {
                        decoded.push_str("\\u");
                        decoded.push_str(&hex);
                    }
                }
            }
            Some(other) => decoded.push(other),
            None => decoded.push('\\'),
        }
    }

    decoded
}
