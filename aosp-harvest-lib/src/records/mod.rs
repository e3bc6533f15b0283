//! Records produced from crawled documents.

mod content_provider;
mod permission;

pub use content_provider::{ANDROID_NAMESPACE, ContentProvider, ProviderManifestParser, UriPermission, permission_providers};
pub use permission::{FrameworkPermissions, Permission, PermissionComment, PermissionGroup, parse_permission_manifest, parse_string_resources};
