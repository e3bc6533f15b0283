//! Recovery of an app's package name from its Gradle build file.
//!
//! Many manifests in the tree leave the package to the build system. For
//! those, the `applicationId` assignment in a sibling `build.gradle` or
//! `build.gradle.kts` names the owner instead.

use super::path_utils::parent;
use regex::Regex;
use std::sync::LazyLock;

static APPLICATION_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"applicationId\s*(?:=\s*)?(?:"([^"]*)"|'([^']*)')"#).expect("invalid regex"));

/// Build files searched for an `applicationId`, in order.
pub const BUILD_DESCRIPTORS: [&str; 2] = ["build.gradle", "build.gradle.kts"];

/// Directory levels between a module root and its manifest (`src/main/AndroidManifest.xml`).
const MANIFEST_DEPTH: usize = 3;

/// Candidate build files for the manifest at `manifest_path`.
///
/// `/app/src/main/AndroidManifest.xml` yields `/app/build.gradle` and `/app/build.gradle.kts`.
#[must_use]
pub fn build_descriptor_paths(manifest_path: &str) -> Vec<String> {
    let module = (0..MANIFEST_DEPTH).fold(manifest_path, |path, _| parent(path));
    BUILD_DESCRIPTORS.iter().map(|name| format!("{module}/{name}")).collect()
}

/// The first `applicationId` value in a Groovy or Kotlin build script.
#[must_use]
pub fn application_id(build_script: &str) -> Option<&str> {
    let caps = APPLICATION_ID_REGEX.captures(build_script)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}
