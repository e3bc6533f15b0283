use super::Host;
use super::common::{Common, CommonArgs, write_json};
use crate::Result;
use crate::versions::{ApiLevel, BuildVersion};
use camino::Utf8PathBuf;
use clap::Parser;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct VersionsArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Directory receiving `api_levels.json` and `build_versions.json`
    #[arg(long, short = 'o', value_name = "PATH", default_value = ".")]
    pub output_dir: Utf8PathBuf,
}

/// Builds keyed by tag, oldest first.
struct BuildsByTag<'a>(&'a [BuildVersion]);

impl Serialize for BuildsByTag<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|build| (build.tag.tag.as_str(), build)))
    }
}

/// Write the published API levels and build tags as JSON.
pub async fn dump_versions<H: Host>(host: &mut H, args: &VersionsArgs) -> Result<()> {
    let common = Common::new(&args.common).await?;

    common.progress.set_phase("Loading versions");
    let page = common.build_numbers().get().await;
    common.progress.done();
    let page = page?;

    let api_levels: BTreeMap<u32, &ApiLevel> = page.api_levels.iter().map(|level| (level.api, level)).collect();
    write_json(&args.output_dir.join("api_levels.json"), &api_levels)?;
    write_json(&args.output_dir.join("build_versions.json"), &BuildsByTag(&page.builds))?;

    let _ = writeln!(
        host.output(),
        "Wrote {} API levels and {} builds to {}",
        api_levels.len(),
        page.builds.len(),
        args.output_dir
    );
    Ok(())
}
