use super::Host;
use super::common::{Common, CommonArgs, write_json};
use crate::Result;
use crate::records::{ProviderManifestParser, permission_providers};
use camino::Utf8PathBuf;
use clap::Parser;
use std::io::Write;

const LOG_TARGET: &str = " providers";

#[derive(Parser, Debug)]
pub struct ProvidersArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Ref at which manifests are read
    #[arg(long, value_name = "REF", default_value = "refs/heads/main")]
    pub reference: String,

    /// Directory receiving `providers/all_providers.json` and `providers/permission_providers.json`
    #[arg(long, short = 'o', value_name = "PATH", default_value = ".")]
    pub output_dir: Utf8PathBuf,

    /// Search query to use instead of the configured `provider_query`
    #[arg(long, value_name = "QUERY")]
    pub query: Option<String>,
}

/// Find manifests declaring content providers, crawl them and write the provider lists.
pub async fn dump_providers<H: Host>(host: &mut H, args: &ProvidersArgs) -> Result<()> {
    let common = Common::new(&args.common).await?;
    let tracker = common.tracker();

    let query = common.query(args.query.as_deref().unwrap_or(&common.config.provider_query));

    common.progress.set_phase("Searching");
    let located = common.search_client().query_all(&query, &tracker).await;

    let crawled = match located {
        Ok(locations) => {
            log::info!(target: LOG_TARGET, "Crawling {} manifests at {}", locations.len(), args.reference);
            common.progress.set_phase("Crawling");
            common
                .orchestrator(ProviderManifestParser)
                .crawl_all(&locations, &args.reference, common.use_cache(), &tracker)
                .await
        }
        Err(e) => Err(e),
    };
    common.progress.done();
    let providers = crawled?;

    let dir = args.output_dir.join("providers");
    let guarded = permission_providers(&providers);
    write_json(&dir.join("all_providers.json"), &providers)?;
    write_json(&dir.join("permission_providers.json"), &guarded)?;

    let _ = writeln!(
        host.output(),
        "Wrote {} providers ({} guarded by permissions) to {dir}",
        providers.len(),
        guarded.len()
    );
    Ok(())
}
