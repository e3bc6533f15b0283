use super::Host;
use super::common::{Common, CommonArgs};
use crate::Result;
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Code search query, in cs.android.com syntax
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Only search below this path
    #[arg(long, value_name = "PATH")]
    pub path_prefix: Option<String>,
}

/// Run a search and print one `repository path` line per result.
pub async fn search_files<H: Host>(host: &mut H, args: &SearchArgs) -> Result<()> {
    let common = Common::new(&args.common).await?;
    let tracker = common.tracker();

    let mut query = common.query(&args.query);
    if let Some(prefix) = &args.path_prefix {
        query = query.with_path_prefix(prefix.as_str());
    }

    common.progress.set_phase("Searching");
    let located = common.search_client().query_all(&query, &tracker).await;
    common.progress.done();

    let mut output = host.output();
    for location in located? {
        let _ = writeln!(output, "{} {}", location.repository(), location.relative_path());
    }
    Ok(())
}
