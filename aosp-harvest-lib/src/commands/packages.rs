use super::Host;
use super::common::{Common, CommonArgs};
use crate::Result;
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct PackagesArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Package path or category, such as `platforms` or `build-tools`; everything when omitted
    #[arg(value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Only list packages from this channel id, such as `channel-0`
    #[arg(long, value_name = "CHANNEL")]
    pub channel: Option<String>,
}

/// Print the packages of the SDK repository index.
pub async fn list_packages<H: Host>(host: &mut H, args: &PackagesArgs) -> Result<()> {
    let common = Common::new(&args.common).await?;
    let index = common.repository_index();

    common.progress.set_phase("Indexing");
    let listed = index.list_packages(args.prefix.as_deref()).await;
    let channels = index.channels().await;
    common.progress.done();

    let (packages, channels) = (listed?, channels?);
    let mut output = host.output();

    for package in packages
        .iter()
        .filter(|package| args.channel.is_none() || package.channel == args.channel)
    {
        let channel = package
            .channel
            .as_deref()
            .map_or("-", |id| channels.get(id).map_or(id, String::as_str));
        let _ = writeln!(output, "{:<48} {:>10}  {channel}", package.path, package.revision.to_string());
    }
    Ok(())
}
