use super::Host;
use super::common::{Common, CommonArgs};
use crate::Result;
use crate::repository::{DEFAULT_CHANNEL, HostOs};
use camino::Utf8PathBuf;
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Package path, such as `platforms;android-34`
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Directory receiving the archive; it must already exist
    #[arg(long, short = 'o', value_name = "PATH", default_value = ".")]
    pub dest: Utf8PathBuf,

    /// Channel id to pick the latest revision from
    #[arg(long, value_name = "CHANNEL", default_value = DEFAULT_CHANNEL)]
    pub channel: String,

    /// Pick the archive for this host instead of the current one
    #[arg(long, value_name = "OS")]
    pub host_os: Option<HostOs>,

    /// Download again even when the archive is already present
    #[arg(long)]
    pub force: bool,
}

/// Download the newest archive of a package.
pub async fn download_package<H: Host>(host: &mut H, args: &DownloadArgs) -> Result<()> {
    let common = Common::new(&args.common).await?;
    let index = common.repository_index();

    common.progress.set_phase("Indexing");
    let result = async {
        let package = index.latest_package(&args.package, Some(&args.channel)).await?;
        let archive = index.best_archive_url_for(&package, args.host_os.or_else(HostOs::current))?;

        let local = if args.force {
            index.download_archive(&archive, args.dest.as_std_path()).await?
        } else {
            index.ensure_archive(&archive, args.dest.as_std_path()).await?
        };
        Ok::<_, ohno::AppError>((package, local))
    }
    .await;
    common.progress.done();

    let (package, local) = result?;
    let _ = writeln!(
        host.output(),
        "{} {} -> {}",
        package.path,
        package.revision,
        local.display()
    );
    Ok(())
}
