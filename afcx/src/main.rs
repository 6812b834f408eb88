use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::RemoteFileService;
use common::path::ContainerPath;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "afcx",
    version,
    about = "Bulk file transfer to and from a device's file service",
    long_about = "`afcx` pulls and pushes files and whole folders to and from a device's file service.

The device file system is served from a local directory (a mounted device or a simulator data
directory) given with --device-root. Application containers can be addressed with
`@<bundle-id>[:documents]/<path>` once --containers-root points at the directory holding one
sub-directory per bundle identifier.

EXAMPLES:
    # Pull a folder as a zip archive
    afcx --device-root /mnt/device pull-folder Documents --output documents.zip

    # Push a folder, up to 8 files at a time
    afcx --device-root /mnt/device push-folder ./build/assets Media/assets --parallel

    # Read a file from an application's documents container
    afcx --device-root /mnt/device --containers-root /mnt/containers pull-file @com.example.app:documents/log.txt"
)]
struct Args {
    /// Local directory serving as the device's file system root
    #[arg(long, value_name = "DIR")]
    device_root: PathBuf,

    /// Directory holding application containers, one sub-directory per bundle identifier
    #[arg(long, value_name = "DIR")]
    containers_root: Option<PathBuf>,

    // Transfer options
    /// Maximum number of file transfers outstanding at the same time
    #[arg(
        long,
        default_value = "8",
        value_name = "N",
        help_heading = "Transfer options"
    )]
    max_width: usize,

    /// Ceiling for a single pulled file
    ///
    /// This option accepts a human readable duration, e.g. "30s", "4min" etc.
    #[arg(
        long,
        default_value = "4min",
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        help_heading = "Transfer options"
    )]
    io_timeout: Duration,

    /// Directory for temporary pull mirrors (default: system temp dir)
    #[arg(long, value_name = "DIR", help_heading = "Transfer options")]
    scratch_dir: Option<PathBuf>,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Sets the delay between progress updates, the default is 10s
    ///
    /// If specified, --progress flag is implied.
    ///
    /// This option accepts a human readable duration, e.g. "200ms", "10s", "5min" etc.
    #[arg(long, value_name = "DELAY", value_parser = humantime::parse_duration, help_heading = "Progress & output")]
    progress_delay: Option<Duration>,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Read a single remote file
    PullFile {
        /// Remote file path
        remote: String,
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Pull a remote folder as a zip archive
    PullFolder {
        /// Remote folder path
        remote: String,
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Emit the archive base64-encoded
        #[arg(long)]
        base64: bool,
    },
    /// Write a single local file to the device, creating missing parent folders
    PushFile {
        /// Local file
        local: PathBuf,
        /// Remote file path
        remote: String,
        /// Ceiling for the transfer (never less than 1min)
        #[arg(long, default_value = "4min", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },
    /// Replace a remote folder with the contents of a local folder
    PushFolder {
        /// Local folder
        local: PathBuf,
        /// Remote folder path, deleted before the push
        remote: String,
        /// Budget for the whole folder
        #[arg(long, default_value = "4min", value_parser = humantime::parse_duration)]
        timeout: Duration,
        /// Push up to --max-width files at a time
        #[arg(long)]
        parallel: bool,
    },
    /// Stage an application bundle for installation
    Stage {
        /// Bundle file or unpacked bundle folder
        app: PathBuf,
        /// Bundle identifier
        bundle_id: String,
        /// Budget for the whole bundle
        #[arg(long, default_value = "4min", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },
    /// Delete a remote file or folder
    Delete {
        /// Remote path
        remote: String,
    },
}

/// What a subcommand did, printed with --summary
#[derive(Debug)]
enum Report {
    Pulled(usize),
    PulledFolder(common::pull::Summary),
    Pushed(common::push::Summary),
    Staged(String),
    Deleted(String),
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Report::Pulled(bytes) => write!(f, "bytes pulled: {bytes}"),
            Report::PulledFolder(summary) => write!(f, "{summary}"),
            Report::Pushed(summary) => write!(f, "{summary}"),
            Report::Staged(remote) => write!(f, "staged at: {remote}"),
            Report::Deleted(remote) => write!(f, "deleted: {remote}"),
        }
    }
}

/// Picks the service for `remote` and the path to use with it.
fn open_service(args: &Args, remote: &str) -> Result<(Arc<dyn RemoteFileService>, String)> {
    if ContainerPath::is_container_path(remote) {
        let container = ContainerPath::parse(remote)?;
        let containers_root = args.containers_root.as_ref().ok_or_else(|| {
            anyhow!("--containers-root is required to access the container path '{remote}'")
        })?;
        let service: Arc<dyn RemoteFileService> = Arc::new(common::LocalRootService::new(
            containers_root.join(&container.bundle_id),
        ));
        let remote_path = container.resolve_under(&container_root_of(&container))?;
        return Ok((service, remote_path));
    }
    let service: Arc<dyn RemoteFileService> =
        Arc::new(common::LocalRootService::new(&args.device_root));
    Ok((service, remote.to_string()))
}

fn container_root_of(container: &ContainerPath) -> String {
    // the service path of an empty path is the root of the selected container
    ContainerPath {
        path_in_container: String::new(),
        ..container.clone()
    }
    .service_path()
}

async fn emit(output: Option<&PathBuf>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("cannot write {path:?}")),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(bytes).await?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

#[instrument(skip(args))]
async fn async_main(args: Args) -> Result<Report> {
    let prog_track = common::get_progress();
    let settings = common::TransferSettings {
        max_width: args.max_width,
        io_timeout: args.io_timeout,
        scratch_dir: args.scratch_dir.clone(),
        ..Default::default()
    };
    let report = match &args.command {
        Command::PullFile { remote, output } => {
            let (service, remote_path) = open_service(&args, remote)?;
            let bytes =
                common::pull_file(prog_track, service.as_ref(), &remote_path, &settings).await?;
            emit(output.as_ref(), &bytes).await?;
            Report::Pulled(bytes.len())
        }
        Command::PullFolder {
            remote,
            output,
            base64,
        } => {
            let (service, remote_path) = open_service(&args, remote)?;
            let pulled = common::pull_folder(prog_track, service, &remote_path, &settings).await?;
            if *base64 {
                emit(output.as_ref(), pulled.to_base64().as_bytes()).await?;
            } else {
                emit(output.as_ref(), &pulled.archive).await?;
            }
            Report::PulledFolder(pulled.summary)
        }
        Command::PushFile {
            local,
            remote,
            timeout,
        } => {
            let (service, remote_path) = open_service(&args, remote)?;
            let summary = common::push_file(
                prog_track,
                service.as_ref(),
                common::push::ByteSource::LocalFile(local.clone()),
                &remote_path,
                &common::PushFileOptions { timeout: *timeout },
                &settings,
            )
            .await?;
            Report::Pushed(summary)
        }
        Command::PushFolder {
            local,
            remote,
            timeout,
            parallel,
        } => {
            let (service, remote_path) = open_service(&args, remote)?;
            let summary = common::push_folder(
                prog_track,
                service,
                local,
                &remote_path,
                &common::PushFolderOptions {
                    timeout: *timeout,
                    enable_parallel_push: *parallel,
                },
                &settings,
            )
            .await?;
            Report::Pushed(summary)
        }
        Command::Stage {
            app,
            bundle_id,
            timeout,
        } => {
            let service: Arc<dyn RemoteFileService> =
                Arc::new(common::LocalRootService::new(&args.device_root));
            let staging = common::stage::SharedRoot::new(common::stage::INSTALLATION_STAGING_DIR);
            let remote = common::stage_bundle(
                prog_track,
                service,
                app,
                bundle_id,
                &staging,
                *timeout,
                &settings,
            )
            .await?;
            Report::Staged(remote)
        }
        Command::Delete { remote } => {
            let (service, remote_path) = open_service(&args, remote)?;
            common::delete_path(service.as_ref(), &remote_path).await?;
            Report::Deleted(remote_path)
        }
    };
    Ok(report)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let progress = if args.progress || args.progress_delay.is_some() {
        Some(common::ProgressSettings {
            delay: args.progress_delay.unwrap_or(Duration::from_secs(10)),
        })
    } else {
        None
    };
    let res = common::run(progress, output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
