//! Common utilities and types for bulk transfers to and from a device's file service
//!
//! This crate provides the engines behind the `afcx` tool: pulling single files and whole folders
//! from a remote file service, pushing files and folders to it, and staging application bundles
//! for installation.
//!
//! # Core Modules
//!
//! - [`service`] - The [`RemoteFileService`] abstraction the engines are driven against
//! - [`local`] - A file service rooted at a local directory
//! - [`plan`] - Traversal order of folder pushes (directories parents-first, files largest-first)
//! - [`pull`] - Pulling single files and mirroring folders into zip archives
//! - [`push`] - Pushing single files and folders under a shared time budget
//! - [`rm`] - Deleting remote files and folders
//! - [`stage`] - Staging application bundles before installation
//! - [`path`] - Container paths like `@com.example.app:documents/file.txt`
//!
//! # Concurrency
//!
//! Folder transfers keep at most [`config::MAX_IO_WIDTH`] file transfers outstanding, see
//! [`throttle::Window`]. Folder pushes share one deadline, see [`throttle::Budget`].
//!
//! # Progress
//!
//! Counters are collected in a process-wide [`progress::Progress`] instance, available through
//! [`get_progress`], and can be printed periodically by [`run`].

pub mod archive;
pub mod config;
pub mod error;
pub mod item;
pub mod local;
pub mod mirror;
pub mod path;
pub mod plan;
pub mod progress;
pub mod pull;
pub mod push;
pub mod rm;
pub mod service;
pub mod stage;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, PushFileOptions, PushFolderOptions, RuntimeConfig, TransferSettings};
pub use error::Error;
pub use local::LocalRootService;
pub use pull::{pull_file, pull_folder};
pub use push::{push_file, push_folder};
pub use rm::delete_path;
pub use service::{RemoteFileService, ServiceError};
pub use stage::stage_bundle;

static PROGRESS: std::sync::LazyLock<progress::Progress> =
    std::sync::LazyLock::new(progress::Progress::new);

#[must_use]
pub fn get_progress() -> &'static progress::Progress {
    &PROGRESS
}

/// Settings of the periodic progress report
#[derive(Debug, Clone, Copy)]
pub struct ProgressSettings {
    pub delay: std::time::Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_secs(10),
        }
    }
}

async fn print_progress(settings: ProgressSettings) {
    let mut printer = progress::ProgressPrinter::new(get_progress());
    let mut interval = tokio::time::interval(settings.delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        eprintln!("{}", printer.print());
    }
}

fn init_tracing(output: &OutputConfig) {
    let level = if output.quiet {
        "off"
    } else {
        match output.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // stdout carries pulled data, so logs go to stderr
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("failed to initialize logging: {error}");
    }
}

/// Sets up logging and the tokio runtime, then runs `func` to completion.
///
/// Returns `None` if the runtime could not be built or `func` failed; errors are logged unless
/// `output.quiet` is set. The summary is printed to stdout when requested.
pub fn run<Fut, Summary, Error>(
    progress: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let tokio_runtime = match builder.build() {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            tracing::error!("failed to build the tokio runtime: {}", error);
            if !output.quiet {
                eprintln!("failed to build the tokio runtime: {error}");
            }
            return None;
        }
    };
    let res = tokio_runtime.block_on(async {
        let printer = progress.map(|settings| tokio::spawn(print_progress(settings)));
        let res = func().await;
        if let Some(printer) = printer {
            printer.abort();
        }
        res
    });
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
