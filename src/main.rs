use anyhow::Context;
use apk_size_report::{
    ExternalTool, PipelineConfig, ReportFile, ReportSinks, DEFAULT_NESTED_CONTAINER,
    DEFAULT_NESTED_DESTINATION,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// External extraction tool executable, run as `<tool> <payload> -extract <dir>`
    tool: PathBuf,
    /// Application archive to analyze
    archive: PathBuf,
    /// Resource payload path inside the archive, without extension.
    /// e.g. assets/main.obb/Game/Content/Paks/Game-Android_ASTC
    resource_base: String,
    /// Report file to write, in addition to stdout
    #[clap(short, long, default_value = "size-report.txt")]
    output: PathBuf,
    /// Seconds to wait for each external tool run
    #[clap(long, default_value_t = 60, value_name = "SECONDS")]
    timeout: u64,
    /// Nested container inside the outer archive
    #[clap(long, default_value = DEFAULT_NESTED_CONTAINER)]
    nested_container: String,
    /// Where the nested container is unpacked to
    #[clap(long, default_value = DEFAULT_NESTED_DESTINATION)]
    nested_destination: String,
    /// Remove the working directory after a successful run.
    /// It is always kept when the run fails.
    #[clap(long)]
    cleanup: bool,
}

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()?;
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_file(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();

    let args = Args::parse();

    let archive = std::path::absolute(&args.archive)
        .with_context(|| format!("Invalid archive path {}", args.archive.display()))?;
    let config = PipelineConfig::new(archive, args.resource_base)
        .with_nested_container(args.nested_container)
        .with_nested_destination(args.nested_destination);
    let tool = ExternalTool::new(args.tool).with_deadline(Duration::from_secs(args.timeout));
    info!(%config, %tool, "Starting");

    let report_file = ReportFile::new(&args.output)?;
    let report_path = report_file.path().to_path_buf();
    let mut sinks = ReportSinks::new()
        .with_sink("stdout", std::io::stdout())
        .with_sink(report_path.display().to_string(), report_file);

    let summary = apk_size_report::run(&config, &tool, &mut sinks)
        .with_context(|| format!("Size report for {} failed", config.archive.display()))?;
    drop(sinks);

    if args.cleanup {
        info!(workdir = %summary.outcome.workdir, "Removing working directory");
        summary.outcome.workdir.remove()?;
    } else {
        info!(workdir = %summary.outcome.workdir, "Working directory kept");
    }

    println!("Size report file created at {}", report_path.display());
    Ok(())
}
