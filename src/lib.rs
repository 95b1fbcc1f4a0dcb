//! Unpack a layered application archive and report which files take up space.
//!
//! The archive is expanded in stages: the outer zip, the zip nested inside it,
//! and finally the resource payloads that only an external tool can decode. The
//! fully expanded tree is then measured by [SizeReport].

mod pipeline;
mod report;
mod tool;


pub use pipeline::*;
pub use report::*;
pub use safe_extract::{UnpackError, UnpackSummary};
pub use tool::*;

/// A finished run: where things were extracted, and what was measured there.
#[derive(Debug)]
pub struct RunSummary {
    pub outcome: PipelineOutcome,
    pub report: SizeReport,
}

/// Extract into a fresh working directory, then report to every sink.
pub fn run<E: PayloadExtractor>(
    config: &PipelineConfig,
    extractor: &E,
    sinks: &mut ReportSinks,
) -> Result<RunSummary, PipelineError> {
    let outcome = Pipeline::new(config, extractor)?.run()?;
    write_report(config, outcome, sinks)
}

/// Same as [run], but extracts into an existing directory.
pub fn run_in<E: PayloadExtractor>(
    workdir: WorkingDirectory,
    config: &PipelineConfig,
    extractor: &E,
    sinks: &mut ReportSinks,
) -> Result<RunSummary, PipelineError> {
    let outcome = Pipeline::new(config, extractor)?.run_in(workdir)?;
    write_report(config, outcome, sinks)
}

fn write_report(
    config: &PipelineConfig,
    outcome: PipelineOutcome,
    sinks: &mut ReportSinks,
) -> Result<RunSummary, PipelineError> {
    let report = SizeReport::from_directory(outcome.workdir.path())?;
    tracing::info!(
        files = report.files().len(),
        total = %format_iec(report.total_size()),
        %sinks,
        "writing report"
    );
    sinks.write_report(&report.render(&config.archive, &outcome.warnings))?;
    Ok(RunSummary { outcome, report })
}
