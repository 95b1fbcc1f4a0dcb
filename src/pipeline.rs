use crate::report::ReportError;
use crate::tool::{InvokeError, PayloadExtractor};
use safe_extract::UnpackError;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_NESTED_CONTAINER: &str = "assets/main.obb.png";
pub const DEFAULT_NESTED_DESTINATION: &str = "assets/main.obb";

#[derive(Debug, Clone, Copy, Eq, PartialEq, strum::Display)]
pub enum Layer {
    #[strum(to_string = "outer container")]
    OuterContainer,
    #[strum(to_string = "nested container")]
    NestedContainer,
    #[strum(to_string = "pak payload")]
    PakPayload,
    #[strum(to_string = "ucas payload")]
    UcasPayload,
}

/// How a run ended up failing, independent of which component reported it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum::Display)]
pub enum ErrorKind {
    PathTraversal,
    IoFailure,
    Timeout,
    ToolFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{name} {value:?} must be a relative path that stays inside the archive")]
    InvalidRelativePath { name: &'static str, value: String },
    #[error("failed to create working directory")]
    WorkingDirectory(#[source] io::Error),
    #[error("failed to unpack {layer}")]
    Unpack {
        layer: Layer,
        #[source]
        source: UnpackError,
    },
    #[error("failed to extract {layer} {}", .path.display())]
    Tool {
        layer: Layer,
        path: PathBuf,
        #[source]
        source: InvokeError,
    },
    #[error("I/O error at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Unpack {
                source: UnpackError::PathTraversal { .. },
                ..
            }
            | PipelineError::InvalidRelativePath { .. } => ErrorKind::PathTraversal,
            PipelineError::Tool {
                source: InvokeError::Timeout { .. },
                ..
            } => ErrorKind::Timeout,
            PipelineError::Tool {
                source: InvokeError::ToolFailure { .. },
                ..
            } => ErrorKind::ToolFailure,
            _ => ErrorKind::IoFailure,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ExtractionOutcome {
    Success,
    Failure(String),
    Timeout,
}

impl From<&InvokeError> for ExtractionOutcome {
    fn from(error: &InvokeError) -> Self {
        match error {
            InvokeError::Timeout { .. } => ExtractionOutcome::Timeout,
            other => ExtractionOutcome::Failure(other.to_string()),
        }
    }
}

impl Display for ExtractionOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionOutcome::Success => write!(f, "success"),
            ExtractionOutcome::Failure(cause) => write!(f, "failure: {cause}"),
            ExtractionOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LayerOutcome {
    pub layer: Layer,
    pub outcome: ExtractionOutcome,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum FailurePolicy {
    Fatal,
    // The tool has been seen failing right at the end of an otherwise complete
    // extraction of this payload.
    Tolerated,
}

struct ResourcePayload {
    layer: Layer,
    extension: &'static str,
    marker: &'static str,
    policy: FailurePolicy,
}

const RESOURCE_PAYLOADS: [ResourcePayload; 2] = [
    ResourcePayload {
        layer: Layer::PakPayload,
        extension: ".pak",
        marker: "_pak",
        policy: FailurePolicy::Fatal,
    },
    ResourcePayload {
        layer: Layer::UcasPayload,
        extension: ".ucas",
        marker: "_ucas",
        policy: FailurePolicy::Tolerated,
    },
];

impl ResourcePayload {
    fn source(&self, workdir: &WorkingDirectory, base: &str) -> PathBuf {
        workdir.join(&format!("{base}{}", self.extension))
    }

    /// `<dir>/<name>.<ext>` becomes `<dir>/<name><marker>`.
    fn destination(&self, source: &Path) -> PathBuf {
        let mut name = source.with_extension("").into_os_string();
        name.push(self.marker);
        PathBuf::from(name)
    }
}

/// Relative locations inside the archive, plus the archive itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub archive: PathBuf,
    pub resource_base: String,
    pub nested_container: String,
    pub nested_destination: String,
}

impl Display for PipelineConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PipelineConfig(archive={}, resource_base={}, nested_container={}, nested_destination={})",
            self.archive.display(),
            self.resource_base,
            self.nested_container,
            self.nested_destination
        )
    }
}

impl PipelineConfig {
    pub fn new(archive: impl Into<PathBuf>, resource_base: impl Into<String>) -> Self {
        Self {
            archive: archive.into(),
            resource_base: resource_base.into(),
            nested_container: DEFAULT_NESTED_CONTAINER.to_string(),
            nested_destination: DEFAULT_NESTED_DESTINATION.to_string(),
        }
    }

    pub fn with_nested_container(mut self, path: impl Into<String>) -> Self {
        self.nested_container = path.into();
        self
    }

    pub fn with_nested_destination(mut self, path: impl Into<String>) -> Self {
        self.nested_destination = path.into();
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        check_relative("resource base", &self.resource_base)?;
        check_relative("nested container", &self.nested_container)?;
        check_relative("nested destination", &self.nested_destination)
    }
}

fn check_relative(name: &'static str, value: &str) -> Result<(), PipelineError> {
    let path = Path::new(value);
    let valid = !value.starts_with('/')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path
            .components()
            .any(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidRelativePath {
            name,
            value: value.to_string(),
        })
    }
}

/// The staging root every layer is extracted under. Never removed implicitly,
/// so a failed run can still be inspected.
#[derive(Debug)]
pub struct WorkingDirectory {
    path: PathBuf,
}

impl WorkingDirectory {
    /// Create a fresh, uniquely named directory in the system temp dir.
    pub fn create(archive: &Path) -> Result<Self, PipelineError> {
        let prefix = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir()
            .map_err(PipelineError::WorkingDirectory)?;
        Ok(Self::new(dir.keep()))
    }

    /// Use an existing directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }

    pub fn remove(self) -> Result<(), PipelineError> {
        fs::remove_dir_all(&self.path).map_err(|source| PipelineError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Display for WorkingDirectory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Everything the orchestrator leaves behind for the reporter.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub workdir: WorkingDirectory,
    pub layers: Vec<LayerOutcome>,
    pub warnings: Vec<String>,
}

/// Drives the layered extraction: outer container, nested container, then one
/// external tool run per resource payload.
#[derive(Debug)]
pub struct Pipeline<'a, E: PayloadExtractor> {
    config: &'a PipelineConfig,
    extractor: &'a E,
}

impl<'a, E: PayloadExtractor> Pipeline<'a, E> {
    pub fn new(config: &'a PipelineConfig, extractor: &'a E) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config, extractor })
    }

    pub fn run(&self) -> Result<PipelineOutcome, PipelineError> {
        let workdir = WorkingDirectory::create(&self.config.archive)?;
        info!(%workdir, "created working directory");
        self.run_in(workdir)
    }

    #[tracing::instrument(skip_all, fields(archive = %self.config.archive.display(), %workdir))]
    pub fn run_in(&self, workdir: WorkingDirectory) -> Result<PipelineOutcome, PipelineError> {
        let mut layers = vec![];
        let mut warnings = vec![];

        self.unpack_layer(Layer::OuterContainer, workdir.path(), &self.config.archive)?;
        layers.push(LayerOutcome {
            layer: Layer::OuterContainer,
            outcome: ExtractionOutcome::Success,
        });

        let nested_source = workdir.join(&self.config.nested_container);
        let nested_destination = workdir.join(&self.config.nested_destination);
        self.unpack_layer(Layer::NestedContainer, &nested_destination, &nested_source)?;
        remove_payload(&nested_source)?;
        layers.push(LayerOutcome {
            layer: Layer::NestedContainer,
            outcome: ExtractionOutcome::Success,
        });

        for payload in &RESOURCE_PAYLOADS {
            let source = payload.source(&workdir, &self.config.resource_base);
            let destination = payload.destination(&source);
            let outcome = match self.extractor.extract(&source, &destination) {
                Ok(output) => {
                    info!(layer = %payload.layer, elapsed = ?output.elapsed, "extracted payload");
                    debug!(stdout = %output.stdout, stderr = %output.stderr, "tool output");
                    ExtractionOutcome::Success
                }
                Err(source_error) if payload.policy == FailurePolicy::Fatal => {
                    return Err(PipelineError::Tool {
                        layer: payload.layer,
                        path: source,
                        source: source_error,
                    });
                }
                Err(error) => {
                    let message = format!(
                        "{} extraction of {} failed, continuing with what was extracted: {error}",
                        payload.layer,
                        source.display()
                    );
                    warn!("{message}");
                    warnings.push(message);
                    ExtractionOutcome::from(&error)
                }
            };
            remove_payload(&source)?;
            layers.push(LayerOutcome {
                layer: payload.layer,
                outcome,
            });
        }

        Ok(PipelineOutcome {
            workdir,
            layers,
            warnings,
        })
    }

    fn unpack_layer(
        &self,
        layer: Layer,
        destination: &Path,
        source: &Path,
    ) -> Result<(), PipelineError> {
        info!(%layer, source = %source.display(), "unpacking");
        safe_extract::unpack(destination, source)
            .map(|summary| debug!(%layer, %summary, "unpacked"))
            .map_err(|source| PipelineError::Unpack { layer, source })
    }
}

fn remove_payload(path: &Path) -> Result<(), PipelineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "payload already gone");
            Ok(())
        }
        Err(source) => Err(PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
