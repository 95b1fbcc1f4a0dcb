mod output;

pub use output::*;

use byte_unit::{Byte, UnitType};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to walk extracted tree")]
    Walk(#[from] walkdir::Error),
    #[error("failed to write report to {name}")]
    Sink {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid report file path {}", .path.display())]
    ReportPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A regular file found in the expanded tree.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArchiveFile {
    pub full_path: PathBuf,
    pub size: u64,
}

impl ArchiveFile {
    pub fn new(full_path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            full_path: full_path.into(),
            size,
        }
    }

    /// Everything from the last `.` of the file name, or an empty string.
    pub fn extension(&self) -> String {
        let Some(name) = self.full_path.file_name() else {
            return String::new();
        };
        let name = name.to_string_lossy();
        match name.rfind('.') {
            Some(idx) => name[idx..].to_string(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExtensionTotal {
    pub extension: String,
    pub size: u64,
}

/// Per-file and per-extension sizes of a directory tree, largest first.
#[derive(Debug, Clone)]
pub struct SizeReport {
    root: PathBuf,
    files: Vec<ArchiveFile>,
    extensions: Vec<ExtensionTotal>,
}

impl SizeReport {
    #[tracing::instrument(skip_all, fields(root = %root.display()))]
    pub fn from_directory(root: &Path) -> Result<Self, ReportError> {
        let mut files = vec![];
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata()?.len();
            files.push(ArchiveFile::new(entry.into_path(), size));
        }
        debug!(files = files.len(), "walked tree");
        Ok(Self::from_files(root, files))
    }

    /// Build a report from files in encounter order. Ties keep that order.
    pub fn from_files(root: impl Into<PathBuf>, mut files: Vec<ArchiveFile>) -> Self {
        let mut extensions: Vec<ExtensionTotal> = vec![];
        let mut index: HashMap<String, usize> = HashMap::new();
        for file in &files {
            let extension = file.extension();
            match index.get(&extension) {
                Some(&idx) => extensions[idx].size += file.size,
                None => {
                    index.insert(extension.clone(), extensions.len());
                    extensions.push(ExtensionTotal {
                        extension,
                        size: file.size,
                    });
                }
            }
        }

        files.sort_by(|a, b| b.size.cmp(&a.size));
        extensions.sort_by(|a, b| b.size.cmp(&a.size));
        Self {
            root: root.into(),
            files,
            extensions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[ArchiveFile] {
        &self.files
    }

    pub fn extensions(&self) -> &[ExtensionTotal] {
        &self.extensions
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn relative_path<'a>(&self, file: &'a ArchiveFile) -> &'a Path {
        file.full_path
            .strip_prefix(&self.root)
            .unwrap_or(&file.full_path)
    }

    pub fn display<'a>(&'a self, source: &'a Path, warnings: &'a [String]) -> RenderedReport<'a> {
        RenderedReport {
            report: self,
            source,
            warnings,
        }
    }

    pub fn render(&self, source: &Path, warnings: &[String]) -> String {
        self.display(source, warnings).to_string()
    }
}

/// The text form of a [SizeReport], as written to every sink.
#[derive(Debug)]
pub struct RenderedReport<'a> {
    report: &'a SizeReport,
    source: &'a Path,
    warnings: &'a [String],
}

impl Display for RenderedReport<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Size report for file {}", self.source.display())?;

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "==== Warnings ====")?;
            for warning in self.warnings {
                writeln!(f, "{warning}")?;
            }
        }

        writeln!(f)?;
        writeln!(f, "==== Size by extensions ====")?;
        for total in self.report.extensions() {
            writeln!(f, "{:>10}\t{}", format_iec(total.size), total.extension)?;
        }

        writeln!(f)?;
        writeln!(f, "==== Size by files ====")?;
        for file in self.report.files() {
            writeln!(
                f,
                "{:>10}\t{}",
                format_iec(file.size),
                self.report.relative_path(file).display()
            )?;
        }
        Ok(())
    }
}

/// Format a byte count with binary units: `1023 B`, `1.5 KiB`, `1.0 GiB`.
pub fn format_iec(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{:.1} {}", adjusted.get_value(), adjusted.get_unit())
}
