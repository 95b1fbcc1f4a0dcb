use crate::report::ReportError;
use std::fmt::{Debug, Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait OutputSink: Write + Send + Debug {}
impl<T> OutputSink for T where T: Write + Send + Debug {}

/// The report file on disk. Remembers its absolute path for the final message.
///
/// The file is only created on the first write, so a run that fails before
/// reporting leaves any previous report untouched.
#[derive(Debug)]
pub struct ReportFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl ReportFile {
    pub fn new(path: &Path) -> Result<Self, ReportError> {
        let path = std::path::absolute(path).map_err(|source| ReportError::ReportPath {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { path, writer: None })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                debug!(path = %self.path.display(), "creating report file");
                BufWriter::new(File::create(&self.path)?)
            }
        };
        Ok(self.writer.insert(writer))
    }
}

impl Write for ReportFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Display for ReportFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReportFile({})", self.path.display())
    }
}

/// Ordered set of writers that all receive the same report bytes.
#[derive(Debug, Default)]
pub struct ReportSinks<'a> {
    sinks: Vec<(String, Box<dyn OutputSink + 'a>)>,
}

impl<'a> ReportSinks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, name: impl Into<String>, sink: impl OutputSink + 'a) -> Self {
        self.push(name, sink);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, sink: impl OutputSink + 'a) {
        self.sinks.push((name.into(), Box::new(sink)));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sinks.iter().map(|(name, _)| name.as_str())
    }

    /// Write `text` verbatim to every sink, in order, flushing each one.
    pub fn write_report(&mut self, text: &str) -> Result<(), ReportError> {
        for (name, sink) in self.sinks.iter_mut() {
            debug!(sink = %name, bytes = text.len(), "writing report");
            sink.write_all(text.as_bytes())
                .and_then(|_| sink.flush())
                .map_err(|source| ReportError::Sink {
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl Display for ReportSinks<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReportSinks(")?;
        for (idx, name) in self.names().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}")?;
        }
        write!(f, ")")
    }
}
