//! Sorted run files.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use crate::line::{Decoration, Line};
use crate::sort::SortError;

/// A sorted run persisted in the temporary working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFile {
    path: PathBuf,
    lines: u64,
}

impl RunFile {
    pub(crate) fn new(path: PathBuf, lines: u64) -> Self {
        RunFile { path, lines }
    }

    /// Parses, sorts and persists a chunk of raw lines as a new run in `dir`.
    ///
    /// Fails on the first malformed line of the chunk.
    pub fn build(
        dir: &Path,
        chunk: impl IntoIterator<Item = String>,
        decoration: &Decoration,
        buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        let mut lines = chunk
            .into_iter()
            .map(|raw| decoration.parse(&raw))
            .collect::<Result<Vec<Line>, _>>()
            .map_err(SortError::Format)?;

        // (text, number) is a total order so stability is irrelevant
        lines.sort_unstable();

        let (file, path) = create_run_file(dir, "run-")?;
        let mut writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };
        for line in &lines {
            decoration.write_line(&mut writer, line).map_err(SortError::IO)?;
        }
        writer.flush().map_err(SortError::IO)?;

        log::debug!("run {} written ({} lines)", path.display(), lines.len());

        return Ok(RunFile::new(path, lines.len() as u64));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Opens the run for reading.
    pub fn open<'a>(&self, decoration: &'a Decoration, buf_size: Option<usize>) -> Result<RunReader<'a>, SortError> {
        let file = fs::File::open(&self.path).map_err(SortError::IO)?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(RunReader {
            lines: reader.lines(),
            decoration,
        });
    }

    /// Deletes the run. Failures are only logged.
    pub(crate) fn remove(self) {
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("run {} not removed: {}", self.path.display(), err);
        }
    }
}

/// Creates a uniquely named file in `dir` that outlives its handle.
pub(crate) fn create_run_file(dir: &Path, prefix: &str) -> Result<(fs::File, PathBuf), SortError> {
    let tmp_file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".txt")
        .tempfile_in(dir)
        .map_err(SortError::IO)?;

    return tmp_file.keep().map_err(|err| SortError::IO(err.error));
}

/// Streams the lines of a run file.
pub struct RunReader<'a> {
    lines: io::Lines<io::BufReader<fs::File>>,
    decoration: &'a Decoration,
}

impl<'a> Iterator for RunReader<'a> {
    type Item = Result<Line, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match self.lines.next()? {
            Ok(raw) => raw,
            Err(err) => return Some(Err(SortError::IO(err))),
        };

        Some(self.decoration.parse(&raw).map_err(SortError::Format))
    }
}
