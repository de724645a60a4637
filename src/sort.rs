//! External sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::buffer::{ChunkBufferBuilder, LimitedBufferBuilder};
use crate::chunk::RunFile;
use crate::config::{Config, ConfigError};
use crate::line::{Decoration, FormatError};
use crate::merger::{FileMerger, SourceGauge};
use crate::reader::ChunkReader;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Invalid sorter settings.
    Config(ConfigError),
    /// Input data stream error.
    InputError(io::Error),
    /// Run or output file I/O error.
    IO(io::Error),
    /// Malformed line.
    Format(FormatError),
    /// Several parallel tasks failed.
    Aggregate(Vec<SortError>),
    /// Sorting was cancelled through the cancellation flag.
    Cancelled,
}

impl SortError {
    /// Returns every individual failure, aggregates being expanded recursively.
    pub fn flatten(self) -> Vec<SortError> {
        match self {
            SortError::Aggregate(errors) => errors.into_iter().flat_map(SortError::flatten).collect(),
            err => vec![err],
        }
    }

    fn from_many(mut errors: Vec<SortError>) -> Option<SortError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(SortError::Aggregate(errors)),
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::Config(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::Format(err) => Some(err),
            SortError::Aggregate(_) => None,
            SortError::Cancelled => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Config(err) => write!(f, "{}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Format(err) => write!(f, "{}", err),
            SortError::Aggregate(errors) => {
                write!(f, "{} tasks failed", errors.len())?;
                for err in errors {
                    write!(f, "; {}", err)?;
                }
                Ok(())
            }
            SortError::Cancelled => write!(f, "sorting cancelled"),
        }
    }
}

/// Sorting summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    lines: u64,
    runs: usize,
    merges: usize,
    peak_open_sources: usize,
}

impl SortStats {
    /// Number of lines sorted.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Number of runs produced from input chunks.
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Number of k-way merges performed, the final one included.
    pub fn merges(&self) -> usize {
        self.merges
    }

    /// Highest number of run files simultaneously open for merging.
    pub fn peak_open_sources(&self) -> usize {
        self.peak_open_sources
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<B = LimitedBufferBuilder>
where
    B: ChunkBufferBuilder,
{
    /// Number of threads to be used to sort chunks in parallel.
    threads_number: Option<usize>,
    /// Directory hosting the temporary working directory.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of temporary files alive at once.
    max_temp_files: u16,
    /// Line template the decoration is derived from.
    line_format: String,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Cancellation flag shared with the caller.
    cancel: Option<Arc<AtomicBool>>,
}

impl ExternalSorterBuilder<LimitedBufferBuilder> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Creates a builder from sorter settings. Chunks hold `lines_to_sort_at_once` lines.
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_max_temp_files(config.max_temp_files)
            .with_line_format(&config.line_format)
            .with_tmp_dir(&config.custom_temp_folder_path)
            .with_buffer(LimitedBufferBuilder::new(config.lines_to_sort_at_once, false))
    }
}

impl<B> ExternalSorterBuilder<B>
where
    B: ChunkBufferBuilder,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<B>, SortError> {
        let decoration = Decoration::from_template(&self.line_format)
            .map_err(|err| SortError::Config(ConfigError::Template(err)))?;

        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.max_temp_files,
            decoration,
            self.buffer_builder,
            self.rw_buf_size,
            self.cancel,
        )
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<B> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to host the temporary working directory. Created if missing.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<B> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets the maximum number of temporary files alive at once, at least 3.
    pub fn with_max_temp_files(mut self, max_temp_files: u16) -> ExternalSorterBuilder<B> {
        self.max_temp_files = max_temp_files;
        return self;
    }

    /// Sets the line template, for instance `"{0}. {1}"`.
    pub fn with_line_format(mut self, line_format: &str) -> ExternalSorterBuilder<B> {
        self.line_format = line_format.to_string();
        return self;
    }

    /// Sets buffer builder.
    pub fn with_buffer<C: ChunkBufferBuilder>(self, buffer_builder: C) -> ExternalSorterBuilder<C> {
        ExternalSorterBuilder {
            threads_number: self.threads_number,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            max_temp_files: self.max_temp_files,
            line_format: self.line_format,
            buffer_builder,
            cancel: self.cancel,
        }
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<B> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets a cancellation flag. Raising it aborts a running sort with [`SortError::Cancelled`].
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> ExternalSorterBuilder<B> {
        self.cancel = Some(cancel);
        return self;
    }
}

impl<B> Default for ExternalSorterBuilder<B>
where
    B: ChunkBufferBuilder,
{
    fn default() -> Self {
        let config = Config::default();
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            max_temp_files: config.max_temp_files,
            line_format: config.line_format,
            buffer_builder: B::default(),
            cancel: None,
        }
    }
}

/// External sorter.
///
/// Input chunks are sorted in parallel into run files which are merged with a fan-in of
/// `max_temp_files - 1`, so that no more than `max_temp_files` temporary files exist at once
/// whatever the input size.
pub struct ExternalSorter<B = LimitedBufferBuilder>
where
    B: ChunkBufferBuilder,
{
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory hosting the temporary working directories.
    tmp_path: PathBuf,
    /// Maximum number of runs merged at once.
    fan_in: usize,
    /// Line decoration.
    decoration: Decoration,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Cancellation flag.
    cancel: Arc<AtomicBool>,
}

impl<B> ExternalSorter<B>
where
    B: ChunkBufferBuilder,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort chunks in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to host the temporary working directory. If parameter is [`None`] default OS
    ///   temporary directory will be used.
    /// * `max_temp_files` - Maximum number of temporary files alive at once, at least 3.
    /// * `decoration` - Line decoration.
    /// * `buffer_builder` - An instance of a buffer builder that will be used for chunk buffer creation.
    /// * `rw_buf_size` - Run files read/write buffer size.
    /// * `cancel` - Cancellation flag, a fresh one is created if [`None`].
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        max_temp_files: u16,
        decoration: Decoration,
        buffer_builder: B,
        rw_buf_size: Option<usize>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Self, SortError> {
        if max_temp_files < Config::MIN_TEMP_FILES {
            return Err(SortError::Config(ConfigError::Invalid(format!(
                "MaxTempFiles must be at least {}, got {}",
                Config::MIN_TEMP_FILES,
                max_temp_files
            ))));
        }

        return Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_path: tmp_path.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir),
            fan_in: max_temp_files as usize - 1,
            decoration,
            buffer_builder,
            rw_buf_size,
            cancel: cancel.unwrap_or_default(),
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("sort-{}", idx));

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(&self) -> Result<tempfile::TempDir, SortError> {
        fs::create_dir_all(&self.tmp_path).map_err(|err| SortError::TempDir(err))?;
        let tmp_dir = tempfile::Builder::new()
            .prefix("line-sort-")
            .tempdir_in(&self.tmp_path)
            .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Returns the cancellation flag. Raising it aborts running sorts.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Returns the line decoration.
    pub fn decoration(&self) -> &Decoration {
        &self.decoration
    }

    /// Returns the maximum number of runs merged at once.
    pub fn fan_in(&self) -> usize {
        self.fan_in
    }

    /// Sorts the `input` file into the `output` file.
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortStats, SortError> {
        let file = fs::File::open(input).map_err(|err| SortError::InputError(err))?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        self.sort_reader(reader, output)
    }

    /// Sorts lines read from `input` into the `output` file.
    ///
    /// `output` is only written once the whole input is sorted. On failure it is left untouched
    /// and the temporary working directory is removed.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `output` - Path of the sorted file
    pub fn sort_reader<R: BufRead>(&self, input: R, output: &Path) -> Result<SortStats, SortError> {
        let tmp_dir = self.init_tmp_directory()?;
        let gauge = SourceGauge::default();
        let merger = FileMerger {
            decoration: &self.decoration,
            rw_buf_size: self.rw_buf_size,
            cancel: &self.cancel,
            gauge: &gauge,
        };

        let mut stats = SortStats::default();
        let mut chunks = ChunkReader::new(input, &self.buffer_builder);
        let mut merged: Vec<RunFile> = Vec::with_capacity(self.fan_in);

        loop {
            // merged.len() < fan_in holds here, at least one chunk fits
            let capacity = self.fan_in - merged.len();
            let (runs, exhausted) = self.produce_runs(&mut chunks, capacity, tmp_dir.path())?;
            stats.runs += runs.len();
            stats.lines += runs.iter().map(RunFile::lines).sum::<u64>();

            if exhausted {
                merged.extend(runs);
                break;
            }

            if runs.len() > 1 {
                stats.merges += 1;
            }
            merged.push(merger.merge(runs, tmp_dir.path())?);

            if merged.len() == self.fan_in {
                log::debug!("collapsing {} merged runs", merged.len());
                stats.merges += 1;
                let run = merger.merge(std::mem::take(&mut merged), tmp_dir.path())?;
                merged.push(run);
            }
        }

        log::debug!("final merge of {} runs ({} lines)", merged.len(), stats.lines);
        if merged.len() > 1 {
            stats.merges += 1;
        }
        merger.merge_to_output(merged, output)?;
        stats.peak_open_sources = gauge.peak();

        if let Err(err) = tmp_dir.close() {
            log::warn!("temporary directory not removed: {}", err);
        }
        log::info!(
            "external sort done ({} lines, {} runs, {} merges)",
            stats.lines,
            stats.runs,
            stats.merges
        );

        return Ok(stats);
    }

    /// Reads up to `limit` chunks and sorts each one into a run file on the thread pool.
    /// Returns once every launched task is finished, along with whether the input is exhausted.
    fn produce_runs<R: BufRead>(
        &self,
        chunks: &mut ChunkReader<'_, R, B>,
        limit: usize,
        dir: &Path,
    ) -> Result<(Vec<RunFile>, bool), SortError> {
        let (sender, receiver) = mpsc::channel();
        let failed = AtomicBool::new(false);
        let mut read_error = None;
        let mut launched = 0;
        let mut exhausted = false;

        let decoration = &self.decoration;
        let rw_buf_size = self.rw_buf_size;
        let cancel: &AtomicBool = &self.cancel;
        let failed = &failed;

        self.thread_pool.in_place_scope(|scope| {
            while launched < limit {
                if cancel.load(Ordering::Relaxed) || failed.load(Ordering::Relaxed) {
                    break;
                }

                match chunks.next() {
                    None => {
                        exhausted = true;
                        break;
                    }
                    Some(Err(err)) => {
                        read_error = Some(SortError::InputError(err));
                        break;
                    }
                    Some(Ok(chunk)) => {
                        let sender = sender.clone();
                        scope.spawn(move |_| {
                            if cancel.load(Ordering::Relaxed) || failed.load(Ordering::Relaxed) {
                                return;
                            }
                            let result = RunFile::build(dir, chunk, decoration, rw_buf_size);
                            if result.is_err() {
                                failed.store(true, Ordering::Relaxed);
                            }
                            // the receiver outlives the scope
                            let _ = sender.send(result);
                        });
                        launched += 1;
                    }
                }
            }
        });
        drop(sender);

        let mut runs = Vec::with_capacity(launched);
        let mut errors: Vec<SortError> = read_error.into_iter().collect();
        for result in receiver {
            match result {
                Ok(run) => runs.push(run),
                Err(err) => errors.push(err),
            }
        }

        if let Some(err) = SortError::from_many(errors) {
            return Err(err);
        }
        if cancel.load(Ordering::Relaxed) {
            return Err(SortError::Cancelled);
        }
        log::debug!("{} runs produced", runs.len());

        return Ok((runs, exhausted));
    }
}
