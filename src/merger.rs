//! Binary heap merger and bounded run file merging.

use std::cmp::Ordering;
use std::collections::binary_heap::{BinaryHeap, PeekMut};
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::sync::atomic::{self, AtomicBool, AtomicUsize};

use crate::chunk::{create_run_file, RunFile};
use crate::line::Decoration;
use crate::sort::SortError;

/// Number of merged lines between two cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Next unconsumed item of a source and the index of that source in the merger.
/// Ordering is reversed to turn the max-heap into a min-heap.
struct MergeSource<T> {
    head: T,
    index: usize,
}

impl<T: Ord> PartialEq for MergeSource<T> {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head
    }
}

impl<T: Ord> Eq for MergeSource<T> {}

impl<T: Ord> PartialOrd for MergeSource<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for MergeSource<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.head.cmp(&other.head).reverse()
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of inputs.
///
/// The merger owns the inputs, the heap only refers to them by index.
pub struct BinaryHeapMerger<T, E, I>
where
    T: Ord,
    I: Iterator<Item = Result<T, E>>,
{
    heap: BinaryHeap<MergeSource<T>>,
    sources: Vec<I>,
    failed: bool,
}

impl<T, E, I> BinaryHeapMerger<T, E, I>
where
    T: Ord,
    I: Iterator<Item = Result<T, E>>,
{
    /// Creates a merger and reads the first item of every input.
    /// Inputs should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `sources` - Inputs to be merged in a single sorted one
    pub fn new<S>(sources: S) -> Result<Self, E>
    where
        S: IntoIterator<Item = I>,
    {
        let mut sources = Vec::from_iter(sources);
        let mut heap = BinaryHeap::with_capacity(sources.len());

        for (index, source) in sources.iter_mut().enumerate() {
            if let Some(item) = source.next() {
                heap.push(MergeSource { head: item?, index });
            }
        }

        return Ok(BinaryHeapMerger {
            heap,
            sources,
            failed: false,
        });
    }
}

impl<T, E, I> Iterator for BinaryHeapMerger<T, E, I>
where
    T: Ord,
    I: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    /// An input error is returned once and ends the iteration.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut smallest = self.heap.peek_mut()?;
        match self.sources[smallest.index].next() {
            Some(Ok(item)) => Some(Ok(std::mem::replace(&mut smallest.head, item))),
            Some(Err(err)) => {
                self.failed = true;
                Some(Err(err))
            }
            // exhausted inputs are never polled again
            None => Some(Ok(PeekMut::pop(smallest).head)),
        }
    }
}

/// Tracks how many run files are open for reading at once.
#[derive(Debug, Default)]
pub struct SourceGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl SourceGauge {
    fn open(&self, count: usize) -> OpenSources<'_> {
        let current = self.current.fetch_add(count, atomic::Ordering::SeqCst) + count;
        self.peak.fetch_max(current, atomic::Ordering::SeqCst);
        OpenSources { gauge: self, count }
    }

    /// Highest number of simultaneously open sources observed.
    pub fn peak(&self) -> usize {
        self.peak.load(atomic::Ordering::SeqCst)
    }
}

struct OpenSources<'a> {
    gauge: &'a SourceGauge,
    count: usize,
}

impl Drop for OpenSources<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(self.count, atomic::Ordering::SeqCst);
    }
}

/// Merges sorted run files.
pub(crate) struct FileMerger<'a> {
    pub(crate) decoration: &'a Decoration,
    pub(crate) rw_buf_size: Option<usize>,
    pub(crate) cancel: &'a AtomicBool,
    pub(crate) gauge: &'a SourceGauge,
}

impl<'a> FileMerger<'a> {
    /// Streams the k-way merge of `runs` into `writer` and returns the number of lines written.
    /// Every opened run is closed when this returns, on error too.
    fn merge_into<W: Write>(&self, runs: &[RunFile], writer: &mut W) -> Result<u64, SortError> {
        let readers = runs
            .iter()
            .map(|run| run.open(self.decoration, self.rw_buf_size))
            .collect::<Result<Vec<_>, _>>()?;
        let _open = self.gauge.open(readers.len());

        let mut written: u64 = 0;
        for line in BinaryHeapMerger::new(readers)? {
            self.decoration
                .write_line(writer, &line?)
                .map_err(SortError::IO)?;
            written += 1;

            if written % CANCEL_CHECK_INTERVAL == 0 && self.cancel.load(atomic::Ordering::Relaxed) {
                return Err(SortError::Cancelled);
            }
        }

        return Ok(written);
    }

    /// Merges runs into a new run in `dir` and deletes the consumed ones.
    /// A single run is returned as is.
    pub(crate) fn merge(&self, mut runs: Vec<RunFile>, dir: &Path) -> Result<RunFile, SortError> {
        if runs.len() == 1 {
            if let Some(run) = runs.pop() {
                return Ok(run);
            }
        }

        log::debug!("merging {} runs", runs.len());
        let (file, path) = create_run_file(dir, "merge-")?;
        let mut writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };
        let lines = self.merge_into(&runs, &mut writer)?;
        writer.flush().map_err(SortError::IO)?;
        drop(writer);

        for run in runs {
            run.remove();
        }
        log::debug!("merged run {} written ({} lines)", path.display(), lines);

        return Ok(RunFile::new(path, lines));
    }

    /// Merges runs into `output`.
    ///
    /// The result is written beside `output` and moved over it only once complete, so a failed
    /// merge never leaves a partial output behind. Consumed runs are left to the caller, which
    /// removes the whole working directory.
    pub(crate) fn merge_to_output(&self, mut runs: Vec<RunFile>, output: &Path) -> Result<u64, SortError> {
        if runs.len() == 1 {
            if let Some(run) = runs.pop() {
                return Self::move_run(run, output);
            }
        }

        log::debug!("merging {} runs into {}", runs.len(), output.display());
        let tmp_file = output_tmp_file(output)?;
        let mut writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file),
            None => io::BufWriter::new(tmp_file),
        };
        let lines = self.merge_into(&runs, &mut writer)?;
        let tmp_file = writer
            .into_inner()
            .map_err(|err| SortError::IO(err.into_error()))?;
        tmp_file.persist(output).map_err(|err| SortError::IO(err.error))?;

        return Ok(lines);
    }

    fn move_run(run: RunFile, output: &Path) -> Result<u64, SortError> {
        if let Err(err) = fs::rename(run.path(), output) {
            // most likely the working directory is on another file system
            log::debug!("run {} not renamed ({}), copying", run.path().display(), err);
            copy_to_output(run.path(), output)?;
        }

        return Ok(run.lines());
    }
}

/// Copies `source` beside `output` and moves the copy over it once complete.
fn copy_to_output(source: &Path, output: &Path) -> Result<(), SortError> {
    let mut tmp_file = output_tmp_file(output)?;
    let mut source = fs::File::open(source).map_err(SortError::IO)?;
    io::copy(&mut source, &mut tmp_file).map_err(SortError::IO)?;
    tmp_file.persist(output).map_err(|err| SortError::IO(err.error))?;

    return Ok(());
}

fn output_tmp_file(output: &Path) -> Result<tempfile::NamedTempFile, SortError> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    return tempfile::Builder::new()
        .prefix(".line-sort-")
        .tempfile_in(dir)
        .map_err(SortError::IO);
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::fs;
    use std::io::{self, ErrorKind};
    use std::sync::atomic::AtomicBool;

    use rstest::*;

    use super::{copy_to_output, BinaryHeapMerger, FileMerger, SourceGauge};
    use crate::chunk::RunFile;
    use crate::line::Decoration;
    use crate::sort::SortError;

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Ok(1), Ok(1), Ok(2)],
            vec![Ok(1), Ok(2)],
        ],
        vec![Ok(1), Ok(1), Ok(1), Ok(2), Ok(2)],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error")), Ok(4)],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] sources: Vec<Vec<Result<i32, io::Error>>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let merger = BinaryHeapMerger::new(sources.into_iter().map(|source| source.into_iter())).unwrap();
        let actual_result: Vec<_> = merger.collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merger_init_error() {
        let sources = vec![
            vec![Ok(1)].into_iter(),
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))].into_iter(),
        ];
        let result = BinaryHeapMerger::<i32, _, _>::new(sources);
        assert_eq!(result.err().map(|err| err.to_string()), Some("test error".to_string()));
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }

    struct MergeEnv {
        dir: tempfile::TempDir,
        decoration: Decoration,
        cancel: AtomicBool,
        gauge: SourceGauge,
    }

    impl MergeEnv {
        fn merger(&self) -> FileMerger<'_> {
            FileMerger {
                decoration: &self.decoration,
                rw_buf_size: None,
                cancel: &self.cancel,
                gauge: &self.gauge,
            }
        }

        fn run(&self, lines: &[&str]) -> RunFile {
            let raw = lines.iter().map(|line| line.to_string());
            RunFile::build(self.dir.path(), raw, &self.decoration, None).unwrap()
        }
    }

    #[fixture]
    fn env() -> MergeEnv {
        MergeEnv {
            dir: tempfile::tempdir().unwrap(),
            decoration: Decoration::from_template("{0}. {1}").unwrap(),
            cancel: AtomicBool::new(false),
            gauge: SourceGauge::default(),
        }
    }

    #[rstest]
    fn test_merge_deletes_sources(env: MergeEnv) {
        let runs = vec![
            env.run(&["3. banana", "1. cherry"]),
            env.run(&["1. apple", "2. banana"]),
            env.run(&["5. apple"]),
        ];
        let paths: Vec<_> = runs.iter().map(|run| run.path().to_path_buf()).collect();

        let merged = env.merger().merge(runs, env.dir.path()).unwrap();

        assert_eq!(merged.lines(), 5);
        assert_eq!(
            fs::read_to_string(merged.path()).unwrap(),
            "1. apple\n5. apple\n2. banana\n3. banana\n1. cherry\n"
        );
        assert!(paths.iter().all(|path| !path.exists()));
        assert_eq!(env.gauge.peak(), 3);
    }

    #[rstest]
    fn test_merge_single_run_is_reused(env: MergeEnv) {
        let run = env.run(&["1. apple"]);
        let merged = env.merger().merge(vec![run.clone()], env.dir.path()).unwrap();
        assert_eq!(merged, run);
        assert!(merged.path().exists());
        assert_eq!(env.gauge.peak(), 0);
    }

    #[rstest]
    fn test_merge_to_output(env: MergeEnv) {
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("sorted.txt");
        fs::write(&output, "stale content\n").unwrap();

        let runs = vec![env.run(&["2. b", "3. c"]), env.run(&["1. a"])];
        let lines = env.merger().merge_to_output(runs, &output).unwrap();

        assert_eq!(lines, 3);
        assert_eq!(fs::read_to_string(&output).unwrap(), "1. a\n2. b\n3. c\n");
        assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 1);
    }

    #[rstest]
    fn test_merge_to_output_moves_single_run(env: MergeEnv) {
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("sorted.txt");
        let run = env.run(&["2. b", "1. a"]);
        let run_path = run.path().to_path_buf();

        let lines = env.merger().merge_to_output(vec![run], &output).unwrap();

        assert_eq!(lines, 2);
        assert_eq!(fs::read_to_string(&output).unwrap(), "1. a\n2. b\n");
        assert!(!run_path.exists());
    }

    #[rstest]
    fn test_copy_to_output(env: MergeEnv) {
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("sorted.txt");
        fs::write(&output, "stale content\n").unwrap();
        let run = env.run(&["2. b", "1. a"]);

        copy_to_output(run.path(), &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "1. a\n2. b\n");
        assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 1);
        assert!(run.path().exists());
    }

    #[rstest]
    fn test_copy_to_output_missing_source(env: MergeEnv) {
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("sorted.txt");

        let result = copy_to_output(&env.dir.path().join("absent.txt"), &output);

        assert!(matches!(result, Err(SortError::IO(_))));
        assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_merge_to_output_without_runs(env: MergeEnv) {
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("sorted.txt");

        let lines = env.merger().merge_to_output(vec![], &output).unwrap();

        assert_eq!(lines, 0);
        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    #[rstest]
    fn test_corrupted_run_leaves_no_output(env: MergeEnv) {
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("sorted.txt");
        let corrupted = env.run(&["1. a"]);
        fs::write(corrupted.path(), "1. a\ngarbage\n").unwrap();

        let runs = vec![corrupted, env.run(&["2. b"])];
        match env.merger().merge_to_output(runs, &output) {
            Err(SortError::Format(err)) => assert_eq!(err.line(), "garbage"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 0);
        assert_eq!(env.gauge.peak(), 2);
    }

    #[rstest]
    fn test_merge_cancelled(env: MergeEnv) {
        let lines: Vec<String> = (0..5000).map(|i| format!("{}. line", i)).collect();
        let first = RunFile::build(env.dir.path(), lines.clone(), &env.decoration, None).unwrap();
        let second = RunFile::build(env.dir.path(), lines, &env.decoration, None).unwrap();
        env.cancel.store(true, std::sync::atomic::Ordering::SeqCst);

        let result = env.merger().merge(vec![first, second], env.dir.path());
        assert!(matches!(result, Err(SortError::Cancelled)));
    }
}
