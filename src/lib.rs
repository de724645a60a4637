//! `line-sort` is an external sorter for text files made of numbered lines.
//!
//! Every line has the form `<number><decoration><text>`, for instance `415. Apple` with the `{0}. {1}`
//! line template. Lines are ordered by text first, by number second. Files much larger than the main memory
//! are sorted in two phases: chunks of lines are sorted in memory into run files, then run files are merged.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `line-sort` supports the following features:
//!
//! * **Bounded temporary files:**
//!   merges never read more than `max_temp_files - 1` files at once, whatever the input size.
//! * **Multithreading support:**
//!   chunks are sorted in multiple threads utilizing maximum CPU resources and reducing sorting time.
//! * **Memory limit support:**
//!   chunk memory consumption can be limited along with the number of lines
//!   (`memory-limit` feature required).
//! * **Configurable line format:**
//!   the decoration between number and text is derived from a line template.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use line_sort::{Config, ExternalSorterBuilder};
//!
//! fn main() {
//!     let config = Config::from_file(Path::new("appsettings.json")).unwrap();
//!     config.validate().unwrap();
//!
//!     let sorter = ExternalSorterBuilder::from_config(&config)
//!         .with_threads_number(4)
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter.sort(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//!     println!("{} lines sorted", stats.lines());
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod line;
pub mod merger;
pub mod reader;
pub mod sort;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, LimitedBuffer, LimitedBufferBuilder};
pub use chunk::{RunFile, RunReader};
pub use config::{Config, ConfigError};
pub use line::{Decoration, FormatError, Line, TemplateError};
pub use merger::{BinaryHeapMerger, SourceGauge};
pub use reader::ChunkReader;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats};
