use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use line_sort::buffer::mem::MemoryLimitedBufferBuilder;
use line_sort::{ChunkBufferBuilder, Config, ExternalSorterBuilder, SortError};

const DEFAULT_CONFIG: &str = "appsettings.json";

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let config = match load_config(&arg_parser) {
        Ok(config) => config,
        Err(err) => {
            log::error!("configuration error: {}", err);
            eprintln!("{}", err);
            process::exit(1);
        }
    };

    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let chunk_memory: Option<ByteSize> = arg_parser
        .is_present("chunk_memory")
        .then(|| arg_parser.value_of_t_or_exit("chunk_memory"));

    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));

    let mut sorter_builder = ExternalSorterBuilder::from_config(&config);
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    let result = match chunk_memory {
        Some(chunk_memory) => sort(
            sorter_builder.with_buffer(MemoryLimitedBufferBuilder::new(
                config.lines_to_sort_at_once,
                chunk_memory.as_u64(),
            )),
            input,
            output,
        ),
        None => sort(sorter_builder, input, output),
    };

    if let Err(err) = result {
        for failure in err.flatten() {
            log::error!("sorting error: {}", failure);
            eprintln!("{}", failure);
        }
        process::exit(1);
    }
}

fn sort<B: ChunkBufferBuilder>(
    sorter_builder: ExternalSorterBuilder<B>,
    input: &path::Path,
    output: &path::Path,
) -> Result<(), SortError> {
    let sorter = sorter_builder.build()?;

    print!("Sorting {}...", input.display());
    // progress line is best effort
    let _ = io::stdout().flush();

    let stats = sorter.sort(input, output)?;
    log::info!(
        "{} lines sorted ({} runs, {} merges, at most {} files merged at once)",
        stats.lines(),
        stats.runs(),
        stats.merges(),
        stats.peak_open_sources()
    );

    println!(" done.");
    println!("You may see result in {}.", output.display());

    return Ok(());
}

/// Reads the settings file, when any, and applies command line overrides.
fn load_config(arg_parser: &clap::ArgMatches) -> Result<Config, line_sort::ConfigError> {
    let mut config = match arg_parser.value_of("config") {
        Some(path) => Config::from_file(path::Path::new(path))?,
        None if path::Path::new(DEFAULT_CONFIG).is_file() => Config::from_file(path::Path::new(DEFAULT_CONFIG))?,
        None => Config::default(),
    };

    if arg_parser.is_present("max_temp_files") {
        config.max_temp_files = arg_parser.value_of_t_or_exit("max_temp_files");
    }
    if arg_parser.is_present("lines") {
        config.lines_to_sort_at_once = arg_parser.value_of_t_or_exit("lines");
    }
    if let Some(line_format) = arg_parser.value_of("line_format") {
        config.line_format = line_format.to_string();
    }
    if let Some(tmp_dir) = arg_parser.value_of("tmp_dir") {
        config.custom_temp_folder_path = path::PathBuf::from(tmp_dir);
    }

    config.validate()?;

    return Ok(config);
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-sort")
        .about("sorts huge files of numbered text lines")
        .arg(
            clap::Arg::new("input")
                .help("file to be sorted")
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("output")
                .help("result file")
                .required(true)
                .index(2),
        )
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .help("settings file, appsettings.json of the working directory is used if present")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("max_temp_files")
                .long("max-temp-files")
                .help("maximum number of temporary files alive at once")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("lines")
                .long("lines")
                .help("number of lines sorted at once in memory")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("line_format")
                .long("line-format")
                .help("line template, {0} standing for the number and {1} for the text")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("warn")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_memory")
                .short('m')
                .long("chunk-memory")
                .help("memory limit of a chunk sorted at once")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk memory format incorrect: {}", err)),
                }),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
