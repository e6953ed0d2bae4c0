//! ntfstrace CLI
//!
//! Command-line front end: decode single artifacts, locate and extract them
//! from disk images, build timelines and search the results.

use clap::{ArgAction, Parser, Subcommand};
use console::style;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use ntfstrace::logging::{self, LogLevel};
use ntfstrace::ntfs::logfile::LogFileConfig;
use ntfstrace::ntfs::mft::{MftConfig, MftEntry};
use ntfstrace::ntfs::usn::UsnConfig;
use ntfstrace::output::{write_document, write_records, write_sqlite, CsvRow};
use ntfstrace::search::{search_file, Matcher};
use ntfstrace::{
    find_ntfs_partitions, format_size, AnalyzerConfig, Artifact, ArtifactBuffer, ArtifactKind,
    CancelToken, Image, LogFileDecoder, LogFileRecord, MftDecoder, MftIndex, NtfsExtractor,
    NtfsTraceError, OutputFormat, Partition, UnifiedAnalyzer, UsnDecoder, UsnRecord,
};

/// ntfstrace - offline NTFS activity reconstruction
///
/// Decodes $MFT, $LogFile and $UsnJrnl:$J from raw images or extracted
/// artifact files and merges them into one timeline.
#[derive(Parser)]
#[command(name = "ntfstrace")]
#[command(author = "ntfstrace Contributors")]
#[command(version)]
#[command(about = "Offline NTFS forensic parser", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an extracted $MFT
    Mft {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Skip path resolution
        #[arg(long)]
        no_path: bool,

        /// Only records still in use
        #[arg(long)]
        active_only: bool,

        /// Record size in bytes (detected when omitted)
        #[arg(long)]
        record_size: Option<u32>,
    },

    /// Decode an extracted $UsnJrnl:$J
    Usn {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// $MFT used to resolve paths
        #[arg(long)]
        mft: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Decode an extracted $LogFile
    Logfile {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Volume cluster size
        #[arg(long, default_value = "4096")]
        cluster_size: u32,

        /// MFT record size
        #[arg(long, default_value = "1024")]
        record_size: u32,
    },

    /// List NTFS partitions in a disk image
    Partitions { image: PathBuf },

    /// Extract $MFT, $LogFile and $UsnJrnl:$J from every partition
    Extract {
        image: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Extract and decode every partition of an image
    Analyze {
        image: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Also emit $FILE_NAME timestamps in the timeline
        #[arg(long)]
        filename_times: bool,
    },

    /// Build a unified timeline from extracted artifacts
    Timeline {
        #[arg(long)]
        mft: Option<PathBuf>,

        #[arg(long)]
        usn: Option<PathBuf>,

        #[arg(long)]
        logfile: Option<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Also emit $FILE_NAME timestamps
        #[arg(long)]
        filename_times: bool,
    },

    /// Search a produced JSON or JSON Lines file
    Search {
        input: PathBuf,

        /// Keyword, or pattern with --regex (use -- before it if it starts with -)
        #[arg(allow_hyphen_values = true)]
        keyword: String,

        #[arg(long)]
        regex: bool,

        /// Maximum results
        #[arg(short, long, default_value = "100")]
        max: usize,
    },

    /// Show version, capabilities and supported formats
    Info,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(LogLevel::from_verbosity(cli.verbose), cli.log_file.as_deref()) {
        eprintln!("{} cannot open log file: {}", style("Warning:").yellow().bold(), e);
    }
    logging::separator(&format!("ntfstrace {}", ntfstrace::VERSION));

    let result = match cli.command {
        Commands::Mft {
            input,
            output,
            format,
            no_path,
            active_only,
            record_size,
        } => cmd_mft(&input, &output, format, no_path, active_only, record_size),

        Commands::Usn {
            input,
            output,
            mft,
            format,
        } => cmd_usn(&input, &output, mft.as_deref(), format),

        Commands::Logfile {
            input,
            output,
            format,
            cluster_size,
            record_size,
        } => cmd_logfile(&input, &output, format, cluster_size, record_size),

        Commands::Partitions { image } => cmd_partitions(&image),

        Commands::Extract { image, output } => cmd_extract(&image, &output),

        Commands::Analyze {
            image,
            output,
            filename_times,
        } => cmd_analyze(&image, &output, filename_times),

        Commands::Timeline {
            mft,
            usn,
            logfile,
            output,
            format,
            filename_times,
        } => cmd_timeline(
            mft.as_deref(),
            usn.as_deref(),
            logfile.as_deref(),
            &output,
            format,
            filename_times,
        ),

        Commands::Search {
            input,
            keyword,
            regex,
            max,
        } => cmd_search(&input, &keyword, regex, max),

        Commands::Info => cmd_info(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

fn spinner(msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg);
    pb
}

fn create_output(path: &Path) -> ntfstrace::Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Write `items` to `output`, as a database file for SQLite
fn emit<T, I>(output: &Path, format: OutputFormat, items: I) -> ntfstrace::Result<usize>
where
    T: Serialize + CsvRow,
    I: IntoIterator<Item = T>,
{
    match format {
        OutputFormat::Sqlite => write_sqlite(output, items),
        _ => write_records(&mut create_output(output)?, format, items),
    }
}

fn done(count: usize, what: &str, output: &Path, start: Instant) {
    println!(
        "{} Wrote {} {} to {} in {}",
        style("✓").green().bold(),
        style(count).cyan(),
        what,
        style(output.display()).yellow(),
        HumanDuration(start.elapsed())
    );
}

/// MFT command
fn cmd_mft(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    no_path: bool,
    active_only: bool,
    record_size: Option<u32>,
) -> ntfstrace::Result<()> {
    let start = Instant::now();
    println!(
        "{} Decoding MFT {}",
        style("→").cyan().bold(),
        style(input.display()).yellow()
    );

    let buffer = ArtifactBuffer::open(input)?;
    let config = MftConfig {
        record_size,
        include_deleted: !active_only,
        ..Default::default()
    };
    let decoder = MftDecoder::new(&buffer, config)?;
    let pb = progress_bar(decoder.get_total_entries());

    let count = if no_path {
        let entries = decoder.visible_records().map(|record| MftEntry {
            record,
            path: None,
            path_error: None,
        });
        emit(output, format, entries.inspect(|e| pb.set_position(e.record.entry + 1)))?
    } else {
        pb.set_message("indexing");
        let index = MftIndex::build(&decoder);
        pb.set_message("resolving paths");
        let entries = decoder.entries(&index);
        emit(output, format, entries.inspect(|e| pb.set_position(e.record.entry + 1)))?
    };
    pb.finish_and_clear();

    done(count, "MFT records", output, start);
    Ok(())
}

/// USN command
fn cmd_usn(input: &Path, output: &Path, mft: Option<&Path>, format: OutputFormat) -> ntfstrace::Result<()> {
    let start = Instant::now();
    println!(
        "{} Decoding USN journal {}",
        style("→").cyan().bold(),
        style(input.display()).yellow()
    );

    let buffer = ArtifactBuffer::open(input)?;
    let mft_buffer = mft.map(ArtifactBuffer::open).transpose()?;
    let mft_decoder = mft_buffer
        .as_deref()
        .map(|data| MftDecoder::new(data, MftConfig::default()))
        .transpose()?;
    let index = mft_decoder.as_ref().map(MftIndex::build);

    let mut decoder = UsnDecoder::new(&buffer, UsnConfig::default());
    if let Some(index) = &index {
        decoder = decoder.with_index(index);
    }

    let pb = spinner("records");
    let mut records = decoder.records();
    let count = emit(output, format, records.by_ref().inspect(|_| pb.inc(1)))?;
    pb.finish_and_clear();

    let stats = records.stats();
    if stats.resyncs > 0 {
        println!(
            "  {} {} resynchronisations, {} zero bytes skipped",
            style("!").yellow().bold(),
            stats.resyncs,
            format_size(stats.zero_bytes)
        );
    }
    done(count, "USN records", output, start);
    Ok(())
}

/// LogFile command
fn cmd_logfile(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    cluster_size: u32,
    record_size: u32,
) -> ntfstrace::Result<()> {
    let start = Instant::now();
    println!(
        "{} Decoding LogFile {}",
        style("→").cyan().bold(),
        style(input.display()).yellow()
    );

    let buffer = ArtifactBuffer::open(input)?;
    let config = LogFileConfig {
        cluster_size,
        mft_record_size: record_size,
        ..Default::default()
    };
    let decoder = LogFileDecoder::open(&buffer, config)?;
    let restart = decoder.restart_area();
    println!(
        "  {} {} at {:#x}, current LSN {:#x}, version {}.{}",
        style("Restart area:").bold(),
        if restart.chkdsk { "CHKD" } else { "RSTR" },
        restart.page_offset,
        restart.current_lsn,
        restart.major_version,
        restart.minor_version
    );

    let pb = spinner("log records");
    let mut records = decoder.records();
    let count = emit(output, format, records.by_ref().inspect(|_| pb.inc(1)))?;
    pb.finish_and_clear();

    let stats = records.stats();
    if stats.skipped_pages > 0 || stats.truncated > 0 {
        println!(
            "  {} {} pages skipped, {} records truncated",
            style("!").yellow().bold(),
            stats.skipped_pages,
            stats.truncated
        );
    }
    done(count, "log records", output, start);
    Ok(())
}

fn print_partition(p: &Partition) {
    println!(
        "  {} Partition {} at {:#x}: {} ({:?})",
        style("•").green(),
        style(p.index).cyan(),
        p.offset,
        style(format_size(p.length)).yellow(),
        p.method
    );
    println!(
        "      {} {}  {} {}  {} {}",
        style("Cluster:").dim(),
        p.bytes_per_cluster,
        style("Record:").dim(),
        p.mft_record_size,
        style("Serial:").dim(),
        p.serial_hex()
    );
}

/// Partitions command
fn cmd_partitions(image: &Path) -> ntfstrace::Result<()> {
    println!(
        "{} Locating NTFS partitions in {}",
        style("→").cyan().bold(),
        style(image.display()).yellow()
    );
    let image = Image::open(image)?;
    let partitions = find_ntfs_partitions(&image)?;

    println!();
    for partition in &partitions {
        print_partition(partition);
    }
    Ok(())
}

/// Extract command
fn cmd_extract(image: &Path, output: &Path) -> ntfstrace::Result<()> {
    let start = Instant::now();
    println!(
        "{} Extracting artifacts from {}",
        style("→").cyan().bold(),
        style(image.display()).yellow()
    );
    std::fs::create_dir_all(output)?;
    let image = Image::open(image)?;
    let partitions = find_ntfs_partitions(&image)?;

    for partition in &partitions {
        print_partition(partition);
        let extractor = match NtfsExtractor::new(&image, partition) {
            Ok(x) => x,
            Err(e) => {
                println!("      {} {}", style("✗").red().bold(), e);
                continue;
            }
        };

        for artifact in Artifact::ALL {
            let path = output.join(artifact.file_name(partition.index));
            let mut writer = create_output(&path)?;
            match extractor.copy_artifact(artifact, &mut writer) {
                Ok(bytes) => {
                    writer.flush()?;
                    println!(
                        "      {} {:<12} {}",
                        style("✓").green().bold(),
                        artifact.name(),
                        style(format_size(bytes)).yellow()
                    );
                }
                Err(e) if e.is_recoverable() => {
                    drop(writer);
                    std::fs::remove_file(&path)?;
                    println!("      {} {:<12} {}", style("✗").red().bold(), artifact.name(), e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    println!();
    println!(
        "{} Done in {}",
        style("✓").green().bold(),
        HumanDuration(start.elapsed())
    );
    Ok(())
}

#[derive(Serialize)]
struct MftDocument<'a> {
    partition: &'a Partition,
    #[serde(rename = "MFT")]
    records: Vec<MftEntry>,
}

#[derive(Serialize)]
struct JournalDocument {
    #[serde(rename = "UsnJrnl")]
    usn: Vec<UsnRecord>,
    #[serde(rename = "LogFile")]
    logfile: Vec<LogFileRecord>,
}

/// Per-partition outcome of `analyze`
struct PartitionReport {
    index: usize,
    mft_records: usize,
    usn_records: usize,
    log_records: usize,
    timeline_events: usize,
    missing: Vec<String>,
}

fn analyze_partition(
    image: &Image,
    partition: &Partition,
    output: &Path,
    filename_times: bool,
    cancel: &CancelToken,
) -> ntfstrace::Result<PartitionReport> {
    cancel.check()?;
    let extractor = NtfsExtractor::new(image, partition)?;
    let mut missing = Vec::new();

    let mut pull = |artifact: Artifact| match extractor.extract(artifact) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.is_recoverable() => {
            missing.push(format!("{}: {}", artifact.name(), e));
            Ok(None)
        }
        Err(e) => Err(e),
    };
    let mft = pull(Artifact::Mft)?;
    let usn = pull(Artifact::UsnJournal)?;
    let log = pull(Artifact::LogFile)?;
    cancel.check()?;

    let config = AnalyzerConfig {
        mft: MftConfig {
            record_size: Some(partition.mft_record_size),
            ..Default::default()
        },
        usn: UsnConfig::default(),
        logfile: LogFileConfig {
            cluster_size: partition.bytes_per_cluster,
            mft_record_size: partition.mft_record_size,
            ..Default::default()
        },
        filename_timestamps: filename_times,
    };

    let index_entries = match mft.as_deref() {
        Some(data) => {
            let decoder = MftDecoder::new(data, config.mft.clone())?;
            let index = MftIndex::build(&decoder);
            let document = MftDocument {
                partition,
                records: decoder.entries(&index).collect(),
            };
            let path = output.join(format!("partition{}_mft.json", partition.index));
            write_document(&mut create_output(&path)?, &document)?;

            let usn_records: Vec<UsnRecord> = usn
                .as_deref()
                .map(|data| {
                    UsnDecoder::new(data, config.usn.clone())
                        .with_index(&index)
                        .records()
                        .collect()
                })
                .unwrap_or_default();
            (document.records.len(), usn_records)
        }
        None => {
            let usn_records: Vec<UsnRecord> = usn
                .as_deref()
                .map(|data| UsnDecoder::new(data, config.usn.clone()).records().collect())
                .unwrap_or_default();
            (0, usn_records)
        }
    };
    let (mft_records, usn_records) = index_entries;

    let log_records: Vec<LogFileRecord> = match log.as_deref() {
        Some(data) => match LogFileDecoder::open(data, config.logfile.clone()) {
            Ok(decoder) => decoder.records().collect(),
            Err(e) => {
                missing.push(format!("{}: {}", Artifact::LogFile.name(), e));
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let journal = JournalDocument {
        usn: usn_records,
        logfile: log_records,
    };
    let path = output.join(format!("partition{}_journal.json", partition.index));
    write_document(&mut create_output(&path)?, &journal)?;

    let timeline = UnifiedAnalyzer::new(config)
        .with_cancel(cancel.clone())
        .analyze_all(mft.as_deref(), usn.as_deref(), log.as_deref())
        .or_else(|e| match e {
            NtfsTraceError::NoInput => Ok(Default::default()),
            other => Err(other),
        })?;
    let path = output.join(format!("partition{}_timeline.json", partition.index));
    write_document(&mut create_output(&path)?, &timeline)?;

    Ok(PartitionReport {
        index: partition.index,
        mft_records,
        usn_records: journal.usn.len(),
        log_records: journal.logfile.len(),
        timeline_events: timeline.len(),
        missing,
    })
}

/// Analyze command
fn cmd_analyze(image: &Path, output: &Path, filename_times: bool) -> ntfstrace::Result<()> {
    let start = Instant::now();
    println!(
        "{} Analyzing {}",
        style("→").cyan().bold(),
        style(image.display()).yellow()
    );
    std::fs::create_dir_all(output)?;
    let image = Image::open(image)?;
    let partitions = find_ntfs_partitions(&image)?;
    println!("  Found {} NTFS partition(s)", style(partitions.len()).cyan());

    let cancel = CancelToken::new();
    let pb = progress_bar(partitions.len() as u64);
    pb.set_message("partitions");

    let reports: Vec<(usize, ntfstrace::Result<PartitionReport>)> = partitions
        .par_iter()
        .map(|partition| {
            let report = analyze_partition(&image, partition, output, filename_times, &cancel);
            if let Err(NtfsTraceError::Io(_)) = &report {
                // image unreadable: no point starting further partitions
                cancel.cancel();
            }
            pb.inc(1);
            (partition.index, report)
        })
        .collect();
    pb.finish_and_clear();

    let mut failures = 0;
    for (index, report) in reports {
        match report {
            Ok(r) => {
                println!(
                    "  {} Partition {}: {} MFT, {} USN, {} LogFile, {} timeline events",
                    style("✓").green().bold(),
                    r.index,
                    r.mft_records,
                    r.usn_records,
                    r.log_records,
                    r.timeline_events
                );
                for note in r.missing {
                    println!("      {} {}", style("!").yellow().bold(), note);
                }
            }
            Err(e) => {
                failures += 1;
                println!("  {} Partition {}: {}", style("✗").red().bold(), index, e);
            }
        }
    }

    println!();
    println!(
        "{} Results in {} ({})",
        style("✓").green().bold(),
        style(output.display()).yellow(),
        HumanDuration(start.elapsed())
    );
    if failures == partitions.len() {
        return Err(NtfsTraceError::format("no partition could be analyzed"));
    }
    Ok(())
}

/// Timeline command
fn cmd_timeline(
    mft: Option<&Path>,
    usn: Option<&Path>,
    logfile: Option<&Path>,
    output: &Path,
    format: OutputFormat,
    filename_times: bool,
) -> ntfstrace::Result<()> {
    let start = Instant::now();
    println!("{} Building timeline", style("→").cyan().bold());

    let open = |p: Option<&Path>| p.map(ArtifactBuffer::open).transpose();
    let mft = open(mft)?;
    let usn = open(usn)?;
    let logfile = open(logfile)?;

    let config = AnalyzerConfig {
        filename_timestamps: filename_times,
        ..Default::default()
    };
    let timeline = UnifiedAnalyzer::new(config).analyze_all(mft.as_deref(), usn.as_deref(), logfile.as_deref())?;

    for warning in &timeline.warnings {
        println!("  {} {}", style("!").yellow().bold(), warning);
    }
    let summary = timeline.summary();
    for kind in ArtifactKind::ALL {
        let count = match kind {
            ArtifactKind::Mft => summary.mft_events,
            ArtifactKind::UsnJrnl => summary.usn_events,
            ArtifactKind::LogFile => summary.logfile_events,
        };
        println!("  {} {}", style(format!("{:<8}", kind.label())).bold(), count);
    }
    if let (Some(first), Some(last)) = (summary.first, summary.last) {
        println!("  {} {} .. {}", style("Span:").bold(), first, last);
    }

    let count = emit(output, format, &timeline.entries)?;
    done(count, "timeline events", output, start);
    Ok(())
}

/// Search command
fn cmd_search(input: &Path, keyword: &str, regex: bool, max: usize) -> ntfstrace::Result<()> {
    println!(
        "{} Searching {} for '{}'",
        style("→").cyan().bold(),
        style(input.display()).yellow(),
        style(keyword).yellow()
    );

    let matcher = if regex {
        Matcher::regex(keyword)?
    } else {
        Matcher::keyword(keyword)
    };
    let hits = search_file(input, &matcher)?;

    println!();
    println!("Found {} results:", style(hits.len()).green());
    println!();
    for (i, hit) in hits.iter().take(max).enumerate() {
        let section = hit.section.as_deref().unwrap_or("-");
        println!(
            "  {} {} {}",
            style(format!("{:3}.", i + 1)).dim(),
            style(format!("{}[{}]", section, hit.index)).cyan(),
            serde_json::to_string(&hit.record)?
        );
    }
    if hits.len() > max {
        println!("  {} {} more", style("...").dim(), hits.len() - max);
    }
    Ok(())
}

/// Info command
fn cmd_info() -> ntfstrace::Result<()> {
    let info = ntfstrace::get_info();
    println!("{} {}", style(info.name).cyan().bold(), info.version);
    println!("{}", info.description);
    println!();
    println!("{}", style("Capabilities:").bold());
    for c in &info.capabilities {
        println!("  {} {}", style("•").green(), c);
    }
    println!("{} {}", style("Output formats:").bold(), info.output_formats.join(", "));
    println!("{} {}", style("Image formats:").bold(), info.image_formats.join(", "));
    println!(
        "{} {}",
        style("Not supported:").bold(),
        info.unsupported_image_formats.join(", ")
    );
    Ok(())
}
