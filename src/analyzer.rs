//! Unified Analyzer
//!
//! Decodes whichever artifacts are present, resolves paths through one MFT
//! index and merges every event into a single ordered timeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{NtfsTraceError, Result};
use crate::ntfs::logfile::{LogFileConfig, LogFileDecoder, LogFileRecord};
use crate::ntfs::mft::{MftConfig, MftDecoder, MftEntry, MftIndex};
use crate::ntfs::structs::{FileReference, TimestampKind};
use crate::ntfs::usn::{UsnConfig, UsnDecoder, UsnRecord};

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag checked between records and between partitions
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(NtfsTraceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    pub mft: MftConfig,
    pub usn: UsnConfig,
    pub logfile: LogFileConfig,
    /// Also emit the four `$FILE_NAME` timestamps of each record's canonical name
    pub filename_timestamps: bool,
}

// ============================================================================
// Timeline
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactKind {
    #[serde(rename = "MFT")]
    Mft,
    #[serde(rename = "UsnJrnl")]
    UsnJrnl,
    #[serde(rename = "LogFile")]
    LogFile,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Mft, ArtifactKind::UsnJrnl, ArtifactKind::LogFile];

    /// Tie-break rank for equal timestamps; lower sorts first
    pub fn trust(&self) -> u8 {
        match self {
            ArtifactKind::Mft => 0,
            ArtifactKind::UsnJrnl => 1,
            ArtifactKind::LogFile => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Mft => "MFT",
            ArtifactKind::UsnJrnl => "UsnJrnl",
            ArtifactKind::LogFile => "LogFile",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub source: ArtifactKind,
    pub timestamp: Option<DateTime<Utc>>,
    /// Full reference where the source records one
    pub reference: Option<FileReference>,
    /// Raw MFT entry number
    pub entry: Option<u64>,
    pub path: Option<String>,
    pub event: String,
    pub trust: u8,
    /// Entry number, USN or LSN
    pub sequence: u64,
}

impl TimelineEntry {
    fn order(&self, other: &Self) -> CmpOrdering {
        match (self.timestamp, other.timestamp) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => CmpOrdering::Less,
            (None, Some(_)) => CmpOrdering::Greater,
            (None, None) => CmpOrdering::Equal,
        }
        .then(self.trust.cmp(&other.trust))
        .then(self.sequence.cmp(&other.sequence))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineSummary {
    pub total: usize,
    pub mft_events: usize,
    pub usn_events: usize,
    pub logfile_events: usize,
    pub untimed: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
    /// Inputs that were supplied but could not be opened
    pub warnings: Vec<String>,
    /// Set when the run stopped early; entries hold what was decoded so far
    pub cancelled: bool,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one artifact, in timeline order
    pub fn section(&self, source: ArtifactKind) -> impl Iterator<Item = &TimelineEntry> {
        self.entries.iter().filter(move |e| e.source == source)
    }

    pub fn summary(&self) -> TimelineSummary {
        let count = |kind| self.section(kind).count();
        let mut timed = self.entries.iter().filter_map(|e| e.timestamp);
        let first = timed.next();
        let last = timed.last().or(first);
        TimelineSummary {
            total: self.entries.len(),
            mft_events: count(ArtifactKind::Mft),
            usn_events: count(ArtifactKind::UsnJrnl),
            logfile_events: count(ArtifactKind::LogFile),
            untimed: self.entries.iter().filter(|e| e.timestamp.is_none()).count(),
            first,
            last,
        }
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.order(b));
    }
}

// ============================================================================
// Analyzer
// ============================================================================

pub struct UnifiedAnalyzer {
    config: AnalyzerConfig,
    cancel: CancelToken,
}

impl UnifiedAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Decode the supplied artifacts and merge them into one timeline
    pub fn analyze_all(
        &self,
        mft: Option<&[u8]>,
        usn: Option<&[u8]>,
        logfile: Option<&[u8]>,
    ) -> Result<Timeline> {
        if mft.is_none() && usn.is_none() && logfile.is_none() {
            return Err(NtfsTraceError::NoInput);
        }

        let mut timeline = Timeline::default();
        let mut failures: Vec<NtfsTraceError> = Vec::new();
        let supplied = [mft, usn, logfile].iter().filter(|i| i.is_some()).count();

        let index = match mft {
            Some(data) => match MftDecoder::new(data, self.config.mft.clone()) {
                Ok(decoder) => {
                    let index = MftIndex::build(&decoder);
                    self.mft_events(&decoder, &index, &mut timeline);
                    Some(index)
                }
                Err(e) => {
                    warn!("MFT skipped: {}", e);
                    timeline.warnings.push(format!("MFT: {}", e));
                    failures.push(e);
                    None
                }
            },
            None => None,
        };

        if let Some(data) = usn {
            if !timeline.cancelled {
                self.usn_events(data, index.as_ref(), &mut timeline);
            }
        }

        if let Some(data) = logfile {
            if !timeline.cancelled {
                match LogFileDecoder::open(data, self.config.logfile.clone()) {
                    Ok(decoder) => self.logfile_events(&decoder, index.as_ref(), &mut timeline),
                    Err(e) => {
                        warn!("LogFile skipped: {}", e);
                        timeline.warnings.push(format!("LogFile: {}", e));
                        failures.push(e);
                    }
                }
            }
        }

        if failures.len() == supplied {
            if let Some(e) = failures.into_iter().next() {
                return Err(e);
            }
        }

        timeline.sort();
        let summary = timeline.summary();
        info!(
            "Timeline: {} events (MFT {}, USN {}, LogFile {}){}",
            summary.total,
            summary.mft_events,
            summary.usn_events,
            summary.logfile_events,
            if timeline.cancelled { ", cancelled" } else { "" }
        );
        Ok(timeline)
    }

    fn mft_events(&self, decoder: &MftDecoder<'_>, index: &MftIndex, timeline: &mut Timeline) {
        for entry in decoder.entries(index) {
            if self.cancel.is_cancelled() {
                timeline.cancelled = true;
                return;
            }
            self.push_mft_entry(&entry, timeline);
        }
        debug!("MFT contributed {} events", timeline.entries.len());
    }

    fn push_mft_entry(&self, entry: &MftEntry, timeline: &mut Timeline) {
        let record = &entry.record;
        let name = match record.canonical_name() {
            Some(n) => format!(" {}", n.name),
            None => String::new(),
        };
        let state = if record.in_use { "" } else { " (deleted)" };

        let mut push = |attribute: &str, kind: TimestampKind, ts: DateTime<Utc>| {
            timeline.entries.push(TimelineEntry {
                source: ArtifactKind::Mft,
                timestamp: Some(ts),
                reference: Some(record.reference()),
                entry: Some(record.entry),
                path: entry.path.clone(),
                event: format!("{} {}{}{}", attribute, kind.label(), name, state),
                trust: ArtifactKind::Mft.trust(),
                sequence: record.entry,
            });
        };

        if let Some(si) = &record.standard_information {
            for (kind, ts) in si.timestamps.iter() {
                push("$SI", kind, ts);
            }
        }
        if self.config.filename_timestamps {
            if let Some(name) = record.canonical_name() {
                for (kind, ts) in name.timestamps.iter() {
                    push("$FN", kind, ts);
                }
            }
        }
    }

    fn usn_events(&self, data: &[u8], index: Option<&MftIndex>, timeline: &mut Timeline) {
        let mut decoder = UsnDecoder::new(data, self.config.usn.clone());
        if let Some(index) = index {
            decoder = decoder.with_index(index);
        }

        let mut records = decoder.records();
        for record in records.by_ref() {
            if self.cancel.is_cancelled() {
                timeline.cancelled = true;
                break;
            }
            timeline.entries.push(usn_entry(record));
        }
        let stats = records.stats();
        debug!(
            "USN contributed {} events ({} resyncs)",
            stats.records, stats.resyncs
        );
    }

    fn logfile_events(&self, decoder: &LogFileDecoder<'_>, index: Option<&MftIndex>, timeline: &mut Timeline) {
        let mut records = decoder.records();
        for record in records.by_ref() {
            if self.cancel.is_cancelled() {
                timeline.cancelled = true;
                break;
            }
            timeline.entries.push(logfile_entry(&record, index));
        }
        let stats = records.stats();
        debug!(
            "LogFile contributed {} events ({} pages skipped)",
            stats.records, stats.skipped_pages
        );
    }
}

fn usn_entry(record: UsnRecord) -> TimelineEntry {
    TimelineEntry {
        source: ArtifactKind::UsnJrnl,
        timestamp: record.timestamp,
        reference: Some(record.file_reference),
        entry: Some(record.file_reference.entry),
        event: format!("{} {}", record.reason_string(), record.file_name),
        path: record.path,
        trust: ArtifactKind::UsnJrnl.trust(),
        sequence: record.usn,
    }
}

fn logfile_entry(record: &LogFileRecord, index: Option<&MftIndex>) -> TimelineEntry {
    let path = match (record.target_entry, index) {
        (Some(entry), Some(index)) => index
            .resolve_display_path(FileReference::new(entry, 0))
            .ok(),
        _ => None,
    };
    let event = match record.file_name() {
        Some(name) => format!("{} {}", record.operation_label(), name),
        None => record.operation_label(),
    };
    TimelineEntry {
        source: ArtifactKind::LogFile,
        timestamp: record.latest_timestamp(),
        reference: None,
        entry: record.target_entry,
        path,
        event,
        trust: ArtifactKind::LogFile.trust(),
        sequence: record.lsn,
    }
}
