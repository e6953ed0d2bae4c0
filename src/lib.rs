//! ntfstrace - offline NTFS activity reconstruction
//!
//! Rebuilds file creation, rename, deletion and content changes from raw NTFS
//! metadata, without mounting the volume.
//!
//! # Features
//!
//! - **Volume location**: MBR, EBR and GPT tables, bare volumes, boot sector scan
//! - **Artifact extraction**: `$MFT`, `$LogFile` and `$UsnJrnl:$J` by data runs
//! - **MFT decoding**: every slot, with fixup checks and memoized path resolution
//! - **USN journal decoding**: v2/v3 records with resynchronisation over gaps
//! - **LogFile decoding**: restart areas, multi-page records, NTFS operations
//! - **Unified timeline**: all three artifacts merged and cross-referenced
//!
//! # Example
//!
//! ```no_run
//! use ntfstrace::{find_ntfs_partitions, Artifact, Image, NtfsExtractor};
//! use ntfstrace::{AnalyzerConfig, UnifiedAnalyzer};
//!
//! fn main() -> ntfstrace::Result<()> {
//!     let image = Image::open("disk.raw")?;
//!     for partition in find_ntfs_partitions(&image)? {
//!         let extractor = NtfsExtractor::new(&image, &partition)?;
//!         let mft = extractor.extract(Artifact::Mft)?;
//!         let usn = extractor.extract(Artifact::UsnJournal).ok();
//!         let log = extractor.extract(Artifact::LogFile).ok();
//!
//!         let timeline = UnifiedAnalyzer::new(AnalyzerConfig::default())
//!             .analyze_all(Some(&mft), usn.as_deref(), log.as_deref())?;
//!         println!("partition {}: {} events", partition.index, timeline.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod error;
pub mod logging;
pub mod ntfs;
pub mod output;
pub mod search;

use serde::Serialize;

// Re-export main types
pub use analyzer::{AnalyzerConfig, ArtifactKind, CancelToken, Timeline, TimelineEntry, UnifiedAnalyzer};
pub use error::{NtfsTraceError, Result};
pub use output::OutputFormat;

pub use ntfs::{
    find_ntfs_partitions, Artifact, ArtifactBuffer, FileReference, Image, LogFileConfig,
    LogFileDecoder, LogFileRecord, MftConfig, MftDecoder, MftEntry, MftIndex, MftRecord, NtfsExtractor,
    Partition, UsnConfig, UsnDecoder, UsnRecord,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format bytes as human-readable string
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// What this build can read and write
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub capabilities: Vec<&'static str>,
    pub output_formats: Vec<&'static str>,
    pub image_formats: Vec<&'static str>,
    /// Recognised by signature and rejected
    pub unsupported_image_formats: Vec<&'static str>,
}

pub fn get_info() -> ToolInfo {
    ToolInfo {
        name: "ntfstrace",
        version: VERSION,
        description: "NTFS forensic parser for $MFT, $LogFile and $UsnJrnl:$J",
        capabilities: vec![
            "partition discovery (MBR, EBR, GPT, boot sector scan)",
            "artifact extraction",
            "MFT records with full paths",
            "USN journal v2/v3",
            "LogFile restart areas and log records",
            "unified timeline",
            "keyword and regex search over output",
        ],
        output_formats: vec!["json", "jsonl", "csv", "sqlite"],
        image_formats: vec!["raw (dd)", "split raw (.001, .002, ...)"],
        unsupported_image_formats: vec!["E01/L01 (Expert Witness)", "AFF"],
    }
}
