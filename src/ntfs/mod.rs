//! NTFS on-disk structures and decoders
//!
//! - Locating NTFS volumes in raw and split images
//! - Extracting `$MFT`, `$LogFile` and `$UsnJrnl:$J`
//! - Decoding MFT records, USN change records and `$LogFile` log records

pub mod extract;
pub mod image;
pub mod logfile;
pub mod mft;
pub mod partition;
pub mod structs;
pub mod usn;

// Re-export commonly used types
pub use extract::{Artifact, ArtifactBuffer, NtfsExtractor};
pub use image::{Image, ImageFormat};
pub use logfile::{LogFileConfig, LogFileDecoder, LogFileRecord, LogOperation, RestartArea};
pub use mft::{MftConfig, MftDecoder, MftEntry, MftIndex, MftRecord, PathResolutionError, RecordStatus};
pub use partition::{find_ntfs_partitions, DiscoveryMethod, LocatorConfig, Partition};
pub use structs::{FileReference, FilenameNamespace, NtfsBootSector, NtfsTimestamps};
pub use usn::{UsnConfig, UsnDecoder, UsnReason, UsnRecord};
