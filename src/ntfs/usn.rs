//! USN change journal decoder
//!
//! Walks an extracted `$UsnJrnl:$J` stream record by record. The stream is
//! mostly sparse in practice and may hold torn or overwritten regions, so the
//! walker resynchronizes instead of failing: zero-filled spans are skipped
//! word by word and any other bad stride jumps to the next allocation
//! boundary.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Cursor;
use tracing::{debug, trace};

use crate::ntfs::mft::{display_path, MftIndex};
use crate::ntfs::structs::{filetime_to_datetime, utf16le_to_string, FileReference};

/// USN_RECORD_V2 header size (name starts at 60)
pub const USN_V2_HEADER_SIZE: usize = 60;
/// USN_RECORD_V3 header size (name starts at 76)
pub const USN_V3_HEADER_SIZE: usize = 76;
/// Records are 8-byte aligned
const USN_RECORD_ALIGNMENT: usize = 8;
/// Largest record the filesystem will emit (255 UTF-16 units + v3 header, rounded)
const USN_MAX_RECORD_SIZE: usize = 0x10000;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct UsnConfig {
    /// Allocation boundary used to resynchronize after a bad record
    pub page_size: usize,
    /// Byte offset to start scanning from
    pub start_offset: u64,
}

impl Default for UsnConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            start_offset: 0,
        }
    }
}

// ============================================================================
// Reasons and source info
// ============================================================================

/// One bit of the USN reason mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UsnReason {
    DataOverwrite,
    DataExtend,
    DataTruncation,
    NamedDataOverwrite,
    NamedDataExtend,
    NamedDataTruncation,
    FileCreate,
    FileDelete,
    EaChange,
    SecurityChange,
    RenameOldName,
    RenameNewName,
    IndexableChange,
    BasicInfoChange,
    HardLinkChange,
    CompressionChange,
    EncryptionChange,
    ObjectIdChange,
    ReparsePointChange,
    StreamChange,
    TransactedChange,
    IntegrityChange,
    Close,
}

impl UsnReason {
    pub const ALL: [(u32, UsnReason); 23] = [
        (0x0000_0001, UsnReason::DataOverwrite),
        (0x0000_0002, UsnReason::DataExtend),
        (0x0000_0004, UsnReason::DataTruncation),
        (0x0000_0010, UsnReason::NamedDataOverwrite),
        (0x0000_0020, UsnReason::NamedDataExtend),
        (0x0000_0040, UsnReason::NamedDataTruncation),
        (0x0000_0100, UsnReason::FileCreate),
        (0x0000_0200, UsnReason::FileDelete),
        (0x0000_0400, UsnReason::EaChange),
        (0x0000_0800, UsnReason::SecurityChange),
        (0x0000_1000, UsnReason::RenameOldName),
        (0x0000_2000, UsnReason::RenameNewName),
        (0x0000_4000, UsnReason::IndexableChange),
        (0x0000_8000, UsnReason::BasicInfoChange),
        (0x0001_0000, UsnReason::HardLinkChange),
        (0x0002_0000, UsnReason::CompressionChange),
        (0x0004_0000, UsnReason::EncryptionChange),
        (0x0008_0000, UsnReason::ObjectIdChange),
        (0x0010_0000, UsnReason::ReparsePointChange),
        (0x0020_0000, UsnReason::StreamChange),
        (0x0040_0000, UsnReason::TransactedChange),
        (0x0080_0000, UsnReason::IntegrityChange),
        (0x8000_0000, UsnReason::Close),
    ];

    /// Decode a reason mask, lowest bit first
    pub fn decode(mask: u32) -> Vec<UsnReason> {
        Self::ALL
            .iter()
            .filter(|(bit, _)| mask & bit != 0)
            .map(|(_, reason)| *reason)
            .collect()
    }

    pub fn bit(&self) -> u32 {
        Self::ALL
            .iter()
            .find(|(_, r)| r == self)
            .map(|(bit, _)| *bit)
            .unwrap_or(0)
    }

    pub fn label(&self) -> &'static str {
        match self {
            UsnReason::DataOverwrite => "DATA_OVERWRITE",
            UsnReason::DataExtend => "DATA_EXTEND",
            UsnReason::DataTruncation => "DATA_TRUNCATION",
            UsnReason::NamedDataOverwrite => "NAMED_DATA_OVERWRITE",
            UsnReason::NamedDataExtend => "NAMED_DATA_EXTEND",
            UsnReason::NamedDataTruncation => "NAMED_DATA_TRUNCATION",
            UsnReason::FileCreate => "FILE_CREATE",
            UsnReason::FileDelete => "FILE_DELETE",
            UsnReason::EaChange => "EA_CHANGE",
            UsnReason::SecurityChange => "SECURITY_CHANGE",
            UsnReason::RenameOldName => "RENAME_OLD_NAME",
            UsnReason::RenameNewName => "RENAME_NEW_NAME",
            UsnReason::IndexableChange => "INDEXABLE_CHANGE",
            UsnReason::BasicInfoChange => "BASIC_INFO_CHANGE",
            UsnReason::HardLinkChange => "HARD_LINK_CHANGE",
            UsnReason::CompressionChange => "COMPRESSION_CHANGE",
            UsnReason::EncryptionChange => "ENCRYPTION_CHANGE",
            UsnReason::ObjectIdChange => "OBJECT_ID_CHANGE",
            UsnReason::ReparsePointChange => "REPARSE_POINT_CHANGE",
            UsnReason::StreamChange => "STREAM_CHANGE",
            UsnReason::TransactedChange => "TRANSACTED_CHANGE",
            UsnReason::IntegrityChange => "INTEGRITY_CHANGE",
            UsnReason::Close => "CLOSE",
        }
    }
}

/// One bit of the USN source-info mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UsnSourceInfo {
    DataManagement,
    AuxiliaryData,
    ReplicationManagement,
    ClientReplicationManagement,
}

impl UsnSourceInfo {
    const ALL: [(u32, UsnSourceInfo); 4] = [
        (0x1, UsnSourceInfo::DataManagement),
        (0x2, UsnSourceInfo::AuxiliaryData),
        (0x4, UsnSourceInfo::ReplicationManagement),
        (0x8, UsnSourceInfo::ClientReplicationManagement),
    ];

    pub fn decode(mask: u32) -> Vec<UsnSourceInfo> {
        Self::ALL
            .iter()
            .filter(|(bit, _)| mask & bit != 0)
            .map(|(_, s)| *s)
            .collect()
    }
}

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct UsnRecord {
    /// Byte offset of the record in the journal stream
    pub offset: u64,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_reference: FileReference,
    pub parent_reference: FileReference,
    pub usn: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub reason_flags: u32,
    pub reasons: Vec<UsnReason>,
    pub source_info_flags: u32,
    pub source_info: Vec<UsnSourceInfo>,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name: String,
    pub path: Option<String>,
}

impl UsnRecord {
    /// Parse a v2 or v3 record. `data` must start at the record and hold the
    /// whole stride.
    pub fn parse(offset: u64, data: &[u8]) -> Option<Self> {
        let mut c = Cursor::new(data);
        let record_length = c.read_u32::<LittleEndian>().ok()? as usize;
        let major_version = c.read_u16::<LittleEndian>().ok()?;
        let minor_version = c.read_u16::<LittleEndian>().ok()?;

        if record_length > data.len() {
            return None;
        }

        let (file_ref, parent_ref) = match major_version {
            2 if record_length >= USN_V2_HEADER_SIZE => {
                let file_ref = c.read_u64::<LittleEndian>().ok()?;
                let parent_ref = c.read_u64::<LittleEndian>().ok()?;
                (file_ref, parent_ref)
            }
            3 if record_length >= USN_V3_HEADER_SIZE => {
                // FILE_ID_128: the low 64 bits hold the NTFS reference
                let file_ref = c.read_u64::<LittleEndian>().ok()?;
                c.set_position(24);
                let parent_ref = c.read_u64::<LittleEndian>().ok()?;
                c.set_position(40);
                (file_ref, parent_ref)
            }
            _ => return None,
        };

        let usn = c.read_u64::<LittleEndian>().ok()?;
        let timestamp = c.read_u64::<LittleEndian>().ok()?;
        let reason_flags = c.read_u32::<LittleEndian>().ok()?;
        let source_info_flags = c.read_u32::<LittleEndian>().ok()?;
        let security_id = c.read_u32::<LittleEndian>().ok()?;
        let file_attributes = c.read_u32::<LittleEndian>().ok()?;
        let name_length = c.read_u16::<LittleEndian>().ok()? as usize;
        let name_offset = c.read_u16::<LittleEndian>().ok()? as usize;

        let name_end = name_offset.checked_add(name_length)?;
        if name_length % 2 != 0 || name_end > record_length {
            return None;
        }
        let file_name = utf16le_to_string(&data[name_offset..name_end]);

        Some(Self {
            offset,
            major_version,
            minor_version,
            file_reference: FileReference::from_u64(file_ref),
            parent_reference: FileReference::from_u64(parent_ref),
            usn,
            timestamp: filetime_to_datetime(timestamp),
            reason_flags,
            reasons: UsnReason::decode(reason_flags),
            source_info_flags,
            source_info: UsnSourceInfo::decode(source_info_flags),
            security_id,
            file_attributes,
            file_name,
            path: None,
        })
    }

    pub fn has_reason(&self, reason: UsnReason) -> bool {
        self.reason_flags & reason.bit() != 0
    }

    /// `|`-joined reason labels
    pub fn reason_string(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.label())
            .collect::<Vec<_>>()
            .join("|")
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Counters for one pass over the journal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsnStats {
    pub records: u64,
    /// Bad strides that forced a jump to the next page boundary
    pub resyncs: u64,
    /// Zero-filled bytes skipped
    pub zero_bytes: u64,
    pub v4_skipped: u64,
}

pub struct UsnDecoder<'a> {
    data: &'a [u8],
    config: UsnConfig,
    index: Option<&'a MftIndex>,
}

impl<'a> UsnDecoder<'a> {
    pub fn new(data: &'a [u8], config: UsnConfig) -> Self {
        debug!("USN session: {} bytes", data.len());
        Self {
            data,
            config,
            index: None,
        }
    }

    /// Attach an MFT index so records carry resolved paths
    pub fn with_index(mut self, index: &'a MftIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn records(&self) -> UsnRecords<'a> {
        let page_size = self.config.page_size.max(USN_RECORD_ALIGNMENT);
        let start = (self.config.start_offset as usize).next_multiple_of(USN_RECORD_ALIGNMENT);
        UsnRecords {
            data: self.data,
            page_size,
            pos: start,
            index: self.index,
            stats: UsnStats::default(),
            finished: false,
        }
    }
}

/// Lazy, single-pass iterator over journal records
pub struct UsnRecords<'a> {
    data: &'a [u8],
    page_size: usize,
    pos: usize,
    index: Option<&'a MftIndex>,
    stats: UsnStats,
    finished: bool,
}

impl UsnRecords<'_> {
    pub fn stats(&self) -> &UsnStats {
        &self.stats
    }

    fn resync(&mut self, reason: &str) {
        let next = (self.pos / self.page_size + 1) * self.page_size;
        debug!(
            "USN resync at {:#x} ({}), continuing at {:#x}",
            self.pos, reason, next
        );
        self.stats.resyncs += 1;
        self.pos = next;
    }

    /// Skip a zero-filled span, staying on the record alignment
    fn skip_zeros(&mut self) {
        let start = self.pos;
        let next = match self.data[start..].iter().position(|&b| b != 0) {
            Some(i) => (start + i) / USN_RECORD_ALIGNMENT * USN_RECORD_ALIGNMENT,
            None => self.data.len(),
        };
        self.pos = next.max(start + USN_RECORD_ALIGNMENT).min(self.data.len());
        self.stats.zero_bytes += (self.pos - start) as u64;
    }

    fn attach_path(&self, record: &mut UsnRecord) {
        let Some(index) = self.index else {
            return;
        };
        record.path = index
            .resolve_path(record.file_reference)
            .or_else(|_| index.resolve_in_directory(record.parent_reference, &record.file_name))
            .ok()
            .map(|components| display_path(&components));
    }
}

impl Iterator for UsnRecords<'_> {
    type Item = UsnRecord;

    fn next(&mut self) -> Option<UsnRecord> {
        while self.pos + USN_RECORD_ALIGNMENT <= self.data.len() {
            let at = self.pos;
            let head = &self.data[at..];
            let length = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize;

            if length == 0 {
                self.skip_zeros();
                continue;
            }

            let major = u16::from_le_bytes([head[4], head[5]]);
            if length % USN_RECORD_ALIGNMENT != 0
                || length > USN_MAX_RECORD_SIZE
                || length > head.len()
                || !(2..=4).contains(&major)
            {
                self.resync("bad record header");
                continue;
            }

            if major == 4 {
                trace!("USN v4 range record at {:#x} skipped", at);
                self.stats.v4_skipped += 1;
                self.pos += length;
                continue;
            }

            match UsnRecord::parse(at as u64, &head[..length]) {
                Some(mut record) => {
                    self.pos += length;
                    self.stats.records += 1;
                    self.attach_path(&mut record);
                    return Some(record);
                }
                None => self.resync("undecodable record"),
            }
        }

        if !self.finished {
            self.finished = true;
            debug!(
                "USN pass done: {} records, {} resyncs, {} zero bytes skipped",
                self.stats.records, self.stats.resyncs, self.stats.zero_bytes
            );
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ntfs::structs::datetime_to_filetime;
    use chrono::TimeZone;

    pub(crate) fn v2_record(
        usn: u64,
        file: FileReference,
        parent: FileReference,
        filetime: u64,
        reason: u32,
        name: &str,
    ) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let len = (USN_V2_HEADER_SIZE + units.len() * 2).next_multiple_of(8);
        let mut r = vec![0u8; len];
        r[0..4].copy_from_slice(&(len as u32).to_le_bytes());
        r[4..6].copy_from_slice(&2u16.to_le_bytes());
        r[8..16].copy_from_slice(&file.to_u64().to_le_bytes());
        r[16..24].copy_from_slice(&parent.to_u64().to_le_bytes());
        r[24..32].copy_from_slice(&usn.to_le_bytes());
        r[32..40].copy_from_slice(&filetime.to_le_bytes());
        r[40..44].copy_from_slice(&reason.to_le_bytes());
        r[56..58].copy_from_slice(&((units.len() * 2) as u16).to_le_bytes());
        r[58..60].copy_from_slice(&60u16.to_le_bytes());
        for (i, u) in units.iter().enumerate() {
            r[60 + i * 2..62 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        r
    }

    fn v3_record(usn: u64, file: FileReference, name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let len = (USN_V3_HEADER_SIZE + units.len() * 2).next_multiple_of(8);
        let mut r = vec![0u8; len];
        r[0..4].copy_from_slice(&(len as u32).to_le_bytes());
        r[4..6].copy_from_slice(&3u16.to_le_bytes());
        r[8..16].copy_from_slice(&file.to_u64().to_le_bytes());
        r[24..32].copy_from_slice(&FileReference::new(5, 5).to_u64().to_le_bytes());
        r[40..48].copy_from_slice(&usn.to_le_bytes());
        r[48..56].copy_from_slice(&FT.to_le_bytes());
        r[56..60].copy_from_slice(&0x8000_0100u32.to_le_bytes());
        r[72..74].copy_from_slice(&((units.len() * 2) as u16).to_le_bytes());
        r[74..76].copy_from_slice(&76u16.to_le_bytes());
        for (i, u) in units.iter().enumerate() {
            r[76 + i * 2..78 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        r
    }

    const FT: u64 = 133_000_000_000_000_000;

    fn file(entry: u64) -> FileReference {
        FileReference::new(entry, 1)
    }

    #[test]
    fn test_decode_v2_and_v3() {
        let mut buf = v2_record(0x100, file(40), FileReference::new(5, 5), FT, 0x0000_0102, "new.txt");
        buf.extend(v3_record(0x200, file(41), "v3.log"));

        let records: Vec<UsnRecord> = UsnDecoder::new(&buf, UsnConfig::default()).records().collect();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.file_name, "new.txt");
        assert_eq!(first.file_reference, file(40));
        assert_eq!(first.reasons, vec![UsnReason::DataExtend, UsnReason::FileCreate]);
        assert_eq!(first.reason_string(), "DATA_EXTEND|FILE_CREATE");
        assert_eq!(first.timestamp.map(datetime_to_filetime), Some(FT));
        assert_eq!(first.offset, 0);

        let second = &records[1];
        assert_eq!(second.major_version, 3);
        assert_eq!(second.usn, 0x200);
        assert!(second.has_reason(UsnReason::Close));
        assert!(second.has_reason(UsnReason::FileCreate));
        // 60-byte header + 14 bytes of name, padded to 80
        assert_eq!(second.offset, first.offset + 80);
    }

    #[test]
    fn test_every_reason_bit_decodes() {
        let all = UsnReason::ALL.iter().fold(0u32, |m, (bit, _)| m | bit);
        assert_eq!(UsnReason::decode(all).len(), 23);
        assert_eq!(UsnReason::decode(0x0400_0000), Vec::<UsnReason>::new());
        assert_eq!(UsnReason::RenameNewName.bit(), 0x2000);
        assert_eq!(
            UsnSourceInfo::decode(0x5),
            vec![UsnSourceInfo::DataManagement, UsnSourceInfo::ReplicationManagement]
        );
    }

    #[test]
    fn test_sparse_gap_resync_is_idempotent() {
        let mut buf = vec![0u8; 3 * 4096];
        let rec_a = v2_record(0x3000, file(50), FileReference::new(5, 5), FT, 0x100, "a.bin");
        let rec_b = v2_record(0x3048, file(51), FileReference::new(5, 5), FT, 0x100, "b.bin");
        buf.extend(&rec_a);
        buf.extend(&rec_b);

        let from_start: Vec<u64> = UsnDecoder::new(&buf, UsnConfig::default())
            .records()
            .map(|r| r.usn)
            .collect();
        let from_inside: Vec<u64> = UsnDecoder::new(
            &buf,
            UsnConfig {
                start_offset: 5000,
                ..Default::default()
            },
        )
        .records()
        .map(|r| r.usn)
        .collect();

        assert_eq!(from_start, vec![0x3000, 0x3048]);
        assert_eq!(from_start, from_inside);
    }

    #[test]
    fn test_garbage_jumps_to_next_page() {
        let mut buf = v2_record(1, file(60), FileReference::new(5, 5), FT, 0x100, "x");
        let mut junk = vec![0xEEu8; 64];
        junk[0..4].copy_from_slice(&0x0000_00F3u32.to_le_bytes());
        buf.extend(junk);
        buf.resize(4096, 0x11);
        buf.extend(v2_record(2, file(61), FileReference::new(5, 5), FT, 0x200, "y"));

        let mut iter = UsnDecoder::new(&buf, UsnConfig::default()).records();
        let usns: Vec<u64> = iter.by_ref().map(|r| r.usn).collect();
        assert_eq!(usns, vec![1, 2]);
        assert_eq!(iter.stats().resyncs, 1);
        assert_eq!(iter.stats().records, 2);
    }

    #[test]
    fn test_v4_records_are_skipped() {
        let mut v4 = vec![0u8; 80];
        v4[0..4].copy_from_slice(&80u32.to_le_bytes());
        v4[4..6].copy_from_slice(&4u16.to_le_bytes());
        let mut buf = v4;
        buf.extend(v2_record(9, file(70), FileReference::new(5, 5), FT, 0x8000_0000, "after.txt"));

        let mut iter = UsnDecoder::new(&buf, UsnConfig::default()).records();
        let names: Vec<String> = iter.by_ref().map(|r| r.file_name).collect();
        assert_eq!(names, vec!["after.txt".to_string()]);
        assert_eq!(iter.stats().v4_skipped, 1);
        assert_eq!(iter.stats().resyncs, 0);
    }

    #[test]
    fn test_paths_from_index() {
        let mut index = MftIndex::new(8);
        index.insert(FileReference::new(30, 2), FileReference::new(5, 5), "docs".into());
        index.insert(file(31), FileReference::new(30, 2), "live.txt".into());

        let mut buf = v2_record(1, file(31), FileReference::new(30, 2), FT, 0x2, "live.txt");
        // slot 32 was never indexed: fall back to parent + name
        buf.extend(v2_record(2, file(32), FileReference::new(30, 2), FT, 0x200, "gone.txt"));
        // parent unknown too: name only
        buf.extend(v2_record(3, file(33), file(99), FT, 0x100, "lost.txt"));

        let records: Vec<UsnRecord> = UsnDecoder::new(&buf, UsnConfig::default())
            .with_index(&index)
            .records()
            .collect();
        assert_eq!(records[0].path.as_deref(), Some("\\docs\\live.txt"));
        assert_eq!(records[1].path.as_deref(), Some("\\docs\\gone.txt"));
        assert_eq!(records[2].path, None);
        assert_eq!(records[2].file_name, "lost.txt");

        let expected = Utc.timestamp_opt(filetime_to_unix_secs(FT), 0).single();
        assert_eq!(records[0].timestamp, expected);
    }

    fn filetime_to_unix_secs(ft: u64) -> i64 {
        crate::ntfs::structs::filetime_to_unix(ft)
    }
}
