//! `$LogFile` decoder
//!
//! The log starts with two restart pages (`RSTR`, or `CHKD` after chkdsk)
//! followed by record pages (`RCRD`). Each record page carries an update
//! sequence array like a file record. Log records are packed back to back in
//! the data area of a page and may continue in the data area of the pages that
//! follow.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use tracing::{debug, info, trace, warn};

use crate::error::{NtfsTraceError, Result};
use crate::ntfs::mft::MftRecord;
use crate::ntfs::structs::*;

/// "RSTR"
pub const RSTR_MAGIC: u32 = 0x52545352;
/// "CHKD", restart page rewritten by chkdsk
pub const CHKD_MAGIC: u32 = 0x444B4843;
/// "RCRD"
pub const RCRD_MAGIC: u32 = 0x44524352;

/// Log record header length
pub const LOG_RECORD_HEADER_SIZE: usize = 0x30;
/// NTFS client header preceding the LCN list
pub const CLIENT_HEADER_SIZE: usize = 0x20;
/// Fixed part of an RCRD page header; the update sequence array follows
const RCRD_HEADER_SIZE: usize = 0x28;

const LOG_RECORD_MULTI_PAGE: u16 = 0x0001;

// ============================================================================
// Configuration
// ============================================================================

/// Volume geometry used to map log targets onto MFT entries
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub cluster_size: u32,
    pub mft_record_size: u32,
    /// Restart page size assumed when the first restart page is unreadable
    pub system_page_size: u32,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            cluster_size: 4096,
            mft_record_size: DEFAULT_MFT_RECORD_SIZE,
            system_page_size: 4096,
        }
    }
}

// ============================================================================
// Restart area
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RestartArea {
    pub page_offset: u64,
    /// Page carried the `CHKD` signature
    pub chkdsk: bool,
    pub chkdsk_lsn: u64,
    pub system_page_size: u32,
    pub log_page_size: u32,
    pub major_version: i16,
    pub minor_version: i16,
    pub current_lsn: u64,
    pub log_clients: u16,
    pub flags: u16,
    pub seq_number_bits: u32,
    pub file_size: u64,
    pub log_record_header_length: u16,
    pub log_page_data_offset: u16,
    pub restart_log_open_count: u32,
}

impl RestartArea {
    /// Parse and verify a restart page. `page` must be exactly one system page.
    pub fn parse(page_offset: u64, page: &[u8]) -> Option<Self> {
        let mut c = Cursor::new(page);
        let magic = c.read_u32::<LittleEndian>().ok()?;
        if magic != RSTR_MAGIC && magic != CHKD_MAGIC {
            return None;
        }
        let usa_offset = c.read_u16::<LittleEndian>().ok()?;
        let usa_count = c.read_u16::<LittleEndian>().ok()?;
        let chkdsk_lsn = c.read_u64::<LittleEndian>().ok()?;
        let system_page_size = c.read_u32::<LittleEndian>().ok()?;
        let log_page_size = c.read_u32::<LittleEndian>().ok()?;
        let restart_offset = c.read_u16::<LittleEndian>().ok()? as usize;
        let minor_version = c.read_i16::<LittleEndian>().ok()?;
        let major_version = c.read_i16::<LittleEndian>().ok()?;

        if !is_page_size(system_page_size) || !is_page_size(log_page_size) {
            return None;
        }
        if system_page_size as usize != page.len() {
            return None;
        }

        let mut fixed = page.to_vec();
        if apply_fixup(&mut fixed, usa_offset, usa_count) != FixupStatus::Ok {
            return None;
        }

        if restart_offset + 0x30 > fixed.len() {
            return None;
        }
        let mut c = Cursor::new(&fixed[restart_offset..]);
        let current_lsn = c.read_u64::<LittleEndian>().ok()?;
        let log_clients = c.read_u16::<LittleEndian>().ok()?;
        let _client_free_list = c.read_u16::<LittleEndian>().ok()?;
        let _client_in_use_list = c.read_u16::<LittleEndian>().ok()?;
        let flags = c.read_u16::<LittleEndian>().ok()?;
        let seq_number_bits = c.read_u32::<LittleEndian>().ok()?;
        let _restart_area_length = c.read_u16::<LittleEndian>().ok()?;
        let _client_array_offset = c.read_u16::<LittleEndian>().ok()?;
        let file_size = c.read_u64::<LittleEndian>().ok()?;
        let _last_lsn_data_length = c.read_u32::<LittleEndian>().ok()?;
        let log_record_header_length = c.read_u16::<LittleEndian>().ok()?;
        let log_page_data_offset = c.read_u16::<LittleEndian>().ok()?;
        let restart_log_open_count = c.read_u32::<LittleEndian>().ok()?;

        Some(Self {
            page_offset,
            chkdsk: magic == CHKD_MAGIC,
            chkdsk_lsn,
            system_page_size,
            log_page_size,
            major_version,
            minor_version,
            current_lsn,
            log_clients,
            flags,
            seq_number_bits,
            file_size,
            log_record_header_length,
            log_page_data_offset,
            restart_log_open_count,
        })
    }

    /// Start of the record area in a log page, falling back to the header + USA size
    pub fn page_data_offset(&self) -> usize {
        let page = self.log_page_size as usize;
        let offset = self.log_page_data_offset as usize;
        if offset >= RCRD_HEADER_SIZE && offset < page && offset % 8 == 0 {
            offset
        } else {
            (RCRD_HEADER_SIZE + (page / SECTOR_SIZE as usize + 1) * 2).next_multiple_of(8)
        }
    }
}

fn is_page_size(size: u32) -> bool {
    (512..=65536).contains(&size) && size.is_power_of_two()
}

// ============================================================================
// Operations
// ============================================================================

/// Redo/undo operation codes of the NTFS log client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogOperation {
    Noop,
    CompensationLogRecord,
    InitializeFileRecordSegment,
    DeallocateFileRecordSegment,
    WriteEndOfFileRecordSegment,
    CreateAttribute,
    DeleteAttribute,
    UpdateResidentValue,
    UpdateNonresidentValue,
    UpdateMappingPairs,
    DeleteDirtyClusters,
    SetNewAttributeSizes,
    AddIndexEntryRoot,
    DeleteIndexEntryRoot,
    AddIndexEntryAllocation,
    DeleteIndexEntryAllocation,
    WriteEndOfIndexBuffer,
    SetIndexEntryVcnRoot,
    SetIndexEntryVcnAllocation,
    UpdateFileNameRoot,
    UpdateFileNameAllocation,
    SetBitsInNonresidentBitMap,
    ClearBitsInNonresidentBitMap,
    HotFix,
    EndTopLevelAction,
    PrepareTransaction,
    CommitTransaction,
    ForgetTransaction,
    OpenNonresidentAttribute,
    OpenAttributeTableDump,
    AttributeNamesDump,
    DirtyPageTableDump,
    TransactionTableDump,
    UpdateRecordDataRoot,
    UpdateRecordDataAllocation,
    Unknown(u16),
}

impl LogOperation {
    pub fn from_u16(code: u16) -> Self {
        use LogOperation::*;
        match code {
            0x00 => Noop,
            0x01 => CompensationLogRecord,
            0x02 => InitializeFileRecordSegment,
            0x03 => DeallocateFileRecordSegment,
            0x04 => WriteEndOfFileRecordSegment,
            0x05 => CreateAttribute,
            0x06 => DeleteAttribute,
            0x07 => UpdateResidentValue,
            0x08 => UpdateNonresidentValue,
            0x09 => UpdateMappingPairs,
            0x0A => DeleteDirtyClusters,
            0x0B => SetNewAttributeSizes,
            0x0C => AddIndexEntryRoot,
            0x0D => DeleteIndexEntryRoot,
            0x0E => AddIndexEntryAllocation,
            0x0F => DeleteIndexEntryAllocation,
            0x10 => WriteEndOfIndexBuffer,
            0x11 => SetIndexEntryVcnRoot,
            0x12 => SetIndexEntryVcnAllocation,
            0x13 => UpdateFileNameRoot,
            0x14 => UpdateFileNameAllocation,
            0x15 => SetBitsInNonresidentBitMap,
            0x16 => ClearBitsInNonresidentBitMap,
            0x17 => HotFix,
            0x18 => EndTopLevelAction,
            0x19 => PrepareTransaction,
            0x1A => CommitTransaction,
            0x1B => ForgetTransaction,
            0x1C => OpenNonresidentAttribute,
            0x1D => OpenAttributeTableDump,
            0x1E => AttributeNamesDump,
            0x1F => DirtyPageTableDump,
            0x20 => TransactionTableDump,
            0x21 => UpdateRecordDataRoot,
            0x22 => UpdateRecordDataAllocation,
            other => Unknown(other),
        }
    }

    /// Does this operation address an MFT file record?
    pub fn targets_file_record(&self) -> bool {
        use LogOperation::*;
        matches!(
            self,
            InitializeFileRecordSegment
                | DeallocateFileRecordSegment
                | WriteEndOfFileRecordSegment
                | CreateAttribute
                | DeleteAttribute
                | UpdateResidentValue
                | UpdateMappingPairs
                | SetNewAttributeSizes
                | AddIndexEntryRoot
                | DeleteIndexEntryRoot
                | SetIndexEntryVcnRoot
                | UpdateFileNameRoot
                | UpdateRecordDataRoot
        )
    }
}

impl std::fmt::Display for LogOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogOperation::Unknown(code) => write!(f, "Unknown({:#04x})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Decoded redo or undo data
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogPayload {
    None,
    /// Image of a file record (InitializeFileRecordSegment)
    FileRecord {
        sequence: u16,
        in_use: bool,
        is_directory: bool,
        standard_information: Option<StandardInformation>,
        file_names: Vec<FileNameAttribute>,
    },
    /// Attribute record (CreateAttribute / DeleteAttribute)
    Attribute {
        type_code: u32,
        type_name: &'static str,
        name: String,
        non_resident: bool,
        standard_information: Option<StandardInformation>,
        file_name: Option<FileNameAttribute>,
    },
    /// Raw bytes written into a resident value
    ByteRange { length: usize, preview: String },
    Sizes {
        allocated_size: u64,
        data_size: u64,
        initialized_size: u64,
        compressed_size: Option<u64>,
    },
    /// Directory index entry keyed by a FILE_NAME
    IndexEntry {
        indexed_file: FileReference,
        file_name: FileNameAttribute,
    },
    /// Duplicated information refreshed in a directory index
    DuplicatedInfo {
        timestamps: NtfsTimestamps,
        allocated_size: u64,
        data_size: u64,
        file_attributes: u32,
    },
    Opaque { length: usize },
}

impl LogPayload {
    /// Decode the data of one side of a record according to its operation
    pub fn decode(op: LogOperation, data: &[u8], target_entry: Option<u64>) -> Self {
        if data.is_empty() {
            return LogPayload::None;
        }

        use LogOperation::*;
        let decoded = match op {
            InitializeFileRecordSegment => decode_file_record(data, target_entry.unwrap_or(0)),
            CreateAttribute | DeleteAttribute => decode_attribute(data),
            UpdateResidentValue => Some(LogPayload::ByteRange {
                length: data.len(),
                preview: hex_preview(data, 32),
            }),
            SetNewAttributeSizes => decode_sizes(data),
            AddIndexEntryRoot | DeleteIndexEntryRoot | AddIndexEntryAllocation
            | DeleteIndexEntryAllocation => decode_index_entry(data),
            UpdateFileNameRoot | UpdateFileNameAllocation => {
                decode_index_entry(data).or_else(|| decode_duplicated_info(data))
            }
            _ => None,
        };

        decoded.unwrap_or(LogPayload::Opaque { length: data.len() })
    }

    /// File names mentioned in the payload
    pub fn file_names(&self) -> Vec<&FileNameAttribute> {
        match self {
            LogPayload::FileRecord { file_names, .. } => file_names.iter().collect(),
            LogPayload::Attribute {
                file_name: Some(name),
                ..
            } => vec![name],
            LogPayload::IndexEntry { file_name, .. } => vec![file_name],
            _ => Vec::new(),
        }
    }

    /// Latest timestamp carried by the payload
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        let mut stamps: Vec<DateTime<Utc>> = Vec::new();
        match self {
            LogPayload::FileRecord {
                standard_information,
                file_names,
                ..
            } => {
                stamps.extend(standard_information.iter().filter_map(|si| si.timestamps.latest()));
                stamps.extend(file_names.iter().filter_map(|f| f.timestamps.latest()));
            }
            LogPayload::Attribute {
                standard_information,
                file_name,
                ..
            } => {
                stamps.extend(standard_information.iter().filter_map(|si| si.timestamps.latest()));
                stamps.extend(file_name.iter().filter_map(|f| f.timestamps.latest()));
            }
            LogPayload::IndexEntry { file_name, .. } => stamps.extend(file_name.timestamps.latest()),
            LogPayload::DuplicatedInfo { timestamps, .. } => stamps.extend(timestamps.latest()),
            _ => {}
        }
        stamps.into_iter().max()
    }
}

fn decode_file_record(data: &[u8], entry: u64) -> Option<LogPayload> {
    let record = MftRecord::decode_logged(entry, data);
    if !record.is_decoded() {
        return None;
    }
    Some(LogPayload::FileRecord {
        sequence: record.sequence,
        in_use: record.in_use,
        is_directory: record.is_directory,
        standard_information: record.standard_information,
        file_names: record.file_names,
    })
}

fn decode_attribute(data: &[u8]) -> Option<LogPayload> {
    let header = AttributeHeader::from_bytes(data)?;
    let kind = AttributeType::from_u32(header.attribute_type);
    let name = header.name(data);

    let mut standard_information = None;
    let mut file_name = None;
    if !header.non_resident {
        if let Some(value) = ResidentAttributeHeader::from_bytes(data).and_then(|r| r.value(data)) {
            match kind {
                Some(AttributeType::StandardInformation) => {
                    standard_information = StandardInformation::from_bytes(value)
                }
                Some(AttributeType::FileName) => file_name = FileNameAttribute::from_bytes(value),
                _ => {}
            }
        }
    }

    Some(LogPayload::Attribute {
        type_code: header.attribute_type,
        type_name: kind.map(|k| k.name()).unwrap_or("UNKNOWN"),
        name,
        non_resident: header.non_resident,
        standard_information,
        file_name,
    })
}

fn decode_sizes(data: &[u8]) -> Option<LogPayload> {
    let mut c = Cursor::new(data);
    let allocated_size = c.read_u64::<LittleEndian>().ok()?;
    let data_size = c.read_u64::<LittleEndian>().ok()?;
    let initialized_size = c.read_u64::<LittleEndian>().ok()?;
    let compressed_size = c.read_u64::<LittleEndian>().ok();
    Some(LogPayload::Sizes {
        allocated_size,
        data_size,
        initialized_size,
        compressed_size,
    })
}

fn decode_index_entry(data: &[u8]) -> Option<LogPayload> {
    let mut c = Cursor::new(data);
    let indexed = c.read_u64::<LittleEndian>().ok()?;
    let entry_length = c.read_u16::<LittleEndian>().ok()? as usize;
    let key_length = c.read_u16::<LittleEndian>().ok()? as usize;

    if key_length == 0 || entry_length < 16 + key_length || 16 + key_length > data.len() {
        return None;
    }
    let file_name = FileNameAttribute::from_bytes(&data[16..16 + key_length])?;
    Some(LogPayload::IndexEntry {
        indexed_file: FileReference::from_u64(indexed),
        file_name,
    })
}

fn decode_duplicated_info(data: &[u8]) -> Option<LogPayload> {
    if data.len() < 52 {
        return None;
    }
    let mut c = Cursor::new(data);
    let created = c.read_u64::<LittleEndian>().ok()?;
    let modified = c.read_u64::<LittleEndian>().ok()?;
    let mft_modified = c.read_u64::<LittleEndian>().ok()?;
    let accessed = c.read_u64::<LittleEndian>().ok()?;
    Some(LogPayload::DuplicatedInfo {
        timestamps: NtfsTimestamps::from_filetimes(created, modified, mft_modified, accessed),
        allocated_size: c.read_u64::<LittleEndian>().ok()?,
        data_size: c.read_u64::<LittleEndian>().ok()?,
        file_attributes: c.read_u32::<LittleEndian>().ok()?,
    })
}

fn hex_preview(data: &[u8], max: usize) -> String {
    data.iter().take(max).map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogRecordStatus {
    Complete,
    /// Cut off by the end of the buffer or an unreadable continuation page
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogRecordType {
    Normal,
    Checkpoint,
    Other(u32),
}

impl LogRecordType {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => LogRecordType::Normal,
            2 => LogRecordType::Checkpoint,
            other => LogRecordType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFileRecord {
    /// Offset of the page the record starts in
    pub page_offset: u64,
    /// Absolute byte offset of the record header
    pub offset: u64,
    pub lsn: u64,
    pub previous_lsn: u64,
    pub undo_next_lsn: u64,
    pub transaction_id: u32,
    pub record_type: LogRecordType,
    pub flags: u16,
    pub redo_operation: LogOperation,
    pub undo_operation: LogOperation,
    pub redo_length: u16,
    pub undo_length: u16,
    pub target_attribute: u16,
    pub record_offset: u16,
    pub attribute_offset: u16,
    pub cluster_block_offset: u16,
    pub target_vcn: u64,
    pub lcns: Vec<u64>,
    /// MFT entry addressed by the record; no sequence number is logged
    pub target_entry: Option<u64>,
    pub redo: LogPayload,
    pub undo: LogPayload,
    pub status: LogRecordStatus,
}

impl LogFileRecord {
    /// Latest timestamp in either payload
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.redo
            .latest_timestamp()
            .into_iter()
            .chain(self.undo.latest_timestamp())
            .max()
    }

    /// First file name mentioned in redo, then undo data
    pub fn file_name(&self) -> Option<&str> {
        self.redo
            .file_names()
            .into_iter()
            .chain(self.undo.file_names())
            .next()
            .map(|f| f.name.as_str())
    }

    /// Short "redo/undo" label
    pub fn operation_label(&self) -> String {
        format!("{}/{}", self.redo_operation, self.undo_operation)
    }
}

/// Record header plus the NTFS client header, decoded from the stitched bytes
fn decode_record(
    bytes: &[u8],
    page_offset: u64,
    offset: u64,
    status: LogRecordStatus,
    geometry: &LogFileConfig,
) -> Option<LogFileRecord> {
    let mut c = Cursor::new(bytes);
    let lsn = c.read_u64::<LittleEndian>().ok()?;
    let previous_lsn = c.read_u64::<LittleEndian>().ok()?;
    let undo_next_lsn = c.read_u64::<LittleEndian>().ok()?;
    let _client_data_length = c.read_u32::<LittleEndian>().ok()?;
    let _client_id = c.read_u32::<LittleEndian>().ok()?;
    let record_type = LogRecordType::from_u32(c.read_u32::<LittleEndian>().ok()?);
    let transaction_id = c.read_u32::<LittleEndian>().ok()?;
    let flags = c.read_u16::<LittleEndian>().ok()?;

    let mut record = LogFileRecord {
        page_offset,
        offset,
        lsn,
        previous_lsn,
        undo_next_lsn,
        transaction_id,
        record_type,
        flags,
        redo_operation: LogOperation::Noop,
        undo_operation: LogOperation::Noop,
        redo_length: 0,
        undo_length: 0,
        target_attribute: 0,
        record_offset: 0,
        attribute_offset: 0,
        cluster_block_offset: 0,
        target_vcn: 0,
        lcns: Vec::new(),
        target_entry: None,
        redo: LogPayload::None,
        undo: LogPayload::None,
        status,
    };

    let client = &bytes[LOG_RECORD_HEADER_SIZE.min(bytes.len())..];
    if record_type != LogRecordType::Normal || client.len() < CLIENT_HEADER_SIZE {
        return Some(record);
    }

    let mut c = Cursor::new(client);
    let redo_op = c.read_u16::<LittleEndian>().ok()?;
    let undo_op = c.read_u16::<LittleEndian>().ok()?;
    let redo_offset = c.read_u16::<LittleEndian>().ok()? as usize;
    record.redo_length = c.read_u16::<LittleEndian>().ok()?;
    let undo_offset = c.read_u16::<LittleEndian>().ok()? as usize;
    record.undo_length = c.read_u16::<LittleEndian>().ok()?;
    record.target_attribute = c.read_u16::<LittleEndian>().ok()?;
    let lcns_to_follow = c.read_u16::<LittleEndian>().ok()? as usize;
    record.record_offset = c.read_u16::<LittleEndian>().ok()?;
    record.attribute_offset = c.read_u16::<LittleEndian>().ok()?;
    record.cluster_block_offset = c.read_u16::<LittleEndian>().ok()?;
    let _target_block_size = c.read_u16::<LittleEndian>().ok()?;
    record.target_vcn = c.read_u64::<LittleEndian>().ok()?;
    for _ in 0..lcns_to_follow {
        match c.read_u64::<LittleEndian>() {
            Ok(lcn) => record.lcns.push(lcn),
            Err(_) => break,
        }
    }

    record.redo_operation = LogOperation::from_u16(redo_op);
    record.undo_operation = LogOperation::from_u16(undo_op);

    // index allocation and transaction records address no MFT slot
    if record.redo_operation.targets_file_record() || record.undo_operation.targets_file_record() {
        let record_size = geometry.mft_record_size.max(1) as u64;
        let target_byte = record
            .target_vcn
            .saturating_mul(geometry.cluster_size as u64)
            .saturating_add(record.cluster_block_offset as u64 * SECTOR_SIZE as u64);
        record.target_entry = Some(target_byte / record_size);
    }

    record.redo = LogPayload::decode(
        record.redo_operation,
        clamped(client, redo_offset, record.redo_length),
        record.target_entry,
    );
    record.undo = LogPayload::decode(
        record.undo_operation,
        clamped(client, undo_offset, record.undo_length),
        record.target_entry,
    );

    Some(record)
}

/// Redo/undo slice, cut short when the record was truncated
fn clamped(client: &[u8], offset: usize, length: u16) -> &[u8] {
    let start = offset.min(client.len());
    let end = (offset + length as usize).min(client.len());
    &client[start..end]
}

// ============================================================================
// Decoder
// ============================================================================

/// Counters for one pass over the record pages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub pages: u64,
    pub skipped_pages: u64,
    pub torn_pages: u64,
    pub records: u64,
    pub truncated: u64,
    pub duplicates: u64,
}

pub struct LogFileDecoder<'a> {
    data: &'a [u8],
    config: LogFileConfig,
    restart: RestartArea,
    candidates: Vec<RestartArea>,
}

impl<'a> LogFileDecoder<'a> {
    /// Verify the restart pages and select the newest one
    pub fn open(data: &'a [u8], config: LogFileConfig) -> Result<Self> {
        let first_page_size = data
            .get(0x10..0x14)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .filter(|&s| is_page_size(s))
            .unwrap_or(config.system_page_size) as usize;

        let mut candidates = Vec::new();
        for offset in [0usize, first_page_size] {
            let Some(page) = data.get(offset..offset + first_page_size) else {
                continue;
            };
            match RestartArea::parse(offset as u64, page) {
                Some(area) => {
                    debug!(
                        "Restart page at {:#x}: current LSN {:#x}, v{}.{}",
                        offset, area.current_lsn, area.major_version, area.minor_version
                    );
                    candidates.push(area);
                }
                None => warn!("Restart page at {:#x} is invalid", offset),
            }
        }

        let restart = candidates
            .iter()
            .fold(None::<&RestartArea>, |best, area| match best {
                Some(b) if b.current_lsn >= area.current_lsn => Some(b),
                _ => Some(area),
            })
            .cloned()
            .ok_or_else(|| NtfsTraceError::format("no valid $LogFile restart page"))?;

        info!(
            "LogFile session: {} bytes, restart page {:#x} selected (LSN {:#x})",
            data.len(),
            restart.page_offset,
            restart.current_lsn
        );

        Ok(Self {
            data,
            config,
            restart,
            candidates,
        })
    }

    pub fn restart_area(&self) -> &RestartArea {
        &self.restart
    }

    /// Every restart page that verified
    pub fn restart_candidates(&self) -> &[RestartArea] {
        &self.candidates
    }

    pub fn records(&self) -> LogRecords<'a> {
        let page_size = self.restart.log_page_size as usize;
        let start = 2 * self.restart.system_page_size as usize;
        LogRecords {
            data: self.data,
            geometry: self.config.clone(),
            page_size,
            data_offset: self.restart.page_data_offset(),
            cursor: Some((start, 0)),
            queue: VecDeque::new(),
            seen: HashSet::new(),
            stats: LogStats::default(),
        }
    }
}

/// Lazy, single-pass iterator over log records in page order
pub struct LogRecords<'a> {
    data: &'a [u8],
    geometry: LogFileConfig,
    page_size: usize,
    data_offset: usize,
    /// Next page to walk and the position inside it
    cursor: Option<(usize, usize)>,
    queue: VecDeque<LogFileRecord>,
    seen: HashSet<u64>,
    stats: LogStats,
}

impl LogRecords<'_> {
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    /// Fixed-up copy of a record page, `None` if it is not an RCRD page.
    ///
    /// The final page of a cut buffer is padded to full size; only the sector
    /// tails that were actually read take part in the fixup.
    fn load_page(&mut self, offset: usize) -> Option<RecordPage> {
        let end = offset.checked_add(self.page_size)?.min(self.data.len());
        let raw = self.data.get(offset..end)?;
        if raw.len() < self.data_offset.max(RCRD_HEADER_SIZE) {
            return None;
        }
        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic != RCRD_MAGIC {
            return None;
        }
        let usa_offset = u16::from_le_bytes([raw[4], raw[5]]);
        let usa_count = u16::from_le_bytes([raw[6], raw[7]]);
        let next_record_offset = u16::from_le_bytes([raw[0x18], raw[0x19]]) as usize;
        let last_end_lsn = u64::from_le_bytes(raw[0x20..0x28].try_into().unwrap_or_default());

        let valid = raw.len();
        let mut bytes = raw.to_vec();
        bytes.resize(self.page_size, 0);
        if valid < self.page_size {
            debug!("Log page {:#x}: cut at {:#x} of {:#x} bytes", offset, valid, self.page_size);
        }

        match apply_fixup_within(&mut bytes, usa_offset, usa_count, valid) {
            FixupStatus::Ok => {}
            FixupStatus::Mismatch => {
                debug!("Log page {:#x}: torn write, decoding restored bytes", offset);
                self.stats.torn_pages += 1;
            }
            FixupStatus::Invalid => return None,
        }

        Some(RecordPage {
            bytes,
            valid,
            next_record_offset: (next_record_offset >= self.data_offset && next_record_offset <= self.page_size)
                .then_some(next_record_offset),
            last_end_lsn,
        })
    }

    /// Decode the records of one page; returns where to continue
    fn walk_page(&mut self, page_offset: usize, start: usize) -> (Vec<LogFileRecord>, Option<(usize, usize)>) {
        let mut out = Vec::new();
        let next_page = Some((page_offset + self.page_size, 0));

        let Some(page) = self.load_page(page_offset) else {
            trace!("Log page {:#x}: not a record page", page_offset);
            self.stats.skipped_pages += 1;
            return (out, next_page);
        };
        self.stats.pages += 1;
        let short = page.valid < self.page_size;

        let mut pos = start.max(self.data_offset);
        let mut last_lsn = 0u64;
        let mut reached_last_end = false;
        while pos + LOG_RECORD_HEADER_SIZE <= page.valid {
            let header = &page.bytes[pos..pos + LOG_RECORD_HEADER_SIZE];
            let lsn = u64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
            let previous = u64::from_le_bytes(header[8..16].try_into().unwrap_or_default());
            let client_len = u32::from_le_bytes(header[0x18..0x1C].try_into().unwrap_or_default()) as usize;
            let record_type = u32::from_le_bytes(header[0x20..0x24].try_into().unwrap_or_default());

            if lsn == 0
                || lsn <= last_lsn
                || (previous != 0 && previous >= lsn)
                || !(1..=2).contains(&record_type)
                || client_len > self.data.len()
            {
                break;
            }

            let total = LOG_RECORD_HEADER_SIZE + client_len;
            let record_start = (page_offset + pos) as u64;
            let fits = pos + total <= self.page_size;

            // Past the last record that ends on this page only a record
            // continuing onto the next page can follow
            if fits && (reached_last_end || page.next_record_offset.is_some_and(|end| pos >= end)) {
                trace!("Log page {:#x}: stale bytes at {:#x}", page_offset, pos);
                break;
            }

            if fits && pos + total <= page.valid {
                let status = if short {
                    LogRecordStatus::Truncated
                } else {
                    LogRecordStatus::Complete
                };
                if short {
                    self.stats.truncated += 1;
                }
                if let Some(record) = decode_record(
                    &page.bytes[pos..pos + total],
                    page_offset as u64,
                    record_start,
                    status,
                    &self.geometry,
                ) {
                    out.push(record);
                }
                last_lsn = lsn;
                reached_last_end = page.last_end_lsn != 0 && lsn == page.last_end_lsn;
                pos += total.next_multiple_of(8);
                continue;
            }

            if short {
                // the buffer ends inside this record
                debug!("Log record {:#x} at {:#x} cut by end of buffer", lsn, record_start);
                self.stats.truncated += 1;
                if let Some(record) = decode_record(
                    &page.bytes[pos..page.valid],
                    page_offset as u64,
                    record_start,
                    LogRecordStatus::Truncated,
                    &self.geometry,
                ) {
                    out.push(record);
                }
                return (out, None);
            }

            // Spans into the data areas of the following pages
            let flags = u16::from_le_bytes([header[0x28], header[0x29]]);
            if flags & LOG_RECORD_MULTI_PAGE == 0 {
                trace!("Log record {:#x} overruns its page without the multi-page flag", lsn);
            }

            let mut bytes = page.bytes[pos..].to_vec();
            let mut continuation = page_offset + self.page_size;
            let (status, resume) = loop {
                let need = total - bytes.len();
                let Some(next) = self.load_page(continuation) else {
                    // unreadable continuation page; the main loop skips it
                    let resume = (continuation < self.data.len()).then_some((continuation, 0));
                    break (LogRecordStatus::Truncated, resume);
                };
                let available = next.valid.saturating_sub(self.data_offset);
                let take = need.min(available);
                bytes.extend_from_slice(&next.bytes[self.data_offset..self.data_offset + take]);
                if take == need {
                    let resume_at = (self.data_offset + take).next_multiple_of(8);
                    break (LogRecordStatus::Complete, Some((continuation, resume_at)));
                }
                if next.valid < self.page_size {
                    break (LogRecordStatus::Truncated, None);
                }
                continuation += self.page_size;
            };

            if status == LogRecordStatus::Truncated {
                debug!("Log record {:#x} at {:#x} truncated", lsn, record_start);
                self.stats.truncated += 1;
            }

            if let Some(record) =
                decode_record(&bytes, page_offset as u64, record_start, status, &self.geometry)
            {
                out.push(record);
            }

            return (out, resume);
        }

        (out, next_page)
    }
}

/// One fixed-up RCRD page
struct RecordPage {
    /// Always a full page; bytes past `valid` are padding
    bytes: Vec<u8>,
    /// Bytes actually present in the buffer
    valid: usize,
    /// End of the last record that ends on this page
    next_record_offset: Option<usize>,
    last_end_lsn: u64,
}

impl Iterator for LogRecords<'_> {
    type Item = LogFileRecord;

    fn next(&mut self) -> Option<LogFileRecord> {
        loop {
            if let Some(record) = self.queue.pop_front() {
                return Some(record);
            }

            let (page, pos) = match self.cursor {
                Some((page, pos)) if page < self.data.len() => (page, pos),
                Some(_) => {
                    self.cursor = None;
                    debug!(
                        "LogFile pass done: {} records over {} pages, {} truncated, {} duplicates",
                        self.stats.records, self.stats.pages, self.stats.truncated, self.stats.duplicates
                    );
                    return None;
                }
                None => return None,
            };

            let (records, next) = self.walk_page(page, pos);
            self.cursor = next;
            for record in records {
                if self.seen.insert(record.lsn) {
                    self.stats.records += 1;
                    self.queue.push_back(record);
                } else {
                    self.stats.duplicates += 1;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ntfs::mft::tests::{fn_value, named_record, protect};

    const PAGE: usize = 4096;
    const DATA_OFFSET: usize = 0x40;
    const FT: u64 = 133_100_000_000_000_000;

    pub(crate) fn restart_page(magic: &[u8; 4], current_lsn: u64) -> Vec<u8> {
        let mut p = vec![0u8; PAGE];
        p[0..4].copy_from_slice(magic);
        p[4..6].copy_from_slice(&0x1Eu16.to_le_bytes());
        p[6..8].copy_from_slice(&9u16.to_le_bytes());
        p[0x10..0x14].copy_from_slice(&(PAGE as u32).to_le_bytes());
        p[0x14..0x18].copy_from_slice(&(PAGE as u32).to_le_bytes());
        p[0x18..0x1A].copy_from_slice(&0x30u16.to_le_bytes());
        p[0x1A..0x1C].copy_from_slice(&1i16.to_le_bytes());
        p[0x1C..0x1E].copy_from_slice(&1i16.to_le_bytes());
        let ra = 0x30;
        p[ra..ra + 8].copy_from_slice(&current_lsn.to_le_bytes());
        p[ra + 8..ra + 10].copy_from_slice(&1u16.to_le_bytes());
        p[ra + 0x18..ra + 0x20].copy_from_slice(&(64u64 * 1024 * 1024).to_le_bytes());
        p[ra + 0x24..ra + 0x26].copy_from_slice(&0x30u16.to_le_bytes());
        p[ra + 0x26..ra + 0x28].copy_from_slice(&(DATA_OFFSET as u16).to_le_bytes());
        protect(&mut p, 0x1E, 9, 0x0002);
        p
    }

    pub(crate) struct LogRecordFields<'s> {
        pub lsn: u64,
        pub redo_op: u16,
        pub undo_op: u16,
        pub redo: &'s [u8],
        pub undo: &'s [u8],
        pub target_vcn: u64,
        pub cluster_block_offset: u16,
    }

    pub(crate) fn log_record(fields: &LogRecordFields<'_>) -> Vec<u8> {
        let redo_off = CLIENT_HEADER_SIZE + 8;
        let undo_off = redo_off + fields.redo.len().next_multiple_of(8);
        let client_len = undo_off + fields.undo.len().next_multiple_of(8);
        let mut r = vec![0u8; (LOG_RECORD_HEADER_SIZE + client_len).next_multiple_of(8)];
        r[0..8].copy_from_slice(&fields.lsn.to_le_bytes());
        r[8..16].copy_from_slice(&fields.lsn.saturating_sub(0x10).to_le_bytes());
        r[0x18..0x1C].copy_from_slice(&(client_len as u32).to_le_bytes());
        r[0x20..0x24].copy_from_slice(&1u32.to_le_bytes());
        r[0x24..0x28].copy_from_slice(&0x18u32.to_le_bytes());

        let c = LOG_RECORD_HEADER_SIZE;
        r[c..c + 2].copy_from_slice(&fields.redo_op.to_le_bytes());
        r[c + 2..c + 4].copy_from_slice(&fields.undo_op.to_le_bytes());
        r[c + 4..c + 6].copy_from_slice(&(redo_off as u16).to_le_bytes());
        r[c + 6..c + 8].copy_from_slice(&(fields.redo.len() as u16).to_le_bytes());
        r[c + 8..c + 10].copy_from_slice(&(undo_off as u16).to_le_bytes());
        r[c + 10..c + 12].copy_from_slice(&(fields.undo.len() as u16).to_le_bytes());
        r[c + 14..c + 16].copy_from_slice(&1u16.to_le_bytes());
        r[c + 20..c + 22].copy_from_slice(&fields.cluster_block_offset.to_le_bytes());
        r[c + 24..c + 32].copy_from_slice(&fields.target_vcn.to_le_bytes());
        r[c + 32..c + 40].copy_from_slice(&0x1234u64.to_le_bytes());
        r[c + redo_off..c + redo_off + fields.redo.len()].copy_from_slice(fields.redo);
        r[c + undo_off..c + undo_off + fields.undo.len()].copy_from_slice(fields.undo);
        r
    }

    /// Lay records out over RCRD pages the way the log writer does
    pub(crate) fn record_pages(records: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut pages: Vec<Vec<u8>> = vec![new_rcrd_page()];
        let mut pos = DATA_OFFSET;
        for record in records {
            if pos + LOG_RECORD_HEADER_SIZE > PAGE {
                pages.push(new_rcrd_page());
                pos = DATA_OFFSET;
            }
            let mut written = 0;
            while written < record.len() {
                if pos == PAGE {
                    pages.push(new_rcrd_page());
                    pos = DATA_OFFSET;
                }
                let take = (record.len() - written).min(PAGE - pos);
                let page = pages.last_mut().unwrap();
                page[pos..pos + take].copy_from_slice(&record[written..written + take]);
                written += take;
                pos += take;
            }
        }
        for page in &mut pages {
            protect(page, RCRD_HEADER_SIZE, 9, 0x0003);
        }
        pages
    }

    fn new_rcrd_page() -> Vec<u8> {
        let mut p = vec![0u8; PAGE];
        p[0..4].copy_from_slice(b"RCRD");
        p[4..6].copy_from_slice(&(RCRD_HEADER_SIZE as u16).to_le_bytes());
        p[6..8].copy_from_slice(&9u16.to_le_bytes());
        p
    }

    fn index_entry(file: FileReference, key: &[u8]) -> Vec<u8> {
        let len = (16 + key.len()).next_multiple_of(8);
        let mut e = vec![0u8; len];
        e[0..8].copy_from_slice(&file.to_u64().to_le_bytes());
        e[8..10].copy_from_slice(&(len as u16).to_le_bytes());
        e[10..12].copy_from_slice(&(key.len() as u16).to_le_bytes());
        e[16..16 + key.len()].copy_from_slice(key);
        e
    }

    pub(crate) fn logfile(restarts: [Vec<u8>; 2], pages: Vec<Vec<u8>>) -> Vec<u8> {
        let [a, b] = restarts;
        let mut buf = a;
        buf.extend(b);
        for p in pages {
            buf.extend(p);
        }
        buf
    }

    fn simple(lsn: u64, redo_op: u16, undo_op: u16, redo: &[u8]) -> Vec<u8> {
        log_record(&LogRecordFields {
            lsn,
            redo_op,
            undo_op,
            redo,
            undo: &[],
            target_vcn: 0,
            cluster_block_offset: 0,
        })
    }

    #[test]
    fn test_restart_selection() {
        let pages = record_pages(&[simple(0x100, 0x00, 0x00, &[])]);

        let buf = logfile([restart_page(b"RSTR", 0x500), restart_page(b"RSTR", 0x800)], pages.clone());
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        assert_eq!(decoder.restart_area().page_offset, PAGE as u64);
        assert_eq!(decoder.restart_candidates().len(), 2);

        let mut broken = restart_page(b"RSTR", 0x900);
        broken[0..4].copy_from_slice(b"XXXX");
        let buf = logfile([restart_page(b"CHKD", 0x500), broken], pages.clone());
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        assert_eq!(decoder.restart_area().page_offset, 0);
        assert!(decoder.restart_area().chkdsk);
        assert_eq!(decoder.restart_area().page_data_offset(), DATA_OFFSET);

        let mut torn = restart_page(b"RSTR", 0x500);
        torn[PAGE - 2] ^= 0xFF;
        let buf = logfile([torn, vec![0u8; PAGE]], pages);
        assert!(matches!(
            LogFileDecoder::open(&buf, LogFileConfig::default()),
            Err(NtfsTraceError::Format(_))
        ));
    }

    #[test]
    fn test_decode_file_operations() {
        let parent = FileReference::new(5, 5);
        let image = named_record(3, 1, parent, "report.docx");
        let key = fn_value(parent, "report.docx", 1, FT);
        let entry = index_entry(FileReference::new(9, 3), &key);

        let init = log_record(&LogRecordFields {
            lsn: 0x1000,
            redo_op: 0x02,
            undo_op: 0x03,
            redo: &image[..0x200],
            undo: &[],
            target_vcn: 2,
            cluster_block_offset: 2,
        });
        let add = simple(0x1010, 0x0E, 0x0F, &entry);
        let sizes: Vec<u8> = [8192u64, 5000, 5000].iter().flat_map(|v| v.to_le_bytes()).collect();
        let resize = simple(0x1020, 0x0B, 0x0B, &sizes);
        let odd = simple(0x1030, 0x40, 0x00, &[1, 2, 3, 4]);

        let buf = logfile(
            [restart_page(b"RSTR", 0x2000), restart_page(b"RSTR", 0x1000)],
            record_pages(&[init, add, resize, odd]),
        );
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        let records: Vec<LogFileRecord> = decoder.records().collect();
        assert_eq!(records.len(), 4);

        let init = &records[0];
        assert_eq!(init.redo_operation, LogOperation::InitializeFileRecordSegment);
        assert_eq!(init.undo_operation, LogOperation::DeallocateFileRecordSegment);
        // (2 * 4096 + 2 * 512) / 1024
        assert_eq!(init.target_entry, Some(9));
        assert_eq!(init.lcns, vec![0x1234]);
        assert_eq!(init.file_name(), Some("report.docx"));
        assert!(init.latest_timestamp().is_some());
        match &init.redo {
            LogPayload::FileRecord { sequence, in_use, .. } => {
                assert_eq!(*sequence, 3);
                assert!(*in_use);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        match &records[1].redo {
            LogPayload::IndexEntry { indexed_file, file_name } => {
                assert_eq!(*indexed_file, FileReference::new(9, 3));
                assert_eq!(file_name.name, "report.docx");
                assert_eq!(file_name.parent_reference, parent);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(
            records[1].latest_timestamp(),
            filetime_to_datetime(FT)
        );

        assert!(matches!(
            records[2].redo,
            LogPayload::Sizes { data_size: 5000, compressed_size: None, .. }
        ));
        assert_eq!(records[3].redo_operation, LogOperation::Unknown(0x40));
        assert!(matches!(records[3].redo, LogPayload::Opaque { length: 4 }));
        assert_eq!(records[3].redo_operation.to_string(), "Unknown(0x40)");
    }

    #[test]
    fn test_records_spanning_pages_are_stitched() {
        let big = vec![0xABu8; 6000];
        let records = vec![
            simple(0x2000, 0x07, 0x07, &big),
            simple(0x2100, 0x1A, 0x00, &[]),
        ];
        let pages = record_pages(&records);
        assert_eq!(pages.len(), 2);

        let buf = logfile([restart_page(b"RSTR", 0x2100), restart_page(b"RSTR", 0x2000)], pages);
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        let mut iter = decoder.records();
        let decoded: Vec<LogFileRecord> = iter.by_ref().collect();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].status, LogRecordStatus::Complete);
        match &decoded[0].redo {
            LogPayload::ByteRange { length, preview } => {
                assert_eq!(*length, 6000);
                assert!(preview.starts_with("abab"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(decoded[1].redo_operation, LogOperation::CommitTransaction);
        assert_eq!(decoded[1].target_entry, None);
        assert_eq!(iter.stats().truncated, 0);
    }

    #[test]
    fn test_record_cut_by_end_of_buffer() {
        let big = vec![0x11u8; 6000];
        let mut pages = record_pages(&[simple(0x3000, 0x07, 0x07, &big)]);
        pages.truncate(1);

        let buf = logfile([restart_page(b"RSTR", 0x3000), restart_page(b"RSTR", 0x10)], pages);
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        let decoded: Vec<LogFileRecord> = decoder.records().collect();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].status, LogRecordStatus::Truncated);
        assert_eq!(decoded[0].lsn, 0x3000);
    }

    #[test]
    fn test_short_final_page_keeps_records_before_the_cut() {
        let pages = record_pages(&[simple(0x3000, 0x1A, 0x00, &[]), simple(0x3010, 0x1B, 0x00, &[])]);
        let mut buf = logfile([restart_page(b"RSTR", 0x3010), restart_page(b"RSTR", 0x3000)], pages);
        buf.truncate(2 * PAGE + 2048);

        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        let mut iter = decoder.records();
        let decoded: Vec<LogFileRecord> = iter.by_ref().collect();
        let lsns: Vec<u64> = decoded.iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![0x3000, 0x3010]);
        assert!(decoded.iter().all(|r| r.status == LogRecordStatus::Truncated));
        assert_eq!(decoded[1].redo_operation, LogOperation::CommitTransaction);
        assert_eq!(iter.stats().truncated, 2);
        assert_eq!(iter.stats().pages, 1);
    }

    #[test]
    fn test_buffer_ending_inside_a_record() {
        // 88-byte records from 0x40: the cut leaves the second one with its header only
        let pages = record_pages(&[simple(0x3000, 0x1A, 0x00, &[]), simple(0x3010, 0x1B, 0x00, &[])]);
        let mut buf = logfile([restart_page(b"RSTR", 0x3010), restart_page(b"RSTR", 0x3000)], pages);
        buf.truncate(2 * PAGE + DATA_OFFSET + 88 + 0x38);

        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        let mut iter = decoder.records();
        let decoded: Vec<LogFileRecord> = iter.by_ref().collect();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].lsn, 0x3010);
        assert_eq!(decoded[1].status, LogRecordStatus::Truncated);
        assert_eq!(iter.stats().truncated, 2);
    }

    #[test]
    fn test_stops_after_last_record_ending_on_page() {
        let records = [
            simple(0x3000, 0x1A, 0x00, &[]),
            simple(0x3010, 0x1B, 0x00, &[]),
            // leftover from an earlier pass over this page
            simple(0x3020, 0x1A, 0x00, &[]),
        ];
        let mut pages = record_pages(&records);
        pages[0][0x18..0x1A].copy_from_slice(&((DATA_OFFSET + 2 * 88) as u16).to_le_bytes());
        pages[0][0x20..0x28].copy_from_slice(&0x3010u64.to_le_bytes());

        let buf = logfile([restart_page(b"RSTR", 0x3010), restart_page(b"RSTR", 0x3000)], pages.clone());
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        let lsns: Vec<u64> = decoder.records().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![0x3000, 0x3010]);

        // the next-record offset alone bounds the page too
        pages[0][0x20..0x28].fill(0);
        let buf = logfile([restart_page(b"RSTR", 0x3010), restart_page(b"RSTR", 0x3000)], pages);
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        assert_eq!(decoder.records().count(), 2);
    }

    #[test]
    fn test_tail_copies_emitted_once() {
        let pages = record_pages(&[simple(0x4000, 0x1A, 0x00, &[]), simple(0x4010, 0x1B, 0x00, &[])]);
        let copy = pages[0].clone();
        let buf = logfile(
            [restart_page(b"RSTR", 0x4010), restart_page(b"RSTR", 0x4000)],
            vec![copy, pages[0].clone()],
        );
        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        let mut iter = decoder.records();
        let lsns: Vec<u64> = iter.by_ref().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![0x4000, 0x4010]);
        assert_eq!(iter.stats().duplicates, 2);
    }

    #[test]
    fn test_recovers_records_before_corruption() {
        // 112-byte records: 36 fill a page exactly
        let mut records = Vec::new();
        for i in 0..80u64 {
            records.push(simple(0x5000 + i * 0x10, 0x1A, 0x00, &[0u8; 24]));
        }
        let mut pages = record_pages(&records);
        assert_eq!(pages.len(), 3);
        pages[1][0..4].copy_from_slice(b"\0\0\0\0");

        let mut second = restart_page(b"RSTR", 0x9000);
        second[100] ^= 0x55;
        second[PAGE - 2] ^= 0x01;
        let buf = logfile([restart_page(b"RSTR", 0x5000), second], pages);

        let decoder = LogFileDecoder::open(&buf, LogFileConfig::default()).unwrap();
        assert_eq!(decoder.restart_area().page_offset, 0);
        let mut iter = decoder.records();
        let lsns: Vec<u64> = iter.by_ref().map(|r| r.lsn).collect();
        let before: Vec<u64> = (0..36u64).map(|i| 0x5000 + i * 0x10).collect();
        assert_eq!(&lsns[..36], &before[..]);
        assert_eq!(lsns.len(), 36 + 8);
        assert_eq!(iter.stats().skipped_pages, 1);
    }
}
