//! NTFS on-disk structures and constants

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;

// ============================================================================
// NTFS Constants
// ============================================================================

/// MFT record signature "FILE"
pub const MFT_RECORD_SIGNATURE: u32 = 0x454C4946; // "FILE" in little-endian

/// Bad MFT record signature "BAAD"
pub const MFT_RECORD_BAD_SIGNATURE: u32 = 0x44414142; // "BAAD"

/// End of attributes marker
pub const ATTRIBUTE_END_MARKER: u32 = 0xFFFFFFFF;

/// Standard MFT record size
pub const DEFAULT_MFT_RECORD_SIZE: u32 = 1024;

/// Standard sector size
pub const SECTOR_SIZE: u32 = 512;

/// Boot sector OEM id at offset 0x03
pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

/// Mask for the 48-bit entry number inside a file reference
pub const FILE_REFERENCE_ENTRY_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

// MFT Record Flags
pub const MFT_RECORD_IN_USE: u16 = 0x0001;
pub const MFT_RECORD_IS_DIRECTORY: u16 = 0x0002;
pub const MFT_RECORD_IN_EXTEND: u16 = 0x0004;
pub const MFT_RECORD_IS_VIEW_INDEX: u16 = 0x0008;

/// Well-known MFT entries
pub mod well_known {
    pub const MFT: u64 = 0;
    pub const MFT_MIRROR: u64 = 1;
    pub const LOG_FILE: u64 = 2;
    pub const VOLUME: u64 = 3;
    pub const ROOT: u64 = 5;
    pub const BITMAP: u64 = 6;
    pub const EXTEND: u64 = 11;
}

// ============================================================================
// File Reference
// ============================================================================

/// (entry number, sequence number) pair identifying one incarnation of an MFT slot.
///
/// The entry number alone is not stable: slots are recycled and the sequence
/// number is bumped each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct FileReference {
    pub entry: u64,
    pub sequence: u16,
}

impl FileReference {
    pub fn new(entry: u64, sequence: u16) -> Self {
        Self { entry, sequence }
    }

    /// Unpack the on-disk 64-bit form (48-bit entry, 16-bit sequence)
    pub fn from_u64(raw: u64) -> Self {
        Self {
            entry: raw & FILE_REFERENCE_ENTRY_MASK,
            sequence: (raw >> 48) as u16,
        }
    }

    pub fn to_u64(self) -> u64 {
        (self.entry & FILE_REFERENCE_ENTRY_MASK) | ((self.sequence as u64) << 48)
    }

    pub fn is_root(&self) -> bool {
        self.entry == well_known::ROOT
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.entry, self.sequence)
    }
}

// ============================================================================
// Attribute Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum AttributeType {
    StandardInformation = 0x10,
    AttributeList = 0x20,
    FileName = 0x30,
    ObjectId = 0x40,
    SecurityDescriptor = 0x50,
    VolumeName = 0x60,
    VolumeInformation = 0x70,
    Data = 0x80,
    IndexRoot = 0x90,
    IndexAllocation = 0xA0,
    Bitmap = 0xB0,
    ReparsePoint = 0xC0,
    EaInformation = 0xD0,
    Ea = 0xE0,
    LoggedUtilityStream = 0x100,
    End = 0xFFFFFFFF,
}

impl AttributeType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x10 => Some(Self::StandardInformation),
            0x20 => Some(Self::AttributeList),
            0x30 => Some(Self::FileName),
            0x40 => Some(Self::ObjectId),
            0x50 => Some(Self::SecurityDescriptor),
            0x60 => Some(Self::VolumeName),
            0x70 => Some(Self::VolumeInformation),
            0x80 => Some(Self::Data),
            0x90 => Some(Self::IndexRoot),
            0xA0 => Some(Self::IndexAllocation),
            0xB0 => Some(Self::Bitmap),
            0xC0 => Some(Self::ReparsePoint),
            0xD0 => Some(Self::EaInformation),
            0xE0 => Some(Self::Ea),
            0x100 => Some(Self::LoggedUtilityStream),
            0xFFFFFFFF => Some(Self::End),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StandardInformation => "$STANDARD_INFORMATION",
            Self::AttributeList => "$ATTRIBUTE_LIST",
            Self::FileName => "$FILE_NAME",
            Self::ObjectId => "$OBJECT_ID",
            Self::SecurityDescriptor => "$SECURITY_DESCRIPTOR",
            Self::VolumeName => "$VOLUME_NAME",
            Self::VolumeInformation => "$VOLUME_INFORMATION",
            Self::Data => "$DATA",
            Self::IndexRoot => "$INDEX_ROOT",
            Self::IndexAllocation => "$INDEX_ALLOCATION",
            Self::Bitmap => "$BITMAP",
            Self::ReparsePoint => "$REPARSE_POINT",
            Self::EaInformation => "$EA_INFORMATION",
            Self::Ea => "$EA",
            Self::LoggedUtilityStream => "$LOGGED_UTILITY_STREAM",
            Self::End => "END",
        }
    }
}

// ============================================================================
// Filename Namespace
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum FilenameNamespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl FilenameNamespace {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Posix),
            1 => Some(Self::Win32),
            2 => Some(Self::Dos),
            3 => Some(Self::Win32AndDos),
            _ => None,
        }
    }

    /// Display preference: Win32&DOS > Win32 > POSIX > DOS (higher wins)
    pub fn display_rank(&self) -> u8 {
        match self {
            Self::Win32AndDos => 3,
            Self::Win32 => 2,
            Self::Posix => 1,
            Self::Dos => 0,
        }
    }
}

// ============================================================================
// NTFS Boot Sector
// ============================================================================

/// Parsed NTFS boot sector (first 512 bytes of an NTFS partition)
#[derive(Debug, Clone)]
pub struct NtfsBootSector {
    /// OEM ID - must be "NTFS    " (8 bytes at offset 0x03)
    pub oem_id: [u8; 8],
    /// Bytes per sector (offset 0x0B, typically 512)
    pub bytes_per_sector: u16,
    /// Sectors per cluster (offset 0x0D, typically 8 -> 4096 byte clusters)
    pub sectors_per_cluster: u8,
    /// Total sectors on volume (offset 0x28)
    pub total_sectors: u64,
    /// MFT starting cluster number / LCN (offset 0x30)
    pub mft_cluster_number: u64,
    /// MFT mirror starting cluster number (offset 0x38)
    pub mft_mirror_cluster_number: u64,
    /// Clusters per MFT record (offset 0x40, signed)
    /// If negative, record size = 2^|value| bytes
    /// If positive, record size = value * bytes_per_cluster
    pub clusters_per_mft_record: i8,
    /// Clusters per index block (offset 0x44, signed, same encoding)
    pub clusters_per_index_block: i8,
    /// Volume serial number (offset 0x48)
    pub volume_serial_number: u64,
}

impl NtfsBootSector {
    /// Parse from raw 512-byte boot sector data
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 0x50 {
            return None;
        }

        let mut oem_id = [0u8; 8];
        oem_id.copy_from_slice(&data[0x03..0x0B]);

        let mut cursor = Cursor::new(data);
        cursor.set_position(0x0B);
        let bytes_per_sector = cursor.read_u16::<LittleEndian>().ok()?;
        let sectors_per_cluster = cursor.read_u8().ok()?;

        cursor.set_position(0x28);
        let total_sectors = cursor.read_u64::<LittleEndian>().ok()?;
        let mft_cluster_number = cursor.read_u64::<LittleEndian>().ok()?;
        let mft_mirror_cluster_number = cursor.read_u64::<LittleEndian>().ok()?;
        let clusters_per_mft_record = cursor.read_i8().ok()?;

        cursor.set_position(0x44);
        let clusters_per_index_block = cursor.read_i8().ok()?;

        cursor.set_position(0x48);
        let volume_serial_number = cursor.read_u64::<LittleEndian>().ok()?;

        Some(Self {
            oem_id,
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_cluster_number,
            mft_mirror_cluster_number,
            clusters_per_mft_record,
            clusters_per_index_block,
            volume_serial_number,
        })
    }

    /// Parse and validate in one step
    pub fn parse_valid(data: &[u8]) -> Option<Self> {
        Self::from_bytes(data).filter(|b| b.is_valid_ntfs())
    }

    /// Validate this is an NTFS boot sector
    pub fn is_valid_ntfs(&self) -> bool {
        &self.oem_id == NTFS_OEM_ID
            && self.bytes_per_sector >= 256
            && self.bytes_per_sector.is_power_of_two()
            && self.sectors_per_cluster > 0
            && self.sectors_per_cluster.is_power_of_two()
            && self.clusters_per_mft_record != 0
    }

    /// Calculate bytes per cluster
    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// Calculate bytes per MFT record
    /// If clusters_per_mft_record is negative, size = 2^|value|
    /// If positive, size = value * bytes_per_cluster
    pub fn bytes_per_mft_record(&self) -> u32 {
        if self.clusters_per_mft_record < 0 {
            let shift = (-(self.clusters_per_mft_record as i32)) as u32;
            if shift > 31 {
                return DEFAULT_MFT_RECORD_SIZE;
            }
            1u32 << shift
        } else {
            self.clusters_per_mft_record as u32 * self.bytes_per_cluster()
        }
    }

    /// Volume length in bytes
    pub fn volume_size(&self) -> u64 {
        self.total_sectors.saturating_mul(self.bytes_per_sector as u64)
    }

    /// Byte offset of the MFT from the start of the volume
    pub fn mft_byte_offset(&self) -> u64 {
        self.mft_cluster_number
            .saturating_mul(self.bytes_per_cluster() as u64)
    }
}

// ============================================================================
// Update Sequence Array (fixup)
// ============================================================================

/// Outcome of applying an update sequence array to a multi-sector structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixupStatus {
    /// Every sector carried the expected sequence value
    Ok,
    /// At least one sector tail did not match (torn write); bytes were still restored
    Mismatch,
    /// The array itself is out of bounds or inconsistent; nothing was changed
    Invalid,
}

/// Apply the update-sequence fixup in place.
///
/// NTFS stores the last 2 bytes of each sector in the update sequence array
/// and replaces them with a sequence number for integrity verification. The
/// sector stride is derived from the array length, so the same routine serves
/// 1K/4K file records and 4K log pages.
pub fn apply_fixup(data: &mut [u8], usa_offset: u16, usa_count: u16) -> FixupStatus {
    let valid = data.len();
    apply_fixup_within(data, usa_offset, usa_count, valid)
}

/// Fixup of a structure of which only the first `valid` bytes were read.
///
/// `data` spans the full structure so the stride stays correct; sectors whose
/// tail lies at or beyond `valid` are neither checked nor restored.
pub fn apply_fixup_within(data: &mut [u8], usa_offset: u16, usa_count: u16, valid: usize) -> FixupStatus {
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;
    let valid = valid.min(data.len());

    if usa_count < 2 || usa_offset + usa_count * 2 > valid {
        return FixupStatus::Invalid;
    }

    let sectors = usa_count - 1;
    if data.len() % sectors != 0 {
        return FixupStatus::Invalid;
    }
    let stride = data.len() / sectors;
    if stride < 256 || !stride.is_power_of_two() {
        return FixupStatus::Invalid;
    }

    let seq = [data[usa_offset], data[usa_offset + 1]];
    let mut torn = false;

    for i in 1..=sectors {
        let tail = i * stride - 2;
        if tail + 2 > valid {
            break;
        }
        let saved = usa_offset + i * 2;

        if data[tail] != seq[0] || data[tail + 1] != seq[1] {
            torn = true;
        }

        data[tail] = data[saved];
        data[tail + 1] = data[saved + 1];
    }

    if torn {
        FixupStatus::Mismatch
    } else {
        FixupStatus::Ok
    }
}

// ============================================================================
// MFT Record Header
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MftRecordHeader {
    pub signature: u32,
    pub update_sequence_offset: u16,
    pub update_sequence_size: u16,
    pub log_sequence_number: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub first_attribute_offset: u16,
    pub flags: u16,
    pub used_size: u32,
    pub allocated_size: u32,
    pub base_record_reference: u64,
    pub next_attribute_id: u16,
}

impl MftRecordHeader {
    /// Parse MFT record header from raw bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 48 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            signature: cursor.read_u32::<LittleEndian>().ok()?,
            update_sequence_offset: cursor.read_u16::<LittleEndian>().ok()?,
            update_sequence_size: cursor.read_u16::<LittleEndian>().ok()?,
            log_sequence_number: cursor.read_u64::<LittleEndian>().ok()?,
            sequence_number: cursor.read_u16::<LittleEndian>().ok()?,
            hard_link_count: cursor.read_u16::<LittleEndian>().ok()?,
            first_attribute_offset: cursor.read_u16::<LittleEndian>().ok()?,
            flags: cursor.read_u16::<LittleEndian>().ok()?,
            used_size: cursor.read_u32::<LittleEndian>().ok()?,
            allocated_size: cursor.read_u32::<LittleEndian>().ok()?,
            base_record_reference: cursor.read_u64::<LittleEndian>().ok()?,
            next_attribute_id: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    /// Check if this is a valid MFT record
    pub fn is_valid(&self) -> bool {
        self.signature == MFT_RECORD_SIGNATURE
    }

    /// Check if this record is in use
    pub fn is_in_use(&self) -> bool {
        (self.flags & MFT_RECORD_IN_USE) != 0
    }

    /// Check if this record represents a directory
    pub fn is_directory(&self) -> bool {
        (self.flags & MFT_RECORD_IS_DIRECTORY) != 0
    }

    /// Base record reference (zero for base records)
    pub fn base_reference(&self) -> FileReference {
        FileReference::from_u64(self.base_record_reference)
    }

    /// Check if this is a base record (not an extension)
    pub fn is_base_record(&self) -> bool {
        self.base_record_reference == 0
    }
}

// ============================================================================
// Attribute Header
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AttributeHeader {
    pub attribute_type: u32,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub attribute_id: u16,
}

#[derive(Debug, Clone)]
pub struct ResidentAttributeHeader {
    pub base: AttributeHeader,
    pub value_length: u32,
    pub value_offset: u16,
    pub indexed_flag: u8,
}

#[derive(Debug, Clone)]
pub struct NonResidentAttributeHeader {
    pub base: AttributeHeader,
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub data_runs_offset: u16,
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub data_size: u64,
    pub initialized_size: u64,
    pub compressed_size: Option<u64>,
}

impl AttributeHeader {
    /// Parse attribute header from raw bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 16 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            attribute_type: cursor.read_u32::<LittleEndian>().ok()?,
            length: cursor.read_u32::<LittleEndian>().ok()?,
            non_resident: cursor.read_u8().ok()? != 0,
            name_length: cursor.read_u8().ok()?,
            name_offset: cursor.read_u16::<LittleEndian>().ok()?,
            flags: cursor.read_u16::<LittleEndian>().ok()?,
            attribute_id: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    /// Attribute (stream) name; empty for unnamed attributes
    pub fn name(&self, attr_data: &[u8]) -> String {
        if self.name_length == 0 {
            return String::new();
        }
        let start = self.name_offset as usize;
        let end = start + self.name_length as usize * 2;
        if end > attr_data.len() {
            return String::new();
        }
        utf16le_to_string(&attr_data[start..end])
    }
}

impl ResidentAttributeHeader {
    /// Parse resident attribute header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if base.non_resident || data.len() < 24 {
            return None;
        }

        let mut cursor = Cursor::new(&data[16..]);

        Some(Self {
            base,
            value_length: cursor.read_u32::<LittleEndian>().ok()?,
            value_offset: cursor.read_u16::<LittleEndian>().ok()?,
            indexed_flag: cursor.read_u8().ok()?,
        })
    }

    /// Slice of the attribute holding the resident value
    pub fn value<'a>(&self, attr_data: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.value_offset as usize;
        let end = start.checked_add(self.value_length as usize)?;
        attr_data.get(start..end)
    }
}

impl NonResidentAttributeHeader {
    /// Parse non-resident attribute header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if !base.non_resident || data.len() < 64 {
            return None;
        }

        let mut cursor = Cursor::new(&data[16..]);

        let lowest_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        let highest_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        let data_runs_offset = cursor.read_u16::<LittleEndian>().ok()?;
        let compression_unit = cursor.read_u16::<LittleEndian>().ok()?;
        let _padding = cursor.read_u32::<LittleEndian>().ok()?;
        let allocated_size = cursor.read_u64::<LittleEndian>().ok()?;
        let data_size = cursor.read_u64::<LittleEndian>().ok()?;
        let initialized_size = cursor.read_u64::<LittleEndian>().ok()?;

        let compressed_size = if compression_unit > 0 && data.len() >= 72 {
            Some(cursor.read_u64::<LittleEndian>().ok()?)
        } else {
            None
        };

        Some(Self {
            base,
            lowest_vcn,
            highest_vcn,
            data_runs_offset,
            compression_unit,
            allocated_size,
            data_size,
            initialized_size,
            compressed_size,
        })
    }

    /// Decode this attribute's mapping pairs
    pub fn data_runs(&self, attr_data: &[u8]) -> Vec<DataRun> {
        let offset = self.data_runs_offset as usize;
        if offset >= attr_data.len() {
            return Vec::new();
        }
        DataRun::decode_runs(&attr_data[offset..]).0
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Which of the four NTFS timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimestampKind {
    Created,
    Modified,
    MftModified,
    Accessed,
}

impl TimestampKind {
    pub fn label(&self) -> &'static str {
        match self {
            TimestampKind::Created => "created",
            TimestampKind::Modified => "modified",
            TimestampKind::MftModified => "record changed",
            TimestampKind::Accessed => "accessed",
        }
    }
}

/// The MACB timestamp quartet shared by $STANDARD_INFORMATION and $FILE_NAME
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NtfsTimestamps {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

impl NtfsTimestamps {
    pub fn from_filetimes(created: u64, modified: u64, mft_modified: u64, accessed: u64) -> Self {
        Self {
            created: filetime_to_datetime(created),
            modified: filetime_to_datetime(modified),
            mft_modified: filetime_to_datetime(mft_modified),
            accessed: filetime_to_datetime(accessed),
        }
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Option<Self> {
        let c = cursor.read_u64::<LittleEndian>().ok()?;
        let m = cursor.read_u64::<LittleEndian>().ok()?;
        let e = cursor.read_u64::<LittleEndian>().ok()?;
        let a = cursor.read_u64::<LittleEndian>().ok()?;
        Some(Self::from_filetimes(c, m, e, a))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimestampKind, DateTime<Utc>)> {
        [
            (TimestampKind::Created, self.created),
            (TimestampKind::Modified, self.modified),
            (TimestampKind::MftModified, self.mft_modified),
            (TimestampKind::Accessed, self.accessed),
        ]
        .into_iter()
        .filter_map(|(kind, ts)| ts.map(|t| (kind, t)))
    }

    /// Most recent of the four
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.iter().map(|(_, t)| t).max()
    }
}

// ============================================================================
// Standard Information Attribute
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct StandardInformation {
    pub timestamps: NtfsTimestamps,
    pub file_attributes: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: u32,
    pub security_id: u32,
    pub quota_charged: u64,
    pub usn: u64,
}

impl StandardInformation {
    /// Parse from resident attribute content
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 48 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        let mut info = Self {
            timestamps: NtfsTimestamps::read(&mut cursor)?,
            file_attributes: cursor.read_u32::<LittleEndian>().ok()?,
            max_versions: cursor.read_u32::<LittleEndian>().ok()?,
            version_number: cursor.read_u32::<LittleEndian>().ok()?,
            class_id: cursor.read_u32::<LittleEndian>().ok()?,
            ..Default::default()
        };

        // Extended attributes (NTFS 3.0+)
        if data.len() >= 72 {
            info.owner_id = cursor.read_u32::<LittleEndian>().ok()?;
            info.security_id = cursor.read_u32::<LittleEndian>().ok()?;
            info.quota_charged = cursor.read_u64::<LittleEndian>().ok()?;
            info.usn = cursor.read_u64::<LittleEndian>().ok()?;
        }

        Some(info)
    }
}

// ============================================================================
// File Name Attribute
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FileNameAttribute {
    pub parent_reference: FileReference,
    pub timestamps: NtfsTimestamps,
    pub allocated_size: u64,
    pub data_size: u64,
    pub file_attributes: u32,
    pub reparse_value: u32,
    pub namespace: FilenameNamespace,
    pub name: String,
}

impl FileNameAttribute {
    /// Parse from resident attribute content (also the key of a directory index entry)
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 66 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        let parent_reference = FileReference::from_u64(cursor.read_u64::<LittleEndian>().ok()?);
        let timestamps = NtfsTimestamps::read(&mut cursor)?;
        let allocated_size = cursor.read_u64::<LittleEndian>().ok()?;
        let data_size = cursor.read_u64::<LittleEndian>().ok()?;
        let file_attributes = cursor.read_u32::<LittleEndian>().ok()?;
        let reparse_value = cursor.read_u32::<LittleEndian>().ok()?;
        let name_length = cursor.read_u8().ok()?;
        let namespace = FilenameNamespace::from_u8(cursor.read_u8().ok()?)?;

        // Read filename (UTF-16LE)
        let name_bytes = name_length as usize * 2;
        if data.len() < 66 + name_bytes {
            return None;
        }
        let name = utf16le_to_string(&data[66..66 + name_bytes]);

        Some(Self {
            parent_reference,
            timestamps,
            allocated_size,
            data_size,
            file_attributes,
            reparse_value,
            namespace,
            name,
        })
    }

    pub fn is_directory(&self) -> bool {
        (self.file_attributes & file_attributes::DIRECTORY_INDEX) != 0
    }
}

// ============================================================================
// Data Run (for non-resident attributes)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataRun {
    pub cluster_count: u64,
    /// Absolute starting cluster; the on-disk value is relative to the previous run
    pub lcn: i64,
    pub is_sparse: bool,
}

impl DataRun {
    /// Decode data runs from raw bytes
    /// Returns list of runs and total cluster count
    pub fn decode_runs(data: &[u8]) -> (Vec<DataRun>, u64) {
        let mut runs = Vec::new();
        let mut total_clusters = 0u64;
        let mut pos = 0;
        let mut current_lcn: i64 = 0;

        while pos < data.len() {
            let header = data[pos];
            if header == 0 {
                break; // End marker
            }

            let length_bytes = (header & 0x0F) as usize;
            let offset_bytes = ((header >> 4) & 0x0F) as usize;

            if length_bytes == 0 || length_bytes > 8 || offset_bytes > 8 {
                break;
            }

            pos += 1;

            // Cluster count (little-endian, variable length)
            if pos + length_bytes > data.len() {
                break;
            }
            let mut cluster_count = 0u64;
            for i in 0..length_bytes {
                cluster_count |= (data[pos + i] as u64) << (i * 8);
            }
            pos += length_bytes;

            // LCN offset (signed, little-endian, variable length)
            let is_sparse = offset_bytes == 0;
            if !is_sparse {
                if pos + offset_bytes > data.len() {
                    break;
                }

                let mut lcn_delta = 0i64;
                for i in 0..offset_bytes {
                    lcn_delta |= (data[pos + i] as i64) << (i * 8);
                }

                // Sign extend if high bit is set
                if offset_bytes < 8 && (data[pos + offset_bytes - 1] & 0x80) != 0 {
                    for i in offset_bytes..8 {
                        lcn_delta |= 0xFFi64 << (i * 8);
                    }
                }

                current_lcn = current_lcn.wrapping_add(lcn_delta);
                pos += offset_bytes;
            }

            total_clusters += cluster_count;

            runs.push(DataRun {
                cluster_count,
                lcn: if is_sparse { 0 } else { current_lcn },
                is_sparse,
            });
        }

        (runs, total_clusters)
    }
}

// ============================================================================
// Attribute List Entry (for files with attributes in extension records)
// ============================================================================

/// Entry in an $ATTRIBUTE_LIST attribute
/// Used when a file has too many attributes to fit in a single MFT record
#[derive(Debug, Clone, Serialize)]
pub struct AttributeListEntry {
    pub attribute_type: u32,
    pub entry_length: u16,
    pub starting_vcn: u64,
    /// MFT record where the attribute is stored
    pub reference: FileReference,
    pub attribute_id: u16,
    pub name: Option<String>,
}

impl AttributeListEntry {
    /// Parse an attribute list entry from raw bytes
    /// Returns the entry and the number of bytes consumed
    pub fn from_bytes(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < 26 {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let attribute_type = cursor.read_u32::<LittleEndian>().ok()?;
        let entry_length = cursor.read_u16::<LittleEndian>().ok()?;
        let name_length = cursor.read_u8().ok()?;
        let name_offset = cursor.read_u8().ok()?;
        let starting_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        let reference = FileReference::from_u64(cursor.read_u64::<LittleEndian>().ok()?);
        let attribute_id = cursor.read_u16::<LittleEndian>().ok()?;

        if entry_length < 26 || entry_length as usize > data.len() {
            return None;
        }

        let name = if name_length > 0 {
            let start = name_offset as usize;
            let end = start + name_length as usize * 2;
            data.get(start..end).map(utf16le_to_string)
        } else {
            None
        };

        Some((
            Self {
                attribute_type,
                entry_length,
                starting_vcn,
                reference,
                attribute_id,
                name,
            },
            entry_length as usize,
        ))
    }
}

/// Parse all entries from an Attribute List
pub fn parse_attribute_list(data: &[u8]) -> Vec<AttributeListEntry> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset + 26 <= data.len() {
        match AttributeListEntry::from_bytes(&data[offset..]) {
            Some((entry, consumed)) => {
                if consumed == 0 {
                    break;
                }
                entries.push(entry);
                offset += consumed;
            }
            None => break,
        }
    }

    entries
}

// ============================================================================
// FILETIME conversion utilities
// ============================================================================

/// Difference between 1601-01-01 and 1970-01-01 in 100-nanosecond intervals
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert Windows FILETIME (100-nanosecond intervals since 1601) to Unix seconds
pub fn filetime_to_unix(filetime: u64) -> i64 {
    (filetime as i128 - FILETIME_UNIX_EPOCH as i128).div_euclid(10_000_000) as i64
}

/// Convert Windows FILETIME to chrono DateTime, keeping 100ns precision.
/// Zero (never set) yields `None`.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let delta = filetime as i128 - FILETIME_UNIX_EPOCH as i128;
    let secs = delta.div_euclid(10_000_000) as i64;
    let nanos = (delta.rem_euclid(10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Convert chrono DateTime back to FILETIME
pub fn datetime_to_filetime(dt: DateTime<Utc>) -> u64 {
    let ticks = dt.timestamp() as i128 * 10_000_000 + (dt.timestamp_subsec_nanos() / 100) as i128;
    (ticks + FILETIME_UNIX_EPOCH as i128).max(0) as u64
}

/// Decode a UTF-16LE byte slice, replacing invalid sequences
pub fn utf16le_to_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

// ============================================================================
// File Attributes
// ============================================================================

pub mod file_attributes {
    pub const READONLY: u32 = 0x00000001;
    pub const HIDDEN: u32 = 0x00000002;
    pub const SYSTEM: u32 = 0x00000004;
    pub const DIRECTORY: u32 = 0x00000010;
    pub const ARCHIVE: u32 = 0x00000020;
    pub const DEVICE: u32 = 0x00000040;
    pub const NORMAL: u32 = 0x00000080;
    pub const TEMPORARY: u32 = 0x00000100;
    pub const SPARSE_FILE: u32 = 0x00000200;
    pub const REPARSE_POINT: u32 = 0x00000400;
    pub const COMPRESSED: u32 = 0x00000800;
    pub const OFFLINE: u32 = 0x00001000;
    pub const NOT_CONTENT_INDEXED: u32 = 0x00002000;
    pub const ENCRYPTED: u32 = 0x00004000;
    /// Set in $FILE_NAME flags for directories (has an $I30 index)
    pub const DIRECTORY_INDEX: u32 = 0x10000000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_reference_packing() {
        let r = FileReference::from_u64(0x0003_0000_0000_0029);
        assert_eq!(r.entry, 0x29);
        assert_eq!(r.sequence, 3);
        assert_eq!(r.to_u64(), 0x0003_0000_0000_0029);
        assert_eq!(r.to_string(), "41-3");
    }

    #[test]
    fn test_decode_runs_relative_offsets() {
        // 0x21: 1-byte length, 2-byte offset
        // run 1: 0x18 clusters at LCN 0x5634
        // run 2: 0x10 clusters at -0x10 relative => 0x5624
        // run 3: sparse 0x08 clusters
        let data = [
            0x21, 0x18, 0x34, 0x56, //
            0x11, 0x10, 0xF0, //
            0x01, 0x08, //
            0x00,
        ];
        let (runs, total) = DataRun::decode_runs(&data);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0], DataRun { cluster_count: 0x18, lcn: 0x5634, is_sparse: false });
        assert_eq!(runs[1], DataRun { cluster_count: 0x10, lcn: 0x5624, is_sparse: false });
        assert!(runs[2].is_sparse);
        assert_eq!(total, 0x18 + 0x10 + 0x08);
    }

    #[test]
    fn test_decode_runs_truncated_stops() {
        let data = [0x31, 0x05, 0x00];
        let (runs, _) = DataRun::decode_runs(&data);
        assert!(runs.is_empty());
    }

    #[test]
    fn test_apply_fixup_restores_sector_tails() {
        let mut rec = vec![0u8; 1024];
        rec[0x30] = 0x07; // sequence value
        rec[0x31] = 0x00;
        rec[0x32] = 0xAA; // original tail of sector 1
        rec[0x33] = 0xBB;
        rec[0x34] = 0xCC; // original tail of sector 2
        rec[0x35] = 0xDD;
        rec[510] = 0x07;
        rec[1022] = 0x07;

        assert_eq!(apply_fixup(&mut rec, 0x30, 3), FixupStatus::Ok);
        assert_eq!(&rec[510..512], &[0xAA, 0xBB]);
        assert_eq!(&rec[1022..1024], &[0xCC, 0xDD]);
    }

    #[test]
    fn test_apply_fixup_detects_torn_write() {
        let mut rec = vec![0u8; 1024];
        rec[0x30] = 0x07;
        rec[510] = 0x07;
        rec[1022] = 0x09;
        assert_eq!(apply_fixup(&mut rec, 0x30, 3), FixupStatus::Mismatch);
        assert_eq!(apply_fixup(&mut rec, 0x3FF, 3), FixupStatus::Invalid);
    }

    #[test]
    fn test_apply_fixup_within_ignores_unread_sectors() {
        let mut rec = vec![0u8; 1024];
        rec[0x30] = 0x07;
        rec[0x32] = 0xAA;
        rec[0x33] = 0xBB;
        rec[510] = 0x07;
        // sector 2 was never read; its tail holds whatever padding came with it
        rec[1022] = 0x55;

        assert_eq!(apply_fixup_within(&mut rec, 0x30, 3, 600), FixupStatus::Ok);
        assert_eq!(&rec[510..512], &[0xAA, 0xBB]);
        assert_eq!(rec[1022], 0x55);
        assert_eq!(apply_fixup_within(&mut rec, 0x30, 3, 0x33), FixupStatus::Invalid);
    }

    #[test]
    fn test_filetime_roundtrip_precision() {
        let ft = 132_000_000_001_234_567u64;
        let dt = filetime_to_datetime(ft).unwrap();
        assert_eq!(datetime_to_filetime(dt), ft);
        assert!(filetime_to_datetime(0).is_none());
        assert_eq!(filetime_to_unix(FILETIME_UNIX_EPOCH), 0);
    }

    #[test]
    fn test_namespace_rank() {
        use FilenameNamespace::*;
        assert!(Win32AndDos.display_rank() > Win32.display_rank());
        assert!(Win32.display_rank() > Posix.display_rank());
        assert!(Posix.display_rank() > Dos.display_rank());
    }

    #[test]
    fn test_boot_sector_record_size() {
        let mut bs = vec![0u8; 512];
        bs[3..11].copy_from_slice(NTFS_OEM_ID);
        bs[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        bs[0x0D] = 8;
        bs[0x28..0x30].copy_from_slice(&2048u64.to_le_bytes());
        bs[0x30..0x38].copy_from_slice(&4u64.to_le_bytes());
        bs[0x40] = 0xF6; // -10 => 1024
        let boot = NtfsBootSector::parse_valid(&bs).unwrap();
        assert_eq!(boot.bytes_per_cluster(), 4096);
        assert_eq!(boot.bytes_per_mft_record(), 1024);
        assert_eq!(boot.mft_byte_offset(), 4 * 4096);
        assert_eq!(boot.volume_size(), 2048 * 512);
    }
}
