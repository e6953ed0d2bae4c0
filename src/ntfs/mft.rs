//! MFT (Master File Table) decoder
//!
//! Walks an extracted `$MFT` buffer slot by slot. Every slot produces exactly
//! one [`MftRecord`]; damage is reported through [`RecordStatus`] instead of
//! aborting the pass. Paths come from a second pass over an [`MftIndex`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::error::{NtfsTraceError, Result};
use crate::ntfs::structs::*;

/// Upper bound on ancestor hops while resolving a path
pub const DEFAULT_MAX_PATH_DEPTH: usize = 64;

/// Number of leading slots probed when detecting the record size
const RECORD_SIZE_PROBE_SLOTS: usize = 16;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct MftConfig {
    /// Record size in bytes; detected from the first valid header when unset
    pub record_size: Option<u32>,
    /// Visibility filter for `visible_records()`; decoding always covers every slot
    pub include_deleted: bool,
    /// Depth cap for path resolution
    pub max_path_depth: usize,
}

impl Default for MftConfig {
    fn default() -> Self {
        Self {
            record_size: None,
            include_deleted: true,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
        }
    }
}

// ============================================================================
// Decoded record
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordStatus {
    Ok,
    /// All-zero slot, never written
    Unallocated,
    /// `BAAD` signature or garbage header
    Corrupt,
    /// Update sequence did not match; bytes were restored and decoded anyway
    FixupMismatch,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum AttributeContent {
    Resident {
        length: usize,
        #[serde(skip)]
        data: Vec<u8>,
    },
    NonResident {
        lowest_vcn: u64,
        highest_vcn: u64,
        allocated_size: u64,
        data_size: u64,
        initialized_size: u64,
        runs: Vec<DataRun>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Attribute {
    pub type_code: u32,
    pub type_name: &'static str,
    /// Stream name; empty for the unnamed stream
    pub name: String,
    pub attribute_id: u16,
    pub content: AttributeContent,
}

impl Attribute {
    pub fn is_type(&self, kind: AttributeType) -> bool {
        self.type_code == kind as u32
    }

    pub fn resident_data(&self) -> Option<&[u8]> {
        match &self.content {
            AttributeContent::Resident { data, .. } => Some(data),
            AttributeContent::NonResident { .. } => None,
        }
    }

    /// Logical size of the attribute value
    pub fn data_size(&self) -> u64 {
        match &self.content {
            AttributeContent::Resident { length, .. } => *length as u64,
            AttributeContent::NonResident { data_size, .. } => *data_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MftRecord {
    pub entry: u64,
    pub sequence: u16,
    pub status: RecordStatus,
    pub in_use: bool,
    pub is_directory: bool,
    pub base_reference: FileReference,
    pub logfile_sequence_number: u64,
    pub hard_link_count: u16,
    pub standard_information: Option<StandardInformation>,
    pub file_names: Vec<FileNameAttribute>,
    pub attributes: Vec<Attribute>,
    pub attribute_list: Vec<AttributeListEntry>,
}

impl MftRecord {
    fn empty(entry: u64, status: RecordStatus) -> Self {
        Self {
            entry,
            sequence: 0,
            status,
            in_use: false,
            is_directory: false,
            base_reference: FileReference::default(),
            logfile_sequence_number: 0,
            hard_link_count: 0,
            standard_information: None,
            file_names: Vec::new(),
            attributes: Vec::new(),
            attribute_list: Vec::new(),
        }
    }

    /// Decode one on-disk slot, applying the update sequence fixup
    pub fn decode(entry: u64, slot: &[u8]) -> Self {
        Self::decode_inner(entry, slot, true)
    }

    /// Decode a record image as logged in `$LogFile` (fixups never applied there)
    pub fn decode_logged(entry: u64, image: &[u8]) -> Self {
        Self::decode_inner(entry, image, false)
    }

    fn decode_inner(entry: u64, slot: &[u8], fixup: bool) -> Self {
        if slot.iter().all(|&b| b == 0) {
            return Self::empty(entry, RecordStatus::Unallocated);
        }

        let header = match MftRecordHeader::from_bytes(slot) {
            Some(h) if h.is_valid() => h,
            Some(h) => {
                if h.signature == MFT_RECORD_BAD_SIGNATURE {
                    debug!("MFT entry {}: BAAD signature", entry);
                } else {
                    trace!("MFT entry {}: no FILE signature", entry);
                }
                return Self::empty(entry, RecordStatus::Corrupt);
            }
            None => return Self::empty(entry, RecordStatus::Corrupt),
        };

        let mut data = slot.to_vec();
        let mut status = RecordStatus::Ok;
        if fixup {
            match apply_fixup(
                &mut data,
                header.update_sequence_offset,
                header.update_sequence_size,
            ) {
                FixupStatus::Ok => {}
                FixupStatus::Mismatch => {
                    debug!("MFT entry {}: update sequence mismatch", entry);
                    status = RecordStatus::FixupMismatch;
                }
                FixupStatus::Invalid => {
                    debug!("MFT entry {}: update sequence array out of bounds", entry);
                    return Self::empty(entry, RecordStatus::Corrupt);
                }
            }
        }

        let mut record = Self {
            entry,
            sequence: header.sequence_number,
            status,
            in_use: header.is_in_use(),
            is_directory: header.is_directory(),
            base_reference: header.base_reference(),
            logfile_sequence_number: header.log_sequence_number,
            hard_link_count: header.hard_link_count,
            standard_information: None,
            file_names: Vec::new(),
            attributes: Vec::new(),
            attribute_list: Vec::new(),
        };

        let limit = match header.used_size as usize {
            0 => data.len(),
            used => used.min(data.len()),
        };
        record.parse_attributes(&data[..limit], header.first_attribute_offset as usize);
        record
    }

    /// Walk the attribute chain until the end marker
    fn parse_attributes(&mut self, data: &[u8], first_offset: usize) {
        let mut offset = first_offset;

        while offset + 16 <= data.len() {
            let attr_header = match AttributeHeader::from_bytes(&data[offset..]) {
                Some(h) => h,
                None => break,
            };

            if attr_header.attribute_type == ATTRIBUTE_END_MARKER || attr_header.length < 16 {
                break;
            }

            let end = offset + attr_header.length as usize;
            if end > data.len() {
                trace!(
                    "MFT entry {}: attribute at {:#x} overruns record",
                    self.entry,
                    offset
                );
                break;
            }

            let attr_data = &data[offset..end];
            if let Some(attribute) = self.parse_attribute(attr_data, &attr_header) {
                self.attributes.push(attribute);
            }

            offset = end;
        }
    }

    fn parse_attribute(&mut self, attr_data: &[u8], header: &AttributeHeader) -> Option<Attribute> {
        let name = header.name(attr_data);

        let content = if header.non_resident {
            let nr = NonResidentAttributeHeader::from_bytes(attr_data)?;
            AttributeContent::NonResident {
                lowest_vcn: nr.lowest_vcn,
                highest_vcn: nr.highest_vcn,
                allocated_size: nr.allocated_size,
                data_size: nr.data_size,
                initialized_size: nr.initialized_size,
                runs: nr.data_runs(attr_data),
            }
        } else {
            let resident = ResidentAttributeHeader::from_bytes(attr_data)?;
            let value = resident.value(attr_data)?;

            match AttributeType::from_u32(header.attribute_type) {
                Some(AttributeType::StandardInformation) => {
                    self.standard_information = StandardInformation::from_bytes(value);
                }
                Some(AttributeType::FileName) => {
                    if let Some(fn_attr) = FileNameAttribute::from_bytes(value) {
                        self.file_names.push(fn_attr);
                    }
                }
                Some(AttributeType::AttributeList) => {
                    self.attribute_list = parse_attribute_list(value);
                }
                _ => {}
            }

            AttributeContent::Resident {
                length: value.len(),
                data: value.to_vec(),
            }
        };

        Some(Attribute {
            type_code: header.attribute_type,
            type_name: AttributeType::from_u32(header.attribute_type)
                .map(|t| t.name())
                .unwrap_or("UNKNOWN"),
            name,
            attribute_id: header.attribute_id,
            content,
        })
    }

    pub fn reference(&self) -> FileReference {
        FileReference::new(self.entry, self.sequence)
    }

    /// Extension records point back at their base record
    pub fn is_base_record(&self) -> bool {
        self.base_reference.entry == 0 && self.base_reference.sequence == 0
    }

    /// Was the slot decoded far enough to carry attributes?
    pub fn is_decoded(&self) -> bool {
        matches!(self.status, RecordStatus::Ok | RecordStatus::FixupMismatch)
    }

    /// Canonical name: Win32&DOS > Win32 > POSIX > DOS, first occurrence wins ties
    pub fn canonical_name(&self) -> Option<&FileNameAttribute> {
        let mut best: Option<&FileNameAttribute> = None;
        for candidate in &self.file_names {
            match best {
                Some(current)
                    if current.namespace.display_rank() >= candidate.namespace.display_rank() => {}
                _ => best = Some(candidate),
            }
        }
        best
    }

    /// Attributes of one type with a given stream name
    pub fn find_attributes<'s>(
        &'s self,
        kind: AttributeType,
        name: &'s str,
    ) -> impl Iterator<Item = &'s Attribute> + 's {
        self.attributes
            .iter()
            .filter(move |a| a.is_type(kind) && a.name == name)
    }

    /// Size of the unnamed data stream
    pub fn file_size(&self) -> u64 {
        self.find_attributes(AttributeType::Data, "")
            .map(|a| match &a.content {
                AttributeContent::NonResident {
                    lowest_vcn: 0,
                    data_size,
                    ..
                } => *data_size,
                AttributeContent::Resident { length, .. } => *length as u64,
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

// ============================================================================
// Decoder
// ============================================================================

pub struct MftDecoder<'a> {
    data: &'a [u8],
    config: MftConfig,
    record_size: usize,
}

impl<'a> MftDecoder<'a> {
    pub fn new(data: &'a [u8], config: MftConfig) -> Result<Self> {
        let record_size = match config.record_size {
            Some(size) => {
                if !(256..=65536).contains(&size) || !size.is_power_of_two() {
                    return Err(NtfsTraceError::format(format!(
                        "invalid MFT record size {}",
                        size
                    )));
                }
                size as usize
            }
            None => detect_record_size(data),
        };

        debug!(
            "MFT session: {} bytes, record size {}, {} slots",
            data.len(),
            record_size,
            data.len() / record_size
        );

        Ok(Self {
            data,
            config,
            record_size,
        })
    }

    pub fn config(&self) -> &MftConfig {
        &self.config
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Number of whole record slots in the buffer
    pub fn get_total_entries(&self) -> u64 {
        (self.data.len() / self.record_size) as u64
    }

    /// Decode a single slot
    pub fn record(&self, entry: u64) -> Option<MftRecord> {
        let start = (entry as usize).checked_mul(self.record_size)?;
        let slot = self.data.get(start..start + self.record_size)?;
        Some(MftRecord::decode(entry, slot))
    }

    /// Every slot in order, one record each
    pub fn records(&self) -> MftRecords<'_> {
        MftRecords {
            data: self.data,
            record_size: self.record_size,
            next: 0,
            total: self.get_total_entries(),
        }
    }

    /// Records the configuration asks to show: decoded slots, deleted ones only
    /// when `include_deleted` is set
    pub fn visible_records(&self) -> impl Iterator<Item = MftRecord> + '_ {
        let include_deleted = self.config.include_deleted;
        self.records()
            .filter(move |r| r.status != RecordStatus::Unallocated && (include_deleted || r.in_use))
    }

    /// Second pass: visible records annotated with their resolved path
    pub fn entries<'s>(&'s self, index: &'s MftIndex) -> impl Iterator<Item = MftEntry> + 's {
        self.visible_records().map(move |record| {
            let (path, path_error) = if record.is_base_record() && record.canonical_name().is_some() {
                match index.resolve_display_path(record.reference()) {
                    Ok(p) => (Some(p), None),
                    Err(e) => (None, Some(e)),
                }
            } else {
                (None, None)
            };
            MftEntry {
                record,
                path,
                path_error,
            }
        })
    }
}

/// Record size from the first `FILE` header whose allocated size is sane
fn detect_record_size(data: &[u8]) -> usize {
    let mut offset = 0;
    for _ in 0..RECORD_SIZE_PROBE_SLOTS {
        let Some(header) = data.get(offset..).and_then(MftRecordHeader::from_bytes) else {
            break;
        };
        if header.is_valid() {
            let size = header.allocated_size;
            if (256..=65536).contains(&size) && size.is_power_of_two() {
                return size as usize;
            }
            break;
        }
        offset += DEFAULT_MFT_RECORD_SIZE as usize;
    }
    DEFAULT_MFT_RECORD_SIZE as usize
}

/// Lazy, single-pass iterator over MFT slots
pub struct MftRecords<'a> {
    data: &'a [u8],
    record_size: usize,
    next: u64,
    total: u64,
}

impl Iterator for MftRecords<'_> {
    type Item = MftRecord;

    fn next(&mut self) -> Option<MftRecord> {
        if self.next >= self.total {
            return None;
        }
        let entry = self.next;
        self.next += 1;
        let start = entry as usize * self.record_size;
        let slot = &self.data[start..start + self.record_size];
        Some(MftRecord::decode(entry, slot))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for MftRecords<'_> {}

/// Record plus the outcome of path resolution
#[derive(Debug, Clone, Serialize)]
pub struct MftEntry {
    #[serde(flatten)]
    pub record: MftRecord,
    pub path: Option<String>,
    pub path_error: Option<PathResolutionError>,
}

// ============================================================================
// Path index
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PathResolutionError {
    #[error("path of entry {entry} exceeds {limit} levels")]
    DepthExceeded { entry: u64, limit: usize },

    #[error("directory cycle through entry {entry}")]
    Cycle { entry: u64 },

    /// Parent missing from the index, or its slot was reused
    #[error("parent {parent} of entry {entry} is missing or reallocated")]
    Orphaned { entry: u64, parent: FileReference },

    #[error("entry {0} is not in the index")]
    Unknown(FileReference),
}

#[derive(Debug, Clone)]
struct IndexNode {
    sequence: u16,
    parent: FileReference,
    name: String,
}

/// Entry number -> (sequence, parent, canonical name), built in a first pass.
///
/// Directory prefixes are memoized, so resolving every record of a large
/// volume costs roughly one hop per record.
pub struct MftIndex {
    nodes: HashMap<u64, IndexNode>,
    max_depth: usize,
    memo: RefCell<HashMap<u64, Rc<Vec<String>>>>,
}

impl MftIndex {
    pub fn new(max_depth: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            max_depth,
            memo: RefCell::new(HashMap::new()),
        }
    }

    /// First pass over every decodable base record, deleted ones included
    pub fn build(decoder: &MftDecoder<'_>) -> Self {
        let mut index = Self::new(decoder.config().max_path_depth);
        for record in decoder.records() {
            index.insert_record(&record);
        }
        debug!("MFT index: {} named entries", index.len());
        index
    }

    pub fn insert_record(&mut self, record: &MftRecord) {
        if !record.is_decoded() || !record.is_base_record() {
            return;
        }
        if let Some(name) = record.canonical_name() {
            self.insert(
                record.reference(),
                name.parent_reference,
                name.name.clone(),
            );
        }
    }

    pub fn insert(&mut self, reference: FileReference, parent: FileReference, name: String) {
        self.memo.borrow_mut().clear();
        self.nodes.insert(
            reference.entry,
            IndexNode {
                sequence: reference.sequence,
                parent,
                name,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Path components of a file, root excluded. Root itself yields an empty path.
    pub fn resolve_path(&self, reference: FileReference) -> std::result::Result<Vec<String>, PathResolutionError> {
        if reference.is_root() {
            return Ok(Vec::new());
        }

        let node = self
            .nodes
            .get(&reference.entry)
            .filter(|n| reference.sequence == 0 || n.sequence == reference.sequence)
            .ok_or(PathResolutionError::Unknown(reference))?;

        let prefix = self.directory_path(reference.entry, node.parent)?;
        let mut path = Vec::with_capacity(prefix.len() + 1);
        path.extend(prefix.iter().cloned());
        path.push(node.name.clone());
        Ok(path)
    }

    /// Path of a name that sits in `parent`; used when the file itself is gone
    pub fn resolve_in_directory(
        &self,
        parent: FileReference,
        name: &str,
    ) -> std::result::Result<Vec<String>, PathResolutionError> {
        let prefix = self.directory_path(parent.entry, parent)?;
        let mut path = prefix.as_ref().clone();
        path.push(name.to_string());
        Ok(path)
    }

    pub fn resolve_display_path(&self, reference: FileReference) -> std::result::Result<String, PathResolutionError> {
        self.resolve_path(reference).map(|p| display_path(&p))
    }

    /// Components of directory `dir`, reached from `child`
    fn directory_path(
        &self,
        child: u64,
        dir: FileReference,
    ) -> std::result::Result<Rc<Vec<String>>, PathResolutionError> {
        let mut chain: Vec<(u64, &IndexNode)> = Vec::new();
        let mut visited: HashSet<u64> = HashSet::new();
        let mut from = child;
        let mut current = dir;

        let mut prefix = loop {
            if current.is_root() {
                break Rc::new(Vec::new());
            }

            let node = self
                .nodes
                .get(&current.entry)
                .filter(|n| current.sequence == 0 || n.sequence == current.sequence)
                .ok_or(PathResolutionError::Orphaned {
                    entry: from,
                    parent: current,
                })?;

            if let Some(known) = self.memo.borrow().get(&current.entry) {
                break known.clone();
            }

            if !visited.insert(current.entry) {
                return Err(PathResolutionError::Cycle {
                    entry: current.entry,
                });
            }
            if chain.len() >= self.max_depth {
                return Err(PathResolutionError::DepthExceeded {
                    entry: child,
                    limit: self.max_depth,
                });
            }

            chain.push((current.entry, node));
            from = current.entry;
            current = node.parent;
        };

        let mut memo = self.memo.borrow_mut();
        for (entry, node) in chain.into_iter().rev() {
            let mut next = prefix.as_ref().clone();
            next.push(node.name.clone());
            prefix = Rc::new(next);
            memo.insert(entry, prefix.clone());
        }

        Ok(prefix)
    }
}

/// `\`-joined display form, rooted
pub fn display_path(components: &[String]) -> String {
    format!("\\{}", components.join("\\"))
}
