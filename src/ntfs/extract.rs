//! Artifact extraction
//!
//! Pulls `$MFT`, `$LogFile` and `$UsnJrnl:$J` out of a located volume by
//! following data runs, and maps already-extracted artifact files.

use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::ops::Deref;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{NtfsTraceError, Result};
use crate::ntfs::image::Image;
use crate::ntfs::mft::{AttributeContent, MftRecord};
use crate::ntfs::partition::Partition;
use crate::ntfs::structs::{
    parse_attribute_list, well_known, AttributeListEntry, AttributeType, DataRun,
};

const COPY_CHUNK: usize = 1024 * 1024;
/// Larger non-resident attribute lists are treated as corrupt
const MAX_ATTRIBUTE_LIST: u64 = 256 * 1024;
const USN_JOURNAL_NAME: &str = "$UsnJrnl";
const USN_DATA_STREAM: &str = "$J";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Artifact {
    Mft,
    LogFile,
    UsnJournal,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [Artifact::Mft, Artifact::LogFile, Artifact::UsnJournal];

    /// NTFS name of the artifact
    pub fn name(&self) -> &'static str {
        match self {
            Artifact::Mft => "$MFT",
            Artifact::LogFile => "$LogFile",
            Artifact::UsnJournal => "$UsnJrnl:$J",
        }
    }

    /// Output file name for one partition
    pub fn file_name(&self, partition_index: usize) -> String {
        let suffix = match self {
            Artifact::Mft => "MFT",
            Artifact::LogFile => "LogFile",
            Artifact::UsnJournal => "UsnJrnl_J",
        };
        format!("partition{}_{}", partition_index, suffix)
    }
}

// ============================================================================
// Stream layout
// ============================================================================

/// Stream bytes `start..end`, stored from cluster `lcn` or sparse when `None`
#[derive(Debug, Clone)]
struct Extent {
    start: u64,
    end: u64,
    lcn: Option<u64>,
}

impl Extent {
    /// Volume byte offset of stream byte `logical`, which must lie in this extent
    fn disk_offset(&self, partition: &Partition, lcn: u64, logical: u64) -> Result<u64> {
        partition
            .cluster_offset(lcn)?
            .checked_add(logical - self.start)
            .ok_or_else(|| {
                NtfsTraceError::corruption(partition.offset, format!("extent at cluster {:#x} overflows", lcn))
            })
    }
}

/// A non-resident stream assembled from every attribute piece
#[derive(Debug, Clone, Default)]
struct StreamMap {
    extents: Vec<Extent>,
    data_size: u64,
}

impl StreamMap {
    /// `pieces` are `(lowest_vcn, runs)`; `data_size` comes from the first piece
    fn from_pieces(mut pieces: Vec<(u64, Vec<DataRun>)>, data_size: u64, partition: &Partition) -> Result<Self> {
        let cluster = partition.bytes_per_cluster as u64;
        pieces.sort_by_key(|(vcn, _)| *vcn);
        pieces.dedup_by_key(|(vcn, _)| *vcn);

        let mut extents = Vec::new();
        for (lowest_vcn, runs) in pieces {
            let mut vcn = lowest_vcn;
            for run in runs {
                let next = vcn.checked_add(run.cluster_count);
                let bytes = next.and_then(|next| Some((vcn.checked_mul(cluster)?, next.checked_mul(cluster)?)));
                let (Some(next), Some((start, end))) = (next, bytes) else {
                    return Err(NtfsTraceError::corruption(
                        partition.offset,
                        format!("run of {:#x} clusters at VCN {:#x} overflows", run.cluster_count, vcn),
                    ));
                };
                let lcn = if run.is_sparse {
                    None
                } else {
                    let lcn = u64::try_from(run.lcn).map_err(|_| {
                        NtfsTraceError::corruption(
                            partition.offset,
                            format!("run at VCN {:#x} starts at negative cluster {}", vcn, run.lcn),
                        )
                    })?;
                    Some(lcn)
                };
                extents.push(Extent { start, end, lcn });
                vcn = next;
            }
        }
        Ok(Self { extents, data_size })
    }

    /// Fill `buf` with stream bytes at `offset`; holes read as zeros
    fn read_range(&self, image: &Image, partition: &Partition, offset: u64, buf: &mut [u8]) -> Result<()> {
        buf.fill(0);
        let end = offset.checked_add(buf.len() as u64).ok_or_else(|| {
            NtfsTraceError::corruption(partition.offset, format!("stream read at {:#x} overflows", offset))
        })?;

        for extent in &self.extents {
            let Some(lcn) = extent.lcn else { continue };
            if extent.end <= offset || extent.start >= end {
                continue;
            }
            let from = offset.max(extent.start);
            let to = end.min(extent.end);
            let disk = extent.disk_offset(partition, lcn, from)?;
            let dst = &mut buf[(from - offset) as usize..(to - offset) as usize];
            image.read_exact_at(disk, dst)?;
        }
        Ok(())
    }

    /// Stream the logical contents to `writer`; returns bytes written
    fn copy_to<W: Write + ?Sized>(
        &self,
        image: &Image,
        partition: &Partition,
        writer: &mut W,
        skip_sparse: bool,
    ) -> Result<u64> {
        let mut written = 0u64;
        let mut logical = 0u64;
        let mut chunk = vec![0u8; COPY_CHUNK];

        for extent in &self.extents {
            if logical >= self.data_size {
                break;
            }
            let ext_end = extent.end.min(self.data_size);

            // gap between pieces is a hole
            if extent.start > logical && !skip_sparse {
                written += write_zeros(writer, extent.start - logical, &mut chunk)?;
            }
            logical = logical.max(extent.start);
            if ext_end <= logical {
                continue;
            }

            match extent.lcn {
                None => {
                    if !skip_sparse {
                        written += write_zeros(writer, ext_end - logical, &mut chunk)?;
                    }
                }
                Some(lcn) => {
                    let mut disk = extent.disk_offset(partition, lcn, logical)?;
                    let mut remaining = ext_end - logical;
                    while remaining > 0 {
                        let take = remaining.min(COPY_CHUNK as u64) as usize;
                        image.read_exact_at(disk, &mut chunk[..take])?;
                        writer.write_all(&chunk[..take])?;
                        disk += take as u64;
                        remaining -= take as u64;
                        written += take as u64;
                    }
                }
            }
            logical = ext_end;
        }

        if logical < self.data_size && !skip_sparse {
            written += write_zeros(writer, self.data_size - logical, &mut chunk)?;
        }
        Ok(written)
    }
}

fn write_zeros<W: Write + ?Sized>(writer: &mut W, mut count: u64, chunk: &mut [u8]) -> Result<u64> {
    let total = count;
    chunk.fill(0);
    while count > 0 {
        let take = count.min(chunk.len() as u64) as usize;
        writer.write_all(&chunk[..take])?;
        count -= take as u64;
    }
    Ok(total)
}

/// Where a stream's bytes live
enum StreamSource {
    Resident(Vec<u8>),
    Mapped(StreamMap),
}

// ============================================================================
// Extractor
// ============================================================================

pub struct NtfsExtractor<'a> {
    image: &'a Image,
    partition: &'a Partition,
    mft: StreamMap,
}

impl<'a> NtfsExtractor<'a> {
    /// Read MFT record 0 and map the `$MFT` data stream
    pub fn new(image: &'a Image, partition: &'a Partition) -> Result<Self> {
        let record_size = partition.mft_record_size as usize;
        let mft_offset = partition.mft_offset()?;
        let slot = image.read_vec(mft_offset, record_size)?;
        let record = MftRecord::decode(well_known::MFT, &slot);
        if !record.is_decoded() {
            return Err(NtfsTraceError::corruption(
                mft_offset,
                format!("$MFT record 0 is {:?}", record.status),
            ));
        }

        let (pieces, data_size) = nonresident_pieces(&record, "");
        if pieces.is_empty() {
            return Err(NtfsTraceError::format("$MFT record 0 has no non-resident $DATA"));
        }

        let mut extractor = Self {
            image,
            partition,
            mft: StreamMap::from_pieces(pieces, data_size, partition)?,
        };

        // fragmented $MFT: remaining pieces sit in extension records
        if !record.attribute_list.is_empty() {
            let (pieces, _) = extractor.collect_pieces(&record, "")?;
            extractor.mft = StreamMap::from_pieces(pieces, data_size, partition)?;
        }

        debug!(
            "Partition {}: $MFT is {} bytes in {} extents",
            partition.index,
            data_size,
            extractor.mft.extents.len()
        );
        Ok(extractor)
    }

    pub fn partition(&self) -> &Partition {
        self.partition
    }

    /// Number of record slots in `$MFT`
    pub fn mft_entry_count(&self) -> u64 {
        self.mft.data_size / self.partition.mft_record_size as u64
    }

    /// Decode one MFT record straight from the volume
    pub fn read_record(&self, entry: u64) -> Result<MftRecord> {
        let size = self.partition.mft_record_size as usize;
        let offset = entry.checked_mul(size as u64).ok_or_else(|| {
            NtfsTraceError::corruption(self.partition.offset, format!("MFT entry {:#x} out of range", entry))
        })?;
        let mut slot = vec![0u8; size];
        self.mft.read_range(self.image, self.partition, offset, &mut slot)?;
        Ok(MftRecord::decode(entry, &slot))
    }

    /// Extract an artifact into memory
    pub fn extract(&self, artifact: Artifact) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_artifact(artifact, &mut out)?;
        Ok(out)
    }

    /// Stream an artifact into `writer`; returns bytes written
    pub fn copy_artifact<W: Write + ?Sized>(&self, artifact: Artifact, writer: &mut W) -> Result<u64> {
        let (source, skip_sparse) = match artifact {
            Artifact::Mft => (StreamSource::Mapped(self.mft.clone()), false),
            Artifact::LogFile => (self.log_file_stream()?, false),
            Artifact::UsnJournal => (self.usn_journal_stream()?, true),
        };

        let written = match source {
            StreamSource::Resident(data) => {
                writer.write_all(&data)?;
                data.len() as u64
            }
            StreamSource::Mapped(map) => map.copy_to(self.image, self.partition, writer, skip_sparse)?,
        };

        info!(
            "Partition {}: extracted {} ({} bytes)",
            self.partition.index,
            artifact.name(),
            written
        );
        Ok(written)
    }

    fn log_file_stream(&self) -> Result<StreamSource> {
        let record = self.read_record(well_known::LOG_FILE)?;
        if !record.is_decoded() || !record.in_use {
            return Err(NtfsTraceError::NotFound(Artifact::LogFile.name().to_string()));
        }
        self.stream_of(&record, "", Artifact::LogFile)
    }

    fn usn_journal_stream(&self) -> Result<StreamSource> {
        let record = self
            .find_usn_journal()?
            .ok_or_else(|| NtfsTraceError::NotFound(Artifact::UsnJournal.name().to_string()))?;
        debug!("$UsnJrnl is MFT entry {}", record.entry);
        self.stream_of(&record, USN_DATA_STREAM, Artifact::UsnJournal)
    }

    /// The in-use `$UsnJrnl` base record whose parent is `$Extend`
    fn find_usn_journal(&self) -> Result<Option<MftRecord>> {
        for entry in well_known::EXTEND + 1..self.mft_entry_count() {
            let record = self.read_record(entry)?;
            if !record.in_use || !record.is_base_record() {
                continue;
            }
            let is_journal = record.file_names.iter().any(|f| {
                f.name == USN_JOURNAL_NAME && f.parent_reference.entry == well_known::EXTEND
            });
            if is_journal {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn stream_of(&self, base: &MftRecord, name: &str, artifact: Artifact) -> Result<StreamSource> {
        if let Some(data) = base
            .find_attributes(AttributeType::Data, name)
            .find_map(|a| a.resident_data())
        {
            return Ok(StreamSource::Resident(data.to_vec()));
        }

        let (pieces, data_size) = self.collect_pieces(base, name)?;
        if pieces.is_empty() {
            return Err(NtfsTraceError::NotFound(artifact.name().to_string()));
        }
        Ok(StreamSource::Mapped(StreamMap::from_pieces(pieces, data_size, self.partition)?))
    }

    /// Non-resident `$DATA` pieces of `base`, including those the attribute
    /// list places in extension records
    fn collect_pieces(&self, base: &MftRecord, name: &str) -> Result<(Vec<(u64, Vec<DataRun>)>, u64)> {
        let (mut pieces, mut data_size) = nonresident_pieces(base, name);

        let list = if base.attribute_list.is_empty() {
            self.nonresident_attribute_list(base)?
        } else {
            base.attribute_list.clone()
        };

        let mut visited = vec![base.entry];
        for item in list {
            let wanted = item.attribute_type == AttributeType::Data as u32
                && item.name.as_deref().unwrap_or("") == name;
            if !wanted || visited.contains(&item.reference.entry) {
                continue;
            }
            visited.push(item.reference.entry);

            let extension = match self.read_record(item.reference.entry) {
                Ok(r) if r.is_decoded() => r,
                Ok(r) => {
                    warn!(
                        "Extension record {} of entry {} is {:?}",
                        item.reference.entry, base.entry, r.status
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Extension record {} unreadable: {}", item.reference.entry, e);
                    continue;
                }
            };
            let (more, size) = nonresident_pieces(&extension, name);
            if data_size == 0 {
                data_size = size;
            }
            pieces.extend(more);
        }

        Ok((pieces, data_size))
    }

    /// Decode an attribute list that was itself pushed out of the record
    fn nonresident_attribute_list(&self, base: &MftRecord) -> Result<Vec<AttributeListEntry>> {
        let Some(attribute) = base
            .attributes
            .iter()
            .find(|a| a.is_type(AttributeType::AttributeList))
        else {
            return Ok(Vec::new());
        };
        let AttributeContent::NonResident { runs, data_size, .. } = &attribute.content else {
            return Ok(Vec::new());
        };

        if *data_size > MAX_ATTRIBUTE_LIST {
            return Err(NtfsTraceError::corruption(
                self.partition.offset,
                format!(
                    "attribute list of entry {} is {} bytes, limit {}",
                    base.entry, data_size, MAX_ATTRIBUTE_LIST
                ),
            ));
        }
        let map = StreamMap::from_pieces(vec![(0, runs.clone())], *data_size, self.partition)?;
        let mut raw = vec![0u8; *data_size as usize];
        map.read_range(self.image, self.partition, 0, &mut raw)?;
        Ok(parse_attribute_list(&raw))
    }
}

/// `(lowest_vcn, runs)` of every non-resident DATA attribute named `name`,
/// plus the stream size held by the VCN-0 piece
fn nonresident_pieces(record: &MftRecord, name: &str) -> (Vec<(u64, Vec<DataRun>)>, u64) {
    let mut pieces = Vec::new();
    let mut size = 0;
    for attribute in record.find_attributes(AttributeType::Data, name) {
        if let AttributeContent::NonResident {
            lowest_vcn,
            data_size,
            runs,
            ..
        } = &attribute.content
        {
            if *lowest_vcn == 0 {
                size = *data_size;
            }
            pieces.push((*lowest_vcn, runs.clone()));
        }
    }
    (pieces, size)
}

// ============================================================================
// Extracted artifact files
// ============================================================================

/// Read-only bytes of an artifact file, memory-mapped when non-empty
pub enum ArtifactBuffer {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl ArtifactBuffer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(ArtifactBuffer::Owned(Vec::new()));
        }
        // SAFETY: the mapping is read-only; artifact files are not modified while open
        let map = unsafe { Mmap::map(&file)? };
        debug!("Mapped {} ({} bytes)", path.display(), map.len());
        Ok(ArtifactBuffer::Mapped(map))
    }
}

impl From<Vec<u8>> for ArtifactBuffer {
    fn from(data: Vec<u8>) -> Self {
        ArtifactBuffer::Owned(data)
    }
}

impl Deref for ArtifactBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ArtifactBuffer::Mapped(map) => map,
            ArtifactBuffer::Owned(data) => data,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ntfs::mft::tests::{
        build_record, fn_value, named_record, nonresident_attr, resident_attr, si_value,
    };
    use crate::ntfs::partition::tests::boot_sector;
    use crate::ntfs::structs::{FileReference, MFT_RECORD_IN_USE, MFT_RECORD_IS_DIRECTORY};

    const CLUSTER: usize = 4096;

    /// Encode a single run: 1-byte length, 2-byte LCN
    pub(crate) fn run(clusters: u8, lcn: u16) -> Vec<u8> {
        let mut r = vec![0x21, clusters];
        r.extend_from_slice(&lcn.to_le_bytes());
        r
    }

    /// A 64-cluster bare volume:
    /// - `$MFT` at clusters 4..8 (16 records of 1 KiB)
    /// - `$LogFile` data at cluster 10
    /// - `$UsnJrnl:$J` (entry 13): one sparse cluster then clusters 20..22
    pub(crate) fn synthetic_volume(log_bytes: &[u8], usn_bytes: &[u8]) -> Vec<u8> {
        let mut volume = vec![0u8; 64 * CLUSTER];
        volume[..512].copy_from_slice(&boot_sector(512, 4));

        let root = FileReference::new(well_known::ROOT, well_known::ROOT as u16);
        let extend = FileReference::new(well_known::EXTEND, well_known::EXTEND as u16);

        let mft0 = build_record(
            1,
            MFT_RECORD_IN_USE,
            &[
                resident_attr(0x10, &si_value(0)),
                nonresident_attr(0x80, "", &run(4, 4), 16 * 1024),
            ],
        );
        let log = build_record(
            2,
            MFT_RECORD_IN_USE,
            &[
                resident_attr(0x10, &si_value(0)),
                nonresident_attr(0x80, "", &run(1, 10), log_bytes.len() as u64),
            ],
        );
        let mut usn_runs = vec![0x01, 0x01];
        usn_runs.extend(run(2, 20));
        let journal = build_record(
            7,
            MFT_RECORD_IN_USE,
            &[
                resident_attr(0x10, &si_value(0)),
                resident_attr(0x30, &fn_value(extend, "$UsnJrnl", 3, 0)),
                nonresident_attr(0x80, "$J", &usn_runs, (CLUSTER + usn_bytes.len()) as u64),
            ],
        );

        let mut slots = vec![vec![0u8; 1024]; 16];
        slots[0] = mft0;
        slots[2] = log;
        slots[5] = named_record(5, MFT_RECORD_IN_USE | MFT_RECORD_IS_DIRECTORY, root, ".");
        slots[11] = named_record(11, MFT_RECORD_IN_USE | MFT_RECORD_IS_DIRECTORY, root, "$Extend");
        slots[13] = journal;
        let mft = slots.concat();
        volume[4 * CLUSTER..4 * CLUSTER + mft.len()].copy_from_slice(&mft);

        volume[10 * CLUSTER..10 * CLUSTER + log_bytes.len()].copy_from_slice(log_bytes);
        volume[20 * CLUSTER..20 * CLUSTER + usn_bytes.len()].copy_from_slice(usn_bytes);
        volume
    }

    #[test]
    fn test_extracts_all_artifacts() {
        let log = vec![0x5Au8; 3000];
        let usn = vec![0x33u8; 5000];
        let image = Image::from_bytes(synthetic_volume(&log, &usn));
        let partitions = crate::ntfs::partition::find_ntfs_partitions(&image).unwrap();
        let extractor = NtfsExtractor::new(&image, &partitions[0]).unwrap();

        assert_eq!(extractor.mft_entry_count(), 16);
        assert_eq!(extractor.extract(Artifact::Mft).unwrap().len(), 16 * 1024);
        assert_eq!(extractor.read_record(13).unwrap().file_names[0].name, "$UsnJrnl");
        assert_eq!(extractor.extract(Artifact::LogFile).unwrap(), log);
        // the sparse leading cluster is not written
        assert_eq!(extractor.extract(Artifact::UsnJournal).unwrap(), usn);
    }

    #[test]
    fn test_missing_journal_is_not_found() {
        let mut volume = synthetic_volume(&[1u8; 16], &[2u8; 16]);
        let slot = 4 * CLUSTER + 13 * 1024;
        volume[slot..slot + 1024].fill(0);
        let image = Image::from_bytes(volume);
        let partitions = crate::ntfs::partition::find_ntfs_partitions(&image).unwrap();
        let extractor = NtfsExtractor::new(&image, &partitions[0]).unwrap();

        assert!(matches!(
            extractor.extract(Artifact::UsnJournal),
            Err(NtfsTraceError::NotFound(_))
        ));
        assert_eq!(extractor.extract(Artifact::LogFile).unwrap(), vec![1u8; 16]);
    }

    fn bare_partition() -> (Image, Partition) {
        let mut volume = boot_sector(64, 0);
        volume.resize(4 * CLUSTER, 0);
        volume[2 * CLUSTER..2 * CLUSTER + 10].copy_from_slice(b"0123456789");
        let image = Image::from_bytes(volume);
        let partition = crate::ntfs::partition::find_ntfs_partitions(&image).unwrap().remove(0);
        (image, partition)
    }

    #[test]
    fn test_sparse_runs_zero_filled_outside_journal() {
        let (image, partition) = bare_partition();
        let map = StreamMap::from_pieces(
            vec![
                (
                    0,
                    vec![DataRun {
                        cluster_count: 1,
                        lcn: 0,
                        is_sparse: true,
                    }],
                ),
                (
                    1,
                    vec![DataRun {
                        cluster_count: 1,
                        lcn: 2,
                        is_sparse: false,
                    }],
                ),
            ],
            CLUSTER as u64 + 10,
            &partition,
        )
        .unwrap();

        let mut filled = Vec::new();
        map.copy_to(&image, &partition, &mut filled, false).unwrap();
        assert_eq!(filled.len(), CLUSTER + 10);
        assert!(filled[..CLUSTER].iter().all(|&b| b == 0));
        assert_eq!(&filled[CLUSTER..], b"0123456789");

        let mut skipped = Vec::new();
        map.copy_to(&image, &partition, &mut skipped, true).unwrap();
        assert_eq!(skipped, b"0123456789");
    }

    #[test]
    fn test_negative_cluster_is_corruption() {
        let (_, partition) = bare_partition();
        let runs = vec![DataRun {
            cluster_count: 1,
            lcn: -5,
            is_sparse: false,
        }];
        assert!(matches!(
            StreamMap::from_pieces(vec![(0, runs)], CLUSTER as u64, &partition),
            Err(NtfsTraceError::Corruption { .. })
        ));
    }

    #[test]
    fn test_oversized_runs_are_corruption() {
        let (image, partition) = bare_partition();
        let huge = vec![DataRun {
            cluster_count: u64::MAX / 2,
            lcn: 1,
            is_sparse: false,
        }];
        assert!(matches!(
            StreamMap::from_pieces(vec![(0, huge)], CLUSTER as u64, &partition),
            Err(NtfsTraceError::Corruption { .. })
        ));

        // fits the map but not the volume's byte range
        let far = vec![DataRun {
            cluster_count: 1,
            lcn: i64::MAX,
            is_sparse: false,
        }];
        let map = StreamMap::from_pieces(vec![(0, far)], CLUSTER as u64, &partition).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            map.copy_to(&image, &partition, &mut out, false),
            Err(NtfsTraceError::Corruption { .. })
        ));
        let mut buf = [0u8; 16];
        assert!(matches!(
            map.read_range(&image, &partition, 0, &mut buf),
            Err(NtfsTraceError::Corruption { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_oversized_attribute_list_is_corruption() {
        let image = Image::from_bytes(synthetic_volume(&[1u8; 16], &[2u8; 16]));
        let partitions = crate::ntfs::partition::find_ntfs_partitions(&image).unwrap();
        let extractor = NtfsExtractor::new(&image, &partitions[0]).unwrap();

        let slot = build_record(
            1,
            MFT_RECORD_IN_USE,
            &[
                resident_attr(0x10, &si_value(0)),
                nonresident_attr(0x20, "", &run(1, 30), 1 << 40),
            ],
        );
        let record = MftRecord::decode(20, &slot);
        assert!(matches!(
            extractor.nonresident_attribute_list(&record),
            Err(NtfsTraceError::Corruption { .. })
        ));
    }

    #[test]
    fn test_artifact_buffer_maps_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(Artifact::Mft.file_name(0));
        std::fs::write(&path, b"FILE0").unwrap();
        let buffer = ArtifactBuffer::open(&path).unwrap();
        assert_eq!(&buffer[..], b"FILE0");
        assert_eq!(Artifact::UsnJournal.file_name(2), "partition2_UsnJrnl_J");

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert!(ArtifactBuffer::open(&empty).unwrap().is_empty());
    }
}
