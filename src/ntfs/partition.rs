//! NTFS partition discovery
//!
//! Reads MBR (with extended partition chains) and GPT tables, verifies every
//! candidate by its boot sector, and falls back to a sector-boundary scan when
//! no table points at an NTFS volume.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Cursor;
use tracing::{debug, info, warn};

use crate::error::{NtfsTraceError, Result};
use crate::ntfs::image::Image;
use crate::ntfs::structs::{NtfsBootSector, NTFS_OEM_ID};

const MBR_SIGNATURE: u16 = 0xAA55;
const MBR_TABLE_OFFSET: usize = 0x1BE;
const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
const GPT_PROTECTIVE: u8 = 0xEE;
const EXTENDED_TYPES: [u8; 3] = [0x05, 0x0F, 0x85];
/// Cap on EBR hops and GPT entries read
const MAX_TABLE_ENTRIES: usize = 256;
const GPT_ENTRY_SIZES: std::ops::RangeInclusive<usize> = 128..=4096;
const SCAN_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscoveryMethod {
    /// Sector 0 is itself an NTFS boot sector
    WholeVolume,
    Mbr,
    Ebr,
    Gpt,
    BootSectorScan,
}

#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    pub index: usize,
    /// Byte offset of the boot sector in the image
    pub offset: u64,
    pub length: u64,
    pub sector_size: u16,
    pub bytes_per_cluster: u32,
    pub mft_start_cluster: u64,
    pub mft_mirror_cluster: u64,
    pub mft_record_size: u32,
    pub serial: u64,
    pub method: DiscoveryMethod,
}

impl Partition {
    fn from_boot(offset: u64, boot: &NtfsBootSector, method: DiscoveryMethod) -> Self {
        Self {
            index: 0,
            offset,
            length: boot.volume_size(),
            sector_size: boot.bytes_per_sector,
            bytes_per_cluster: boot.bytes_per_cluster(),
            mft_start_cluster: boot.mft_cluster_number,
            mft_mirror_cluster: boot.mft_mirror_cluster_number,
            mft_record_size: boot.bytes_per_mft_record(),
            serial: boot.volume_serial_number,
            method,
        }
    }

    /// Absolute byte offset of a cluster of this volume.
    ///
    /// LCNs come straight from data runs, so an offset past `u64` is corruption.
    pub fn cluster_offset(&self, lcn: u64) -> Result<u64> {
        lcn.checked_mul(self.bytes_per_cluster as u64)
            .and_then(|rel| rel.checked_add(self.offset))
            .ok_or_else(|| {
                NtfsTraceError::corruption(self.offset, format!("cluster {:#x} lies beyond any volume", lcn))
            })
    }

    /// Absolute byte offset of the first MFT record
    pub fn mft_offset(&self) -> Result<u64> {
        self.cluster_offset(self.mft_start_cluster)
    }

    pub fn serial_hex(&self) -> String {
        format!("{:016X}", self.serial)
    }

    fn contains(&self, offset: u64) -> bool {
        // the backup boot sector sits one sector past the volume length
        offset >= self.offset && offset <= self.offset.saturating_add(self.length)
    }
}

#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Scan sector boundaries when no partition table yields a volume
    pub scan_fallback: bool,
    /// Scan granularity in bytes
    pub scan_step: u64,
    /// Stop scanning after this many bytes (whole image when unset)
    pub scan_limit: Option<u64>,
    /// Logical sector size for table LBAs
    pub sector_size: u64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            scan_fallback: true,
            scan_step: 512,
            scan_limit: None,
            sector_size: 512,
        }
    }
}

/// Locate every NTFS volume with default settings
pub fn find_ntfs_partitions(image: &Image) -> Result<Vec<Partition>> {
    find_ntfs_partitions_with(image, &LocatorConfig::default())
}

pub fn find_ntfs_partitions_with(image: &Image, config: &LocatorConfig) -> Result<Vec<Partition>> {
    let mut sector0 = vec![0u8; 512];
    let n = image.read_at(0, &mut sector0)?;
    sector0.truncate(n);

    if let Some(boot) = NtfsBootSector::parse_valid(&sector0) {
        info!("Image is a bare NTFS volume");
        return Ok(vec![Partition::from_boot(0, &boot, DiscoveryMethod::WholeVolume)]);
    }

    let mut found: Vec<Partition> = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();

    for (offset, method) in table_candidates(image, &sector0, config)? {
        if !seen.insert(offset) {
            continue;
        }
        match read_boot(image, offset)? {
            Some(boot) => {
                debug!("{:?} candidate at {:#x} is NTFS", method, offset);
                found.push(Partition::from_boot(offset, &boot, method));
            }
            None => debug!("{:?} candidate at {:#x} is not NTFS", method, offset),
        }
    }

    if found.is_empty() && config.scan_fallback {
        warn!("No NTFS partition in the partition tables, scanning for boot sectors");
        found = scan_for_boot_sectors(image, config)?;
    }

    if found.is_empty() {
        return Err(NtfsTraceError::format("no NTFS boot sector found in image"));
    }

    for (i, partition) in found.iter_mut().enumerate() {
        partition.index = i;
        info!(
            "Partition {}: offset {:#x}, {} bytes, cluster {}, serial {} ({:?})",
            i,
            partition.offset,
            partition.length,
            partition.bytes_per_cluster,
            partition.serial_hex(),
            partition.method
        );
    }
    Ok(found)
}

fn read_boot(image: &Image, offset: u64) -> Result<Option<NtfsBootSector>> {
    let mut sector = [0u8; 512];
    let n = image.read_at(offset, &mut sector)?;
    Ok(NtfsBootSector::parse_valid(&sector[..n]))
}

fn has_mbr_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && u16::from_le_bytes([sector[510], sector[511]]) == MBR_SIGNATURE
}

#[derive(Debug, Clone, Copy)]
struct MbrEntry {
    partition_type: u8,
    start_lba: u64,
    sectors: u64,
}

fn mbr_entries(sector: &[u8]) -> Vec<MbrEntry> {
    (0..4)
        .filter_map(|i| {
            let raw = sector.get(MBR_TABLE_OFFSET + i * 16..MBR_TABLE_OFFSET + (i + 1) * 16)?;
            let mut c = Cursor::new(raw);
            c.set_position(4);
            let partition_type = c.read_u8().ok()?;
            c.set_position(8);
            let start_lba = c.read_u32::<LittleEndian>().ok()? as u64;
            let sectors = c.read_u32::<LittleEndian>().ok()? as u64;
            (partition_type != 0).then_some(MbrEntry {
                partition_type,
                start_lba,
                sectors,
            })
        })
        .collect()
}

/// Byte offsets pointed at by the MBR, EBR chains and GPT
fn table_candidates(
    image: &Image,
    sector0: &[u8],
    config: &LocatorConfig,
) -> Result<Vec<(u64, DiscoveryMethod)>> {
    let mut out = Vec::new();
    if !has_mbr_signature(sector0) {
        return Ok(out);
    }
    let sector_size = config.sector_size;

    for entry in mbr_entries(sector0) {
        match entry.partition_type {
            GPT_PROTECTIVE => match gpt_candidates(image, sector_size) {
                Ok(found) => out.extend(found),
                Err(e) if e.is_recoverable() => warn!("Ignoring GPT: {}", e),
                Err(e) => return Err(e),
            },
            t if EXTENDED_TYPES.contains(&t) => {
                out.extend(ebr_candidates(image, entry.start_lba, sector_size)?)
            }
            _ if entry.sectors > 0 => out.push((entry.start_lba * sector_size, DiscoveryMethod::Mbr)),
            _ => {}
        }
    }
    Ok(out)
}

/// Walk the extended boot record chain starting at `base_lba`
fn ebr_candidates(image: &Image, base_lba: u64, sector_size: u64) -> Result<Vec<(u64, DiscoveryMethod)>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut current = base_lba;

    for _ in 0..MAX_TABLE_ENTRIES {
        if !visited.insert(current) {
            warn!("EBR chain loops back to LBA {}", current);
            break;
        }
        let mut sector = vec![0u8; 512];
        if image.read_at(current * sector_size, &mut sector)? < 512 || !has_mbr_signature(&sector) {
            break;
        }
        let entries = mbr_entries(&sector);

        let mut next = None;
        for entry in entries {
            if EXTENDED_TYPES.contains(&entry.partition_type) {
                next = Some(base_lba + entry.start_lba);
            } else if entry.sectors > 0 {
                out.push(((current + entry.start_lba) * sector_size, DiscoveryMethod::Ebr));
            }
        }

        match next {
            Some(lba) => current = lba,
            None => break,
        }
    }
    Ok(out)
}

fn gpt_candidates(image: &Image, sector_size: u64) -> Result<Vec<(u64, DiscoveryMethod)>> {
    let mut out = Vec::new();
    let mut header = vec![0u8; 512];
    if image.read_at(sector_size, &mut header)? < 92 || &header[0..8] != GPT_SIGNATURE {
        warn!("Protective MBR without a GPT header");
        return Ok(out);
    }

    let mut c = Cursor::new(&header[..]);
    c.set_position(0x48);
    let entries_lba = c.read_u64::<LittleEndian>()?;
    let entry_count = c.read_u32::<LittleEndian>()? as usize;
    let entry_size = c.read_u32::<LittleEndian>()? as usize;
    if !GPT_ENTRY_SIZES.contains(&entry_size) || entry_size % 8 != 0 {
        return Err(NtfsTraceError::corruption(
            sector_size,
            format!("GPT entry size {} outside {}..={}", entry_size, GPT_ENTRY_SIZES.start(), GPT_ENTRY_SIZES.end()),
        ));
    }
    let table_offset = entries_lba
        .checked_mul(sector_size)
        .ok_or_else(|| NtfsTraceError::corruption(sector_size, format!("GPT entry array at LBA {:#x}", entries_lba)))?;

    let count = entry_count.min(MAX_TABLE_ENTRIES);
    let mut table = vec![0u8; count * entry_size];
    let n = image.read_at(table_offset, &mut table)?;
    table.truncate(n);

    for raw in table.chunks_exact(entry_size) {
        if raw[0..16].iter().all(|&b| b == 0) {
            continue;
        }
        let first_lba = u64::from_le_bytes(raw[32..40].try_into().unwrap_or_default());
        match first_lba.checked_mul(sector_size) {
            Some(offset) => out.push((offset, DiscoveryMethod::Gpt)),
            None => warn!("GPT entry starts at impossible LBA {:#x}", first_lba),
        }
    }
    Ok(out)
}

/// Look for boot sectors at every `scan_step` boundary
fn scan_for_boot_sectors(image: &Image, config: &LocatorConfig) -> Result<Vec<Partition>> {
    let step = config.scan_step.max(512) as usize;
    let limit = config.scan_limit.unwrap_or(u64::MAX).min(image.size());
    let mut found: Vec<Partition> = Vec::new();
    let mut chunk = vec![0u8; SCAN_CHUNK];
    let mut base = 0u64;

    while base < limit {
        let n = image.read_at(base, &mut chunk)?;
        if n == 0 {
            break;
        }
        let mut pos = 0usize;
        while pos + 512 <= n {
            let offset = base + pos as u64;
            let sector = &chunk[pos..pos + 512];
            if &sector[3..11] == NTFS_OEM_ID && !found.iter().any(|p| p.contains(offset)) {
                if let Some(boot) = NtfsBootSector::parse_valid(sector) {
                    debug!("Boot sector found by scan at {:#x}", offset);
                    found.push(Partition::from_boot(offset, &boot, DiscoveryMethod::BootSectorScan));
                }
            }
            pos += step;
        }
        if pos == 0 {
            break;
        }
        base += pos as u64;
    }
    Ok(found)
}
