//! Disk image access
//!
//! Random-access reads over a raw image, a split raw set (`disk.001`,
//! `disk.002`, ...) or an in-memory buffer. File handles sit behind a mutex so
//! one image can be shared by per-partition workers.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{NtfsTraceError, Result};

/// Expert Witness (E01) signature
const EWF_SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";
/// Logical evidence (L01) signature
const LEF_SIGNATURE: &[u8; 8] = b"LVF\x09\x0d\x0a\xff\x00";
/// Advanced Forensic Format signature
const AFF_SIGNATURE: &[u8; 8] = b"AFF10\r\n\0";

/// Container kinds we recognise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Raw,
    SplitRaw,
    Memory,
}

/// One file of a split raw set
struct Segment {
    file: Mutex<File>,
    start: u64,
    length: u64,
}

enum ImageSource {
    Raw(Mutex<File>),
    Split(Vec<Segment>),
    Memory(Vec<u8>),
}

pub struct Image {
    path: PathBuf,
    format: ImageFormat,
    size: u64,
    source: ImageSource,
}

impl Image {
    /// Open a raw image or the first file of a split set
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let mut magic = [0u8; 8];
        let n = read_full(&mut file, &mut magic)?;
        if let Some(format) = container_format(&magic[..n]) {
            return Err(NtfsTraceError::UnsupportedFormat {
                format: format.to_string(),
                path: path.display().to_string(),
            });
        }

        if let Some(segments) = split_set(&path)? {
            let size = segments.iter().map(|s| s.length).sum();
            info!(
                "Opened split image {} ({} segments, {} bytes)",
                path.display(),
                segments.len(),
                size
            );
            return Ok(Self {
                path,
                format: ImageFormat::SplitRaw,
                size,
                source: ImageSource::Split(segments),
            });
        }

        let size = file.metadata()?.len();
        info!("Opened raw image {} ({} bytes)", path.display(), size);
        Ok(Self {
            path,
            format: ImageFormat::Raw,
            size,
            source: ImageSource::Raw(Mutex::new(file)),
        })
    }

    /// Wrap bytes already in memory
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            format: ImageFormat::Memory,
            size: data.len() as u64,
            source: ImageSource::Memory(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `buf.len()` bytes at `offset`; short only at the end of the image
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.size - offset) as usize);
        let buf = &mut buf[..want];

        match &self.source {
            ImageSource::Memory(data) => {
                let start = offset as usize;
                buf.copy_from_slice(&data[start..start + want]);
                Ok(want)
            }
            ImageSource::Raw(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                read_full(&mut *file, buf)
            }
            ImageSource::Split(segments) => {
                let mut done = 0;
                for segment in segments {
                    let pos = offset + done as u64;
                    if done == want {
                        break;
                    }
                    if pos >= segment.start + segment.length || pos < segment.start {
                        continue;
                    }
                    let inner = pos - segment.start;
                    let take = (want - done).min((segment.length - inner) as usize);
                    let mut file = segment.file.lock();
                    file.seek(SeekFrom::Start(inner))?;
                    let got = read_full(&mut *file, &mut buf[done..done + take])?;
                    done += got;
                    if got < take {
                        break;
                    }
                }
                Ok(done)
            }
        }
    }

    /// Read exactly `buf.len()` bytes or fail
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let got = self.read_at(offset, buf)?;
        if got < buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "short read at {:#x}: {} of {} bytes",
                    offset,
                    got,
                    buf.len()
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Convenience: allocate and read `len` bytes
    pub fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

/// Name of a container format this build cannot decode
fn container_format(magic: &[u8]) -> Option<&'static str> {
    if magic.starts_with(EWF_SIGNATURE) || magic.starts_with(LEF_SIGNATURE) {
        Some("EWF")
    } else if magic.starts_with(AFF_SIGNATURE) {
        Some("AFF")
    } else {
        None
    }
}

/// Collect `name.001`, `name.002`, ... when `path` is the first of a set
fn split_set(path: &Path) -> Result<Option<Vec<Segment>>> {
    let is_first = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == "001");
    if !is_first {
        return Ok(None);
    }

    let mut segments = Vec::new();
    let mut start = 0u64;
    for n in 1..=999u32 {
        let candidate = path.with_extension(format!("{:03}", n));
        if !candidate.is_file() {
            break;
        }
        let file = File::open(&candidate)?;
        let length = file.metadata()?.len();
        debug!("Split segment {} ({} bytes)", candidate.display(), length);
        segments.push(Segment {
            file: Mutex::new(file),
            start,
            length,
        });
        start += length;
    }

    Ok(Some(segments))
}
