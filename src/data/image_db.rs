//! On-disk image corpus: a single memory-mapped file of labelled records.
//!
//! # Layout (all integers little-endian u32)
//! ```text
//! bytes  0-3:   "FCDB"
//! bytes  4-7:   version (1)
//! bytes  8-11:  N         (record count)
//! bytes 12-15:  height
//! bytes 16-19:  width
//! bytes 20-23:  channels
//! bytes 24..:   N records, each:
//!                 label  (u32)
//!                 height * width * channels pixel bytes, row-major HWC
//! ```

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Result, TrainError};
use crate::persistence::atomic_write_with;

const MAGIC: &[u8; 4] = b"FCDB";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 24;

/// Geometry shared by every record of a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDbHeader {
    pub count: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageDbHeader {
    pub fn pixels_per_record(&self) -> usize {
        self.height * self.width * self.channels
    }

    fn record_len(&self) -> usize {
        4 + self.pixels_per_record()
    }
}

/// Read-only, zero-copy view over an image corpus file.
pub struct ImageDb {
    path: PathBuf,
    mmap: Mmap,
    header: ImageDbHeader,
}

impl ImageDb {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(TrainError::config(format!("dataset file {} does not exist", path.display())));
        }
        let file = File::open(path)?;
        // SAFETY: the corpus is only ever replaced by rename, never modified in place.
        let mmap = unsafe { Mmap::map(&file)? };
        let header = parse_header(&mmap, path)?;
        Ok(Self { path: path.to_path_buf(), mmap, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> ImageDbHeader {
        self.header
    }

    pub fn len(&self) -> usize {
        self.header.count
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    /// Label and raw HWC pixels of record `index`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn record(&self, index: usize) -> (u32, &[u8]) {
        assert!(index < self.header.count, "record {} out of range", index);
        let start = HEADER_LEN + index * self.header.record_len();
        let label = read_u32(&self.mmap, start);
        let pixels = &self.mmap[start + 4..start + self.header.record_len()];
        (label, pixels)
    }

    pub fn label(&self, index: usize) -> u32 {
        self.record(index).0
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn parse_header(bytes: &[u8], path: &Path) -> Result<ImageDbHeader> {
    let corrupt = |why: String| TrainError::dataset(format!("{}: {}", path.display(), why));

    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!("file too short for header ({} bytes)", bytes.len())));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic, not an image db".to_owned()));
    }
    let version = read_u32(bytes, 4);
    if version != VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }
    let header = ImageDbHeader {
        count: read_u32(bytes, 8) as usize,
        height: read_u32(bytes, 12) as usize,
        width: read_u32(bytes, 16) as usize,
        channels: read_u32(bytes, 20) as usize,
    };
    if header.pixels_per_record() == 0 {
        return Err(corrupt("zero-sized images".to_owned()));
    }
    let expected = header.count
        .checked_mul(header.record_len())
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| corrupt("declared size overflows".to_owned()))?;
    if bytes.len() < expected {
        return Err(corrupt(format!(
            "truncated: header declares {} records ({} bytes), file has {}",
            header.count, expected, bytes.len()
        )));
    }
    Ok(header)
}

/// Writes a corpus atomically. `records` yields `(label, pixels)` with
/// `pixels.len() == header.pixels_per_record()`; `header.count` is ignored and
/// replaced by the number of records actually written.
pub fn write_image_db<I, P>(path: &Path, header: ImageDbHeader, records: I) -> Result<usize>
where
    I: IntoIterator<Item = (u32, P)>,
    P: AsRef<[u8]>,
{
    let expected = header.pixels_per_record();
    let mut count = 0usize;
    let mut bad_record: Option<(usize, usize)> = None;

    atomic_write_with(path, |w| {
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        // Count is patched below once known; reserve the slot.
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&(header.height as u32).to_le_bytes())?;
        w.write_all(&(header.width as u32).to_le_bytes())?;
        w.write_all(&(header.channels as u32).to_le_bytes())?;
        for (label, pixels) in records {
            let pixels = pixels.as_ref();
            if pixels.len() != expected {
                bad_record = Some((count, pixels.len()));
                return Err(std::io::Error::other("record size mismatch"));
            }
            w.write_all(&label.to_le_bytes())?;
            w.write_all(pixels)?;
            count += 1;
        }
        w.flush()?;
        let file = w.get_mut();
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&(count as u32).to_le_bytes())?;
        file.seek(SeekFrom::End(0))?;
        Ok(())
    })
    .map_err(|e| match bad_record {
        Some((index, len)) => TrainError::dataset(format!(
            "record {} has {} pixel bytes, expected {}", index, len, expected
        )),
        None => TrainError::Io(e),
    })?;

    Ok(count)
}
