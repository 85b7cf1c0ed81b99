use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use stowage_protocol::part_count;

use crate::{CONTENT_ADDRESS_PREFIX, TransferError};

// ---------------------------------------------------------------------------
// Content addressing
// ---------------------------------------------------------------------------

/// Computes the content address (`sha256:<hex>`) of `data`.
pub fn content_address_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{CONTENT_ADDRESS_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Computes the content address of an entire file.
pub fn content_address_file(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{CONTENT_ADDRESS_PREFIX}{}", hex::encode(hasher.finalize())))
}

// ---------------------------------------------------------------------------
// PartReader
// ---------------------------------------------------------------------------

/// Reads fixed-size parts of a file by part number.
///
/// Reads are positioned, so one reader can be shared by several
/// concurrent part uploads without any cursor state.
#[derive(Debug)]
pub struct PartReader {
    file: std::fs::File,
    path: PathBuf,
    file_size: u64,
    part_size: u64,
    parts: u32,
}

impl PartReader {
    /// Opens `path` for reading in parts of `part_size` bytes.
    pub fn open(path: &Path, part_size: u64) -> Result<Self, TransferError> {
        if part_size == 0 {
            return Err(TransferError::Validation("part size must be positive".into()));
        }
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let parts = part_count(file_size, part_size).ok_or_else(|| {
            TransferError::Validation(format!(
                "part size {part_size} splits {} ({file_size} bytes) into too many parts",
                path.display()
            ))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_size,
            part_size,
            parts,
        })
    }

    /// Number of parts the file splits into.
    pub fn part_count(&self) -> u32 {
        self.parts
    }

    /// Byte offset and length of a 1-indexed part.
    pub fn part_range(&self, part_number: u32) -> Result<(u64, usize), TransferError> {
        if part_number == 0 || part_number > self.part_count() {
            return Err(TransferError::Validation(format!(
                "part {part_number} out of range 1..={} for {}",
                self.part_count(),
                self.path.display()
            )));
        }
        let offset = u64::from(part_number - 1) * self.part_size;
        let len = self.part_size.min(self.file_size - offset);
        Ok((offset, len as usize))
    }

    /// Reads exactly the bytes of one part; the last part may be short.
    pub fn read_part(&self, part_number: u32) -> Result<Vec<u8>, TransferError> {
        let (offset, len) = self.part_range(part_number)?;
        let mut buf = vec![0u8; len];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Part size in bytes.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn read_exact_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &std::fs::File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole part",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
