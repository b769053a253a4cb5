use bsync_types::NormalizedPath;

use crate::error::{PackError, PackResult};
use crate::format::{decode_varint, HEADER_LEN, MAGIC, TRAILER_LEN, VERSION};

/// One file recovered from a package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedFile {
    pub path: NormalizedPath,
    pub contents: Vec<u8>,
}

/// Decodes and verifies a package.
///
/// Used by tests and diagnostics; the remote service is the real consumer.
#[derive(Debug)]
pub struct PackageReader {
    files: Vec<PackedFile>,
}

impl PackageReader {
    /// Verify the checksum, then decode every entry, checking each CRC.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "package data too short".into(),
            });
        }
        if &data[0..4] != MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(&data[4..8]);
        if version != VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = read_u32(&data[8..12]) as usize;

        let body_end = data.len() - TRAILER_LEN;
        if blake3::hash(&data[..body_end]).as_bytes() != &data[body_end..] {
            return Err(PackError::ChecksumMismatch);
        }

        let stream = zstd::decode_all(&data[HEADER_LEN..body_end])
            .map_err(|e| PackError::DecompressionFailed(e.to_string()))?;

        let mut files = Vec::with_capacity(count);
        let mut pos = 0usize;
        for _ in 0..count {
            let offset = pos as u64;
            let path_bytes = take_prefixed(&stream, &mut pos)?;
            let path = std::str::from_utf8(path_bytes)
                .ok()
                .and_then(|s| NormalizedPath::parse(s).ok())
                .ok_or_else(|| PackError::CorruptEntry {
                    offset,
                    reason: "invalid entry path".into(),
                })?;
            let contents = take_prefixed(&stream, &mut pos)?.to_vec();
            let crc_bytes = stream.get(pos..pos + 4).ok_or_else(|| PackError::CorruptEntry {
                offset,
                reason: "missing CRC32".into(),
            })?;
            pos += 4;
            if read_u32(crc_bytes) != crc32fast::hash(&contents) {
                return Err(PackError::CrcMismatch(path.to_string()));
            }
            files.push(PackedFile { path, contents });
        }
        if pos != stream.len() {
            return Err(PackError::CorruptEntry {
                offset: pos as u64,
                reason: "trailing data after last entry".into(),
            });
        }

        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PackedFile] {
        &self.files
    }

    /// Contents of the file at `path`, if packaged.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|f| f.path.as_str() == path)
            .map(|f| f.contents.as_slice())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(arr)
}

fn take_prefixed<'a>(data: &'a [u8], pos: &mut usize) -> PackResult<&'a [u8]> {
    let offset = *pos as u64;
    let (len, consumed) = decode_varint(&data[*pos..], offset)?;
    let start = *pos + consumed;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| PackError::CorruptEntry {
            offset,
            reason: "length extends beyond package".into(),
        })?;
    *pos = end;
    Ok(&data[start..end])
}
