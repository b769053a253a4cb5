use std::io::{self, Read, Write};

use bsync_index::ChangeEntry;
use bsync_types::NormalizedPath;
use bytes::Bytes;
use tracing::debug;

use crate::error::{PackError, PackResult};
use crate::format::{encode_varint, COMPRESSION_LEVEL, HEADER_LEN, MAGIC, TRAILER_LEN, VERSION};

/// A finished package, ready for one submission.
///
/// Cloning is cheap; the bytes are reference counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub bytes: Bytes,
    /// Size on the wire.
    pub byte_size: u64,
    /// Sum of the uncompressed file sizes.
    pub raw_size: u64,
    pub entry_count: usize,
    /// Packaged paths, in entry order.
    pub paths: Vec<NormalizedPath>,
    /// BLAKE3 trailer.
    pub checksum: [u8; 32],
}

impl Package {
    /// First eight hex characters of the checksum, for logs.
    pub fn short_checksum(&self) -> String {
        self.checksum
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Number of packaged paths whose final segment is `file_name`.
    pub fn count_named(&self, file_name: &str) -> usize {
        self.paths
            .iter()
            .filter(|p| p.file_name() == file_name)
            .count()
    }
}

/// Turns a list of change entries into a [`Package`].
///
/// Remove entries contribute nothing. Implementations are synchronous and
/// either return a complete package or an error.
pub trait Archive: Send + Sync {
    fn package(&self, entries: &[ChangeEntry]) -> PackResult<Package>;
}

/// Streams entry contents into a single zstd stream.
#[derive(Clone, Debug)]
pub struct ZstdArchiver {
    level: i32,
}

impl ZstdArchiver {
    pub fn new() -> Self {
        Self {
            level: COMPRESSION_LEVEL,
        }
    }

    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive for ZstdArchiver {
    fn package(&self, entries: &[ChangeEntry]) -> PackResult<Package> {
        let saves: Vec<&ChangeEntry> = entries.iter().filter(|e| e.is_save()).collect();

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_be_bytes());
        header.extend_from_slice(&(saves.len() as u32).to_be_bytes());

        let mut encoder = zstd::stream::write::Encoder::new(header, self.level)
            .map_err(|e| PackError::CompressionFailed(e.to_string()))?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut paths = Vec::with_capacity(saves.len());
        let mut raw_size = 0u64;

        for entry in saves {
            let payload = entry
                .payload
                .as_ref()
                .ok_or_else(|| PackError::MissingPayload(entry.path.clone()))?;
            let read_err = |source: io::Error| PackError::Read {
                path: entry.path.as_str().into(),
                source,
            };

            let mut prefix = Vec::new();
            let path = entry.path.as_str().as_bytes();
            encode_varint(&mut prefix, path.len() as u64);
            prefix.extend_from_slice(path);
            encode_varint(&mut prefix, entry.size);
            write_all(&mut encoder, &prefix)?;

            let mut reader = payload.open().map_err(read_err)?;
            let mut crc = crc32fast::Hasher::new();
            let mut copied = 0u64;
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(read_err(e)),
                };
                copied += n as u64;
                if copied > entry.size {
                    break;
                }
                crc.update(&buf[..n]);
                write_all(&mut encoder, &buf[..n])?;
            }
            if copied != entry.size {
                return Err(PackError::SizeChanged {
                    path: entry.path.clone(),
                    expected: entry.size,
                    actual: copied,
                });
            }
            write_all(&mut encoder, &crc.finalize().to_be_bytes())?;

            debug!(path = %entry.path, size = entry.size, "packaged");
            raw_size += entry.size;
            paths.push(entry.path.clone());
        }

        let mut out = encoder
            .finish()
            .map_err(|e| PackError::CompressionFailed(e.to_string()))?;
        let checksum = *blake3::hash(&out).as_bytes();
        out.reserve_exact(TRAILER_LEN);
        out.extend_from_slice(&checksum);

        let package = Package {
            byte_size: out.len() as u64,
            bytes: Bytes::from(out),
            raw_size,
            entry_count: paths.len(),
            paths,
            checksum,
        };
        debug!(
            entries = package.entry_count,
            raw = package.raw_size,
            compressed = package.byte_size,
            checksum = %package.short_checksum(),
            "package built"
        );
        Ok(package)
    }
}

fn write_all<W: Write>(w: &mut W, data: &[u8]) -> PackResult<()> {
    w.write_all(data)
        .map_err(|e| PackError::CompressionFailed(e.to_string()))
}
