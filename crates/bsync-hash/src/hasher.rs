use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bsync_types::Digest;

/// Read buffer used when streaming file contents into the hasher.
const STREAM_BUF: usize = 64 * 1024;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a file digest and a routing hint over identical bytes
/// never collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for project file contents.
    pub const FILE: Self = Self {
        domain: "bsync-file-v1",
    };
    /// Hasher for sticky-host routing hints.
    pub const HINT: Self = Self {
        domain: "bsync-hint-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    fn start(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Digest {
        let mut hasher = self.start();
        hasher.update(data);
        Digest::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash everything `reader` yields. Returns the digest and the byte count.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<(Digest, u64)> {
        let mut hasher = self.start();
        let mut buf = vec![0u8; STREAM_BUF];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((Digest::from_hash(*hasher.finalize().as_bytes()), total))
    }

    /// Stream a file from disk through the hasher.
    pub fn hash_file(&self, path: &Path) -> Result<(Digest, u64), HashError> {
        let file = File::open(path).map_err(|source| HashError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.hash_reader(file).map_err(|source| HashError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Verify that data produces the expected digest.
    pub fn verify(&self, data: &[u8], expected: &Digest) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
