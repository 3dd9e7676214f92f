//! The data-file value type.

use crate::infra::error::{SigaError, SigaResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A data file contained in a signature container.
///
/// Immutable once constructed: the contents are hashed exactly once while
/// being buffered, and the digests are kept alongside the bytes for the
/// lifetime of the value.
#[derive(Debug, Clone)]
pub struct DataFile {
    name: String,
    sha256: String,
    sha512: String,
    size: u64,
    contents: Vec<u8>,
}

impl DataFile {
    /// Create a `DataFile` from a name and data read from `reader`.
    ///
    /// The name must be non-empty and must not contain `/`.
    pub fn new(name: impl Into<String>, mut reader: impl Read) -> SigaResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(SigaError::Validation(format!("invalid name: {name}")));
        }

        // Calculate both hashes while reading the contents.
        let mut sha256 = Sha256::new();
        let mut sha512 = Sha512::new();
        let mut contents = Vec::new();
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| SigaError::Internal(format!("read {name}: {e}")))?;
            if n == 0 {
                break;
            }
            sha256.update(&buf[..n]);
            sha512.update(&buf[..n]);
            contents.extend_from_slice(&buf[..n]);
        }

        Ok(Self {
            name,
            sha256: BASE64.encode(sha256.finalize()),
            sha512: BASE64.encode(sha512.finalize()),
            size: contents.len() as u64,
            contents,
        })
    }

    /// Create a `DataFile` from a filesystem path, using the basename of
    /// the path as the name.
    pub fn read(path: impl AsRef<Path>) -> SigaResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SigaError::Validation(format!("invalid path: {}", path.display())))?
            .to_string();
        let file = File::open(path)
            .map_err(|e| SigaError::Internal(format!("open {}: {e}", path.display())))?;
        Self::new(name, file)
    }

    /// Create a `DataFile` from bytes already in memory.
    ///
    /// Skips name validation and takes ownership of the buffer; only used
    /// for names that were validated when they first entered the system.
    pub(crate) fn from_bytes(name: impl Into<String>, contents: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            sha256: BASE64.encode(Sha256::digest(&contents)),
            sha512: BASE64.encode(Sha512::digest(&contents)),
            size: contents.len() as u64,
            contents,
        }
    }

    /// Logical name of the file inside the container.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base64 SHA-256 digest of the contents.
    #[must_use]
    pub fn sha256_b64(&self) -> &str {
        &self.sha256
    }

    /// Base64 SHA-512 digest of the contents.
    #[must_use]
    pub fn sha512_b64(&self) -> &str {
        &self.sha512
    }

    /// Size of the contents in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.contents
    }

    /// Consume the value, returning the contents.
    #[must_use]
    pub fn into_contents(self) -> Vec<u8> {
        self.contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_size_are_computed_from_the_stream() {
        let df = DataFile::new("hello.txt", &b"hello"[..]).expect("datafile");
        assert_eq!(df.name(), "hello.txt");
        assert_eq!(df.size(), 5);
        // Known digests of "hello".
        assert_eq!(df.sha256_b64(), "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=");
        assert_eq!(
            df.sha512_b64(),
            "m3HSJL1i83hdltRq0+o9czGb+8KJDKra4t/3JRlnPKcjI8PZm6XBHXx6zG4UuMXaDEZjR1wuXDre9G9zvN7AQw=="
        );
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = DataFile::new("", &b"x"[..]).unwrap_err();
        assert!(err.to_string().contains("invalid name"));
    }

    #[test]
    fn name_with_slash_is_rejected() {
        let err = DataFile::new("dir/file.txt", &b"x"[..]).unwrap_err();
        assert!(err.to_string().contains("invalid name: dir/file.txt"));
    }

    #[test]
    fn from_bytes_matches_reader_construction() {
        let streamed = DataFile::new("a.txt", &b"contents"[..]).expect("datafile");
        let owned = DataFile::from_bytes("a.txt", b"contents".to_vec());
        assert_eq!(streamed.sha256_b64(), owned.sha256_b64());
        assert_eq!(streamed.sha512_b64(), owned.sha512_b64());
        assert_eq!(streamed.size(), owned.size());
    }
}
