//! Content hashing for change detection.
//!
//! Files are hashed with SHA-1, the digest the bucket server reports for every
//! stored version, so local and remote fingerprints compare directly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Read buffer size used when hashing files (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A 20-byte SHA-1 fingerprint of a file's content
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 20]);

impl ContentDigest {
    /// Hash an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    /// Lowercase hex, 40 characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hash everything a reader yields, `chunk_size` bytes at a time.
pub fn digest_reader<R: Read>(mut reader: R, chunk_size: usize) -> std::io::Result<ContentDigest> {
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(ContentDigest(hasher.finalize().into()))
}

/// Hash a file by path without loading it into memory
pub fn digest_file(path: &Path) -> std::io::Result<ContentDigest> {
    let file = File::open(path)?;
    digest_reader(file, DEFAULT_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        // sha1("hello")
        let digest = ContentDigest::of_bytes(b"hello");
        assert_eq!(digest.to_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() -> std::io::Result<()> {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = ContentDigest::of_bytes(&data);

        for chunk_size in [1, 7, 4096, DEFAULT_CHUNK_SIZE, 1 << 20] {
            let digest = digest_reader(Cursor::new(&data), chunk_size)?;
            assert_eq!(digest, expected, "chunk size {}", chunk_size);
        }

        Ok(())
    }

    #[test]
    fn test_digest_file_matches_bytes() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("data.bin");
        std::fs::write(&path, b"some file content")?;

        assert_eq!(digest_file(&path)?, ContentDigest::of_bytes(b"some file content"));
        Ok(())
    }

    #[test]
    fn test_empty_file() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("empty");
        std::fs::write(&path, b"")?;

        assert_eq!(digest_file(&path)?.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = digest_file(Path::new("/nonexistent/offsite/file")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_hex_round_trip_and_serde() {
        let digest = ContentDigest::of_bytes(b"abc");
        let parsed: ContentDigest = digest.to_hex().parse().unwrap();
        assert_eq!(parsed, digest);

        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest.to_hex()));
        assert!("not-hex".parse::<ContentDigest>().is_err());
    }
}
