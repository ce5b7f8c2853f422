//! BLAKE3 content hashing for change detection

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// A BLAKE3 content hash (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Length of the digest in bytes
    pub const LEN: usize = 32;

    /// Create a new ContentHash from bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Rebuild a hash from a stored blob, if it has the right length
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get the hash as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash bytes using BLAKE3
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash::from_bytes(*blake3::hash(data).as_bytes())
}

/// Hash everything a reader yields
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(ContentHash::from_bytes(*hasher.finalize().as_bytes()))
}

/// Hash a file using BLAKE3 (streaming for large files)
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let file = File::open(path)?;
    hash_reader(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hash_consistency() {
        let data = b"hello world";
        assert_eq!(hash_bytes(data), hash_bytes(data));
    }

    #[test]
    fn test_different_data_different_hash() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn test_hex_encoding_lowercase() {
        let hash = ContentHash::from_bytes([0xde; 32]);
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("dede"));
        assert!(hex.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        let data = b"ledger row";
        assert_eq!(hash_bytes(data).to_hex(), blake3::hash(data).to_hex().as_str());
    }

    #[test]
    fn test_from_slice_checks_length() {
        let hash = hash_bytes(b"x");
        assert_eq!(ContentHash::from_slice(hash.as_bytes()), Some(hash));
        assert_eq!(ContentHash::from_slice(&[0u8; 31]), None);
        assert_eq!(ContentHash::from_slice(&[]), None);
    }

    #[test]
    fn test_hash_file() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file_path = temp_dir.path().join("test.txt");

        let data = b"test file content";
        std::fs::write(&file_path, data)?;

        assert_eq!(hash_file(&file_path)?, hash_bytes(data));
        Ok(())
    }

    #[test]
    fn test_hash_large_file() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file_path = temp_dir.path().join("large.bin");

        let chunk = vec![0xAB; 1024 * 1024];
        let mut file = std::fs::File::create(&file_path)?;
        for _ in 0..3 {
            file.write_all(&chunk)?;
        }
        drop(file);

        let mut whole = Vec::with_capacity(3 * chunk.len());
        for _ in 0..3 {
            whole.extend_from_slice(&chunk);
        }
        assert_eq!(hash_file(&file_path)?, hash_bytes(&whole));
        Ok(())
    }

    #[test]
    fn test_hash_missing_file_is_io_error() {
        let err = hash_file(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
