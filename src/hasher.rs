use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::error::ConfigError;

/// Number of hex characters kept from each block digest.
///
/// Short digests make signature comparison cheap at the cost of accepting
/// collisions between different blocks. Widening this changes which files get
/// grouped, so it is fixed.
pub const DIGEST_LEN: usize = 5;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Hash function applied to each block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha1,
    Blake3,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(ConfigError::UnknownHashAlgorithm(s.to_string())),
        }
    }
}

/// Truncated, upper-case hex digest of one block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockDigest([u8; DIGEST_LEN]);

impl BlockDigest {
    fn from_raw(raw: &[u8]) -> Self {
        let mut hex = [0u8; DIGEST_LEN];
        for (i, slot) in hex.iter_mut().enumerate() {
            let byte = raw[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            *slot = HEX_UPPER[nibble as usize];
        }
        BlockDigest(hex)
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII hex digits are ever stored.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockDigest({})", self.as_str())
    }
}

/// Hashes one block with `algorithm`.
///
/// The caller passes the whole block, including any zero padding; the digest
/// depends on every byte of `block`.
pub fn hash_block(block: &[u8], algorithm: HashAlgorithm) -> BlockDigest {
    match algorithm {
        HashAlgorithm::Md5 => BlockDigest::from_raw(&Md5::digest(block)),
        HashAlgorithm::Sha1 => BlockDigest::from_raw(&Sha1::digest(block)),
        HashAlgorithm::Blake3 => BlockDigest::from_raw(blake3::hash(block).as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_digest_is_truncated_uppercase_hex() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(hash_block(b"", HashAlgorithm::Md5).as_str(), "D41D8");
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(hash_block(b"abc", HashAlgorithm::Md5).as_str(), "90015");
    }

    #[test]
    fn sha1_digest_is_truncated_uppercase_hex() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(hash_block(b"abc", HashAlgorithm::Sha1).as_str(), "A9993");
    }

    #[test]
    fn blake3_digest_has_fixed_length() {
        let digest = hash_block(b"Hello", HashAlgorithm::Blake3);
        assert_eq!(digest.as_str().len(), DIGEST_LEN);
        assert!(digest.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn padding_changes_the_digest() {
        let short = hash_block(b"ld\n", HashAlgorithm::Md5);
        let padded = hash_block(b"ld\n\0\0", HashAlgorithm::Md5);
        assert_ne!(short, padded);
    }

    #[test]
    fn same_block_same_digest() {
        for algorithm in [HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Blake3] {
            assert_eq!(hash_block(b"Hello", algorithm), hash_block(b"Hello", algorithm));
        }
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("SHA1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert_eq!(" blake3 ".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert!(matches!(
            "crc32".parse::<HashAlgorithm>(),
            Err(ConfigError::UnknownHashAlgorithm(name)) if name == "crc32"
        ));
    }
}
