//! Format version registry
//!
//! Every artifact names the format version it was written with. A version
//! pins a fixed algorithm tuple; entries are only ever added, so artifacts
//! written by older releases remain decryptable after the default moves on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};

/// Version used by `encrypt` unless told otherwise.
pub const CURRENT_VERSION: &str = CURRENT.version;

/// Digest algorithm used for the plaintext integrity hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Length of the lowercase hex rendering of a digest.
    pub fn hex_len(self) -> usize {
        self.output_len() * 2
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => f.write_str("SHA-256"),
            HashAlgorithm::Sha512 => f.write_str("SHA-512"),
        }
    }
}

/// Symmetric cipher applied to the plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    /// AES in CBC mode with PKCS#7 padding.
    #[serde(rename = "AES-CBC-PKCS7")]
    AesCbcPkcs7,
    /// NaCl secretbox over 64 KiB plaintext chunks.
    #[serde(rename = "XSalsa20-Poly1305-CHUNKED")]
    XSalsa20Poly1305Chunked,
}

impl CipherAlgorithm {
    /// True if the cipher accepts a key of `bits` bits.
    pub fn accepts_key_size(self, bits: u32) -> bool {
        match self {
            CipherAlgorithm::AesCbcPkcs7 => matches!(bits, 128 | 192 | 256),
            CipherAlgorithm::XSalsa20Poly1305Chunked => bits == 256,
        }
    }

    /// IV size in bits this cipher consumes.
    pub fn iv_size_bits(self) -> u32 {
        match self {
            CipherAlgorithm::AesCbcPkcs7 => 128,
            CipherAlgorithm::XSalsa20Poly1305Chunked => 192,
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherAlgorithm::AesCbcPkcs7 => f.write_str("AES-CBC-PKCS7"),
            CipherAlgorithm::XSalsa20Poly1305Chunked => f.write_str("XSalsa20-Poly1305-CHUNKED"),
        }
    }
}

/// scrypt cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptCost {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

/// The algorithm tuple a format version stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmParams {
    pub version: &'static str,
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub key_size_bits: u32,
    pub block_size_bits: u32,
    pub salt_size_bits: u32,
    pub kdf: ScryptCost,
}

/// scrypt N=32768, r=8, p=1
const SCRYPT_DEFAULT: ScryptCost = ScryptCost {
    log_n: 15,
    r: 8,
    p: 1,
};

const V1_0_0: AlgorithmParams = AlgorithmParams {
    version: "1.0.0",
    hash: HashAlgorithm::Sha256,
    cipher: CipherAlgorithm::AesCbcPkcs7,
    key_size_bits: 256,
    block_size_bits: 128,
    salt_size_bits: 128,
    kdf: SCRYPT_DEFAULT,
};

const V2_0_0: AlgorithmParams = AlgorithmParams {
    version: "2.0.0",
    hash: HashAlgorithm::Sha512,
    cipher: CipherAlgorithm::XSalsa20Poly1305Chunked,
    key_size_bits: 256,
    block_size_bits: 192,
    salt_size_bits: 256,
    kdf: SCRYPT_DEFAULT,
};

const CURRENT: AlgorithmParams = V2_0_0;

static VERSIONS: &[AlgorithmParams] = &[V1_0_0, V2_0_0];

/// Look up the algorithm tuple for `version`.
pub fn resolve(version: &str) -> Result<&'static AlgorithmParams> {
    VERSIONS
        .iter()
        .find(|params| params.version == version)
        .ok_or_else(|| {
            LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnsupportedVersion,
                format!("unsupported format version {:?}", version),
            )
        })
}

/// The tuple `encrypt` writes with.
pub fn current() -> &'static AlgorithmParams {
    static PARAMS: AlgorithmParams = CURRENT;
    &PARAMS
}
