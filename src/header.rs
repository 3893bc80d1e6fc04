//! Artifact header encoding
//!
//! An artifact is a single line of text followed by raw ciphertext:
//!
//! ```text
//! LOCKBOX {"formatVersion":"2.0.0","saltSizeBits":256,"salt":"...",...}\n
//! <ciphertext bytes>
//! ```
//!
//! The JSON object is written compactly, so it never contains a raw
//! newline and the first `\n` is the boundary. Binary fields are base64
//! (standard alphabet, padded); the plaintext digest is lowercase hex.

use std::io::{BufRead, Read};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use crate::registry::{AlgorithmParams, CipherAlgorithm, HashAlgorithm};

/// Magic marker opening every header line
pub const MAGIC: &str = "LOCKBOX ";

/// Longest header line decode will look at, newline included.
pub const MAX_HEADER_LEN: usize = 16 * 1024;

/// Metadata stored in front of the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub format_version: String,
    pub salt_size_bits: u32,
    pub salt: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    /// Lowercase hex digest of the plaintext.
    pub original_hash: String,
    pub cipher_algorithm: CipherAlgorithm,
    pub key_size_bits: u32,
    pub block_size_bits: u32,
    pub iv: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HeaderRecord {
    format_version: String,
    salt_size_bits: u32,
    salt: String,
    hash_algorithm: HashAlgorithm,
    original_hash: String,
    cipher_algorithm: CipherAlgorithm,
    key_size_bits: u32,
    block_size_bits: u32,
    iv: String,
}

fn malformed(msg: impl Into<String>) -> LockboxError {
    LockboxError::with_kind(ErrorCategory::User, ErrorKind::MalformedArtifact, msg)
}

impl ArtifactHeader {
    /// Header for a fresh artifact written under `params`.
    pub fn for_params(
        params: &AlgorithmParams,
        salt: Vec<u8>,
        iv: Vec<u8>,
        original_hash: String,
    ) -> Self {
        Self {
            format_version: params.version.to_string(),
            salt_size_bits: params.salt_size_bits,
            salt,
            hash_algorithm: params.hash,
            original_hash,
            cipher_algorithm: params.cipher,
            key_size_bits: params.key_size_bits,
            block_size_bits: params.block_size_bits,
            iv,
        }
    }

    /// True if the algorithm tuple in this header is exactly what `params`
    /// prescribes for its version.
    pub fn matches_params(&self, params: &AlgorithmParams) -> bool {
        self.format_version == params.version
            && self.hash_algorithm == params.hash
            && self.cipher_algorithm == params.cipher
            && self.key_size_bits == params.key_size_bits
            && self.block_size_bits == params.block_size_bits
            && self.salt_size_bits == params.salt_size_bits
    }

    /// Check the structural invariants every header must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.format_version.trim().is_empty() {
            return Err(malformed("header has an empty format version"));
        }
        if self.salt.is_empty() || self.salt.len() * 8 != self.salt_size_bits as usize {
            return Err(malformed(format!(
                "salt is {} bytes but header declares {} bits",
                self.salt.len(),
                self.salt_size_bits
            )));
        }
        if self.iv.is_empty() || self.iv.len() * 8 != self.block_size_bits as usize {
            return Err(malformed(format!(
                "IV is {} bytes but header declares {} bits",
                self.iv.len(),
                self.block_size_bits
            )));
        }
        if self.block_size_bits != self.cipher_algorithm.iv_size_bits() {
            return Err(malformed(format!(
                "{} does not use a {}-bit IV",
                self.cipher_algorithm, self.block_size_bits
            )));
        }
        if !self.cipher_algorithm.accepts_key_size(self.key_size_bits) {
            return Err(malformed(format!(
                "{} does not accept a {}-bit key",
                self.cipher_algorithm, self.key_size_bits
            )));
        }
        let hex_ok = self.original_hash.len() == self.hash_algorithm.hex_len()
            && self
                .original_hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !hex_ok {
            return Err(malformed(format!(
                "original hash is not a lowercase hex {} digest",
                self.hash_algorithm
            )));
        }
        Ok(())
    }
}

/// Render the header line, newline included.
pub fn encode(header: &ArtifactHeader) -> Result<Vec<u8>> {
    header.validate()?;

    let record = HeaderRecord {
        format_version: header.format_version.clone(),
        salt_size_bits: header.salt_size_bits,
        salt: STANDARD.encode(&header.salt),
        hash_algorithm: header.hash_algorithm,
        original_hash: header.original_hash.clone(),
        cipher_algorithm: header.cipher_algorithm,
        key_size_bits: header.key_size_bits,
        block_size_bits: header.block_size_bits,
        iv: STANDARD.encode(&header.iv),
    };
    let json = serde_json::to_string(&record).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to serialize header",
            e,
        )
    })?;

    let mut line = Vec::with_capacity(MAGIC.len() + json.len() + 1);
    line.extend_from_slice(MAGIC.as_bytes());
    line.extend_from_slice(json.as_bytes());
    line.push(b'\n');
    Ok(line)
}

/// Read and validate the header line from `reader`.
///
/// Consumes exactly the header line; the reader is left positioned at the
/// first ciphertext byte.
pub fn decode<R: BufRead>(reader: &mut R) -> Result<ArtifactHeader> {
    let mut line = Vec::new();
    reader
        .by_ref()
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut line)
        .map_err(|e| LockboxError::from_io("failed to read header", e))?;

    if line.is_empty() {
        return Err(malformed("input is empty"));
    }
    if line.last() != Some(&b'\n') {
        return Err(malformed(format!(
            "no header terminator within the first {} bytes",
            line.len()
        )));
    }
    line.pop();

    let body = line
        .strip_prefix(MAGIC.as_bytes())
        .ok_or_else(|| malformed("input unrecognized as lockbox data"))?;

    let record: HeaderRecord = serde_json::from_slice(body).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedArtifact,
            format!("header is not a valid record: {}", e),
            e,
        )
    })?;

    let salt = decode_base64("salt", &record.salt)?;
    let iv = decode_base64("iv", &record.iv)?;

    let header = ArtifactHeader {
        format_version: record.format_version,
        salt_size_bits: record.salt_size_bits,
        salt,
        hash_algorithm: record.hash_algorithm,
        original_hash: record.original_hash,
        cipher_algorithm: record.cipher_algorithm,
        key_size_bits: record.key_size_bits,
        block_size_bits: record.block_size_bits,
        iv,
    };
    header.validate()?;
    Ok(header)
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD.decode(value).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedArtifact,
            format!("{} is not valid base64: {}", field, e),
            e,
        )
    })
}
