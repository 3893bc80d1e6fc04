//! Streaming plaintext digests for the integrity check

use sha2::{Digest, Sha256, Sha512};

use crate::registry::HashAlgorithm;

/// Incremental digest over whichever algorithm the artifact declares.
pub enum IntegrityHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl IntegrityHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => IntegrityHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => IntegrityHasher::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            IntegrityHasher::Sha256(h) => h.update(data),
            IntegrityHasher::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            IntegrityHasher::Sha256(h) => hex::encode(h.finalize()),
            IntegrityHasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compare two digests without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        let h = IntegrityHasher::new(HashAlgorithm::Sha256);
        assert_eq!(
            h.finalize_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha512_abc_incremental() {
        let mut h = IntegrityHasher::new(HashAlgorithm::Sha512);
        h.update(b"a");
        h.update(b"bc");
        assert_eq!(
            h.finalize_hex(),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn test_hex_len_matches_algorithm() {
        for alg in [HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            let mut h = IntegrityHasher::new(alg);
            h.update(b"payload");
            assert_eq!(h.finalize_hex().len(), alg.hex_len());
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
        assert!(constant_time_eq(b"", b""));
    }
}
