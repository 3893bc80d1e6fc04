//! Passphrase key derivation using scrypt

use scrypt::{Params, scrypt};
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use crate::registry::ScryptCost;

/// Derive a `key_size_bits`-bit key from a passphrase and salt.
///
/// Any byte string is a valid passphrase, the empty one included. The
/// result is deterministic for identical inputs and is wiped on drop.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    key_size_bits: u32,
    cost: &ScryptCost,
) -> Result<Zeroizing<Vec<u8>>> {
    if key_size_bits == 0 || key_size_bits % 8 != 0 {
        return Err(LockboxError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("key size of {} bits is not a whole number of bytes", key_size_bits),
        ));
    }
    let key_len = (key_size_bits / 8) as usize;

    let params = Params::new(cost.log_n, cost.r, cost.p, key_len).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            "failed to create scrypt params",
            e,
        )
    })?;

    let mut key = Zeroizing::new(vec![0u8; key_len]);
    scrypt(passphrase, salt, &params, &mut key).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            "scrypt key derivation failed",
            e,
        )
    })?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap cost so the tests stay fast; the real cost comes from the registry.
    const TEST_COST: ScryptCost = ScryptCost {
        log_n: 4,
        r: 8,
        p: 1,
    };

    #[test]
    fn test_deterministic() {
        let k1 = derive_key(b"test", b"saltsalt", 256, &TEST_COST).unwrap();
        let k2 = derive_key(b"test", b"saltsalt", 256, &TEST_COST).unwrap();
        assert_eq!(*k1, *k2);
        assert_eq!(k1.len(), 32);
    }

    #[test]
    fn test_salt_changes_key() {
        let k1 = derive_key(b"test", b"saltsalt", 256, &TEST_COST).unwrap();
        let k2 = derive_key(b"test", b"saltpepr", 256, &TEST_COST).unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_passphrase_changes_key() {
        let k1 = derive_key(b"one", b"saltsalt", 256, &TEST_COST).unwrap();
        let k2 = derive_key(b"two", b"saltsalt", 256, &TEST_COST).unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_empty_passphrase_is_accepted() {
        let key = derive_key(b"", b"saltsalt", 128, &TEST_COST).unwrap();
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn test_known_answer() {
        // RFC 7914 section 12, second vector (N=1024, r=8, p=16), truncated to 256 bits.
        let cost = ScryptCost {
            log_n: 10,
            r: 8,
            p: 16,
        };
        let key = derive_key(b"password", b"NaCl", 256, &cost).unwrap();
        assert_eq!(
            hex::encode(&*key),
            "fdbabe1c9d3472007856e7190d01e9fe7c6ad7cbc8237830e77376634b373162"
        );
    }

    #[test]
    fn test_rejects_partial_byte_key_size() {
        let err = derive_key(b"test", b"saltsalt", 100, &TEST_COST).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::KeyDerivation));

        let err = derive_key(b"test", b"saltsalt", 0, &TEST_COST).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::KeyDerivation));
    }
}
