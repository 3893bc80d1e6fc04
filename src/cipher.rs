//! Streaming symmetric ciphers
//!
//! Each [`CipherAlgorithm`] gets an encrypting and a decrypting
//! [`CipherStream`]. Input may be fed in pieces of any size; output is
//! emitted as soon as it is safe to do so and the remainder on `finish`.
//!
//! `AES-CBC-PKCS7`: AES chained over the header IV, PKCS#7 padded. The
//! decryptor always holds back the final block until `finish` so the
//! padding can be checked and stripped.
//!
//! `XSalsa20-Poly1305-CHUNKED`: NaCl secretbox per plaintext chunk:
//!
//! ```text
//! [sealed chunk 0][sealed chunk 1]...[sealed final chunk]
//!
//! sealed chunk = secretbox(key, nonce_i, plaintext_i)   (plaintext + 16-byte MAC)
//! nonce_i      = iv with bytes 16..24 XORed with big-endian u64 i
//! ```
//!
//! Every chunk except the last carries exactly [`CHUNK_SIZE`] plaintext
//! bytes. The last carries fewer, possibly zero, so a well-formed stream
//! always ends with a short chunk and truncation at a chunk boundary is
//! detected.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use crypto_secretbox::aead::Aead;
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use crate::registry::CipherAlgorithm;

/// Plaintext bytes per secretbox chunk (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Poly1305 MAC length
const TAG_LEN: usize = 16;

const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_LEN;

const AES_BLOCK_LEN: usize = 16;

const SECRETBOX_NONCE_LEN: usize = 24;

/// An in-progress encryption or decryption.
pub trait CipherStream {
    /// Process `input`, appending whatever output is ready to `out`.
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Flush the remaining output. Must be called exactly once, after the
    /// last `update`.
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Build an encrypting stream for `algorithm`.
pub fn encryptor(
    algorithm: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
) -> Result<Box<dyn CipherStream>> {
    match algorithm {
        CipherAlgorithm::AesCbcPkcs7 => Ok(Box::new(CbcEncryptor {
            cipher: AesKey::new(key)?,
            chain: block_from_iv(iv)?,
            pending: Zeroizing::new(Vec::with_capacity(AES_BLOCK_LEN)),
        })),
        CipherAlgorithm::XSalsa20Poly1305Chunked => Ok(Box::new(ChunkedSealer {
            nonces: ChunkNonces::new(iv)?,
            cipher: secretbox(key)?,
            pending: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE)),
        })),
    }
}

/// Build a decrypting stream for `algorithm`.
pub fn decryptor(
    algorithm: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
) -> Result<Box<dyn CipherStream>> {
    match algorithm {
        CipherAlgorithm::AesCbcPkcs7 => Ok(Box::new(CbcDecryptor {
            cipher: AesKey::new(key)?,
            chain: block_from_iv(iv)?,
            pending: Vec::with_capacity(2 * AES_BLOCK_LEN),
        })),
        CipherAlgorithm::XSalsa20Poly1305Chunked => Ok(Box::new(ChunkedOpener {
            nonces: ChunkNonces::new(iv)?,
            cipher: secretbox(key)?,
            pending: Vec::with_capacity(SEALED_CHUNK_SIZE),
        })),
    }
}

fn bad_parameter(msg: impl Into<String>) -> LockboxError {
    LockboxError::with_kind(ErrorCategory::Internal, ErrorKind::InternalInvariant, msg)
}

fn integrity_failure(msg: impl Into<String>) -> LockboxError {
    LockboxError::with_kind(ErrorCategory::User, ErrorKind::IntegrityCheckFailed, msg)
}

fn block_from_iv(iv: &[u8]) -> Result<Block> {
    if iv.len() != AES_BLOCK_LEN {
        return Err(bad_parameter(format!(
            "AES-CBC needs a {}-byte IV, got {}",
            AES_BLOCK_LEN,
            iv.len()
        )));
    }
    Ok(Block::clone_from_slice(iv))
}

/// AES with the key size picked at runtime.
enum AesKey {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesKey {
    fn new(key: &[u8]) -> Result<Self> {
        let cipher = match key.len() {
            16 => Aes128::new_from_slice(key).map(AesKey::Aes128),
            24 => Aes192::new_from_slice(key).map(AesKey::Aes192),
            32 => Aes256::new_from_slice(key).map(AesKey::Aes256),
            n => return Err(bad_parameter(format!("no AES variant takes a {}-byte key", n))),
        };
        cipher.map_err(|_| bad_parameter("AES rejected the derived key"))
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            AesKey::Aes128(c) => c.encrypt_block(block),
            AesKey::Aes192(c) => c.encrypt_block(block),
            AesKey::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut Block) {
        match self {
            AesKey::Aes128(c) => c.decrypt_block(block),
            AesKey::Aes192(c) => c.decrypt_block(block),
            AesKey::Aes256(c) => c.decrypt_block(block),
        }
    }
}

fn xor_into(block: &mut Block, other: &Block) {
    for (b, o) in block.iter_mut().zip(other.iter()) {
        *b ^= o;
    }
}

struct CbcEncryptor {
    cipher: AesKey,
    chain: Block,
    pending: Zeroizing<Vec<u8>>,
}

impl CbcEncryptor {
    fn encrypt_one(&mut self, plaintext: &[u8], out: &mut Vec<u8>) {
        let mut block = Block::clone_from_slice(plaintext);
        xor_into(&mut block, &self.chain);
        self.cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
        self.chain = block;
    }
}

impl CipherStream for CbcEncryptor {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(input);
        let whole = self.pending.len() / AES_BLOCK_LEN * AES_BLOCK_LEN;
        if whole == 0 {
            return Ok(());
        }
        let ready = Zeroizing::new(self.pending.drain(..whole).collect::<Vec<u8>>());
        for block in ready.chunks_exact(AES_BLOCK_LEN) {
            self.encrypt_one(block, out);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        // PKCS#7: always pad, with a full block when already aligned.
        let pad = AES_BLOCK_LEN - self.pending.len();
        let mut last = Zeroizing::new(std::mem::take(&mut *self.pending));
        last.resize(AES_BLOCK_LEN, pad as u8);
        self.encrypt_one(&last, out);
        Ok(())
    }
}

struct CbcDecryptor {
    cipher: AesKey,
    chain: Block,
    pending: Vec<u8>,
}

impl CbcDecryptor {
    /// Caller wipes the returned plaintext block.
    fn decrypt_one(&mut self, ciphertext: &[u8]) -> Block {
        let next_chain = Block::clone_from_slice(ciphertext);
        let mut block = next_chain;
        self.cipher.decrypt_block(&mut block);
        xor_into(&mut block, &self.chain);
        self.chain = next_chain;
        block
    }
}

impl CipherStream for CbcDecryptor {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(input);
        if self.pending.is_empty() {
            return Ok(());
        }
        // Keep at least one block back; it may be the padded final block.
        let ready = (self.pending.len() - 1) / AES_BLOCK_LEN * AES_BLOCK_LEN;
        if ready == 0 {
            return Ok(());
        }
        let blocks: Vec<u8> = self.pending.drain(..ready).collect();
        for block in blocks.chunks_exact(AES_BLOCK_LEN) {
            let mut plain = self.decrypt_one(block);
            out.extend_from_slice(&plain);
            plain.as_mut_slice().zeroize();
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.pending.len() != AES_BLOCK_LEN {
            return Err(integrity_failure(
                "truncated or corrupt input; ciphertext is not a whole number of blocks",
            ));
        }
        let last = std::mem::take(&mut self.pending);
        let mut plain = self.decrypt_one(&last);

        let pad = plain[AES_BLOCK_LEN - 1] as usize;
        let padding_ok = (1..=AES_BLOCK_LEN).contains(&pad)
            && plain[AES_BLOCK_LEN - pad..]
                .iter()
                .all(|&b| b as usize == pad);
        if padding_ok {
            out.extend_from_slice(&plain[..AES_BLOCK_LEN - pad]);
        }
        plain.as_mut_slice().zeroize();

        if !padding_ok {
            return Err(integrity_failure(
                "corrupt input, tampered-with data, or bad passphrase",
            ));
        }
        Ok(())
    }
}

fn secretbox(key: &[u8]) -> Result<XSalsa20Poly1305> {
    XSalsa20Poly1305::new_from_slice(key)
        .map_err(|_| bad_parameter(format!("secretbox needs a 32-byte key, got {}", key.len())))
}

/// Per-chunk nonce sequence derived from the header IV.
struct ChunkNonces {
    iv: [u8; SECRETBOX_NONCE_LEN],
    index: u64,
}

impl ChunkNonces {
    fn new(iv: &[u8]) -> Result<Self> {
        let iv: [u8; SECRETBOX_NONCE_LEN] = iv.try_into().map_err(|_| {
            bad_parameter(format!(
                "secretbox needs a {}-byte IV, got {}",
                SECRETBOX_NONCE_LEN,
                iv.len()
            ))
        })?;
        Ok(Self { iv, index: 0 })
    }

    fn next(&mut self) -> Result<Nonce> {
        let mut nonce = self.iv;
        for (b, c) in nonce[16..].iter_mut().zip(self.index.to_be_bytes()) {
            *b ^= c;
        }
        self.index = self
            .index
            .checked_add(1)
            .ok_or_else(|| bad_parameter("chunk counter overflow"))?;
        Ok(Nonce::from(nonce))
    }
}

struct ChunkedSealer {
    nonces: ChunkNonces,
    cipher: XSalsa20Poly1305,
    pending: Zeroizing<Vec<u8>>,
}

impl ChunkedSealer {
    fn seal(&mut self, plaintext: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let nonce = self.nonces.next()?;
        let sealed = self.cipher.encrypt(&nonce, plaintext).map_err(|e| {
            LockboxError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                format!("encryption failed: {}", e),
            )
        })?;
        out.extend_from_slice(&sealed);
        Ok(())
    }
}

impl CipherStream for ChunkedSealer {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(input);
        // A full chunk is never the final one, so it can go out right away.
        while self.pending.len() >= CHUNK_SIZE {
            let chunk = Zeroizing::new(self.pending.drain(..CHUNK_SIZE).collect::<Vec<u8>>());
            self.seal(&chunk, out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let last = Zeroizing::new(std::mem::take(&mut *self.pending));
        self.seal(&last, out)
    }
}

struct ChunkedOpener {
    nonces: ChunkNonces,
    cipher: XSalsa20Poly1305,
    pending: Vec<u8>,
}

impl ChunkedOpener {
    fn open(&mut self, sealed: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let nonce = self.nonces.next()?;
        let plaintext = Zeroizing::new(self.cipher.decrypt(&nonce, sealed).map_err(|_| {
            integrity_failure("corrupt input, tampered-with data, or bad passphrase")
        })?);
        out.extend_from_slice(&plaintext);
        Ok(())
    }
}

impl CipherStream for ChunkedOpener {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(input);
        while self.pending.len() >= SEALED_CHUNK_SIZE {
            let sealed: Vec<u8> = self.pending.drain(..SEALED_CHUNK_SIZE).collect();
            self.open(&sealed, out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.pending.len() < TAG_LEN {
            return Err(integrity_failure(
                "truncated or corrupt input (while reading final chunk)",
            ));
        }
        let last = std::mem::take(&mut self.pending);
        self.open(&last, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stream: &mut dyn CipherStream, input: &[u8], piece: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for part in input.chunks(piece.max(1)) {
            stream.update(part, &mut out)?;
        }
        stream.finish(&mut out)?;
        Ok(out)
    }

    fn roundtrip(alg: CipherAlgorithm, key: &[u8], iv: &[u8], plaintext: &[u8], piece: usize) {
        let ct = run(&mut *encryptor(alg, key, iv).unwrap(), plaintext, piece).unwrap();
        let pt = run(&mut *decryptor(alg, key, iv).unwrap(), &ct, piece + 7).unwrap();
        assert_eq!(pt, plaintext, "{} piece={}", alg, piece);
    }

    #[test]
    fn test_cbc_nist_vector() {
        // NIST SP 800-38A F.2.5, CBC-AES256.Encrypt, first two blocks.
        let key = hex::decode("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4")
            .unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode("6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51")
            .unwrap();

        let ct = run(
            &mut *encryptor(CipherAlgorithm::AesCbcPkcs7, &key, &iv).unwrap(),
            &pt,
            5,
        )
        .unwrap();

        assert_eq!(ct.len(), 48);
        assert_eq!(
            hex::encode(&ct[..32]),
            "f58c4c04d6e5f1ba779eabfb5f7bfbd69cfc4e967edb808d679f777bc6702c7d"
        );
    }

    #[test]
    fn test_cbc_roundtrip_sizes() {
        let iv = [7u8; 16];
        for key_len in [16, 24, 32] {
            let key = vec![0x11u8; key_len];
            for len in [0usize, 1, 15, 16, 17, 31, 32, 1000] {
                let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
                roundtrip(CipherAlgorithm::AesCbcPkcs7, &key, &iv, &plaintext, 3);
                roundtrip(CipherAlgorithm::AesCbcPkcs7, &key, &iv, &plaintext, 4096);
            }
        }
    }

    #[test]
    fn test_cbc_padding_always_added() {
        let ct = run(
            &mut *encryptor(CipherAlgorithm::AesCbcPkcs7, &[1u8; 32], &[2u8; 16]).unwrap(),
            &[0u8; 32],
            32,
        )
        .unwrap();
        assert_eq!(ct.len(), 48);
    }

    #[test]
    fn test_cbc_truncated_ciphertext() {
        let mut ct = run(
            &mut *encryptor(CipherAlgorithm::AesCbcPkcs7, &[1u8; 32], &[2u8; 16]).unwrap(),
            b"hello world, this is cbc",
            64,
        )
        .unwrap();
        ct.pop();

        let err = run(
            &mut *decryptor(CipherAlgorithm::AesCbcPkcs7, &[1u8; 32], &[2u8; 16]).unwrap(),
            &ct,
            64,
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::IntegrityCheckFailed));
    }

    #[test]
    fn test_cbc_empty_ciphertext() {
        let err = run(
            &mut *decryptor(CipherAlgorithm::AesCbcPkcs7, &[1u8; 32], &[2u8; 16]).unwrap(),
            &[],
            64,
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::IntegrityCheckFailed));
    }

    #[test]
    fn test_chunked_roundtrip_sizes() {
        let key = [0x42u8; 32];
        let iv = [0x24u8; 24];
        for len in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            roundtrip(CipherAlgorithm::XSalsa20Poly1305Chunked, &key, &iv, &plaintext, 10_000);
        }
    }

    #[test]
    fn test_chunked_layout() {
        let alg = CipherAlgorithm::XSalsa20Poly1305Chunked;
        let key = [0x42u8; 32];
        let iv = [0x24u8; 24];

        let empty = run(&mut *encryptor(alg, &key, &iv).unwrap(), &[], 1).unwrap();
        assert_eq!(empty.len(), TAG_LEN);

        // An exact multiple of the chunk size still ends with an empty final chunk.
        let aligned = vec![0u8; 2 * CHUNK_SIZE];
        let ct = run(&mut *encryptor(alg, &key, &iv).unwrap(), &aligned, CHUNK_SIZE).unwrap();
        assert_eq!(ct.len(), 2 * SEALED_CHUNK_SIZE + TAG_LEN);
    }

    #[test]
    fn test_chunked_wrong_key() {
        let alg = CipherAlgorithm::XSalsa20Poly1305Chunked;
        let iv = [0x24u8; 24];
        let ct = run(&mut *encryptor(alg, &[1u8; 32], &iv).unwrap(), b"secret", 64).unwrap();
        let err = run(&mut *decryptor(alg, &[2u8; 32], &iv).unwrap(), &ct, 64).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::IntegrityCheckFailed));
    }

    #[test]
    fn test_chunked_dropped_final_chunk() {
        let alg = CipherAlgorithm::XSalsa20Poly1305Chunked;
        let key = [1u8; 32];
        let iv = [0x24u8; 24];
        let plaintext = vec![9u8; CHUNK_SIZE + 10];
        let ct = run(&mut *encryptor(alg, &key, &iv).unwrap(), &plaintext, 4096).unwrap();

        let err = run(
            &mut *decryptor(alg, &key, &iv).unwrap(),
            &ct[..SEALED_CHUNK_SIZE],
            4096,
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::IntegrityCheckFailed));
    }

    #[test]
    fn test_chunked_swapped_chunks() {
        let alg = CipherAlgorithm::XSalsa20Poly1305Chunked;
        let key = [1u8; 32];
        let iv = [0x24u8; 24];
        let plaintext = vec![9u8; 2 * CHUNK_SIZE + 10];
        let ct = run(&mut *encryptor(alg, &key, &iv).unwrap(), &plaintext, 4096).unwrap();

        let mut swapped = Vec::with_capacity(ct.len());
        swapped.extend_from_slice(&ct[SEALED_CHUNK_SIZE..2 * SEALED_CHUNK_SIZE]);
        swapped.extend_from_slice(&ct[..SEALED_CHUNK_SIZE]);
        swapped.extend_from_slice(&ct[2 * SEALED_CHUNK_SIZE..]);

        let err = run(&mut *decryptor(alg, &key, &iv).unwrap(), &swapped, 4096).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::IntegrityCheckFailed));
    }

    #[test]
    fn test_rejects_wrong_parameter_sizes() {
        assert!(encryptor(CipherAlgorithm::AesCbcPkcs7, &[0u8; 20], &[0u8; 16]).is_err());
        assert!(encryptor(CipherAlgorithm::AesCbcPkcs7, &[0u8; 32], &[0u8; 24]).is_err());
        assert!(encryptor(CipherAlgorithm::XSalsa20Poly1305Chunked, &[0u8; 16], &[0u8; 24]).is_err());
        assert!(decryptor(CipherAlgorithm::XSalsa20Poly1305Chunked, &[0u8; 32], &[0u8; 16]).is_err());
    }
}
