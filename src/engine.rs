//! File encryption/decryption operations
//!
//! [`Engine`] ties the pieces together: it resolves the format version,
//! derives the key, streams the file through the cipher and digest, and
//! publishes the result under a fresh name.
//!
//! Output is staged in a temporary file in the destination directory,
//! fsync'd, and only then linked under its final name, so a failed call
//! never leaves a half-written artifact or an unverified plaintext behind.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::cipher;
use crate::config::Config;
use crate::digest::{IntegrityHasher, constant_time_eq};
use crate::erase;
use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use crate::header::{self, ArtifactHeader};
use crate::kdf;
use crate::naming;
use crate::registry::{self, AlgorithmParams, HashAlgorithm};

/// Read buffer size for streaming (64KB)
const IO_BUF_LEN: usize = 64 * 1024;

/// Give up publishing after this many names were taken underneath us.
const MAX_PUBLISH_ATTEMPTS: usize = 64;

/// Encrypts and decrypts single files.
///
/// The engine holds configuration only. Passphrases, keys and file
/// handles live for the duration of one call.
#[derive(Debug, Clone)]
pub struct Engine {
    extension: String,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        Self {
            extension: config.extension.clone(),
        }
    }

    /// Encrypt `source` under the current format version.
    ///
    /// Writes `<source><extension>` (or a numbered variant) next to the
    /// source and returns its path. When `delete_source_after` is set, the
    /// source is zero-wiped and removed, but only after the artifact has
    /// been fully written.
    pub fn encrypt(
        &self,
        source: &Path,
        passphrase: &[u8],
        delete_source_after: bool,
    ) -> Result<PathBuf> {
        self.encrypt_under(source, passphrase, delete_source_after, registry::current())
    }

    /// Encrypt `source` under an explicit registered format version.
    pub fn encrypt_with_version(
        &self,
        source: &Path,
        passphrase: &[u8],
        delete_source_after: bool,
        version: &str,
    ) -> Result<PathBuf> {
        let params = registry::resolve(version)?;
        self.encrypt_under(source, passphrase, delete_source_after, params)
    }

    fn encrypt_under(
        &self,
        source: &Path,
        passphrase: &[u8],
        delete_source_after: bool,
        params: &AlgorithmParams,
    ) -> Result<PathBuf> {
        require_regular_file(source)?;
        if delete_source_after {
            require_erasable(source)?;
        }

        let artifact = self
            .seal_file(source, passphrase, params)
            .map_err(|e| e.with_context(format!("failed to encrypt {}", source.display())))?;
        info!(
            source = %source.display(),
            artifact = %artifact.display(),
            version = params.version,
            "encrypted file"
        );

        if delete_source_after {
            erase::wipe_and_remove(source).map_err(|e| {
                warn!(source = %source.display(), "artifact written but source removal failed");
                e.with_context(format!(
                    "encrypted to {} but failed to remove {}",
                    artifact.display(),
                    source.display()
                ))
            })?;
            info!(source = %source.display(), "wiped and removed source");
        }

        Ok(artifact)
    }

    fn seal_file(
        &self,
        source: &Path,
        passphrase: &[u8],
        params: &AlgorithmParams,
    ) -> Result<PathBuf> {
        let file = File::open(source)
            .map_err(|e| LockboxError::from_io(format!("failed to open {}", source.display()), e))?;
        let mut lock = RwLock::new(file);
        let mut guard = lock
            .try_write()
            .map_err(|e| LockboxError::from_io(format!("{} is in use", source.display()), e))?;

        let mut salt = vec![0u8; (params.salt_size_bits / 8) as usize];
        OsRng.fill_bytes(&mut salt);
        let mut iv = vec![0u8; (params.block_size_bits / 8) as usize];
        OsRng.fill_bytes(&mut iv);

        let key = kdf::derive_key(passphrase, &salt, params.key_size_bits, &params.kdf)?;

        // The digest goes into the header, which precedes the ciphertext, so
        // it takes a pass of its own. The second pass re-hashes to make sure
        // the file did not change in between.
        let original_hash = hash_stream(&mut *guard, params.hash)?;
        guard
            .seek(SeekFrom::Start(0))
            .map_err(|e| LockboxError::from_io(format!("failed to rewind {}", source.display()), e))?;

        let header = ArtifactHeader::for_params(params, salt, iv, original_hash);
        let header_line = header::encode(&header)?;

        let mut staged = create_staging_file(naming::parent_dir(source))?;
        write_staged(&mut staged, &unsealed_header(&header_line))?;

        let mut encryptor = cipher::encryptor(params.cipher, &key, &header.iv)?;
        drop(key);
        let mut rehash = IntegrityHasher::new(params.hash);
        let mut buf = Zeroizing::new(vec![0u8; IO_BUF_LEN]);
        let mut out = Vec::with_capacity(IO_BUF_LEN + 64);
        loop {
            let n = read_some(&mut *guard, &mut buf).map_err(|e| {
                LockboxError::from_io(format!("failed to read {}", source.display()), e)
            })?;
            if n == 0 {
                break;
            }
            rehash.update(&buf[..n]);
            encryptor.update(&buf[..n], &mut out)?;
            write_staged(&mut staged, &out)?;
            out.clear();
        }
        encryptor.finish(&mut out)?;
        write_staged(&mut staged, &out)?;

        if !constant_time_eq(rehash.finalize_hex().as_bytes(), header.original_hash.as_bytes()) {
            return Err(LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::ResourceBusy,
                format!("{} changed while it was being encrypted", source.display()),
            ));
        }

        seal_header(&mut staged)?;
        sync_staged(&staged)?;
        let artifact = publish(staged, || {
            naming::encrypted_destination(source, &self.extension)
        })?;
        drop(guard);
        Ok(artifact)
    }

    /// Decrypt `artifact` and return the path of the verified plaintext.
    ///
    /// The plaintext is written next to the artifact, named after it with
    /// the extension removed (numbered on collision). Nothing is published
    /// unless the digest in the header matches.
    pub fn decrypt(&self, artifact: &Path, passphrase: &[u8]) -> Result<PathBuf> {
        let plain = self
            .open_file(artifact, passphrase)
            .map_err(|e| e.with_context(format!("failed to decrypt {}", artifact.display())))?;
        info!(
            artifact = %artifact.display(),
            plaintext = %plain.display(),
            "decrypted file"
        );
        Ok(plain)
    }

    fn open_file(&self, artifact: &Path, passphrase: &[u8]) -> Result<PathBuf> {
        require_regular_file(artifact)?;
        let file = File::open(artifact).map_err(|e| {
            LockboxError::from_io(format!("failed to open {}", artifact.display()), e)
        })?;
        let lock = RwLock::new(file);
        let guard = lock
            .try_read()
            .map_err(|e| LockboxError::from_io(format!("{} is in use", artifact.display()), e))?;
        let mut reader = BufReader::with_capacity(IO_BUF_LEN, &*guard);

        let header = header::decode(&mut reader)?;
        let params = registry::resolve(&header.format_version)?;
        if !header.matches_params(params) {
            return Err(LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedArtifact,
                format!(
                    "header algorithms do not match format version {}",
                    header.format_version
                ),
            ));
        }
        debug!(
            artifact = %artifact.display(),
            version = params.version,
            cipher = %header.cipher_algorithm,
            "parsed artifact header"
        );

        let key = kdf::derive_key(passphrase, &header.salt, header.key_size_bits, &params.kdf)?;
        let mut decryptor = cipher::decryptor(header.cipher_algorithm, &key, &header.iv)?;
        drop(key);

        let mut staged = create_staging_file(naming::parent_dir(artifact))?;
        let mut hasher = IntegrityHasher::new(header.hash_algorithm);
        let mut buf = vec![0u8; IO_BUF_LEN];
        let mut out = Zeroizing::new(Vec::with_capacity(IO_BUF_LEN + 64));
        loop {
            let n = read_some(&mut reader, &mut buf).map_err(|e| {
                LockboxError::from_io(format!("failed to read {}", artifact.display()), e)
            })?;
            if n == 0 {
                break;
            }
            decryptor.update(&buf[..n], &mut out)?;
            hasher.update(&out);
            write_staged(&mut staged, &out)?;
            out.zeroize();
        }
        decryptor.finish(&mut out)?;
        hasher.update(&out);
        write_staged(&mut staged, &out)?;
        out.zeroize();

        let digest = hasher.finalize_hex();
        if !constant_time_eq(digest.as_bytes(), header.original_hash.as_bytes()) {
            return Err(LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::IntegrityCheckFailed,
                "corrupt input, tampered-with data, or bad passphrase",
            ));
        }

        sync_staged(&staged)?;
        drop(reader);
        drop(guard);
        publish(staged, || {
            naming::decrypted_destination(artifact, &self.extension)
        })
    }

    /// Parse and return the header of `artifact` without decrypting.
    pub fn inspect(&self, artifact: &Path) -> Result<ArtifactHeader> {
        require_regular_file(artifact)?;
        let file = File::open(artifact).map_err(|e| {
            LockboxError::from_io(format!("failed to open {}", artifact.display()), e)
        })?;
        let lock = RwLock::new(file);
        let guard = lock
            .try_read()
            .map_err(|e| LockboxError::from_io(format!("{} is in use", artifact.display()), e))?;
        header::decode(&mut BufReader::new(&*guard))
    }
}

/// True if `path` starts with a structurally valid artifact header.
///
/// Never fails: missing, unreadable, empty and plain files are all `false`.
/// A header declaring an unknown format version still counts. Staging files
/// left behind by an interrupted encrypt do not, since the magic is only
/// written once the ciphertext is complete.
pub fn is_encrypted_artifact(path: &Path) -> bool {
    let is_file = fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return false;
    }
    match File::open(path) {
        Ok(file) => match header::decode(&mut BufReader::new(file)) {
            Ok(_) => true,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "not a lockbox artifact");
                false
            }
        },
        Err(_) => false,
    }
}

fn require_regular_file(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(LockboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::NullInput,
            "no file given",
        ));
    }
    let meta = fs::metadata(path)
        .map_err(|e| LockboxError::from_io(format!("failed to read from {}", path.display()), e))?;
    if !meta.is_file() {
        return Err(LockboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidTarget,
            format!("{} is not a regular file", path.display()),
        ));
    }
    Ok(())
}

/// `wipe` only accepts a plain file; check before anything is written.
fn require_erasable(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| LockboxError::from_io(format!("failed to stat {}", path.display()), e))?;
    if !meta.is_file() {
        return Err(LockboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidTarget,
            format!(
                "{} is not a regular file and cannot be wiped after encryption",
                path.display()
            ),
        ));
    }
    Ok(())
}

fn read_some<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn hash_stream<R: Read + ?Sized>(reader: &mut R, algorithm: HashAlgorithm) -> Result<String> {
    let mut hasher = IntegrityHasher::new(algorithm);
    let mut buf = Zeroizing::new(vec![0u8; IO_BUF_LEN]);
    loop {
        let n = read_some(reader, &mut buf)
            .map_err(|e| LockboxError::from_io("failed to read source", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

fn create_staging_file(dir: &Path) -> Result<NamedTempFile> {
    let staged = tempfile::Builder::new()
        .prefix(".lockbox-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to create tempfile in {}", dir.display()),
                e,
            )
        })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = staged
            .as_file()
            .metadata()
            .map_err(|e| {
                LockboxError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to get tempfile metadata",
                    e,
                )
            })?
            .permissions();
        perms.set_mode(0o600);
        staged.as_file().set_permissions(perms).map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to set tempfile permissions",
                e,
            )
        })?;
    }

    Ok(staged)
}

/// The header line with its magic blanked out. [`seal_header`] puts the
/// magic back once everything after it is written.
fn unsealed_header(line: &[u8]) -> Vec<u8> {
    let mut blank = line.to_vec();
    blank[..header::MAGIC.len()].fill(0);
    blank
}

fn seal_header(staged: &mut NamedTempFile) -> Result<()> {
    staged
        .seek(SeekFrom::Start(0))
        .and_then(|_| staged.write_all(header::MAGIC.as_bytes()))
        .map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to write header magic to tempfile",
                e,
            )
        })
}

fn write_staged(staged: &mut NamedTempFile, data: &[u8]) -> Result<()> {
    staged.write_all(data).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to write to tempfile",
            e,
        )
    })
}

/// Flush and fsync() such that the link later, if it succeeds, will
/// always point to a complete file.
fn sync_staged(staged: &NamedTempFile) -> Result<()> {
    let mut file = staged.as_file();
    file.flush().map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to flush tempfile",
            e,
        )
    })?;
    file.sync_all().map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to sync file prior to rename",
            e,
        )
    })
}

/// Link the staged file under the first free name `destination` yields.
///
/// The name is re-resolved whenever another writer claims it first.
fn publish(
    mut staged: NamedTempFile,
    destination: impl Fn() -> PathBuf,
) -> Result<PathBuf> {
    for _ in 0..MAX_PUBLISH_ATTEMPTS {
        let target = destination();
        match staged.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %target.display(), "destination taken concurrently; resolving a new name");
                staged = e.file;
            }
            Err(e) => {
                return Err(LockboxError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to rename to target file {}", target.display()),
                    e.error,
                ));
            }
        }
    }
    Err(LockboxError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::ResourceBusy,
        "could not claim a free output name",
    ))
}
