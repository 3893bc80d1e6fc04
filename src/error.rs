use std::error::Error as StdError;
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A required argument (file path) was missing.
    NullInput,
    /// The target path refers to a directory or other non-regular file.
    InvalidTarget,
    /// The target path does not exist.
    NotFound,
    /// The target is locked or open elsewhere in a conflicting mode.
    ResourceBusy,
    /// The artifact header is absent, truncated, or of the wrong shape.
    MalformedArtifact,
    /// The artifact declares a format version this build does not know.
    UnsupportedVersion,
    /// The decrypted plaintext did not verify. Covers a wrong passphrase
    /// as well as tampering or corruption; the two are indistinguishable.
    IntegrityCheckFailed,
    /// scrypt rejected its parameters or output length.
    KeyDerivation,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Configuration could not be loaded or failed validation.
    Config,
    /// Unexpected state reached within lockbox logic.
    InternalInvariant,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct LockboxError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl LockboxError {
    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Translates an I/O failure on `what` into the matching error kind.
    ///
    /// Lock contention surfaces as `WouldBlock` on every platform fd-lock
    /// supports, so it maps to `ResourceBusy`.
    pub fn from_io(what: impl Into<String>, err: io::Error) -> Self {
        let (category, kind) = match err.kind() {
            io::ErrorKind::NotFound => (ErrorCategory::User, ErrorKind::NotFound),
            io::ErrorKind::WouldBlock => (ErrorCategory::User, ErrorKind::ResourceBusy),
            io::ErrorKind::IsADirectory => (ErrorCategory::User, ErrorKind::InvalidTarget),
            io::ErrorKind::PermissionDenied => (ErrorCategory::User, ErrorKind::Io),
            _ => (ErrorCategory::Internal, ErrorKind::Io),
        };
        Self::with_kind_and_source(category, kind, what, err)
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LockboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind_and_category() {
        let err = LockboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::IntegrityCheckFailed,
            "digest mismatch",
        )
        .with_context("failed to decrypt");

        assert_eq!(err.kind, Some(ErrorKind::IntegrityCheckFailed));
        assert_eq!(err.category, ErrorCategory::User);
        assert_eq!(err.message(), "failed to decrypt");
        assert_eq!(
            err.source_error().map(|s| s.to_string()),
            Some("digest mismatch".to_string())
        );
    }

    #[test]
    fn test_from_io_not_found() {
        let err = LockboxError::from_io("open", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.kind, Some(ErrorKind::NotFound));
        assert_eq!(err.category, ErrorCategory::User);
    }

    #[test]
    fn test_from_io_would_block_is_busy() {
        let err = LockboxError::from_io("lock", io::Error::from(io::ErrorKind::WouldBlock));
        assert_eq!(err.kind, Some(ErrorKind::ResourceBusy));
    }

    #[test]
    fn test_from_io_other_is_internal() {
        let err = LockboxError::from_io("write", io::Error::other("disk on fire"));
        assert_eq!(err.kind, Some(ErrorKind::Io));
        assert_eq!(err.category, ErrorCategory::Internal);
    }
}
