//! Where the CLI gets passphrases from
//!
//! The engine takes the passphrase as a plain byte slice. Sources here hand
//! it over wrapped in [`Zeroizing`] so the buffer is wiped once the caller
//! is done with it.

use std::io::{self, IsTerminal, Read, Write};

use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};

const PROMPT: &[u8] = b"Passphrase (lockbox): ";

/// A source of passphrase bytes.
pub trait PassphraseReader {
    /// Produce the passphrase. Any byte sequence is valid, including an
    /// empty one.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Takes everything the wrapped reader produces, byte for byte.
///
/// No newline stripping: `printf 'pw' | lockbox --passphrase-stdin ...` and
/// `echo pw | ...` name different passphrases.
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        Ok(data)
    }
}

/// Prompts on stderr and reads a line from the terminal without echo.
#[derive(Default)]
pub struct TerminalPassphraseReader;

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    /// rpassword only deals in UTF-8; use `--passphrase-stdin` for anything
    /// else.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        if !io::stdin().is_terminal() {
            return Err(LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "stdin is not a terminal; pass --passphrase-stdin to read the passphrase from it",
            ));
        }

        let mut stderr = io::stderr();
        stderr
            .write_all(PROMPT)
            .and_then(|_| stderr.flush())
            .map_err(|e| {
                LockboxError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;

        let line = Zeroizing::new(rpassword::read_password().map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?);

        Ok(Zeroizing::new(line.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_keeps_trailing_newline() {
        let data: &[u8] = b"pw\n";
        let mut reader = ReaderPassphraseReader::new(Box::new(data));
        assert_eq!(&*reader.read_passphrase().unwrap(), b"pw\n");
    }

    #[test]
    fn test_reader_empty() {
        let data: &[u8] = b"";
        let mut reader = ReaderPassphraseReader::new(Box::new(data));
        assert!(reader.read_passphrase().unwrap().is_empty());
    }

    #[test]
    fn test_reader_non_utf8() {
        let data: &[u8] = &[0xff, 0xfe, 0x00, 0x01];
        let mut reader = ReaderPassphraseReader::new(Box::new(data));
        assert_eq!(&*reader.read_passphrase().unwrap(), data);
    }

    #[test]
    fn test_reader_failure_is_unavailable() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("pipe closed"))
            }
        }

        let mut reader = ReaderPassphraseReader::new(Box::new(Broken));
        let err = reader.read_passphrase().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
    }

    /// Needs a human at a terminal:
    ///
    /// cargo test test_terminal_reader_interactive -- --ignored --nocapture
    #[test]
    #[ignore]
    fn test_terminal_reader_interactive() {
        let mut reader = TerminalPassphraseReader::new();
        println!("\nPlease enter a test passphrase:");
        let passphrase = reader.read_passphrase().unwrap();
        assert!(!passphrase.is_empty());
    }
}
