//! Lockbox CLI - Passphrase-based file encryption
//!
//! Encrypts a file into `<file>.lockbox` next to it, and decrypts such
//! artifacts back into plaintext files. Outputs never overwrite existing
//! files; a numbered name is chosen instead.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lockbox::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};
use lockbox::{ArtifactHeader, Config, Engine, LockboxError, is_encrypted_artifact};

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(version)]
#[command(about = "Passphrase-based file encryption.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// JSON config file; must exist (defaults to $LOCKBOX_CONFIG if set)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file into an artifact next to it
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Wipe and delete the input once the artifact is written
        #[arg(long)]
        delete_source: bool,

        /// Keep the input even if the config asks for deletion
        #[arg(long, conflicts_with = "delete_source")]
        keep_source: bool,

        /// Write an older registered format version
        #[arg(long, hide = true, value_name = "VERSION")]
        format_version: Option<String>,
    },

    /// Decrypt an artifact into a plaintext file next to it
    #[command(alias = "d")]
    Decrypt {
        /// Path to the artifact to be decrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Report whether a file is a lockbox artifact (exit status 1 if not)
    Check {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Print the header of an artifact without decrypting it
    Inspect {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", render_chain(&e));
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but its answer is "no".
fn run(cli: Cli) -> lockbox::Result<bool> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::load_with_env()?,
    };
    let engine = Engine::new(&config);

    match cli.command {
        Commands::Encrypt {
            input,
            delete_source,
            keep_source,
            format_version,
        } => {
            let passphrase = get_passphrase_reader(cli.passphrase_stdin).read_passphrase()?;
            let delete = !keep_source && (delete_source || config.delete_source_after);
            let artifact = match format_version {
                Some(version) => engine.encrypt_with_version(&input, &passphrase, delete, &version)?,
                None => engine.encrypt(&input, &passphrase, delete)?,
            };
            println!("{}", artifact.display());
        }
        Commands::Decrypt { input } => {
            let passphrase = get_passphrase_reader(cli.passphrase_stdin).read_passphrase()?;
            let plain = engine.decrypt(&input, &passphrase)?;
            println!("{}", plain.display());
        }
        Commands::Check { input } => {
            if is_encrypted_artifact(&input) {
                println!("encrypted");
            } else {
                println!("not encrypted");
                return Ok(false);
            }
        }
        Commands::Inspect { input } => {
            let header = engine.inspect(&input)?;
            print_header(&input, &header);
        }
    }
    Ok(true)
}

fn print_header(path: &Path, header: &ArtifactHeader) {
    println!("file:           {}", path.display());
    println!("format version: {}", header.format_version);
    println!("hash:           {}", header.hash_algorithm);
    println!("cipher:         {}", header.cipher_algorithm);
    println!("key size:       {} bits", header.key_size_bits);
    println!("block size:     {} bits", header.block_size_bits);
    println!("salt size:      {} bits", header.salt_size_bits);
    println!("original hash:  {}", header.original_hash);
}

fn render_chain(err: &LockboxError) -> String {
    let mut out = err.message().to_string();
    let mut source: Option<&(dyn StdError + 'static)> = err
        .source_error()
        .map(|s| s as &(dyn StdError + 'static));
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn get_passphrase_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}
