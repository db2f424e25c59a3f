//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! CLI for poking at a lakestore-managed bucket prefix.
//!
//! Examples:
//! ```bash
//! lake-cli ls      s3://bucket/prefix/
//! lake-cli get     s3://bucket/prefix/ key.bin -o local.bin
//! lake-cli put     s3://bucket/prefix/ key.bin local.bin
//! lake-cli rm      s3://bucket/prefix/ key.bin
//! lake-cli stat    s3://bucket/prefix/ key.bin
//! lake-cli presign s3://bucket/prefix/ key.bin
//! lake-cli clear   s3://bucket/prefix/ --prefix tmp/
//! ```
//!
//! Credentials come from the usual AWS environment / profile chain; pass
//! `--profile` to pick a shared-config profile.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use lakestore::S3ProviderBuilder;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(
        short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Shared-config profile to resolve credentials from.
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the keys under the root prefix.
    Ls {
        /// Root locator, e.g. s3://bucket/prefix/
        root: String,
        /// Print the object count instead of the keys.
        #[arg(short = 'c', long)]
        count: bool,
    },

    /// Download one object.
    Get {
        root: String,
        /// Key relative to the root prefix.
        key: String,
        /// Write to this file instead of stdout.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Upload one object from a local file.
    Put {
        root: String,
        key: String,
        file: PathBuf,
    },

    /// Delete one object.
    Rm { root: String, key: String },

    /// Print the size of one object.
    Stat { root: String, key: String },

    /// Print a time-limited download URL for one object.
    Presign { root: String, key: String },

    /// Delete every object under the root prefix (or a sub-prefix of it).
    Clear {
        root: String,
        /// Restrict the sweep to keys under this sub-prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
}

fn build_provider(root: &str, profile: &Option<String>) -> Result<lakestore::S3Provider> {
    let mut builder = S3ProviderBuilder::new(root);
    if let Some(profile) = profile {
        builder = builder.profile(profile.clone());
    }
    builder.build().with_context(|| format!("cannot open {root}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.cmd {
        Command::Ls { root, count } => {
            let store = build_provider(&root, &cli.profile)?;
            if count {
                println!("{}", store.len()?);
            } else {
                for key in store.keys()? {
                    println!("{}", key?);
                }
            }
        }
        Command::Get { root, key, output } => {
            let store = build_provider(&root, &cli.profile)?;
            let bytes = store.get(&key)?;
            match output {
                Some(path) => std::fs::write(&path, &bytes)
                    .with_context(|| format!("cannot write {}", path.display()))?,
                None => std::io::stdout().write_all(&bytes)?,
            }
        }
        Command::Put { root, key, file } => {
            let store = build_provider(&root, &cli.profile)?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let n = bytes.len();
            store.set(&key, bytes)?;
            println!("uploaded {key} ({n} bytes)");
        }
        Command::Rm { root, key } => {
            let store = build_provider(&root, &cli.profile)?;
            store.del(&key)?;
        }
        Command::Stat { root, key } => {
            let store = build_provider(&root, &cli.profile)?;
            println!("{}", store.object_size(&key)?);
        }
        Command::Presign { root, key } => {
            let store = build_provider(&root, &cli.profile)?;
            println!("{}", store.presigned_url(&key, false)?);
        }
        Command::Clear { root, prefix } => {
            let store = build_provider(&root, &cli.profile)?;
            store.clear(prefix.as_deref())?;
        }
    }

    Ok(())
}
