use clap::Subcommand;
use eyre::WrapErr;
use pathcache::{CacheService, CancellationToken, ContentBackend, Timestamp};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

/// How a command finished, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The key has no content
    Missing,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store content under a key
    Put {
        key: String,
        /// Read content from this file instead of stdin
        file: Option<PathBuf>,
        /// Append to existing content instead of replacing it
        #[arg(long)]
        append: bool,
        /// Modification time in milliseconds since the Unix epoch
        #[arg(long, value_name = "MILLIS")]
        timestamp: Option<Timestamp>,
    },
    /// Write content to stdout
    Get { key: String },
    /// Check whether a key has content
    Has { key: String },
    /// Print the modification time of a key
    Stat { key: String },
    /// Set the modification time of a key (now by default)
    Touch {
        key: String,
        #[arg(long, value_name = "MILLIS")]
        timestamp: Option<Timestamp>,
    },
    /// Remove a key
    Rm {
        key: String,
        /// Also remove every key nested below it
        #[arg(short, long)]
        recursive: bool,
    },
    /// Retry deletions that failed earlier
    Reclaim,
}

impl Commands {
    pub fn execute<B: ContentBackend>(
        self,
        cache: &CacheService<B>,
        out: &mut dyn Write,
    ) -> eyre::Result<Outcome> {
        match self {
            Commands::Put {
                key,
                file,
                append,
                timestamp,
            } => {
                let token = CancellationToken::new();
                match file {
                    Some(path) => {
                        let source = File::open(&path)
                            .wrap_err_with(|| format!("cannot open '{}'", path.display()))?;
                        store(cache, &key, source, append, timestamp, &token)?;
                    }
                    None => store(cache, &key, io::stdin().lock(), append, timestamp, &token)?,
                }
                tracing::info!(key = %key, append, "stored content");
                Ok(Outcome::Done)
            }
            Commands::Get { key } => match cache.get_content(&key)? {
                Some(mut reader) => {
                    io::copy(&mut reader, out).wrap_err("cannot write content to stdout")?;
                    out.flush()?;
                    Ok(Outcome::Done)
                }
                None => {
                    tracing::warn!(key = %key, "no content");
                    Ok(Outcome::Missing)
                }
            },
            Commands::Has { key } => {
                let exists = cache.has_content(&key)?;
                writeln!(out, "{exists}")?;
                Ok(if exists { Outcome::Done } else { Outcome::Missing })
            }
            Commands::Stat { key } => match cache.get_content_timestamp(&key)? {
                Some(timestamp) => {
                    writeln!(out, "{timestamp}")?;
                    Ok(Outcome::Done)
                }
                None => Ok(Outcome::Missing),
            },
            Commands::Touch { key, timestamp } => {
                if !cache.has_content(&key)? {
                    return Ok(Outcome::Missing);
                }
                let timestamp = timestamp.unwrap_or_else(pathcache::now_millis);
                cache.set_content_timestamp(&key, timestamp)?;
                Ok(Outcome::Done)
            }
            Commands::Rm { key, recursive } => {
                if recursive {
                    cache.remove_content_recursive(&key, &CancellationToken::new())?;
                } else {
                    cache.remove_content(&key)?;
                }
                Ok(Outcome::Done)
            }
            Commands::Reclaim => {
                let report = cache.reclaim();
                writeln!(
                    out,
                    "reclaimed {} file(s), promoted {} alternate(s), {} still pending",
                    report.reclaimed, report.alternates_promoted, report.still_pending
                )?;
                Ok(Outcome::Done)
            }
        }
    }
}

fn store<B: ContentBackend>(
    cache: &CacheService<B>,
    key: &str,
    source: impl io::Read,
    append: bool,
    timestamp: Option<Timestamp>,
    token: &CancellationToken,
) -> eyre::Result<()> {
    match timestamp {
        Some(timestamp) => {
            cache.add_content_with_timestamp(key, source, append, timestamp, token)?
        }
        None => cache.add_content(key, source, append, token)?,
    }
    Ok(())
}
