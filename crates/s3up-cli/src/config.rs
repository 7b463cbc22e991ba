//! Upload settings and argument parsing helpers

use crate::error::CliError;
use s3up_client::{ChunkPolicy, PutOptions};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Default canned ACL for new objects
pub const DEFAULT_ACL: &str = "private";

/// Default number of extra attempts for failed parts
pub const DEFAULT_PART_RETRIES: u32 = 2;

/// A `bucket[/prefix]` destination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub bucket: String,
    pub prefix: Option<String>,
}

impl Target {
    /// Object key for a path relative to the upload root
    pub fn key_for(&self, relative: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, relative),
            None => relative.to_string(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

impl FromStr for Target {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bucket, prefix) = match s.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
            None => (s, ""),
        };
        if bucket.is_empty() {
            return Err(CliError::InvalidTarget(s.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}/{}", self.bucket, prefix),
            None => f.write_str(&self.bucket),
        }
    }
}

/// Parse a byte count with an optional unit.
///
/// `k`, `m`, `g`, `t` and their `KiB` forms are powers of 1024; `KB`, `MB`,
/// `GB` and `TB` are powers of 1000. Units are case-insensitive.
pub fn parse_size(input: &str) -> Result<u64, CliError> {
    let invalid = || CliError::InvalidSize(input.to_string());
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "t" | "tib" => 1 << 40,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        _ => return Err(invalid()),
    };
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Everything that shapes how one batch is uploaded
#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub policy: ChunkPolicy,
    /// Parts in flight per file; `None` starts every part at once
    pub concurrency: Option<NonZeroUsize>,
    /// Headers applied to every object; content type is filled per file
    pub put: PutOptions,
    pub recursive: bool,
    pub overwrite: bool,
    pub part_retries: u32,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            policy: ChunkPolicy::default(),
            concurrency: None,
            put: PutOptions::new().with_acl(DEFAULT_ACL),
            recursive: false,
            overwrite: false,
            part_retries: DEFAULT_PART_RETRIES,
        }
    }
}
