//! Text format of the bookkeeping and timestamp files
//!
//! ```text
//! pathcache-bookkeeping 1 <set|map|stamp> <entry-count> <crc32c-hex>
//! <entry>
//! ...
//! ```
//!
//! The checksum covers the entry lines including their trailing newlines.
//! Backslash, newline, carriage return and tab inside a path are escaped so
//! every entry stays on one line; a map entry separates its two paths with a
//! literal tab. A stamp file holds exactly one entry, the decimal
//! timestamp of the entry it sits next to.

use crate::handle::Timestamp;
use crc32c::crc32c;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

const MAGIC: &str = "pathcache-bookkeeping";
const VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Set,
    Map,
    Stamp,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Set => "set",
            Kind::Map => "map",
            Kind::Stamp => "stamp",
        }
    }
}

pub(crate) fn encode_set(set: &BTreeSet<PathBuf>) -> String {
    let lines = set.iter().filter_map(|path| encode_path(path)).collect();
    encode(Kind::Set, lines)
}

pub(crate) fn encode_map(map: &BTreeMap<PathBuf, PathBuf>) -> String {
    let lines = map
        .iter()
        .filter_map(|(target, alternate)| {
            Some(format!(
                "{}\t{}",
                encode_path(target)?,
                encode_path(alternate)?
            ))
        })
        .collect();
    encode(Kind::Map, lines)
}

pub(crate) fn decode_set(text: &str) -> Result<BTreeSet<PathBuf>, String> {
    decode(Kind::Set, text)?
        .into_iter()
        .map(|line| unescape(&line).map(PathBuf::from))
        .collect()
}

pub(crate) fn decode_map(text: &str) -> Result<BTreeMap<PathBuf, PathBuf>, String> {
    decode(Kind::Map, text)?
        .into_iter()
        .map(|line| {
            let (target, alternate) = line
                .split_once('\t')
                .ok_or_else(|| format!("map entry without separator: {line:?}"))?;
            Ok((
                PathBuf::from(unescape(target)?),
                PathBuf::from(unescape(alternate)?),
            ))
        })
        .collect()
}

pub(crate) fn encode_timestamp(timestamp: Timestamp) -> String {
    encode(Kind::Stamp, vec![timestamp.to_string()])
}

pub(crate) fn decode_timestamp(text: &str) -> Result<Timestamp, String> {
    match decode(Kind::Stamp, text)?.as_slice() {
        [value] => value
            .parse()
            .map_err(|_| format!("invalid timestamp {value:?}")),
        lines => Err(format!("expected one timestamp, found {}", lines.len())),
    }
}

fn encode(kind: Kind, lines: Vec<String>) -> String {
    let mut body = String::new();
    for line in &lines {
        body.push_str(line);
        body.push('\n');
    }
    format!(
        "{MAGIC} {VERSION} {} {} {:08x}\n{body}",
        kind.as_str(),
        lines.len(),
        crc32c(body.as_bytes())
    )
}

fn decode(kind: Kind, text: &str) -> Result<Vec<String>, String> {
    let (header, body) = text
        .split_once('\n')
        .ok_or_else(|| "missing header line".to_string())?;

    let fields: Vec<&str> = header.split(' ').collect();
    let [magic, version, found_kind, count, crc] = fields.as_slice() else {
        return Err(format!("malformed header {header:?}"));
    };

    if *magic != MAGIC {
        return Err(format!("unexpected magic {magic:?}"));
    }
    if version.parse::<u32>().ok() != Some(VERSION) {
        return Err(format!("unsupported version {version:?}"));
    }
    if *found_kind != kind.as_str() {
        return Err(format!("expected a {} file, found {found_kind:?}", kind.as_str()));
    }

    let count: usize = count
        .parse()
        .map_err(|_| format!("invalid entry count {count:?}"))?;
    let crc = u32::from_str_radix(crc, 16).map_err(|_| format!("invalid checksum {crc:?}"))?;

    let actual = crc32c(body.as_bytes());
    if actual != crc {
        return Err(format!("checksum mismatch: header {crc:08x}, body {actual:08x}"));
    }

    if !body.is_empty() && !body.ends_with('\n') {
        return Err("truncated final entry".to_string());
    }

    let lines: Vec<String> = body.lines().map(str::to_string).collect();
    if lines.len() != count {
        return Err(format!("header announces {count} entries, found {}", lines.len()));
    }

    Ok(lines)
}

fn encode_path(path: &std::path::Path) -> Option<String> {
    match path.to_str() {
        Some(s) => Some(escape(s)),
        None => {
            tracing::warn!(path = %path.display(), "skipping non UTF-8 path in bookkeeping");
            None
        }
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(escaped: &str) -> Result<String, String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            other => return Err(format!("invalid escape sequence \\{other:?} in {escaped:?}")),
        }
    }
    Ok(out)
}
