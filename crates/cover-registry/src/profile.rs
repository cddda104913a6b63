//! Go-style cover profiles: parsing, merging and file filtering.
//!
//! ```text
//! mode: count
//! example.com/app/main.go:10.13,12.2 1 4
//! ```
//!
//! Each block line is `file:startLine.startCol,endLine.endCol statements count`.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

use crate::error::{RegistryError, Result};

/// Counter mode declared on the first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Set,
    Count,
    Atomic,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Set => "set",
            Mode::Count => "count",
            Mode::Atomic => "atomic",
        }
    }

    fn combine(&self, a: u64, b: u64) -> u64 {
        match self {
            Mode::Set => a.max(b).min(1),
            Mode::Count | Mode::Atomic => a.saturating_add(b),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set" => Ok(Mode::Set),
            "count" => Ok(Mode::Count),
            "atomic" => Ok(Mode::Atomic),
            other => Err(RegistryError::Profile(format!("unknown mode: {other}"))),
        }
    }
}

/// Identity of a block. Ordering sorts by file, then position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub file: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub statements: u32,
}

/// A parsed profile with blocks keyed for merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub mode: Mode,
    pub blocks: BTreeMap<BlockKey, u64>,
}

impl Profile {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            blocks: BTreeMap::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        let mode = match lines.next() {
            Some((_, first)) => first
                .trim()
                .strip_prefix("mode: ")
                .ok_or_else(|| RegistryError::Profile("missing mode line".to_string()))?
                .trim()
                .parse()?,
            None => return Err(RegistryError::Profile("empty profile".to_string())),
        };

        let mut profile = Profile::new(mode);
        for (idx, line) in lines {
            let (key, count) = parse_block(line.trim())
                .ok_or_else(|| RegistryError::Profile(format!("line {}: {line:?}", idx + 1)))?;
            let entry = profile.blocks.entry(key).or_insert(0);
            *entry = mode.combine(*entry, count);
        }
        Ok(profile)
    }

    /// Fold `other` into `self`. Both must declare the same mode.
    pub fn merge(&mut self, other: Profile) -> Result<()> {
        if self.mode != other.mode {
            return Err(RegistryError::Profile(format!(
                "cannot merge mode {} into mode {}",
                other.mode.as_str(),
                self.mode.as_str()
            )));
        }
        for (key, count) in other.blocks {
            let entry = self.blocks.entry(key).or_insert(0);
            *entry = self.mode.combine(*entry, count);
        }
        Ok(())
    }

    /// Keep files matching any `keep` pattern (all when empty), then drop
    /// files matching any `skip` pattern.
    pub fn filter_files(&mut self, keep: &[Regex], skip: &[Regex]) {
        self.blocks.retain(|key, _| {
            let kept = keep.is_empty() || keep.iter().any(|re| re.is_match(&key.file));
            kept && !skip.iter().any(|re| re.is_match(&key.file))
        });
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode: {}", self.mode.as_str())?;
        for (k, count) in &self.blocks {
            writeln!(
                f,
                "{}:{}.{},{}.{} {} {}",
                k.file, k.start_line, k.start_col, k.end_line, k.end_col, k.statements, count
            )?;
        }
        Ok(())
    }
}

fn parse_block(line: &str) -> Option<(BlockKey, u64)> {
    let mut parts = line.rsplitn(3, ' ');
    let count = parts.next()?.parse().ok()?;
    let statements = parts.next()?.parse().ok()?;
    let (file, range) = parts.next()?.rsplit_once(':')?;
    let (start, end) = range.split_once(',')?;
    let (start_line, start_col) = parse_pos(start)?;
    let (end_line, end_col) = parse_pos(end)?;

    Some((
        BlockKey {
            file: file.to_string(),
            start_line,
            start_col,
            end_line,
            end_col,
            statements,
        },
        count,
    ))
}

fn parse_pos(pos: &str) -> Option<(u32, u32)> {
    let (line, col) = pos.split_once('.')?;
    Some((line.parse().ok()?, col.parse().ok()?))
}

/// Compile a list of user supplied file patterns.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(p).map_err(RegistryError::from))
        .collect()
}
