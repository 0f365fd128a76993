//! Options consumed by the remapping engine.
//!
//! `RemapOptions` is a plain struct; the CLI layer fills it in and the engine
//! only reads it. Everything defaults to off, with bridges not propagated and
//! one worker per available core.

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

use crate::error::RemapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgePropagation {
    /// Bridges keep a group of their own.
    #[default]
    Disabled,
    /// Bridges always share their target's name.
    Enabled,
    /// Bridges share their target's name when both override the same
    /// erased supertype method.
    Compatible,
}

/// What happens to non-class entries when writing the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NonClassCopyMode {
    Unchanged,
    /// Drop signature files and per-entry manifest digests.
    #[default]
    Fixmeta,
    /// Leave out `META-INF/` entirely.
    Skipmeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Threads {
    #[default]
    Auto,
    Count(NonZeroUsize),
}

impl Threads {
    pub fn resolve(self) -> usize {
        match self {
            Threads::Auto => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            Threads::Count(n) => n.get(),
        }
    }
}

impl FromStr for Threads {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Threads::Auto);
        }
        s.parse::<usize>()
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Threads::Count)
            .ok_or_else(|| format!("expected a positive thread count or \"auto\", got {s:?}"))
    }
}

impl fmt::Display for Threads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threads::Auto => f.write_str("auto"),
            Threads::Count(n) => write!(f, "{n}"),
        }
    }
}

/// A method identity whose renames always propagate, whatever its access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForcedMember {
    pub name: String,
    pub desc: String,
}

impl FromStr for ForcedMember {
    type Err = RemapError;

    /// Accepts `name(desc)ret` or `name desc`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (name, desc) = match s.split_once(char::is_whitespace) {
            Some((name, desc)) => (name, desc.trim()),
            None => s
                .find('(')
                .map(|open| (&s[..open], &s[open..]))
                .unwrap_or((s, "")),
        };
        if name.is_empty() || !desc.starts_with('(') {
            return Err(RemapError::InvalidOption(format!(
                "force-propagation entry {s:?} must be a method name followed by its descriptor"
            )));
        }
        Ok(ForcedMember {
            name: name.to_string(),
            desc: desc.to_string(),
        })
    }
}

pub fn parse_force_propagation(
    text: &str,
) -> std::result::Result<BTreeSet<ForcedMember>, RemapError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ForcedMember::from_str)
        .collect()
}

pub fn load_force_propagation(path: &Path) -> Result<BTreeSet<ForcedMember>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read force-propagation file: {}", path.display()))?;
    parse_force_propagation(&text)
        .with_context(|| format!("Failed to parse force-propagation file: {}", path.display()))
}

#[derive(Debug, Clone, Default)]
pub struct RemapOptions {
    pub remove_frames: bool,
    pub ignore_conflicts: bool,
    pub resolve_missing: bool,
    pub check_package_access: bool,
    pub fix_package_access: bool,
    pub rebuild_source_filenames: bool,
    pub skip_local_variable_mapping: bool,
    pub rename_invalid_locals: bool,
    pub invalid_lv_name_pattern: Option<Regex>,
    pub infer_name_from_same_lv_index: bool,
    pub ignore_field_desc: bool,
    pub propagate_private: bool,
    pub propagate_bridges: BridgePropagation,
    pub force_propagation: BTreeSet<ForcedMember>,
    pub threads: Threads,
    pub non_class_copy_mode: NonClassCopyMode,
}

impl RemapOptions {
    pub fn checks_package_access(&self) -> bool {
        self.check_package_access || self.fix_package_access
    }

    pub fn is_forced(&self, name: &str, desc: &str) -> bool {
        !self.force_propagation.is_empty()
            && self.force_propagation.contains(&ForcedMember {
                name: name.to_string(),
                desc: desc.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threads_accept_auto_and_positive_counts() {
        assert_eq!("auto".parse::<Threads>(), Ok(Threads::Auto));
        assert_eq!(
            "4".parse::<Threads>(),
            Ok(Threads::Count(NonZeroUsize::new(4).unwrap()))
        );
        assert!("0".parse::<Threads>().is_err());
        assert!("-2".parse::<Threads>().is_err());
        assert!(Threads::Auto.resolve() >= 1);
    }

    #[test]
    fn force_propagation_accepts_both_notations() -> anyhow::Result<()> {
        let set = parse_force_propagation("# forced\nrun()V\n\naccept (Ljava/lang/Object;)V\n")?;
        let entries: Vec<_> = set.iter().map(|m| (m.name.as_str(), m.desc.as_str())).collect();
        assert_eq!(
            entries,
            vec![("accept", "(Ljava/lang/Object;)V"), ("run", "()V")]
        );
        assert!(parse_force_propagation("field").is_err());
        Ok(())
    }

    #[test]
    fn fix_implies_check() {
        let options = RemapOptions {
            fix_package_access: true,
            ..RemapOptions::default()
        };
        assert!(options.checks_package_access());
        assert!(!RemapOptions::default().checks_package_access());
    }
}
