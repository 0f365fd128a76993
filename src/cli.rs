use anyhow::Result;
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;

use crate::config::{self, BridgePropagation, NonClassCopyMode, RemapOptions, Threads};

#[derive(Debug, Clone, Parser)]
#[command(name = "jar-remapper")]
#[command(about = "Remap class, field, method and local variable names in JVM bytecode")]
pub struct Cli {
    /// Jar, directory or class file to remap.
    pub input: PathBuf,

    /// Output jar (`.jar`/`.zip`) or directory.
    pub output: PathBuf,

    /// Tiny v1 mapping file.
    pub mappings: PathBuf,

    /// Namespace the input is named in.
    pub from: String,

    /// Namespace to remap to.
    pub to: String,

    /// Jars, directories or class files consulted for the hierarchy but not remapped.
    pub classpath: Vec<PathBuf>,

    /// Swap the source and target namespaces.
    #[arg(short = 'R', long)]
    pub reverse: bool,

    /// Look up field mappings by owner and name only.
    #[arg(short = 'i', long)]
    pub ignore_field_desc: bool,

    /// File listing `name(desc)` methods whose renames always propagate.
    #[arg(short = 'f', long, value_name = "FILE")]
    pub force_propagation: Option<PathBuf>,

    /// Propagate renames of private methods too.
    #[arg(short = 'p', long)]
    pub propagate_private: bool,

    /// How renames flow between bridge methods and their targets.
    #[arg(short = 'b', long, value_enum, default_value_t = BridgePropagation::Disabled)]
    pub propagate_bridges: BridgePropagation,

    /// Drop StackMapTable attributes.
    #[arg(long)]
    pub remove_frames: bool,

    /// Keep original names where renames collide instead of failing.
    #[arg(short = 'I', long)]
    pub ignore_conflicts: bool,

    /// Report package-private access broken by remapping.
    #[arg(short = 'C', long)]
    pub check_package_access: bool,

    /// Make package-private members public where remapping breaks access.
    #[arg(short = 'F', long)]
    pub fix_package_access: bool,

    /// Substitute public stubs for supertypes found nowhere.
    #[arg(short = 'm', long)]
    pub resolve_missing: bool,

    /// Rewrite SourceFile attributes after the remapped outermost class.
    #[arg(short = 'r', long)]
    pub rebuild_source_filenames: bool,

    #[arg(short = 'l', long)]
    pub skip_local_variable_mapping: bool,

    /// Replace local variable names that are not valid identifiers.
    #[arg(short = 'L', long)]
    pub rename_invalid_locals: bool,

    /// Also treat local variable names matching this pattern as invalid.
    #[arg(long, value_name = "REGEX")]
    pub invalid_lv_name_pattern: Option<Regex>,

    /// Reuse a valid name from the same local variable slot before synthesizing one.
    #[arg(long)]
    pub infer_name_from_same_lv_index: bool,

    #[arg(short = 'M', long, value_enum, default_value_t = NonClassCopyMode::Fixmeta)]
    pub non_class_copy_mode: NonClassCopyMode,

    /// Worker threads, or `auto` for one per core.
    #[arg(short = 't', long, value_name = "N", default_value_t = Threads::Auto)]
    pub threads: Threads,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,
}

impl Cli {
    /// The namespace pair to project the mappings onto.
    pub fn namespaces(&self) -> (&str, &str) {
        if self.reverse {
            (&self.to, &self.from)
        } else {
            (&self.from, &self.to)
        }
    }

    pub fn remap_options(&self) -> Result<RemapOptions> {
        let force_propagation = match &self.force_propagation {
            Some(path) => config::load_force_propagation(path)?,
            None => Default::default(),
        };
        Ok(RemapOptions {
            remove_frames: self.remove_frames,
            ignore_conflicts: self.ignore_conflicts,
            resolve_missing: self.resolve_missing,
            check_package_access: self.check_package_access,
            fix_package_access: self.fix_package_access,
            rebuild_source_filenames: self.rebuild_source_filenames,
            skip_local_variable_mapping: self.skip_local_variable_mapping,
            rename_invalid_locals: self.rename_invalid_locals,
            invalid_lv_name_pattern: self.invalid_lv_name_pattern.clone(),
            infer_name_from_same_lv_index: self.infer_name_from_same_lv_index,
            ignore_field_desc: self.ignore_field_desc,
            propagate_private: self.propagate_private,
            propagate_bridges: self.propagate_bridges,
            force_propagation,
            threads: self.threads,
            non_class_copy_mode: self.non_class_copy_mode,
        })
    }
}
