use anyhow::{Context, Result};
use clap::Parser;
use jar_remapper::cli::Cli;
use jar_remapper::input::{self, ClassSource, InputSet};
use jar_remapper::mapping::MappingTable;
use jar_remapper::output::{self, OutputSet};
use jar_remapper::pipeline::Pipeline;
use jar_remapper::report::{self, RunSummary};
use rayon::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let options = cli.remap_options()?;
    let (from, to) = cli.namespaces();

    let mapping_bytes = std::fs::read(&cli.mappings)
        .with_context(|| format!("Failed to read mappings: {}", cli.mappings.display()))?;
    let mapping_text = String::from_utf8_lossy(&mapping_bytes);
    let mappings = MappingTable::parse(&mapping_text)
        .and_then(|table| table.between(from, to, options.ignore_field_desc))
        .with_context(|| format!("Failed to load mappings: {}", cli.mappings.display()))?;

    let InputSet { classes, resources } = input::read_path(&cli.input)?;
    let classpath = read_classpath(&cli.classpath)?;
    tracing::info!(
        classes = classes.len(),
        resources = resources.len(),
        classpath = classpath.len(),
        "inputs read"
    );

    let mut pipeline = Pipeline::new(options.clone());
    let run = pipeline.run(classes, classpath, mappings)?;
    let class_count = run.classes.len();
    let resource_count = resources.len();

    let mut entries = OutputSet::default();
    entries.add_classes(run.classes)?;
    entries.add_resources(resources, options.non_class_copy_mode, &run.resolution)?;
    output::sink_for(&cli.output).write_entries(&entries)?;

    let summary = RunSummary {
        input: cli.input.to_string_lossy().to_string(),
        output: cli.output.to_string_lossy().to_string(),
        mappings: cli.mappings.to_string_lossy().to_string(),
        mappings_digest: report::hash_bytes(&mapping_bytes),
        from: from.to_string(),
        to: to.to_string(),
        classes: class_count,
        resources: resource_count,
        entries: entries.len(),
        digest: report::digest_entries(&entries),
        stats: run.stats,
        warnings: run.warnings,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads classpath entries in parallel; classes keep the command-line order
/// so the first entry defining a class wins.
fn read_classpath(paths: &[PathBuf]) -> Result<Vec<ClassSource>> {
    let sets: Vec<InputSet> = paths
        .par_iter()
        .map(|path| {
            input::read_path(path)
                .with_context(|| format!("Failed to read classpath entry: {}", path.display()))
        })
        .collect::<Result<_>>()?;
    Ok(sets.into_iter().flat_map(|set| set.classes).collect())
}
