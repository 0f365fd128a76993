//! The phase driver.
//!
//! A run moves `Idle → Building → Resolving → Remapping → Finished`, or to
//! `Failed` from whichever phase produced errors. Building and remapping fan
//! out over a rayon pool sized by `RemapOptions::threads`; resolving runs on
//! the calling thread between the two. Each phase drains completely before
//! its errors are looked at, so a failure lists every broken class rather
//! than the first one a worker happened to hit.
//!
//! A `CancelHandle` may be tripped from another thread. It is honoured at the
//! next phase boundary; work already running finishes and is thrown away.

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::applier::{self, OutputClass};
use crate::classfile::ClassFile;
use crate::config::RemapOptions;
use crate::error::{PipelineFailure, RemapError, Warning};
use crate::hierarchy::ClassGraph;
use crate::input::ClassSource;
use crate::mapping::Mappings;
use crate::model::{ClassNode, ClassOrigin};
use crate::registry::ClassRegistry;
use crate::resolve::{self, Resolution};
use crate::rewrite::RewriteSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Building,
    Resolving,
    Remapping,
    Finished,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Building => "building",
            Phase::Resolving => "resolving",
            Phase::Remapping => "remapping",
            Phase::Finished => "finished",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunStats {
    pub input_classes: usize,
    pub classpath_classes: usize,
    pub stub_classes: usize,
    pub renamed_classes: usize,
    pub propagation_groups: usize,
    pub threads: usize,
    pub duration_ms: u64,
}

pub struct RunOutput {
    /// Remapped classes sorted by final name.
    pub classes: Vec<OutputClass>,
    /// The frozen decisions, for remapping anything else that names classes.
    pub resolution: Resolution,
    pub warnings: Vec<Warning>,
    pub stats: RunStats,
}

pub struct Pipeline {
    options: RemapOptions,
    phase: Phase,
    cancel: CancelHandle,
}

impl Pipeline {
    pub fn new(options: RemapOptions) -> Self {
        Self {
            options,
            phase: Phase::Idle,
            cancel: CancelHandle::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Remaps `inputs` against `classpath`. A pipeline runs once; later calls
    /// fail with `InvalidOption`.
    pub fn run(
        &mut self,
        inputs: Vec<ClassSource>,
        classpath: Vec<ClassSource>,
        mappings: Mappings,
    ) -> Result<RunOutput, PipelineFailure> {
        if self.phase != Phase::Idle {
            return Err(PipelineFailure::single(
                self.phase,
                RemapError::InvalidOption(format!("pipeline already {}", self.phase)),
            ));
        }
        let result = self.drive(inputs, classpath, mappings);
        self.phase = if result.is_ok() {
            Phase::Finished
        } else {
            Phase::Failed
        };
        tracing::info!(phase = %self.phase, "pipeline stopped");
        result
    }

    fn enter(&mut self, phase: Phase) -> Result<(), PipelineFailure> {
        if self.cancel.is_cancelled() {
            tracing::info!(before = %phase, "pipeline cancelled");
            return Err(PipelineFailure::single(self.phase, RemapError::Cancelled(phase)));
        }
        tracing::info!(phase = %phase, "entering phase");
        self.phase = phase;
        Ok(())
    }

    fn drive(
        &mut self,
        inputs: Vec<ClassSource>,
        classpath: Vec<ClassSource>,
        mappings: Mappings,
    ) -> Result<RunOutput, PipelineFailure> {
        let start = Instant::now();
        let threads = self.options.threads.resolve();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| {
                PipelineFailure::single(
                    self.phase,
                    RemapError::InvalidOption(format!("cannot start {threads} worker threads: {e}")),
                )
            })?;
        let mut warnings = Vec::new();

        self.enter(Phase::Building)?;
        let registry = ClassRegistry::new(classpath);
        let parsed: Vec<Result<ClassNode, RemapError>> = pool.install(|| {
            inputs
                .par_iter()
                .map(|source| {
                    ClassFile::parse(&source.bytes)
                        .and_then(|class| ClassNode::from_class_file(&class, ClassOrigin::Input))
                        .map_err(|e| RemapError::codec(format!("{} ({})", source.name, source.location), e))
                })
                .collect()
        });

        let mut errors = Vec::new();
        let mut accepted = Vec::with_capacity(inputs.len());
        for (source, node) in inputs.into_iter().zip(parsed) {
            match node {
                Ok(node) => {
                    if registry.insert_if_absent(node).1 {
                        accepted.push(source);
                    } else {
                        let warning = Warning::DuplicateClass {
                            class: source.name.clone(),
                            source: source.location.clone(),
                        };
                        tracing::warn!("{warning}");
                        warnings.push(warning);
                    }
                }
                Err(err) => errors.push(err),
            }
        }
        let input_classes = accepted.len();

        let reachability = registry.load_reachable(&pool);
        errors.extend(reachability.errors);
        if !errors.is_empty() {
            return Err(PipelineFailure {
                phase: Phase::Building,
                errors,
            });
        }

        self.enter(Phase::Resolving)?;
        let missing = registry.settle_missing(&reachability.unresolved, self.options.resolve_missing);
        if !missing.is_empty() {
            return Err(PipelineFailure {
                phase: Phase::Resolving,
                errors: missing,
            });
        }
        let graph = ClassGraph::new(registry.into_nodes());
        let stub_classes = graph
            .classes()
            .iter()
            .filter(|c| c.origin == ClassOrigin::Synthetic)
            .count();
        let (resolution, resolve_warnings) = resolve::resolve(graph, mappings, &self.options)
            .map_err(|errors| PipelineFailure {
                phase: Phase::Resolving,
                errors,
            })?;
        warnings.extend(resolve_warnings);

        self.enter(Phase::Remapping)?;
        let classes = remap_all(&pool, &accepted, &resolution, &RewriteSettings::from(&self.options))?;

        let stats = RunStats {
            input_classes,
            classpath_classes: reachability.loaded,
            stub_classes,
            renamed_classes: resolution.renamed_classes(),
            propagation_groups: resolution.propagation().groups().len(),
            threads,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            classes = classes.len(),
            renamed = stats.renamed_classes,
            duration_ms = stats.duration_ms,
            "remapping finished"
        );
        Ok(RunOutput {
            classes,
            resolution,
            warnings,
            stats,
        })
    }
}

fn remap_all(
    pool: &rayon::ThreadPool,
    sources: &[ClassSource],
    resolution: &Resolution,
    settings: &RewriteSettings,
) -> Result<Vec<OutputClass>, PipelineFailure> {
    let results: Vec<Result<OutputClass, RemapError>> = pool.install(|| {
        sources
            .par_iter()
            .map(|source| applier::apply(source, resolution, settings))
            .collect()
    });

    let mut classes = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(class) => classes.push(class),
            Err(err) => errors.push(err),
        }
    }
    if !errors.is_empty() {
        return Err(PipelineFailure {
            phase: Phase::Remapping,
            errors,
        });
    }
    classes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(classes)
}

/// Runs a fresh pipeline to completion.
pub fn run(
    inputs: Vec<ClassSource>,
    classpath: Vec<ClassSource>,
    mappings: Mappings,
    options: &RemapOptions,
) -> Result<RunOutput, PipelineFailure> {
    Pipeline::new(options.clone()).run(inputs, classpath, mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessFlags;

    fn source(name: &str, super_name: &str) -> anyhow::Result<ClassSource> {
        Ok(ClassSource {
            name: name.to_string(),
            location: "in.jar".to_string(),
            bytes: ClassFile::new(name, Some(super_name), AccessFlags::PUBLIC)?.to_bytes()?,
        })
    }

    #[test]
    fn finished_after_a_successful_run() -> anyhow::Result<()> {
        let mut pipeline = Pipeline::new(RemapOptions::default());
        assert_eq!(pipeline.phase(), Phase::Idle);
        let output = pipeline
            .run(vec![source("a/A", "java/lang/Object")?], Vec::new(), Mappings::default())
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(pipeline.phase(), Phase::Finished);
        assert_eq!(output.classes.len(), 1);
        assert_eq!(output.stats.stub_classes, 1);

        let again = pipeline.run(Vec::new(), Vec::new(), Mappings::default());
        assert!(again.is_err());
        Ok(())
    }

    #[test]
    fn cancellation_stops_at_the_next_boundary() -> anyhow::Result<()> {
        let mut pipeline = Pipeline::new(RemapOptions::default());
        pipeline.cancel_handle().cancel();
        let Err(failure) = pipeline.run(vec![source("a/A", "java/lang/Object")?], Vec::new(), Mappings::default())
        else {
            anyhow::bail!("cancelled run succeeded");
        };
        assert!(matches!(failure.errors.as_slice(), [RemapError::Cancelled(Phase::Building)]));
        assert_eq!(pipeline.phase(), Phase::Failed);
        Ok(())
    }

    #[test]
    fn codec_failures_are_collected_per_class() -> anyhow::Result<()> {
        let broken = |name: &str| ClassSource {
            name: name.to_string(),
            location: "in.jar".to_string(),
            bytes: vec![0, 1, 2],
        };
        let result = run(
            vec![broken("x/One"), source("a/A", "java/lang/Object")?, broken("x/Two")],
            Vec::new(),
            Mappings::default(),
            &RemapOptions::default(),
        );
        let Err(failure) = result else {
            anyhow::bail!("broken inputs were accepted");
        };
        assert_eq!(failure.phase, Phase::Building);
        assert_eq!(failure.errors.len(), 2);
        Ok(())
    }

    #[test]
    fn duplicate_inputs_keep_the_first() -> anyhow::Result<()> {
        let output = run(
            vec![source("a/A", "java/lang/Object")?, source("a/A", "java/lang/Object")?],
            Vec::new(),
            Mappings::default(),
            &RemapOptions::default(),
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(output.classes.len(), 1);
        assert!(matches!(output.warnings.as_slice(), [Warning::DuplicateClass { .. }]));
        Ok(())
    }
}
