//! Name → class registry used while building the class model.
//!
//! Input classes are registered up front. Classpath classes are only parsed
//! when something reachable from the inputs needs them: supertypes of every
//! registered class, plus owners of members the inputs reference. Loading
//! happens in waves on the worker pool; each wave's results are applied in
//! name order so the resulting set of nodes does not depend on scheduling.

use rayon::ThreadPool;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::classfile::ClassFile;
use crate::error::RemapError;
use crate::input::ClassSource;
use crate::model::{ClassNode, ClassOrigin, Reference};

/// Classes that are never remapped and may be replaced by stubs when absent.
pub fn is_platform_class(name: &str) -> bool {
    name.starts_with("java/")
}

pub struct ClassRegistry {
    nodes: RwLock<HashMap<String, Arc<ClassNode>>>,
    classpath: HashMap<String, ClassSource>,
}

#[derive(Debug, Clone)]
struct Pending {
    /// Supertypes must exist; member owners are only loaded when available.
    required: bool,
    referenced_by: String,
}

enum LoadOutcome {
    Loaded(Arc<ClassNode>),
    Missing,
    Skipped,
    Failed(RemapError),
}

/// Result of expanding the registry from its roots.
#[derive(Debug, Default)]
pub struct Reachability {
    pub loaded: usize,
    /// Unlocated supertypes and the first class that referenced them.
    pub unresolved: BTreeMap<String, String>,
    pub errors: Vec<RemapError>,
}

impl ClassRegistry {
    /// Indexes the classpath by class name; the first entry for a name wins.
    pub fn new(classpath: Vec<ClassSource>) -> Self {
        let mut index = HashMap::with_capacity(classpath.len());
        for source in classpath {
            index.entry(source.name.clone()).or_insert(source);
        }
        Self {
            nodes: RwLock::new(HashMap::new()),
            classpath: index,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassNode>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `node` unless its name is taken. Returns the node stored under
    /// the name and whether it was this one.
    pub fn insert_if_absent(&self, node: ClassNode) -> (Arc<ClassNode>, bool) {
        if let Some(existing) = self.get(&node.name) {
            return (existing, false);
        }
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = nodes.get(&node.name) {
            return (Arc::clone(existing), false);
        }
        let node = Arc::new(node);
        nodes.insert(node.name.clone(), Arc::clone(&node));
        (node, true)
    }

    fn replace(&self, node: ClassNode) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.name.clone(), Arc::new(node));
    }

    /// Loads every classpath class reachable from the registered nodes.
    pub fn load_reachable(&self, pool: &ThreadPool) -> Reachability {
        let mut roots: Vec<Arc<ClassNode>> = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name));

        let mut report = Reachability::default();
        let mut frontier = BTreeMap::new();
        for node in &roots {
            self.schedule(&mut frontier, node);
        }

        let mut wave_no = 0usize;
        while !frontier.is_empty() {
            wave_no += 1;
            let wave: Vec<(String, Pending)> = std::mem::take(&mut frontier).into_iter().collect();
            tracing::debug!(wave = wave_no, classes = wave.len(), "loading classpath wave");

            let outcomes: Vec<LoadOutcome> = pool.install(|| {
                wave.par_iter()
                    .map(|(name, pending)| self.load(name, pending.required))
                    .collect()
            });

            for ((name, pending), outcome) in wave.into_iter().zip(outcomes) {
                match outcome {
                    LoadOutcome::Loaded(node) => {
                        report.loaded += 1;
                        self.schedule(&mut frontier, &node);
                    }
                    LoadOutcome::Missing => {
                        tracing::debug!(class = %name, referenced_by = %pending.referenced_by, "class not found");
                        report.unresolved.entry(name).or_insert(pending.referenced_by);
                    }
                    LoadOutcome::Skipped => {}
                    LoadOutcome::Failed(err) => report.errors.push(err),
                }
            }
        }

        tracing::info!(
            loaded = report.loaded,
            unresolved = report.unresolved.len(),
            "classpath expansion finished"
        );
        report
    }

    fn schedule(&self, frontier: &mut BTreeMap<String, Pending>, node: &ClassNode) {
        let mut enqueue = |name: &str, required: bool| {
            if name.starts_with('[') || self.contains(name) {
                return;
            }
            frontier
                .entry(name.to_string())
                .and_modify(|p: &mut Pending| p.required |= required)
                .or_insert_with(|| Pending {
                    required,
                    referenced_by: node.name.clone(),
                });
        };

        for supertype in node.supertypes() {
            enqueue(supertype, true);
        }
        for reference in &node.references {
            if let Reference::Member { owner, .. } = reference {
                enqueue(owner, false);
            }
        }
    }

    fn load(&self, name: &str, required: bool) -> LoadOutcome {
        if self.contains(name) {
            return LoadOutcome::Skipped;
        }
        let Some(source) = self.classpath.get(name) else {
            if !required {
                return LoadOutcome::Skipped;
            }
            self.insert_if_absent(ClassNode::unresolved(name));
            return LoadOutcome::Missing;
        };

        let node = ClassFile::parse(&source.bytes)
            .and_then(|class| ClassNode::from_class_file(&class, ClassOrigin::Classpath));
        match node {
            Ok(node) if node.name == name => match self.insert_if_absent(node) {
                (node, true) => LoadOutcome::Loaded(node),
                (_, false) => LoadOutcome::Skipped,
            },
            Ok(node) => LoadOutcome::Failed(RemapError::Codec {
                class: format!("{name} ({})", source.location),
                message: format!("entry declares class {}", node.name),
            }),
            Err(err) => LoadOutcome::Failed(RemapError::codec(
                format!("{name} ({})", source.location),
                err,
            )),
        }
    }

    /// Replaces unresolved placeholders by public stubs where allowed, and
    /// reports the rest.
    pub fn settle_missing(
        &self,
        unresolved: &BTreeMap<String, String>,
        resolve_missing: bool,
    ) -> Vec<RemapError> {
        let mut errors = Vec::new();
        for (class, referenced_by) in unresolved {
            if resolve_missing || is_platform_class(class) {
                tracing::debug!(class = %class, "substituting stub for missing class");
                self.replace(ClassNode::synthetic(class));
            } else {
                errors.push(RemapError::MissingClass {
                    class: class.clone(),
                    referenced_by: referenced_by.clone(),
                });
            }
        }
        errors
    }

    /// Every registered node, sorted by name. Only called once building is over.
    pub fn into_nodes(self) -> Vec<ClassNode> {
        let nodes = self
            .nodes
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut nodes: Vec<ClassNode> = nodes.into_values().map(Arc::unwrap_or_clone).collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }
}
