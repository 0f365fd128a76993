//! Rename decisions.
//!
//! `ResolutionBuilder` is the only mutable view of the decisions and exists
//! during the resolving phase alone: it names every propagation group and
//! field, then lets the conflict and access passes revert or widen. `freeze`
//! turns it into a `Resolution`, which is read-only, shared by every remapping
//! worker, and is the `Remapper` each class is rewritten with.

use std::collections::HashSet;

use crate::config::RemapOptions;
use crate::conflict;
use crate::error::{RemapError, Warning};
use crate::hierarchy::{self, ClassGraph, MemberId, Propagation};
use crate::mapping::Mappings;
use crate::rewrite::Remapper;

pub struct Resolution {
    graph: ClassGraph,
    propagation: Propagation,
    mappings: Mappings,
    group_names: Vec<Option<String>>,
    field_names: Vec<Option<String>>,
    reverted_classes: HashSet<String>,
    widened_members: HashSet<usize>,
    widened_classes: HashSet<String>,
}

impl Resolution {
    pub fn graph(&self) -> &ClassGraph {
        &self.graph
    }

    pub fn propagation(&self) -> &Propagation {
        &self.propagation
    }

    pub fn class_name(&self, name: &str) -> String {
        self.map_class(name).unwrap_or_else(|| name.to_string())
    }

    /// The decided name of a member, `None` when it keeps its own.
    pub fn member_name(&self, id: MemberId) -> Option<&str> {
        let member = self.graph.member(id);
        if member.is_method() {
            self.propagation
                .group_index(&self.graph, id)
                .and_then(|g| self.group_names[g].as_deref())
        } else {
            self.field_names[self.graph.slot(id)].as_deref()
        }
    }

    pub fn member_target(&self, id: MemberId) -> (String, String) {
        let member = self.graph.member(id);
        let name = self.member_name(id).unwrap_or(&member.name).to_string();
        (name, self.map_desc(&member.desc))
    }

    pub fn qualified(&self, id: MemberId) -> String {
        format!(
            "{}.{}",
            self.graph.class(id.class).name,
            self.graph.member(id).display()
        )
    }

    pub fn is_widened(&self, id: MemberId) -> bool {
        self.widened_members.contains(&self.graph.slot(id))
    }

    pub fn renamed_classes(&self) -> usize {
        self.graph
            .classes()
            .iter()
            .filter(|c| c.is_input() && self.map_class(&c.name).is_some())
            .count()
    }
}

impl Remapper for Resolution {
    fn map_class(&self, name: &str) -> Option<String> {
        if self.reverted_classes.contains(name) {
            return None;
        }
        self.mappings.map_class(name).filter(|mapped| mapped != name)
    }

    fn map_field_name(&self, owner: &str, name: &str, desc: &str) -> Option<String> {
        match self.graph.resolve_member(owner, true, name, desc) {
            Some(id) => self.member_name(id).map(str::to_string),
            None => self
                .mappings
                .field_name(owner, name, desc)
                .filter(|mapped| *mapped != name)
                .map(str::to_string),
        }
    }

    fn map_method_name(&self, owner: &str, name: &str, desc: &str) -> Option<String> {
        if name.starts_with('<') {
            return None;
        }
        match self.graph.resolve_member(owner, false, name, desc) {
            Some(id) => self.member_name(id).map(str::to_string),
            None => self
                .mappings
                .method_name(owner, name, desc)
                .filter(|mapped| *mapped != name)
                .map(str::to_string),
        }
    }

    fn map_annotation_element(&self, annotation_desc: &str, name: &str) -> Option<String> {
        let owner = annotation_desc.strip_prefix('L')?.strip_suffix(';')?;
        let class = self.graph.by_name(owner)?;
        let element = class
            .members
            .iter()
            .find(|m| m.is_method() && m.name == name && m.desc.starts_with("()"))?;
        self.map_method_name(owner, name, &element.desc)
    }

    fn widens_member(&self, owner: &str, is_field: bool, name: &str, desc: &str) -> bool {
        let Some(class) = self.graph.id(owner) else {
            return false;
        };
        self.graph
            .class(class)
            .find_member(is_field, name, desc)
            .is_some_and(|index| {
                self.is_widened(MemberId {
                    class,
                    index: index as u32,
                })
            })
    }

    fn widens_class(&self, name: &str) -> bool {
        self.widened_classes.contains(name)
    }
}

pub struct ResolutionBuilder {
    resolution: Resolution,
    warnings: Vec<Warning>,
}

impl ResolutionBuilder {
    pub fn new(graph: ClassGraph, mappings: Mappings, options: &RemapOptions) -> Self {
        let propagation = hierarchy::link(&graph, options);
        let group_count = propagation.groups().len();
        let member_count = graph.member_count();
        Self {
            resolution: Resolution {
                graph,
                propagation,
                mappings,
                group_names: vec![None; group_count],
                field_names: vec![None; member_count],
                reverted_classes: HashSet::new(),
                widened_members: HashSet::new(),
                widened_classes: HashSet::new(),
            },
            warnings: Vec::new(),
        }
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Takes each group's name from the first member with an explicit
    /// mapping, in group order, and each field's from its declaring class.
    pub fn assign_names(&mut self, options: &RemapOptions) -> Vec<RemapError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let res = &mut self.resolution;

        for (index, group) in res.propagation.groups().iter().enumerate() {
            let mut chosen: Option<(MemberId, &str)> = None;
            for &id in &group.members {
                let member = res.graph.member(id);
                let owner = &res.graph.class(id.class).name;
                let Some(target) = res.mappings.method_name(owner, &member.name, &member.desc)
                else {
                    continue;
                };
                match chosen {
                    None => chosen = Some((id, target)),
                    Some((first, name)) if name != target => {
                        let first = res.qualified(first);
                        let second = res.qualified(id);
                        if options.ignore_conflicts {
                            warnings.push(Warning::ConflictingMappings {
                                member: first,
                                chosen: name.to_string(),
                                ignored: target.to_string(),
                            });
                        } else {
                            errors.push(RemapError::GroupConflict {
                                first: format!("{first} -> {name}"),
                                second: format!("{second} -> {target}"),
                            });
                        }
                        break;
                    }
                    Some(_) => {}
                }
            }
            res.group_names[index] = chosen
                .filter(|(id, target)| *target != res.graph.member(*id).name)
                .map(|(_, target)| target.to_string());
        }

        for class in res.graph.ids() {
            let owner = &res.graph.class(class).name;
            for (id, member) in res.graph.members(class) {
                if member.is_method() {
                    continue;
                }
                if let Some(target) = res.mappings.field_name(owner, &member.name, &member.desc)
                    && target != member.name
                {
                    res.field_names[res.graph.slot(id)] = Some(target.to_string());
                }
            }
        }

        for warning in warnings {
            self.warn(warning);
        }
        errors
    }

    /// Whether the member's decided name differs from its own.
    pub fn is_renamed(&self, id: MemberId) -> bool {
        self.resolution.member_name(id).is_some()
    }

    /// Restores the original name; for a method, of its whole group.
    pub fn revert_member(&mut self, id: MemberId) {
        let res = &mut self.resolution;
        if res.graph.member(id).is_method() {
            if let Some(group) = res.propagation.group_index(&res.graph, id) {
                res.group_names[group] = None;
            }
        } else {
            let slot = res.graph.slot(id);
            res.field_names[slot] = None;
        }
    }

    pub fn revert_class(&mut self, name: &str) {
        self.resolution.reverted_classes.insert(name.to_string());
    }

    /// Makes the member public; for a method, every member of its group
    /// declared by an input class.
    pub fn widen_member(&mut self, id: MemberId) {
        let res = &mut self.resolution;
        let members: Vec<MemberId> = match res.propagation.group_of(&res.graph, id) {
            Some(group) if res.graph.member(id).is_method() => group.members.clone(),
            _ => vec![id],
        };
        for member in members {
            if res.graph.class(member.class).is_input() {
                let slot = res.graph.slot(member);
                res.widened_members.insert(slot);
            }
        }
    }

    pub fn widen_class(&mut self, name: &str) {
        self.resolution.widened_classes.insert(name.to_string());
    }

    pub fn freeze(self) -> (Resolution, Vec<Warning>) {
        (self.resolution, self.warnings)
    }
}

/// Runs every resolving step and returns the frozen decisions, or every
/// error found.
pub fn resolve(
    graph: ClassGraph,
    mappings: Mappings,
    options: &RemapOptions,
) -> Result<(Resolution, Vec<Warning>), Vec<RemapError>> {
    let mut builder = ResolutionBuilder::new(graph, mappings, options);

    let mut errors = builder.assign_names(options);
    errors.extend(conflict::resolve_class_collisions(&mut builder, options));
    errors.extend(conflict::resolve_member_collisions(&mut builder, options));
    if !errors.is_empty() {
        return Err(errors);
    }

    if options.checks_package_access() {
        conflict::check_package_access(&mut builder, options);
    }

    let (resolution, warnings) = builder.freeze();
    tracing::info!(
        classes = resolution.graph().len(),
        groups = resolution.propagation().groups().len(),
        warnings = warnings.len(),
        "resolution frozen"
    );
    Ok((resolution, warnings))
}
