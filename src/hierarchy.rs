//! Inheritance graph and method propagation groups.
//!
//! `ClassGraph` freezes the registry into an arena: classes sorted by name,
//! addressed by `ClassId`, with supertype and subtype edges resolved once.
//! `link` then partitions every method into propagation groups: methods that
//! override one another, bridges joined with their targets according to the
//! bridge policy, and force-propagated methods regardless of access.

use std::collections::HashMap;

use crate::config::{BridgePropagation, RemapOptions};
use crate::descriptor;
use crate::model::{ClassNode, MemberNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId {
    pub class: ClassId,
    pub index: u32,
}

pub struct ClassGraph {
    classes: Vec<ClassNode>,
    index: HashMap<String, ClassId>,
    /// Superclass chain first, then every interface breadth-first.
    ancestors: Vec<Vec<ClassId>>,
    subclasses: Vec<Vec<ClassId>>,
    member_offsets: Vec<usize>,
}

impl ClassGraph {
    pub fn new(mut classes: Vec<ClassNode>) -> Self {
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        let index: HashMap<String, ClassId> = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), ClassId(i as u32)))
            .collect();

        let mut subclasses = vec![Vec::new(); classes.len()];
        for (i, class) in classes.iter().enumerate() {
            for supertype in class.supertypes() {
                if let Some(id) = index.get(supertype) {
                    subclasses[id.0 as usize].push(ClassId(i as u32));
                }
            }
        }

        let mut member_offsets = Vec::with_capacity(classes.len() + 1);
        let mut total = 0;
        for class in &classes {
            member_offsets.push(total);
            total += class.members.len();
        }
        member_offsets.push(total);

        let mut graph = Self {
            classes,
            index,
            ancestors: Vec::new(),
            subclasses,
            member_offsets,
        };
        graph.ancestors = (0..graph.classes.len())
            .map(|i| graph.collect_ancestors(ClassId(i as u32)))
            .collect();
        graph
    }

    fn collect_ancestors(&self, id: ClassId) -> Vec<ClassId> {
        let mut seen = vec![false; self.classes.len()];
        seen[id.0 as usize] = true;
        let mut chain = Vec::new();

        let mut current = id;
        while let Some(super_id) = self.class(current).super_name.as_deref().and_then(|s| self.id(s))
            && !seen[super_id.0 as usize]
        {
            seen[super_id.0 as usize] = true;
            chain.push(super_id);
            current = super_id;
        }

        let mut queue: Vec<ClassId> = std::iter::once(id).chain(chain.iter().copied()).collect();
        let mut head = 0;
        while head < queue.len() {
            let class = self.class(queue[head]);
            head += 1;
            for interface in &class.interfaces {
                if let Some(iid) = self.id(interface)
                    && !seen[iid.0 as usize]
                {
                    seen[iid.0 as usize] = true;
                    chain.push(iid);
                    queue.push(iid);
                }
            }
            if let Some(super_id) = class.super_name.as_deref().and_then(|s| self.id(s))
                && !seen[super_id.0 as usize]
            {
                seen[super_id.0 as usize] = true;
                chain.push(super_id);
                queue.push(super_id);
            }
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.classes.len()).map(|i| ClassId(i as u32))
    }

    pub fn classes(&self) -> &[ClassNode] {
        &self.classes
    }

    pub fn class(&self, id: ClassId) -> &ClassNode {
        &self.classes[id.0 as usize]
    }

    pub fn id(&self, name: &str) -> Option<ClassId> {
        self.index.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&ClassNode> {
        self.id(name).map(|id| self.class(id))
    }

    pub fn ancestors(&self, id: ClassId) -> &[ClassId] {
        &self.ancestors[id.0 as usize]
    }

    pub fn subclasses(&self, id: ClassId) -> &[ClassId] {
        &self.subclasses[id.0 as usize]
    }

    pub fn member(&self, id: MemberId) -> &MemberNode {
        &self.class(id.class).members[id.index as usize]
    }

    pub fn members(&self, class: ClassId) -> impl Iterator<Item = (MemberId, &MemberNode)> {
        self.class(class)
            .members
            .iter()
            .enumerate()
            .map(move |(i, m)| {
                (
                    MemberId {
                        class,
                        index: i as u32,
                    },
                    m,
                )
            })
    }

    pub fn member_count(&self) -> usize {
        self.member_offsets[self.classes.len()]
    }

    /// Dense index over every member of every class.
    pub fn slot(&self, id: MemberId) -> usize {
        self.member_offsets[id.class.0 as usize] + id.index as usize
    }

    /// Finds the member a reference `owner.name desc` resolves to: the owner
    /// itself, then its superclasses, then its interfaces.
    pub fn resolve_member(
        &self,
        owner: &str,
        is_field: bool,
        name: &str,
        desc: &str,
    ) -> Option<MemberId> {
        let owner = self.id(owner)?;
        std::iter::once(owner)
            .chain(self.ancestors(owner).iter().copied())
            .find_map(|class| {
                self.class(class)
                    .find_member(is_field, name, desc)
                    .map(|index| MemberId {
                        class,
                        index: index as u32,
                    })
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PropagationGroup {
    /// Input classes first, then by class name and declaration order.
    pub members: Vec<MemberId>,
    pub forced: bool,
    pub has_private: bool,
    pub has_bridge: bool,
}

pub struct Propagation {
    groups: Vec<PropagationGroup>,
    group_of: Vec<Option<u32>>,
}

impl Propagation {
    pub fn groups(&self) -> &[PropagationGroup] {
        &self.groups
    }

    pub fn group_index(&self, graph: &ClassGraph, member: MemberId) -> Option<usize> {
        self.group_of[graph.slot(member)].map(|g| g as usize)
    }

    pub fn group_of(&self, graph: &ClassGraph, member: MemberId) -> Option<&PropagationGroup> {
        self.group_index(graph, member).map(|g| &self.groups[g])
    }
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

fn propagates(member: &MemberNode, options: &RemapOptions) -> bool {
    if !member.is_method() || member.is_constructor() {
        return false;
    }
    if options.is_forced(&member.name, &member.desc) {
        return true;
    }
    !member.access.is_static() && (!member.access.is_private() || options.propagate_private)
}

/// Partitions every method of the graph into propagation groups. Fields and
/// constructors end up in no group.
pub fn link(graph: &ClassGraph, options: &RemapOptions) -> Propagation {
    let mut sets = UnionFind::new(graph.member_count());
    let eligible: Vec<bool> = graph
        .ids()
        .flat_map(|c| graph.members(c).map(|(_, m)| propagates(m, options)))
        .collect();

    // Same name and descriptor anywhere up the hierarchy.
    for class in graph.ids() {
        let mut first_by_key: HashMap<(&str, &str), usize> = HashMap::new();
        for owner in std::iter::once(class).chain(graph.ancestors(class).iter().copied()) {
            for (id, member) in graph.members(owner) {
                let slot = graph.slot(id);
                if !eligible[slot] {
                    continue;
                }
                match first_by_key.get(&(member.name.as_str(), member.desc.as_str())) {
                    Some(&first) => sets.union(first, slot),
                    None => {
                        first_by_key.insert((member.name.as_str(), member.desc.as_str()), slot);
                    }
                }
            }
        }
    }

    if options.propagate_bridges != BridgePropagation::Disabled {
        link_bridges(graph, options, &eligible, &mut sets);
    }

    let mut order: Vec<MemberId> = graph
        .ids()
        .flat_map(|c| graph.members(c).map(|(id, _)| id))
        .filter(|id| graph.member(*id).is_method() && !graph.member(*id).is_constructor())
        .collect();
    order.sort_by_key(|id| (!graph.class(id.class).is_input(), id.class, id.index));

    let mut groups: Vec<PropagationGroup> = Vec::new();
    let mut group_of = vec![None; graph.member_count()];
    let mut by_root: HashMap<usize, u32> = HashMap::new();
    for id in order {
        let root = sets.find(graph.slot(id));
        let group = *by_root.entry(root).or_insert_with(|| {
            groups.push(PropagationGroup::default());
            (groups.len() - 1) as u32
        });
        let member = graph.member(id);
        let entry = &mut groups[group as usize];
        entry.members.push(id);
        entry.forced |= options.is_forced(&member.name, &member.desc);
        entry.has_private |= member.access.is_private();
        entry.has_bridge |= member.is_bridge();
        group_of[graph.slot(id)] = Some(group);
    }

    tracing::debug!(
        groups = groups.len(),
        shared = groups.iter().filter(|g| g.members.len() > 1).count(),
        "linked propagation groups"
    );
    Propagation { groups, group_of }
}

fn link_bridges(
    graph: &ClassGraph,
    options: &RemapOptions,
    eligible: &[bool],
    sets: &mut UnionFind,
) {
    let mut bridges_by_key: HashMap<(&str, &str), usize> = HashMap::new();

    for class in graph.ids() {
        for (id, member) in graph.members(class) {
            if !member.is_bridge() || !eligible[graph.slot(id)] {
                continue;
            }
            let slot = graph.slot(id);

            if options.propagate_bridges == BridgePropagation::Enabled {
                match bridges_by_key.get(&(member.name.as_str(), member.desc.as_str())) {
                    Some(&first) => sets.union(first, slot),
                    None => {
                        bridges_by_key.insert((member.name.as_str(), member.desc.as_str()), slot);
                    }
                }
            }

            let Some(target) = member.bridge_target().and_then(|t| {
                graph.resolve_member(&t.owner, false, &t.name, &t.desc)
            }) else {
                continue;
            };
            if target == id || !eligible[graph.slot(target)] {
                continue;
            }
            let target_member = graph.member(target);

            let merge = match options.propagate_bridges {
                BridgePropagation::Enabled => true,
                BridgePropagation::Compatible => {
                    descriptor::is_erasure_compatible(&member.desc, &target_member.desc)
                        && overrides_supertype(graph, class, member)
                }
                BridgePropagation::Disabled => false,
            };
            if merge {
                sets.union(slot, graph.slot(target));
            }
        }
    }
}

fn overrides_supertype(graph: &ClassGraph, class: ClassId, member: &MemberNode) -> bool {
    graph.ancestors(class).iter().any(|ancestor| {
        graph
            .class(*ancestor)
            .find_member(false, &member.name, &member.desc)
            .is_some()
    })
}
