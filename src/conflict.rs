//! Collision and package-access checks over tentative decisions.

use std::collections::HashMap;

use crate::config::RemapOptions;
use crate::error::{RemapError, Warning};
use crate::hierarchy::{ClassId, MemberId};
use crate::model::{ClassOrigin, Reference, package_of};
use crate::resolve::ResolutionBuilder;
use crate::rewrite::Remapper;

struct Collision {
    owner: ClassId,
    first: MemberId,
    second: MemberId,
    target: String,
}

/// Pairs of members of one input class that would share a name and
/// descriptor, in class then declaration order.
fn member_collisions(builder: &ResolutionBuilder) -> Vec<Collision> {
    let res = builder.resolution();
    let graph = res.graph();
    let mut collisions = Vec::new();
    for class in graph.ids().filter(|c| graph.class(*c).is_input()) {
        let mut seen: HashMap<(bool, String, String), MemberId> = HashMap::new();
        for (id, member) in graph.members(class) {
            let (name, desc) = res.member_target(id);
            let key = (member.is_method(), name, desc);
            match seen.get(&key) {
                Some(&first) => collisions.push(Collision {
                    owner: class,
                    first,
                    second: id,
                    target: format!("{}{}{}", key.1, if key.0 { "" } else { ":" }, key.2),
                }),
                None => {
                    seen.insert(key, id);
                }
            }
        }
    }
    collisions
}

/// Fails on member collisions, or with `ignore_conflicts` reverts renames
/// until none remain: the later member is reverted, or the earlier one when
/// the later kept its name.
pub fn resolve_member_collisions(
    builder: &mut ResolutionBuilder,
    options: &RemapOptions,
) -> Vec<RemapError> {
    let mut errors = Vec::new();
    loop {
        let mut reverted = false;
        for collision in member_collisions(builder) {
            let res = builder.resolution();
            let owner = res.graph().class(collision.owner).name.clone();
            let victim = if !options.ignore_conflicts {
                None
            } else if builder.is_renamed(collision.second) {
                Some((collision.second, collision.first))
            } else if builder.is_renamed(collision.first) {
                Some((collision.first, collision.second))
            } else {
                None
            };

            let Some((victim, kept)) = victim else {
                errors.push(RemapError::Conflict {
                    owner,
                    first: res.qualified(collision.first),
                    second: res.qualified(collision.second),
                    target: collision.target,
                });
                continue;
            };

            let warning = Warning::ConflictIgnored {
                owner,
                kept: res.qualified(kept),
                reverted: res.qualified(victim),
                target: collision.target,
            };
            builder.revert_member(victim);
            builder.warn(warning);
            reverted = true;
            break;
        }
        if !reverted {
            break;
        }
        errors.clear();
    }
    errors
}

/// Two classes ending up with one name; handled like member collisions.
pub fn resolve_class_collisions(
    builder: &mut ResolutionBuilder,
    options: &RemapOptions,
) -> Vec<RemapError> {
    loop {
        let res = builder.resolution();
        let mut owners: HashMap<String, &str> = HashMap::new();
        let mut collision = None;
        for class in res.graph().classes() {
            if !matches!(class.origin, ClassOrigin::Input | ClassOrigin::Classpath) {
                continue;
            }
            let target = res.class_name(&class.name);
            match owners.get(&target) {
                Some(first) => {
                    collision = Some((first.to_string(), class.name.clone(), target));
                    break;
                }
                None => {
                    owners.insert(target, &class.name);
                }
            }
        }

        let Some((first, second, target)) = collision else {
            return Vec::new();
        };
        let renamed = |name: &str| res.map_class(name).is_some();
        let victim = if !options.ignore_conflicts {
            None
        } else if renamed(&second) {
            Some((second.clone(), first.clone()))
        } else if renamed(&first) {
            Some((first.clone(), second.clone()))
        } else {
            None
        };
        let Some((victim, kept)) = victim else {
            return vec![RemapError::Conflict {
                owner: target.clone(),
                first,
                second,
                target,
            }];
        };
        builder.revert_class(&victim);
        builder.warn(Warning::ConflictIgnored {
            owner: target.clone(),
            kept,
            reverted: victim,
            target,
        });
    }
}

enum Violation {
    Class(String),
    Member(MemberId),
}

/// Finds package-private classes and members that an input class reaches
/// today but would not once the two sit in different packages.
pub fn check_package_access(builder: &mut ResolutionBuilder, options: &RemapOptions) {
    let mut found: Vec<(String, Violation)> = Vec::new();
    {
        let res = builder.resolution();
        let graph = res.graph();
        for class in graph.classes().iter().filter(|c| c.is_input()) {
            let package = package_of(&class.name);
            let new_name = res.class_name(&class.name);
            let new_package = package_of(&new_name);
            let moves_apart = |declaring: &str| {
                package_of(declaring) == package
                    && package_of(&res.class_name(declaring)) != new_package
            };

            for reference in &class.references {
                match reference {
                    Reference::Class(target) => {
                        if let Some(node) = graph.by_name(target)
                            && node.origin != ClassOrigin::Synthetic
                            && node.access.is_package_private()
                            && moves_apart(&node.name)
                        {
                            found.push((class.name.clone(), Violation::Class(node.name.clone())));
                        }
                    }
                    Reference::Member {
                        is_field,
                        owner,
                        name,
                        desc,
                    } => {
                        let Some(id) = graph.resolve_member(owner, *is_field, name, desc) else {
                            continue;
                        };
                        let declaring = &graph.class(id.class).name;
                        if id.class != graph.id(&class.name).unwrap_or(id.class)
                            && graph.member(id).access.is_package_private()
                            && moves_apart(declaring)
                        {
                            found.push((class.name.clone(), Violation::Member(id)));
                        }
                    }
                }
            }
        }
    }

    for (referencing_class, violation) in found {
        let res = builder.resolution();
        let (declaring_class, member, fixable) = match &violation {
            Violation::Class(name) => (
                name.clone(),
                None,
                res.graph().by_name(name).is_some_and(|c| c.is_input()),
            ),
            Violation::Member(id) => (
                res.graph().class(id.class).name.clone(),
                Some(res.graph().member(*id).display()),
                res.graph().class(id.class).is_input(),
            ),
        };
        let fixed = options.fix_package_access && fixable;
        if fixed {
            match violation {
                Violation::Class(name) => builder.widen_class(&name),
                Violation::Member(id) => builder.widen_member(id),
            }
        }
        builder.warn(Warning::AccessViolation {
            referencing_class,
            declaring_class,
            member,
            fixed,
        });
    }
}
