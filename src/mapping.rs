//! Multi-namespace mapping table.
//!
//! `MappingTable` holds every row of a tabular (tiny v1) mapping file with one
//! name per declared namespace. Member rows carry their owner and descriptor
//! in the first namespace, as the file does. The remapper never works on the
//! table directly: it asks for the projection onto one (from, to) namespace
//! pair, a flat `Mappings` lookup that is immutable for the rest of the run.

use std::collections::HashMap;

use crate::descriptor;
use crate::error::{RemapError, Result};

#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    namespaces: Vec<String>,
    classes: Vec<Vec<String>>,
    fields: Vec<MemberRow>,
    methods: Vec<MemberRow>,
}

#[derive(Debug, Clone)]
struct MemberRow {
    owner: String,
    desc: String,
    names: Vec<String>,
}

impl MappingTable {
    pub fn parse(text: &str) -> Result<Self> {
        let mut table = MappingTable::default();
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim_end_matches('\r')))
            .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with('#'));

        let (header_line, header) = lines.next().ok_or_else(|| RemapError::InvalidMapping {
            line: 0,
            message: "mapping file is empty".to_string(),
        })?;
        let mut columns = header.split('\t');
        if columns.next() != Some("v1") {
            return Err(RemapError::InvalidMapping {
                line: header_line,
                message: format!("unsupported header: {header}"),
            });
        }
        table.namespaces = columns.map(str::to_string).collect();
        if table.namespaces.is_empty() || table.namespaces.iter().any(String::is_empty) {
            return Err(RemapError::InvalidMapping {
                line: header_line,
                message: "header must declare at least one namespace".to_string(),
            });
        }

        let width = table.namespaces.len();
        for (line_no, line) in lines {
            let columns: Vec<&str> = line.split('\t').collect();
            let expected = match columns[0] {
                "CLASS" => 1 + width,
                "FIELD" | "METHOD" => 3 + width,
                other => {
                    return Err(RemapError::InvalidMapping {
                        line: line_no,
                        message: format!("unknown row kind {other:?}"),
                    });
                }
            };
            if columns.len() != expected {
                return Err(RemapError::InvalidMapping {
                    line: line_no,
                    message: format!(
                        "{} row has {} columns, expected {expected}",
                        columns[0],
                        columns.len()
                    ),
                });
            }

            match columns[0] {
                "CLASS" => {
                    table
                        .classes
                        .push(columns[1..].iter().map(|s| s.to_string()).collect());
                }
                kind => {
                    let row = MemberRow {
                        owner: columns[1].to_string(),
                        desc: columns[2].to_string(),
                        names: columns[3..].iter().map(|s| s.to_string()).collect(),
                    };
                    if kind == "FIELD" {
                        table.fields.push(row);
                    } else {
                        table.methods.push(row);
                    }
                }
            }
        }

        Ok(table)
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    fn namespace_index(&self, namespace: &str) -> Result<usize> {
        self.namespaces
            .iter()
            .position(|ns| ns == namespace)
            .ok_or_else(|| RemapError::InvalidMapping {
                line: 0,
                message: format!(
                    "namespace {namespace:?} is not declared (declared: {})",
                    self.namespaces.join(", ")
                ),
            })
    }

    /// Projects the table onto the `from` → `to` namespace pair.
    pub fn between(&self, from: &str, to: &str, ignore_field_desc: bool) -> Result<Mappings> {
        let from_idx = self.namespace_index(from)?;
        let to_idx = self.namespace_index(to)?;

        let primary: HashMap<&str, &Vec<String>> = self
            .classes
            .iter()
            .filter_map(|row| row.first().map(|name| (name.as_str(), row)))
            .collect();
        let into_from = |name: &str| class_in_namespace(&primary, from_idx, name);

        let mut mappings = Mappings {
            ignore_field_desc,
            ..Mappings::default()
        };

        for row in &self.classes {
            let (source, target) = (&row[from_idx], &row[to_idx]);
            if !source.is_empty() && !target.is_empty() {
                mappings.classes.insert(source.clone(), target.clone());
            }
        }

        for (rows, is_field) in [(&self.fields, true), (&self.methods, false)] {
            for row in rows {
                let (source, target) = (&row.names[from_idx], &row.names[to_idx]);
                if source.is_empty() || target.is_empty() {
                    continue;
                }
                let owner = into_from(&row.owner).unwrap_or_else(|| row.owner.clone());
                let desc = descriptor::remap_descriptor(&row.desc, &into_from);
                if is_field {
                    mappings
                        .fields_by_name
                        .entry((owner.clone(), source.clone()))
                        .or_insert_with(|| target.clone());
                    mappings
                        .fields
                        .insert((owner, source.clone(), desc), target.clone());
                } else {
                    mappings
                        .methods
                        .insert((owner, source.clone(), desc), target.clone());
                }
            }
        }

        tracing::debug!(
            from,
            to,
            classes = mappings.classes.len(),
            fields = mappings.fields.len(),
            methods = mappings.methods.len(),
            "projected mapping table"
        );
        Ok(mappings)
    }
}

fn class_in_namespace(
    primary: &HashMap<&str, &Vec<String>>,
    namespace: usize,
    name: &str,
) -> Option<String> {
    if let Some(row) = primary.get(name)
        && !row[namespace].is_empty()
    {
        return (row[namespace] != name).then(|| row[namespace].clone());
    }
    let (outer, inner) = name.rsplit_once('$')?;
    class_in_namespace(primary, namespace, outer).map(|outer| format!("{outer}${inner}"))
}

type MemberKey = (String, String, String);

/// Renames between one pair of namespaces, keyed by names in the source
/// namespace.
#[derive(Debug, Clone, Default)]
pub struct Mappings {
    classes: HashMap<String, String>,
    fields: HashMap<MemberKey, String>,
    fields_by_name: HashMap<(String, String), String>,
    methods: HashMap<MemberKey, String>,
    ignore_field_desc: bool,
}

impl Mappings {
    /// Target name of a class. Inner classes without a row of their own
    /// follow their outer class; a row mapping a class to itself pins it.
    pub fn map_class(&self, name: &str) -> Option<String> {
        if let Some(mapped) = self.classes.get(name) {
            return (mapped != name).then(|| mapped.clone());
        }
        let (outer, inner) = name.rsplit_once('$')?;
        self.map_class(outer).map(|outer| format!("{outer}${inner}"))
    }

    pub fn class_name(&self, name: &str) -> String {
        self.map_class(name).unwrap_or_else(|| name.to_string())
    }

    pub fn field_name(&self, owner: &str, name: &str, desc: &str) -> Option<&str> {
        let key = (owner.to_string(), name.to_string(), desc.to_string());
        if let Some(target) = self.fields.get(&key) {
            return Some(target);
        }
        if self.ignore_field_desc {
            let (owner, name, _) = key;
            return self.fields_by_name.get(&(owner, name)).map(String::as_str);
        }
        None
    }

    pub fn method_name(&self, owner: &str, name: &str, desc: &str) -> Option<&str> {
        self.methods
            .get(&(owner.to_string(), name.to_string(), desc.to_string()))
            .map(String::as_str)
    }

    pub fn remap_descriptor(&self, desc: &str) -> String {
        descriptor::remap_descriptor(desc, &|name: &str| self.map_class(name))
    }

    pub fn remap_signature(&self, signature: &str) -> String {
        descriptor::remap_signature(signature, &|name: &str| self.map_class(name))
    }

    /// Explicit class renames, sorted by source name.
    pub fn class_renames(&self) -> Vec<(&str, &str)> {
        let mut renames: Vec<(&str, &str)> = self
            .classes
            .iter()
            .filter(|(from, to)| from != to)
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect();
        renames.sort_unstable();
        renames
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.fields.is_empty() && self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "v1\tofficial\tintermediary\tnamed
# comment line

CLASS\ta\tclass_1\tcom/example/Widget
CLASS\tb\tclass_2\tcom/example/Gadget
FIELD\ta\tLb;\tc\tfield_1\tgadget
METHOD\ta\t(Lb;)La;\td\tmethod_1\twith
METHOD\ta\t()V\te\tmethod_2\t
";

    #[test]
    fn parse_reads_namespaces_and_rows() -> Result<()> {
        let table = MappingTable::parse(TABLE)?;
        assert_eq!(table.namespaces(), ["official", "intermediary", "named"]);
        assert_eq!(table.classes.len(), 2);
        assert_eq!(table.fields.len(), 1);
        assert_eq!(table.methods.len(), 2);
        Ok(())
    }

    #[test]
    fn projection_rewrites_owner_and_descriptor_into_source_namespace() -> Result<()> {
        let table = MappingTable::parse(TABLE)?;
        let m = table.between("intermediary", "named", false)?;
        assert_eq!(m.map_class("class_1").as_deref(), Some("com/example/Widget"));
        assert_eq!(
            m.method_name("class_1", "method_1", "(Lclass_2;)Lclass_1;"),
            Some("with")
        );
        assert_eq!(m.field_name("class_1", "field_1", "Lclass_2;"), Some("gadget"));
        assert_eq!(m.method_name("class_1", "method_2", "()V"), None);
        assert_eq!(m.map_class("unknown"), None);
        Ok(())
    }

    #[test]
    fn inner_classes_follow_their_outer_class() -> Result<()> {
        let m = MappingTable::parse(TABLE)?.between("official", "named", false)?;
        assert_eq!(m.class_name("a$1"), "com/example/Widget$1");
        assert_eq!(
            m.remap_descriptor("(La$Inner;[Lb;)V"),
            "(Lcom/example/Widget$Inner;[Lcom/example/Gadget;)V"
        );
        Ok(())
    }

    #[test]
    fn identity_rows_keep_inner_classes_in_place() -> Result<()> {
        let m = MappingTable::parse("v1\tsrc\tdst\nCLASS\ta\tpkg/Outer\nCLASS\ta$b\ta$b\n")?
            .between("src", "dst", false)?;
        assert_eq!(m.map_class("a$b"), None);
        assert_eq!(m.map_class("a$c").as_deref(), Some("pkg/Outer$c"));
        assert_eq!(m.map_class("a$b$d"), None);
        assert_eq!(m.class_renames(), vec![("a", "pkg/Outer")]);
        Ok(())
    }

    #[test]
    fn ignore_field_desc_matches_by_name_only() -> Result<()> {
        let table = MappingTable::parse(TABLE)?;
        let strict = table.between("official", "named", false)?;
        assert_eq!(strict.field_name("a", "c", "I"), None);
        let loose = table.between("official", "named", true)?;
        assert_eq!(loose.field_name("a", "c", "I"), Some("gadget"));
        Ok(())
    }

    #[test]
    fn column_mismatch_is_rejected_with_line_number() {
        let err = MappingTable::parse("v1\ta\tb\nCLASS\tx\n").unwrap_err();
        assert!(matches!(err, RemapError::InvalidMapping { line: 2, .. }));
    }

    #[test]
    fn undeclared_namespace_is_rejected() -> Result<()> {
        let table = MappingTable::parse(TABLE)?;
        let err = table.between("official", "mojang", false).unwrap_err();
        assert!(matches!(err, RemapError::InvalidMapping { .. }));
        Ok(())
    }

    #[test]
    fn unknown_row_kind_is_rejected() {
        let err = MappingTable::parse("v1\ta\tb\nPACKAGE\tx\ty\n").unwrap_err();
        assert!(matches!(err, RemapError::InvalidMapping { line: 2, .. }));
    }
}
