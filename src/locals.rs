//! Names for local variables whose debug names are unusable.
//!
//! A name is unusable when it is empty, is not a Java identifier, is a
//! reserved word, or matches the configured pattern. Replacements are either
//! borrowed from another entry of the same slot or synthesized from the
//! variable's type plus its slot index (`i3`, `string2`, `intArr1`).

use regex::Regex;
use std::collections::HashMap;

use crate::descriptor;

const KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "false", "final",
    "finally", "float", "for", "goto", "if", "implements", "import", "instanceof", "int",
    "interface", "long", "native", "new", "null", "package", "private", "protected", "public",
    "return", "short", "static", "strictfp", "super", "switch", "synchronized", "this", "throw",
    "throws", "transient", "true", "try", "void", "volatile", "while", "_",
];

#[derive(Debug, Clone, Default)]
pub struct LocalNaming {
    pub pattern: Option<Regex>,
    pub infer_from_same_index: bool,
}

/// One `LocalVariableTable` entry as seen by the namer.
#[derive(Debug, Clone, Copy)]
pub struct LocalSlot<'a> {
    pub name: &'a str,
    pub desc: &'a str,
    pub index: u16,
}

pub fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl LocalNaming {
    pub fn is_invalid(&self, name: &str) -> bool {
        // `this` is what javac emits for slot 0; keep it.
        if name == "this" {
            return false;
        }
        !is_java_identifier(name)
            || KEYWORDS.contains(&name)
            || self.pattern.as_ref().is_some_and(|p| p.is_match(name))
    }

    /// New names for the entries of one method's table, `None` where the
    /// existing name stays.
    pub fn rename(&self, locals: &[LocalSlot<'_>]) -> Vec<Option<String>> {
        let invalid: Vec<bool> = locals.iter().map(|l| self.is_invalid(l.name)).collect();
        if !invalid.contains(&true) {
            return vec![None; locals.len()];
        }

        // name -> slot, so entries of the same slot may share a name.
        let mut taken: HashMap<String, u16> = HashMap::new();
        for (local, bad) in locals.iter().zip(&invalid) {
            if !bad {
                taken.entry(local.name.to_string()).or_insert(local.index);
            }
        }

        let mut by_slot: HashMap<u16, String> = HashMap::new();
        let mut renames = Vec::with_capacity(locals.len());
        for (local, bad) in locals.iter().zip(&invalid) {
            if !bad {
                renames.push(None);
                continue;
            }
            if let Some(name) = by_slot.get(&local.index) {
                renames.push(Some(name.clone()));
                continue;
            }

            let inferred = self
                .infer_from_same_index
                .then(|| {
                    locals
                        .iter()
                        .zip(&invalid)
                        .find(|(other, bad)| !**bad && other.index == local.index)
                        .map(|(other, _)| other.name.to_string())
                })
                .flatten();

            let name = match inferred {
                Some(name) => name,
                None => {
                    let mut name = format!("{}{}", type_stem(local.desc), local.index);
                    while KEYWORDS.contains(&name.as_str())
                        || taken.get(&name).is_some_and(|slot| *slot != local.index)
                    {
                        name.push('_');
                    }
                    name
                }
            };
            taken.entry(name.clone()).or_insert(local.index);
            by_slot.insert(local.index, name.clone());
            renames.push(Some(name));
        }
        renames
    }
}

/// Lower-camel stem for a variable of field type `desc`.
pub fn type_stem(desc: &str) -> String {
    if let Some(element) = desc.strip_prefix('[') {
        return format!("{}Arr", type_stem(element));
    }
    match desc {
        "Z" => "bl".to_string(),
        "B" => "b".to_string(),
        "C" => "c".to_string(),
        "S" => "s".to_string(),
        "I" => "i".to_string(),
        "J" => "l".to_string(),
        "F" => "f".to_string(),
        "D" => "d".to_string(),
        _ if descriptor::is_reference_type(desc) => {
            let class = desc.trim_start_matches('L').trim_end_matches(';');
            let simple = class.rsplit('/').next().unwrap_or(class);
            let simple = simple.rsplit('$').find(|s| !s.is_empty()).unwrap_or(simple);
            let simple: String = simple
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            let mut chars = simple.chars();
            match chars.next() {
                Some(first) if first.is_alphabetic() => {
                    first.to_lowercase().chain(chars).collect()
                }
                _ => "obj".to_string(),
            }
        }
        _ => "var".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot<'a>(name: &'a str, desc: &'a str, index: u16) -> LocalSlot<'a> {
        LocalSlot { name, desc, index }
    }

    #[test]
    fn valid_names_are_kept() {
        let naming = LocalNaming::default();
        let renames = naming.rename(&[slot("this", "Lpkg/A;", 0), slot("count", "I", 1)]);
        assert_eq!(renames, vec![None, None]);
    }

    #[test]
    fn pattern_and_invalid_identifiers_are_replaced() -> anyhow::Result<()> {
        let naming = LocalNaming {
            pattern: Some(Regex::new(r"^\$\$\d+$")?),
            infer_from_same_index: false,
        };
        let renames = naming.rename(&[
            slot("$$1", "I", 1),
            slot("", "Ljava/lang/String;", 2),
            slot("class", "[J", 3),
            slot("x y", "Ljava/util/Map$Entry;", 4),
        ]);
        assert_eq!(
            renames,
            vec![
                Some("i1".to_string()),
                Some("string2".to_string()),
                Some("lArr3".to_string()),
                Some("entry4".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn synthesized_names_avoid_existing_ones() {
        let naming = LocalNaming::default();
        let renames = naming.rename(&[slot("i1", "I", 5), slot("if", "I", 1)]);
        assert_eq!(renames, vec![None, Some("i1_".to_string())]);
    }

    #[test]
    fn same_slot_names_are_inferred_when_enabled() {
        let locals = [slot("0", "I", 2), slot("index", "I", 2)];
        let inferring = LocalNaming {
            pattern: None,
            infer_from_same_index: true,
        };
        assert_eq!(
            inferring.rename(&locals),
            vec![Some("index".to_string()), None]
        );
        assert_eq!(
            LocalNaming::default().rename(&locals),
            vec![Some("i2".to_string()), None]
        );
    }

    #[test]
    fn type_stems() {
        assert_eq!(type_stem("Z"), "bl");
        assert_eq!(type_stem("[[Ljava/lang/Object;"), "objectArrArr");
        assert_eq!(type_stem("La/b/C$1;"), "obj");
        assert_eq!(type_stem("Lcom/Foo$Bar;"), "bar");
    }
}
