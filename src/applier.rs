//! Turns input classes into remapped output classes.

use crate::classfile::ClassFile;
use crate::config::RemapOptions;
use crate::error::{RemapError, Result};
use crate::input::ClassSource;
use crate::locals::LocalNaming;
use crate::resolve::Resolution;
use crate::rewrite::{self, RewriteSettings};

/// A remapped class, named by its final internal name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputClass {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl OutputClass {
    pub fn path(&self) -> String {
        format!("{}.class", self.name)
    }
}

impl From<&RemapOptions> for RewriteSettings {
    fn from(options: &RemapOptions) -> Self {
        let renames_locals = options.rename_invalid_locals && !options.skip_local_variable_mapping;
        Self {
            remove_frames: options.remove_frames,
            rebuild_source_filenames: options.rebuild_source_filenames,
            locals: renames_locals.then(|| LocalNaming {
                pattern: options.invalid_lv_name_pattern.clone(),
                infer_from_same_index: options.infer_name_from_same_lv_index,
            }),
        }
    }
}

/// Remaps one input class. Only reads `resolution`, so any number of classes
/// may be remapped at once.
pub fn apply(
    source: &ClassSource,
    resolution: &Resolution,
    settings: &RewriteSettings,
) -> Result<OutputClass> {
    let context = || format!("{} ({})", source.name, source.location);
    let mut class = ClassFile::parse(&source.bytes).map_err(|e| RemapError::codec(context(), e))?;
    rewrite::rewrite_class(&mut class, resolution, settings)
        .map_err(|e| RemapError::codec(context(), e))?;
    let bytes = class
        .to_bytes()
        .map_err(|e| RemapError::codec(context(), e))?;
    Ok(OutputClass {
        name: resolution.class_name(&source.name),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessFlags;
    use crate::hierarchy::ClassGraph;
    use crate::mapping::MappingTable;
    use crate::model::{ClassNode, ClassOrigin};
    use crate::resolve;
    use regex::Regex;

    #[test]
    fn local_renaming_needs_the_flag_and_no_skip() -> anyhow::Result<()> {
        let mut options = RemapOptions {
            invalid_lv_name_pattern: Some(Regex::new("^x$")?),
            ..RemapOptions::default()
        };
        assert!(RewriteSettings::from(&options).locals.is_none());
        options.rename_invalid_locals = true;
        assert!(RewriteSettings::from(&options).locals.is_some());
        options.skip_local_variable_mapping = true;
        assert!(RewriteSettings::from(&options).locals.is_none());
        Ok(())
    }

    #[test]
    fn output_takes_the_final_class_name() -> anyhow::Result<()> {
        let mut class = ClassFile::new("a", Some("java/lang/Object"), AccessFlags::PUBLIC)?;
        class.add_field(AccessFlags::PUBLIC, "f", "La;")?;
        let source = ClassSource {
            name: "a".to_string(),
            location: "in.jar".to_string(),
            bytes: class.to_bytes()?,
        };
        let node = ClassNode::from_class_file(&class, ClassOrigin::Input)?;
        let mappings = MappingTable::parse("v1\tsrc\tdst\nCLASS\ta\tpkg/Named\nFIELD\ta\tLa;\tf\tself\n")?
            .between("src", "dst", false)?;
        let options = RemapOptions::default();
        let (resolution, _) = resolve::resolve(ClassGraph::new(vec![node]), mappings, &options)
            .map_err(|mut e| e.remove(0))?;

        let output = apply(&source, &resolution, &RewriteSettings::from(&options))?;
        assert_eq!(output.path(), "pkg/Named.class");

        let remapped = ClassFile::parse(&output.bytes)?;
        assert_eq!(remapped.name()?, "pkg/Named");
        let pool = &remapped.constant_pool;
        assert_eq!(remapped.fields[0].name(pool)?, "self");
        assert_eq!(remapped.fields[0].descriptor(pool)?, "Lpkg/Named;");
        Ok(())
    }

    #[test]
    fn undecodable_bytes_name_the_class() {
        let source = ClassSource {
            name: "broken/Thing".to_string(),
            location: "in.jar".to_string(),
            bytes: vec![0xCA, 0xFE],
        };
        let resolution = resolve::resolve(
            ClassGraph::new(Vec::new()),
            crate::mapping::Mappings::default(),
            &RemapOptions::default(),
        );
        let Ok((resolution, _)) = resolution else {
            panic!("empty resolution failed");
        };
        let err = apply(&source, &resolution, &RewriteSettings::default());
        assert!(matches!(err, Err(RemapError::Codec { class, .. }) if class.starts_with("broken/Thing")));
    }
}
