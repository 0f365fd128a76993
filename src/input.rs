use anyhow::{Context, Result};
use ignore::WalkBuilder;
use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use crate::classfile::ClassFile;

/// Raw bytes of one class, named by its internal name (`a/b/C`).
#[derive(Debug, Clone)]
pub struct ClassSource {
    pub name: String,
    pub location: String,
    pub bytes: Vec<u8>,
}

/// A non-class entry carried from the input to the output untouched.
#[derive(Debug, Clone)]
pub struct Resource {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct InputSet {
    pub classes: Vec<ClassSource>,
    pub resources: Vec<Resource>,
}

impl InputSet {
    pub fn extend(&mut self, other: InputSet) {
        self.classes.extend(other.classes);
        self.resources.extend(other.resources);
    }
}

/// Reads a jar/zip archive, a directory tree or a single `.class` file.
pub fn read_path(path: &Path) -> Result<InputSet> {
    if path.is_dir() {
        read_directory(path)
    } else if path.extension().is_some_and(|e| e == "class") {
        read_class_file(path)
    } else {
        read_archive(path)
    }
}

pub fn read_archive(archive_path: &Path) -> Result<InputSet> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    // SAFETY: The file is opened read-only and outlives the mapping.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to mmap archive: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("Failed to read zip structure: {}", archive_path.display()))?;

    let location = archive_path.to_string_lossy().to_string();
    let mut set = InputSet::default();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read {name} from {location}"))?;
        push_entry(&mut set, &location, name, bytes);
    }
    Ok(set)
}

pub fn read_directory(root: &Path) -> Result<InputSet> {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let location = root.to_string_lossy().to_string();
    let mut set = InputSet::default();
    for path in files {
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let bytes =
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        push_entry(&mut set, &location, relative, bytes);
    }
    Ok(set)
}

fn read_class_file(path: &Path) -> Result<InputSet> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = ClassFile::parse(&bytes)
        .with_context(|| format!("Failed to decode {}", path.display()))?
        .name()?
        .to_string();
    Ok(InputSet {
        classes: vec![ClassSource {
            name,
            location: path.to_string_lossy().to_string(),
            bytes,
        }],
        resources: Vec::new(),
    })
}

fn push_entry(set: &mut InputSet, location: &str, path: String, bytes: Vec<u8>) {
    match path.strip_suffix(".class") {
        Some(name) if !path.starts_with("META-INF/") => set.classes.push(ClassSource {
            name: name.to_string(),
            location: location.to_string(),
            bytes,
        }),
        _ => set.resources.push(Resource { path, bytes }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zip::write::FileOptions;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "jar_remapper_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    #[test]
    fn read_archive_splits_classes_and_resources() -> Result<()> {
        let jar = temp_path("input.jar");
        let file = File::create(&jar)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default();
        for (name, content) in [
            ("a/B.class", &b"cafe"[..]),
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
            ("META-INF/versions/9/a/B.class", b"x"),
            ("assets/logo.txt", b"logo"),
        ] {
            zip.start_file(name, options)?;
            zip.write_all(content)?;
        }
        zip.add_directory("empty/", options)?;
        zip.finish()?;

        let set = read_path(&jar)?;
        assert_eq!(set.classes.len(), 1);
        assert_eq!(set.classes[0].name, "a/B");
        assert_eq!(set.classes[0].bytes, b"cafe");
        let resources: Vec<_> = set.resources.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            resources,
            vec![
                "META-INF/MANIFEST.MF",
                "META-INF/versions/9/a/B.class",
                "assets/logo.txt"
            ]
        );
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn read_directory_uses_relative_paths_in_sorted_order() -> Result<()> {
        let root = temp_path("classes");
        std::fs::create_dir_all(root.join("z/y"))?;
        std::fs::create_dir_all(root.join("a"))?;
        std::fs::write(root.join("z/y/X.class"), b"1")?;
        std::fs::write(root.join("a/A.class"), b"2")?;
        std::fs::write(root.join("a/readme.txt"), b"3")?;

        let set = read_path(&root)?;
        let names: Vec<_> = set.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a/A", "z/y/X"]);
        assert_eq!(set.resources[0].path, "a/readme.txt");
        std::fs::remove_dir_all(root)?;
        Ok(())
    }
}
