//! Output collaborators: the entry set, `META-INF` handling and the sinks
//! that write a jar or a directory tree.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::applier::OutputClass;
use crate::config::NonClassCopyMode;
use crate::input::Resource;
use crate::rewrite::Remapper;

const MANIFEST: &str = "META-INF/MANIFEST.MF";
const SERVICES: &str = "META-INF/services/";
const SIGNATURE_SUFFIXES: &[&str] = &[".SF", ".RSA", ".DSA", ".EC"];
const MANIFEST_LINE_LIMIT: usize = 72;
/// Main-section attributes whose value is a class name.
const CLASS_ATTRIBUTES: &[&str] = &["Main-Class", "Launcher-Agent-Class", "Premain-Class", "Agent-Class"];

/// Every output entry by path. Paths are unique; iteration is sorted.
#[derive(Debug, Default)]
pub struct OutputSet {
    entries: BTreeMap<String, Vec<u8>>,
}

impl OutputSet {
    pub fn insert(&mut self, path: String, bytes: Vec<u8>) -> Result<()> {
        if self.entries.contains_key(&path) {
            bail!("duplicate output entry {path}");
        }
        self.entries.insert(path, bytes);
        Ok(())
    }

    pub fn add_classes(&mut self, classes: Vec<OutputClass>) -> Result<()> {
        for class in classes {
            let path = class.path();
            self.insert(path, class.bytes)?;
        }
        Ok(())
    }

    /// Adds the non-class entries of the input, adjusted per `mode`.
    pub fn add_resources<R: Remapper + ?Sized>(
        &mut self,
        resources: Vec<Resource>,
        mode: NonClassCopyMode,
        remapper: &R,
    ) -> Result<()> {
        for resource in resources {
            if let Some((path, bytes)) = copy_resource(resource, mode, remapper) {
                self.insert(path, bytes)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(p, b)| (p.as_str(), b.as_slice()))
    }
}

fn copy_resource<R: Remapper + ?Sized>(
    resource: Resource,
    mode: NonClassCopyMode,
    remapper: &R,
) -> Option<(String, Vec<u8>)> {
    let Resource { path, bytes } = resource;
    let in_meta = path.starts_with("META-INF/");
    match mode {
        NonClassCopyMode::Unchanged => Some((path, bytes)),
        NonClassCopyMode::Skipmeta if in_meta => None,
        NonClassCopyMode::Skipmeta => Some((path, bytes)),
        NonClassCopyMode::Fixmeta => {
            if !in_meta {
                return Some((path, bytes));
            }
            if is_signature_file(&path) {
                tracing::debug!(entry = %path, "dropping signature file");
                return None;
            }
            if path == MANIFEST {
                return Some((path, fix_manifest(&bytes, remapper)));
            }
            if let Some(service) = path.strip_prefix(SERVICES)
                && !service.is_empty()
                && !service.contains('/')
            {
                let renamed = format!("{SERVICES}{}", map_binary_name(remapper, service));
                return Some((renamed, fix_service_file(&bytes, remapper)));
            }
            Some((path, bytes))
        }
    }
}

fn is_signature_file(path: &str) -> bool {
    let Some(name) = path.strip_prefix("META-INF/") else {
        return false;
    };
    !name.contains('/')
        && SIGNATURE_SUFFIXES
            .iter()
            .any(|suffix| name.to_ascii_uppercase().ends_with(suffix))
}

/// Remaps a dotted binary name (`a.b.C$D`).
fn map_binary_name<R: Remapper + ?Sized>(remapper: &R, dotted: &str) -> String {
    let internal = dotted.replace('.', "/");
    match remapper.map_class(&internal) {
        Some(mapped) => mapped.replace('/', "."),
        None => dotted.to_string(),
    }
}

fn fix_service_file<R: Remapper + ?Sized>(bytes: &[u8], remapper: &R) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return bytes.to_vec();
    };
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];
        let (entry, comment) = match body.find('#') {
            Some(at) => body.split_at(at),
            None => (body, ""),
        };
        let name = entry.trim();
        if name.is_empty() {
            out.push_str(line);
            continue;
        }
        let start = entry.len() - entry.trim_start().len();
        out.push_str(&entry[..start]);
        out.push_str(&map_binary_name(remapper, name));
        out.push_str(&entry[start + name.len()..]);
        out.push_str(comment);
        out.push_str(ending);
    }
    out.into_bytes()
}

/// Drops digest attributes (and sections left empty by that) and remaps the
/// main-section class attributes.
pub fn fix_manifest<R: Remapper + ?Sized>(bytes: &[u8], remapper: &R) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return bytes.to_vec();
    };

    let mut sections: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for line in text.lines() {
        if line.is_empty() {
            if sections.last().is_some_and(|s| !s.is_empty()) {
                sections.push(Vec::new());
            }
            continue;
        }
        let current = sections.len() - 1;
        if let Some(continued) = line.strip_prefix(' ') {
            if let Some((_, value)) = sections[current].last_mut() {
                value.push_str(continued);
            }
            continue;
        }
        let (name, value) = line.split_once(':').unwrap_or((line, ""));
        sections[current].push((name.to_string(), value.trim_start().to_string()));
    }

    let mut out = String::with_capacity(text.len());
    for (index, section) in sections.into_iter().enumerate() {
        let section: Vec<(String, String)> = if index == 0 {
            section
                .into_iter()
                .map(|(name, value)| {
                    if CLASS_ATTRIBUTES.iter().any(|a| name.eq_ignore_ascii_case(a)) {
                        let value = map_binary_name(remapper, &value);
                        (name, value)
                    } else {
                        (name, value)
                    }
                })
                .collect()
        } else {
            let kept: Vec<(String, String)> = section
                .into_iter()
                .filter(|(name, _)| !name.to_ascii_lowercase().ends_with("-digest"))
                .collect();
            if kept.iter().all(|(name, _)| name.eq_ignore_ascii_case("Name")) {
                continue;
            }
            kept
        };
        if section.is_empty() {
            continue;
        }
        for (name, value) in section {
            write_manifest_line(&mut out, &format!("{name}: {value}"));
        }
        out.push_str("\r\n");
    }
    out.into_bytes()
}

fn write_manifest_line(out: &mut String, line: &str) {
    let mut rest = line;
    let mut limit = MANIFEST_LINE_LIMIT;
    let mut first = true;
    while !rest.is_empty() {
        let mut cut = rest.len().min(limit);
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if !first {
            out.push(' ');
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n");
        rest = &rest[cut..];
        limit = MANIFEST_LINE_LIMIT - 1;
        first = false;
    }
}

pub trait OutputSink {
    fn write_entries(&mut self, entries: &OutputSet) -> Result<()>;
}

/// Writes a jar with entries in path order and a fixed timestamp, so equal
/// entry sets give equal archives.
pub struct JarSink {
    path: PathBuf,
}

impl JarSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputSink for JarSink {
    fn write_entries(&mut self, entries: &OutputSet) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default());

        for (path, bytes) in entries.iter() {
            zip.start_file(path, options)
                .with_context(|| format!("Failed to add {path} to {}", self.path.display()))?;
            zip.write_all(bytes)
                .with_context(|| format!("Failed to write {path} to {}", self.path.display()))?;
        }
        zip.finish()
            .with_context(|| format!("Failed to finish {}", self.path.display()))?;
        Ok(())
    }
}

/// Writes every entry as a file below a root directory.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl OutputSink for DirectorySink {
    fn write_entries(&mut self, entries: &OutputSet) -> Result<()> {
        for (path, bytes) in entries.iter() {
            if path.split('/').any(|part| part == "..") {
                bail!("refusing to write entry outside the output directory: {path}");
            }
            let target = self.root.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&target, bytes)
                .with_context(|| format!("Failed to write {}", target.display()))?;
        }
        Ok(())
    }
}

/// A jar sink for `.jar`/`.zip` paths, a directory sink otherwise.
pub fn sink_for(path: &Path) -> Box<dyn OutputSink> {
    let is_archive = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jar") || e.eq_ignore_ascii_case("zip"));
    if is_archive {
        Box::new(JarSink::new(path))
    } else {
        Box::new(DirectorySink::new(path))
    }
}
