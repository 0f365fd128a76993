use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Warning;
use crate::output::OutputSet;
use crate::pipeline::RunStats;

/// What the binary prints on stdout after a successful run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub input: String,
    pub output: String,
    pub mappings: String,
    pub mappings_digest: String,
    pub from: String,
    pub to: String,
    pub classes: usize,
    pub resources: usize,
    pub entries: usize,
    pub digest: String,
    #[serde(flatten)]
    pub stats: RunStats,
    pub warnings: Vec<Warning>,
}

/// SHA-256 over every entry in path order, hex encoded. Two runs produced the
/// same output exactly when their digests match.
pub fn digest_entries(entries: &OutputSet) -> String {
    let mut hasher = Sha256::new();
    for (path, bytes) in entries.iter() {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}

pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
