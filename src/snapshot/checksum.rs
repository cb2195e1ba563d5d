//! Snapshot checksum files.
//!
//! A checksum file sits next to its snapshot directory and holds one
//! `<sha256-hex> <file-name>` line per data file, sorted by file name.

use crate::core::error::{BraidError, BraidResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-file SHA-256 digests of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChecksum {
    files: BTreeMap<String, String>,
}

impl SnapshotChecksum {
    /// Digest every regular file in `dir`.
    pub fn compute(snapshot_id: &str, dir: &Path) -> BraidResult<Self> {
        let mut files = BTreeMap::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| BraidError::invalid_snapshot(snapshot_id, e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| BraidError::invalid_snapshot(snapshot_id, e.to_string()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let bytes = std::fs::read(&path)
                .map_err(|e| BraidError::invalid_snapshot(snapshot_id, e.to_string()))?;
            files.insert(name.to_string(), digest_hex(&bytes));
        }
        if files.is_empty() {
            return Err(BraidError::invalid_snapshot(snapshot_id, "snapshot has no files"));
        }
        Ok(Self { files })
    }

    pub fn parse(snapshot_id: &str, text: &str) -> BraidResult<Self> {
        let mut files = BTreeMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let Some((digest, name)) = line.trim().split_once(' ') else {
                return Err(BraidError::invalid_snapshot(
                    snapshot_id,
                    format!("malformed checksum line '{}'", line),
                ));
            };
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(BraidError::invalid_snapshot(
                    snapshot_id,
                    format!("malformed digest for {}", name),
                ));
            }
            files.insert(name.to_string(), digest.to_ascii_lowercase());
        }
        if files.is_empty() {
            return Err(BraidError::invalid_snapshot(snapshot_id, "empty checksum file"));
        }
        Ok(Self { files })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, digest) in &self.files {
            out.push_str(digest);
            out.push(' ');
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// One digest over all file digests; identifies the snapshot contents.
    pub fn combined(&self) -> String {
        digest_hex(self.render().as_bytes())
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn digest_of(&self, file_name: &str) -> Option<&str> {
        self.files.get(file_name).map(String::as_str)
    }

    /// Recompute the digests of `dir` and compare.
    pub fn verify(&self, snapshot_id: &str, dir: &Path) -> BraidResult<()> {
        let actual = Self::compute(snapshot_id, dir)?;
        for (name, expected) in &self.files {
            match actual.files.get(name) {
                Some(found) if found == expected => {}
                Some(_) => {
                    return Err(BraidError::invalid_snapshot(
                        snapshot_id,
                        format!("checksum mismatch for {}", name),
                    ))
                }
                None => {
                    return Err(BraidError::invalid_snapshot(
                        snapshot_id,
                        format!("missing file {}", name),
                    ))
                }
            }
        }
        if let Some(extra) = actual.files.keys().find(|n| !self.files.contains_key(*n)) {
            return Err(BraidError::invalid_snapshot(
                snapshot_id,
                format!("unexpected file {}", extra),
            ));
        }
        Ok(())
    }
}

pub(crate) fn digest_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        encoded.push_str(&format!("{:02x}", byte));
    }
    encoded
}
