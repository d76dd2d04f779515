use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LEDGER_FILE_NAME: &str = "downloaded_hashes.txt";

/// Dedup key for an image: Sha256 over its normalized source URL, lowercase hex.
pub fn content_address(source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hex::encode(hasher.finalize())
}

pub trait LedgerStore {
    fn load(&mut self) -> Result<Vec<String>>;
    fn append(&mut self, digest: &str) -> Result<()>;
}

/// One digest per line, append-only, no header.
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(LEDGER_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&mut self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(raw
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn append(&mut self, digest: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(digest.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    pub lines: Vec<String>,
}

impl MemoryLedgerStore {
    pub fn with_digests(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&mut self) -> Result<Vec<String>> {
        Ok(self.lines.clone())
    }

    fn append(&mut self, digest: &str) -> Result<()> {
        self.lines.push(digest.to_string());
        Ok(())
    }
}

pub struct Ledger<S: LedgerStore> {
    seen: HashSet<String>,
    store: S,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn open(mut store: S) -> Result<Self> {
        let seen = store.load()?.into_iter().collect();
        Ok(Self { seen, store })
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.seen.contains(digest)
    }

    /// Appends to the backing store only for digests not already recorded.
    pub fn record(&mut self, digest: &str) -> Result<()> {
        if self.seen.insert(digest.to_string()) {
            self.store.append(digest)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
