use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, eyre};
use log::{debug, info, trace, warn};

use crate::models::job::JobRecord;

/// Ordered job records, unique by URL.
///
/// Records without a URL are kept in place so they survive a rewrite, but they
/// are never indexed and can't be upserted into.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<JobRecord>,
    index: HashMap<String, usize>,
    dirty: bool,
}

pub enum Upsert {
    Inserted(usize),
    Merged(usize),
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = JobRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Reads a JSON array of records. Duplicate URLs within the file are
    /// folded into their first occurrence.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read records from {}", path.display()))?;
        let records: Vec<JobRecord> = serde_json::from_str(&raw)
            .wrap_err_with(|| format!("failed to parse records in {}", path.display()))?;

        let total = records.len();
        let mut store = Self::from_records(records);
        store.dirty = false;

        if store.len() < total {
            warn!(
                "{} duplicate records folded while loading {}",
                total - store.len(),
                path.display()
            );
        }
        debug!("loaded {} records from {}", store.len(), path.display());

        Ok(store)
    }

    /// Builds the working set for a run: the previous output (if any) is the
    /// checkpoint, and the input records are upserted on top of it.
    pub fn open(input: &Path, output: &Path) -> Result<Self> {
        let incoming = Self::load(input)?;

        if input == output || !output.exists() {
            let mut store = incoming;
            store.dirty = input != output;
            return Ok(store);
        }

        let mut store = Self::load(output)?;
        let mut added = 0;
        for record in incoming.records {
            // url-less records were carried into the checkpoint when it was
            // first written and can't be matched again
            if !record.has_url() {
                trace!("record {:?} has no url, keeping the checkpoint copy", record.title);
                continue;
            }
            match store.upsert(record) {
                Upsert::Inserted(position) => {
                    added += 1;
                    trace!("new record at position {}", position);
                }
                Upsert::Merged(position) => trace!("merged into record at position {}", position),
            }
        }
        info!(
            "resuming from {} ({} records, {} new from {})",
            output.display(),
            store.len() - added,
            added,
            input.display()
        );

        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn get(&self, position: usize) -> Option<&JobRecord> {
        self.records.get(position)
    }

    #[cfg(test)]
    pub fn get_by_url(&self, url: &str) -> Option<&JobRecord> {
        self.index.get(url).map(|&i| &self.records[i])
    }

    /// Inserts the record if its URL is new, otherwise merges it into the
    /// stored one.
    pub fn upsert(&mut self, record: JobRecord) -> Upsert {
        if !record.has_url() {
            self.dirty = true;
            self.records.push(record);
            return Upsert::Inserted(self.records.len() - 1);
        }

        match self.index.get(&record.url) {
            Some(&i) => {
                let before = self.records[i].clone();
                self.records[i].merge_from(record);
                if self.records[i] != before {
                    self.dirty = true;
                }
                Upsert::Merged(i)
            }
            None => {
                self.dirty = true;
                let i = self.records.len();
                self.index.insert(record.url.clone(), i);
                self.records.push(record);
                Upsert::Inserted(i)
            }
        }
    }

    /// Writes the whole store as pretty JSON, replacing `path` atomically.
    ///
    /// The snapshot goes to a sibling temp file first and is renamed over the
    /// target, so a reader never sees a half-written file.
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = temp_path(path)?;
        write_synced(&tmp_path, json.as_bytes())
            .and_then(|_| fs::rename(&tmp_path, path))
            .inspect_err(|_| {
                let _ = fs::remove_file(&tmp_path);
            })
            .wrap_err_with(|| format!("failed to write records to {}", path.display()))?;

        self.dirty = false;
        debug!("persisted {} records to {}", self.len(), path.display());

        Ok(())
    }
}

/// Writes and flushes to disk before returning, so a rename never exposes
/// an empty file after a power loss.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| eyre!("output path {} has no file name", path.display()))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}
