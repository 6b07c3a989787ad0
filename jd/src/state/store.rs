//! JobStore - whole-file JSON persistence for the registry
//!
//! The file is a JSON object keyed by job name. It is read once on open and
//! rewritten in full on every save.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::domain::Job;

/// In-memory registry mirrored to a JSON file
#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    jobs: BTreeMap<String, Job>,
}

impl JobStore {
    /// Open the store, starting empty if the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "JobStore::open: called");

        let jobs = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read registry file {}", path.display()))?;
            let jobs: BTreeMap<String, Job> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse registry file {}", path.display()))?;
            info!(count = jobs.len(), path = %path.display(), "Loaded job registry");
            jobs
        } else {
            debug!(?path, "JobStore::open: no registry file, starting empty");
            BTreeMap::new()
        };

        Ok(Self { path, jobs })
    }

    /// Rewrite the whole registry file
    ///
    /// Writes a sibling temp file and renames it over the registry.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create registry directory")?;
        }

        let content = serde_json::to_string_pretty(&self.jobs).context("Failed to serialize registry")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content).context("Failed to write registry temp file")?;
        fs::rename(&tmp_path, &self.path).context("Failed to replace registry file")?;

        debug!(count = self.jobs.len(), path = ?self.path, "JobStore::save: registry written");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.get_mut(name)
    }

    pub fn insert(&mut self, name: String, job: Job) -> Option<Job> {
        self.jobs.insert(name, job)
    }

    pub fn remove(&mut self, name: &str) -> Option<Job> {
        self.jobs.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<(String, Job)> {
        self.jobs.iter().map(|(name, job)| (name.clone(), job.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
