//! State-directory persistence for the operator CLI.
//!
//! Layout:
//!
//! ```text
//! <state>/envelopes.json          envelope rows
//! <state>/jobs.json               job rows
//! <state>/documents/<id>.pdf      source uploads
//! <state>/documents/<id>.sealed.pdf  sealed outputs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use sealflow_envelope::{Envelope, EnvelopeId};
use sealflow_jobs::Job;
use sealflow_sealing::{DocumentFileStore, StoreError};

const ENVELOPES_FILE: &str = "envelopes.json";
const JOBS_FILE: &str = "jobs.json";
const DOCUMENTS_DIR: &str = "documents";

pub fn load_envelopes(state_dir: &Path) -> Result<Vec<Envelope>> {
    let path = state_dir.join(ENVELOPES_FILE);
    let data = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub fn save_envelopes(state_dir: &Path, envelopes: &[Envelope]) -> Result<()> {
    let path = state_dir.join(ENVELOPES_FILE);
    let data = serde_json::to_string_pretty(envelopes)?;
    fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
}

/// Job rows; an absent file is an empty queue.
pub fn load_jobs(state_dir: &Path) -> Result<Vec<Job>> {
    let path = state_dir.join(JOBS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub fn save_jobs(state_dir: &Path, jobs: &[Job]) -> Result<()> {
    let path = state_dir.join(JOBS_FILE);
    let data = serde_json::to_string_pretty(jobs)?;
    fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
}

/// Document bytes on disk, one file per envelope.
#[derive(Debug)]
pub struct FsDocumentStore {
    documents_dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            documents_dir: state_dir.join(DOCUMENTS_DIR),
        }
    }

    fn source_path(&self, id: EnvelopeId) -> PathBuf {
        self.documents_dir.join(format!("{id}.pdf"))
    }

    fn sealed_path(&self, id: EnvelopeId) -> PathBuf {
        self.documents_dir.join(format!("{id}.sealed.pdf"))
    }
}

impl DocumentFileStore for FsDocumentStore {
    fn load_source(&self, id: EnvelopeId) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.source_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::FileNotFound(id))
            }
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    fn store_sealed(&self, id: EnvelopeId, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.documents_dir)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        fs::write(self.sealed_path(id), bytes).map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn load_sealed(&self, id: EnvelopeId) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.sealed_path(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }
}
