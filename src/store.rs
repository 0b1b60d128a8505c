//! Keyed persistence for job records and source documents.

use crate::{
    job::Job,
    util::{ensure_dir, lock},
};
use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static key regex"));

/// Rejects keys that could escape the store directory.
pub fn validate_key(key: &str) -> Result<()> {
    if key.len() > 200 || !KEY_RE.is_match(key) {
        bail!("invalid store key: {key:?}");
    }
    Ok(())
}

pub trait JobStore: Send + Sync {
    fn create(&self, job: &Job) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Job>>;
    /// Applies `apply` to the stored record and persists it as one write.
    /// Nothing is written when `apply` fails.
    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut Job) -> Result<()>) -> Result<Job>;
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: &Job) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            bail!("job `{}` already exists", job.id);
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(lock(&self.jobs).get(id).cloned())
    }

    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut Job) -> Result<()>) -> Result<Job> {
        let mut jobs = lock(&self.jobs);
        let current = jobs
            .get(id)
            .ok_or_else(|| anyhow!("job `{id}` not found"))?;
        let mut next = current.clone();
        apply(&mut next)?;
        jobs.insert(id.to_string(), next.clone());
        Ok(next)
    }
}

/// One pretty-printed JSON file per job, replaced atomically on each write.
pub struct FileJobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    pub fn open(dir: &Path) -> Result<Self> {
        ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_key(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn read(&self, path: &Path) -> Result<Option<Job>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let job = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing job record {}", path.display()))?;
        Ok(Some(job))
    }

    fn write(&self, path: &Path, job: &Job) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(job)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))
    }
}

impl JobStore for FileJobStore {
    fn create(&self, job: &Job) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let path = self.path_for(&job.id)?;
        if path.exists() {
            bail!("job `{}` already exists", job.id);
        }
        self.write(&path, job)
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        let path = self.path_for(id)?;
        self.read(&path)
    }

    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut Job) -> Result<()>) -> Result<Job> {
        let _guard = lock(&self.write_lock);
        let path = self.path_for(id)?;
        let mut job = self
            .read(&path)?
            .ok_or_else(|| anyhow!("job `{id}` not found"))?;
        apply(&mut job)?;
        self.write(&path, &job)?;
        Ok(job)
    }
}

pub trait BlobStore: Send + Sync {
    fn upload(&self, bytes: &[u8], key: &str) -> Result<String>;
    fn download(&self, key: &str) -> Result<Vec<u8>>;
}

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn open(root: &Path) -> Result<Self> {
        ensure_dir(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

impl BlobStore for LocalBlobStore {
    fn upload(&self, bytes: &[u8], key: &str) -> Result<String> {
        validate_key(key)?;
        let path = self.root.join(key);
        std::fs::write(&path, bytes).with_context(|| format!("writing blob {}", path.display()))?;
        Ok(key.to_string())
    }

    fn download(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let path = self.root.join(key);
        std::fs::read(&path).with_context(|| format!("reading blob {}", path.display()))
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload(&self, bytes: &[u8], key: &str) -> Result<String> {
        validate_key(key)?;
        lock(&self.blobs).insert(key.to_string(), bytes.to_vec());
        Ok(key.to_string())
    }

    fn download(&self, key: &str) -> Result<Vec<u8>> {
        lock(&self.blobs)
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("blob `{key}` not found"))
    }
}
