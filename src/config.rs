use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub chunking: Chunking,
    #[serde(default)]
    pub workers: Workers,
    #[serde(default)]
    pub retry: Retry,
    #[serde(default)]
    pub extraction: Extraction,
    #[serde(default)]
    pub splitter: Splitter,
    #[serde(default)]
    pub merge: Merge,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub jobs_dir: String,
    pub blobs_dir: String,
    pub scripts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            jobs_dir: ".quack-extract/jobs".into(),
            blobs_dir: ".quack-extract/blobs".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_input_file_bytes: u64,
    pub max_input_pages: u32,
    /// Wall-clock budget for one job, measured from the moment processing starts.
    pub job_timeout_seconds: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 500 * 1024 * 1024,
            max_input_pages: 5000,
            job_timeout_seconds: 40 * 60,
        }
    }
}

impl Limits {
    pub fn job_budget(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunking {
    pub pages_per_chunk: u32,
}
impl Default for Chunking {
    fn default() -> Self {
        Self { pages_per_chunk: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workers {
    pub max_parallel_chunks: usize,
}
impl Default for Workers {
    fn default() -> Self {
        Self {
            max_parallel_chunks: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retry {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before retry N is `backoff_seconds[N-1]`; the last entry repeats.
    pub backoff_seconds: Vec<u64>,
}
impl Default for Retry {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_seconds: vec![2, 4],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
impl Default for Extraction {
    fn default() -> Self {
        Self {
            program: "quack-extractor".into(),
            args: Vec::new(),
            timeout_seconds: 300,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Splitter {
    pub python_exe: String,
    pub timeout_seconds: u64,
}
impl Default for Splitter {
    fn default() -> Self {
        Self {
            python_exe: "python3".into(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merge {
    pub buckets: Vec<String>,
    pub nested_objects: Vec<String>,
    pub debug_key: String,
    pub page_field: String,
}
impl Default for Merge {
    fn default() -> Self {
        Self {
            buckets: vec![
                "work_items".into(),
                "nutrition_items".into(),
                "notes".into(),
            ],
            nested_objects: vec!["health".into(), "profile".into()],
            debug_key: "debug_pages".into(),
            page_field: "page".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalization {
    pub enabled: bool,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}
impl Default for Normalization {
    fn default() -> Self {
        Self {
            enabled: false,
            program: "quack-normalizer".into(),
            args: Vec::new(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub reject_url_inputs: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
        }
    }
}
