use super::{PageSplitter, process::run_checked, types::ProbeOut};
use crate::{chunk_plan::PageRange, config::Config};
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Page counting and slicing through the bundled pypdf helper scripts.
pub struct PythonSplitter {
    scripts_dir: PathBuf,
    python_exe: PathBuf,
    timeout: Duration,
}

impl PythonSplitter {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        for script in ["pdf_probe.py", "pdf_split.py"] {
            let path = scripts_dir.join(script);
            if !path.exists() {
                return Err(anyhow!("missing script: {}", path.display()));
            }
        }
        Ok(Self {
            scripts_dir,
            python_exe: resolve_python_exe(&cfg.splitter.python_exe),
            timeout: Duration::from_secs(cfg.splitter.timeout_seconds.max(1)),
        })
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(self.scripts_dir.join(script));
        cmd
    }
}

impl PageSplitter for PythonSplitter {
    fn page_count(&self, document: &[u8]) -> Result<u32> {
        let stdout = run_checked(self.command("pdf_probe.py"), document, Some(self.timeout))?;
        let out: ProbeOut =
            serde_json::from_slice(&stdout).with_context(|| "parsing pdf_probe output")?;
        if let Some(err) = out.error.as_deref() {
            return Err(anyhow!("pdf_probe error: {err}"));
        }
        Ok(out.page_count)
    }

    fn slice(&self, document: &[u8], range: PageRange) -> Result<Vec<u8>> {
        debug!("slice pages {}-{}", range.start_page, range.end_page);
        let mut cmd = self.command("pdf_split.py");
        cmd.arg(range.start_page.to_string());
        cmd.arg(range.end_page.to_string());
        let bytes = run_checked(cmd, document, Some(self.timeout))?;
        if bytes.is_empty() {
            return Err(anyhow!(
                "pdf_split returned no bytes for pages {}-{}",
                range.start_page,
                range.end_page
            ));
        }
        Ok(bytes)
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("QUACK_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}
