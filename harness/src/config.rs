//! Optional `harness.toml` overrides.
//!
//! The file lives at the repo root and may override the release repository
//! slug, the default kernel list, and the subprocess timeout. Absence of the
//! file is not an error.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_RELEASE_REPO: &str = "compose-kernels/release";
pub const DEFAULT_KERNELS: &[&str] = &["rs", "java"];
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    /// GitHub `owner/repo` slug publishing the release manifests.
    pub release_repo: Option<String>,
    /// Kernels to test when none are given on the command line.
    pub kernels: Option<Vec<String>>,
    /// Subprocess timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl HarnessConfig {
    /// Load `harness.toml` from the repo root, falling back to defaults.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join("harness.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let config: HarnessConfig =
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validate {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(repo) = &self.release_repo {
            if repo.trim().is_empty() || !repo.contains('/') {
                bail!("release_repo must be an owner/repo slug");
            }
        }
        if let Some(kernels) = &self.kernels {
            if kernels.is_empty() || kernels.iter().any(|kernel| kernel.trim().is_empty()) {
                bail!("kernels must be a non-empty array of kernel ids");
            }
        }
        if self.timeout_secs == Some(0) {
            bail!("timeout_secs must be > 0");
        }
        Ok(())
    }

    pub fn release_repo(&self) -> String {
        self.release_repo
            .clone()
            .unwrap_or_else(|| DEFAULT_RELEASE_REPO.to_string())
    }

    pub fn kernels(&self) -> Vec<String> {
        self.kernels.clone().unwrap_or_else(|| {
            DEFAULT_KERNELS
                .iter()
                .map(|kernel| (*kernel).to_string())
                .collect()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = HarnessConfig::load(temp.path()).expect("load");
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.release_repo(), DEFAULT_RELEASE_REPO);
        assert_eq!(config.kernels(), vec!["rs", "java"]);
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn parses_overrides() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(
            temp.path().join("harness.toml"),
            "release_repo = \"acme/kernels\"\nkernels = [\"rs\"]\ntimeout_secs = 30\n",
        )
        .expect("write");
        let config = HarnessConfig::load(temp.path()).expect("load");
        assert_eq!(config.release_repo(), "acme/kernels");
        assert_eq!(config.kernels(), vec!["rs"]);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_zero_timeout() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join("harness.toml"), "timeout_secs = 0\n").expect("write");
        let err = HarnessConfig::load(temp.path()).expect_err("zero timeout");
        assert!(format!("{err:#}").contains("timeout_secs"));
    }

    #[test]
    fn rejects_malformed_release_repo() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join("harness.toml"), "release_repo = \"no-slash\"\n")
            .expect("write");
        let _err = HarnessConfig::load(temp.path()).expect_err("bad slug");
    }
}
