//! Release manifest resolution.
//!
//! One fetch per run: either the manifest published under an exact version
//! tag, or the one attached to the latest release. Transport failures are
//! fatal and not retried.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::errors::HarnessError;

pub const USER_AGENT: &str = "compose-harness/0.1";
const MANIFEST_ASSET_NAME: &str = "release-manifest.json";

/// Per-kernel artifact listing for one published release.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseManifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kernels: BTreeMap<String, KernelInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KernelInfo {
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(default)]
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: Option<String>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    #[serde(default)]
    browser_download_url: Option<String>,
}

/// Fetch the release manifest for the selected version, or for the latest
/// published release when no selector is given.
pub fn resolve(
    client: &Client,
    release_repo: &str,
    version_override: Option<&str>,
) -> Result<ReleaseManifest> {
    if let Some(version) = version_override {
        let tag = if version.starts_with('v') {
            version.to_string()
        } else {
            format!("v{version}")
        };
        let url = format!(
            "https://github.com/{release_repo}/releases/download/{tag}/{MANIFEST_ASSET_NAME}"
        );
        let mut manifest: ReleaseManifest = fetch_json(client, &url)?;
        manifest.version = version.trim_start_matches('v').to_string();
        return Ok(manifest);
    }

    let url = format!("https://api.github.com/repos/{release_repo}/releases/latest");
    let latest: LatestRelease = fetch_json(client, &url)?;
    let manifest_url = manifest_asset_url(&latest).ok_or(HarnessError::ManifestNotFound)?;
    debug!(url = %manifest_url, "fetching release manifest");
    let mut manifest: ReleaseManifest = fetch_json(client, &manifest_url)?;
    // The manifest's own version wins; the tag name is only a fallback.
    if manifest.version.is_empty() {
        manifest.version = fallback_version(latest.tag_name.as_deref());
    }
    Ok(manifest)
}

/// Download a release asset into `dest`.
pub fn download(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .map_err(|err| network_error(url, &err.to_string()))?;
    if !response.status().is_success() {
        return Err(network_error(url, &format!("HTTP {}", response.status())).into());
    }
    let bytes = response
        .bytes()
        .map_err(|err| network_error(url, &err.to_string()))?;
    std::fs::write(dest, &bytes).with_context(|| format!("write {}", dest.display()))?;
    Ok(())
}

fn fetch_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .map_err(|err| network_error(url, &err.to_string()))?;
    if !response.status().is_success() {
        return Err(network_error(url, &format!("HTTP {}", response.status())).into());
    }
    let value = response
        .json()
        .map_err(|err| network_error(url, &err.to_string()))?;
    Ok(value)
}

fn network_error(url: &str, reason: &str) -> HarnessError {
    HarnessError::Network {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

fn manifest_asset_url(latest: &LatestRelease) -> Option<String> {
    latest
        .assets
        .iter()
        .find(|asset| asset.name == MANIFEST_ASSET_NAME)
        .and_then(|asset| asset.browser_download_url.clone())
}

fn fallback_version(tag_name: Option<&str>) -> String {
    tag_name.map_or_else(
        || "unknown".to_string(),
        |tag| tag.trim_start_matches('v').to_string(),
    )
}
