//! Kernel binary provisioning and on-disk caching.
//!
//! Binaries are cached under `<cache_root>/kernels/<kernel>/<version>`; an
//! existing binary short-circuits with zero network access. Everything else
//! downloads the matching release asset into a staging directory, extracts it
//! into a freshly recreated cache directory, and never leaves a partially
//! populated cache entry behind.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use tar::Archive;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::errors::HarnessError;
use crate::manifest::{self, Asset, KernelInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
}

/// On-disk layout and archive format for one kernel family.
#[derive(Debug, Clone, Copy)]
pub struct KernelLayout {
    /// Binary location relative to the cache directory.
    pub binary_rel: &'static str,
    pub archive: ArchiveKind,
    /// Strip the single top-level directory the archive wraps its contents in.
    pub strip_prefix: bool,
}

pub fn layout_for(kernel_id: &str) -> Option<KernelLayout> {
    match kernel_id {
        "rs" => Some(KernelLayout {
            binary_rel: "compose-run",
            archive: ArchiveKind::TarGz,
            strip_prefix: false,
        }),
        "java" => Some(KernelLayout {
            binary_rel: "bin/compose-kernel-java",
            archive: ArchiveKind::Tar,
            strip_prefix: true,
        }),
        _ => None,
    }
}

/// Select the downloadable asset for a kernel family.
///
/// `rs` releases a single architecture-tagged tarball; `java` prefers the
/// shadow distribution tar and falls back to any plain tar.
pub fn select_asset<'a>(kernel_id: &str, assets: &'a [Asset]) -> Option<&'a Asset> {
    match kernel_id {
        "rs" => assets
            .iter()
            .find(|asset| asset.name.contains("linux-x86_64.tar.gz")),
        "java" => {
            let predicates: [fn(&str) -> bool; 2] = [
                |name| name.contains("-shadow-") && name.ends_with(".tar"),
                |name| name.ends_with(".tar"),
            ];
            for predicate in predicates {
                if let Some(asset) = assets.iter().find(|asset| predicate(&asset.name)) {
                    return Some(asset);
                }
            }
            None
        }
        _ => None,
    }
}

pub fn cache_dir(ctx: &RunContext, kernel_id: &str, version: &str) -> PathBuf {
    ctx.cache_root.join("kernels").join(kernel_id).join(version)
}

/// Guarantee a locally executable binary for `(kernel_id, version)`.
pub fn ensure_binary(
    ctx: &RunContext,
    client: &Client,
    kernel_id: &str,
    version: &str,
    info: &KernelInfo,
) -> Result<PathBuf> {
    let layout = layout_for(kernel_id).ok_or_else(|| HarnessError::UnsupportedKernel {
        kernel: kernel_id.to_string(),
    })?;
    let target_dir = cache_dir(ctx, kernel_id, version);
    let binary_path = target_dir.join(layout.binary_rel);

    if binary_path.is_file() {
        debug!(kernel = kernel_id, path = %binary_path.display(), "kernel binary cached");
        return Ok(binary_path);
    }

    let asset = select_asset(kernel_id, &info.assets).ok_or_else(|| {
        HarnessError::AssetNotFound {
            kernel: kernel_id.to_string(),
        }
    })?;
    let url = asset
        .download_url
        .as_deref()
        .ok_or_else(|| HarnessError::AssetNotFound {
            kernel: kernel_id.to_string(),
        })?;

    // Recreate the cache directory so a previous partial extraction cannot
    // masquerade as a complete entry.
    if target_dir.exists() {
        fs::remove_dir_all(&target_dir)
            .with_context(|| format!("clear cache dir {}", target_dir.display()))?;
    }
    fs::create_dir_all(&target_dir)
        .with_context(|| format!("create cache dir {}", target_dir.display()))?;

    info!(kernel = kernel_id, version, asset = %asset.name, "downloading kernel asset");
    let staging = TempDir::new().context("create staging dir")?;
    let archive_path = staging.path().join(&asset.name);
    if let Err(err) = manifest::download(client, url, &archive_path) {
        fs::remove_dir_all(&target_dir).ok();
        return Err(err);
    }

    if let Err(err) = extract_archive(&archive_path, &target_dir, layout) {
        fs::remove_dir_all(&target_dir).ok();
        return Err(err);
    }

    if !binary_path.is_file() {
        fs::remove_dir_all(&target_dir).ok();
        bail!(
            "asset {} did not contain expected binary {}",
            asset.name,
            layout.binary_rel
        );
    }

    mark_executable(&binary_path)?;
    Ok(binary_path)
}

fn extract_archive(archive_path: &Path, target_dir: &Path, layout: KernelLayout) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("open archive {}", archive_path.display()))?;
    match layout.archive {
        ArchiveKind::TarGz => unpack(Archive::new(GzDecoder::new(file)), target_dir, layout),
        ArchiveKind::Tar => unpack(Archive::new(file), target_dir, layout),
    }
}

fn unpack<R: Read>(mut archive: Archive<R>, target_dir: &Path, layout: KernelLayout) -> Result<()> {
    for entry in archive.entries().context("read archive entries")? {
        let mut entry = entry.context("read archive entry")?;
        let raw_path = entry.path().context("archive entry path")?.into_owned();
        let rel = if layout.strip_prefix {
            match strip_first_component(&raw_path) {
                Some(rel) => rel,
                None => continue,
            }
        } else {
            raw_path.clone()
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        entry
            .unpack(target_dir.join(&rel))
            .with_context(|| format!("unpack {}", raw_path.display()))?;
    }
    Ok(())
}

pub fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    components.next()?;
    let rest = components.as_path();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest.to_path_buf())
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).with_context(|| format!("chmod {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use tempfile::tempdir;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            download_url: Some(format!("https://example.test/{name}")),
        }
    }

    fn test_context(repo_root: &Path) -> RunContext {
        RunContext::new(repo_root, &HarnessConfig::default(), None)
    }

    #[test]
    fn rs_selects_architecture_tagged_tarball() {
        let assets = vec![
            asset("compose-run-darwin-arm64.tar.gz"),
            asset("compose-run-linux-x86_64.tar.gz"),
        ];
        let selected = select_asset("rs", &assets).expect("rs asset");
        assert_eq!(selected.name, "compose-run-linux-x86_64.tar.gz");
    }

    #[test]
    fn java_prefers_shadow_tar_then_any_tar() {
        let assets = vec![
            asset("compose-kernel-java-0.4.2.tar"),
            asset("compose-kernel-java-shadow-0.4.2.tar"),
        ];
        let selected = select_asset("java", &assets).expect("java asset");
        assert_eq!(selected.name, "compose-kernel-java-shadow-0.4.2.tar");

        let assets = vec![asset("compose-kernel-java-0.4.2.tar")];
        let selected = select_asset("java", &assets).expect("java fallback");
        assert_eq!(selected.name, "compose-kernel-java-0.4.2.tar");
    }

    #[test]
    fn no_matching_asset_yields_none() {
        let assets = vec![asset("compose-kernel-java-0.4.2.zip")];
        assert!(select_asset("java", &assets).is_none());
        assert!(select_asset("rs", &assets).is_none());
        assert!(select_asset("py", &assets).is_none());
    }

    #[test]
    fn strips_single_leading_component() {
        assert_eq!(
            strip_first_component(Path::new("top/bin/kernel")),
            Some(PathBuf::from("bin/kernel"))
        );
        assert_eq!(strip_first_component(Path::new("top")), None);
    }

    #[test]
    fn cached_binary_short_circuits_without_network() {
        let temp = tempdir().expect("tempdir");
        let ctx = test_context(temp.path());
        let target_dir = cache_dir(&ctx, "rs", "1.0.0");
        fs::create_dir_all(&target_dir).expect("cache dir");
        fs::write(target_dir.join("compose-run"), b"#!/bin/sh\n").expect("binary");

        // An empty asset list would otherwise fail with AssetNotFound, so a
        // successful return proves the cache hit never looked at the network.
        let info = KernelInfo { assets: Vec::new() };
        let client = Client::new();
        let path = ensure_binary(&ctx, &client, "rs", "1.0.0", &info).expect("cache hit");
        assert_eq!(path, target_dir.join("compose-run"));
    }

    #[test]
    fn asset_not_found_leaves_no_cache_entry() {
        let temp = tempdir().expect("tempdir");
        let ctx = test_context(temp.path());
        let info = KernelInfo { assets: Vec::new() };
        let client = Client::new();

        let err = ensure_binary(&ctx, &client, "rs", "1.0.0", &info).expect_err("no asset");
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::AssetNotFound { .. })
        ));
        assert!(!cache_dir(&ctx, "rs", "1.0.0").exists());
    }

    #[test]
    fn unsupported_kernel_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let ctx = test_context(temp.path());
        let info = KernelInfo { assets: Vec::new() };
        let client = Client::new();

        let err = ensure_binary(&ctx, &client, "py", "1.0.0", &info).expect_err("unsupported");
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::UnsupportedKernel { .. })
        ));
    }

    #[test]
    fn extracts_tar_with_stripped_prefix() {
        let temp = tempdir().expect("tempdir");
        let data = b"#!/bin/sh\nexit 0\n";

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                "compose-kernel-java-0.4.2/bin/compose-kernel-java",
                data.as_slice(),
            )
            .expect("append entry");
        let bytes = builder.into_inner().expect("finish tar");

        let archive_path = temp.path().join("kernel.tar");
        fs::write(&archive_path, bytes).expect("write archive");

        let target_dir = temp.path().join("out");
        fs::create_dir_all(&target_dir).expect("target dir");
        let layout = layout_for("java").expect("java layout");
        extract_archive(&archive_path, &target_dir, layout).expect("extract");

        assert!(target_dir.join("bin/compose-kernel-java").is_file());
    }
}
