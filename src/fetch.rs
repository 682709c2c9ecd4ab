//! Downloading and unpacking source tarballs.

use std::fs;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use futures_util::StreamExt as _;
use reqwest::header::USER_AGENT;
use reqwest::Client;

use crate::error::{AppError, Result};

const AGENT: &str = concat!("old-provisioner/", env!("CARGO_PKG_VERSION"));

/// Stream `url` into `dest`, creating parent directories as needed.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    log::info!("Downloading {} to {}", url, dest.display());
    let resp = client
        .get(url)
        .header(USER_AGENT, AGENT)
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::network_with_url(url, format!("HTTP {status}")));
    }

    let mut out = fs::File::create(dest)?;
    let mut body = resp.bytes_stream();
    while let Some(bytes) = body.next().await {
        out.write_all(&bytes.map_err(|e| AppError::network_with_url(url, e.to_string()))?)?;
    }

    Ok(())
}

/// Convert an archive entry path to a relative path, rejecting absolute,
/// empty and `..` paths.
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(relative)
}

fn validate_link_target(target: &Path, raw_path: &str) -> Result<()> {
    let escapes = target.is_absolute()
        || target
            .components()
            .any(|component| matches!(component, Component::Prefix(_) | Component::ParentDir));
    if target.as_os_str().is_empty() || escapes {
        return Err(AppError::io(format!("link {raw_path:?} points outside the archive")));
    }
    Ok(())
}

/// Unpack a `.tar.gz` into `dest_dir` and return the archive's top-level
/// directory (for a GNU release tarball, `<package>-<version>/`).
pub fn unpack_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(fs::File::open(archive_path)?));
    let mut top_dir: Option<PathBuf> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.to_string_lossy().into_owned();
        let relative = parse_entry_rel_path(&raw_path)
            .ok_or_else(|| AppError::io(format!("refusing archive entry {raw_path:?}")))?;

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let target = entry
                .link_name()?
                .ok_or_else(|| AppError::io(format!("link {raw_path:?} has no target")))?;
            validate_link_target(&target, &raw_path)?;
        }

        if top_dir.is_none() {
            top_dir = relative
                .components()
                .next()
                .map(|first| dest_dir.join(first.as_os_str()));
        }

        let unpacked = entry
            .unpack_in(dest_dir)
            .map_err(|e| AppError::io(format!("Failed to unpack {raw_path:?}: {e}")))?;
        if !unpacked {
            return Err(AppError::io(format!("{raw_path:?} escapes {}", dest_dir.display())));
        }
    }

    top_dir.ok_or_else(|| AppError::io(format!("{} is empty", archive_path.display())))
}
