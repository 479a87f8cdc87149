//! Yandex Disk public-resource helpers.
//!
//! Public share links (`yadi.sk/...`, `disk.yandex.*/d/...`) are not directly
//! downloadable; the public resources API answers with a JSON `href` that is.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

use crate::Fetcher;

pub const PUBLIC_API: &str = "https://cloud-api.yandex.net/v1/disk/public/resources";

#[derive(Debug, Deserialize)]
struct DownloadMeta {
    href: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceItem {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    #[serde(default)]
    items: Vec<ResourceItem>,
}

pub fn is_public_link(url: &str) -> bool {
    url.contains("yadi.sk") || url.contains("disk.yandex")
}

pub fn is_api_url(url: &str) -> bool {
    url.contains("cloud-api.yandex.net")
}

/// Rewrites a public share link into the API download endpoint; other URLs
/// pass through unchanged.
pub fn normalize_public_url(url: &str) -> String {
    if is_public_link(url) {
        download_meta_url(url, "")
    } else {
        url.to_string()
    }
}

pub fn download_meta_url(public_link: &str, path: &str) -> String {
    let mut u = format!("{}/download?public_key={}", PUBLIC_API, urlencoding::encode(public_link));
    if !path.is_empty() {
        u.push_str("&path=");
        u.push_str(&urlencoding::encode(path));
    }
    u
}

pub fn listing_url(public_link: &str, path: &str) -> String {
    let mut u = format!("{}?public_key={}", PUBLIC_API, urlencoding::encode(public_link));
    if !path.is_empty() {
        u.push_str("&path=");
        u.push_str(&urlencoding::encode(path));
    }
    u.push_str("&limit=1000");
    u
}

/// Resolves an API download URL to the direct `href`. Plain URLs are returned as is.
pub async fn resolve_download(fetcher: &Fetcher, url: &str) -> Result<String> {
    if !is_api_url(url) {
        return Ok(url.to_string());
    }
    let meta: DownloadMeta = fetcher.get_json(url).await.context("query download href")?;
    meta.href.context("disk api did not return a download href")
}

pub async fn list_dir(fetcher: &Fetcher, public_link: &str, path: &str) -> Result<Vec<ResourceItem>> {
    let listing: Listing = fetcher.get_json(&listing_url(public_link, path)).await?;
    Ok(listing.embedded.map(|e| e.items).unwrap_or_default())
}

/// Mirrors a public folder (or a single public file) under `dest`.
/// Returns the number of files written.
pub async fn download_public(fetcher: &Fetcher, public_link: &str, remote_path: &str, dest: &Path) -> Result<usize> {
    match list_dir(fetcher, public_link, remote_path).await {
        Ok(items) if !items.is_empty() => return download_tree(fetcher, public_link, items, dest).await,
        Ok(_) => {}
        Err(e) => warn!("yadisk: listing failed, trying single file: {:#}", e),
    }

    let href = resolve_download(fetcher, &download_meta_url(public_link, remote_path)).await?;
    let name = Path::new(remote_path)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download.bin".into());
    let dst = dest.join(name);
    info!("yadisk: downloading {} -> {}", if remote_path.is_empty() { public_link } else { remote_path }, dst.display());
    fetcher.download_to(&href, &dst).await?;
    Ok(1)
}

/// A listing entry name usable as one path component under the
/// destination: no separators, no `.`/`..`, not absolute.
fn local_name(name: &str) -> Option<&str> {
    if name.contains(['/', '\\']) {
        return None;
    }
    let mut comps = Path::new(name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Some(name),
        _ => None,
    }
}

async fn download_tree(fetcher: &Fetcher, public_link: &str, items: Vec<ResourceItem>, dest: &Path) -> Result<usize> {
    let mut pending: Vec<(ResourceItem, PathBuf)> = items.into_iter().map(|i| (i, dest.to_path_buf())).collect();
    let mut written = 0usize;

    while let Some((item, dir)) = pending.pop() {
        let (Some(raw_name), Some(path)) = (item.name.as_deref(), item.path.as_deref()) else { continue };
        let Some(name) = local_name(raw_name) else {
            warn!("yadisk: skipping {}: unsafe entry name {:?}", path, raw_name);
            continue;
        };
        if item.kind.as_deref() == Some("dir") {
            let sub = dir.join(name);
            for child in list_dir(fetcher, public_link, path).await? {
                pending.push((child, sub.clone()));
            }
            continue;
        }
        let href = resolve_download(fetcher, &download_meta_url(public_link, path)).await?;
        let dst = dir.join(name);
        info!("yadisk: downloading {} -> {}", path, dst.display());
        fetcher.download_to(&href, &dst).await?;
        written += 1;
    }
    Ok(written)
}
