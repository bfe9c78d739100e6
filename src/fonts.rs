//! Font provisioning for runtimes without system fonts.
//!
//! Without these the embed renders CJK text, mathematical alphanumerics and
//! symbols as missing-glyph boxes while still "succeeding".

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};

use crate::{Error, Result};

/// A pinned font file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontAsset {
    pub file_name: String,
    pub url: String,
}

impl FontAsset {
    pub fn new(file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            url: url.into(),
        }
    }
}

/// CJK ideographs, mathematical alphanumerics, Latin and symbol blocks.
pub fn default_fonts() -> Vec<FontAsset> {
    vec![
        FontAsset::new(
            "NotoSansCJKjp-Regular.otf",
            "https://cdn.jsdelivr.net/gh/googlefonts/noto-cjk@165c01b46ea533872e002e0785ff17e44f6d97d8/Sans/OTF/Japanese/NotoSansCJKjp-Regular.otf",
        ),
        FontAsset::new(
            "NotoSansMath-Regular.ttf",
            "https://cdn.jsdelivr.net/gh/googlefonts/noto-fonts@736e6b8f886cae4664e78edb0880fbb5af7d50b7/hinted/ttf/NotoSansMath/NotoSansMath-Regular.ttf",
        ),
        FontAsset::new(
            "NotoSans-Regular.ttf",
            "https://cdn.jsdelivr.net/gh/googlefonts/noto-fonts@7697007fcb3563290d73f41f56a70d5d559d828c/hinted/ttf/NotoSans/NotoSans-Regular.ttf",
        ),
        FontAsset::new(
            "NotoSansSymbols2-Regular.ttf",
            "https://cdn.jsdelivr.net/gh/googlefonts/noto-fonts@736e6b8f886cae4664e78edb0880fbb5af7d50b7/hinted/ttf/NotoSansSymbols2/NotoSansSymbols2-Regular.ttf",
        ),
    ]
}

/// Download every font in `fonts` into `dir`, skipping files already there.
///
/// Each file is written under a temporary name and renamed into place, so a
/// concurrent provisioner never observes a partial file. Duplicate downloads
/// under a race are harmless.
pub async fn provision(client: &reqwest::Client, dir: &Path, fonts: &[FontAsset]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    for font in fonts {
        let target = dir.join(&font.file_name);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!("font {} already present", font.file_name);
            continue;
        }

        let response = client.get(&font.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::NetworkError(format!(
                "font {} returned {}",
                font.file_name,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;

        let partial = partial_path(&target);
        place(&partial, &target, &bytes).await?;
        info!("provisioned font {} ({} bytes)", font.file_name, bytes.len());
    }
    Ok(())
}

// Write under `partial` and move into place. A failed attempt leaves nothing
// behind in the shared directory.
async fn place(partial: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let written = match tokio::fs::write(partial, bytes).await {
        Ok(()) => tokio::fs::rename(partial, target).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(partial).await {
            debug!("could not remove {}: {}", partial.display(), cleanup);
        }
        return Err(e.into());
    }
    Ok(())
}

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

// Unique per process and per call, so concurrent writers never share a file.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".{}-{}.part", std::process::id(), seq));
    target.with_file_name(name)
}
