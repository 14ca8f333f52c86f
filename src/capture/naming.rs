//! Artifact paths and the sink that persists them
//!
//! Paths are a pure function of (product title, variant label, stage name),
//! so re-running a capture overwrites the same files instead of adding new ones.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

static NON_ALNUM_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex"));
static NON_TITLE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9 ]+").expect("valid regex"));
static NON_SEGMENT_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9 _-]+").expect("valid regex"));
static NON_LABEL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]+").expect("valid regex"));
static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").expect("valid regex"));

const UNTITLED: &str = "Untitled";

/// Alphanumeric-and-space folder name; other characters are dropped.
pub fn sanitize_title(title: &str) -> String {
    let stripped = NON_TITLE_CHARS.replace_all(title, "");
    let collapsed = SPACE_RUN.replace_all(stripped.trim(), " ");
    if collapsed.is_empty() {
        UNTITLED.to_string()
    } else {
        collapsed.into_owned()
    }
}

/// Runs of non-alphanumerics collapse to one underscore, trimmed at both ends.
pub fn sanitize_label(raw: &str) -> String {
    NON_ALNUM_RUN
        .replace_all(raw, "_")
        .trim_matches('_')
        .to_string()
}

/// Site and stage names keep spaces, hyphens and underscores.
fn sanitize_segment(segment: &str) -> String {
    NON_SEGMENT_CHARS
        .replace_all(segment, "")
        .trim()
        .to_string()
}

/// Lossless spelling of a raw value: alphanumerics kept, every other
/// character written as `_xHH_` with its code point in hex.
fn escape_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else {
            out.push_str(&format!("_x{:X}_", ch as u32));
        }
    }
    out
}

/// Derives one label per raw value, unique within the slice.
///
/// The collapsed form is used when it is free; a later value whose collapsed
/// form is taken (or empty) keeps its full raw spelling via [`escape_label`].
pub fn unique_labels<S: AsRef<str>>(raw_values: &[S]) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut labels = Vec::with_capacity(raw_values.len());

    for raw in raw_values {
        let raw = raw.as_ref();
        let collapsed = sanitize_label(raw);
        let mut label = if collapsed.is_empty() || taken.contains(&collapsed) {
            escape_label(raw)
        } else {
            collapsed
        };

        // Only reachable for identical raw values
        let base = label.clone();
        let mut n = 2;
        while taken.contains(&label) {
            label = format!("{}_{}", base, n);
            n += 1;
        }

        taken.insert(label.clone());
        labels.push(label);
    }
    labels
}

/// Maps (title, variant, stage) onto `{base}/{title}/{stage}_{variant}.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNamer {
    base: PathBuf,
}

impl ArtifactNamer {
    /// Namer for `{output_root}/{site_name}`.
    pub fn new(output_root: impl AsRef<Path>, site_name: &str) -> Self {
        Self {
            base: output_root.as_ref().join(sanitize_segment(site_name)),
        }
    }

    /// Namer rooted at an already site-specific directory.
    pub fn rooted(site_dir: impl Into<PathBuf>) -> Self {
        Self {
            base: site_dir.into(),
        }
    }

    pub fn site_dir(&self) -> &Path {
        &self.base
    }

    pub fn product_dir(&self, product_title: &str) -> PathBuf {
        self.base.join(sanitize_title(product_title))
    }

    pub fn path(&self, product_title: &str, variant_label: &str, stage_name: &str) -> PathBuf {
        let file = format!(
            "{}_{}.png",
            sanitize_segment(stage_name),
            NON_LABEL_CHARS.replace_all(variant_label, "_")
        );
        self.product_dir(product_title).join(file)
    }
}

/// Persists artifact bytes. Injected so the capture flow never touches the
/// filesystem directly.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Writes (or overwrites) the artifact at `path`.
    async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()>;
}

/// Writes artifacts to disk, creating parent directories as needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsArtifactSink;

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await
    }
}

/// Keeps artifacts in memory; a path can be made to fail for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    writes: Mutex<Vec<PathBuf>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any write whose path contains `fragment` fails with a permission error.
    pub fn fail_paths_containing(&self, fragment: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(fragment.into());
        }
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().ok()?.get(path).cloned()
    }

    /// Distinct stored paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Every successful write in order, including overwrites.
    pub fn write_log(&self) -> Vec<PathBuf> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let path_str = path.to_string_lossy();
        let should_fail = self
            .failing
            .lock()
            .map(|failing| failing.iter().any(|f| path_str.contains(f.as_str())))
            .unwrap_or(false);
        if should_fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("write to {} refused", path_str),
            ));
        }

        let mut files = self
            .files
            .lock()
            .map_err(|_| std::io::Error::other("artifact store poisoned"))?;
        files.insert(path.to_path_buf(), bytes.to_vec());
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(path.to_path_buf());
        }
        Ok(())
    }
}
