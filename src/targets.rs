//! Product targets and URL-derived names

use crate::capture::naming::ArtifactNamer;
use crate::error::CaptureError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

/// One product page to capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTarget {
    pub url: String,
    /// `{output_root}/{site_name}`
    pub output_directory: PathBuf,
}

impl ProductTarget {
    pub fn new(url: impl Into<String>, output_root: impl AsRef<Path>, site_name: &str) -> Self {
        Self {
            url: url.into(),
            output_directory: ArtifactNamer::new(output_root, site_name)
                .site_dir()
                .to_path_buf(),
        }
    }

    pub fn namer(&self) -> ArtifactNamer {
        ArtifactNamer::rooted(&self.output_directory)
    }
}

#[derive(Debug, Deserialize)]
struct UrlRecord {
    url: String,
}

/// Writes `urls` as a one-column CSV that [`load_csv`] reads back.
pub fn write_csv(path: &Path, urls: &[String]) -> Result<(), CaptureError> {
    let file = std::fs::File::create(path)?;
    write_urls(file, urls)
}

pub fn write_urls<W: std::io::Write>(writer: W, urls: &[String]) -> Result<(), CaptureError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["url"])?;
    for url in urls {
        wtr.write_record([url])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Reads product URLs from a CSV file with a `url` column.
pub fn load_csv(path: &Path, limit: Option<usize>) -> Result<Vec<String>, CaptureError> {
    let file = std::fs::File::open(path)?;
    read_urls(file, limit)
}

/// Blank and repeated URLs are dropped; `limit` keeps the first N.
pub fn read_urls<R: std::io::Read>(
    reader: R,
    limit: Option<usize>,
) -> Result<Vec<String>, CaptureError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for record in rdr.deserialize::<UrlRecord>() {
        if limit.is_some_and(|n| urls.len() >= n) {
            break;
        }
        let record = record?;
        if record.url.is_empty() {
            continue;
        }
        if seen.insert(record.url.clone()) {
            urls.push(record.url);
        }
    }
    Ok(urls)
}

fn path_segments(url: &str) -> Vec<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .map(|segments| segments.filter(|s| !s.is_empty()).map(String::from).collect())
        })
        .unwrap_or_default()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Title from the last two path segments: `/mobile/apple/iphone-13` is "Apple Iphone 13".
pub fn slug_title(url: &str) -> Option<String> {
    let segments = path_segments(url);
    let start = segments.len().saturating_sub(2);
    let title = segments[start..]
        .iter()
        .flat_map(|s| s.split(['-', '_']))
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    (!title.is_empty()).then_some(title)
}

/// Brand as the first word of the last path segment, when the path is nested:
/// `/cell-phone/apple-iphone-14` gives "Apple".
pub fn brand_from_url(url: &str) -> Option<String> {
    let segments = path_segments(url);
    if segments.len() < 2 {
        return None;
    }
    let brand = segments.last()?.split('-').next()?;
    (!brand.is_empty()).then(|| capitalize(brand))
}

/// Final product title.
///
/// The page's own title wins, optionally prefixed by the URL brand unless it
/// already starts with it. Without a page title the URL slug is used as is.
pub fn product_title(url: &str, page_title: Option<&str>, with_brand: bool) -> String {
    let page_title = page_title.map(str::trim).filter(|t| !t.is_empty());

    match page_title {
        Some(title) => {
            let brand = with_brand.then(|| brand_from_url(url)).flatten();
            match brand {
                Some(brand) if !title.to_lowercase().starts_with(&brand.to_lowercase()) => {
                    format!("{} {}", brand, title)
                }
                _ => title.to_string(),
            }
        }
        None => slug_title(url).unwrap_or_else(|| "Untitled".to_string()),
    }
}
