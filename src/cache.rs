//! On-disk page cache keyed by URL path.
//!
//! `https://bringatrailer.com/listing/1990-porsche-911/` is stored at
//! `<root>/bringatrailer.com/listing/1990-porsche-911/_index.html`. Path
//! segments starting with `_` get one more `_`, so no segment can take the
//! leaf's name. Entries never expire; delete the file (or the whole root) to
//! force a refetch.

use reqwest::Url;
use std::fs;
use std::path::PathBuf;

use crate::error::CacheError;

const LEAF_NAME: &str = "_index.html";

#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a URL onto its cache file. Query string and fragment are ignored.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let mut path = self.root.clone();

        match Url::parse(url) {
            Ok(parsed) => {
                if let Some(host) = parsed.host_str() {
                    push_segment(&mut path, host);
                }
                for segment in parsed.path().split('/') {
                    push_segment(&mut path, segment);
                }
            }
            Err(_) => {
                // Not absolute; treat the whole thing as a path
                let bare = url.split(['?', '#']).next().unwrap_or(url);
                for segment in bare.split('/') {
                    push_segment(&mut path, segment);
                }
            }
        }

        path.join(LEAF_NAME)
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.path_for(url);
        if !path.is_file() {
            return None;
        }
        match fs::read(&path) {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!("unreadable cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn put(&self, url: &str, body: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.path_for(url);
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, body)
        };
        write().map_err(|source| CacheError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn push_segment(path: &mut PathBuf, segment: &str) {
    if segment.is_empty() || segment == "." || segment == ".." {
        return;
    }
    let segment = segment.replace(['\\', ':'], "_");
    if segment.starts_with('_') {
        path.push(format!("_{}", segment));
    } else {
        path.push(segment);
    }
}
