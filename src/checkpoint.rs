use crate::paths::write_atomic;
use crate::{ArchiverError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sites: Vec<Site>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fetch_success: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub fetch_success: bool,
}

impl Site {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn fetched_image_count(&self) -> usize {
        self.images.iter().filter(|image| image.fetch_success).count()
    }
}

impl Image {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fetch_success: false,
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn load(path: &Path) -> Result<CheckpointDocument> {
    let bytes = std::fs::read(path).map_err(|source| ArchiverError::CheckpointUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let document: CheckpointDocument =
        serde_json::from_slice(&bytes).map_err(|source| ArchiverError::CheckpointInvalid {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(document)
}

/// Loads a document that is ready to crawl: it must list at least one site.
pub fn load_for_crawl(path: &Path) -> Result<CheckpointDocument> {
    let document = load(path)?;
    if document.sites.is_empty() {
        return Err(ArchiverError::EmptySiteList {
            path: path.to_path_buf(),
        });
    }
    Ok(document)
}

/// Writes a full snapshot of `document`, replacing the previous file in one rename.
pub fn save(document: &CheckpointDocument, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    write_atomic(path, format!("{json}\n").as_bytes())?;
    Ok(())
}
