use crate::Result;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const RUN_LOG_ROTATE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    fn as_log_level(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// Every classified outcome of a crawl run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CrawlEvent {
    SiteStarted {
        index: usize,
        total: usize,
        url: String,
    },
    SiteFetched {
        url: String,
        bytes: usize,
    },
    SiteReused {
        url: String,
    },
    SiteFetchFailed {
        url: String,
        error: String,
    },
    SiteIndexMissing {
        url: String,
        path: String,
        error: String,
    },
    ImageExtensionRejected {
        site_url: String,
        src: String,
        extension: String,
    },
    ImageAlreadyFetched {
        url: String,
    },
    ImageFoundOnDisk {
        index: usize,
        total: usize,
        url: String,
    },
    ImageDownloaded {
        index: usize,
        total: usize,
        url: String,
        bytes: usize,
    },
    ImageDownloadFailed {
        url: String,
        error: String,
    },
    SiteCommitted {
        url: String,
        fetch_success: bool,
        images_fetched: usize,
        images_total: usize,
    },
    RunFinished {
        sites_total: usize,
        sites_complete: usize,
        network_requests: usize,
    },
}

impl CrawlEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            Self::ImageExtensionRejected { .. } | Self::ImageAlreadyFetched { .. } => {
                EventLevel::Debug
            }
            Self::SiteFetchFailed { .. }
            | Self::SiteIndexMissing { .. }
            | Self::ImageDownloadFailed { .. } => EventLevel::Warn,
            _ => EventLevel::Info,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SiteStarted { .. } => "site_started",
            Self::SiteFetched { .. } => "site_fetched",
            Self::SiteReused { .. } => "site_reused",
            Self::SiteFetchFailed { .. } => "site_fetch_failed",
            Self::SiteIndexMissing { .. } => "site_index_missing",
            Self::ImageExtensionRejected { .. } => "image_extension_rejected",
            Self::ImageAlreadyFetched { .. } => "image_already_fetched",
            Self::ImageFoundOnDisk { .. } => "image_found_on_disk",
            Self::ImageDownloaded { .. } => "image_downloaded",
            Self::ImageDownloadFailed { .. } => "image_download_failed",
            Self::SiteCommitted { .. } => "site_committed",
            Self::RunFinished { .. } => "run_finished",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::SiteStarted { index, total, url } => {
                format!("Getting site {index} of {total} - {url}...")
            }
            Self::SiteFetched { url, bytes } => format!("Fetched {url} ({bytes} bytes)"),
            Self::SiteReused { url } => format!("Site already fetched: {url}"),
            Self::SiteFetchFailed { url, error } => format!("Unable to fetch site {url}: {error}"),
            Self::SiteIndexMissing { url, path, error } => {
                format!("Site index.html was not found for {url} at {path}: {error}")
            }
            Self::ImageExtensionRejected { src, extension, .. } => {
                format!("Image extension is invalid: {extension} ({src})")
            }
            Self::ImageAlreadyFetched { url } => format!("Image already fetched: {url}"),
            Self::ImageFoundOnDisk { index, total, url } => {
                format!("Image {index} of {total} already exists - {url}")
            }
            Self::ImageDownloaded {
                index,
                total,
                url,
                bytes,
            } => format!("Downloaded image {index} of {total} - {url} ({bytes} bytes)"),
            Self::ImageDownloadFailed { url, error } => {
                format!("Unable to download image {url}: {error}")
            }
            Self::SiteCommitted {
                url,
                fetch_success,
                images_fetched,
                images_total,
            } => format!(
                "Saved {url}: {images_fetched}/{images_total} images (fetch_success={fetch_success})"
            ),
            Self::RunFinished {
                sites_total,
                sites_complete,
                network_requests,
            } => format!(
                "Finished: {sites_complete}/{sites_total} sites complete, {network_requests} network requests"
            ),
        }
    }
}

/// Forwards an event to the `log` facade.
pub fn log_event(event: &CrawlEvent) {
    log::log!(
        target: "site_archiver",
        event.level().as_log_level(),
        "{}",
        event.message()
    );
}

/// Append-only JSON lines run log.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &CrawlEvent) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "level": event.level().as_str(),
            "event": event.name(),
            "data": event,
        })
        .to_string();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_if_needed(&self.path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

fn rotate_if_needed(path: &Path) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if len < RUN_LOG_ROTATE_BYTES {
        return Ok(());
    }

    let backup = path.with_extension("jsonl.1");
    if backup.exists() {
        std::fs::remove_file(&backup)?;
    }
    std::fs::rename(path, backup)?;
    Ok(())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
