use std::fs::DirBuilder;
use std::path::{Component, Path, PathBuf};

const SITES_DIR: &str = "sites";
const LOGS_DIR: &str = "logs";
const INDEX_FILE_NAME: &str = "index.html";
const CONFIG_FILE_NAME: &str = "site_archiver.json";
const RUN_LOG_FILE_NAME: &str = "site_archiver.jsonl";
const FALLBACK_SITE_DIR: &str = "site";

#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub base_dir: PathBuf,
}

impl ArchivePaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.base_dir.join(SITES_DIR)
    }

    pub fn site_dir(&self, site_url: &str) -> PathBuf {
        self.sites_dir().join(site_dir_name(site_url))
    }

    pub fn site_index_path(&self, site_url: &str) -> PathBuf {
        self.site_dir(site_url).join(INDEX_FILE_NAME)
    }

    pub fn image_path(&self, site_url: &str, image_url: &str) -> PathBuf {
        self.site_dir(site_url).join(image_relative_path(image_url))
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join(LOGS_DIR)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.logs_dir().join(RUN_LOG_FILE_NAME)
    }
}

/// Directory name for a site: scheme and onion suffix removed, then slugified.
pub fn site_dir_name(site_url: &str) -> String {
    let stripped = site_url
        .replace("http://", "")
        .replace("https://", "")
        .replace(".onion", "");
    let slug = slugify(&stripped);
    if slug.is_empty() {
        FALLBACK_SITE_DIR.to_string()
    } else {
        slug
    }
}

pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Relative location of an image inside its site directory.
///
/// Query strings, fragments, `.` and `..` are dropped so the result never leaves the
/// site directory. Absolute references keep their host as the first segment.
pub fn image_relative_path(image_url: &str) -> PathBuf {
    archive_segments(image_url).into_iter().collect()
}

/// `/`-separated form of [`image_relative_path`], as written into archived pages.
pub fn image_archive_reference(image_url: &str) -> String {
    archive_segments(image_url).join("/")
}

fn archive_segments(image_url: &str) -> Vec<String> {
    let trimmed = image_url.trim();
    let without_scheme = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed.trim_start_matches('/'),
    };
    let path_part = without_scheme
        .split(|ch| ch == '?' || ch == '#')
        .next()
        .unwrap_or("");

    Path::new(path_part)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Creates `path` and any missing parents with the given permission bits.
pub fn ensure_dir(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    set_dir_mode(&mut builder, mode);
    builder.create(path)
}

#[cfg(unix)]
fn set_dir_mode(builder: &mut DirBuilder, mode: u32) {
    use std::os::unix::fs::DirBuilderExt;

    builder.mode(mode);
}

#[cfg(not(unix))]
fn set_dir_mode(_builder: &mut DirBuilder, _mode: u32) {}

/// Writes to a sibling `.tmp` file, then renames it over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, data)?;
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
