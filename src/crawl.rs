use crate::checkpoint::{self, CheckpointDocument, Site};
use crate::config::ArchiverConfig;
use crate::events::CrawlEvent;
use crate::extract::{extract_title, image_fetch_url, rewrite_image_sources, scan_images};
use crate::paths::{ensure_dir, write_atomic, ArchivePaths};
use crate::transport::Transport;
use crate::{ArchiverError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Everything a run needs, built once at startup.
#[derive(Debug, Clone)]
pub struct CrawlContext<T> {
    pub config: ArchiverConfig,
    pub paths: ArchivePaths,
    pub checkpoint_path: PathBuf,
    pub transport: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub sites_total: usize,
    pub sites_complete: usize,
    pub sites_incomplete: usize,
    pub sites_fetch_failed: usize,
    pub sites_skipped: usize,
    pub images_downloaded: usize,
    pub images_found_on_disk: usize,
    pub images_already_fetched: usize,
    pub images_failed: usize,
    pub network_requests: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteOutcome {
    /// Page and images processed; `complete` mirrors the site's `fetch_success`.
    Committed { complete: bool },
    FetchFailed,
    /// Marked fetched but its saved `index.html` could not be read.
    Skipped,
}

/// Crawls every site in document order, saving the whole document after each one.
///
/// `log_event` sees every classified outcome; an error returned from it aborts the run
/// with the checkpoint reflecting all previously finished sites.
pub fn run_crawl<T, FLog>(
    ctx: &CrawlContext<T>,
    document: &mut CheckpointDocument,
    mut log_event: FLog,
) -> Result<CrawlSummary>
where
    T: Transport,
    FLog: FnMut(&CrawlEvent) -> Result<()>,
{
    if document.sites.is_empty() {
        return Err(ArchiverError::EmptySiteList {
            path: ctx.checkpoint_path.clone(),
        });
    }

    let total = document.sites.len();
    let mut summary = CrawlSummary {
        sites_total: total,
        ..CrawlSummary::default()
    };

    for index in 0..total {
        let site = document.sites[index].clone();
        log_event(&CrawlEvent::SiteStarted {
            index: index + 1,
            total,
            url: site.url.clone(),
        })?;

        let (site, outcome) = crawl_site(ctx, site, &mut summary, &mut log_event)?;
        match outcome {
            SiteOutcome::Committed { complete: true } => summary.sites_complete += 1,
            SiteOutcome::Committed { complete: false } => summary.sites_incomplete += 1,
            SiteOutcome::FetchFailed => summary.sites_fetch_failed += 1,
            SiteOutcome::Skipped => summary.sites_skipped += 1,
        }

        document.sites[index] = site;
        checkpoint::save(document, &ctx.checkpoint_path)?;
    }

    checkpoint::save(document, &ctx.checkpoint_path)?;
    log_event(&CrawlEvent::RunFinished {
        sites_total: summary.sites_total,
        sites_complete: summary.sites_complete,
        network_requests: summary.network_requests,
    })?;

    Ok(summary)
}

/// Processes one site as an owned value and hands back its updated state.
pub fn crawl_site<T, FLog>(
    ctx: &CrawlContext<T>,
    mut site: Site,
    summary: &mut CrawlSummary,
    log_event: &mut FLog,
) -> Result<(Site, SiteOutcome)>
where
    T: Transport,
    FLog: FnMut(&CrawlEvent) -> Result<()>,
{
    let site_dir = ctx.paths.site_dir(&site.url);
    let index_path = ctx.paths.site_index_path(&site.url);
    let fetched_fresh = !site.fetch_success;

    let markup = if fetched_fresh {
        summary.network_requests += 1;
        match ctx.transport.get(&site.url) {
            Ok(body) => {
                log_event(&CrawlEvent::SiteFetched {
                    url: site.url.clone(),
                    bytes: body.len(),
                })?;
                String::from_utf8_lossy(&body).into_owned()
            }
            Err(err) => {
                site.fetch_success = false;
                log_event(&CrawlEvent::SiteFetchFailed {
                    url: site.url.clone(),
                    error: err.to_string(),
                })?;
                return Ok((site, SiteOutcome::FetchFailed));
            }
        }
    } else {
        match std::fs::read(&index_path) {
            Ok(bytes) => {
                log_event(&CrawlEvent::SiteReused {
                    url: site.url.clone(),
                })?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            Err(err) => {
                log_event(&CrawlEvent::SiteIndexMissing {
                    url: site.url.clone(),
                    path: index_path.to_string_lossy().to_string(),
                    error: err.to_string(),
                })?;
                return Ok((site, SiteOutcome::Skipped));
            }
        }
    };

    ensure_dir(&site_dir, ctx.config.dir_mode).map_err(|source| ArchiverError::CreateDir {
        path: site_dir.clone(),
        source,
    })?;

    site.title = extract_title(&markup);

    if fetched_fresh || site.images.is_empty() {
        let scan = scan_images(&markup, &site.url);
        for rejected in scan.rejected {
            log_event(&CrawlEvent::ImageExtensionRejected {
                site_url: site.url.clone(),
                src: rejected.src,
                extension: rejected.extension,
            })?;
        }
        site.images = scan.images;
    }

    let markup = rewrite_image_sources(&markup, &site.url, ctx.config.rewrite_mode());

    let total = site.images.len();
    let mut fetched = 0_usize;
    for (position, image) in site.images.iter_mut().enumerate() {
        if image.fetch_success {
            fetched += 1;
            summary.images_already_fetched += 1;
            log_event(&CrawlEvent::ImageAlreadyFetched {
                url: image.url.clone(),
            })?;
            continue;
        }

        let fetch_url = image_fetch_url(&site.url, &image.url);
        let target = ctx.paths.image_path(&site.url, &image.url);

        if target.is_file() {
            image.fetch_success = true;
            fetched += 1;
            summary.images_found_on_disk += 1;
            log_event(&CrawlEvent::ImageFoundOnDisk {
                index: position + 1,
                total,
                url: fetch_url,
            })?;
            continue;
        }

        summary.network_requests += 1;
        match download_image(&ctx.transport, &fetch_url, &target, ctx.config.dir_mode) {
            Ok(bytes) => {
                image.fetch_success = true;
                fetched += 1;
                summary.images_downloaded += 1;
                log_event(&CrawlEvent::ImageDownloaded {
                    index: position + 1,
                    total,
                    url: fetch_url,
                    bytes,
                })?;
            }
            Err(err) => {
                summary.images_failed += 1;
                log_event(&CrawlEvent::ImageDownloadFailed {
                    url: fetch_url,
                    error: err.to_string(),
                })?;
            }
        }
    }

    site.fetch_success = fetched == total;

    write_atomic(&index_path, markup.as_bytes()).map_err(|source| ArchiverError::WritePage {
        path: index_path.clone(),
        source,
    })?;

    log_event(&CrawlEvent::SiteCommitted {
        url: site.url.clone(),
        fetch_success: site.fetch_success,
        images_fetched: fetched,
        images_total: total,
    })?;

    let complete = site.fetch_success;
    Ok((site, SiteOutcome::Committed { complete }))
}

fn download_image<T: Transport>(
    transport: &T,
    url: &str,
    target: &Path,
    dir_mode: u32,
) -> Result<usize> {
    let data = transport.get(url)?;
    if let Some(parent) = target.parent() {
        ensure_dir(parent, dir_mode)?;
    }
    write_atomic(target, &data)?;
    Ok(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Image;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapTransport {
        bodies: HashMap<String, Vec<u8>>,
        calls: RefCell<Vec<String>>,
    }

    impl Transport for MapTransport {
        fn get(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push(url.to_string());
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| ArchiverError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn context(dir: &Path, transport: MapTransport) -> CrawlContext<MapTransport> {
        CrawlContext {
            config: ArchiverConfig::default(),
            paths: ArchivePaths::new(dir.to_path_buf()),
            checkpoint_path: dir.join("sites.json"),
            transport,
        }
    }

    #[test]
    fn fresh_site_rewrites_before_download_and_counts_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut transport = MapTransport::default();
        transport.bodies.insert(
            "http://a.onion".into(),
            br#"<title>A</title><img src="http://a.onion/x.png"><img src="y.webp"><img src="z.gif">"#
                .to_vec(),
        );
        transport
            .bodies
            .insert("http://a.onion/x.png".into(), b"png".to_vec());
        let ctx = context(dir.path(), transport);

        let mut events = Vec::new();
        let mut summary = CrawlSummary::default();
        let (site, outcome) = crawl_site(
            &ctx,
            Site::new("http://a.onion"),
            &mut summary,
            &mut |event: &CrawlEvent| {
                events.push(event.clone());
                Ok(())
            },
        )
        .expect("crawl");

        assert_eq!(outcome, SiteOutcome::Committed { complete: false });
        assert_eq!(site.title, "A");
        assert_eq!(
            site.images,
            vec![
                Image {
                    url: "x.png".into(),
                    fetch_success: true
                },
                Image::new("z.gif"),
            ]
        );
        assert!(!site.fetch_success);
        assert_eq!(summary.images_downloaded, 1);
        assert_eq!(summary.images_failed, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            CrawlEvent::ImageExtensionRejected { extension, .. } if extension == "webp"
        )));

        let index = std::fs::read_to_string(ctx.paths.site_index_path("http://a.onion"))
            .expect("index");
        assert!(index.contains(r#"<img src="x.png">"#), "index={index}");
        assert_eq!(
            std::fs::read(ctx.paths.image_path("http://a.onion", "x.png")).expect("image"),
            b"png"
        );
    }

    #[test]
    fn reused_site_keeps_persisted_image_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path(), MapTransport::default());
        let index_path = ctx.paths.site_index_path("http://a.onion");
        ensure_dir(index_path.parent().expect("parent"), 0o777).expect("dir");
        std::fs::write(&index_path, r#"<title>Cached</title><img src="new.png">"#).expect("seed");

        let mut site = Site::new("http://a.onion");
        site.fetch_success = true;
        site.images = vec![Image {
            url: "old.png".into(),
            fetch_success: true,
        }];

        let mut summary = CrawlSummary::default();
        let (site, outcome) =
            crawl_site(&ctx, site, &mut summary, &mut |_: &CrawlEvent| Ok(())).expect("crawl");

        assert_eq!(outcome, SiteOutcome::Committed { complete: true });
        assert_eq!(site.title, "Cached");
        assert_eq!(site.images.len(), 1);
        assert_eq!(site.images[0].url, "old.png");
        assert_eq!(summary.network_requests, 0);
        assert!(ctx.transport.calls.borrow().is_empty());
    }

    #[test]
    fn reused_site_without_images_extracts_from_cached_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path(), MapTransport::default());
        let index_path = ctx.paths.site_index_path("http://a.onion");
        ensure_dir(index_path.parent().expect("parent"), 0o777).expect("dir");
        std::fs::write(
            &index_path,
            r#"<title>Cached</title><img src="img/a.png"><img src="b.webp">"#,
        )
        .expect("seed index");
        let image_path = ctx.paths.image_path("http://a.onion", "img/a.png");
        ensure_dir(image_path.parent().expect("parent"), 0o777).expect("dir");
        std::fs::write(&image_path, "png").expect("seed image");

        let mut site = Site::new("http://a.onion");
        site.fetch_success = true;

        let mut events = Vec::new();
        let mut summary = CrawlSummary::default();
        let (site, outcome) = crawl_site(&ctx, site, &mut summary, &mut |event: &CrawlEvent| {
            events.push(event.clone());
            Ok(())
        })
        .expect("crawl");

        assert_eq!(outcome, SiteOutcome::Committed { complete: true });
        assert_eq!(
            site.images,
            vec![Image {
                url: "img/a.png".into(),
                fetch_success: true
            }]
        );
        assert_eq!(summary.images_found_on_disk, 1);
        assert!(ctx.transport.calls.borrow().is_empty());
        assert!(events
            .iter()
            .any(|e| matches!(e, CrawlEvent::ImageExtensionRejected { .. })));
    }

    #[test]
    fn callback_error_aborts_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path(), MapTransport::default());
        let mut document = CheckpointDocument {
            sites: vec![Site::new("http://a.onion")],
        };
        let err = run_crawl(&ctx, &mut document, |_| {
            Err(ArchiverError::InvalidConfig("stop".into()))
        })
        .expect_err("aborted");
        assert!(matches!(err, ArchiverError::InvalidConfig(_)));
        assert!(ctx.transport.calls.borrow().is_empty());
    }
}
