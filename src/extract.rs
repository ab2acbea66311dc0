use crate::checkpoint::Image;
use crate::paths::image_archive_reference;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use scraper::{Html, Selector};

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "ico", "svg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    /// Image sources point into the local archive (`img/a.png`).
    Relative,
    /// Image sources point back at the live site (`http://site.onion/img/a.png`).
    Absolute,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageScan {
    pub images: Vec<Image>,
    pub rejected: Vec<RejectedSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSource {
    pub src: String,
    pub extension: String,
}

/// Accepts `jpg`, `.PNG`, ... A single leading dot is optional.
pub fn is_valid_image_extension(extension: &str) -> bool {
    let ext = extension.trim();
    let ext = ext.strip_prefix('.').unwrap_or(ext);
    IMAGE_EXTS.iter().any(|valid| valid.eq_ignore_ascii_case(ext))
}

/// Extension of the last path segment, dot included; empty when there is none.
pub fn source_extension(src: &str) -> &str {
    let name = src.rsplit('/').next().unwrap_or(src);
    match name.rfind('.') {
        Some(idx) => &name[idx..],
        None => "",
    }
}

pub fn extract_title(markup: &str) -> String {
    let document = Html::parse_document(markup);
    let selector = Selector::parse("title").expect("title selector");
    document
        .select(&selector)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

pub fn extract_images(markup: &str, site_url: &str) -> Vec<Image> {
    scan_images(markup, site_url).images
}

/// Collects every `<img src>` in document order. Repeated sources stay repeated.
pub fn scan_images(markup: &str, site_url: &str) -> ImageScan {
    let document = Html::parse_document(markup);
    let selector = Selector::parse("img").expect("img selector");
    let mut scan = ImageScan::default();

    for img in document.select(&selector) {
        for (name, value) in img.value().attrs() {
            if !name.eq_ignore_ascii_case("src") || value.is_empty() {
                continue;
            }

            let extension = source_extension(value);
            if !is_valid_image_extension(extension) {
                scan.rejected.push(RejectedSource {
                    src: value.to_string(),
                    extension: extension.trim_start_matches('.').to_string(),
                });
                continue;
            }

            scan.images.push(Image::new(archive_image_url(value, site_url)));
        }
    }

    scan
}

/// `src` with the site URL prefix and a single leading `/` removed.
///
/// Protocol-relative sources (`//host/x.png`) take the site's scheme first, so they end up
/// either site-relative or as an absolute URL fetched as-is.
pub fn archive_image_url(src: &str, site_url: &str) -> String {
    let prefix = site_prefix(site_url);
    let resolved = resolve_protocol_relative(src.trim(), site_url);
    let mut value = resolved.as_str();
    while let Some(rest) = value.strip_prefix(prefix.as_str()) {
        value = rest;
    }
    value.strip_prefix('/').unwrap_or(value).to_string()
}

/// Address an archived image is downloaded from.
pub fn image_fetch_url(site_url: &str, image_url: &str) -> String {
    if has_scheme(image_url) {
        return image_url.to_string();
    }
    format!("{}{}", site_prefix(site_url), image_url)
}

/// Rewrites `<img src>` attributes in one pass. Running it twice changes nothing more.
///
/// In relative mode an image with a valid extension points at its archived copy, which is
/// `image_archive_reference` of the extracted `Image.url`.
pub fn rewrite_image_sources(markup: &str, site_url: &str, mode: RewriteMode) -> String {
    let prefix = site_prefix(site_url);
    let site_url = site_url.to_string();
    let result = rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", move |el| {
                if let Some(src) = el.get_attribute("src") {
                    if let Some(next) = rewrite_source(&src, &site_url, &prefix, mode) {
                        el.set_attribute("src", &next)?;
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(rewritten) => rewritten,
        Err(_) => markup.to_string(),
    }
}

fn rewrite_source(src: &str, site_url: &str, prefix: &str, mode: RewriteMode) -> Option<String> {
    match mode {
        RewriteMode::Relative => {
            let next = if is_valid_image_extension(source_extension(src)) {
                image_archive_reference(&archive_image_url(src, site_url))
            } else {
                let mut value = src;
                while let Some(rest) = value.strip_prefix(prefix) {
                    value = rest;
                }
                value.to_string()
            };
            (next != src).then_some(next)
        }
        RewriteMode::Absolute => {
            if src.is_empty()
                || src.starts_with(prefix)
                || src.starts_with("//")
                || src.starts_with('#')
                || has_scheme(src)
            {
                return None;
            }
            let path = src.strip_prefix('/').unwrap_or(src);
            Some(format!("{prefix}{path}"))
        }
    }
}

fn resolve_protocol_relative(src: &str, site_url: &str) -> String {
    if !src.starts_with("//") {
        return src.to_string();
    }
    let scheme = site_url
        .trim()
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
        .unwrap_or("http");
    format!("{scheme}:{src}")
}

fn site_prefix(site_url: &str) -> String {
    format!("{}/", site_url.trim().trim_end_matches('/'))
}

fn has_scheme(value: &str) -> bool {
    let Some((scheme, _)) = value.split_once(':') else {
        return false;
    };
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
        && scheme.chars().next().is_some_and(|ch| ch.is_ascii_alphabetic())
}
