//! Archive path utilities.
//!
//! Request URLs addressing archive content look like
//! `<app prefix>/<archive file>/<namespace>/<url>`, e.g.
//! `https://viewer.local/www/wikipedia_en.zim/A/Python`.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use url::Url;

lazy_static! {
    /// `<archive>/<namespace>/<url>` anywhere in a URL path.
    static ref ARCHIVE_URL: Regex =
        Regex::new(r"(?:^|/)([^/]+)/([-ABCIJMUVWX])/(.+)$").expect("valid archive url pattern");

    /// A path inside the archive starting with a namespace segment.
    static ref NAMESPACED_PATH: Regex =
        Regex::new(r"^[-ABCIJMUVWX]/.+").expect("valid namespace pattern");

    static ref IMAGE_PATH: Regex =
        Regex::new(r"(?i)/.+\.(?:jpe?g|png|svg|gif|webp)$").expect("valid image pattern");

    static ref CACHEABLE_MIME: Regex =
        Regex::new(r"(?i)text/css|text/javascript|application/javascript").expect("valid mime pattern");

    static ref MEDIA_MIME: Regex = Regex::new(r"(?i)^(?:video|audio)/").expect("valid media pattern");

    static ref URL_SCHEME: Regex =
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").expect("valid scheme pattern");
}

/// Schemes whose requests are never captured unless they address the archive.
const LOCAL_SCHEMES: &[&str] = &["file", "chrome-extension", "moz-extension"];

/// A request URL split into its archive parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUrl {
    /// Everything up to and including `<archive>/`, still percent-encoded.
    pub prefix: String,
    /// Decoded archive file name.
    pub archive: String,
    /// Decoded `<namespace>/<url>`.
    pub path: String,
}

impl ArchiveUrl {
    /// Parse the path of a request URL. Query and fragment are ignored.
    pub fn parse(url: &Url) -> Option<Self> {
        let raw = url.path();
        let caps = ARCHIVE_URL.captures(raw)?;
        let archive = caps.get(1)?;
        let namespace = caps.get(2)?;

        let prefix = raw[..namespace.start()].to_string();
        let encoded_path = &raw[namespace.start()..];

        Some(Self {
            prefix,
            archive: decode_once(archive.as_str()).into_owned(),
            path: decode_once(encoded_path).into_owned(),
        })
    }

    /// URL the browser should be sent to for another path of the same archive.
    pub fn location_for(&self, base: &Url, target_path: &str) -> Option<Url> {
        let location = format!("{}{}", self.prefix, encode_path(target_path));
        base.join(&location).ok()
    }
}

/// Percent-decode exactly once, keeping the raw text if it is not valid UTF-8.
pub fn decode_once(raw: &str) -> Cow<'_, str> {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded,
        Err(_) => Cow::Borrowed(raw),
    }
}

/// Percent-encode each segment of an archive path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether the URL uses a local scheme that is passed through untouched.
pub fn is_local_scheme(url: &Url) -> bool {
    LOCAL_SCHEMES.contains(&url.scheme())
}

/// Whether an archive path starts with a namespace segment.
pub fn is_namespaced(path: &str) -> bool {
    NAMESPACED_PATH.is_match(path)
}

/// Whether a path looks like an image that may be replaced by a placeholder.
pub fn is_image_path(path: &str) -> bool {
    IMAGE_PATH.is_match(path)
}

/// Whether responses of this MIME type are stored in the persistent tier.
pub fn is_cacheable_mime(mime_type: &str) -> bool {
    CACHEABLE_MIME.is_match(mime_type)
}

/// Whether this MIME type needs range headers for media pipelines.
pub fn is_media_mime(mime_type: &str) -> bool {
    MEDIA_MIME.is_match(mime_type)
}

/// Directory part of an archive path, including the trailing slash.
pub fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// Persistent cache key for a request URL: query and fragment stripped so
/// cache-busting parameters do not fragment the cache.
pub fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_query(None);
    key.set_fragment(None);
    key.to_string()
}

/// Resolve a link found in the page at `base_path` to an archive path.
///
/// Returns `None` for links that leave the archive: absolute URLs,
/// protocol-relative and root-relative links, and `..` past the archive root.
pub fn resolve_relative(base_path: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || URL_SCHEME.is_match(href) || href.starts_with('/') {
        return None;
    }

    let href = href.split(['#', '?']).next().unwrap_or_default();
    if href.is_empty() {
        return None;
    }
    let href = decode_once(href);

    let mut segments: Vec<&str> = directory_of(base_path)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}
