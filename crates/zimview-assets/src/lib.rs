//! # ZimView Assets
//!
//! Resolves the stylesheet and icon links of a page rendered without the
//! interceptor. Archive references are read directly from the archive,
//! wrapped as blobs and merged back into the page in their original order.
//!
//! ```text
//! page ──scan──→ [ref 0, ref 1, ref 2]            encounter order
//!                   │      │      │
//!                   ▼      ▼      ▼               concurrent, any order
//!               [slot 0, slot 1, slot 2]          completed == total
//!                   │
//!                   └──→ transform(block) ──→ before </head>
//! ```

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use zimview_cache::{BlobCache, BlobHandle};
use zimview_core::{paths, ArchiveEntry, ArchiveReader};

lazy_static! {
    static ref LINK_TAG: Regex = Regex::new(r"(?is)<link\b[^>]*>").expect("valid link pattern");
    static ref REL_ATTR: Regex =
        Regex::new(r#"(?i)\brel\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("valid rel pattern");
    static ref HREF_ATTR: Regex =
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("valid href pattern");
    static ref HEAD_END: Regex = Regex::new(r"(?i)</head\s*>").expect("valid head pattern");
}

/// Redirect entries followed when reading a stylesheet.
const MAX_REDIRECT_HOPS: usize = 8;

// ==================== References ====================

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Outside the archive; kept as written.
    External,
    /// Archive path resolved against the page directory.
    Archive(String),
}

/// One stylesheet or icon link found in a page.
#[derive(Debug, Clone)]
pub struct StylesheetReference {
    /// Position in encounter order.
    pub order: usize,

    /// The link element as written.
    pub markup: String,

    /// Byte range of `markup` in the page.
    pub span: Range<usize>,

    /// Byte range of the href value inside `markup`.
    href: Option<Range<usize>>,

    pub target: LinkTarget,
}

impl StylesheetReference {
    /// The markup with its href pointing at `url`.
    pub fn with_href(&self, url: &str) -> String {
        match &self.href {
            Some(range) => format!(
                "{}{}{}",
                &self.markup[..range.start],
                url,
                &self.markup[range.end..]
            ),
            None => self.markup.clone(),
        }
    }
}

fn attr_value(pattern: &Regex, tag: &str) -> Option<(String, Range<usize>)> {
    let caps = pattern.captures(tag)?;
    let value = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    Some((value.as_str().to_string(), value.range()))
}

/// Find the stylesheet and icon links of a page, in encounter order.
///
/// The whole page is scanned. Links found in the body end up in the merged
/// head block after the head's own links.
pub fn scan(base_path: &str, page: &str) -> Vec<StylesheetReference> {
    LINK_TAG
        .find_iter(page)
        .filter(|tag| {
            attr_value(&REL_ATTR, tag.as_str())
                .map(|(rel, _)| {
                    rel.split_whitespace().any(|token| {
                        token.eq_ignore_ascii_case("stylesheet")
                            || token.to_ascii_lowercase().contains("icon")
                    })
                })
                .unwrap_or(false)
        })
        .enumerate()
        .map(|(order, tag)| {
            let markup = tag.as_str().to_string();
            let href = attr_value(&HREF_ATTR, &markup);
            let target = href
                .as_ref()
                .and_then(|(value, _)| paths::resolve_relative(base_path, value))
                .filter(|path| paths::is_namespaced(path))
                .map(LinkTarget::Archive)
                .unwrap_or(LinkTarget::External);
            StylesheetReference {
                order,
                markup,
                span: tag.range(),
                href: href.map(|(_, range)| range),
                target,
            }
        })
        .collect()
}

// ==================== Block Transform ====================

/// Rewrites the merged stylesheet block once its order is final.
pub trait BlockTransform: Send + Sync {
    fn transform(&self, block: String) -> String;
}

/// Leaves the block as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl BlockTransform for IdentityTransform {
    fn transform(&self, block: String) -> String {
        block
    }
}

/// Appends a theme stylesheet after the page's own, so it wins the cascade.
#[derive(Debug, Clone)]
pub struct ThemeTransform {
    href: String,
}

impl ThemeTransform {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

impl BlockTransform for ThemeTransform {
    fn transform(&self, mut block: String) -> String {
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(&format!(
            r#"<link rel="stylesheet" type="text/css" href="{}">"#,
            self.href
        ));
        block
    }
}

// ==================== Pipeline ====================

/// Resolves page stylesheets against an archive and the blob tier.
pub struct StylesheetPipeline {
    reader: Arc<dyn ArchiveReader>,
    blobs: Arc<BlobCache>,
    transform: Box<dyn BlockTransform>,
}

impl StylesheetPipeline {
    pub fn new(reader: Arc<dyn ArchiveReader>, blobs: Arc<BlobCache>) -> Self {
        Self {
            reader,
            blobs,
            transform: Box::new(IdentityTransform),
        }
    }

    pub fn with_transform(mut self, transform: impl BlockTransform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    /// Rewrite `page` (found at archive path `base_path`) so every archive
    /// stylesheet points at a blob.
    ///
    /// Unresolvable links keep their original markup. A page without links
    /// is returned unchanged.
    pub async fn resolve_stylesheets(&self, base_path: &str, page: &str) -> String {
        let references = scan(base_path, page);
        if references.is_empty() {
            return page.to_string();
        }

        let total = references.len();
        let mut slots: Vec<Option<String>> = vec![None; total];
        let mut pending = FuturesUnordered::new();
        for reference in &references {
            pending.push(async move { (reference.order, self.resolve(reference).await) });
        }

        let mut completed = 0;
        while let Some((order, markup)) = pending.next().await {
            trace!(order, completed, total, "Stylesheet resolved");
            slots[order] = Some(markup);
            completed += 1;
        }
        debug_assert_eq!(completed, total);

        let block = references
            .iter()
            .zip(slots)
            .map(|(reference, slot)| slot.unwrap_or_else(|| reference.markup.clone()))
            .collect::<Vec<_>>()
            .join("\n");
        let block = self.transform.transform(block);

        let mut body = page.to_string();
        for reference in references.iter().rev() {
            body.replace_range(reference.span.clone(), "");
        }

        debug!(base_path, links = total, "Stylesheets merged");
        match HEAD_END.find(&body) {
            Some(head_end) => {
                body.insert_str(head_end.start(), &block);
                body
            }
            None => block + &body,
        }
    }

    /// Markup for one slot.
    async fn resolve(&self, reference: &StylesheetReference) -> String {
        let LinkTarget::Archive(path) = &reference.target else {
            return reference.markup.clone();
        };
        match self.blob_for(path).await {
            Some(handle) => reference.with_href(&handle.url()),
            None => reference.markup.clone(),
        }
    }

    async fn blob_for(&self, path: &str) -> Option<Arc<BlobHandle>> {
        let archive = self.reader.id();
        if let Some(handle) = self.blobs.get(archive, path) {
            return Some(handle);
        }

        let (mime_type, content) = self.read(path).await?;
        Some(self.blobs.insert(archive, path, &mime_type, content))
    }

    async fn read(&self, path: &str) -> Option<(String, Bytes)> {
        let mut current = path.to_string();
        for _ in 0..=MAX_REDIRECT_HOPS {
            match self.reader.get_entry(&current).await {
                Ok(ArchiveEntry::Found { mime_type, content }) => return Some((mime_type, content)),
                Ok(ArchiveEntry::Redirect { target }) => current = target,
                Ok(ArchiveEntry::Missing) => {
                    debug!(path, "Stylesheet not in archive");
                    return None;
                }
                Err(e) => {
                    warn!(path, error = %e, "Stylesheet unreadable");
                    return None;
                }
            }
        }
        warn!(path, "Too many redirects for stylesheet");
        None
    }
}

impl std::fmt::Debug for StylesheetPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StylesheetPipeline")
            .field("archive", &self.reader.name())
            .finish()
    }
}
