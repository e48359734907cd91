//! Media resolution: decide which image files belong to which card.
//!
//! Two pools of candidate files are consulted, remote first, then local:
//!
//! 1. **Explicit reference**: `<img src='FILENAME'>` in the card's image
//!    markup, looked up by exact file name.
//! 2. **Positional convention**: for every slide number `n`, the first file
//!    whose name ends in `-NNNNN.jpg` (zero-padded to five digits). A card
//!    covering several slides can collect several images.
//!
//! A miss is not an error. An explicit reference that matches nothing falls
//! through to the positional convention.
//!
//! Every attached file is recorded once in a [`MediaManifest`], which is what
//! the package writer bundles.

use crate::error::CardMediaError;
use crate::pipeline::normalize::NormalizedCard;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A candidate media file on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaAsset {
    pub file_name: String,
    pub source_path: PathBuf,
}

impl MediaAsset {
    /// Build an asset from a path; `None` when the path has no UTF-8 file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let source_path = path.into();
        let file_name = source_path.file_name()?.to_str()?.to_string();
        Some(Self {
            file_name,
            source_path,
        })
    }
}

/// A flat directory listing, indexed by file name.
#[derive(Debug, Clone, Default)]
pub struct MediaPool {
    label: String,
    assets: Vec<MediaAsset>,
    by_name: HashMap<String, usize>,
}

impl MediaPool {
    /// A pool with no files.
    pub fn empty(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// List the regular files of `dir`. A missing directory is an empty pool.
    pub fn from_dir(label: impl Into<String>, dir: &Path) -> io::Result<Self> {
        let label = label.into();
        if !dir.is_dir() {
            debug!("Media pool '{}': {} is not a directory", label, dir.display());
            return Ok(Self::empty(label));
        }

        let mut assets = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(asset) = MediaAsset::from_path(entry.path()) {
                assets.push(asset);
            }
        }
        Ok(Self::from_assets(label, assets))
    }

    /// Build a pool from known assets. Assets are ordered by file name so that
    /// suffix matching does not depend on directory iteration order.
    pub fn from_assets(label: impl Into<String>, mut assets: Vec<MediaAsset>) -> Self {
        assets.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        assets.dedup_by(|a, b| a.file_name == b.file_name);
        let by_name = assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.file_name.clone(), i))
            .collect();
        Self {
            label: label.into(),
            assets,
            by_name,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Exact file-name lookup.
    pub fn get(&self, file_name: &str) -> Option<&MediaAsset> {
        self.by_name.get(file_name).map(|&i| &self.assets[i])
    }

    /// First asset (by name) whose file name ends in `suffix`.
    pub fn find_suffix(&self, suffix: &str) -> Option<&MediaAsset> {
        self.assets.iter().find(|a| a.file_name.ends_with(suffix))
    }
}

/// Expected file-name suffix for a slide: `-00007.jpg` for slide 7.
pub fn slide_suffix(slide: usize) -> String {
    format!("-{slide:05}.jpg")
}

static RE_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

fn src_value(caps: &regex::Captures<'_>) -> Option<String> {
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let name = unescape_attr(raw.trim());
    (!name.is_empty()).then_some(name)
}

/// File name inside `<img src='…'>`, if the markup has a usable one.
pub fn explicit_reference(markup: &str) -> Option<String> {
    RE_IMG_SRC.captures(markup).and_then(|caps| src_value(&caps))
}

/// Every `src` in a fragment of HTML, in order.
pub fn image_sources(html: &str) -> Vec<String> {
    RE_IMG_SRC
        .captures_iter(html)
        .filter_map(|caps| src_value(&caps))
        .collect()
}

/// Escape a file name for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_attr`], plus `&#39;` / `&apos;`.
pub fn unescape_attr(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// The de-duplicated set of files a package must carry.
#[derive(Debug, Clone, Default)]
pub struct MediaManifest {
    assets: Vec<MediaAsset>,
    paths: HashSet<PathBuf>,
    names: HashMap<String, PathBuf>,
}

/// Outcome of [`MediaManifest::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestInsert {
    Added,
    AlreadyPresent,
    /// A different file with the same name is already bundled.
    NameConflict,
}

impl MediaManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an asset; the same path is only ever stored once.
    pub fn insert(&mut self, asset: &MediaAsset) -> ManifestInsert {
        if self.paths.contains(&asset.source_path) {
            return ManifestInsert::AlreadyPresent;
        }
        if self.names.contains_key(&asset.file_name) {
            return ManifestInsert::NameConflict;
        }
        self.paths.insert(asset.source_path.clone());
        self.names
            .insert(asset.file_name.clone(), asset.source_path.clone());
        self.assets.push(asset.clone());
        ManifestInsert::Added
    }

    pub fn assets(&self) -> &[MediaAsset] {
        &self.assets
    }

    pub fn contains_name(&self, file_name: &str) -> bool {
        self.names.contains_key(file_name)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Matches cards against an ordered list of pools.
pub struct MediaResolver<'a> {
    pools: Vec<&'a MediaPool>,
}

impl<'a> MediaResolver<'a> {
    /// `pools` in priority order (remote before local).
    pub fn new(pools: Vec<&'a MediaPool>) -> Self {
        Self { pools }
    }

    /// Media for one card, without touching any manifest.
    pub fn resolve(&self, card: &NormalizedCard) -> Vec<&'a MediaAsset> {
        if let Some(name) = explicit_reference(&card.image_markup) {
            if let Some(asset) = self.pools.iter().find_map(|p| p.get(&name)) {
                debug!("Card {}: explicit image '{}'", card.index, name);
                return vec![asset];
            }
            let miss = CardMediaError::ExplicitReferenceUnresolved {
                card: card.index,
                file_name: name,
            };
            warn!("{miss}; trying slide-number convention");
        }

        let mut found: Vec<&'a MediaAsset> = Vec::new();
        for &slide in &card.slide_numbers {
            let suffix = slide_suffix(slide);
            if let Some(asset) = self.pools.iter().find_map(|p| p.find_suffix(&suffix)) {
                if !found.contains(&asset) {
                    debug!("Card {}: slide {} → {}", card.index, slide, asset.file_name);
                    found.push(asset);
                }
            }
        }
        found
    }

    /// Resolve every card in place and return the manifest of attached files.
    ///
    /// Afterwards each card's `media` lists only paths present in the manifest.
    pub fn resolve_all(&self, cards: &mut [NormalizedCard]) -> MediaManifest {
        let mut manifest = MediaManifest::new();
        for card in cards.iter_mut() {
            card.media.clear();
            for asset in self.resolve(card) {
                match manifest.insert(asset) {
                    ManifestInsert::Added | ManifestInsert::AlreadyPresent => {
                        card.media.push(asset.source_path.clone());
                    }
                    ManifestInsert::NameConflict => {
                        warn!(
                            "Card {}: '{}' clashes with an already bundled file of the same name; skipped",
                            card.index, asset.file_name
                        );
                    }
                }
            }
        }
        debug!(
            "Resolved media across {} pools: {} files",
            self.pools.len(),
            manifest.len()
        );
        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::NormalizedCard;

    fn pool(label: &str, dir: &str, names: &[&str]) -> MediaPool {
        MediaPool::from_assets(
            label,
            names
                .iter()
                .filter_map(|n| MediaAsset::from_path(Path::new(dir).join(n)))
                .collect(),
        )
    }

    fn card(index: usize, slides: Vec<usize>, markup: &str) -> NormalizedCard {
        NormalizedCard {
            index,
            question: format!("Q{index}"),
            answer: String::new(),
            explanation: String::new(),
            slide_numbers: slides,
            image_markup: markup.to_string(),
            media: Vec::new(),
        }
    }

    #[test]
    fn suffix_format() {
        assert_eq!(slide_suffix(7), "-00007.jpg");
        assert_eq!(slide_suffix(123456), "-123456.jpg");
    }

    #[test]
    fn parse_explicit_reference() {
        assert_eq!(explicit_reference("<img src='a.jpg'>").as_deref(), Some("a.jpg"));
        assert_eq!(
            explicit_reference(r#"<IMG class="x" src="b c.png" />"#).as_deref(),
            Some("b c.png")
        );
        assert_eq!(explicit_reference("<img src=''>"), None);
        assert_eq!(explicit_reference("<img>"), None);
        assert_eq!(explicit_reference("just text"), None);
    }

    #[test]
    fn reference_keeps_the_other_quote_kind() {
        assert_eq!(
            explicit_reference(r#"<img src="O'Brien.jpg">"#).as_deref(),
            Some("O'Brien.jpg")
        );
        assert_eq!(
            explicit_reference(r#"<img src='say "hi".jpg'>"#).as_deref(),
            Some(r#"say "hi".jpg"#)
        );
        assert_eq!(
            explicit_reference(r#"<img src="a&amp;b.jpg">"#).as_deref(),
            Some("a&b.jpg")
        );
    }

    #[test]
    fn sources_with_mixed_quoting() {
        let html = r#"<img src="Men's Health-00001.jpg"><img src='x "y".jpg'><img src="q&quot;r.jpg">"#;
        assert_eq!(
            image_sources(html),
            vec![
                "Men's Health-00001.jpg".to_string(),
                r#"x "y".jpg"#.to_string(),
                r#"q"r.jpg"#.to_string(),
            ]
        );
    }

    #[test]
    fn escaped_attr_reads_back_unchanged() {
        for name in ["plain.jpg", "Men's Health-00001.jpg", "a&b-00002.jpg", r#"say "hi".jpg"#, "<x>.jpg"] {
            let html = format!("<img src=\"{}\">", escape_attr(name));
            assert_eq!(image_sources(&html), vec![name.to_string()], "{html}");
        }
    }

    #[test]
    fn suffix_match_attaches_file() {
        let local = pool("local", "/m", &["lecture-00007.jpg", "lecture-00008.png"]);
        let resolver = MediaResolver::new(vec![&local]);
        let got = resolver.resolve(&card(1, vec![7], ""));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].file_name, "lecture-00007.jpg");
    }

    #[test]
    fn suffix_miss_attaches_nothing() {
        let local = pool("local", "/m", &["lecture-00007.jpg", "lecture-00008.png"]);
        let resolver = MediaResolver::new(vec![&local]);
        assert!(resolver.resolve(&card(1, vec![8], "")).is_empty());
    }

    #[test]
    fn multiple_slides_collect_multiple_files() {
        let local = pool("local", "/m", &["l-00003.jpg", "l-00004.jpg"]);
        let resolver = MediaResolver::new(vec![&local]);
        let got = resolver.resolve(&card(1, vec![4, 3, 9], ""));
        let names: Vec<_> = got.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["l-00004.jpg", "l-00003.jpg"]);
    }

    #[test]
    fn explicit_reference_prefers_remote_pool() {
        let remote = pool("remote", "/r", &["fig.png"]);
        let local = pool("local", "/l", &["fig.png"]);
        let resolver = MediaResolver::new(vec![&remote, &local]);
        let got = resolver.resolve(&card(1, vec![1], "<img src='fig.png'>"));
        assert_eq!(got[0].source_path, PathBuf::from("/r/fig.png"));
    }

    #[test]
    fn explicit_reference_wins_over_suffix() {
        let local = pool("local", "/l", &["fig.png", "deck-00001.jpg"]);
        let resolver = MediaResolver::new(vec![&local]);
        let got = resolver.resolve(&card(1, vec![1], "<img src=\"fig.png\">"));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].file_name, "fig.png");
    }

    #[test]
    fn unresolved_reference_falls_through() {
        let local = pool("local", "/l", &["deck-00002.jpg"]);
        let resolver = MediaResolver::new(vec![&local]);
        let got = resolver.resolve(&card(1, vec![2], "<img src='missing.png'>"));
        assert_eq!(got[0].file_name, "deck-00002.jpg");
    }

    #[test]
    fn suffix_searches_remote_then_local() {
        let remote = pool("remote", "/r", &["remote-00005.jpg"]);
        let local = pool("local", "/l", &["local-00005.jpg", "local-00006.jpg"]);
        let resolver = MediaResolver::new(vec![&remote, &local]);
        let got = resolver.resolve(&card(1, vec![5, 6], ""));
        assert_eq!(got[0].source_path, PathBuf::from("/r/remote-00005.jpg"));
        assert_eq!(got[1].source_path, PathBuf::from("/l/local-00006.jpg"));
    }

    #[test]
    fn manifest_dedups_shared_files() {
        let local = pool("local", "/l", &["deck-00001.jpg"]);
        let resolver = MediaResolver::new(vec![&local]);
        let mut cards = vec![card(1, vec![1], ""), card(2, vec![1], "")];
        let manifest = resolver.resolve_all(&mut cards);
        assert_eq!(manifest.len(), 1);
        assert_eq!(cards[0].media, cards[1].media);
        assert_eq!(cards[1].media, vec![PathBuf::from("/l/deck-00001.jpg")]);
    }

    #[test]
    fn manifest_rejects_name_conflicts() {
        let mut m = MediaManifest::new();
        let a = MediaAsset::from_path("/r/x.jpg").unwrap();
        let b = MediaAsset::from_path("/l/x.jpg").unwrap();
        assert_eq!(m.insert(&a), ManifestInsert::Added);
        assert_eq!(m.insert(&a), ManifestInsert::AlreadyPresent);
        assert_eq!(m.insert(&b), ManifestInsert::NameConflict);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn pool_from_missing_dir_is_empty() {
        let p = MediaPool::from_dir("local", Path::new("/definitely/not/here")).unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn pool_from_dir_lists_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-00002.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a-00001.jpg"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub-00003.jpg")).unwrap();
        let p = MediaPool::from_dir("local", dir.path()).unwrap();
        assert_eq!(p.len(), 2);
        assert!(p.get("a-00001.jpg").is_some());
        assert!(p.find_suffix("-00003.jpg").is_none());
    }

    #[test]
    fn image_sources_lists_all() {
        let html = "<img src=\"a.jpg\"><img src='b.jpg'>";
        assert_eq!(image_sources(html), vec!["a.jpg", "b.jpg"]);
    }
}
