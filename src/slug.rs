//! Slug and legacy path resolution.
//!
//! The legacy generator derived a page's URL from, in order of precedence, an
//! explicit `permalink`, a `urlname`, a `YYYY-MM-DD-` dated filename, or the
//! bare filename. The destination slug is always a slugified form of that
//! legacy slug, so moved content can be detected by comparing paths.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::MigrateError;
use crate::models::{normalize_path, ResolvedPaths, SourceDocument};

/// Permalinks in the legacy export that contain path separators inside the
/// slug. They are ignored and the slug is derived from the filename.
pub const MALFORMED_PERMALINKS: [&str; 2] = [
    "updates/2013-01-03_public/private_partnership_to_map_west_nusa_tenggara",
    "updates/2013-11-11_remote_hot_activation_in_the_philippines_for_typhoon_yolanda/haiyan",
];

fn dated_slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{4}-[0-9]{2}-[0-9]{2})-(.*)$").expect("dated slug pattern is valid")
    })
}

/// Compute the legacy path and destination slug of a document.
///
/// `legacy_parent` is the content map's declared legacy parent; when absent
/// the document's directory relative to `source_root` is used instead.
pub fn resolve_paths(
    doc: &SourceDocument,
    legacy_parent: Option<&str>,
    source_root: &Path,
) -> Result<ResolvedPaths, MigrateError> {
    let permalink = doc
        .str_field("permalink")
        .filter(|p| !MALFORMED_PERMALINKS.contains(&p.trim_matches('/')));

    let stem = doc
        .source_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let old_slug = if let Some(permalink) = &permalink {
        permalink_slug(permalink)
    } else if let Some(urlname) = doc.str_field("urlname") {
        urlname
    } else {
        strip_date_prefix(&stem).to_string()
    };

    let mut slug = slugify(&old_slug);
    if slug.is_empty() {
        slug = doc
            .str_field("title")
            .map(|t| slugify(&t))
            .unwrap_or_default();
    }
    if slug.is_empty() {
        return Err(MigrateError::skipped(
            &doc.source_path,
            "no usable slug could be derived",
        ));
    }

    let legacy_path = match &permalink {
        Some(permalink) => normalize_path(permalink),
        None => {
            let parent = match legacy_parent {
                Some(parent) => parent.to_string(),
                None => relative_dir(&doc.source_path, source_root),
            };
            normalize_path(&format!("{}/{}", parent, old_slug))
        }
    };

    Ok(ResolvedPaths {
        old_slug,
        legacy_path,
        slug,
    })
}

/// Final segment of a permalink, without `.html` and without a date prefix.
fn permalink_slug(permalink: &str) -> String {
    let last = permalink
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let last = last
        .strip_suffix(".html")
        .or_else(|| last.strip_suffix(".htm"))
        .unwrap_or(last);
    strip_date_prefix(last).to_string()
}

/// `2020-01-01-my-post` → `my-post`; anything else is returned unchanged.
pub fn strip_date_prefix(name: &str) -> &str {
    match dated_slug_regex().captures(name).and_then(|c| c.get(2)) {
        Some(rest) if !rest.as_str().is_empty() => rest.as_str(),
        _ => name,
    }
}

fn relative_dir(path: &Path, root: &Path) -> String {
    let parent = path.parent().unwrap_or(Path::new(""));
    let relative = parent.strip_prefix(root).unwrap_or(parent);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercase ASCII slug: accented letters are reduced to their base letter
/// (NFKD), other characters than alphanumerics, underscores, hyphens and
/// whitespace are dropped, and whitespace and hyphen runs collapse into single
/// hyphens.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_hyphen = false;

    for c in value.nfkd().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else if c == '-' || c.is_whitespace() {
            pending_hyphen = true;
        }
    }

    out.trim_matches(|c| c == '-' || c == '_').to_string()
}
