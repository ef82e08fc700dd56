//! Cross-reference renderer: markdown body → destination rich content.
//!
//! A thin event transformer over `pulldown-cmark`. Headings move down one
//! level so the page title stays the only H1, internal links become page
//! references by node id, and images become embeds by asset id. Anything the
//! renderer cannot resolve degrades to plain output: unknown links stay
//! ordinary anchors and unresolvable images are dropped.
//!
//! Rendering is split so that the only async work, image resolution, happens
//! up front: [`image_references`] lists what a body needs,
//! [`resolve_images`] fetches it, and [`render_html`] is a pure function of
//! the body, the [`PathIndex`] and the resolved images.

use std::collections::HashMap;

use pulldown_cmark::{html, CowStr, Event, HeadingLevel, LinkType, Options, Parser, Tag, TagEnd};
use serde_json::{json, Value};

use crate::images::ImageResolver;
use crate::models::{normalize_path, ImageAsset, PathIndex};

/// Inputs for rendering one document.
pub struct RenderContext<'a> {
    pub index: &'a PathIndex,
    pub images: &'a HashMap<String, ImageAsset>,
    /// Directory of the document's legacy path; relative links resolve from here.
    pub base_path: &'a str,
    /// Absolute URL prefix of the legacy site, stripped from internal links.
    pub legacy_base_url: Option<&'a str>,
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

/// Destinations of every image in a markdown body, in document order.
pub fn image_references(markdown: &str) -> Vec<String> {
    Parser::new_ext(markdown, options())
        .filter_map(|event| match event {
            Event::Start(Tag::Image { dest_url, .. }) => Some(dest_url.trim().to_string()),
            _ => None,
        })
        .filter(|dest| !dest.is_empty())
        .collect()
}

/// Resolve image references, keyed by the reference as written.
pub async fn resolve_images(
    references: &[String],
    resolver: &ImageResolver,
) -> HashMap<String, ImageAsset> {
    let mut resolved = HashMap::new();
    for reference in references {
        if resolved.contains_key(reference) {
            continue;
        }
        if let Some(asset) = resolver.resolve_lenient(reference).await {
            resolved.insert(reference.clone(), asset);
        }
    }
    resolved
}

/// Directory part of a legacy path: `/updates/my-post` → `/updates`.
pub fn base_path_of(legacy_path: &str) -> String {
    let normalized = normalize_path(legacy_path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => normalized[..i].to_string(),
    }
}

/// Render a markdown body to HTML with links and images rewritten.
pub fn render_html(markdown: &str, ctx: &RenderContext<'_>) -> String {
    if markdown.trim().is_empty() {
        return String::new();
    }

    let mut events: Vec<Event<'_>> = Vec::new();
    let mut page_links: Vec<bool> = Vec::new();
    let mut image: Option<PendingImage<'_>> = None;

    for event in Parser::new_ext(markdown, options()) {
        if image.is_some() {
            match event {
                Event::End(TagEnd::Image) => {
                    if let Some(html) = image.take().and_then(|p| p.into_embed(ctx)) {
                        events.push(Event::Html(html.into()));
                    }
                }
                Event::Text(text) | Event::Code(text) => {
                    if let Some(pending) = image.as_mut() {
                        pending.alt.push_str(&text);
                    }
                }
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(Tag::Heading {
                level,
                id,
                classes,
                attrs,
            }) => events.push(Event::Start(Tag::Heading {
                level: demote(level),
                id,
                classes,
                attrs,
            })),
            Event::End(TagEnd::Heading(level)) => {
                events.push(Event::End(TagEnd::Heading(demote(level))))
            }
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) => match link_target(ctx, link_type, &dest_url) {
                Some(node_id) => {
                    page_links.push(true);
                    events.push(Event::Html(page_link_open(node_id, &title).into()));
                }
                None => {
                    page_links.push(false);
                    events.push(Event::Start(Tag::Link {
                        link_type,
                        dest_url,
                        title,
                        id,
                    }));
                }
            },
            Event::End(TagEnd::Link) => {
                if page_links.pop().unwrap_or(false) {
                    events.push(Event::Html("</a>".into()));
                } else {
                    events.push(Event::End(TagEnd::Link));
                }
            }
            Event::Start(Tag::Image {
                dest_url, title, ..
            }) => {
                image = Some(PendingImage {
                    dest: dest_url,
                    title,
                    alt: String::new(),
                });
            }
            other => events.push(other),
        }
    }

    let mut out = String::new();
    html::push_html(&mut out, events.into_iter());
    if out.trim().is_empty() {
        String::new()
    } else {
        out
    }
}

/// Wrap rendered HTML as a single rich-text block.
pub fn rich_content(html: &str) -> Value {
    json!([{ "type": "richtext", "value": html }])
}

struct PendingImage<'a> {
    dest: CowStr<'a>,
    title: CowStr<'a>,
    alt: String,
}

impl PendingImage<'_> {
    fn into_embed(self, ctx: &RenderContext<'_>) -> Option<String> {
        let dest = self.dest.trim();
        let Some(asset) = ctx.images.get(dest) else {
            tracing::warn!(reference = dest, "image not resolved, dropping from body");
            return None;
        };
        let alt = if self.title.trim().is_empty() {
            self.alt.trim()
        } else {
            self.title.trim()
        };
        Some(format!(
            r#"<embed embedtype="image" id="{}" alt="{}" format="fullwidth" />"#,
            asset.id,
            escape_attr(alt)
        ))
    }
}

fn demote(level: HeadingLevel) -> HeadingLevel {
    match level {
        HeadingLevel::H1 => HeadingLevel::H2,
        HeadingLevel::H2 => HeadingLevel::H3,
        HeadingLevel::H3 => HeadingLevel::H4,
        HeadingLevel::H4 => HeadingLevel::H5,
        HeadingLevel::H5 | HeadingLevel::H6 => HeadingLevel::H6,
    }
}

fn page_link_open(node_id: i64, title: &str) -> String {
    if title.is_empty() {
        format!(r#"<a linktype="page" id="{}">"#, node_id)
    } else {
        format!(
            r#"<a linktype="page" id="{}" title="{}">"#,
            node_id,
            escape_attr(title)
        )
    }
}

/// Node id an internal link points at, if it resolves.
fn link_target(ctx: &RenderContext<'_>, link_type: LinkType, dest: &str) -> Option<i64> {
    if matches!(link_type, LinkType::Autolink | LinkType::Email) {
        return None;
    }
    let path = internal_path(ctx, dest)?;

    let mut candidates = vec![path.clone()];
    if let Ok(decoded) = urlencoding::decode(&path) {
        if decoded != path.as_str() {
            candidates.push(decoded.into_owned());
        }
    }
    for candidate in candidates.clone() {
        if let Some(stripped) = candidate
            .strip_suffix(".html")
            .or_else(|| candidate.strip_suffix(".htm"))
        {
            candidates.push(stripped.to_string());
        }
    }

    let hit = candidates.iter().find_map(|c| ctx.index.get(c));
    if hit.is_none() {
        tracing::debug!(link = dest, path = %path, "link does not resolve to a migrated page");
    }
    hit.map(|node| node.id)
}

/// Legacy path a link refers to, or `None` for external links.
fn internal_path(ctx: &RenderContext<'_>, dest: &str) -> Option<String> {
    let mut dest = dest.trim();
    if dest.is_empty() || dest.starts_with('#') {
        return None;
    }

    let stripped_base;
    if let Some(base) = ctx.legacy_base_url.map(|b| b.trim_end_matches('/')) {
        if !base.is_empty() {
            if let Some(rest) = dest.strip_prefix(base) {
                if rest.is_empty() || rest.starts_with(['/', '?', '#']) {
                    stripped_base = format!("/{}", rest.trim_start_matches('/'));
                    dest = &stripped_base;
                }
            }
        }
    }

    if dest.starts_with("//") || has_scheme(dest) {
        return None;
    }

    let path = dest.split(['?', '#']).next().unwrap_or_default();
    if path.is_empty() {
        return None;
    }

    if path.starts_with('/') {
        Some(normalize_path(path))
    } else {
        Some(normalize_path(&format!("{}/{}", ctx.base_path, path)))
    }
}

fn has_scheme(dest: &str) -> bool {
    match dest.find(':') {
        Some(i) => {
            let scheme = &dest[..i];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
