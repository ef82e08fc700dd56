//! Destination page types and their field registry.
//!
//! Every page type declares the fields it accepts and the kind each field is
//! coerced to. The [`crate::fields`] mapper consults this table instead of
//! probing the destination for attributes, so an unknown front-matter key can
//! never leak into a node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Concrete type of a destination node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageType {
    Root,
    Home,
    Static,
    Section,
    MagazineIndex,
    Article,
    Directory,
    ActivationIndex,
    ActivationProject,
    Country,
    Opportunity,
    Organisation,
    Person,
    Project,
}

/// How a front-matter value is coerced before it is stored on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain single-line text.
    Text,
    /// Text that may carry inline markup.
    RichText,
    /// A list of strings; scalars become one-element lists.
    List,
    Bool,
    /// Stored as an RFC 3339 timestamp.
    DateTime,
    Url,
    /// An image asset id.
    Image,
}

/// A single registered destination field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// Fields shared by every previewable content page.
const COMMON: &[FieldSpec] = &[
    field("title", FieldKind::Text),
    field("first_published_at", FieldKind::DateTime),
    field("last_published_at", FieldKind::DateTime),
    field("short_summary", FieldKind::RichText),
    field("featured_image", FieldKind::Image),
];

const TITLE_ONLY: &[FieldSpec] = &[field("title", FieldKind::Text)];

const STATIC: &[FieldSpec] = &[
    field("show_header", FieldKind::Bool),
    field("show_footer", FieldKind::Bool),
];

const ARTICLE: &[FieldSpec] = &[
    field("authors", FieldKind::List),
    field("tags", FieldKind::List),
    field("related_countries", FieldKind::List),
];

const ACTIVATION_PROJECT: &[FieldSpec] = &[
    field("related_countries", FieldKind::List),
    field("coordinates", FieldKind::Text),
];

const COUNTRY: &[FieldSpec] = &[
    field("isoa2", FieldKind::Text),
    field("isoa3", FieldKind::Text),
    field("names", FieldKind::List),
    field("coordinates", FieldKind::Text),
];

const OPPORTUNITY: &[FieldSpec] = &[
    field("deadline_datetime", FieldKind::DateTime),
    field("apply_form_url", FieldKind::Url),
    field("location", FieldKind::Text),
];

const ORGANISATION: &[FieldSpec] = &[
    field("category", FieldKind::List),
    field("website", FieldKind::Url),
];

const PERSON: &[FieldSpec] = &[
    field("email", FieldKind::Text),
    field("role", FieldKind::Text),
    field("website", FieldKind::Url),
    field("linkedin_url", FieldKind::Url),
    field("twitter_username", FieldKind::Text),
    field("osm_username", FieldKind::Text),
];

const PROJECT: &[FieldSpec] = &[
    field("coordinates", FieldKind::Text),
    field("related_countries", FieldKind::List),
    field("category", FieldKind::List),
];

impl PageType {
    pub const ALL: [PageType; 14] = [
        PageType::Root,
        PageType::Home,
        PageType::Static,
        PageType::Section,
        PageType::MagazineIndex,
        PageType::Article,
        PageType::Directory,
        PageType::ActivationIndex,
        PageType::ActivationProject,
        PageType::Country,
        PageType::Opportunity,
        PageType::Organisation,
        PageType::Person,
        PageType::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Root => "root",
            PageType::Home => "home",
            PageType::Static => "static",
            PageType::Section => "section",
            PageType::MagazineIndex => "magazine-index",
            PageType::Article => "article",
            PageType::Directory => "directory",
            PageType::ActivationIndex => "activation-index",
            PageType::ActivationProject => "activation-project",
            PageType::Country => "country",
            PageType::Opportunity => "opportunity",
            PageType::Organisation => "organisation",
            PageType::Person => "person",
            PageType::Project => "project",
        }
    }

    fn extra_fields(&self) -> &'static [FieldSpec] {
        match self {
            PageType::Static => STATIC,
            PageType::Article => ARTICLE,
            PageType::ActivationProject => ACTIVATION_PROJECT,
            PageType::Country => COUNTRY,
            PageType::Opportunity => OPPORTUNITY,
            PageType::Organisation => ORGANISATION,
            PageType::Person => PERSON,
            PageType::Project => PROJECT,
            _ => &[],
        }
    }

    fn base_fields(&self) -> &'static [FieldSpec] {
        match self {
            PageType::Root | PageType::Home => TITLE_ONLY,
            _ => COMMON,
        }
    }

    /// All fields registered for this type, shared ones first.
    pub fn fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.base_fields().iter().chain(self.extra_fields().iter())
    }

    /// Kind of a registered field, or `None` if the type has no such field.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.fields().find(|f| f.name == name).map(|f| f.kind)
    }

    /// Whether nodes of this type may be the target of a content map.
    pub fn is_migratable(&self) -> bool {
        !matches!(self, PageType::Root | PageType::Home)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown page type: '{}'", s))
    }
}
