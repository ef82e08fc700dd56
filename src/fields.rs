//! Field mapper: turns loosely-typed front-matter into destination fields.
//!
//! Values are assigned in a fixed precedence, later stages overriding
//! earlier ones:
//!
//! 1. standard fields (title, metadata blob, publish dates, featured image)
//! 2. [`FieldRule::Auto`] — keys that name a registered field, exactly or
//!    after snake-casing
//! 3. [`FieldRule::Rename`] — explicit key → field renames
//! 4. [`FieldRule::Computed`] — named pure functions
//! 5. [`FieldRule::Static`] — literal values, unconditionally
//!
//! Every assignment goes through the type's field registry in
//! [`crate::schema`] and is coerced to the registered [`FieldKind`].

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MigrateError;
use crate::images::ImageResolver;
use crate::models::{FieldSet, Frontmatter, ResolvedPaths, SourceDocument};
use crate::schema::{FieldKind, PageType};

/// Front-matter keys that carry a featured image reference, in ascending priority.
const IMAGE_KEYS: [&str; 2] = ["Photo", "Feature Image"];

/// One step of a content map's field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldRule {
    /// Copy every key that names a registered destination field.
    Auto,
    /// Copy front-matter key `from` into destination field `to`.
    Rename { from: String, to: String },
    /// Merge the output of a named pure function.
    Computed { function: ComputedField },
    /// Assign a literal value.
    Static { field: String, value: Value },
}

impl FieldRule {
    /// Application order of the rule's stage.
    fn stage(&self) -> u8 {
        match self {
            FieldRule::Auto => 0,
            FieldRule::Rename { .. } => 1,
            FieldRule::Computed { .. } => 2,
            FieldRule::Static { .. } => 3,
        }
    }
}

/// Pure functions `(frontmatter, fields so far, body) → fields` that a
/// content map entry can reference by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComputedField {
    /// ISO alpha-2 / alpha-3 codes from the upper-case entries of `names`.
    CountryCodes,
}

impl ComputedField {
    pub fn apply(&self, frontmatter: &Frontmatter, _fields: &FieldSet, _body: &str) -> FieldSet {
        match self {
            ComputedField::CountryCodes => country_codes(frontmatter),
        }
    }
}

fn country_codes(frontmatter: &Frontmatter) -> FieldSet {
    let mut out = FieldSet::new();
    let names = frontmatter.get("names").map(ensure_list).unwrap_or_default();
    for name in names.iter().filter_map(Value::as_str) {
        let is_upper = !name.chars().any(char::is_lowercase);
        match name.chars().count() {
            2 if is_upper => {
                out.insert("isoa2".into(), Value::String(name.to_string()));
            }
            3 if is_upper => {
                out.insert("isoa3".into(), Value::String(name.to_string()));
            }
            _ => {}
        }
    }
    out
}

/// Builds the field set for one document.
pub struct FieldMapper<'a> {
    page_type: PageType,
    images: &'a ImageResolver,
    source_path: &'a Path,
    fields: FieldSet,
}

impl<'a> FieldMapper<'a> {
    pub fn new(page_type: PageType, images: &'a ImageResolver, source_path: &'a Path) -> Self {
        Self {
            page_type,
            images,
            source_path,
            fields: FieldSet::new(),
        }
    }

    /// Map a document's front-matter onto the destination fields.
    ///
    /// `relative_path` is the source file relative to the corpus root and is
    /// recorded in the metadata blob alongside the resolved legacy path.
    pub async fn map(
        mut self,
        doc: &SourceDocument,
        paths: &ResolvedPaths,
        relative_path: &str,
        rules: &[FieldRule],
    ) -> Result<FieldSet, MigrateError> {
        let fm = &doc.frontmatter;

        let title = match fm.get("title") {
            Some(v) if !v.is_null() => coerce_text(v).map_err(|e| in_field("title", e))?,
            _ => return Err(MigrateError::skipped(self.source_path, "missing title")),
        };
        if title.trim().is_empty() {
            return Err(MigrateError::skipped(self.source_path, "empty title"));
        }
        self.fields.insert("title".into(), Value::String(title));
        self.fields
            .insert("frontmatter".into(), metadata_blob(fm, paths, relative_path));

        self.assign_publish_dates(fm)?;

        for key in IMAGE_KEYS {
            if let Some(reference) = fm.get(key) {
                self.assign("featured_image", reference.clone()).await?;
            }
        }

        let mut ordered: Vec<&FieldRule> = rules.iter().collect();
        ordered.sort_by_key(|r| r.stage());

        for rule in ordered {
            match rule {
                FieldRule::Auto => self.auto_map(fm).await?,
                FieldRule::Rename { from, to } => {
                    if let Some(value) = fm.get(from) {
                        self.assign(to, value.clone()).await?;
                    }
                }
                FieldRule::Computed { function } => {
                    let computed = function.apply(fm, &self.fields, &doc.body);
                    for (field, value) in computed {
                        self.assign(&field, value).await?;
                    }
                }
                FieldRule::Static { field, value } => {
                    self.assign(field, value.clone()).await?;
                }
            }
        }

        Ok(self.fields)
    }

    fn assign_publish_dates(&mut self, fm: &Frontmatter) -> Result<(), MigrateError> {
        let created = match fm.get("created").filter(|v| is_present(v)) {
            Some(v) => Some(coerce_datetime(v).map_err(|e| in_field("created", e))?),
            None => None,
        };
        let date = match fm.get("date").filter(|v| is_present(v)) {
            Some(v) => Some(coerce_datetime(v).map_err(|e| in_field("date", e))?),
            None => None,
        };

        let (first, last) = match (created, date) {
            (Some(c), Some(d)) => (Some(c), Some(d)),
            (Some(c), None) => (Some(c.clone()), Some(c)),
            (None, Some(d)) => (Some(d.clone()), Some(d)),
            (None, None) => (None, None),
        };
        if let Some(first) = first {
            self.fields
                .insert("first_published_at".into(), Value::String(first));
        }
        if let Some(last) = last {
            self.fields
                .insert("last_published_at".into(), Value::String(last));
        }
        Ok(())
    }

    async fn auto_map(&mut self, fm: &Frontmatter) -> Result<(), MigrateError> {
        for (key, value) in fm {
            let snake = to_snake_case(key);
            let field = if self.page_type.field_kind(key).is_some() {
                key.clone()
            } else if self.page_type.field_kind(&snake).is_some() {
                snake
            } else {
                continue;
            };
            self.assign(&field, value.clone()).await?;
        }
        Ok(())
    }

    /// Coerce and store a single value. Unregistered fields are dropped;
    /// null values and unresolvable images leave the field untouched.
    async fn assign(&mut self, field: &str, value: Value) -> Result<(), MigrateError> {
        let Some(kind) = self.page_type.field_kind(field) else {
            tracing::warn!(
                path = %self.source_path.display(),
                field,
                page_type = %self.page_type,
                "field is not registered for this page type, dropping"
            );
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }

        let coerced = match kind {
            FieldKind::Text | FieldKind::RichText | FieldKind::Url => {
                Value::String(coerce_text(&value).map_err(|e| in_field(field, e))?)
            }
            FieldKind::List => Value::Array(
                ensure_list(&value)
                    .into_iter()
                    .filter(|v| !v.is_null())
                    .map(|v| match v {
                        Value::String(s) => Value::String(s.trim().to_string()),
                        other => Value::String(scalar_to_string(&other)),
                    })
                    .collect(),
            ),
            FieldKind::Bool => Value::Bool(coerce_bool(&value).map_err(|e| in_field(field, e))?),
            FieldKind::DateTime => {
                Value::String(coerce_datetime(&value).map_err(|e| in_field(field, e))?)
            }
            FieldKind::Image => match &value {
                Value::Number(n) if n.is_i64() => value.clone(),
                Value::String(reference) => match self.images.resolve(reference).await {
                    Some(asset) => Value::from(asset.id),
                    None => return Ok(()),
                },
                _ => return Err(in_field(field, "expected an image reference".into())),
            },
        };

        self.fields.insert(field.to_string(), coerced);
        Ok(())
    }
}

fn in_field(field: &str, message: String) -> MigrateError {
    MigrateError::coercion(field, message)
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// JSON string holding the full front-matter plus the resolved legacy path
/// and the source file, kept on the node for reports and reprocessing.
fn metadata_blob(fm: &Frontmatter, paths: &ResolvedPaths, relative_path: &str) -> Value {
    let mut blob = fm.clone();
    blob.insert("old_path".into(), Value::String(paths.legacy_path.clone()));
    blob.insert("path".into(), Value::String(relative_path.to_string()));
    Value::String(Value::Object(blob).to_string())
}

/// Wrap scalars in a list and flatten nested lists. Never fails.
pub fn ensure_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.iter().flat_map(ensure_list).collect(),
        other => vec![other.clone()],
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        Value::Array(items) if items.iter().all(|v| !v.is_array() && !v.is_object()) => Ok(items
            .iter()
            .filter(|v| !v.is_null())
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(", ")),
        _ => Err("expected text".to_string()),
    }
}

fn coerce_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        },
        _ => Err("expected a boolean".to_string()),
    }
}

/// Parse a legacy date/datetime into an RFC 3339 UTC timestamp.
pub fn coerce_datetime(value: &Value) -> Result<String, String> {
    parse_datetime(value)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| format!("unrecognised date {}", value))
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS] [+ZZZZ]`, RFC 3339 and
/// integer epoch seconds.
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z") {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.and_utc())
        }
        _ => None,
    }
}

fn snake_regexes() -> &'static [(Regex, &'static str); 4] {
    static RES: OnceLock<[(Regex, &'static str); 4]> = OnceLock::new();
    RES.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("snake case pattern is valid");
        [
            (re(r"(.)([A-Z][a-z]+)"), "${1}_${2}"),
            (re(r"__([A-Z])"), "_${1}"),
            (re(r"([a-z0-9])([A-Z])"), "${1}_${2}"),
            (re(r"[\s\-_]+"), "_"),
        ]
    })
}

/// `"Summary Text"` → `summary_text`, `"apiKey"` → `api_key`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = name.trim().to_string();
    for (i, (re, replacement)) in snake_regexes().iter().enumerate() {
        if i == 3 {
            out = out.to_lowercase();
        }
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn resolver() -> ImageResolver {
        ImageResolver::new(Arc::new(InMemoryStore::new()), Default::default())
    }

    fn doc(frontmatter: Value) -> SourceDocument {
        SourceDocument {
            frontmatter: frontmatter.as_object().cloned().unwrap(),
            body: "Body".into(),
            source_path: PathBuf::from("/site/_people/jane.md"),
        }
    }

    fn paths() -> ResolvedPaths {
        ResolvedPaths {
            old_slug: "jane".into(),
            legacy_path: "/people/jane".into(),
            slug: "jane".into(),
        }
    }

    async fn map(page_type: PageType, fm: Value, rules: &[FieldRule]) -> Result<FieldSet, MigrateError> {
        let images = resolver();
        let d = doc(fm);
        FieldMapper::new(page_type, &images, &d.source_path)
            .map(&d, &paths(), "_people/jane.md", rules)
            .await
    }

    #[test]
    fn snake_case_folding() {
        assert_eq!(to_snake_case("Summary Text"), "summary_text");
        assert_eq!(to_snake_case("Email"), "email");
        assert_eq!(to_snake_case("OSM Username"), "osm_username");
        assert_eq!(to_snake_case("apiKey"), "api_key");
        assert_eq!(to_snake_case("Apply-Form Link"), "apply_form_link");
    }

    #[test]
    fn ensure_list_flattens() {
        assert_eq!(ensure_list(&json!("a")), vec![json!("a")]);
        assert_eq!(
            ensure_list(&json!(["a", ["b", ["c"]]])),
            vec![json!("a"), json!("b"), json!("c")]
        );
    }

    #[test]
    fn parses_legacy_dates() {
        let ts = |v: Value| coerce_datetime(&v).unwrap();
        assert_eq!(ts(json!("2021-03-01")), "2021-03-01T00:00:00Z");
        assert_eq!(ts(json!("2021-03-01 10:20:30 +0200")), "2021-03-01T08:20:30Z");
        assert_eq!(ts(json!("2021-03-01T10:20:30Z")), "2021-03-01T10:20:30Z");
        assert_eq!(ts(json!(0)), "1970-01-01T00:00:00Z");
        assert!(coerce_datetime(&json!("someday")).is_err());
    }

    #[tokio::test]
    async fn missing_title_is_skipped() {
        let err = map(PageType::Person, json!({"email": "x@y.z"}), &[FieldRule::Auto])
            .await
            .unwrap_err();
        assert!(err.is_skippable());
    }

    #[tokio::test]
    async fn date_only_fills_both_timestamps() {
        let fields = map(PageType::Article, json!({"title": "T", "date": "2021-03-01"}), &[])
            .await
            .unwrap();
        assert_eq!(fields["first_published_at"], "2021-03-01T00:00:00Z");
        assert_eq!(fields["last_published_at"], "2021-03-01T00:00:00Z");

        let fields = map(
            PageType::Article,
            json!({"title": "T", "created": "2020-01-01", "date": "2021-03-01"}),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(fields["first_published_at"], "2020-01-01T00:00:00Z");
        assert_eq!(fields["last_published_at"], "2021-03-01T00:00:00Z");
    }

    #[tokio::test]
    async fn metadata_blob_records_paths() {
        let fields = map(PageType::Person, json!({"title": "Jane", "Extra": [1, 2]}), &[])
            .await
            .unwrap();
        let blob: Value = serde_json::from_str(fields["frontmatter"].as_str().unwrap()).unwrap();
        assert_eq!(blob["old_path"], "/people/jane");
        assert_eq!(blob["path"], "_people/jane.md");
        assert_eq!(blob["Extra"], json!([1, 2]));
    }

    #[tokio::test]
    async fn precedence_auto_rename_computed_static() {
        let rules = vec![
            FieldRule::Static {
                field: "category".into(),
                value: json!(["Partner"]),
            },
            FieldRule::Rename {
                from: "Intro Text".into(),
                to: "short_summary".into(),
            },
            FieldRule::Auto,
        ];
        let fields = map(
            PageType::Organisation,
            json!({
                "title": "Org",
                "Short Summary": "auto value",
                "Intro Text": "renamed value",
                "Category": "Ignored",
                "Unknown Key": "dropped"
            }),
            &rules,
        )
        .await
        .unwrap();
        assert_eq!(fields["short_summary"], "renamed value");
        assert_eq!(fields["category"], json!(["Partner"]));
        assert!(!fields.contains_key("unknown_key"));
    }

    #[tokio::test]
    async fn computed_country_codes() {
        let fields = map(
            PageType::Country,
            json!({"title": "Nepal", "names": ["Nepal", "NP", "NPL", "nep"]}),
            &[
                FieldRule::Auto,
                FieldRule::Computed {
                    function: ComputedField::CountryCodes,
                },
            ],
        )
        .await
        .unwrap();
        assert_eq!(fields["isoa2"], "NP");
        assert_eq!(fields["isoa3"], "NPL");
        assert_eq!(fields["names"], json!(["Nepal", "NP", "NPL", "nep"]));
    }

    #[tokio::test]
    async fn list_fields_coerce_scalars() {
        let fields = map(
            PageType::Organisation,
            json!({"title": "Org", "category": "Working Group"}),
            &[FieldRule::Auto],
        )
        .await
        .unwrap();
        assert_eq!(fields["category"], json!(["Working Group"]));
    }

    #[tokio::test]
    async fn uncoercible_scalar_skips_document() {
        let err = map(
            PageType::Opportunity,
            json!({"title": "Job", "Deadline Date": "when it's done"}),
            &[FieldRule::Rename {
                from: "Deadline Date".into(),
                to: "deadline_datetime".into(),
            }],
        )
        .await
        .unwrap_err();
        assert!(err.is_skippable());
    }

    #[tokio::test]
    async fn unresolvable_photo_is_tolerated() {
        let fields = map(
            PageType::Person,
            json!({"title": "Jane", "Photo": "/uploads/missing.png"}),
            &[FieldRule::Auto],
        )
        .await
        .unwrap();
        assert!(!fields.contains_key("featured_image"));
    }
}
