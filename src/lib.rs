//! # Content Migrate
//!
//! One-shot, re-runnable migration of a static-site export (markdown files
//! with YAML front-matter) into a hierarchical page tree with rich-text
//! bodies, deduplicated images and redirects from the old URLs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ Legacy files │──▶│ Skeleton pass       │──▶│   PathIndex   │
//! │ md + YAML    │   │ read, map, upsert   │   │ old path→node │
//! └──────────────┘   └────────────────────┘   └──────┬───────┘
//!                                                    ▼
//!                    ┌────────────────────┐   ┌──────────────┐
//!                    │ Render pass         │──▶│    Store      │
//!                    │ links, images, HTML │   │ SQLite/memory │
//!                    └────────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cmig init                     # create database
//! cmig stats                    # inspect front-matter keys per glob
//! cmig run --import-images      # migrate everything
//! cmig report > urls.csv        # old → new URL mapping
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`content_map`] | Glob → page type mapping entries |
//! | [`reader`] | Front-matter / body splitting |
//! | [`fields`] | Front-matter → typed field mapping |
//! | [`slug`] | Slug and legacy path resolution |
//! | [`upsert`] | Find-or-create pages by slug |
//! | [`images`] | Image lookup, fetching and deduplication |
//! | [`render`] | Markdown → rich text with resolved links |
//! | [`redirects`] | Old URL redirect accrual |
//! | [`setup`] | Home page, site and section pages |
//! | [`ingest`] | Two-phase migration run |
//! | [`store`] | Store traits, SQLite and in-memory backends |
//! | [`report`] | Old/new URL CSV report |
//! | [`stats`] | Front-matter statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod content_map;
pub mod db;
pub mod error;
pub mod fields;
pub mod images;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reader;
pub mod redirects;
pub mod render;
pub mod report;
pub mod schema;
pub mod setup;
pub mod slug;
pub mod stats;
pub mod store;
pub mod upsert;
