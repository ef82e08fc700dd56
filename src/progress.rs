//! Migration progress reporting.
//!
//! Reports observable progress during `cmig run` so users see which content
//! map entry is being processed and how much of the render pass is left.
//! Progress is emitted on **stderr** so the stdout summary stays parseable.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationEvent {
    /// Files of a content map entry are being enumerated.
    Scanning { entry: String },
    /// Skeleton pass: n of total files of an entry processed.
    Skeleton { entry: String, n: u64, total: u64 },
    /// Image prefetch started for `total` distinct references.
    Prefetching { total: u64 },
    /// Render pass: n of total bodies rendered.
    Rendering { n: u64, total: u64 },
    /// Writing accrued redirects.
    Flushing { total: u64 },
}

/// Reports migration progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: MigrationEvent);
}

/// Human-friendly progress on stderr: "skeleton _posts/*.md  120 / 1,402 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: MigrationEvent) {
        let line = match &event {
            MigrationEvent::Scanning { entry } => format!("scan {}  discovering...\n", entry),
            MigrationEvent::Skeleton { entry, n, total } => format!(
                "skeleton {}  {} / {} files\n",
                entry,
                format_number(*n),
                format_number(*total)
            ),
            MigrationEvent::Prefetching { total } => {
                format!("images  prefetching {} references\n", format_number(*total))
            }
            MigrationEvent::Rendering { n, total } => format!(
                "render  {} / {} pages\n",
                format_number(*n),
                format_number(*total)
            ),
            MigrationEvent::Flushing { total } => {
                format!("redirects  writing {}\n", format_number(*total))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: MigrationEvent) {
        let obj = match &event {
            MigrationEvent::Scanning { entry } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "entry": entry
            }),
            MigrationEvent::Skeleton { entry, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "skeleton",
                "entry": entry,
                "n": n,
                "total": total
            }),
            MigrationEvent::Prefetching { total } => serde_json::json!({
                "event": "progress",
                "phase": "images",
                "total": total
            }),
            MigrationEvent::Rendering { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "render",
                "n": n,
                "total": total
            }),
            MigrationEvent::Flushing { total } => serde_json::json!({
                "event": "progress",
                "phase": "redirects",
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: MigrationEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode '{}': use off, human or json", other),
        }
    }
}
