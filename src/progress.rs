//! Scan progress reporting.
//!
//! Reports observable progress during `clipcat scan` so users see what is
//! being walked and how many writes are left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::str::FromStr;

/// A single progress event for a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanProgressEvent {
    /// Walking the tree. Total unknown.
    Walking { dirs: u64, clips: u64 },
    /// Applying catalog writes: n of total decisions.
    Reconciling { n: u64, total: u64 },
    /// Extracting tags: n of total clips.
    SyncingTags { n: u64, total: u64 },
}

/// Reports scan progress. Implementations write to stderr (human or JSON).
pub trait ScanProgressReporter: Send + Sync {
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress on stderr: "scan  reconciling  1,234 / 5,000 clips".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Walking { dirs, clips } => format!(
                "scan  walking  {} dirs, {} clips\n",
                format_number(*dirs),
                format_number(*clips)
            ),
            ScanProgressEvent::Reconciling { n, total } => format!(
                "scan  reconciling  {} / {} clips\n",
                format_number(*n),
                format_number(*total)
            ),
            ScanProgressEvent::SyncingTags { n, total } => format!(
                "scan  tags  {} / {} clips\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        let obj = match &event {
            ScanProgressEvent::Walking { dirs, clips } => serde_json::json!({
                "event": "progress",
                "phase": "walking",
                "dirs": dirs,
                "clips": clips
            }),
            ScanProgressEvent::Reconciling { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "reconciling",
                "n": n,
                "total": total
            }),
            ScanProgressEvent::SyncingTags { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "syncing_tags",
                "n": n,
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

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
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

    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected off, human, or json",
                other
            )),
        }
    }
}
