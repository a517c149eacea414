//! Sync progress reporting.
//!
//! Reports what a `drive-rag sync` run is doing: listing the source tree,
//! then one line per file with its outcome. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// The provider is walking the source tree. Total unknown.
    Listing { root: String },
    /// File `n` of `total` reached a terminal state.
    File {
        n: u64,
        total: u64,
        name: String,
        outcome: &'static str,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest pipeline.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  1,234 / 5,000  ingested  Protocol.pdf".
pub struct StderrProgress;

impl StderrProgress {
    fn render(event: &SyncProgressEvent) -> String {
        match event {
            SyncProgressEvent::Listing { root } => format!("sync {}  listing...\n", root),
            SyncProgressEvent::File {
                n,
                total,
                name,
                outcome,
            } => format!(
                "sync  {} / {}  {:<8}  {}\n",
                format_number(*n),
                format_number(*total),
                outcome,
                name
            ),
        }
    }
}

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(Self::render(&event).as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn render(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Listing { root } => serde_json::json!({
                "event": "progress",
                "phase": "listing",
                "root": root
            }),
            SyncProgressEvent::File {
                n,
                total,
                name,
                outcome,
            } => serde_json::json!({
                "event": "progress",
                "phase": "file",
                "n": n,
                "total": total,
                "name": name,
                "outcome": outcome
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::render(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_event() -> SyncProgressEvent {
        SyncProgressEvent::File {
            n: 1234,
            total: 5000,
            name: "Sepsis.pdf".to_string(),
            outcome: "ingested",
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_line_shape() {
        assert_eq!(
            StderrProgress::render(&file_event()),
            "sync  1,234 / 5,000  ingested  Sepsis.pdf\n"
        );
    }

    #[test]
    fn json_line_shape() {
        let v = JsonProgress::render(&file_event());
        assert_eq!(v["phase"], "file");
        assert_eq!(v["n"], 1234);
        assert_eq!(v["outcome"], "ingested");

        let v = JsonProgress::render(&SyncProgressEvent::Listing {
            root: "abc".to_string(),
        });
        assert_eq!(v["phase"], "listing");
    }
}
