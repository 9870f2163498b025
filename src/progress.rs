//! Translation progress reporting.
//!
//! Progress goes to **stderr** so stdout stays free for the job summary.
//! Three reporters: human lines, JSON lines, and a no-op.

use std::io::Write;
use std::str::FromStr;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Reading the package and collecting runs.
    Extracting { document: String },
    /// Chunk plan ready; `resumed` chunks come from the checkpoint.
    Planned {
        document: String,
        runs: u64,
        chunks: u64,
        resumed: u64,
    },
    /// A chunk reached a terminal state.
    Translating {
        document: String,
        finished: u64,
        total: u64,
    },
}

/// Receives progress events from the pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: "translate report.docx  chunks  12 / 40".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Extracting { document } => {
                format!("translate {}  extracting...\n", document)
            }
            ProgressEvent::Planned {
                document,
                runs,
                chunks,
                resumed,
            } => format!(
                "translate {}  {} runs in {} chunks ({} resumed)\n",
                document,
                format_number(*runs),
                format_number(*chunks),
                format_number(*resumed)
            ),
            ProgressEvent::Translating {
                document,
                finished,
                total,
            } => format!(
                "translate {}  chunks  {} / {}\n",
                document,
                format_number(*finished),
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Extracting { document } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "extracting"
            }),
            ProgressEvent::Planned {
                document,
                runs,
                chunks,
                resumed,
            } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "planned",
                "runs": runs,
                "chunks": chunks,
                "resumed": resumed
            }),
            ProgressEvent::Translating {
                document,
                finished,
                total,
            } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "translating",
                "n": finished,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
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
    /// Human progress when stderr is a TTY, otherwise off.
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

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "invalid progress mode '{}': expected off, human, or json",
                other
            )),
        }
    }
}
