// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use crate::transfer::TransferReport;
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => emit(&JsonEvent {
                event: "success",
                message,
                duration_secs: self.duration(),
                summary: None,
            }),
        }
    }

    /// Print the outcome of a push or pull, including anything that went wrong on the way.
    pub fn transfer(&self, verb: &str, report: &TransferReport) {
        let summary = TransferSummary::from(report);
        let message = format!(
            "{verb} {} file(s), {} director(ies), {} bytes",
            summary.files, summary.directories, summary.bytes
        );
        match self.mode {
            OutputMode::Json => emit(&JsonEvent {
                event: if report.is_clean() { "success" } else { "partial" },
                message: &message,
                duration_secs: self.duration(),
                summary: Some(summary),
            }),
            OutputMode::Normal | OutputMode::Quiet => {
                for warning in report.diagnostics.warnings() {
                    eprintln!("Warning: {}", warning.message);
                }
                self.success(&message);
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                    summary: None,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }
}

fn emit(event: &JsonEvent<'_>) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<TransferSummary>,
}

#[derive(Debug, Serialize)]
struct TransferSummary {
    files: u64,
    directories: u64,
    bytes: u64,
    warnings: Vec<String>,
}

impl From<&TransferReport> for TransferSummary {
    fn from(report: &TransferReport) -> Self {
        Self {
            files: report.files,
            directories: report.directories,
            bytes: report.bytes,
            warnings: report
                .diagnostics
                .warnings()
                .iter()
                .map(|w| w.message.clone())
                .collect(),
        }
    }
}
