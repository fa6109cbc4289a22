//! Extraction and optimizer progress reporting.
//!
//! Long-running commands (`pidtag extract`, `pidtag optimize`) report
//! `(percent, message)` updates through the core's [`ProgressSink`]. The
//! reporters here print them on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

use pid_tagger_core::progress::ProgressSink;

/// Human-friendly progress on stderr: `optimize   42.0%  v=20 h=15 d=50 scored 61.3`.
pub struct StderrProgress {
    task: String,
}

impl StderrProgress {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }
}

impl ProgressSink for StderrProgress {
    fn progress(&self, percent: f64, message: &str) {
        let line = format!("{}  {:>5.1}%  {}\n", self.task, percent, message);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress {
    task: String,
}

impl JsonProgress {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }
}

impl ProgressSink for JsonProgress {
    fn progress(&self, percent: f64, message: &str) {
        let obj = serde_json::json!({
            "event": "progress",
            "task": self.task,
            "percent": percent,
            "message": message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&self, _percent: f64, _message: &str) {}
}

/// Thousands separators for counts printed in summaries.
pub fn format_number(n: u64) -> String {
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

    /// Build a reporter for this mode, labelled with the running task.
    pub fn reporter(&self, task: &str) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::new(task)),
            ProgressMode::Json => Box::new(JsonProgress::new(task)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
