//! Warning sink and the debug report written at the end of a run.
//!
//! Warnings never stop the run; they accumulate here and are either written
//! as JSON to the debug path or summarised on stdout.

use serde::Serialize;

use crate::span::{PositionTable, SiteKey};

/// One warning, resolved to a source location when the position service knows
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub file: String,
    pub line: u32,
    pub msg: String,
}

/// Everything reported to the tool user besides the rewritten files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugReport {
    /// Packages excluded from the analysis (e.g. due to build problems).
    pub excluded: Vec<String>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Default)]
pub struct WarningSink {
    warnings: Vec<Warning>,
}

impl WarningSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, positions: &PositionTable, key: SiteKey, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!("{msg}");
        let (file, line) = match positions.lookup(key) {
            Some(loc) => (loc.path, loc.line),
            None => (String::new(), 0),
        };
        self.warnings.push(Warning { file, line, msg });
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_report(self, excluded: Vec<String>) -> DebugReport {
        DebugReport { excluded, warnings: self.warnings }
    }
}

impl DebugReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Human-readable summary, used when no debug file path is given.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if !self.excluded.is_empty() {
            out.push_str("packages excluded due to build errors:\n");
            for e in &self.excluded {
                out.push_str(e);
                out.push('\n');
            }
        }
        if !self.warnings.is_empty() {
            out.push_str("code transformation warnings:\n");
            for w in &self.warnings {
                out.push_str(&w.msg);
                out.push('\n');
                out.push_str(&format!("{} (line {})\n", w.file, w.line));
            }
        }
        out
    }
}
