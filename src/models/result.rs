use serde::{Deserialize, Serialize};

use super::status::TestStatus;

/// One observed test outcome inside a message document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub status: TestStatus,
    /// Suite path plus test title.
    pub label: String,
    /// Set iff `status` is `Failed`.
    pub error_message: Option<String>,
    pub sequence_index: usize,
    /// Suite nesting at append time, only used for plain-text indentation.
    pub depth: usize,
}

impl ResultEntry {
    pub fn passed(label: String, sequence_index: usize, depth: usize) -> Self {
        Self {
            status: TestStatus::Passed,
            label,
            error_message: None,
            sequence_index,
            depth,
        }
    }

    pub fn failed(label: String, message: String, sequence_index: usize, depth: usize) -> Self {
        Self {
            status: TestStatus::Failed,
            label,
            error_message: Some(message),
            sequence_index,
            depth,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == TestStatus::Failed
    }

    /// Single-line rendering, e.g. `⛔ A bar - error: boom`.
    pub fn text(&self) -> String {
        match &self.error_message {
            Some(message) if self.is_failure() => {
                format!("{} {} - error: {}", self.status.icon(), self.label, message)
            }
            _ => format!("{} {}", self.status.icon(), self.label),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
