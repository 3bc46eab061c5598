use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

impl TestStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✅",
            TestStatus::Failed => "⛔",
        }
    }
}

/// Overall color of a message, resolved when the document is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorCode {
    #[default]
    Pending,
    Success,
    Failure,
}

impl ColorCode {
    pub fn hex(&self) -> &'static str {
        match self {
            ColorCode::Pending => "#a0a0a0",
            ColorCode::Success => "#2eb886",
            ColorCode::Failure => "#e01e5a",
        }
    }
}
