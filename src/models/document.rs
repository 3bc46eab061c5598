use serde::{Deserialize, Serialize};

use crate::error::ReportError;

use super::result::{ResultEntry, RunSummary};
use super::status::ColorCode;

/// Label of the single document used when grouping by file is disabled.
pub const GLOBAL_LABEL: &str = "all tests";

const PLACEHOLDER_TITLE: &str = "Test run in progress";
const ACCESSORY_TEXT: &str = "Watch recording";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Icon {
    Url(String),
    Emoji(String),
}

/// Clickable element attached to the summary block (e.g. a video link).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessory {
    pub text: String,
    pub url: String,
}

/// Fields copied verbatim into every payload cut from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub title: String,
    pub color: ColorCode,
    pub icon: Icon,
    pub username: String,
    pub accessory: Option<Accessory>,
}

/// Accumulated results for one destination label during a single run.
#[derive(Debug, Clone)]
pub struct MessageDocument {
    label: String,
    envelope: Envelope,
    lines: Vec<ResultEntry>,
    depth: usize,
    finalized: bool,
}

impl MessageDocument {
    pub fn new(label: impl Into<String>, icon: Icon, username: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            envelope: Envelope {
                title: PLACEHOLDER_TITLE.to_string(),
                color: ColorCode::Pending,
                icon,
                username: username.into(),
                accessory: None,
            },
            lines: Vec::new(),
            depth: 0,
            finalized: false,
        }
    }

    /// Build a document from an existing envelope and entries, already finalized.
    /// Used for derived documents, which never accept new entries.
    pub fn derived(label: String, envelope: Envelope, lines: Vec<ResultEntry>) -> Self {
        Self {
            label,
            envelope,
            lines,
            depth: 0,
            finalized: true,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn lines(&self) -> &[ResultEntry] {
        &self.lines
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn has_failures(&self) -> bool {
        self.lines.iter().any(ResultEntry::is_failure)
    }

    /// Pass/fail counts derived from the entries collected so far.
    pub fn summary(&self) -> RunSummary {
        let failed = self.lines.iter().filter(|e| e.is_failure()).count();
        RunSummary {
            passed: self.lines.len() - failed,
            failed,
        }
    }

    pub fn enter_suite(&mut self) {
        self.depth += 1;
    }

    /// Leave a suite. Returns an error (and leaves depth at zero) on underflow.
    pub fn leave_suite(&mut self) -> Result<(), ReportError> {
        match self.depth.checked_sub(1) {
            Some(depth) => {
                self.depth = depth;
                Ok(())
            }
            None => Err(ReportError::MalformedDocument(format!(
                "suite depth underflow in '{}'",
                self.label
            ))),
        }
    }

    /// Append a passed entry. Returns its sequence index.
    pub fn push_pass(&mut self, label: String) -> Result<usize, ReportError> {
        self.ensure_open()?;
        let index = self.lines.len();
        self.lines.push(ResultEntry::passed(label, index, self.depth));
        Ok(index)
    }

    /// Append a failed entry. Returns its sequence index.
    pub fn push_fail(&mut self, label: String, message: String) -> Result<usize, ReportError> {
        self.ensure_open()?;
        let index = self.lines.len();
        self.lines
            .push(ResultEntry::failed(label, message, index, self.depth));
        Ok(index)
    }

    /// Seal the document: final title, color, and the optional recording link.
    /// A second call is rejected and leaves the document untouched.
    pub fn finalize(
        &mut self,
        summary: RunSummary,
        video_url: Option<&str>,
    ) -> Result<(), ReportError> {
        self.ensure_open()?;
        let has_failures = summary.has_failures();

        self.envelope.title = self.final_title(summary.passed, summary.total());
        self.envelope.color = if has_failures {
            ColorCode::Failure
        } else {
            ColorCode::Success
        };
        if has_failures && let Some(url) = video_url {
            self.envelope.accessory = Some(Accessory {
                text: ACCESSORY_TEXT.to_string(),
                url: url.to_string(),
            });
        }
        self.finalized = true;
        Ok(())
    }

    fn final_title(&self, passed: usize, total: usize) -> String {
        if self.label == GLOBAL_LABEL {
            format!("Test finished. {}/{} ok", passed, total)
        } else {
            format!("{}: {}/{} ok", self.label, passed, total)
        }
    }

    fn ensure_open(&self) -> Result<(), ReportError> {
        if self.finalized {
            return Err(ReportError::MalformedDocument(format!(
                "document '{}' is already finalized",
                self.label
            )));
        }
        Ok(())
    }

    pub fn render_plain(&self) -> String {
        render_plain(&self.lines, &self.envelope.title)
    }
}

/// Plain-text rendering, two spaces of indentation per suite below the root.
pub fn render_plain(lines: &[ResultEntry], title: &str) -> String {
    let mut out = String::new();
    for entry in lines {
        out.push_str(&"  ".repeat(entry.depth.saturating_sub(1)));
        out.push_str(&entry.text());
        out.push('\n');
    }
    out.push_str(title);
    out
}
