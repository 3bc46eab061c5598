use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::models::document::GLOBAL_LABEL;
use crate::models::{Icon, MessageDocument, RunSummary};

pub mod events;

pub use events::{TestEvent, handle_test_event};

const UNTITLED_TEST: &str = "(untitled test)";

/// Presentation and routing settings a collector needs for one run.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub group_by_file: bool,
    pub icon: Icon,
    pub username: String,
    pub video_url: Option<String>,
    /// Prefix stripped from file paths to build display labels.
    pub workspace: PathBuf,
}

impl CollectorSettings {
    pub fn from_config(config: &Config, workspace: PathBuf) -> Self {
        Self {
            group_by_file: config.report.group_by_file,
            icon: config.webhook.icon(),
            username: config.webhook.username().to_string(),
            video_url: config.webhook.video_url.clone(),
            workspace,
        }
    }
}

/// Turns lifecycle notifications into per-label message documents.
///
/// Owns every in-progress document for the current run. Documents leave the
/// collector when they are finalized, so nothing outlives a run.
pub struct Collector {
    settings: CollectorSettings,
    documents: HashMap<String, MessageDocument>,
    /// Labels in first-seen order, so run end finalizes deterministically.
    order: Vec<String>,
    /// Labels already finalized during this run.
    finished: HashSet<String>,
}

impl Collector {
    pub fn new(settings: CollectorSettings) -> Self {
        Self {
            settings,
            documents: HashMap::new(),
            order: Vec::new(),
            finished: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn document(&self, label: &str) -> Option<&MessageDocument> {
        self.documents.get(label)
    }

    /// Labels of the documents currently in progress.
    pub fn open_labels(&self) -> &[String] {
        &self.order
    }

    /// Routing key for an event. `None` means the event belongs to no document
    /// (a file-less event while grouping by file).
    fn key_for(&self, file: Option<&str>) -> Option<String> {
        if !self.settings.group_by_file {
            return Some(GLOBAL_LABEL.to_string());
        }
        file.map(|path| self.display_label(path))
    }

    fn display_label(&self, path: &str) -> String {
        match Path::new(path).strip_prefix(&self.settings.workspace) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                relative.to_string_lossy().to_string()
            }
            _ => path.to_string(),
        }
    }

    fn fresh_document(&self, label: &str) -> MessageDocument {
        MessageDocument::new(
            label,
            self.settings.icon.clone(),
            self.settings.username.clone(),
        )
    }

    /// Find or create the open document for `label`. Returns `None` if the
    /// label was already finalized in this run.
    fn open_document(&mut self, label: &str) -> Option<&mut MessageDocument> {
        if self.finished.contains(label) {
            tracing::warn!(label, "event for an already finalized document ignored");
            return None;
        }
        if !self.documents.contains_key(label) {
            let document = self.fresh_document(label);
            self.documents.insert(label.to_string(), document);
            self.order.push(label.to_string());
        }
        self.documents.get_mut(label)
    }

    pub fn on_run_begin(&mut self, file: Option<&str>) {
        match self.key_for(file) {
            Some(label) => {
                if self.documents.contains_key(&label) {
                    tracing::warn!(label = %label, "run began twice, discarding partial results");
                    self.documents.remove(&label);
                    self.order.retain(|l| l != &label);
                }
                self.finished.remove(&label);
                self.open_document(&label);
            }
            None => {
                self.documents.clear();
                self.order.clear();
                self.finished.clear();
            }
        }
    }

    pub fn on_suite_begin(&mut self, file: Option<&str>) {
        let Some(label) = self.key_for(file) else {
            return;
        };
        if let Some(document) = self.open_document(&label) {
            document.enter_suite();
        }
    }

    pub fn on_suite_end(&mut self, file: Option<&str>) {
        let Some(label) = self.key_for(file) else {
            return;
        };
        if let Some(document) = self.documents.get_mut(&label)
            && let Err(e) = document.leave_suite()
        {
            tracing::warn!(error = %e, "suite end without matching begin");
        }
    }

    pub fn on_test_pass(&mut self, file: Option<&str>, name: &str) {
        let label = self.test_label(file);
        let name = normalize_name(name);
        if let Some(document) = self.open_document(&label)
            && let Err(e) = document.push_pass(name)
        {
            tracing::warn!(error = %e, "dropping passed test");
        }
    }

    pub fn on_test_fail(&mut self, file: Option<&str>, name: &str, message: &str) {
        let label = self.test_label(file);
        let name = normalize_name(name);
        if let Some(document) = self.open_document(&label)
            && let Err(e) = document.push_fail(name, message.to_string())
        {
            tracing::warn!(error = %e, "dropping failed test");
        }
    }

    fn test_label(&self, file: Option<&str>) -> String {
        self.key_for(file)
            .unwrap_or_else(|| GLOBAL_LABEL.to_string())
    }

    /// Finalize the documents a run-end notification covers and hand them over.
    ///
    /// Single mode uses the runner's stats. Grouped mode counts each
    /// document's own entries; a file-less run end closes every open document.
    pub fn on_run_end(&mut self, file: Option<&str>, stats: RunSummary) -> Vec<MessageDocument> {
        let labels: Vec<String> = match (self.settings.group_by_file, file) {
            (false, _) => vec![GLOBAL_LABEL.to_string()],
            (true, Some(path)) => vec![self.display_label(path)],
            (true, None) => {
                if self.order.is_empty() && self.finished.is_empty() {
                    vec![GLOBAL_LABEL.to_string()]
                } else {
                    self.order.clone()
                }
            }
        };

        let mut finalized = Vec::with_capacity(labels.len());
        for label in labels {
            if self.open_document(&label).is_none() {
                continue;
            }
            let Some(mut document) = self.documents.remove(&label) else {
                continue;
            };
            self.order.retain(|l| l != &label);

            let summary = if self.settings.group_by_file {
                document.summary()
            } else {
                stats
            };
            match document.finalize(summary, self.settings.video_url.as_deref()) {
                Ok(()) => {
                    tracing::info!(
                        label = %label,
                        passed = summary.passed,
                        total = summary.total(),
                        "document finalized"
                    );
                    self.finished.insert(label);
                    finalized.push(document);
                }
                Err(e) => tracing::warn!(error = %e, "skipping document"),
            }
        }
        finalized
    }
}

fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        UNTITLED_TEST.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColorCode, TestStatus};

    fn settings(group_by_file: bool, video_url: Option<&str>) -> CollectorSettings {
        CollectorSettings {
            group_by_file,
            icon: Icon::Emoji(":test_tube:".into()),
            username: "bot".into(),
            video_url: video_url.map(str::to_string),
            workspace: PathBuf::from("/repo"),
        }
    }

    #[test]
    fn single_mode_end_to_end_scenario() {
        let mut c = Collector::new(settings(false, Some("https://video")));
        c.on_run_begin(None);
        c.on_suite_begin(None);
        c.on_test_pass(None, "A foo");
        c.on_test_fail(None, "A bar", "boom");
        c.on_suite_end(None);
        let docs = c.on_run_end(None, RunSummary { passed: 1, failed: 1 });

        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.lines().len(), 2);
        assert_eq!(doc.lines()[0].status, TestStatus::Passed);
        assert_eq!(doc.lines()[0].label, "A foo");
        assert_eq!(doc.lines()[1].status, TestStatus::Failed);
        assert_eq!(doc.lines()[1].label, "A bar");
        assert_eq!(doc.lines()[1].error_message.as_deref(), Some("boom"));
        assert_eq!(doc.envelope().color, ColorCode::Failure);
        assert!(doc.envelope().title.contains("1/2"));
        assert_eq!(
            doc.envelope().accessory.as_ref().map(|a| a.url.as_str()),
            Some("https://video")
        );
        assert!(c.open_labels().is_empty());
    }

    #[test]
    fn zero_tests_yields_empty_success_document() {
        let mut c = Collector::new(settings(false, None));
        c.on_run_begin(None);
        let docs = c.on_run_end(None, RunSummary::default());
        assert_eq!(docs.len(), 1);
        assert!(docs[0].lines().is_empty());
        assert_eq!(docs[0].envelope().color, ColorCode::Success);
    }

    #[test]
    fn grouping_keeps_files_isolated() {
        let mut c = Collector::new(settings(true, None));
        c.on_run_begin(None);
        c.on_suite_begin(None); // root suite has no file
        c.on_suite_begin(Some("/repo/test/a.spec.js"));
        c.on_test_pass(Some("/repo/test/a.spec.js"), "a one");
        c.on_suite_begin(Some("/repo/test/b.spec.js"));
        c.on_test_fail(Some("/repo/test/b.spec.js"), "b one", "nope");
        c.on_test_pass(Some("/repo/test/a.spec.js"), "a two");

        assert_eq!(c.open_labels(), ["test/a.spec.js", "test/b.spec.js"]);
        let a = c.document("test/a.spec.js").unwrap();
        assert_eq!(a.lines().len(), 2);
        assert_eq!(a.lines()[1].sequence_index, 1);
        assert_eq!(c.document("test/b.spec.js").unwrap().lines()[0].sequence_index, 0);

        let docs = c.on_run_end(None, RunSummary { passed: 2, failed: 1 });
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].envelope().title, "test/a.spec.js: 2/2 ok");
        assert_eq!(docs[0].envelope().color, ColorCode::Success);
        assert_eq!(docs[1].envelope().title, "test/b.spec.js: 0/1 ok");
        assert_eq!(docs[1].envelope().color, ColorCode::Failure);
    }

    #[test]
    fn per_file_run_end_finalizes_only_that_file() {
        let mut c = Collector::new(settings(true, None));
        c.on_test_pass(Some("/repo/a.js"), "a");
        c.on_test_pass(Some("/repo/b.js"), "b");
        let docs = c.on_run_end(Some("/repo/a.js"), RunSummary::default());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].label(), "a.js");
        assert_eq!(c.open_labels(), ["b.js"]);

        // Late events for a finished file are dropped.
        c.on_test_pass(Some("/repo/a.js"), "late");
        assert!(c.document("a.js").is_none());
        assert!(c.on_run_end(Some("/repo/a.js"), RunSummary::default()).is_empty());

        // A closing run end picks up what is left, and nothing more.
        let rest = c.on_run_end(None, RunSummary::default());
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].label(), "b.js");
        assert!(c.on_run_end(None, RunSummary::default()).is_empty());
    }

    #[test]
    fn labels_only_strip_whole_workspace_components() {
        let mut c = Collector::new(settings(true, None));
        c.on_test_pass(Some("/repo/test/a.js"), "inside");
        c.on_test_pass(Some("/repository/test/a.js"), "sibling");
        c.on_test_pass(Some("relative/b.js"), "relative");

        assert_eq!(
            c.open_labels(),
            ["test/a.js", "/repository/test/a.js", "relative/b.js"]
        );
    }

    #[test]
    fn grouped_run_without_tests_still_reports() {
        let mut c = Collector::new(settings(true, None));
        c.on_run_begin(None);
        let docs = c.on_run_end(None, RunSummary::default());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].label(), GLOBAL_LABEL);
    }

    #[test]
    fn unbalanced_suite_end_does_not_underflow() {
        let mut c = Collector::new(settings(false, None));
        c.on_run_begin(None);
        c.on_suite_end(None);
        c.on_suite_end(None);
        c.on_suite_begin(None);
        c.on_test_pass(None, "x");
        assert_eq!(c.document(GLOBAL_LABEL).unwrap().lines()[0].depth, 1);
    }

    #[test]
    fn run_end_is_exactly_once() {
        let mut c = Collector::new(settings(false, None));
        c.on_run_begin(None);
        assert_eq!(c.on_run_end(None, RunSummary::default()).len(), 1);
        assert!(c.on_run_end(None, RunSummary::default()).is_empty());
    }

    #[test]
    fn blank_test_names_get_a_placeholder() {
        let mut c = Collector::new(settings(false, None));
        c.on_test_pass(None, "  ");
        assert_eq!(c.document(GLOBAL_LABEL).unwrap().lines()[0].label, UNTITLED_TEST);
    }
}
