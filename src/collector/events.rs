use crate::collector::Collector;
use crate::models::{MessageDocument, RunSummary};

/// Lifecycle notifications streamed from an event source into the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    RunStarted {
        file: Option<String>,
    },
    SuiteStarted {
        file: Option<String>,
        title: String,
    },
    SuiteFinished {
        file: Option<String>,
    },
    TestPassed {
        file: Option<String>,
        name: String,
    },
    TestFailed {
        file: Option<String>,
        name: String,
        message: String,
    },
    RunFinished {
        file: Option<String>,
        summary: RunSummary,
    },
    /// Raw output that is not a lifecycle event.
    Output {
        line: String,
    },
    Error {
        message: String,
    },
}

/// Apply one event to the collector. Returns the documents it finalized.
pub fn handle_test_event(collector: &mut Collector, event: TestEvent) -> Vec<MessageDocument> {
    match event {
        TestEvent::RunStarted { file } => {
            tracing::debug!(file = ?file, "run started");
            collector.on_run_begin(file.as_deref());
        }

        TestEvent::SuiteStarted { file, title } => {
            tracing::trace!(title = %title, "suite started");
            collector.on_suite_begin(file.as_deref());
        }

        TestEvent::SuiteFinished { file } => {
            collector.on_suite_end(file.as_deref());
        }

        TestEvent::TestPassed { file, name } => {
            collector.on_test_pass(file.as_deref(), &name);
        }

        TestEvent::TestFailed {
            file,
            name,
            message,
        } => {
            tracing::debug!(test = %name, error = %message, "test failed");
            collector.on_test_fail(file.as_deref(), &name, &message);
        }

        TestEvent::RunFinished { file, summary } => {
            let documents = collector.on_run_end(file.as_deref(), summary);
            for document in &documents {
                tracing::info!(target: "report", "\n{}", document.render_plain());
            }
            return documents;
        }

        TestEvent::Output { line } => {
            tracing::debug!(target: "runner_output", "{}", line);
        }

        TestEvent::Error { message } => {
            tracing::error!("{}", message);
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::collector::CollectorSettings;
    use crate::models::{ColorCode, Icon};

    fn collector() -> Collector {
        Collector::new(CollectorSettings {
            group_by_file: false,
            icon: Icon::Emoji(":test_tube:".into()),
            username: "bot".into(),
            video_url: Some("https://video".into()),
            workspace: PathBuf::from("/repo"),
        })
    }

    #[test]
    fn only_run_finished_yields_documents() {
        let mut c = collector();
        let events = vec![
            TestEvent::RunStarted { file: None },
            TestEvent::SuiteStarted {
                file: None,
                title: "A".into(),
            },
            TestEvent::TestPassed {
                file: None,
                name: "A foo".into(),
            },
            TestEvent::Output {
                line: "console noise".into(),
            },
            TestEvent::TestFailed {
                file: None,
                name: "A bar".into(),
                message: "boom".into(),
            },
            TestEvent::SuiteFinished { file: None },
        ];
        for event in events {
            assert!(handle_test_event(&mut c, event).is_empty());
        }

        let docs = handle_test_event(
            &mut c,
            TestEvent::RunFinished {
                file: None,
                summary: RunSummary {
                    passed: 1,
                    failed: 1,
                },
            },
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].lines().len(), 2);
        assert_eq!(docs[0].envelope().color, ColorCode::Failure);
        assert!(docs[0].envelope().accessory.is_some());
    }
}
