pub mod mocha;
pub mod stdin;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::collector::TestEvent;
use crate::models::RunSummary;

/// Something that produces test lifecycle events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stream events until the source is exhausted.
    /// Returns the exit code of the underlying test process, if there is one.
    async fn stream(&self, tx: mpsc::UnboundedSender<TestEvent>) -> Result<Option<i32>>;

    /// Display name for this source (e.g., "mocha").
    fn name(&self) -> &str;
}

/// Pick the event source: stdin when asked for or when there is nothing to run.
pub fn detect(workspace: PathBuf, use_stdin: bool, mocha_args: Vec<String>) -> Arc<dyn EventSource> {
    if use_stdin || mocha_args.is_empty() {
        Arc::new(stdin::StdinSource)
    } else {
        Arc::new(mocha::MochaRunner::new(workspace, mocha_args))
    }
}

/// Forward NDJSON lines from `reader` as events until EOF.
pub(crate) async fn forward_lines<R>(mut reader: R, tx: &mpsc::UnboundedSender<TestEvent>) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut forwarded = 0;
    while let Some(line) = read_line_lossy(&mut reader).await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if tx.send(parse_line(line)).is_err() {
            break;
        }
        forwarded += 1;
    }
    forwarded
}

/// Read one line, replacing invalid UTF-8 instead of failing on it.
/// Returns `None` at EOF or on a read error.
pub(crate) async fn read_line_lossy<R>(reader: &mut R) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) => None,
        Ok(_) => Some(String::from_utf8_lossy(&buf).into_owned()),
        Err(e) => {
            tracing::warn!(error = %e, "stopped reading runner output");
            None
        }
    }
}

/// Parse one line of reporter output. Anything that is not an event is raw output.
pub fn parse_line(line: &str) -> TestEvent {
    match serde_json::from_str::<ReporterEvent>(line) {
        Ok(event) => event.into_test_event(),
        Err(_) => TestEvent::Output {
            line: line.to_string(),
        },
    }
}

// --- NDJSON deserialization types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ReporterEvent {
    RunBegin {
        file: Option<String>,
    },
    SuiteBegin {
        file: Option<String>,
        #[serde(default)]
        title: String,
    },
    SuiteEnd {
        file: Option<String>,
    },
    TestPass {
        file: Option<String>,
        #[serde(rename = "fullTitle")]
        full_title: String,
    },
    TestFail {
        file: Option<String>,
        #[serde(rename = "fullTitle")]
        full_title: String,
        error: Option<ReporterError>,
    },
    RunEnd {
        file: Option<String>,
        #[serde(default)]
        passes: usize,
        #[serde(default)]
        failures: usize,
    },
}

#[derive(Debug, Deserialize)]
struct ReporterError {
    message: Option<String>,
    #[allow(dead_code)]
    stack: Option<String>,
}

impl ReporterEvent {
    fn into_test_event(self) -> TestEvent {
        match self {
            ReporterEvent::RunBegin { file } => TestEvent::RunStarted { file },
            ReporterEvent::SuiteBegin { file, title } => TestEvent::SuiteStarted { file, title },
            ReporterEvent::SuiteEnd { file } => TestEvent::SuiteFinished { file },
            ReporterEvent::TestPass { file, full_title } => TestEvent::TestPassed {
                file,
                name: full_title,
            },
            ReporterEvent::TestFail {
                file,
                full_title,
                error,
            } => TestEvent::TestFailed {
                file,
                name: full_title,
                message: error
                    .and_then(|e| e.message)
                    .map(|m| strip_ansi(&m))
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            ReporterEvent::RunEnd {
                file,
                passes,
                failures,
            } => TestEvent::RunFinished {
                file,
                summary: RunSummary {
                    passed: passes,
                    failed: failures,
                },
            },
        }
    }
}

/// Strip ANSI escape sequences from a string.
fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // Skip until we hit a letter (end of escape sequence)
            for c2 in chars.by_ref() {
                if c2.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
