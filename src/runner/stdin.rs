use anyhow::Result;
use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::sync::mpsc;

use crate::collector::TestEvent;

use super::{EventSource, forward_lines};

/// Reads the NDJSON event stream piped in by an external reporter.
pub struct StdinSource;

#[async_trait]
impl EventSource for StdinSource {
    async fn stream(&self, tx: mpsc::UnboundedSender<TestEvent>) -> Result<Option<i32>> {
        let reader = BufReader::new(tokio::io::stdin());
        let count = forward_lines(reader, &tx).await;
        tracing::debug!(lines = count, "stdin closed");
        Ok(None)
    }

    fn name(&self) -> &str {
        "stdin"
    }
}
