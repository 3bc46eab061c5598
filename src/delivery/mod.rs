pub mod slack;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::{ReportConfig, WebhookConfig};
use crate::error::ReportError;
use crate::models::{Envelope, MessageDocument, ResultEntry};

pub use slack::SlackWebhook;

/// Blocks every payload spends on its envelope (summary section + divider).
pub const ENVELOPE_BLOCKS: usize = 2;

/// Lifecycle of a payload. A sealed payload that never reaches `Sent` is
/// simply dropped; that loss is not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadState {
    Building,
    Sealed,
    Sent,
}

/// One transport request worth of a document: a private copy of the
/// envelope plus a contiguous slice of its entries.
#[derive(Debug, Clone)]
pub struct Payload {
    pub label: String,
    pub envelope: Envelope,
    pub lines: Vec<ResultEntry>,
    pub chunk_index: usize,
    state: PayloadState,
}

impl Payload {
    fn building(document: &MessageDocument, chunk_index: usize) -> Self {
        Self {
            label: document.label().to_string(),
            envelope: document.envelope().clone(),
            lines: Vec::new(),
            chunk_index,
            state: PayloadState::Building,
        }
    }

    fn seal(mut self) -> Self {
        self.state = PayloadState::Sealed;
        self
    }

    pub fn state(&self) -> PayloadState {
        self.state
    }

    fn mark_sent(&mut self) {
        self.state = PayloadState::Sent;
    }
}

/// How many result entries fit next to the envelope under a block limit.
pub fn entries_per_payload(max_blocks: usize) -> usize {
    max_blocks.saturating_sub(ENVELOPE_BLOCKS).max(1)
}

/// Split a document into sealed payloads of at most `max_entries` entries each,
/// cut purely by position. An empty document still yields one payload so the
/// summary always goes out.
pub fn chunk(document: &MessageDocument, max_entries: usize) -> impl Iterator<Item = Payload> + '_ {
    let size = max_entries.max(1);
    let mut remaining = document.lines();
    let mut chunk_index = 0;

    std::iter::from_fn(move || {
        if remaining.is_empty() && chunk_index > 0 {
            return None;
        }
        let (head, tail) = remaining.split_at(size.min(remaining.len()));
        remaining = tail;

        let mut payload = Payload::building(document, chunk_index);
        payload.lines = head.to_vec();
        chunk_index += 1;
        Some(payload.seal())
    })
}

/// Copy of `document` keeping only failed entries, with their original
/// sequence indices.
pub fn derive_failures_only(document: &MessageDocument) -> MessageDocument {
    let failures = document
        .lines()
        .iter()
        .filter(|entry| entry.is_failure())
        .cloned()
        .collect();
    MessageDocument::derived(
        document.label().to_string(),
        document.envelope().clone(),
        failures,
    )
}

/// Sends a single payload to a webhook URL.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, url: &str, payload: &Payload) -> Result<(), ReportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Primary,
    FailuresOnly,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Primary => write!(f, "primary"),
            Destination::FailuresOnly => write!(f, "failures-only"),
        }
    }
}

/// Outcome of one chunk send.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub label: String,
    pub destination: Destination,
    pub chunk_index: usize,
    pub state: PayloadState,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub sent: usize,
    pub failed: usize,
}

/// Spawn one independent send per payload, in chunk order. A failing chunk
/// never stops the others, and nothing is retried.
pub fn deliver(
    transport: Arc<dyn WebhookTransport>,
    payloads: impl IntoIterator<Item = Payload>,
    url: &str,
    destination: Destination,
) -> Vec<JoinHandle<DeliveryReport>> {
    payloads
        .into_iter()
        .map(|mut payload| {
            let transport = Arc::clone(&transport);
            let url = url.to_string();
            tokio::spawn(async move {
                let error = match transport.send(&url, &payload).await {
                    Ok(()) => {
                        payload.mark_sent();
                        tracing::debug!(
                            label = %payload.label,
                            %destination,
                            chunk = payload.chunk_index,
                            entries = payload.lines.len(),
                            "payload sent"
                        );
                        None
                    }
                    Err(e) => {
                        tracing::warn!(
                            label = %payload.label,
                            %destination,
                            chunk = payload.chunk_index,
                            error = %e,
                            "payload delivery failed"
                        );
                        Some(e.to_string())
                    }
                };
                let state = payload.state();
                DeliveryReport {
                    label: payload.label,
                    destination,
                    chunk_index: payload.chunk_index,
                    state,
                    error,
                }
            })
        })
        .collect()
}

/// Wait for every in-flight send. Short-lived processes call this before exit.
pub async fn wait_all(handles: Vec<JoinHandle<DeliveryReport>>) -> DeliverySummary {
    let mut summary = DeliverySummary::default();
    for joined in futures_util::future::join_all(handles).await {
        match joined {
            Ok(report) if report.state == PayloadState::Sent => summary.sent += 1,
            Ok(report) => {
                tracing::debug!(
                    label = %report.label,
                    destination = %report.destination,
                    chunk = report.chunk_index,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "chunk not delivered"
                );
                summary.failed += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "delivery task aborted");
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Routes finalized documents to the configured webhooks.
pub struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
    primary_url: Option<String>,
    failures_url: Option<String>,
    max_entries: usize,
    send_empty_failures: bool,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        webhook: &WebhookConfig,
        report: &ReportConfig,
    ) -> Self {
        Self {
            transport,
            primary_url: webhook.url.clone(),
            failures_url: webhook.failures_url.clone(),
            max_entries: entries_per_payload(webhook.max_blocks),
            send_empty_failures: report.send_empty_failures,
        }
    }

    /// Fire off every chunk of `document`, plus the failures-only copy when a
    /// secondary destination is configured. Returns the in-flight sends.
    pub fn dispatch(&self, document: &MessageDocument) -> Vec<JoinHandle<DeliveryReport>> {
        let mut handles = Vec::new();
        if !document.is_finalized() {
            tracing::warn!(label = document.label(), "refusing to send an unfinalized document");
            return handles;
        }

        match &self.primary_url {
            Some(url) => handles.extend(deliver(
                Arc::clone(&self.transport),
                chunk(document, self.max_entries),
                url,
                Destination::Primary,
            )),
            None => tracing::warn!(
                label = document.label(),
                "no webhook configured, results not delivered"
            ),
        }

        if let Some(url) = &self.failures_url
            && (document.has_failures() || self.send_empty_failures)
        {
            let failures = derive_failures_only(document);
            handles.extend(deliver(
                Arc::clone(&self.transport),
                chunk(&failures, self.max_entries),
                url,
                Destination::FailuresOnly,
            ));
        }

        handles
    }
}
