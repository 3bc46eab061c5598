use std::path::Path;

use serde::Deserialize;

use crate::error::ReportError;
use crate::models::Icon;

pub const CONFIG_FILE: &str = "slack-reporter.toml";
pub const DEFAULT_MAX_BLOCKS: usize = 50;
pub const DEFAULT_USERNAME: &str = "Test Reporter";
pub const DEFAULT_ICON_EMOJI: &str = ":test_tube:";

const ENV_WEBHOOK: &str = "CI_SLACK_REPORTER_WEBHOOK";
const ENV_FAILURES_WEBHOOK: &str = "CI_SLACK_REPORTER_FAILURES_WEBHOOK";
const ENV_ICON_URL: &str = "CI_SLACK_REPORTER_ICON_URL";
const ENV_USERNAME: &str = "CI_SLACK_REPORTER_USERNAME";
const ENV_VIDEO_URL: &str = "CI_SLACK_REPORTER_VIDEO_URL";
const ENV_MAX_BLOCKS: &str = "CI_SLACK_REPORTER_MAX_BLOCKS";
const ENV_GROUP_BY_FILE: &str = "CI_SLACK_REPORTER_GROUP_BY_FILE";
const ENV_SEND_EMPTY_FAILURES: &str = "CI_SLACK_REPORTER_SEND_EMPTY_FAILURES";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Where and how messages are delivered.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Primary destination. Required for delivery to do anything.
    pub url: Option<String>,
    /// Secondary destination receiving only failed tests.
    pub failures_url: Option<String>,
    pub icon_url: Option<String>,
    pub username: Option<String>,
    /// Recording link attached when a run has failures.
    pub video_url: Option<String>,
    /// Transport limit on blocks per request.
    pub max_blocks: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            failures_url: None,
            icon_url: None,
            username: None,
            video_url: None,
            max_blocks: DEFAULT_MAX_BLOCKS,
        }
    }
}

impl WebhookConfig {
    pub fn icon(&self) -> Icon {
        match &self.icon_url {
            Some(url) => Icon::Url(url.clone()),
            None => Icon::Emoji(DEFAULT_ICON_EMOJI.to_string()),
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Keep one document per test file instead of one for the whole run.
    pub group_by_file: bool,
    /// Send the failures-only message even when nothing failed.
    pub send_empty_failures: bool,
}

/// Overrides the mocha invocation when none is given on the command line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    /// Extra mocha arguments as a single shell-style string.
    /// Example: "--recursive test/e2e"
    pub command: Option<String>,
}

impl Config {
    /// Load `slack-reporter.toml` from the workspace root, then apply environment overrides.
    pub fn load(workspace: &Path) -> Self {
        let mut config = Self::from_file(&workspace.join(CONFIG_FILE));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn from_file(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config file");
                Self::default()
            }
        }
    }

    /// Overlay values from an environment-style lookup. Empty values count as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_WEBHOOK) {
            self.webhook.url = Some(v);
        }
        if let Some(v) = get(ENV_FAILURES_WEBHOOK) {
            self.webhook.failures_url = Some(v);
        }
        if let Some(v) = get(ENV_ICON_URL) {
            self.webhook.icon_url = Some(v);
        }
        if let Some(v) = get(ENV_USERNAME) {
            self.webhook.username = Some(v);
        }
        if let Some(v) = get(ENV_VIDEO_URL) {
            self.webhook.video_url = Some(v);
        }
        if let Some(v) = get(ENV_MAX_BLOCKS) {
            match v.trim().parse::<usize>() {
                Ok(n) => self.webhook.max_blocks = n,
                Err(_) => tracing::warn!(key = ENV_MAX_BLOCKS, value = %v, "not a number, ignored"),
            }
        }
        if let Some(v) = get(ENV_GROUP_BY_FILE) {
            if let Some(b) = parse_bool(&v) {
                self.report.group_by_file = b;
            } else {
                tracing::warn!(key = ENV_GROUP_BY_FILE, value = %v, "not a boolean, ignored");
            }
        }
        if let Some(v) = get(ENV_SEND_EMPTY_FAILURES) {
            if let Some(b) = parse_bool(&v) {
                self.report.send_empty_failures = b;
            } else {
                tracing::warn!(key = ENV_SEND_EMPTY_FAILURES, value = %v, "not a boolean, ignored");
            }
        }
    }

    /// Configuration problems worth a startup warning. None of them are fatal.
    pub fn validate(&self) -> Vec<ReportError> {
        let mut problems = Vec::new();
        if self.webhook.url.is_none() {
            problems.push(ReportError::ConfigurationMissing(format!(
                "{} is not set, results will not be delivered, please export {}=...",
                ENV_WEBHOOK, ENV_WEBHOOK
            )));
        }
        if self.webhook.max_blocks < 3 {
            problems.push(ReportError::InvalidConfiguration(format!(
                "max_blocks = {} leaves no room for results, one result per message will be sent",
                self.webhook.max_blocks
            )));
        }
        problems
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
