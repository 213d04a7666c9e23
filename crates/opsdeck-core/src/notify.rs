//! Chat webhook bridge.
//!
//! A [`Notice`] is rendered per destination: URLs on an Office 365 host get a
//! Teams `MessageCard`, everything else gets a Slack attachment payload. Each
//! broadcast is appended to the knowledge base before delivery so agents can
//! read back what was announced. Delivery is one POST per webhook with a
//! fixed timeout and no retry.

use crate::config::NotifyConfig;
use crate::dashboard::Dashboard;
use crate::error::{OpsError, Result};
use crate::knowledge::{AgentHub, BroadcastRecord};
use crate::scan::ScanReport;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Environment variables consulted for webhook URLs, in order.
pub const WEBHOOK_ENV_VARS: [&str; 4] = [
    "SLACK_WEBHOOK_URL",
    "SLACK_WEBHOOK_URL_2",
    "SLACK_WEBHOOK_URL_3",
    "TEAMS_WEBHOOK_URL",
];

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_AGENT: &str = "opsdeck";

// ---------------------------------------------------------------------------
// Priority / Color
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Priority::Normal),
            "urgent" => Ok(Priority::Urgent),
            "critical" => Ok(Priority::Critical),
            _ => Err(OpsError::InvalidValue {
                field: "priority",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    #[default]
    Good,
    Warning,
    Danger,
}

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Good => "good",
            Color::Warning => "warning",
            Color::Danger => "danger",
        }
    }

    /// Hex theme colour for Teams cards.
    pub fn theme(self) -> &'static str {
        match self {
            Color::Good => "0078D4",
            Color::Warning => "FFAA00",
            Color::Danger => "FF0000",
        }
    }
}

impl FromStr for Color {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "good" => Ok(Color::Good),
            "warning" => Ok(Color::Warning),
            "danger" => Ok(Color::Danger),
            _ => Err(OpsError::InvalidValue {
                field: "color",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Notice and payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookKind {
    Slack,
    Teams,
}

impl WebhookKind {
    pub fn detect(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.contains("office.com") || lower.contains("office365") {
            WebhookKind::Teams
        } else {
            WebhookKind::Slack
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub title: Option<String>,
    pub message: String,
    pub color: Color,
    pub priority: Priority,
    pub agent: String,
    /// Extra key/value rows shown under the message.
    pub facts: Vec<(String, String)>,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            title: None,
            message: message.into(),
            color: Color::Good,
            priority: Priority::Normal,
            agent: DEFAULT_AGENT.to_string(),
            facts: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn fact(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.facts.push((name.into(), value.to_string()));
        self
    }

    pub fn payload_for(&self, url: &str) -> Value {
        match WebhookKind::detect(url) {
            WebhookKind::Teams => self.teams_payload(),
            WebhookKind::Slack => self.slack_payload(Utc::now().timestamp()),
        }
    }

    pub fn slack_payload(&self, ts: i64) -> Value {
        let mut fields = vec![
            json!({ "title": "Priority", "value": self.priority.as_str(), "short": true }),
            json!({ "title": "Agent", "value": self.agent, "short": true }),
        ];
        fields.extend(
            self.facts
                .iter()
                .map(|(k, v)| json!({ "title": k, "value": v, "short": true })),
        );
        json!({
            "text": self.title.as_deref().unwrap_or(&self.message),
            "attachments": [{
                "color": self.color.as_str(),
                "text": self.message,
                "footer": format!("{DEFAULT_AGENT} | {}", self.agent),
                "ts": ts,
                "fields": fields,
            }],
        })
    }

    pub fn teams_payload(&self) -> Value {
        let title = self.title.as_deref().unwrap_or("Notification");
        let mut facts = vec![
            json!({ "name": "Priority", "value": self.priority.as_str() }),
            json!({ "name": "Agent", "value": self.agent }),
        ];
        facts.extend(
            self.facts
                .iter()
                .map(|(k, v)| json!({ "name": k, "value": v })),
        );
        json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "themeColor": self.color.theme(),
            "summary": title,
            "sections": [{
                "activityTitle": title,
                "activitySubtitle": self.agent,
                "text": self.message,
                "facts": facts,
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Webhook discovery
// ---------------------------------------------------------------------------

/// Environment webhooks first (in [`WEBHOOK_ENV_VARS`] order), then the ones
/// from config. Empty values and duplicates are dropped.
pub fn collect_webhooks(env: impl Fn(&str) -> Option<String>, config: &NotifyConfig) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let from_env = WEBHOOK_ENV_VARS.iter().filter_map(|&k| env(k));
    for url in from_env.chain(config.webhooks.iter().cloned()) {
        let url = url.trim().to_string();
        if !url.is_empty() && !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

/// Host part of a webhook URL; the path carries the secret and never gets logged.
pub fn webhook_host(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "<invalid url>".to_string())
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastResult {
    pub delivered: usize,
    pub total: usize,
    pub failures: Vec<String>,
}

impl BroadcastResult {
    pub fn all_delivered(&self) -> bool {
        self.delivered == self.total
    }
}

pub struct Notifier {
    webhooks: Vec<String>,
    client: reqwest::blocking::Client,
}

impl Notifier {
    pub fn new(webhooks: Vec<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { webhooks, client })
    }

    pub fn from_env(config: &NotifyConfig) -> Result<Self> {
        Self::new(collect_webhooks(|k| std::env::var(k).ok(), config))
    }

    pub fn webhooks(&self) -> &[String] {
        &self.webhooks
    }

    pub fn send(&self, url: &str, notice: &Notice) -> Result<()> {
        // reqwest errors carry the full URL, token path included.
        let resp = self
            .client
            .post(url)
            .json(&notice.payload_for(url))
            .send()
            .map_err(|e| e.without_url())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OpsError::Webhook(format!("{} returned {status}", webhook_host(url))));
        }
        Ok(())
    }

    /// Log the notice to `hub` (when given), then POST it to every webhook.
    /// Individual failures are collected, not propagated.
    pub fn broadcast(&self, hub: Option<&AgentHub>, notice: &Notice) -> BroadcastResult {
        if let Some(hub) = hub {
            let record = BroadcastRecord {
                agent: notice.agent.clone(),
                message: notice.message.clone(),
                title: notice.title.clone(),
                timestamp: Utc::now(),
                priority: notice.priority,
            };
            if let Err(e) = hub.record_broadcast(record) {
                tracing::warn!(error = %e, "could not log broadcast to knowledge base");
            }
        }

        let mut result = BroadcastResult {
            total: self.webhooks.len(),
            ..Default::default()
        };
        if self.webhooks.is_empty() {
            tracing::warn!("no webhooks configured; set SLACK_WEBHOOK_URL or notify.webhooks");
            return result;
        }

        for url in &self.webhooks {
            match self.send(url, notice) {
                Ok(()) => {
                    tracing::debug!(host = %webhook_host(url), "notification delivered");
                    result.delivered += 1;
                }
                Err(e) => {
                    let host = webhook_host(url);
                    tracing::warn!(host = %host, error = %e, "notification failed");
                    result.failures.push(format!("{host}: {e}"));
                }
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Canned notices
// ---------------------------------------------------------------------------

pub fn urgent_notice(agent: &str, message: &str) -> Notice {
    Notice::new(message)
        .title("URGENT")
        .color(Color::Danger)
        .priority(Priority::Urgent)
        .agent(agent)
}

pub fn activity_notice(agent: &str, activity: &str, status: &str) -> Notice {
    let color = match status {
        "failed" | "error" | "blocked" => Color::Danger,
        "completed" | "done" => Color::Good,
        _ => Color::Warning,
    };
    Notice::new(activity)
        .title(format!("{agent}: {status}"))
        .color(color)
        .agent(agent)
}

/// Share a piece of agent context with the channel.
pub fn context_notice(agent: &str, key: &str, value: &Value) -> Notice {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Notice::new(rendered)
        .title(format!("Context shared: {key}"))
        .agent(agent)
}

pub fn daily_report_notice(dashboard: &Dashboard) -> Notice {
    let s = &dashboard.summary;
    let color = if s.security_status == "good" {
        Color::Good
    } else {
        Color::Danger
    };
    let mut body = format!(
        "{} of {} repositories active today, {} commits this week.",
        s.active_repos, s.total_repos, s.total_commits_week
    );
    for (name, repo) in &dashboard.repos {
        if repo.commits_today > 0 {
            body.push_str(&format!("\n- {name}: {} commits today", repo.commits_today));
        }
    }
    Notice::new(body)
        .title(format!("Daily report {}", dashboard.timestamp.format("%Y-%m-%d")))
        .color(color)
        .fact("Security", &s.security_status)
        .fact("Developers", s.developer_count)
}

pub fn dashboard_update_notice(dashboard: &Dashboard) -> Notice {
    let s = &dashboard.summary;
    Notice::new(format!(
        "Dashboard refreshed: {} repositories, {} active.",
        s.total_repos, s.active_repos
    ))
    .title("Dashboard update")
    .fact("Commits this week", s.total_commits_week)
    .fact("Security", &s.security_status)
}

pub fn security_alert_notice(report: &ScanReport) -> Notice {
    let score = report.display_score();
    let (color, priority) = match report.status() {
        "good" => (Color::Good, Priority::Normal),
        "warning" => (Color::Warning, Priority::Normal),
        "critical" => (Color::Danger, Priority::Urgent),
        _ => (Color::Danger, Priority::Critical),
    };
    let mut body = format!("{} findings, score {score}/100.", report.findings.len());
    for f in report.findings.iter().take(5) {
        body.push_str(&format!("\n- [{}] {}", f.severity, f.reason));
    }
    Notice::new(body)
        .title("Security scan")
        .color(color)
        .priority(priority)
        .agent("security-monitor")
        .fact("Status", report.status())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn detects_teams_urls() {
        assert_eq!(
            WebhookKind::detect("https://acme.webhook.office.com/abc"),
            WebhookKind::Teams
        );
        assert_eq!(
            WebhookKind::detect("https://outlook.OFFICE365.com/x"),
            WebhookKind::Teams
        );
        assert_eq!(
            WebhookKind::detect("https://hooks.slack.com/services/T/B/X"),
            WebhookKind::Slack
        );
    }

    #[test]
    fn slack_payload_shape() {
        let p = urgent_notice("ops", "disk full").slack_payload(1_700_000_000);
        assert_eq!(p["text"], "URGENT");
        let att = &p["attachments"][0];
        assert_eq!(att["color"], "danger");
        assert_eq!(att["text"], "disk full");
        assert_eq!(att["ts"], 1_700_000_000);
        assert_eq!(att["fields"][0]["value"], "urgent");
        assert_eq!(att["fields"][1]["value"], "ops");
    }

    #[test]
    fn slack_text_falls_back_to_message() {
        let p = Notice::new("plain").slack_payload(0);
        assert_eq!(p["text"], "plain");
    }

    #[test]
    fn teams_payload_shape() {
        let p = Notice::new("hello")
            .color(Color::Warning)
            .fact("Repo", "api")
            .teams_payload();
        assert_eq!(p["@type"], "MessageCard");
        assert_eq!(p["themeColor"], "FFAA00");
        assert_eq!(p["sections"][0]["text"], "hello");
        assert_eq!(p["sections"][0]["facts"][2]["name"], "Repo");
    }

    #[test]
    fn priority_and_color_parse() {
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert_eq!("danger".parse::<Color>().unwrap(), Color::Danger);
        assert!("loud".parse::<Priority>().is_err());
    }

    #[test]
    fn collect_webhooks_orders_and_dedupes() {
        let env: HashMap<&str, &str> = [
            ("SLACK_WEBHOOK_URL", "https://a"),
            ("TEAMS_WEBHOOK_URL", "https://b.office.com/x"),
            ("SLACK_WEBHOOK_URL_2", "  "),
        ]
        .into_iter()
        .collect();
        let config = NotifyConfig {
            webhooks: vec!["https://a".into(), "https://c".into()],
            alert_on_findings: false,
        };
        let hooks = collect_webhooks(|k| env.get(k).map(|v| v.to_string()), &config);
        assert_eq!(hooks, vec!["https://a", "https://b.office.com/x", "https://c"]);
    }

    #[test]
    fn broadcast_without_webhooks_still_logs() {
        let dir = TempDir::new().unwrap();
        let hub = AgentHub::open(dir.path());
        let notifier = Notifier::new(vec![]).unwrap();
        let result = notifier.broadcast(Some(&hub), &Notice::new("hi").agent("tester"));
        assert_eq!(result.total, 0);
        assert_eq!(result.delivered, 0);
        let log = hub.broadcasts();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].agent, "tester");
    }

    #[test]
    fn broadcast_posts_slack_and_teams() {
        let mut server = mockito::Server::new();
        let slack = server
            .mock("POST", "/slack")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({ "text": "Deploy" })))
            .with_status(200)
            .create();
        let teams = server
            .mock("POST", "/webhook.office.com/t")
            .match_body(Matcher::PartialJson(json!({ "@type": "MessageCard" })))
            .with_status(200)
            .create();

        let notifier = Notifier::new(vec![
            format!("{}/slack", server.url()),
            format!("{}/webhook.office.com/t", server.url()),
        ])
        .unwrap();
        let result = notifier.broadcast(None, &Notice::new("v1.2 is out").title("Deploy"));

        slack.assert();
        teams.assert();
        assert_eq!(result.delivered, 2);
        assert!(result.all_delivered());
    }

    #[test]
    fn failed_delivery_is_counted_not_retried() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("POST", "/down")
            .with_status(500)
            .expect(1)
            .create();
        let notifier = Notifier::new(vec![format!("{}/down", server.url())]).unwrap();
        let result = notifier.broadcast(None, &Notice::new("x"));
        m.assert();
        assert_eq!(result.delivered, 0);
        assert_eq!(result.total, 1);
        assert_eq!(result.failures.len(), 1);
    }

    #[test]
    fn transport_errors_hide_the_webhook_path() {
        let notifier =
            Notifier::new(vec!["http://127.0.0.1:9/services/T000/B000/SECRETTOKEN".into()]).unwrap();
        let result = notifier.broadcast(None, &Notice::new("x"));
        assert_eq!(result.delivered, 0);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].starts_with("127.0.0.1: "));
        assert!(!result.failures[0].contains("SECRETTOKEN"));
        assert!(!result.failures[0].contains("/services/"));
    }
}
