use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use opsdeck_core::config::Config;
use opsdeck_core::dashboard::{self, GIT_TIMEOUT};
use opsdeck_core::knowledge::AgentHub;
use opsdeck_core::notify::{self, BroadcastResult, Color, Notice, Notifier, Priority, WebhookKind};
use opsdeck_core::runner::SystemRunner;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum NotifySubcommand {
    /// Broadcast a free-form message
    Send {
        message: String,
        #[arg(long)]
        title: Option<String>,
        /// good, warning or danger
        #[arg(long, default_value = "good")]
        color: String,
        /// normal, urgent or critical
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long, default_value = "opsdeck")]
        agent: String,
    },

    /// Broadcast an urgent message
    Urgent {
        message: String,
        #[arg(long, default_value = "opsdeck")]
        agent: String,
    },

    /// Announce an agent's current activity
    Activity {
        agent: String,
        activity: String,
        #[arg(long, default_value = "in_progress")]
        status: String,
    },

    /// Share a knowledge-base entry with the channel
    Context {
        key: String,
        #[arg(long, default_value = "opsdeck")]
        agent: String,
    },

    /// Post the daily status report (from dashboard_data.json, or a fresh run)
    Daily,

    /// Post a dashboard refresh summary
    Dashboard,

    /// List configured webhooks
    Webhooks,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, state: &Path, subcmd: NotifySubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(state).context("failed to load config")?;
    let notifier = Notifier::from_env(&config.notify).context("failed to build HTTP client")?;
    let hub = AgentHub::open(state);

    let notice = match subcmd {
        NotifySubcommand::Webhooks => return list_webhooks(&notifier, json),
        NotifySubcommand::Send {
            message,
            title,
            color,
            priority,
            agent,
        } => {
            let color: Color = color.parse()?;
            let priority: Priority = priority.parse()?;
            let mut n = Notice::new(message)
                .color(color)
                .priority(priority)
                .agent(agent);
            if let Some(t) = title {
                n = n.title(t);
            }
            n
        }
        NotifySubcommand::Urgent { message, agent } => notify::urgent_notice(&agent, &message),
        NotifySubcommand::Activity {
            agent,
            activity,
            status,
        } => {
            hub.update_activity(&agent, &activity, &status)
                .context("failed to update knowledge base")?;
            notify::activity_notice(&agent, &activity, &status)
        }
        NotifySubcommand::Context { key, agent } => {
            let value = hub
                .get_knowledge(&key)
                .with_context(|| format!("no knowledge stored under '{key}'"))?;
            notify::context_notice(&agent, &key, &value)
        }
        NotifySubcommand::Daily => {
            let data = match dashboard::load(root) {
                Some(d) => d,
                None => dashboard::generate(&SystemRunner::new(GIT_TIMEOUT), root),
            };
            notify::daily_report_notice(&data)
        }
        NotifySubcommand::Dashboard => {
            let data = dashboard::generate(&SystemRunner::new(GIT_TIMEOUT), root);
            dashboard::save(root, &data).context("failed to write dashboard_data.json")?;
            notify::dashboard_update_notice(&data)
        }
    };

    let result = notifier.broadcast(Some(&hub), &notice);
    report(&result, json)
}

fn report(result: &BroadcastResult, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(result)?;
    } else if result.total == 0 {
        println!("No webhooks configured; message logged to the knowledge base only.");
    } else if result.all_delivered() {
        println!("Delivered to all {} webhooks.", result.total);
    } else {
        println!("Delivered to {}/{} webhooks.", result.delivered, result.total);
        for f in &result.failures {
            println!("  failed: {f}");
        }
    }
    if result.total > 0 && result.delivered == 0 {
        anyhow::bail!("no webhook accepted the notification");
    }
    Ok(())
}

fn list_webhooks(notifier: &Notifier, json: bool) -> anyhow::Result<()> {
    let rows: Vec<(String, &'static str)> = notifier
        .webhooks()
        .iter()
        .map(|url| {
            let host = notify::webhook_host(url);
            let kind = match WebhookKind::detect(url) {
                WebhookKind::Teams => "teams",
                WebhookKind::Slack => "slack",
            };
            (host, kind)
        })
        .collect();

    if json {
        let items: Vec<serde_json::Value> = rows
            .iter()
            .map(|(host, kind)| serde_json::json!({ "host": host, "kind": kind }))
            .collect();
        print_json(&items)?;
    } else if rows.is_empty() {
        println!("No webhooks configured. Set SLACK_WEBHOOK_URL or notify.webhooks in config.yaml.");
    } else {
        print_table(
            &["HOST", "KIND"],
            rows.into_iter()
                .map(|(h, k)| vec![h, k.to_string()])
                .collect(),
        );
    }
    Ok(())
}
