use crate::output::{print_json, print_kv, print_table};
use anyhow::Context;
use opsdeck_core::config::Config;
use opsdeck_core::dashboard::{self, Dashboard, GIT_TIMEOUT};
use opsdeck_core::knowledge::AgentHub;
use opsdeck_core::notify::{self, Notifier};
use opsdeck_core::runner::SystemRunner;
use std::path::Path;

pub fn run(root: &Path, state: &Path, notify: bool, save: bool, json: bool) -> anyhow::Result<()> {
    let runner = SystemRunner::new(GIT_TIMEOUT);
    let data = dashboard::generate(&runner, root);

    if save {
        dashboard::save(root, &data).context("failed to write dashboard_data.json")?;
    }

    if json {
        print_json(&data)?;
    } else {
        print_text(&data);
    }

    if notify {
        let config = Config::load(state).context("failed to load config")?;
        let notifier = Notifier::from_env(&config.notify)?;
        let hub = AgentHub::open(state);
        let result = notifier.broadcast(Some(&hub), &notify::dashboard_update_notice(&data));
        if !json {
            println!("\nNotified {}/{} webhooks.", result.delivered, result.total);
        }
    }
    Ok(())
}

fn print_text(d: &Dashboard) {
    let s = &d.summary;
    print_kv(&[
        ("Generated", d.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("Repositories", format!("{} ({} active today)", s.total_repos, s.active_repos)),
        ("Commits this week", s.total_commits_week.to_string()),
        ("Developers", s.developer_count.to_string()),
        ("Security", s.security_status.clone()),
    ]);

    if d.repos.is_empty() {
        println!("\nNo git repositories found.");
        return;
    }

    println!();
    let rows = d
        .repos
        .values()
        .map(|r| {
            vec![
                r.name.clone(),
                r.branch.clone().unwrap_or_else(|| "-".to_string()),
                format!("{:?}", r.status).to_lowercase(),
                r.commits_today.to_string(),
                r.commits_week.to_string(),
                r.files_changed.to_string(),
                r.last_commit
                    .as_ref()
                    .map(|c| format!("{} {}", c.hash, c.message))
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["REPO", "BRANCH", "STATUS", "TODAY", "WEEK", "CHANGED", "LAST COMMIT"],
        rows,
    );

    if !d.security.critical.is_empty() || !d.security.warnings.is_empty() {
        println!();
        for issue in &d.security.critical {
            println!("[critical] {}: {}", issue.file, issue.issue);
        }
        for issue in &d.security.warnings {
            println!("[warning] {}: {}", issue.file, issue.issue);
        }
    }
}
