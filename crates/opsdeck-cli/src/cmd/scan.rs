use crate::output::{print_json, print_kv, print_table};
use anyhow::Context;
use opsdeck_core::config::Config;
use opsdeck_core::knowledge::AgentHub;
use opsdeck_core::notify::{self, Notifier};
use opsdeck_core::paths;
use opsdeck_core::runner::SystemRunner;
use opsdeck_core::scan::{files, report, ScanOptions, ScanReport, Scanner, Severity};
use std::path::Path;

pub struct ScanArgs {
    pub files: bool,
    pub integrity: bool,
    pub rebaseline: bool,
    pub report: bool,
    pub notify: bool,
}

pub fn run(state: &Path, args: ScanArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(state).context("failed to load config")?;

    if args.rebaseline {
        let db = files::reset_baseline(&config.scan, state)
            .context("failed to write integrity baseline")?;
        if !json {
            println!("Integrity baseline reset ({} files).", db.files.len());
        }
    }

    let runner = SystemRunner::new(config.command_timeout());
    let scanner = Scanner::new(&runner, &config.scan, state);
    let scan = scanner
        .run(ScanOptions {
            integrity: args.integrity,
            files: args.files,
        })
        .context("scan failed")?;

    let written = if args.report {
        Some(
            report::write_report(&paths::reports_dir(state), &scan.report)
                .context("failed to write security report")?,
        )
    } else {
        None
    };

    if json {
        print_json(&scan.report)?;
    } else {
        print_text(&scan.report);
        if let Some((md, _)) = &written {
            println!("\nReport: {}", md.display());
        }
    }

    if args.notify {
        let notifier = Notifier::from_env(&config.notify)?;
        let hub = AgentHub::open(state);
        let result = notifier.broadcast(Some(&hub), &notify::security_alert_notice(&scan.report));
        if !json {
            println!("Notified {}/{} webhooks.", result.delivered, result.total);
        }
    }
    Ok(())
}

fn print_text(r: &ScanReport) {
    let info = &r.system_info;
    print_kv(&[
        ("Host", format!("{} ({})", info.hostname, info.os)),
        ("Score", format!("{}/100 ({})", r.display_score(), r.status())),
        (
            "Load average",
            info.load_average
                .map(|l| format!("{l:.2}"))
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("Processes", info.process_count.to_string()),
        ("Connections", info.connection_count.to_string()),
        (
            "Findings",
            format!(
                "{} critical, {} high, {} medium, {} low",
                r.count(Severity::Critical),
                r.count(Severity::High),
                r.count(Severity::Medium),
                r.count(Severity::Low)
            ),
        ),
    ]);

    if r.findings.is_empty() {
        println!("\nNo findings.");
        return;
    }

    println!();
    let mut findings: Vec<_> = r.findings.iter().collect();
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    let rows = findings
        .iter()
        .map(|f| {
            vec![
                f.severity.to_string(),
                format!("-{}", f.penalty),
                format!("{:?}", f.category).to_lowercase(),
                f.reason.clone(),
            ]
        })
        .collect();
    print_table(&["SEVERITY", "PENALTY", "CATEGORY", "REASON"], rows);

    if !r.recommendations.is_empty() {
        println!("\nRecommendations:");
        for rec in &r.recommendations {
            println!("  [{}] {}: {}", rec.priority, rec.action, rec.command);
        }
    }
}
