//! Recommendations and the Markdown + JSON report pair.

use super::{Category, Finding, Recommendation, Rule, ScanReport, Severity, Subject};
use crate::error::Result;
use crate::io;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Scores below this suggest turning the firewall on.
const FIREWALL_SCORE: i64 = 50;

fn firewall_command() -> &'static str {
    if cfg!(target_os = "macos") {
        "sudo /usr/libexec/ApplicationFirewall/socketfilterfw --setglobalstate on"
    } else {
        "sudo ufw enable"
    }
}

pub fn recommendations(findings: &[Finding], score: i64) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let suspicious: BTreeSet<u32> = findings
        .iter()
        .filter(|f| {
            matches!(
                f.rule,
                Rule::HighCpu | Rule::Keyword | Rule::Blacklist | Rule::UnknownPath
            )
        })
        .filter_map(|f| f.pid())
        .collect();
    if !suspicious.is_empty() {
        let pids: Vec<String> = suspicious.iter().map(|p| p.to_string()).collect();
        out.push(Recommendation {
            priority: Severity::High,
            action: "Terminate suspicious processes".to_string(),
            command: format!("kill -TERM {}", pids.join(" ")),
        });
    }

    if score < FIREWALL_SCORE {
        out.push(Recommendation {
            priority: Severity::Critical,
            action: "Enable the firewall".to_string(),
            command: firewall_command().to_string(),
        });
    }

    let logs: BTreeSet<&str> = findings
        .iter()
        .filter_map(|f| match &f.subject {
            Subject::Log { source, .. } => Some(source.as_str()),
            _ => None,
        })
        .collect();
    if let Some(first) = logs.iter().next() {
        out.push(Recommendation {
            priority: Severity::Medium,
            action: "Inspect system logs".to_string(),
            command: format!("tail -n 100 {first}"),
        });
    }

    if findings.iter().any(|f| f.category == Category::Network) {
        out.push(Recommendation {
            priority: Severity::High,
            action: "Inspect network connections".to_string(),
            command: "lsof -i -P -n".to_string(),
        });
    }

    let changed: BTreeSet<&str> = findings
        .iter()
        .filter(|f| f.category == Category::File)
        .filter_map(|f| match &f.subject {
            Subject::File { path, .. } => Some(path.as_str()),
            _ => None,
        })
        .collect();
    if !changed.is_empty() {
        let list: Vec<&str> = changed.into_iter().collect();
        out.push(Recommendation {
            priority: Severity::High,
            action: "Review changes to critical files".to_string(),
            command: format!("ls -la {}", list.join(" ")),
        });
    }

    if findings.iter().any(|f| f.category == Category::Malware) {
        out.push(Recommendation {
            priority: Severity::Critical,
            action: "Run a full malware scan".to_string(),
            command: "clamscan -r --infected ~".to_string(),
        });
    }

    out
}

fn subject_line(subject: &Subject) -> String {
    match subject {
        Subject::Process { pid, cpu, mem, command } => {
            format!("pid {pid}, cpu {cpu:.1}%, mem {mem:.1}%: `{command}`")
        }
        Subject::Connection { ip, count } => format!("{ip} ({count} connections)"),
        Subject::Port { port } => format!("port {port}"),
        Subject::File { path, detail } => format!("`{path}`: {detail}"),
        Subject::Log { source, errors, .. } => format!("`{source}`: {errors} error lines"),
        Subject::System { metric, value } => format!("{metric} = {value:.2}"),
    }
}

pub fn render_markdown(report: &ScanReport) -> String {
    let mut md = String::new();
    let info = &report.system_info;
    let _ = writeln!(md, "# Security report\n");
    let _ = writeln!(md, "- Time: {}", report.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(md, "- Host: {} ({})", info.hostname, info.os);
    let _ = writeln!(
        md,
        "- Score: {}/100 ({})",
        report.display_score(),
        report.status()
    );
    if let Some(load) = info.load_average {
        let _ = writeln!(md, "- Load average: {load:.2}");
    }
    let _ = writeln!(
        md,
        "- Processes: {}, connections: {}, listening ports: {}",
        info.process_count, info.connection_count, info.listening_ports
    );

    let _ = writeln!(md, "\n## Findings ({})\n", report.findings.len());
    if report.findings.is_empty() {
        let _ = writeln!(md, "No findings.");
    }
    for sev in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low] {
        let group: Vec<&Finding> = report.findings.iter().filter(|f| f.severity == sev).collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(md, "### {sev} ({})\n", group.len());
        for f in group {
            let _ = writeln!(md, "- {} ({})", f.reason, subject_line(&f.subject));
        }
        md.push('\n');
    }

    if !report.recommendations.is_empty() {
        let _ = writeln!(md, "## Recommendations\n");
        for r in &report.recommendations {
            let _ = writeln!(md, "- [{}] {}: `{}`", r.priority, r.action, r.command);
        }
    }
    md
}

/// Write `security_report_<ts>.md` and `.json` into `dir`.
pub fn write_report(dir: &Path, report: &ScanReport) -> Result<(PathBuf, PathBuf)> {
    io::ensure_dir(dir)?;
    let stem = format!("security_report_{}", report.timestamp.format("%Y%m%d_%H%M%S"));
    let md = dir.join(format!("{stem}.md"));
    let json = dir.join(format!("{stem}.json"));
    io::atomic_write(&md, render_markdown(report).as_bytes())?;
    io::write_json(&json, report)?;
    tracing::info!(path = %md.display(), findings = report.findings.len(), "security report written");
    Ok((md, json))
}
