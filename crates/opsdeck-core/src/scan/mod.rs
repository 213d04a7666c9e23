//! Host security scan.
//!
//! A scan samples the process table, connection table, listening ports and
//! load average (see [`sample`]), checks critical files, watched locations
//! and logs on disk (see [`files`]), classifies everything against the
//! static rules in [`rules`] and folds the findings into a [`ScanReport`].
//!
//! Score: starts at 100, every finding subtracts its penalty. Penalties are
//! unsigned so the score never goes up within a scan.

pub mod files;
pub mod report;
pub mod rules;
pub mod sample;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::runner::CommandRunner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub use sample::{Connection, ProcessSample, Sample};

pub const STARTING_SCORE: i64 = 100;

// ---------------------------------------------------------------------------
// Severity / Category / Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn points(self) -> u32 {
        match self {
            Severity::Low => 2,
            Severity::Medium => 5,
            Severity::High => 10,
            Severity::Critical => 15,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Process,
    Network,
    System,
    File,
    Malware,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    HighCpu,
    Keyword,
    Blacklist,
    UnknownPath,
    HighMemory,
    ForbiddenPort,
    ConnectionFlood,
    ConnectionVolume,
    HighLoad,
    RecentModification,
    IntegrityViolation,
    MalwareName,
    LogAnomaly,
}

impl Rule {
    pub fn severity(self) -> Severity {
        match self {
            Rule::HighCpu | Rule::Blacklist | Rule::HighLoad | Rule::IntegrityViolation => {
                Severity::Critical
            }
            Rule::Keyword | Rule::ForbiddenPort | Rule::MalwareName => Severity::High,
            Rule::UnknownPath
            | Rule::ConnectionFlood
            | Rule::RecentModification
            | Rule::LogAnomaly => Severity::Medium,
            Rule::HighMemory | Rule::ConnectionVolume => Severity::Low,
        }
    }

    /// Score deduction; a few rules carry a fixed value instead of the
    /// severity's points.
    pub fn penalty(self) -> u32 {
        match self {
            Rule::HighLoad => 20,
            Rule::ConnectionFlood | Rule::LogAnomaly => 3,
            Rule::MalwareName => 15,
            other => other.severity().points(),
        }
    }

    pub fn category(self) -> Category {
        match self {
            Rule::HighCpu | Rule::Keyword | Rule::Blacklist | Rule::UnknownPath | Rule::HighMemory => {
                Category::Process
            }
            Rule::ForbiddenPort | Rule::ConnectionFlood | Rule::ConnectionVolume => {
                Category::Network
            }
            Rule::HighLoad => Category::System,
            Rule::RecentModification | Rule::IntegrityViolation => Category::File,
            Rule::MalwareName => Category::Malware,
            Rule::LogAnomaly => Category::Log,
        }
    }
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Process {
        pid: u32,
        cpu: f64,
        mem: f64,
        command: String,
    },
    Connection {
        ip: String,
        count: usize,
    },
    Port {
        port: u16,
    },
    File {
        path: String,
        detail: String,
    },
    Log {
        source: String,
        errors: usize,
        sample: Vec<String>,
    },
    System {
        metric: String,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: Category,
    pub rule: Rule,
    pub reason: String,
    pub severity: Severity,
    pub penalty: u32,
    pub subject: Subject,
}

impl Finding {
    pub fn new(rule: Rule, reason: impl Into<String>, subject: Subject) -> Self {
        Self {
            category: rule.category(),
            rule,
            reason: reason.into(),
            severity: rule.severity(),
            penalty: rule.penalty(),
            subject,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self.subject {
            Subject::Process { pid, .. } => Some(pid),
            _ => None,
        }
    }
}

/// `STARTING_SCORE` minus every penalty. May be negative.
pub fn score(findings: &[Finding]) -> i64 {
    findings
        .iter()
        .fold(STARTING_SCORE, |acc, f| acc - i64::from(f.penalty))
}

pub fn status_for(score: i64) -> &'static str {
    match score {
        s if s >= 80 => "good",
        s if s >= 60 => "warning",
        s if s >= 40 => "critical",
        _ => "alert",
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Severity,
    pub action: String,
    pub command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub load_average: Option<f64>,
    pub process_count: usize,
    pub connection_count: usize,
    pub listening_ports: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub timestamp: DateTime<Utc>,
    pub system_info: SystemInfo,
    pub findings: Vec<Finding>,
    pub score: i64,
    pub recommendations: Vec<Recommendation>,
}

impl ScanReport {
    pub fn new(system_info: SystemInfo, findings: Vec<Finding>) -> Self {
        let score = score(&findings);
        let recommendations = report::recommendations(&findings, score);
        Self {
            timestamp: Utc::now(),
            system_info,
            findings,
            score,
            recommendations,
        }
    }

    /// Score clamped at zero.
    pub fn display_score(&self) -> i64 {
        self.score.max(0)
    }

    pub fn status(&self) -> &'static str {
        status_for(self.display_score())
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Which on-disk checks to run in addition to the command samplers.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Critical-file hashes against the integrity baseline.
    pub integrity: bool,
    /// Recent modifications, watched locations and log files.
    pub files: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            integrity: true,
            files: true,
        }
    }
}

/// The report plus the raw sample it was built from.
#[derive(Debug, Clone)]
pub struct Scan {
    pub report: ScanReport,
    pub sample: Sample,
}

pub struct Scanner<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ScanConfig,
    state_dir: &'a Path,
}

impl<'a> Scanner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ScanConfig, state_dir: &'a Path) -> Self {
        Self {
            runner,
            config,
            state_dir,
        }
    }

    pub fn run(&self, opts: ScanOptions) -> Result<Scan> {
        let sample = sample::collect(self.runner, self.config);

        let mut findings = Vec::new();
        for p in &sample.processes {
            findings.extend(rules::process_findings(p, self.config));
        }
        findings.extend(rules::network_findings(
            &sample.connections,
            &sample.listening_ports,
            self.config,
        ));
        findings.extend(rules::system_findings(sample.load, self.config));

        if opts.files {
            findings.extend(files::recent_modifications(self.config, std::time::SystemTime::now()));
            findings.extend(files::malware_names(self.config));
            findings.extend(files::log_anomalies(self.config));
        }
        if opts.integrity {
            findings.extend(files::check_integrity(self.config, self.state_dir)?);
        }

        let hostname = self
            .runner
            .stdout_or_empty("hostname", &[])
            .trim()
            .to_string();
        let system_info = SystemInfo {
            hostname: if hostname.is_empty() {
                "unknown".to_string()
            } else {
                hostname
            },
            os: std::env::consts::OS.to_string(),
            load_average: sample.load,
            process_count: sample.processes.len(),
            connection_count: sample.connections.len(),
            listening_ports: sample.listening_ports.len(),
        };

        let report = ScanReport::new(system_info, findings);
        tracing::debug!(
            findings = report.findings.len(),
            score = report.score,
            "scan complete"
        );
        Ok(Scan { report, sample })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;
    use tempfile::TempDir;

    fn process(pid: u32) -> Subject {
        Subject::Process {
            pid,
            cpu: 1.0,
            mem: 1.0,
            command: "x".into(),
        }
    }

    #[test]
    fn penalties_follow_severity_with_overrides() {
        assert_eq!(Rule::HighCpu.penalty(), 15);
        assert_eq!(Rule::Keyword.penalty(), 10);
        assert_eq!(Rule::UnknownPath.penalty(), 5);
        assert_eq!(Rule::HighMemory.penalty(), 2);
        assert_eq!(Rule::HighLoad.penalty(), 20);
        assert_eq!(Rule::ConnectionFlood.penalty(), 3);
        assert_eq!(Rule::MalwareName.penalty(), 15);
    }

    #[test]
    fn score_is_monotone_and_display_clamped() {
        let mut findings = Vec::new();
        let mut last = score(&findings);
        assert_eq!(last, 100);
        for i in 0..20 {
            findings.push(Finding::new(Rule::HighCpu, "busy", process(i)));
            let now = score(&findings);
            assert!(now <= last);
            last = now;
        }
        let report = ScanReport::new(SystemInfo::default(), findings);
        assert!(report.score < 0);
        assert_eq!(report.display_score(), 0);
        assert_eq!(report.status(), "alert");
    }

    #[test]
    fn status_bands() {
        assert_eq!(status_for(100), "good");
        assert_eq!(status_for(80), "good");
        assert_eq!(status_for(79), "warning");
        assert_eq!(status_for(60), "warning");
        assert_eq!(status_for(40), "critical");
        assert_eq!(status_for(39), "alert");
    }

    #[test]
    fn finding_serializes_tagged_subject() {
        let f = Finding::new(Rule::ForbiddenPort, "port 4444", Subject::Port { port: 4444 });
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["severity"], "HIGH");
        assert_eq!(v["rule"], "forbidden_port");
        assert_eq!(v["subject"]["kind"], "port");
        assert_eq!(v["subject"]["port"], 4444);
    }

    #[test]
    fn scanner_end_to_end_with_scripted_commands() {
        let state = TempDir::new().unwrap();
        let ps = "\
USER PID %CPU %MEM VSZ RSS TT STAT STARTED TIME COMMAND
root 1 0.0 0.1 1000 2000 ?? Ss 9:00 0:01 /sbin/launchd
eve 666 95.0 2.0 1000 4096 ?? R 9:00 9:99 /tmp/xmrig-miner --pool x
";
        let runner = ScriptedRunner::new()
            .with("ps aux", ps)
            .with("netstat -an", "")
            .with("lsof -i -P -n", "")
            .with("uptime", "10:00 up 1 day, 2 users, load averages: 1.20 1.00 0.90\n")
            .with("hostname", "box\n");
        let cfg = ScanConfig::default();
        let scanner = Scanner::new(&runner, &cfg, state.path());
        let scan = scanner
            .run(ScanOptions {
                integrity: false,
                files: false,
            })
            .unwrap();

        assert_eq!(scan.sample.processes.len(), 2);
        assert_eq!(scan.report.system_info.hostname, "box");
        assert_eq!(scan.report.system_info.load_average, Some(1.2));
        let rules: Vec<Rule> = scan.report.findings.iter().map(|f| f.rule).collect();
        assert!(rules.contains(&Rule::HighCpu));
        assert!(rules.contains(&Rule::Blacklist));
        assert!(rules.contains(&Rule::Keyword));
        assert!(rules.contains(&Rule::UnknownPath));
        assert!(scan.report.findings.iter().all(|f| f.pid() == Some(666)));
        assert!(scan.report.score < 100);
        assert!(!scan.report.recommendations.is_empty());
    }

    #[test]
    fn failed_samplers_give_clean_report() {
        let state = TempDir::new().unwrap();
        let cfg = ScanConfig::default();
        let runner = ScriptedRunner::new();
        let scan = Scanner::new(&runner, &cfg, state.path())
            .run(ScanOptions {
                integrity: false,
                files: false,
            })
            .unwrap();
        assert!(scan.report.findings.is_empty());
        assert_eq!(scan.report.score, 100);
        assert_eq!(scan.report.system_info.hostname, "unknown");
    }
}
