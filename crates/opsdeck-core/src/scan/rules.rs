//! Rule predicates. Each rule is independent; a record may trigger several.

use super::sample::{Connection, ProcessSample};
use super::{Finding, Rule, Subject};
use crate::config::ScanConfig;
use std::collections::BTreeMap;

/// Memory findings only apply to processes doing some work.
const HIGH_MEMORY_CPU_FLOOR: f64 = 10.0;

fn process_subject(p: &ProcessSample) -> Subject {
    Subject::Process {
        pid: p.pid,
        cpu: p.cpu,
        mem: p.mem,
        command: p.command.clone(),
    }
}

fn short_command(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

/// Case-insensitive blacklist match; the only rule that can lead to
/// termination.
pub fn blacklist_match<'c>(command: &str, cfg: &'c ScanConfig) -> Option<&'c str> {
    let lower = command.to_lowercase();
    cfg.blacklist
        .iter()
        .map(|s| s.as_str())
        .find(|entry| !entry.trim().is_empty() && lower.contains(&entry.to_lowercase()))
}

pub fn process_findings(p: &ProcessSample, cfg: &ScanConfig) -> Vec<Finding> {
    let mut out = Vec::new();
    let lower = p.command.to_lowercase();
    let name = short_command(&p.command);

    if p.cpu > cfg.cpu_threshold {
        out.push(Finding::new(
            Rule::HighCpu,
            format!("{name} (pid {}) at {:.1}% CPU", p.pid, p.cpu),
            process_subject(p),
        ));
    }

    if p.cpu > cfg.keyword_cpu_floor {
        for kw in &cfg.suspicious_keywords {
            if !kw.trim().is_empty() && lower.contains(&kw.to_lowercase()) {
                out.push(Finding::new(
                    Rule::Keyword,
                    format!("{name} (pid {}) matches suspicious keyword '{kw}'", p.pid),
                    process_subject(p),
                ));
            }
        }
    }

    if let Some(entry) = blacklist_match(&p.command, cfg) {
        out.push(Finding::new(
            Rule::Blacklist,
            format!("{name} (pid {}) matches blacklist entry '{entry}'", p.pid),
            process_subject(p),
        ));
    }

    let outside_allowed = p.command.starts_with('/')
        && !cfg
            .allowed_path_prefixes
            .iter()
            .any(|prefix| p.command.starts_with(prefix.as_str()));
    if outside_allowed && p.cpu > cfg.path_cpu_floor {
        out.push(Finding::new(
            Rule::UnknownPath,
            format!("{name} (pid {}) runs from an unexpected location", p.pid),
            process_subject(p),
        ));
    }

    if p.rss_mb() > cfg.ram_threshold_mb && p.cpu > HIGH_MEMORY_CPU_FLOOR {
        out.push(Finding::new(
            Rule::HighMemory,
            format!("{name} (pid {}) uses {:.0} MB", p.pid, p.rss_mb()),
            process_subject(p),
        ));
    }

    out
}

pub fn network_findings(conns: &[Connection], ports: &[u16], cfg: &ScanConfig) -> Vec<Finding> {
    let mut out = Vec::new();

    let mut per_ip: BTreeMap<String, usize> = BTreeMap::new();
    for c in conns {
        *per_ip.entry(c.remote_ip()).or_insert(0) += 1;
    }
    for (ip, count) in per_ip {
        if count > cfg.max_connections_per_ip {
            out.push(Finding::new(
                Rule::ConnectionFlood,
                format!("{count} connections to {ip}"),
                Subject::Connection { ip, count },
            ));
        }
    }

    if conns.len() > cfg.max_connections {
        out.push(Finding::new(
            Rule::ConnectionVolume,
            format!("{} established connections", conns.len()),
            Subject::System {
                metric: "established_connections".to_string(),
                value: conns.len() as f64,
            },
        ));
    }

    for &port in ports {
        if cfg.forbidden_ports.contains(&port) {
            out.push(Finding::new(
                Rule::ForbiddenPort,
                format!("listening on suspicious port {port}"),
                Subject::Port { port },
            ));
        }
    }

    out
}

pub fn system_findings(load: Option<f64>, cfg: &ScanConfig) -> Vec<Finding> {
    match load {
        Some(load) if load > cfg.load_threshold => vec![Finding::new(
            Rule::HighLoad,
            format!("load average {load:.2} above {:.2}", cfg.load_threshold),
            Subject::System {
                metric: "load_average".to_string(),
                value: load,
            },
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Severity;

    fn proc(cpu: f64, rss_kb: u64, command: &str) -> ProcessSample {
        ProcessSample {
            pid: 99,
            cpu,
            mem: 1.0,
            rss_kb,
            command: command.to_string(),
        }
    }

    fn rules(findings: &[Finding]) -> Vec<Rule> {
        findings.iter().map(|f| f.rule).collect()
    }

    #[test]
    fn quiet_process_has_no_findings() {
        let cfg = ScanConfig::default();
        assert!(process_findings(&proc(2.0, 1000, "/usr/bin/ssh host"), &cfg).is_empty());
    }

    #[test]
    fn keyword_requires_cpu_floor() {
        let cfg = ScanConfig::default();
        assert!(process_findings(&proc(5.0, 0, "/usr/bin/crypto-tool"), &cfg).is_empty());
        let f = process_findings(&proc(15.0, 0, "/usr/bin/crypto-tool"), &cfg);
        assert_eq!(rules(&f), vec![Rule::Keyword]);
        assert_eq!(f[0].severity, Severity::High);
    }

    #[test]
    fn one_keyword_finding_per_keyword() {
        let cfg = ScanConfig::default();
        let f = process_findings(&proc(15.0, 0, "/usr/local/bin/bitcoin-miner"), &cfg);
        let keywords = f.iter().filter(|f| f.rule == Rule::Keyword).count();
        assert_eq!(keywords, 2);
        assert!(rules(&f).contains(&Rule::Blacklist));
    }

    #[test]
    fn blacklist_is_case_insensitive_and_cpu_independent() {
        let cfg = ScanConfig::default();
        let f = process_findings(&proc(0.0, 0, "/Applications/KeyLogger.app"), &cfg);
        assert_eq!(rules(&f), vec![Rule::Blacklist]);
        assert_eq!(blacklist_match("Trojan", &cfg), Some("trojan"));
        assert_eq!(blacklist_match("bash", &cfg), None);
    }

    #[test]
    fn unknown_path_respects_prefixes_and_floor() {
        let cfg = ScanConfig::default();
        assert!(process_findings(&proc(30.0, 0, "/usr/bin/node"), &cfg).is_empty());
        assert!(process_findings(&proc(10.0, 0, "/tmp/x"), &cfg).is_empty());
        let f = process_findings(&proc(30.0, 0, "/tmp/x"), &cfg);
        assert_eq!(rules(&f), vec![Rule::UnknownPath]);
        // Relative commands are not path-checked.
        assert!(process_findings(&proc(30.0, 0, "node server.js"), &cfg).is_empty());
    }

    #[test]
    fn high_memory() {
        let cfg = ScanConfig::default();
        let f = process_findings(&proc(11.0, 2 * 1024 * 1024, "/usr/bin/java"), &cfg);
        assert_eq!(rules(&f), vec![Rule::HighMemory]);
        assert!(process_findings(&proc(1.0, 2 * 1024 * 1024, "/usr/bin/java"), &cfg).is_empty());
    }

    #[test]
    fn cumulative_process_rules() {
        let cfg = ScanConfig::default();
        let f = process_findings(&proc(90.0, 0, "/opt/x/backdoor"), &cfg);
        assert_eq!(
            rules(&f),
            vec![Rule::HighCpu, Rule::Keyword, Rule::Blacklist]
        );
    }

    #[test]
    fn connection_flood_and_volume() {
        let mut cfg = ScanConfig::default();
        cfg.max_connections = 12;
        let mut conns: Vec<Connection> = (0..11)
            .map(|i| Connection {
                local: format!("10.0.0.2:{}", 40000 + i),
                remote: "6.6.6.6:443".to_string(),
            })
            .collect();
        conns.push(Connection {
            local: "10.0.0.2:1".into(),
            remote: "1.1.1.1:53".into(),
        });
        conns.push(Connection {
            local: "10.0.0.2:2".into(),
            remote: "1.1.1.1:53".into(),
        });
        let f = network_findings(&conns, &[], &cfg);
        assert_eq!(rules(&f), vec![Rule::ConnectionFlood, Rule::ConnectionVolume]);
        assert_eq!(f[0].penalty, 3);
        assert!(matches!(&f[0].subject, Subject::Connection { ip, count: 11 } if ip == "6.6.6.6"));
    }

    #[test]
    fn tcp6_peers_count_towards_flood() {
        let cfg = ScanConfig::default();
        let out: String = (0..11)
            .map(|i| {
                format!(
                    "tcp6 0 0 ::ffff:10.0.0.2:8080 ::ffff:6.6.6.6:{} ESTABLISHED\n",
                    51000 + i
                )
            })
            .collect();
        let conns = crate::scan::sample::parse_netstat(&out);
        let f = network_findings(&conns, &[], &cfg);
        assert_eq!(rules(&f), vec![Rule::ConnectionFlood]);
        assert!(matches!(&f[0].subject, Subject::Connection { ip, count: 11 } if ip == "6.6.6.6"));
    }

    #[test]
    fn forbidden_ports() {
        let cfg = ScanConfig::default();
        let f = network_findings(&[], &[22, 4444, 31337], &cfg);
        assert_eq!(f.len(), 2);
        assert!(f.iter().all(|f| f.rule == Rule::ForbiddenPort));
    }

    #[test]
    fn load_threshold() {
        let cfg = ScanConfig::default();
        assert!(system_findings(None, &cfg).is_empty());
        assert!(system_findings(Some(4.0), &cfg).is_empty());
        let f = system_findings(Some(4.5), &cfg);
        assert_eq!(f[0].penalty, 20);
    }
}
