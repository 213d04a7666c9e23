//! Samplers: run a listing command and split its stdout into records.
//!
//! Parsing never fails. Lines with too few fields or non-numeric values where
//! numbers are expected are dropped and do not affect the other records.

use crate::config::ScanConfig;
use crate::runner::CommandRunner;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub cpu: f64,
    pub mem: f64,
    pub rss_kb: u64,
    pub command: String,
}

impl ProcessSample {
    pub fn rss_mb(&self) -> f64 {
        self.rss_kb as f64 / 1024.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub local: String,
    pub remote: String,
}

impl Connection {
    pub fn remote_ip(&self) -> String {
        strip_port(&self.remote)
    }
}

/// One tick's worth of raw data. Disabled or failed sources are empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub processes: Vec<ProcessSample>,
    pub connections: Vec<Connection>,
    pub listening_ports: Vec<u16>,
    pub load: Option<f64>,
}

// ---------------------------------------------------------------------------
// ps aux
// ---------------------------------------------------------------------------

/// `ps aux`: USER PID %CPU %MEM VSZ RSS TT STAT STARTED TIME COMMAND...
/// The header line fails the PID parse and drops out like any malformed line.
pub fn parse_ps(output: &str) -> Vec<ProcessSample> {
    output.lines().filter_map(parse_ps_line).collect()
}

fn parse_ps_line(line: &str) -> Option<ProcessSample> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 11 {
        return None;
    }
    Some(ProcessSample {
        pid: fields[1].parse().ok()?,
        cpu: parse_decimal(fields[2])?,
        mem: parse_decimal(fields[3])?,
        rss_kb: fields[5].parse().ok()?,
        command: fields[10..].join(" "),
    })
}

/// Some locales print `12,5` for percentages.
fn parse_decimal(s: &str) -> Option<f64> {
    let v: f64 = s.replace(',', ".").parse().ok()?;
    v.is_finite().then_some(v)
}

// ---------------------------------------------------------------------------
// netstat -an
// ---------------------------------------------------------------------------

pub fn parse_netstat(output: &str) -> Vec<Connection> {
    output
        .lines()
        .filter(|l| l.contains("ESTABLISHED"))
        .filter_map(|l| {
            let fields: Vec<&str> = l.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            Some(Connection {
                local: fields[3].to_string(),
                remote: fields[4].to_string(),
            })
        })
        .collect()
}

/// Remove the port from a netstat peer address and return the bare host.
///
/// Handles `1.2.3.4:443`, `[::1]:443`, BSD-style `1.2.3.4.443` and
/// `fe80::1.443`, and Linux tcp6 peers such as `2001:db8::9:40000`.
/// IPv4-mapped peers (`::ffff:6.6.6.6:51000`) come back in IPv4 form.
pub fn strip_port(addr: &str) -> String {
    unmap_v4(&host_part(addr)).to_string()
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn host_part(addr: &str) -> String {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host.to_string();
        }
    }
    match addr.matches(':').count() {
        0 => {
            if addr.matches('.').count() == 4 {
                if let Some((host, _)) = addr.rsplit_once('.') {
                    return host.to_string();
                }
            }
        }
        1 => {
            if let Some((host, _)) = addr.rsplit_once(':') {
                return host.to_string();
            }
        }
        _ => {
            // Linux prints IPv6 peers unbracketed with a trailing `:port`.
            // A host ending in `:` means the digits were the last group of
            // a portless address such as `::1`.
            if let Some((host, port)) = addr.rsplit_once(':') {
                if all_digits(port) && !host.is_empty() && !host.ends_with(':') {
                    return host.to_string();
                }
            }
            // BSD prints IPv6 peers as `fe80::1.443`.
            if let Some((host, port)) = addr.rsplit_once('.') {
                if all_digits(port) {
                    return host.to_string();
                }
            }
        }
    }
    addr.to_string()
}

fn unmap_v4(host: &str) -> &str {
    match host.strip_prefix("::ffff:") {
        Some(v4) if v4.contains('.') => v4,
        _ => host,
    }
}

// ---------------------------------------------------------------------------
// lsof -i -P -n
// ---------------------------------------------------------------------------

/// Listening ports, sorted and de-duplicated. The port is the digits after
/// the last `:` in the NAME column (`*:8080 (LISTEN)`).
pub fn parse_listening_ports(output: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = output
        .lines()
        .filter(|l| l.contains("LISTEN"))
        .filter_map(|l| {
            let name = l.split_whitespace().rev().find(|f| f.contains(':'))?;
            let (_, tail) = name.rsplit_once(':')?;
            let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

// ---------------------------------------------------------------------------
// uptime
// ---------------------------------------------------------------------------

static LOAD_RE: OnceLock<Regex> = OnceLock::new();

/// First figure after `load average:` (Linux) or `load averages:` (macOS).
pub fn parse_load(output: &str) -> Option<f64> {
    let re = LOAD_RE.get_or_init(|| Regex::new(r"load averages?:\s*([0-9]+(?:[.,][0-9]+)?)").unwrap());
    let caps = re.captures(output)?;
    parse_decimal(&caps[1])
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

pub fn collect(runner: &dyn CommandRunner, cfg: &ScanConfig) -> Sample {
    let mut sample = Sample::default();
    if cfg.monitor_processes {
        sample.processes = parse_ps(&runner.stdout_or_empty("ps", &["aux"]));
    }
    if cfg.monitor_network {
        sample.connections = parse_netstat(&runner.stdout_or_empty("netstat", &["-an"]));
        sample.listening_ports =
            parse_listening_ports(&runner.stdout_or_empty("lsof", &["-i", "-P", "-n"]));
    }
    if cfg.monitor_system {
        sample.load = parse_load(&runner.stdout_or_empty("uptime", &[]));
    }
    sample
}
