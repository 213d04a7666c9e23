use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ScanConfig
// ---------------------------------------------------------------------------

/// Thresholds and static rule lists used to classify samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-process CPU percentage above which a process is flagged.
    pub cpu_threshold: f64,
    /// Keyword matches only count when the process uses more CPU than this.
    pub keyword_cpu_floor: f64,
    /// Unknown-path matches only count when the process uses more CPU than this.
    pub path_cpu_floor: f64,
    /// Resident memory (MB) above which an active process is noted.
    pub ram_threshold_mb: f64,
    pub load_threshold: f64,
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    /// Critical files modified within this many days are flagged.
    pub recent_window_days: f64,
    pub suspicious_keywords: Vec<String>,
    pub blacklist: Vec<String>,
    pub allowed_path_prefixes: Vec<String>,
    pub forbidden_ports: Vec<u16>,
    pub critical_files: Vec<String>,
    pub watched_locations: Vec<String>,
    pub suspicious_file_names: Vec<String>,
    pub log_files: Vec<String>,
    pub monitor_processes: bool,
    pub monitor_network: bool,
    pub monitor_system: bool,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 80.0,
            keyword_cpu_floor: 10.0,
            path_cpu_floor: 20.0,
            ram_threshold_mb: 1024.0,
            load_threshold: 4.0,
            max_connections: 100,
            max_connections_per_ip: 10,
            recent_window_days: 7.0,
            suspicious_keywords: strings(&[
                "dartvm", "miner", "crypto", "bitcoin", "backdoor", "trojan", "virus", "malware",
                "keylogger", "spyware", "rootkit",
            ]),
            blacklist: strings(&[
                "miner", "bitcoin", "backdoor", "trojan", "malware", "keylogger",
            ]),
            allowed_path_prefixes: strings(&[
                "/System",
                "/Library",
                "/Applications",
                "/Users",
                "/private",
                "/usr",
                "/opt",
                "/bin",
                "/sbin",
                "/lib",
                "/home",
                "/snap",
                "/nix",
                "/var",
            ]),
            forbidden_ports: vec![4444, 5555, 6666, 7777, 8888, 9999, 12345, 31337],
            critical_files: strings(&[
                "/etc/hosts",
                "/etc/passwd",
                "/etc/sudoers",
                "~/.ssh/authorized_keys",
                "~/.ssh/config",
                "~/.bashrc",
                "~/.zshrc",
            ]),
            watched_locations: strings(&[
                "~/Library/LaunchAgents",
                "/Library/LaunchAgents",
                "/Library/LaunchDaemons",
                "~/.config/autostart",
                "/tmp",
                "/var/tmp",
            ]),
            suspicious_file_names: strings(&["miner", "crypto", "backdoor", "trojan", "keylog", "spy"]),
            log_files: strings(&["/var/log/system.log", "/var/log/install.log", "/var/log/syslog"]),
            monitor_processes: true,
            monitor_network: true,
            monitor_system: true,
        }
    }
}

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between ticks.
    pub scan_interval: u64,
    /// Terminate processes matching the blacklist. Off unless opted in.
    pub enforce: bool,
    /// Seconds between SIGTERM and the SIGKILL fallback.
    pub grace_period_secs: u64,
    /// Re-hash critical files every N ticks (0 disables).
    pub integrity_every: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: 30,
            enforce: false,
            grace_period_secs: 2,
            integrity_every: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// NotifyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook URLs in addition to the `*_WEBHOOK_URL` environment variables.
    pub webhooks: Vec<String>,
    /// Post a security alert whenever a monitor tick produces findings.
    pub alert_on_findings: bool,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    /// Timeout applied to every external command.
    pub command_timeout_secs: u64,
    pub scan: ScanConfig,
    pub monitor: MonitorConfig,
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            command_timeout_secs: 10,
            scan: ScanConfig::default(),
            monitor: MonitorConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Load `config.yaml` from the state directory. A missing file yields the
    /// defaults; a present but unparseable file is an error.
    pub fn load(state: &Path) -> Result<Self> {
        let path = paths::config_path(state);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, state: &Path) -> Result<()> {
        let path = paths::config_path(state);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.scan_interval.max(1))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        for (name, value) in [
            ("scan.keyword_cpu_floor", self.scan.keyword_cpu_floor),
            ("scan.path_cpu_floor", self.scan.path_cpu_floor),
        ] {
            if !(0.0..=100.0).contains(&value) {
                warn(
                    WarnLevel::Error,
                    format!("{name} = {value} is outside 0-100"),
                );
            }
        }

        if self.scan.cpu_threshold < 0.0 {
            warn(
                WarnLevel::Error,
                format!("scan.cpu_threshold = {} is negative", self.scan.cpu_threshold),
            );
        }

        // ps reports per-core percentages, so >100 is legal but never fires on
        // single-threaded processes.
        if self.scan.cpu_threshold > 100.0 {
            warn(
                WarnLevel::Warning,
                format!(
                    "scan.cpu_threshold = {} only matches multi-threaded processes",
                    self.scan.cpu_threshold
                ),
            );
        }

        if self.monitor.scan_interval == 0 {
            warn(
                WarnLevel::Warning,
                "monitor.scan_interval = 0; using 1 second".to_string(),
            );
        }

        if self.monitor.enforce && self.scan.blacklist.is_empty() {
            warn(
                WarnLevel::Warning,
                "monitor.enforce is on but scan.blacklist is empty; nothing will be terminated"
                    .to_string(),
            );
        }

        for list in [
            ("scan.suspicious_keywords", &self.scan.suspicious_keywords),
            ("scan.blacklist", &self.scan.blacklist),
        ] {
            if list.1.iter().any(|k| k.trim().is_empty()) {
                warn(
                    WarnLevel::Error,
                    format!("{} contains an empty entry, which matches every process", list.0),
                );
            }
        }

        for url in &self.notify.webhooks {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                warn(
                    WarnLevel::Error,
                    format!("notify.webhooks entry '{url}' is not an http(s) URL"),
                );
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
