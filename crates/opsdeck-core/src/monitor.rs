//! Continuous security monitor.
//!
//! Each tick runs a [`Scanner`] pass, appends every finding to
//! `security.log`, optionally terminates blacklisted processes, and writes a
//! report pair when the tick produced findings. The loop ends when the
//! shutdown flag is raised (Ctrl-C) or after `max_ticks`; the last tick's
//! report is flushed on the way out if it was not written already.

use crate::config::Config;
use crate::error::Result;
use crate::knowledge::AgentHub;
use crate::notify::{self, Notifier};
use crate::process::{ProcessControl, Signals, Termination};
use crate::runner::CommandRunner;
use crate::scan::{report, rules, Scan, ScanOptions, ScanReport, Scanner};
use crate::{io, paths};
use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static SIGNALS: Signals = Signals;

const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Sleep for `total`, waking early once `flag` is set.
pub fn sleep_interruptible(flag: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !flag.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SLEEP_STEP));
    }
}

/// Append `[timestamp] [LEVEL] message` to the security log.
pub fn log_event(path: &Path, level: &str, message: &str) {
    let line = format!(
        "[{}] [{level}] {message}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if let Err(e) = io::append_text(path, &line) {
        tracing::warn!(path = %path.display(), error = %e, "could not write security log");
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSummary {
    pub ticks: u64,
    pub total_findings: usize,
    pub reports_written: usize,
    pub terminated: Vec<(u32, Termination)>,
    pub last_report: Option<PathBuf>,
    pub last_score: Option<i64>,
}

pub struct Monitor<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
    state_dir: &'a Path,
    shutdown: Arc<AtomicBool>,
    control: &'a dyn ProcessControl,
    notifier: Option<(&'a Notifier, Option<&'a AgentHub>)>,
    reports_dir: PathBuf,
    interval: Duration,
    max_ticks: Option<u64>,
    /// PIDs already sent a termination; each is signalled at most once.
    blocked: HashSet<u32>,
}

impl<'a> Monitor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a Config,
        state_dir: &'a Path,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            runner,
            config,
            state_dir,
            shutdown,
            control: &SIGNALS,
            notifier: None,
            reports_dir: paths::reports_dir(state_dir),
            interval: config.scan_interval(),
            max_ticks: None,
            blocked: HashSet::new(),
        }
    }

    pub fn with_control(mut self, control: &'a dyn ProcessControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_notifier(mut self, notifier: &'a Notifier, hub: Option<&'a AgentHub>) -> Self {
        self.notifier = Some((notifier, hub));
        self
    }

    pub fn reports_dir(mut self, dir: PathBuf) -> Self {
        self.reports_dir = dir;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_ticks(mut self, ticks: Option<u64>) -> Self {
        self.max_ticks = ticks;
        self
    }

    fn limit_reached(&self, ticks: u64) -> bool {
        self.max_ticks.is_some_and(|max| ticks >= max)
    }

    fn log_path(&self) -> PathBuf {
        paths::security_log_path(self.state_dir)
    }

    fn write(&self, report: &ScanReport, summary: &mut MonitorSummary) {
        match report::write_report(&self.reports_dir, report) {
            Ok((md, _)) => {
                summary.reports_written += 1;
                summary.last_report = Some(md);
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not write security report");
                log_event(&self.log_path(), "ERROR", &format!("report not written: {e}"));
            }
        }
    }

    fn enforce(&mut self, scan: &Scan, summary: &mut MonitorSummary) {
        let me = std::process::id();
        let grace = Duration::from_secs(self.config.monitor.grace_period_secs);
        for p in &scan.sample.processes {
            if p.pid == me || p.pid <= 1 || self.blocked.contains(&p.pid) {
                continue;
            }
            let Some(entry) = rules::blacklist_match(&p.command, &self.config.scan) else {
                continue;
            };
            self.blocked.insert(p.pid);
            let outcome = self.control.terminate(p.pid, grace);
            let message = format!(
                "terminate pid {} ('{}', blacklist '{entry}'): {outcome:?}",
                p.pid, p.command
            );
            match outcome {
                Termination::Failed => tracing::warn!("{message}"),
                _ => tracing::info!("{message}"),
            }
            log_event(&self.log_path(), "ACTION", &message);
            summary.terminated.push((p.pid, outcome));
        }
    }

    fn alert(&self, report: &ScanReport) {
        if !self.config.notify.alert_on_findings {
            return;
        }
        if let Some((notifier, hub)) = self.notifier {
            let result = notifier.broadcast(hub, &notify::security_alert_notice(report));
            tracing::debug!(delivered = result.delivered, total = result.total, "security alert sent");
        }
    }

    pub fn run(mut self) -> Result<MonitorSummary> {
        let mut summary = MonitorSummary::default();
        let log = self.log_path();
        let every = self.config.monitor.integrity_every;
        log_event(
            &log,
            "INFO",
            &format!(
                "monitor started (interval {}s, enforce {})",
                self.interval.as_secs(),
                self.config.monitor.enforce
            ),
        );

        let mut last: Option<ScanReport> = None;
        let mut last_written = false;

        while !self.shutdown.load(Ordering::Relaxed) && !self.limit_reached(summary.ticks) {
            summary.ticks += 1;
            let opts = ScanOptions {
                integrity: every > 0 && (summary.ticks - 1) % every == 0,
                files: true,
            };

            let scanner = Scanner::new(self.runner, &self.config.scan, self.state_dir);
            match scanner.run(opts) {
                Ok(scan) => {
                    for f in &scan.report.findings {
                        log_event(&log, f.severity.as_str(), &f.reason);
                    }
                    if self.config.monitor.enforce {
                        self.enforce(&scan, &mut summary);
                    }
                    summary.total_findings += scan.report.findings.len();
                    summary.last_score = Some(scan.report.score);
                    last_written = !scan.report.findings.is_empty();
                    if last_written {
                        self.write(&scan.report, &mut summary);
                        self.alert(&scan.report);
                    }
                    tracing::info!(
                        tick = summary.ticks,
                        findings = scan.report.findings.len(),
                        score = scan.report.display_score(),
                        "tick complete"
                    );
                    last = Some(scan.report);
                }
                Err(e) => {
                    tracing::warn!(tick = summary.ticks, error = %e, "scan failed");
                    log_event(&log, "ERROR", &format!("scan failed: {e}"));
                }
            }

            if self.limit_reached(summary.ticks) {
                break;
            }
            sleep_interruptible(&self.shutdown, self.interval);
        }

        if let Some(report) = &last {
            if !last_written {
                self.write(report, &mut summary);
            }
        }
        log_event(
            &log,
            "INFO",
            &format!(
                "monitor stopped after {} ticks, {} findings",
                summary.ticks, summary.total_findings
            ),
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;
    use std::cell::RefCell;
    use tempfile::TempDir;

    const PS: &str = "\
USER PID %CPU %MEM VSZ RSS TT STAT STARTED TIME COMMAND
eve 4242 50.0 1.0 1000 2048 ?? R 9:00 1:00 /usr/local/bin/bitcoin-miner
";

    #[derive(Default)]
    struct Recorder {
        terms: RefCell<Vec<u32>>,
    }

    impl ProcessControl for Recorder {
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
        fn signal_term(&self, pid: u32) -> bool {
            self.terms.borrow_mut().push(pid);
            true
        }
        fn signal_kill(&self, _pid: u32) -> bool {
            true
        }
    }

    fn quiet_config() -> Config {
        let mut cfg = Config::default();
        cfg.scan.critical_files.clear();
        cfg.scan.watched_locations.clear();
        cfg.scan.log_files.clear();
        cfg.monitor.grace_period_secs = 0;
        cfg
    }

    fn runner(ps: &str) -> ScriptedRunner {
        ScriptedRunner::new()
            .with("ps aux", ps)
            .with("netstat -an", "")
            .with("lsof -i -P -n", "")
            .with("uptime", "load average: 0.10, 0.10, 0.10")
    }

    #[test]
    fn enforce_terminates_each_pid_once() {
        let state = TempDir::new().unwrap();
        let mut cfg = quiet_config();
        cfg.monitor.enforce = true;
        let runner = runner(PS);
        let control = Recorder::default();

        let summary = Monitor::new(&runner, &cfg, state.path(), Arc::new(AtomicBool::new(false)))
            .with_control(&control)
            .interval(Duration::ZERO)
            .max_ticks(Some(3))
            .run()
            .unwrap();

        assert_eq!(summary.ticks, 3);
        assert_eq!(*control.terms.borrow(), vec![4242]);
        assert_eq!(summary.terminated, vec![(4242, Termination::Terminated)]);
        // Still flagged every tick.
        assert_eq!(summary.reports_written, 3);

        let log = std::fs::read_to_string(paths::security_log_path(state.path())).unwrap();
        assert!(log.contains("[CRITICAL]"));
        assert!(log.contains("[ACTION] terminate pid 4242"));
        assert!(log.contains("monitor stopped after 3 ticks"));
    }

    #[test]
    fn no_termination_without_enforce() {
        let state = TempDir::new().unwrap();
        let cfg = quiet_config();
        let runner = runner(PS);
        let control = Recorder::default();
        let summary = Monitor::new(&runner, &cfg, state.path(), Arc::new(AtomicBool::new(false)))
            .with_control(&control)
            .interval(Duration::ZERO)
            .max_ticks(Some(1))
            .run()
            .unwrap();
        assert!(control.terms.borrow().is_empty());
        assert!(summary.terminated.is_empty());
        assert!(summary.total_findings > 0);
    }

    #[test]
    fn clean_ticks_write_only_the_final_report() {
        let state = TempDir::new().unwrap();
        let cfg = quiet_config();
        let runner = runner("");
        let summary = Monitor::new(&runner, &cfg, state.path(), Arc::new(AtomicBool::new(false)))
            .interval(Duration::ZERO)
            .max_ticks(Some(2))
            .run()
            .unwrap();
        assert_eq!(summary.total_findings, 0);
        assert_eq!(summary.reports_written, 1);
        assert_eq!(summary.last_score, Some(100));
        let files = std::fs::read_dir(paths::reports_dir(state.path())).unwrap().count();
        assert_eq!(files, 2);
    }

    #[test]
    fn raised_flag_stops_before_first_tick() {
        let state = TempDir::new().unwrap();
        let cfg = quiet_config();
        let runner = runner(PS);
        let summary = Monitor::new(&runner, &cfg, state.path(), Arc::new(AtomicBool::new(true)))
            .run()
            .unwrap();
        assert_eq!(summary.ticks, 0);
        assert_eq!(summary.reports_written, 0);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn zero_max_ticks_runs_nothing() {
        let state = TempDir::new().unwrap();
        let cfg = quiet_config();
        let runner = runner(PS);
        let summary = Monitor::new(&runner, &cfg, state.path(), Arc::new(AtomicBool::new(false)))
            .interval(Duration::ZERO)
            .max_ticks(Some(0))
            .run()
            .unwrap();
        assert_eq!(summary.ticks, 0);
        assert_eq!(summary.reports_written, 0);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn sleep_wakes_on_flag() {
        let flag = AtomicBool::new(true);
        let start = Instant::now();
        sleep_interruptible(&flag, Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
