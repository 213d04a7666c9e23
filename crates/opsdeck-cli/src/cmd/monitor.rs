use crate::output::print_json;
use anyhow::Context;
use opsdeck_core::config::Config;
use opsdeck_core::knowledge::AgentHub;
use opsdeck_core::monitor::Monitor;
use opsdeck_core::notify::Notifier;
use opsdeck_core::paths;
use opsdeck_core::pidfile::PidGuard;
use opsdeck_core::runner::SystemRunner;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct MonitorArgs {
    pub interval: Option<u64>,
    pub ticks: Option<u64>,
    pub enforce: bool,
    pub notify: bool,
}

pub fn run(state: &Path, args: MonitorArgs, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load(state).context("failed to load config")?;
    if let Some(secs) = args.interval {
        config.monitor.scan_interval = secs;
    }
    if args.enforce {
        config.monitor.enforce = true;
    }
    if args.notify {
        config.notify.alert_on_findings = true;
    }
    for w in config.validate() {
        tracing::warn!("config: {}", w.message);
    }

    let _guard = PidGuard::acquire(&paths::pid_path(state))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl-C handler")?;

    let runner = SystemRunner::new(config.command_timeout());
    let notifier = Notifier::from_env(&config.notify)?;
    let hub = AgentHub::open(state);

    tracing::info!(
        interval = config.monitor.scan_interval,
        enforce = config.monitor.enforce,
        "monitoring; press Ctrl-C to stop"
    );

    let summary = Monitor::new(&runner, &config, state, shutdown)
        .with_notifier(&notifier, Some(&hub))
        .interval(Duration::from_secs(config.monitor.scan_interval.max(1)))
        .max_ticks(args.ticks)
        .run()
        .context("monitor failed")?;

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "Stopped after {} scans: {} findings, {} reports written.",
            summary.ticks, summary.total_findings, summary.reports_written
        );
        if let Some(score) = summary.last_score {
            println!("Last score: {}/100", score.max(0));
        }
        for (pid, outcome) in &summary.terminated {
            println!("  pid {pid}: {outcome:?}");
        }
        if let Some(path) = &summary.last_report {
            println!("Last report: {}", path.display());
        }
    }
    Ok(())
}
