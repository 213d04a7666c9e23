mod cmd;
mod output;
mod root;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, kb::KbSubcommand, notify::NotifySubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "opsdeck",
    about = "Repository dashboards, team notifications, agent knowledge base and host security scans",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .git/)
    #[arg(long, global = true, env = "OPSDECK_ROOT")]
    root: Option<PathBuf>,

    /// State directory for config, knowledge base and reports (default: ~/.opsdeck)
    #[arg(long, global = true, env = "OPSDECK_HOME")]
    home: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect git activity for every repository under the root
    Dashboard {
        /// Post a dashboard update to the configured webhooks
        #[arg(long)]
        notify: bool,

        /// Print only; don't write dashboard_data.json
        #[arg(long)]
        no_save: bool,
    },

    /// Shared agent knowledge base and messages
    Kb {
        #[command(subcommand)]
        subcommand: KbSubcommand,
    },

    /// Send notifications to Slack / Teams webhooks
    Notify {
        #[command(subcommand)]
        subcommand: NotifySubcommand,
    },

    /// Run a single security scan and write a report
    Scan {
        /// Skip recent-modification, watched-location and log checks
        #[arg(long)]
        no_files: bool,

        /// Skip the critical-file hash comparison
        #[arg(long)]
        no_integrity: bool,

        /// Replace the integrity baseline with the current hashes first
        #[arg(long)]
        rebaseline: bool,

        /// Don't write the Markdown/JSON report pair
        #[arg(long)]
        no_report: bool,

        /// Post the scan summary to the configured webhooks
        #[arg(long)]
        notify: bool,
    },

    /// Scan repeatedly until interrupted
    Monitor {
        /// Seconds between scans (overrides monitor.scan_interval)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many scans
        #[arg(long)]
        ticks: Option<u64>,

        /// Terminate processes matching the blacklist
        #[arg(long)]
        enforce: bool,

        /// Post an alert for every scan with findings
        #[arg(long)]
        notify: bool,
    },

    /// Show, initialise and validate config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let root = root::resolve_root(cli.root.as_deref());
    let state = opsdeck_core::paths::state_dir(cli.home.as_deref())
        .context("cannot locate the state directory")?;

    match cli.command {
        Commands::Dashboard { notify, no_save } => {
            cmd::dashboard::run(&root, &state, notify, !no_save, cli.json)
        }
        Commands::Kb { subcommand } => cmd::kb::run(&state, subcommand, cli.json),
        Commands::Notify { subcommand } => cmd::notify::run(&root, &state, subcommand, cli.json),
        Commands::Scan {
            no_files,
            no_integrity,
            rebaseline,
            no_report,
            notify,
        } => cmd::scan::run(
            &state,
            cmd::scan::ScanArgs {
                files: !no_files,
                integrity: !no_integrity,
                rebaseline,
                report: !no_report,
                notify,
            },
            cli.json,
        ),
        Commands::Monitor {
            interval,
            ticks,
            enforce,
            notify,
        } => cmd::monitor::run(
            &state,
            cmd::monitor::MonitorArgs {
                interval,
                ticks,
                enforce,
                notify,
            },
            cli.json,
        ),
        Commands::Config { subcommand } => cmd::config::run(&state, subcommand, cli.json),
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Monitor { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli) {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
