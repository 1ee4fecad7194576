mod config;
mod schedule;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reportd_client::{BrowserSessionFactory, HttpClient, PushPlusNotifier};
use reportd_core::page::BaselineStore;
use reportd_core::submit::PortalScriptSource;
use reportd_core::{
    DiffMonitor, FileBaseline, HourlyPolicy, JobOutcome, JobTiming, Notifier, PaceDelay,
    RateLimiterRegistry, RetryDecision, ShutdownController, SubmissionRunner, run_with_retry,
    sleep_or_cancel,
};

use config::Config;

/// PushPlus rejects calls arriving faster than one per 20 seconds.
const PUSHPLUS_DELAY: Duration = Duration::from_secs(20);

/// Monitoring starts after the submission round triggered at boot has
/// had a chance to finish logging in.
const MONITOR_INITIAL_DELAY: Duration = Duration::from_secs(10 * 60);

#[derive(Parser)]
#[command(name = "reportd", version, about = "Scheduled health report submission daemon")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "REPORTD_CONFIG", default_value = "config/config.yaml")]
    config: PathBuf,

    /// Run a submission round right away instead of waiting for the
    /// next scheduled trigger
    #[arg(short, long, default_value_t = false)]
    immediate: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut filter = EnvFilter::from_default_env();
    for target in ["reportd_cli", "reportd_core", "reportd_client"] {
        filter = filter.add_directive(format!("{target}={}", cli.log_level).parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let debug_mode = matches!(
        cli.log_level.to_ascii_lowercase().as_str(),
        "debug" | "trace"
    );

    let shutdown = Arc::new(ShutdownController::new());
    spawn_signal_handler(shutdown.clone());
    let cancel = shutdown.token();

    let registry = Arc::new(
        RateLimiterRegistry::new().with_limit("pushplus.plus", PaceDelay::fixed(PUSHPLUS_DELAY)),
    );
    let http = HttpClient::new(registry, cancel.clone())?;
    let notifier = PushPlusNotifier::new(http, &config.notification.token);
    // Debug runs must not push to the operator's phone.
    let notifier = Arc::new(if debug_mode { notifier.muted() } else { notifier });

    let portal = Arc::new(config.portal_spec());
    let baseline = FileBaseline::new(&config.baseline_path).load()?;

    let factory = Arc::new(
        BrowserSessionFactory::new()
            .await
            .context("Failed to launch the browser")?,
    );

    let monitor_account = config
        .accounts
        .first()
        .cloned()
        .context("No accounts configured")?;
    let monitor_source = PortalScriptSource::new(
        factory.clone(),
        notifier.clone(),
        portal.clone(),
        JobTiming::default(),
        monitor_account,
        cancel.clone(),
    );
    let monitor = DiffMonitor::new(
        monitor_source,
        FileBaseline::new(&config.baseline_path),
        monitor_policy(),
    )?;

    let monitor_task = {
        let shutdown = shutdown.clone();
        let notifier = notifier.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if sleep_or_cancel(MONITOR_INITIAL_DELAY, &cancel).await.is_err() {
                return;
            }
            let result = run_with_retry(
                || monitor.run(cancel.clone()),
                |err| {
                    let content = format!("```\n{err}\n```");
                    let notifier = notifier.clone();
                    async move {
                        notifier.notify("Error", &content).await;
                        RetryDecision::retry_logged()
                    }
                },
            )
            .await;
            match result {
                Ok(diff) => {
                    let diff_text = diff.join("\n");
                    tracing::warn!("Page changed:\n{diff_text}");
                    notifier
                        .notify("Page changed", &format!("```diff\n{diff_text}\n```"))
                        .await;
                    shutdown.request();
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => tracing::error!(error = %err, "Monitor stopped"),
            }
        })
    };

    let runner = SubmissionRunner::new(
        factory,
        notifier,
        portal,
        shutdown.clone(),
        baseline,
        JobTiming::default(),
        false,
    );

    let schedule_task = {
        let runner = runner.clone();
        let accounts = config.accounts.clone();
        let cancel = cancel.clone();
        let immediate = cli.immediate;
        tokio::spawn(async move {
            if immediate {
                tracing::info!("Immediate submission round requested");
                let outcomes = runner
                    .clone()
                    .with_immediate(true)
                    .run_all(&accounts, cancel.clone())
                    .await;
                log_outcomes(&outcomes);
            }
            loop {
                if schedule::wait_for_next_trigger(&cancel).await.is_err() {
                    break;
                }
                let outcomes = runner.run_all(&accounts, cancel.clone()).await;
                log_outcomes(&outcomes);
            }
        })
    };

    shutdown.token().cancelled().await;
    // A second interrupt force-exits through the controller, so this
    // wait cannot hang the operator.
    tracing::info!("Draining outstanding tasks");
    let _ = schedule_task.await;
    let _ = monitor_task.await;

    Ok(())
}

/// Poll rarely at night and during the portal's maintenance window,
/// every ten minutes otherwise.
fn monitor_policy() -> HourlyPolicy {
    HourlyPolicy::new(PaceDelay::fixed(Duration::from_secs(10 * 60)))
        .with_range(0, 6, PaceDelay::fixed(Duration::from_secs(6 * 3600)))
        .with_range(22, 23, PaceDelay::fixed(Duration::from_secs(8 * 3600)))
}

/// First signal drains, second force-exits.
fn spawn_signal_handler(shutdown: Arc<ShutdownController>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                shutdown.request();
            }
        }
        #[cfg(not(unix))]
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            shutdown.request();
        }
    });
}

fn log_outcomes(outcomes: &[(String, JobOutcome)]) {
    for (account, outcome) in outcomes {
        match outcome {
            JobOutcome::Succeeded => tracing::info!(account, "Submission succeeded"),
            other => tracing::warn!(account, ?other, "Submission did not complete"),
        }
    }
}
